//! Listening socket context.

use crate::core::socket::{SocketContext, READ_INTEREST};
use mio::Interest;
use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::Arc;
use tracing::{debug, error, info};

pub(crate) type AfterAcceptCallback = Box<dyn Fn(TcpStream, SocketAddr) + Send + Sync>;

/// Non-blocking listener registered on the main loop; accepted sockets are
/// handed to the after-accept callback.
pub(crate) struct Acceptor {
    listener: TcpListener,
    after_accept: AfterAcceptCallback,
}

impl Acceptor {
    /// Create, configure and bind the listening socket. Any failure here is
    /// fatal for the server.
    pub(crate) fn bind(addr: SocketAddr, after_accept: AfterAcceptCallback) -> io::Result<Arc<Self>> {
        let socket = Socket::new(
            match addr {
                SocketAddr::V4(_) => Domain::IPV4,
                SocketAddr::V6(_) => Domain::IPV6,
            },
            Type::STREAM,
            Some(Protocol::TCP),
        )?;
        socket.set_reuse_address(true)?;
        socket.bind(&addr.into())?;
        socket.set_nonblocking(true)?;
        socket.listen(libc::SOMAXCONN)?;

        let listener: TcpListener = socket.into();
        info!(addr = %listener.local_addr()?, "server listening");
        Ok(Arc::new(Self {
            listener,
            after_accept,
        }))
    }

    /// Actual bound address, useful when binding port 0.
    pub(crate) fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }
}

impl SocketContext for Acceptor {
    fn fd(&self) -> RawFd {
        self.listener.as_raw_fd()
    }

    fn interest(&self) -> Interest {
        READ_INTEREST
    }

    /// Accept until the backlog is drained. Only a hard `accept` failure
    /// removes the acceptor, which is typically fatal for the server.
    fn handle_read(self: Arc<Self>) -> bool {
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    debug!(peer = %peer, "accepted connection");
                    (self.after_accept)(stream, peer);
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return true,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    error!(error = %e, "accept failed");
                    return false;
                }
            }
        }
    }
}
