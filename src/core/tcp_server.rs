//! TCP server skeleton: an acceptor on the main loop plus per-connection
//! contexts spread across the sub loops.

use crate::core::acceptor::Acceptor;
use crate::core::buffer::Buffer;
use crate::core::connection::Connection;
use crate::core::reactor::Reactor;
use crate::core::socket::SocketContext;
use std::io;
use std::net::{SocketAddr, TcpStream};
use std::os::unix::io::RawFd;
use std::sync::{Arc, Mutex};
use tracing::error;

/// Application hooks for a [`TcpServer`].
///
/// Both run on the connection's loop thread and must not block: a blocked
/// callback stalls every connection on that loop.
pub trait TcpHandler: Send + Sync + 'static {
    /// Called for each accepted connection, before it is added to its loop.
    fn after_connect(&self, _conn: &Arc<Connection>) {}

    /// Called whenever at least one byte is buffered. The handler may
    /// consume any prefix of `buf`; unread bytes remain for the next call.
    fn on_recv(&self, conn: &Arc<Connection>, buf: &mut Buffer);
}

/// Binds an address on a reactor and feeds accepted connections to a
/// [`TcpHandler`].
pub struct TcpServer {
    addr: SocketAddr,
    reactor: Arc<Reactor>,
    handler: Arc<dyn TcpHandler>,
    listen_fd: Mutex<Option<RawFd>>,
}

impl TcpServer {
    pub fn new(addr: SocketAddr, reactor: Arc<Reactor>, handler: Arc<dyn TcpHandler>) -> Self {
        Self {
            addr,
            reactor,
            handler,
            listen_fd: Mutex::new(None),
        }
    }

    pub fn reactor(&self) -> &Arc<Reactor> {
        &self.reactor
    }

    /// Create the acceptor on the main loop. Each accepted socket is
    /// assigned a sub loop round-robin, wrapped in a [`Connection`] wired to
    /// the handler, announced via `after_connect`, then registered with its
    /// loop. Returns the bound address.
    pub fn start_listen(&self) -> io::Result<SocketAddr> {
        let reactor = Arc::clone(&self.reactor);
        let handler = Arc::clone(&self.handler);
        let after_accept = Box::new(move |stream: TcpStream, peer: SocketAddr| {
            let event_loop = reactor.next_loop();
            match Connection::new(Arc::clone(&event_loop), stream, Arc::clone(&handler)) {
                Ok(conn) => {
                    handler.after_connect(&conn);
                    event_loop.add_socket(conn);
                }
                Err(e) => error!(peer = %peer, error = %e, "connection setup failed"),
            }
        });

        let acceptor = Acceptor::bind(self.addr, after_accept)?;
        let local_addr = acceptor.local_addr()?;
        *self.listen_fd.lock().unwrap() = Some(SocketContext::fd(acceptor.as_ref()));
        self.reactor.main_loop().add_socket(acceptor);
        Ok(local_addr)
    }

    /// Remove the acceptor from the main loop; established connections are
    /// unaffected.
    pub fn stop_listen(&self) {
        if let Some(fd) = self.listen_fd.lock().unwrap().take() {
            self.reactor.main_loop().remove_socket(fd);
        }
    }
}
