//! Established-connection context: edge-triggered reads, buffered writes
//! with partial-write backpressure, and loop-coordinated close.

use crate::core::buffer::Buffer;
use crate::core::event_loop::EventLoop;
use crate::core::socket::{SocketContext, READ_INTEREST};
use crate::core::tcp_server::TcpHandler;
use bytes::Bytes;
use mio::Interest;
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{error, trace};

const READ_CHUNK_LEN: usize = 1024;

/// One accepted TCP connection, owned by a single event loop.
///
/// The loop's fd table holds the primary reference; handlers and timer
/// callbacks hold temporary clones. The socket closes when the last clone
/// drops, which the loop guarantees happens only after deregistration.
pub struct Connection {
    stream: TcpStream,
    event_loop: Arc<EventLoop>,
    /// Watched-event mask; `WRITABLE` is ORed in while output is buffered.
    interest: Mutex<Interest>,
    read_buf: Mutex<Buffer>,
    write_buf: Mutex<Buffer>,
    /// Set once `close` runs; removal is deferred until the write buffer
    /// drains so already-queued output still reaches the peer.
    closing: AtomicBool,
    handler: Arc<dyn TcpHandler>,
}

impl Connection {
    pub(crate) fn new(
        event_loop: Arc<EventLoop>,
        stream: TcpStream,
        handler: Arc<dyn TcpHandler>,
    ) -> io::Result<Arc<Self>> {
        stream.set_nonblocking(true)?;
        Ok(Arc::new(Self {
            stream,
            event_loop,
            interest: Mutex::new(READ_INTEREST),
            read_buf: Mutex::new(Buffer::new()),
            write_buf: Mutex::new(Buffer::new()),
            closing: AtomicBool::new(false),
            handler,
        }))
    }

    pub fn fd(&self) -> RawFd {
        self.stream.as_raw_fd()
    }

    /// The loop that owns this connection; handlers use it to schedule
    /// timers and tasks.
    pub fn event_loop(&self) -> &Arc<EventLoop> {
        &self.event_loop
    }

    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.stream.peer_addr()
    }

    /// Queue bytes for delivery. Safe from any thread: the data is copied
    /// into an owned task posted through the owning loop. In-loop the task
    /// attempts one immediate non-blocking write; the unsent remainder is
    /// buffered and write readiness is registered until it drains.
    pub fn send(self: &Arc<Self>, data: impl Into<Bytes>) {
        let data = data.into();
        let this = Arc::clone(self);
        self.event_loop.run_in_loop(move || this.write_in_loop(&data));
    }

    /// Schedule removal from the owning loop. If buffered output is pending
    /// the connection lingers, write-only, until it drains. The fd closes
    /// when the last reference drops.
    pub fn close(self: &Arc<Self>) {
        let this = Arc::clone(self);
        self.event_loop.run_in_loop(move || {
            if this.closing.swap(true, Ordering::AcqRel) {
                return;
            }
            if this.write_buf.lock().unwrap().is_empty() {
                this.event_loop.remove_socket(this.fd());
            }
            // Otherwise the loop removes the context once the write buffer
            // drains; WRITABLE is already registered by the buffering path.
        });
    }

    fn write_in_loop(self: &Arc<Self>, data: &[u8]) {
        if self.closing.load(Ordering::Acquire) {
            trace!(fd = self.fd(), "send on closing connection dropped");
            return;
        }
        let mut write_buf = self.write_buf.lock().unwrap();
        if !write_buf.is_empty() {
            // Earlier output is still queued; writing directly would reorder
            // bytes on the wire.
            write_buf.write(data);
            drop(write_buf);
            self.enable_writable();
            return;
        }
        loop {
            match (&self.stream).write(data) {
                Ok(n) if n < data.len() => {
                    write_buf.write(&data[n..]);
                    drop(write_buf);
                    self.enable_writable();
                    return;
                }
                Ok(_) => return,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                    write_buf.write(data);
                    drop(write_buf);
                    self.enable_writable();
                    return;
                }
                Err(e) => {
                    error!(fd = self.fd(), error = %e, "write failed");
                    drop(write_buf);
                    self.close();
                    return;
                }
            }
        }
    }

    fn enable_writable(self: &Arc<Self>) {
        let interest = {
            let mut interest = self.interest.lock().unwrap();
            if interest.is_writable() {
                return;
            }
            *interest = interest.add(Interest::WRITABLE);
            *interest
        };
        self.event_loop.update_socket(self.fd(), interest);
    }
}

impl SocketContext for Connection {
    fn fd(&self) -> RawFd {
        self.stream.as_raw_fd()
    }

    fn interest(&self) -> Interest {
        *self.interest.lock().unwrap()
    }

    /// Drain the socket until `WouldBlock`, then hand the accumulated bytes
    /// to the handler. Returns `false` on orderly peer close or a hard read
    /// error.
    fn handle_read(self: Arc<Self>) -> bool {
        let mut chunk = [0u8; READ_CHUNK_LEN];
        loop {
            match (&self.stream).read(&mut chunk) {
                Ok(0) => return false,
                Ok(n) => self.read_buf.lock().unwrap().write(&chunk[..n]),
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                    let mut read_buf = self.read_buf.lock().unwrap();
                    if !read_buf.is_empty() {
                        let handler = Arc::clone(&self.handler);
                        handler.on_recv(&self, &mut read_buf);
                    }
                    return true;
                }
                Err(e) => {
                    error!(fd = self.fd(), error = %e, "read failed");
                    return false;
                }
            }
        }
    }

    /// One non-blocking write of the buffered output; the kernel takes what
    /// fits and the rest stays queued for the next writable event.
    fn handle_write(&self) -> bool {
        let mut write_buf = self.write_buf.lock().unwrap();
        if write_buf.is_empty() {
            return true;
        }
        loop {
            match (&self.stream).write(write_buf.as_slice()) {
                Ok(n) => {
                    write_buf.consume(n);
                    return true;
                }
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return true,
                Err(_) => return false,
            }
        }
    }

    fn need_write(&self) -> bool {
        !self.write_buf.lock().unwrap().is_empty()
    }

    fn is_closing(&self) -> bool {
        self.closing.load(Ordering::Acquire)
    }

    fn clear_writable(&self) -> Interest {
        let mut interest = self.interest.lock().unwrap();
        if let Some(cleared) = interest.remove(Interest::WRITABLE) {
            *interest = cleared;
        }
        *interest
    }
}
