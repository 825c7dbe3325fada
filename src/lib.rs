//! skyline: a main/sub reactor network server framework.
//!
//! One acceptor loop hands connections to a pool of I/O worker loops, each a
//! single-threaded epoll-based readiness loop with its own timer. On top of
//! the reactor sits a TCP server skeleton (edge-triggered reads, buffered
//! writes with backpressure) and a minimal HTTP/1.x layer with incremental
//! request parsing, keep-alive/idle-timeout management and servlet routing
//! (exact paths plus shell-style globs).
//!
//! ```no_run
//! use skyline::core::Reactor;
//! use skyline::http::HttpServer;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let reactor = Reactor::new(4)?;
//!     let server = HttpServer::new("0.0.0.0:8889".parse()?, reactor.clone());
//!     server.add_servlet("/hello", |_req, res, _conn| {
//!         res.body = b"hi".to_vec();
//!         0
//!     });
//!     server.start_listen()?;
//!     reactor.start()?; // blocks on the main loop
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod core;
pub mod http;

pub use crate::core::{Buffer, Connection, Reactor, TcpHandler, TcpServer};
pub use crate::http::{HttpRequest, HttpResponse, HttpServer};
