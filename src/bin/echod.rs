//! Echo server demo: every received byte is sent straight back.

use skyline::config::Config;
use skyline::core::{Buffer, Connection, Reactor, TcpHandler, TcpServer};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

struct EchoHandler;

impl TcpHandler for EchoHandler {
    fn after_connect(&self, conn: &Arc<Connection>) {
        info!(fd = conn.fd(), "connected");
    }

    fn on_recv(&self, conn: &Arc<Connection>, buf: &mut Buffer) {
        let message = buf.read_all();
        debug!(fd = conn.fd(), len = message.len(), "echo");
        conn.send(message);
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load()?;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let addr: SocketAddr = config.listen.parse()?;
    let reactor = Reactor::new(config.workers)?;
    let server = TcpServer::new(addr, Arc::clone(&reactor), Arc::new(EchoHandler));
    let local_addr = server.start_listen()?;
    info!(addr = %local_addr, workers = config.workers, "echo server up");

    reactor.start()?;
    Ok(())
}
