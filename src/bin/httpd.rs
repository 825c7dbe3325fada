//! HTTP server demo: one exact route, one glob route, 404 for the rest.

use skyline::config::Config;
use skyline::core::Reactor;
use skyline::http::HttpServer;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

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
    let server = HttpServer::new(addr, Arc::clone(&reactor));
    server.set_keepalive(config.keepalive);
    server.set_idle_timeout(Duration::from_millis(config.idle_timeout_ms));

    // Echo the serialized request back.
    server.add_servlet("/skyline/xx", |req, res, _conn| {
        res.body = req.to_bytes().to_vec();
        0
    });
    server.add_glob_servlet("/skyline/*", |req, res, _conn| {
        let mut body = b"Glob\r\n".to_vec();
        body.extend_from_slice(&req.to_bytes());
        res.body = body;
        0
    });

    let local_addr = server.start_listen()?;
    info!(
        addr = %local_addr,
        workers = config.workers,
        keepalive = config.keepalive,
        "http server up"
    );

    // Periodic gauge of connections waiting on a request.
    reactor.main_loop().add_recurring_timer(5_000, move |_| {
        debug!(sessions = server.session_count(), "active http sessions");
    });

    reactor.start()?;
    Ok(())
}
