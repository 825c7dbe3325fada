//! HTTP server: servlet dispatch glued onto the TCP server, with per-fd
//! sessions and keep-alive/idle management.

use crate::core::{Buffer, Connection, Reactor, TcpHandler, TcpServer, TimerId};
use crate::http::message::HttpResponse;
use crate::http::servlet::{Servlet, ServletDispatch};
use crate::http::session::HttpSession;
use crate::http::HttpRequest;
use bytes::BytesMut;
use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::debug;

const DEFAULT_IDLE_TIMEOUT_MS: u64 = 500;

type SessionMap = Arc<Mutex<HashMap<RawFd, HttpSession>>>;

/// HTTP/1.x server over a reactor.
///
/// Register servlets, then `start_listen` and run the reactor. Each
/// connection carries one [`HttpSession`] per request exchange; an idle timer
/// closes connections that fail to deliver a complete request in time.
pub struct HttpServer {
    tcp: TcpServer,
    shared: Arc<HttpShared>,
}

impl HttpServer {
    pub fn new(addr: SocketAddr, reactor: Arc<Reactor>) -> Self {
        let shared = Arc::new(HttpShared {
            dispatch: ServletDispatch::new(),
            sessions: Arc::new(Mutex::new(HashMap::new())),
            keepalive: AtomicBool::new(false),
            idle_timeout_ms: AtomicU64::new(DEFAULT_IDLE_TIMEOUT_MS),
        });
        let tcp = TcpServer::new(addr, reactor, Arc::clone(&shared) as Arc<dyn TcpHandler>);
        Self { tcp, shared }
    }

    pub fn dispatch(&self) -> &ServletDispatch {
        &self.shared.dispatch
    }

    /// Bind a handler to an exact path.
    pub fn add_servlet<F>(&self, uri: impl Into<String>, callback: F)
    where
        F: Fn(&HttpRequest, &mut HttpResponse, &Arc<Connection>) -> i32 + Send + Sync + 'static,
    {
        self.shared.dispatch.add_servlet(uri, callback);
    }

    /// Bind a handler to a glob pattern.
    pub fn add_glob_servlet<F>(&self, pattern: impl Into<String>, callback: F)
    where
        F: Fn(&HttpRequest, &mut HttpResponse, &Arc<Connection>) -> i32 + Send + Sync + 'static,
    {
        self.shared.dispatch.add_glob_servlet(pattern, callback);
    }

    pub fn set_default_servlet(&self, servlet: Arc<dyn Servlet>) {
        self.shared.dispatch.set_default(servlet);
    }

    /// Allow connections to carry multiple requests. Off by default: every
    /// response closes its connection.
    pub fn set_keepalive(&self, keepalive: bool) {
        self.shared.keepalive.store(keepalive, Ordering::Relaxed);
    }

    pub fn keepalive(&self) -> bool {
        self.shared.keepalive.load(Ordering::Relaxed)
    }

    /// How long a connection may sit without completing a request before it
    /// is closed.
    pub fn set_idle_timeout(&self, timeout: Duration) {
        self.shared
            .idle_timeout_ms
            .store(timeout.as_millis() as u64, Ordering::Relaxed);
    }

    /// Connections currently awaiting or accumulating a request.
    pub fn session_count(&self) -> usize {
        self.shared.sessions.lock().unwrap().len()
    }

    pub fn start_listen(&self) -> io::Result<SocketAddr> {
        self.tcp.start_listen()
    }

    pub fn stop_listen(&self) {
        self.tcp.stop_listen()
    }
}

struct HttpShared {
    dispatch: ServletDispatch,
    sessions: SessionMap,
    keepalive: AtomicBool,
    idle_timeout_ms: AtomicU64,
}

impl HttpShared {
    /// Arm the idle timer for a fresh exchange: on expiry the session is
    /// dropped and the connection closed.
    fn arm_idle_timer(&self, conn: &Arc<Connection>) -> TimerId {
        let sessions = Arc::clone(&self.sessions);
        let timeout = self.idle_timeout_ms.load(Ordering::Relaxed);
        let timer_conn = Arc::clone(conn);
        conn.event_loop().add_timer(timeout, move |_| {
            let fd = timer_conn.fd();
            if sessions.lock().unwrap().remove(&fd).is_some() {
                debug!(fd, "idle timeout");
                timer_conn.close();
            }
        })
    }

    fn install_session(&self, conn: &Arc<Connection>) {
        let mut session = HttpSession::new();
        session.timer_id = Some(self.arm_idle_timer(conn));
        self.sessions.lock().unwrap().insert(conn.fd(), session);
    }

    fn drop_session(&self, conn: &Arc<Connection>) {
        let removed = self.sessions.lock().unwrap().remove(&conn.fd());
        if let Some(session) = removed {
            if let Some(timer_id) = session.timer_id {
                conn.event_loop().remove_timer(timer_id);
            }
        }
        conn.close();
    }
}

impl TcpHandler for HttpShared {
    fn after_connect(&self, conn: &Arc<Connection>) {
        self.install_session(conn);
    }

    fn on_recv(&self, conn: &Arc<Connection>, buf: &mut Buffer) {
        let fd = conn.fd();
        let data = buf.read_all();

        let (request, timer_id) = {
            let mut sessions = self.sessions.lock().unwrap();
            let Some(session) = sessions.get_mut(&fd) else {
                return;
            };
            session.parse(&data);
            if session.is_error() {
                drop(sessions);
                debug!(fd, "bad request");
                self.drop_session(conn);
                return;
            }
            match session.try_get() {
                Some(request) => (request, session.timer_id),
                None => return, // await more bytes
            }
        };

        let keepalive = self.keepalive.load(Ordering::Relaxed);
        let mut response = HttpResponse::new(request.version, request.close || !keepalive);
        self.dispatch.handle(&request, &mut response, conn);

        let mut out = BytesMut::with_capacity(response.body.len() + 128);
        response.encode(&mut out);
        conn.send(out);

        // This exchange is complete; its idle timer is spent.
        if let Some(timer_id) = timer_id {
            conn.event_loop().remove_timer(timer_id);
        }

        if keepalive && !request.close {
            self.install_session(conn);
        } else {
            self.sessions.lock().unwrap().remove(&fd);
            conn.close();
        }
    }
}
