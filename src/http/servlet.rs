//! Request handlers and path-based dispatch.
//!
//! Routes resolve in three tiers: an exact-path map, an ordered list of
//! shell-style glob patterns (first match wins, re-registration moves a
//! pattern to the tail), and a default 404 servlet. Patterns are compiled to
//! anchored regexes at registration time.

use crate::core::Connection;
use crate::http::message::{HttpRequest, HttpResponse};
use regex::Regex;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::warn;

/// A request handler bound to a path or pattern. The return value is
/// reserved; 0 means OK.
pub trait Servlet: Send + Sync {
    fn name(&self) -> &str;

    fn handle(
        &self,
        request: &HttpRequest,
        response: &mut HttpResponse,
        conn: &Arc<Connection>,
    ) -> i32;
}

type ServletCallback =
    dyn Fn(&HttpRequest, &mut HttpResponse, &Arc<Connection>) -> i32 + Send + Sync;

/// Servlet backed by a closure.
pub struct FunctionServlet {
    callback: Box<ServletCallback>,
}

impl FunctionServlet {
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn(&HttpRequest, &mut HttpResponse, &Arc<Connection>) -> i32 + Send + Sync + 'static,
    {
        Self {
            callback: Box::new(callback),
        }
    }
}

impl Servlet for FunctionServlet {
    fn name(&self) -> &str {
        "FunctionServlet"
    }

    fn handle(
        &self,
        request: &HttpRequest,
        response: &mut HttpResponse,
        conn: &Arc<Connection>,
    ) -> i32 {
        (self.callback)(request, response, conn)
    }
}

const NOT_FOUND_BODY: &str = "<html><head><title>404 Not Found</title></head><body><center><h1>404 \
     Not Found</h1></center><hr/><center>skyline/1.0.0</center></body></html>";

/// Fallback servlet answering 404 for unrouted paths.
pub struct NotFoundServlet;

impl Servlet for NotFoundServlet {
    fn name(&self) -> &str {
        "NotFoundServlet"
    }

    fn handle(
        &self,
        _request: &HttpRequest,
        response: &mut HttpResponse,
        _conn: &Arc<Connection>,
    ) -> i32 {
        response.status = 404;
        response.set_header("Server", "skyline/1.0.0");
        response.set_header("Content-Type", "text/html");
        response.body = NOT_FOUND_BODY.as_bytes().to_vec();
        0
    }
}

struct DispatchInner {
    // /skyline/xx -> servlet
    exact: HashMap<String, Arc<dyn Servlet>>,
    // /skyline/* -> servlet, resolved in insertion order
    globs: Vec<(String, Regex, Arc<dyn Servlet>)>,
    default_servlet: Arc<dyn Servlet>,
}

/// Routing table; structural changes take the write lock, lookups the read
/// lock, and handlers always run outside both (they may register routes).
pub struct ServletDispatch {
    inner: RwLock<DispatchInner>,
}

impl Default for ServletDispatch {
    fn default() -> Self {
        Self::new()
    }
}

impl ServletDispatch {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(DispatchInner {
                exact: HashMap::new(),
                globs: Vec::new(),
                default_servlet: Arc::new(NotFoundServlet),
            }),
        }
    }

    /// Bind a closure to an exact path.
    pub fn add_servlet<F>(&self, uri: impl Into<String>, callback: F)
    where
        F: Fn(&HttpRequest, &mut HttpResponse, &Arc<Connection>) -> i32 + Send + Sync + 'static,
    {
        self.add_servlet_object(uri, Arc::new(FunctionServlet::new(callback)));
    }

    pub fn add_servlet_object(&self, uri: impl Into<String>, servlet: Arc<dyn Servlet>) {
        self.inner.write().unwrap().exact.insert(uri.into(), servlet);
    }

    /// Bind a closure to a shell-style glob pattern. Re-registering a
    /// pattern replaces its servlet and moves it to the tail of the match
    /// order.
    pub fn add_glob_servlet<F>(&self, pattern: impl Into<String>, callback: F)
    where
        F: Fn(&HttpRequest, &mut HttpResponse, &Arc<Connection>) -> i32 + Send + Sync + 'static,
    {
        self.add_glob_servlet_object(pattern, Arc::new(FunctionServlet::new(callback)));
    }

    pub fn add_glob_servlet_object(&self, pattern: impl Into<String>, servlet: Arc<dyn Servlet>) {
        let pattern = pattern.into();
        let regex = match glob_to_regex(&pattern) {
            Ok(regex) => regex,
            Err(e) => {
                warn!(pattern = %pattern, error = %e, "unusable glob pattern");
                return;
            }
        };
        let mut inner = self.inner.write().unwrap();
        inner.globs.retain(|(existing, _, _)| *existing != pattern);
        inner.globs.push((pattern, regex, servlet));
    }

    pub fn del_servlet(&self, uri: &str) {
        self.inner.write().unwrap().exact.remove(uri);
    }

    pub fn del_glob_servlet(&self, pattern: &str) {
        self.inner
            .write()
            .unwrap()
            .globs
            .retain(|(existing, _, _)| existing != pattern);
    }

    pub fn set_default(&self, servlet: Arc<dyn Servlet>) {
        self.inner.write().unwrap().default_servlet = servlet;
    }

    /// Resolve the servlet for a path: exact match first, then the globs in
    /// insertion order, then the default.
    pub fn matched_servlet(&self, path: &str) -> Arc<dyn Servlet> {
        let inner = self.inner.read().unwrap();
        if let Some(servlet) = inner.exact.get(path) {
            return Arc::clone(servlet);
        }
        for (_, regex, servlet) in &inner.globs {
            if regex.is_match(path) {
                return Arc::clone(servlet);
            }
        }
        Arc::clone(&inner.default_servlet)
    }

    pub fn handle(
        &self,
        request: &HttpRequest,
        response: &mut HttpResponse,
        conn: &Arc<Connection>,
    ) -> i32 {
        self.matched_servlet(&request.path)
            .handle(request, response, conn)
    }
}

impl Servlet for ServletDispatch {
    fn name(&self) -> &str {
        "ServletDispatch"
    }

    fn handle(
        &self,
        request: &HttpRequest,
        response: &mut HttpResponse,
        conn: &Arc<Connection>,
    ) -> i32 {
        ServletDispatch::handle(self, request, response, conn)
    }
}

/// Compile a shell wildcard pattern (`*`, `?`, `[...]`; no special casing of
/// path separators) into an anchored regex.
fn glob_to_regex(pattern: &str) -> Result<Regex, regex::Error> {
    let mut regex = String::with_capacity(pattern.len() + 8);
    regex.push('^');
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' => regex.push_str(".*"),
            '?' => regex.push('.'),
            '[' => {
                let mut lead = None;
                if let Some(&next) = chars.peek() {
                    if next == '!' || next == '^' {
                        chars.next();
                        lead = Some(next);
                    }
                }
                let mut raw = String::new();
                let mut closed = false;
                for c in chars.by_ref() {
                    if c == ']' {
                        closed = true;
                        break;
                    }
                    raw.push(c);
                }
                if closed {
                    regex.push('[');
                    if lead.is_some() {
                        regex.push('^');
                    }
                    for c in raw.chars() {
                        if c == '\\' {
                            regex.push('\\');
                        }
                        regex.push(c);
                    }
                    regex.push(']');
                } else {
                    // Unterminated class matches literally.
                    let mut literal = String::from("[");
                    if let Some(lead) = lead {
                        literal.push(lead);
                    }
                    literal.push_str(&raw);
                    regex.push_str(&regex::escape(&literal));
                }
            }
            _ => regex.push_str(&regex::escape(&c.to_string())),
        }
    }
    regex.push('$');
    Regex::new(&regex)
}
