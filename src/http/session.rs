//! Per-connection HTTP parse state between request arrivals.

use crate::core::TimerId;
use crate::http::message::HttpRequest;
use crate::http::parser::HttpRequestParser;
use bytes::BytesMut;

/// Accumulates bytes for one request and hands it out exactly once.
///
/// After [`HttpSession::try_get`] yields a request the session is terminal
/// and must be replaced (keep-alive) or the connection closed.
#[derive(Debug, Default)]
pub struct HttpSession {
    parser: HttpRequestParser,
    /// Bytes not yet consumed by the parser.
    buffer: BytesMut,
    ok: bool,
    error: bool,
    /// Idle timer armed for this exchange, if any.
    pub timer_id: Option<TimerId>,
}

impl HttpSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed newly received bytes. No-op once the session is terminal.
    ///
    /// Drives the head parser, erases whatever it consumed, then checks
    /// whether enough body bytes have accumulated: `Content-Length` absent or
    /// unparsable counts as zero. Once satisfied, the remaining buffer moves
    /// into the request body and the session becomes ready.
    pub fn parse(&mut self, data: &[u8]) {
        if self.ok || self.error {
            return;
        }
        self.buffer.extend_from_slice(data);
        if !self.parser.is_finished() {
            let consumed = self.parser.execute(&self.buffer);
            let _ = self.buffer.split_to(consumed);
            if self.parser.has_error() {
                self.error = true;
                return;
            }
        }
        if self.parser.is_finished() {
            let body_len = self
                .parser
                .request()
                .get_header("content-length")
                .and_then(|v| v.trim().parse::<usize>().ok())
                .unwrap_or(0);
            if self.buffer.len() >= body_len {
                self.parser.request_mut().body = self.buffer.split().to_vec();
                self.ok = true;
            }
        }
    }

    /// Take the completed request, if one is ready. One-shot: afterwards the
    /// session is terminal.
    pub fn try_get(&mut self) -> Option<HttpRequest> {
        if self.ok {
            self.ok = false;
            self.error = true;
            Some(self.parser.take_request())
        } else {
            None
        }
    }

    /// Whether a complete request is available.
    pub fn is_ready(&self) -> bool {
        self.ok
    }

    pub fn is_error(&self) -> bool {
        self.error
    }
}
