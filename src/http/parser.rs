//! Incremental HTTP/1.x request parser.
//!
//! Built on `httparse`: each `execute` call attempts to parse a complete
//! request head from the accumulated bytes and consumes nothing until one is
//! present, so a partial final line is never split across calls. The body is
//! not handled here; the session layer accumulates it by `Content-Length`.

use crate::http::message::{HttpMethod, HttpRequest, HTTP_VERSION_10, HTTP_VERSION_11};
use thiserror::Error;
use tracing::warn;

const MAX_HEADERS: usize = 64;

/// Sticky parse failures. Any of these terminates the connection's session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("invalid http method")]
    InvalidMethod,
    #[error("invalid http version")]
    InvalidVersion,
    #[error("invalid header field name")]
    InvalidHeaderName,
    #[error("more than {MAX_HEADERS} headers")]
    TooManyHeaders,
    #[error("malformed request: {0}")]
    Syntax(httparse::Error),
}

impl From<httparse::Error> for ParseError {
    fn from(e: httparse::Error) -> Self {
        match e {
            httparse::Error::Version => Self::InvalidVersion,
            httparse::Error::HeaderName => Self::InvalidHeaderName,
            httparse::Error::TooManyHeaders => Self::TooManyHeaders,
            other => Self::Syntax(other),
        }
    }
}

/// Streaming request parser; feed it the session's accumulated buffer until
/// [`HttpRequestParser::is_finished`] reports the head is complete.
#[derive(Debug, Default)]
pub struct HttpRequestParser {
    request: HttpRequest,
    finished: bool,
    error: Option<ParseError>,
}

impl HttpRequestParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Try to parse a request head from `data`.
    ///
    /// Returns the number of bytes consumed: zero while the head is still
    /// incomplete (or after an error), the head's length once it parses.
    /// Errors are sticky.
    pub fn execute(&mut self, data: &[u8]) -> usize {
        if self.finished || self.error.is_some() {
            return 0;
        }
        let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut req = httparse::Request::new(&mut headers);
        let consumed = match req.parse(data) {
            Ok(httparse::Status::Complete(n)) => n,
            Ok(httparse::Status::Partial) => return 0,
            Err(e) => {
                warn!(error = %e, "http parse failed");
                self.error = Some(e.into());
                return 0;
            }
        };

        let method = HttpMethod::from_name(req.method.unwrap_or(""));
        if method == HttpMethod::Invalid {
            warn!(method = req.method.unwrap_or(""), "invalid http method");
            self.error = Some(ParseError::InvalidMethod);
            return 0;
        }
        self.request.method = method;

        self.request.version = match req.version {
            Some(0) => HTTP_VERSION_10,
            Some(1) => HTTP_VERSION_11,
            other => {
                warn!(version = ?other, "invalid http version");
                self.error = Some(ParseError::InvalidVersion);
                return 0;
            }
        };

        let (path, query, fragment) = split_target(req.path.unwrap_or("/"));
        self.request.path = path.to_string();
        self.request.query = query.to_string();
        self.request.fragment = fragment.to_string();

        for header in req.headers.iter() {
            let value = String::from_utf8_lossy(header.value).into_owned();
            if header.name.eq_ignore_ascii_case("connection") {
                self.request.close = value.trim().eq_ignore_ascii_case("close");
            }
            self.request.set_header(header.name, value);
        }

        self.finished = true;
        consumed
    }

    /// Whether the request line and headers have been fully parsed.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn has_error(&self) -> bool {
        self.error.is_some()
    }

    pub fn error(&self) -> Option<&ParseError> {
        self.error.as_ref()
    }

    pub fn request(&self) -> &HttpRequest {
        &self.request
    }

    pub fn request_mut(&mut self) -> &mut HttpRequest {
        &mut self.request
    }

    /// Move the parsed request out, leaving a default in its place.
    pub fn take_request(&mut self) -> HttpRequest {
        std::mem::take(&mut self.request)
    }
}

/// Split a request target into path, query and fragment.
fn split_target(target: &str) -> (&str, &str, &str) {
    let (without_fragment, fragment) = match target.find('#') {
        Some(i) => (&target[..i], &target[i + 1..]),
        None => (target, ""),
    };
    match without_fragment.find('?') {
        Some(i) => (&without_fragment[..i], &without_fragment[i + 1..], fragment),
        None => (without_fragment, "", fragment),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_request() {
        let mut parser = HttpRequestParser::new();
        let data = b"GET /index.html HTTP/1.1\r\nHost: example.com\r\n\r\n";
        let consumed = parser.execute(data);

        assert_eq!(consumed, data.len());
        assert!(parser.is_finished());
        assert!(!parser.has_error());

        let req = parser.request();
        assert_eq!(req.method, HttpMethod::Get);
        assert_eq!(req.version, HTTP_VERSION_11);
        assert_eq!(req.path, "/index.html");
        assert_eq!(req.get_header("host"), Some("example.com"));
        assert!(!req.close);
    }

    #[test]
    fn test_partial_head_consumes_nothing() {
        let mut parser = HttpRequestParser::new();
        assert_eq!(parser.execute(b"GET /x HT"), 0);
        assert!(!parser.is_finished());
        assert_eq!(parser.execute(b"GET /x HTTP/1.1\r\nHost: a"), 0);
        assert!(!parser.is_finished());

        let full = b"GET /x HTTP/1.1\r\nHost: a\r\n\r\n";
        assert_eq!(parser.execute(full), full.len());
        assert!(parser.is_finished());
    }

    #[test]
    fn test_consumes_only_the_head() {
        let mut parser = HttpRequestParser::new();
        let data = b"POST /submit HTTP/1.1\r\ncontent-length: 4\r\n\r\nbody";
        let consumed = parser.execute(data);
        assert_eq!(consumed, data.len() - 4);
        assert_eq!(parser.request().get_header("content-length"), Some("4"));
    }

    #[test]
    fn test_query_and_fragment_split() {
        let mut parser = HttpRequestParser::new();
        parser.execute(b"GET /search?q=rust&x=1#top HTTP/1.1\r\n\r\n");
        let req = parser.request();
        assert_eq!(req.path, "/search");
        assert_eq!(req.query, "q=rust&x=1");
        assert_eq!(req.fragment, "top");
    }

    #[test]
    fn test_connection_close_detection() {
        let mut parser = HttpRequestParser::new();
        parser.execute(b"GET / HTTP/1.1\r\nConnection: Close\r\n\r\n");
        assert!(parser.request().close);

        let mut parser = HttpRequestParser::new();
        parser.execute(b"GET / HTTP/1.1\r\nConnection: keep-alive\r\n\r\n");
        assert!(!parser.request().close);
    }

    #[test]
    fn test_unknown_method_is_sticky_error() {
        let mut parser = HttpRequestParser::new();
        assert_eq!(parser.execute(b"BREW /pot HTTP/1.1\r\n\r\n"), 0);
        assert!(parser.has_error());
        assert_eq!(parser.error(), Some(&ParseError::InvalidMethod));

        // Error is sticky: even a valid request no longer parses.
        assert_eq!(parser.execute(b"GET / HTTP/1.1\r\n\r\n"), 0);
        assert!(!parser.is_finished());
    }

    #[test]
    fn test_unsupported_version() {
        let mut parser = HttpRequestParser::new();
        parser.execute(b"GET / HTTP/2.0\r\n\r\n");
        assert!(parser.has_error());
        assert_eq!(parser.error(), Some(&ParseError::InvalidVersion));
    }

    #[test]
    fn test_malformed_header_errors() {
        let mut parser = HttpRequestParser::new();
        parser.execute(b"GET / HTTP/1.1\r\n: no-name\r\n\r\n");
        assert!(parser.has_error());
    }

    #[test]
    fn test_http_10() {
        let mut parser = HttpRequestParser::new();
        parser.execute(b"GET / HTTP/1.0\r\n\r\n");
        assert!(parser.is_finished());
        assert_eq!(parser.request().version, HTTP_VERSION_10);
    }
}
