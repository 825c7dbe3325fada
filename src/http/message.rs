//! HTTP request/response model.
//!
//! Only HTTP/1.0 and 1.1 are modeled; the version is a packed byte with the
//! major in the high nibble. Header, query-parameter and cookie maps compare
//! names ASCII-case-insensitively and keep the spelling of the first insert.

use bytes::{Bytes, BytesMut};
use std::collections::BTreeMap;
use std::fmt::Write as _;

pub const HTTP_VERSION_10: u8 = 0x10;
pub const HTTP_VERSION_11: u8 = 0x11;

/// Request method, `Invalid` for anything unrecognized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HttpMethod {
    #[default]
    Get,
    Head,
    Post,
    Put,
    Delete,
    Connect,
    Options,
    Trace,
    Patch,
    Invalid,
}

impl HttpMethod {
    /// Resolve a method token; matching is exact (method names are
    /// case-sensitive on the wire).
    pub fn from_name(name: &str) -> Self {
        match name {
            "GET" => Self::Get,
            "HEAD" => Self::Head,
            "POST" => Self::Post,
            "PUT" => Self::Put,
            "DELETE" => Self::Delete,
            "CONNECT" => Self::Connect,
            "OPTIONS" => Self::Options,
            "TRACE" => Self::Trace,
            "PATCH" => Self::Patch,
            _ => Self::Invalid,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Head => "HEAD",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
            Self::Connect => "CONNECT",
            Self::Options => "OPTIONS",
            Self::Trace => "TRACE",
            Self::Patch => "PATCH",
            Self::Invalid => "INVALID",
        }
    }
}

/// Default reason phrase for a status code.
pub fn status_reason(status: u16) -> &'static str {
    match status {
        100 => "Continue",
        101 => "Switching Protocols",
        200 => "OK",
        201 => "Created",
        202 => "Accepted",
        204 => "No Content",
        206 => "Partial Content",
        301 => "Moved Permanently",
        302 => "Found",
        303 => "See Other",
        304 => "Not Modified",
        307 => "Temporary Redirect",
        308 => "Permanent Redirect",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        408 => "Request Timeout",
        411 => "Length Required",
        413 => "Payload Too Large",
        414 => "URI Too Long",
        415 => "Unsupported Media Type",
        426 => "Upgrade Required",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        504 => "Gateway Timeout",
        _ => "Unknown",
    }
}

/// String map with ASCII-case-insensitive keys.
///
/// Entries iterate in case-folded order; re-setting a key replaces the value
/// but keeps the originally inserted spelling.
#[derive(Debug, Clone, Default)]
pub struct CaseInsensitiveMap {
    // folded name -> (first-seen spelling, value)
    entries: BTreeMap<String, (String, String)>,
}

impl CaseInsensitiveMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .get(&name.to_ascii_lowercase())
            .map(|(_, value)| value.as_str())
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.entries.entry(name.to_ascii_lowercase()) {
            std::collections::btree_map::Entry::Occupied(mut entry) => {
                entry.get_mut().1 = value;
            }
            std::collections::btree_map::Entry::Vacant(entry) => {
                entry.insert((name, value));
            }
        }
    }

    pub fn remove(&mut self, name: &str) -> bool {
        self.entries.remove(&name.to_ascii_lowercase()).is_some()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(&name.to_ascii_lowercase())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .values()
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Parsed HTTP request.
#[derive(Debug, Clone, Default)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub version: u8,
    pub path: String,
    pub query: String,
    pub fragment: String,
    pub body: Vec<u8>,
    /// From the `Connection` header: `close` means close, anything else (or
    /// absence) means keep-alive.
    pub close: bool,
    headers: CaseInsensitiveMap,
    params: CaseInsensitiveMap,
    cookies: CaseInsensitiveMap,
}

impl HttpRequest {
    pub fn new(version: u8, close: bool) -> Self {
        Self {
            version,
            close,
            ..Self::default()
        }
    }

    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.set(name, value);
    }

    pub fn del_header(&mut self, name: &str) -> bool {
        self.headers.remove(name)
    }

    pub fn has_header(&self, name: &str) -> bool {
        self.headers.contains(name)
    }

    pub fn headers(&self) -> &CaseInsensitiveMap {
        &self.headers
    }

    pub fn get_param(&self, name: &str) -> Option<&str> {
        self.params.get(name)
    }

    pub fn set_param(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.params.set(name, value);
    }

    pub fn del_param(&mut self, name: &str) -> bool {
        self.params.remove(name)
    }

    pub fn has_param(&self, name: &str) -> bool {
        self.params.contains(name)
    }

    pub fn get_cookie(&self, name: &str) -> Option<&str> {
        self.cookies.get(name)
    }

    pub fn set_cookie(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.cookies.set(name, value);
    }

    pub fn del_cookie(&mut self, name: &str) -> bool {
        self.cookies.remove(name)
    }

    pub fn has_cookie(&self, name: &str) -> bool {
        self.cookies.contains(name)
    }

    /// Serialize: request line, `connection:`, remaining headers, then
    /// `content-length` and the body when one is present.
    pub fn encode(&self, out: &mut BytesMut) {
        let mut head = String::with_capacity(128);
        head.push_str(self.method.as_str());
        head.push(' ');
        head.push_str(&self.path);
        if !self.query.is_empty() {
            head.push('?');
            head.push_str(&self.query);
        }
        if !self.fragment.is_empty() {
            head.push('#');
            head.push_str(&self.fragment);
        }
        let _ = write!(
            head,
            " HTTP/{}.{}\r\n",
            self.version >> 4,
            self.version & 0x0f
        );
        let _ = write!(
            head,
            "connection: {}\r\n",
            if self.close { "close" } else { "keep-alive" }
        );
        encode_headers_and_body(head, &self.headers, &self.body, out);
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut out = BytesMut::new();
        self.encode(&mut out);
        out.freeze()
    }
}

/// HTTP response under construction by a servlet.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    /// Reason phrase; `None` selects the default for `status`.
    pub reason: Option<String>,
    pub version: u8,
    pub close: bool,
    pub body: Vec<u8>,
    headers: CaseInsensitiveMap,
}

impl HttpResponse {
    pub fn new(version: u8, close: bool) -> Self {
        Self {
            status: 200,
            reason: None,
            version,
            close,
            body: Vec::new(),
            headers: CaseInsensitiveMap::new(),
        }
    }

    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.set(name, value);
    }

    pub fn del_header(&mut self, name: &str) -> bool {
        self.headers.remove(name)
    }

    pub fn headers(&self) -> &CaseInsensitiveMap {
        &self.headers
    }

    /// Serialize: status line, headers, `connection:` derived from the close
    /// flag (any explicit `connection` header is suppressed), then
    /// `content-length` and the body when one is present.
    pub fn encode(&self, out: &mut BytesMut) {
        let mut head = String::with_capacity(128);
        let reason = match &self.reason {
            Some(reason) => reason.as_str(),
            None => status_reason(self.status),
        };
        let _ = write!(
            head,
            "HTTP/{}.{} {} {}\r\n",
            self.version >> 4,
            self.version & 0x0f,
            self.status,
            reason
        );
        for (name, value) in self.headers.iter() {
            if name.eq_ignore_ascii_case("connection") {
                continue;
            }
            let _ = write!(head, "{name}: {value}\r\n");
        }
        let _ = write!(
            head,
            "connection: {}\r\n",
            if self.close { "close" } else { "keep-alive" }
        );
        if !self.body.is_empty() {
            let _ = write!(head, "content-length: {}\r\n\r\n", self.body.len());
            out.extend_from_slice(head.as_bytes());
            out.extend_from_slice(&self.body);
        } else {
            head.push_str("\r\n");
            out.extend_from_slice(head.as_bytes());
        }
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut out = BytesMut::new();
        self.encode(&mut out);
        out.freeze()
    }
}

fn encode_headers_and_body(
    mut head: String,
    headers: &CaseInsensitiveMap,
    body: &[u8],
    out: &mut BytesMut,
) {
    for (name, value) in headers.iter() {
        if name.eq_ignore_ascii_case("connection") {
            continue;
        }
        let _ = write!(head, "{name}: {value}\r\n");
    }
    if !body.is_empty() {
        let _ = write!(head, "content-length: {}\r\n\r\n", body.len());
        out.extend_from_slice(head.as_bytes());
        out.extend_from_slice(body);
    } else {
        head.push_str("\r\n");
        out.extend_from_slice(head.as_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_round_trip() {
        assert_eq!(HttpMethod::from_name("GET"), HttpMethod::Get);
        assert_eq!(HttpMethod::from_name("PATCH"), HttpMethod::Patch);
        assert_eq!(HttpMethod::from_name("get"), HttpMethod::Invalid);
        assert_eq!(HttpMethod::from_name("BREW"), HttpMethod::Invalid);
        assert_eq!(HttpMethod::Post.as_str(), "POST");
    }

    #[test]
    fn test_case_insensitive_map() {
        let mut map = CaseInsensitiveMap::new();
        map.set("Content-Type", "text/html");

        assert_eq!(map.get("content-type"), Some("text/html"));
        assert_eq!(map.get("CONTENT-TYPE"), Some("text/html"));
        assert!(map.contains("Content-type"));

        // Re-setting replaces the value but keeps the first spelling.
        map.set("CONTENT-TYPE", "application/json");
        assert_eq!(map.len(), 1);
        assert_eq!(map.get("content-type"), Some("application/json"));
        assert_eq!(map.iter().next(), Some(("Content-Type", "application/json")));

        assert!(map.remove("content-TYPE"));
        assert!(map.is_empty());
    }

    #[test]
    fn test_set_header_idempotent() {
        let mut res = HttpResponse::new(HTTP_VERSION_11, false);
        res.set_header("X-Tag", "v");
        res.set_header("x-tag", "w");
        assert_eq!(res.get_header("X-TAG"), Some("w"));
        assert_eq!(res.headers().len(), 1);
    }

    #[test]
    fn test_response_encoding_with_body() {
        let mut res = HttpResponse::new(HTTP_VERSION_11, true);
        res.set_header("Server", "skyline/1.0.0");
        res.body = b"hello".to_vec();

        assert_eq!(
            &res.to_bytes()[..],
            b"HTTP/1.1 200 OK\r\nServer: skyline/1.0.0\r\nconnection: close\r\ncontent-length: 5\r\n\r\nhello" as &[u8]
        );
    }

    #[test]
    fn test_response_encoding_empty_body() {
        let res = HttpResponse::new(HTTP_VERSION_10, false);
        assert_eq!(
            &res.to_bytes()[..],
            b"HTTP/1.0 200 OK\r\nconnection: keep-alive\r\n\r\n" as &[u8]
        );
    }

    #[test]
    fn test_response_suppresses_explicit_connection_header() {
        let mut res = HttpResponse::new(HTTP_VERSION_11, true);
        res.set_header("Connection", "keep-alive");
        let bytes = res.to_bytes();
        let text = std::str::from_utf8(&bytes).unwrap();
        assert!(text.contains("connection: close\r\n"));
        assert!(!text.contains("Connection: keep-alive"));
    }

    #[test]
    fn test_response_custom_reason_and_status() {
        let mut res = HttpResponse::new(HTTP_VERSION_11, true);
        res.status = 404;
        assert!(res.to_bytes().starts_with(b"HTTP/1.1 404 Not Found\r\n"));

        res.reason = Some("Gone Fishing".to_string());
        assert!(res.to_bytes().starts_with(b"HTTP/1.1 404 Gone Fishing\r\n"));
    }

    #[test]
    fn test_request_encoding() {
        let mut req = HttpRequest::new(HTTP_VERSION_11, false);
        req.method = HttpMethod::Get;
        req.path = "/index".to_string();
        req.query = "a=1".to_string();
        req.set_header("Host", "example.com");

        assert_eq!(
            &req.to_bytes()[..],
            b"GET /index?a=1 HTTP/1.1\r\nconnection: keep-alive\r\nHost: example.com\r\n\r\n"
                as &[u8]
        );
    }
}
