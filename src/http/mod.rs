//! Minimal HTTP/1.x layer: message model, incremental parser, per-connection
//! sessions and servlet dispatch.

mod message;
mod parser;
mod server;
mod servlet;
mod session;

pub use message::{
    status_reason, CaseInsensitiveMap, HttpMethod, HttpRequest, HttpResponse, HTTP_VERSION_10,
    HTTP_VERSION_11,
};
pub use parser::{HttpRequestParser, ParseError};
pub use server::HttpServer;
pub use servlet::{FunctionServlet, NotFoundServlet, Servlet, ServletDispatch};
pub use session::HttpSession;
