//! Hand rolled HTTP/1.1 network runtime over raw TCP sockets.
//!
//! The crate covers the full request path: wire parsing with hardening caps,
//! router dispatch with typed extractors, a composable middleware pipeline,
//! buffered and streaming bodies (chunked transfer and Server-Sent Events
//! included), and an RFC 6455 WebSocket endpoint multiplexer whose long
//! lived sessions can be hosted inside `shuttle` actors.

#![allow(clippy::len_without_is_empty)]
#![allow(clippy::new_without_default)]

pub mod body;
pub mod config;
pub mod cookie;
pub mod error;
pub mod handler;
pub mod headers;
pub mod middleware;
pub mod request;
pub mod response;
pub mod router;
pub mod server;
pub mod session;
pub mod stream;
pub mod uri;
pub mod wire;
pub mod ws;

pub use crate::config::ServerConfig;
pub use crate::error::{HttpError, HttpResult};
pub use crate::request::{Method, Request};
pub use crate::response::Response;
pub use crate::server::Server;
