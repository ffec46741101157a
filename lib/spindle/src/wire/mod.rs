//! HTTP/1.1 wire codec: request parsing with hardening caps and response
//! writing with identity or chunked framing.

pub mod reader;
pub mod writer;

pub use self::reader::{body_framing, read_head, BodyFraming, RequestHead};
pub use self::writer::write_response;
