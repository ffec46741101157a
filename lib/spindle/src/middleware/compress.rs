use crate::middleware::Middleware;
use crate::request::Request;
use crate::response::{Response, ResponseBody};
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::Write;

/// Content types that are already compressed and not worth re-encoding.
fn is_precompressed(content_type: &str) -> bool {
    let content_type = content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();

    content_type.starts_with("image/") && !content_type.ends_with("svg+xml")
        || content_type.starts_with("video/")
        || content_type.starts_with("audio/")
        || content_type == "application/zip"
        || content_type == "application/gzip"
        || content_type == "application/octet-stream"
}

/// Gzip response compression for clients that accept it, applied to eager
/// bodies at or above the minimum size.
pub struct Compress {
    min_size: usize,
}

impl Compress {
    pub const DEFAULT_MIN_SIZE: usize = 1024;

    pub fn new(min_size: usize) -> Compress {
        Compress { min_size }
    }
}

impl Middleware for Compress {
    fn post(&self, req: &Request, resp: &mut Response) {
        if !req.headers.has_token("accept-encoding", "gzip") {
            return;
        }
        if resp.headers.contains("content-encoding") {
            return;
        }
        if is_precompressed(resp.headers.get("content-type").unwrap_or("")) {
            return;
        }

        let eligible = matches!(&resp.body, ResponseBody::Bytes(bytes) if bytes.len() >= self.min_size);
        if !eligible {
            return;
        }

        let bytes = match std::mem::replace(&mut resp.body, ResponseBody::Empty) {
            ResponseBody::Bytes(bytes) => bytes,
            other => {
                resp.body = other;
                return;
            }
        };

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        let compressed = encoder
            .write_all(&bytes)
            .and_then(|_| encoder.finish())
            .ok();

        match compressed {
            Some(compressed) if compressed.len() < bytes.len() => {
                resp.headers.set("Content-Encoding", "gzip");
                resp.headers
                    .set("Content-Length", compressed.len().to_string());
                resp.headers.set("Vary", "Accept-Encoding");
                resp.body = ResponseBody::Bytes(compressed);
            }
            // Compression failed or did not help; keep the original body.
            _ => resp.body = ResponseBody::Bytes(bytes),
        }
    }
}
