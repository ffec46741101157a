use serde_derive::{Deserialize, Serialize};
use std::time::Duration;

const MIB: usize = 1024 * 1024;

/// Per-kind caps applied by the body parsers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BodyLimits {
    pub max_json_size: usize,
    pub max_form_size: usize,
    pub max_text_size: usize,
    pub max_multipart_size: usize,
    pub max_file_size: usize,
    pub max_file_count: usize,
    /// Optional content type allowlist for uploaded files.
    pub allowed_file_types: Option<Vec<String>>,
}

impl Default for BodyLimits {
    fn default() -> BodyLimits {
        BodyLimits {
            max_json_size: MIB,
            max_form_size: MIB,
            max_text_size: MIB,
            max_multipart_size: 10 * MIB,
            max_file_size: 5 * MIB,
            max_file_count: 10,
            allowed_file_types: None,
        }
    }
}

/// Hardening limits and connection behavior of the server. Three presets
/// exist: `development` (loose), `default` (balanced) and `strict` (tight).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    pub max_request_line_length: usize,
    pub max_header_count: usize,
    pub max_header_size: usize,
    pub max_total_headers_size: usize,
    pub max_request_body_size: usize,
    pub socket_timeout_secs: u64,
    pub request_timeout_secs: u64,
    pub enable_chunked_encoding: bool,
    pub enable_keep_alive: bool,
    pub max_keep_alive_requests: usize,
    pub body: BodyLimits,
}

impl Default for ServerConfig {
    fn default() -> ServerConfig {
        ServerConfig {
            port: 8080,
            max_request_line_length: 8192,
            max_header_count: 100,
            max_header_size: 8192,
            max_total_headers_size: 65536,
            max_request_body_size: 10 * MIB,
            socket_timeout_secs: 30,
            request_timeout_secs: 60,
            enable_chunked_encoding: true,
            enable_keep_alive: true,
            max_keep_alive_requests: 100,
            body: BodyLimits::default(),
        }
    }
}

impl ServerConfig {
    /// Loose limits for local development.
    pub fn development() -> ServerConfig {
        ServerConfig {
            max_request_line_length: 65536,
            max_header_count: 1000,
            max_header_size: 65536,
            max_total_headers_size: 1024 * 1024,
            max_request_body_size: 100 * MIB,
            socket_timeout_secs: 300,
            request_timeout_secs: 600,
            max_keep_alive_requests: 10_000,
            ..ServerConfig::default()
        }
    }

    /// Tight limits for exposed deployments.
    pub fn strict() -> ServerConfig {
        ServerConfig {
            max_request_line_length: 4096,
            max_header_count: 50,
            max_header_size: 4096,
            max_total_headers_size: 16384,
            max_request_body_size: MIB,
            socket_timeout_secs: 10,
            request_timeout_secs: 30,
            enable_chunked_encoding: false,
            max_keep_alive_requests: 20,
            ..ServerConfig::default()
        }
    }

    /// Load the config from a TOML file; missing keys fall back to defaults.
    pub fn from_toml_file(path: &str) -> ServerConfig {
        serdeconv::from_toml_file(path).expect("Error parsing server config file")
    }

    #[inline]
    pub fn socket_timeout(&self) -> Duration {
        Duration::from_secs(self.socket_timeout_secs)
    }

    #[inline]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
