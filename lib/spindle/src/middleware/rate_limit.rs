use crate::error::HttpError;
use crate::middleware::{Middleware, PreOutcome};
use crate::request::Request;
use crate::response::Response;
use hashbrown::HashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Instant;

/// Attribute key holding the rate status computed in pre.
pub const RATE_STATUS_ATTR: &str = "ratelimit.status";

#[derive(Debug, Copy, Clone)]
pub struct RateStatus {
    pub limit: u32,
    pub remaining: u32,
    pub reset_secs: u64,
}

pub struct RateLimitConfig {
    /// Bucket capacity: requests admitted in a full window.
    pub max_requests: u32,
    /// Refill period for a full bucket.
    pub window_millis: u64,
}

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Key extractor for bucket selection; defaults to the client IP.
pub type KeyFn = Arc<dyn Fn(&Request) -> String + Send + Sync>;

/// Token bucket rate limiting per key. Every response carries the
/// `X-RateLimit-*` headers; an empty bucket answers 429 with `Retry-After`
/// set to the seconds until the bucket resets, matching `X-RateLimit-Reset`.
pub struct RateLimit {
    config: RateLimitConfig,
    key_fn: KeyFn,
    buckets: Mutex<HashMap<String, Bucket>>,
}

impl RateLimit {
    pub fn new(config: RateLimitConfig) -> RateLimit {
        RateLimit {
            config,
            key_fn: Arc::new(|req: &Request| {
                req.client_ip().unwrap_or_else(|| "unknown".to_string())
            }),
            buckets: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_key_fn(mut self, key_fn: KeyFn) -> RateLimit {
        self.key_fn = key_fn;
        self
    }

    #[inline]
    fn tokens_per_milli(&self) -> f64 {
        f64::from(self.config.max_requests) / self.config.window_millis as f64
    }

    /// Refill the bucket for `key` and try to take one token. Returns
    /// whether the request is admitted and the header status. The status
    /// carries the seconds until the bucket refills completely, which is
    /// also the `Retry-After` value on rejection.
    fn take(&self, key: &str) -> (bool, RateStatus) {
        let max = f64::from(self.config.max_requests);
        let rate = self.tokens_per_milli();
        let now = Instant::now();

        let mut buckets = self.buckets.lock();
        let bucket = buckets.entry(key.to_string()).or_insert(Bucket {
            tokens: max,
            last_refill: now,
        });

        let elapsed_millis = now.duration_since(bucket.last_refill).as_millis() as f64;
        bucket.tokens = (bucket.tokens + elapsed_millis * rate).min(max);
        bucket.last_refill = now;

        let allowed = bucket.tokens >= 1.0;
        if allowed {
            bucket.tokens -= 1.0;
        }

        // Seconds to reset, rounded up: the missing tokens as a share of a
        // full window.
        let reset_millis =
            (max - bucket.tokens) * self.config.window_millis as f64 / max;
        let reset_secs = (reset_millis / 1000.0).ceil() as u64;

        let status = RateStatus {
            limit: self.config.max_requests,
            remaining: bucket.tokens.max(0.0) as u32,
            reset_secs,
        };

        (allowed, status)
    }

    fn apply_headers(status: &RateStatus, resp: &mut Response) {
        resp.headers
            .set("X-RateLimit-Limit", status.limit.to_string());
        resp.headers
            .set("X-RateLimit-Remaining", status.remaining.to_string());
        resp.headers
            .set("X-RateLimit-Reset", status.reset_secs.to_string());
    }
}

impl Middleware for RateLimit {
    fn pre(&self, req: &mut Request) -> PreOutcome {
        let key = (self.key_fn)(req);
        let (allowed, status) = self.take(&key);

        req.attrs.set(RATE_STATUS_ATTR, status);

        if allowed {
            PreOutcome::Continue
        } else {
            // Retry-After carries the same seconds-to-reset value as
            // X-RateLimit-Reset.
            let mut resp = Response::from_error(&HttpError::RateLimited {
                retry_after_secs: status.reset_secs,
            });
            Self::apply_headers(&status, &mut resp);
            PreOutcome::Respond(resp)
        }
    }

    fn post(&self, req: &Request, resp: &mut Response) {
        if let Some(status) = req.attrs.get::<RateStatus>(RATE_STATUS_ATTR) {
            Self::apply_headers(status, resp);
        }
    }
}
