//! Rate limiting for public endpoints

use std::collections::HashMap;
use std::convert::Infallible;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::{ConnectInfo, FromRequestParts};
use axum::http::request::Parts;
use axum::http::HeaderMap;
use parking_lot::RwLock;

use crate::ApiState;

const MAX_TRACKED_CLIENTS: usize = 10_000;
const IDLE_EVICTION: Duration = Duration::from_secs(600);

/// Per-client token buckets
#[derive(Clone)]
pub struct RateLimiter {
    buckets: Arc<RwLock<HashMap<String, TokenBucket>>>,
    config: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            buckets: Arc::new(RwLock::new(HashMap::new())),
            config,
        }
    }

    /// Check if request is allowed
    pub fn check(&self, key: &str) -> RateLimitResult {
        self.check_at(key, Instant::now())
    }

    fn check_at(&self, key: &str, now: Instant) -> RateLimitResult {
        let mut buckets = self.buckets.write();
        if buckets.len() >= MAX_TRACKED_CLIENTS {
            buckets.retain(|_, bucket| now.saturating_duration_since(bucket.last_refill) < IDLE_EVICTION);
        }

        let bucket = buckets
            .entry(key.to_string())
            .or_insert_with(|| TokenBucket::new(self.config.per_minute, self.config.burst, now));

        if bucket.try_acquire(now) {
            RateLimitResult::Allowed {
                remaining: bucket.available.floor() as u32,
            }
        } else {
            RateLimitResult::Limited {
                retry_after: bucket.time_to_next(),
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub per_minute: u32,
    pub burst: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            per_minute: 6,
            burst: 5,
        }
    }
}

struct TokenBucket {
    available: f64,
    max: f64,
    /// Tokens per second
    refill_rate: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(per_minute: u32, burst: u32, now: Instant) -> Self {
        let max = f64::from(burst.max(1));
        Self {
            available: max,
            max,
            refill_rate: f64::from(per_minute) / 60.0,
            last_refill: now,
        }
    }

    fn try_acquire(&mut self, now: Instant) -> bool {
        self.refill(now);
        if self.available >= 1.0 {
            self.available -= 1.0;
            true
        } else {
            false
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.available = (self.available + elapsed * self.refill_rate).min(self.max);
        self.last_refill = now;
    }

    fn time_to_next(&self) -> Duration {
        if self.refill_rate <= 0.0 {
            return Duration::from_secs(60);
        }
        let missing = (1.0 - self.available).max(0.0);
        Duration::from_secs_f64(missing / self.refill_rate)
    }
}

pub enum RateLimitResult {
    Allowed { remaining: u32 },
    Limited { retry_after: Duration },
}

impl RateLimitResult {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed { .. })
    }
}

/// Rate-limit key for the caller.
///
/// With no trusted proxies only the socket peer counts. Behind
/// `trusted_proxies` hops the client is that many entries from the right of
/// `X-Forwarded-For`, since everything further left is caller supplied.
pub fn client_key(headers: &HeaderMap, peer: Option<IpAddr>, trusted_proxies: usize) -> String {
    let forwarded = if trusted_proxies == 0 {
        None
    } else {
        headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.rsplit(',').nth(trusted_proxies - 1))
            .or_else(|| headers.get("x-real-ip").and_then(|v| v.to_str().ok()))
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    };

    forwarded
        .or_else(|| peer.map(|ip| ip.to_string()))
        .unwrap_or_else(|| "anonymous".to_string())
}

/// Caller's rate-limit key, see [`client_key`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientKey(pub String);

#[axum::async_trait]
impl FromRequestParts<Arc<ApiState>> for ClientKey {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &Arc<ApiState>) -> Result<Self, Self::Rejection> {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip());
        Ok(Self(client_key(&parts.headers, peer, state.config.intake.trusted_proxies)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_burst_then_limited() {
        let limiter = RateLimiter::new(RateLimitConfig { per_minute: 60, burst: 2 });
        let start = Instant::now();
        assert!(limiter.check_at("1.2.3.4", start).is_allowed());
        assert!(limiter.check_at("1.2.3.4", start).is_allowed());
        match limiter.check_at("1.2.3.4", start) {
            RateLimitResult::Limited { retry_after } => assert!(retry_after <= Duration::from_secs(1)),
            RateLimitResult::Allowed { .. } => panic!("third request should be limited"),
        }
        assert!(limiter.check_at("5.6.7.8", start).is_allowed());
    }

    #[test]
    fn test_refill() {
        let limiter = RateLimiter::new(RateLimitConfig { per_minute: 60, burst: 1 });
        let start = Instant::now();
        assert!(limiter.check_at("k", start).is_allowed());
        assert!(!limiter.check_at("k", start).is_allowed());
        assert!(limiter.check_at("k", start + Duration::from_millis(1100)).is_allowed());
    }

    #[test]
    fn test_client_key() {
        let peer: IpAddr = "192.0.2.1".parse().unwrap();
        let mut headers = HeaderMap::new();
        assert_eq!(client_key(&headers, None, 0), "anonymous");
        assert_eq!(client_key(&headers, Some(peer), 1), "192.0.2.1");

        headers.insert("x-real-ip", "10.0.0.9".parse().unwrap());
        assert_eq!(client_key(&headers, Some(peer), 1), "10.0.0.9");
        headers.insert("x-forwarded-for", "203.0.113.7, 10.0.0.1".parse().unwrap());
        assert_eq!(client_key(&headers, Some(peer), 1), "10.0.0.1");
        assert_eq!(client_key(&headers, Some(peer), 2), "203.0.113.7");
        assert_eq!(client_key(&headers, Some(peer), 3), "10.0.0.9");
    }

    #[test]
    fn test_forwarded_headers_ignored_without_trusted_proxy() {
        let peer: IpAddr = "192.0.2.1".parse().unwrap();
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "203.0.113.7".parse().unwrap());
        headers.insert("x-real-ip", "10.0.0.9".parse().unwrap());
        assert_eq!(client_key(&headers, Some(peer), 0), "192.0.2.1");
    }
}
