//! Sliding-window rate limiting for externally reachable entry points.

use crate::error::{GovernanceError, Result};
use civitas_types::Address;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Counter store behind the limiter.
pub trait RateLimitBackend: Send + Sync {
    /// Record a hit for `key` and report whether it fits in `limit` hits per
    /// `window`. Denied hits are not recorded.
    fn allow(&self, key: &str, window: Duration, limit: u32) -> bool;

    /// Forget keys with no hits inside `window`.
    fn prune(&self, _window: Duration) {}
}

/// Per-process sliding window log.
#[derive(Default)]
pub struct InMemoryBackend {
    requests: Mutex<HashMap<String, Vec<Instant>>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys currently tracked.
    pub fn len(&self) -> usize {
        self.requests.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl RateLimitBackend for InMemoryBackend {
    fn allow(&self, key: &str, window: Duration, limit: u32) -> bool {
        let now = Instant::now();
        let mut requests = self.requests.lock();
        let history = requests.entry(key.to_string()).or_default();

        history.retain(|&t| now.duration_since(t) < window);

        if history.len() >= limit as usize {
            return false;
        }

        history.push(now);
        true
    }

    fn prune(&self, window: Duration) {
        let now = Instant::now();
        let mut requests = self.requests.lock();
        let before = requests.len();
        requests.retain(|_, history| {
            history.retain(|&t| now.duration_since(t) < window);
            !history.is_empty()
        });
        let dropped = before - requests.len();
        if dropped > 0 {
            debug!(dropped, remaining = requests.len(), "Rate limit keys pruned");
        }
    }
}

const MINUTE: Duration = Duration::from_secs(60);
const HOUR: Duration = Duration::from_secs(3600);

/// Per-minute and per-hour limits keyed by entry point and caller.
#[derive(Clone)]
pub struct RateLimiter {
    backend: Arc<dyn RateLimitBackend>,
    per_minute: u32,
    per_hour: u32,
}

impl RateLimiter {
    pub fn new(backend: Arc<dyn RateLimitBackend>, per_minute: u32, per_hour: u32) -> Self {
        Self {
            backend,
            per_minute,
            per_hour,
        }
    }

    pub fn in_memory(per_minute: u32, per_hour: u32) -> Self {
        Self::new(Arc::new(InMemoryBackend::new()), per_minute, per_hour)
    }

    pub fn check(&self, scope: &str, key: &str) -> Result<()> {
        let minute_key = format!("{scope}:{key}:m");
        let hour_key = format!("{scope}:{key}:h");

        if !self.backend.allow(&minute_key, MINUTE, self.per_minute)
            || !self.backend.allow(&hour_key, HOUR, self.per_hour)
        {
            warn!(scope, key, "Rate limit exceeded");
            return Err(GovernanceError::RateLimited(format!("{scope}:{key}")));
        }
        Ok(())
    }

    pub fn check_address(&self, scope: &str, address: &Address) -> Result<()> {
        self.check(scope, &format!("{:x}", address))
    }

    pub fn check_ip(&self, scope: &str, ip: IpAddr) -> Result<()> {
        self.check(scope, &format!("ip:{}", ip))
    }

    /// Drop counters idle for longer than the longest window.
    pub fn prune(&self) {
        self.backend.prune(HOUR);
    }
}
