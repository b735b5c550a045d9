//! Sliding-window rate limiter
//!
//! Counts requests per user key over the trailing 60 seconds. One mutex guards
//! the whole map so concurrent bursts for a key observe a consistent count.
//! Entries older than the window are evicted lazily on access to their key.

use crate::config::SecurityConfig;
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

const WINDOW: Duration = Duration::from_secs(60);

pub struct RateLimiter {
    cfg: SecurityConfig,
    requests: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl RateLimiter {
    pub fn new(cfg: SecurityConfig) -> Self {
        Self { cfg, requests: Mutex::new(HashMap::new()) }
    }

    /// Admit or reject one request for `key`. Admission records the request.
    pub async fn allow(&self, key: &str) -> bool {
        if !self.cfg.enable_rate_limiting {
            return true;
        }
        let mut requests = self.requests.lock().await;
        let now = Instant::now();
        let queue = requests.entry(key.to_string()).or_default();
        while let Some(front) = queue.front() {
            if now.duration_since(*front) >= WINDOW {
                queue.pop_front();
            } else {
                break;
            }
        }
        if queue.len() >= self.cfg.max_requests_per_minute {
            return false;
        }
        queue.push_back(now);
        true
    }
}
