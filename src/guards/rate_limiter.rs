//! Sliding-window rate limiting.
//!
//! One implementation, parameterized per use site, backs both the per-user
//! message-rate guard (20/60s) and the SSE-connect-rate guard (10/60s) — a
//! single configurable window in place of separate minute/hour/burst tiers.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// A single key's sliding window of recent-event timestamps.
#[derive(Debug, Default)]
struct SlidingWindow {
    events: VecDeque<Instant>,
}

impl SlidingWindow {
    fn record_if_allowed(&mut self, now: Instant, window: Duration, limit: u32) -> bool {
        while let Some(&front) = self.events.front() {
            if now.duration_since(front) > window {
                self.events.pop_front();
            } else {
                break;
            }
        }
        if self.events.len() as u32 >= limit {
            return false;
        }
        self.events.push_back(now);
        true
    }
}

/// Per-key sliding-window rate limiter with an LRU-trimmed key registry.
/// Used for both per-user SSE connect attempts and per-session message
/// rate.
pub struct RateLimiter {
    window: Duration,
    limit: u32,
    registry_cap: usize,
    windows: Mutex<HashMap<String, SlidingWindow>>,
    lru: Mutex<VecDeque<String>>,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("window", &self.window)
            .field("limit", &self.limit)
            .finish_non_exhaustive()
    }
}

impl RateLimiter {
    pub fn new(window: Duration, limit: u32, registry_cap: usize) -> Self {
        Self {
            window,
            limit,
            registry_cap,
            windows: Mutex::new(HashMap::new()),
            lru: Mutex::new(VecDeque::new()),
        }
    }

    /// Try to record one event for `key`. Returns `true` if allowed.
    pub fn try_acquire(&self, key: &str) -> bool {
        self.touch_lru(key);
        let now = Instant::now();
        let mut windows = self.windows.lock().expect("rate limiter mutex poisoned");
        let entry = windows.entry(key.to_string()).or_default();
        entry.record_if_allowed(now, self.window, self.limit)
    }

    fn touch_lru(&self, key: &str) {
        let mut lru = self.lru.lock().expect("lru mutex poisoned");
        if let Some(pos) = lru.iter().position(|k| k == key) {
            lru.remove(pos);
        }
        lru.push_back(key.to_string());

        while lru.len() > self.registry_cap {
            if let Some(evicted) = lru.pop_front() {
                self.windows
                    .lock()
                    .expect("rate limiter mutex poisoned")
                    .remove(&evicted);
            }
        }
    }

    /// Periodic sweep: drop keys whose window has gone fully idle, so the
    /// registry doesn't hold dead entries between evictions.
    pub fn sweep_idle(&self) {
        let now = Instant::now();
        let mut windows = self.windows.lock().expect("rate limiter mutex poisoned");
        windows.retain(|_, w| w.events.back().is_some_and(|&t| now.duration_since(t) <= self.window));
        let mut lru = self.lru.lock().expect("lru mutex poisoned");
        lru.retain(|k| windows.contains_key(k));
    }
}
