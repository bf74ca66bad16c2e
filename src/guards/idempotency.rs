//! Per-message idempotency keys. A duplicate key returns an informational
//! duplicate status rather than an error.
//!
//! Keys are scoped `<user_id>:<key>`, capped at 128 chars (enforced by
//! `validation::validate_idempotency_key` at the HTTP boundary), retained
//! in an LRU-bounded map for 5 minutes. Built in the same sliding-map-with-
//! sweep idiom as `guards::rate_limiter`.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Outcome of checking an idempotency key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdempotencyOutcome {
    /// First time this key has been seen; proceed with side effects.
    Fresh,
    /// Already seen within the retention window; return the stable
    /// "duplicate" status without repeating side effects.
    Duplicate,
}

struct Entry {
    inserted_at: Instant,
}

/// LRU-bounded, TTL-expiring set of `<user_id>:<key>` idempotency keys.
pub struct IdempotencyGuard {
    max_entries: usize,
    ttl: Duration,
    entries: Mutex<HashMap<String, Entry>>,
    lru: Mutex<VecDeque<String>>,
}

impl std::fmt::Debug for IdempotencyGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdempotencyGuard")
            .field("max_entries", &self.max_entries)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl IdempotencyGuard {
    pub fn new(max_entries: usize, ttl: Duration) -> Self {
        Self {
            max_entries,
            ttl,
            entries: Mutex::new(HashMap::new()),
            lru: Mutex::new(VecDeque::new()),
        }
    }

    fn scoped_key(user_id: &str, key: &str) -> String {
        format!("{}:{}", user_id, key)
    }

    /// Check and record `key` for `user_id`. Expired entries are treated as
    /// absent (and replaced) rather than returned as duplicates.
    pub fn check_and_record(&self, user_id: &str, key: &str) -> IdempotencyOutcome {
        let scoped = Self::scoped_key(user_id, key);
        let now = Instant::now();

        let mut entries = self.entries.lock().expect("idempotency mutex poisoned");
        if let Some(existing) = entries.get(&scoped) {
            if now.duration_since(existing.inserted_at) <= self.ttl {
                return IdempotencyOutcome::Duplicate;
            }
        }

        entries.insert(scoped.clone(), Entry { inserted_at: now });
        drop(entries);

        let mut lru = self.lru.lock().expect("lru mutex poisoned");
        if let Some(pos) = lru.iter().position(|k| k == &scoped) {
            lru.remove(pos);
        }
        lru.push_back(scoped);

        while lru.len() > self.max_entries {
            if let Some(evicted) = lru.pop_front() {
                self.entries.lock().expect("idempotency mutex poisoned").remove(&evicted);
            }
        }

        IdempotencyOutcome::Fresh
    }

    /// Drop entries whose TTL has elapsed (periodic sweep).
    pub fn sweep_expired(&self) {
        let now = Instant::now();
        let mut entries = self.entries.lock().expect("idempotency mutex poisoned");
        entries.retain(|_, e| now.duration_since(e.inserted_at) <= self.ttl);
        let mut lru = self.lru.lock().expect("lru mutex poisoned");
        lru.retain(|k| entries.contains_key(k));
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("idempotency mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
