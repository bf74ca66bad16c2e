//! Session lock & concurrency control.
//!
//! Serializes message processing per session (at most one agent-loop
//! invocation per session in flight) and enforces per-user/global in-flight
//! caps with TTL-based reaping of abandoned entries. Orthogonal to the SSE
//! connection registry (`gate::sse`): a client may hold several SSE
//! connections to the same session, but only one message-processing task
//! runs at a time.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Instant;

use tokio::sync::Mutex as AsyncMutex;

use crate::types::{Error, ProcessingConfig, Result, SessionId, UserId};

struct ProcessingEntry {
    user_id: UserId,
    started_at: Instant,
}

/// Tracks in-flight message-processing tasks and hands out the per-session
/// exclusion lock.
pub struct SessionLockManager {
    locks: StdMutex<HashMap<SessionId, Arc<AsyncMutex<()>>>>,
    processing: StdMutex<HashMap<SessionId, ProcessingEntry>>,
    cfg: ProcessingConfig,
}

impl std::fmt::Debug for SessionLockManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count = self.processing.lock().map(|p| p.len()).unwrap_or(0);
        f.debug_struct("SessionLockManager")
            .field("in_flight", &count)
            .finish_non_exhaustive()
    }
}

impl SessionLockManager {
    pub fn new(cfg: ProcessingConfig) -> Self {
        Self {
            locks: StdMutex::new(HashMap::new()),
            processing: StdMutex::new(HashMap::new()),
            cfg,
        }
    }

    /// Reap entries older than `PROCESSING_TTL_MS`.
    fn reap_expired(&self) {
        let ttl = self.cfg.processing_ttl;
        let mut processing = self.processing.lock().expect("processing mutex poisoned");
        processing.retain(|_, entry| entry.started_at.elapsed() < ttl);
    }

    /// Begin processing a message for `session_id` on behalf of `user_id`.
    /// Enforces the per-user and global in-flight caps, then acquires the
    /// per-session exclusion lock. The returned guard releases both the
    /// cap accounting and the lock when dropped — a "finally"-equivalent
    /// path covering success, failure, and cancellation uniformly since
    /// `Drop` runs regardless of how the scope exits.
    pub async fn begin(&self, session_id: &SessionId, user_id: &UserId) -> Result<ProcessingGuard<'_>> {
        self.reap_expired();

        {
            let mut processing = self.processing.lock().expect("processing mutex poisoned");
            if processing.len() >= self.cfg.max_processing_sessions {
                return Err(Error::quota_exceeded("global processing-session cap reached"));
            }
            let per_user_cap = self
                .cfg
                .max_processing_sessions_per_user
                .min(self.cfg.max_processing_sessions);
            let user_count = processing.values().filter(|e| &e.user_id == user_id).count();
            if user_count >= per_user_cap {
                return Err(Error::quota_exceeded("per-user processing-session cap reached"));
            }
            processing.insert(
                session_id.clone(),
                ProcessingEntry {
                    user_id: user_id.clone(),
                    started_at: Instant::now(),
                },
            );
        }

        let session_lock = {
            let mut locks = self.locks.lock().expect("locks mutex poisoned");
            locks
                .entry(session_id.clone())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };

        let owned_guard = session_lock.lock_owned().await;

        Ok(ProcessingGuard {
            manager: self,
            session_id: session_id.clone(),
            _lock_guard: owned_guard,
        })
    }

    pub fn in_flight_count(&self) -> usize {
        self.processing.lock().expect("processing mutex poisoned").len()
    }

    fn end(&self, session_id: &SessionId) {
        self.processing
            .lock()
            .expect("processing mutex poisoned")
            .remove(session_id);
    }
}

/// RAII guard held for the duration of one message-processing turn.
pub struct ProcessingGuard<'a> {
    manager: &'a SessionLockManager,
    session_id: SessionId,
    _lock_guard: tokio::sync::OwnedMutexGuard<()>,
}

impl Drop for ProcessingGuard<'_> {
    fn drop(&mut self) {
        self.manager.end(&self.session_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn cfg() -> ProcessingConfig {
        ProcessingConfig {
            max_processing_sessions_per_user: 2,
            max_processing_sessions: 10,
            processing_ttl: std::time::Duration::from_secs(900),
            max_total_sse_connections: 10_000,
        }
    }

    #[tokio::test]
    async fn only_one_processing_task_per_session() {
        let manager = Arc::new(SessionLockManager::new(cfg()));
        let session = SessionId::new();
        let user = UserId::must("u1");

        let order = Arc::new(AtomicU32::new(0));
        let m1 = manager.clone();
        let s1 = session.clone();
        let u1 = user.clone();
        let order1 = order.clone();
        let task1 = tokio::spawn(async move {
            let _guard = m1.begin(&s1, &u1).await.unwrap();
            tokio::time::sleep(std::time::Duration::from_millis(30)).await;
            order1.fetch_add(1, Ordering::SeqCst)
        });

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let m2 = manager.clone();
        let s2 = session.clone();
        let u2 = user.clone();
        let task2 = tokio::spawn(async move {
            let _guard = m2.begin(&s2, &u2).await.unwrap();
            order.fetch_add(10, Ordering::SeqCst)
        });

        let (r1, r2) = tokio::join!(task1, task2);
        let v1 = r1.unwrap();
        let v2 = r2.unwrap();
        // task2 had to wait for task1's guard to drop, so it observes the
        // post-increment value (1), not the pre-increment state.
        assert_eq!(v1, 0);
        assert_eq!(v2, 11);
    }

    #[tokio::test]
    async fn per_user_cap_enforced() {
        let manager = SessionLockManager::new(cfg());
        let user = UserId::must("u1");
        let _g1 = manager.begin(&SessionId::new(), &user).await.unwrap();
        let _g2 = manager.begin(&SessionId::new(), &user).await.unwrap();
        let result = manager.begin(&SessionId::new(), &user).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn guard_drop_releases_cap() {
        let manager = SessionLockManager::new(cfg());
        let user = UserId::must("u1");
        {
            let _g1 = manager.begin(&SessionId::new(), &user).await.unwrap();
            let _g2 = manager.begin(&SessionId::new(), &user).await.unwrap();
        }
        assert_eq!(manager.in_flight_count(), 0);
        let result = manager.begin(&SessionId::new(), &user).await;
        assert!(result.is_ok());
    }
}
