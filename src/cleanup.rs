//! Background sweep service.
//!
//! An `Arc<Mutex<_>>`-owned state, `tokio::time::interval` driven inside a
//! `tokio::select!` against a `oneshot` stop channel, returning a stats
//! struct per cycle for observability.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;

use crate::gate::session_lock::SessionLockManager;
use crate::guards::{IdempotencyGuard, RateLimiter};

/// Counts from one sweep cycle, logged at `debug` level.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupStats {
    pub idempotency_entries_before: usize,
    pub idempotency_entries_after: usize,
}

/// Periodically sweeps the three size-bounded, LRU-trimmed in-memory
/// registries (message-rate limiter, SSE-connect-rate limiter, idempotency
/// guard) so idle keys don't linger between LRU evictions. Processing-session
/// TTL reaping happens inline in
/// `SessionLockManager::begin`, so the sweep here only touches the two
/// rate limiters and the idempotency guard.
pub struct CleanupService {
    message_rate_limiter: Arc<RateLimiter>,
    connect_rate_limiter: Arc<RateLimiter>,
    idempotency_guard: Arc<IdempotencyGuard>,
    session_locks: Arc<SessionLockManager>,
    interval: Duration,
}

impl std::fmt::Debug for CleanupService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CleanupService")
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}

/// Handle to a running sweep task; dropping it does not stop the task —
/// call `stop()` explicitly.
pub struct CleanupHandle {
    stop_tx: oneshot::Sender<()>,
    join: tokio::task::JoinHandle<()>,
}

impl CleanupService {
    pub fn new(
        message_rate_limiter: Arc<RateLimiter>,
        connect_rate_limiter: Arc<RateLimiter>,
        idempotency_guard: Arc<IdempotencyGuard>,
        session_locks: Arc<SessionLockManager>,
        interval: Duration,
    ) -> Self {
        Self {
            message_rate_limiter,
            connect_rate_limiter,
            idempotency_guard,
            session_locks,
            interval,
        }
    }

    /// Run one sweep cycle synchronously (used directly by tests, and
    /// internally by `spawn`'s loop body).
    pub fn sweep_once(&self) -> CleanupStats {
        let before = self.idempotency_guard.len();
        self.message_rate_limiter.sweep_idle();
        self.connect_rate_limiter.sweep_idle();
        self.idempotency_guard.sweep_expired();
        // Processing-session reaping is lazy (on next `begin`), but touching
        // `in_flight_count` here keeps the debug log informative.
        let _ = self.session_locks.in_flight_count();
        let after = self.idempotency_guard.len();

        CleanupStats {
            idempotency_entries_before: before,
            idempotency_entries_after: after,
        }
    }

    /// Spawn the periodic sweep loop. Returns a handle whose `stop()` ends
    /// the loop gracefully.
    pub fn spawn(self: Arc<Self>) -> CleanupHandle {
        let (stop_tx, mut stop_rx) = oneshot::channel();
        let service = self;

        let join = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(service.interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let stats = service.sweep_once();
                        tracing::debug!(
                            idempotency_before = stats.idempotency_entries_before,
                            idempotency_after = stats.idempotency_entries_after,
                            "cleanup_sweep_cycle"
                        );
                    }
                    _ = &mut stop_rx => {
                        tracing::debug!("cleanup_sweep_stopped");
                        break;
                    }
                }
            }
        });

        CleanupHandle { stop_tx, join }
    }
}

impl CleanupHandle {
    /// Signal the sweep loop to stop and wait for it to exit.
    pub async fn stop(self) {
        let _ = self.stop_tx.send(());
        let _ = self.join.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ProcessingConfig;

    fn service() -> CleanupService {
        CleanupService::new(
            Arc::new(RateLimiter::new(Duration::from_secs(60), 20, 1000)),
            Arc::new(RateLimiter::new(Duration::from_secs(60), 10, 1000)),
            Arc::new(IdempotencyGuard::new(1000, Duration::from_millis(1))),
            Arc::new(SessionLockManager::new(ProcessingConfig {
                max_processing_sessions_per_user: 6,
                max_processing_sessions: 2000,
                processing_ttl: Duration::from_secs(900),
                max_total_sse_connections: 10_000,
            })),
            Duration::from_millis(10),
        )
    }

    #[test]
    fn sweep_once_clears_expired_idempotency_keys() {
        let service = service();
        service.idempotency_guard.check_and_record("u1", "k1");
        std::thread::sleep(Duration::from_millis(5));
        let stats = service.sweep_once();
        assert_eq!(stats.idempotency_entries_before, 1);
        assert_eq!(stats.idempotency_entries_after, 0);
    }

    #[tokio::test]
    async fn spawned_loop_stops_cleanly() {
        let service = Arc::new(service());
        let handle = service.spawn();
        tokio::time::sleep(Duration::from_millis(30)).await;
        handle.stop().await;
    }
}
