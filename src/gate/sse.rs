//! Session gate & SSE transport.
//!
//! A `tokio::sync::broadcast` channel per session, fed into
//! `axum::response::sse::Sse` at the binary's HTTP layer (kept out of this
//! library — `gate::sse` owns only the hub/heartbeat/gate-wait primitives,
//! not the axum handler itself; HTTP routing is an external collaborator).

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tokio::sync::{broadcast, Mutex as AsyncMutex, Notify};
use tokio_util::sync::CancellationToken;

use crate::gate::events::SseEvent;
use crate::gate::queue::{clear_current_gate, current_gate, with_current_gate, GateDescriptor};
use crate::types::{Error, GateQueueConfig, GuardsConfig, Result, SessionId, UserId};

/// Read/write access to a session's pending-gate payload column
/// (`pending_gate_data`). Implemented by the persistence layer; `gate::sse`
/// only depends on this trait to avoid a circular module dependency.
#[async_trait]
pub trait GateStore: Send + Sync {
    async fn read_gate_payload(&self, session: &SessionId) -> Result<Value>;
    async fn write_gate_payload(&self, session: &SessionId, payload: Value) -> Result<()>;
}

/// The process-wide "running set": session ids with an active pipeline run.
/// Consulted by the heartbeat loop as a liveness guard.
#[derive(Debug, Default)]
pub struct RunningSet {
    inner: AsyncMutex<HashSet<SessionId>>,
}

impl RunningSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, session: SessionId) {
        self.inner.lock().await.insert(session);
    }

    pub async fn remove(&self, session: &SessionId) {
        self.inner.lock().await.remove(session);
    }

    pub async fn contains(&self, session: &SessionId) -> bool {
        self.inner.lock().await.contains(session)
    }
}

/// Per-user/global SSE connection cap enforcement plus the connect-attempt
/// rate limiter.
pub struct ConnectionRegistry {
    per_user: AsyncMutex<HashMap<UserId, usize>>,
    total: AsyncMutex<usize>,
    max_per_user: usize,
    max_total: usize,
    connect_attempts: crate::guards::RateLimiter,
}

impl std::fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionRegistry").finish_non_exhaustive()
    }
}

impl ConnectionRegistry {
    pub fn new(max_per_user: usize, max_total: usize, guards: &GuardsConfig) -> Self {
        Self {
            per_user: AsyncMutex::new(HashMap::new()),
            total: AsyncMutex::new(0),
            max_per_user,
            max_total,
            connect_attempts: crate::guards::RateLimiter::new(
                Duration::from_secs(60),
                guards.sse_connect_rate_per_minute,
                guards.sse_connect_attempt_registry_cap,
            ),
        }
    }

    /// Enforce the connect-attempt rate limit (10/60s) before
    /// even considering the connection cap.
    pub fn check_connect_rate(&self, user_id: &UserId) -> Result<()> {
        if self.connect_attempts.try_acquire(user_id.as_str()) {
            Ok(())
        } else {
            Err(Error::quota_exceeded("SSE connect rate exceeded"))
        }
    }

    /// Acquire one connection slot for `user_id`. Returns a guard that
    /// releases the slot on drop. `MAX_SSE_PER_USER = 5`.
    pub async fn acquire(self: &Arc<Self>, user_id: UserId) -> Result<ConnectionGuard> {
        let mut per_user = self.per_user.lock().await;
        let mut total = self.total.lock().await;

        if *total >= self.max_total {
            return Err(Error::quota_exceeded("global SSE connection cap reached"));
        }
        let count = per_user.entry(user_id.clone()).or_insert(0);
        if *count >= self.max_per_user {
            return Err(Error::quota_exceeded(format!(
                "user already has {} SSE connections (max {})",
                count, self.max_per_user
            )));
        }
        *count += 1;
        *total += 1;

        Ok(ConnectionGuard {
            registry: Arc::clone(self),
            user_id,
        })
    }

    async fn release(&self, user_id: &UserId) {
        let mut per_user = self.per_user.lock().await;
        if let Some(count) = per_user.get_mut(user_id) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                per_user.remove(user_id);
            }
        }
        let mut total = self.total.lock().await;
        *total = total.saturating_sub(1);
    }
}

/// RAII connection slot. Dropping it (disconnect, error, or normal stream
/// end) releases the cap accounting — the client disconnecting does *not*
/// cancel the underlying pipeline run.
pub struct ConnectionGuard {
    registry: Arc<ConnectionRegistry>,
    user_id: UserId,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        let registry = Arc::clone(&self.registry);
        let user_id = self.user_id.clone();
        tokio::spawn(async move {
            registry.release(&user_id).await;
        });
    }
}

/// Per-session broadcast hub. Multiple SSE connections to the same session
/// (multiple tabs) all receive every emitted event.
#[derive(Debug, Default)]
pub struct SseHub {
    senders: AsyncMutex<HashMap<SessionId, broadcast::Sender<SseEvent>>>,
}

impl SseHub {
    pub fn new() -> Self {
        Self::default()
    }

    async fn sender_for(&self, session: &SessionId) -> broadcast::Sender<SseEvent> {
        let mut senders = self.senders.lock().await;
        senders
            .entry(session.clone())
            .or_insert_with(|| broadcast::channel(256).0)
            .clone()
    }

    /// Subscribe a new SSE connection to `session`'s event stream.
    pub async fn subscribe(&self, session: &SessionId) -> broadcast::Receiver<SseEvent> {
        self.sender_for(session).await.subscribe()
    }

    /// Emit `event` to every subscriber. A send with no subscribers is not
    /// an error — SSE writes are non-blocking, and an empty channel is not
    /// a write failure.
    pub async fn emit(&self, session: &SessionId, event: SseEvent) {
        let sender = self.sender_for(session).await;
        let _ = sender.send(event);
    }

    pub async fn drop_session(&self, session: &SessionId) {
        self.senders.lock().await.remove(session);
    }
}

/// Spawn the per-session heartbeat loop, emitting every 10 seconds. Stops
/// itself the first tick it finds `session` absent from `running`,
/// performing no write in that case.
pub fn spawn_heartbeat(
    session: SessionId,
    hub: Arc<SseHub>,
    running: Arc<RunningSet>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            if !running.contains(&session).await {
                tracing::debug!(session_id = %session, "heartbeat: session not running, stopping");
                break;
            }
            hub.emit(&session, SseEvent::Heartbeat { session_id: session.clone() }).await;
        }
    })
}

/// Implements the `waitForUser(gate)` suspend/resume protocol.
/// Notification is in-process, keyed by session id; the gate payload
/// itself is the durable source of truth a reconnect falls back to.
pub struct GateWaiter {
    notifiers: AsyncMutex<HashMap<(SessionId, String), Arc<Notify>>>,
}

impl std::fmt::Debug for GateWaiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GateWaiter").finish_non_exhaustive()
    }
}

impl GateWaiter {
    pub fn new() -> Self {
        Self {
            notifiers: AsyncMutex::new(HashMap::new()),
        }
    }

    async fn notify_handle(&self, session: &SessionId, gate: &str) -> Arc<Notify> {
        let mut map = self.notifiers.lock().await;
        map.entry((session.clone(), gate.to_string()))
            .or_insert_with(|| Arc::new(Notify::new()))
            .clone()
    }

    /// Suspend until a matching response lands in the pending-gate payload
    /// or `cancel` fires.
    pub async fn wait_for_user(
        &self,
        store: &dyn GateStore,
        session: &SessionId,
        gate: &str,
        cancel: CancellationToken,
    ) -> Result<Value> {
        let descriptor = GateDescriptor::new(gate, Utc::now());
        let payload = store.read_gate_payload(session).await?;
        let opened = with_current_gate(&payload, &descriptor);
        store.write_gate_payload(session, opened).await?;

        let notify = self.notify_handle(session, gate).await;

        // The notifier is now registered, so any `notify_response` from this
        // point on wakes us. But `notify_waiters` stores no permit: a
        // response that committed in the window between `write_gate_payload`
        // above and this registration would otherwise wake nobody and the
        // loop below would block forever. Re-read once before the first
        // wait to close that window.
        if let Some(response) = self.take_matching_response(store, session, gate).await? {
            return Ok(response);
        }

        loop {
            tokio::select! {
                _ = notify.notified() => {
                    if let Some(response) = self.take_matching_response(store, session, gate).await? {
                        return Ok(response);
                    }
                    // Spurious wake (e.g. a different gate's response landed
                    // first); keep waiting for ours.
                }
                _ = cancel.cancelled() => {
                    return Err(Error::cancelled(format!("waitForUser({}) cancelled", gate)));
                }
            }
        }
    }

    /// If the pending-gate payload already carries a response for `gate`,
    /// clear it and return it; otherwise `None`.
    async fn take_matching_response(
        &self,
        store: &dyn GateStore,
        session: &SessionId,
        gate: &str,
    ) -> Result<Option<Value>> {
        let payload = store.read_gate_payload(session).await?;
        if let Some(d) = current_gate(&payload) {
            if d.gate == gate {
                if let Some(response) = d.response {
                    let cleared = clear_current_gate(&payload);
                    store.write_gate_payload(session, cleared).await?;
                    self.notifiers.lock().await.remove(&(session.clone(), gate.to_string()));
                    return Ok(Some(response));
                }
            }
        }
        Ok(None)
    }

    /// Wake any task blocked on `(session, gate)`. Called by the
    /// gate-response API handler after it commits a response.
    pub async fn notify_response(&self, session: &SessionId, gate: &str) {
        if let Some(n) = self.notifiers.lock().await.get(&(session.clone(), gate.to_string())) {
            n.notify_waiters();
        }
    }
}

impl Default for GateWaiter {
    fn default() -> Self {
        Self::new()
    }
}
