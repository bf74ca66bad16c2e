//! The session gate subsystem (overlaps `guards` on rate limiting):
//! SSE event taxonomy, pending-gate response queue, the
//! suspend/resume `waitForUser` protocol, session locking, and connection
//! accounting.

pub mod events;
pub mod queue;
pub mod session_lock;
pub mod sse;

pub use events::SseEvent;
pub use queue::{GateDescriptor, QueuedResponse, SubmitOutcome};
pub use session_lock::{ProcessingGuard, SessionLockManager};
pub use sse::{ConnectionGuard, ConnectionRegistry, GateStore, GateWaiter, RunningSet, SseHub};
