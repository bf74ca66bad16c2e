//! Pending-gate response queue.
//!
//! Makes gate responses durable, idempotent, and replayable. The payload
//! shape is opaque on the session row (`pending_gate_data`); this
//! module only ever reads/writes it as a `serde_json::Value` so the
//! surrounding persistence layer doesn't need to know its internal shape.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::types::GateQueueConfig;

const TRUNCATION_MARKER: &str = "[truncated for size]";

/// The current gate a session is suspended on, if any.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GateDescriptor {
    pub gate: String,
    pub created_at: DateTime<Utc>,
    pub responded_at: Option<DateTime<Utc>>,
    pub response: Option<Value>,
}

impl GateDescriptor {
    pub fn new(gate: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            gate: gate.into(),
            created_at,
            responded_at: None,
            response: None,
        }
    }

    pub fn is_answered(&self) -> bool {
        self.responded_at.is_some()
    }
}

/// One buffered response in the bounded queue.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueuedResponse {
    pub gate: String,
    pub response: Value,
    pub responded_at: DateTime<Utc>,
}

/// Outcome of submitting a response against a pending-gate payload.
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    /// Answered the current gate in place.
    Answered,
    /// The gate was already answered; this submission was a silent no-op.
    AlreadyAnswered,
    /// No current gate matched; buffered into the response queue for when
    /// the session catches up.
    Buffered,
}

/// Parse a pending-gate payload; any non-object input returns an empty map.
pub fn parse(payload: &Value) -> Map<String, Value> {
    payload.as_object().cloned().unwrap_or_default()
}

/// The session's current gate descriptor, if any.
pub fn current_gate(payload: &Value) -> Option<GateDescriptor> {
    parse(payload)
        .get("current_gate")
        .and_then(|v| serde_json::from_value(v.clone()).ok())
}

/// Return a new payload with `descriptor` set as the current gate. Used by
/// `waitForUser` to open a new gate.
pub fn with_current_gate(payload: &Value, descriptor: &GateDescriptor) -> Value {
    let mut obj = parse(payload);
    obj.insert("current_gate".to_string(), serde_json::to_value(descriptor).unwrap_or(Value::Null));
    Value::Object(obj)
}

/// Clear the current gate (called once `waitForUser`'s future resolves and
/// the response has been consumed).
pub fn clear_current_gate(payload: &Value) -> Value {
    let mut obj = parse(payload);
    obj.remove("current_gate");
    Value::Object(obj)
}

/// Read the response queue from a payload: folds legacy single-slot fields
/// in, keeps the most recent response per gate, and enforces the three caps.
pub fn get_response_queue(payload: &Value, cfg: &GateQueueConfig) -> Vec<QueuedResponse> {
    let obj = parse(payload);

    let mut entries: Vec<QueuedResponse> = obj
        .get("response_queue")
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|e| serde_json::from_value::<QueuedResponse>(e.clone()).ok())
                .collect()
        })
        .unwrap_or_default();

    // Legacy single-slot fields: a prior format stored exactly one
    // outstanding response directly on the payload instead of in a queue.
    if let Some(gate) = obj.get("gate").and_then(|v| v.as_str()) {
        if let Some(response) = obj.get("response") {
            let responded_at = obj
                .get("responded_at")
                .and_then(|v| v.as_str())
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|d| d.with_timezone(&Utc))
                .unwrap_or_else(Utc::now);
            entries.push(QueuedResponse {
                gate: gate.to_string(),
                response: response.clone(),
                responded_at,
            });
        }
    }

    dedupe_keep_most_recent_per_gate(&mut entries);
    enforce_caps(&mut entries, cfg);
    entries
}

/// Returns a new payload with the queue set and legacy single-slot fields
/// stripped.
pub fn with_response_queue(payload: &Value, queue: &[QueuedResponse]) -> Value {
    let mut obj = parse(payload);
    obj.remove("gate");
    obj.remove("response");
    obj.remove("responded_at");
    obj.insert(
        "response_queue".to_string(),
        serde_json::to_value(queue).unwrap_or(Value::Array(vec![])),
    );
    Value::Object(obj)
}

/// Keep only the most recent entry per gate name, preserving the relative
/// order of the kept entries (last-write-wins, stable).
fn dedupe_keep_most_recent_per_gate(entries: &mut Vec<QueuedResponse>) {
    use std::collections::HashMap;
    let mut last_index_for_gate: HashMap<String, usize> = HashMap::new();
    for (i, e) in entries.iter().enumerate() {
        last_index_for_gate.insert(e.gate.clone(), i);
    }
    let mut kept_indices: Vec<usize> = last_index_for_gate.values().copied().collect();
    kept_indices.sort_unstable();
    let mut result = Vec::with_capacity(kept_indices.len());
    for i in kept_indices {
        result.push(entries[i].clone());
    }
    *entries = result;
}

/// Truncate any single over-cap item first, then evict from the head by
/// total bytes, then evict from the head by count, until all three caps
/// hold.
fn enforce_caps(entries: &mut Vec<QueuedResponse>, cfg: &GateQueueConfig) {
    for entry in entries.iter_mut() {
        let item_bytes = serde_json::to_vec(&entry.response).map(|v| v.len()).unwrap_or(0);
        if item_bytes > cfg.max_buffered_response_item_bytes {
            entry.response = truncated_marker_value(&entry.response, cfg.max_buffered_response_item_bytes);
        }
    }

    while entries.len() > 1 && total_bytes(entries) > cfg.max_buffered_responses_total_bytes {
        entries.remove(0);
    }
    while entries.len() > cfg.max_buffered_responses {
        entries.remove(0);
    }
}

fn truncated_marker_value(original: &Value, keep_bytes: usize) -> Value {
    let rendered = original.to_string();
    let budget = keep_bytes.saturating_sub(TRUNCATION_MARKER.len() + 1);
    let mut prefix: String = rendered.chars().take(budget.min(rendered.chars().count())).collect();
    if !prefix.is_empty() {
        prefix.push(' ');
    }
    Value::String(format!("{}{}", prefix, TRUNCATION_MARKER))
}

fn total_bytes(entries: &[QueuedResponse]) -> usize {
    entries
        .iter()
        .map(|e| serde_json::to_vec(e).map(|v| v.len()).unwrap_or(0))
        .sum()
}

/// Submit a response for `gate`. Idempotent: answering an already-answered
/// gate is a silent no-op. A response for a gate that isn't the current
/// one is buffered.
pub fn submit_response(
    payload: &Value,
    gate: &str,
    response: Value,
    responded_at: DateTime<Utc>,
    cfg: &GateQueueConfig,
) -> (Value, SubmitOutcome) {
    match current_gate(payload) {
        Some(mut descriptor) if descriptor.gate == gate => {
            if descriptor.is_answered() {
                return (payload.clone(), SubmitOutcome::AlreadyAnswered);
            }
            descriptor.responded_at = Some(responded_at);
            descriptor.response = Some(response);
            (with_current_gate(payload, &descriptor), SubmitOutcome::Answered)
        }
        _ => {
            let mut queue = get_response_queue(payload, cfg);
            queue.push(QueuedResponse {
                gate: gate.to_string(),
                response,
                responded_at,
            });
            dedupe_keep_most_recent_per_gate(&mut queue);
            enforce_caps(&mut queue, cfg);
            (with_response_queue(payload, &queue), SubmitOutcome::Buffered)
        }
    }
}
