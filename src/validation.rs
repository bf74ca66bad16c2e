//! Request validation utilities.

use crate::types::{Error, Result};

/// Validate that a string is not empty.
pub fn validate_non_empty(s: &str, field: &str) -> Result<()> {
    if s.is_empty() {
        return Err(Error::validation(format!("{} cannot be empty", field)));
    }
    Ok(())
}

/// Validate that a value is positive.
pub fn validate_positive(n: u32, field: &str) -> Result<()> {
    if n == 0 {
        return Err(Error::validation(format!("{} must be positive", field)));
    }
    Ok(())
}

/// Validate that a string does not exceed `max_len` characters.
///
/// Used for the message body cap (`content` ≤ 50_000 chars).
pub fn validate_max_len(s: &str, max_len: usize, field: &str) -> Result<()> {
    let len = s.chars().count();
    if len > max_len {
        return Err(Error::cap_exceeded(format!(
            "{} is {} chars, exceeds max of {}",
            field, len, max_len
        )));
    }
    Ok(())
}

/// Validate an idempotency key's raw (un-prefixed) form: non-empty and
/// within the configured character cap (≤ 128 chars).
pub fn validate_idempotency_key(key: &str, max_len: usize) -> Result<()> {
    validate_non_empty(key, "idempotency_key")?;
    validate_max_len(key, max_len, "idempotency_key")
}
