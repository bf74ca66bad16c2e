//! Evidence items carried across sessions as part of a user's master resume.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

const MAX_EVIDENCE_TEXT_CHARS: usize = 1000;
const MIN_EVIDENCE_TEXT_CHARS: usize = 10;

/// Where an evidence item originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceSource {
    Crafted,
    Upgraded,
    Interview,
    Resume,
}

/// A distilled bullet, interview answer, or accomplishment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EvidenceItem {
    pub text: String,
    pub source: EvidenceSource,
    pub category: String,
    pub source_session_id: String,
    pub created_at: DateTime<Utc>,
}

impl EvidenceItem {
    /// Construct an evidence item, applying the truncation and discard
    /// rules: text shorter than 10 characters after trimming is discarded.
    /// Returns `None` when discarded.
    pub fn new(
        text: &str,
        source: EvidenceSource,
        category: impl Into<String>,
        source_session_id: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Option<Self> {
        let trimmed = text.trim();
        if trimmed.chars().count() < MIN_EVIDENCE_TEXT_CHARS {
            return None;
        }

        Some(Self {
            text: truncate_at_word_boundary(trimmed, MAX_EVIDENCE_TEXT_CHARS),
            source,
            category: category.into(),
            source_session_id: source_session_id.into(),
            created_at,
        })
    }
}

/// Truncate `s` to at most `max_chars` characters, backing off to the
/// nearest preceding word boundary rather than cutting mid-word.
fn truncate_at_word_boundary(s: &str, max_chars: usize) -> String {
    let chars: Vec<char> = s.chars().collect();
    if chars.len() <= max_chars {
        return s.to_string();
    }

    let mut cut = max_chars;
    while cut > 0 && !chars[cut - 1].is_whitespace() {
        cut -= 1;
    }
    if cut == 0 {
        // No whitespace found before the limit; hard-cut instead.
        cut = max_chars;
    }

    chars[..cut].iter().collect::<String>().trim_end().to_string()
}
