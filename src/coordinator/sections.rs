//! Section-order expansion, education-year sanitization, and the ATS
//! compliance seam.
//!
//! ATS rule content itself is out of scope: `AtsValidator` only
//! specifies the interface the coordinator calls at finalize time.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::state::PipelineState;

/// Deterministic section-plan expansion: `experience`
/// expands into numerically-sorted `experience_role_{i}` plus an optional
/// `earlier_career`; `education_and_certifications` expands into
/// `education` then `certifications`; every other entry passes through
/// unchanged, preserving the blueprint's order.
pub fn expand_section_order(blueprint_order: &[String], state: &PipelineState) -> Vec<String> {
    let mut expanded = Vec::with_capacity(blueprint_order.len());
    for name in blueprint_order {
        match name.as_str() {
            "experience" => {
                let mut role_indices: Vec<u32> = state
                    .sections()
                    .keys()
                    .filter_map(|k| k.strip_prefix("experience_role_"))
                    .filter_map(|n| n.parse::<u32>().ok())
                    .collect();
                role_indices.sort_unstable();
                role_indices.dedup();
                for i in role_indices {
                    expanded.push(format!("experience_role_{}", i));
                }
                if state.section("earlier_career").is_some() {
                    expanded.push("earlier_career".to_string());
                }
            }
            "education_and_certifications" => {
                if state.section("education").is_some() {
                    expanded.push("education".to_string());
                }
                if state.section("certifications").is_some() {
                    expanded.push("certifications".to_string());
                }
            }
            other => expanded.push(other.to_string()),
        }
    }
    expanded
}

/// Strip any 4-digit year from `text` that either matches `age_protection`
/// (the Strategist's audit flagged it for removal) or, when the audit was
/// not clean, is ≥ 20 years before `current_year`.
pub fn sanitize_education_years(
    text: &str,
    age_protection_years: &[i32],
    audit_clean: bool,
    current_year: i32,
) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut result = String::with_capacity(text.len());
    let mut i = 0;
    while i < chars.len() {
        if is_year_start(&chars, i) {
            let year_str: String = chars[i..i + 4].iter().collect();
            let year: i32 = year_str.parse().unwrap_or(0);
            let should_strip =
                age_protection_years.contains(&year) || (!audit_clean && current_year - year >= 20);
            if should_strip {
                i += 4;
                continue;
            }
        }
        result.push(chars[i]);
        i += 1;
    }
    result
}

fn is_year_start(chars: &[char], i: usize) -> bool {
    if i + 4 > chars.len() {
        return false;
    }
    if chars[i..i + 4].iter().any(|c| !c.is_ascii_digit()) {
        return false;
    }
    let before_ok = i == 0 || !chars[i - 1].is_ascii_digit();
    let after_ok = i + 4 >= chars.len() || !chars[i + 4].is_ascii_digit();
    before_ok && after_ok
}

/// Result of running the (out-of-scope) ATS compliance rule set over the
/// assembled resume.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportValidation {
    pub passed: bool,
    pub findings: Vec<String>,
}

/// The interface the core depends on, not the rule content — the
/// ATS-compliance rule set is an external collaborator.
#[async_trait]
pub trait AtsValidator: Send + Sync {
    async fn validate(&self, resume: &Value) -> ExportValidation;
}

/// Always-passes stand-in used where no rule engine is wired in (tests,
/// `fast_draft` deployments that skip ATS checks).
#[derive(Debug, Default)]
pub struct PassthroughAtsValidator;

#[async_trait]
impl AtsValidator for PassthroughAtsValidator {
    async fn validate(&self, _resume: &Value) -> ExportValidation {
        ExportValidation {
            passed: true,
            findings: Vec::new(),
        }
    }
}
