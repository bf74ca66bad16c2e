//! Bounded master-resume projection for the Strategist's initial message:
//! a size-bounded projection of the optional master resume, capped at
//! `MAX_BULLETS_PER_ROLE = 15` bullets per role and
//! `MAX_EVIDENCE_ITEMS_INJECTED = 50` evidence items across all sources.

use serde_json::Value;

use crate::persistence::MasterResume;

/// Cap `experience` entries' bullet arrays at `max_bullets_per_role` and
/// the flattened evidence-item count at `max_evidence_items_injected`,
/// returning a JSON value safe to interpolate into a prompt without
/// blowing past the Strategist's context budget.
pub fn project_master_resume(
    master_resume: &MasterResume,
    max_bullets_per_role: usize,
    max_evidence_items_injected: usize,
) -> Value {
    let experience = cap_role_bullets(&master_resume.experience, max_bullets_per_role);

    let evidence: Vec<Value> = master_resume
        .evidence_items
        .iter()
        .take(max_evidence_items_injected)
        .map(|item| {
            serde_json::json!({
                "text": item.text,
                "source": item.source,
                "category": item.category,
            })
        })
        .collect();

    serde_json::json!({
        "summary": master_resume.summary,
        "experience": experience,
        "skills": master_resume.skills,
        "education": master_resume.education,
        "certifications": master_resume.certifications,
        "contact_info": master_resume.contact_info,
        "evidence_items": evidence,
    })
}

fn cap_role_bullets(experience: &Value, max_bullets_per_role: usize) -> Value {
    let Some(roles) = experience.as_array() else {
        return experience.clone();
    };

    let capped: Vec<Value> = roles
        .iter()
        .map(|role| {
            let Some(bullets) = role.get("bullets").and_then(|b| b.as_array()) else {
                return role.clone();
            };
            if bullets.len() <= max_bullets_per_role {
                return role.clone();
            }
            let mut role = role.clone();
            if let Some(obj) = role.as_object_mut() {
                obj.insert(
                    "bullets".to_string(),
                    Value::Array(bullets.iter().take(max_bullets_per_role).cloned().collect()),
                );
            }
            role
        })
        .collect();

    Value::Array(capped)
}

/// Render the projected master resume plus the run's raw inputs into the
/// Strategist's initial user message.
pub fn build_strategist_message(
    raw_resume_text: &str,
    job_description: &str,
    company_name: &str,
    preferences: &Value,
    projected_master_resume: Option<&Value>,
) -> String {
    let mut parts = vec![
        format!("Candidate's raw resume:\n{}", raw_resume_text),
        format!("Target job description at {}:\n{}", company_name, job_description),
        format!("User preferences:\n{}", preferences),
    ];
    if let Some(master) = projected_master_resume {
        parts.push(format!("Known prior evidence and history:\n{}", master));
    }
    parts.join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evidence::{EvidenceItem, EvidenceSource};
    use crate::types::{SessionId, UserId};
    use chrono::Utc;

    fn sample_master_resume(bullet_count: usize, evidence_count: usize) -> MasterResume {
        let bullets: Vec<Value> = (0..bullet_count).map(|i| Value::String(format!("bullet {}", i))).collect();
        let experience = serde_json::json!([{ "title": "Engineer", "bullets": bullets }]);
        let evidence_items: Vec<EvidenceItem> = (0..evidence_count)
            .filter_map(|i| {
                EvidenceItem::new(
                    &format!("Evidence item number {} with enough characters.", i),
                    EvidenceSource::Resume,
                    "summary",
                    "s1",
                    Utc::now(),
                )
            })
            .collect();
        MasterResume {
            id: "mr-1".to_string(),
            user_id: UserId::must("u1"),
            is_default: true,
            version: 1,
            summary: "Summary".to_string(),
            experience,
            skills: Value::Object(Default::default()),
            education: Value::Array(vec![]),
            certifications: Value::Array(vec![]),
            contact_info: Value::Object(Default::default()),
            evidence_items,
            raw_text: String::new(),
            source_session_id: SessionId::new(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn caps_bullets_per_role() {
        let resume = sample_master_resume(30, 0);
        let projected = project_master_resume(&resume, 15, 50);
        let bullets = projected["experience"][0]["bullets"].as_array().unwrap();
        assert_eq!(bullets.len(), 15);
    }

    #[test]
    fn leaves_roles_under_the_cap_untouched() {
        let resume = sample_master_resume(5, 0);
        let projected = project_master_resume(&resume, 15, 50);
        let bullets = projected["experience"][0]["bullets"].as_array().unwrap();
        assert_eq!(bullets.len(), 5);
    }

    #[test]
    fn caps_evidence_items_across_all_sources() {
        let resume = sample_master_resume(0, 80);
        let projected = project_master_resume(&resume, 15, 50);
        let evidence = projected["evidence_items"].as_array().unwrap();
        assert_eq!(evidence.len(), 50);
    }

    #[test]
    fn message_includes_all_sections_when_master_resume_present() {
        let projected = serde_json::json!({"summary": "prior summary"});
        let message = build_strategist_message(
            "raw resume",
            "job description",
            "Acme Corp",
            &serde_json::json!({"workflow_mode": "balanced"}),
            Some(&projected),
        );
        assert!(message.contains("raw resume"));
        assert!(message.contains("Acme Corp"));
        assert!(message.contains("prior summary"));
    }

    #[test]
    fn message_omits_master_resume_section_when_absent() {
        let message = build_strategist_message(
            "raw resume",
            "job description",
            "Acme Corp",
            &serde_json::json!({}),
            None,
        );
        assert!(!message.contains("Known prior evidence"));
    }
}
