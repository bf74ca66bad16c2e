//! Master resume store and merge/save orchestration.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::RwLock;

use crate::evidence::EvidenceItem;
use crate::persistence::session_store::SessionStore;
use crate::types::{Result, SessionId, UserId};

/// Mirrors the master-resume row. `experience`/`skills`/`education`/
/// `certifications`/`contact_info` stay opaque `Value`s here — the core
/// doesn't interpret their shape, only merges and caps evidence.
#[derive(Debug, Clone)]
pub struct MasterResume {
    pub id: String,
    pub user_id: UserId,
    pub is_default: bool,
    pub version: u32,
    pub summary: String,
    pub experience: Value,
    pub skills: Value,
    pub education: Value,
    pub certifications: Value,
    pub contact_info: Value,
    pub evidence_items: Vec<EvidenceItem>,
    pub raw_text: String,
    pub source_session_id: SessionId,
    pub updated_at: DateTime<Utc>,
}

/// Max evidence items retained on a master resume after merge — reuses the
/// same injection cap the Strategist's prompt projection uses.
pub const MAX_MASTER_RESUME_EVIDENCE_ITEMS: usize = 200;

/// Persists master resumes. The in-memory implementation stands in for the
/// relational store and for the atomic create-or-update procedure the
/// conditional update below describes.
#[async_trait]
pub trait MasterResumeStore: Send + Sync {
    async fn load(&self, id: &str) -> Result<Option<MasterResume>>;

    /// Conditional update (`UPDATE ... WHERE id = ? AND user_id = ?`).
    /// Returns `true` if a row was updated, `false` if zero rows matched,
    /// in which case the caller falls through to creation.
    async fn update(&self, resume: &MasterResume) -> Result<bool>;

    /// Atomically create a new row, returning its assigned id.
    async fn create(&self, resume: MasterResume) -> Result<String>;
}

#[derive(Debug, Default)]
pub struct InMemoryMasterResumeStore {
    rows: RwLock<HashMap<String, MasterResume>>,
    next_id: std::sync::atomic::AtomicU64,
}

impl InMemoryMasterResumeStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MasterResumeStore for InMemoryMasterResumeStore {
    async fn load(&self, id: &str) -> Result<Option<MasterResume>> {
        Ok(self.rows.read().await.get(id).cloned())
    }

    async fn update(&self, resume: &MasterResume) -> Result<bool> {
        let mut rows = self.rows.write().await;
        match rows.get(&resume.id) {
            Some(existing) if existing.user_id == resume.user_id => {
                rows.insert(resume.id.clone(), resume.clone());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn create(&self, mut resume: MasterResume) -> Result<String> {
        use std::sync::atomic::Ordering;
        let id = format!("mr-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        resume.id = id.clone();
        self.rows.write().await.insert(id.clone(), resume);
        Ok(id)
    }
}

/// Merge `new_evidence` into `existing` (if any), deduping by exact text
/// match and capping at `MAX_MASTER_RESUME_EVIDENCE_ITEMS`.
pub fn merge_master_resume(
    existing: Option<&MasterResume>,
    new_evidence: Vec<EvidenceItem>,
    user_id: &UserId,
    raw_text: String,
    source_session_id: SessionId,
    now: DateTime<Utc>,
) -> MasterResume {
    let mut merged_evidence: Vec<EvidenceItem> = existing
        .map(|m| m.evidence_items.clone())
        .unwrap_or_default();

    for item in new_evidence {
        if !merged_evidence.iter().any(|e| e.text == item.text) {
            merged_evidence.push(item);
        }
    }
    if merged_evidence.len() > MAX_MASTER_RESUME_EVIDENCE_ITEMS {
        let overflow = merged_evidence.len() - MAX_MASTER_RESUME_EVIDENCE_ITEMS;
        merged_evidence.drain(0..overflow);
    }

    match existing {
        Some(existing) => MasterResume {
            id: existing.id.clone(),
            user_id: user_id.clone(),
            is_default: existing.is_default,
            version: existing.version + 1,
            summary: existing.summary.clone(),
            experience: existing.experience.clone(),
            skills: existing.skills.clone(),
            education: existing.education.clone(),
            certifications: existing.certifications.clone(),
            contact_info: existing.contact_info.clone(),
            evidence_items: merged_evidence,
            raw_text,
            source_session_id,
            updated_at: now,
        },
        None => MasterResume {
            id: String::new(),
            user_id: user_id.clone(),
            is_default: true,
            version: 1,
            summary: String::new(),
            experience: Value::Array(vec![]),
            skills: Value::Object(Default::default()),
            education: Value::Array(vec![]),
            certifications: Value::Array(vec![]),
            contact_info: Value::Object(Default::default()),
            evidence_items: merged_evidence,
            raw_text,
            source_session_id,
            updated_at: now,
        },
    }
}

/// Orchestrates the full save flow. Best-effort: callers are expected to
/// log and swallow any returned error rather than fail the pipeline run.
pub async fn save_master_resume(
    master_store: &dyn MasterResumeStore,
    session_store: &dyn SessionStore,
    session_id: &SessionId,
    user_id: &UserId,
    linked_master_resume_id: Option<&str>,
    new_evidence: Vec<EvidenceItem>,
    raw_text: String,
    now: DateTime<Utc>,
) -> Result<()> {
    let existing = match linked_master_resume_id {
        Some(id) => match master_store.load(id).await {
            Ok(found) => found,
            Err(e) if e.is_not_found() => None,
            Err(e) => {
                // Step 1: any other load error skips the save entirely.
                tracing::warn!(error = %e, "master_resume_load_failed_skip_save");
                return Ok(());
            }
        },
        None => None,
    };

    let merged = merge_master_resume(
        existing.as_ref(),
        new_evidence,
        user_id,
        raw_text,
        session_id.clone(),
        now,
    );

    if let Some(existing) = existing {
        let updated = master_store.update(&merged).await?;
        if updated {
            return Ok(());
        }
        // Zero rows updated (deleted between load and update): fall through
        // to creation, re-linking below.
        let _ = existing;
    }

    let new_id = master_store.create(merged).await?;
    session_store.link_master_resume(session_id, &new_id).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(text: &str) -> EvidenceItem {
        EvidenceItem::new(
            text,
            crate::evidence::EvidenceSource::Crafted,
            "summary",
            SessionId::new().to_string(),
            Utc::now(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn create_when_no_existing_link() {
        let master_store = InMemoryMasterResumeStore::new();
        let session_store = crate::persistence::InMemorySessionStore::new();
        let session = SessionId::new();
        let user = UserId::must("u1");

        save_master_resume(
            &master_store,
            &session_store,
            &session,
            &user,
            None,
            vec![item("Led a cross-functional team of 8 engineers to ship the v2 platform.")],
            "raw resume text".to_string(),
            Utc::now(),
        )
        .await
        .unwrap();

        let loaded = session_store.load_checkpoint(&session).await.unwrap().unwrap();
        assert!(loaded.master_resume_id.is_some());
    }

    #[tokio::test]
    async fn update_when_linked_and_present() {
        let master_store = InMemoryMasterResumeStore::new();
        let session_store = crate::persistence::InMemorySessionStore::new();
        let user = UserId::must("u1");

        let created_id = master_store
            .create(MasterResume {
                id: String::new(),
                user_id: user.clone(),
                is_default: true,
                version: 1,
                summary: "Existing".to_string(),
                experience: Value::Array(vec![]),
                skills: Value::Object(Default::default()),
                education: Value::Array(vec![]),
                certifications: Value::Array(vec![]),
                contact_info: Value::Object(Default::default()),
                evidence_items: vec![item("Shipped a major release under budget and ahead of schedule.")],
                raw_text: "old text".to_string(),
                source_session_id: SessionId::new(),
                updated_at: Utc::now(),
            })
            .await
            .unwrap();

        let session = SessionId::new();
        save_master_resume(
            &master_store,
            &session_store,
            &session,
            &user,
            Some(&created_id),
            vec![item("Mentored three junior engineers to promotion within a year.")],
            "new text".to_string(),
            Utc::now(),
        )
        .await
        .unwrap();

        let merged = master_store.load(&created_id).await.unwrap().unwrap();
        assert_eq!(merged.evidence_items.len(), 2);
        assert_eq!(merged.version, 2);
    }

    #[tokio::test]
    async fn falls_through_to_create_when_row_missing() {
        let master_store = InMemoryMasterResumeStore::new();
        let session_store = crate::persistence::InMemorySessionStore::new();
        let user = UserId::must("u1");
        let session = SessionId::new();

        save_master_resume(
            &master_store,
            &session_store,
            &session,
            &user,
            Some("nonexistent-id"),
            vec![item("Owned a migration that cut infra cost by 30 percent annually.")],
            "raw text".to_string(),
            Utc::now(),
        )
        .await
        .unwrap();

        let loaded = session_store.load_checkpoint(&session).await.unwrap().unwrap();
        let new_id = loaded.master_resume_id.unwrap();
        let created = master_store.load(&new_id).await.unwrap().unwrap();
        assert_eq!(created.evidence_items.len(), 1);
    }

    #[test]
    fn merge_dedupes_exact_text_matches() {
        let existing = MasterResume {
            id: "mr-1".to_string(),
            user_id: UserId::must("u1"),
            is_default: true,
            version: 1,
            summary: String::new(),
            experience: Value::Array(vec![]),
            skills: Value::Object(Default::default()),
            education: Value::Array(vec![]),
            certifications: Value::Array(vec![]),
            contact_info: Value::Object(Default::default()),
            evidence_items: vec![item("Duplicate evidence text that should not repeat in the merge.")],
            raw_text: String::new(),
            source_session_id: SessionId::new(),
            updated_at: Utc::now(),
        };

        let merged = merge_master_resume(
            Some(&existing),
            vec![item("Duplicate evidence text that should not repeat in the merge.")],
            &UserId::must("u1"),
            "text".to_string(),
            SessionId::new(),
            Utc::now(),
        );
        assert_eq!(merged.evidence_items.len(), 1);
    }
}
