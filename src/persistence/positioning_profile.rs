//! Positioning profile store: a per-user row upserted at the end of Phase 1,
//! independent of any one session's master resume.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::RwLock;

use crate::types::{Result, UserId};

/// Mirrors the positioning-profile row: the Strategist's
/// positioning output plus a version counter bumped on every upsert.
#[derive(Debug, Clone)]
pub struct PositioningProfile {
    pub user_id: UserId,
    pub positioning_data: Value,
    pub version: u32,
    pub updated_at: DateTime<Utc>,
}

/// Persists positioning profiles, upserted by `user_id`.
#[async_trait]
pub trait PositioningProfileStore: Send + Sync {
    async fn load(&self, user_id: &UserId) -> Result<Option<PositioningProfile>>;

    /// Upsert the profile for `user_id`, bumping `version` by one relative
    /// to whatever was previously stored (or starting at 1 if none).
    async fn upsert(&self, user_id: &UserId, positioning_data: Value, now: DateTime<Utc>) -> Result<PositioningProfile>;
}

#[derive(Debug, Default)]
pub struct InMemoryPositioningProfileStore {
    rows: RwLock<HashMap<UserId, PositioningProfile>>,
}

impl InMemoryPositioningProfileStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PositioningProfileStore for InMemoryPositioningProfileStore {
    async fn load(&self, user_id: &UserId) -> Result<Option<PositioningProfile>> {
        Ok(self.rows.read().await.get(user_id).cloned())
    }

    async fn upsert(&self, user_id: &UserId, positioning_data: Value, now: DateTime<Utc>) -> Result<PositioningProfile> {
        let mut rows = self.rows.write().await;
        let version = rows.get(user_id).map(|p| p.version + 1).unwrap_or(1);
        let profile = PositioningProfile {
            user_id: user_id.clone(),
            positioning_data,
            version,
            updated_at: now,
        };
        rows.insert(user_id.clone(), profile.clone());
        Ok(profile)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn upsert_creates_at_version_one() {
        let store = InMemoryPositioningProfileStore::new();
        let user = UserId::must("u1");
        let profile = store
            .upsert(&user, serde_json::json!({"angle": "ic_to_lead"}), Utc::now())
            .await
            .unwrap();
        assert_eq!(profile.version, 1);
    }

    #[tokio::test]
    async fn second_upsert_bumps_version_and_replaces_data() {
        let store = InMemoryPositioningProfileStore::new();
        let user = UserId::must("u1");
        store
            .upsert(&user, serde_json::json!({"angle": "ic_to_lead"}), Utc::now())
            .await
            .unwrap();
        let second = store
            .upsert(&user, serde_json::json!({"angle": "pivot_to_pm"}), Utc::now())
            .await
            .unwrap();
        assert_eq!(second.version, 2);
        assert_eq!(second.positioning_data["angle"], "pivot_to_pm");

        let loaded = store.load(&user).await.unwrap().unwrap();
        assert_eq!(loaded.version, 2);
    }

    #[tokio::test]
    async fn load_missing_user_returns_none() {
        let store = InMemoryPositioningProfileStore::new();
        let loaded = store.load(&UserId::must("nobody")).await.unwrap();
        assert!(loaded.is_none());
    }
}
