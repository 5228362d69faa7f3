use async_trait::async_trait;
use fundfinder_core::{MatchRecord, NewMatch, Opportunity, OpportunityDraft, Profile, StoreStats};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("opportunity {source_name}/{source_id} is missing a dedup key")]
    MissingDedupKey { source_name: String, source_id: String },
    #[error("opportunity {0} does not exist")]
    UnknownOpportunity(Uuid),
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

/// A match joined with the opportunity it points at.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileMatch {
    #[serde(flatten)]
    pub record: MatchRecord,
    pub opportunity: Opportunity,
}

/// Persistence gateway shared by every crawler and the web layer.
///
/// Opportunities are unique on `(source, source_id)`; matches on
/// `(profile_id, opportunity_id)`. Profiles are read-only here.
#[async_trait]
pub trait OpportunityStore: Send + Sync {
    async fn find_opportunity_by_source_id(
        &self,
        source: &str,
        source_id: &str,
    ) -> Result<Option<Opportunity>, StoreError>;

    /// Insert or refresh by dedup key and return the stable id.
    async fn upsert_opportunity(&self, draft: &OpportunityDraft) -> Result<Uuid, StoreError>;

    async fn find_match(
        &self,
        profile_id: Uuid,
        opportunity_id: Uuid,
    ) -> Result<Option<MatchRecord>, StoreError>;

    /// Returns `None` when the pair already has a match; existing matches are never re-scored.
    async fn insert_match(&self, new_match: &NewMatch) -> Result<Option<MatchRecord>, StoreError>;

    /// All profiles, or only those with the given ids when a filter is passed.
    async fn list_profiles(&self, ids: Option<&[Uuid]>) -> Result<Vec<Profile>, StoreError>;

    async fn matches_for_profile(&self, profile_id: Uuid) -> Result<Vec<ProfileMatch>, StoreError>;

    async fn stats(&self) -> Result<StoreStats, StoreError>;
}

pub(crate) fn ensure_dedup_key(draft: &OpportunityDraft) -> Result<(), StoreError> {
    if draft.has_dedup_key() {
        Ok(())
    } else {
        Err(StoreError::MissingDedupKey {
            source_name: draft.source.clone(),
            source_id: draft.source_id.clone(),
        })
    }
}
