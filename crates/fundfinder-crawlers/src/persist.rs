//! Dedup-aware save helpers shared by every crawler.

use fundfinder_core::{score, MatchingCriteria, NewMatch, OpportunityDraft, ScoreResult};
use fundfinder_storage::{OpportunityStore, StoreError};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::CrawlerRuntime;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    Inserted(Uuid),
    Updated(Uuid),
}

impl SaveOutcome {
    pub fn id(&self) -> Uuid {
        match self {
            Self::Inserted(id) | Self::Updated(id) => *id,
        }
    }
}

/// Look up by `(source, source_id)`, then update in place or insert.
///
/// Only inserts bump the runtime's found-counter.
pub async fn save_opportunity(
    runtime: &CrawlerRuntime,
    store: &dyn OpportunityStore,
    draft: &OpportunityDraft,
) -> Result<SaveOutcome, StoreError> {
    let existing = store
        .find_opportunity_by_source_id(&draft.source, &draft.source_id)
        .await?;
    let id = store.upsert_opportunity(draft).await?;
    match existing {
        Some(_) => Ok(SaveOutcome::Updated(id)),
        None => {
            runtime.record_new_opportunity().await;
            Ok(SaveOutcome::Inserted(id))
        }
    }
}

/// Write a match for `profile_id` when the opportunity is already stored and
/// the pair has no match yet. Returns whether a record was created.
pub async fn save_match(
    store: &dyn OpportunityStore,
    profile_id: Option<Uuid>,
    draft: &OpportunityDraft,
    result: &ScoreResult,
) -> Result<bool, StoreError> {
    let Some(profile_id) = profile_id else {
        return Ok(false);
    };
    let Some(opportunity) = store
        .find_opportunity_by_source_id(&draft.source, &draft.source_id)
        .await?
    else {
        return Ok(false);
    };
    if store.find_match(profile_id, opportunity.id).await?.is_some() {
        return Ok(false);
    }
    let created = store
        .insert_match(&NewMatch {
            profile_id,
            opportunity_id: opportunity.id,
            score: result.score,
            reasons: result.reasons.clone(),
            category: draft.category,
        })
        .await?;
    Ok(created.is_some())
}

/// Persist an already-scored candidate when it clears `threshold`.
///
/// Store failures are logged and swallowed so one bad record never stops a crawl.
pub async fn persist_scored(
    runtime: &CrawlerRuntime,
    store: &dyn OpportunityStore,
    draft: &OpportunityDraft,
    result: &ScoreResult,
    profile_id: Option<Uuid>,
    threshold: u8,
) -> bool {
    if result.score < threshold {
        debug!(
            source = %draft.source,
            source_id = %draft.source_id,
            score = result.score,
            threshold,
            "candidate below threshold"
        );
        return false;
    }

    if let Err(err) = save_opportunity(runtime, store, draft).await {
        warn!(
            source = %draft.source,
            source_id = %draft.source_id,
            error = %err,
            "failed to save opportunity"
        );
        return false;
    }

    if let Err(err) = save_match(store, profile_id, draft, result).await {
        warn!(
            source = %draft.source,
            source_id = %draft.source_id,
            error = %err,
            "failed to save match"
        );
    }
    true
}

/// Score `draft` against `criteria` and persist it when it clears `threshold`.
///
/// Returns whether the opportunity was written.
pub async fn persist_qualifying(
    runtime: &CrawlerRuntime,
    store: &dyn OpportunityStore,
    draft: &OpportunityDraft,
    criteria: &MatchingCriteria,
    profile_id: Option<Uuid>,
    threshold: u8,
) -> bool {
    let result = score(draft, criteria);
    persist_scored(runtime, store, draft, &result, profile_id, threshold).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use fundfinder_core::OpportunityCategory;
    use fundfinder_storage::MemoryStore;

    fn draft() -> OpportunityDraft {
        let mut d = OpportunityDraft::new("website", "abc", "Community Grant", OpportunityCategory::Website);
        d.location = Some("Available nationwide".into());
        d
    }

    fn scored(score: u8) -> ScoreResult {
        ScoreResult {
            score,
            reasons: vec!["Available nationally".into()],
            matched_criteria: 1,
        }
    }

    #[tokio::test]
    async fn second_sighting_updates_and_does_not_count() {
        let runtime = CrawlerRuntime::new("website", "t");
        let store = MemoryStore::new();
        let first = save_opportunity(&runtime, &store, &draft()).await.unwrap();
        let second = save_opportunity(&runtime, &store, &draft()).await.unwrap();
        assert!(matches!(first, SaveOutcome::Inserted(_)));
        assert_eq!(second, SaveOutcome::Updated(first.id()));
        assert_eq!(runtime.snapshot().await.opportunities_found, 1);
    }

    #[tokio::test]
    async fn below_threshold_is_never_stored() {
        let runtime = CrawlerRuntime::new("website", "t");
        let store = MemoryStore::new();
        let saved = persist_scored(&runtime, &store, &draft(), &scored(19), Some(Uuid::new_v4()), 20).await;
        assert!(!saved);
        assert!(store.opportunities().await.is_empty());
        assert!(store.matches().await.is_empty());
    }

    #[tokio::test]
    async fn match_needs_profile_id() {
        let runtime = CrawlerRuntime::new("website", "t");
        let store = MemoryStore::new();
        assert!(persist_scored(&runtime, &store, &draft(), &scored(80), None, 20).await);
        assert_eq!(store.opportunities().await.len(), 1);
        assert!(store.matches().await.is_empty());
    }

    #[tokio::test]
    async fn rediscovery_keeps_one_match_per_pair() {
        let runtime = CrawlerRuntime::new("website", "t");
        let store = MemoryStore::new();
        let profile_id = Some(Uuid::new_v4());
        for _ in 0..3 {
            persist_scored(&runtime, &store, &draft(), &scored(80), profile_id, 20).await;
        }
        assert_eq!(store.opportunities().await.len(), 1);
        let matches = store.matches().await;
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].category, "website");
    }

    #[tokio::test]
    async fn qualifying_reports_only_real_writes() {
        let runtime = CrawlerRuntime::new("website", "t");
        let store = MemoryStore::new();
        let criteria = MatchingCriteria::default();
        assert!(persist_qualifying(&runtime, &store, &draft(), &criteria, None, 20).await);

        store.set_fail_writes(true).await;
        let mut other = draft();
        other.source_id = "def".into();
        assert!(!persist_qualifying(&runtime, &store, &other, &criteria, None, 20).await);
        assert_eq!(store.opportunities().await.len(), 1);
    }

    #[tokio::test]
    async fn store_failure_is_swallowed() {
        let runtime = CrawlerRuntime::new("website", "t");
        let store = MemoryStore::new();
        store.set_fail_writes(true).await;
        assert!(!persist_scored(&runtime, &store, &draft(), &scored(80), None, 20).await);
        assert_eq!(runtime.snapshot().await.opportunities_found, 0);
    }
}
