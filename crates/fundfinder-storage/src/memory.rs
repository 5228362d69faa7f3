use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use fundfinder_core::{MatchRecord, NewMatch, Opportunity, OpportunityDraft, Profile, StoreStats};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::store::{ensure_dedup_key, OpportunityStore, ProfileMatch, StoreError};

#[derive(Debug, Default)]
struct MemoryState {
    profiles: Vec<Profile>,
    opportunities: Vec<Opportunity>,
    by_key: HashMap<(String, String), usize>,
    matches: Vec<MatchRecord>,
    fail_writes: bool,
}

/// Process-local store with the same uniqueness rules as [`crate::PgStore`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_profiles(profiles: Vec<Profile>) -> Self {
        Self {
            state: Mutex::new(MemoryState {
                profiles,
                ..Default::default()
            }),
        }
    }

    pub async fn add_profile(&self, profile: Profile) {
        self.state.lock().await.profiles.push(profile);
    }

    /// Make every subsequent write fail with [`StoreError::Unavailable`].
    pub async fn set_fail_writes(&self, fail: bool) {
        self.state.lock().await.fail_writes = fail;
    }

    pub async fn opportunities(&self) -> Vec<Opportunity> {
        self.state.lock().await.opportunities.clone()
    }

    pub async fn matches(&self) -> Vec<MatchRecord> {
        self.state.lock().await.matches.clone()
    }
}

fn unavailable() -> StoreError {
    StoreError::Unavailable("writes disabled".to_string())
}

#[async_trait]
impl OpportunityStore for MemoryStore {
    async fn find_opportunity_by_source_id(
        &self,
        source: &str,
        source_id: &str,
    ) -> Result<Option<Opportunity>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .by_key
            .get(&(source.to_string(), source_id.to_string()))
            .map(|&idx| state.opportunities[idx].clone()))
    }

    async fn upsert_opportunity(&self, draft: &OpportunityDraft) -> Result<Uuid, StoreError> {
        ensure_dedup_key(draft)?;
        let mut state = self.state.lock().await;
        if state.fail_writes {
            return Err(unavailable());
        }
        let now = Utc::now();
        let key = (draft.source.clone(), draft.source_id.clone());
        if let Some(&idx) = state.by_key.get(&key) {
            let opp = &mut state.opportunities[idx];
            opp.apply_draft(draft, now);
            return Ok(opp.id);
        }
        let opp = Opportunity::from_draft(Uuid::new_v4(), draft, now);
        let id = opp.id;
        state.opportunities.push(opp);
        let idx = state.opportunities.len() - 1;
        state.by_key.insert(key, idx);
        Ok(id)
    }

    async fn find_match(
        &self,
        profile_id: Uuid,
        opportunity_id: Uuid,
    ) -> Result<Option<MatchRecord>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .matches
            .iter()
            .find(|m| m.profile_id == profile_id && m.opportunity_id == opportunity_id)
            .cloned())
    }

    async fn insert_match(&self, new_match: &NewMatch) -> Result<Option<MatchRecord>, StoreError> {
        let mut state = self.state.lock().await;
        if state.fail_writes {
            return Err(unavailable());
        }
        if !state.opportunities.iter().any(|o| o.id == new_match.opportunity_id) {
            return Err(StoreError::UnknownOpportunity(new_match.opportunity_id));
        }
        let exists = state.matches.iter().any(|m| {
            m.profile_id == new_match.profile_id && m.opportunity_id == new_match.opportunity_id
        });
        if exists {
            return Ok(None);
        }
        let record = MatchRecord {
            id: Uuid::new_v4(),
            profile_id: new_match.profile_id,
            opportunity_id: new_match.opportunity_id,
            score: new_match.score,
            reasons: new_match.reasons.clone(),
            category: new_match.category.as_str().to_string(),
            created_at: Utc::now(),
        };
        state.matches.push(record.clone());
        Ok(Some(record))
    }

    async fn list_profiles(&self, ids: Option<&[Uuid]>) -> Result<Vec<Profile>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .profiles
            .iter()
            .filter(|p| ids.map_or(true, |ids| ids.contains(&p.id)))
            .cloned()
            .collect())
    }

    async fn matches_for_profile(&self, profile_id: Uuid) -> Result<Vec<ProfileMatch>, StoreError> {
        let state = self.state.lock().await;
        let mut out = state
            .matches
            .iter()
            .filter(|m| m.profile_id == profile_id)
            .filter_map(|m| {
                state
                    .opportunities
                    .iter()
                    .find(|o| o.id == m.opportunity_id)
                    .map(|o| ProfileMatch {
                        record: m.clone(),
                        opportunity: o.clone(),
                    })
            })
            .collect::<Vec<_>>();
        out.sort_by(|a, b| {
            b.record
                .score
                .cmp(&a.record.score)
                .then(b.record.created_at.cmp(&a.record.created_at))
        });
        Ok(out)
    }

    async fn stats(&self) -> Result<StoreStats, StoreError> {
        let state = self.state.lock().await;
        Ok(StoreStats {
            opportunities: state.opportunities.len(),
            matches: state.matches.len(),
        })
    }
}
