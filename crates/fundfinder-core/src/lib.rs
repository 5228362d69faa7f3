//! Core domain model for fundfinder: profiles, criteria, opportunities, matches.

use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value as JsonValue};
use uuid::Uuid;

pub mod criteria;
pub mod scoring;

pub use criteria::{normalize, MatchingCriteria, ProfileKind};
pub use scoring::{score, ScoreResult};

pub const CRATE_NAME: &str = "fundfinder-core";

/// Applicant or organization record as stored by the surrounding application.
///
/// The attribute bag is free-form; see [`criteria::normalize`] for the keys
/// the matching engine reads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: Uuid,
    #[serde(default)]
    pub attributes: JsonMap<String, JsonValue>,
}

impl Profile {
    pub fn new(id: Uuid, attributes: JsonMap<String, JsonValue>) -> Self {
        Self { id, attributes }
    }

    /// Build a profile from a JSON object; non-object values yield an empty bag.
    pub fn from_json(id: Uuid, value: JsonValue) -> Self {
        let attributes = match value {
            JsonValue::Object(map) => map,
            _ => JsonMap::new(),
        };
        Self { id, attributes }
    }
}

/// Tag written onto every match record, one per crawler family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpportunityCategory {
    FederalGrant,
    Benefit,
    EnergyIncentive,
    Foundation,
    LocalFunder,
    Scholarship,
    Website,
}

impl OpportunityCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FederalGrant => "federal_grant",
            Self::Benefit => "benefit",
            Self::EnergyIncentive => "energy_incentive",
            Self::Foundation => "foundation",
            Self::LocalFunder => "local_funder",
            Self::Scholarship => "scholarship",
            Self::Website => "website",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "federal_grant" => Some(Self::FederalGrant),
            "benefit" => Some(Self::Benefit),
            "energy_incentive" => Some(Self::EnergyIncentive),
            "foundation" => Some(Self::Foundation),
            "local_funder" => Some(Self::LocalFunder),
            "scholarship" => Some(Self::Scholarship),
            "website" => Some(Self::Website),
            _ => None,
        }
    }
}

impl fmt::Display for OpportunityCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Candidate opportunity handed from a crawler to the scorer and the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpportunityDraft {
    pub source: String,
    pub source_id: String,
    pub title: String,
    pub sponsor: Option<String>,
    pub description: Option<String>,
    pub amount_min: Option<f64>,
    pub amount_max: Option<f64>,
    pub deadline: Option<NaiveDate>,
    pub eligibility: Option<String>,
    #[serde(default)]
    pub focus_areas: Vec<String>,
    pub url: Option<String>,
    pub location: Option<String>,
    pub category: OpportunityCategory,
}

impl OpportunityDraft {
    pub fn new(
        source: impl Into<String>,
        source_id: impl Into<String>,
        title: impl Into<String>,
        category: OpportunityCategory,
    ) -> Self {
        Self {
            source: source.into(),
            source_id: source_id.into(),
            title: title.into(),
            sponsor: None,
            description: None,
            amount_min: None,
            amount_max: None,
            deadline: None,
            eligibility: None,
            focus_areas: Vec::new(),
            url: None,
            location: None,
            category,
        }
    }

    /// A draft is storable only with a non-empty dedup key.
    pub fn has_dedup_key(&self) -> bool {
        !self.source.trim().is_empty() && !self.source_id.trim().is_empty()
    }
}

/// Persisted opportunity. Identity for dedup is `(source, source_id)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Opportunity {
    pub id: Uuid,
    pub source: String,
    pub source_id: String,
    pub title: String,
    pub sponsor: Option<String>,
    pub description: Option<String>,
    pub amount_min: Option<f64>,
    pub amount_max: Option<f64>,
    pub deadline: Option<NaiveDate>,
    pub eligibility: Option<String>,
    pub focus_areas: Vec<String>,
    pub url: Option<String>,
    pub location: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Opportunity {
    pub fn from_draft(id: Uuid, draft: &OpportunityDraft, now: DateTime<Utc>) -> Self {
        Self {
            id,
            source: draft.source.clone(),
            source_id: draft.source_id.clone(),
            title: draft.title.clone(),
            sponsor: draft.sponsor.clone(),
            description: draft.description.clone(),
            amount_min: draft.amount_min,
            amount_max: draft.amount_max,
            deadline: draft.deadline,
            eligibility: draft.eligibility.clone(),
            focus_areas: draft.focus_areas.clone(),
            url: draft.url.clone(),
            location: draft.location.clone(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Overwrite mutable fields from a re-sighting; `created_at` is kept.
    pub fn apply_draft(&mut self, draft: &OpportunityDraft, now: DateTime<Utc>) {
        self.title = draft.title.clone();
        self.sponsor = draft.sponsor.clone();
        self.description = draft.description.clone();
        self.amount_min = draft.amount_min;
        self.amount_max = draft.amount_max;
        self.deadline = draft.deadline;
        self.eligibility = draft.eligibility.clone();
        self.focus_areas = draft.focus_areas.clone();
        self.url = draft.url.clone();
        self.location = draft.location.clone();
        self.updated_at = now;
    }
}

/// Directed (profile, opportunity) relation with its score at creation time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchRecord {
    pub id: Uuid,
    pub profile_id: Uuid,
    pub opportunity_id: Uuid,
    pub score: u8,
    pub reasons: Vec<String>,
    pub category: String,
    pub created_at: DateTime<Utc>,
}

/// Input for creating a match record.
#[derive(Debug, Clone, PartialEq)]
pub struct NewMatch {
    pub profile_id: Uuid,
    pub opportunity_id: Uuid,
    pub score: u8,
    pub reasons: Vec<String>,
    pub category: OpportunityCategory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrawlerStatus {
    Idle,
    Running,
    Completed,
    Error,
}

impl CrawlerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Error => "error",
        }
    }
}

/// In-memory lifecycle record for one registered crawler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrawlerState {
    pub name: String,
    pub description: String,
    pub status: CrawlerStatus,
    pub last_run: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub opportunities_found: usize,
}

impl CrawlerState {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            status: CrawlerStatus::Idle,
            last_run: None,
            last_error: None,
            opportunities_found: 0,
        }
    }
}

/// Aggregate counts exposed to administrators.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStats {
    pub opportunities: usize,
    pub matches: usize,
}
