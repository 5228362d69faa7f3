//! Source crawler contracts + the funding-source crawlers.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use fundfinder_core::{CrawlerState, CrawlerStatus, Profile};
use fundfinder_storage::{FetchError, HttpFetcher, OpportunityStore, StoreError};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{error, info, info_span, Instrument};
use uuid::Uuid;

pub mod benefits;
pub mod energy;
pub mod extract;
pub mod federal_grants;
pub mod local_funders;
pub mod nonprofits;
pub mod scholarships;
pub mod website;

mod parse;
mod persist;

pub use extract::{LlmConfig, LlmExtractor, NoopExtractor, OpportunityExtractor};
pub use parse::{parse_amount_range, parse_deadline, stable_source_id};
pub use persist::{persist_qualifying, persist_scored, save_match, save_opportunity, SaveOutcome};

pub const CRATE_NAME: &str = "fundfinder-crawlers";

#[derive(Debug, Error)]
pub enum CrawlerError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("parse error: {0}")]
    Parse(String),
    #[error("{0}")]
    Message(String),
}

/// Per-source overrides read from the source registry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSettings {
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub listing_urls: Vec<String>,
}

impl SourceSettings {
    pub fn base_url_or(&self, default: &str) -> String {
        self.base_url
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(default)
            .trim_end_matches('/')
            .to_string()
    }
}

/// Collaborators every crawler is built with.
#[derive(Clone)]
pub struct CrawlerDeps {
    pub http: Arc<HttpFetcher>,
    pub store: Arc<dyn OpportunityStore>,
    /// Fixed politeness sleep after each outbound request group.
    pub request_delay: Duration,
}

impl CrawlerDeps {
    pub fn new(http: Arc<HttpFetcher>, store: Arc<dyn OpportunityStore>, request_delay: Duration) -> Self {
        Self {
            http,
            store,
            request_delay,
        }
    }

    pub async fn pause(&self) {
        if !self.request_delay.is_zero() {
            tokio::time::sleep(self.request_delay).await;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunOutcome {
    pub success: bool,
    pub opportunities_found: usize,
    pub profiles: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RunOutcome {
    pub fn succeeded(opportunities_found: usize, profiles: usize) -> Self {
        Self {
            success: true,
            opportunities_found,
            profiles,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            opportunities_found: 0,
            profiles: 0,
            error: Some(error.into()),
        }
    }
}

/// Lifecycle bookkeeping embedded in every crawler.
///
/// `idle -> running -> completed | error`; both terminal states accept a new run.
#[derive(Debug)]
pub struct CrawlerRuntime {
    name: &'static str,
    description: &'static str,
    state: Mutex<CrawlerState>,
}

impl CrawlerRuntime {
    pub fn new(name: &'static str, description: &'static str) -> Self {
        Self {
            name,
            description,
            state: Mutex::new(CrawlerState::new(name, description)),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn description(&self) -> &'static str {
        self.description
    }

    pub async fn snapshot(&self) -> CrawlerState {
        self.state.lock().await.clone()
    }

    pub async fn begin(&self) {
        let mut state = self.state.lock().await;
        state.status = CrawlerStatus::Running;
        state.last_run = Some(Utc::now());
        state.last_error = None;
        state.opportunities_found = 0;
    }

    pub async fn record_new_opportunity(&self) {
        self.state.lock().await.opportunities_found += 1;
    }

    /// Marks the run completed and returns the found-counter.
    pub async fn complete(&self) -> usize {
        let mut state = self.state.lock().await;
        state.status = CrawlerStatus::Completed;
        state.opportunities_found
    }

    pub async fn fail(&self, message: impl Into<String>) {
        let mut state = self.state.lock().await;
        state.status = CrawlerStatus::Error;
        state.last_error = Some(message.into());
    }
}

#[async_trait]
pub trait Crawler: Send + Sync {
    fn runtime(&self) -> &CrawlerRuntime;

    fn deps(&self) -> &CrawlerDeps;

    /// Source-specific discovery over an already-loaded profile set.
    async fn crawl(&self, profiles: &[Profile]) -> Result<(), CrawlerError>;

    fn name(&self) -> &'static str {
        self.runtime().name()
    }

    fn description(&self) -> &'static str {
        self.runtime().description()
    }

    async fn status(&self) -> CrawlerState {
        self.runtime().snapshot().await
    }

    /// Load profiles (all when `profile_ids` is empty), crawl them, and track state.
    async fn run(&self, profile_ids: &[Uuid]) -> RunOutcome {
        let span = info_span!("crawler_run", crawler = self.name());
        async {
            self.runtime().begin().await;

            let filter = (!profile_ids.is_empty()).then_some(profile_ids);
            let result = async {
                let profiles = self.deps().store.list_profiles(filter).await?;
                self.crawl(&profiles).await?;
                Ok::<usize, CrawlerError>(profiles.len())
            }
            .await;

            match result {
                Ok(profiles) => {
                    let found = self.runtime().complete().await;
                    info!(profiles, opportunities_found = found, "crawler run completed");
                    RunOutcome::succeeded(found, profiles)
                }
                Err(err) => {
                    let message = err.to_string();
                    error!(error = %message, "crawler run failed");
                    self.runtime().fail(message.clone()).await;
                    RunOutcome::failed(message)
                }
            }
        }
        .instrument(span)
        .await
    }
}

/// Build every registered crawler. `settings` supplies per-name overrides.
pub fn all_crawlers(
    deps: &CrawlerDeps,
    settings: impl Fn(&str) -> SourceSettings,
    extractor: Arc<dyn OpportunityExtractor>,
) -> (Vec<Arc<dyn Crawler>>, Arc<website::WebsiteCrawler>) {
    let website = Arc::new(website::WebsiteCrawler::new(
        deps.clone(),
        &settings(website::NAME),
        extractor,
    ));
    let crawlers: Vec<Arc<dyn Crawler>> = vec![
        Arc::new(federal_grants::FederalGrantsCrawler::new(
            deps.clone(),
            &settings(federal_grants::NAME),
        )),
        Arc::new(benefits::BenefitsCrawler::new(deps.clone())),
        Arc::new(energy::EnergyIncentivesCrawler::new(
            deps.clone(),
            &settings(energy::NAME),
        )),
        Arc::new(nonprofits::NonprofitFilingsCrawler::new(
            deps.clone(),
            &settings(nonprofits::NAME),
        )),
        Arc::new(local_funders::LocalFundersCrawler::new(deps.clone())),
        Arc::new(scholarships::ScholarshipsCrawler::new(
            deps.clone(),
            &settings(scholarships::NAME),
        )),
        website.clone(),
    ];
    (crawlers, website)
}

/// Names in registration order.
pub const CRAWLER_NAMES: &[&str] = &[
    federal_grants::NAME,
    benefits::NAME,
    energy::NAME,
    nonprofits::NAME,
    local_funders::NAME,
    scholarships::NAME,
    website::NAME,
];

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Arc;
    use std::time::Duration;

    use fundfinder_core::Profile;
    use fundfinder_storage::{HttpClientConfig, HttpFetcher, MemoryStore, StaticTransport};
    use serde_json::Value as JsonValue;
    use uuid::Uuid;

    use super::CrawlerDeps;

    pub fn deps(transport: StaticTransport, store: Arc<MemoryStore>) -> CrawlerDeps {
        let http = HttpFetcher::with_transport(
            Arc::new(transport),
            HttpClientConfig {
                retries: 1,
                retry_delay: Duration::from_millis(1),
                ..Default::default()
            },
        );
        CrawlerDeps::new(Arc::new(http), store, Duration::ZERO)
    }

    pub fn profile(attributes: JsonValue) -> Profile {
        Profile::from_json(Uuid::new_v4(), attributes)
    }
}
