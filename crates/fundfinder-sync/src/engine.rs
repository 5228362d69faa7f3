use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use anyhow::{Context, Result};
use fundfinder_core::{normalize, CrawlerState, MatchingCriteria};
use fundfinder_crawlers::website::{CrawlUrlOutcome, WebsiteCrawler};
use fundfinder_crawlers::{
    all_crawlers, CrawlerDeps, LlmExtractor, NoopExtractor, OpportunityExtractor, RunOutcome,
};
use fundfinder_storage::{HttpFetcher, OpportunityStore, ProfileMatch};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{CrawlManager, EngineConfig, SourceRegistry, SyncError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CrawlerInfo {
    pub name: &'static str,
    pub description: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EngineStats {
    pub opportunities: usize,
    pub matches: usize,
    pub crawlers: usize,
}

/// Entry point for callers: owns the manager, the store and the ad hoc URL crawler.
pub struct Engine {
    manager: CrawlManager,
    store: Arc<dyn OpportunityStore>,
    website: Arc<WebsiteCrawler>,
    display_names: HashMap<String, String>,
}

impl Engine {
    /// Build every crawler, registering those the registry leaves enabled.
    pub fn new(
        deps: CrawlerDeps,
        registry: &SourceRegistry,
        extractor: Arc<dyn OpportunityExtractor>,
    ) -> Self {
        let store = deps.store.clone();
        let (crawlers, website) = all_crawlers(&deps, |name| registry.settings(name), extractor);
        let mut manager = CrawlManager::new();
        for crawler in crawlers {
            if registry.is_enabled(crawler.name()) {
                manager.register(crawler);
            } else {
                info!(crawler = crawler.name(), "source disabled in registry");
            }
        }
        let display_names = registry
            .sources
            .iter()
            .filter_map(|s| Some((s.name.clone(), s.display_name.clone()?)))
            .collect();
        Self {
            manager,
            store,
            website,
            display_names,
        }
    }

    pub async fn from_config(config: &EngineConfig, store: Arc<dyn OpportunityStore>) -> Result<Self> {
        let http = HttpFetcher::new(config.http_client_config()).context("building http client")?;
        let extractor: Arc<dyn OpportunityExtractor> = match &config.ai {
            Some(ai) => Arc::new(LlmExtractor::new(ai.clone()).context("building ai extractor")?),
            None => Arc::new(NoopExtractor),
        };
        let registry = SourceRegistry::load(&config.sources_path).await?;
        let deps = CrawlerDeps::new(Arc::new(http), store, config.request_delay);
        Ok(Self::new(deps, &registry, extractor))
    }

    pub fn manager(&self) -> &CrawlManager {
        &self.manager
    }

    pub async fn statuses(&self) -> Vec<CrawlerState> {
        self.manager.get_status().await
    }

    pub fn crawler_names(&self) -> Vec<CrawlerInfo> {
        self.manager
            .get_all()
            .iter()
            .map(|c| CrawlerInfo {
                name: c.name(),
                description: c.description(),
                display_name: self.display_names.get(c.name()).cloned(),
            })
            .collect()
    }

    pub fn has_crawler(&self, name: &str) -> bool {
        self.manager.get(name).is_some()
    }

    pub async fn run_all(&self, profile_ids: &[Uuid]) -> BTreeMap<String, RunOutcome> {
        self.manager.run_all(profile_ids).await
    }

    pub async fn run_crawler(&self, name: &str, profile_ids: &[Uuid]) -> Result<RunOutcome, SyncError> {
        self.manager.run_crawler(name, profile_ids).await
    }

    pub async fn run_for_profile(&self, profile_id: Uuid) -> BTreeMap<String, RunOutcome> {
        self.run_all(&[profile_id]).await
    }

    /// An unknown profile id is crawled with empty criteria and no match records.
    pub async fn crawl_url(&self, url: &str, profile_id: Option<Uuid>) -> Result<CrawlUrlOutcome, SyncError> {
        let profile = match profile_id {
            Some(id) => self.store.list_profiles(Some(std::slice::from_ref(&id))).await?.into_iter().next(),
            None => None,
        };
        if let (Some(id), None) = (profile_id, &profile) {
            warn!(profile_id = %id, "unknown profile for ad hoc crawl");
        }
        let criteria = profile.as_ref().map(normalize).unwrap_or_else(MatchingCriteria::default);
        let outcome = self
            .website
            .crawl_url(url, &criteria, profile.map(|p| p.id))
            .await?;
        Ok(outcome)
    }

    pub async fn matches_for_profile(&self, profile_id: Uuid) -> Result<Vec<ProfileMatch>, SyncError> {
        Ok(self.store.matches_for_profile(profile_id).await?)
    }

    pub async fn stats(&self) -> Result<EngineStats, SyncError> {
        let counts = self.store.stats().await?;
        Ok(EngineStats {
            opportunities: counts.opportunities,
            matches: counts.matches,
            crawlers: self.manager.get_all().len(),
        })
    }

    pub fn spawn_run_all(self: &Arc<Self>, profile_ids: Vec<Uuid>) -> JoinHandle<()> {
        let engine = self.clone();
        tokio::spawn(async move {
            engine.run_all(&profile_ids).await;
        })
    }

    /// Fails synchronously for unknown names so callers can report not-found.
    pub fn spawn_run_crawler(self: &Arc<Self>, name: &str, profile_ids: Vec<Uuid>) -> Result<JoinHandle<()>, SyncError> {
        let crawler = self
            .manager
            .get(name)
            .ok_or_else(|| SyncError::CrawlerNotFound(name.to_string()))?;
        Ok(tokio::spawn(async move {
            crawler.run(&profile_ids).await;
        }))
    }

    pub fn spawn_run_for_profile(self: &Arc<Self>, profile_id: Uuid) -> JoinHandle<()> {
        self.spawn_run_all(vec![profile_id])
    }

    pub fn spawn_crawl_url(self: &Arc<Self>, url: String, profile_id: Option<Uuid>) -> JoinHandle<()> {
        let engine = self.clone();
        tokio::spawn(async move {
            if let Err(err) = engine.crawl_url(&url, profile_id).await {
                error!(url = %url, error = %err, "ad hoc url crawl failed");
            }
        })
    }
}

/// Cron-driven `run_all` over every profile, when enabled.
pub async fn maybe_build_scheduler(engine: Arc<Engine>, config: &EngineConfig) -> Result<Option<JobScheduler>> {
    if !config.scheduler_enabled {
        return Ok(None);
    }

    let sched = JobScheduler::new().await.context("creating scheduler")?;
    let cron = config.crawl_cron.as_str();
    let job = Job::new_async(cron, move |_uuid, _l| {
        let engine = engine.clone();
        Box::pin(async move {
            info!("scheduled crawl starting");
            let results = engine.run_all(&[]).await;
            let failed: Vec<_> = results.iter().filter(|(_, r)| !r.success).map(|(n, _)| n.as_str()).collect();
            if !failed.is_empty() {
                warn!(?failed, "scheduled crawl had failing crawlers");
            }
        })
    })
    .with_context(|| format!("creating scheduler job for cron {cron}"))?;
    sched.add(job).await.context("adding scheduler job")?;
    Ok(Some(sched))
}

#[cfg(test)]
mod tests {
    use super::*;
    use fundfinder_core::{CrawlerStatus, Profile};
    use fundfinder_storage::{HttpClientConfig, MemoryStore, StaticTransport};
    use serde_json::json;
    use std::time::Duration;

    const GRANTS_PAGE: &str = r#"<html><body>
        <div class="grant"><h3><a href="/g/youth">Youth Mentoring Grant</a></h3>
          <p>Up to $10,000. Eligibility: nonprofit organizations.</p></div></body></html>"#;

    fn engine_with(store: Arc<MemoryStore>, transport: StaticTransport, registry: &SourceRegistry) -> Arc<Engine> {
        let http = HttpFetcher::with_transport(
            Arc::new(transport),
            HttpClientConfig {
                retries: 1,
                retry_delay: Duration::from_millis(1),
                ..Default::default()
            },
        );
        let deps = CrawlerDeps::new(Arc::new(http), store, Duration::ZERO);
        Arc::new(Engine::new(deps, registry, Arc::new(NoopExtractor)))
    }

    fn profile(value: serde_json::Value) -> Profile {
        Profile::from_json(Uuid::new_v4(), value)
    }

    #[tokio::test]
    async fn run_all_reports_every_crawler() {
        let person = profile(json!({"profile_type": "individual", "state": "OH", "low_income": true}));
        let store = Arc::new(MemoryStore::with_profiles(vec![person.clone()]));
        let engine = engine_with(store, StaticTransport::new(), &SourceRegistry::default());

        let results = engine.run_for_profile(person.id).await;
        assert_eq!(results.len(), fundfinder_crawlers::CRAWLER_NAMES.len());
        assert!(results.values().all(|r| r.success));
        assert!(results["benefits-registry"].opportunities_found > 0);

        let stats = engine.stats().await.unwrap();
        assert_eq!(stats.crawlers, 7);
        assert!(stats.opportunities > 0);
        assert!(!engine.matches_for_profile(person.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn disabled_sources_are_not_registered() {
        let registry = SourceRegistry::parse("sources:\n  - name: website\n    enabled: false\n").unwrap();
        let engine = engine_with(Arc::new(MemoryStore::new()), StaticTransport::new(), &registry);
        assert!(!engine.has_crawler("website"));
        assert_eq!(engine.crawler_names().len(), 6);
        let err = engine.run_crawler("website", &[]).await.unwrap_err();
        assert!(matches!(err, SyncError::CrawlerNotFound(_)));
        assert!(engine.spawn_run_crawler("website", vec![]).is_err());
    }

    #[test]
    fn crawler_listing_carries_registry_display_names() {
        let registry = SourceRegistry::parse(
            "sources:\n  - name: benefits-registry\n    display_name: Federal assistance programs\n",
        )
        .unwrap();
        let engine = engine_with(Arc::new(MemoryStore::new()), StaticTransport::new(), &registry);
        let listing = engine.crawler_names();
        let benefits = listing.iter().find(|c| c.name == "benefits-registry").unwrap();
        assert_eq!(benefits.display_name.as_deref(), Some("Federal assistance programs"));
        let website = listing.iter().find(|c| c.name == "website").unwrap();
        assert_eq!(website.display_name, None);
        let value = serde_json::to_value(benefits).unwrap();
        assert_eq!(value["displayName"], "Federal assistance programs");
    }

    #[tokio::test]
    async fn crawl_url_uses_the_profile_criteria() {
        let org = profile(json!({"profile_type": "organization", "keywords": "youth"}));
        let store = Arc::new(MemoryStore::with_profiles(vec![org.clone()]));
        let transport = StaticTransport::new().route("https://funder.test/", GRANTS_PAGE);
        let engine = engine_with(store.clone(), transport, &SourceRegistry::default());

        let outcome = engine.crawl_url("https://funder.test/grants", Some(org.id)).await.unwrap();
        assert_eq!(outcome.candidates, 1);
        assert_eq!(outcome.saved, 1);
        let matches = engine.matches_for_profile(org.id).await.unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].opportunity.title, "Youth Mentoring Grant");
    }

    #[tokio::test]
    async fn crawl_url_with_unknown_profile_writes_no_match() {
        let store = Arc::new(MemoryStore::new());
        let transport = StaticTransport::new().route("https://funder.test/", GRANTS_PAGE);
        let engine = engine_with(store.clone(), transport, &SourceRegistry::default());

        let outcome = engine
            .crawl_url("https://funder.test/grants", Some(Uuid::new_v4()))
            .await
            .unwrap();
        assert_eq!(outcome.candidates, 1);
        assert_eq!(engine.stats().await.unwrap().matches, 0);
    }

    #[tokio::test]
    async fn spawned_runs_finish_in_the_background() {
        let store = Arc::new(MemoryStore::with_profiles(vec![profile(json!({"state": "OH"}))]));
        let engine = engine_with(store, StaticTransport::new(), &SourceRegistry::default());

        engine.spawn_run_crawler("local-funders", vec![]).unwrap().await.unwrap();
        let states = engine.statuses().await;
        let local = states.iter().find(|s| s.name == "local-funders").unwrap();
        assert_eq!(local.status, CrawlerStatus::Completed);

        engine.spawn_run_all(vec![]).await.unwrap();
        assert!(engine.statuses().await.iter().all(|s| s.status == CrawlerStatus::Completed));
    }

    #[tokio::test]
    async fn scheduler_is_off_by_default() {
        let engine = engine_with(Arc::new(MemoryStore::new()), StaticTransport::new(), &SourceRegistry::default());
        let sched = maybe_build_scheduler(engine, &EngineConfig::default()).await.unwrap();
        assert!(sched.is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn scheduler_accepts_the_default_cron() {
        let engine = engine_with(Arc::new(MemoryStore::new()), StaticTransport::new(), &SourceRegistry::default());
        let config = EngineConfig {
            scheduler_enabled: true,
            ..Default::default()
        };
        let sched = maybe_build_scheduler(engine, &config).await.unwrap();
        assert!(sched.is_some());
    }
}
