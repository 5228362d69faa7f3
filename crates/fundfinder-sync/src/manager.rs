use std::collections::BTreeMap;
use std::sync::Arc;

use fundfinder_core::CrawlerState;
use fundfinder_crawlers::{Crawler, RunOutcome};
use tracing::{info, warn};
use uuid::Uuid;

use crate::SyncError;

/// Registry of crawlers, dispatched one at a time in registration order.
#[derive(Default)]
pub struct CrawlManager {
    crawlers: Vec<Arc<dyn Crawler>>,
}

impl CrawlManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registering a name twice replaces the earlier crawler in place.
    pub fn register(&mut self, crawler: Arc<dyn Crawler>) {
        match self.crawlers.iter_mut().find(|c| c.name() == crawler.name()) {
            Some(slot) => {
                warn!(crawler = crawler.name(), "replacing registered crawler");
                *slot = crawler;
            }
            None => self.crawlers.push(crawler),
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Crawler>> {
        self.crawlers.iter().find(|c| c.name() == name).cloned()
    }

    pub fn get_all(&self) -> &[Arc<dyn Crawler>] {
        &self.crawlers
    }

    pub async fn get_status(&self) -> Vec<CrawlerState> {
        let mut states = Vec::with_capacity(self.crawlers.len());
        for crawler in &self.crawlers {
            states.push(crawler.status().await);
        }
        states
    }

    pub async fn run_all(&self, profile_ids: &[Uuid]) -> BTreeMap<String, RunOutcome> {
        let mut results = BTreeMap::new();
        for crawler in &self.crawlers {
            let outcome = crawler.run(profile_ids).await;
            results.insert(crawler.name().to_string(), outcome);
        }
        let failed = results.values().filter(|r| !r.success).count();
        info!(crawlers = results.len(), failed, "run-all finished");
        results
    }

    pub async fn run_crawler(&self, name: &str, profile_ids: &[Uuid]) -> Result<RunOutcome, SyncError> {
        let crawler = self
            .get(name)
            .ok_or_else(|| SyncError::CrawlerNotFound(name.to_string()))?;
        Ok(crawler.run(profile_ids).await)
    }
}
