//! Crawl orchestration: configuration, the source registry, the crawl manager
//! and the engine facade used by the CLI and the admin API.

mod config;
mod engine;
mod manager;

use fundfinder_crawlers::CrawlerError;
use fundfinder_storage::StoreError;
use thiserror::Error;

pub use config::{EngineConfig, SourceConfig, SourceRegistry, DEFAULT_CRAWL_CRON, DEFAULT_DATABASE_URL};
pub use engine::{maybe_build_scheduler, CrawlerInfo, Engine, EngineStats};
pub use manager::CrawlManager;

pub const CRATE_NAME: &str = "fundfinder-sync";

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("crawler not found: {0}")]
    CrawlerNotFound(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Crawler(#[from] CrawlerError),
}
