use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use fundfinder_storage::PgStore;
use fundfinder_sync::{Engine, EngineConfig};
use serde::Serialize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

#[derive(Debug, Parser)]
#[command(name = "fundfinder")]
#[command(about = "Funding opportunity discovery and matching")]
struct Cli {
    /// Log at debug level unless RUST_LOG says otherwise.
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run every enabled crawler, or one with --crawler.
    Crawl {
        #[arg(long)]
        crawler: Option<String>,
        /// Restrict to these profiles; all profiles when omitted.
        #[arg(long = "profile")]
        profiles: Vec<Uuid>,
    },
    /// Extract and match opportunities from one page.
    CrawlUrl {
        url: String,
        #[arg(long)]
        profile: Option<Uuid>,
    },
    /// Registered crawlers and their state.
    Status,
    /// Opportunity and match counts.
    Stats,
    /// Stored matches for a profile, best first.
    Matches { profile: Uuid },
    Migrate,
    /// Serve the admin API (and the scheduler when enabled).
    Serve,
}

fn init_logging(verbose: bool) {
    let default_filter = if verbose { "fundfinder=debug" } else { "fundfinder=info" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into()))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn connect(config: &EngineConfig) -> Result<PgStore> {
    PgStore::connect(&config.database_url)
        .await
        .with_context(|| format!("connecting to {}", config.database_url))
}

async fn engine(config: &EngineConfig) -> Result<Engine> {
    let store = connect(config).await?;
    Engine::from_config(config, Arc::new(store)).await
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    init_logging(cli.verbose);
    let config = EngineConfig::from_env();

    match cli.command.unwrap_or(Commands::Status) {
        Commands::Crawl { crawler, profiles } => {
            let engine = engine(&config).await?;
            match crawler {
                Some(name) => print_json(&engine.run_crawler(&name, &profiles).await?)?,
                None => print_json(&engine.run_all(&profiles).await)?,
            }
        }
        Commands::CrawlUrl { url, profile } => {
            let engine = engine(&config).await?;
            print_json(&engine.crawl_url(&url, profile).await?)?;
        }
        Commands::Status => {
            let engine = engine(&config).await?;
            print_json(&engine.statuses().await)?;
        }
        Commands::Stats => {
            let engine = engine(&config).await?;
            print_json(&engine.stats().await?)?;
        }
        Commands::Matches { profile } => {
            let engine = engine(&config).await?;
            print_json(&engine.matches_for_profile(profile).await?)?;
        }
        Commands::Migrate => {
            connect(&config).await?.migrate().await.context("running migrations")?;
            println!("migrations applied");
        }
        Commands::Serve => fundfinder_web::serve_from_env().await?,
    }

    Ok(())
}
