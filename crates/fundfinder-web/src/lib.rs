//! JSON admin API over the crawl engine.
//!
//! Run triggers are fire-and-forget: the handler spawns the run and answers
//! `202 Accepted`; progress is visible through the status and stats routes.

use std::sync::Arc;

use anyhow::Context;
use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use fundfinder_storage::PgStore;
use fundfinder_sync::{maybe_build_scheduler, Engine, EngineConfig, SyncError};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;
use tracing::{error, info};
use uuid::Uuid;

pub const CRATE_NAME: &str = "fundfinder-web";

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
}

impl AppState {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self { engine }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RunRequest {
    #[serde(default)]
    profile_ids: Vec<Uuid>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CrawlUrlRequest {
    url: String,
    #[serde(default)]
    profile_id: Option<Uuid>,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz_handler))
        .route("/api/crawlers", get(crawlers_handler))
        .route("/api/crawlers/status", get(status_handler))
        .route("/api/crawlers/run", post(run_all_handler))
        .route("/api/crawlers/{name}/run", post(run_crawler_handler))
        .route("/api/profiles/{id}/crawl", post(run_profile_handler))
        .route("/api/profiles/{id}/matches", get(matches_handler))
        .route("/api/crawl-url", post(crawl_url_handler))
        .route("/api/stats", get(stats_handler))
        .with_state(Arc::new(state))
}

/// Connect, migrate, start the optional scheduler and serve until shutdown.
pub async fn serve_from_env() -> anyhow::Result<()> {
    let config = EngineConfig::from_env();
    let store = PgStore::connect(&config.database_url)
        .await
        .context("connecting to database")?;
    store.migrate().await.context("running migrations")?;
    let engine = Arc::new(Engine::from_config(&config, Arc::new(store)).await?);

    let scheduler = maybe_build_scheduler(engine.clone(), &config).await?;
    if let Some(sched) = &scheduler {
        sched.start().await.context("starting scheduler")?;
        info!(cron = %config.crawl_cron, "crawl scheduler started");
    }

    serve(engine, config.web_port).await
}

pub async fn serve(engine: Arc<Engine>, port: u16) -> anyhow::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("binding port {port}"))?;
    info!(port, "admin api listening");
    axum::serve(listener, app(AppState::new(engine))).await?;
    Ok(())
}

async fn healthz_handler() -> Response {
    Json(json!({"status": "ok"})).into_response()
}

async fn crawlers_handler(State(state): State<Arc<AppState>>) -> Response {
    Json(state.engine.crawler_names()).into_response()
}

async fn status_handler(State(state): State<Arc<AppState>>) -> Response {
    Json(state.engine.statuses().await).into_response()
}

async fn run_all_handler(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let request: RunRequest = match optional_json(&body) {
        Ok(request) => request,
        Err(resp) => return resp,
    };
    let crawlers = state.engine.crawler_names().len();
    state.engine.spawn_run_all(request.profile_ids.clone());
    accepted(json!({
        "accepted": true,
        "crawlers": crawlers,
        "profileIds": request.profile_ids,
    }))
}

async fn run_crawler_handler(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    body: Bytes,
) -> Response {
    let request: RunRequest = match optional_json(&body) {
        Ok(request) => request,
        Err(resp) => return resp,
    };
    match state.engine.spawn_run_crawler(&name, request.profile_ids) {
        Ok(_) => accepted(json!({"accepted": true, "crawler": name})),
        Err(err) => sync_error(err),
    }
}

async fn run_profile_handler(State(state): State<Arc<AppState>>, Path(id): Path<Uuid>) -> Response {
    state.engine.spawn_run_for_profile(id);
    accepted(json!({"accepted": true, "profileId": id}))
}

async fn crawl_url_handler(State(state): State<Arc<AppState>>, Json(request): Json<CrawlUrlRequest>) -> Response {
    let url = request.url.trim().to_string();
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        return (StatusCode::BAD_REQUEST, Json(json!({"error": "url must be http(s)"}))).into_response();
    }
    state.engine.spawn_crawl_url(url.clone(), request.profile_id);
    accepted(json!({"accepted": true, "url": url, "profileId": request.profile_id}))
}

async fn matches_handler(State(state): State<Arc<AppState>>, Path(id): Path<Uuid>) -> Response {
    match state.engine.matches_for_profile(id).await {
        Ok(matches) => Json(matches).into_response(),
        Err(err) => sync_error(err),
    }
}

async fn stats_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.engine.stats().await {
        Ok(stats) => Json(stats).into_response(),
        Err(err) => sync_error(err),
    }
}

/// Empty bodies fall back to `T::default()`.
fn optional_json<T: DeserializeOwned + Default>(body: &[u8]) -> Result<T, Response> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|err| {
        (StatusCode::BAD_REQUEST, Json(json!({"error": err.to_string()}))).into_response()
    })
}

fn accepted(body: serde_json::Value) -> Response {
    (StatusCode::ACCEPTED, Json(body)).into_response()
}

fn sync_error(err: SyncError) -> Response {
    let status = match &err {
        SyncError::CrawlerNotFound(_) => StatusCode::NOT_FOUND,
        _ => {
            error!(error = %err, "admin request failed");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (status, Json(json!({"error": err.to_string()}))).into_response()
}
