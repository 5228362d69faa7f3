//! Network fetch utilities + the opportunity/match persistence gateway.

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, info_span, warn, Instrument};

mod memory;
mod postgres;
mod store;

pub use memory::MemoryStore;
pub use postgres::PgStore;
pub use store::{OpportunityStore, ProfileMatch, StoreError};

pub const CRATE_NAME: &str = "fundfinder-storage";

pub const DEFAULT_USER_AGENT: &str = "fundfinder-bot/0.1 (+https://github.com/fundfinder)";

/// Linear backoff: attempt `n` (1-based) waits `base_delay * n` before retrying.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_attempts: usize,
    pub base_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1000),
        }
    }
}

impl BackoffPolicy {
    pub fn delay_after_attempt(&self, attempt: usize) -> Duration {
        self.base_delay.saturating_mul(attempt.max(1) as u32)
    }
}

/// Per-call overrides for [`HttpFetcher::fetch_with`].
#[derive(Debug, Clone)]
pub struct FetchOptions {
    pub retries: usize,
    pub delay: Duration,
    pub timeout: Duration,
    pub headers: Vec<(String, String)>,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            retries: 3,
            delay: Duration::from_millis(1000),
            timeout: Duration::from_millis(30_000),
            headers: Vec::new(),
        }
    }
}

impl FetchOptions {
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy {
            max_attempts: self.retries.max(1),
            base_delay: self.delay,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub user_agent: String,
    pub timeout: Duration,
    pub retries: usize,
    pub retry_delay: Duration,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            timeout: Duration::from_millis(30_000),
            retries: 3,
            retry_delay: Duration::from_millis(1000),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub url: String,
    pub timeout: Duration,
    pub headers: Vec<(String, String)>,
}

impl HttpRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct FetchedResponse {
    pub status: StatusCode,
    pub final_url: String,
    pub body: Vec<u8>,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("request to {url} failed: {message}")]
    Transport { url: String, message: String },
    #[error("request to {url} timed out after {timeout_ms}ms")]
    Timeout { url: String, timeout_ms: u128 },
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("could not decode body from {url}: {message}")]
    Body { url: String, message: String },
}

/// The single I/O primitive under the fetcher; swapped out in tests.
#[async_trait]
pub trait HttpTransport: Send + Sync + fmt::Debug {
    async fn get(&self, request: &HttpRequest) -> Result<FetchedResponse, FetchError>;
}

#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .build()
            .context("building reqwest client")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn get(&self, request: &HttpRequest) -> Result<FetchedResponse, FetchError> {
        let mut builder = self.client.get(&request.url).timeout(request.timeout);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let resp = builder
            .send()
            .await
            .map_err(|err| map_reqwest_error(&request.url, request.timeout, err))?;
        let status = resp.status();
        let final_url = resp.url().to_string();
        let body = resp
            .bytes()
            .await
            .map_err(|err| map_reqwest_error(&request.url, request.timeout, err))?
            .to_vec();
        Ok(FetchedResponse {
            status,
            final_url,
            body,
        })
    }
}

fn map_reqwest_error(url: &str, timeout: Duration, err: reqwest::Error) -> FetchError {
    if err.is_timeout() {
        FetchError::Timeout {
            url: url.to_string(),
            timeout_ms: timeout.as_millis(),
        }
    } else {
        FetchError::Transport {
            url: url.to_string(),
            message: err.to_string(),
        }
    }
}

/// HTTP GET with bounded retry and linear backoff. Knows nothing about sources.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    transport: Arc<dyn HttpTransport>,
    user_agent: String,
    defaults: FetchOptions,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let transport = ReqwestTransport::new()?;
        Ok(Self::with_transport(Arc::new(transport), config))
    }

    pub fn with_transport(transport: Arc<dyn HttpTransport>, config: HttpClientConfig) -> Self {
        Self {
            transport,
            user_agent: config.user_agent,
            defaults: FetchOptions {
                retries: config.retries,
                delay: config.retry_delay,
                timeout: config.timeout,
                headers: Vec::new(),
            },
        }
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    pub fn default_options(&self) -> FetchOptions {
        self.defaults.clone()
    }

    pub async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        self.fetch_with(url, &self.defaults).await
    }

    pub async fn fetch_with(&self, url: &str, options: &FetchOptions) -> Result<String, FetchError> {
        let resp = self.fetch_bytes(url, options).await?;
        String::from_utf8(resp.body).map_err(|err| FetchError::Body {
            url: url.to_string(),
            message: err.to_string(),
        })
    }

    pub async fn fetch_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, FetchError> {
        let options = self
            .defaults
            .clone()
            .with_header("Accept", "application/json");
        let resp = self.fetch_bytes(url, &options).await?;
        serde_json::from_slice(&resp.body).map_err(|err| FetchError::Body {
            url: url.to_string(),
            message: err.to_string(),
        })
    }

    /// Attempts the request up to `options.retries` times; only the last error surfaces.
    pub async fn fetch_bytes(
        &self,
        url: &str,
        options: &FetchOptions,
    ) -> Result<FetchedResponse, FetchError> {
        let span = info_span!("http_fetch", url);
        async {
            let backoff = options.backoff();
            let request = self.build_request(url, options);
            let mut attempt = 1;

            loop {
                let err = match self.transport.get(&request).await {
                    Ok(resp) if resp.status.is_success() => return Ok(resp),
                    Ok(resp) => FetchError::HttpStatus {
                        status: resp.status.as_u16(),
                        url: resp.final_url,
                    },
                    Err(err) => err,
                };

                if attempt >= backoff.max_attempts {
                    warn!(attempt, error = %err, "giving up on request");
                    return Err(err);
                }

                let delay = backoff.delay_after_attempt(attempt);
                debug!(attempt, ?delay, error = %err, "request failed; retrying");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
        .instrument(span)
        .await
    }

    fn build_request(&self, url: &str, options: &FetchOptions) -> HttpRequest {
        let mut headers = vec![("User-Agent".to_string(), self.user_agent.clone())];
        headers.extend(
            options
                .headers
                .iter()
                .filter(|(k, _)| !k.eq_ignore_ascii_case("user-agent"))
                .cloned(),
        );
        HttpRequest {
            url: url.to_string(),
            timeout: options.timeout,
            headers,
        }
    }
}

#[derive(Debug, Clone)]
enum StaticRoute {
    Body { status: StatusCode, body: String },
    Fail { message: String },
}

/// Transport that serves canned responses by URL prefix and records requests.
///
/// Unrouted URLs answer 404. Used for offline fixtures and tests.
#[derive(Debug, Default)]
pub struct StaticTransport {
    routes: Vec<(String, StaticRoute)>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl StaticTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(mut self, prefix: impl Into<String>, body: impl Into<String>) -> Self {
        self.routes.push((
            prefix.into(),
            StaticRoute::Body {
                status: StatusCode::OK,
                body: body.into(),
            },
        ));
        self
    }

    pub fn route_status(mut self, prefix: impl Into<String>, status: StatusCode) -> Self {
        self.routes.push((
            prefix.into(),
            StaticRoute::Body {
                status,
                body: String::new(),
            },
        ));
        self
    }

    pub fn route_failure(mut self, prefix: impl Into<String>, message: impl Into<String>) -> Self {
        self.routes.push((
            prefix.into(),
            StaticRoute::Fail {
                message: message.into(),
            },
        ));
        self
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().map(|r| r.len()).unwrap_or_default()
    }

    /// Requests whose URL starts with `prefix`.
    pub fn hits(&self, prefix: &str) -> usize {
        self.requests
            .lock()
            .map(|r| r.iter().filter(|req| req.url.starts_with(prefix)).count())
            .unwrap_or_default()
    }

    fn find(&self, url: &str) -> Option<&StaticRoute> {
        self.routes
            .iter()
            .filter(|(prefix, _)| url.starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, route)| route)
    }
}

#[async_trait]
impl HttpTransport for StaticTransport {
    async fn get(&self, request: &HttpRequest) -> Result<FetchedResponse, FetchError> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }

        match self.find(&request.url) {
            Some(StaticRoute::Body { status, body }) => Ok(FetchedResponse {
                status: *status,
                final_url: request.url.clone(),
                body: body.clone().into_bytes(),
            }),
            Some(StaticRoute::Fail { message }) => Err(FetchError::Transport {
                url: request.url.clone(),
                message: message.clone(),
            }),
            None => Ok(FetchedResponse {
                status: StatusCode::NOT_FOUND,
                final_url: request.url.clone(),
                body: Vec::new(),
            }),
        }
    }
}
