//! AI-assisted free-text extraction, used as a best-effort fallback.

use std::time::Duration;

use async_trait::async_trait;
use fundfinder_core::{OpportunityCategory, OpportunityDraft};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::parse::{parse_deadline, stable_source_id, text_or_none, truncate_chars};
use crate::website;

/// Page text beyond this many characters is not sent to the model.
pub const MAX_EXTRACT_CHARS: usize = 6000;

#[async_trait]
pub trait OpportunityExtractor: Send + Sync {
    /// Candidates found in `text` (cleaned page text from `url`). Empty on any failure.
    async fn extract(&self, url: &str, text: &str) -> Vec<OpportunityDraft>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopExtractor;

#[async_trait]
impl OpportunityExtractor for NoopExtractor {
    async fn extract(&self, _url: &str, _text: &str) -> Vec<OpportunityDraft> {
        Vec::new()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LlmConfig {
    /// OpenAI-compatible chat-completions URL.
    pub endpoint: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_timeout_ms() -> u64 {
    60_000
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

/// One candidate as the model is asked to return it.
#[derive(Debug, Default, Deserialize)]
struct ExtractedOpportunity {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    sponsor: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    amount_min: Option<f64>,
    #[serde(default)]
    amount_max: Option<f64>,
    #[serde(default)]
    deadline: Option<String>,
    #[serde(default)]
    eligibility: Option<String>,
    #[serde(default)]
    focus_areas: Vec<String>,
}

const SYSTEM_PROMPT: &str = "You extract funding opportunities (grants, scholarships, \
assistance programs, incentives) from web page text. Reply with only a JSON array. Each \
element has the keys title, sponsor, description, amount_min, amount_max, deadline \
(YYYY-MM-DD), eligibility, focus_areas (array of strings). Use null for unknown values. \
Reply with [] when the page lists no opportunities.";

#[derive(Debug, Clone)]
pub struct LlmExtractor {
    client: reqwest::Client,
    config: LlmConfig,
}

impl LlmExtractor {
    pub fn new(config: LlmConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;
        Ok(Self { client, config })
    }

    async fn complete(&self, url: &str, text: &str) -> anyhow::Result<String> {
        let request = ChatRequest {
            model: &self.config.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user",
                    content: format!("URL: {url}\n\n{}", truncate_chars(text, MAX_EXTRACT_CHARS)),
                },
            ],
            temperature: 0.0,
        };

        let mut builder = self.client.post(&self.config.endpoint).json(&request);
        if let Some(key) = self.config.api_key.as_deref() {
            builder = builder.bearer_auth(key);
        }
        let response = builder.send().await?.error_for_status()?;
        let body: ChatResponse = response.json().await?;
        Ok(body
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default())
    }
}

#[async_trait]
impl OpportunityExtractor for LlmExtractor {
    async fn extract(&self, url: &str, text: &str) -> Vec<OpportunityDraft> {
        if text.trim().is_empty() {
            return Vec::new();
        }
        match self.complete(url, text).await {
            Ok(reply) => {
                let drafts = parse_reply(url, &reply);
                debug!(url, candidates = drafts.len(), "ai extraction finished");
                drafts
            }
            Err(err) => {
                warn!(url, error = %err, "ai extraction failed");
                Vec::new()
            }
        }
    }
}

/// Pull the first JSON array out of a model reply; anything malformed yields nothing.
fn parse_reply(url: &str, reply: &str) -> Vec<OpportunityDraft> {
    let (Some(start), Some(end)) = (reply.find('['), reply.rfind(']')) else {
        return Vec::new();
    };
    if end < start {
        return Vec::new();
    }
    let items: Vec<ExtractedOpportunity> = match serde_json::from_str(&reply[start..=end]) {
        Ok(items) => items,
        Err(err) => {
            warn!(url, error = %err, "ai extraction returned malformed json");
            return Vec::new();
        }
    };

    items
        .into_iter()
        .filter_map(|item| {
            let title = text_or_none(item.title?)?;
            let mut draft = OpportunityDraft::new(
                website::NAME,
                stable_source_id(url, &title),
                title,
                OpportunityCategory::Website,
            );
            draft.sponsor = item.sponsor.and_then(text_or_none);
            draft.description = item.description.and_then(text_or_none);
            draft.amount_min = item.amount_min;
            draft.amount_max = item.amount_max;
            draft.deadline = item.deadline.as_deref().and_then(parse_deadline);
            draft.eligibility = item.eligibility.and_then(text_or_none);
            draft.focus_areas = item
                .focus_areas
                .into_iter()
                .filter_map(text_or_none)
                .collect();
            draft.url = Some(url.to_string());
            Some(draft)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn reply_with_prose_around_array_is_parsed() {
        let reply = r#"Here you go:
[{"title": "Youth Arts Grant", "sponsor": "City Arts Fund", "amount_max": 5000,
  "deadline": "2026-05-01", "focus_areas": ["arts", " "]},
 {"title": null}]
Thanks!"#;
        let drafts = parse_reply("https://funder.org/grants", reply);
        assert_eq!(drafts.len(), 1);
        let d = &drafts[0];
        assert_eq!(d.title, "Youth Arts Grant");
        assert_eq!(d.source, "website");
        assert_eq!(d.source_id, stable_source_id("https://funder.org/grants", "Youth Arts Grant"));
        assert_eq!(d.amount_max, Some(5000.0));
        assert_eq!(d.deadline, NaiveDate::from_ymd_opt(2026, 5, 1));
        assert_eq!(d.focus_areas, vec!["arts".to_string()]);
    }

    #[test]
    fn malformed_reply_yields_nothing() {
        assert!(parse_reply("https://x.org", "no json here").is_empty());
        assert!(parse_reply("https://x.org", "[{\"title\": ").is_empty());
        assert!(parse_reply("https://x.org", "] oops [").is_empty());
    }

    #[tokio::test]
    async fn noop_extractor_is_empty() {
        assert!(NoopExtractor.extract("https://x.org", "text").await.is_empty());
    }

    #[test]
    fn config_defaults_fill_in() {
        let config: LlmConfig = serde_json::from_str(r#"{"endpoint": "http://localhost/v1/chat/completions"}"#).unwrap();
        assert_eq!(config.model, "gpt-4o-mini");
        assert_eq!(config.api_key, None);
        assert_eq!(config.timeout_ms, 60_000);
    }
}
