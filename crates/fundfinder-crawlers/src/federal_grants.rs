//! Federal grant search (Grants.gov-style JSON API).

use async_trait::async_trait;
use chrono::NaiveDate;
use fundfinder_core::{normalize, OpportunityCategory, OpportunityDraft, Profile};
use reqwest::Url;
use serde_json::Value as JsonValue;
use tracing::{debug, warn};

use crate::parse::{json_str, json_string, json_string_vec};
use crate::{persist_qualifying, Crawler, CrawlerDeps, CrawlerError, CrawlerRuntime, SourceSettings};

pub const NAME: &str = "federal-grants";
pub const THRESHOLD: u8 = 30;
pub const DEFAULT_BASE_URL: &str = "https://apply07.grants.gov/grantsws/rest";
const MAX_TERMS: usize = 5;
const ROWS: &str = "25";

pub struct FederalGrantsCrawler {
    runtime: CrawlerRuntime,
    deps: CrawlerDeps,
    base_url: String,
}

impl FederalGrantsCrawler {
    pub fn new(deps: CrawlerDeps, settings: &SourceSettings) -> Self {
        Self {
            runtime: CrawlerRuntime::new(NAME, "Searches the federal grants registry by profile focus areas"),
            deps,
            base_url: settings.base_url_or(DEFAULT_BASE_URL),
        }
    }

    pub fn search_url(&self, term: &str) -> Result<String, CrawlerError> {
        let url = Url::parse_with_params(
            &format!("{}/opportunities/search", self.base_url),
            &[("keyword", term), ("oppStatuses", "forecasted|posted"), ("rows", ROWS)],
        )
        .map_err(|e| CrawlerError::Parse(e.to_string()))?;
        Ok(url.to_string())
    }

    async fn search(&self, term: &str) -> Result<Vec<OpportunityDraft>, CrawlerError> {
        let url = self.search_url(term)?;
        let body: JsonValue = self.deps.http.fetch_json(&url).await?;
        let hits = body
            .get("oppHits")
            .and_then(JsonValue::as_array)
            .cloned()
            .unwrap_or_default();

        let mut drafts = Vec::with_capacity(hits.len());
        for hit in &hits {
            match draft_from_hit(hit, term) {
                Some(draft) => drafts.push(draft),
                None => debug!(term, "skipping federal hit without id or title"),
            }
        }
        Ok(drafts)
    }
}

fn draft_from_hit(hit: &JsonValue, term: &str) -> Option<OpportunityDraft> {
    let id = json_string(hit, &["id"]).or_else(|| json_string(hit, &["number"]))?;
    let title = json_str(hit, &["title"])?;

    let mut draft = OpportunityDraft::new(NAME, id.clone(), title, OpportunityCategory::FederalGrant);
    let agency = json_str(hit, &["agency"]).or_else(|| json_str(hit, &["agencyName"]));
    draft.sponsor = agency.map(ToString::to_string);
    draft.description = json_str(hit, &["description"]).map(ToString::to_string).or_else(|| {
        let number = json_str(hit, &["number"])?;
        let status = json_str(hit, &["oppStatus"]).unwrap_or("posted");
        Some(format!(
            "Funding opportunity {number} ({status}) from {}.",
            agency.unwrap_or("a federal agency")
        ))
    });
    draft.eligibility = json_str(hit, &["eligibility"]).map(ToString::to_string);
    draft.deadline = json_str(hit, &["closeDate"])
        .and_then(|d| NaiveDate::parse_from_str(d, "%m/%d/%Y").ok());

    let mut focus_areas = json_string_vec(hit, &["categories"]);
    if !focus_areas.iter().any(|f| f.eq_ignore_ascii_case(term)) {
        focus_areas.push(term.to_string());
    }
    draft.focus_areas = focus_areas;
    draft.location = Some("United States (national)".to_string());
    draft.url = Some(format!("https://www.grants.gov/search-results-detail/{id}"));
    Some(draft)
}

#[async_trait]
impl Crawler for FederalGrantsCrawler {
    fn runtime(&self) -> &CrawlerRuntime {
        &self.runtime
    }

    fn deps(&self) -> &CrawlerDeps {
        &self.deps
    }

    async fn crawl(&self, profiles: &[Profile]) -> Result<(), CrawlerError> {
        for profile in profiles {
            let criteria = normalize(profile);
            let terms = criteria.search_terms(MAX_TERMS);
            if terms.is_empty() {
                debug!(profile_id = %profile.id, "no focus areas or keywords to search");
                continue;
            }

            for term in &terms {
                let drafts = match self.search(term).await {
                    Ok(drafts) => drafts,
                    Err(err) => {
                        warn!(term = %term, error = %err, "federal grant search failed");
                        self.deps.pause().await;
                        continue;
                    }
                };
                for draft in &drafts {
                    persist_qualifying(
                        &self.runtime,
                        self.deps.store.as_ref(),
                        draft,
                        &criteria,
                        Some(profile.id),
                        THRESHOLD,
                    )
                    .await;
                }
                self.deps.pause().await;
            }
        }
        Ok(())
    }
}
