//! Foundations discovered through nonprofit tax filings (ProPublica-style search API).

use async_trait::async_trait;
use fundfinder_core::{normalize, OpportunityCategory, OpportunityDraft, Profile};
use reqwest::Url;
use serde_json::Value as JsonValue;
use tracing::{debug, warn};

use crate::parse::{json_f64, json_str, json_string};
use crate::{persist_qualifying, Crawler, CrawlerDeps, CrawlerError, CrawlerRuntime, SourceSettings};

pub const NAME: &str = "nonprofit-filings";
pub const THRESHOLD: u8 = 30;
/// Looser cutoff for filers that are known grant-makers.
pub const GRANT_MAKER_THRESHOLD: u8 = 20;
pub const DEFAULT_BASE_URL: &str = "https://projects.propublica.org/nonprofits/api/v2";
const MAX_TERMS: usize = 3;

/// NTEE major groups, by leading letter.
const NTEE_GROUPS: &[(char, &str)] = &[
    ('A', "arts"),
    ('B', "education"),
    ('C', "environment"),
    ('D', "animal welfare"),
    ('E', "health"),
    ('F', "mental health"),
    ('G', "disease research"),
    ('I', "crime and legal"),
    ('J', "employment"),
    ('K', "food security"),
    ('L', "housing"),
    ('M', "public safety"),
    ('N', "recreation"),
    ('O', "youth development"),
    ('P', "human services"),
    ('Q', "international affairs"),
    ('R', "civil rights"),
    ('S', "community development"),
    ('T', "philanthropy"),
    ('U', "science"),
    ('W', "public benefit"),
    ('X', "religion"),
];

#[derive(Debug, Clone, PartialEq)]
pub struct FoundationCandidate {
    pub draft: OpportunityDraft,
    pub grant_maker: bool,
}

impl FoundationCandidate {
    pub fn threshold(&self) -> u8 {
        if self.grant_maker {
            GRANT_MAKER_THRESHOLD
        } else {
            THRESHOLD
        }
    }
}

fn is_grant_maker(name: &str, ntee_code: Option<&str>, subsection: Option<i64>) -> bool {
    if ntee_code.is_some_and(|code| code.trim().to_ascii_uppercase().starts_with('T')) {
        return true;
    }
    let lower = name.to_lowercase();
    subsection == Some(3) && ["foundation", "fund", "trust"].iter().any(|w| lower.contains(w))
}

fn candidate_from_org(org: &JsonValue, term: &str) -> Option<FoundationCandidate> {
    let ein = json_string(org, &["ein"])?;
    let name = json_str(org, &["name"])?;
    let city = json_str(org, &["city"]);
    let state = json_str(org, &["state"]);
    let ntee_code = json_str(org, &["ntee_code"]);
    let subsection = json_f64(org, &["subseccd"]).map(|v| v as i64);

    let mut draft = OpportunityDraft::new(
        NAME,
        ein.clone(),
        format!("Grants from {name}"),
        OpportunityCategory::Foundation,
    );
    draft.sponsor = Some(name.to_string());
    let place = match (city, state) {
        (Some(city), Some(state)) => Some(format!("{city}, {state}")),
        (None, Some(state)) => Some(state.to_string()),
        (Some(city), None) => Some(city.to_string()),
        (None, None) => None,
    };
    let based = place.as_deref().map(|p| format!(" based in {p}")).unwrap_or_default();
    let related = if term.is_empty() {
        String::new()
    } else {
        format!(" that may fund work related to {term}")
    };
    draft.description = Some(format!("{name} is a tax-exempt organization{based}{related}."));
    draft.eligibility = Some("Nonprofit organizations".to_string());
    draft.location = place;

    let mut focus_areas = Vec::new();
    if let Some(group) = ntee_code
        .and_then(|code| code.trim().chars().next())
        .and_then(|letter| NTEE_GROUPS.iter().find(|(l, _)| *l == letter.to_ascii_uppercase()))
    {
        focus_areas.push(group.1.to_string());
    }
    if !term.is_empty() && !focus_areas.iter().any(|f| f == term) {
        focus_areas.push(term.to_string());
    }
    draft.focus_areas = focus_areas;
    draft.url = Some(format!("https://projects.propublica.org/nonprofits/organizations/{ein}"));

    Some(FoundationCandidate {
        grant_maker: is_grant_maker(name, ntee_code, subsection),
        draft,
    })
}

pub struct NonprofitFilingsCrawler {
    runtime: CrawlerRuntime,
    deps: CrawlerDeps,
    base_url: String,
}

impl NonprofitFilingsCrawler {
    pub fn new(deps: CrawlerDeps, settings: &SourceSettings) -> Self {
        Self {
            runtime: CrawlerRuntime::new(NAME, "Finds grant-making foundations from nonprofit filings"),
            deps,
            base_url: settings.base_url_or(DEFAULT_BASE_URL),
        }
    }

    pub fn search_url(&self, term: &str, state: Option<&str>) -> Result<String, CrawlerError> {
        let query = format!("{term} foundation").trim().to_string();
        let mut params = vec![("q", query)];
        if let Some(state) = state {
            params.push(("state[id]", state.to_string()));
        }
        let url = Url::parse_with_params(&format!("{}/search.json", self.base_url), &params)
            .map_err(|e| CrawlerError::Parse(e.to_string()))?;
        Ok(url.to_string())
    }

    async fn search(&self, term: &str, state: Option<&str>) -> Result<Vec<FoundationCandidate>, CrawlerError> {
        let url = self.search_url(term, state)?;
        let body: JsonValue = self.deps.http.fetch_json(&url).await?;
        let orgs = body
            .get("organizations")
            .and_then(JsonValue::as_array)
            .cloned()
            .unwrap_or_default();
        Ok(orgs.iter().filter_map(|org| candidate_from_org(org, term)).collect())
    }
}

#[async_trait]
impl Crawler for NonprofitFilingsCrawler {
    fn runtime(&self) -> &CrawlerRuntime {
        &self.runtime
    }

    fn deps(&self) -> &CrawlerDeps {
        &self.deps
    }

    async fn crawl(&self, profiles: &[Profile]) -> Result<(), CrawlerError> {
        for profile in profiles {
            let criteria = normalize(profile);
            if !criteria.is_organization() {
                debug!(profile_id = %profile.id, "skipping non-organization profile");
                continue;
            }

            let mut terms = criteria.search_terms(MAX_TERMS);
            if terms.is_empty() {
                terms.push(String::new());
            }
            for term in &terms {
                match self.search(term, criteria.state.as_deref()).await {
                    Ok(candidates) => {
                        for candidate in &candidates {
                            persist_qualifying(
                                &self.runtime,
                                self.deps.store.as_ref(),
                                &candidate.draft,
                                &criteria,
                                Some(profile.id),
                                candidate.threshold(),
                            )
                            .await;
                        }
                    }
                    Err(err) => warn!(term = %term, error = %err, "foundation search failed"),
                }
                self.deps.pause().await;
            }
        }
        Ok(())
    }
}
