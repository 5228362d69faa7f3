//! Community-level funders synthesized from a profile's city and state.

use async_trait::async_trait;
use fundfinder_core::{normalize, score, MatchingCriteria, OpportunityCategory, OpportunityDraft, Profile, ScoreResult};
use reqwest::Url;
use tracing::debug;

use crate::parse::slug;
use crate::{persist_scored, Crawler, CrawlerDeps, CrawlerError, CrawlerRuntime};

pub const NAME: &str = "local-funders";
pub const THRESHOLD: u8 = 25;
pub const LOCAL_BOOST: u8 = 15;
pub const FOCUS_BOOST: u8 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scope {
    City,
    State,
}

struct FunderTemplate {
    key: &'static str,
    scope: Scope,
    /// `{place}` is replaced with the city or state name.
    title: &'static str,
    sponsor: &'static str,
    description: &'static str,
    eligibility: &'static str,
    focus_areas: &'static [&'static str],
}

const TEMPLATES: &[FunderTemplate] = &[
    FunderTemplate {
        key: "community-foundation",
        scope: Scope::City,
        title: "{place} Community Foundation Grants",
        sponsor: "{place} Community Foundation",
        description: "Competitive and donor-advised grants for organizations improving quality of life in {place}.",
        eligibility: "Nonprofit organizations and community groups serving the area",
        focus_areas: &["community development", "education", "health", "arts"],
    },
    FunderTemplate {
        key: "united-way",
        scope: Scope::City,
        title: "United Way of {place} Community Impact Funding",
        sponsor: "United Way of {place}",
        description: "Funding for local programs addressing basic needs, education and financial stability in {place}.",
        eligibility: "Nonprofit organizations serving local residents",
        focus_areas: &["basic needs", "education", "health", "financial stability"],
    },
    FunderTemplate {
        key: "rotary-club",
        scope: Scope::City,
        title: "Rotary Club of {place} Community Grants",
        sponsor: "Rotary Club of {place}",
        description: "Small grants and scholarships for service projects, youth programs and families in need in {place}.",
        eligibility: "Local nonprofit organizations, students and individuals in need",
        focus_areas: &["community service", "youth", "education"],
    },
    FunderTemplate {
        key: "small-business-fund",
        scope: Scope::City,
        title: "{place} Small Business Development Fund",
        sponsor: "City of {place} Economic Development Office",
        description: "Grants and low-interest loans for small businesses and entrepreneurs located in {place}.",
        eligibility: "Small businesses and entrepreneurs with a local address",
        focus_areas: &["small business", "economic development"],
    },
    FunderTemplate {
        key: "arts-council",
        scope: Scope::State,
        title: "{place} Arts Council Grants",
        sponsor: "{place} Arts Council",
        description: "Project and operating support for artists and arts organizations across {place}.",
        eligibility: "Individual artists, arts organizations and nonprofit organizations",
        focus_areas: &["arts", "culture"],
    },
    FunderTemplate {
        key: "humanities-council",
        scope: Scope::State,
        title: "{place} Humanities Council Grants",
        sponsor: "{place} Humanities Council",
        description: "Grants for public humanities, history and literacy programs in {place}.",
        eligibility: "Nonprofit organizations, libraries and educational institutions",
        focus_areas: &["humanities", "history", "education"],
    },
];

struct Place {
    scope: Scope,
    name: String,
    /// Geography text the scorer sees, e.g. "Columbus, OH" or "Ohio (OH)".
    location: String,
}

fn places(criteria: &MatchingCriteria) -> Vec<Place> {
    let mut out = Vec::new();
    if let Some(city) = criteria.city.as_deref() {
        out.push(Place {
            scope: Scope::City,
            name: city.to_string(),
            location: criteria.locality().unwrap_or_else(|| city.to_string()),
        });
    }
    if let Some(state) = criteria.state.as_deref() {
        let name = criteria.state_name().unwrap_or(state).to_string();
        out.push(Place {
            scope: Scope::State,
            location: format!("{name} ({state})"),
            name,
        });
    }
    out
}

fn search_url(sponsor: &str) -> Option<String> {
    Url::parse_with_params("https://www.google.com/search", &[("q", sponsor)])
        .ok()
        .map(|u| u.to_string())
}

/// Synthesized candidates for the profile's locality, in template order.
pub fn local_candidates(criteria: &MatchingCriteria) -> Vec<OpportunityDraft> {
    let mut out = Vec::new();
    for place in places(criteria) {
        for template in TEMPLATES.iter().filter(|t| t.scope == place.scope) {
            let fill = |text: &str| text.replace("{place}", &place.name);
            let mut draft = OpportunityDraft::new(
                NAME,
                format!("{}:{}", template.key, slug(&place.location)),
                fill(template.title),
                OpportunityCategory::LocalFunder,
            );
            let sponsor = fill(template.sponsor);
            draft.url = search_url(&sponsor);
            draft.sponsor = Some(sponsor);
            draft.description = Some(fill(template.description));
            draft.eligibility = Some(template.eligibility.to_string());
            draft.focus_areas = template.focus_areas.iter().map(|f| f.to_string()).collect();
            draft.location = Some(place.location.clone());
            out.push(draft);
        }
    }
    out
}

fn is_local(draft: &OpportunityDraft, criteria: &MatchingCriteria) -> bool {
    let Some(location) = draft.location.as_deref() else {
        return false;
    };
    let lower = location.to_lowercase();
    let city_hit = criteria
        .city
        .as_deref()
        .is_some_and(|city| lower.contains(&city.to_lowercase()));
    let state_hit = criteria.state.as_deref().is_some_and(|state| {
        location
            .split(|c: char| !c.is_ascii_alphanumeric())
            .any(|token| token == state)
    });
    city_hit || state_hit
}

/// Scorer result plus the local and focus-area boosts, capped at 100.
pub fn boosted_score(draft: &OpportunityDraft, criteria: &MatchingCriteria) -> ScoreResult {
    let mut result = score(draft, criteria);
    let mut boost = 0u8;
    if is_local(draft, criteria) {
        boost += LOCAL_BOOST;
        result.reasons.push(format!(
            "Local funder in {}",
            draft.location.as_deref().unwrap_or_default()
        ));
    }
    let focus_aligned = criteria.focus_areas.iter().any(|wanted| {
        draft
            .focus_areas
            .iter()
            .any(|f| f.contains(wanted.as_str()) || wanted.contains(f.as_str()))
    });
    if focus_aligned {
        boost += FOCUS_BOOST;
        result.reasons.push("Aligned with your focus areas".to_string());
    }
    result.score = result.score.saturating_add(boost).min(100);
    result
}

pub struct LocalFundersCrawler {
    runtime: CrawlerRuntime,
    deps: CrawlerDeps,
}

impl LocalFundersCrawler {
    pub fn new(deps: CrawlerDeps) -> Self {
        Self {
            runtime: CrawlerRuntime::new(NAME, "Community foundations and local funders near the profile"),
            deps,
        }
    }
}

#[async_trait]
impl Crawler for LocalFundersCrawler {
    fn runtime(&self) -> &CrawlerRuntime {
        &self.runtime
    }

    fn deps(&self) -> &CrawlerDeps {
        &self.deps
    }

    async fn crawl(&self, profiles: &[Profile]) -> Result<(), CrawlerError> {
        for profile in profiles {
            let criteria = normalize(profile);
            if criteria.city.is_none() && criteria.state.is_none() {
                debug!(profile_id = %profile.id, "no location for local funders");
                continue;
            }
            for draft in local_candidates(&criteria) {
                let result = boosted_score(&draft, &criteria);
                persist_scored(
                    &self.runtime,
                    self.deps.store.as_ref(),
                    &draft,
                    &result,
                    Some(profile.id),
                    THRESHOLD,
                )
                .await;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;
    use fundfinder_storage::{MemoryStore, OpportunityStore, StaticTransport};
    use serde_json::json;
    use std::sync::Arc;

    #[test]
    fn city_and_state_templates_are_generated() {
        let criteria = normalize(&testing::profile(json!({"city": "Columbus", "state": "OH"})));
        let drafts = local_candidates(&criteria);
        assert_eq!(drafts.len(), TEMPLATES.len());
        assert_eq!(drafts[0].title, "Columbus Community Foundation Grants");
        assert_eq!(drafts[0].source_id, "community-foundation:columbus-oh");
        assert_eq!(drafts[4].title, "Ohio Arts Council Grants");
        assert_eq!(drafts[4].location.as_deref(), Some("Ohio (OH)"));
    }

    #[test]
    fn state_only_profile_gets_state_templates() {
        let criteria = normalize(&testing::profile(json!({"state": "Vermont"})));
        let drafts = local_candidates(&criteria);
        assert_eq!(drafts.len(), 2);
        assert!(drafts.iter().all(|d| d.location.as_deref() == Some("Vermont (VT)")));
    }

    #[test]
    fn boosts_apply_before_threshold() {
        let criteria = normalize(&testing::profile(json!({"state": "OH", "focus_areas": ["arts"]})));
        let arts = local_candidates(&criteria)
            .into_iter()
            .find(|d| d.source_id.starts_with("arts-council"))
            .unwrap();
        let plain = score(&arts, &criteria);
        let boosted = boosted_score(&arts, &criteria);
        assert_eq!(boosted.score, plain.score + LOCAL_BOOST + FOCUS_BOOST);
        assert!(boosted.reasons.contains(&"Local funder in Ohio (OH)".to_string()));
        assert!(boosted.reasons.contains(&"Aligned with your focus areas".to_string()));
    }

    #[test]
    fn unrelated_template_without_boosts_misses_threshold() {
        let criteria = normalize(&testing::profile(json!({"state": "OH", "profile_type": "student"})));
        let mut draft = local_candidates(&criteria).remove(0);
        draft.location = Some("Idaho (ID)".into());
        let result = boosted_score(&draft, &criteria);
        assert!(result.score < THRESHOLD);
    }

    #[tokio::test]
    async fn profiles_without_location_are_skipped() {
        let store = Arc::new(MemoryStore::with_profiles(vec![testing::profile(json!({"focus_areas": ["arts"]}))]));
        let crawler = LocalFundersCrawler::new(testing::deps(StaticTransport::new(), store.clone()));
        assert!(crawler.run(&[]).await.success);
        assert_eq!(store.stats().await.unwrap().opportunities, 0);
    }

    #[tokio::test]
    async fn nonprofit_in_city_gets_local_matches() {
        let org = testing::profile(json!({"profile_type": "organization", "city": "Columbus", "state": "OH",
                                          "focus_areas": ["education"]}));
        let store = Arc::new(MemoryStore::with_profiles(vec![org.clone()]));
        let crawler = LocalFundersCrawler::new(testing::deps(StaticTransport::new(), store.clone()));
        let outcome = crawler.run(&[]).await;
        assert_eq!(outcome.opportunities_found, TEMPLATES.len());
        let matches = store.matches_for_profile(org.id).await.unwrap();
        assert_eq!(matches.len(), TEMPLATES.len());
        assert!(matches.iter().all(|m| m.record.category == "local_funder"));
    }
}
