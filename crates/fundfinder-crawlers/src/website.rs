//! Generic website crawler: configured listing pages plus on-demand URL crawls.
//!
//! Extraction runs in three stages and stops at the first that yields
//! candidates: known listing markup, the AI extractor, then a heading scan.

use std::sync::Arc;

use async_trait::async_trait;
use fundfinder_core::{normalize, MatchingCriteria, OpportunityCategory, OpportunityDraft, Profile};
use scraper::{ElementRef, Html};
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::extract::OpportunityExtractor;
use crate::parse::{
    element_text, eligibility_clause, page_text, parse_amount_range, parse_deadline, resolve_url, select_first_attr,
    select_first_text, selector, stable_source_id, truncate_chars,
};
use crate::{persist_qualifying, Crawler, CrawlerDeps, CrawlerError, CrawlerRuntime, SourceSettings};

pub const NAME: &str = "website";
pub const THRESHOLD: u8 = 20;

const ITEM_SELECTORS: &[&str] = &[
    ".grant",
    ".grant-item",
    ".funding-opportunity",
    ".opportunity",
    ".scholarship",
    ".views-row",
    "article",
];
const TITLE_SELECTOR: &str = "h2, h3, h4, a, strong";
const HEADING_SELECTOR: &str = "h1, h2, h3, h4";
const FUNDING_WORDS: &[&str] = &[
    "grant",
    "scholarship",
    "fund",
    "award",
    "fellowship",
    "program",
    "assistance",
    "incentive",
    "rebate",
];
const MAX_DESCRIPTION_CHARS: usize = 600;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMethod {
    Structural,
    Ai,
    Headings,
    None,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CrawlUrlOutcome {
    pub url: String,
    pub method: ExtractionMethod,
    pub candidates: usize,
    pub saved: usize,
}

fn draft_from_text(page_url: &str, title: String, text: &str, link: Option<String>) -> OpportunityDraft {
    let link = link.unwrap_or_else(|| page_url.to_string());
    let mut draft = OpportunityDraft::new(
        NAME,
        stable_source_id(&link, &title),
        title,
        OpportunityCategory::Website,
    );
    let (min, max) = parse_amount_range(text);
    draft.amount_min = min;
    draft.amount_max = max;
    draft.deadline = parse_deadline(text);
    if !text.is_empty() {
        draft.description = Some(truncate_chars(text, MAX_DESCRIPTION_CHARS));
    }
    draft.eligibility = eligibility_clause(text);
    draft.url = Some(link);
    draft
}

/// Items under known listing markup.
pub fn structural_extract(document: &Html, page_url: &str) -> Result<Vec<OpportunityDraft>, CrawlerError> {
    for item_selector in ITEM_SELECTORS {
        let sel = selector(item_selector)?;
        let mut drafts = Vec::new();
        for item in document.select(&sel) {
            let Some(title) = select_first_text(item, TITLE_SELECTOR)? else {
                continue;
            };
            let text = element_text(item).unwrap_or_default();
            let link = select_first_attr(item, "a[href]", "href")?.and_then(|href| resolve_url(page_url, &href));
            drafts.push(draft_from_text(page_url, title, &text, link));
        }
        if !drafts.is_empty() {
            return Ok(drafts);
        }
    }
    Ok(Vec::new())
}

fn following_text(heading: ElementRef<'_>) -> String {
    heading
        .next_siblings()
        .filter_map(ElementRef::wrap)
        .take_while(|el| !matches!(el.value().name(), "h1" | "h2" | "h3" | "h4"))
        .filter_map(element_text)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Last resort: headings that read like funding offers, with the text after them.
pub fn heading_scan(document: &Html, page_url: &str) -> Result<Vec<OpportunityDraft>, CrawlerError> {
    let sel = selector(HEADING_SELECTOR)?;
    let mut drafts = Vec::new();
    for heading in document.select(&sel) {
        let Some(title) = element_text(heading) else {
            continue;
        };
        let lower = title.to_lowercase();
        if !FUNDING_WORDS.iter().any(|w| lower.contains(w)) {
            continue;
        }
        let text = following_text(heading);
        drafts.push(draft_from_text(page_url, title, &text, None));
    }
    Ok(drafts)
}

pub struct WebsiteCrawler {
    runtime: CrawlerRuntime,
    deps: CrawlerDeps,
    listing_urls: Vec<String>,
    extractor: Arc<dyn OpportunityExtractor>,
}

impl WebsiteCrawler {
    pub fn new(deps: CrawlerDeps, settings: &SourceSettings, extractor: Arc<dyn OpportunityExtractor>) -> Self {
        Self {
            runtime: CrawlerRuntime::new(NAME, "Generic funder websites and ad hoc URLs"),
            deps,
            listing_urls: settings.listing_urls.clone(),
            extractor,
        }
    }

    /// Fetch `url` and run the extraction stages.
    pub async fn extract_from_url(&self, url: &str) -> Result<(ExtractionMethod, Vec<OpportunityDraft>), CrawlerError> {
        let html = self.deps.http.fetch(url).await?;
        // `Html` is not Send; keep it out of scope across awaits.
        let (structural, text) = {
            let document = Html::parse_document(&html);
            (structural_extract(&document, url)?, page_text(&document))
        };
        if !structural.is_empty() {
            return Ok((ExtractionMethod::Structural, structural));
        }

        let ai = self.extractor.extract(url, &text).await;
        if !ai.is_empty() {
            return Ok((ExtractionMethod::Ai, ai));
        }

        let document = Html::parse_document(&html);
        let headings = heading_scan(&document, url)?;
        if headings.is_empty() {
            Ok((ExtractionMethod::None, headings))
        } else {
            Ok((ExtractionMethod::Headings, headings))
        }
    }

    /// Crawl one arbitrary URL outside the profile loop.
    ///
    /// Counts go to a scratch runtime so the crawler's reported state only
    /// ever reflects full runs.
    pub async fn crawl_url(
        &self,
        url: &str,
        criteria: &MatchingCriteria,
        profile_id: Option<Uuid>,
    ) -> Result<CrawlUrlOutcome, CrawlerError> {
        let (method, drafts) = self.extract_from_url(url).await?;
        let scratch = CrawlerRuntime::new(NAME, "ad hoc url crawl");
        let mut saved = 0;
        for draft in &drafts {
            let written = persist_qualifying(
                &scratch,
                self.deps.store.as_ref(),
                draft,
                criteria,
                profile_id,
                THRESHOLD,
            )
            .await;
            if written {
                saved += 1;
            }
        }
        info!(url, ?method, candidates = drafts.len(), saved, "ad hoc url crawled");
        Ok(CrawlUrlOutcome {
            url: url.to_string(),
            method,
            candidates: drafts.len(),
            saved,
        })
    }
}

#[async_trait]
impl Crawler for WebsiteCrawler {
    fn runtime(&self) -> &CrawlerRuntime {
        &self.runtime
    }

    fn deps(&self) -> &CrawlerDeps {
        &self.deps
    }

    async fn crawl(&self, profiles: &[Profile]) -> Result<(), CrawlerError> {
        if self.listing_urls.is_empty() {
            debug!("no website listing urls configured");
            return Ok(());
        }

        let mut drafts = Vec::new();
        for url in &self.listing_urls {
            match self.extract_from_url(url).await {
                Ok((method, found)) => {
                    debug!(url = %url, ?method, count = found.len(), "website extracted");
                    drafts.extend(found);
                }
                Err(err) => warn!(url = %url, error = %err, "website crawl failed"),
            }
            self.deps.pause().await;
        }

        for profile in profiles {
            let criteria = normalize(profile);
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
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::NoopExtractor;
    use crate::testing;
    use fundfinder_storage::{MemoryStore, OpportunityStore, StaticTransport};
    use serde_json::json;

    const STRUCTURED: &str = r#"<html><body>
        <div class="grant"><h3><a href="/g/arts">Neighborhood Arts Grant</a></h3>
          <p>Grants up to $5,000 for community arts projects. Eligibility: nonprofit organizations in Ohio.</p></div>
        </body></html>"#;

    const HEADINGS_ONLY: &str = r#"<html><body>
        <h1>About us</h1><p>We are a family foundation.</p>
        <h2>Youth Leadership Fellowship</h2><p>Stipend of $3,000.</p><p>Applications close 2026-09-01.</p>
        <h2>Contact</h2><p>email us</p>
        </body></html>"#;

    struct CannedExtractor;

    #[async_trait]
    impl OpportunityExtractor for CannedExtractor {
        async fn extract(&self, url: &str, _text: &str) -> Vec<OpportunityDraft> {
            let mut draft = OpportunityDraft::new(NAME, stable_source_id(url, "AI Found Grant"), "AI Found Grant", OpportunityCategory::Website);
            draft.location = Some("Nationwide".into());
            vec![draft]
        }
    }

    fn crawler(transport: StaticTransport, store: Arc<MemoryStore>, extractor: Arc<dyn OpportunityExtractor>) -> WebsiteCrawler {
        WebsiteCrawler::new(
            testing::deps(transport, store),
            &SourceSettings {
                base_url: None,
                listing_urls: vec!["https://funder.test/grants".into()],
            },
            extractor,
        )
    }

    #[test]
    fn structural_items_capture_links_and_eligibility() {
        let doc = Html::parse_document(STRUCTURED);
        let drafts = structural_extract(&doc, "https://funder.test/grants").unwrap();
        assert_eq!(drafts.len(), 1);
        assert_eq!(drafts[0].url.as_deref(), Some("https://funder.test/g/arts"));
        assert_eq!(drafts[0].amount_max, Some(5000.0));
        assert!(drafts[0].eligibility.as_deref().unwrap().starts_with("Eligibility: nonprofit"));
    }

    #[test]
    fn heading_scan_keeps_funding_headings_only() {
        let doc = Html::parse_document(HEADINGS_ONLY);
        let drafts = heading_scan(&doc, "https://funder.test/").unwrap();
        assert_eq!(drafts.len(), 1);
        assert_eq!(drafts[0].title, "Youth Leadership Fellowship");
        assert_eq!(drafts[0].amount_min, Some(3000.0));
        assert_eq!(drafts[0].deadline, chrono::NaiveDate::from_ymd_opt(2026, 9, 1));
    }

    #[tokio::test]
    async fn structural_wins_over_ai() {
        let store = Arc::new(MemoryStore::new());
        let c = crawler(
            StaticTransport::new().route("https://funder.test/", STRUCTURED),
            store,
            Arc::new(CannedExtractor),
        );
        let (method, drafts) = c.extract_from_url("https://funder.test/grants").await.unwrap();
        assert_eq!(method, ExtractionMethod::Structural);
        assert_eq!(drafts[0].title, "Neighborhood Arts Grant");
    }

    #[tokio::test]
    async fn ai_runs_before_heading_scan() {
        let c = crawler(
            StaticTransport::new().route("https://funder.test/", HEADINGS_ONLY),
            Arc::new(MemoryStore::new()),
            Arc::new(CannedExtractor),
        );
        let (method, drafts) = c.extract_from_url("https://funder.test/about").await.unwrap();
        assert_eq!(method, ExtractionMethod::Ai);
        assert_eq!(drafts[0].title, "AI Found Grant");
    }

    #[tokio::test]
    async fn empty_ai_falls_back_to_headings() {
        let c = crawler(
            StaticTransport::new().route("https://funder.test/", HEADINGS_ONLY),
            Arc::new(MemoryStore::new()),
            Arc::new(NoopExtractor),
        );
        let (method, drafts) = c.extract_from_url("https://funder.test/about").await.unwrap();
        assert_eq!(method, ExtractionMethod::Headings);
        assert_eq!(drafts.len(), 1);
    }

    #[tokio::test]
    async fn crawl_url_saves_and_matches() {
        let profile = testing::profile(json!({"profile_type": "organization", "state": "OH", "focus_areas": ["arts"]}));
        let store = Arc::new(MemoryStore::with_profiles(vec![profile.clone()]));
        let c = crawler(
            StaticTransport::new().route("https://funder.test/", STRUCTURED),
            store.clone(),
            Arc::new(NoopExtractor),
        );
        let criteria = normalize(&profile);
        let outcome = c.crawl_url("https://funder.test/grants", &criteria, Some(profile.id)).await.unwrap();
        assert_eq!(outcome.candidates, 1);
        assert_eq!(outcome.saved, 1);
        assert_eq!(store.matches_for_profile(profile.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn crawl_url_counts_only_stored_candidates() {
        let profile = testing::profile(json!({"profile_type": "organization", "state": "OH", "focus_areas": ["arts"]}));
        let store = Arc::new(MemoryStore::with_profiles(vec![profile.clone()]));
        store.set_fail_writes(true).await;
        let c = crawler(
            StaticTransport::new().route("https://funder.test/", STRUCTURED),
            store.clone(),
            Arc::new(NoopExtractor),
        );
        let criteria = normalize(&profile);
        let outcome = c.crawl_url("https://funder.test/grants", &criteria, Some(profile.id)).await.unwrap();
        assert_eq!(outcome.candidates, 1);
        assert_eq!(outcome.saved, 0);
        assert!(store.opportunities().await.is_empty());
    }

    #[tokio::test]
    async fn crawl_url_leaves_run_state_untouched() {
        let store = Arc::new(MemoryStore::new());
        let c = crawler(
            StaticTransport::new().route("https://funder.test/", STRUCTURED),
            store.clone(),
            Arc::new(NoopExtractor),
        );
        let criteria = normalize(&testing::profile(json!({"profile_type": "organization"})));
        let outcome = c.crawl_url("https://funder.test/grants", &criteria, None).await.unwrap();
        assert_eq!(outcome.saved, 1);
        assert_eq!(store.opportunities().await.len(), 1);
        let state = c.status().await;
        assert_eq!(state.opportunities_found, 0);
        assert_eq!(state.status, fundfinder_core::CrawlerStatus::Idle);
    }

    #[tokio::test]
    async fn crawl_url_rejects_candidates_under_twenty() {
        // Eligibility and description present, one keyword hit: 5 of 30 points.
        let profile = testing::profile(json!({"profile_type": "individual", "keywords": "arts"}));
        let store = Arc::new(MemoryStore::with_profiles(vec![profile.clone()]));
        let c = crawler(
            StaticTransport::new().route("https://funder.test/", STRUCTURED),
            store.clone(),
            Arc::new(NoopExtractor),
        );
        let criteria = normalize(&profile);
        let doc = Html::parse_document(STRUCTURED);
        let drafts = structural_extract(&doc, "https://funder.test/grants").unwrap();
        assert_eq!(fundfinder_core::score(&drafts[0], &criteria).score, 17);

        let outcome = c.crawl_url("https://funder.test/grants", &criteria, Some(profile.id)).await.unwrap();
        assert_eq!(outcome.candidates, 1);
        assert_eq!(outcome.saved, 0);
        assert!(store.opportunities().await.is_empty());
        assert!(store.matches().await.is_empty());
    }

    #[tokio::test]
    async fn crawl_url_surfaces_fetch_errors() {
        let c = crawler(
            StaticTransport::new().route_failure("https://down.test/", "connection refused"),
            Arc::new(MemoryStore::new()),
            Arc::new(NoopExtractor),
        );
        let err = c
            .crawl_url("https://down.test/x", &MatchingCriteria::default(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, CrawlerError::Fetch(_)));
    }

    #[tokio::test]
    async fn listing_crawl_matches_every_profile() {
        let a = testing::profile(json!({"profile_type": "organization"}));
        let b = testing::profile(json!({"profile_type": "nonprofit", "keywords": "arts"}));
        let store = Arc::new(MemoryStore::with_profiles(vec![a, b]));
        let c = crawler(
            StaticTransport::new().route("https://funder.test/", STRUCTURED),
            store.clone(),
            Arc::new(NoopExtractor),
        );
        let outcome = c.run(&[]).await;
        assert!(outcome.success);
        assert_eq!(outcome.opportunities_found, 1);
        assert_eq!(store.stats().await.unwrap().matches, 2);
    }
}
