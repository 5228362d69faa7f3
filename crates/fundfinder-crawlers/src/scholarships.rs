//! University scholarship listings scraped from configured pages.

use async_trait::async_trait;
use fundfinder_core::{normalize, OpportunityCategory, OpportunityDraft, Profile};
use scraper::Html;
use tracing::{debug, info, warn};

use crate::parse::{
    element_text, eligibility_clause, parse_amount_range, parse_deadline, resolve_url, select_first_attr, select_first_text,
    selector, stable_source_id, truncate_chars,
};
use crate::{persist_qualifying, Crawler, CrawlerDeps, CrawlerError, CrawlerRuntime, SourceSettings};

pub const NAME: &str = "university-scholarships";
pub const THRESHOLD: u8 = 25;

/// Tried in order; the first selector that yields titled items wins.
const ITEM_SELECTORS: &[&str] = &[
    ".scholarship",
    ".scholarship-item",
    ".views-row",
    "article",
    "li.scholarship",
    "tr",
];
const TITLE_SELECTOR: &str = "h2, h3, h4, a, strong";
const MIN_TITLE_CHARS: usize = 4;
const MAX_DESCRIPTION_CHARS: usize = 600;
const DEFAULT_ELIGIBILITY: &str = "Enrolled and incoming students";

/// Extract scholarship candidates from one listing page.
pub fn parse_listing(html: &str, page_url: &str) -> Result<Vec<OpportunityDraft>, CrawlerError> {
    let document = Html::parse_document(html);
    let sponsor = {
        let title = selector("title")?;
        document.select(&title).find_map(element_text)
    };

    for item_selector in ITEM_SELECTORS {
        let sel = selector(item_selector)?;
        let mut drafts = Vec::new();
        for item in document.select(&sel) {
            let Some(title) = select_first_text(item, TITLE_SELECTOR)? else {
                continue;
            };
            if title.chars().count() < MIN_TITLE_CHARS {
                continue;
            }
            let text = element_text(item).unwrap_or_default();
            let link = select_first_attr(item, "a[href]", "href")?
                .and_then(|href| resolve_url(page_url, &href))
                .unwrap_or_else(|| page_url.to_string());

            let mut draft = OpportunityDraft::new(
                NAME,
                stable_source_id(&link, &title),
                title,
                OpportunityCategory::Scholarship,
            );
            let (min, max) = parse_amount_range(&text);
            draft.amount_min = min;
            draft.amount_max = max;
            draft.deadline = parse_deadline(&text);
            draft.description = Some(truncate_chars(&text, MAX_DESCRIPTION_CHARS));
            draft.eligibility =
                Some(eligibility_clause(&text).unwrap_or_else(|| DEFAULT_ELIGIBILITY.to_string()));
            draft.sponsor = sponsor.clone();
            draft.url = Some(link);
            drafts.push(draft);
        }
        if !drafts.is_empty() {
            debug!(page_url, selector = item_selector, count = drafts.len(), "scholarship items found");
            return Ok(drafts);
        }
    }
    Ok(Vec::new())
}

pub struct ScholarshipsCrawler {
    runtime: CrawlerRuntime,
    deps: CrawlerDeps,
    listing_urls: Vec<String>,
}

impl ScholarshipsCrawler {
    pub fn new(deps: CrawlerDeps, settings: &SourceSettings) -> Self {
        Self {
            runtime: CrawlerRuntime::new(NAME, "Scholarships from university financial-aid listings"),
            deps,
            listing_urls: settings.listing_urls.clone(),
        }
    }

    async fn collect(&self) -> Vec<OpportunityDraft> {
        let mut drafts = Vec::new();
        for url in &self.listing_urls {
            match self.deps.http.fetch(url).await {
                Ok(html) => match parse_listing(&html, url) {
                    Ok(found) => drafts.extend(found),
                    Err(err) => warn!(url = %url, error = %err, "could not parse scholarship listing"),
                },
                Err(err) => warn!(url = %url, error = %err, "could not fetch scholarship listing"),
            }
            self.deps.pause().await;
        }
        drafts
    }
}

#[async_trait]
impl Crawler for ScholarshipsCrawler {
    fn runtime(&self) -> &CrawlerRuntime {
        &self.runtime
    }

    fn deps(&self) -> &CrawlerDeps {
        &self.deps
    }

    async fn crawl(&self, profiles: &[Profile]) -> Result<(), CrawlerError> {
        let students: Vec<_> = profiles
            .iter()
            .map(|p| (p.id, normalize(p)))
            .filter(|(_, criteria)| criteria.student)
            .collect();
        if students.is_empty() {
            debug!("no student profiles");
            return Ok(());
        }
        if self.listing_urls.is_empty() {
            info!("no scholarship listing urls configured");
            return Ok(());
        }

        // Listing pages are profile-independent; fetch once per run.
        let drafts = self.collect().await;
        for (profile_id, criteria) in &students {
            for draft in &drafts {
                persist_qualifying(
                    &self.runtime,
                    self.deps.store.as_ref(),
                    draft,
                    criteria,
                    Some(*profile_id),
                    THRESHOLD,
                )
                .await;
            }
        }
        Ok(())
    }
}
