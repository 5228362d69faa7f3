//! Clean-energy and efficiency incentives: a state program API plus national credits.

use async_trait::async_trait;
use fundfinder_core::criteria::state_name_for_code;
use fundfinder_core::{normalize, MatchingCriteria, OpportunityCategory, OpportunityDraft, Profile};
use reqwest::Url;
use serde_json::Value as JsonValue;
use tracing::{debug, warn};

use crate::parse::{json_f64, json_str, json_string, parse_amount_range, parse_deadline};
use crate::{persist_qualifying, Crawler, CrawlerDeps, CrawlerError, CrawlerRuntime, SourceSettings};

pub const NAME: &str = "energy-incentives";
pub const THRESHOLD: u8 = 25;
pub const DEFAULT_BASE_URL: &str = "https://programs.dsireusa.org/api/v1";

const ENERGY_SIGNALS: &[&str] = &[
    "energy",
    "solar",
    "climate",
    "sustainab",
    "efficiency",
    "renewable",
    "environment",
];

/// True when the profile shows any interest in energy or sustainability.
pub fn has_energy_signal(criteria: &MatchingCriteria) -> bool {
    criteria.energy_interest
        || criteria
            .focus_areas
            .iter()
            .chain(criteria.keywords.iter())
            .any(|term| ENERGY_SIGNALS.iter().any(|s| term.contains(s)))
}

struct NationalIncentive {
    id: &'static str,
    title: &'static str,
    sponsor: &'static str,
    description: &'static str,
    eligibility: &'static str,
    focus_areas: &'static [&'static str],
    url: &'static str,
}

const NATIONAL: &[NationalIncentive] = &[
    NationalIncentive {
        id: "us-residential-clean-energy-credit",
        title: "Residential Clean Energy Credit",
        sponsor: "Internal Revenue Service",
        description: "Federal tax credit of 30% of the cost of solar, wind, geothermal and battery storage installed on a home.",
        eligibility: "Homeowners and individual taxpayers",
        focus_areas: &["solar", "renewable energy", "energy"],
        url: "https://www.irs.gov/credits-deductions/residential-clean-energy-credit",
    },
    NationalIncentive {
        id: "us-energy-efficient-home-improvement-credit",
        title: "Energy Efficient Home Improvement Credit",
        sponsor: "Internal Revenue Service",
        description: "Tax credit up to $3,200 per year for heat pumps, insulation, windows and home energy audits.",
        eligibility: "Homeowners and individual taxpayers",
        focus_areas: &["energy efficiency", "energy"],
        url: "https://www.irs.gov/credits-deductions/energy-efficient-home-improvement-credit",
    },
    NationalIncentive {
        id: "us-weatherization-assistance",
        title: "Weatherization Assistance Program",
        sponsor: "U.S. Department of Energy",
        description: "Free home weatherization and efficiency upgrades for low-income households.",
        eligibility: "Low-income households and families",
        focus_areas: &["energy efficiency", "housing", "energy"],
        url: "https://www.energy.gov/scep/wap/weatherization-assistance-program",
    },
    NationalIncentive {
        id: "us-reap",
        title: "Rural Energy for America Program (REAP)",
        sponsor: "U.S. Department of Agriculture",
        description: "Grants and loan guarantees for renewable energy systems and energy efficiency improvements in rural small businesses and agricultural producers.",
        eligibility: "Agricultural producers and rural small business organizations",
        focus_areas: &["renewable energy", "energy efficiency", "agriculture", "rural development"],
        url: "https://www.rd.usda.gov/programs-services/energy-programs/rural-energy-america-program",
    },
    NationalIncentive {
        id: "us-commercial-clean-vehicle-credit",
        title: "Commercial Clean Vehicle Credit",
        sponsor: "Internal Revenue Service",
        description: "Tax credit up to $40,000 for businesses and tax-exempt organizations that buy qualified clean vehicles.",
        eligibility: "Businesses and tax-exempt nonprofit organizations",
        focus_areas: &["clean transportation", "climate", "energy"],
        url: "https://www.irs.gov/credits-deductions/commercial-clean-vehicle-credit",
    },
];

fn national_draft(incentive: &NationalIncentive) -> OpportunityDraft {
    let mut draft = OpportunityDraft::new(NAME, incentive.id, incentive.title, OpportunityCategory::EnergyIncentive);
    draft.sponsor = Some(incentive.sponsor.to_string());
    draft.description = Some(incentive.description.to_string());
    let (min, max) = parse_amount_range(incentive.description);
    draft.amount_min = min;
    draft.amount_max = max;
    draft.eligibility = Some(incentive.eligibility.to_string());
    draft.focus_areas = incentive.focus_areas.iter().map(|f| f.to_string()).collect();
    draft.url = Some(incentive.url.to_string());
    draft.location = Some("Nationwide".to_string());
    draft
}

fn program_draft(program: &JsonValue) -> Option<OpportunityDraft> {
    let id = json_string(program, &["id"])?;
    let name = json_str(program, &["name"])?;
    let mut draft = OpportunityDraft::new(NAME, format!("program-{id}"), name, OpportunityCategory::EnergyIncentive);
    draft.sponsor = json_str(program, &["administrator"]).map(ToString::to_string);
    draft.description = json_str(program, &["summary"]).map(ToString::to_string);
    draft.url = json_str(program, &["url"]).map(ToString::to_string);

    if let Some(amount) = json_f64(program, &["amount"]) {
        draft.amount_max = Some(amount);
    } else if let Some(text) = json_str(program, &["amount"]) {
        let (min, max) = parse_amount_range(text);
        draft.amount_min = min;
        draft.amount_max = max;
    }
    draft.deadline = json_str(program, &["end_date"]).and_then(parse_deadline);

    let mut focus_areas = vec!["energy".to_string()];
    if let Some(category) = json_str(program, &["category"]) {
        focus_areas.insert(0, category.to_lowercase());
    }
    draft.focus_areas = focus_areas;

    draft.location = json_str(program, &["state"]).map(|code| match state_name_for_code(code) {
        Some(name) => format!("{name} ({code})"),
        None => code.to_string(),
    });
    Some(draft)
}

pub struct EnergyIncentivesCrawler {
    runtime: CrawlerRuntime,
    deps: CrawlerDeps,
    base_url: String,
}

impl EnergyIncentivesCrawler {
    pub fn new(deps: CrawlerDeps, settings: &SourceSettings) -> Self {
        Self {
            runtime: CrawlerRuntime::new(NAME, "State and federal clean-energy incentives"),
            deps,
            base_url: settings.base_url_or(DEFAULT_BASE_URL),
        }
    }

    async fn state_programs(&self, state: &str) -> Result<Vec<OpportunityDraft>, CrawlerError> {
        let url = Url::parse_with_params(&format!("{}/programs", self.base_url), &[("state", state)])
            .map_err(|e| CrawlerError::Parse(e.to_string()))?;
        let body: JsonValue = self.deps.http.fetch_json(url.as_str()).await?;
        let programs = body
            .get("programs")
            .and_then(JsonValue::as_array)
            .cloned()
            .unwrap_or_default();
        Ok(programs.iter().filter_map(program_draft).collect())
    }
}

#[async_trait]
impl Crawler for EnergyIncentivesCrawler {
    fn runtime(&self) -> &CrawlerRuntime {
        &self.runtime
    }

    fn deps(&self) -> &CrawlerDeps {
        &self.deps
    }

    async fn crawl(&self, profiles: &[Profile]) -> Result<(), CrawlerError> {
        for profile in profiles {
            let criteria = normalize(profile);
            if !has_energy_signal(&criteria) {
                debug!(profile_id = %profile.id, "no energy signal");
                continue;
            }

            let mut drafts: Vec<OpportunityDraft> = NATIONAL.iter().map(national_draft).collect();
            if let Some(state) = criteria.state.as_deref() {
                match self.state_programs(state).await {
                    Ok(found) => drafts.extend(found),
                    Err(err) => warn!(state, error = %err, "state incentive lookup failed"),
                }
                self.deps.pause().await;
            }

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
