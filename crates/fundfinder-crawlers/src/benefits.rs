//! Catalog of well-known federal assistance programs for individuals.

use async_trait::async_trait;
use fundfinder_core::{normalize, MatchingCriteria, OpportunityCategory, OpportunityDraft, Profile};
use tracing::debug;

use crate::{persist_qualifying, Crawler, CrawlerDeps, CrawlerError, CrawlerRuntime};

pub const NAME: &str = "benefits-registry";
pub const THRESHOLD: u8 = 25;

struct BenefitProgram {
    id: &'static str,
    title: &'static str,
    agency: &'static str,
    description: &'static str,
    eligibility: &'static str,
    focus_areas: &'static [&'static str],
    url: &'static str,
    location: &'static str,
    amount_max: Option<f64>,
    applies: fn(&MatchingCriteria) -> bool,
}

const NATIONWIDE: &str = "Available nationally in all states";
/// Programs whose availability depends on a local administering agency.
const LOCAL_AGENCY: &str = "Through local administering agencies where funded";

const PROGRAMS: &[BenefitProgram] = &[
    BenefitProgram {
        id: "snap",
        title: "Supplemental Nutrition Assistance Program (SNAP)",
        agency: "U.S. Department of Agriculture",
        description: "Monthly food assistance for low-income households to buy groceries.",
        eligibility: "Low-income individuals and households meeting income limits",
        focus_areas: &["food security", "basic needs"],
        url: "https://www.fns.usda.gov/snap",
        location: NATIONWIDE,
        amount_max: None,
        applies: |c| c.low_income,
    },
    BenefitProgram {
        id: "liheap",
        title: "Low Income Home Energy Assistance Program (LIHEAP)",
        agency: "U.S. Department of Health and Human Services",
        description: "Help paying heating and cooling bills for low-income households, with priority for seniors and people with disabilities.",
        eligibility: "Low-income households, including seniors and families",
        focus_areas: &["energy", "utilities", "basic needs"],
        url: "https://www.acf.hhs.gov/ocs/programs/liheap",
        location: NATIONWIDE,
        amount_max: None,
        applies: |c| c.low_income || c.senior,
    },
    BenefitProgram {
        id: "wic",
        title: "Women, Infants, and Children (WIC)",
        agency: "U.S. Department of Agriculture",
        description: "Nutrition assistance and health referrals for low-income women, new mothers and young children.",
        eligibility: "Pregnant or postpartum women and families with children under five",
        focus_areas: &["nutrition", "maternal health", "children"],
        url: "https://www.fns.usda.gov/wic",
        location: NATIONWIDE,
        amount_max: None,
        applies: |c| c.low_income && (c.women || c.single_parent),
    },
    BenefitProgram {
        id: "medicaid",
        title: "Medicaid",
        agency: "Centers for Medicare & Medicaid Services",
        description: "Health coverage for low-income adults, children, and people with disabilities.",
        eligibility: "Low-income individuals and families, people with disabilities",
        focus_areas: &["health", "health care"],
        url: "https://www.medicaid.gov",
        location: NATIONWIDE,
        amount_max: None,
        applies: |c| c.low_income || c.disability || !c.health_conditions.is_empty(),
    },
    BenefitProgram {
        id: "ssi",
        title: "Supplemental Security Income (SSI)",
        agency: "Social Security Administration",
        description: "Monthly payments for seniors and people with disabilities who have limited income.",
        eligibility: "Individuals aged 65 or older, blind, or with a disability and limited resources",
        focus_areas: &["income support", "disability"],
        url: "https://www.ssa.gov/ssi",
        location: NATIONWIDE,
        amount_max: None,
        applies: |c| c.disability || c.senior,
    },
    BenefitProgram {
        id: "pell-grant",
        title: "Federal Pell Grant",
        agency: "U.S. Department of Education",
        description: "Need-based grant for undergraduate students that does not have to be repaid. Awards up to $7,395 per year.",
        eligibility: "Undergraduate students with financial need",
        focus_areas: &["education", "higher education"],
        url: "https://studentaid.gov/understand-aid/types/grants/pell",
        location: NATIONWIDE,
        amount_max: Some(7395.0),
        applies: |c| c.student,
    },
    BenefitProgram {
        id: "trio-sss",
        title: "TRIO Student Support Services",
        agency: "U.S. Department of Education",
        description: "Tutoring, counseling and grant aid for first-generation and low-income college students.",
        eligibility: "First-generation students, low-income students, and students with disabilities",
        focus_areas: &["education", "higher education"],
        url: "https://www2.ed.gov/programs/triostudsupp",
        location: NATIONWIDE,
        amount_max: None,
        applies: |c| c.student && (c.first_generation || c.low_income || c.disability),
    },
    BenefitProgram {
        id: "chafee-etv",
        title: "Chafee Education and Training Vouchers",
        agency: "U.S. Department of Health and Human Services",
        description: "Up to $5,000 per year for college or vocational training for current and former foster youth.",
        eligibility: "Current and former foster youth under 26",
        focus_areas: &["education", "foster care"],
        url: "https://www.acf.hhs.gov/cb/grant-funding/john-h-chafee-foster-care-program-successful-transition-adulthood",
        location: NATIONWIDE,
        amount_max: Some(5000.0),
        applies: |c| c.foster_youth,
    },
    BenefitProgram {
        id: "va-disability",
        title: "VA Disability Compensation",
        agency: "U.S. Department of Veterans Affairs",
        description: "Tax-free monthly payments for veterans with service-connected disabilities.",
        eligibility: "Veterans with a service-connected disability",
        focus_areas: &["veterans", "disability"],
        url: "https://www.va.gov/disability",
        location: NATIONWIDE,
        amount_max: None,
        applies: |c| c.veteran,
    },
    BenefitProgram {
        id: "gi-bill",
        title: "Post-9/11 GI Bill",
        agency: "U.S. Department of Veterans Affairs",
        description: "Tuition, housing and book stipends for veterans pursuing education or training.",
        eligibility: "Veterans and service members with qualifying active duty service",
        focus_areas: &["veterans", "education"],
        url: "https://www.va.gov/education/about-gi-bill-benefits/post-9-11",
        location: NATIONWIDE,
        amount_max: None,
        applies: |c| c.veteran,
    },
    BenefitProgram {
        id: "housing-choice-voucher",
        title: "Housing Choice Voucher Program (Section 8)",
        agency: "U.S. Department of Housing and Urban Development",
        description: "Rental assistance for very low-income families, seniors and people with disabilities.",
        eligibility: "Very low-income families and individuals",
        focus_areas: &["housing", "basic needs"],
        url: "https://www.hud.gov/topics/housing_choice_voucher_program_section_8",
        location: LOCAL_AGENCY,
        amount_max: None,
        applies: |c| c.low_income || c.single_parent,
    },
    BenefitProgram {
        id: "lifeline",
        title: "Lifeline Phone and Internet Discount",
        agency: "Federal Communications Commission",
        description: "Monthly discount on phone or internet service for low-income households.",
        eligibility: "Low-income households and residents of Tribal lands",
        focus_areas: &["broadband", "utilities"],
        url: "https://www.lifelinesupport.org",
        location: NATIONWIDE,
        amount_max: None,
        applies: |c| c.low_income || c.tribal,
    },
    BenefitProgram {
        id: "head-start",
        title: "Head Start",
        agency: "U.S. Department of Health and Human Services",
        description: "Free early learning, health and family services for children from low-income families.",
        eligibility: "Families with young children and low income, including foster families",
        focus_areas: &["early childhood", "education", "children"],
        url: "https://eclkc.ohs.acf.hhs.gov",
        location: LOCAL_AGENCY,
        amount_max: None,
        applies: |c| c.single_parent || (c.low_income && c.foster_youth),
    },
];

fn program_draft(program: &BenefitProgram) -> OpportunityDraft {
    let mut draft = OpportunityDraft::new(NAME, program.id, program.title, OpportunityCategory::Benefit);
    draft.sponsor = Some(program.agency.to_string());
    draft.description = Some(program.description.to_string());
    draft.eligibility = Some(program.eligibility.to_string());
    draft.focus_areas = program.focus_areas.iter().map(|f| f.to_string()).collect();
    draft.url = Some(program.url.to_string());
    draft.amount_max = program.amount_max;
    draft.location = Some(program.location.to_string());
    draft
}

/// Catalog entries whose predicate accepts `criteria`, in catalog order.
pub fn candidate_programs(criteria: &MatchingCriteria) -> Vec<OpportunityDraft> {
    PROGRAMS
        .iter()
        .filter(|p| (p.applies)(criteria))
        .map(program_draft)
        .collect()
}

pub struct BenefitsCrawler {
    runtime: CrawlerRuntime,
    deps: CrawlerDeps,
}

impl BenefitsCrawler {
    pub fn new(deps: CrawlerDeps) -> Self {
        Self {
            runtime: CrawlerRuntime::new(NAME, "Matches individuals to federal assistance programs"),
            deps,
        }
    }
}

#[async_trait]
impl Crawler for BenefitsCrawler {
    fn runtime(&self) -> &CrawlerRuntime {
        &self.runtime
    }

    fn deps(&self) -> &CrawlerDeps {
        &self.deps
    }

    async fn crawl(&self, profiles: &[Profile]) -> Result<(), CrawlerError> {
        for profile in profiles {
            let criteria = normalize(profile);
            if criteria.is_organization() {
                debug!(profile_id = %profile.id, "skipping organization profile");
                continue;
            }
            for draft in candidate_programs(&criteria) {
                persist_qualifying(
                    &self.runtime,
                    self.deps.store.as_ref(),
                    &draft,
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
    use crate::testing;
    use fundfinder_storage::{MemoryStore, OpportunityStore, StaticTransport};
    use serde_json::json;
    use std::sync::Arc;

    #[test]
    fn veteran_student_sees_education_and_va_programs() {
        let criteria = normalize(&testing::profile(json!({"veteran": true, "student": "yes"})));
        let ids: Vec<String> = candidate_programs(&criteria).into_iter().map(|d| d.source_id).collect();
        assert_eq!(ids, vec!["pell-grant", "va-disability", "gi-bill"]);
    }

    #[test]
    fn catalog_ids_are_unique() {
        let mut ids: Vec<&str> = PROGRAMS.iter().map(|p| p.id).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), PROGRAMS.len());
    }

    #[tokio::test]
    async fn organizations_are_skipped() {
        let org = testing::profile(json!({"profile_type": "organization", "low_income": true}));
        let store = Arc::new(MemoryStore::with_profiles(vec![org]));
        let crawler = BenefitsCrawler::new(testing::deps(StaticTransport::new(), store.clone()));
        let outcome = crawler.run(&[]).await;
        assert!(outcome.success);
        assert_eq!(store.stats().await.unwrap().opportunities, 0);
    }

    #[tokio::test]
    async fn locally_administered_programs_can_fall_under_threshold() {
        let parent = testing::profile(json!({"profile_type": "individual", "single_parent": true}));
        let criteria = normalize(&parent);
        let drafts = candidate_programs(&criteria);
        let ids: Vec<&str> = drafts.iter().map(|d| d.source_id.as_str()).collect();
        assert_eq!(ids, vec!["housing-choice-voucher", "head-start"]);
        // Housing: eligibility only, 15 of 75 points.
        assert_eq!(fundfinder_core::score(&drafts[0], &criteria).score, 20);

        let store = Arc::new(MemoryStore::with_profiles(vec![parent]));
        let crawler = BenefitsCrawler::new(testing::deps(StaticTransport::new(), store.clone()));
        let outcome = crawler.run(&[]).await;
        assert!(outcome.success);
        assert_eq!(outcome.opportunities_found, 0);
        assert_eq!(store.stats().await.unwrap().opportunities, 0);
    }

    #[tokio::test]
    async fn low_income_individual_gets_matches_above_threshold() {
        let person = testing::profile(json!({"profile_type": "individual", "low_income": true, "state": "Ohio"}));
        let store = Arc::new(MemoryStore::with_profiles(vec![person.clone()]));
        let crawler = BenefitsCrawler::new(testing::deps(StaticTransport::new(), store.clone()));
        let outcome = crawler.run(&[]).await;
        assert!(outcome.success);
        // snap, liheap, medicaid, section 8, lifeline
        assert_eq!(outcome.opportunities_found, 5);

        let matches = store.matches_for_profile(person.id).await.unwrap();
        assert_eq!(matches.len(), 5);
        assert!(matches.iter().all(|m| m.record.score >= THRESHOLD && m.record.category == "benefit"));
        let snap = matches.iter().find(|m| m.opportunity.source_id == "snap").unwrap();
        assert!(snap.record.reasons.contains(&"Targets low-income applicants".to_string()));
    }
}
