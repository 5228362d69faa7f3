//! Rule-based relevance scoring of one opportunity against one criteria set.
//!
//! Each structured dimension is counted in the denominator only when the
//! opportunity exposes the attribute it reads. Special-population bonuses add
//! to the numerator alone.

use serde::{Deserialize, Serialize};

use crate::criteria::MatchingCriteria;
use crate::OpportunityDraft;

pub const GEOGRAPHY_POINTS: u32 = 20;
pub const ELIGIBILITY_POINTS: u32 = 15;
pub const FOCUS_AREA_CAP: u32 = 25;
pub const FOCUS_AREA_STEP: u32 = 10;
pub const KEYWORD_CAP: u32 = 15;
pub const KEYWORD_STEP: u32 = 5;
pub const BONUS_POINTS: u32 = 10;
pub const NEUTRAL_SCORE: u8 = 50;

const NATIONAL_MARKERS: &[&str] = &[
    "national",
    "nationwide",
    "all states",
    "all 50 states",
    "united states",
];
const NONPROFIT_MARKERS: &[&str] = &["nonprofit", "non-profit", "501(c)", "organization", "organisation"];
const INDIVIDUAL_MARKERS: &[&str] = &["individual", "resident", "person", "citizen", "household", "family"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreResult {
    pub score: u8,
    pub reasons: Vec<String>,
    pub matched_criteria: u32,
}

#[derive(Default)]
struct Tally {
    points: u32,
    max_points: u32,
    reasons: Vec<String>,
    matched: u32,
}

impl Tally {
    fn hit(&mut self, points: u32, reason: String) {
        self.points += points;
        self.reasons.push(reason);
        self.matched += 1;
    }
}

/// Score `opportunity` for `criteria`. Deterministic for identical inputs.
pub fn score(opportunity: &OpportunityDraft, criteria: &MatchingCriteria) -> ScoreResult {
    let mut tally = Tally::default();

    score_geography(opportunity, criteria, &mut tally);
    score_eligibility(opportunity, criteria, &mut tally);
    score_focus_areas(opportunity, criteria, &mut tally);
    score_keywords(opportunity, criteria, &mut tally);
    apply_bonuses(opportunity, criteria, &mut tally);

    let score = if tally.max_points > 0 {
        let ratio = tally.points as f64 / tally.max_points as f64 * 100.0;
        ratio.min(100.0).round() as u8
    } else {
        NEUTRAL_SCORE
    };

    ScoreResult {
        score,
        reasons: tally.reasons,
        matched_criteria: tally.matched,
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|s| !s.is_empty())
}

fn score_geography(opportunity: &OpportunityDraft, criteria: &MatchingCriteria, tally: &mut Tally) {
    let Some(location) = non_empty(opportunity.location.as_deref()) else {
        return;
    };
    tally.max_points += GEOGRAPHY_POINTS;
    let lower = location.to_lowercase();

    if NATIONAL_MARKERS.iter().any(|m| lower.contains(m)) {
        tally.hit(GEOGRAPHY_POINTS, "Available nationally".to_string());
        return;
    }

    let Some(state) = criteria.state.as_deref() else {
        return;
    };
    let code_hit = contains_word(location, state);
    let name_hit = criteria
        .state_name()
        .map(|name| lower.contains(&name.to_lowercase()))
        .unwrap_or(false);
    if code_hit || name_hit {
        tally.hit(GEOGRAPHY_POINTS, format!("Available in {state}"));
    }
}

/// Case-sensitive whole-token check, so "OR" does not match "for".
fn contains_word(haystack: &str, word: &str) -> bool {
    haystack
        .split(|c: char| !c.is_ascii_alphanumeric())
        .any(|token| token == word)
}

fn score_eligibility(opportunity: &OpportunityDraft, criteria: &MatchingCriteria, tally: &mut Tally) {
    let Some(eligibility) = non_empty(opportunity.eligibility.as_deref()) else {
        return;
    };
    tally.max_points += ELIGIBILITY_POINTS;
    let lower = eligibility.to_lowercase();

    if criteria.is_organization() {
        if NONPROFIT_MARKERS.iter().any(|m| lower.contains(m)) {
            tally.hit(ELIGIBILITY_POINTS, "Eligible for nonprofit organizations".to_string());
        }
    } else if criteria.student && lower.contains("student") {
        tally.hit(ELIGIBILITY_POINTS, "Eligible for students".to_string());
    } else if INDIVIDUAL_MARKERS.iter().any(|m| lower.contains(m)) {
        tally.hit(ELIGIBILITY_POINTS, "Eligible for individuals".to_string());
    }
}

fn score_focus_areas(opportunity: &OpportunityDraft, criteria: &MatchingCriteria, tally: &mut Tally) {
    let offered: Vec<String> = opportunity
        .focus_areas
        .iter()
        .map(|f| f.trim().to_lowercase())
        .filter(|f| !f.is_empty())
        .collect();
    if offered.is_empty() {
        return;
    }
    tally.max_points += FOCUS_AREA_CAP;

    let matching: Vec<&str> = criteria
        .focus_areas
        .iter()
        .filter(|wanted| {
            offered
                .iter()
                .any(|o| o.contains(wanted.as_str()) || wanted.contains(o.as_str()))
        })
        .map(String::as_str)
        .collect();

    if !matching.is_empty() {
        let points = (matching.len() as u32 * FOCUS_AREA_STEP).min(FOCUS_AREA_CAP);
        tally.hit(points, format!("Focus area match: {}", matching.join(", ")));
    }
}

fn score_keywords(opportunity: &OpportunityDraft, criteria: &MatchingCriteria, tally: &mut Tally) {
    let Some(description) = non_empty(opportunity.description.as_deref()) else {
        return;
    };
    tally.max_points += KEYWORD_CAP;

    let text = format!("{} {}", opportunity.title, description).to_lowercase();
    let matching: Vec<&str> = criteria
        .keywords
        .iter()
        .filter(|k| !k.is_empty() && text.contains(k.as_str()))
        .map(String::as_str)
        .collect();

    if !matching.is_empty() {
        let points = (matching.len() as u32 * KEYWORD_STEP).min(KEYWORD_CAP);
        tally.hit(points, format!("Keyword match: {}", matching.join(", ")));
    }
}

fn apply_bonuses(opportunity: &OpportunityDraft, criteria: &MatchingCriteria, tally: &mut Tally) {
    let text = format!(
        "{} {} {}",
        opportunity.title,
        opportunity.description.as_deref().unwrap_or_default(),
        opportunity.eligibility.as_deref().unwrap_or_default()
    )
    .to_lowercase();
    let mentions = |needles: &[&str]| needles.iter().any(|n| text.contains(n));

    let bonuses: [(bool, &[&str], &str); 12] = [
        (criteria.veteran, &["veteran"], "Veteran-specific opportunity"),
        (criteria.disability, &["disab"], "Supports people with disabilities"),
        (
            criteria.low_income,
            &["low-income", "low income", "financial need"],
            "Targets low-income applicants",
        ),
        (
            criteria.first_generation,
            &["first-generation", "first generation"],
            "Supports first-generation students",
        ),
        (criteria.minority, &["minority", "underrepresented"], "Supports underrepresented groups"),
        (criteria.women, &["women", "woman"], "Supports women"),
        (criteria.rural, &["rural"], "Rural focus"),
        (criteria.faith_based, &["faith"], "Open to faith-based applicants"),
        (criteria.senior, &["senior", "older adult"], "Supports seniors"),
        (criteria.single_parent, &["single parent"], "Supports single parents"),
        (criteria.foster_youth, &["foster"], "Supports foster youth"),
        (criteria.tribal, &["tribal", "native american"], "Supports tribal communities"),
    ];

    for (flag, needles, reason) in bonuses {
        if flag && mentions(needles) {
            tally.hit(BONUS_POINTS, reason.to_string());
        }
    }

    if let Some(condition) = criteria
        .health_conditions
        .iter()
        .find(|c| text.contains(&c.to_lowercase()))
    {
        tally.hit(BONUS_POINTS, format!("Health condition support: {condition}"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::OpportunityCategory;

    fn draft() -> OpportunityDraft {
        OpportunityDraft::new("test", "1", "Community Grant", OpportunityCategory::Website)
    }

    #[test]
    fn opportunity_without_structured_attributes_scores_neutral() {
        let result = score(&draft(), &MatchingCriteria::default());
        assert_eq!(result.score, 50);
        assert!(result.reasons.is_empty());
        assert_eq!(result.matched_criteria, 0);
    }

    #[test]
    fn national_location_contributes_full_geography() {
        let mut opp = draft();
        opp.location = Some("National programs available in all states".to_string());
        let result = score(&opp, &MatchingCriteria::default());
        assert_eq!(result.reasons, vec!["Available nationally".to_string()]);
        assert_eq!(result.score, 100);
    }

    #[test]
    fn state_specific_location_matches_code_or_name() {
        let criteria = MatchingCriteria {
            state: Some("OR".to_string()),
            ..Default::default()
        };
        let mut opp = draft();
        opp.location = Some("Residents of Oregon".to_string());
        assert_eq!(score(&opp, &criteria).reasons, vec!["Available in OR".to_string()]);

        opp.location = Some("Portland, OR".to_string());
        assert_eq!(score(&opp, &criteria).score, 100);

        opp.location = Some("Open for Texas applicants".to_string());
        let miss = score(&opp, &criteria);
        assert_eq!(miss.score, 0);
        assert!(miss.reasons.is_empty());
    }

    #[test]
    fn focus_area_dimension_is_capped() {
        let criteria = MatchingCriteria {
            focus_areas: vec!["health".into(), "education".into(), "youth".into(), "arts".into()],
            ..Default::default()
        };
        let mut opp = draft();
        opp.focus_areas = vec!["Health".into(), "Education".into(), "Youth".into(), "Arts".into()];
        // An unmatched geography dimension adds 20 to the denominator: 25/45.
        opp.location = Some("Texas".to_string());
        let result = score(&opp, &criteria);
        assert_eq!(result.score, (25.0f64 / 45.0 * 100.0).round() as u8);
        assert_eq!(
            result.reasons,
            vec!["Focus area match: health, education, youth, arts".to_string()]
        );
    }

    #[test]
    fn keyword_dimension_scales_and_caps() {
        let criteria = MatchingCriteria {
            keywords: vec!["music".into(), "after-school".into()],
            ..Default::default()
        };
        let mut opp = draft();
        opp.description = Some("Funding for after-school music programs".to_string());
        let result = score(&opp, &criteria);
        // 10 of 15.
        assert_eq!(result.score, 67);
        assert_eq!(result.matched_criteria, 1);
    }

    #[test]
    fn special_population_bonuses_stack_outside_denominator() {
        let criteria = MatchingCriteria {
            veteran: true,
            disability: true,
            ..Default::default()
        };
        let mut opp = draft();
        opp.description = Some("Support for veterans with disabilities".to_string());
        let result = score(&opp, &criteria);
        // Keywords dimension contributes 0/15, bonuses add 20 to the numerator.
        assert_eq!(result.score, 100);
        assert_eq!(
            result.reasons,
            vec![
                "Veteran-specific opportunity".to_string(),
                "Supports people with disabilities".to_string()
            ]
        );
        assert_eq!(result.matched_criteria, 2);

        opp.location = Some("Ohio".to_string());
        opp.eligibility = Some("Open to veterans".to_string());
        // Denominator 20 + 15 + 15 = 50, numerator 20 (no structured hits).
        assert_eq!(score(&opp, &criteria).score, 40);
    }

    #[test]
    fn eligibility_prefers_nonprofit_wording_for_organizations() {
        let criteria = MatchingCriteria {
            is_nonprofit: true,
            ..Default::default()
        };
        let mut opp = draft();
        opp.eligibility = Some("501(c)(3) organizations".to_string());
        let result = score(&opp, &criteria);
        assert_eq!(result.reasons, vec!["Eligible for nonprofit organizations".to_string()]);
        assert_eq!(result.score, 100);

        let individual = MatchingCriteria::default();
        assert_eq!(score(&opp, &individual).score, 0);
    }

    #[test]
    fn student_eligibility_reason() {
        let criteria = MatchingCriteria {
            student: true,
            ..Default::default()
        };
        let mut opp = draft();
        opp.eligibility = Some("Full-time undergraduate students".to_string());
        assert_eq!(score(&opp, &criteria).reasons, vec!["Eligible for students".to_string()]);
    }

    #[test]
    fn blank_focus_area_entries_never_match() {
        let criteria = MatchingCriteria {
            focus_areas: vec!["arts".into()],
            ..Default::default()
        };
        let mut opp = draft();
        opp.focus_areas = vec!["".into(), "   ".into()];
        let result = score(&opp, &criteria);
        assert_eq!(result.score, NEUTRAL_SCORE);
        assert!(result.reasons.is_empty());

        opp.focus_areas.push("Youth".into());
        let result = score(&opp, &criteria);
        assert_eq!(result.score, 0);
        assert!(result.reasons.is_empty());
    }

    #[test]
    fn scores_are_bounded_and_deterministic() {
        let criteria = MatchingCriteria {
            state: Some("CA".into()),
            focus_areas: vec!["health".into()],
            keywords: vec!["clinic".into()],
            veteran: true,
            disability: true,
            low_income: true,
            rural: true,
            health_conditions: vec!["Diabetes".into()],
            ..Default::default()
        };
        let mut opp = draft();
        opp.location = Some("California".into());
        opp.focus_areas = vec!["Health".into()];
        opp.description =
            Some("Rural clinic grants for low-income veterans with disabilities and diabetes".into());
        let first = score(&opp, &criteria);
        let second = score(&opp, &criteria);
        assert_eq!(first, second);
        assert!(first.score <= 100);
        assert_eq!(first.score, 100);
        assert_eq!(first.reasons.last().map(String::as_str), Some("Health condition support: Diabetes"));
    }
}
