//! Profile -> matching-criteria normalization.
//!
//! Profiles come from two differently-shaped record types (individuals and
//! organizations) and from several generations of form fields, so every read
//! here tolerates a missing key, a wrong JSON type, or a stringly-typed value.

use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value as JsonValue};

use crate::Profile;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfileKind {
    #[default]
    Unknown,
    Individual,
    Student,
    Organization,
    Business,
}

impl ProfileKind {
    fn parse(value: &str) -> Self {
        let lower = value.trim().to_ascii_lowercase();
        match lower.as_str() {
            "individual" | "person" | "personal" | "applicant" => Self::Individual,
            "student" => Self::Student,
            "organization" | "organisation" | "nonprofit" | "non-profit" | "charity" => {
                Self::Organization
            }
            "business" | "company" | "small_business" | "small business" => Self::Business,
            _ => Self::Unknown,
        }
    }

    pub fn is_organization(&self) -> bool {
        matches!(self, Self::Organization | Self::Business)
    }
}

/// Normalized, immutable view of a profile used by the scorer and crawlers.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchingCriteria {
    pub kind: ProfileKind,
    pub city: Option<String>,
    /// Two-letter USPS code when recognisable, otherwise the raw value.
    pub state: Option<String>,
    pub zip: Option<String>,
    pub is_nonprofit: bool,
    pub ein: Option<String>,
    pub annual_budget: Option<f64>,
    pub staff_count: Option<u32>,
    pub focus_areas: Vec<String>,
    pub keywords: Vec<String>,
    pub veteran: bool,
    pub disability: bool,
    pub low_income: bool,
    pub student: bool,
    pub first_generation: bool,
    pub minority: bool,
    pub women: bool,
    pub faith_based: bool,
    pub rural: bool,
    pub senior: bool,
    pub single_parent: bool,
    pub foster_youth: bool,
    pub tribal: bool,
    pub small_business: bool,
    pub energy_interest: bool,
    pub health_conditions: Vec<String>,
}

impl MatchingCriteria {
    pub fn is_organization(&self) -> bool {
        self.kind.is_organization() || self.is_nonprofit
    }

    /// Full state name for the criteria's state code, if known.
    pub fn state_name(&self) -> Option<&'static str> {
        self.state.as_deref().and_then(state_name_for_code)
    }

    /// Human-readable place, preferring "City, ST".
    pub fn locality(&self) -> Option<String> {
        match (&self.city, &self.state) {
            (Some(city), Some(state)) => Some(format!("{city}, {state}")),
            (Some(city), None) => Some(city.clone()),
            (None, Some(state)) => Some(state.clone()),
            (None, None) => None,
        }
    }

    /// Search terms derived from focus areas first, then keywords, deduplicated.
    pub fn search_terms(&self, limit: usize) -> Vec<String> {
        let mut terms: Vec<String> = Vec::new();
        for term in self.focus_areas.iter().chain(self.keywords.iter()) {
            if !terms.iter().any(|t| t == term) {
                terms.push(term.clone());
            }
            if terms.len() >= limit {
                break;
            }
        }
        terms
    }
}

const CONDITION_FLAGS: &[(&str, &str)] = &[
    ("has_chronic_illness", "Chronic illness"),
    ("has_cancer", "Cancer"),
    ("has_diabetes", "Diabetes"),
    ("has_heart_disease", "Heart disease"),
    ("has_mental_health_condition", "Mental health condition"),
    ("has_hearing_impairment", "Hearing impairment"),
    ("has_visual_impairment", "Visual impairment"),
];

const STATES: &[(&str, &str)] = &[
    ("AL", "Alabama"),
    ("AK", "Alaska"),
    ("AZ", "Arizona"),
    ("AR", "Arkansas"),
    ("CA", "California"),
    ("CO", "Colorado"),
    ("CT", "Connecticut"),
    ("DE", "Delaware"),
    ("DC", "District of Columbia"),
    ("FL", "Florida"),
    ("GA", "Georgia"),
    ("HI", "Hawaii"),
    ("ID", "Idaho"),
    ("IL", "Illinois"),
    ("IN", "Indiana"),
    ("IA", "Iowa"),
    ("KS", "Kansas"),
    ("KY", "Kentucky"),
    ("LA", "Louisiana"),
    ("ME", "Maine"),
    ("MD", "Maryland"),
    ("MA", "Massachusetts"),
    ("MI", "Michigan"),
    ("MN", "Minnesota"),
    ("MS", "Mississippi"),
    ("MO", "Missouri"),
    ("MT", "Montana"),
    ("NE", "Nebraska"),
    ("NV", "Nevada"),
    ("NH", "New Hampshire"),
    ("NJ", "New Jersey"),
    ("NM", "New Mexico"),
    ("NY", "New York"),
    ("NC", "North Carolina"),
    ("ND", "North Dakota"),
    ("OH", "Ohio"),
    ("OK", "Oklahoma"),
    ("OR", "Oregon"),
    ("PA", "Pennsylvania"),
    ("RI", "Rhode Island"),
    ("SC", "South Carolina"),
    ("SD", "South Dakota"),
    ("TN", "Tennessee"),
    ("TX", "Texas"),
    ("UT", "Utah"),
    ("VT", "Vermont"),
    ("VA", "Virginia"),
    ("WA", "Washington"),
    ("WV", "West Virginia"),
    ("WI", "Wisconsin"),
    ("WY", "Wyoming"),
    ("PR", "Puerto Rico"),
];

pub fn state_name_for_code(code: &str) -> Option<&'static str> {
    STATES
        .iter()
        .find(|(c, _)| c.eq_ignore_ascii_case(code.trim()))
        .map(|(_, name)| *name)
}

/// Map a state code or full name onto its two-letter code.
pub fn state_code(value: &str) -> Option<&'static str> {
    let trimmed = value.trim();
    STATES
        .iter()
        .find(|(code, name)| code.eq_ignore_ascii_case(trimmed) || name.eq_ignore_ascii_case(trimmed))
        .map(|(code, _)| *code)
}

/// Derive matching criteria from a profile. Never fails.
pub fn normalize(profile: &Profile) -> MatchingCriteria {
    let attrs = &profile.attributes;

    let kind = first_string(attrs, &["profile_type", "type"])
        .map(|s| ProfileKind::parse(&s))
        .unwrap_or_default();

    let state = first_string(attrs, &["state"]).map(|raw| match state_code(&raw) {
        Some(code) => code.to_string(),
        None => raw,
    });

    let organization_type = first_string(attrs, &["organization_type"])
        .map(|s| s.to_ascii_lowercase())
        .unwrap_or_default();
    let is_nonprofit = first_bool(attrs, &["is_nonprofit", "nonprofit"])
        || organization_type.contains("nonprofit")
        || organization_type.contains("non-profit")
        || organization_type.contains("501");

    let mut health_conditions: Vec<String> = CONDITION_FLAGS
        .iter()
        .filter(|(key, _)| first_bool(attrs, &[*key]))
        .map(|(_, label)| (*label).to_string())
        .collect();
    for extra in parse_list(attrs.get("health_conditions")) {
        if !health_conditions.iter().any(|c| c.eq_ignore_ascii_case(&extra)) {
            health_conditions.push(extra);
        }
    }

    let student = kind == ProfileKind::Student || first_bool(attrs, &["student", "is_student"]);
    let small_business =
        kind == ProfileKind::Business || first_bool(attrs, &["small_business"]);

    MatchingCriteria {
        kind,
        city: first_string(attrs, &["city"]),
        state,
        zip: first_string(attrs, &["zip", "zip_code", "postal_code"]),
        is_nonprofit,
        ein: first_string(attrs, &["ein"]),
        annual_budget: first_number(attrs, &["annual_budget", "budget"]),
        staff_count: first_number(attrs, &["staff_count", "employees"])
            .filter(|n| *n >= 0.0)
            .map(|n| n as u32),
        focus_areas: lowercase_all(parse_list(attrs.get("focus_areas"))),
        keywords: lowercase_all(parse_list(attrs.get("keywords"))),
        veteran: first_bool(attrs, &["veteran", "is_veteran"]),
        disability: first_bool(attrs, &["disability", "has_disability"]),
        low_income: first_bool(attrs, &["low_income"]),
        student,
        first_generation: first_bool(attrs, &["first_generation"]),
        minority: first_bool(attrs, &["minority"]),
        women: first_bool(attrs, &["women_owned", "woman"]),
        faith_based: first_bool(attrs, &["faith_based"]),
        rural: first_bool(attrs, &["rural"]),
        senior: first_bool(attrs, &["senior"]),
        single_parent: first_bool(attrs, &["single_parent"]),
        foster_youth: first_bool(attrs, &["foster_youth"]),
        tribal: first_bool(attrs, &["tribal"]),
        small_business,
        energy_interest: first_bool(attrs, &["energy_interest", "sustainability"]),
        health_conditions,
    }
}

fn first_value<'a>(attrs: &'a JsonMap<String, JsonValue>, keys: &[&str]) -> Option<&'a JsonValue> {
    keys.iter()
        .filter_map(|k| attrs.get(*k))
        .find(|v| !v.is_null())
}

fn first_string(attrs: &JsonMap<String, JsonValue>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| match attrs.get(*k) {
        Some(JsonValue::String(s)) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        Some(JsonValue::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

fn first_bool(attrs: &JsonMap<String, JsonValue>, keys: &[&str]) -> bool {
    keys.iter().any(|k| attrs.get(*k).map(truthy).unwrap_or(false))
}

fn truthy(value: &JsonValue) -> bool {
    match value {
        JsonValue::Bool(b) => *b,
        JsonValue::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        JsonValue::String(s) => matches!(
            s.trim().to_ascii_lowercase().as_str(),
            "true" | "yes" | "y" | "1" | "on"
        ),
        _ => false,
    }
}

fn first_number(attrs: &JsonMap<String, JsonValue>, keys: &[&str]) -> Option<f64> {
    match first_value(attrs, keys)? {
        JsonValue::Number(n) => n.as_f64(),
        JsonValue::String(s) => {
            let cleaned: String = s
                .chars()
                .filter(|c| c.is_ascii_digit() || *c == '.')
                .collect();
            cleaned.parse().ok()
        }
        _ => None,
    }
}

/// Accepts a JSON array, a JSON-encoded array string, or a comma string.
fn parse_list(value: Option<&JsonValue>) -> Vec<String> {
    match value {
        Some(JsonValue::Array(items)) => strings_of(items),
        Some(JsonValue::String(s)) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                return Vec::new();
            }
            if trimmed.starts_with('[') {
                if let Ok(JsonValue::Array(items)) = serde_json::from_str::<JsonValue>(trimmed) {
                    return strings_of(&items);
                }
            }
            trimmed
                .split(',')
                .map(|part| part.trim().trim_matches(|c| c == '"' || c == '[' || c == ']').trim())
                .filter(|part| !part.is_empty())
                .map(ToString::to_string)
                .collect()
        }
        _ => Vec::new(),
    }
}

fn strings_of(items: &[JsonValue]) -> Vec<String> {
    items
        .iter()
        .filter_map(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .collect()
}

fn lowercase_all(items: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(items.len());
    for item in items {
        let lower = item.to_lowercase();
        if !out.contains(&lower) {
            out.push(lower);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    fn profile(value: JsonValue) -> Profile {
        Profile::from_json(Uuid::nil(), value)
    }

    #[test]
    fn empty_profile_normalizes_to_defaults() {
        let criteria = normalize(&profile(json!({})));
        assert_eq!(criteria, MatchingCriteria::default());
    }

    #[test]
    fn focus_areas_accept_list_json_string_and_comma_string() {
        let from_list = normalize(&profile(json!({"focus_areas": ["Health", "Education"]})));
        let from_json = normalize(&profile(json!({"focus_areas": "[\"Health\", \"Education\"]"})));
        let from_commas = normalize(&profile(json!({"focus_areas": "Health, Education"})));
        let expected = vec!["health".to_string(), "education".to_string()];
        assert_eq!(from_list.focus_areas, expected);
        assert_eq!(from_json.focus_areas, expected);
        assert_eq!(from_commas.focus_areas, expected);
    }

    #[test]
    fn malformed_json_focus_string_falls_back_to_comma_split() {
        let criteria = normalize(&profile(json!({"focus_areas": "[\"arts\", youth"})));
        assert_eq!(criteria.focus_areas, vec!["arts".to_string(), "youth".to_string()]);
    }

    #[test]
    fn wrong_typed_focus_areas_become_empty() {
        let criteria = normalize(&profile(json!({"focus_areas": 17, "keywords": {"a": 1}})));
        assert!(criteria.focus_areas.is_empty());
        assert!(criteria.keywords.is_empty());
    }

    #[test]
    fn condition_flags_merge_into_labelled_list() {
        let criteria = normalize(&profile(json!({
            "has_diabetes": "yes",
            "has_cancer": false,
            "has_hearing_impairment": 1,
            "health_conditions": ["Asthma", "diabetes"]
        })));
        assert_eq!(
            criteria.health_conditions,
            vec!["Diabetes".to_string(), "Hearing impairment".to_string(), "Asthma".to_string()]
        );
    }

    #[test]
    fn organization_shape_sets_nonprofit_fields() {
        let criteria = normalize(&profile(json!({
            "profile_type": "organization",
            "organization_type": "501(c)(3) public charity",
            "ein": "12-3456789",
            "annual_budget": "$250,000",
            "employees": 12,
            "state": "Oregon",
            "city": "Portland"
        })));
        assert_eq!(criteria.kind, ProfileKind::Organization);
        assert!(criteria.is_nonprofit);
        assert!(criteria.is_organization());
        assert_eq!(criteria.ein.as_deref(), Some("12-3456789"));
        assert_eq!(criteria.annual_budget, Some(250000.0));
        assert_eq!(criteria.staff_count, Some(12));
        assert_eq!(criteria.state.as_deref(), Some("OR"));
        assert_eq!(criteria.state_name(), Some("Oregon"));
        assert_eq!(criteria.locality().as_deref(), Some("Portland, OR"));
    }

    #[test]
    fn student_profile_type_implies_student_flag() {
        let criteria = normalize(&profile(json!({"type": "student", "keywords": "STEM, nursing"})));
        assert!(criteria.student);
        assert!(!criteria.is_organization());
        assert_eq!(criteria.keywords, vec!["stem".to_string(), "nursing".to_string()]);
    }

    #[test]
    fn search_terms_prefer_focus_areas_and_dedupe() {
        let criteria = normalize(&profile(json!({
            "focus_areas": ["youth", "arts"],
            "keywords": "arts, music, theater"
        })));
        assert_eq!(criteria.search_terms(3), vec!["youth", "arts", "music"]);
    }
}
