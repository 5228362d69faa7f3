//! HTML / JSON / free-text extraction helpers shared by the crawlers.

use chrono::NaiveDate;
use reqwest::Url;
use scraper::{ElementRef, Html, Selector};
use serde_json::Value as JsonValue;
use sha2::{Digest, Sha256};

use crate::CrawlerError;

pub(crate) fn text_or_none(value: String) -> Option<String> {
    let trimmed = collapse_whitespace(&value);
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

pub(crate) fn collapse_whitespace(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub(crate) fn selector(selector: &str) -> Result<Selector, CrawlerError> {
    Selector::parse(selector).map_err(|e| CrawlerError::Parse(e.to_string()))
}

pub(crate) fn element_text(element: ElementRef<'_>) -> Option<String> {
    text_or_none(element.text().collect::<Vec<_>>().join(" "))
}

pub(crate) fn select_first_text(element: ElementRef<'_>, sel: &str) -> Result<Option<String>, CrawlerError> {
    let sel = selector(sel)?;
    Ok(element.select(&sel).find_map(element_text))
}

pub(crate) fn select_first_attr(
    element: ElementRef<'_>,
    sel: &str,
    attr: &str,
) -> Result<Option<String>, CrawlerError> {
    let sel = selector(sel)?;
    Ok(element
        .select(&sel)
        .find_map(|n| n.value().attr(attr))
        .and_then(|s| text_or_none(s.to_string())))
}

/// Visible text of a whole document with script/style content dropped.
pub(crate) fn page_text(document: &Html) -> String {
    let mut out = Vec::new();
    for node in document.root_element().descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let inside_code = node.ancestors().any(|a| {
            a.value()
                .as_element()
                .map(|e| matches!(e.name(), "script" | "style" | "noscript"))
                .unwrap_or(false)
        });
        if !inside_code {
            let trimmed = text.trim();
            if !trimmed.is_empty() {
                out.push(trimmed);
            }
        }
    }
    collapse_whitespace(&out.join(" "))
}

pub(crate) fn truncate_chars(value: &str, max: usize) -> String {
    match value.char_indices().nth(max) {
        Some((idx, _)) => value[..idx].to_string(),
        None => value.to_string(),
    }
}

/// Text from the first "Eligib..." mention onward, capped at 200 chars.
pub(crate) fn eligibility_clause(text: &str) -> Option<String> {
    let idx = text.find("Eligib").or_else(|| text.find("eligib"))?;
    Some(truncate_chars(&text[idx..], 200))
}

pub(crate) fn resolve_url(base: &str, href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') || href.starts_with("javascript:") {
        return None;
    }
    Url::parse(base)
        .and_then(|b| b.join(href))
        .or_else(|_| Url::parse(href))
        .ok()
        .map(|u| u.to_string())
}

fn json_at<'a>(value: &'a JsonValue, path: &[&str]) -> Option<&'a JsonValue> {
    let mut cur = value;
    for segment in path {
        cur = cur.get(*segment)?;
    }
    Some(cur)
}

pub(crate) fn json_str<'a>(value: &'a JsonValue, path: &[&str]) -> Option<&'a str> {
    json_at(value, path)?.as_str().map(str::trim).filter(|s| !s.is_empty())
}

/// Strings, or numbers rendered as strings; upstream ids come in both shapes.
pub(crate) fn json_string(value: &JsonValue, path: &[&str]) -> Option<String> {
    match json_at(value, path)? {
        JsonValue::String(s) => text_or_none(s.clone()),
        JsonValue::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

pub(crate) fn json_f64(value: &JsonValue, path: &[&str]) -> Option<f64> {
    match json_at(value, path)? {
        JsonValue::Number(n) => n.as_f64(),
        JsonValue::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

pub(crate) fn json_string_vec(value: &JsonValue, path: &[&str]) -> Vec<String> {
    json_at(value, path)
        .and_then(JsonValue::as_array)
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str())
                .filter_map(|s| text_or_none(s.to_string()))
                .collect()
        })
        .unwrap_or_default()
}

/// Dollar figures in `text`, honoring `k`/`million` suffixes.
fn dollar_figures(text: &str) -> Vec<f64> {
    let mut out = Vec::new();
    let lower = text.to_lowercase();
    let bytes = lower.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'$' {
            i += 1;
            continue;
        }
        i += 1;
        let start = i;
        while i < bytes.len() && (bytes[i].is_ascii_digit() || bytes[i] == b',' || bytes[i] == b'.') {
            i += 1;
        }
        let digits: String = lower[start..i].chars().filter(|c| *c != ',').collect();
        let digits = digits.trim_end_matches('.');
        let Ok(mut value) = digits.parse::<f64>() else {
            continue;
        };
        let rest = lower[i..].trim_start();
        let bare_suffix = |suffix: char| {
            rest.starts_with(suffix) && !rest[1..].starts_with(|c: char| c.is_ascii_alphabetic())
        };
        if rest.starts_with("million") || bare_suffix('m') {
            value *= 1_000_000.0;
        } else if bare_suffix('k') {
            value *= 1_000.0;
        }
        out.push(value);
    }
    out
}

/// `(min, max)` from text like `$5,000 - $10,000` or `up to $2,500`.
pub fn parse_amount_range(text: &str) -> (Option<f64>, Option<f64>) {
    let figures = dollar_figures(text);
    match figures.as_slice() {
        [] => (None, None),
        [only] => {
            let lower = text.to_lowercase();
            if lower.contains("up to") || lower.contains("maximum") || lower.contains("max ") {
                (None, Some(*only))
            } else {
                (Some(*only), Some(*only))
            }
        }
        [first, .., last] => (Some(first.min(*last)), Some(first.max(*last))),
    }
}

const MONTHS: &[(&str, u32)] = &[
    ("january", 1),
    ("february", 2),
    ("march", 3),
    ("april", 4),
    ("may", 5),
    ("june", 6),
    ("july", 7),
    ("august", 8),
    ("september", 9),
    ("october", 10),
    ("november", 11),
    ("december", 12),
];

fn month_number(token: &str) -> Option<u32> {
    let token = token.trim_end_matches('.').to_lowercase();
    if token.len() < 3 {
        return None;
    }
    MONTHS
        .iter()
        .find(|(name, _)| *name == token || (token.len() == 3 && name.starts_with(token.as_str())) || (token == "sept" && *name == "september"))
        .map(|(_, n)| *n)
}

/// First date in `text`: ISO, `MM/DD/YYYY`, or `Month D, YYYY`.
pub fn parse_deadline(text: &str) -> Option<NaiveDate> {
    let tokens: Vec<&str> = text
        .split_whitespace()
        .map(|t| t.trim_matches(|c: char| matches!(c, ',' | ';' | ':' | '(' | ')' | '.')))
        .collect();

    for token in &tokens {
        let candidate = token.get(..10).unwrap_or(token);
        if let Ok(date) = NaiveDate::parse_from_str(candidate, "%Y-%m-%d") {
            return Some(date);
        }
        if let Ok(date) = NaiveDate::parse_from_str(token, "%m/%d/%Y") {
            return Some(date);
        }
    }

    for window in tokens.windows(3) {
        let Some(month) = month_number(window[0]) else {
            continue;
        };
        let day = window[1].trim_end_matches(|c: char| c.is_ascii_alphabetic());
        let (Ok(day), Ok(year)) = (day.parse::<u32>(), window[2].parse::<i32>()) else {
            continue;
        };
        if let Some(date) = NaiveDate::from_ymd_opt(year, month, day) {
            return Some(date);
        }
    }
    None
}

/// Stable id for sources without upstream identifiers.
pub fn stable_source_id(url: &str, title: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(url.trim().as_bytes());
    hasher.update(b"\n");
    hasher.update(title.trim().to_lowercase().as_bytes());
    let digest = hex::encode(hasher.finalize());
    digest[..16].to_string()
}

pub(crate) fn slug(value: &str) -> String {
    let mut out = String::new();
    for ch in value.chars() {
        if ch.is_ascii_alphanumeric() {
            out.push(ch.to_ascii_lowercase());
        } else if !out.ends_with('-') && !out.is_empty() {
            out.push('-');
        }
    }
    out.trim_end_matches('-').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn amount_ranges() {
        assert_eq!(parse_amount_range("Awards of $5,000 - $10,000"), (Some(5000.0), Some(10000.0)));
        assert_eq!(parse_amount_range("up to $2,500 per student"), (None, Some(2500.0)));
        assert_eq!(parse_amount_range("$1.5 million available"), (Some(1_500_000.0), Some(1_500_000.0)));
        assert_eq!(parse_amount_range("grants of $10k"), (Some(10_000.0), Some(10_000.0)));
        assert_eq!(parse_amount_range("no amount listed"), (None, None));
    }

    #[test]
    fn deadlines_in_supported_shapes() {
        let expected = NaiveDate::from_ymd_opt(2026, 3, 15);
        assert_eq!(parse_deadline("Deadline: 2026-03-15"), expected);
        assert_eq!(parse_deadline("closes 03/15/2026."), expected);
        assert_eq!(parse_deadline("Apply by March 15, 2026"), expected);
        assert_eq!(parse_deadline("Apply by Mar. 15th, 2026"), expected);
        assert_eq!(parse_deadline("Rolling deadline"), None);
    }

    #[test]
    fn stable_ids_ignore_title_case_and_padding() {
        let a = stable_source_id("https://x.org/a", "Arts Grant");
        let b = stable_source_id(" https://x.org/a ", "arts grant ");
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
        assert_ne!(a, stable_source_id("https://x.org/b", "Arts Grant"));
    }

    #[test]
    fn urls_resolve_against_page() {
        assert_eq!(
            resolve_url("https://u.edu/aid/list", "/aid/s/1").as_deref(),
            Some("https://u.edu/aid/s/1")
        );
        assert_eq!(
            resolve_url("https://u.edu/aid/list", "detail?id=2").as_deref(),
            Some("https://u.edu/aid/detail?id=2")
        );
        assert_eq!(resolve_url("https://u.edu/", "#top"), None);
    }

    #[test]
    fn page_text_skips_scripts() {
        let doc = Html::parse_document(
            "<html><head><script>var x = 1;</script></head><body><h1>Grants</h1>\n<p>Open   now</p></body></html>",
        );
        assert_eq!(page_text(&doc), "Grants Open now");
    }

    #[test]
    fn json_ids_accept_numbers() {
        let v = serde_json::json!({"id": 12345, "name": " Fund "});
        assert_eq!(json_string(&v, &["id"]).as_deref(), Some("12345"));
        assert_eq!(json_str(&v, &["name"]), Some("Fund"));
    }

    #[test]
    fn eligibility_clause_starts_at_first_mention() {
        assert_eq!(
            eligibility_clause("$500 award. Eligibility: nursing majors.").as_deref(),
            Some("Eligibility: nursing majors.")
        );
        assert_eq!(eligibility_clause("Open to all"), None);
    }

    #[test]
    fn slugs() {
        assert_eq!(slug("Columbus, OH"), "columbus-oh");
    }
}
