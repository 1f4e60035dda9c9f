//! Cleaning and normalisation of raw field values.

use std::sync::OnceLock;

use chrono::{NaiveDate, NaiveDateTime};
use regex::Regex;
use tracing::debug;

use crate::models::{AvailableDate, BedroomDisplay};

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d/%m/%Y", "%Y/%m/%d", "%d-%m-%Y"];

const IMMEDIATE_WORDS: &[&str] = &["now", "immediate", "available", "asap"];

const STUDIO_KEYWORDS: &[&str] = &[
    "studio",
    "studios",
    "studio apartment",
    "studio unit",
    "open plan",
    "efficiency apartment",
];

fn regex(cell: &'static OnceLock<Regex>, pattern: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).expect("static pattern"))
}

fn tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(&RE, r"<[^>]+>")
}

fn price_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(&RE, r"\d[\d,]*(?:\.\d+)?")
}

/// First number in a price string: `"$1,250 per week"` is `1250.0`.
pub fn parse_price(raw: &str) -> Option<f64> {
    price_re()
        .find(raw)
        .and_then(|m| m.as_str().replace(',', "").parse().ok())
}

/// Like [`parse_price`], with zero when no number is present.
pub fn clean_price(raw: &str) -> f64 {
    parse_price(raw).unwrap_or(0.0)
}

/// Strips tags and collapses whitespace.
pub fn clean_text(raw: &str) -> String {
    let stripped = tag_re().replace_all(raw, "");
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Cleans an HTML description. With `preserve_format`, paragraphs become
/// blank lines and list items become bullets.
pub fn clean_description(raw: &str, preserve_format: bool) -> String {
    if raw.is_empty() {
        return String::new();
    }
    if !preserve_format {
        return clean_text(raw);
    }

    static RULES: OnceLock<Vec<(Regex, &'static str)>> = OnceLock::new();
    let rules = RULES.get_or_init(|| {
        [
            (r"(?i)<br\s*/?>", "\n"),
            (r"(?i)</p>\s*<p[^>]*>", "\n\n"),
            (r"(?i)<p[^>]*>", ""),
            (r"(?i)</p>", "\n"),
            (r"(?i)<li[^>]*>", "• "),
            (r"(?i)</li>", "\n"),
            (r"(?i)</?[uo]l[^>]*>", "\n"),
            (r"<[^>]+>", ""),
            (r"[ \t]+", " "),
            (r"\n[ \t]*", "\n"),
            (r"\n{3,}", "\n\n"),
        ]
        .into_iter()
        .map(|(pattern, replacement)| (Regex::new(pattern).expect("static pattern"), replacement))
        .collect()
    });

    let mut text = raw.to_string();
    for (re, replacement) in rules {
        text = re.replace_all(&text, *replacement).into_owned();
    }
    text.trim().to_string()
}

/// Normalises a raw availability value against `today`.
///
/// Past or present dates, immediacy words and anything unparseable all mean
/// [`AvailableDate::Now`]; only a parseable future date is kept.
pub fn normalize_available_date(raw: &str, today: NaiveDate) -> AvailableDate {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return AvailableDate::Now;
    }
    let date_part = trimmed.split('T').next().unwrap_or(trimmed);

    let lower = date_part.to_lowercase();
    if IMMEDIATE_WORDS.iter().any(|w| lower.contains(w)) {
        return AvailableDate::Now;
    }

    let parsed = DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(date_part, fmt).ok())
        .or_else(|| {
            NaiveDateTime::parse_from_str(date_part, "%Y-%m-%d %H:%M:%S")
                .ok()
                .map(|dt| dt.date())
        });

    match parsed {
        Some(date) if date > today => AvailableDate::On(date),
        Some(_) => AvailableDate::Now,
        None => {
            debug!("Unparseable available date {:?}, defaulting to now", raw);
            AvailableDate::Now
        }
    }
}

/// Bedroom count for display. Zero bedrooms become `Studio` when any of the
/// texts mention one, otherwise `Unknown`.
pub fn bedroom_display(bedrooms: i32, texts: &[&str]) -> BedroomDisplay {
    if bedrooms > 0 {
        return BedroomDisplay::Count(bedrooms as u32);
    }
    let is_studio = texts.iter().any(|text| {
        let lower = text.to_lowercase();
        STUDIO_KEYWORDS.iter().any(|kw| lower.contains(kw))
    });
    if is_studio {
        BedroomDisplay::Studio
    } else {
        debug!("Zero bedrooms and no studio keyword");
        BedroomDisplay::Unknown
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 17).unwrap()
    }

    #[test]
    fn prices() {
        assert_eq!(clean_price("$650 per week"), 650.0);
        assert_eq!(clean_price("$1,250.50 pw"), 1250.5);
        assert_eq!(clean_price("$700 - $750"), 700.0);
        assert_eq!(clean_price("Contact agent"), 0.0);
        assert_eq!(clean_price(""), 0.0);
        assert_eq!(parse_price("Contact agent"), None);
    }

    #[test]
    fn text_is_stripped_and_collapsed() {
        assert_eq!(clean_text("  <b>12</b>\n  George   St "), "12 George St");
    }

    #[test]
    fn description_keeps_structure() {
        let raw = "<p>Bright unit.</p><p>Features:<ul><li>Balcony</li><li>Pool</li></ul></p>";
        let cleaned = clean_description(raw, true);
        assert_eq!(cleaned, "Bright unit.\n\nFeatures:\n• Balcony\n• Pool");
        assert_eq!(
            clean_description(raw, false),
            "Bright unit.Features:BalconyPool"
        );
    }

    #[test]
    fn past_date_is_available_now() {
        assert_eq!(normalize_available_date("2020-01-01", today()), AvailableDate::Now);
        assert_eq!(normalize_available_date("2026-10-17", today()), AvailableDate::Now);
    }

    #[test]
    fn future_date_is_kept() {
        let expected = AvailableDate::On(NaiveDate::from_ymd_opt(2099, 1, 1).unwrap());
        assert_eq!(normalize_available_date("2099-01-01", today()), expected);
        assert_eq!(normalize_available_date("2099-01-01T00:00:00", today()), expected);
        assert_eq!(normalize_available_date("01/01/2099", today()), expected);
        assert_eq!(normalize_available_date("2099-01-01", today()).to_string(), "2099-01-01");
    }

    #[test]
    fn immediacy_and_garbage_are_available_now() {
        assert_eq!(normalize_available_date("Available Now", today()), AvailableDate::Now);
        assert_eq!(normalize_available_date("ASAP", today()), AvailableDate::Now);
        assert_eq!(normalize_available_date("sometime soon", today()), AvailableDate::Now);
        assert_eq!(normalize_available_date("", today()), AvailableDate::Now);
    }

    #[test]
    fn bedroom_display_counts_and_studios() {
        assert_eq!(bedroom_display(2, &["Studio apartment"]), BedroomDisplay::Count(2));
        assert_eq!(
            bedroom_display(0, &["", "Studio apartment in the CBD", ""]),
            BedroomDisplay::Studio
        );
        assert_eq!(bedroom_display(0, &["Apartment", "Great spot"]), BedroomDisplay::Unknown);
        assert_eq!(bedroom_display(2, &[]).to_string(), "2");
    }
}
