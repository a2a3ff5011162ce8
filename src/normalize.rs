//! Pure, total normalization helpers applied to user-facing fields before
//! they reach the planner, caches, or downstream agents (spec §4.10).
//! Every function passes `None` straight through and never panics.

use chrono::NaiveDate;

/// Collapse whitespace runs and trim the ends. Does not alter casing or
/// punctuation — only the shape of whitespace.
pub fn normalize_prompt(prompt: Option<&str>) -> Option<String> {
    let prompt = prompt?;
    let collapsed = prompt.split_whitespace().collect::<Vec<_>>().join(" ");
    Some(collapsed)
}

const LOCATION_ALIASES: &[(&str, &str)] = &[
    ("nyc", "New York,US"),
    ("new york city", "New York,US"),
    ("sf", "San Francisco,US"),
    ("san francisco", "San Francisco,US"),
    ("la", "Los Angeles,US"),
    ("london", "London,GB"),
];

const IATA_CODES: &[(&str, &str)] = &[
    ("jfk", "New York,US"),
    ("lax", "Los Angeles,US"),
    ("lhr", "London,GB"),
    ("opo", "Porto,PT"),
    ("lis", "Lisbon,PT"),
];

/// Normalize a free-form location string to `"City,CC"`.
///
/// Recognizes `"City,CC"` and `"City, Country"` forms, a small set of IATA
/// airport codes, and common city aliases. Anything else passes through
/// unchanged (trimmed) rather than being rejected.
pub fn normalize_location(location: Option<&str>) -> Option<String> {
    let location = location?;
    let trimmed = location.trim();
    if trimmed.is_empty() {
        return Some(trimmed.to_string());
    }
    let lower = trimmed.to_lowercase();

    if lower.len() == 3 {
        if let Some((_, canonical)) = IATA_CODES.iter().find(|(code, _)| *code == lower) {
            return Some(canonical.to_string());
        }
    }

    if let Some((_, canonical)) = LOCATION_ALIASES.iter().find(|(alias, _)| *alias == lower) {
        return Some(canonical.to_string());
    }

    if let Some((city, cc)) = trimmed.split_once(',') {
        let city = city.trim();
        let cc = cc.trim();
        if cc.len() == 2 && cc.chars().all(|c| c.is_ascii_alphabetic()) {
            return Some(format!("{},{}", city, cc.to_uppercase()));
        }
    }

    Some(trimmed.to_string())
}

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%m/%d/%Y", "%d/%m/%Y", "%B %d, %Y", "%b %d, %Y"];

/// Normalize a date string to ISO `YYYY-MM-DD`. Tries a fixed list of known
/// formats in order; if none parse, the input is returned unchanged.
pub fn normalize_date(date: Option<&str>) -> Option<String> {
    let date = date?;
    let trimmed = date.trim();
    for fmt in DATE_FORMATS {
        if let Ok(parsed) = NaiveDate::parse_from_str(trimmed, fmt) {
            return Some(parsed.format("%Y-%m-%d").to_string());
        }
    }
    Some(trimmed.to_string())
}

const LANGUAGE_NAMES: &[(&str, &str)] = &[
    ("english", "en"),
    ("spanish", "es"),
    ("french", "fr"),
    ("german", "de"),
    ("portuguese", "pt"),
    ("italian", "it"),
];

/// Normalize a language name or code to a lowercase ISO 639-1 two-letter
/// code. Already-valid two-letter codes pass through lowercased.
pub fn normalize_language(language: Option<&str>) -> Option<String> {
    let language = language?;
    let trimmed = language.trim().to_lowercase();
    if trimmed.len() == 2 && trimmed.chars().all(|c| c.is_ascii_alphabetic()) {
        return Some(trimmed);
    }
    if let Some((_, code)) = LANGUAGE_NAMES.iter().find(|(name, _)| *name == trimmed) {
        return Some(code.to_string());
    }
    Some(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_prompt_collapses_whitespace() {
        assert_eq!(
            normalize_prompt(Some("  hello   world  ")),
            Some("hello world".to_string())
        );
    }

    #[test]
    fn normalize_prompt_passes_none_through() {
        assert_eq!(normalize_prompt(None), None);
    }

    #[test]
    fn normalize_prompt_is_idempotent() {
        let once = normalize_prompt(Some("  a  b  c "));
        let twice = normalize_prompt(once.as_deref());
        assert_eq!(once, twice);
    }

    #[test]
    fn normalize_location_handles_city_comma_country() {
        assert_eq!(
            normalize_location(Some("Porto, pt")),
            Some("Porto,PT".to_string())
        );
    }

    #[test]
    fn normalize_location_resolves_aliases_and_iata() {
        assert_eq!(normalize_location(Some("NYC")), Some("New York,US".to_string()));
        assert_eq!(normalize_location(Some("LHR")), Some("London,GB".to_string()));
    }

    #[test]
    fn normalize_location_passes_through_unknown() {
        assert_eq!(
            normalize_location(Some("Atlantis")),
            Some("Atlantis".to_string())
        );
    }

    #[test]
    fn normalize_date_parses_known_formats_to_iso() {
        assert_eq!(normalize_date(Some("03/15/2026")), Some("2026-03-15".to_string()));
        assert_eq!(
            normalize_date(Some("March 15, 2026")),
            Some("2026-03-15".to_string())
        );
    }

    #[test]
    fn normalize_date_passes_through_unparsable() {
        assert_eq!(normalize_date(Some("sometime next week")), Some("sometime next week".to_string()));
    }

    #[test]
    fn normalize_language_maps_name_to_code() {
        assert_eq!(normalize_language(Some("Portuguese")), Some("pt".to_string()));
        assert_eq!(normalize_language(Some("EN")), Some("en".to_string()));
    }
}
