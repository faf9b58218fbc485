//! Keyword heuristics turning a call row into tier, score, location and name.
//!
//! All functions are pure. Rules are ordered lists so adding a keyword never
//! requires touching control flow.

use regex::Regex;
use std::sync::LazyLock;

use crate::feed_parser::{normalize_phone, CallRow};
use crate::models::LeadTier;

/// Tier rules, checked in order. First match wins; no match means warm.
const TIER_RULES: &[(LeadTier, &[&str])] = &[
    (
        LeadTier::Platinum,
        &["premium", "luxury", "comprehensive", "full package"],
    ),
    (LeadTier::Hot, &["urgent", "soon", "interested", "ready"]),
];

const BASE_SCORE: f64 = 60.0;
const MAX_SCORE: f64 = 100.0;
const LONG_TEXT_CHARS: usize = 100;
const LONG_TEXT_BONUS: f64 = 5.0;

/// Each signal adds its points once if any of its keywords appears.
const SCORE_SIGNALS: &[(f64, &[&str])] = &[
    (10.0, &["interested"]),
    (10.0, &["ready"]),
    (10.0, &["appointment", "consultation"]),
    (5.0, &["urgent", "soon"]),
];

/// Area code prefix to (city, region).
const AREA_CODES: &[(&str, &str, &str)] = &[
    ("604", "Vancouver", "Metro Vancouver"),
    ("778", "Vancouver", "Metro Vancouver"),
    ("236", "Vancouver", "Metro Vancouver"),
    ("250", "Victoria", "Vancouver Island"),
];

const FALLBACK_CITY: &str = "British Columbia";
const FALLBACK_REGION: &str = "Unknown";

static NAME_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)my name is (\w+)|I['’]m (\w+)|this is (\w+)")
        .expect("name pattern is a valid regex")
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    pub city: String,
    pub region: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub tier: LeadTier,
    pub score: f64,
    pub location: Location,
    pub name: Option<String>,
}

/// Lower-cased `summary + " " + transcript`, the text every rule looks at.
pub fn combined_text(summary: &str, transcript: &str) -> String {
    format!("{} {}", summary, transcript).to_lowercase()
}

pub fn infer_tier(summary: &str, transcript: &str) -> LeadTier {
    let text = combined_text(summary, transcript);
    TIER_RULES
        .iter()
        .find(|(_, keywords)| contains_any(&text, keywords))
        .map(|(tier, _)| *tier)
        .unwrap_or(LeadTier::Warm)
}

/// Quality score in [60, 100].
pub fn quality_score(summary: &str, transcript: &str) -> f64 {
    let text = combined_text(summary, transcript);

    let mut score = BASE_SCORE
        + SCORE_SIGNALS
            .iter()
            .filter(|(_, keywords)| contains_any(&text, keywords))
            .map(|(points, _)| points)
            .sum::<f64>();

    if text.chars().count() > LONG_TEXT_CHARS {
        score += LONG_TEXT_BONUS;
    }

    score.min(MAX_SCORE)
}

pub fn location_for_phone(phone: &str) -> Location {
    let digits = normalize_phone(phone);
    let (city, region) = AREA_CODES
        .iter()
        .find(|(prefix, _, _)| digits.starts_with(prefix))
        .map(|(_, city, region)| (*city, *region))
        .unwrap_or((FALLBACK_CITY, FALLBACK_REGION));

    Location {
        city: city.to_string(),
        region: region.to_string(),
    }
}

/// Best-effort caller name from phrases like "my name is Sarah".
pub fn extract_name(transcript: &str) -> Option<String> {
    let caps = NAME_PATTERN.captures(transcript)?;
    caps.iter()
        .skip(1)
        .flatten()
        .next()
        .map(|m| m.as_str().to_string())
}

pub fn classify(row: &CallRow) -> Classification {
    Classification {
        tier: infer_tier(&row.summary, &row.transcript),
        score: quality_score(&row.summary, &row.transcript),
        location: location_for_phone(&row.from_number),
        name: extract_name(&row.transcript),
    }
}

fn contains_any(text: &str, keywords: &[&str]) -> bool {
    keywords.iter().any(|k| text.contains(k))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platinum_beats_hot() {
        assert_eq!(
            infer_tier("Premium package", "this is urgent"),
            LeadTier::Platinum
        );
        assert_eq!(infer_tier("", "wants the FULL PACKAGE"), LeadTier::Platinum);
    }

    #[test]
    fn test_hot_and_warm() {
        assert_eq!(infer_tier("Caller is interested", ""), LeadTier::Hot);
        assert_eq!(infer_tier("General question", "about hours"), LeadTier::Warm);
        assert_eq!(infer_tier("", ""), LeadTier::Warm);
    }

    #[test]
    fn test_score_examples() {
        // 60 + ready 10 + appointment 10 + urgent 5
        assert_eq!(quality_score("ready for appointment, urgent", ""), 85.0);
        assert_eq!(quality_score("", ""), 60.0);
    }

    #[test]
    fn test_score_long_text_bonus_and_clamp() {
        let long = "interested ready consultation urgent ".repeat(5);
        // 60 + 10 + 10 + 10 + 5 + 5 = 100
        assert_eq!(quality_score(&long, ""), 100.0);
        assert_eq!(quality_score(&"x".repeat(120), ""), 65.0);
    }

    #[test]
    fn test_long_text_bonus_counts_chars_not_bytes() {
        // combined text is " " + transcript
        assert_eq!(quality_score("", &"é".repeat(100)), 65.0);
        assert_eq!(quality_score("", &"é".repeat(99)), 60.0);
        assert_eq!(quality_score("", &"😀".repeat(60)), 60.0);
    }

    #[test]
    fn test_location_table() {
        assert_eq!(location_for_phone("6045551234").city, "Vancouver");
        assert_eq!(location_for_phone("7785551234").region, "Metro Vancouver");
        assert_eq!(location_for_phone("2365551234").city, "Vancouver");
        assert_eq!(
            location_for_phone("2505551234"),
            Location {
                city: "Victoria".into(),
                region: "Vancouver Island".into()
            }
        );
        assert_eq!(
            location_for_phone("4165551234"),
            Location {
                city: "British Columbia".into(),
                region: "Unknown".into()
            }
        );
    }

    #[test]
    fn test_extract_name() {
        assert_eq!(extract_name("Hi, my name is Sarah and"), Some("Sarah".into()));
        assert_eq!(extract_name("I'm John, calling about"), Some("John".into()));
        assert_eq!(extract_name("I’m Priya"), Some("Priya".into()));
        assert_eq!(extract_name("Hello, THIS IS Mike"), Some("Mike".into()));
        assert_eq!(extract_name("no introductions here"), None);
    }
}
