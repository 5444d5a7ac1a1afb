//! Deadline, tag and eligibility classification. Pure functions, no I/O.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use chrono::{DateTime, NaiveDate, Utc};
use regex::Regex;

use crate::{CandidateRecord, DueDate, Eligibility, GrantRecord, Origin, Tag};

static DAY_MONTH_YEAR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d{1,2})[/\-](\d{1,2})[/\-](\d{4})").expect("valid regex"));
static YEAR_MONTH_DAY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d{4})[/\-](\d{1,2})[/\-](\d{1,2})").expect("valid regex"));
static DAY_MONTH_NAME_YEAR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(\d{1,2})(?:st|nd|rd|th)?\s+(jan|feb|mar|apr|may|jun|jul|aug|sep|oct|nov|dec)[a-z]*\.?,?\s+(\d{4})")
        .expect("valid regex")
});

const KEYWORD_TAGS: &[(&[&str], Tag)] = &[
    (&["first nations", "indigenous", "aboriginal"], Tag::FirstNations),
    (&["documentary", "film"], Tag::Documentary),
    (&["arts", "culture"], Tag::Arts),
    (&["community"], Tag::Community),
    (&["regional", "rural"], Tag::Regional),
    (&["social impact"], Tag::SocialImpact),
    (&["australian"], Tag::AustralianStories),
    (&["screen", "media"], Tag::ScreenMedia),
];

const BASELINE_CONFIDENCE: f64 = 0.3;
const BASELINE_REASONING: &str = "General grant opportunity";

/// Reads a due date out of free deadline text.
///
/// Empty text and anything mentioning "ongoing" is the ongoing sentinel.
/// Otherwise day/month/year, year/month/day and "15 July 2025" forms are tried
/// in that order; the first match that is a real calendar date wins. Text with
/// no readable date comes back as `Unparsed` with the original string.
pub fn parse_deadline(text: &str) -> DueDate {
    let trimmed = text.trim();
    if trimmed.is_empty() || trimmed.to_lowercase().contains(DueDate::ONGOING) {
        return DueDate::Ongoing;
    }

    let numeric = |re: &Regex, order: [usize; 3]| {
        re.captures_iter(trimmed).find_map(|caps| {
            let year = caps.get(order[0])?.as_str().parse().ok()?;
            let month = caps.get(order[1])?.as_str().parse().ok()?;
            let day = caps.get(order[2])?.as_str().parse().ok()?;
            NaiveDate::from_ymd_opt(year, month, day)
        })
    };

    if let Some(date) = numeric(&DAY_MONTH_YEAR, [3, 2, 1]) {
        return DueDate::Date(date);
    }
    if let Some(date) = numeric(&YEAR_MONTH_DAY, [1, 2, 3]) {
        return DueDate::Date(date);
    }
    let named = DAY_MONTH_NAME_YEAR.captures_iter(trimmed).find_map(|caps| {
        let day = caps.get(1)?.as_str().parse().ok()?;
        let month = month_number(caps.get(2)?.as_str())?;
        let year = caps.get(3)?.as_str().parse().ok()?;
        NaiveDate::from_ymd_opt(year, month, day)
    });
    if let Some(date) = named {
        return DueDate::Date(date);
    }

    DueDate::Unparsed(text.to_string())
}

fn month_number(prefix: &str) -> Option<u32> {
    let month = match prefix.to_ascii_lowercase().as_str() {
        "jan" => 1,
        "feb" => 2,
        "mar" => 3,
        "apr" => 4,
        "may" => 5,
        "jun" => 6,
        "jul" => 7,
        "aug" => 8,
        "sep" => 9,
        "oct" => 10,
        "nov" => 11,
        "dec" => 12,
        _ => return None,
    };
    Some(month)
}

/// Topical tags for a piece of text. Never empty: no keyword hit yields `{GENERAL}`.
pub fn extract_tags(text: &str) -> BTreeSet<Tag> {
    let lower = text.to_lowercase();
    let mut tags: BTreeSet<Tag> = KEYWORD_TAGS
        .iter()
        .filter(|(needles, _)| needles.iter().any(|needle| lower.contains(needle)))
        .map(|(_, tag)| *tag)
        .collect();
    if tags.is_empty() {
        tags.insert(Tag::General);
    }
    tags
}

/// Priority-ordered eligibility rules; the first hit sets confidence and reasoning.
pub fn assess_eligibility(text: &str) -> Eligibility {
    let lower = text.to_lowercase();
    let has = |needle: &str| lower.contains(needle);

    let (confidence, reasoning) = if has("documentary") && (has("film") || has("screen")) {
        (0.95, "Excellent match for documentary film production")
    } else if has("first nations") || has("indigenous") {
        (0.9, "Strong match for First Nations/Indigenous content")
    } else if has("screen") || has("media") {
        (0.85, "Strong match for screen media projects")
    } else if has("arts") && has("culture") {
        (0.8, "Good match for arts and cultural projects")
    } else if has("community") || has("social") {
        (0.7, "Potential community and social impact focus")
    } else {
        (BASELINE_CONFIDENCE, BASELINE_REASONING)
    };

    Eligibility::from_confidence(confidence, reasoning)
}

/// Turns a scraped candidate into a classified grant record.
pub fn classify(candidate: CandidateRecord, origin: Origin, discovered_at: DateTime<Utc>) -> GrantRecord {
    let combined = format!("{} {}", candidate.title, candidate.description);
    let id = GrantRecord::derive_id(origin, &candidate.source_url, &candidate.title);
    GrantRecord {
        id,
        due_date: parse_deadline(&candidate.deadline_text),
        tags: extract_tags(&combined),
        eligibility: assess_eligibility(&combined),
        name: candidate.title,
        funder: candidate.source_name.clone(),
        description: candidate.description,
        amount_text: candidate.amount_text,
        source_name: candidate.source_name,
        source_url: candidate.source_url,
        origin,
        discovered_at,
        status: GrantRecord::DISCOVERED_STATUS.to_string(),
    }
}
