//! Hand-curated grants used when live scraping cannot produce anything.

use std::collections::BTreeSet;

use chrono::{DateTime, NaiveDate, Utc};
use gdp_core::{DueDate, Eligibility, GrantRecord, Origin, Tag};

struct FallbackEntry {
    name: &'static str,
    description: &'static str,
    amount: &'static str,
    due: (i32, u32, u32),
    funder: &'static str,
    url: &'static str,
    tags: &'static [Tag],
    confidence: f64,
    reasoning: &'static str,
}

const FALLBACK_GRANTS: &[FallbackEntry] = &[
    FallbackEntry {
        name: "Screen Australia Documentary Producer Program",
        description: "Funding for experienced documentary producers to develop and produce feature documentaries",
        amount: "$20,000 - $500,000",
        due: (2025, 10, 15),
        funder: "Screen Australia",
        url: "https://www.screenaustralia.gov.au/funding-and-support/documentary/producer-program",
        tags: &[Tag::Documentary, Tag::ScreenMedia],
        confidence: 0.95,
        reasoning: "Perfect match for documentary production",
    },
    FallbackEntry {
        name: "First Nations Stories Fund",
        description: "Supporting Indigenous storytellers to create authentic content that shares First Nations perspectives",
        amount: "$30,000 - $150,000",
        due: (2025, 11, 30),
        funder: "Australia Council for the Arts",
        url: "https://australiacouncil.gov.au/grants-and-funding/first-nations-arts",
        tags: &[Tag::FirstNations, Tag::Documentary, Tag::Arts],
        confidence: 0.9,
        reasoning: "Strong match for First Nations storytelling",
    },
];

/// The fallback dataset, stamped with the discovery time of the current run.
pub fn fallback_grants(discovered_at: DateTime<Utc>) -> Vec<GrantRecord> {
    FALLBACK_GRANTS
        .iter()
        .map(|entry| {
            let (y, m, d) = entry.due;
            let due_date = NaiveDate::from_ymd_opt(y, m, d)
                .map(DueDate::Date)
                .unwrap_or(DueDate::Ongoing);
            GrantRecord {
                id: GrantRecord::derive_id(Origin::Fallback, entry.url, entry.name),
                name: entry.name.to_string(),
                funder: entry.funder.to_string(),
                description: entry.description.to_string(),
                amount_text: entry.amount.to_string(),
                due_date,
                tags: entry.tags.iter().copied().collect::<BTreeSet<_>>(),
                eligibility: Eligibility::from_confidence(entry.confidence, entry.reasoning),
                source_name: entry.funder.to_string(),
                source_url: entry.url.to_string(),
                origin: Origin::Fallback,
                discovered_at,
                status: GrantRecord::DISCOVERED_STATUS.to_string(),
            }
        })
        .collect()
}
