//! Core domain model for the grant discovery pipeline.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

pub mod classify;

pub use classify::{assess_eligibility, classify, extract_tags, parse_deadline};

pub const CRATE_NAME: &str = "gdp-core";

/// Raw text pulled out of one grant item on a source page, before classification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateRecord {
    pub title: String,
    pub description: String,
    pub amount_text: String,
    pub deadline_text: String,
    pub source_name: String,
    pub source_url: String,
}

/// Provenance of a grant record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    Scraped,
    Fallback,
}

impl Origin {
    pub fn as_str(&self) -> &'static str {
        match self {
            Origin::Scraped => "scraped",
            Origin::Fallback => "fallback",
        }
    }
}

/// Controlled tag vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Tag {
    #[serde(rename = "FIRST NATIONS")]
    FirstNations,
    #[serde(rename = "DOCUMENTARY")]
    Documentary,
    #[serde(rename = "ARTS")]
    Arts,
    #[serde(rename = "COMMUNITY")]
    Community,
    #[serde(rename = "REGIONAL")]
    Regional,
    #[serde(rename = "SOCIAL IMPACT")]
    SocialImpact,
    #[serde(rename = "AUSTRALIAN STORIES")]
    AustralianStories,
    #[serde(rename = "SCREEN MEDIA")]
    ScreenMedia,
    #[serde(rename = "GENERAL")]
    General,
}

impl Tag {
    pub fn label(&self) -> &'static str {
        match self {
            Tag::FirstNations => "FIRST NATIONS",
            Tag::Documentary => "DOCUMENTARY",
            Tag::Arts => "ARTS",
            Tag::Community => "COMMUNITY",
            Tag::Regional => "REGIONAL",
            Tag::SocialImpact => "SOCIAL IMPACT",
            Tag::AustralianStories => "AUSTRALIAN STORIES",
            Tag::ScreenMedia => "SCREEN MEDIA",
            Tag::General => "GENERAL",
        }
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EligibilityCategory {
    Eligible,
    EligibleWithAuspice,
    Potential,
    NotEligible,
}

impl EligibilityCategory {
    pub const ELIGIBLE_THRESHOLD: f64 = 0.9;
    pub const AUSPICE_THRESHOLD: f64 = 0.7;
    pub const POTENTIAL_THRESHOLD: f64 = 0.5;

    /// Maps any confidence value to exactly one category. NaN and values
    /// below the potential threshold fall through to `NotEligible`.
    pub fn from_confidence(confidence: f64) -> Self {
        if confidence >= Self::ELIGIBLE_THRESHOLD {
            EligibilityCategory::Eligible
        } else if confidence >= Self::AUSPICE_THRESHOLD {
            EligibilityCategory::EligibleWithAuspice
        } else if confidence >= Self::POTENTIAL_THRESHOLD {
            EligibilityCategory::Potential
        } else {
            EligibilityCategory::NotEligible
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EligibilityCategory::Eligible => "eligible",
            EligibilityCategory::EligibleWithAuspice => "eligible_with_auspice",
            EligibilityCategory::Potential => "potential",
            EligibilityCategory::NotEligible => "not_eligible",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Eligibility {
    pub category: EligibilityCategory,
    pub confidence: f64,
    pub reasoning: String,
}

impl Eligibility {
    /// Builds an assessment whose category always agrees with the confidence.
    pub fn from_confidence(confidence: f64, reasoning: impl Into<String>) -> Self {
        let confidence = if confidence.is_nan() {
            0.0
        } else {
            confidence.clamp(0.0, 1.0)
        };
        Self {
            category: EligibilityCategory::from_confidence(confidence),
            confidence,
            reasoning: reasoning.into(),
        }
    }
}

/// Due date of a grant once classification has run.
///
/// On the wire this is a plain string: an ISO calendar date, the sentinel
/// `ongoing`, or the deadline text exactly as it appeared on the page when no
/// date pattern could be read from it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DueDate {
    Date(NaiveDate),
    Ongoing,
    Unparsed(String),
}

impl DueDate {
    pub const ONGOING: &'static str = "ongoing";

    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            DueDate::Date(date) => Some(*date),
            _ => None,
        }
    }

    pub fn is_unparsed(&self) -> bool {
        matches!(self, DueDate::Unparsed(_))
    }

    /// Reads the wire form back. Only an exact ISO date becomes `Date`.
    pub fn from_wire(value: &str) -> Self {
        if value.trim().eq_ignore_ascii_case(Self::ONGOING) {
            return DueDate::Ongoing;
        }
        match NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d") {
            Ok(date) => DueDate::Date(date),
            Err(_) => DueDate::Unparsed(value.to_string()),
        }
    }
}

impl fmt::Display for DueDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DueDate::Date(date) => write!(f, "{}", date.format("%Y-%m-%d")),
            DueDate::Ongoing => f.write_str(Self::ONGOING),
            DueDate::Unparsed(raw) => f.write_str(raw),
        }
    }
}

impl Serialize for DueDate {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for DueDate {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(DueDate::from_wire(&raw))
    }
}

/// Classified grant, the unit synchronized to the external grant store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GrantRecord {
    pub id: String,
    pub name: String,
    pub funder: String,
    pub description: String,
    #[serde(rename = "amount_string")]
    pub amount_text: String,
    pub due_date: DueDate,
    pub tags: BTreeSet<Tag>,
    pub eligibility: Eligibility,
    pub source_name: String,
    pub source_url: String,
    pub origin: Origin,
    #[serde(rename = "created_at")]
    pub discovered_at: DateTime<Utc>,
    pub status: String,
}

impl GrantRecord {
    pub const DISCOVERED_STATUS: &'static str = "potential";

    /// Stable id for a grant: the same origin, source URL and title always
    /// produce the same id, so a grant seen again is upserted instead of
    /// duplicated.
    pub fn derive_id(origin: Origin, source_url: &str, title: &str) -> String {
        let key = format!("{}|{}", source_url.trim(), normalize_key_fragment(title));
        let uuid = Uuid::new_v5(&Uuid::NAMESPACE_URL, key.as_bytes());
        format!("{}_{}", origin.as_str(), uuid.simple())
    }

    /// Key used to drop duplicate listings within one run.
    pub fn dedup_key(&self) -> String {
        format!(
            "{}|{}",
            normalize_key_fragment(&self.funder),
            normalize_key_fragment(&self.name)
        )
    }
}

/// Lowercases and collapses everything but ASCII alphanumerics to single spaces.
pub fn normalize_key_fragment(input: &str) -> String {
    input
        .to_ascii_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Cumulative scheduler counters, persisted across process restarts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunStats {
    pub total_runs: u64,
    pub successful_runs: u64,
    pub failed_runs: u64,
    pub total_grants_discovered: u64,
    pub last_run_time: Option<DateTime<Utc>>,
}

impl RunStats {
    pub fn record_success(&mut self, grants: usize, at: DateTime<Utc>) {
        self.total_runs += 1;
        self.successful_runs += 1;
        self.total_grants_discovered += grants as u64;
        self.last_run_time = Some(at);
    }

    pub fn record_failure(&mut self, at: DateTime<Utc>) {
        self.total_runs += 1;
        self.failed_runs += 1;
        self.last_run_time = Some(at);
    }
}

/// Per-batch upsert counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncSummary {
    pub added: usize,
    pub updated: usize,
    pub skipped: usize,
}

impl SyncSummary {
    pub fn total(&self) -> usize {
        self.added + self.updated + self.skipped
    }
}

/// Grouped counts for the latest discovery run. Replaced, never appended.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryStats {
    pub last_discovery: Option<DateTime<Utc>>,
    pub total_grants_discovered: usize,
    pub grants_by_source: BTreeMap<String, usize>,
    pub grants_by_eligibility: BTreeMap<String, usize>,
    pub grants_by_tag: BTreeMap<String, usize>,
}

impl DiscoveryStats {
    pub fn from_records(records: &[GrantRecord], at: DateTime<Utc>) -> Self {
        let mut stats = DiscoveryStats {
            last_discovery: Some(at),
            total_grants_discovered: records.len(),
            ..Default::default()
        };
        for record in records {
            *stats
                .grants_by_source
                .entry(record.source_name.clone())
                .or_default() += 1;
            *stats
                .grants_by_eligibility
                .entry(record.eligibility.category.as_str().to_string())
                .or_default() += 1;
            for tag in &record.tags {
                *stats.grants_by_tag.entry(tag.label().to_string()).or_default() += 1;
            }
        }
        stats
    }
}

/// Latest-run snapshot of every grant the pipeline produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveredGrants {
    pub grants: Vec<GrantRecord>,
    pub last_updated: DateTime<Utc>,
    pub total: usize,
    /// Every configured source of the run, including ones that yielded nothing.
    pub sources: Vec<String>,
    /// When the scrape that produced `grants` started.
    pub scrape_date: DateTime<Utc>,
}
