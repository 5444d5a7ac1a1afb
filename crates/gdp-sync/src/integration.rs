//! Upsert reconciliation against the grant store, run statistics, and the
//! composed status view.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use gdp_core::{DiscoveredGrants, DiscoveryStats, GrantRecord, SyncSummary};
use gdp_scraper::{GrantScraper, ScrapeReport};
use gdp_storage::{
    CreateOutcome, GrantStore, StateError, StateStore, StoreError, DISCOVERED_GRANTS_FILE, DISCOVERY_STATS_FILE,
};
use serde::Serialize;
use tracing::{info, info_span, warn, Instrument};

use crate::scheduler::SchedulerSnapshot;

/// Outcome of one discovery pass through the store.
#[derive(Debug, Clone)]
pub struct DiscoveryRun {
    pub report: ScrapeReport,
    pub summary: SyncSummary,
    pub stats: DiscoveryStats,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Upserted {
    Added,
    Updated,
}

/// Store reachability, as reported by the status view.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StoreHealth {
    Healthy { stats: serde_json::Value },
    Unhealthy { error: String },
}

/// One independently probed section of the status view.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Section<T> {
    Ok { value: T },
    Missing,
    Error { error: String },
}

impl<T> Section<T> {
    pub fn from_state(result: Result<Option<T>, StateError>) -> Self {
        match result {
            Ok(Some(value)) => Section::Ok { value },
            Ok(None) => Section::Missing,
            Err(err) => Section::Error { error: err.to_string() },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SystemStatus {
    pub integration_initialized: bool,
    pub store: StoreHealth,
    pub discovery_stats: Section<DiscoveryStats>,
    pub scheduler: Section<SchedulerSnapshot>,
    pub checked_at: DateTime<Utc>,
}

pub struct Integration {
    store: Arc<dyn GrantStore>,
    state: StateStore,
    call_timeout: Duration,
    initialized: AtomicBool,
}

impl Integration {
    pub fn new(store: Arc<dyn GrantStore>, state: StateStore) -> Self {
        Self {
            store,
            state,
            call_timeout: Duration::from_secs(30),
            initialized: AtomicBool::new(false),
        }
    }

    /// Upper bound for one store call, retries included.
    pub fn with_call_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self
    }

    pub fn state(&self) -> &StateStore {
        &self.state
    }

    /// Ensures the state directory exists.
    pub async fn initialize(&self) -> Result<(), StateError> {
        let root = self.state.root();
        tokio::fs::create_dir_all(root).await.map_err(|source| StateError::Io {
            path: root.to_path_buf(),
            source,
        })?;
        self.initialized.store(true, Ordering::Release);
        info!(state_dir = %root.display(), "integration initialized");
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// Creates each grant, updating it instead when the store reports a
    /// conflict. A failed record is skipped; the batch always completes.
    pub async fn sync_grants(&self, grants: &[GrantRecord]) -> SyncSummary {
        let span = info_span!("sync_grants", records = grants.len());
        async {
            let mut summary = SyncSummary::default();
            for grant in grants {
                match self.upsert(grant).await {
                    Ok(Upserted::Added) => summary.added += 1,
                    Ok(Upserted::Updated) => summary.updated += 1,
                    Err(err) => {
                        warn!(grant = %grant.name, grant_id = %grant.id, error = %err, "grant sync failed, skipping");
                        summary.skipped += 1;
                    }
                }
            }
            info!(
                added = summary.added,
                updated = summary.updated,
                skipped = summary.skipped,
                "grant sync complete"
            );
            summary
        }
        .instrument(span)
        .await
    }

    async fn upsert(&self, grant: &GrantRecord) -> Result<Upserted, StoreError> {
        match self.bounded(self.store.create_grant(grant)).await? {
            CreateOutcome::Created => Ok(Upserted::Added),
            CreateOutcome::Conflict => {
                self.bounded(self.store.update_grant(&grant.id, grant)).await?;
                Ok(Upserted::Updated)
            }
        }
    }

    async fn bounded<T>(&self, call: impl Future<Output = Result<T, StoreError>>) -> Result<T, StoreError> {
        match tokio::time::timeout(self.call_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Message(format!(
                "grant store call timed out after {:?}",
                self.call_timeout
            ))),
        }
    }

    /// Replaces the discovery statistics snapshot.
    pub async fn record_discovery(
        &self,
        grants: &[GrantRecord],
        discovered_at: DateTime<Utc>,
    ) -> Result<DiscoveryStats, StateError> {
        let stats = DiscoveryStats::from_records(grants, discovered_at);
        self.state.save_json(DISCOVERY_STATS_FILE, &stats).await?;
        Ok(stats)
    }

    /// Replaces the latest-run grant snapshot. `sources` lists every
    /// configured source, not only the ones that produced grants.
    pub async fn save_discovered_grants(&self, report: &ScrapeReport) -> Result<(), StateError> {
        let snapshot = DiscoveredGrants {
            grants: report.records.clone(),
            last_updated: Utc::now(),
            total: report.records.len(),
            sources: report.sources.iter().map(|s| s.source_name.clone()).collect(),
            scrape_date: report.discovered_at,
        };
        self.state.save_json(DISCOVERED_GRANTS_FILE, &snapshot).await?;
        Ok(())
    }

    pub async fn load_discovery_stats(&self) -> Result<Option<DiscoveryStats>, StateError> {
        self.state.load_json(DISCOVERY_STATS_FILE).await
    }

    /// Scrape, snapshot, sync, and record statistics. Store and state
    /// failures are logged per record or per file; the run itself completes.
    pub async fn run_full_discovery(&self, scraper: &GrantScraper) -> Result<DiscoveryRun> {
        let report = scraper.scrape_all_sources().await;
        if let Err(err) = self.save_discovered_grants(&report).await {
            warn!(error = %err, "could not persist discovered grants");
        }

        let summary = self.sync_grants(&report.records).await;
        if summary.skipped > 0 && summary.skipped == report.records.len() {
            warn!(skipped = summary.skipped, "grant store accepted none of the discovered grants");
        }

        let stats = match self.record_discovery(&report.records, report.discovered_at).await {
            Ok(stats) => stats,
            Err(err) => {
                warn!(error = %err, "could not persist discovery statistics");
                DiscoveryStats::from_records(&report.records, report.discovered_at)
            }
        };
        Ok(DiscoveryRun { report, summary, stats })
    }

    pub async fn store_health(&self) -> StoreHealth {
        match self.bounded(self.store.probe()).await {
            Ok(stats) => StoreHealth::Healthy { stats },
            Err(err) => StoreHealth::Unhealthy { error: err.to_string() },
        }
    }

    /// Composed health view. Each section fails on its own.
    pub async fn status(&self, scheduler: Section<SchedulerSnapshot>) -> SystemStatus {
        SystemStatus {
            integration_initialized: self.is_initialized(),
            store: self.store_health().await,
            discovery_stats: Section::from_state(self.load_discovery_stats().await),
            scheduler,
            checked_at: Utc::now(),
        }
    }
}
