//! Durable pipeline state files + the grant store HTTP client.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use gdp_core::GrantRecord;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info_span, warn, Instrument};
use uuid::Uuid;

pub const CRATE_NAME: &str = "gdp-storage";

pub const RUN_STATS_FILE: &str = "scheduler_stats.json";
pub const DISCOVERY_STATS_FILE: &str = "discovery_stats.json";
pub const DISCOVERED_GRANTS_FILE: &str = "discovered_grants.json";

#[derive(Debug, Error)]
pub enum StateError {
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid json in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl StateError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        StateError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Directory of single-record JSON files, each overwritten atomically.
#[derive(Debug, Clone)]
pub struct StateStore {
    root: PathBuf,
}

impl StateStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// Reads a state record. A missing file is `Ok(None)`, not an error.
    pub async fn load_json<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>, StateError> {
        let path = self.path_for(name);
        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(StateError::io(&path, err)),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|source| StateError::Json { path, source })
    }

    /// Replaces a state record via temp-file write and rename, so readers never
    /// observe a half-written file.
    pub async fn save_json<T: Serialize>(&self, name: &str, value: &T) -> Result<PathBuf, StateError> {
        let path = self.path_for(name);
        let bytes = serde_json::to_vec_pretty(value).map_err(|source| StateError::Json {
            path: path.clone(),
            source,
        })?;

        fs::create_dir_all(&self.root)
            .await
            .map_err(|err| StateError::io(&self.root, err))?;

        let temp_path = self.root.join(format!(".{name}.{}.tmp", Uuid::new_v4()));
        let mut file = fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&temp_path)
            .await
            .map_err(|err| StateError::io(&temp_path, err))?;
        let written = async {
            file.write_all(&bytes).await?;
            file.flush().await?;
            file.sync_all().await
        }
        .await;
        drop(file);
        if let Err(err) = written {
            let _ = fs::remove_file(&temp_path).await;
            return Err(StateError::io(&temp_path, err));
        }

        if let Err(err) = fs::rename(&temp_path, &path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(StateError::io(&path, err));
        }
        debug!(path = %path.display(), bytes = bytes.len(), "state file written");
        Ok(path)
    }
}

/// Result of a create call. A conflict is an expected answer, not a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    Created,
    Conflict,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("request to {url} timed out")]
    Timeout { url: String },
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("{0}")]
    Message(String),
}

/// Authoritative grant store, consumed through an upsert protocol.
#[async_trait]
pub trait GrantStore: Send + Sync {
    async fn create_grant(&self, grant: &GrantRecord) -> Result<CreateOutcome, StoreError>;

    async fn update_grant(&self, id: &str, grant: &GrantRecord) -> Result<(), StoreError>;

    /// Lightweight aggregate query used only for health reporting.
    async fn probe(&self) -> Result<serde_json::Value, StoreError>;
}

/// Overload and outages are worth re-sending; conflicts and validation
/// errors are answers.
pub fn is_transient_status(status: StatusCode) -> bool {
    status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS
}

fn is_transient_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect()
}

/// How often a store call that failed transiently is sent again.
/// The pause grows linearly with the number of sends so far.
#[derive(Debug, Clone, Copy)]
pub struct StoreRetry {
    pub resends: usize,
    pub pause: Duration,
}

impl Default for StoreRetry {
    fn default() -> Self {
        Self {
            resends: 1,
            pause: Duration::from_millis(250),
        }
    }
}

impl StoreRetry {
    pub fn disabled() -> Self {
        Self {
            resends: 0,
            ..Default::default()
        }
    }

    /// Pause before the next send, given `sent` sends so far, or `None`
    /// when the last reply should be returned as is.
    pub fn pause_after(&self, sent: usize, transient: bool) -> Option<Duration> {
        (transient && sent <= self.resends).then(|| self.pause.saturating_mul(sent as u32))
    }
}

#[derive(Debug, Clone)]
pub struct GrantStoreConfig {
    pub base_url: String,
    pub request_timeout: Duration,
    pub probe_timeout: Duration,
    pub user_agent: Option<String>,
    pub retry: StoreRetry,
}

impl Default for GrantStoreConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3001".to_string(),
            request_timeout: Duration::from_secs(10),
            probe_timeout: Duration::from_secs(5),
            user_agent: None,
            retry: StoreRetry::default(),
        }
    }
}

/// `GrantStore` over the store's REST API:
/// `POST /api/grants`, `PUT /api/grants/{id}`, `GET /api/grants/stats`.
#[derive(Debug, Clone)]
pub struct HttpGrantStore {
    client: reqwest::Client,
    base_url: String,
    probe_timeout: Duration,
    retry: StoreRetry,
}

impl HttpGrantStore {
    pub fn new(config: GrantStoreConfig) -> Result<Self, StoreError> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.request_timeout);
        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }
        let client = builder
            .build()
            .map_err(|e| StoreError::Message(format!("building reqwest client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            probe_timeout: config.probe_timeout,
            retry: config.retry,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn grants_url(&self) -> String {
        format!("{}/api/grants", self.base_url)
    }

    async fn send_with_retry<F>(&self, url: &str, build: F) -> Result<reqwest::Response, StoreError>
    where
        F: Fn() -> reqwest::RequestBuilder,
    {
        let mut sent = 0usize;
        loop {
            let reply = build().send().await;
            sent += 1;
            let transient = match &reply {
                Ok(resp) => is_transient_status(resp.status()),
                Err(err) => is_transient_error(err),
            };
            match self.retry.pause_after(sent, transient) {
                Some(pause) => {
                    debug!(url, sent, ?pause, "re-sending store call");
                    tokio::time::sleep(pause).await;
                }
                None => return reply.map_err(|err| map_reqwest_error(url, err)),
            }
        }
    }
}

fn map_reqwest_error(url: &str, err: reqwest::Error) -> StoreError {
    if err.is_timeout() {
        StoreError::Timeout {
            url: url.to_string(),
        }
    } else {
        StoreError::Request {
            url: url.to_string(),
            source: err,
        }
    }
}

#[async_trait]
impl GrantStore for HttpGrantStore {
    async fn create_grant(&self, grant: &GrantRecord) -> Result<CreateOutcome, StoreError> {
        let url = self.grants_url();
        let span = info_span!("store_create", grant_id = %grant.id);
        let resp = self
            .send_with_retry(&url, || self.client.post(&url).json(grant))
            .instrument(span)
            .await?;
        let status = resp.status();
        if status.is_success() {
            Ok(CreateOutcome::Created)
        } else if status == StatusCode::CONFLICT {
            Ok(CreateOutcome::Conflict)
        } else {
            Err(StoreError::HttpStatus {
                status: status.as_u16(),
                url,
            })
        }
    }

    async fn update_grant(&self, id: &str, grant: &GrantRecord) -> Result<(), StoreError> {
        let url = format!("{}/{}", self.grants_url(), id);
        let span = info_span!("store_update", grant_id = %id);
        let resp = self
            .send_with_retry(&url, || self.client.put(&url).json(grant))
            .instrument(span)
            .await?;
        let status = resp.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(StoreError::HttpStatus {
                status: status.as_u16(),
                url,
            })
        }
    }

    async fn probe(&self) -> Result<serde_json::Value, StoreError> {
        let url = format!("{}/stats", self.grants_url());
        let resp = self
            .client
            .get(&url)
            .timeout(self.probe_timeout)
            .send()
            .await
            .map_err(|err| map_reqwest_error(&url, err))?;
        let status = resp.status();
        if !status.is_success() {
            warn!(url, status = status.as_u16(), "grant store probe failed");
            return Err(StoreError::HttpStatus {
                status: status.as_u16(),
                url,
            });
        }
        resp.json()
            .await
            .map_err(|err| map_reqwest_error(&url, err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use std::sync::{Arc, Mutex};

    use axum::extract::{Path as AxumPath, State};
    use axum::http::StatusCode as AxumStatus;
    use axum::routing::{get, post, put};
    use axum::{Json, Router};
    use chrono::{TimeZone, Utc};
    use gdp_core::{DueDate, Eligibility, Origin, RunStats, Tag};
    use serde_json::json;
    use tempfile::tempdir;

    #[derive(Default)]
    struct MockStore {
        existing: Vec<String>,
        broken: Vec<String>,
        /// Posts answered with 503 before the store starts accepting.
        overloaded: usize,
        posts: Vec<String>,
        puts: Vec<String>,
    }

    type Shared = Arc<Mutex<MockStore>>;

    async fn create(State(state): State<Shared>, Json(body): Json<serde_json::Value>) -> AxumStatus {
        let id = body["id"].as_str().unwrap_or_default().to_string();
        let mut store = state.lock().unwrap();
        store.posts.push(id.clone());
        if store.overloaded > 0 {
            store.overloaded -= 1;
            AxumStatus::SERVICE_UNAVAILABLE
        } else if store.broken.contains(&id) {
            AxumStatus::BAD_REQUEST
        } else if store.existing.contains(&id) {
            AxumStatus::CONFLICT
        } else {
            store.existing.push(id);
            AxumStatus::CREATED
        }
    }

    async fn update(State(state): State<Shared>, AxumPath(id): AxumPath<String>) -> AxumStatus {
        let mut store = state.lock().unwrap();
        store.puts.push(id);
        AxumStatus::OK
    }

    async fn stats(State(state): State<Shared>) -> Json<serde_json::Value> {
        let store = state.lock().unwrap();
        Json(json!({ "total": store.existing.len() }))
    }

    async fn spawn_mock(state: Shared) -> String {
        let app = Router::new()
            .route("/api/grants", post(create))
            .route("/api/grants/stats", get(stats))
            .route("/api/grants/{id}", put(update))
            .with_state(state);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn client(base_url: String) -> HttpGrantStore {
        HttpGrantStore::new(GrantStoreConfig {
            base_url,
            retry: StoreRetry::disabled(),
            ..Default::default()
        })
        .unwrap()
    }

    fn grant(id: &str) -> GrantRecord {
        GrantRecord {
            id: id.to_string(),
            name: format!("Grant {id}"),
            funder: "Screen Australia".into(),
            description: "desc".into(),
            amount_text: "$10,000".into(),
            due_date: DueDate::Ongoing,
            tags: BTreeSet::from([Tag::General]),
            eligibility: Eligibility::from_confidence(0.3, "General grant opportunity"),
            source_name: "Screen Australia".into(),
            source_url: "https://example.org".into(),
            origin: Origin::Scraped,
            discovered_at: Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).single().unwrap(),
            status: "potential".into(),
        }
    }

    #[tokio::test]
    async fn create_distinguishes_conflict_from_failure() {
        let state: Shared = Arc::new(Mutex::new(MockStore {
            existing: vec!["dup".into()],
            broken: vec!["bad".into()],
            ..Default::default()
        }));
        let store = client(spawn_mock(state.clone()).await);

        assert_eq!(store.create_grant(&grant("new")).await.unwrap(), CreateOutcome::Created);
        assert_eq!(store.create_grant(&grant("dup")).await.unwrap(), CreateOutcome::Conflict);
        let err = store.create_grant(&grant("bad")).await.unwrap_err();
        assert!(matches!(err, StoreError::HttpStatus { status: 400, .. }));

        store.update_grant("dup", &grant("dup")).await.unwrap();
        assert_eq!(state.lock().unwrap().puts, vec!["dup".to_string()]);
    }

    #[tokio::test]
    async fn overloaded_store_is_resent_once_then_reported() {
        let state: Shared = Arc::new(Mutex::new(MockStore {
            overloaded: 1,
            ..Default::default()
        }));
        let base_url = spawn_mock(state.clone()).await;
        let store = HttpGrantStore::new(GrantStoreConfig {
            base_url,
            retry: StoreRetry {
                resends: 1,
                pause: Duration::from_millis(10),
            },
            ..Default::default()
        })
        .unwrap();

        assert_eq!(store.create_grant(&grant("a")).await.unwrap(), CreateOutcome::Created);
        assert_eq!(state.lock().unwrap().posts.len(), 2);

        state.lock().unwrap().overloaded = 2;
        let err = store.create_grant(&grant("b")).await.unwrap_err();
        assert!(matches!(err, StoreError::HttpStatus { status: 503, .. }));
        assert_eq!(state.lock().unwrap().posts.len(), 4);
    }

    #[tokio::test]
    async fn probe_returns_the_stats_body() {
        let state: Shared = Arc::new(Mutex::new(MockStore {
            existing: vec!["a".into(), "b".into()],
            ..Default::default()
        }));
        let store = client(spawn_mock(state).await);
        let body = store.probe().await.unwrap();
        assert_eq!(body["total"], 2);
    }

    #[tokio::test]
    async fn unreachable_store_is_a_request_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let store = client(format!("http://{addr}"));
        assert!(store.probe().await.is_err());
        assert!(store.create_grant(&grant("x")).await.is_err());
    }

    #[tokio::test]
    async fn state_files_round_trip_and_missing_is_none() {
        let dir = tempdir().expect("tempdir");
        let state = StateStore::new(dir.path().join("state"));

        let missing: Option<RunStats> = state.load_json(RUN_STATS_FILE).await.unwrap();
        assert!(missing.is_none());

        let stats = RunStats {
            total_runs: 2,
            successful_runs: 1,
            failed_runs: 1,
            total_grants_discovered: 5,
            last_run_time: None,
        };
        state.save_json(RUN_STATS_FILE, &stats).await.unwrap();
        let loaded: Option<RunStats> = state.load_json(RUN_STATS_FILE).await.unwrap();
        assert_eq!(loaded, Some(stats));
    }

    #[tokio::test]
    async fn saves_replace_previous_snapshot_without_leaving_temp_files() {
        let dir = tempdir().expect("tempdir");
        let state = StateStore::new(dir.path());
        state.save_json("snap.json", &json!({"v": 1})).await.unwrap();
        state.save_json("snap.json", &json!({"v": 2})).await.unwrap();

        let loaded: Option<serde_json::Value> = state.load_json("snap.json").await.unwrap();
        assert_eq!(loaded, Some(json!({"v": 2})));
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn corrupt_state_is_reported_not_swallowed() {
        let dir = tempdir().expect("tempdir");
        std::fs::write(dir.path().join(RUN_STATS_FILE), b"{not json").unwrap();
        let state = StateStore::new(dir.path());
        let err = state.load_json::<RunStats>(RUN_STATS_FILE).await.unwrap_err();
        assert!(matches!(err, StateError::Json { .. }));
    }

    #[test]
    fn transient_failures_are_resent_with_growing_pauses() {
        let retry = StoreRetry {
            resends: 2,
            pause: Duration::from_millis(100),
        };
        assert_eq!(retry.pause_after(1, true), Some(Duration::from_millis(100)));
        assert_eq!(retry.pause_after(2, true), Some(Duration::from_millis(200)));
        assert_eq!(retry.pause_after(3, true), None);
        assert_eq!(retry.pause_after(1, false), None);
        assert_eq!(StoreRetry::disabled().pause_after(1, true), None);
    }

    #[test]
    fn only_server_errors_and_throttling_are_transient() {
        assert!(is_transient_status(StatusCode::BAD_GATEWAY));
        assert!(is_transient_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(!is_transient_status(StatusCode::CONFLICT));
        assert!(!is_transient_status(StatusCode::NOT_FOUND));
    }
}
