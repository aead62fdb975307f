//! Best-effort query logging side channel and its authenticated aggregation.
//!
//! Recording never fails the caller: sink errors are traced at debug level and
//! dropped.

use crate::config::{QueryLogConfig, QueryLogSink};
use crate::errors::{AppError, AppResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::future::Future;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use subtle::ConstantTimeEq;
use tokio::task::JoinHandle;

pub const RECENT_ENTRIES: usize = 50;
pub const DEFAULT_TOP_QUERIES: usize = 10;
const UNKNOWN: &str = "unknown";
const HTTP_SINK_TIMEOUT_SECONDS: u64 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LogStage {
    Plan,
    Narrate,
}

impl LogStage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Plan => "plan",
            Self::Narrate => "narrate",
        }
    }
}

/// Origin metadata attached to each entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestMeta {
    pub ip: Option<String>,
    pub country: Option<String>,
    pub user_agent: Option<String>,
}

impl RequestMeta {
    pub fn local() -> Self {
        Self {
            ip: None,
            country: None,
            user_agent: Some(concat!("eeg-insight/", env!("CARGO_PKG_VERSION")).to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryLogEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub query: String,
    pub stage: LogStage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(flatten)]
    pub meta: RequestMeta,
}

impl QueryLogEntry {
    pub fn new(query: impl Into<String>, stage: LogStage, outcome: Result<String, String>, meta: RequestMeta) -> Self {
        let (response, error) = match outcome {
            Ok(response) => (Some(response), None),
            Err(error) => (None, Some(error)),
        };
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            query: query.into(),
            stage,
            response,
            error,
            meta,
        }
    }
}

pub type FlushFuture<'a> = Pin<Box<dyn Future<Output = ()> + Send + 'a>>;

pub trait QueryLogger: Send + Sync {
    fn record(&self, entry: QueryLogEntry);

    /// Waits up to `timeout` for entries still being written.
    fn flush(&self, _timeout: Duration) -> FlushFuture<'_> {
        Box::pin(async {})
    }
}

/// Background writes a sink has started but not yet finished.
#[derive(Debug, Clone, Default)]
struct PendingWrites {
    handles: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl PendingWrites {
    fn track(&self, handle: JoinHandle<()>) {
        if let Ok(mut handles) = self.handles.lock() {
            handles.retain(|handle| !handle.is_finished());
            handles.push(handle);
        }
    }

    async fn drain(&self, timeout: Duration) {
        let handles = match self.handles.lock() {
            Ok(mut handles) => std::mem::take(&mut *handles),
            Err(_) => return,
        };
        if handles.is_empty() {
            return;
        }
        let pending = handles.len();
        let wait_all = async move {
            for handle in handles {
                let _ = handle.await;
            }
        };
        if tokio::time::timeout(timeout, wait_all).await.is_err() {
            tracing::debug!(pending, "query log entries still in flight at shutdown");
        }
    }
}

#[derive(Debug, Default)]
pub struct NoopQueryLogger;

impl QueryLogger for NoopQueryLogger {
    fn record(&self, _entry: QueryLogEntry) {}
}

/// Appends one JSON object per line.
#[derive(Debug, Clone)]
pub struct FileQueryLogger {
    path: PathBuf,
    write_lock: Arc<Mutex<()>>,
    pending: PendingWrites,
}

impl FileQueryLogger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Arc::new(Mutex::new(())),
            pending: PendingWrites::default(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, entry: &QueryLogEntry) -> AppResult<()> {
        let line = serde_json::to_string(entry)?;
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| AppError::Internal("query log lock poisoned".to_string()))?;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{}", line)?;
        Ok(())
    }
}

impl QueryLogger for FileQueryLogger {
    fn record(&self, entry: QueryLogEntry) {
        let logger = self.clone();
        let write = move || {
            if let Err(error) = logger.append(&entry) {
                tracing::debug!(error = %error, path = %logger.path.display(), "query log append failed");
            }
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => self.pending.track(handle.spawn_blocking(write)),
            Err(_) => write(),
        }
    }

    fn flush(&self, timeout: Duration) -> FlushFuture<'_> {
        Box::pin(self.pending.drain(timeout))
    }
}

/// POSTs each entry to a remote collector.
#[derive(Debug, Clone)]
pub struct HttpQueryLogger {
    http: reqwest::Client,
    endpoint: String,
    pending: PendingWrites,
}

impl HttpQueryLogger {
    pub fn new(endpoint: impl Into<String>) -> AppResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(HTTP_SINK_TIMEOUT_SECONDS))
            .build()
            .map_err(|error| AppError::Config(format!("Failed to build HTTP client: {}", error)))?;
        Ok(Self {
            http,
            endpoint: endpoint.into(),
            pending: PendingWrites::default(),
        })
    }

    pub async fn send(&self, entry: &QueryLogEntry) -> AppResult<()> {
        self.http
            .post(&self.endpoint)
            .json(entry)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|error| AppError::Io(format!("query log sink: {}", error)))?;
        Ok(())
    }
}

impl QueryLogger for HttpQueryLogger {
    fn record(&self, entry: QueryLogEntry) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::debug!("no runtime available; query log entry dropped");
            return;
        };
        let logger = self.clone();
        self.pending.track(handle.spawn(async move {
            if let Err(error) = logger.send(&entry).await {
                tracing::debug!(error = %error, "query log post failed");
            }
        }));
    }

    fn flush(&self, timeout: Duration) -> FlushFuture<'_> {
        Box::pin(self.pending.drain(timeout))
    }
}

pub fn build_logger(config: &QueryLogConfig) -> AppResult<Arc<dyn QueryLogger>> {
    let logger: Arc<dyn QueryLogger> = match config.sink {
        QueryLogSink::None => Arc::new(NoopQueryLogger),
        QueryLogSink::File => Arc::new(FileQueryLogger::new(config.path.clone())),
        QueryLogSink::Http => {
            let endpoint = config
                .endpoint
                .clone()
                .ok_or_else(|| AppError::Config("query_log.endpoint is required for the http sink".to_string()))?;
            Arc::new(HttpQueryLogger::new(endpoint)?)
        }
    };
    Ok(logger)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TopQuery {
    pub query: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogSummary {
    pub total_queries: usize,
    pub total_entries: usize,
    pub unique_visitors: usize,
    pub countries: BTreeMap<String, usize>,
    pub top_queries: Vec<TopQuery>,
    pub recent: Vec<QueryLogEntry>,
}

/// Read side of the line-delimited log.
#[derive(Debug, Clone)]
pub struct LogStore {
    path: PathBuf,
}

impl LogStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Entries in file order. A missing file is an empty log; unreadable lines are skipped.
    pub fn read_all(&self) -> AppResult<Vec<QueryLogEntry>> {
        let file = match std::fs::File::open(&self.path) {
            Ok(file) => file,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(error) => return Err(error.into()),
        };
        let mut entries = Vec::new();
        let mut skipped = 0usize;
        for line in BufReader::new(file).lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<QueryLogEntry>(&line) {
                Ok(entry) => entries.push(entry),
                Err(_) => skipped += 1,
            }
        }
        if skipped > 0 {
            tracing::warn!(skipped, path = %self.path.display(), "skipped malformed query log lines");
        }
        Ok(entries)
    }

    pub fn summary(&self, authorization: Option<&str>, secret: Option<&str>, top_n: usize) -> AppResult<LogSummary> {
        authorize(authorization, secret)?;
        Ok(summarize(&self.read_all()?, top_n))
    }
}

/// Expects `Bearer <secret>`. An unset or empty secret denies every request.
pub fn authorize(authorization: Option<&str>, secret: Option<&str>) -> AppResult<()> {
    let Some(secret) = secret.filter(|secret| !secret.is_empty()) else {
        return Err(AppError::Unauthorized("stats secret is not configured".to_string()));
    };
    let provided = authorization
        .and_then(|header| header.trim().strip_prefix("Bearer "))
        .map(str::trim)
        .unwrap_or_default();
    if bool::from(provided.as_bytes().ct_eq(secret.as_bytes())) {
        Ok(())
    } else {
        Err(AppError::Unauthorized("invalid bearer token".to_string()))
    }
}

pub fn summarize(entries: &[QueryLogEntry], top_n: usize) -> LogSummary {
    let plans = entries
        .iter()
        .filter(|entry| entry.stage == LogStage::Plan)
        .collect::<Vec<_>>();

    let visitors = entries
        .iter()
        .map(|entry| entry.meta.ip.as_deref().unwrap_or(UNKNOWN))
        .collect::<HashSet<_>>();

    let mut countries = BTreeMap::new();
    for entry in &plans {
        let country = entry
            .meta
            .country
            .as_deref()
            .filter(|country| !country.trim().is_empty())
            .unwrap_or(UNKNOWN);
        *countries.entry(country.to_string()).or_insert(0usize) += 1;
    }

    // Counted case-insensitively; the first spelling seen is reported.
    let mut counts: HashMap<String, (String, usize, usize)> = HashMap::new();
    for (order, entry) in plans.iter().enumerate() {
        let display = entry.query.trim();
        if display.is_empty() {
            continue;
        }
        let slot = counts
            .entry(display.to_lowercase())
            .or_insert_with(|| (display.to_string(), 0, order));
        slot.1 += 1;
    }
    let mut ranked = counts.into_values().collect::<Vec<_>>();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.2.cmp(&b.2)));
    let top_queries = ranked
        .into_iter()
        .take(top_n)
        .map(|(query, count, _)| TopQuery { query, count })
        .collect();

    let recent = entries.iter().rev().take(RECENT_ENTRIES).cloned().collect();

    LogSummary {
        total_queries: plans.len(),
        total_entries: entries.len(),
        unique_visitors: visitors.len(),
        countries,
        top_queries,
        recent,
    }
}
