//! Persistent JSON document store, HTTP fetch utility, and the run ledgers.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Utc};
use freshtap_core::{BeerDetails, BoundedDeque, VenueDirectory};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::fs;
use tracing::info_span;
use uuid::Uuid;

pub const CRATE_NAME: &str = "freshtap-storage";

pub const METRICS_DOC: &str = "source_metrics.json";
pub const HISTORY_DOC: &str = "beer_history.json";
pub const DETAILS_DOC: &str = "beer_details.json";
pub const DISCOVERIES_DOC: &str = "discovered_venues.json";
pub const SNAPSHOT_DOC: &str = "merged_feed.json";

/// Directory-backed JSON document store. `load` returns the last-written
/// document or the type's default; `save` overwrites atomically via a
/// temp-file rename.
#[derive(Debug, Clone)]
pub struct DocumentStore {
    dir: PathBuf,
}

impl DocumentStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub async fn load<T: DeserializeOwned + Default>(&self, name: &str) -> anyhow::Result<T> {
        let path = self.dir.join(name);
        if !fs::try_exists(&path)
            .await
            .with_context(|| format!("checking document path {}", path.display()))?
        {
            return Ok(T::default());
        }
        let text = fs::read_to_string(&path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))
    }

    pub async fn save<T: Serialize>(&self, name: &str, value: &T) -> anyhow::Result<()> {
        fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("creating document directory {}", self.dir.display()))?;
        let path = self.dir.join(name);
        let temp_path = self.dir.join(format!(".{}.{}.tmp", name, Uuid::new_v4()));
        let bytes =
            serde_json::to_vec_pretty(value).with_context(|| format!("serializing {name}"))?;
        fs::write(&temp_path, &bytes)
            .await
            .with_context(|| format!("writing temp document {}", temp_path.display()))?;
        match fs::rename(&temp_path, &path).await {
            Ok(()) => Ok(()),
            Err(err) => {
                let _ = fs::remove_file(&temp_path).await;
                Err(err).with_context(|| {
                    format!(
                        "atomically renaming temp document {} -> {}",
                        temp_path.display(),
                        path.display()
                    )
                })
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: String,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(15),
            user_agent: "freshtap-bot/0.1".to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
}

/// Thin reqwest wrapper with a fixed per-request timeout. There is no
/// retry: a failed call is recorded as that source's error for the run and
/// re-attempted on the next scheduled run.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: reqwest::Client,
}

impl HttpClient {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout)
            .user_agent(config.user_agent)
            .build()
            .context("building reqwest client")?;
        Ok(Self { client })
    }

    pub async fn fetch_text(&self, source: &str, url: &str) -> Result<String, FetchError> {
        let span = info_span!("http_fetch", source, url);
        let _guard = span.enter();
        let resp = self.client.get(url).send().await?;
        let status = resp.status();
        let final_url = resp.url().to_string();
        if !status.is_success() {
            return Err(FetchError::HttpStatus {
                status: status.as_u16(),
                url: final_url,
            });
        }
        Ok(resp.text().await?)
    }
}

const ERROR_HISTORY_CAP: usize = 10;
const RUN_HISTORY_CAP: usize = 50;
const RECENT_RUN_WINDOW: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEntry {
    pub time: DateTime<Utc>,
    pub error: String,
}

/// Lifetime counters for one named source. Created on first attempt and
/// never deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceMetric {
    pub technique: String,
    pub attempts: u64,
    pub successes: u64,
    pub items_found: u64,
    pub errors: BoundedDeque<ErrorEntry>,
    pub first_seen: DateTime<Utc>,
    pub last_attempt: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunSourceOutcome {
    pub success: bool,
    pub items: u64,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub total_items: u64,
    pub sources: BTreeMap<String, RunSourceOutcome>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsDocument {
    pub sources: BTreeMap<String, SourceMetric>,
    pub runs: BoundedDeque<RunRecord>,
    pub created_at: DateTime<Utc>,
}

impl Default for MetricsDocument {
    fn default() -> Self {
        Self {
            sources: BTreeMap::new(),
            runs: BoundedDeque::new(RUN_HISTORY_CAP),
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceStatus {
    Active,
    Struggling,
    New,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceSummary {
    pub technique: String,
    pub attempts: u64,
    pub successes: u64,
    pub success_rate: f64,
    pub items_found: u64,
    pub items_per_success: f64,
    pub recent_success_rate: f64,
    pub recent_items: u64,
    pub last_attempt: Option<DateTime<Utc>>,
    pub status: SourceStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OverallSummary {
    pub total_sources: usize,
    pub total_attempts: u64,
    pub total_successes: u64,
    pub total_items: u64,
    pub success_rate: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSummary {
    pub generated_at: DateTime<Utc>,
    pub sources: BTreeMap<String, SourceSummary>,
    pub overall: OverallSummary,
}

/// Append-only ledger of per-source attempt/success/error counters plus a
/// bounded run history.
#[derive(Debug, Default)]
pub struct MetricsLedger {
    doc: MetricsDocument,
    current_run: Option<RunRecord>,
}

impl MetricsLedger {
    pub async fn load(store: &DocumentStore) -> anyhow::Result<Self> {
        let doc = store.load::<MetricsDocument>(METRICS_DOC).await?;
        Ok(Self {
            doc,
            current_run: None,
        })
    }

    pub async fn save(&self, store: &DocumentStore) -> anyhow::Result<()> {
        store.save(METRICS_DOC, &self.doc).await
    }

    pub fn record_attempt(&mut self, source: &str, technique: &str) {
        let now = Utc::now();
        let metric = self
            .doc
            .sources
            .entry(source.to_string())
            .or_insert_with(|| SourceMetric {
                technique: technique.to_string(),
                attempts: 0,
                successes: 0,
                items_found: 0,
                errors: BoundedDeque::new(ERROR_HISTORY_CAP),
                first_seen: now,
                last_attempt: None,
            });
        metric.attempts += 1;
        metric.last_attempt = Some(now);

        if let Some(run) = self.current_run.as_mut() {
            run.sources.entry(source.to_string()).or_default();
        }
    }

    /// No-op unless the source was attempted first.
    pub fn record_success(&mut self, source: &str, items_found: u64) {
        if let Some(metric) = self.doc.sources.get_mut(source) {
            metric.successes += 1;
            metric.items_found += items_found;
        }
        if let Some(outcome) = self
            .current_run
            .as_mut()
            .and_then(|run| run.sources.get_mut(source))
        {
            outcome.success = true;
            outcome.items = items_found;
        }
    }

    pub fn record_error(&mut self, source: &str, error: &str) {
        if let Some(metric) = self.doc.sources.get_mut(source) {
            metric.errors.push(ErrorEntry {
                time: Utc::now(),
                error: error.to_string(),
            });
        }
        if let Some(outcome) = self
            .current_run
            .as_mut()
            .and_then(|run| run.sources.get_mut(source))
        {
            outcome.error = Some(error.to_string());
        }
    }

    pub fn start_run(&mut self) -> Uuid {
        let run_id = Uuid::new_v4();
        self.current_run = Some(RunRecord {
            run_id,
            started_at: Utc::now(),
            ended_at: None,
            total_items: 0,
            sources: BTreeMap::new(),
        });
        run_id
    }

    pub fn end_run(&mut self, total_items: u64) -> Option<RunRecord> {
        let mut run = self.current_run.take()?;
        run.ended_at = Some(Utc::now());
        run.total_items = total_items;
        self.doc.runs.push(run.clone());
        Some(run)
    }

    pub fn source(&self, name: &str) -> Option<&SourceMetric> {
        self.doc.sources.get(name)
    }

    pub fn runs(&self) -> impl Iterator<Item = &RunRecord> {
        self.doc.runs.iter()
    }

    pub fn summary(&self) -> MetricsSummary {
        let mut sources = BTreeMap::new();
        let mut overall = OverallSummary::default();

        for (name, metric) in &self.doc.sources {
            let success_rate = if metric.attempts > 0 {
                metric.successes as f64 / metric.attempts as f64 * 100.0
            } else {
                0.0
            };
            let items_per_success = if metric.successes > 0 {
                metric.items_found as f64 / metric.successes as f64
            } else {
                0.0
            };

            // Trailing window over the runs in which this source was attempted.
            let recent: Vec<&RunSourceOutcome> = self
                .doc
                .runs
                .iter()
                .filter_map(|run| run.sources.get(name))
                .collect();
            let recent = &recent[recent.len().saturating_sub(RECENT_RUN_WINDOW)..];
            let recent_successes = recent.iter().filter(|o| o.success).count();
            let recent_items: u64 = recent.iter().map(|o| o.items).sum();
            let recent_success_rate = if recent.is_empty() {
                0.0
            } else {
                recent_successes as f64 / recent.len() as f64 * 100.0
            };

            // Sources need a few attempts before they are judged.
            let status = if metric.attempts <= 5 {
                SourceStatus::New
            } else if success_rate > 50.0 {
                SourceStatus::Active
            } else {
                SourceStatus::Struggling
            };

            overall.total_attempts += metric.attempts;
            overall.total_successes += metric.successes;
            overall.total_items += metric.items_found;

            sources.insert(
                name.clone(),
                SourceSummary {
                    technique: metric.technique.clone(),
                    attempts: metric.attempts,
                    successes: metric.successes,
                    success_rate,
                    items_found: metric.items_found,
                    items_per_success,
                    recent_success_rate,
                    recent_items,
                    last_attempt: metric.last_attempt,
                    status,
                },
            );
        }

        overall.total_sources = self.doc.sources.len();
        overall.success_rate = if overall.total_attempts > 0 {
            overall.total_successes as f64 / overall.total_attempts as f64 * 100.0
        } else {
            0.0
        };

        MetricsSummary {
            generated_at: Utc::now(),
            sources,
            overall,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Freshness {
    pub first_seen_at: DateTime<Utc>,
    pub is_new: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct HistoryDocument {
    entries: BTreeMap<String, DateTime<Utc>>,
}

/// Persistent first-seen ledger. A key's timestamp is written once and
/// never overwritten, so rescraping the same beverage does not reset its
/// "new" clock.
#[derive(Debug, Default)]
pub struct HistoryLedger {
    doc: HistoryDocument,
}

impl HistoryLedger {
    pub async fn load(store: &DocumentStore) -> anyhow::Result<Self> {
        let doc = store.load::<HistoryDocument>(HISTORY_DOC).await?;
        Ok(Self { doc })
    }

    pub async fn save(&self, store: &DocumentStore) -> anyhow::Result<()> {
        store.save(HISTORY_DOC, &self.doc).await
    }

    pub fn first_seen(&self, key: &str) -> Option<DateTime<Utc>> {
        self.doc.entries.get(key).copied()
    }

    pub fn len(&self) -> usize {
        self.doc.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.doc.entries.is_empty()
    }

    pub fn classify(
        &mut self,
        key: &str,
        observed_at: DateTime<Utc>,
        now: DateTime<Utc>,
        new_window: chrono::Duration,
    ) -> Freshness {
        let first_seen_at = *self
            .doc
            .entries
            .entry(key.to_string())
            .or_insert(observed_at);
        Freshness {
            first_seen_at,
            is_new: now - first_seen_at <= new_window,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetailCacheEntry {
    pub beer: BeerDetails,
    pub cached_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct DetailCacheDocument {
    entries: HashMap<String, DetailCacheEntry>,
}

/// URL-keyed cache of detail-page enrichment. Complete entries are served
/// without a refetch; partial entries stay eligible for retry.
#[derive(Debug, Default)]
pub struct DetailCache {
    doc: DetailCacheDocument,
}

impl DetailCache {
    pub async fn load(store: &DocumentStore) -> anyhow::Result<Self> {
        let doc = store.load::<DetailCacheDocument>(DETAILS_DOC).await?;
        Ok(Self { doc })
    }

    pub async fn save(&self, store: &DocumentStore) -> anyhow::Result<()> {
        store.save(DETAILS_DOC, &self.doc).await
    }

    pub fn len(&self) -> usize {
        self.doc.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.doc.entries.is_empty()
    }

    /// Cache hit only for complete entries.
    pub fn lookup(&self, url: &str) -> Option<&BeerDetails> {
        self.doc
            .entries
            .get(url)
            .map(|entry| &entry.beer)
            .filter(|beer| beer.is_complete())
    }

    pub fn insert(&mut self, url: &str, beer: BeerDetails, now: DateTime<Utc>) {
        self.doc.entries.insert(
            url.to_string(),
            DetailCacheEntry {
                beer,
                cached_at: now,
            },
        );
    }
}

pub const DISCOVERY_STATUS_PENDING: &str = "pending_review";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoDiscoveredVenue {
    pub display_name: String,
    pub location_text: String,
    pub discovered_at: DateTime<Utc>,
    pub status: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct DiscoveryDocument {
    venues: BTreeMap<String, AutoDiscoveredVenue>,
}

/// Slug-keyed ledger of producers flagged for human review. Entries are
/// never auto-promoted to real venues.
#[derive(Debug, Default)]
pub struct DiscoveryLedger {
    doc: DiscoveryDocument,
}

impl DiscoveryLedger {
    pub async fn load(store: &DocumentStore) -> anyhow::Result<Self> {
        let doc = store.load::<DiscoveryDocument>(DISCOVERIES_DOC).await?;
        Ok(Self { doc })
    }

    pub async fn save(&self, store: &DocumentStore) -> anyhow::Result<()> {
        store.save(DISCOVERIES_DOC, &self.doc).await
    }

    pub fn len(&self) -> usize {
        self.doc.venues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.doc.venues.is_empty()
    }

    pub fn contains(&self, slug: &str) -> bool {
        self.doc.venues.contains_key(slug)
    }

    pub fn get(&self, slug: &str) -> Option<&AutoDiscoveredVenue> {
        self.doc.venues.get(slug)
    }

    /// Flag an unresolved in-region producer for review. Returns true only
    /// when a new entry was written; re-registering a known slug or an
    /// out-of-region producer is a no-op.
    pub fn register(
        &mut self,
        directory: &VenueDirectory,
        producer_name: &str,
        location_text: &str,
        now: DateTime<Utc>,
    ) -> bool {
        let resolution = directory.resolve(producer_name);
        if resolution.is_known() {
            return false;
        }
        let slug = resolution.venue_id();
        if slug.is_empty() || self.contains(&slug) {
            return false;
        }
        if !freshtap_core::is_in_region(location_text) {
            return false;
        }
        self.doc.venues.insert(
            slug,
            AutoDiscoveredVenue {
                display_name: producer_name.trim().to_string(),
                location_text: location_text.trim().to_string(),
                discovered_at: now,
                status: DISCOVERY_STATUS_PENDING.to_string(),
            },
        );
        true
    }
}
