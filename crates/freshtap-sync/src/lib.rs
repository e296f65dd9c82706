//! Aggregation run orchestration: fetch every configured source, merge,
//! dedup, resolve venues, tag freshness, and publish the snapshot.
//!
//! Ledger loads happen before any fetching so a corrupt document fails the
//! run early. Ledger saves at the end are best effort; only the merged
//! snapshot write is fatal, because that document is the run's output.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use anyhow::Context;
use chrono::{DateTime, Duration, Utc};
use freshtap_core::{
    extract_beer_names, identity_key, normalize_content, CandidateItem, MergedItem,
    MergedSnapshot, VenueDirectory, Venue,
};
use freshtap_fetchers::{
    fetch_with_metrics, CheckinFetcher, FetchContext, SocialFetcher, SourceFetcher,
    WebsiteFetcher,
};
use freshtap_storage::{
    DetailCache, DiscoveryLedger, DocumentStore, HistoryLedger, HttpClient, HttpClientConfig,
    MetricsLedger, MetricsSummary, RunSourceOutcome, SNAPSHOT_DOC,
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::fs;
use tracing::{info, warn};
use uuid::Uuid;

pub const CRATE_NAME: &str = "freshtap-sync";

/// Names of the YAML files expected under the workspace root.
pub const SOURCES_FILE: &str = "sources.yaml";
pub const VENUES_FILE: &str = "venues.yaml";

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("loading configuration")]
    Config(#[source] anyhow::Error),
    #[error("loading ledgers")]
    Ledger(#[source] anyhow::Error),
    #[error("persisting merged snapshot")]
    Snapshot(#[source] anyhow::Error),
}

#[derive(Debug, Clone)]
pub struct AggregateConfig {
    pub data_dir: PathBuf,
    pub workspace_root: PathBuf,
    pub user_agent: String,
    pub http_timeout_secs: u64,
    /// Items whose first sighting is within this many days are tagged new.
    pub new_window_days: i64,
}

impl Default for AggregateConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            workspace_root: PathBuf::from("."),
            user_agent: "freshtap-bot/0.1".to_string(),
            http_timeout_secs: 15,
            new_window_days: 7,
        }
    }
}

impl AggregateConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            data_dir: std::env::var("FRESHTAP_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            workspace_root: PathBuf::from("."),
            user_agent: std::env::var("FRESHTAP_USER_AGENT").unwrap_or(defaults.user_agent),
            http_timeout_secs: std::env::var("FRESHTAP_HTTP_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.http_timeout_secs),
            new_window_days: std::env::var("FRESHTAP_NEW_WINDOW_DAYS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.new_window_days),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceRegistry {
    pub sources: Vec<SourceConfig>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Website,
    Checkins,
    Social,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    pub name: String,
    pub kind: SourceKind,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub venue_id: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub accept_media_posts: bool,
    /// Social posts older than this are dropped at fetch time.
    #[serde(default = "default_recency_days")]
    pub recency_days: i64,
}

fn default_enabled() -> bool {
    true
}

fn default_recency_days() -> i64 {
    14
}

#[derive(Debug, Clone, Deserialize)]
struct VenuesFile {
    venues: Vec<Venue>,
}

pub async fn load_source_registry(path: &Path) -> anyhow::Result<SourceRegistry> {
    let text = fs::read_to_string(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    serde_yaml::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

pub async fn load_venue_directory(path: &Path) -> anyhow::Result<VenueDirectory> {
    let text = fs::read_to_string(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    let file: VenuesFile =
        serde_yaml::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
    Ok(VenueDirectory::new(file.venues))
}

/// Hash of whitespace-normalized content. Two posts that differ only in
/// line breaks or padding collapse to the same digest.
pub fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize_content(content).as_bytes());
    hex::encode(hasher.finalize())
}

/// Instantiate fetchers for every enabled registry entry. A misconfigured
/// entry is skipped with a warning rather than failing the whole registry,
/// matching how a bad source behaves at fetch time.
pub fn build_fetchers(registry: &SourceRegistry) -> Vec<Box<dyn SourceFetcher>> {
    let mut fetchers: Vec<Box<dyn SourceFetcher>> = Vec::new();
    for source in registry.sources.iter().filter(|s| s.enabled) {
        match source.kind {
            SourceKind::Website => match (&source.venue_id, &source.url) {
                (Some(venue_id), Some(url)) => fetchers.push(Box::new(WebsiteFetcher {
                    source: source.name.clone(),
                    venue_id: venue_id.clone(),
                    url: url.clone(),
                })),
                _ => warn!(source = %source.name, "website source needs venue_id and url; skipping"),
            },
            SourceKind::Checkins => match (&source.venue_id, &source.url) {
                (Some(venue_id), Some(url)) => fetchers.push(Box::new(CheckinFetcher {
                    source: source.name.clone(),
                    venue_id: venue_id.clone(),
                    url: url.clone(),
                })),
                _ => warn!(source = %source.name, "checkins source needs venue_id and url; skipping"),
            },
            SourceKind::Social => match (&source.username, &source.url) {
                (Some(username), Some(url)) => fetchers.push(Box::new(SocialFetcher {
                    source: source.name.clone(),
                    venue_id: source.venue_id.clone(),
                    username: username.clone(),
                    url: url.clone(),
                    recency: Duration::days(source.recency_days),
                    accept_media_posts: source.accept_media_posts,
                })),
                _ => warn!(source = %source.name, "social source needs username and url; skipping"),
            },
        }
    }
    fetchers
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub total_candidates: usize,
    pub merged_items: usize,
    pub new_items: usize,
    pub sources: std::collections::BTreeMap<String, RunSourceOutcome>,
}

pub struct AggregatePipeline {
    config: AggregateConfig,
    store: Arc<DocumentStore>,
    http: Arc<HttpClient>,
    venues: Arc<VenueDirectory>,
    fetchers: Vec<Box<dyn SourceFetcher>>,
}

impl AggregatePipeline {
    pub fn new(
        config: AggregateConfig,
        venues: VenueDirectory,
        fetchers: Vec<Box<dyn SourceFetcher>>,
    ) -> Result<Self, PipelineError> {
        let store = Arc::new(DocumentStore::new(config.data_dir.clone()));
        let http = HttpClient::new(HttpClientConfig {
            timeout: StdDuration::from_secs(config.http_timeout_secs),
            user_agent: config.user_agent.clone(),
        })
        .map_err(PipelineError::Config)?;
        Ok(Self {
            config,
            store,
            http: Arc::new(http),
            venues: Arc::new(venues),
            fetchers,
        })
    }

    /// Build a pipeline from the YAML files under the configured workspace
    /// root.
    pub async fn from_workspace(config: AggregateConfig) -> Result<Self, PipelineError> {
        let venues = load_venue_directory(&config.workspace_root.join(VENUES_FILE))
            .await
            .map_err(PipelineError::Config)?;
        let registry = load_source_registry(&config.workspace_root.join(SOURCES_FILE))
            .await
            .map_err(PipelineError::Config)?;
        let fetchers = build_fetchers(&registry);
        Self::new(config, venues, fetchers)
    }

    pub fn store(&self) -> &DocumentStore {
        &self.store
    }

    pub async fn run_once(&self) -> Result<RunSummary, PipelineError> {
        let started_at = Utc::now();

        let mut metrics = MetricsLedger::load(&self.store)
            .await
            .map_err(PipelineError::Ledger)?;
        let mut history = HistoryLedger::load(&self.store)
            .await
            .map_err(PipelineError::Ledger)?;
        let details = DetailCache::load(&self.store)
            .await
            .map_err(PipelineError::Ledger)?;
        let discoveries = DiscoveryLedger::load(&self.store)
            .await
            .map_err(PipelineError::Ledger)?;

        let run_id = metrics.start_run();
        info!(%run_id, sources = self.fetchers.len(), "aggregation run started");

        let metrics = Arc::new(tokio::sync::Mutex::new(metrics));
        let discoveries = Arc::new(tokio::sync::Mutex::new(discoveries));
        let ctx = FetchContext {
            http: self.http.clone(),
            store: self.store.clone(),
            metrics: metrics.clone(),
            details: Arc::new(tokio::sync::Mutex::new(details)),
            discoveries: discoveries.clone(),
            venues: self.venues.clone(),
            fetched_at: started_at,
        };

        let mut candidates: Vec<CandidateItem> = Vec::new();
        for fetcher in &self.fetchers {
            candidates.extend(fetch_with_metrics(fetcher.as_ref(), &ctx).await);
        }
        let total_candidates = candidates.len();

        let new_window = Duration::days(self.config.new_window_days);
        let mut seen_hashes: HashSet<String> = HashSet::new();
        let mut classified: HashMap<String, freshtap_storage::Freshness> = HashMap::new();
        let mut items: Vec<MergedItem> = Vec::new();

        for candidate in candidates {
            let hash = content_hash(&candidate.content);
            if !seen_hashes.insert(hash.clone()) {
                continue;
            }
            let venue_id = resolve_item_venue(&candidate, &self.venues);
            let key = item_identity_key(&candidate, venue_id.as_deref(), &hash);
            let freshness = match classified.get(&key) {
                Some(f) => *f,
                None => {
                    let f = history.classify(&key, candidate.posted_at, started_at, new_window);
                    classified.insert(key.clone(), f);
                    f
                }
            };
            items.push(MergedItem {
                content_hash: hash,
                venue_id,
                source: candidate.source,
                platform: candidate.platform,
                content: candidate.content,
                post_url: candidate.post_url,
                posted_at: candidate.posted_at,
                media_url: candidate.media_url,
                beer: candidate.beer,
                identity_key: key,
                first_seen_at: freshness.first_seen_at,
                is_new: freshness.is_new,
            });
        }

        for item in items.iter().take(3) {
            info!(source = %item.source, is_new = item.is_new, content = %item.content, "merged item sample");
        }

        let snapshot = MergedSnapshot {
            last_run: Some(started_at),
            count: items.len(),
            items,
        };
        self.store
            .save(SNAPSHOT_DOC, &snapshot)
            .await
            .map_err(PipelineError::Snapshot)?;

        let mut metrics = metrics.lock().await;
        let run_record = metrics.end_run(snapshot.count as u64);
        if let Err(err) = metrics.save(&self.store).await {
            warn!(error = %err, "saving metrics ledger failed; continuing");
        }
        if let Err(err) = history.save(&self.store).await {
            warn!(error = %err, "saving history ledger failed; continuing");
        }
        if let Err(err) = discoveries.lock().await.save(&self.store).await {
            warn!(error = %err, "saving discovery ledger failed; continuing");
        }

        let finished_at = Utc::now();
        let new_items = snapshot.items.iter().filter(|i| i.is_new).count();
        info!(
            %run_id,
            total = total_candidates,
            merged = snapshot.count,
            new = new_items,
            "aggregation run finished"
        );

        Ok(RunSummary {
            run_id,
            started_at,
            finished_at,
            total_candidates,
            merged_items: snapshot.count,
            new_items,
            sources: run_record.map(|r| r.sources).unwrap_or_default(),
        })
    }
}

/// Pick the venue for a merged item. An explicit venue binding from the
/// source config wins; otherwise resolve whichever producer name the item
/// carries. Items with no producer at all stay unattributed.
fn resolve_item_venue(candidate: &CandidateItem, venues: &VenueDirectory) -> Option<String> {
    if let Some(id) = &candidate.venue_id {
        return Some(id.clone());
    }
    let producer = candidate
        .mentioned_producer
        .as_deref()
        .or_else(|| candidate.beer.as_ref().and_then(|b| b.producer.as_deref()))?;
    Some(venues.resolve(producer).venue_id())
}

/// Stable key for the first-seen ledger. Preference order: the beverage's
/// detail URL, then name+producer, then a beer name pulled from the text,
/// then the content hash as a last resort.
fn item_identity_key(
    candidate: &CandidateItem,
    venue_id: Option<&str>,
    hash: &str,
) -> String {
    let producer = candidate
        .mentioned_producer
        .as_deref()
        .or_else(|| candidate.beer.as_ref().and_then(|b| b.producer.as_deref()))
        .or(venue_id)
        .unwrap_or("");
    if let Some(beer) = &candidate.beer {
        if let Some(url) = beer.detail_url.as_deref().filter(|u| !u.is_empty()) {
            return url.to_string();
        }
        if !beer.name.trim().is_empty() {
            return identity_key(&beer.name, producer);
        }
    }
    if let Some(name) = extract_beer_names(&candidate.content).first() {
        return identity_key(name, producer);
    }
    hash.to_string()
}

pub async fn run_once_from_env() -> Result<RunSummary, PipelineError> {
    let config = AggregateConfig::from_env();
    let pipeline = AggregatePipeline::from_workspace(config).await?;
    pipeline.run_once().await
}

/// Load the metrics ledger and build the summary the CLI prints.
pub async fn metrics_summary(config: &AggregateConfig) -> anyhow::Result<MetricsSummary> {
    let store = DocumentStore::new(config.data_dir.clone());
    let ledger = MetricsLedger::load(&store).await?;
    Ok(ledger.summary())
}

/// Overwrite every persisted document with an empty one. The next run
/// starts from a clean slate; first-seen timestamps are gone with it.
pub async fn reset_ledgers(config: &AggregateConfig) -> anyhow::Result<()> {
    let store = DocumentStore::new(config.data_dir.clone());
    MetricsLedger::default().save(&store).await?;
    HistoryLedger::default().save(&store).await?;
    DetailCache::default().save(&store).await?;
    DiscoveryLedger::default().save(&store).await?;
    store.save(SNAPSHOT_DOC, &MergedSnapshot::default()).await?;
    info!(dir = %store.dir().display(), "all ledgers reset");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use freshtap_core::BeerDetails;

    fn candidate(content: &str) -> CandidateItem {
        CandidateItem {
            venue_id: None,
            source: "test".to_string(),
            platform: "website".to_string(),
            content: content.to_string(),
            post_url: None,
            posted_at: Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).single().unwrap(),
            mentioned_producer: None,
            media_url: None,
            beer: None,
        }
    }

    #[test]
    fn content_hash_ignores_whitespace_layout() {
        let a = content_hash("Fresh  Hazy\nIPA   just dropped");
        let b = content_hash("Fresh Hazy IPA just dropped");
        assert_eq!(a, b);
        assert_ne!(a, content_hash("Fresh Hazy IPA just landed"));
    }

    #[test]
    fn identity_key_prefers_detail_url() {
        let mut c = candidate("Fresh Hazy IPA just dropped");
        let mut beer = BeerDetails::named("Hazy");
        beer.detail_url = Some("https://example.com/b/123".to_string());
        c.beer = Some(beer);
        assert_eq!(
            item_identity_key(&c, None, "hash"),
            "https://example.com/b/123"
        );
    }

    #[test]
    fn identity_key_falls_back_to_name_and_producer() {
        let mut c = candidate("something uneventful");
        c.beer = Some(BeerDetails::named("Valley Haze"));
        c.mentioned_producer = Some("Acme Brewing Co".to_string());
        assert_eq!(item_identity_key(&c, None, "hash"), "Valley Haze|Acme Brewing Co");
    }

    #[test]
    fn identity_key_extracts_name_from_content() {
        let c = candidate("Fresh Hazy IPA just dropped");
        assert_eq!(
            item_identity_key(&c, Some("acme-brew"), "hash"),
            "Fresh Hazy IPA|acme-brew"
        );
    }

    #[test]
    fn identity_key_uses_hash_when_nothing_else_matches() {
        let c = candidate("tap room open late tonight");
        assert_eq!(item_identity_key(&c, None, "abc123"), "abc123");
    }

    #[test]
    fn registry_yaml_parses_with_defaults() {
        let yaml = r#"
sources:
  - name: acme-website
    kind: website
    venue_id: acme-brew
    url: https://acme.example/whats-on
  - name: acme-social
    kind: social
    username: acmebrew
    url: https://mirror.example/acmebrew/
    accept_media_posts: true
    enabled: false
  - name: other-social
    kind: social
    venue_id: other-brew
    username: otherbrew
    url: https://mirror.example/otherbrew/
"#;
        let registry: SourceRegistry = serde_yaml::from_str(yaml).expect("parse");
        assert_eq!(registry.sources.len(), 3);
        assert!(registry.sources[0].enabled);
        assert_eq!(registry.sources[0].kind, SourceKind::Website);
        assert_eq!(registry.sources[1].recency_days, 14);
        assert!(!registry.sources[1].enabled);
        assert_eq!(registry.sources[2].username.as_deref(), Some("otherbrew"));

        let fetchers = build_fetchers(&registry);
        assert_eq!(fetchers.len(), 2);
        assert_eq!(fetchers[0].name(), "acme-website");
        assert_eq!(fetchers[1].name(), "other-social");
        assert_eq!(fetchers[1].technique(), "social");
    }

    #[test]
    fn misconfigured_source_is_skipped() {
        let registry = SourceRegistry {
            sources: vec![SourceConfig {
                name: "broken".to_string(),
                kind: SourceKind::Website,
                enabled: true,
                venue_id: None,
                url: None,
                username: None,
                accept_media_posts: false,
                recency_days: 14,
            }],
        };
        assert!(build_fetchers(&registry).is_empty());
    }

    #[test]
    fn unattributed_item_keeps_no_venue() {
        let venues = VenueDirectory::new(vec![]);
        let c = candidate("tap room open late tonight");
        assert_eq!(resolve_item_venue(&c, &venues), None);
    }
}
