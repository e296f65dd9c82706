//! Source fetcher contract and the three scraping strategies.
//!
//! Every fetcher runs through [`fetch_with_metrics`], which records the
//! attempt before any network work and converts failures into an empty
//! result plus a metrics entry. A single source failing never aborts a run.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use freshtap_core::{parse_relative_time, BeerDetails, CandidateItem, VenueDirectory};
use freshtap_storage::{
    DetailCache, DiscoveryLedger, DocumentStore, HttpClient, MetricsLedger,
};
use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Selector};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info, warn};

pub const CRATE_NAME: &str = "freshtap-fetchers";

/// Case-insensitive vocabulary that marks a website element as a probable
/// release announcement.
pub const RELEASE_KEYWORDS: &[&str] = &[
    "new release",
    "now pouring",
    "on tap",
    "fresh batch",
    "just dropped",
];

/// Broader vocabulary for social captions.
pub const BEER_KEYWORDS: &[&str] = &[
    "beer", "brew", "ipa", "ale", "stout", "sour", "hazy", "pale", "lager", "pilsner", "tap",
    "release", "new", "drop", "pouring", "tapping", "fresh", "limited", "now available",
];

pub fn matches_any(text: &str, keywords: &[&str]) -> bool {
    let lower = text.to_lowercase();
    keywords.iter().any(|kw| lower.contains(kw))
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error(transparent)]
    Http(#[from] freshtap_storage::FetchError),
    #[error("{0}")]
    Message(String),
    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

/// Shared handles a fetcher needs for one run. Ledgers sit behind mutexes
/// so a bounded-parallel fetch loop stays safe; the default pipeline runs
/// fetchers sequentially.
#[derive(Clone)]
pub struct FetchContext {
    pub http: Arc<HttpClient>,
    pub store: Arc<DocumentStore>,
    pub metrics: Arc<Mutex<MetricsLedger>>,
    pub details: Arc<Mutex<DetailCache>>,
    pub discoveries: Arc<Mutex<DiscoveryLedger>>,
    pub venues: Arc<VenueDirectory>,
    pub fetched_at: DateTime<Utc>,
}

#[async_trait]
pub trait SourceFetcher: Send + Sync {
    fn name(&self) -> &str;
    fn technique(&self) -> &'static str;
    async fn fetch(&self, ctx: &FetchContext) -> Result<Vec<CandidateItem>, FetchError>;
}

/// Uniform try/record wrapper: attempt first, then exactly one success or
/// error record. Failures yield an empty list instead of propagating.
pub async fn fetch_with_metrics(
    fetcher: &dyn SourceFetcher,
    ctx: &FetchContext,
) -> Vec<CandidateItem> {
    {
        let mut metrics = ctx.metrics.lock().await;
        metrics.record_attempt(fetcher.name(), fetcher.technique());
    }
    match fetcher.fetch(ctx).await {
        Ok(items) => {
            let mut metrics = ctx.metrics.lock().await;
            metrics.record_success(fetcher.name(), items.len() as u64);
            info!(source = fetcher.name(), items = items.len(), "fetch succeeded");
            items
        }
        Err(err) => {
            let message = err.to_string();
            let mut metrics = ctx.metrics.lock().await;
            metrics.record_error(fetcher.name(), &message);
            warn!(source = fetcher.name(), error = %message, "fetch failed");
            Vec::new()
        }
    }
}

fn element_text(element: ElementRef<'_>) -> String {
    element.text().collect::<String>().trim().to_string()
}

fn select_first_text(root: &Html, selector: &Selector) -> Option<String> {
    root.select(selector)
        .next()
        .map(element_text)
        .filter(|t| !t.is_empty())
}

/// Resolve an href against the page it came from. Only scheme-relative
/// handling a scraped mirror actually needs.
pub fn absolutize(base_url: &str, href: &str) -> String {
    if href.starts_with("http://") || href.starts_with("https://") {
        return href.to_string();
    }
    let origin = base_url
        .find("://")
        .map(|scheme_end| {
            let rest = &base_url[scheme_end + 3..];
            match rest.find('/') {
                Some(path_start) => &base_url[..scheme_end + 3 + path_start],
                None => base_url,
            }
        })
        .unwrap_or(base_url);
    if href.starts_with('/') {
        format!("{origin}{href}")
    } else {
        format!("{origin}/{href}")
    }
}

const WEBSITE_MAX_ITEMS: usize = 3;
const WEBSITE_MIN_LEN: usize = 20;
const WEBSITE_MAX_LEN: usize = 300;
const WEBSITE_CONTENT_CAP: usize = 280;

static WEBSITE_TEXT_SEL: Lazy<Selector> =
    Lazy::new(|| Selector::parse("h1, h2, h3, p").expect("static selector"));

/// Scrapes one venue website for release announcements by scanning heading
/// and paragraph text for the release vocabulary.
#[derive(Debug, Clone)]
pub struct WebsiteFetcher {
    pub source: String,
    pub venue_id: String,
    pub url: String,
}

pub fn parse_website_page(
    html: &str,
    venue_id: &str,
    source: &str,
    url: &str,
    fetched_at: DateTime<Utc>,
) -> Vec<CandidateItem> {
    let document = Html::parse_document(html);
    let mut items = Vec::new();
    for element in document.select(&WEBSITE_TEXT_SEL) {
        let text = element_text(element);
        if text.len() <= WEBSITE_MIN_LEN || text.len() >= WEBSITE_MAX_LEN {
            continue;
        }
        if !matches_any(&text, RELEASE_KEYWORDS) {
            continue;
        }
        let content: String = text.chars().take(WEBSITE_CONTENT_CAP).collect();
        items.push(CandidateItem {
            venue_id: Some(venue_id.to_string()),
            source: source.to_string(),
            platform: "website".to_string(),
            content,
            post_url: Some(url.to_string()),
            posted_at: fetched_at,
            mentioned_producer: None,
            media_url: None,
            beer: None,
        });
        if items.len() == WEBSITE_MAX_ITEMS {
            break;
        }
    }
    items
}

#[async_trait]
impl SourceFetcher for WebsiteFetcher {
    fn name(&self) -> &str {
        &self.source
    }

    fn technique(&self) -> &'static str {
        "website"
    }

    async fn fetch(&self, ctx: &FetchContext) -> Result<Vec<CandidateItem>, FetchError> {
        let html = ctx.http.fetch_text(&self.source, &self.url).await?;
        Ok(parse_website_page(
            &html,
            &self.venue_id,
            &self.source,
            &self.url,
            ctx.fetched_at,
        ))
    }
}

static CHECKIN_ITEM_SEL: Lazy<Selector> =
    Lazy::new(|| Selector::parse("div.checkin, div.item").expect("static selector"));
static CHECKIN_LINK_SEL: Lazy<Selector> =
    Lazy::new(|| Selector::parse("a[href]").expect("static selector"));
static CHECKIN_COMMENT_SEL: Lazy<Selector> =
    Lazy::new(|| Selector::parse("p.comment").expect("static selector"));
static CHECKIN_TIME_SEL: Lazy<Selector> =
    Lazy::new(|| Selector::parse("span.time, a.time").expect("static selector"));

static DETAIL_NAME_SEL: Lazy<Selector> =
    Lazy::new(|| Selector::parse("div.name h1, h1").expect("static selector"));
static DETAIL_STYLE_SEL: Lazy<Selector> =
    Lazy::new(|| Selector::parse("p.style").expect("static selector"));
static DETAIL_ABV_SEL: Lazy<Selector> =
    Lazy::new(|| Selector::parse("p.abv").expect("static selector"));
static DETAIL_DESC_SEL: Lazy<Selector> =
    Lazy::new(|| Selector::parse("div.description").expect("static selector"));
static DETAIL_BREWERY_SEL: Lazy<Selector> =
    Lazy::new(|| Selector::parse("p.brewery").expect("static selector"));
static DETAIL_LOCATION_SEL: Lazy<Selector> =
    Lazy::new(|| Selector::parse("p.brewery-location, p.location").expect("static selector"));
static DETAIL_IMAGE_SEL: Lazy<Selector> =
    Lazy::new(|| Selector::parse("img.label, img").expect("static selector"));

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawCheckin {
    pub beer_name: String,
    pub producer: Option<String>,
    pub comment: Option<String>,
    pub time_text: Option<String>,
    pub detail_url: Option<String>,
}

/// Parse a venue activity feed. Malformed entries are skipped, never fatal.
pub fn parse_checkin_feed(html: &str, base_url: &str) -> Vec<RawCheckin> {
    let document = Html::parse_document(html);
    let mut checkins = Vec::new();
    for item in document.select(&CHECKIN_ITEM_SEL) {
        let mut beer_name = None;
        let mut producer = None;
        let mut detail_url = None;
        for link in item.select(&CHECKIN_LINK_SEL) {
            let Some(href) = link.value().attr("href") else {
                continue;
            };
            let text = element_text(link);
            if text.is_empty() {
                continue;
            }
            if href.contains("/b/") && beer_name.is_none() {
                beer_name = Some(text);
                detail_url = Some(absolutize(base_url, href));
            } else if href.contains("/brewery/") && producer.is_none() {
                producer = Some(text);
            }
        }
        let Some(beer_name) = beer_name else {
            continue;
        };
        checkins.push(RawCheckin {
            beer_name,
            producer,
            comment: item
                .select(&CHECKIN_COMMENT_SEL)
                .next()
                .map(element_text)
                .filter(|t| !t.is_empty()),
            time_text: item
                .select(&CHECKIN_TIME_SEL)
                .next()
                .map(element_text)
                .filter(|t| !t.is_empty()),
            detail_url,
        });
    }
    checkins
}

pub fn parse_beer_detail(html: &str) -> Option<BeerDetails> {
    let document = Html::parse_document(html);
    let name = select_first_text(&document, &DETAIL_NAME_SEL)?;
    let mut beer = BeerDetails::named(name);
    beer.style = select_first_text(&document, &DETAIL_STYLE_SEL);
    beer.abv = select_first_text(&document, &DETAIL_ABV_SEL);
    beer.description = select_first_text(&document, &DETAIL_DESC_SEL);
    beer.producer = select_first_text(&document, &DETAIL_BREWERY_SEL);
    beer.producer_location = select_first_text(&document, &DETAIL_LOCATION_SEL);
    beer.image_url = document
        .select(&DETAIL_IMAGE_SEL)
        .next()
        .and_then(|img| img.value().attr("src").or_else(|| img.value().attr("data-src")))
        .map(ToString::to_string);
    Some(beer)
}

/// Scrapes a venue checkin feed and enriches each distinct beverage through
/// the detail cache. Checkin feeds repeat the same handful of beers across
/// many checkins, so the per-beer detail cost is paid once.
#[derive(Debug, Clone)]
pub struct CheckinFetcher {
    pub source: String,
    pub venue_id: String,
    pub url: String,
}

impl CheckinFetcher {
    async fn enrich(
        &self,
        ctx: &FetchContext,
        detail_urls: Vec<String>,
    ) -> HashMap<String, BeerDetails> {
        let mut enriched = HashMap::new();
        for url in detail_urls {
            let cached = { ctx.details.lock().await.lookup(&url).cloned() };
            if let Some(beer) = cached {
                enriched.insert(url, beer);
                continue;
            }
            let detail_html = match ctx.http.fetch_text(&self.source, &url).await {
                Ok(html) => html,
                Err(err) => {
                    warn!(url, error = %err, "detail fetch failed, skipping");
                    continue;
                }
            };
            let Some(mut beer) = parse_beer_detail(&detail_html) else {
                warn!(url, "detail page had no recognizable beer, skipping");
                continue;
            };
            beer.detail_url = Some(url.clone());
            {
                let mut details = ctx.details.lock().await;
                details.insert(&url, beer.clone(), ctx.fetched_at);
                // Persist incrementally so a crashed run keeps its work.
                if let Err(err) = details.save(&ctx.store).await {
                    warn!(error = %err, "detail cache save failed");
                }
            }
            if let (Some(producer), Some(location)) =
                (beer.producer.as_deref(), beer.producer_location.as_deref())
            {
                let mut discoveries = ctx.discoveries.lock().await;
                if discoveries.register(&ctx.venues, producer, location, ctx.fetched_at) {
                    info!(producer, location, "flagged unknown producer for review");
                    if let Err(err) = discoveries.save(&ctx.store).await {
                        warn!(error = %err, "discovery ledger save failed");
                    }
                }
            }
            enriched.insert(url, beer);
        }
        enriched
    }
}

#[async_trait]
impl SourceFetcher for CheckinFetcher {
    fn name(&self) -> &str {
        &self.source
    }

    fn technique(&self) -> &'static str {
        "checkins"
    }

    async fn fetch(&self, ctx: &FetchContext) -> Result<Vec<CandidateItem>, FetchError> {
        let html = ctx.http.fetch_text(&self.source, &self.url).await?;
        let checkins = parse_checkin_feed(&html, &self.url);

        let mut detail_urls = Vec::new();
        for checkin in &checkins {
            if let Some(url) = &checkin.detail_url {
                if !detail_urls.contains(url) {
                    detail_urls.push(url.clone());
                }
            }
        }
        let enriched = self.enrich(ctx, detail_urls).await;

        let items = checkins
            .into_iter()
            .map(|checkin| {
                let posted_at = checkin
                    .time_text
                    .as_deref()
                    .map(|t| parse_relative_time(t, ctx.fetched_at))
                    .unwrap_or(ctx.fetched_at);
                let beer = checkin
                    .detail_url
                    .as_ref()
                    .and_then(|url| enriched.get(url).cloned());
                let mut content = match &checkin.producer {
                    Some(producer) => format!("{} by {}", checkin.beer_name, producer),
                    None => checkin.beer_name.clone(),
                };
                if let Some(comment) = &checkin.comment {
                    content.push_str(" - ");
                    content.push_str(comment);
                }
                CandidateItem {
                    venue_id: Some(self.venue_id.clone()),
                    source: self.source.clone(),
                    platform: "checkin".to_string(),
                    content,
                    post_url: checkin.detail_url.clone().or_else(|| Some(self.url.clone())),
                    posted_at,
                    mentioned_producer: checkin.producer,
                    media_url: beer.as_ref().and_then(|b| b.image_url.clone()),
                    beer,
                }
            })
            .collect();
        Ok(items)
    }
}

static SOCIAL_ITEM_SEL: Lazy<Selector> =
    Lazy::new(|| Selector::parse("article, div.post").expect("static selector"));
static SOCIAL_CAPTION_SEL: Lazy<Selector> =
    Lazy::new(|| Selector::parse("p.caption, div.caption, p.text").expect("static selector"));
static SOCIAL_TIME_SEL: Lazy<Selector> =
    Lazy::new(|| Selector::parse("time, span.time, div.time").expect("static selector"));
static SOCIAL_MEDIA_SEL: Lazy<Selector> =
    Lazy::new(|| Selector::parse("img, video").expect("static selector"));
static SOCIAL_LINK_SEL: Lazy<Selector> =
    Lazy::new(|| Selector::parse("a[href]").expect("static selector"));

const SOCIAL_CONTENT_CAP: usize = 500;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawSocialPost {
    pub caption: String,
    pub time_text: Option<String>,
    pub media_url: Option<String>,
    pub post_url: Option<String>,
}

pub fn parse_social_page(html: &str, base_url: &str) -> Vec<RawSocialPost> {
    let document = Html::parse_document(html);
    let mut posts = Vec::new();
    for item in document.select(&SOCIAL_ITEM_SEL) {
        let caption = item
            .select(&SOCIAL_CAPTION_SEL)
            .next()
            .map(element_text)
            .unwrap_or_default();
        let media_url = item
            .select(&SOCIAL_MEDIA_SEL)
            .next()
            .and_then(|m| m.value().attr("src").or_else(|| m.value().attr("data-src")))
            .map(ToString::to_string);
        if caption.is_empty() && media_url.is_none() {
            continue;
        }
        posts.push(RawSocialPost {
            caption,
            time_text: item
                .select(&SOCIAL_TIME_SEL)
                .next()
                .map(element_text)
                .filter(|t| !t.is_empty()),
            media_url,
            post_url: item
                .select(&SOCIAL_LINK_SEL)
                .next()
                .and_then(|a| a.value().attr("href"))
                .map(|href| absolutize(base_url, href)),
        });
    }
    posts
}

/// Scrapes a public mirror of a venue's social profile. Timestamps arrive
/// as relative strings ("2h", "3d ago"); anything older than the recency
/// cutoff is discarded.
#[derive(Debug, Clone)]
pub struct SocialFetcher {
    pub source: String,
    pub venue_id: Option<String>,
    pub username: String,
    pub url: String,
    pub recency: Duration,
    /// Accept media-bearing posts without a keyword match as a weaker
    /// positive signal.
    pub accept_media_posts: bool,
}

pub fn social_candidates(
    posts: Vec<RawSocialPost>,
    fetcher: &SocialFetcher,
    fetched_at: DateTime<Utc>,
) -> Vec<CandidateItem> {
    let mut items = Vec::new();
    for post in posts {
        let posted_at = post
            .time_text
            .as_deref()
            .map(|t| parse_relative_time(t, fetched_at))
            .unwrap_or(fetched_at);
        if fetched_at - posted_at > fetcher.recency {
            continue;
        }
        let keyword_hit = matches_any(&post.caption, BEER_KEYWORDS);
        let media_hit = fetcher.accept_media_posts && post.media_url.is_some();
        if !keyword_hit && !media_hit {
            continue;
        }
        let content: String = post.caption.chars().take(SOCIAL_CONTENT_CAP).collect();
        items.push(CandidateItem {
            venue_id: fetcher.venue_id.clone(),
            source: fetcher.source.clone(),
            platform: "social".to_string(),
            content,
            post_url: post.post_url.or_else(|| Some(fetcher.url.clone())),
            posted_at,
            mentioned_producer: None,
            media_url: post.media_url,
            beer: None,
        });
    }
    items
}

#[async_trait]
impl SourceFetcher for SocialFetcher {
    fn name(&self) -> &str {
        &self.source
    }

    fn technique(&self) -> &'static str {
        "social"
    }

    async fn fetch(&self, ctx: &FetchContext) -> Result<Vec<CandidateItem>, FetchError> {
        let html = ctx.http.fetch_text(&self.source, &self.url).await?;
        let posts = parse_social_page(&html, &self.url);
        info!(
            source = %self.source,
            username = %self.username,
            posts = posts.len(),
            "social profile parsed"
        );
        Ok(social_candidates(posts, self, ctx.fetched_at))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use freshtap_storage::HttpClientConfig;
    use tempfile::tempdir;

    fn fetched_at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).single().unwrap()
    }

    fn test_context(store: DocumentStore) -> FetchContext {
        FetchContext {
            http: Arc::new(HttpClient::new(HttpClientConfig::default()).expect("client")),
            store: Arc::new(store),
            metrics: Arc::new(Mutex::new(MetricsLedger::default())),
            details: Arc::new(Mutex::new(DetailCache::default())),
            discoveries: Arc::new(Mutex::new(DiscoveryLedger::default())),
            venues: Arc::new(VenueDirectory::new(Vec::new())),
            fetched_at: fetched_at(),
        }
    }

    struct StaticFetcher {
        items: Vec<CandidateItem>,
    }

    #[async_trait]
    impl SourceFetcher for StaticFetcher {
        fn name(&self) -> &str {
            "static"
        }

        fn technique(&self) -> &'static str {
            "test"
        }

        async fn fetch(&self, _ctx: &FetchContext) -> Result<Vec<CandidateItem>, FetchError> {
            Ok(self.items.clone())
        }
    }

    struct FailingFetcher;

    #[async_trait]
    impl SourceFetcher for FailingFetcher {
        fn name(&self) -> &str {
            "doomed"
        }

        fn technique(&self) -> &'static str {
            "test"
        }

        async fn fetch(&self, _ctx: &FetchContext) -> Result<Vec<CandidateItem>, FetchError> {
            Err(FetchError::Message("mirror blocked us".into()))
        }
    }

    fn item(content: &str) -> CandidateItem {
        CandidateItem {
            venue_id: Some("batch-brewing".into()),
            source: "static".into(),
            platform: "website".into(),
            content: content.to_string(),
            post_url: None,
            posted_at: fetched_at(),
            mentioned_producer: None,
            media_url: None,
            beer: None,
        }
    }

    #[tokio::test]
    async fn metrics_wrapper_records_success_with_count() {
        let dir = tempdir().expect("tempdir");
        let ctx = test_context(DocumentStore::new(dir.path()));
        let fetcher = StaticFetcher {
            items: vec![item("a"), item("b")],
        };

        let items = fetch_with_metrics(&fetcher, &ctx).await;
        assert_eq!(items.len(), 2);

        let metrics = ctx.metrics.lock().await;
        let metric = metrics.source("static").expect("metric");
        assert_eq!(metric.attempts, 1);
        assert_eq!(metric.successes, 1);
        assert_eq!(metric.items_found, 2);
    }

    #[tokio::test]
    async fn metrics_wrapper_swallows_failures() {
        let dir = tempdir().expect("tempdir");
        let ctx = test_context(DocumentStore::new(dir.path()));

        let items = fetch_with_metrics(&FailingFetcher, &ctx).await;
        assert!(items.is_empty());

        let metrics = ctx.metrics.lock().await;
        let metric = metrics.source("doomed").expect("metric");
        assert_eq!(metric.attempts, 1);
        assert_eq!(metric.successes, 0);
        assert_eq!(metric.errors.len(), 1);
        assert_eq!(
            metric.errors.back().map(|e| e.error.as_str()),
            Some("mirror blocked us")
        );
    }

    #[test]
    fn website_parser_keeps_keyword_matches_only() {
        let html = r#"
            <html><body>
              <h2>Fresh batch of Valley Haze hits the taproom</h2>
              <p>Our opening hours are 10am to 10pm every day.</p>
              <p>Now pouring: Midnight Stout, rich and roasty.</p>
              <h3>short</h3>
            </body></html>
        "#;
        let items =
            parse_website_page(html, "batch-brewing", "batch-site", "https://example.com", fetched_at());
        assert_eq!(items.len(), 2);
        assert!(items[0].content.contains("Fresh batch"));
        assert!(items[1].content.contains("Now pouring"));
        assert_eq!(items[0].venue_id.as_deref(), Some("batch-brewing"));
        assert_eq!(items[0].platform, "website");
    }

    #[test]
    fn website_parser_caps_at_three_items() {
        let paragraph = "<p>New release on tap this weekend at the brewery</p>";
        let html = format!("<html><body>{}</body></html>", paragraph.repeat(6));
        let items = parse_website_page(&html, "v", "s", "https://example.com", fetched_at());
        assert_eq!(items.len(), 3);
    }

    #[test]
    fn checkin_parser_extracts_beer_producer_and_detail_link() {
        let html = r#"
            <div class="checkin">
              <a href="/b/acme-hazy/123">Acme Hazy IPA</a>
              <a href="/brewery/acme">Acme Brewing</a>
              <p class="comment">Unreal hop aroma</p>
              <span class="time">2h ago</span>
            </div>
            <div class="checkin">
              <a href="/somewhere/else">Not a beer link</a>
            </div>
        "#;
        let checkins = parse_checkin_feed(html, "https://checkins.example.com/v/batch");
        assert_eq!(checkins.len(), 1);
        let checkin = &checkins[0];
        assert_eq!(checkin.beer_name, "Acme Hazy IPA");
        assert_eq!(checkin.producer.as_deref(), Some("Acme Brewing"));
        assert_eq!(checkin.comment.as_deref(), Some("Unreal hop aroma"));
        assert_eq!(checkin.time_text.as_deref(), Some("2h ago"));
        assert_eq!(
            checkin.detail_url.as_deref(),
            Some("https://checkins.example.com/b/acme-hazy/123")
        );
    }

    #[test]
    fn detail_parser_reads_enrichment_fields() {
        let html = r#"
            <div class="name"><h1>Acme Hazy IPA</h1></div>
            <p class="style">New England IPA</p>
            <p class="abv">6.5% ABV</p>
            <div class="description">Soft, juicy, double dry hopped.</div>
            <p class="brewery">Acme Brewing</p>
            <p class="brewery-location">Marrickville, Sydney</p>
            <img class="label" src="https://cdn.example.com/label.png"/>
        "#;
        let beer = parse_beer_detail(html).expect("beer");
        assert_eq!(beer.name, "Acme Hazy IPA");
        assert_eq!(beer.style.as_deref(), Some("New England IPA"));
        assert_eq!(beer.abv.as_deref(), Some("6.5% ABV"));
        assert_eq!(beer.producer.as_deref(), Some("Acme Brewing"));
        assert_eq!(beer.producer_location.as_deref(), Some("Marrickville, Sydney"));
        assert_eq!(beer.image_url.as_deref(), Some("https://cdn.example.com/label.png"));
        assert!(beer.is_complete());
    }

    fn social_fetcher(accept_media: bool) -> SocialFetcher {
        SocialFetcher {
            source: "mirror".into(),
            venue_id: Some("batch-brewing".into()),
            username: "batchbrewing".into(),
            url: "https://mirror.example.com/batchbrewing/".into(),
            recency: Duration::days(14),
            accept_media_posts: accept_media,
        }
    }

    #[test]
    fn social_posts_outside_recency_window_are_dropped() {
        let posts = vec![
            RawSocialPost {
                caption: "Fresh hazy on tap from today".into(),
                time_text: Some("2h".into()),
                media_url: None,
                post_url: None,
            },
            RawSocialPost {
                caption: "New beer drop, come get it".into(),
                time_text: Some("3w ago".into()),
                media_url: None,
                post_url: None,
            },
        ];
        let items = social_candidates(posts, &social_fetcher(false), fetched_at());
        assert_eq!(items.len(), 1);
        assert!(items[0].content.contains("Fresh hazy"));
    }

    #[test]
    fn social_media_posts_pass_without_keywords_when_enabled() {
        let posts = vec![RawSocialPost {
            caption: "Saturday at the taproom".into(),
            time_text: Some("1d".into()),
            media_url: Some("https://cdn.example.com/story.jpg".into()),
            post_url: None,
        }];
        assert!(social_candidates(posts.clone(), &social_fetcher(false), fetched_at()).is_empty());
        let items = social_candidates(posts, &social_fetcher(true), fetched_at());
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].media_url.as_deref(), Some("https://cdn.example.com/story.jpg"));
    }

    #[test]
    fn social_parser_reads_caption_time_and_media() {
        let html = r#"
            <article>
              <p class="caption">Just dropped: Valley Sour, tart and bright</p>
              <span class="time">5h</span>
              <img data-src="https://cdn.example.com/post.jpg"/>
              <a href="/p/abc123/">link</a>
            </article>
        "#;
        let posts = parse_social_page(html, "https://mirror.example.com/batchbrewing/");
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].time_text.as_deref(), Some("5h"));
        assert_eq!(posts[0].media_url.as_deref(), Some("https://cdn.example.com/post.jpg"));
        assert_eq!(
            posts[0].post_url.as_deref(),
            Some("https://mirror.example.com/p/abc123/")
        );
    }

    #[test]
    fn absolutize_handles_relative_and_absolute_hrefs() {
        assert_eq!(
            absolutize("https://example.com/v/batch", "/b/hazy/1"),
            "https://example.com/b/hazy/1"
        );
        assert_eq!(
            absolutize("https://example.com", "https://other.com/x"),
            "https://other.com/x"
        );
    }
}
