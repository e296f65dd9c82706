//! Core domain model, identity resolution, and parsing helpers for Freshtap.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Duration, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

pub const CRATE_NAME: &str = "freshtap-core";

/// A venue from the static directory. Read-only reference data; the
/// aggregation core never creates or mutates venue records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Venue {
    pub id: String,
    pub display_name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub location_text: String,
}

/// Enrichment metadata for a single beverage, usually scraped from a
/// detail page. `name` is the only field guaranteed to be present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BeerDetails {
    pub name: String,
    #[serde(default)]
    pub producer: Option<String>,
    #[serde(default)]
    pub style: Option<String>,
    #[serde(default)]
    pub abv: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub producer_location: Option<String>,
    #[serde(default)]
    pub detail_url: Option<String>,
}

impl BeerDetails {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            producer: None,
            style: None,
            abv: None,
            description: None,
            image_url: None,
            producer_location: None,
            detail_url: None,
        }
    }

    /// A complete entry may be served from cache on later runs; partial
    /// entries stay eligible for a refetch.
    pub fn is_complete(&self) -> bool {
        !self.name.trim().is_empty() && self.style.as_deref().is_some_and(|s| !s.trim().is_empty())
    }
}

/// Raw output of a fetcher before merge. Identity (`venue_id`) may still be
/// unresolved; the run controller resolves it from `mentioned_producer`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateItem {
    pub venue_id: Option<String>,
    pub source: String,
    pub platform: String,
    pub content: String,
    pub post_url: Option<String>,
    pub posted_at: DateTime<Utc>,
    #[serde(default)]
    pub mentioned_producer: Option<String>,
    #[serde(default)]
    pub media_url: Option<String>,
    #[serde(default)]
    pub beer: Option<BeerDetails>,
}

/// A candidate after dedup, identity resolution, and freshness tagging.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergedItem {
    pub content_hash: String,
    pub venue_id: Option<String>,
    pub source: String,
    pub platform: String,
    pub content: String,
    pub post_url: Option<String>,
    pub posted_at: DateTime<Utc>,
    #[serde(default)]
    pub media_url: Option<String>,
    #[serde(default)]
    pub beer: Option<BeerDetails>,
    pub identity_key: String,
    pub first_seen_at: DateTime<Utc>,
    pub is_new: bool,
}

/// The exposed per-run output document. Each run replaces the previous
/// snapshot wholesale; this is not an append-only log.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MergedSnapshot {
    pub last_run: Option<DateTime<Utc>>,
    pub items: Vec<MergedItem>,
    pub count: usize,
}

/// Collapse runs of whitespace so cosmetic reflows of the same text hash
/// identically. Case is preserved.
pub fn normalize_content(content: &str) -> String {
    content.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Composite freshness-tracking key for a logical beverage.
pub fn identity_key(beer_name: &str, producer: &str) -> String {
    format!("{}|{}", beer_name.trim(), producer.trim())
}

/// Lower-case slug: whitespace becomes hyphens, `&` becomes `and`, other
/// punctuation is dropped.
pub fn slugify(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for ch in name.trim().to_lowercase().chars() {
        match ch {
            'a'..='z' | '0'..='9' => out.push(ch),
            '&' => out.push_str("and"),
            c if c.is_whitespace() || c == '-' => {
                if !out.ends_with('-') {
                    out.push('-');
                }
            }
            _ => {}
        }
    }
    out.trim_matches('-').to_string()
}

/// Outcome of venue identity resolution. `Fallback` carries a best-effort
/// slug that may not correspond to any real venue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Known(String),
    Fallback(String),
}

impl Resolution {
    pub fn venue_id(self) -> String {
        match self {
            Resolution::Known(id) | Resolution::Fallback(id) => id,
        }
    }

    pub fn is_known(&self) -> bool {
        matches!(self, Resolution::Known(_))
    }
}

/// Read-only venue directory with a precomputed alias index. Resolution is
/// a pure function of (producer name, directory contents).
#[derive(Debug, Clone)]
pub struct VenueDirectory {
    venues: Vec<Venue>,
    alias_index: HashMap<String, String>,
}

impl VenueDirectory {
    pub fn new(venues: Vec<Venue>) -> Self {
        let mut alias_index = HashMap::new();
        for venue in &venues {
            alias_index.insert(venue.display_name.trim().to_lowercase(), venue.id.clone());
            for alias in &venue.aliases {
                alias_index.insert(alias.trim().to_lowercase(), venue.id.clone());
            }
        }
        Self {
            venues,
            alias_index,
        }
    }

    pub fn venues(&self) -> &[Venue] {
        &self.venues
    }

    pub fn get(&self, id: &str) -> Option<&Venue> {
        self.venues.iter().find(|v| v.id == id)
    }

    /// Exact alias lookup first, then a mutual-substring match against
    /// display names, then the slug fallback. First match wins.
    pub fn resolve(&self, producer_name: &str) -> Resolution {
        let needle = producer_name.trim().to_lowercase();
        if needle.is_empty() {
            return Resolution::Fallback(String::new());
        }
        if let Some(id) = self.alias_index.get(&needle) {
            return Resolution::Known(id.clone());
        }
        for venue in &self.venues {
            let display = venue.display_name.trim().to_lowercase();
            if display.contains(&needle) || needle.contains(&display) {
                return Resolution::Known(venue.id.clone());
            }
        }
        Resolution::Fallback(slugify(producer_name))
    }
}

/// Region gate for auto-discovery candidates. Permissive on purpose: a
/// false positive only queues a venue for human review.
const REGION_KEYWORDS: &[&str] = &[
    "sydney",
    "nsw",
    "new south wales",
    "marrickville",
    "newtown",
    "alexandria",
    "camperdown",
    "enmore",
    "surry hills",
    "crows nest",
    "rozelle",
    "brookvale",
    "petersham",
    "woolloomooloo",
    "manly",
    "balmain",
    "glebe",
    "redfern",
    "annandale",
    "leichhardt",
    "stanmore",
    "summer hill",
    "dulwich hill",
    "haberfield",
    "ashfield",
    "croydon",
    "rockdale",
    "kogarah",
    "hurstville",
    "sutherland",
    "parramatta",
    "liverpool",
    "blacktown",
    "penrith",
    "chatswood",
    "north sydney",
    "mosman",
    "bondi",
    "coogee",
    "banksmeadow",
    "katoomba",
];

pub fn is_in_region(location_text: &str) -> bool {
    if location_text.trim().is_empty() {
        return false;
    }
    let lower = location_text.to_lowercase();
    REGION_KEYWORDS.iter().any(|kw| lower.contains(kw))
}

/// Parse an RFC 3339 timestamp, falling back to `now` on any failure. The
/// fallback is deliberate: sources routinely emit garbage dates and a run
/// must never fail on one.
pub fn parse_timestamp_or_now(raw: &str, now: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw.trim())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(now)
}

static RELATIVE_TIME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d+)\s*([smhdw])").expect("static relative-time regex"));

/// Parse relative timestamps like "2h ago" or "3d" into `now - delta`.
/// Unrecognized input falls back to `now`.
pub fn parse_relative_time(raw: &str, now: DateTime<Utc>) -> DateTime<Utc> {
    let text = raw.trim().to_lowercase();
    let Some(caps) = RELATIVE_TIME_RE.captures(&text) else {
        return now;
    };
    let Ok(amount) = caps[1].parse::<i64>() else {
        return now;
    };
    let delta = match &caps[2] {
        "s" => Duration::seconds(amount),
        "m" => Duration::minutes(amount),
        "h" => Duration::hours(amount),
        "d" => Duration::days(amount),
        "w" => Duration::weeks(amount),
        _ => Duration::zero(),
    };
    now - delta
}

static BEER_NAME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"([A-Z][A-Za-z'&-]*(?:\s+[A-Z0-9][A-Za-z0-9'&-]*){0,4}\s+(?:NEIPA|XPA|IPA|Pale Ale|Ale|Stout|Sour|Lager|Pilsner))\b",
    )
    .expect("static beer-name regex")
});

/// Best-effort beer name guesses: capitalized phrases ending in a style
/// word, capped at three.
pub fn extract_beer_names(content: &str) -> Vec<String> {
    BEER_NAME_RE
        .captures_iter(content)
        .map(|caps| caps[1].trim().to_string())
        .take(3)
        .collect()
}

/// Fixed-capacity FIFO deque, shared by the metric error lists and the run
/// history. Capacity is persisted with the contents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundedDeque<T> {
    cap: usize,
    items: VecDeque<T>,
}

impl<T> BoundedDeque<T> {
    pub fn new(cap: usize) -> Self {
        Self {
            cap: cap.max(1),
            items: VecDeque::new(),
        }
    }

    /// Evicts down to the capacity, treating a (possibly hand-edited)
    /// persisted `cap` of 0 as 1 and shrinking oversized documents.
    pub fn push(&mut self, item: T) {
        while self.items.len() >= self.cap.max(1) {
            self.items.pop_front();
        }
        self.items.push_back(item);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }

    pub fn back(&self) -> Option<&T> {
        self.items.back()
    }

    pub fn back_mut(&mut self) -> Option<&mut T> {
        self.items.back_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn directory() -> VenueDirectory {
        VenueDirectory::new(vec![
            Venue {
                id: "batch-brewing".into(),
                display_name: "Batch Brewing Company".into(),
                aliases: vec!["batch".into()],
                location_text: "44 Sydenham Rd, Marrickville".into(),
            },
            Venue {
                id: "young-henrys".into(),
                display_name: "Young Henrys".into(),
                aliases: vec![],
                location_text: "76 Wilford St, Newtown".into(),
            },
        ])
    }

    #[test]
    fn exact_alias_lookup_wins() {
        let dir = directory();
        assert_eq!(
            dir.resolve("  BATCH "),
            Resolution::Known("batch-brewing".into())
        );
        assert_eq!(
            dir.resolve("batch brewing company"),
            Resolution::Known("batch-brewing".into())
        );
    }

    #[test]
    fn substring_match_works_both_ways() {
        let dir = directory();
        // Needle contains a display name.
        assert_eq!(
            dir.resolve("Young Henrys Newtown Taproom"),
            Resolution::Known("young-henrys".into())
        );
        // Display name contains the needle.
        assert_eq!(
            dir.resolve("Batch Brewing"),
            Resolution::Known("batch-brewing".into())
        );
    }

    #[test]
    fn unknown_producer_falls_back_to_slug() {
        let dir = directory();
        assert_eq!(
            dir.resolve("Hop & Barrel Co"),
            Resolution::Fallback("hop-and-barrel-co".into())
        );
    }

    #[test]
    fn resolution_is_deterministic() {
        let dir = directory();
        let first = dir.resolve("Mystery Brews");
        for _ in 0..10 {
            assert_eq!(dir.resolve("Mystery Brews"), first);
        }
    }

    #[test]
    fn slugify_handles_ampersand_and_punctuation() {
        assert_eq!(slugify("Hop & Barrel Co."), "hop-and-barrel-co");
        assert_eq!(slugify("  4 Pines  "), "4-pines");
        assert_eq!(slugify("Willie the Boatman!"), "willie-the-boatman");
    }

    #[test]
    fn region_check_matches_known_suburbs_only() {
        assert!(is_in_region("123 Main St, Marrickville"));
        assert!(is_in_region("Somewhere in NSW"));
        assert!(!is_in_region("123 Main St, Springfield"));
        assert!(!is_in_region(""));
    }

    #[test]
    fn relative_time_parses_units() {
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).single().unwrap();
        assert_eq!(parse_relative_time("2h ago", now), now - Duration::hours(2));
        assert_eq!(parse_relative_time("3d", now), now - Duration::days(3));
        assert_eq!(
            parse_relative_time("45 m ago", now),
            now - Duration::minutes(45)
        );
        assert_eq!(parse_relative_time("yesterday", now), now);
    }

    #[test]
    fn timestamp_parse_falls_back_to_now() {
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).single().unwrap();
        let parsed = parse_timestamp_or_now("2026-02-20T08:30:00Z", now);
        assert_eq!(
            parsed,
            Utc.with_ymd_and_hms(2026, 2, 20, 8, 30, 0).single().unwrap()
        );
        assert_eq!(parse_timestamp_or_now("not a date", now), now);
    }

    #[test]
    fn beer_name_extraction_caps_at_three() {
        let names = extract_beer_names(
            "Fresh Hazy IPA just dropped alongside Valley Sour, Midnight Stout, and Coastal Lager",
        );
        assert_eq!(names.len(), 3);
        assert_eq!(names[0], "Fresh Hazy IPA");
    }

    #[test]
    fn normalized_content_collapses_whitespace() {
        assert_eq!(
            normalize_content("  fresh \n\t Hazy   IPA "),
            "fresh Hazy IPA"
        );
    }

    #[test]
    fn bounded_deque_evicts_oldest() {
        let mut deque = BoundedDeque::new(3);
        for i in 0..5 {
            deque.push(i);
        }
        assert_eq!(deque.len(), 3);
        assert_eq!(deque.iter().copied().collect::<Vec<_>>(), vec![2, 3, 4]);
    }

    #[test]
    fn bounded_deque_stays_bounded_after_bad_documents() {
        // A hand-edited document with cap 0 must not grow unbounded.
        let mut deque: BoundedDeque<u32> =
            serde_json::from_str(r#"{"cap":0,"items":[]}"#).expect("parse");
        for i in 0..5 {
            deque.push(i);
        }
        assert_eq!(deque.len(), 1);
        assert_eq!(deque.back(), Some(&4));

        // A document holding more items than its cap shrinks on push.
        let mut deque: BoundedDeque<u32> =
            serde_json::from_str(r#"{"cap":2,"items":[1,2,3,4,5]}"#).expect("parse");
        deque.push(6);
        assert_eq!(deque.iter().copied().collect::<Vec<_>>(), vec![5, 6]);
    }
}
