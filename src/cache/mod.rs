//! Fingerprinted, freshness-aware cache in front of every upstream feed.
//!
//! Adapters never talk to the store directly. They hand [`FeedCache::load`] a
//! fingerprint, a freshness class, an upstream fetch future and a normalizer;
//! the cache decides whether the stored payload can be served or the upstream
//! must be hit, and writes the refreshed payload back.

pub mod freshness;

use anyhow::Result;
use chrono::{DateTime, Utc};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::db::models::{CacheEntry, FreshnessClass, MatchStatus, NormalizedMatch};
pub use crate::db::CacheField;
pub use freshness::{FreshnessDecision, FreshnessPolicy};

/// Persistent key/value store for upstream payloads.
///
/// Writes are full overwrites; nothing is versioned.
pub trait CacheStore: Send + Sync {
    fn get(&self, fingerprint: &str) -> Result<Option<CacheEntry>>;
    fn put(&self, entry: &CacheEntry) -> Result<()>;
    fn delete(&self, fingerprint: &str) -> Result<bool>;
    fn delete_where(&self, field: CacheField, value: &str) -> Result<usize>;
    fn find_where(&self, field: CacheField, value: &str) -> Result<Vec<CacheEntry>>;
    fn list(&self) -> Result<Vec<CacheEntry>>;
}

/// Deterministic cache key: `{source}_{dim1}_{dim2}...`.
///
/// Changing the rendering invalidates every stored entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    source: String,
    dims: Vec<String>,
}

impl Fingerprint {
    pub fn new(source: impl Into<String>) -> Self {
        Fingerprint {
            source: source.into(),
            dims: Vec::new(),
        }
    }

    pub fn dim(mut self, dim: impl fmt::Display) -> Self {
        self.dims.push(dim.to_string());
        self
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn key(&self) -> String {
        self.to_string()
    }

    /// The `live` feed of the same source, for fingerprints ending in `upcoming`.
    pub fn live_counterpart(&self) -> Option<Fingerprint> {
        match self.dims.last() {
            Some(last) if last == "upcoming" => {
                let mut dims = self.dims.clone();
                if let Some(last) = dims.last_mut() {
                    *last = "live".to_string();
                }
                Some(Fingerprint {
                    source: self.source.clone(),
                    dims,
                })
            }
            _ => None,
        }
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)?;
        for dim in &self.dims {
            write!(f, "_{}", dim)?;
        }
        Ok(())
    }
}

/// Flags derived from a normalized payload and stored next to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FeedSummary {
    pub has_live_matches: bool,
    pub next_earliest_match_time: Option<DateTime<Utc>>,
    pub live_match_count: u32,
}

impl FeedSummary {
    /// For `upcoming` feeds every item's start counts; elsewhere only items
    /// still scheduled do.
    pub fn from_matches(matches: &[NormalizedMatch], class: FreshnessClass) -> Self {
        // placeholder pairings are never served, so they must not pin the entry
        let live_match_count = matches
            .iter()
            .filter(|m| m.is_live() && !m.is_placeholder_live())
            .count() as u32;
        let next_earliest_match_time = matches
            .iter()
            .filter(|m| class == FreshnessClass::Upcoming || m.status == MatchStatus::Upcoming)
            .map(|m| m.start)
            .min();
        FeedSummary {
            has_live_matches: live_match_count > 0,
            next_earliest_match_time,
            live_match_count,
        }
    }
}

/// Where a loaded feed came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provenance {
    /// Served from a fresh cache entry
    Cached,
    /// Fetched from upstream and written back
    Refreshed,
    /// Upstream failed; an outdated cache entry was served instead
    Stale,
}

#[derive(Debug, Clone)]
pub struct FeedLoad {
    pub matches: Vec<NormalizedMatch>,
    pub provenance: Provenance,
}

/// Read-through cache shared by all source adapters.
#[derive(Clone)]
pub struct FeedCache {
    store: Arc<dyn CacheStore>,
    policy: FreshnessPolicy,
}

impl FeedCache {
    pub fn new(store: Arc<dyn CacheStore>, policy: FreshnessPolicy) -> Self {
        FeedCache { store, policy }
    }

    pub fn policy(&self) -> &FreshnessPolicy {
        &self.policy
    }

    pub fn store(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }

    /// Read an entry, treating a store failure as a miss.
    fn read(&self, fingerprint: &Fingerprint) -> Option<CacheEntry> {
        match self.store.get(&fingerprint.key()) {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Cache read failed for {}: {} (treating as miss)", fingerprint, e);
                None
            }
        }
    }

    /// Freshness check for one fingerprint. Fails open: an unreachable store
    /// means refresh.
    #[cfg(test)]
    pub fn should_refresh(&self, fingerprint: &Fingerprint, class: FreshnessClass) -> bool {
        let entry = self.read(fingerprint);
        self.policy.should_refresh(entry.as_ref(), class, Utc::now())
    }

    /// Serve `fingerprint` from cache when fresh, otherwise run `fetch`,
    /// normalize, and store the new payload.
    ///
    /// `normalize` receives the payload and the instant it was fetched, so
    /// relative upstream timestamps resolve against fetch time rather than
    /// read time. When the upstream fails, an outdated entry is served if one
    /// still parses; otherwise the upstream error is returned.
    pub async fn load<F, Fut, N>(
        &self,
        fingerprint: &Fingerprint,
        class: FreshnessClass,
        fetch: F,
        normalize: N,
    ) -> Result<FeedLoad>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<serde_json::Value>>,
        N: Fn(&serde_json::Value, DateTime<Utc>) -> Result<Vec<NormalizedMatch>>,
    {
        let now = Utc::now();
        let entry = self.read(fingerprint);
        let decision = self.policy.decide(entry.as_ref(), class, now);

        if let (FreshnessDecision::Fresh, Some(cached)) = (decision, entry.as_ref()) {
            match normalize(&cached.payload, cached.last_updated) {
                Ok(matches) => {
                    debug!("Cache hit: {} ({} matches)", fingerprint, matches.len());
                    return Ok(FeedLoad {
                        matches,
                        provenance: Provenance::Cached,
                    });
                }
                Err(e) => warn!("Cached payload for {} no longer parses: {}", fingerprint, e),
            }
        } else {
            debug!("Refreshing {}: {:?}", fingerprint, decision);
        }

        let refreshed = match fetch().await {
            Ok(payload) => normalize(&payload, now).map(|matches| (payload, matches)),
            Err(e) => Err(e),
        };

        match refreshed {
            Ok((payload, matches)) => {
                self.commit(fingerprint, class, payload, &matches, now);
                Ok(FeedLoad {
                    matches,
                    provenance: Provenance::Refreshed,
                })
            }
            Err(err) => {
                if let Some(stale) = entry {
                    if let Ok(matches) = normalize(&stale.payload, stale.last_updated) {
                        warn!(
                            "Upstream refresh of {} failed ({}); serving entry from {}",
                            fingerprint, err, stale.last_updated
                        );
                        return Ok(FeedLoad {
                            matches,
                            provenance: Provenance::Stale,
                        });
                    }
                }
                Err(err)
            }
        }
    }

    /// Write a refreshed payload. A refreshed `upcoming` feed supersedes the
    /// same source's `live` entry, so that entry is dropped; the reverse never
    /// happens.
    fn commit(
        &self,
        fingerprint: &Fingerprint,
        class: FreshnessClass,
        payload: serde_json::Value,
        matches: &[NormalizedMatch],
        now: DateTime<Utc>,
    ) {
        let summary = FeedSummary::from_matches(matches, class);
        let entry = CacheEntry {
            fingerprint: fingerprint.key(),
            source: fingerprint.source().to_string(),
            class,
            payload,
            last_updated: now,
            has_live_matches: summary.has_live_matches,
            next_earliest_match_time: summary.next_earliest_match_time,
            live_match_count: summary.live_match_count,
        };
        if let Err(e) = self.store.put(&entry) {
            warn!("Cache write failed for {}: {}", fingerprint, e);
            return;
        }
        info!(
            "Cached {} ({} matches, {} live)",
            fingerprint,
            matches.len(),
            summary.live_match_count
        );

        if class == FreshnessClass::Upcoming {
            if let Some(live) = fingerprint.live_counterpart() {
                match self.store.delete(&live.key()) {
                    Ok(true) => info!("Invalidated {} after {} refresh", live, fingerprint),
                    Ok(false) => {}
                    Err(e) => warn!("Failed to invalidate {}: {}", live, e),
                }
            }
        }
    }

    /// Explicit invalidation of one entry.
    pub fn invalidate(&self, fingerprint: &str) -> Result<bool> {
        self.store.delete(fingerprint)
    }

    /// Bulk invalidation by indexed field.
    pub fn invalidate_where(&self, field: CacheField, value: &str) -> Result<usize> {
        self.store.delete_where(field, value)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::db::models::{Game, Team};
    use crate::db::Database;
    use anyhow::anyhow;
    use chrono::Duration;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Store whose every call fails, standing in for an unreachable backend.
    pub(crate) struct UnreachableStore;

    impl CacheStore for UnreachableStore {
        fn get(&self, _: &str) -> Result<Option<CacheEntry>> {
            Err(anyhow!("connection refused"))
        }
        fn put(&self, _: &CacheEntry) -> Result<()> {
            Err(anyhow!("connection refused"))
        }
        fn delete(&self, _: &str) -> Result<bool> {
            Err(anyhow!("connection refused"))
        }
        fn delete_where(&self, _: CacheField, _: &str) -> Result<usize> {
            Err(anyhow!("connection refused"))
        }
        fn find_where(&self, _: CacheField, _: &str) -> Result<Vec<CacheEntry>> {
            Err(anyhow!("connection refused"))
        }
        fn list(&self) -> Result<Vec<CacheEntry>> {
            Err(anyhow!("connection refused"))
        }
    }

    fn upcoming_match(id: &str, start: DateTime<Utc>) -> NormalizedMatch {
        NormalizedMatch::new(
            id,
            Game::Valorant,
            Team::new("Sentinels"),
            Team::new("LOUD"),
            start,
            MatchStatus::Upcoming,
        )
    }

    /// Payload is a JSON array of start timestamps; normalizes to upcoming matches.
    fn normalize(payload: &serde_json::Value, _: DateTime<Utc>) -> Result<Vec<NormalizedMatch>> {
        let items = payload.as_array().ok_or_else(|| anyhow!("expected array"))?;
        items
            .iter()
            .enumerate()
            .map(|(i, v)| {
                let start: DateTime<Utc> = serde_json::from_value(v.clone())?;
                Ok(upcoming_match(&format!("m{}", i), start))
            })
            .collect()
    }

    fn seeded_entry(fingerprint: &str, class: FreshnessClass, age: Duration) -> CacheEntry {
        let start = Utc::now() + Duration::days(1);
        CacheEntry {
            fingerprint: fingerprint.to_string(),
            source: "valorant".to_string(),
            class,
            payload: json!([start]),
            last_updated: Utc::now() - age,
            has_live_matches: false,
            next_earliest_match_time: Some(start),
            live_match_count: 0,
        }
    }

    fn memory_cache() -> (Arc<Database>, FeedCache) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let cache = FeedCache::new(db.clone(), FreshnessPolicy::default());
        (db, cache)
    }

    #[test]
    fn test_fingerprint_format() {
        let fp = Fingerprint::new("footballdata").dim("PL").dim("2024-05-01").dim("2024-05-03");
        assert_eq!(fp.key(), "footballdata_PL_2024-05-01_2024-05-03");
        assert_eq!(Fingerprint::new("valorant").dim("upcoming").key(), "valorant_upcoming");
    }

    #[test]
    fn test_live_counterpart_only_for_upcoming() {
        let fp = Fingerprint::new("youtube").dim("pubg").dim("upcoming");
        assert_eq!(fp.live_counterpart().unwrap().key(), "youtube_pubg_live");
        assert!(Fingerprint::new("youtube").dim("pubg").dim("live").live_counterpart().is_none());
    }

    #[test]
    fn test_summary_from_matches() {
        let now = Utc::now();
        let mut live = upcoming_match("a", now - Duration::minutes(30));
        live.status = MatchStatus::Live;
        let later = upcoming_match("b", now + Duration::hours(3));
        let mut done = upcoming_match("c", now - Duration::hours(5));
        done.status = MatchStatus::Finished;

        let s = FeedSummary::from_matches(&[live.clone(), later.clone(), done.clone()], FreshnessClass::RangeQuery);
        assert!(s.has_live_matches);
        assert_eq!(s.live_match_count, 1);
        assert_eq!(s.next_earliest_match_time, Some(later.start));

        let s = FeedSummary::from_matches(&[later, done.clone()], FreshnessClass::Upcoming);
        assert_eq!(s.next_earliest_match_time, Some(done.start));
    }

    #[test]
    fn test_placeholder_live_rows_do_not_count_as_live() {
        let mut tbd = NormalizedMatch::new(
            "vlr_101",
            Game::Valorant,
            Team::tbd(),
            Team::tbd(),
            Utc::now(),
            MatchStatus::Live,
        );
        let s = FeedSummary::from_matches(std::slice::from_ref(&tbd), FreshnessClass::Live);
        assert!(!s.has_live_matches);
        assert_eq!(s.live_match_count, 0);

        tbd.home = Team::new("Sentinels");
        let s = FeedSummary::from_matches(&[tbd], FreshnessClass::Live);
        assert!(s.has_live_matches);
    }

    #[tokio::test]
    async fn test_fresh_entry_served_without_upstream_call() {
        let (db, cache) = memory_cache();
        db.put(&seeded_entry("valorant_upcoming", FreshnessClass::Upcoming, Duration::minutes(5)))
            .unwrap();
        let calls = AtomicUsize::new(0);
        let fp = Fingerprint::new("valorant").dim("upcoming");

        let load = cache
            .load(
                &fp,
                FreshnessClass::Upcoming,
                || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(json!([]))
                },
                normalize,
            )
            .await
            .unwrap();
        assert_eq!(load.provenance, Provenance::Cached);
        assert_eq!(load.matches.len(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_upcoming_refresh_clears_live_entry() {
        let (db, cache) = memory_cache();
        // upcoming entry is 20h old with a 12h max age
        db.put(&seeded_entry("valorant_upcoming", FreshnessClass::Upcoming, Duration::hours(20)))
            .unwrap();
        db.put(&seeded_entry("valorant_live", FreshnessClass::Live, Duration::minutes(1)))
            .unwrap();
        let fp = Fingerprint::new("valorant").dim("upcoming");
        assert!(cache.should_refresh(&fp, FreshnessClass::Upcoming));

        let start = Utc::now() + Duration::days(3);
        let load = cache
            .load(&fp, FreshnessClass::Upcoming, || async move { Ok(json!([start, start])) }, normalize)
            .await
            .unwrap();
        assert_eq!(load.provenance, Provenance::Refreshed);

        assert!(db.get("valorant_live").unwrap().is_none());
        let replaced = db.get("valorant_upcoming").unwrap().unwrap();
        assert_eq!(replaced.payload, json!([start, start]));
    }

    #[tokio::test]
    async fn test_live_refresh_leaves_upcoming_entry() {
        let (db, cache) = memory_cache();
        let upcoming = seeded_entry("valorant_upcoming", FreshnessClass::Upcoming, Duration::minutes(1));
        db.put(&upcoming).unwrap();

        let fp = Fingerprint::new("valorant").dim("live");
        let start = Utc::now() + Duration::hours(1);
        cache
            .load(&fp, FreshnessClass::Live, || async move { Ok(json!([start])) }, normalize)
            .await
            .unwrap();

        assert!(db.get("valorant_live").unwrap().is_some());
        assert_eq!(db.get("valorant_upcoming").unwrap().unwrap(), upcoming);
    }

    #[tokio::test]
    async fn test_failed_refresh_serves_stale_entry() {
        let (db, cache) = memory_cache();
        db.put(&seeded_entry("valorant_upcoming", FreshnessClass::Upcoming, Duration::hours(20)))
            .unwrap();
        let fp = Fingerprint::new("valorant").dim("upcoming");

        let load = cache
            .load(&fp, FreshnessClass::Upcoming, || async { Err(anyhow!("HTTP 503")) }, normalize)
            .await
            .unwrap();
        assert_eq!(load.provenance, Provenance::Stale);
        assert_eq!(load.matches.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_refresh_without_entry_is_error() {
        let (_db, cache) = memory_cache();
        let fp = Fingerprint::new("valorant").dim("upcoming");
        let res = cache
            .load(&fp, FreshnessClass::Upcoming, || async { Err(anyhow!("timeout")) }, normalize)
            .await;
        assert!(res.is_err());
    }

    #[tokio::test]
    async fn test_unparseable_upstream_payload_not_cached() {
        let (db, cache) = memory_cache();
        let fp = Fingerprint::new("valorant").dim("upcoming");
        let res = cache
            .load(&fp, FreshnessClass::Upcoming, || async { Ok(json!({"schema": "changed"})) }, normalize)
            .await;
        assert!(res.is_err());
        assert!(db.get("valorant_upcoming").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unreachable_store_fails_open() {
        let cache = FeedCache::new(Arc::new(UnreachableStore), FreshnessPolicy::default());
        let fp = Fingerprint::new("valorant").dim("upcoming");
        assert!(cache.should_refresh(&fp, FreshnessClass::Upcoming));

        let start = Utc::now() + Duration::hours(1);
        let load = cache
            .load(&fp, FreshnessClass::Upcoming, || async move { Ok(json!([start])) }, normalize)
            .await
            .unwrap();
        assert_eq!(load.provenance, Provenance::Refreshed);
        assert_eq!(load.matches.len(), 1);
    }
}
