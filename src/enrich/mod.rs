//! Best-effort team logo resolution.
//!
//! Nothing here can fail a request: every error path leaves the logo empty.

pub mod alias;
pub mod lookup;

pub use alias::{normalize_team_name, AliasTable};
pub use lookup::{HttpImageLookup, ImageCandidate, ImageLookup};

use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::debug;

use crate::aggregate::GroupedMatches;
use crate::db::models::{Game, NormalizedMatch, Team};

type MemoKey = (Game, String);

pub struct TeamEnricher {
    aliases: AliasTable,
    lookup: Option<Arc<dyn ImageLookup>>,
    lookup_timeout: Duration,
    /// Resolved logos, misses included. Read with `peek` so eviction drops
    /// the oldest insert rather than the least recently read.
    memo: Mutex<LruCache<MemoKey, Option<String>>>,
}

impl TeamEnricher {
    pub fn new(
        aliases: AliasTable,
        lookup: Option<Arc<dyn ImageLookup>>,
        lookup_timeout: Duration,
        memo_capacity: NonZeroUsize,
    ) -> Self {
        TeamEnricher {
            aliases,
            lookup,
            lookup_timeout,
            memo: Mutex::new(LruCache::new(memo_capacity)),
        }
    }

    fn memo_get(&self, key: &MemoKey) -> Option<Option<String>> {
        self.memo
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .peek(key)
            .cloned()
    }

    fn memo_put(&self, key: MemoKey, logo: Option<String>) {
        self.memo
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .put(key, logo);
    }

    pub fn memo_len(&self) -> usize {
        self.memo.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Drop every memoized result.
    pub fn reset(&self) {
        self.memo.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }

    async fn resolve(&self, name: &str, game: Game) -> Option<String> {
        let key = (game, normalize_team_name(name));
        if let Some(cached) = self.memo_get(&key) {
            return cached;
        }

        if let Some(logo) = self.aliases.lookup(game, name) {
            let logo = logo.to_string();
            self.memo_put(key, Some(logo.clone()));
            return Some(logo);
        }

        let Some(lookup) = &self.lookup else {
            self.memo_put(key, None);
            return None;
        };
        match tokio::time::timeout(self.lookup_timeout, lookup.candidates(name, game)).await {
            Ok(Ok(candidates)) => {
                let logo = lookup::best_candidate(&candidates).map(|c| c.url.clone());
                self.memo_put(key, logo.clone());
                logo
            }
            // transient failures are not memoized; the next request retries
            Ok(Err(e)) => {
                debug!("Image lookup for {} ({}) failed: {:#}", name, game, e);
                None
            }
            Err(_) => {
                debug!("Image lookup for {} ({}) timed out", name, game);
                None
            }
        }
    }

    /// Fill in `team.logo` if it is empty and a logo can be found.
    pub async fn enhance(&self, team: Team, game: Game) -> Team {
        if team.logo.is_some() || team.is_placeholder() {
            return team;
        }
        match self.resolve(&team.name, game).await {
            Some(logo) => team.with_logo(Some(logo)),
            None => team,
        }
    }

    pub async fn enhance_match(&self, mut m: NormalizedMatch) -> NormalizedMatch {
        let (home, away) = tokio::join!(
            self.enhance(m.home.clone(), m.game),
            self.enhance(m.away.clone(), m.game)
        );
        m.home = home;
        m.away = away;
        m
    }

    /// Enhance every match concurrently, keeping order.
    pub async fn enhance_all(&self, matches: Vec<NormalizedMatch>) -> Vec<NormalizedMatch> {
        futures_util::future::join_all(matches.into_iter().map(|m| self.enhance_match(m))).await
    }

    pub async fn enhance_grouped(&self, grouped: GroupedMatches) -> GroupedMatches {
        let (live, upcoming, finished) = tokio::join!(
            self.enhance_all(grouped.live),
            self.enhance_all(grouped.upcoming),
            self.enhance_all(grouped.finished)
        );
        GroupedMatches {
            live,
            upcoming,
            finished,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::MatchStatus;
    use crate::sources::http::UpstreamClient;
    use anyhow::Result;
    use async_trait::async_trait;
    use axum::{extract::Query, routing::get, Json, Router};
    use chrono::Utc;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingLookup {
        calls: AtomicUsize,
        result: Option<Vec<ImageCandidate>>,
        delay: Duration,
    }

    #[async_trait]
    impl ImageLookup for CountingLookup {
        async fn candidates(&self, _team: &str, _game: Game) -> Result<Vec<ImageCandidate>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.result.clone().ok_or_else(|| anyhow::anyhow!("HTTP 500"))
        }
    }

    fn counting(result: Option<Vec<ImageCandidate>>, delay: Duration) -> Arc<CountingLookup> {
        Arc::new(CountingLookup {
            calls: AtomicUsize::new(0),
            result,
            delay,
        })
    }

    fn enricher(lookup: Option<Arc<dyn ImageLookup>>, capacity: usize) -> TeamEnricher {
        let aliases = AliasTable::from_json(
            r#"{"games": {"valorant": {"Sentinels": "https://owcdn.net/img/sen.png"}}}"#,
        )
        .unwrap();
        TeamEnricher::new(
            aliases,
            lookup,
            Duration::from_millis(100),
            NonZeroUsize::new(capacity).unwrap(),
        )
    }

    fn logo(url: &str) -> ImageCandidate {
        ImageCandidate {
            url: url.into(),
            width: Some(200),
            height: Some(200),
            domain: None,
        }
    }

    #[tokio::test]
    async fn test_existing_logo_and_placeholders_untouched() {
        let lookup = counting(Some(vec![logo("https://x.example/a.png")]), Duration::ZERO);
        let e = enricher(Some(lookup.clone()), 8);
        let team = Team::new("Cloud9").with_logo(Some("https://mine.png".into()));
        assert_eq!(e.enhance(team.clone(), Game::Lol).await, team);
        assert_eq!(e.enhance(Team::tbd(), Game::Lol).await.logo, None);
        assert_eq!(lookup.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_alias_hit_skips_lookup() {
        let lookup = counting(None, Duration::ZERO);
        let e = enricher(Some(lookup.clone()), 8);
        let team = e.enhance(Team::new("SENTINELS esports"), Game::Valorant).await;
        assert_eq!(team.logo.as_deref(), Some("https://owcdn.net/img/sen.png"));
        assert_eq!(lookup.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_misses_are_memoized_failures_are_not() {
        let empty = counting(Some(vec![]), Duration::ZERO);
        let e = enricher(Some(empty.clone()), 8);
        e.enhance(Team::new("Nobody"), Game::Tft).await;
        e.enhance(Team::new("nobody "), Game::Tft).await;
        assert_eq!(empty.calls.load(Ordering::SeqCst), 1);

        let failing = counting(None, Duration::ZERO);
        let e = enricher(Some(failing.clone()), 8);
        assert_eq!(e.enhance(Team::new("Nobody"), Game::Tft).await.logo, None);
        e.enhance(Team::new("Nobody"), Game::Tft).await;
        assert_eq!(failing.calls.load(Ordering::SeqCst), 2);

        let slow = counting(Some(vec![logo("https://x.example/a.png")]), Duration::from_secs(2));
        let e = enricher(Some(slow.clone()), 8);
        assert_eq!(e.enhance(Team::new("Nobody"), Game::Tft).await.logo, None);
        assert_eq!(e.memo_len(), 0);
    }

    #[tokio::test]
    async fn test_memo_evicts_oldest_entry() {
        let lookup = counting(Some(vec![logo("https://x.example/a.png")]), Duration::ZERO);
        let e = enricher(Some(lookup.clone()), 2);
        for name in ["a", "b", "a", "c"] {
            e.enhance(Team::new(name), Game::Lol).await;
        }
        // "a" was read again before "c" arrived but is still the oldest insert
        assert_eq!(lookup.calls.load(Ordering::SeqCst), 3);
        e.enhance(Team::new("a"), Game::Lol).await;
        assert_eq!(lookup.calls.load(Ordering::SeqCst), 4);

        e.reset();
        assert_eq!(e.memo_len(), 0);
    }

    #[tokio::test]
    async fn test_enhance_all_over_http_lookup() {
        let app = Router::new().route(
            "/images",
            get(|Query(q): Query<HashMap<String, String>>| async move {
                let results = if q.get("q").map(String::as_str) == Some("Cloud9") {
                    json!([
                        {"url": "https://banner.example/c9.jpg", "width": 1200, "height": 300},
                        {"url": "https://static.lolesports.com/teams/c9.png", "width": 300, "height": 300}
                    ])
                } else {
                    json!([])
                };
                Json(json!({"results": results}))
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        let client = UpstreamClient::new(Duration::from_secs(2)).unwrap();
        let lookup = HttpImageLookup::new(client, &format!("http://{}/images", addr)).unwrap();
        let e = TeamEnricher::new(
            AliasTable::default(),
            Some(Arc::new(lookup)),
            Duration::from_secs(2),
            NonZeroUsize::new(16).unwrap(),
        );

        let m = NormalizedMatch::new(
            "lolesports_1",
            Game::Lol,
            Team::new("Cloud9"),
            Team::new("Unknown Squad"),
            Utc::now(),
            MatchStatus::Upcoming,
        );
        let out = e.enhance_all(vec![m]).await;
        assert_eq!(out[0].home.logo.as_deref(), Some("https://static.lolesports.com/teams/c9.png"));
        assert_eq!(out[0].away.logo, None);
    }
}
