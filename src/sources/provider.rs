use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::db::models::{Game, NormalizedMatch};

/// Closed time window `[from, to]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        TimeRange { from, to }
    }

    /// One day back to one day forward.
    pub fn rolling(now: DateTime<Utc>) -> Self {
        TimeRange::new(now - Duration::days(1), now + Duration::days(1))
    }

    /// Long horizon for tournament schedules.
    pub fn extended(now: DateTime<Utc>) -> Self {
        TimeRange::new(now - Duration::days(7), now + Duration::days(30))
    }

    pub fn for_horizon(horizon: Horizon, now: DateTime<Utc>) -> Self {
        match horizon {
            Horizon::Rolling => TimeRange::rolling(now),
            Horizon::Extended => TimeRange::extended(now),
        }
    }

    pub fn contains(&self, t: DateTime<Utc>) -> bool {
        self.from <= t && t <= self.to
    }
}

/// How far ahead a source's data is meaningful in an "all sports" view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Horizon {
    Rolling,
    Extended,
}

/// Which lifecycle phases a source can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    Live,
    Upcoming,
    Completed,
}

/// How a fetch went, from the caller's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceHealth {
    /// Every feed answered (from upstream or a fresh cache entry)
    Healthy,
    /// Some feeds failed, the rest answered
    Partial,
    /// Upstream failed and outdated cache entries were served
    Stale,
    /// Nothing answered; deterministic samples were served
    Fallback,
    /// Nothing answered and there is no fallback
    Unavailable,
}

/// Result of one adapter fetch. Always produced, never an error.
#[derive(Debug, Clone)]
pub struct SourceFetch {
    pub matches: Vec<NormalizedMatch>,
    pub health: SourceHealth,
}

impl SourceFetch {
    pub fn new(matches: Vec<NormalizedMatch>, health: SourceHealth) -> Self {
        SourceFetch { matches, health }
    }

    pub fn unavailable() -> Self {
        SourceFetch::new(Vec::new(), SourceHealth::Unavailable)
    }

    /// Failed outright: no data of any kind.
    pub fn is_unavailable(&self) -> bool {
        self.health == SourceHealth::Unavailable && self.matches.is_empty()
    }
}

/// Trait that every upstream match source must implement.
///
/// `fetch` must not fail: upstream errors, timeouts and schema changes are
/// handled inside the adapter and show up only in [`SourceFetch::health`].
#[async_trait]
pub trait MatchSource: Send + Sync {
    /// Human-readable name for logging; also the fingerprint prefix.
    fn name(&self) -> &str;

    fn game(&self) -> Game;

    fn horizon(&self) -> Horizon {
        Horizon::Rolling
    }

    fn capabilities(&self) -> &'static [Capability];

    async fn fetch(&self, range: TimeRange) -> SourceFetch;
}
