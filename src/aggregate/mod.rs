pub mod session;

pub use session::{ViewRegistry, ViewSession};

use chrono::Utc;
use serde::Serialize;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::AbortHandle;
use tracing::{info, warn};

use crate::db::models::{Game, MatchStatus, NormalizedMatch};
use crate::sources::{dedup_by_id, MatchSource, SourceFetch, SourceHealth, TimeRange};

/// Which games a request covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SportSelector {
    All,
    Game(Game),
}

impl FromStr for SportSelector {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().eq_ignore_ascii_case("all") || s.trim().is_empty() {
            Ok(SportSelector::All)
        } else {
            s.parse().map(SportSelector::Game)
        }
    }
}

impl std::fmt::Display for SportSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SportSelector::All => f.write_str("all"),
            SportSelector::Game(g) => write!(f, "{}", g),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AggregateError {
    #[error("no source is registered for {0}")]
    NoSource(Game),
    #[error("every source for {0} is unavailable")]
    SourceUnavailable(Game),
}

/// Matches bucketed by status. Empty buckets are left out when serialized.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GroupedMatches {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub live: Vec<NormalizedMatch>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub upcoming: Vec<NormalizedMatch>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub finished: Vec<NormalizedMatch>,
}

impl GroupedMatches {
    /// Partition by status. Live and upcoming ascend by start; finished
    /// descends (most recent first).
    pub fn from_matches(matches: Vec<NormalizedMatch>) -> Self {
        let mut grouped = GroupedMatches::default();
        for m in matches {
            match m.status {
                MatchStatus::Live => grouped.live.push(m),
                MatchStatus::Upcoming => grouped.upcoming.push(m),
                MatchStatus::Finished => grouped.finished.push(m),
            }
        }
        grouped.live.sort_by_key(|m| m.start);
        grouped.upcoming.sort_by_key(|m| m.start);
        grouped.finished.sort_by(|a, b| b.start.cmp(&a.start));
        grouped
    }

    pub fn len(&self) -> usize {
        self.live.len() + self.upcoming.len() + self.finished.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Non-empty buckets, in display order.
    pub fn buckets(&self) -> Vec<(MatchStatus, &[NormalizedMatch])> {
        [
            (MatchStatus::Live, self.live.as_slice()),
            (MatchStatus::Upcoming, self.upcoming.as_slice()),
            (MatchStatus::Finished, self.finished.as_slice()),
        ]
        .into_iter()
        .filter(|(_, b)| !b.is_empty())
        .collect()
    }

    /// Flat list where every live match precedes every non-live match.
    pub fn priority_view(&self) -> Vec<NormalizedMatch> {
        self.buckets()
            .into_iter()
            .flat_map(|(_, bucket)| bucket.iter().cloned())
            .collect()
    }
}

/// Per-source outcome of one aggregation.
#[derive(Debug, Clone, Serialize)]
pub struct SourceReport {
    pub source: String,
    pub game: Game,
    pub health: SourceHealth,
    pub matches: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct Aggregation {
    pub matches: GroupedMatches,
    pub sources: Vec<SourceReport>,
}

/// Aborts the spawned source tasks if the aggregation itself is dropped.
struct AbortOnDrop(Vec<AbortHandle>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        for handle in &self.0 {
            handle.abort();
        }
    }
}

/// Fans requests out to the registered sources and merges their results.
///
/// Sources are kept in registration order; on duplicate ids the earlier
/// source wins.
pub struct Aggregator {
    sources: Vec<Arc<dyn MatchSource>>,
    source_deadline: Duration,
}

impl Aggregator {
    pub fn new(sources: Vec<Arc<dyn MatchSource>>, source_deadline: Duration) -> Self {
        Aggregator {
            sources,
            source_deadline,
        }
    }

    pub fn sources(&self) -> &[Arc<dyn MatchSource>] {
        &self.sources
    }

    pub async fn aggregate(
        &self,
        selector: SportSelector,
        range: TimeRange,
    ) -> Result<GroupedMatches, AggregateError> {
        self.aggregate_detailed(selector, range).await.map(|a| a.matches)
    }

    /// Like [`Aggregator::aggregate`], also reporting how each source fared.
    ///
    /// For [`SportSelector::All`] the caller's range is ignored: each source
    /// gets the window matching its horizon.
    pub async fn aggregate_detailed(
        &self,
        selector: SportSelector,
        range: TimeRange,
    ) -> Result<Aggregation, AggregateError> {
        let now = Utc::now();
        let jobs: Vec<(Arc<dyn MatchSource>, TimeRange)> = match selector {
            SportSelector::All => self
                .sources
                .iter()
                .map(|s| (Arc::clone(s), TimeRange::for_horizon(s.horizon(), now)))
                .collect(),
            SportSelector::Game(game) => {
                let jobs: Vec<_> = self
                    .sources
                    .iter()
                    .filter(|s| s.game() == game)
                    .map(|s| (Arc::clone(s), range))
                    .collect();
                if jobs.is_empty() {
                    return Err(AggregateError::NoSource(game));
                }
                jobs
            }
        };

        let results = self.fan_out(&jobs).await;
        let all_unavailable = results.iter().all(SourceFetch::is_unavailable);

        let mut sources = Vec::with_capacity(results.len());
        let mut merged = Vec::new();
        for ((source, _), fetch) in jobs.iter().zip(results) {
            sources.push(SourceReport {
                source: source.name().to_string(),
                game: source.game(),
                health: fetch.health,
                matches: fetch.matches.len(),
            });
            merged.extend(fetch.matches);
        }

        if let SportSelector::Game(game) = selector {
            if all_unavailable {
                warn!("Every source for {} is unavailable", game);
                return Err(AggregateError::SourceUnavailable(game));
            }
        }

        let merged: Vec<NormalizedMatch> = dedup_by_id(merged)
            .into_iter()
            .filter(|m| !m.is_placeholder_live())
            .collect();
        let matches = GroupedMatches::from_matches(merged);
        info!(
            "Aggregated {} for {}: {} live, {} upcoming, {} finished from {} source(s)",
            matches.len(),
            selector,
            matches.live.len(),
            matches.upcoming.len(),
            matches.finished.len(),
            sources.len()
        );
        Ok(Aggregation { matches, sources })
    }

    /// One task per source, all settled. A source that panics or overruns
    /// the deadline counts as unavailable.
    async fn fan_out(&self, jobs: &[(Arc<dyn MatchSource>, TimeRange)]) -> Vec<SourceFetch> {
        let deadline = self.source_deadline;
        let handles: Vec<_> = jobs
            .iter()
            .map(|(source, range)| {
                let source = Arc::clone(source);
                let range = *range;
                tokio::spawn(async move { tokio::time::timeout(deadline, source.fetch(range)).await })
            })
            .collect();
        let _guard = AbortOnDrop(handles.iter().map(|h| h.abort_handle()).collect());

        let results = futures_util::future::join_all(handles).await;
        jobs.iter()
            .zip(results)
            .map(|((source, _), res)| match res {
                Ok(Ok(fetch)) => fetch,
                Ok(Err(_)) => {
                    warn!("Source '{}' timed out after {:?}", source.name(), deadline);
                    SourceFetch::unavailable()
                }
                Err(e) => {
                    warn!("Source '{}' task failed: {}", source.name(), e);
                    SourceFetch::unavailable()
                }
            })
            .collect()
    }
}
