pub mod fallback;
pub mod football_data;
pub mod http;
pub mod liquipedia;
pub mod lolesports;
pub mod parse;
pub mod provider;
pub mod vlr;
pub mod youtube;

pub use football_data::FootballData;
pub use liquipedia::Liquipedia;
pub use lolesports::LolEsports;
pub use provider::{Capability, Horizon, MatchSource, SourceFetch, SourceHealth, TimeRange};
pub use vlr::Vlr;
pub use youtube::YouTubeLive;

use std::collections::HashSet;
use tracing::{debug, warn};

use crate::cache::{FeedLoad, Provenance};
use crate::db::models::NormalizedMatch;

/// Stable dedup: the first occurrence of each id wins.
pub fn dedup_by_id(matches: Vec<NormalizedMatch>) -> Vec<NormalizedMatch> {
    let mut seen = HashSet::with_capacity(matches.len());
    matches
        .into_iter()
        .filter(|m| seen.insert(m.id.clone()))
        .collect()
}

/// Live first, then everything else by ascending start.
pub fn sort_live_first(matches: &mut [NormalizedMatch]) {
    matches.sort_by_key(|m| (!m.is_live(), m.start));
}

/// Common tail of every adapter: drop placeholder-vs-placeholder live
/// records, dedup, keep what falls in `range` (live matches always stay),
/// and order live first.
pub fn finalize(matches: Vec<NormalizedMatch>, range: &TimeRange) -> Vec<NormalizedMatch> {
    let before = matches.len();
    let matches: Vec<NormalizedMatch> = matches
        .into_iter()
        .filter(|m| !m.is_placeholder_live())
        .collect();
    if matches.len() != before {
        debug!("Dropped {} placeholder live record(s)", before - matches.len());
    }
    let mut matches: Vec<NormalizedMatch> = dedup_by_id(matches)
        .into_iter()
        .filter(|m| m.is_live() || range.contains(m.start))
        .collect();
    sort_live_first(&mut matches);
    matches
}

/// Collects the per-feed results of one adapter fetch and decides the
/// overall health.
#[derive(Default)]
pub(crate) struct FeedOutcomes {
    matches: Vec<NormalizedMatch>,
    fresh: usize,
    stale: usize,
    failed: usize,
}

impl FeedOutcomes {
    pub(crate) fn record(&mut self, source: &str, feed: &str, result: anyhow::Result<FeedLoad>) {
        match result {
            Ok(load) => {
                match load.provenance {
                    Provenance::Stale => self.stale += 1,
                    Provenance::Cached | Provenance::Refreshed => self.fresh += 1,
                }
                self.matches.extend(load.matches);
            }
            Err(e) => {
                warn!("[{}] {} feed failed: {:#}", source, feed, e);
                self.failed += 1;
            }
        }
    }

    /// `fallback` is only consulted when every feed failed.
    pub(crate) fn finish(
        self,
        range: &TimeRange,
        fallback: impl FnOnce() -> Option<Vec<NormalizedMatch>>,
    ) -> SourceFetch {
        if self.fresh + self.stale == 0 && self.failed > 0 {
            return match fallback() {
                Some(samples) => {
                    let mut samples = dedup_by_id(samples);
                    sort_live_first(&mut samples);
                    SourceFetch::new(samples, SourceHealth::Fallback)
                }
                None => SourceFetch::unavailable(),
            };
        }
        let health = if self.failed > 0 {
            SourceHealth::Partial
        } else if self.stale > 0 {
            SourceHealth::Stale
        } else {
            SourceHealth::Healthy
        };
        SourceFetch::new(finalize(self.matches, range), health)
    }
}
