//! Staleness rules for cached upstream payloads.
//!
//! The policy is a pure function of a cache entry, its freshness class and
//! the current time. Rules are evaluated in order and the first match wins:
//!
//! 1. no entry                                  -> refresh
//! 2. entry saw live matches                    -> refresh (live scores are never served stale)
//! 3. older than the class max-age              -> refresh
//! 4. earliest scheduled start has been reached -> refresh (something may have gone live)
//! 5. otherwise                                 -> serve from cache
//!
//! For `upcoming` feeds the cached `next_earliest_match_time` covers every
//! item in the payload, so rule 4 also catches "any scheduled start is now in
//! the past".

use chrono::{DateTime, Duration, Utc};

use crate::db::models::{CacheEntry, FreshnessClass};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreshnessPolicy {
    pub range_query_max_age: Duration,
    pub live_max_age: Duration,
    pub upcoming_max_age: Duration,
}

impl Default for FreshnessPolicy {
    fn default() -> Self {
        FreshnessPolicy {
            range_query_max_age: Duration::minutes(5),
            live_max_age: Duration::minutes(30),
            upcoming_max_age: Duration::hours(12),
        }
    }
}

/// Why the policy decided what it decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FreshnessDecision {
    Missing,
    HasLiveMatches,
    Expired { age: Duration },
    MatchStarted { at: DateTime<Utc> },
    Fresh,
}

impl FreshnessDecision {
    pub fn needs_refresh(&self) -> bool {
        !matches!(self, FreshnessDecision::Fresh)
    }
}

impl FreshnessPolicy {
    pub fn max_age(&self, class: FreshnessClass) -> Duration {
        match class {
            FreshnessClass::RangeQuery => self.range_query_max_age,
            FreshnessClass::Live => self.live_max_age,
            FreshnessClass::Upcoming => self.upcoming_max_age,
        }
    }

    pub fn decide(
        &self,
        entry: Option<&CacheEntry>,
        class: FreshnessClass,
        now: DateTime<Utc>,
    ) -> FreshnessDecision {
        let Some(entry) = entry else {
            return FreshnessDecision::Missing;
        };
        if entry.has_live_matches {
            return FreshnessDecision::HasLiveMatches;
        }
        let age = now - entry.last_updated;
        if age > self.max_age(class) {
            return FreshnessDecision::Expired { age };
        }
        if let Some(at) = entry.next_earliest_match_time {
            if now >= at {
                return FreshnessDecision::MatchStarted { at };
            }
        }
        FreshnessDecision::Fresh
    }

    pub fn should_refresh(
        &self,
        entry: Option<&CacheEntry>,
        class: FreshnessClass,
        now: DateTime<Utc>,
    ) -> bool {
        self.decide(entry, class, now).needs_refresh()
    }
}
