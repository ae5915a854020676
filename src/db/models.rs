use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Team names that mean "not decided yet".
const PLACEHOLDER_NAMES: &[&str] = &["tbd", "tba", "to be determined", "to be announced", "?"];

/// The sentinel used for an unresolved team slot.
pub const TBD: &str = "TBD";

/// Game / sport covered by the aggregator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Game {
    Valorant,
    Pubg,
    Tft,
    Lol,
    Football,
}

impl Game {
    pub fn as_str(&self) -> &'static str {
        match self {
            Game::Valorant => "valorant",
            Game::Pubg => "pubg",
            Game::Tft => "tft",
            Game::Lol => "lol",
            Game::Football => "football",
        }
    }
}

impl fmt::Display for Game {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Game {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "valorant" | "val" => Ok(Game::Valorant),
            "pubg" => Ok(Game::Pubg),
            "tft" | "teamfight tactics" => Ok(Game::Tft),
            "lol" | "league of legends" => Ok(Game::Lol),
            "football" | "soccer" => Ok(Game::Football),
            other => anyhow::bail!("unknown game: {}", other),
        }
    }
}

/// Lifecycle status of a match, always re-derived from upstream state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchStatus {
    Live,
    Upcoming,
    Finished,
}

impl MatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchStatus::Live => "live",
            MatchStatus::Upcoming => "upcoming",
            MatchStatus::Finished => "finished",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Team {
    pub name: String,
    pub logo: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<u32>,
}

impl Team {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let name = if name.trim().is_empty() {
            TBD.to_string()
        } else {
            name.trim().to_string()
        };
        Team {
            name,
            logo: None,
            score: None,
        }
    }

    pub fn tbd() -> Self {
        Team::new(TBD)
    }

    pub fn with_score(mut self, score: Option<u32>) -> Self {
        self.score = score;
        self
    }

    pub fn with_logo(mut self, logo: Option<String>) -> Self {
        self.logo = logo.filter(|l| !l.trim().is_empty());
        self
    }

    /// True when the slot has not been filled by a real team yet.
    pub fn is_placeholder(&self) -> bool {
        let name = self.name.trim().to_lowercase();
        name.is_empty() || PLACEHOLDER_NAMES.contains(&name.as_str())
    }
}

/// Game-specific extras. Nothing in the core depends on these.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MatchDetails {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub round_scores: Option<(u32, u32)>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_map: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub minute: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub viewers: Option<u64>,
}

/// Canonical cross-source match representation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedMatch {
    pub id: String,
    pub game: Game,
    pub league: String,
    pub stage: String,
    pub home: Team,
    pub away: Team,
    pub start: DateTime<Utc>,
    pub status: MatchStatus,
    pub region: Option<String>,
    pub venue: Option<String>,
    pub stream: Option<String>,
    #[serde(default)]
    pub details: MatchDetails,
}

impl NormalizedMatch {
    pub fn new(
        id: impl Into<String>,
        game: Game,
        home: Team,
        away: Team,
        start: DateTime<Utc>,
        status: MatchStatus,
    ) -> Self {
        NormalizedMatch {
            id: id.into(),
            game,
            league: String::new(),
            stage: String::new(),
            home,
            away,
            start,
            status,
            region: None,
            venue: None,
            stream: None,
            details: MatchDetails::default(),
        }
    }

    pub fn is_live(&self) -> bool {
        self.status == MatchStatus::Live
    }

    /// A live record where neither slot names a real team.
    pub fn is_placeholder_live(&self) -> bool {
        self.is_live() && self.home.is_placeholder() && self.away.is_placeholder()
    }
}

/// Cache max-age category of a feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FreshnessClass {
    /// Live-oriented feeds (e.g. live video broadcasts).
    Live,
    /// Schedule-oriented feeds that only list future events.
    Upcoming,
    /// Match-list / date-range queries that may contain live matches.
    RangeQuery,
}

impl FreshnessClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            FreshnessClass::Live => "live",
            FreshnessClass::Upcoming => "upcoming",
            FreshnessClass::RangeQuery => "range-query",
        }
    }
}

impl fmt::Display for FreshnessClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FreshnessClass {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "live" => Ok(FreshnessClass::Live),
            "upcoming" => Ok(FreshnessClass::Upcoming),
            "range-query" | "range" => Ok(FreshnessClass::RangeQuery),
            other => anyhow::bail!("unknown freshness class: {}", other),
        }
    }
}

/// A persisted upstream payload keyed by request fingerprint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub fingerprint: String,
    pub source: String,
    pub class: FreshnessClass,
    /// Upstream-shaped data, stored before normalization
    pub payload: serde_json::Value,
    pub last_updated: DateTime<Utc>,
    pub has_live_matches: bool,
    pub next_earliest_match_time: Option<DateTime<Utc>>,
    pub live_match_count: u32,
}

/// Cache entry metadata without the payload, for listings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntrySummary {
    pub fingerprint: String,
    pub source: String,
    pub class: FreshnessClass,
    pub last_updated: DateTime<Utc>,
    pub has_live_matches: bool,
    pub next_earliest_match_time: Option<DateTime<Utc>>,
    pub live_match_count: u32,
}

impl From<&CacheEntry> for CacheEntrySummary {
    fn from(entry: &CacheEntry) -> Self {
        CacheEntrySummary {
            fingerprint: entry.fingerprint.clone(),
            source: entry.source.clone(),
            class: entry.class,
            last_updated: entry.last_updated,
            has_live_matches: entry.has_live_matches,
            next_earliest_match_time: entry.next_earliest_match_time,
            live_match_count: entry.live_match_count,
        }
    }
}
