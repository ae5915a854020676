use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use url::Url;

use super::http::UpstreamClient;
use super::provider::{Capability, MatchSource, SourceFetch, TimeRange};
use super::{parse, FeedOutcomes};
use crate::cache::{FeedCache, FeedLoad, Fingerprint};
use crate::db::models::{FreshnessClass, Game, MatchStatus, NormalizedMatch};

const SOURCE: &str = "footballdata";

/// Football competition-matches provider (football-data.org v4 shape).
///
/// One date-range query per competition, run one after another to stay
/// under the free tier's request rate. Has no sample fallback: if every
/// competition fails, the source reports itself unavailable.
pub struct FootballData {
    client: UpstreamClient,
    cache: FeedCache,
    base_url: Url,
    api_key: Option<String>,
    competitions: Vec<String>,
}

impl FootballData {
    pub fn new(
        client: UpstreamClient,
        cache: FeedCache,
        base_url: &str,
        api_key: Option<String>,
        competitions: Vec<String>,
    ) -> Result<Self> {
        Ok(FootballData {
            client,
            cache,
            base_url: Url::parse(base_url).context("Invalid football-data base URL")?,
            api_key,
            competitions,
        })
    }

    fn matches_url(&self, competition: &str, range: &TimeRange) -> Result<Url> {
        let mut url = self
            .base_url
            .join(&format!("competitions/{}/matches", competition))
            .context("Invalid competition path")?;
        url.query_pairs_mut()
            .append_pair("dateFrom", &range.from.format("%Y-%m-%d").to_string())
            .append_pair("dateTo", &range.to.format("%Y-%m-%d").to_string());
        Ok(url)
    }

    async fn fetch_competition(&self, competition: &str, range: &TimeRange) -> Result<FeedLoad> {
        let fingerprint = Fingerprint::new(SOURCE)
            .dim(competition)
            .dim(range.from.format("%Y-%m-%d"))
            .dim(range.to.format("%Y-%m-%d"));
        let url = self.matches_url(competition, range)?;
        self.cache
            .load(
                &fingerprint,
                FreshnessClass::RangeQuery,
                || async move {
                    let headers: Vec<(&str, &str)> = self
                        .api_key
                        .as_deref()
                        .map(|k| vec![("X-Auth-Token", k)])
                        .unwrap_or_default();
                    self.client.get_json(url, &headers).await.map_err(anyhow::Error::from)
                },
                |payload, _| parse_matches_response(payload),
            )
            .await
    }
}

#[async_trait]
impl MatchSource for FootballData {
    fn name(&self) -> &str {
        SOURCE
    }

    fn game(&self) -> Game {
        Game::Football
    }

    fn capabilities(&self) -> &'static [Capability] {
        &[Capability::Live, Capability::Upcoming, Capability::Completed]
    }

    async fn fetch(&self, range: TimeRange) -> SourceFetch {
        let mut outcomes = FeedOutcomes::default();
        for competition in &self.competitions {
            let result = self.fetch_competition(competition, &range).await;
            outcomes.record(SOURCE, competition, result);
        }
        outcomes.finish(&range, || None)
    }
}

// ── Upstream shape ───────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct MatchesResponse {
    competition: Option<Competition>,
    #[serde(default)]
    matches: Vec<FdMatch>,
}

#[derive(Debug, Deserialize)]
struct Competition {
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FdMatch {
    id: u64,
    utc_date: DateTime<Utc>,
    status: String,
    stage: Option<String>,
    matchday: Option<u32>,
    home_team: FdTeam,
    away_team: FdTeam,
    score: Option<FdScore>,
    venue: Option<String>,
    area: Option<FdArea>,
    minute: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct FdTeam {
    name: Option<String>,
    crest: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FdScore {
    full_time: Option<FdScoreLine>,
}

#[derive(Debug, Deserialize)]
struct FdScoreLine {
    home: Option<u32>,
    away: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct FdArea {
    name: String,
}

/// Map an upstream status; cancelled fixtures yield `None`.
fn status_from_str(s: &str) -> Option<MatchStatus> {
    match s {
        "IN_PLAY" | "PAUSED" | "LIVE" | "EXTRA_TIME" | "PENALTY_SHOOTOUT" => Some(MatchStatus::Live),
        "FINISHED" | "AWARDED" => Some(MatchStatus::Finished),
        "SCHEDULED" | "TIMED" | "POSTPONED" | "SUSPENDED" => Some(MatchStatus::Upcoming),
        _ => None,
    }
}

fn stage_label(stage: Option<&str>, matchday: Option<u32>) -> String {
    match (stage, matchday) {
        (Some("REGULAR_SEASON"), Some(day)) | (None, Some(day)) => format!("Matchday {}", day),
        (Some(stage), _) => stage
            .split('_')
            .map(|w| {
                let lower = w.to_lowercase();
                let mut chars = lower.chars();
                match chars.next() {
                    Some(c) => c.to_uppercase().collect::<String>() + chars.as_str(),
                    None => String::new(),
                }
            })
            .collect::<Vec<_>>()
            .join(" "),
        (None, None) => String::new(),
    }
}

fn parse_matches_response(raw: &serde_json::Value) -> Result<Vec<NormalizedMatch>> {
    let resp: MatchesResponse =
        serde_json::from_value(raw.clone()).context("Unexpected football-data payload")?;
    let league = resp.competition.map(|c| c.name).unwrap_or_default();

    let matches = resp
        .matches
        .into_iter()
        .filter_map(|fd| {
            let status = status_from_str(&fd.status)?;
            let (home_score, away_score) = match (status, fd.score.and_then(|s| s.full_time)) {
                (MatchStatus::Upcoming, _) | (_, None) => (None, None),
                (_, Some(line)) => (line.home, line.away),
            };
            let home = parse::team_or_tbd(fd.home_team.name.as_deref())
                .with_logo(fd.home_team.crest)
                .with_score(home_score);
            let away = parse::team_or_tbd(fd.away_team.name.as_deref())
                .with_logo(fd.away_team.crest)
                .with_score(away_score);

            let mut m = NormalizedMatch::new(
                format!("{}_{}", SOURCE, fd.id),
                Game::Football,
                home,
                away,
                fd.utc_date,
                status,
            );
            m.league = league.clone();
            m.stage = stage_label(fd.stage.as_deref(), fd.matchday);
            m.venue = fd.venue;
            m.region = fd.area.map(|a| a.name);
            m.details.minute = fd.minute.filter(|_| status == MatchStatus::Live);
            Some(m)
        })
        .collect();
    Ok(matches)
}
