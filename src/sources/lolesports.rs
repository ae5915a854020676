use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use url::Url;

use super::fallback::sample_matches;
use super::http::UpstreamClient;
use super::provider::{Capability, MatchSource, SourceFetch, TimeRange};
use super::{parse, FeedOutcomes};
use crate::cache::{FeedCache, Fingerprint};
use crate::db::models::{FreshnessClass, Game, MatchStatus, NormalizedMatch, Team};

const SOURCE: &str = "lolesports";

/// League of Legends schedule provider (lolesports persisted gateway).
pub struct LolEsports {
    client: UpstreamClient,
    cache: FeedCache,
    base_url: Url,
    api_key: Option<String>,
    /// League ids to restrict the schedule to; empty means every league
    leagues: Vec<String>,
    sample_fallback: bool,
}

impl LolEsports {
    pub fn new(
        client: UpstreamClient,
        cache: FeedCache,
        base_url: &str,
        api_key: Option<String>,
        leagues: Vec<String>,
        sample_fallback: bool,
    ) -> Result<Self> {
        Ok(LolEsports {
            client,
            cache,
            base_url: Url::parse(base_url).context("Invalid lolesports base URL")?,
            api_key,
            leagues,
            sample_fallback,
        })
    }

    fn fingerprint(&self) -> Fingerprint {
        let leagues = if self.leagues.is_empty() {
            "all".to_string()
        } else {
            self.leagues.join("-")
        };
        Fingerprint::new(SOURCE).dim("schedule").dim(leagues)
    }

    fn schedule_url(&self) -> Result<Url> {
        let mut url = self.base_url.join("getSchedule").context("Invalid lolesports path")?;
        {
            let mut q = url.query_pairs_mut();
            q.append_pair("hl", "en-US");
            if !self.leagues.is_empty() {
                q.append_pair("leagueId", &self.leagues.join(","));
            }
        }
        Ok(url)
    }
}

#[async_trait]
impl MatchSource for LolEsports {
    fn name(&self) -> &str {
        SOURCE
    }

    fn game(&self) -> Game {
        Game::Lol
    }

    fn capabilities(&self) -> &'static [Capability] {
        &[Capability::Live, Capability::Upcoming, Capability::Completed]
    }

    async fn fetch(&self, range: TimeRange) -> SourceFetch {
        let fingerprint = self.fingerprint();
        let result = match self.schedule_url() {
            Ok(url) => {
                self.cache
                    .load(
                        &fingerprint,
                        FreshnessClass::RangeQuery,
                        || async move {
                            let headers: Vec<(&str, &str)> = self
                                .api_key
                                .as_deref()
                                .map(|k| vec![("x-api-key", k)])
                                .unwrap_or_default();
                            self.client.get_json(url, &headers).await.map_err(anyhow::Error::from)
                        },
                        |payload, _| parse_schedule(payload),
                    )
                    .await
            }
            Err(e) => Err(e),
        };

        let mut outcomes = FeedOutcomes::default();
        outcomes.record(SOURCE, "schedule", result);
        outcomes.finish(&range, || {
            self.sample_fallback
                .then(|| sample_matches(SOURCE, Game::Lol, Utc::now()))
        })
    }
}

#[derive(Debug, Deserialize)]
struct ScheduleResponse {
    data: ScheduleData,
}

#[derive(Debug, Deserialize)]
struct ScheduleData {
    schedule: Schedule,
}

#[derive(Debug, Deserialize)]
struct Schedule {
    #[serde(default)]
    events: Vec<Event>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Event {
    start_time: DateTime<Utc>,
    state: String,
    #[serde(rename = "type")]
    kind: String,
    block_name: Option<String>,
    league: Option<League>,
    #[serde(rename = "match")]
    game: Option<EventMatch>,
}

#[derive(Debug, Deserialize)]
struct League {
    name: String,
}

#[derive(Debug, Deserialize)]
struct EventMatch {
    id: String,
    #[serde(default)]
    teams: Vec<EventTeam>,
}

#[derive(Debug, Deserialize)]
struct EventTeam {
    name: Option<String>,
    image: Option<String>,
    result: Option<TeamResult>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TeamResult {
    game_wins: Option<u32>,
}

fn status_from_state(state: &str) -> Option<MatchStatus> {
    match state {
        "inProgress" => Some(MatchStatus::Live),
        "unstarted" => Some(MatchStatus::Upcoming),
        "completed" => Some(MatchStatus::Finished),
        _ => None,
    }
}

fn parse_schedule(raw: &serde_json::Value) -> Result<Vec<NormalizedMatch>> {
    let resp: ScheduleResponse =
        serde_json::from_value(raw.clone()).context("Unexpected lolesports schedule payload")?;

    let matches = resp
        .data
        .schedule
        .events
        .into_iter()
        // shows, award segments and the like carry no match
        .filter(|ev| ev.kind == "match")
        .filter_map(|ev| {
            let status = status_from_state(&ev.state)?;
            let game = ev.game?;
            let mut teams = game.teams.into_iter().map(|t| {
                let score = match status {
                    MatchStatus::Upcoming => None,
                    _ => t.result.and_then(|r| r.game_wins),
                };
                parse::team_or_tbd(t.name.as_deref())
                    .with_logo(t.image)
                    .with_score(score)
            });
            let home = teams.next().unwrap_or_else(Team::tbd);
            let away = teams.next().unwrap_or_else(Team::tbd);

            let mut m = NormalizedMatch::new(
                format!("{}_{}", SOURCE, game.id),
                Game::Lol,
                home,
                away,
                ev.start_time,
                status,
            );
            m.league = ev.league.map(|l| l.name).unwrap_or_default();
            m.stage = ev.block_name.unwrap_or_default();
            Some(m)
        })
        .collect();
    Ok(matches)
}
