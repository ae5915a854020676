use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::debug;
use url::Url;

use super::fallback::sample_matches;
use super::http::UpstreamClient;
use super::provider::{Capability, MatchSource, SourceFetch, TimeRange};
use super::{parse, FeedOutcomes};
use crate::cache::{FeedCache, FeedLoad, Fingerprint};
use crate::db::models::{FreshnessClass, Game, MatchStatus, NormalizedMatch, Team};

const SOURCE: &str = "vlr";

/// One of the three VLR match listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Feed {
    Live,
    Upcoming,
    Results,
}

impl Feed {
    /// Fetch order: live, then upcoming, then completed.
    const ALL: [Feed; 3] = [Feed::Live, Feed::Upcoming, Feed::Results];

    fn query(self) -> &'static str {
        match self {
            Feed::Live => "live_score",
            Feed::Upcoming => "upcoming",
            Feed::Results => "results",
        }
    }

    fn dim(self) -> &'static str {
        match self {
            Feed::Live => "live",
            Feed::Upcoming => "upcoming",
            Feed::Results => "results",
        }
    }

    fn class(self) -> FreshnessClass {
        match self {
            Feed::Live => FreshnessClass::Live,
            Feed::Upcoming => FreshnessClass::Upcoming,
            Feed::Results => FreshnessClass::RangeQuery,
        }
    }
}

/// Valorant schedule provider backed by a vlr.gg JSON mirror.
///
/// Times come either as a naive local timestamp (`unix_timestamp`, despite
/// the name) or as relative strings such as "1d 2h from now".
pub struct Vlr {
    client: UpstreamClient,
    cache: FeedCache,
    base_url: Url,
    /// UTC offset, in hours, of the naive timestamps the upstream reports
    utc_offset_hours: i32,
    sample_fallback: bool,
}

impl Vlr {
    pub fn new(
        client: UpstreamClient,
        cache: FeedCache,
        base_url: &str,
        utc_offset_hours: i32,
        sample_fallback: bool,
    ) -> Result<Self> {
        Ok(Vlr {
            client,
            cache,
            base_url: Url::parse(base_url).context("Invalid vlr base URL")?,
            utc_offset_hours,
            sample_fallback,
        })
    }

    async fn fetch_feed(&self, feed: Feed) -> Result<FeedLoad> {
        let mut url = self.base_url.join("match").context("Invalid vlr path")?;
        url.query_pairs_mut().append_pair("q", feed.query());
        let fingerprint = Fingerprint::new(SOURCE).dim(feed.dim());
        let offset = self.utc_offset_hours;

        self.cache
            .load(
                &fingerprint,
                feed.class(),
                || async move { self.client.get_json(url, &[]).await.map_err(anyhow::Error::from) },
                |payload, fetched_at| parse_segments(payload, feed, fetched_at, offset),
            )
            .await
    }
}

#[async_trait]
impl MatchSource for Vlr {
    fn name(&self) -> &str {
        SOURCE
    }

    fn game(&self) -> Game {
        Game::Valorant
    }

    fn capabilities(&self) -> &'static [Capability] {
        &[Capability::Live, Capability::Upcoming, Capability::Completed]
    }

    async fn fetch(&self, range: TimeRange) -> SourceFetch {
        let mut outcomes = FeedOutcomes::default();
        for feed in Feed::ALL {
            let result = self.fetch_feed(feed).await;
            outcomes.record(SOURCE, feed.dim(), result);
        }
        outcomes.finish(&range, || {
            self.sample_fallback
                .then(|| sample_matches(SOURCE, Game::Valorant, Utc::now()))
        })
    }
}

/// Numeric match id from a match page path like `/314512/team-a-vs-team-b`.
fn match_number(page: &str) -> Option<&str> {
    page.split('/')
        .find(|seg| !seg.is_empty() && seg.chars().all(|c| c.is_ascii_digit()))
}

fn str_field<'a>(seg: &'a Value, key: &str) -> Option<&'a str> {
    seg[key].as_str().map(str::trim).filter(|s| !s.is_empty())
}

/// Start time of a segment. The naive timestamp wins; a relative string is
/// resolved against the fetch instant.
fn segment_start(
    seg: &Value,
    feed: Feed,
    status: MatchStatus,
    fetched_at: DateTime<Utc>,
    offset: i32,
) -> Option<DateTime<Utc>> {
    if let Some(ts) = str_field(seg, "unix_timestamp") {
        if let Some(start) = parse::parse_naive_at_offset(ts, offset) {
            return Some(start);
        }
    }
    let relative = match feed {
        Feed::Results => str_field(seg, "time_completed"),
        _ => str_field(seg, "time_until_match"),
    };
    match relative.and_then(|s| parse::parse_relative_time(s, fetched_at)) {
        Some(start) => Some(start),
        // a live match with no usable time is treated as starting now
        None if status == MatchStatus::Live => Some(fetched_at),
        None => None,
    }
}

fn segment_status(seg: &Value, feed: Feed) -> MatchStatus {
    match feed {
        Feed::Live => MatchStatus::Live,
        Feed::Results => MatchStatus::Finished,
        Feed::Upcoming => {
            let until = str_field(seg, "time_until_match").unwrap_or_default();
            if until.eq_ignore_ascii_case("live") {
                MatchStatus::Live
            } else {
                MatchStatus::Upcoming
            }
        }
    }
}

fn segment_team(seg: &Value, n: u8, status: MatchStatus) -> Team {
    let team = parse::team_or_tbd(str_field(seg, &format!("team{}", n)))
        .with_logo(str_field(seg, &format!("team{}_logo", n)).map(|l| {
            if l.starts_with("//") {
                format!("https:{}", l)
            } else {
                l.to_string()
            }
        }));
    if status == MatchStatus::Upcoming {
        team
    } else {
        team.with_score(parse::score_from_json(seg.get(format!("score{}", n))))
    }
}

fn parse_segments(
    raw: &Value,
    feed: Feed,
    fetched_at: DateTime<Utc>,
    offset: i32,
) -> Result<Vec<NormalizedMatch>> {
    let segments = raw["data"]["segments"]
        .as_array()
        .context("vlr payload has no data.segments array")?;

    let mut skipped = 0usize;
    let matches: Vec<NormalizedMatch> = segments
        .iter()
        .filter_map(|seg| {
            let status = segment_status(seg, feed);
            let Some(start) = segment_start(seg, feed, status, fetched_at, offset) else {
                skipped += 1;
                return None;
            };
            let home = segment_team(seg, 1, status);
            let away = segment_team(seg, 2, status);

            let event = str_field(seg, "match_event").or_else(|| str_field(seg, "tournament_name"));
            let series = str_field(seg, "match_series").or_else(|| str_field(seg, "round_info"));
            let page = str_field(seg, "match_page");
            let id = match page.and_then(match_number) {
                Some(n) => format!("{}_{}", SOURCE, n),
                None => format!(
                    "{}_{}_{}_{}",
                    SOURCE,
                    parse::slugify(event.unwrap_or_default()),
                    parse::slugify(&format!("{} {}", home.name, away.name)),
                    start.timestamp()
                ),
            };

            let mut m = NormalizedMatch::new(id, Game::Valorant, home, away, start, status);
            m.league = event.unwrap_or_default().to_string();
            m.stage = series.unwrap_or_default().to_string();
            m.stream = page.map(|p| format!("https://www.vlr.gg{}", p));
            if status == MatchStatus::Live {
                m.details.current_map = str_field(seg, "current_map").map(String::from);
                let rounds = (
                    parse::score_from_json(seg.get("team1_round_ct"))
                        .zip(parse::score_from_json(seg.get("team1_round_t")))
                        .map(|(a, b)| a + b),
                    parse::score_from_json(seg.get("team2_round_ct"))
                        .zip(parse::score_from_json(seg.get("team2_round_t")))
                        .map(|(a, b)| a + b),
                );
                m.details.round_scores = rounds.0.zip(rounds.1);
            }
            Some(m)
        })
        .collect();

    if skipped > 0 {
        debug!("[vlr] skipped {} {} segment(s) without a usable time", skipped, feed.dim());
    }
    Ok(matches)
}
