//! Teamfight Tactics tournament schedules scraped from Liquipedia wikitext.
//!
//! Parsing is deliberately loose: only `{{Match ...}}` blocks with opponent
//! templates and a `|date=` field are understood. Anything else on the page
//! is ignored.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use std::sync::OnceLock;
use tracing::debug;
use url::Url;

use super::fallback::sample_matches;
use super::http::UpstreamClient;
use super::provider::{Capability, Horizon, MatchSource, SourceFetch, TimeRange};
use super::{parse, FeedOutcomes};
use crate::cache::{FeedCache, FeedLoad, Fingerprint};
use crate::db::models::{FreshnessClass, Game, MatchStatus, NormalizedMatch, Team};

const SOURCE: &str = "liquipedia";

/// An unfinished match is considered live for this long after its start.
const LIVE_WINDOW_HOURS: i64 = 8;

pub struct Liquipedia {
    client: UpstreamClient,
    cache: FeedCache,
    base_url: Url,
    /// Page titles, e.g. `Tactician's_Cup/2024/Finals`
    pages: Vec<String>,
    sample_fallback: bool,
}

impl Liquipedia {
    pub fn new(
        client: UpstreamClient,
        cache: FeedCache,
        base_url: &str,
        pages: Vec<String>,
        sample_fallback: bool,
    ) -> Result<Self> {
        Ok(Liquipedia {
            client,
            cache,
            base_url: Url::parse(base_url).context("Invalid Liquipedia base URL")?,
            pages,
            sample_fallback,
        })
    }

    async fn fetch_page(&self, page: &str) -> Result<FeedLoad> {
        let mut url = self.base_url.join("api.php").context("Invalid Liquipedia path")?;
        url.query_pairs_mut()
            .append_pair("action", "parse")
            .append_pair("page", page)
            .append_pair("prop", "wikitext")
            .append_pair("format", "json");
        let fingerprint = Fingerprint::new(SOURCE).dim("tft").dim(parse::slugify(page));
        let tournament = page.replace('_', " ");

        // a tournament page mixes finished and scheduled matches, so only the
        // still-scheduled ones may expire it
        self.cache
            .load(
                &fingerprint,
                FreshnessClass::RangeQuery,
                || async move { self.client.get_json(url, &[]).await.map_err(anyhow::Error::from) },
                |payload, fetched_at| parse_page(payload, &tournament, fetched_at),
            )
            .await
    }
}

#[async_trait]
impl MatchSource for Liquipedia {
    fn name(&self) -> &str {
        SOURCE
    }

    fn game(&self) -> Game {
        Game::Tft
    }

    fn horizon(&self) -> Horizon {
        Horizon::Extended
    }

    fn capabilities(&self) -> &'static [Capability] {
        &[Capability::Upcoming, Capability::Completed]
    }

    async fn fetch(&self, range: TimeRange) -> SourceFetch {
        let mut outcomes = FeedOutcomes::default();
        for page in &self.pages {
            let result = self.fetch_page(page).await;
            outcomes.record(SOURCE, page, result);
        }
        outcomes.finish(&range, || {
            self.sample_fallback
                .then(|| sample_matches(SOURCE, Game::Tft, Utc::now()))
        })
    }
}

fn heading_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*(={2,})\s*(.+?)\s*={2,}\s*$").expect("valid heading regex"))
}

fn opponent_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\{\{(?:Team|Solo)Opponent\|([^|}]*)(?:\|[^}]*?score=(\d+))?[^}]*\}\}")
            .expect("valid opponent regex")
    })
}

fn date_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\|\s*date\s*=\s*(\d{4}-\d{2}-\d{2}\s+\d{1,2}:\d{2})\s*(?:\{\{Abbr/([A-Za-z]+)\}\})?")
            .expect("valid date regex")
    })
}

fn finished_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\|\s*finished\s*=\s*(?:true|1|yes)").expect("valid finished regex"))
}

fn winner_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\|\s*winner\s*=\s*[12]").expect("valid winner regex"))
}

/// Raw `{{Match ...}}` blocks together with the heading they appeared under.
/// Brace depth is tracked so nested templates stay inside their block.
fn match_blocks(wikitext: &str) -> Vec<(String, String)> {
    let mut blocks = Vec::new();
    let mut stage = String::new();
    let mut current: Option<(String, i32)> = None;

    for line in wikitext.lines() {
        if current.is_none() {
            if let Some(caps) = heading_re().captures(line) {
                stage = caps[2].trim().to_string();
                continue;
            }
            if let Some(pos) = line.find("{{Match") {
                current = Some((String::new(), 0));
                let rest = &line[pos..];
                if let Some((buf, depth)) = current.as_mut() {
                    buf.push_str(rest);
                    buf.push('\n');
                    *depth += brace_delta(rest);
                }
            }
        } else if let Some((buf, depth)) = current.as_mut() {
            buf.push_str(line);
            buf.push('\n');
            *depth += brace_delta(line);
        }

        if let Some((_, depth)) = &current {
            if *depth <= 0 {
                if let Some((buf, _)) = current.take() {
                    blocks.push((stage.clone(), buf));
                }
            }
        }
    }
    blocks
}

fn brace_delta(s: &str) -> i32 {
    s.matches("{{").count() as i32 - s.matches("}}").count() as i32
}

fn block_status(block: &str, start: DateTime<Utc>, fetched_at: DateTime<Utc>) -> MatchStatus {
    if finished_re().is_match(block) || winner_re().is_match(block) {
        MatchStatus::Finished
    } else if start > fetched_at {
        MatchStatus::Upcoming
    } else if fetched_at - start < Duration::hours(LIVE_WINDOW_HOURS) {
        MatchStatus::Live
    } else {
        MatchStatus::Finished
    }
}

fn parse_page(raw: &serde_json::Value, tournament: &str, fetched_at: DateTime<Utc>) -> Result<Vec<NormalizedMatch>> {
    if let Some(err) = raw["error"]["info"].as_str() {
        anyhow::bail!("Liquipedia error: {}", err);
    }
    let wikitext = raw["parse"]["wikitext"]["*"]
        .as_str()
        .or_else(|| raw["parse"]["wikitext"].as_str())
        .context("Liquipedia payload has no wikitext")?;
    let tournament_slug = parse::slugify(tournament);

    let mut matches = Vec::new();
    for (stage, block) in match_blocks(wikitext) {
        let Some(date) = date_re().captures(&block) else {
            continue;
        };
        let offset = date
            .get(2)
            .and_then(|abbr| parse::timezone_abbr_offset(abbr.as_str()))
            .unwrap_or(0);
        let Some(start) = parse::parse_naive_at_offset(&date[1], offset) else {
            debug!("[liquipedia] unparseable date {:?}", &date[1]);
            continue;
        };
        let status = block_status(&block, start, fetched_at);

        let mut opponents = opponent_re().captures_iter(&block).map(|caps| {
            let team = parse::team_or_tbd(caps.get(1).map(|m| m.as_str()));
            let score = caps.get(2).and_then(|s| s.as_str().parse().ok());
            if status == MatchStatus::Upcoming {
                team
            } else {
                team.with_score(score)
            }
        });
        let home = opponents.next().unwrap_or_else(Team::tbd);
        let away = opponents.next().unwrap_or_else(Team::tbd);

        let id = format!(
            "{}_{}_{}_{}",
            SOURCE,
            tournament_slug,
            start.format("%Y%m%d%H%M"),
            parse::slugify(&format!("{} {}", home.name, away.name))
        );
        let mut m = NormalizedMatch::new(id, Game::Tft, home, away, start, status);
        m.league = tournament.to_string();
        m.stage = stage;
        matches.push(m);
    }
    Ok(matches)
}
