use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};
use url::Url;

use super::fallback::sample_matches;
use super::http::{KeyPool, UpstreamClient};
use super::provider::{Capability, Horizon, MatchSource, SourceFetch, TimeRange};
use super::{parse, FeedOutcomes};
use crate::cache::{FeedCache, FeedLoad, Fingerprint};
use crate::db::models::{FreshnessClass, Game, MatchStatus, NormalizedMatch, Team};

const SOURCE: &str = "youtube";
const MAX_RESULTS: &str = "25";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Broadcast {
    Live,
    Upcoming,
}

impl Broadcast {
    fn event_type(self) -> &'static str {
        match self {
            Broadcast::Live => "live",
            Broadcast::Upcoming => "upcoming",
        }
    }

    fn class(self) -> FreshnessClass {
        match self {
            Broadcast::Live => FreshnessClass::Live,
            Broadcast::Upcoming => FreshnessClass::Upcoming,
        }
    }
}

/// PUBG broadcasts from a tournament channel, via the YouTube Data API.
///
/// Every request spends quota, so calls go through a [`KeyPool`] that
/// rotates to the next key when one is rejected.
pub struct YouTubeLive {
    client: UpstreamClient,
    cache: FeedCache,
    keys: KeyPool,
    base_url: Url,
    channel_id: String,
    sample_fallback: bool,
}

impl YouTubeLive {
    pub fn new(
        client: UpstreamClient,
        cache: FeedCache,
        base_url: &str,
        keys: Vec<String>,
        channel_id: String,
        sample_fallback: bool,
    ) -> Result<Self> {
        let keys = KeyPool::new(keys);
        if keys.is_empty() {
            warn!("[youtube] no API keys configured; every upstream call will fail");
        } else {
            debug!("[youtube] {} API key(s) in rotation", keys.len());
        }
        Ok(YouTubeLive {
            client,
            cache,
            keys,
            base_url: Url::parse(base_url).context("Invalid YouTube API base URL")?,
            channel_id,
            sample_fallback,
        })
    }

    /// GET one API endpoint, rotating keys on quota rejection.
    async fn call(&self, endpoint: &str, params: &[(&str, &str)]) -> Result<serde_json::Value> {
        let mut url = self.base_url.join(endpoint).context("Invalid YouTube API path")?;
        url.query_pairs_mut().extend_pairs(params);
        let value = self
            .keys
            .run(|key| {
                let mut url = url.clone();
                url.query_pairs_mut().append_pair("key", &key);
                self.client.get_json(url, &[])
            })
            .await?;
        Ok(value)
    }

    /// Search the channel, then pull live-streaming details for the hits.
    /// Both responses are cached together.
    async fn fetch_payload(&self, broadcast: Broadcast) -> Result<serde_json::Value> {
        let search = self
            .call(
                "search",
                &[
                    ("part", "snippet"),
                    ("channelId", self.channel_id.as_str()),
                    ("eventType", broadcast.event_type()),
                    ("type", "video"),
                    ("maxResults", MAX_RESULTS),
                ],
            )
            .await?;

        let ids: Vec<String> = search["items"]
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .filter_map(|i| i["id"]["videoId"].as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default();

        let videos = if ids.is_empty() {
            json!({"items": []})
        } else {
            let ids = ids.join(",");
            self.call("videos", &[("part", "snippet,liveStreamingDetails"), ("id", ids.as_str())])
                .await?
        };
        Ok(json!({"search": search, "videos": videos}))
    }

    async fn fetch_broadcasts(&self, broadcast: Broadcast) -> Result<FeedLoad> {
        let fingerprint = Fingerprint::new(SOURCE).dim("pubg").dim(broadcast.event_type());
        self.cache
            .load(
                &fingerprint,
                broadcast.class(),
                || self.fetch_payload(broadcast),
                |payload, _| parse_broadcasts(payload, broadcast),
            )
            .await
    }
}

#[async_trait]
impl MatchSource for YouTubeLive {
    fn name(&self) -> &str {
        SOURCE
    }

    fn game(&self) -> Game {
        Game::Pubg
    }

    fn horizon(&self) -> Horizon {
        Horizon::Extended
    }

    fn capabilities(&self) -> &'static [Capability] {
        &[Capability::Live, Capability::Upcoming]
    }

    async fn fetch(&self, range: TimeRange) -> SourceFetch {
        let mut outcomes = FeedOutcomes::default();
        for broadcast in [Broadcast::Live, Broadcast::Upcoming] {
            let result = self.fetch_broadcasts(broadcast).await;
            outcomes.record(SOURCE, broadcast.event_type(), result);
        }
        outcomes.finish(&range, || {
            self.sample_fallback
                .then(|| sample_matches(SOURCE, Game::Pubg, Utc::now()))
        })
    }
}

#[derive(Debug, Deserialize)]
struct CachedPayload {
    search: SearchResponse,
    videos: VideosResponse,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<SearchItem>,
}

#[derive(Debug, Deserialize)]
struct SearchItem {
    id: SearchId,
    snippet: Snippet,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchId {
    video_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Snippet {
    title: String,
    channel_title: Option<String>,
    published_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct VideosResponse {
    #[serde(default)]
    items: Vec<VideoItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VideoItem {
    id: String,
    live_streaming_details: Option<LiveStreamingDetails>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LiveStreamingDetails {
    actual_start_time: Option<DateTime<Utc>>,
    actual_end_time: Option<DateTime<Utc>>,
    scheduled_start_time: Option<DateTime<Utc>>,
    concurrent_viewers: Option<String>,
}

fn parse_broadcasts(raw: &serde_json::Value, broadcast: Broadcast) -> Result<Vec<NormalizedMatch>> {
    let payload: CachedPayload =
        serde_json::from_value(raw.clone()).context("Unexpected YouTube payload")?;

    let mut matches = Vec::with_capacity(payload.search.items.len());
    for item in payload.search.items {
        let Some(video_id) = item.id.video_id else { continue };
        let details = payload
            .videos
            .items
            .iter()
            .find(|v| v.id == video_id)
            .and_then(|v| v.live_streaming_details.as_ref());

        let status = match details {
            Some(d) if d.actual_end_time.is_some() => MatchStatus::Finished,
            Some(d) if d.actual_start_time.is_some() => MatchStatus::Live,
            Some(_) => MatchStatus::Upcoming,
            None => match broadcast {
                Broadcast::Live => MatchStatus::Live,
                Broadcast::Upcoming => MatchStatus::Upcoming,
            },
        };
        let start = details
            .and_then(|d| d.actual_start_time.or(d.scheduled_start_time))
            .or(item.snippet.published_at);
        let Some(start) = start else {
            debug!("[youtube] no start time for video {}", video_id);
            continue;
        };

        let title = item.snippet.title.trim();
        let (home, away) = match parse::teams_from_title(title) {
            Some((home, away)) => (Team::new(home), Team::new(away)),
            None => (Team::new(title), Team::tbd()),
        };

        let mut m = NormalizedMatch::new(
            format!("{}_{}", SOURCE, video_id),
            Game::Pubg,
            home,
            away,
            start,
            status,
        );
        m.league = item.snippet.channel_title.unwrap_or_default();
        m.stream = Some(format!("https://www.youtube.com/watch?v={}", video_id));
        m.details.viewers = details
            .and_then(|d| d.concurrent_viewers.as_deref())
            .and_then(|v| v.parse().ok());
        matches.push(m);
    }
    Ok(matches)
}
