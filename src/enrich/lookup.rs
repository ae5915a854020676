use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use url::Url;

use crate::db::models::Game;
use crate::sources::http::UpstreamClient;

/// Domains whose team images are known to be clean logos.
const TRUSTED_DOMAINS: &[&str] = &[
    "liquipedia.net",
    "owcdn.net",
    "vlr.gg",
    "lolesports.com",
    "football-data.org",
    "wikimedia.org",
];

/// One image offered by the lookup service.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ImageCandidate {
    pub url: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
    /// Host the image was found on; derived from `url` when absent
    pub domain: Option<String>,
}

impl ImageCandidate {
    fn domain(&self) -> Option<String> {
        self.domain
            .clone()
            .or_else(|| Url::parse(&self.url).ok()?.host_str().map(String::from))
    }

    /// Higher is better. Zero means unusable.
    pub fn score(&self) -> u32 {
        if !(self.url.starts_with("https://") || self.url.starts_with("http://")) {
            return 0;
        }
        let mut score = 1;
        if let Some(domain) = self.domain() {
            let domain = domain.to_lowercase();
            if TRUSTED_DOMAINS.iter().any(|t| domain == *t || domain.ends_with(&format!(".{}", t))) {
                score += 4;
            }
        }
        if let (Some(w), Some(h)) = (self.width, self.height) {
            if w > 0 && h > 0 {
                let ratio = w as f64 / h as f64;
                if (0.8..=1.25).contains(&ratio) {
                    score += 2;
                }
                if (64..=1024).contains(&w.min(h)) {
                    score += 1;
                }
            }
        }
        score
    }
}

/// Best candidate by score; earlier candidates win ties.
pub fn best_candidate(candidates: &[ImageCandidate]) -> Option<&ImageCandidate> {
    candidates
        .iter()
        .filter(|c| c.score() > 0)
        .fold(None, |best: Option<&ImageCandidate>, c| match best {
            Some(b) if b.score() >= c.score() => Some(b),
            _ => Some(c),
        })
}

/// External image search used when the alias table has no entry.
#[async_trait]
pub trait ImageLookup: Send + Sync {
    async fn candidates(&self, team: &str, game: Game) -> Result<Vec<ImageCandidate>>;
}

#[derive(Debug, Deserialize)]
struct LookupResponse {
    #[serde(default)]
    results: Vec<ImageCandidate>,
}

/// `GET {base}?q={team}&sport={game}` returning `{"results": [...]}`.
pub struct HttpImageLookup {
    client: UpstreamClient,
    base_url: Url,
}

impl HttpImageLookup {
    pub fn new(client: UpstreamClient, base_url: &str) -> Result<Self> {
        Ok(HttpImageLookup {
            client,
            base_url: Url::parse(base_url).context("Invalid image lookup URL")?,
        })
    }
}

#[async_trait]
impl ImageLookup for HttpImageLookup {
    async fn candidates(&self, team: &str, game: Game) -> Result<Vec<ImageCandidate>> {
        let mut url = self.base_url.clone();
        url.query_pairs_mut()
            .append_pair("q", team)
            .append_pair("sport", game.as_str());
        let raw = self.client.get_json(url, &[]).await?;
        let resp: LookupResponse =
            serde_json::from_value(raw).context("Unexpected image lookup response")?;
        Ok(resp.results)
    }
}
