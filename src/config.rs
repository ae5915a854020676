use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

use crate::cache::FreshnessPolicy;

/// Upper bound for any cache max age (30 days).
const MAX_CACHE_AGE_SECS: u64 = 30 * 24 * 3600;

/// Esports and football match aggregator
#[derive(Parser, Debug, Clone)]
#[command(name = "matchfeed", version, about)]
pub struct Config {
    /// API listen address
    #[arg(long, env = "LISTEN_ADDR", default_value = "0.0.0.0:8080")]
    pub listen_addr: String,

    /// SQLite database path for the upstream payload cache
    #[arg(long, env = "DATABASE_PATH", default_value = "matchfeed.db")]
    pub database_path: String,

    /// Timeout for a single upstream HTTP request
    #[arg(long, env = "UPSTREAM_TIMEOUT_SECS", default_value = "8")]
    pub upstream_timeout_secs: u64,

    /// Budget for one source inside an aggregation; slower sources count as unavailable
    #[arg(long, env = "SOURCE_DEADLINE_SECS", default_value = "20")]
    pub source_deadline_secs: u64,

    /// Max age of cached date-range queries
    #[arg(long, env = "RANGE_MAX_AGE_SECS", default_value = "300")]
    pub range_max_age_secs: u64,

    /// Max age of cached live feeds
    #[arg(long, env = "LIVE_MAX_AGE_SECS", default_value = "1800")]
    pub live_max_age_secs: u64,

    /// Max age of cached upcoming-schedule feeds
    #[arg(long, env = "UPCOMING_MAX_AGE_SECS", default_value = "43200")]
    pub upcoming_max_age_secs: u64,

    /// football-data.org v4 base URL
    #[arg(
        long,
        env = "FOOTBALL_DATA_URL",
        default_value = "https://api.football-data.org/v4/"
    )]
    pub football_data_url: String,

    /// football-data.org API token
    #[arg(long, env = "FOOTBALL_DATA_KEY")]
    pub football_data_key: Option<String>,

    /// Competition codes to query (e.g. PL,CL)
    #[arg(long, env = "COMPETITIONS", value_delimiter = ',', default_value = "PL,CL")]
    pub competitions: Vec<String>,

    /// vlr.gg JSON API base URL
    #[arg(long, env = "VLR_URL", default_value = "https://vlrggapi.vercel.app/")]
    pub vlr_url: String,

    /// UTC offset of the wall-clock times the vlr API reports
    #[arg(long, env = "VLR_UTC_OFFSET_HOURS", default_value = "0", allow_hyphen_values = true)]
    pub vlr_utc_offset_hours: i32,

    /// LoL Esports persisted-gateway base URL
    #[arg(
        long,
        env = "LOLESPORTS_URL",
        default_value = "https://esports-api.lolesports.com/persisted/gw/"
    )]
    pub lolesports_url: String,

    /// LoL Esports API key
    #[arg(long, env = "LOLESPORTS_KEY")]
    pub lolesports_key: Option<String>,

    /// League ids to restrict the schedule to (empty means all)
    #[arg(long, env = "LOL_LEAGUES", value_delimiter = ',')]
    pub lol_leagues: Vec<String>,

    /// YouTube Data API v3 base URL
    #[arg(
        long,
        env = "YOUTUBE_URL",
        default_value = "https://www.googleapis.com/youtube/v3/"
    )]
    pub youtube_url: String,

    /// YouTube API keys, rotated when one runs out of quota
    #[arg(long, env = "YOUTUBE_KEYS", value_delimiter = ',')]
    pub youtube_keys: Vec<String>,

    /// Channel whose broadcasts are reported as PUBG matches
    #[arg(long, env = "PUBG_CHANNEL_ID", default_value = "")]
    pub pubg_channel_id: String,

    /// Liquipedia wiki base URL (the TFT wiki)
    #[arg(long, env = "LIQUIPEDIA_URL", default_value = "https://liquipedia.net/tft/")]
    pub liquipedia_url: String,

    /// Liquipedia tournament pages to read TFT matches from
    #[arg(long, env = "TFT_PAGES", value_delimiter = ',')]
    pub tft_pages: Vec<String>,

    /// Image search service used when the alias table has no logo
    #[arg(long, env = "IMAGE_LOOKUP_URL")]
    pub image_lookup_url: Option<String>,

    /// Extra team alias table (JSON), merged over the built-in one
    #[arg(long, env = "ALIAS_TABLE")]
    pub alias_table: Option<PathBuf>,

    /// Number of resolved team logos kept in memory
    #[arg(long, env = "ENRICH_MEMO_CAPACITY", default_value = "512")]
    pub enrich_memo_capacity: usize,

    /// Number of client views whose latest result is kept
    #[arg(long, env = "VIEW_CAPACITY", default_value = "256")]
    pub view_capacity: usize,

    /// Report an unavailable source instead of serving sample matches
    #[arg(long, env = "NO_SAMPLE_FALLBACK", default_value = "false")]
    pub no_sample_fallback: bool,
}

impl Config {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.upstream_timeout_secs == 0 {
            anyhow::bail!("upstream_timeout_secs must be positive");
        }
        if self.source_deadline_secs == 0 {
            anyhow::bail!("source_deadline_secs must be positive");
        }
        if self.range_max_age_secs == 0 || self.live_max_age_secs == 0 || self.upcoming_max_age_secs == 0 {
            anyhow::bail!("cache max ages must be positive");
        }
        for (name, secs) in [
            ("range_max_age_secs", self.range_max_age_secs),
            ("live_max_age_secs", self.live_max_age_secs),
            ("upcoming_max_age_secs", self.upcoming_max_age_secs),
        ] {
            if secs > MAX_CACHE_AGE_SECS {
                anyhow::bail!("{} must be at most {} seconds", name, MAX_CACHE_AGE_SECS);
            }
        }
        if self.enrich_memo_capacity == 0 {
            anyhow::bail!("enrich_memo_capacity must be positive");
        }
        if self.view_capacity == 0 {
            anyhow::bail!("view_capacity must be positive");
        }
        if !(-12..=14).contains(&self.vlr_utc_offset_hours) {
            anyhow::bail!("vlr_utc_offset_hours must be between -12 and 14");
        }
        Ok(())
    }

    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream_timeout_secs)
    }

    pub fn source_deadline(&self) -> Duration {
        Duration::from_secs(self.source_deadline_secs)
    }

    pub fn freshness_policy(&self) -> FreshnessPolicy {
        let secs = |s: u64| chrono::Duration::seconds(s as i64);
        FreshnessPolicy {
            range_query_max_age: secs(self.range_max_age_secs),
            live_max_age: secs(self.live_max_age_secs),
            upcoming_max_age: secs(self.upcoming_max_age_secs),
        }
    }

    pub fn sample_fallback(&self) -> bool {
        !self.no_sample_fallback
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Config {
        Config::try_parse_from(std::iter::once("matchfeed").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_defaults_match_freshness_defaults() {
        let config = parse(&[]);
        config.validate().unwrap();
        assert_eq!(config.freshness_policy(), FreshnessPolicy::default());
        assert_eq!(config.competitions, vec!["PL", "CL"]);
        assert!(config.sample_fallback());
    }

    #[test]
    fn test_comma_lists() {
        let config = parse(&["--youtube-keys", "k1,k2", "--tft-pages", "A,B/C"]);
        assert_eq!(config.youtube_keys, vec!["k1", "k2"]);
        assert_eq!(config.tft_pages, vec!["A", "B/C"]);
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        assert!(parse(&["--upstream-timeout-secs", "0"]).validate().is_err());
        assert!(parse(&["--live-max-age-secs", "0"]).validate().is_err());
        assert!(parse(&["--enrich-memo-capacity", "0"]).validate().is_err());
        assert!(parse(&["--view-capacity", "0"]).validate().is_err());
        assert!(parse(&["--vlr-utc-offset-hours", "-13"]).validate().is_err());
        assert!(parse(&["--vlr-utc-offset-hours", "-5"]).validate().is_ok());
    }

    #[test]
    fn test_max_ages_are_capped() {
        assert!(parse(&["--upcoming-max-age-secs", "18446744073709551615"]).validate().is_err());
        assert!(parse(&["--range-max-age-secs", "9223372036854775807"]).validate().is_err());
        assert!(parse(&["--live-max-age-secs", "2592001"]).validate().is_err());
        assert!(parse(&["--live-max-age-secs", "2592000"]).validate().is_ok());
    }
}
