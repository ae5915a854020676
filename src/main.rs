use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tracing::{info, warn};

mod aggregate;
mod api;
mod cache;
mod config;
mod db;
mod enrich;
mod sources;

use aggregate::Aggregator;
use api::AppState;
use cache::FeedCache;
use config::Config;
use db::Database;
use enrich::{AliasTable, HttpImageLookup, ImageLookup, TeamEnricher};
use sources::http::UpstreamClient;
use sources::{FootballData, Liquipedia, LolEsports, MatchSource, Vlr, YouTubeLive};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialise tracing / logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = Config::parse();
    config.validate()?;

    let db = Arc::new(Database::open(&config.database_path)?);
    info!("Database opened: {}", config.database_path);

    let cache = FeedCache::new(db, config.freshness_policy());
    let client = UpstreamClient::new(config.upstream_timeout())?;
    let sample_fallback = config.sample_fallback();
    if !sample_fallback {
        info!("Sample fallback disabled; failing sources will report as unavailable");
    }

    // Registration order decides which source wins a duplicate id.
    let sources: Vec<Arc<dyn MatchSource>> = vec![
        Arc::new(Vlr::new(
            client.clone(),
            cache.clone(),
            &config.vlr_url,
            config.vlr_utc_offset_hours,
            sample_fallback,
        )?),
        Arc::new(YouTubeLive::new(
            client.clone(),
            cache.clone(),
            &config.youtube_url,
            config.youtube_keys.clone(),
            config.pubg_channel_id.clone(),
            sample_fallback,
        )?),
        Arc::new(Liquipedia::new(
            client.clone(),
            cache.clone(),
            &config.liquipedia_url,
            config.tft_pages.clone(),
            sample_fallback,
        )?),
        Arc::new(LolEsports::new(
            client.clone(),
            cache.clone(),
            &config.lolesports_url,
            config.lolesports_key.clone(),
            config.lol_leagues.clone(),
            sample_fallback,
        )?),
        Arc::new(FootballData::new(
            client.clone(),
            cache.clone(),
            &config.football_data_url,
            config.football_data_key.clone(),
            config.competitions.clone(),
        )?),
    ];
    if config.football_data_key.is_none() {
        warn!("No football-data token configured; requests will be rate limited");
    }
    info!("Configured {} match source(s)", sources.len());

    let aggregator = Aggregator::new(sources, config.source_deadline());

    let aliases = AliasTable::load(config.alias_table.as_deref())?;
    info!("Loaded {} team alias(es)", aliases.len());
    let lookup: Option<Arc<dyn ImageLookup>> = match &config.image_lookup_url {
        Some(url) => Some(Arc::new(HttpImageLookup::new(client.clone(), url)?)),
        None => None,
    };
    let memo_capacity =
        NonZeroUsize::new(config.enrich_memo_capacity).context("enrich_memo_capacity must be positive")?;
    let enricher = TeamEnricher::new(aliases, lookup, config.upstream_timeout(), memo_capacity);

    let view_capacity =
        NonZeroUsize::new(config.view_capacity).context("view_capacity must be positive")?;
    let state = AppState::new(Arc::new(aggregator), Arc::new(enricher), cache, view_capacity);
    let app = api::router(state);
    let addr: SocketAddr = config.listen_addr.parse()?;
    info!("API listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app).await?;

    Ok(())
}
