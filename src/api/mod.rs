use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

use crate::aggregate::session::SessionError;
use crate::aggregate::{
    AggregateError, Aggregator, GroupedMatches, SourceReport, SportSelector, ViewRegistry,
};
use crate::cache::{CacheField, FeedCache};
use crate::db::models::{CacheEntrySummary, FreshnessClass, NormalizedMatch};
use crate::enrich::TeamEnricher;
use crate::sources::TimeRange;

type ApiError = (StatusCode, String);

/// Outcome of one aggregation request, committed to the view's session.
type Computed = Result<MatchesBody, AggregateError>;

#[derive(Clone)]
pub struct AppState {
    pub aggregator: Arc<Aggregator>,
    pub enricher: Arc<TeamEnricher>,
    pub cache: FeedCache,
    pub views: Arc<ViewRegistry<Computed>>,
}

impl AppState {
    pub fn new(
        aggregator: Arc<Aggregator>,
        enricher: Arc<TeamEnricher>,
        cache: FeedCache,
        view_capacity: NonZeroUsize,
    ) -> Self {
        AppState {
            aggregator,
            enricher,
            cache,
            views: Arc::new(ViewRegistry::new(view_capacity)),
        }
    }
}

/// Build the Axum router for the JSON API.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/matches", get(matches_handler))
        .route("/api/matches/priority", get(priority_handler))
        .route("/api/cache", get(cache_list_handler).delete(cache_bulk_delete_handler))
        .route("/api/cache/:fingerprint", delete(cache_delete_handler))
        .route("/api/views/:view", get(view_handler).delete(view_teardown_handler))
        .route("/api/enrich/memo", delete(memo_reset_handler))
        .layer(CorsLayer::permissive())
        .with_state(Arc::new(state))
}

#[derive(Debug, Default, Deserialize)]
pub struct MatchesQuery {
    pub sport: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    /// Resolve missing team logos before responding
    #[serde(default)]
    pub enrich: bool,
    /// Client view id; a newer request for the same view cancels this one
    pub view: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MatchesBody {
    pub sport: String,
    pub generated_at: DateTime<Utc>,
    pub matches: GroupedMatches,
    pub sources: Vec<SourceReport>,
}

#[derive(Debug, Serialize)]
struct PriorityBody {
    sport: String,
    generated_at: DateTime<Utc>,
    matches: Vec<NormalizedMatch>,
}

fn bad_request(msg: impl Into<String>) -> ApiError {
    (StatusCode::BAD_REQUEST, msg.into())
}

fn internal(e: anyhow::Error) -> ApiError {
    (StatusCode::INTERNAL_SERVER_ERROR, format!("{:#}", e))
}

fn parse_request(q: &MatchesQuery) -> Result<(SportSelector, TimeRange), ApiError> {
    let selector: SportSelector = q
        .sport
        .as_deref()
        .unwrap_or("all")
        .parse()
        .map_err(|e: anyhow::Error| bad_request(e.to_string()))?;
    let rolling = TimeRange::rolling(Utc::now());
    let range = TimeRange::new(q.from.unwrap_or(rolling.from), q.to.unwrap_or(rolling.to));
    if range.from > range.to {
        return Err(bad_request("`from` must not be after `to`"));
    }
    Ok((selector, range))
}

async fn compute(
    aggregator: Arc<Aggregator>,
    enricher: Arc<TeamEnricher>,
    selector: SportSelector,
    range: TimeRange,
    enrich: bool,
) -> Computed {
    let aggregation = aggregator.aggregate_detailed(selector, range).await?;
    let matches = if enrich {
        enricher.enhance_grouped(aggregation.matches).await
    } else {
        aggregation.matches
    };
    Ok(MatchesBody {
        sport: selector.to_string(),
        generated_at: Utc::now(),
        matches,
        sources: aggregation.sources,
    })
}

/// Run the aggregation, through the view's session when a view is named.
async fn load_matches(state: &AppState, q: &MatchesQuery) -> Result<MatchesBody, ApiError> {
    let (selector, range) = parse_request(q)?;
    let work = compute(
        state.aggregator.clone(),
        state.enricher.clone(),
        selector,
        range,
        q.enrich,
    );

    let computed = match q.view.as_deref() {
        Some(view) => state.views.session(view).run(work).await.map_err(|e| match e {
            SessionError::Superseded => (StatusCode::CONFLICT, e.to_string()),
            SessionError::Failed(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        })?,
        None => work.await,
    };

    computed.map_err(|e| match e {
        AggregateError::NoSource(_) => (StatusCode::NOT_FOUND, e.to_string()),
        AggregateError::SourceUnavailable(_) => {
            warn!("Aggregation failed: {}", e);
            (StatusCode::BAD_GATEWAY, e.to_string())
        }
    })
}

/// GET /api/matches?sport=all&from=&to=&enrich=true&view=
async fn matches_handler(
    State(state): State<Arc<AppState>>,
    Query(q): Query<MatchesQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let body = load_matches(&state, &q).await?;
    Ok(Json(body))
}

/// GET /api/matches/priority: flat list, live first
async fn priority_handler(
    State(state): State<Arc<AppState>>,
    Query(q): Query<MatchesQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let body = load_matches(&state, &q).await?;
    Ok(Json(PriorityBody {
        sport: body.sport,
        generated_at: body.generated_at,
        matches: body.matches.priority_view(),
    }))
}

#[derive(Debug, Default, Deserialize)]
struct CacheQuery {
    source: Option<String>,
    class: Option<String>,
}

impl CacheQuery {
    /// At most one filter; the class must be a known one.
    fn filter(&self) -> Result<Option<(CacheField, String)>, ApiError> {
        match (&self.source, &self.class) {
            (Some(_), Some(_)) => Err(bad_request("filter by `source` or `class`, not both")),
            (Some(source), None) => Ok(Some((CacheField::Source, source.clone()))),
            (None, Some(class)) => {
                let class: FreshnessClass = class
                    .parse()
                    .map_err(|e: anyhow::Error| bad_request(e.to_string()))?;
                Ok(Some((CacheField::Class, class.as_str().to_string())))
            }
            (None, None) => Ok(None),
        }
    }
}

#[derive(Debug, Serialize)]
struct CacheListing {
    #[serde(flatten)]
    summary: CacheEntrySummary,
    needs_refresh: bool,
}

/// GET /api/cache?source=vlr
async fn cache_list_handler(
    State(state): State<Arc<AppState>>,
    Query(q): Query<CacheQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let store = state.cache.store();
    let entries = match q.filter()? {
        Some((field, value)) => store.find_where(field, &value),
        None => store.list(),
    }
    .map_err(internal)?;
    let policy = state.cache.policy();
    let now = Utc::now();
    let listing: Vec<CacheListing> = entries
        .iter()
        .map(|entry| CacheListing {
            summary: CacheEntrySummary::from(entry),
            needs_refresh: policy.should_refresh(Some(entry), entry.class, now),
        })
        .collect();
    Ok(Json(listing))
}

/// DELETE /api/cache/:fingerprint
async fn cache_delete_handler(
    State(state): State<Arc<AppState>>,
    Path(fingerprint): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let deleted = state.cache.invalidate(&fingerprint).map_err(internal)?;
    if !deleted {
        return Err((StatusCode::NOT_FOUND, format!("no cache entry {}", fingerprint)));
    }
    info!("Invalidated cache entry {}", fingerprint);
    Ok(Json(serde_json::json!({ "deleted": 1 })))
}

/// DELETE /api/cache?source=vlr or ?class=live
async fn cache_bulk_delete_handler(
    State(state): State<Arc<AppState>>,
    Query(q): Query<CacheQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let Some((field, value)) = q.filter()? else {
        return Err(bad_request("bulk invalidation needs `source` or `class`"));
    };
    let deleted = state.cache.invalidate_where(field, &value).map_err(internal)?;
    info!("Invalidated {} cache entr(ies) where {} = {}", deleted, field.column(), value);
    Ok(Json(serde_json::json!({ "deleted": deleted })))
}

/// GET /api/views/:view: the view's last committed result
async fn view_handler(
    State(state): State<Arc<AppState>>,
    Path(view): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let session = state
        .views
        .get(&view)
        .ok_or_else(|| (StatusCode::NOT_FOUND, format!("no view {}", view)))?;
    let latest = match session.latest() {
        Some(Ok(body)) => serde_json::to_value(body).map_err(|e| internal(e.into()))?,
        Some(Err(e)) => serde_json::json!({ "error": e.to_string() }),
        None => serde_json::Value::Null,
    };
    Ok(Json(serde_json::json!({
        "view": view,
        "generation": session.generation(),
        "latest": latest,
    })))
}

/// DELETE /api/views/:view
async fn view_teardown_handler(
    State(state): State<Arc<AppState>>,
    Path(view): Path<String>,
) -> StatusCode {
    if state.views.teardown(&view) {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    }
}

/// DELETE /api/enrich/memo: forget resolved logos
async fn memo_reset_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let dropped = state.enricher.memo_len();
    state.enricher.reset();
    info!("Dropped {} memoized team logo(s)", dropped);
    Json(serde_json::json!({ "dropped": dropped }))
}

/// GET /health
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let sources: Vec<serde_json::Value> = state
        .aggregator
        .sources()
        .iter()
        .map(|s| {
            serde_json::json!({
                "name": s.name(),
                "game": s.game(),
                "horizon": s.horizon(),
                "capabilities": s.capabilities(),
            })
        })
        .collect();
    Json(serde_json::json!({
        "status": "ok",
        "sources": sources,
        "enrich_memo": state.enricher.memo_len(),
        "views": state.views.len(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::tests::{game_match, StaticSource};
    use crate::cache::{CacheStore, FreshnessPolicy};
    use crate::db::models::{CacheEntry, Game, MatchStatus};
    use crate::db::Database;
    use crate::enrich::AliasTable;
    use crate::sources::{MatchSource, SourceFetch};
    use serde_json::{json, Value};
    use std::time::Duration;

    async fn spawn_api(sources: Vec<Arc<dyn MatchSource>>) -> (String, Arc<Database>) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let cache = FeedCache::new(db.clone(), FreshnessPolicy::default());
        let aliases = AliasTable::from_json(
            r#"{"games": {"valorant": {"Sentinels": "https://owcdn.net/img/sen.png"}}}"#,
        )
        .unwrap();
        let enricher = TeamEnricher::new(aliases, None, Duration::from_millis(100), NonZeroUsize::new(8).unwrap());
        let state = AppState::new(
            Arc::new(Aggregator::new(sources, Duration::from_secs(2))),
            Arc::new(enricher),
            cache,
            NonZeroUsize::new(4).unwrap(),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = axum::serve(listener, router(state)).await;
        });
        (format!("http://{}", addr), db)
    }

    fn entry(fingerprint: &str, source: &str, class: FreshnessClass) -> CacheEntry {
        CacheEntry {
            fingerprint: fingerprint.into(),
            source: source.into(),
            class,
            payload: json!({"data": []}),
            last_updated: Utc::now(),
            has_live_matches: false,
            next_earliest_match_time: None,
            live_match_count: 0,
        }
    }

    #[tokio::test]
    async fn test_matches_grouped_and_enriched() {
        let mut live = game_match("vlr_1", Game::Valorant, MatchStatus::Live, 0);
        live.home = crate::db::models::Team::new("Sentinels");
        let sources: Vec<Arc<dyn MatchSource>> = vec![Arc::new(StaticSource::new(
            "vlr",
            Game::Valorant,
            vec![live, game_match("vlr_2", Game::Valorant, MatchStatus::Upcoming, 3)],
        ))];
        let (base, _db) = spawn_api(sources).await;
        let http = reqwest::Client::new();

        let body: Value = http
            .get(format!("{}/api/matches?sport=valorant&enrich=true", base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["sport"], "valorant");
        assert_eq!(body["matches"]["live"][0]["home"]["logo"], "https://owcdn.net/img/sen.png");
        assert_eq!(body["matches"]["upcoming"].as_array().unwrap().len(), 1);
        assert!(body["matches"].get("finished").is_none());
        assert_eq!(body["sources"][0]["health"], "healthy");

        let flat: Value = http
            .get(format!("{}/api/matches/priority", base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(flat["matches"][0]["status"], "live");
    }

    #[tokio::test]
    async fn test_single_sport_failure_status_codes() {
        let mut down = StaticSource::new("footballdata", Game::Football, vec![]);
        down.fetch = SourceFetch::unavailable();
        let (base, _db) = spawn_api(vec![Arc::new(down)]).await;
        let http = reqwest::Client::new();

        let resp = http.get(format!("{}/api/matches?sport=football", base)).send().await.unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::BAD_GATEWAY);
        let resp = http.get(format!("{}/api/matches?sport=tft", base)).send().await.unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::NOT_FOUND);
        let resp = http.get(format!("{}/api/matches?sport=chess", base)).send().await.unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);
        let resp = http.get(format!("{}/api/matches", base)).send().await.unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::OK);
    }

    #[tokio::test]
    async fn test_cache_listing_and_invalidation() {
        let (base, db) = spawn_api(vec![]).await;
        db.put(&entry("vlr_live", "vlr", FreshnessClass::Live)).unwrap();
        db.put(&entry("vlr_upcoming", "vlr", FreshnessClass::Upcoming)).unwrap();
        db.put(&entry("youtube_pubg_live", "youtube", FreshnessClass::Live)).unwrap();
        let http = reqwest::Client::new();

        let listed: Value = http
            .get(format!("{}/api/cache?source=vlr", base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(listed.as_array().unwrap().len(), 2);
        assert!(listed[0].get("payload").is_none());
        assert_eq!(listed[0]["needs_refresh"], false);
        assert!(listed[0]["fingerprint"].is_string());

        let resp = http.delete(format!("{}/api/cache/vlr_upcoming", base)).send().await.unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::OK);
        let resp = http.delete(format!("{}/api/cache/vlr_upcoming", base)).send().await.unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::NOT_FOUND);

        let bulk: Value = http
            .delete(format!("{}/api/cache?class=live", base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(bulk["deleted"], 2);
        assert!(db.list().unwrap().is_empty());

        let resp = http.delete(format!("{}/api/cache", base)).send().await.unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_newer_request_for_same_view_wins() {
        let mut slow = StaticSource::new(
            "vlr",
            Game::Valorant,
            vec![game_match("vlr_1", Game::Valorant, MatchStatus::Upcoming, 1)],
        );
        slow.delay = Some(Duration::from_millis(400));
        let (base, _db) = spawn_api(vec![Arc::new(slow)]).await;
        let http = reqwest::Client::new();

        let first = {
            let http = http.clone();
            let url = format!("{}/api/matches?view=tab-1", base);
            tokio::spawn(async move { http.get(url).send().await.unwrap().status() })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        let second = http
            .get(format!("{}/api/matches?view=tab-1", base))
            .send()
            .await
            .unwrap()
            .status();

        assert_eq!(second, reqwest::StatusCode::OK);
        assert_eq!(first.await.unwrap(), reqwest::StatusCode::CONFLICT);

        let view: Value = http
            .get(format!("{}/api/views/tab-1", base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(view["generation"], 2);
        assert_eq!(view["latest"]["matches"]["upcoming"][0]["id"], "vlr_1");

        let resp = http.delete(format!("{}/api/views/tab-1", base)).send().await.unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::NO_CONTENT);
        let resp = http.get(format!("{}/api/views/tab-1", base)).send().await.unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_memo_reset_and_health_report_memo_size() {
        let mut sen = game_match("vlr_1", Game::Valorant, MatchStatus::Upcoming, 1);
        sen.home = crate::db::models::Team::new("Sentinels");
        let (base, _db) =
            spawn_api(vec![Arc::new(StaticSource::new("vlr", Game::Valorant, vec![sen]))]).await;
        let http = reqwest::Client::new();

        http.get(format!("{}/api/matches?enrich=true", base)).send().await.unwrap();
        let health: Value = http.get(format!("{}/health", base)).send().await.unwrap().json().await.unwrap();
        assert!(health["enrich_memo"].as_u64().unwrap() >= 1);

        let reset: Value = http
            .delete(format!("{}/api/enrich/memo", base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert!(reset["dropped"].as_u64().unwrap() >= 1);
        let health: Value = http.get(format!("{}/health", base)).send().await.unwrap().json().await.unwrap();
        assert_eq!(health["enrich_memo"], 0);
    }

    #[tokio::test]
    async fn test_health_lists_sources() {
        let (base, _db) = spawn_api(vec![Arc::new(StaticSource::new("vlr", Game::Valorant, vec![]))]).await;
        let body: Value = reqwest::get(format!("{}/health", base)).await.unwrap().json().await.unwrap();
        assert_eq!(body["status"], "ok");
        assert_eq!(body["sources"][0]["name"], "vlr");
        assert_eq!(body["sources"][0]["game"], "valorant");
        assert_eq!(body["views"], 0);
    }
}
