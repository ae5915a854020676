//! HTTP plumbing shared by the adapters: bounded-timeout JSON GETs and
//! rotation over a pool of quota-limited API keys.

use anyhow::{Context, Result};
use reqwest::{Client, StatusCode};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

const USER_AGENT: &str = concat!("matchfeed/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("HTTP {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
}

impl UpstreamError {
    /// Whether the upstream refused the call because the credential ran out
    /// of quota (as opposed to the request itself being bad).
    pub fn is_quota_rejection(&self) -> bool {
        match self {
            UpstreamError::Status { status, body } => {
                *status == StatusCode::TOO_MANY_REQUESTS
                    || (*status == StatusCode::FORBIDDEN && {
                        let body = body.to_lowercase();
                        body.contains("quota") || body.contains("ratelimitexceeded")
                    })
            }
            _ => false,
        }
    }
}

/// Thin reqwest wrapper with a per-call deadline.
#[derive(Clone)]
pub struct UpstreamClient {
    http: Client,
    timeout: Duration,
}

impl UpstreamClient {
    pub fn new(timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(UpstreamClient { http, timeout })
    }

    /// GET `url` and decode JSON. A call that outlives the deadline is
    /// dropped and reported as [`UpstreamError::Timeout`].
    pub async fn get_json(
        &self,
        url: Url,
        headers: &[(&str, &str)],
    ) -> Result<serde_json::Value, UpstreamError> {
        debug!("GET {}", redact(&url));
        let mut req = self.http.get(url);
        for (name, value) in headers {
            req = req.header(*name, *value);
        }
        let call = async {
            let resp = req.send().await?;
            let status = resp.status();
            if !status.is_success() {
                let body = resp.text().await.unwrap_or_default();
                let body: String = body.chars().take(300).collect();
                return Err(UpstreamError::Status { status, body });
            }
            Ok::<_, UpstreamError>(resp.json::<serde_json::Value>().await?)
        };
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(UpstreamError::Timeout(self.timeout)),
        }
    }
}

/// Strip credentials from a URL before logging it.
fn redact(url: &Url) -> String {
    let mut shown = url.clone();
    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| {
            let v = if k == "key" || k == "token" { "***".into() } else { v.into_owned() };
            (k.into_owned(), v)
        })
        .collect();
    if !pairs.is_empty() {
        shown.query_pairs_mut().clear().extend_pairs(pairs);
    }
    shown.to_string()
}

#[derive(Debug, Error)]
pub enum KeyPoolError {
    #[error("no API keys configured")]
    Empty,
    #[error("all {0} API keys rejected for quota")]
    Exhausted(usize),
    #[error(transparent)]
    Upstream(UpstreamError),
}

/// Ordered pool of interchangeable API keys.
///
/// A quota rejection moves on to the next key and retries the same request;
/// every key is tried at most once per call. The pool remembers which key
/// last worked so the next call starts there; [`KeyPool::reset`] forgets it.
pub struct KeyPool {
    keys: Vec<String>,
    preferred: AtomicUsize,
}

impl KeyPool {
    pub fn new(keys: Vec<String>) -> Self {
        let keys = keys
            .into_iter()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .collect();
        KeyPool {
            keys,
            preferred: AtomicUsize::new(0),
        }
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn reset(&self) {
        self.preferred.store(0, Ordering::Relaxed);
    }

    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T, KeyPoolError>
    where
        F: FnMut(String) -> Fut,
        Fut: Future<Output = Result<T, UpstreamError>>,
    {
        if self.keys.is_empty() {
            return Err(KeyPoolError::Empty);
        }
        let start = self.preferred.load(Ordering::Relaxed) % self.keys.len();
        for attempt in 0..self.keys.len() {
            let idx = (start + attempt) % self.keys.len();
            match op(self.keys[idx].clone()).await {
                Ok(value) => {
                    self.preferred.store(idx, Ordering::Relaxed);
                    return Ok(value);
                }
                Err(e) if e.is_quota_rejection() => {
                    warn!("API key #{} rejected for quota, rotating", idx + 1);
                }
                Err(e) => return Err(KeyPoolError::Upstream(e)),
            }
        }
        // quotas refill together, so the next cycle starts over from the first key
        self.reset();
        Err(KeyPoolError::Exhausted(self.keys.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn quota() -> UpstreamError {
        UpstreamError::Status {
            status: StatusCode::FORBIDDEN,
            body: r#"{"error":{"errors":[{"reason":"quotaExceeded"}]}}"#.into(),
        }
    }

    #[test]
    fn test_quota_detection() {
        assert!(quota().is_quota_rejection());
        assert!(UpstreamError::Status { status: StatusCode::TOO_MANY_REQUESTS, body: String::new() }
            .is_quota_rejection());
        assert!(!UpstreamError::Status { status: StatusCode::FORBIDDEN, body: "forbidden".into() }
            .is_quota_rejection());
        assert!(!UpstreamError::Timeout(Duration::from_secs(1)).is_quota_rejection());
    }

    #[tokio::test]
    async fn test_rotates_to_next_key_on_quota() {
        let pool = KeyPool::new(vec!["a".into(), "b".into(), "c".into()]);
        let tried = Mutex::new(Vec::new());
        let res = pool
            .run(|key| {
                tried.lock().unwrap().push(key.clone());
                async move {
                    if key == "a" {
                        Err(quota())
                    } else {
                        Ok(key)
                    }
                }
            })
            .await
            .unwrap();
        assert_eq!(res, "b");
        assert_eq!(*tried.lock().unwrap(), vec!["a", "b"]);

        // next call starts from the key that worked
        let res = pool.run(|key| async move { Ok::<_, UpstreamError>(key) }).await.unwrap();
        assert_eq!(res, "b");
        pool.reset();
        let res = pool.run(|key| async move { Ok::<_, UpstreamError>(key) }).await.unwrap();
        assert_eq!(res, "a");
    }

    #[tokio::test]
    async fn test_exhaustion_is_bounded_by_pool_size() {
        let pool = KeyPool::new(vec!["a".into(), "b".into()]);
        let calls = Mutex::new(0);
        let res: Result<(), _> = pool
            .run(|_| {
                *calls.lock().unwrap() += 1;
                async { Err(quota()) }
            })
            .await;
        assert!(matches!(res, Err(KeyPoolError::Exhausted(2))));
        assert_eq!(*calls.lock().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_exhaustion_restarts_from_first_key() {
        let pool = KeyPool::new(vec!["a".into(), "b".into()]);
        let res = pool
            .run(|key| async move { if key == "a" { Err(quota()) } else { Ok(key) } })
            .await
            .unwrap();
        assert_eq!(res, "b");
        let res: Result<(), _> = pool.run(|_| async { Err(quota()) }).await;
        assert!(matches!(res, Err(KeyPoolError::Exhausted(2))));
        let res = pool.run(|key| async move { Ok::<_, UpstreamError>(key) }).await.unwrap();
        assert_eq!(res, "a");
    }

    #[tokio::test]
    async fn test_non_quota_error_stops_rotation() {
        let pool = KeyPool::new(vec!["a".into(), "b".into()]);
        let res: Result<(), _> = pool
            .run(|_| async { Err(UpstreamError::Timeout(Duration::from_secs(8))) })
            .await;
        assert!(matches!(res, Err(KeyPoolError::Upstream(UpstreamError::Timeout(_)))));
    }

    #[tokio::test]
    async fn test_empty_pool() {
        let pool = KeyPool::new(vec!["  ".into()]);
        assert!(pool.is_empty());
        let res: Result<(), _> = pool.run(|_| async { Ok(()) }).await;
        assert!(matches!(res, Err(KeyPoolError::Empty)));
    }

    #[test]
    fn test_redact_hides_key() {
        let url = Url::parse("https://example.com/search?part=snippet&key=secret").unwrap();
        let shown = redact(&url);
        assert!(!shown.contains("secret"));
        assert!(shown.contains("part=snippet"));
    }

    #[tokio::test]
    async fn test_get_json_reports_status_and_timeout() {
        use axum::{http::StatusCode as AxumStatus, routing::get, Json, Router};
        let app = Router::new()
            .route("/ok", get(|| async { Json(serde_json::json!({"ok": true})) }))
            .route("/down", get(|| async { (AxumStatus::SERVICE_UNAVAILABLE, "maintenance") }))
            .route(
                "/slow",
                get(|| async {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    "late"
                }),
            );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        let client = UpstreamClient::new(Duration::from_millis(300)).unwrap();
        let base = format!("http://{}", addr);
        let ok = client.get_json(Url::parse(&format!("{}/ok", base)).unwrap(), &[]).await.unwrap();
        assert_eq!(ok["ok"], true);

        let down = client.get_json(Url::parse(&format!("{}/down", base)).unwrap(), &[]).await;
        assert!(matches!(down, Err(UpstreamError::Status { status, .. }) if status.as_u16() == 503));

        let slow = client.get_json(Url::parse(&format!("{}/slow", base)).unwrap(), &[]).await;
        assert!(matches!(slow, Err(UpstreamError::Timeout(_))));
    }
}
