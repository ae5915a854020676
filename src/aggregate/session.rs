//! Request generations per view.
//!
//! A view (one dashboard tab, one widget) only ever cares about its newest
//! request. Starting a request aborts the one still in flight for the same
//! view, and a result that arrives after its generation was superseded or
//! torn down is dropped instead of committed.

use lru::LruCache;
use std::future::Future;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tokio::task::AbortHandle;
use tracing::debug;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("request superseded by a newer one")]
    Superseded,
    #[error("request task failed: {0}")]
    Failed(String),
}

struct SessionState<T> {
    generation: u64,
    inflight: Option<AbortHandle>,
    latest: Option<T>,
}

pub struct ViewSession<T> {
    state: Mutex<SessionState<T>>,
}

/// Aborts the task when the awaiting caller goes away first.
struct AbortGuard(Option<AbortHandle>);

impl Drop for AbortGuard {
    fn drop(&mut self) {
        if let Some(handle) = self.0.take() {
            handle.abort();
        }
    }
}

impl<T: Clone + Send + 'static> ViewSession<T> {
    pub fn new() -> Self {
        ViewSession {
            state: Mutex::new(SessionState {
                generation: 0,
                inflight: None,
                latest: None,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SessionState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn generation(&self) -> u64 {
        self.lock().generation
    }

    /// Last committed result.
    pub fn latest(&self) -> Option<T> {
        self.lock().latest.clone()
    }

    /// Run `work` as this view's current request.
    pub async fn run<F>(&self, work: F) -> Result<T, SessionError>
    where
        F: Future<Output = T> + Send + 'static,
    {
        let handle = tokio::spawn(work);
        let generation = {
            let mut state = self.lock();
            state.generation += 1;
            if let Some(previous) = state.inflight.replace(handle.abort_handle()) {
                debug!("Aborting superseded request (generation {})", state.generation - 1);
                previous.abort();
            }
            state.generation
        };
        let mut guard = AbortGuard(Some(handle.abort_handle()));

        let outcome = handle.await;
        guard.0 = None;

        let mut state = self.lock();
        if state.generation != generation {
            return Err(SessionError::Superseded);
        }
        state.inflight = None;
        match outcome {
            Ok(value) => {
                state.latest = Some(value.clone());
                Ok(value)
            }
            Err(e) if e.is_cancelled() => Err(SessionError::Superseded),
            Err(e) => Err(SessionError::Failed(e.to_string())),
        }
    }

    /// Abandon whatever is in flight; its result will never be committed.
    pub fn teardown(&self) {
        let mut state = self.lock();
        state.generation += 1;
        if let Some(handle) = state.inflight.take() {
            handle.abort();
        }
    }
}

impl<T: Clone + Send + 'static> Default for ViewSession<T> {
    fn default() -> Self {
        ViewSession::new()
    }
}

/// Sessions keyed by view name, bounded. The least recently used view is
/// forgotten once capacity is reached; a request still running for it
/// finishes but its result can no longer be inspected.
pub struct ViewRegistry<T> {
    views: Mutex<LruCache<String, Arc<ViewSession<T>>>>,
}

impl<T: Clone + Send + 'static> ViewRegistry<T> {
    pub fn new(capacity: NonZeroUsize) -> Self {
        ViewRegistry {
            views: Mutex::new(LruCache::new(capacity)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LruCache<String, Arc<ViewSession<T>>>> {
        self.views.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn session(&self, view: &str) -> Arc<ViewSession<T>> {
        let mut views = self.lock();
        if let Some(session) = views.get(view) {
            return Arc::clone(session);
        }
        let session = Arc::new(ViewSession::new());
        if let Some((evicted, _)) = views.push(view.to_string(), Arc::clone(&session)) {
            debug!("View registry full, forgot view {}", evicted);
        }
        session
    }

    /// Existing session for `view`, without creating one.
    pub fn get(&self, view: &str) -> Option<Arc<ViewSession<T>>> {
        self.lock().peek(view).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Tear the view down and forget it. Returns whether it existed.
    pub fn teardown(&self, view: &str) -> bool {
        let removed = self.lock().pop(view);
        match removed {
            Some(session) => {
                session.teardown();
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_newer_request_supersedes_older() {
        let session = Arc::new(ViewSession::<u32>::new());

        let first = {
            let session = session.clone();
            tokio::spawn(async move {
                session
                    .run(async {
                        tokio::time::sleep(Duration::from_secs(5)).await;
                        1
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        let second = session.run(async { 2 }).await;

        assert_eq!(second, Ok(2));
        assert_eq!(first.await.unwrap(), Err(SessionError::Superseded));
        assert_eq!(session.latest(), Some(2));
    }

    #[tokio::test]
    async fn test_teardown_discards_late_result() {
        let session = Arc::new(ViewSession::<&'static str>::new());
        let pending = {
            let session = session.clone();
            tokio::spawn(async move {
                session
                    .run(async {
                        tokio::time::sleep(Duration::from_millis(200)).await;
                        "late"
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        session.teardown();

        assert_eq!(pending.await.unwrap(), Err(SessionError::Superseded));
        assert_eq!(session.latest(), None);
    }

    fn registry(capacity: usize) -> ViewRegistry<u32> {
        ViewRegistry::new(NonZeroUsize::new(capacity).unwrap())
    }

    #[test]
    fn test_registry_reuses_and_forgets_views() {
        let registry = registry(8);
        let a = registry.session("tab-1");
        let b = registry.session("tab-1");
        assert!(Arc::ptr_eq(&a, &b));
        assert!(registry.get("tab-2").is_none());
        assert!(registry.teardown("tab-1"));
        assert!(registry.get("tab-1").is_none());
        assert!(!registry.teardown("tab-1"));
        assert!(a.generation() > 0);
    }

    #[test]
    fn test_registry_capacity_evicts_least_recent_view() {
        let registry = registry(2);
        registry.session("tab-1");
        registry.session("tab-2");
        // touching tab-1 makes tab-2 the oldest
        registry.session("tab-1");
        registry.session("tab-3");
        assert!(registry.get("tab-1").is_some());
        assert!(registry.get("tab-2").is_none());
        for n in 4..20 {
            registry.session(&format!("tab-{}", n));
            assert!(registry.len() <= 2);
        }
        assert!(registry.get("tab-19").is_some());
        assert_eq!(registry.len(), 2);
    }
}
