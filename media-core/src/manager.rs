//! Source manager: the process-wide registry mapping [`StreamIdentity`] to
//! [`Source`], with a yield-free fast path for the common case (spec §4.1,
//! §5 "Cooperative yield hazards" — registry mutation must never await).

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::hooks::HookWorker;
use crate::identity::StreamIdentity;
use crate::source::Source;

/// Grounded on the get-or-create in-flight cell pattern used for segment
/// generation elsewhere in this stack: a synchronous `DashMap::entry` fast
/// path, with any yielding initialization funneled through a
/// `tokio::sync::OnceCell` so the map mutation itself never awaits.
pub struct SourceManager {
    sources: DashMap<StreamIdentity, Arc<OnceCell<Arc<Source>>>>,
    hooks: Option<Arc<HookWorker>>,
}

impl Default for SourceManager {
    fn default() -> Self {
        Self::new()
    }
}

impl SourceManager {
    pub fn new() -> Self {
        Self {
            sources: DashMap::new(),
            hooks: None,
        }
    }

    pub fn with_hooks(hooks: Arc<HookWorker>) -> Self {
        Self {
            sources: DashMap::new(),
            hooks: Some(hooks),
        }
    }

    /// Look up an existing Source without creating one.
    pub async fn fetch(&self, identity: &StreamIdentity) -> Option<Arc<Source>> {
        let cell = self.sources.get(identity)?.clone();
        cell.get().cloned()
    }

    /// Get the Source for `identity`, creating it if absent. The `DashMap`
    /// entry insertion is synchronous; only the `OnceCell::get_or_init`
    /// resolution (which runs `Source::new`, itself synchronous and
    /// therefore instant) may be awaited by a concurrent caller racing the
    /// same key — it never blocks on anything that yields back to the
    /// registry itself (spec §8 scenario 4: concurrent `fetch_or_create`
    /// calls for the same identity never race-create two Sources).
    pub async fn fetch_or_create(&self, identity: &StreamIdentity) -> Arc<Source> {
        let cell = self
            .sources
            .entry(identity.clone())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();

        cell.get_or_init(|| async { Source::new(identity.clone(), self.hooks.clone()) })
            .await
            .clone()
    }

    pub fn remove(&self, identity: &StreamIdentity) {
        self.sources.remove(identity);
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Snapshot every currently registered identity, e.g. for `/stats`.
    pub fn identities(&self) -> Vec<StreamIdentity> {
        self.sources.iter().map(|e| e.key().clone()).collect()
    }

    /// Remove every Source that is unpublished, has no consumers, has no
    /// active packagers, and has been idle past `idle_timeout`. Intended to
    /// be driven from the host binary's periodic eviction loop.
    pub async fn evict_idle(&self, idle_timeout: Duration) -> usize {
        let idle_ms = idle_timeout.as_millis() as i64;
        let mut to_remove = Vec::new();
        for entry in self.sources.iter() {
            if let Some(source) = entry.value().get() {
                if source.evictable(idle_ms) {
                    to_remove.push(entry.key().clone());
                }
            }
        }
        let count = to_remove.len();
        for identity in &to_remove {
            debug!(%identity, "evicting idle source");
            self.sources.remove(identity);
        }
        if count > 0 {
            info!(count, "evicted idle sources");
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> StreamIdentity {
        StreamIdentity::default_vhost("live", "a")
    }

    #[tokio::test]
    async fn fetch_or_create_returns_same_source_for_same_identity() {
        let manager = SourceManager::new();
        let a = manager.fetch_or_create(&identity()).await;
        let b = manager.fetch_or_create(&identity()).await;
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn concurrent_fetch_or_create_never_race_creates_two_sources() {
        let manager = Arc::new(SourceManager::new());
        let mut handles = Vec::new();
        for _ in 0..32 {
            let manager = manager.clone();
            handles.push(tokio::spawn(async move { manager.fetch_or_create(&identity()).await }));
        }
        let mut results = Vec::new();
        for h in handles {
            results.push(h.await.unwrap());
        }
        let first = results[0].source_id();
        for source in &results {
            assert!(Arc::ptr_eq(source, &results[0]));
        }
        let _ = first;
        assert_eq!(manager.len(), 1);
    }

    #[tokio::test]
    async fn fetch_on_unknown_identity_returns_none() {
        let manager = SourceManager::new();
        assert!(manager.fetch(&identity()).await.is_none());
    }

    #[tokio::test]
    async fn evict_idle_removes_unpublished_sources_past_timeout() {
        let manager = SourceManager::new();
        manager.fetch_or_create(&identity()).await;
        let evicted = manager.evict_idle(Duration::from_millis(0)).await;
        assert_eq!(evicted, 1);
        assert_eq!(manager.len(), 0);
    }

    #[tokio::test]
    async fn evict_idle_keeps_published_sources() {
        let manager = SourceManager::new();
        let source = manager.fetch_or_create(&identity()).await;
        source.on_publish().await.unwrap();
        let evicted = manager.evict_idle(Duration::from_millis(0)).await;
        assert_eq!(evicted, 0);
    }
}
