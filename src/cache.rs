//! Content cache (loader): the async byte-weighted cache in front of the
//! coordinator, per spec.md §4.10.
//!
//! Two modes, selected by `CacheConfig::enabled`:
//!
//! - **Cached mode**: a `moka::future::Cache` keyed by content key, weighed
//!   by `content_length`, with idle-time expiry. Misses fall through to the
//!   coordinator; `moka` gives us single-flight for free (concurrent `get`s
//!   for the same key share one coordinator call).
//! - **Direct mode**: no caching at all; a small side map of in-flight save
//!   futures is consulted first so a GET racing a POST's save doesn't miss.

use std::collections::HashMap;
use std::sync::Arc;

use moka::future::Cache;
use tokio::sync::Mutex;

use crate::config::CacheConfig;
use crate::content::Content;
use crate::coordinator::Coordinator;

enum Mode {
    Cached(Cache<String, Content>),
    Direct {
        /// Keyed by content key; consulted before the coordinator so a GET
        /// racing a POST's save observes the in-flight content instead of a
        /// miss. Pruned once the save signal fires.
        in_flight: Mutex<HashMap<String, Content>>,
    },
}

pub struct ContentCache {
    mode: Mode,
    coordinator: Arc<Coordinator>,
}

impl ContentCache {
    pub fn new(config: CacheConfig, coordinator: Arc<Coordinator>) -> Self {
        let mode = if config.enabled {
            let cache = Cache::builder()
                .max_capacity(config.max_size_mb * 1024 * 1024)
                .weigher(|_key, content: &Content| -> u32 {
                    content.content_length.try_into().unwrap_or(u32::MAX)
                })
                .time_to_idle(std::time::Duration::from_secs(config.expiry_minutes * 60))
                .build();
            Mode::Cached(cache)
        } else {
            Mode::Direct { in_flight: Mutex::new(HashMap::new()) }
        };

        Self { mode, coordinator }
    }

    /// Pre-populates the cache with freshly-created content at POST time, so
    /// a GET racing the durable save observes it immediately instead of
    /// missing through to disk (spec.md §4.12 POST step 7).
    pub async fn put(&self, content: Content) {
        match &self.mode {
            Mode::Cached(cache) => {
                cache.insert(content.key.clone(), content).await;
            }
            Mode::Direct { in_flight } => {
                let mut guard = in_flight.lock().await;
                guard.insert(content.key.clone(), content);
            }
        }
    }

    /// Removes a key's in-flight entry once its save signal has fired. Only
    /// meaningful in direct mode; a no-op otherwise (the `moka` cache is
    /// left to its own TTL).
    pub async fn prune_in_flight(&self, key: &str) {
        if let Mode::Direct { in_flight } = &self.mode {
            in_flight.lock().await.remove(key);
        }
    }

    /// Fetches content by key, falling through to the coordinator on miss.
    /// Returns `Ok(None)` for a genuine miss (absent or expired upstream).
    pub async fn get(&self, key: &str) -> anyhow::Result<Option<Content>> {
        match &self.mode {
            Mode::Cached(cache) => {
                let coordinator = self.coordinator.clone();
                let owned_key = key.to_string();
                // `optionally_get_with` only inserts into the cache when the
                // init future resolves to `Some`, which is exactly the
                // single-flight-on-miss behaviour spec.md §4.10 wants: a
                // genuine miss is never cached, but concurrent `get`s for a
                // key that IS present share one coordinator call.
                let init = async move {
                    coordinator.load(&owned_key).await.unwrap_or_else(|e| {
                        tracing::error!(key = %owned_key, error = ?e, "coordinator load failed");
                        None
                    })
                };

                Ok(cache.optionally_get_with(key.to_string(), init).await)
            }
            Mode::Direct { in_flight } => {
                if let Some(content) = in_flight.lock().await.get(key).cloned() {
                    return Ok(Some(content));
                }
                self.coordinator.load(key).await
            }
        }
    }

    /// Invalidates a cached entry, e.g. after UPDATE or DELETE.
    pub async fn invalidate(&self, key: &str) {
        match &self.mode {
            Mode::Cached(cache) => cache.invalidate(key).await,
            Mode::Direct { in_flight } => {
                in_flight.lock().await.remove(key);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expiry::Expiry;
    use crate::index::ContentIndex;
    use crate::storage::local::LocalStorage;
    use crate::storage::selector::BackendSelector;

    async fn test_coordinator() -> (Arc<Coordinator>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let backend: Arc<dyn crate::storage::StorageBackend> =
            Arc::new(LocalStorage::new("local", dir.path()));
        let index = ContentIndex::connect("sqlite::memory:").await.unwrap();
        let selector = BackendSelector::always(backend.clone());
        let coordinator = Arc::new(Coordinator::new(index, vec![backend], selector));
        (coordinator, dir)
    }

    #[tokio::test]
    async fn cached_mode_hits_after_pre_population() {
        let (coordinator, _dir) = test_coordinator().await;
        let cache = ContentCache::new(CacheConfig { enabled: true, expiry_minutes: 60, max_size_mb: 1 }, coordinator);

        let content = Content::new(
            "abc1234".into(),
            "text/plain".into(),
            vec![],
            Expiry::Never,
            false,
            None,
            b"hello".to_vec(),
        );
        cache.put(content).await;

        let loaded = cache.get("abc1234").await.unwrap().unwrap();
        assert_eq!(loaded.content, Some(b"hello".to_vec()));
    }

    #[tokio::test]
    async fn cached_mode_falls_through_to_coordinator_on_miss() {
        let (coordinator, _dir) = test_coordinator().await;
        let mut content = Content::new(
            "abc1234".into(),
            "text/plain".into(),
            vec![],
            Expiry::Never,
            false,
            None,
            b"hello".to_vec(),
        );
        coordinator.save(&mut content).await.unwrap();

        let cache = ContentCache::new(CacheConfig { enabled: true, expiry_minutes: 60, max_size_mb: 1 }, coordinator);
        let loaded = cache.get("abc1234").await.unwrap().unwrap();
        assert_eq!(loaded.content, Some(b"hello".to_vec()));
    }

    #[tokio::test]
    async fn direct_mode_serves_from_in_flight_map_before_save_completes() {
        let (coordinator, _dir) = test_coordinator().await;
        let cache = ContentCache::new(CacheConfig { enabled: false, expiry_minutes: 60, max_size_mb: 1 }, coordinator);

        let content = Content::new(
            "abc1234".into(),
            "text/plain".into(),
            vec![],
            Expiry::Never,
            false,
            None,
            b"hello".to_vec(),
        );
        cache.put(content).await;

        let loaded = cache.get("abc1234").await.unwrap().unwrap();
        assert_eq!(loaded.content, Some(b"hello".to_vec()));

        cache.prune_in_flight("abc1234").await;
        // After pruning and with nothing saved to the coordinator, it's a miss.
        assert!(cache.get("abc1234").await.unwrap().is_none());
    }
}
