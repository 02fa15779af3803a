//! Storage coordinator: composes the index and the registered backends.
//!
//! Per spec.md §4.9: `load` resolves a backend via the index, `save` routes
//! through the selector and writes the index before (or atomically with)
//! the backend, `delete` removes from the backend then the index (the
//! index is the source of truth), and `bulk_delete` supports an orphan-
//! cleanup `force` mode.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::content::Content;
use crate::index::ContentIndex;
use crate::metrics::Timer;
use crate::storage::selector::BackendSelector;
use crate::storage::StorageBackend;

pub struct Coordinator {
    index: ContentIndex,
    backends: HashMap<String, Arc<dyn StorageBackend>>,
    selector: BackendSelector,
    /// Labels seen on the last gauge refresh, so labels with no rows left
    /// can be zeroed out instead of silently lingering at their last value
    /// (spec.md §4.11).
    seen_labels: Mutex<HashSet<(String, String)>>,
}

impl Coordinator {
    pub fn new(
        index: ContentIndex,
        backends: Vec<Arc<dyn StorageBackend>>,
        selector: BackendSelector,
    ) -> Self {
        let backends = backends
            .into_iter()
            .map(|b| (b.backend_id().to_string(), b))
            .collect();
        Self { index, backends, selector, seen_labels: Mutex::new(HashSet::new()) }
    }

    /// Loads a record, or an empty sentinel (`Ok(None)`) on miss or when the
    /// stored `backend_id` names a backend that isn't registered (which is
    /// counted as an error, per spec.md §4.8's index invariant).
    pub async fn load(&self, key: &str) -> anyhow::Result<Option<Content>> {
        let timer = Timer::new();
        let Some(meta) = self.index.get(key).await? else {
            return Ok(None);
        };

        let Some(backend) = self.backends.get(&meta.backend_id) else {
            tracing::error!(key, backend_id = %meta.backend_id, "index row names unknown backend");
            crate::metrics::counter("bytebin_coordinator_unknown_backend_total", 1);
            return Ok(None);
        };

        let result = backend.load(key).await?;
        crate::metrics::histogram("bytebin_coordinator_load_seconds", timer.elapsed());
        Ok(result)
    }

    /// Picks a backend via the selector, stamps `backend_id`, upserts the
    /// index, then writes the bytes. A crash between these two steps leaves
    /// an orphan; `bulk_delete(.., force=true)` can clean those up.
    pub async fn save(&self, content: &mut Content) -> anyhow::Result<()> {
        let timer = Timer::new();
        let backend = self.selector.select(content);
        content.backend_id = backend.backend_id().to_string();

        self.index.put(content).await?;
        let result = backend.save(content).await;
        content.mark_saved();
        result?;

        crate::metrics::histogram("bytebin_coordinator_save_seconds", timer.elapsed());
        Ok(())
    }

    /// Removes a record: backend first, then the index (source of truth).
    pub async fn delete(&self, content: &Content) -> anyhow::Result<()> {
        if let Some(backend) = self.backends.get(&content.backend_id) {
            backend.delete(&content.key).await?;
        }
        self.index.remove(&content.key).await?;
        Ok(())
    }

    /// Deletes each key via the index; with `force`, keys missing from the
    /// index are also attempted against every registered backend (orphan
    /// cleanup). Returns the count of records actually deleted.
    pub async fn bulk_delete(&self, keys: &[String], force: bool) -> anyhow::Result<u64> {
        let mut deleted = 0u64;

        for key in keys {
            match self.index.get(key).await? {
                Some(content) => {
                    self.delete(&content).await?;
                    deleted += 1;
                }
                None if force => {
                    let mut any = false;
                    for backend in self.backends.values() {
                        if backend.load(key).await?.is_some() {
                            backend.delete(key).await?;
                            any = true;
                        }
                    }
                    if any {
                        deleted += 1;
                    }
                }
                None => {}
            }
        }

        Ok(deleted)
    }

    /// Expires everything the index reports as past its expiry, then
    /// refreshes the index's aggregate gauges. Used by the housekeeper.
    pub async fn run_invalidation_and_record_metrics(&self) -> anyhow::Result<u64> {
        let now = chrono::Utc::now();
        let expired = self.index.get_expired(now).await?;
        let mut count = 0u64;

        for content in &expired {
            if let Err(e) = self.delete(content).await {
                tracing::error!(key = %content.key, error = ?e, "failed to delete expired content");
                crate::metrics::counter("bytebin_housekeeper_delete_errors_total", 1);
                continue;
            }
            count += 1;
        }

        self.refresh_gauges().await?;
        Ok(count)
    }

    async fn refresh_gauges(&self) -> anyhow::Result<()> {
        let stats = self.index.group_by_content_type_and_backend().await?;

        let mut current: HashSet<(String, String)> = HashSet::new();
        for row in &stats {
            current.insert((row.content_type.clone(), row.backend_id.clone()));
            let labels = [
                ("content_type", row.content_type.clone()),
                ("backend_id", row.backend_id.clone()),
            ];
            crate::metrics::gauge_with_labels("bytebin_stored_content_count", row.count as f64, &labels);
            crate::metrics::gauge_with_labels(
                "bytebin_stored_content_bytes",
                row.total_bytes as f64,
                &labels,
            );
        }

        let mut seen = self.seen_labels.lock().await;
        for (content_type, backend_id) in seen.iter() {
            if !current.contains(&(content_type.clone(), backend_id.clone())) {
                let labels = [
                    ("content_type", content_type.clone()),
                    ("backend_id", backend_id.clone()),
                ];
                crate::metrics::gauge_with_labels("bytebin_stored_content_count", 0.0, &labels);
                crate::metrics::gauge_with_labels("bytebin_stored_content_bytes", 0.0, &labels);
            }
        }
        *seen = current;

        Ok(())
    }

    pub fn index(&self) -> &ContentIndex {
        &self.index
    }

    pub fn backends(&self) -> &HashMap<String, Arc<dyn StorageBackend>> {
        &self.backends
    }
}
