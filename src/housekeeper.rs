//! Housekeeper: periodically expires content and refreshes metrics gauges.
//!
//! Scheduled at a configurable interval (default every 5 minutes) after a
//! short warmup, per spec.md §4.11. Runs on the shared worker pool via
//! `tokio::spawn`; failures are logged and counted, never panic the loop
//! (spec.md §7: background tasks swallow exceptions).

use std::sync::Arc;

use tokio::time::{interval_at, Instant as TokioInstant};

use crate::config::HousekeeperConfig;
use crate::coordinator::Coordinator;

pub struct Housekeeper {
    coordinator: Arc<Coordinator>,
    config: HousekeeperConfig,
}

impl Housekeeper {
    pub fn new(coordinator: Arc<Coordinator>, config: HousekeeperConfig) -> Self {
        Self { coordinator, config }
    }

    /// Runs one sweep: deletes everything the index reports as expired and
    /// refreshes the stored-content gauges. Errors are logged and counted,
    /// never propagated.
    pub async fn run_once(&self) {
        match self.coordinator.run_invalidation_and_record_metrics().await {
            Ok(deleted) => {
                tracing::info!(deleted, "housekeeper sweep complete");
            }
            Err(e) => {
                tracing::error!(error = ?e, "housekeeper sweep failed");
                crate::metrics::counter("bytebin_housekeeper_errors_total", 1);
            }
        }
    }

    /// Spawns the periodic sweep loop on the current tokio runtime. Returns
    /// the `JoinHandle` so callers (tests, graceful shutdown) can abort it.
    pub fn spawn(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            if self.config.interval.is_zero() {
                tracing::info!("housekeeper disabled (zero interval)");
                return;
            }

            let start = TokioInstant::now() + self.config.warmup;
            let mut ticker = interval_at(start, self.config.interval);
            loop {
                ticker.tick().await;
                self.run_once().await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::Content;
    use crate::expiry::Expiry;
    use crate::index::ContentIndex;
    use crate::storage::local::LocalStorage;
    use crate::storage::selector::BackendSelector;
    use crate::storage::StorageBackend;

    #[tokio::test]
    async fn run_once_deletes_expired_content() {
        let dir = tempfile::tempdir().unwrap();
        let backend: Arc<dyn StorageBackend> = Arc::new(LocalStorage::new("local", dir.path()));
        let index = ContentIndex::connect("sqlite::memory:").await.unwrap();
        let selector = BackendSelector::always(backend.clone());
        let coordinator = Arc::new(Coordinator::new(index, vec![backend], selector));

        let mut content = Content::new(
            "abc1234".into(),
            "text/plain".into(),
            vec![],
            Expiry::At(chrono::Utc::now() - chrono::Duration::minutes(1)),
            false,
            None,
            b"x".to_vec(),
        );
        coordinator.save(&mut content).await.unwrap();

        let housekeeper = Housekeeper::new(
            coordinator.clone(),
            HousekeeperConfig { interval: std::time::Duration::from_secs(0), warmup: std::time::Duration::from_secs(0) },
        );
        housekeeper.run_once().await;

        assert!(coordinator.load("abc1234").await.unwrap().is_none());
    }
}
