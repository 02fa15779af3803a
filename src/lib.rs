//! Bytebin: a content-addressed "any-bytes" storage service.
//!
//! Clients upload an opaque blob and receive a short random key; later
//! requests retrieve the bytes with their original content type and
//! transport encoding. Content carries a configurable lifetime and is
//! garbage-collected by the [`housekeeper`].

pub mod cache;
pub mod codec;
pub mod config;
pub mod content;
pub mod coordinator;
pub mod encoding;
pub mod error;
pub mod expiry;
pub mod handlers;
pub mod housekeeper;
pub mod index;
pub mod logging;
pub mod metrics;
pub mod ratelimit;
pub mod storage;
pub mod token;

use std::sync::Arc;

use crate::cache::ContentCache;
use crate::config::Config;
use crate::coordinator::Coordinator;
use crate::index::ContentIndex;
use crate::logging::LogSink;
use crate::ratelimit::RateLimiters;
use crate::storage::selector::BackendSelector;
use crate::storage::StorageBackend;

/// Shared application state handed to every axum handler.
///
/// This is the composition root: it owns the cache, the coordinator (which
/// in turn owns the index and the registered backends), the rate limiters,
/// and the log sink. Everything here is cheap to clone (`Arc` internally).
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub cache: Arc<ContentCache>,
    pub coordinator: Arc<Coordinator>,
    pub limiters: Arc<RateLimiters>,
    pub log_sink: Arc<LogSink>,
}

impl AppState {
    pub async fn new(
        config: Config,
        index: ContentIndex,
        backends: Vec<Arc<dyn StorageBackend>>,
        selector: BackendSelector,
    ) -> anyhow::Result<Self> {
        let config = Arc::new(config);
        let coordinator = Arc::new(Coordinator::new(index, backends, selector));
        let cache = Arc::new(ContentCache::new(config.cache.clone(), coordinator.clone()));
        let limiters = Arc::new(RateLimiters::new(&config.rate_limits));
        let log_sink = Arc::new(LogSink::new(config.logging.clone()));

        Ok(Self {
            config,
            cache,
            coordinator,
            limiters,
            log_sink,
        })
    }
}
