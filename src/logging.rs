//! Async batched log-export sink.
//!
//! Request handlers submit structured [`LogEvent`]s for "real user" requests
//! (spec.md §4.4) into an in-process queue; a background task flushes the
//! queue to a configured HTTP endpoint on a timer. The destination endpoint
//! itself is an external collaborator (spec.md §1); the batching/flush loop
//! is core engine behaviour, grounded in the batch-sink shape used by
//! log/metrics export sinks elsewhere in the ecosystem (e.g. vector's
//! `sinks::datadog::logs` and `sinks::gcp::cloud_storage`).

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex;

use crate::config::LoggingConfig;

#[derive(Debug, Clone, Serialize)]
pub struct LogEvent {
    pub method: String,
    pub path: String,
    pub status: u16,
    pub duration_ms: u64,
    pub remote_ip: String,
}

struct Inner {
    queue: Mutex<Vec<LogEvent>>,
    config: LoggingConfig,
    client: reqwest::Client,
}

/// The batched sink. Cheap to clone-share via `Arc`; `spawn_flush_loop`
/// starts the periodic background flush.
pub struct LogSink {
    inner: Arc<Inner>,
}

impl LogSink {
    pub fn new(config: LoggingConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                queue: Mutex::new(Vec::new()),
                config,
                client: reqwest::Client::new(),
            }),
        }
    }

    /// Enqueues an event. Never blocks on network I/O: the event is pushed
    /// into the in-memory queue and flushed later by the background loop.
    pub async fn submit(&self, event: LogEvent) {
        if self.inner.config.sink_uri.is_none() {
            return;
        }
        self.inner.queue.lock().await.push(event);
    }

    /// Drains and POSTs the current queue as a single JSON array. Swallows
    /// delivery failures (logged + counted), per spec.md §7's rule that
    /// background tasks never abort the scheduler.
    pub async fn flush(&self) {
        let Some(uri) = &self.inner.config.sink_uri else { return };

        let batch = {
            let mut queue = self.inner.queue.lock().await;
            if queue.is_empty() {
                return;
            }
            std::mem::take(&mut *queue)
        };

        let len = batch.len();
        match self.inner.client.post(uri).json(&batch).send().await {
            Ok(resp) if resp.status().is_success() => {
                tracing::debug!(count = len, "flushed log batch");
            }
            Ok(resp) => {
                tracing::warn!(status = %resp.status(), count = len, "log sink rejected batch");
                crate::metrics::counter("bytebin_log_sink_errors_total", 1);
            }
            Err(e) => {
                tracing::warn!(error = ?e, count = len, "failed to flush log batch");
                crate::metrics::counter("bytebin_log_sink_errors_total", 1);
            }
        }
    }

    /// Spawns the periodic flush loop.
    pub fn spawn(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            if self.inner.config.sink_uri.is_none() {
                return;
            }
            let mut ticker = tokio::time::interval(self.inner.config.flush_period);
            loop {
                ticker.tick().await;
                self.flush().await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn disabled_config() -> LoggingConfig {
        LoggingConfig { sink_uri: None, flush_period: std::time::Duration::from_secs(30), json: false }
    }

    #[tokio::test]
    async fn submit_is_a_no_op_when_sink_disabled() {
        let sink = LogSink::new(disabled_config());
        sink.submit(LogEvent {
            method: "GET".into(),
            path: "/abc1234".into(),
            status: 200,
            duration_ms: 5,
            remote_ip: "1.2.3.4".into(),
        })
        .await;
        assert!(sink.inner.queue.lock().await.is_empty());
    }

    #[tokio::test]
    async fn flush_with_empty_queue_does_not_panic() {
        let mut config = disabled_config();
        config.sink_uri = Some("http://127.0.0.1:9/nonexistent".into());
        let sink = LogSink::new(config);
        sink.flush().await;
    }
}
