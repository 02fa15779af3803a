//! The `Content` record: metadata + bytes + a save-completion signal.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Notify;

use crate::expiry::Expiry;

/// A single stored blob, with or without its bytes loaded.
///
/// `content` is `None` when only metadata was loaded (e.g. from the index,
/// or from a backend's `list()` stream which intentionally skips the
/// content block).
#[derive(Clone, Debug)]
pub struct Content {
    pub key: String,
    pub content_type: String,
    /// Transport encodings applied to `content`, outermost last, never
    /// ending in `identity` (see `encoding::parse_content_encoding`).
    pub encoding: Vec<String>,
    pub expiry: Expiry,
    pub last_modified: DateTime<Utc>,
    pub modifiable: bool,
    pub auth_key: Option<String>,
    pub backend_id: String,
    pub content_length: u64,
    pub content: Option<Vec<u8>>,

    /// Fulfilled once the first durable write for this record completes
    /// (successfully or not). Shared so that readers racing a POST can wait
    /// on the same signal the writer holds (spec.md §3 Ownership).
    pub(crate) save_complete: Arc<Notify>,
}

impl Content {
    /// Builds a freshly-created record, not yet associated with any backend.
    /// `backend_id` is filled in by the storage selector on save.
    pub fn new(
        key: String,
        content_type: String,
        encoding: Vec<String>,
        expiry: Expiry,
        modifiable: bool,
        auth_key: Option<String>,
        content: Vec<u8>,
    ) -> Self {
        let content_length = content.len() as u64;
        Self {
            key,
            content_type,
            encoding,
            expiry,
            last_modified: Utc::now(),
            modifiable,
            auth_key,
            backend_id: String::new(),
            content_length,
            content: Some(content),
            save_complete: Arc::new(Notify::new()),
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expiry.is_expired(now)
    }

    /// Overwrites the mutable fields touched by UPDATE, per spec.md §4.12.
    pub fn apply_update(
        &mut self,
        content_type: String,
        encoding: Vec<String>,
        expiry: Expiry,
        content: Vec<u8>,
    ) {
        self.content_type = content_type;
        self.encoding = encoding;
        self.expiry = expiry;
        self.last_modified = Utc::now();
        self.content_length = content.len() as u64;
        self.content = Some(content);
    }

    pub fn matches_auth_key(&self, presented: &str) -> bool {
        self.modifiable && self.auth_key.as_deref() == Some(presented)
    }

    /// A clone of the save-completion handle, so a reader can `notified()`
    /// on the same signal the writer will fulfil.
    pub fn save_signal(&self) -> Arc<Notify> {
        self.save_complete.clone()
    }

    /// Fulfils the save-completion signal. Idempotent: `Notify::notify_waiters`
    /// is safe to call more than once, though callers should only do this
    /// once per record per spec.md's lifecycle.
    pub fn mark_saved(&self) {
        self.save_complete.notify_waiters();
    }

    /// True iff this record has no usable content, i.e. it should be
    /// treated as "missing" by GET/UPDATE handlers (spec.md §4.12).
    pub fn is_empty_record(&self) -> bool {
        self.content.as_ref().map(|c| c.is_empty()).unwrap_or(false) && self.content_length == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Content {
        Content::new(
            "abc1234".into(),
            "text/plain".into(),
            vec![],
            Expiry::Never,
            false,
            None,
            b"hello".to_vec(),
        )
    }

    #[test]
    fn content_length_matches_bytes() {
        let content = sample();
        assert_eq!(content.content_length, 5);
    }

    #[test]
    fn matches_auth_key_requires_modifiable_and_exact_match() {
        let mut content = sample();
        assert!(!content.matches_auth_key("anything"));

        content.modifiable = true;
        content.auth_key = Some("secret".into());
        assert!(content.matches_auth_key("secret"));
        assert!(!content.matches_auth_key("wrong"));
    }

    #[test]
    fn apply_update_overwrites_mutable_fields_and_bumps_timestamp() {
        let mut content = sample();
        let before = content.last_modified;
        std::thread::sleep(std::time::Duration::from_millis(2));
        content.apply_update(
            "application/json".into(),
            vec!["gzip".into()],
            Expiry::Never,
            b"{}".to_vec(),
        );
        assert_eq!(content.content_type, "application/json");
        assert_eq!(content.content_length, 2);
        assert!(content.last_modified > before);
    }

    #[tokio::test]
    async fn save_signal_wakes_waiters_on_mark_saved() {
        let content = sample();
        let signal = content.save_signal();
        let waiter = tokio::spawn(async move {
            signal.notified().await;
        });
        tokio::task::yield_now().await;
        content.mark_saved();
        waiter.await.unwrap();
    }
}
