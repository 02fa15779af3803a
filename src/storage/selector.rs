//! Backend selector: a chain-of-responsibility predicate over `Content`
//! metadata, evaluated once at write time (spec.md §4.7). Reads never
//! re-evaluate the chain; they resolve `backend_id` directly from the index.

use std::sync::Arc;

use crate::content::Content;
use crate::expiry::Expiry;
use crate::storage::StorageBackend;

/// A single rule in the chain. `Static` terminates the chain unconditionally.
pub enum Rule {
    /// Matches when the content is larger than `threshold_bytes`.
    IfSizeGt {
        threshold_bytes: u64,
        backend: Arc<dyn StorageBackend>,
        next: Box<Rule>,
    },
    /// Matches when the expiry exceeds `threshold_minutes` from now.
    /// "Never" is treated as exceeding any threshold.
    IfExpiryGt {
        threshold_minutes: i64,
        backend: Arc<dyn StorageBackend>,
        next: Box<Rule>,
    },
    Static(Arc<dyn StorageBackend>),
}

impl Rule {
    fn evaluate(&self, content: &Content) -> Arc<dyn StorageBackend> {
        match self {
            Rule::IfSizeGt { threshold_bytes, backend, next } => {
                if content.content_length > *threshold_bytes {
                    backend.clone()
                } else {
                    next.evaluate(content)
                }
            }
            Rule::IfExpiryGt { threshold_minutes, backend, next } => {
                let matches = match content.expiry {
                    Expiry::Never => true,
                    Expiry::At(at) => {
                        let remaining = at - chrono::Utc::now();
                        remaining > chrono::Duration::minutes(*threshold_minutes)
                    }
                };
                if matches {
                    backend.clone()
                } else {
                    next.evaluate(content)
                }
            }
            Rule::Static(backend) => backend.clone(),
        }
    }
}

/// The selector picks the first backend whose rule matches, on write only.
pub struct BackendSelector {
    root: Rule,
}

impl BackendSelector {
    pub fn new(root: Rule) -> Self {
        Self { root }
    }

    /// A selector that always routes to the given backend, useful when no
    /// routing rules are configured.
    pub fn always(backend: Arc<dyn StorageBackend>) -> Self {
        Self { root: Rule::Static(backend) }
    }

    pub fn select(&self, content: &Content) -> Arc<dyn StorageBackend> {
        self.root.evaluate(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::local::LocalStorage;

    fn backend(id: &str) -> Arc<dyn StorageBackend> {
        Arc::new(LocalStorage::new(id, std::env::temp_dir().join(id)))
    }

    fn content_of_size(size: usize) -> Content {
        Content::new(
            "abc1234".into(),
            "text/plain".into(),
            vec![],
            Expiry::Never,
            false,
            None,
            vec![0u8; size],
        )
    }

    #[test]
    fn routes_large_content_to_the_size_rule_backend() {
        let selector = BackendSelector::new(Rule::IfSizeGt {
            threshold_bytes: 100,
            backend: backend("big"),
            next: Box::new(Rule::Static(backend("small"))),
        });

        assert_eq!(selector.select(&content_of_size(200)).backend_id(), "big");
        assert_eq!(selector.select(&content_of_size(10)).backend_id(), "small");
    }

    #[test]
    fn never_expiry_always_exceeds_threshold() {
        let selector = BackendSelector::new(Rule::IfExpiryGt {
            threshold_minutes: 60,
            backend: backend("durable"),
            next: Box::new(Rule::Static(backend("ephemeral"))),
        });

        let mut content = content_of_size(1);
        content.expiry = Expiry::Never;
        assert_eq!(selector.select(&content).backend_id(), "durable");

        content.expiry = Expiry::At(chrono::Utc::now() + chrono::Duration::minutes(5));
        assert_eq!(selector.select(&content).backend_id(), "ephemeral");
    }
}
