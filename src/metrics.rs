//! A thin facade over the `metrics` crate/exporter.
//!
//! The actual exposition format (`/metrics`'s Prometheus text output) is an
//! external collaborator (spec.md §1); this module only wraps the call
//! sites inside the engine so components never depend on a concrete
//! metrics backend directly (REDESIGN FLAGS: shared-mutable static metric
//! registries -> a single injected facade).

use std::time::{Duration, Instant};

/// Stopwatch used to time an operation before reporting it as a histogram
/// observation.
pub struct Timer(Instant);

impl Timer {
    pub fn new() -> Self {
        Self(Instant::now())
    }

    pub fn elapsed(&self) -> Duration {
        self.0.elapsed()
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

fn key_with_labels(name: &'static str, labels: &[(&'static str, String)]) -> metrics::Key {
    let labels: Vec<metrics::Label> = labels
        .iter()
        .map(|(k, v)| metrics::Label::new(*k, v.clone()))
        .collect();
    metrics::Key::from_parts(name, labels)
}

/// Increments a named counter by `value`.
pub fn counter(name: &'static str, value: u64) {
    metrics::counter!(name, value);
}

/// Increments a named, labelled counter by `value` (e.g. per-`(content_type,
/// backend_id)` gauges refreshed by the housekeeper).
pub fn counter_with_labels(name: &'static str, value: u64, labels: &[(&'static str, String)]) {
    let key = key_with_labels(name, labels);
    metrics::recorder().register_counter(&key).increment(value);
}

/// Records a duration observation against a named histogram.
pub fn histogram(name: &'static str, value: Duration) {
    metrics::histogram!(name, value);
}

/// Sets a named gauge to an absolute value.
pub fn gauge(name: &'static str, value: f64) {
    metrics::gauge!(name, value);
}

/// Sets a named, labelled gauge to an absolute value.
pub fn gauge_with_labels(name: &'static str, value: f64, labels: &[(&'static str, String)]) {
    let key = key_with_labels(name, labels);
    metrics::recorder().register_gauge(&key).set(value);
}

/// In-flight request gauge helper: increments on creation, decrements on drop.
pub struct InFlightGuard {
    name: &'static str,
}

impl InFlightGuard {
    pub fn start(name: &'static str) -> Self {
        metrics::increment_gauge!(name, 1.0);
        Self { name }
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        metrics::decrement_gauge!(self.name, 1.0);
    }
}
