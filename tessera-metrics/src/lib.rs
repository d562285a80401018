#![deny(missing_docs)]
//! Tessera metrics
//!
//! Every metric is tagged with the URI of the array it was recorded against, so one context
//! serving several arrays can still report per-array figures.

use std::sync::Arc;

use witchcraft_metrics::{Metric, MetricRegistry};
// re-export exposed metric types
pub use witchcraft_metrics::{Counter, MetricId, Metrics, Timer};

/// Cells accepted by committed write queries.
pub const WRITE_CELLS: &str = "tessera.query.write.cells";
/// Cells produced into read buffers.
pub const READ_CELLS: &str = "tessera.query.read.cells";
/// Read submissions that ended with an incomplete status.
pub const INCOMPLETE_SUBMITS: &str = "tessera.query.incomplete";
/// Fragments committed to storage.
pub const FRAGMENTS_COMMITTED: &str = "tessera.fragments.committed";
/// Data tiles skipped because their bounding rectangle missed the subarray.
pub const TILES_PRUNED: &str = "tessera.tiles.pruned";
/// Subarray partitions a read was split into to stay within the memory budget.
pub const READ_PARTITIONS: &str = "tessera.query.read.partitions";
/// Wall time spent inside query submission.
pub const SUBMIT_TIMER: &str = "tessera.query.submit";

/// The tag holding the array URI of a metric.
pub const ARRAY_TAG: &str = "array";

/// A metric registry scoped to a single Tessera context.
#[derive(Default)]
pub struct TesseraMetrics {
    registry: MetricRegistry,
}

fn array_id(name: &'static str, array: &str) -> MetricId {
    MetricId::new(name).with_tag(ARRAY_TAG, array.trim_end_matches('/').to_string())
}

impl TesseraMetrics {
    /// Returns the counter `name` of `array`, creating it if absent.
    ///
    /// # Panics
    ///
    /// Panics if a metric is registered with the ID that is not a counter.
    pub fn counter(&self, name: &'static str, array: &str) -> Arc<Counter> {
        self.registry.counter(array_id(name, array))
    }

    /// Returns the timer `name` of `array`, creating it if absent.
    ///
    /// # Panics
    ///
    /// Panics if a metric is registered with the ID that is not a timer.
    pub fn timer(&self, name: &'static str, array: &str) -> Arc<Timer> {
        self.registry.timer(array_id(name, array))
    }

    /// The value of the counter `name` summed over every array, zero if it was never touched.
    pub fn count(&self, name: &str) -> i64 {
        self.counts(|id| id.name() == name)
    }

    /// The value of the counter `name` of `array`, zero if it was never touched.
    pub fn array_count(&self, name: &str, array: &str) -> i64 {
        let array = array.trim_end_matches('/');
        self.counts(|id| {
            id.name() == name && id.tags().iter().any(|(k, v)| k == ARRAY_TAG && v == array)
        })
    }

    fn counts(&self, mut select: impl FnMut(&MetricId) -> bool) -> i64 {
        self.registry
            .metrics()
            .iter()
            .filter_map(|(id, metric)| match metric {
                Metric::Counter(counter) if select(id) => Some(counter.count()),
                _ => None,
            })
            .sum()
    }

    /// Returns a snapshot of the metrics in the registry.
    ///
    /// Modifications to the registry after this method is called will not affect the snapshot.
    pub fn snapshot(&self) -> Metrics {
        self.registry.metrics()
    }
}
