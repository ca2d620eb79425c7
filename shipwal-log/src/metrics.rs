//! Prometheus metrics for the log engine.
//!
//! Metrics carry a constant `dir` label so several engines (one per client
//! and tenant) can register into the same registry.

use prometheus::{Counter, Gauge, Histogram, HistogramOpts, Opts, Registry};

/// Fsync duration histogram buckets (in seconds).
const FSYNC_BUCKETS: &[f64] = &[0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0];

/// Engine metrics.
#[derive(Clone)]
pub struct WalMetrics {
    /// Duration of segment fsyncs.
    pub fsync_duration: Histogram,
    /// Frames appended.
    pub records_written_total: Counter,
    /// Bytes appended, frame headers included.
    pub bytes_written_total: Counter,
    /// Failed appends.
    pub writes_failed_total: Counter,
    /// Segments created, by size-driven or requested rotation.
    pub segment_creations_total: Counter,
    /// Torn tails truncated on open.
    pub truncations_total: Counter,
    /// Segment currently written to.
    pub current_segment: Gauge,
}

impl WalMetrics {
    /// Creates unregistered metrics labelled with the engine directory.
    pub fn new(dir: &str) -> Result<Self, prometheus::Error> {
        let opts = |name: &str, help: &str| Opts::new(name, help).const_label("dir", dir);

        let fsync_duration = Histogram::with_opts(
            HistogramOpts::new(
                "shipwal_log_fsync_duration_seconds",
                "Duration of segment fsyncs in seconds",
            )
            .const_label("dir", dir)
            .buckets(FSYNC_BUCKETS.to_vec()),
        )?;
        let records_written_total = Counter::with_opts(opts(
            "shipwal_log_records_written_total",
            "Total number of frames appended",
        ))?;
        let bytes_written_total = Counter::with_opts(opts(
            "shipwal_log_bytes_written_total",
            "Total number of bytes appended",
        ))?;
        let writes_failed_total = Counter::with_opts(opts(
            "shipwal_log_writes_failed_total",
            "Total number of failed appends",
        ))?;
        let segment_creations_total = Counter::with_opts(opts(
            "shipwal_log_segment_creations_total",
            "Total number of segments created",
        ))?;
        let truncations_total = Counter::with_opts(opts(
            "shipwal_log_truncations_total",
            "Total number of torn segment tails truncated",
        ))?;
        let current_segment = Gauge::with_opts(opts(
            "shipwal_log_segment_current",
            "Segment index currently written to",
        ))?;

        Ok(Self {
            fsync_duration,
            records_written_total,
            bytes_written_total,
            writes_failed_total,
            segment_creations_total,
            truncations_total,
            current_segment,
        })
    }

    /// Registers all metrics with the given registry.
    pub fn register(&self, registry: &Registry) -> Result<(), prometheus::Error> {
        registry.register(Box::new(self.fsync_duration.clone()))?;
        registry.register(Box::new(self.records_written_total.clone()))?;
        registry.register(Box::new(self.bytes_written_total.clone()))?;
        registry.register(Box::new(self.writes_failed_total.clone()))?;
        registry.register(Box::new(self.segment_creations_total.clone()))?;
        registry.register(Box::new(self.truncations_total.clone()))?;
        registry.register(Box::new(self.current_segment.clone()))?;
        Ok(())
    }

    /// Removes all metrics from the registry, so the same directory can be
    /// registered again.
    pub fn unregister(&self, registry: &Registry) -> Result<(), prometheus::Error> {
        registry.unregister(Box::new(self.fsync_duration.clone()))?;
        registry.unregister(Box::new(self.records_written_total.clone()))?;
        registry.unregister(Box::new(self.bytes_written_total.clone()))?;
        registry.unregister(Box::new(self.writes_failed_total.clone()))?;
        registry.unregister(Box::new(self.segment_creations_total.clone()))?;
        registry.unregister(Box::new(self.truncations_total.clone()))?;
        registry.unregister(Box::new(self.current_segment.clone()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_two_dirs_in_one_registry() {
        let registry = Registry::new();
        WalMetrics::new("/wal/a/t1").unwrap().register(&registry).unwrap();
        WalMetrics::new("/wal/a/t2").unwrap().register(&registry).unwrap();

        let families = registry.gather();
        let creations = families
            .iter()
            .find(|f| f.get_name() == "shipwal_log_segment_creations_total")
            .unwrap();
        assert_eq!(creations.get_metric().len(), 2);
    }

    #[test]
    fn test_unregister_allows_reregistration() {
        let registry = Registry::new();
        let metrics = WalMetrics::new("/wal/a/t1").unwrap();
        metrics.register(&registry).unwrap();
        metrics.unregister(&registry).unwrap();
        assert!(registry.gather().is_empty());

        WalMetrics::new("/wal/a/t1").unwrap().register(&registry).unwrap();
    }

    #[test]
    fn test_duplicate_dir_rejected() {
        let registry = Registry::new();
        WalMetrics::new("/wal/a/t1").unwrap().register(&registry).unwrap();
        assert!(WalMetrics::new("/wal/a/t1")
            .unwrap()
            .register(&registry)
            .is_err());
    }
}
