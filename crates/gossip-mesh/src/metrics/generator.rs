//! Synthetic metric source for the periodic generation loop.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::{MetricBatch, MetricRecord};

/// Produces synthetic host metrics from an owned, seedable RNG.
#[derive(Debug, Clone)]
pub struct MetricGenerator {
    hostname: String,
    rng: StdRng,
}

impl MetricGenerator {
    /// Creates a generator seeded from OS entropy.
    #[must_use]
    pub fn new(hostname: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            rng: StdRng::from_entropy(),
        }
    }

    /// Creates a generator with a fixed seed; output is reproducible.
    #[must_use]
    pub fn with_seed(hostname: impl Into<String>, seed: u64) -> Self {
        Self {
            hostname: hostname.into(),
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Returns the hostname stamped on generated batches.
    #[must_use]
    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// Builds the next batch.
    pub fn next_batch(&mut self) -> MetricBatch {
        let metrics = vec![
            MetricRecord::new("cpu_usage_percent", self.rng.gen_range(0.0..100.0)),
            MetricRecord::new("memory_used_mb", self.rng.gen_range(128.0..16_384.0)),
            MetricRecord::new("load_avg_1m", self.rng.gen_range(0.0..8.0)),
            MetricRecord::new("disk_io_mb_s", self.rng.gen_range(0.0..500.0)),
            MetricRecord::new("net_rx_kb_s", self.rng.gen_range(0.0..10_000.0)),
        ];
        MetricBatch::with_metrics(self.hostname.clone(), metrics)
    }
}
