//! Metric records, batches and their binary codec.
//!
//! - [`MetricRecord`]: a single named `f64` sample
//! - [`MetricBatch`]: the samples one host produced in one generation cycle
//! - [`encode`] / [`decode`]: field-tagged, length-delimited binary form
//! - [`MetricGenerator`]: seeded synthetic batch source

mod codec;
mod generator;

pub use codec::{DecodeError, decode, encode};
pub use generator::MetricGenerator;

use serde::{Deserialize, Serialize};

/// A single named metric sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRecord {
    name: String,
    value: f64,
}

impl MetricRecord {
    /// Creates a new metric record.
    #[must_use]
    pub fn new(name: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }

    /// Returns the metric name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the metric value.
    #[must_use]
    pub const fn value(&self) -> f64 {
        self.value
    }
}

/// The metrics produced by one host in one cycle, in insertion order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricBatch {
    hostname: String,
    metrics: Vec<MetricRecord>,
}

impl MetricBatch {
    /// Creates an empty batch for the given host.
    #[must_use]
    pub fn new(hostname: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            metrics: Vec::new(),
        }
    }

    /// Creates a batch from existing records.
    #[must_use]
    pub fn with_metrics(hostname: impl Into<String>, metrics: Vec<MetricRecord>) -> Self {
        Self {
            hostname: hostname.into(),
            metrics,
        }
    }

    /// Appends a record to the batch.
    pub fn push(&mut self, record: MetricRecord) {
        self.metrics.push(record);
    }

    /// Returns the originating hostname.
    #[must_use]
    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// Returns the records in insertion order.
    #[must_use]
    pub fn metrics(&self) -> &[MetricRecord] {
        &self.metrics
    }

    /// Returns the number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    /// Returns true if the batch carries no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }

    /// Looks up the first record with the given name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<f64> {
        self.metrics
            .iter()
            .find(|m| m.name == name)
            .map(MetricRecord::value)
    }
}
