//! Per-topic message validation.
//!
//! A [`Validator`] is a pure predicate over raw payload bytes. It runs before
//! any handler sees a message and before the substrate forwards it, so a
//! rejected payload is pruned from the mesh instead of merely ignored.

use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::gossip::BroadcastMessage;
use crate::metrics::{self, MetricBatch};

/// Outcome of validating one inbound payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationResult {
    /// Deliver locally and keep propagating.
    Accept,
    /// Drop: no delivery, no forwarding.
    Reject,
}

impl ValidationResult {
    /// Returns true for [`ValidationResult::Accept`].
    #[must_use]
    pub const fn is_accept(self) -> bool {
        matches!(self, Self::Accept)
    }
}

/// Decides whether a payload on a topic is acceptable.
///
/// Implementations must not mutate shared state; the substrate may call them
/// concurrently for several inbound messages on the same topic.
pub trait Validator: Send + Sync + fmt::Debug {
    /// Validates `data` received on `topic`.
    fn validate(&self, topic: &str, data: &[u8]) -> ValidationResult;
}

/// Extra acceptance rule applied to successfully decoded batches.
pub type BatchPolicy = Arc<dyn Fn(&MetricBatch) -> bool + Send + Sync>;

/// Accepts payloads that decode as a [`MetricBatch`].
#[derive(Clone, Default)]
pub struct MetricsValidator {
    policy: Option<BatchPolicy>,
}

impl MetricsValidator {
    /// Creates a validator that checks structure only.
    #[must_use]
    pub fn new() -> Self {
        Self { policy: None }
    }

    /// Adds a deployment-specific acceptance rule (value bounds, host
    /// allow-lists, ...). Runs only on batches that decoded.
    #[must_use]
    pub fn with_policy(mut self, policy: BatchPolicy) -> Self {
        self.policy = Some(policy);
        self
    }
}

impl fmt::Debug for MetricsValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetricsValidator")
            .field("has_policy", &self.policy.is_some())
            .finish()
    }
}

impl Validator for MetricsValidator {
    fn validate(&self, topic: &str, data: &[u8]) -> ValidationResult {
        match metrics::decode(data) {
            Ok(batch) => match &self.policy {
                Some(policy) if !policy(&batch) => {
                    debug!(topic, hostname = batch.hostname(), "metric batch refused by policy");
                    ValidationResult::Reject
                }
                _ => ValidationResult::Accept,
            },
            Err(e) => {
                debug!(topic, error = %e, "invalid metric batch");
                ValidationResult::Reject
            }
        }
    }
}

/// Accepts payloads that parse as a [`BroadcastMessage`].
#[derive(Debug, Clone, Copy, Default)]
pub struct BroadcastValidator;

impl Validator for BroadcastValidator {
    fn validate(&self, topic: &str, data: &[u8]) -> ValidationResult {
        match BroadcastMessage::from_bytes(data) {
            Ok(_) => ValidationResult::Accept,
            Err(e) => {
                debug!(topic, error = %e, "invalid broadcast message");
                ValidationResult::Reject
            }
        }
    }
}

/// Accepts everything. For topics that carry opaque payloads.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAll;

impl Validator for AcceptAll {
    fn validate(&self, _topic: &str, _data: &[u8]) -> ValidationResult {
        ValidationResult::Accept
    }
}
