//! Topic handlers installed by the node runtime.

use tracing::debug;

use crate::gossip::{BroadcastMessage, Handler, InboundMessage};
use crate::metrics;
use crate::telemetry::TelemetryLogger;

/// Logs a `message_received` event for each accepted broadcast, keyed by the
/// payload's `msg_id`.
#[derive(Debug, Clone)]
pub struct BroadcastHandler {
    telemetry: TelemetryLogger,
}

impl BroadcastHandler {
    /// Creates the handler.
    #[must_use]
    pub const fn new(telemetry: TelemetryLogger) -> Self {
        Self { telemetry }
    }
}

impl Handler for BroadcastHandler {
    fn handle(&self, message: &InboundMessage) {
        match BroadcastMessage::from_bytes(message.data()) {
            Ok(broadcast) => {
                self.telemetry
                    .message_received(&broadcast.msg_id, message.origin());
            }
            Err(e) => debug!(error = %e, "ignoring malformed broadcast"),
        }
    }
}

/// Logs a `message_received` event for each accepted metric batch, keyed by
/// the envelope id the origin announced in its `message_broadcast`.
#[derive(Debug, Clone)]
pub struct MetricsHandler {
    telemetry: TelemetryLogger,
}

impl MetricsHandler {
    /// Creates the handler.
    #[must_use]
    pub const fn new(telemetry: TelemetryLogger) -> Self {
        Self { telemetry }
    }
}

impl Handler for MetricsHandler {
    fn handle(&self, message: &InboundMessage) {
        if let Ok(batch) = metrics::decode(message.data()) {
            debug!(
                hostname = batch.hostname(),
                metrics = batch.len(),
                origin = %message.origin(),
                "metric batch received"
            );
        }
        self.telemetry
            .message_received(&message.envelope.message_id.to_string(), message.origin());
    }
}
