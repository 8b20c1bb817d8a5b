//! Structured lifecycle events for offline propagation analysis.
//!
//! Each event is one JSON object per line with exactly the fields
//! `event`, `msg_id` (optional), `sender` (optional) and `timestamp_ns`.
//! This stream is separate from `tracing` diagnostics, which go to stderr.

use std::io::{self, Write};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use crate::protocol::PeerId;

/// The observable transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// This node originated a message.
    MessageBroadcast,
    /// This node accepted a message originated elsewhere.
    MessageReceived,
    /// The node stopped.
    Shutdown,
    /// The HTTP trigger endpoint could not be served.
    HttpServerFailed,
}

/// One telemetry record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// What happened.
    pub event: EventKind,
    /// Message the event is about.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg_id: Option<String>,
    /// Originating peer, for receipts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,
    /// Wall-clock nanoseconds since the Unix epoch.
    pub timestamp_ns: i64,
}

impl Event {
    /// Creates an event stamped with the current time.
    #[must_use]
    pub fn new(event: EventKind) -> Self {
        Self {
            event,
            msg_id: None,
            sender: None,
            timestamp_ns: now_ns(),
        }
    }

    /// Sets the message id.
    #[must_use]
    pub fn with_msg_id(mut self, msg_id: impl Into<String>) -> Self {
        self.msg_id = Some(msg_id.into());
        self
    }

    /// Sets the sender.
    #[must_use]
    pub fn with_sender(mut self, sender: PeerId) -> Self {
        self.sender = Some(sender.to_string());
        self
    }
}

fn now_ns() -> i64 {
    Utc::now().timestamp_nanos_opt().unwrap_or(i64::MAX)
}

struct Sink {
    writer: Box<dyn Write + Send>,
    last_ns: i64,
}

/// Writes [`Event`]s as JSON lines.
///
/// Clones share the same writer. Lines appear in `emit` order and their
/// timestamps never decrease. Emitting never fails the caller.
#[derive(Clone)]
pub struct TelemetryLogger {
    sink: Arc<Mutex<Sink>>,
}

impl std::fmt::Debug for TelemetryLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelemetryLogger").finish_non_exhaustive()
    }
}

impl TelemetryLogger {
    /// Logger writing to the process's standard output.
    #[must_use]
    pub fn stdout() -> Self {
        Self::with_writer(io::stdout())
    }

    /// Logger writing to an arbitrary sink.
    #[must_use]
    pub fn with_writer(writer: impl Write + Send + 'static) -> Self {
        Self {
            sink: Arc::new(Mutex::new(Sink {
                writer: Box::new(writer),
                last_ns: i64::MIN,
            })),
        }
    }

    /// Writes one event.
    pub fn emit(&self, mut event: Event) {
        let mut sink = self.sink.lock();
        event.timestamp_ns = event.timestamp_ns.max(sink.last_ns);
        sink.last_ns = event.timestamp_ns;

        let line = match serde_json::to_string(&event) {
            Ok(line) => line,
            Err(e) => {
                error!(error = %e, kind = ?event.event, "failed to serialize telemetry event");
                format!("failed to serialize telemetry event: {e}")
            }
        };
        if let Err(e) = writeln!(sink.writer, "{line}").and_then(|()| sink.writer.flush()) {
            warn!(error = %e, "failed to write telemetry event");
        }
    }

    /// Records that this node originated `msg_id`.
    pub fn message_broadcast(&self, msg_id: &str) {
        self.emit(Event::new(EventKind::MessageBroadcast).with_msg_id(msg_id));
    }

    /// Records receipt of `msg_id` originated by `sender`.
    pub fn message_received(&self, msg_id: &str, sender: PeerId) {
        self.emit(
            Event::new(EventKind::MessageReceived)
                .with_msg_id(msg_id)
                .with_sender(sender),
        );
    }

    /// Records the final shutdown.
    pub fn shutdown(&self) {
        self.emit(Event::new(EventKind::Shutdown));
    }

    /// Records that the trigger endpoint failed.
    pub fn http_server_failed(&self) {
        self.emit(Event::new(EventKind::HttpServerFailed));
    }
}

/// In-memory sink for asserting on emitted events.
#[derive(Debug, Clone, Default)]
pub struct EventCapture {
    buf: Arc<Mutex<Vec<u8>>>,
}

impl EventCapture {
    /// Creates an empty capture.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A logger writing into this capture.
    #[must_use]
    pub fn logger(&self) -> TelemetryLogger {
        TelemetryLogger::with_writer(self.clone())
    }

    /// Raw captured lines.
    #[must_use]
    pub fn lines(&self) -> Vec<String> {
        String::from_utf8_lossy(&self.buf.lock())
            .lines()
            .map(str::to_string)
            .collect()
    }

    /// Captured lines that parse as events.
    #[must_use]
    pub fn events(&self) -> Vec<Event> {
        self.lines()
            .iter()
            .filter_map(|l| serde_json::from_str(l).ok())
            .collect()
    }

    /// Captured events of one kind.
    #[must_use]
    pub fn events_of(&self, kind: EventKind) -> Vec<Event> {
        self.events().into_iter().filter(|e| e.event == kind).collect()
    }
}

impl Write for EventCapture {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buf.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Identity;

    #[test]
    fn line_has_exact_fields() {
        let capture = EventCapture::new();
        let sender = Identity::generate().peer_id();
        capture.logger().message_received("abc", sender);

        let lines = capture.lines();
        assert_eq!(lines.len(), 1);
        let value: serde_json::Value = serde_json::from_str(&lines[0]).unwrap();
        let obj = value.as_object().unwrap();
        let mut keys: Vec<&str> = obj.keys().map(String::as_str).collect();
        keys.sort_unstable();
        assert_eq!(keys, vec!["event", "msg_id", "sender", "timestamp_ns"]);
        assert_eq!(obj["event"], "message_received");
        assert_eq!(obj["msg_id"], "abc");
        assert_eq!(obj["sender"], sender.to_string());
        assert!(obj["timestamp_ns"].as_i64().unwrap() > 0);
    }

    #[test]
    fn optional_fields_are_omitted() {
        let capture = EventCapture::new();
        capture.logger().shutdown();
        let line = &capture.lines()[0];
        assert!(line.starts_with(r#"{"event":"shutdown","timestamp_ns":"#));
    }

    #[test]
    fn broadcast_has_no_sender() {
        let capture = EventCapture::new();
        capture.logger().message_broadcast("xyz");
        let events = capture.events_of(EventKind::MessageBroadcast);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].msg_id.as_deref(), Some("xyz"));
        assert!(events[0].sender.is_none());
    }

    #[test]
    fn timestamps_never_decrease_in_emit_order() {
        let capture = EventCapture::new();
        let logger = capture.logger();

        let late = Event::new(EventKind::MessageBroadcast).with_msg_id("late");
        let mut early = Event::new(EventKind::MessageBroadcast).with_msg_id("early");
        early.timestamp_ns = 1;
        logger.emit(late);
        logger.emit(early);

        let events = capture.events();
        assert_eq!(events[1].msg_id.as_deref(), Some("early"));
        assert!(events[1].timestamp_ns >= events[0].timestamp_ns);
    }

    #[test]
    fn concurrent_emitters_produce_whole_lines() {
        let capture = EventCapture::new();
        let logger = capture.logger();
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let logger = logger.clone();
                std::thread::spawn(move || {
                    for j in 0..50 {
                        logger.message_broadcast(&format!("{i}-{j}"));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let events = capture.events();
        assert_eq!(events.len(), 400);
        assert_eq!(capture.lines().len(), 400);
        assert!(events.windows(2).all(|w| w[0].timestamp_ns <= w[1].timestamp_ns));
    }

    #[derive(Debug)]
    struct Broken;

    impl Write for Broken {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::other("closed"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn write_failure_does_not_panic() {
        let logger = TelemetryLogger::with_writer(Broken);
        logger.shutdown();
        logger.http_server_failed();
    }
}
