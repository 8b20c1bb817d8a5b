//! Node runtime: one peer's subscription loops, the periodic metric
//! generation loop and the broadcast trigger.
//!
//! States move strictly forward: `Starting → Running → ShuttingDown →
//! Stopped`. A single [`CancellationToken`] stops every task.

mod handlers;

pub use handlers::{BroadcastHandler, MetricsHandler};

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::task::JoinSet;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bootstrap::{self, BootstrapReport};
use crate::error::P2pError;
use crate::gossip::{BROADCAST_TOPIC, BroadcastMessage, GossipEngine, METRICS_TOPIC, MessageId};
use crate::metrics::{self, MetricGenerator};
use crate::protocol::PeerId;
use crate::stats::NodeStats;
use crate::telemetry::TelemetryLogger;
use crate::transport::PubSub;
use crate::validator::{BroadcastValidator, MetricsValidator};

/// Lifecycle state of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    /// Joining topics and arming the subscription loops.
    Starting,
    /// Serving inbound traffic, generation and broadcasts.
    Running,
    /// Shutdown signalled; no new work starts.
    ShuttingDown,
    /// Transport closed and the final event emitted.
    Stopped,
}

impl NodeState {
    /// Returns true if the node accepts new broadcasts.
    #[must_use]
    pub const fn can_process(&self) -> bool {
        matches!(self, Self::Running)
    }

    /// Returns true if the node is active (not stopped/shutting down).
    #[must_use]
    pub const fn is_active(&self) -> bool {
        !matches!(self, Self::ShuttingDown | Self::Stopped)
    }
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Starting => "starting",
            Self::Running => "running",
            Self::ShuttingDown => "shutting_down",
            Self::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Runtime settings.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Hostname stamped on generated metric batches.
    pub hostname: String,
    /// Generation period; `None` disables the loop.
    pub metrics_interval: Option<Duration>,
    /// Seed for the metric generator.
    pub seed: Option<u64>,
    /// Validator gating the metrics topic.
    pub metrics_validator: MetricsValidator,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            hostname: "localhost".to_string(),
            metrics_interval: None,
            seed: None,
            metrics_validator: MetricsValidator::new(),
        }
    }
}

impl RuntimeConfig {
    /// Sets the hostname.
    #[must_use]
    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = hostname.into();
        self
    }

    /// Sets the generation period. Zero disables generation.
    #[must_use]
    pub fn with_metrics_interval(mut self, interval: Duration) -> Self {
        self.metrics_interval = (!interval.is_zero()).then_some(interval);
        self
    }

    /// Seeds the metric generator.
    #[must_use]
    pub const fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}

/// Reply to a broadcast trigger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BroadcastAck {
    /// The id carried by the published message.
    pub msg_id: String,
}

impl fmt::Display for BroadcastAck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Broadcast message with ID: {}", self.msg_id)
    }
}

/// One running peer.
pub struct NodeRuntime {
    engine: Arc<GossipEngine>,
    telemetry: TelemetryLogger,
    state: RwLock<NodeState>,
    cancel: CancellationToken,
    tasks: Mutex<JoinSet<()>>,
}

impl fmt::Debug for NodeRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeRuntime")
            .field("peer_id", &self.engine.local_peer_id())
            .field("state", &*self.state.read())
            .finish_non_exhaustive()
    }
}

impl NodeRuntime {
    /// Joins the broadcast and metrics topics, arms their subscription
    /// loops and, if configured, starts metric generation.
    ///
    /// # Errors
    ///
    /// Fails if the substrate refuses a topic.
    pub async fn start(
        transport: Arc<dyn PubSub>,
        telemetry: TelemetryLogger,
        config: RuntimeConfig,
    ) -> Result<Self, P2pError> {
        let engine = Arc::new(GossipEngine::new(transport, NodeStats::new()));
        let runtime = Self {
            engine: Arc::clone(&engine),
            telemetry: telemetry.clone(),
            state: RwLock::new(NodeState::Starting),
            cancel: CancellationToken::new(),
            tasks: Mutex::new(JoinSet::new()),
        };

        let broadcast_sub = engine.join(
            BROADCAST_TOPIC,
            Arc::new(BroadcastValidator),
            Arc::new(BroadcastHandler::new(telemetry.clone())),
        )?;
        let metrics_sub = engine.join(
            METRICS_TOPIC,
            Arc::new(config.metrics_validator.clone()),
            Arc::new(MetricsHandler::new(telemetry.clone())),
        )?;

        {
            let mut tasks = runtime.tasks.lock();
            for sub in [broadcast_sub, metrics_sub] {
                let engine = Arc::clone(&engine);
                let cancel = runtime.cancel.clone();
                tasks.spawn(async move {
                    engine.run_subscription(sub, cancel).await;
                });
            }
        }
        runtime.set_state(NodeState::Running);

        if let Some(period) = config.metrics_interval {
            let generator = match config.seed {
                Some(seed) => MetricGenerator::with_seed(config.hostname.clone(), seed),
                None => MetricGenerator::new(config.hostname.clone()),
            };
            runtime.tasks.lock().spawn(generation_loop(
                Arc::clone(&engine),
                telemetry,
                generator,
                period,
                runtime.cancel.clone(),
            ));
        }

        info!(
            peer_id = %engine.local_peer_id(),
            metrics_interval = ?config.metrics_interval,
            "node running"
        );
        Ok(runtime)
    }

    /// Dials each bootstrap address once.
    pub async fn bootstrap<S: AsRef<str> + Sync>(&self, addrs: &[S]) -> BootstrapReport {
        bootstrap::connect_all(&**self.engine.transport(), addrs, self.engine.stats()).await
    }

    /// Originates a broadcast under a fresh id.
    ///
    /// The `message_broadcast` event is written before the publish is
    /// attempted. A publish failure is logged and the ack still returned.
    ///
    /// # Errors
    ///
    /// Returns [`P2pError::NotRunning`] outside the `Running` state.
    pub async fn broadcast(&self) -> Result<BroadcastAck, P2pError> {
        let id = MessageId::new();
        self.originate(id, BroadcastMessage::new(id.to_string())).await
    }

    /// Originates a broadcast carrying a caller-chosen `msg_id`.
    ///
    /// # Errors
    ///
    /// Returns [`P2pError::NotRunning`] outside the `Running` state and
    /// [`P2pError::Publish`] for an empty `msg_id`.
    pub async fn broadcast_message(
        &self,
        message: BroadcastMessage,
    ) -> Result<BroadcastAck, P2pError> {
        if message.msg_id.is_empty() {
            return Err(P2pError::Publish("broadcast msg_id is empty".to_string()));
        }
        self.originate(MessageId::new(), message).await
    }

    async fn originate(
        &self,
        id: MessageId,
        message: BroadcastMessage,
    ) -> Result<BroadcastAck, P2pError> {
        let state = self.state();
        if !state.can_process() {
            return Err(P2pError::NotRunning { state });
        }

        let payload = message.to_bytes()?;
        self.telemetry.message_broadcast(&message.msg_id);
        if let Err(e) = self
            .engine
            .publish_with_id(BROADCAST_TOPIC, id, payload)
            .await
        {
            warn!(msg_id = %message.msg_id, error = %e, "failed to publish broadcast");
        }
        Ok(BroadcastAck {
            msg_id: message.msg_id,
        })
    }

    /// Cancels every task, waits for them, closes the transport and emits
    /// the final `shutdown` event. Later calls do nothing.
    pub async fn shutdown(&self) {
        {
            let mut state = self.state.write();
            if !state.is_active() {
                return;
            }
            *state = NodeState::ShuttingDown;
        }
        info!(peer_id = %self.engine.local_peer_id(), "shutting down");

        self.cancel.cancel();
        let mut tasks = std::mem::take(&mut *self.tasks.lock());
        while let Some(res) = tasks.join_next().await {
            if let Err(e) = res {
                warn!(error = %e, "task ended abnormally");
            }
        }

        self.engine.transport().close();
        self.set_state(NodeState::Stopped);
        self.telemetry.shutdown();
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> NodeState {
        *self.state.read()
    }

    fn set_state(&self, state: NodeState) {
        debug!(%state, "state change");
        *self.state.write() = state;
    }

    /// This node's identifier.
    #[must_use]
    pub fn local_peer_id(&self) -> PeerId {
        self.engine.local_peer_id()
    }

    /// Addresses peers can dial.
    #[must_use]
    pub fn listen_addrs(&self) -> Vec<String> {
        self.engine.transport().listen_addrs()
    }

    /// The gossip engine.
    #[must_use]
    pub const fn engine(&self) -> &Arc<GossipEngine> {
        &self.engine
    }

    /// Node counters.
    #[must_use]
    pub fn stats(&self) -> &NodeStats {
        self.engine.stats()
    }

    /// The telemetry logger.
    #[must_use]
    pub const fn telemetry(&self) -> &TelemetryLogger {
        &self.telemetry
    }
}

async fn generation_loop(
    engine: Arc<GossipEngine>,
    telemetry: TelemetryLogger,
    mut generator: MetricGenerator,
    period: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                debug!("metric generation stopped");
                return;
            }
            _ = ticker.tick() => {}
        }

        let batch = generator.next_batch();
        let payload = metrics::encode(&batch);
        // the substrate would refuse it anyway; skip before logging a broadcast
        if !engine.validate(METRICS_TOPIC, &payload).is_accept() {
            warn!(hostname = batch.hostname(), "generated batch refused by local validator");
            continue;
        }

        let id = MessageId::new();
        telemetry.message_broadcast(&id.to_string());
        if let Err(e) = engine.publish_with_id(METRICS_TOPIC, id, payload).await {
            warn!(error = %e, "failed to publish metric batch");
        }
    }
}
