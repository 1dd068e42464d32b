//! Relay engine and service wiring.
//!
//! Inbound packets flow transport → loop guard → [`ReplayBuffer`]. A poller
//! task checks the buffer every [`POLL_INTERVAL`] and hands expired batches
//! to the [`ReplayAction`], which publishes through the transport.

use anyhow::Result;
use bytes::Bytes;
use fmo_header::FmoHeader;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::buffer::{ReplayBuffer, Tick};
use crate::config::RelayConfig;
use crate::guard::should_accept;
use crate::metrics::RelayMetrics;
use crate::replay::{ReplayAction, ReplaySettings, ReplayStats};
use crate::transport::Publisher;
use crate::transport::mqtt::MqttTransport;

/// How often the buffer is checked for an elapsed quiet period.
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Capacity of the channel between the transport event loop and the engine.
const INBOUND_CAPACITY: usize = 1024;

/// How long shutdown lets an in-flight replay batch finish before the
/// transport is closed under it.
const REPLAY_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// What happened to one inbound packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Inbound {
    Buffered { queued: usize },
    /// Carries the relay's own UID.
    Looped,
    Malformed,
}

pub struct RelayEngine<P> {
    buffer: ReplayBuffer,
    replay: ReplayAction<P>,
    quiet_period: Duration,
    metrics: Arc<RelayMetrics>,
}

impl<P: Publisher> RelayEngine<P> {
    pub fn new(
        publisher: Arc<P>,
        settings: ReplaySettings,
        quiet_period: Duration,
        metrics: Arc<RelayMetrics>,
    ) -> Self {
        Self {
            buffer: ReplayBuffer::new(),
            replay: ReplayAction::new(publisher, settings),
            quiet_period,
            metrics,
        }
    }

    pub fn buffer(&self) -> &ReplayBuffer {
        &self.buffer
    }

    /// Handle one message delivered by the transport.
    pub async fn on_packet(&self, raw: Bytes) -> Inbound {
        self.metrics.packet_received();

        let header = match FmoHeader::from_bytes(&raw) {
            Ok(header) => header,
            Err(e) => {
                self.metrics.packet_malformed();
                warn!(len = raw.len(), error = %e, "dropping malformed packet");
                return Inbound::Malformed;
            }
        };

        if !should_accept(&header, self.replay.settings().relay_uid) {
            self.metrics.packet_looped();
            debug!(
                uid = header.uid,
                callsign = %header.callsign,
                "ignoring own replayed packet"
            );
            return Inbound::Looped;
        }

        let len = raw.len();
        let queued = self.buffer.accept(raw).await;
        self.metrics.packet_buffered();
        debug!(
            queued,
            uid = header.uid,
            callsign = %header.callsign,
            len,
            "buffered packet"
        );
        Inbound::Buffered { queued }
    }

    /// Run one timeout check as of `now`, replaying the batch if it expired.
    ///
    /// The buffer lock is released before any publish, so inbound packets are
    /// accepted while a batch is being replayed.
    pub async fn tick(&self, now: Instant) -> Option<ReplayStats> {
        match self.buffer.check_timeout(now, self.quiet_period).await {
            Tick::Expired { elapsed, batch } if !batch.is_empty() => {
                info!(
                    elapsed_ms = elapsed.as_millis() as u64,
                    packets = batch.len(),
                    "quiet period elapsed, replaying"
                );
                let stats = self.replay.replay(&batch).await;
                self.metrics.batch_replayed(&stats);
                Some(stats)
            }
            Tick::Expired { .. } => {
                debug!("quiet period elapsed with empty buffer");
                None
            }
            Tick::Idle | Tick::Waiting { .. } => None,
        }
    }

    /// Poll the buffer until `cancel` fires. A check that has started always
    /// runs to completion, including its replay batch.
    pub async fn run_poller(self: Arc<Self>, period: Duration, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    self.tick(Instant::now()).await;
                }
            }
        }
        debug!("timeout poller stopped");
    }

    /// Discard whatever is still buffered. Returns how many packets were lost.
    pub async fn shutdown(&self) -> usize {
        let pending = self.buffer.drain().await.len();
        if pending > 0 {
            info!(pending, "discarding packets that were never replayed");
        }
        pending
    }
}

/// Connect to the broker and relay until `cancel` fires.
pub async fn run(config: &RelayConfig, cancel: CancellationToken) -> Result<()> {
    let metrics = Arc::new(RelayMetrics::new());
    let (inbound_tx, mut inbound_rx) = mpsc::channel::<Bytes>(INBOUND_CAPACITY);

    let transport = MqttTransport::connect(&config.mqtt, inbound_tx).await?;

    let engine = Arc::new(RelayEngine::new(
        transport.publisher(),
        config.replay.clone(),
        config.quiet_period,
        Arc::clone(&metrics),
    ));

    info!(
        quiet_period_ms = config.quiet_period.as_millis() as u64,
        subscribe = %config.mqtt.subscribe_topic,
        publish = %config.replay.publish_topic,
        relay_uid = config.replay.relay_uid,
        "FMO relay started"
    );

    let poller = tokio::spawn(Arc::clone(&engine).run_poller(POLL_INTERVAL, cancel.clone()));

    let receiver = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move {
            while let Some(raw) = inbound_rx.recv().await {
                engine.on_packet(raw).await;
            }
        })
    };

    cancel.cancelled().await;
    info!("stopping FMO relay");

    let mut poller = poller;
    let drained = tokio::time::timeout(REPLAY_DRAIN_TIMEOUT, &mut poller).await;
    if drained.is_err() {
        warn!("replay still in progress, closing transport");
    }

    // Dropping the event loop closes the inbound channel and ends the receiver.
    // Any publish still waiting on the transport fails and the poller exits.
    transport.shutdown().await;
    let poller_result = match drained {
        Ok(result) => result,
        Err(_) => poller.await,
    };
    if let Err(e) = poller_result {
        warn!("timeout poller ended abnormally: {}", e);
    }
    if let Err(e) = receiver.await {
        warn!("inbound receiver ended abnormally: {}", e);
    }

    engine.shutdown().await;

    let snapshot = metrics.snapshot();
    info!(
        uptime_secs = snapshot.uptime_secs,
        received = snapshot.inbound.received,
        looped = snapshot.inbound.looped,
        malformed = snapshot.inbound.malformed,
        buffered = snapshot.inbound.buffered,
        batches = snapshot.replay.batches,
        replayed = snapshot.replay.replayed,
        failures = snapshot.replay.failures,
        "FMO relay stopped"
    );
    Ok(())
}
