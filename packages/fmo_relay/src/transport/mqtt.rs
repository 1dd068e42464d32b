//! MQTT transport built on rumqttc.
//!
//! The event loop runs on its own task. It (re)subscribes after every
//! successful CONNACK, so a broker reconnect restores the subscription, and
//! forwards each incoming PUBLISH payload to the inbound channel in receipt
//! order.

use anyhow::{Context, Result, bail};
use bytes::Bytes;
use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{PublishError, Publisher};

/// How long startup waits for the first successful CONNACK.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Pause between reconnect attempts after a connection error.
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// How long shutdown waits for the DISCONNECT to be flushed.
const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Capacity of rumqttc's request channel. Publishers wait when it is full.
const REQUEST_CAPACITY: usize = 256;

/// Resolved broker connection settings.
#[derive(Clone, Debug)]
pub struct MqttSettings {
    pub broker: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub client_id_prefix: String,
    pub keepalive: Duration,
    pub subscribe_topic: String,
}

impl MqttSettings {
    /// `<prefix>_<n>` with a random `n` so several relays can share a broker.
    pub fn client_id(&self) -> String {
        format!(
            "{}_{}",
            self.client_id_prefix,
            rand::random_range(0..=10_000u32)
        )
    }

    fn options(&self) -> MqttOptions {
        let mut options = MqttOptions::new(self.client_id(), &self.broker, self.port);
        options.set_keep_alive(self.keepalive);
        if !self.username.is_empty() {
            options.set_credentials(&self.username, &self.password);
        }
        options
    }
}

/// Outbound half handed to the relay core.
pub struct MqttPublisher {
    client: AsyncClient,
}

impl Publisher for MqttPublisher {
    /// Waits for room in the request channel when it is full. Fails only once
    /// the event loop is gone.
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), PublishError> {
        self.client
            .publish_bytes(topic, QoS::AtMostOnce, false, payload)
            .await
            .map_err(|_| PublishError::Closed)
    }
}

pub struct MqttTransport {
    client: AsyncClient,
    publisher: Arc<MqttPublisher>,
    cancel: CancellationToken,
    event_loop: JoinHandle<()>,
}

impl MqttTransport {
    /// Connect to the broker and start the event loop.
    ///
    /// Fails if no successful CONNACK arrives within ten seconds.
    pub async fn connect(settings: &MqttSettings, inbound: mpsc::Sender<Bytes>) -> Result<Self> {
        let options = settings.options();
        info!(
            broker = %settings.broker,
            port = settings.port,
            client_id = %options.client_id(),
            "connecting to MQTT broker"
        );

        let (client, eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);
        let (connected_tx, mut connected_rx) = watch::channel(false);
        let cancel = CancellationToken::new();

        let event_loop = tokio::spawn(run_event_loop(
            eventloop,
            client.clone(),
            settings.subscribe_topic.clone(),
            inbound,
            connected_tx,
            cancel.clone(),
        ));

        match tokio::time::timeout(CONNECT_TIMEOUT, connected_rx.wait_for(|up| *up)).await {
            Ok(Ok(_)) => {}
            Ok(Err(_)) => {
                cancel.cancel();
                bail!("MQTT event loop exited before connecting");
            }
            Err(_) => {
                cancel.cancel();
                let _ = event_loop.await;
                bail!(
                    "timed out connecting to MQTT broker {}:{}",
                    settings.broker,
                    settings.port
                );
            }
        }

        Ok(Self {
            publisher: Arc::new(MqttPublisher {
                client: client.clone(),
            }),
            client,
            cancel,
            event_loop,
        })
    }

    pub fn publisher(&self) -> Arc<MqttPublisher> {
        Arc::clone(&self.publisher)
    }

    /// Send DISCONNECT, give the event loop a moment to flush it, then stop.
    pub async fn shutdown(self) {
        if let Err(e) = self.client.try_disconnect() {
            debug!("disconnect request not queued: {}", e);
        }

        let mut event_loop = self.event_loop;
        match tokio::time::timeout(DISCONNECT_TIMEOUT, &mut event_loop).await {
            Ok(result) => {
                if let Err(e) = result {
                    warn!("MQTT event loop ended abnormally: {}", e);
                }
            }
            Err(_) => {
                self.cancel.cancel();
                let _ = event_loop.await;
            }
        }
        info!("disconnected from MQTT broker");
    }
}

async fn run_event_loop(
    mut eventloop: EventLoop,
    client: AsyncClient,
    subscribe_topic: String,
    inbound: mpsc::Sender<Bytes>,
    connected: watch::Sender<bool>,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            event = eventloop.poll() => event,
        };

        match event {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                if ack.code != ConnectReturnCode::Success {
                    error!(code = ?ack.code, "MQTT broker refused connection");
                    connected.send_replace(false);
                    continue;
                }
                info!("connected to MQTT broker");
                connected.send_replace(true);

                match client.try_subscribe(subscribe_topic.as_str(), QoS::AtMostOnce) {
                    Ok(()) => info!(topic = %subscribe_topic, "subscribing"),
                    Err(e) => error!(topic = %subscribe_topic, "failed to subscribe: {}", e),
                }
            }
            Ok(Event::Incoming(Packet::SubAck(ack))) => {
                debug!(codes = ?ack.return_codes, "subscription acknowledged");
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                if inbound.send(publish.payload).await.is_err() {
                    debug!("inbound channel closed, stopping event loop");
                    break;
                }
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                warn!("MQTT broker closed the connection");
                connected.send_replace(false);
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                debug!("disconnect sent");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                connected.send_replace(false);
                warn!("MQTT connection error: {}; retrying", e);
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(RECONNECT_DELAY) => {}
                }
            }
        }
    }
}
