//! Broker connection for the zigbee2mqtt gateway.

use crate::config::MqttConfig;
use log::{debug, error, info, warn};
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, Publish};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

const KEEP_ALIVE: Duration = Duration::from_secs(30);
const REQUEST_CAPACITY: usize = 100;
const RECONNECT_DELAY_MIN: Duration = Duration::from_secs(1);
const RECONNECT_DELAY_MAX: Duration = Duration::from_secs(60);

/// Message received from MQTT broker.
#[derive(Debug, Clone)]
pub struct MqttMessage {
    pub topic: String,
    pub payload: String,
}

impl MqttMessage {
    /// zigbee2mqtt only speaks UTF-8 JSON; anything else is dropped.
    fn from_publish(publish: &Publish) -> Option<Self> {
        match std::str::from_utf8(&publish.payload) {
            Ok(payload) => Some(Self {
                topic: publish.topic.clone(),
                payload: payload.to_string(),
            }),
            Err(e) => {
                warn!(
                    "[MQTT] Invalid UTF-8 in payload on {}: {}",
                    publish.topic, e
                );
                None
            }
        }
    }
}

/// Event loop half of the broker connection.
pub struct BrokerLink {
    event_loop: EventLoop,
    reconnect_delay: Duration,
}

/// Open a broker connection. Nothing is sent until the link is run.
///
/// The session is persistent so the broker keeps our subscriptions across
/// reconnects.
pub fn open(config: &MqttConfig) -> (AsyncClient, BrokerLink) {
    let mut options = MqttOptions::new(&config.client_id, &config.broker_host, config.broker_port);
    options.set_keep_alive(KEEP_ALIVE);
    options.set_clean_session(false);
    if let (Some(username), Some(password)) = (&config.username, &config.password) {
        options.set_credentials(username, password);
    }

    let (client, event_loop) = AsyncClient::new(options, REQUEST_CAPACITY);
    let link = BrokerLink {
        event_loop,
        reconnect_delay: RECONNECT_DELAY_MIN,
    };
    (client, link)
}

impl BrokerLink {
    /// Poll the connection and forward publishes to `tx`.
    ///
    /// `connected` fires on the first ConnAck. Connection errors back off
    /// exponentially up to a minute. Returns once `tx` is closed.
    pub async fn run(
        mut self,
        tx: mpsc::Sender<MqttMessage>,
        mut connected: Option<oneshot::Sender<()>>,
    ) {
        info!("[MQTT] Starting event loop");

        loop {
            let event = match self.event_loop.poll().await {
                Ok(event) => event,
                Err(e) => {
                    error!(
                        "[MQTT] Connection error: {:?}, retrying in {:?}",
                        e, self.reconnect_delay
                    );
                    tokio::time::sleep(self.reconnect_delay).await;
                    self.reconnect_delay = next_delay(self.reconnect_delay);
                    continue;
                }
            };

            match event {
                Event::Incoming(Packet::ConnAck(_)) => {
                    info!("[MQTT] Connected");
                    self.reconnect_delay = RECONNECT_DELAY_MIN;
                    if let Some(signal) = connected.take() {
                        let _ = signal.send(());
                    }
                }
                Event::Incoming(Packet::Publish(publish)) => {
                    let Some(msg) = MqttMessage::from_publish(&publish) else {
                        continue;
                    };
                    debug!("[MQTT] Received on {}: {}", msg.topic, msg.payload);
                    if tx.send(msg).await.is_err() {
                        error!("[MQTT] Message channel closed");
                        return;
                    }
                }
                _ => {}
            }
        }
    }
}

fn next_delay(current: Duration) -> Duration {
    (current * 2).min(RECONNECT_DELAY_MAX)
}
