//! Destinations for channel state updates.
//!
//! A sync engine publishes every new, distinct reading through a
//! [`ChannelSink`]. Sinks run on the notifying task after the engine has
//! released its state lock, so they should return quickly but may read
//! engine state.

use crate::sync::DecodedValue;
use log::{info, warn};
use rumqttc::{AsyncClient, QoS};
use tokio::sync::mpsc;

pub trait ChannelSink: Send + Sync {
    fn publish(&self, channel: &str, value: &DecodedValue);
}

/// Logs channel updates.
pub struct LogSink;

impl ChannelSink for LogSink {
    fn publish(&self, channel: &str, value: &DecodedValue) {
        info!("[Channel] {} = {}", channel, value);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChannelUpdate {
    pub channel: String,
    pub value: DecodedValue,
}

/// Forwards channel updates into an unbounded queue.
pub struct QueueSink {
    tx: mpsc::UnboundedSender<ChannelUpdate>,
}

impl QueueSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ChannelUpdate>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl ChannelSink for QueueSink {
    fn publish(&self, channel: &str, value: &DecodedValue) {
        let update = ChannelUpdate {
            channel: channel.to_string(),
            value: value.clone(),
        };
        if self.tx.send(update).is_err() {
            warn!("[Channel] Update queue closed, dropping {} update", channel);
        }
    }
}

/// Publishes channel updates as retained JSON to `<base>/<channel>`.
pub struct MqttSink {
    client: AsyncClient,
    base_topic: String,
}

impl MqttSink {
    pub fn new(client: AsyncClient, base_topic: impl Into<String>) -> Self {
        Self {
            client,
            base_topic: base_topic.into(),
        }
    }

    pub fn topic(&self, channel: &str) -> String {
        format!("{}/{}", self.base_topic, channel)
    }
}

impl ChannelSink for MqttSink {
    fn publish(&self, channel: &str, value: &DecodedValue) {
        let payload = match serde_json::to_vec(value) {
            Ok(p) => p,
            Err(e) => {
                warn!("[Channel] Failed to serialize {} update: {}", channel, e);
                return;
            }
        };
        // Sinks are synchronous; try_publish queues without awaiting
        if let Err(e) = self
            .client
            .try_publish(self.topic(channel), QoS::AtLeastOnce, true, payload)
        {
            warn!("[Channel] Failed to publish {} update: {:?}", channel, e);
        }
    }
}
