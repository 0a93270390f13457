//! zigbee2mqtt device gateway.
//!
//! Talks to the ZigBee mesh through the zigbee2mqtt bridge API: bind and
//! configure_reporting requests, `get` reads, and device state messages
//! translated back into raw attribute events.

mod client;
mod zigbee2mqtt;

pub use client::{BrokerLink, MqttMessage, open};
pub use zigbee2mqtt::Zigbee2MqttGateway;
