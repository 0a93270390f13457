//! Device gateway abstraction.
//!
//! The sync engine never talks to the mesh directly. Everything it needs from
//! the device side goes through [`DeviceGateway`], and attribute changes flow
//! back as [`AttributeEvent`]s on an mpsc queue drained by the
//! [`NotificationDispatcher`](crate::sync::NotificationDispatcher).

#[cfg(test)]
pub mod mock;
pub mod mqtt;

use crate::error::Result;
use crate::zcl::{AttributeKey, RawValue};
use async_trait::async_trait;
use std::time::Duration;

pub use mqtt::Zigbee2MqttGateway;

/// Outcome of a bind or configure-reporting command that reached the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandResult {
    Success,
    Failure { status: String },
}

/// Raw attribute change pushed by the gateway.
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeEvent {
    pub key: AttributeKey,
    pub value: RawValue,
}

/// Commands the sync engine needs from the device side.
///
/// `Err` results mean the command never produced a device answer (transport
/// fault, unsupported feature, closed gateway). A device that answered with a
/// failure status yields `Ok(CommandResult::Failure { .. })`.
#[async_trait]
pub trait DeviceGateway: Send + Sync {
    /// Check that the cluster/attribute exists on the device.
    async fn resolve(&self, key: &AttributeKey) -> Result<()>;

    /// Bind the device cluster to the coordinator.
    async fn bind(&self, key: &AttributeKey) -> Result<CommandResult>;

    /// Configure attribute reporting.
    async fn set_reporting(
        &self,
        key: &AttributeKey,
        min_interval: u16,
        max_interval: u16,
        reportable_change: Option<f64>,
    ) -> Result<CommandResult>;

    /// Read the attribute.
    ///
    /// Gateways that deliver the answer asynchronously as an
    /// [`AttributeEvent`] return `Ok(None)`.
    async fn read_attribute(
        &self,
        key: &AttributeKey,
        cache_max_age: Duration,
    ) -> Result<Option<RawValue>>;

    /// Start forwarding change events for the attribute.
    async fn add_attribute_listener(&self, key: &AttributeKey) -> Result<()>;

    /// Stop forwarding change events for the attribute.
    async fn remove_attribute_listener(&self, key: &AttributeKey);
}
