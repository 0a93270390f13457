//! [`DeviceGateway`] implementation on top of the zigbee2mqtt bridge API.
//!
//! Requests go to `<base>/bridge/request/device/<op>` carrying a transaction
//! id; answers on `<base>/bridge/response/device/<op>` are matched back to the
//! waiting caller. Device state messages on `<base>/<friendly_name>` are
//! emitted as [`AttributeEvent`]s: fixed-scale properties are turned back
//! into raw ZCL integers, while properties zigbee2mqtt already converted
//! with device-specific scaling (voltage) are forwarded as floats.
//!
//! zigbee2mqtt flattens endpoints into a single state object, so reports are
//! routed per device and cluster property, not per endpoint.

use super::client::{self, MqttMessage};
use crate::config::{MqttConfig, Zigbee2MqttConfig};
use crate::error::{Result, SyncError};
use crate::gateway::{AttributeEvent, CommandResult, DeviceGateway};
use crate::zcl::{AttributeKey, KnownAttribute, RawValue, known_attribute};
use async_trait::async_trait;
use log::{debug, info, trace, warn};
use parking_lot::{Mutex, RwLock};
use rumqttc::{AsyncClient, QoS};
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use uuid::Uuid;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const EVENT_QUEUE_DEPTH: usize = 256;

#[derive(Debug, Clone, Deserialize)]
struct DeviceInfo {
    ieee_address: String,
    friendly_name: String,
    #[serde(default)]
    endpoints: HashMap<String, EndpointInfo>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct EndpointInfo {
    #[serde(default)]
    clusters: EndpointClusters,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct EndpointClusters {
    #[serde(default)]
    input: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct BridgeResponse {
    status: String,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    transaction: Option<String>,
}

impl BridgeResponse {
    fn into_result(self) -> CommandResult {
        if self.status == "ok" {
            CommandResult::Success
        } else {
            CommandResult::Failure {
                status: self.error.unwrap_or(self.status),
            }
        }
    }
}

pub struct Zigbee2MqttGateway {
    client: AsyncClient,
    base_topic: String,
    coordinator: String,
    response_timeout: Duration,
    /// Known devices keyed by IEEE address
    devices: RwLock<HashMap<String, DeviceInfo>>,
    devices_loaded: watch::Sender<bool>,
    pending: Mutex<HashMap<String, oneshot::Sender<CommandResult>>>,
    /// Attribute listeners keyed by friendly name
    listeners: RwLock<HashMap<String, Vec<AttributeKey>>>,
    events: mpsc::Sender<AttributeEvent>,
    closed: AtomicBool,
}

impl Zigbee2MqttGateway {
    pub fn new(
        client: AsyncClient,
        config: &Zigbee2MqttConfig,
        events: mpsc::Sender<AttributeEvent>,
    ) -> Self {
        let (devices_loaded, _) = watch::channel(false);
        Self {
            client,
            base_topic: config.base_topic.clone(),
            coordinator: config.coordinator.clone(),
            response_timeout: Duration::from_secs(config.response_timeout_secs),
            devices: RwLock::new(HashMap::new()),
            devices_loaded,
            pending: Mutex::new(HashMap::new()),
            listeners: RwLock::new(HashMap::new()),
            events,
            closed: AtomicBool::new(false),
        }
    }

    /// Connect to the broker and start routing bridge traffic.
    ///
    /// Returns the gateway, the attribute event queue for the dispatcher and
    /// the router task handle.
    pub async fn connect(
        mqtt: &MqttConfig,
        config: &Zigbee2MqttConfig,
    ) -> Result<(
        Arc<Self>,
        mpsc::Receiver<AttributeEvent>,
        JoinHandle<()>,
    )> {
        info!(
            "[MQTT] Connecting to {}:{}",
            mqtt.broker_host, mqtt.broker_port
        );

        let (mqtt_client, link) = client::open(mqtt);
        let (event_tx, event_rx) = mpsc::channel(EVENT_QUEUE_DEPTH);
        let gateway = Arc::new(Self::new(mqtt_client, config, event_tx));

        let (msg_tx, mut msg_rx) = mpsc::channel::<MqttMessage>(64);
        let (connected_tx, connected_rx) = oneshot::channel();
        let mqtt_loop = tokio::spawn(link.run(msg_tx, Some(connected_tx)));

        match tokio::time::timeout(CONNECT_TIMEOUT, connected_rx).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => {
                mqtt_loop.abort();
                return Err(SyncError::GatewayClosed);
            }
            Err(_) => {
                mqtt_loop.abort();
                return Err(SyncError::Transport(format!(
                    "no connection to broker after {:?}",
                    CONNECT_TIMEOUT
                )));
            }
        }

        gateway.subscribe_bridge_topics().await?;

        let router = gateway.clone();
        let task = tokio::spawn(async move {
            while let Some(msg) = msg_rx.recv().await {
                router.handle_message(&msg.topic, &msg.payload).await;
            }
            mqtt_loop.abort();
            router.close();
        });

        Ok((gateway, event_rx, task))
    }

    /// Underlying MQTT client, e.g. for publishing channel state.
    pub fn client(&self) -> AsyncClient {
        self.client.clone()
    }

    async fn subscribe_bridge_topics(&self) -> Result<()> {
        for topic in [
            format!("{}/bridge/devices", self.base_topic),
            format!("{}/bridge/response/device/+", self.base_topic),
        ] {
            self.client.subscribe(&topic, QoS::AtLeastOnce).await?;
            debug!("[MQTT] Subscribed to {}", topic);
        }
        Ok(())
    }

    /// Fail all waiting requests and refuse new ones.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            // Dropping the senders wakes every waiter with GatewayClosed
            self.pending.lock().clear();
            info!("[MQTT] Gateway closed");
        }
    }

    /// Route one message from the broker.
    pub async fn handle_message(&self, topic: &str, payload: &str) {
        let Some(rest) = topic
            .strip_prefix(self.base_topic.as_str())
            .and_then(|t| t.strip_prefix('/'))
        else {
            return;
        };

        if rest == "bridge/devices" {
            self.handle_devices(payload);
        } else if rest.starts_with("bridge/response/device/") {
            self.handle_response(payload);
        } else if !rest.starts_with("bridge/") {
            self.handle_state(rest, payload).await;
        }
    }

    fn handle_devices(&self, payload: &str) {
        match serde_json::from_str::<Vec<DeviceInfo>>(payload) {
            Ok(devices) => {
                info!("[MQTT] Device list updated ({} devices)", devices.len());
                *self.devices.write() = devices
                    .into_iter()
                    .map(|d| (d.ieee_address.clone(), d))
                    .collect();
                self.devices_loaded.send_replace(true);
            }
            Err(e) => warn!("[MQTT] Failed to parse device list: {}", e),
        }
    }

    fn handle_response(&self, payload: &str) {
        let response = match serde_json::from_str::<BridgeResponse>(payload) {
            Ok(r) => r,
            Err(e) => {
                warn!("[MQTT] Failed to parse bridge response: {}", e);
                return;
            }
        };
        let Some(transaction) = response.transaction.clone() else {
            trace!("[MQTT] Bridge response without transaction");
            return;
        };
        if let Some(waiter) = self.pending.lock().remove(&transaction) {
            let _ = waiter.send(response.into_result());
        }
    }

    async fn handle_state(&self, friendly_name: &str, payload: &str) {
        let keys = match self.listeners.read().get(friendly_name) {
            Some(keys) => keys.clone(),
            None => return,
        };

        let state = match serde_json::from_str::<serde_json::Map<String, Value>>(payload) {
            Ok(s) => s,
            Err(e) => {
                warn!("[MQTT] Failed to parse {} state: {}", friendly_name, e);
                return;
            }
        };

        for key in keys {
            let Some(attribute) = known_attribute(key.cluster, key.attribute) else {
                continue;
            };
            let Some(value) = state
                .get(attribute.property)
                .and_then(|v| RawValue::from_property(v, attribute))
            else {
                continue;
            };
            if self
                .events
                .send(AttributeEvent { key, value })
                .await
                .is_err()
            {
                warn!("[MQTT] Attribute event queue closed");
                return;
            }
        }
    }

    fn friendly_name(&self, key: &AttributeKey) -> Result<String> {
        self.devices
            .read()
            .get(&key.device)
            .map(|d| d.friendly_name.clone())
            .ok_or_else(|| SyncError::AttributeNotFound(key.to_string()))
    }

    fn attribute(&self, key: &AttributeKey) -> Result<&'static KnownAttribute> {
        known_attribute(key.cluster, key.attribute)
            .ok_or_else(|| SyncError::Unsupported(format!("attribute {}", key)))
    }

    async fn request(&self, operation: &str, mut payload: Value) -> Result<CommandResult> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SyncError::GatewayClosed);
        }

        let transaction = Uuid::new_v4().to_string();
        payload["transaction"] = Value::String(transaction.clone());

        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(transaction.clone(), tx);

        let topic = format!("{}/bridge/request/device/{}", self.base_topic, operation);
        debug!("[MQTT] {} -> {}", topic, payload);
        if let Err(e) = self
            .client
            .publish(&topic, QoS::AtLeastOnce, false, payload.to_string())
            .await
        {
            self.pending.lock().remove(&transaction);
            return Err(SyncError::Transport(format!("{} publish failed: {}", operation, e)));
        }

        let outcome = tokio::time::timeout(self.response_timeout, rx).await;
        self.pending.lock().remove(&transaction);
        match outcome {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(_)) => Err(SyncError::GatewayClosed),
            Err(_) => Err(SyncError::Timeout(self.response_timeout)),
        }
    }

    #[cfg(test)]
    fn pending_transactions(&self) -> Vec<String> {
        self.pending.lock().keys().cloned().collect()
    }
}

#[async_trait]
impl DeviceGateway for Zigbee2MqttGateway {
    async fn resolve(&self, key: &AttributeKey) -> Result<()> {
        let mut loaded = self.devices_loaded.subscribe();
        if tokio::time::timeout(self.response_timeout, loaded.wait_for(|l| *l))
            .await
            .is_err()
        {
            warn!("[MQTT] Device list not received yet");
        }

        let devices = self.devices.read();
        let not_found = || SyncError::AttributeNotFound(key.to_string());
        let device = devices.get(&key.device).ok_or_else(not_found)?;
        let endpoint = device
            .endpoints
            .get(&key.endpoint.to_string())
            .ok_or_else(not_found)?;
        if !endpoint
            .clusters
            .input
            .iter()
            .any(|c| c == key.cluster.z2m_name())
        {
            return Err(not_found());
        }
        known_attribute(key.cluster, key.attribute).ok_or_else(not_found)?;
        Ok(())
    }

    async fn bind(&self, key: &AttributeKey) -> Result<CommandResult> {
        self.request(
            "bind",
            json!({
                "from": key.endpoint_address(),
                "to": self.coordinator,
                "clusters": [key.cluster.z2m_name()],
            }),
        )
        .await
    }

    async fn set_reporting(
        &self,
        key: &AttributeKey,
        min_interval: u16,
        max_interval: u16,
        reportable_change: Option<f64>,
    ) -> Result<CommandResult> {
        let attribute = self.attribute(key)?;
        self.request(
            "configure_reporting",
            json!({
                "id": key.endpoint_address(),
                "cluster": key.cluster.z2m_name(),
                "attribute": attribute.name,
                "minimum_report_interval": min_interval,
                "maximum_report_interval": max_interval,
                "reportable_change": reportable_change.unwrap_or(0.0),
            }),
        )
        .await
    }

    /// zigbee2mqtt always reads from the device, so `cache_max_age` has no
    /// effect. The value arrives later as a state message.
    async fn read_attribute(
        &self,
        key: &AttributeKey,
        _cache_max_age: Duration,
    ) -> Result<Option<RawValue>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SyncError::GatewayClosed);
        }
        let attribute = self.attribute(key)?;
        let topic = format!("{}/{}/get", self.base_topic, self.friendly_name(key)?);
        let mut body = serde_json::Map::new();
        body.insert(attribute.property.to_string(), Value::String(String::new()));
        let payload = Value::Object(body).to_string();
        self.client
            .publish(&topic, QoS::AtMostOnce, false, payload)
            .await
            .map_err(|e| SyncError::Transport(format!("read publish failed: {}", e)))?;
        Ok(None)
    }

    async fn add_attribute_listener(&self, key: &AttributeKey) -> Result<()> {
        let friendly_name = self.friendly_name(key)?;
        let first = {
            let mut listeners = self.listeners.write();
            let keys = listeners.entry(friendly_name.clone()).or_default();
            if !keys.contains(key) {
                keys.push(key.clone());
            }
            keys.len() == 1
        };

        if first {
            let topic = format!("{}/{}", self.base_topic, friendly_name);
            self.client.subscribe(&topic, QoS::AtMostOnce).await?;
            debug!("[MQTT] Subscribed to {}", topic);
        }
        Ok(())
    }

    async fn remove_attribute_listener(&self, key: &AttributeKey) {
        let Ok(friendly_name) = self.friendly_name(key) else {
            return;
        };
        let last = {
            let mut listeners = self.listeners.write();
            match listeners.get_mut(&friendly_name) {
                Some(keys) => {
                    keys.retain(|k| k != key);
                    if keys.is_empty() {
                        listeners.remove(&friendly_name);
                        true
                    } else {
                        false
                    }
                }
                None => false,
            }
        };

        if last {
            let topic = format!("{}/{}", self.base_topic, friendly_name);
            if let Err(e) = self.client.unsubscribe(&topic).await {
                warn!("[MQTT] Failed to unsubscribe from {}: {:?}", topic, e);
            }
        }
    }
}
