use crate::error::{Result, SyncError};
use crate::sync::decoder::RmsVoltageDecoder;
use crate::sync::{AttributeKind, AttributeSpec, PollingPolicy, ReportingUpdate};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Load `.env` from the working directory, see [`load_dotenv_from`].
pub fn load_dotenv() {
    load_dotenv_from(Path::new(".env"));
}

/// Export `KEY=value` lines from an env file. Values may be quoted; spaces
/// need no quotes. Variables already set win. Returns how many were set.
pub fn load_dotenv_from(path: &Path) -> usize {
    let Ok(content) = fs::read_to_string(path) else {
        return 0;
    };

    let mut exported = 0;
    for (key, value) in content.lines().filter_map(parse_env_line) {
        if std::env::var_os(key).is_some() {
            continue;
        }
        // SAFETY: called from main before the async runtime starts
        unsafe { std::env::set_var(key, value) };
        exported += 1;
    }
    exported
}

fn parse_env_line(line: &str) -> Option<(&str, &str)> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    let (key, value) = line.split_once('=')?;
    let key = key.trim();
    if key.is_empty() {
        return None;
    }
    let value = value.trim();
    let unquoted = ['"', '\'']
        .iter()
        .find_map(|q| value.strip_prefix(*q)?.strip_suffix(*q))
        .unwrap_or(value);
    Some((key, unquoted))
}

/// Default config file location, `~/.config/zigbee-attribute-sync/config.json`.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("zigbee-attribute-sync").join("config.json"))
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub mqtt: MqttConfig,
    pub zigbee2mqtt: Zigbee2MqttConfig,
    pub sync: SyncConfig,
    pub attributes: Vec<AttributeConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    pub broker_host: String,
    pub broker_port: u16,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Zigbee2MqttConfig {
    pub base_topic: String,
    /// Bind target for device clusters
    pub coordinator: String,
    pub response_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub command_timeout_secs: u64,
    /// When set, channel updates are also published to `<topic>/<channel>`
    pub publish_topic: Option<String>,
}

/// One device attribute to keep in sync.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttributeConfig {
    pub channel: String,
    /// IEEE address
    pub device: String,
    #[serde(default = "default_endpoint")]
    pub endpoint: u8,
    pub kind: AttributeKind,
    /// User reporting options, same keys as the editable options
    #[serde(default)]
    pub reporting: ReportingUpdate,
    /// Overrides the kind's fallback polling periods
    #[serde(default)]
    pub polling: Option<PollingPolicy>,
    /// AC voltage scaling for `rms_voltage` raw counts. zigbee2mqtt already
    /// reports volts, so it has no effect on that gateway.
    #[serde(default)]
    pub voltage_multiplier: Option<u32>,
    #[serde(default)]
    pub voltage_divisor: Option<u32>,
}

fn default_endpoint() -> u8 {
    1
}

impl AttributeConfig {
    pub fn to_spec(&self, command_timeout: Duration) -> AttributeSpec {
        let mut spec = AttributeSpec::for_kind(&self.channel, &self.device, self.endpoint, self.kind);
        if let Some(polling) = self.polling {
            spec.polling = polling;
        }
        if self.kind == AttributeKind::RmsVoltage {
            spec.decoder = Arc::new(RmsVoltageDecoder::new(
                self.voltage_multiplier,
                self.voltage_divisor,
            ));
        }
        spec.command_timeout = command_timeout;
        spec
    }
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            broker_host: "localhost".to_string(),
            broker_port: 1883,
            client_id: "zigbee-attribute-sync".to_string(),
            username: None,
            password: None,
        }
    }
}

impl Default for Zigbee2MqttConfig {
    fn default() -> Self {
        Self {
            base_topic: "zigbee2mqtt".to_string(),
            coordinator: "Coordinator".to_string(),
            response_timeout_secs: 10,
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            command_timeout_secs: 10,
            publish_topic: None,
        }
    }
}

impl Config {
    /// Defaults, then the JSON file (if any), then environment overrides.
    ///
    /// An explicitly given path must exist; the default path is optional.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => match default_config_path() {
                Some(path) if path.exists() => Self::from_file(&path)?,
                _ => Self::default(),
            },
        };
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.sync.command_timeout_secs)
    }

    fn apply_env(&mut self) {
        if let Ok(host) = std::env::var("MQTT_BROKER_HOST") {
            self.mqtt.broker_host = host;
        }
        if let Ok(port) = std::env::var("MQTT_BROKER_PORT")
            && let Ok(p) = port.parse()
        {
            self.mqtt.broker_port = p;
        }
        if let Ok(client_id) = std::env::var("MQTT_CLIENT_ID") {
            self.mqtt.client_id = client_id;
        }
        if let Ok(username) = std::env::var("MQTT_USERNAME") {
            self.mqtt.username = Some(username);
        }
        if let Ok(password) = std::env::var("MQTT_PASSWORD") {
            self.mqtt.password = Some(password);
        }
        if let Ok(base) = std::env::var("Z2M_BASE_TOPIC") {
            self.zigbee2mqtt.base_topic = base;
        }
        if let Ok(timeout) = std::env::var("SYNC_COMMAND_TIMEOUT_SECS")
            && let Ok(t) = timeout.parse()
        {
            self.sync.command_timeout_secs = t;
        }
        if let Ok(topic) = std::env::var("SYNC_PUBLISH_TOPIC") {
            self.sync.publish_topic = Some(topic);
        }
    }

    fn validate(&self) -> Result<()> {
        if self.sync.command_timeout_secs == 0 {
            return Err(SyncError::Config("command_timeout_secs must be positive".into()));
        }
        let mut channels = std::collections::HashSet::new();
        for attribute in &self.attributes {
            if !channels.insert(attribute.channel.as_str()) {
                return Err(SyncError::Config(format!(
                    "duplicate channel '{}'",
                    attribute.channel
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::zcl::ClusterType;

    const CONFIG: &str = r#"{
        "mqtt": {"broker_host": "10.0.0.2"},
        "attributes": [
            {
                "channel": "bathroom_humidity",
                "device": "0x00158d0001a2b3c4",
                "kind": "relative_humidity",
                "reporting": {"zigbee_reporting_max": 3600}
            },
            {
                "channel": "mains_voltage",
                "device": "0x000d6f000b1c2d3e",
                "endpoint": 2,
                "kind": "rms_voltage",
                "polling": {"normal": 600, "high": 1500},
                "voltage_divisor": 10,
                "voltage_multiplier": 1
            }
        ]
    }"#;

    #[test]
    fn test_parse_file_format() {
        let config: Config = serde_json::from_str(CONFIG).unwrap();
        assert_eq!(config.mqtt.broker_host, "10.0.0.2");
        assert_eq!(config.mqtt.broker_port, 1883);
        assert_eq!(config.zigbee2mqtt.base_topic, "zigbee2mqtt");
        assert_eq!(config.attributes.len(), 2);

        let humidity = &config.attributes[0];
        assert_eq!(humidity.endpoint, 1);
        assert_eq!(humidity.reporting.max_interval, Some(3600));

        let voltage = config.attributes[1].to_spec(Duration::from_secs(5));
        assert_eq!(voltage.key.cluster, ClusterType::ElectricalMeasurement);
        assert_eq!(voltage.key.endpoint, 2);
        assert_eq!(voltage.polling.high, 1500);
        assert_eq!(voltage.command_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_duplicate_channels_rejected() {
        let mut config: Config = serde_json::from_str(CONFIG).unwrap();
        let duplicate = config.attributes[0].clone();
        config.attributes.push(duplicate);
        assert!(matches!(config.validate(), Err(SyncError::Config(_))));
    }

    #[test]
    fn test_env_line_parsing() {
        assert_eq!(parse_env_line("MQTT_BROKER_HOST=10.0.0.2"), Some(("MQTT_BROKER_HOST", "10.0.0.2")));
        assert_eq!(
            parse_env_line(" SYNC_PUBLISH_TOPIC = \"home/zigbee sync\" "),
            Some(("SYNC_PUBLISH_TOPIC", "home/zigbee sync"))
        );
        assert_eq!(parse_env_line("MQTT_PASSWORD='s3cret'"), Some(("MQTT_PASSWORD", "s3cret")));
        assert_eq!(parse_env_line("# comment"), None);
        assert_eq!(parse_env_line("NOT_AN_ASSIGNMENT"), None);
        assert_eq!(parse_env_line("=orphan"), None);
    }

    #[test]
    fn test_missing_env_file_exports_nothing() {
        assert_eq!(load_dotenv_from(Path::new("/nonexistent/.env")), 0);
    }

    #[test]
    fn test_missing_explicit_file() {
        let result = Config::load(Some(Path::new("/nonexistent/zigbee-sync.json")));
        assert!(matches!(result, Err(SyncError::IoError(_))));
    }
}
