//! ZigBee Cluster Library vocabulary shared by the gateway and the sync engine.
//!
//! Only the measurement clusters the bridge knows how to keep in sync are
//! listed here. Each cluster carries its ZCL id and the name zigbee2mqtt uses
//! for it in bind/configure_reporting requests.

use serde::{Deserialize, Serialize};
use std::fmt;
use strum::{Display, EnumString, FromRepr};

/// MeasuredValue attribute of the measurement clusters.
pub const ATTR_MEASURED_VALUE: u16 = 0x0000;
/// Occupancy bitmap of the OccupancySensing cluster.
pub const ATTR_OCCUPANCY: u16 = 0x0000;
/// RMSVoltage attribute of the ElectricalMeasurement cluster.
pub const ATTR_RMS_VOLTAGE: u16 = 0x0505;

/// ZCL clusters supported by the bridge.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    FromRepr,
    EnumString,
    Display,
    Serialize,
    Deserialize,
)]
#[repr(u16)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ClusterType {
    TemperatureMeasurement = 0x0402,
    RelativeHumidityMeasurement = 0x0405,
    OccupancySensing = 0x0406,
    ElectricalMeasurement = 0x0B04,
}

impl ClusterType {
    /// Numeric ZCL cluster id.
    pub fn id(self) -> u16 {
        self as u16
    }

    /// Cluster name as understood by the zigbee2mqtt bridge API.
    pub fn z2m_name(self) -> &'static str {
        match self {
            ClusterType::TemperatureMeasurement => "msTemperatureMeasurement",
            ClusterType::RelativeHumidityMeasurement => "msRelativeHumidity",
            ClusterType::OccupancySensing => "msOccupancySensing",
            ClusterType::ElectricalMeasurement => "haElectricalMeasurement",
        }
    }
}

/// How zigbee2mqtt presents an attribute value in state payloads.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PropertyEncoding {
    /// Fixed ZCL scaling: the raw integer is the published value times this
    /// factor.
    Scaled(f64),
    /// Already in engineering units, converted with device-specific scaling
    /// the gateway cannot undo.
    Engineering,
    /// Published as a boolean.
    Flag,
}

/// Static description of an attribute the zigbee2mqtt gateway can translate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KnownAttribute {
    pub cluster: ClusterType,
    pub id: u16,
    /// ZCL attribute name used in configure_reporting requests
    pub name: &'static str,
    /// Property name in zigbee2mqtt state payloads
    pub property: &'static str,
    pub encoding: PropertyEncoding,
}

const KNOWN_ATTRIBUTES: &[KnownAttribute] = &[
    KnownAttribute {
        cluster: ClusterType::RelativeHumidityMeasurement,
        id: ATTR_MEASURED_VALUE,
        name: "measuredValue",
        property: "humidity",
        encoding: PropertyEncoding::Scaled(100.0),
    },
    KnownAttribute {
        cluster: ClusterType::TemperatureMeasurement,
        id: ATTR_MEASURED_VALUE,
        name: "measuredValue",
        property: "temperature",
        encoding: PropertyEncoding::Scaled(100.0),
    },
    KnownAttribute {
        cluster: ClusterType::ElectricalMeasurement,
        id: ATTR_RMS_VOLTAGE,
        name: "rmsVoltage",
        property: "voltage",
        encoding: PropertyEncoding::Engineering,
    },
    KnownAttribute {
        cluster: ClusterType::OccupancySensing,
        id: ATTR_OCCUPANCY,
        name: "occupancy",
        property: "occupancy",
        encoding: PropertyEncoding::Flag,
    },
];

/// Look up the translation entry for a cluster attribute.
pub fn known_attribute(cluster: ClusterType, id: u16) -> Option<&'static KnownAttribute> {
    KNOWN_ATTRIBUTES
        .iter()
        .find(|a| a.cluster == cluster && a.id == id)
}

/// Identifies one attribute on one device endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AttributeKey {
    /// IEEE address of the device, e.g. `0x00158d0001a2b3c4`
    pub device: String,
    pub endpoint: u8,
    pub cluster: ClusterType,
    pub attribute: u16,
}

impl AttributeKey {
    pub fn new(device: impl Into<String>, endpoint: u8, cluster: ClusterType, attribute: u16) -> Self {
        Self {
            device: device.into(),
            endpoint,
            cluster,
            attribute,
        }
    }

    /// `<ieee>/<endpoint>` form used by the zigbee2mqtt API.
    pub fn endpoint_address(&self) -> String {
        format!("{}/{}", self.device, self.endpoint)
    }
}

impl fmt::Display for AttributeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} 0x{:04X}/0x{:04X}",
            self.device,
            self.endpoint,
            self.cluster.id(),
            self.attribute
        )
    }
}

/// Undecoded attribute value as delivered by the gateway.
#[derive(Debug, Clone, PartialEq)]
pub enum RawValue {
    /// Raw ZCL count, before any cluster scaling
    Integer(i64),
    /// Value the gateway already converted to engineering units
    Float(f64),
    Bool(bool),
    Text(String),
}

impl RawValue {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            RawValue::Integer(v) => Some(*v),
            _ => None,
        }
    }

    /// Convert a zigbee2mqtt property value into a gateway value.
    ///
    /// Fixed-scale properties go back to their raw ZCL integer; engineering
    /// values are kept as published.
    pub fn from_property(value: &serde_json::Value, attribute: &KnownAttribute) -> Option<Self> {
        use serde_json::Value;

        match (value, attribute.encoding) {
            (Value::Bool(b), _) => Some(RawValue::Bool(*b)),
            (Value::Number(n), PropertyEncoding::Scaled(factor)) => {
                Some(RawValue::Integer((n.as_f64()? * factor).round() as i64))
            }
            (Value::Number(n), PropertyEncoding::Engineering) => Some(RawValue::Float(n.as_f64()?)),
            (Value::Number(n), PropertyEncoding::Flag) => n.as_i64().map(RawValue::Integer),
            (Value::String(s), _) => Some(RawValue::Text(s.clone())),
            _ => None,
        }
    }
}

impl fmt::Display for RawValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RawValue::Integer(v) => write!(f, "{}", v),
            RawValue::Float(v) => write!(f, "{}", v),
            RawValue::Bool(v) => write!(f, "{}", v),
            RawValue::Text(v) => write!(f, "{:?}", v),
        }
    }
}
