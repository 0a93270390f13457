//! Attribute kinds the bridge knows how to keep in sync.
//!
//! A kind bundles everything that differs between attributes: which cluster
//! and attribute it lives on, the reporting defaults, the fallback polling
//! policy and the decoder strategy.

use super::decoder::{
    AttributeDecoder, HumidityDecoder, OccupancyDecoder, RmsVoltageDecoder, TemperatureDecoder,
};
use super::reporting::{
    ChangeBounds, POLLING_PERIOD_DEFAULT, POLLING_PERIOD_HIGH, ReportingDefaults,
};
use crate::zcl::{ATTR_MEASURED_VALUE, ATTR_OCCUPANCY, ATTR_RMS_VOLTAGE, ClusterType};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use strum::{Display, EnumString};

/// Polling periods used when reporting is not available.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollingPolicy {
    /// Used when the device was bound but rejected the reporting configuration
    pub normal: u32,
    /// Used when the device could not be bound at all
    pub high: u32,
}

impl Default for PollingPolicy {
    fn default() -> Self {
        Self {
            normal: POLLING_PERIOD_DEFAULT,
            high: POLLING_PERIOD_HIGH,
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, Display, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AttributeKind {
    RelativeHumidity,
    Temperature,
    RmsVoltage,
    Occupancy,
}

impl AttributeKind {
    pub fn cluster(self) -> ClusterType {
        match self {
            AttributeKind::RelativeHumidity => ClusterType::RelativeHumidityMeasurement,
            AttributeKind::Temperature => ClusterType::TemperatureMeasurement,
            AttributeKind::RmsVoltage => ClusterType::ElectricalMeasurement,
            AttributeKind::Occupancy => ClusterType::OccupancySensing,
        }
    }

    pub fn attribute(self) -> u16 {
        match self {
            AttributeKind::RelativeHumidity | AttributeKind::Temperature => ATTR_MEASURED_VALUE,
            AttributeKind::RmsVoltage => ATTR_RMS_VOLTAGE,
            AttributeKind::Occupancy => ATTR_OCCUPANCY,
        }
    }

    pub fn reporting_defaults(self) -> ReportingDefaults {
        let change = match self {
            AttributeKind::RelativeHumidity => Some(ChangeBounds {
                default: 1.0,
                min: 1.0,
                max: 100.0,
            }),
            AttributeKind::Temperature => Some(ChangeBounds {
                default: 10.0,
                min: 1.0,
                max: 100.0,
            }),
            AttributeKind::RmsVoltage => Some(ChangeBounds {
                default: 5.0,
                min: 1.0,
                max: 100.0,
            }),
            AttributeKind::Occupancy => None,
        };
        ReportingDefaults {
            change,
            ..ReportingDefaults::default()
        }
    }

    /// Mains measurement clusters fall back to slow polling even when only
    /// reporting was rejected; battery sensors use the normal period.
    pub fn polling_policy(self) -> PollingPolicy {
        match self {
            AttributeKind::RmsVoltage => PollingPolicy {
                normal: POLLING_PERIOD_HIGH,
                high: POLLING_PERIOD_HIGH,
            },
            _ => PollingPolicy::default(),
        }
    }

    pub fn decoder(self) -> Arc<dyn AttributeDecoder> {
        match self {
            AttributeKind::RelativeHumidity => Arc::new(HumidityDecoder),
            AttributeKind::Temperature => Arc::new(TemperatureDecoder),
            AttributeKind::RmsVoltage => Arc::new(RmsVoltageDecoder::new(None, None)),
            AttributeKind::Occupancy => Arc::new(OccupancyDecoder),
        }
    }
}
