//! Cluster-specific value decoding.
//!
//! The sync engine is the same for every attribute; only the conversion from
//! the raw ZCL value to a channel value differs. Each attribute kind supplies
//! an [`AttributeDecoder`] strategy.

use crate::error::{Result, SyncError};
use crate::zcl::RawValue;
use serde::Serialize;
use strum::Display;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize)]
pub enum Unit {
    #[strum(serialize = "V")]
    Volt,
    #[strum(serialize = "°C")]
    Celsius,
}

/// Channel value produced from a raw attribute.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum DecodedValue {
    Decimal(f64),
    Quantity { value: f64, unit: Unit },
    OnOff(bool),
    Text(String),
}

impl std::fmt::Display for DecodedValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecodedValue::Decimal(v) => write!(f, "{}", v),
            DecodedValue::Quantity { value, unit } => write!(f, "{} {}", value, unit),
            DecodedValue::OnOff(true) => f.write_str("ON"),
            DecodedValue::OnOff(false) => f.write_str("OFF"),
            DecodedValue::Text(s) => f.write_str(s),
        }
    }
}

pub trait AttributeDecoder: Send + Sync {
    fn decode(&self, raw: &RawValue) -> Result<DecodedValue>;
}

fn expect_integer(raw: &RawValue) -> Result<i64> {
    raw.as_i64()
        .ok_or_else(|| SyncError::Decode(format!("expected integer, got {}", raw)))
}

/// RelativeHumidity MeasuredValue, reported in centi-percent.
pub struct HumidityDecoder;

impl AttributeDecoder for HumidityDecoder {
    fn decode(&self, raw: &RawValue) -> Result<DecodedValue> {
        match raw {
            RawValue::Float(percent) => Ok(DecodedValue::Decimal(*percent)),
            other => Ok(DecodedValue::Decimal(expect_integer(other)? as f64 / 100.0)),
        }
    }
}

/// TemperatureMeasurement MeasuredValue, reported in centi-degrees.
pub struct TemperatureDecoder;

/// ZCL "invalid measurement" marker for signed 16-bit values.
const INVALID_INT16: i64 = -0x8000;

impl AttributeDecoder for TemperatureDecoder {
    fn decode(&self, raw: &RawValue) -> Result<DecodedValue> {
        let value = match raw {
            RawValue::Float(celsius) => *celsius,
            other => match expect_integer(other)? {
                INVALID_INT16 => {
                    return Err(SyncError::Decode("temperature reading is invalid".into()));
                }
                centi => centi as f64 / 100.0,
            },
        };
        Ok(DecodedValue::Quantity {
            value,
            unit: Unit::Celsius,
        })
    }
}

/// ElectricalMeasurement RMSVoltage scaled by the device's AC voltage
/// multiplier and divisor.
///
/// The scaling only applies to raw counts. Values the gateway already
/// reports in volts pass through unchanged.
pub struct RmsVoltageDecoder {
    multiplier: u32,
    divisor: u32,
}

impl RmsVoltageDecoder {
    /// Missing or zero scaling attributes fall back to 1/1.
    pub fn new(multiplier: Option<u32>, divisor: Option<u32>) -> Self {
        match (multiplier, divisor) {
            (Some(m), Some(d)) if m != 0 && d != 0 => Self {
                multiplier: m,
                divisor: d,
            },
            _ => Self {
                multiplier: 1,
                divisor: 1,
            },
        }
    }
}

impl AttributeDecoder for RmsVoltageDecoder {
    fn decode(&self, raw: &RawValue) -> Result<DecodedValue> {
        let value = match raw {
            RawValue::Float(volts) => *volts,
            other => {
                expect_integer(other)? as f64 * f64::from(self.multiplier)
                    / f64::from(self.divisor)
            }
        };
        Ok(DecodedValue::Quantity {
            value,
            unit: Unit::Volt,
        })
    }
}

/// Occupancy bitmap; bit 0 is the occupied flag.
pub struct OccupancyDecoder;

impl AttributeDecoder for OccupancyDecoder {
    fn decode(&self, raw: &RawValue) -> Result<DecodedValue> {
        match raw {
            RawValue::Bool(b) => Ok(DecodedValue::OnOff(*b)),
            other => Ok(DecodedValue::OnOff(expect_integer(other)? & 0x01 != 0)),
        }
    }
}
