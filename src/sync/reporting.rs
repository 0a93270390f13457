//! Reporting policy for one attribute binding.
//!
//! Holds the min/max reporting intervals, the reportable change for analogue
//! attributes and the normal polling period, and exposes them as user-editable
//! options. Updates never fail: out-of-range input is clamped the same way a
//! device would tolerate it.

use serde::{Deserialize, Serialize};

/// Slowest reporting interval used when nothing else is configured.
pub const REPORTING_PERIOD_DEFAULT_MAX: u16 = 7200;
/// Normal polling period when reporting could not be configured.
pub const POLLING_PERIOD_DEFAULT: u32 = 7200;
/// Slow polling period used when the device could not even be bound.
pub const POLLING_PERIOD_HIGH: u32 = 86400;

pub const POLLING_PERIOD_MIN: u32 = 15;
pub const POLLING_PERIOD_MAX: u32 = 86400;

// ZCL reporting intervals are 16-bit; max must stay strictly above min.
const MIN_INTERVAL_CEILING: u16 = u16::MAX - 1;
const MAX_INTERVAL_FLOOR: u16 = 1;

pub const CONFIG_REPORTING_MIN: &str = "zigbee_reporting_min";
pub const CONFIG_REPORTING_MAX: &str = "zigbee_reporting_max";
pub const CONFIG_REPORTING_CHANGE: &str = "zigbee_reporting_change";
pub const CONFIG_REPORTING_POLLING: &str = "zigbee_reporting_polling";

/// Valid range and default for the reportable change of an analogue attribute.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChangeBounds {
    pub default: f64,
    pub min: f64,
    pub max: f64,
}

impl ChangeBounds {
    fn clamp(&self, value: f64) -> f64 {
        value.clamp(self.min, self.max)
    }
}

/// Device-class defaults a binding starts from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportingDefaults {
    pub min_interval: u16,
    pub max_interval: u16,
    pub polling_period: u32,
    /// `None` for discrete attributes, which report on any change
    pub change: Option<ChangeBounds>,
}

impl Default for ReportingDefaults {
    fn default() -> Self {
        Self {
            min_interval: 1,
            max_interval: REPORTING_PERIOD_DEFAULT_MAX,
            polling_period: POLLING_PERIOD_DEFAULT,
            change: None,
        }
    }
}

/// User-supplied reporting parameters, keyed by option name.
///
/// Missing fields keep their current value. Integers are signed so that
/// negative input can be clamped instead of rejected.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReportingUpdate {
    #[serde(rename = "zigbee_reporting_min", default)]
    pub min_interval: Option<i64>,
    #[serde(rename = "zigbee_reporting_max", default)]
    pub max_interval: Option<i64>,
    #[serde(rename = "zigbee_reporting_change", default)]
    pub reportable_change: Option<f64>,
    #[serde(rename = "zigbee_reporting_polling", default)]
    pub polling_period: Option<i64>,
}

/// One user-facing configuration field.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConfigOption {
    pub name: &'static str,
    pub label: &'static str,
    pub description: &'static str,
    pub value: f64,
    pub min: f64,
    pub max: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReportingConfig {
    min_interval: u16,
    max_interval: u16,
    reportable_change: Option<f64>,
    change_bounds: Option<ChangeBounds>,
    polling_period: u32,
}

impl ReportingConfig {
    pub fn new(defaults: &ReportingDefaults) -> Self {
        let (min_interval, max_interval) = normalize_intervals(
            i64::from(defaults.min_interval),
            i64::from(defaults.max_interval),
        );
        let config = Self {
            min_interval,
            max_interval,
            reportable_change: None,
            change_bounds: None,
            polling_period: clamp_polling(i64::from(defaults.polling_period)),
        };
        match defaults.change {
            Some(bounds) => config.with_analogue(bounds.default, bounds.min, bounds.max),
            None => config,
        }
    }

    /// Mark the attribute as analogue and seed its reportable change.
    pub fn with_analogue(mut self, change_default: f64, change_min: f64, change_max: f64) -> Self {
        let (lo, hi) = if change_min <= change_max {
            (change_min, change_max)
        } else {
            (change_max, change_min)
        };
        let bounds = ChangeBounds {
            default: change_default,
            min: lo,
            max: hi,
        };
        self.reportable_change = Some(bounds.clamp(change_default));
        self.change_bounds = Some(bounds);
        self
    }

    pub fn min_interval(&self) -> u16 {
        self.min_interval
    }

    pub fn max_interval(&self) -> u16 {
        self.max_interval
    }

    pub fn reportable_change(&self) -> Option<f64> {
        self.reportable_change
    }

    pub fn polling_period(&self) -> u32 {
        self.polling_period
    }

    pub fn is_analogue(&self) -> bool {
        self.change_bounds.is_some()
    }

    /// Configuration fields the user may edit, with their valid ranges.
    pub fn editable_options(&self) -> Vec<ConfigOption> {
        let mut options = vec![
            ConfigOption {
                name: CONFIG_REPORTING_MIN,
                label: "Minimum Reporting Period",
                description: "Minimum number of seconds between reports",
                value: f64::from(self.min_interval),
                min: 0.0,
                max: f64::from(MIN_INTERVAL_CEILING),
            },
            ConfigOption {
                name: CONFIG_REPORTING_MAX,
                label: "Maximum Reporting Period",
                description: "Maximum number of seconds between reports",
                value: f64::from(self.max_interval),
                min: f64::from(MAX_INTERVAL_FLOOR),
                max: f64::from(u16::MAX),
            },
        ];

        if let (Some(bounds), Some(change)) = (self.change_bounds, self.reportable_change) {
            options.push(ConfigOption {
                name: CONFIG_REPORTING_CHANGE,
                label: "Report On Change",
                description: "Minimum change in value that triggers a report",
                value: change,
                min: bounds.min,
                max: bounds.max,
            });
        }

        options.push(ConfigOption {
            name: CONFIG_REPORTING_POLLING,
            label: "Polling Period",
            description: "Seconds between polls when reporting is unavailable",
            value: f64::from(self.polling_period),
            min: f64::from(POLLING_PERIOD_MIN),
            max: f64::from(POLLING_PERIOD_MAX),
        });

        options
    }

    /// Merge user values into the configuration.
    ///
    /// Returns whether any effective value changed, so callers can skip
    /// sending an identical configuration to the device.
    pub fn apply_update(&mut self, update: &ReportingUpdate) -> bool {
        let before = self.clone();

        let (min_interval, max_interval) = normalize_intervals(
            update
                .min_interval
                .unwrap_or_else(|| i64::from(self.min_interval)),
            update
                .max_interval
                .unwrap_or_else(|| i64::from(self.max_interval)),
        );
        self.min_interval = min_interval;
        self.max_interval = max_interval;

        if let (Some(bounds), Some(change)) = (self.change_bounds, update.reportable_change)
            && change.is_finite()
        {
            self.reportable_change = Some(bounds.clamp(change));
        }

        if let Some(period) = update.polling_period {
            self.polling_period = clamp_polling(period);
        }

        *self != before
    }
}

fn normalize_intervals(min: i64, max: i64) -> (u16, u16) {
    let min = min.clamp(0, i64::from(MIN_INTERVAL_CEILING)) as u16;
    let max = max.clamp(i64::from(MAX_INTERVAL_FLOOR), i64::from(u16::MAX)) as u16;
    if min < max { (min, max) } else { (min, min + 1) }
}

fn clamp_polling(period: i64) -> u32 {
    period.clamp(i64::from(POLLING_PERIOD_MIN), i64::from(POLLING_PERIOD_MAX)) as u32
}
