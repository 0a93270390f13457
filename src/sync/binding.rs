//! Negotiated relationship between a sync engine and one device attribute.

use super::decoder::DecodedValue;
use std::fmt;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindingState {
    Unbound,
    Bound,
    ReportingActive,
    PollingActive,
    Failed,
}

impl fmt::Display for BindingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BindingState::Unbound => "unbound",
            BindingState::Bound => "bound",
            BindingState::ReportingActive => "reporting",
            BindingState::PollingActive => "polling",
            BindingState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Binding state plus the reading last published for the attribute.
///
/// All transitions are pure. `Failed` is terminal: every mark is ignored
/// until [`reset`](Self::reset) is called.
#[derive(Debug, Clone)]
pub struct AttributeBinding {
    state: BindingState,
    polling_period: u32,
    last_value: Option<DecodedValue>,
    last_update: Option<Instant>,
}

impl AttributeBinding {
    pub fn new(polling_period: u32) -> Self {
        Self {
            state: BindingState::Unbound,
            polling_period,
            last_value: None,
            last_update: None,
        }
    }

    pub fn state(&self) -> BindingState {
        self.state
    }

    /// Poll interval in `PollingActive`, staleness ceiling in `ReportingActive`.
    pub fn polling_period(&self) -> u32 {
        self.polling_period
    }

    pub fn last_value(&self) -> Option<&DecodedValue> {
        self.last_value.as_ref()
    }

    pub fn mark_bound(&mut self) -> bool {
        self.transition(BindingState::Bound, None)
    }

    pub fn mark_reporting_active(&mut self, max_reporting_period: u32) -> bool {
        self.transition(BindingState::ReportingActive, Some(max_reporting_period))
    }

    pub fn mark_polling_active(&mut self, polling_period: u32) -> bool {
        self.transition(BindingState::PollingActive, Some(polling_period))
    }

    pub fn mark_failed(&mut self) -> bool {
        self.transition(BindingState::Failed, None)
    }

    /// Return to `Unbound`, keeping the last value. Used on re-initialization.
    pub fn reset(&mut self) {
        self.state = BindingState::Unbound;
    }

    /// Drop the relationship entirely.
    pub fn release(&mut self) {
        self.state = BindingState::Unbound;
        self.last_value = None;
        self.last_update = None;
    }

    /// Store `value` if it differs from the last one. Returns whether it did.
    pub fn record_value(&mut self, value: DecodedValue, now: Instant) -> bool {
        self.last_update = Some(now);
        if self.last_value.as_ref() == Some(&value) {
            return false;
        }
        self.last_value = Some(value);
        true
    }

    /// No reading has arrived within the current polling period.
    pub fn is_stale(&self, now: Instant) -> bool {
        let ceiling = Duration::from_secs(u64::from(self.polling_period));
        match self.last_update {
            Some(at) => now.saturating_duration_since(at) > ceiling,
            None => true,
        }
    }

    fn transition(&mut self, next: BindingState, period: Option<u32>) -> bool {
        if self.state == BindingState::Failed {
            return false;
        }
        self.state = next;
        if let Some(period) = period {
            self.polling_period = period;
        }
        true
    }
}
