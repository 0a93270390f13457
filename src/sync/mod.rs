//! Attribute synchronization.
//!
//! Keeps device attributes fresh through reporting where the device supports
//! it and polling where it does not.

pub mod binding;
pub mod decoder;
pub mod dispatcher;
pub mod engine;
pub mod kind;
pub mod poller;
pub mod reporting;
pub mod supervisor;

pub use binding::{AttributeBinding, BindingState};
pub use decoder::{AttributeDecoder, DecodedValue, Unit};
pub use dispatcher::NotificationDispatcher;
pub use engine::{AttributeSpec, DEFAULT_COMMAND_TIMEOUT, SyncEngine};
pub use kind::{AttributeKind, PollingPolicy};
pub use poller::spawn_poller;
pub use reporting::{ConfigOption, ReportingConfig, ReportingDefaults, ReportingUpdate};
pub use supervisor::Supervisor;
