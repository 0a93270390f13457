//! Periodic health check over a set of engines.

use super::binding::BindingState;
use super::engine::SyncEngine;
use log::{info, warn};
use std::collections::HashSet;
use std::sync::Arc;

/// Retries failed bindings and tracks channels that went stale.
#[derive(Debug, Default)]
pub struct Supervisor {
    stale: HashSet<String>,
}

impl Supervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Re-initialize and re-activate every `Failed` engine, then log
    /// channels that start or stop being stale.
    pub async fn check(&mut self, engines: &[Arc<SyncEngine>]) {
        for engine in engines {
            if engine.is_disposed() {
                continue;
            }
            let channel = engine.channel();

            if engine.state() == BindingState::Failed {
                info!("[Supervise] Channel '{}' failed, re-initializing", channel);
                if let Err(e) = engine.reinitialize().await {
                    warn!("[Supervise] Channel '{}' not re-initialized: {}", channel, e);
                    continue;
                }
                match engine.activate().await {
                    Ok(state) => info!("[Supervise] Channel '{}' is {}", channel, state),
                    Err(e) => warn!("[Supervise] Channel '{}' not activated: {}", channel, e),
                }
                continue;
            }

            if engine.is_stale() {
                if self.stale.insert(channel.to_string()) {
                    warn!(
                        "[Supervise] Channel '{}' has no reading within {}s",
                        channel,
                        engine.polling_period()
                    );
                }
            } else if self.stale.remove(channel) {
                info!("[Supervise] Channel '{}' is receiving readings again", channel);
            }
        }
    }

    pub fn is_stale(&self, channel: &str) -> bool {
        self.stale.contains(channel)
    }
}
