//! Periodic refresh for engines that fell back to polling.

use super::binding::BindingState;
use super::engine::SyncEngine;
use log::debug;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{Duration, sleep};

/// Spawn a task that refreshes `engine` every polling period while it is in
/// `PollingActive`.
///
/// A binding transition restarts the wait with the new period, so falling
/// back from reporting does not sit out the old reporting ceiling. The task
/// ends when the engine is disposed.
pub fn spawn_poller(engine: Arc<SyncEngine>) -> JoinHandle<()> {
    let cancel = engine.cancellation();
    let mut transitions = engine.subscribe();
    tokio::spawn(async move {
        loop {
            let period = Duration::from_secs(u64::from(engine.polling_period().max(1)));
            tokio::select! {
                _ = cancel.cancelled() => break,
                changed = transitions.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                _ = sleep(period) => {}
            }

            if engine.state() == BindingState::PollingActive {
                debug!("[Poll] {}: Refreshing", engine.key());
                engine.refresh().await;
            }
        }
        debug!("[Poll] {}: Stopped", engine.key());
    })
}
