//! Routes raw attribute events from the gateway to their sync engine.

use super::engine::SyncEngine;
use crate::gateway::AttributeEvent;
use crate::zcl::AttributeKey;
use log::{debug, info, trace};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Default)]
pub struct NotificationDispatcher {
    engines: RwLock<HashMap<AttributeKey, Arc<SyncEngine>>>,
}

impl NotificationDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, key: AttributeKey, engine: Arc<SyncEngine>) {
        debug!("[Dispatch] Registered {}", key);
        self.engines.write().insert(key, engine);
    }

    pub fn unregister(&self, key: &AttributeKey) {
        if self.engines.write().remove(key).is_some() {
            debug!("[Dispatch] Unregistered {}", key);
        }
    }

    pub fn len(&self) -> usize {
        self.engines.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.engines.read().is_empty()
    }

    /// Forward an event to its engine.
    ///
    /// Events for unknown attributes are dropped; late reports after an
    /// engine was disposed are expected. Returns whether an engine took it.
    pub fn on_raw_event(&self, event: &AttributeEvent) -> bool {
        let engine = self.engines.read().get(&event.key).cloned();
        match engine {
            Some(engine) => {
                engine.on_attribute_notification(&event.value);
                true
            }
            None => {
                trace!("[Dispatch] No engine for {}, dropping", event.key);
                false
            }
        }
    }

    /// Drain the gateway event queue until it closes.
    pub async fn run(self: Arc<Self>, mut events: mpsc::Receiver<AttributeEvent>) {
        while let Some(event) = events.recv().await {
            self.on_raw_event(&event);
        }
        info!("[Dispatch] Event queue closed");
    }
}
