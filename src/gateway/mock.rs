//! Scriptable in-memory gateway for unit tests.

use super::{CommandResult, DeviceGateway};
use crate::error::{Result, SyncError};
use crate::zcl::{AttributeKey, RawValue};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Notify;

/// Scripted answer for a mock command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    Success,
    Failure(&'static str),
    Transport,
    Unsupported,
    Closed,
    /// Signal `entered`, wait for `release`, then succeed.
    Gated,
    /// Never complete.
    Hang,
}

pub struct MockGateway {
    missing: Mutex<bool>,
    bind_reply: Mutex<Reply>,
    reporting_reply: Mutex<Reply>,
    read_value: Mutex<Option<RawValue>>,
    pub bind_calls: AtomicUsize,
    pub read_calls: AtomicUsize,
    pub reporting_calls: Mutex<Vec<(u16, u16, Option<f64>)>>,
    pub listeners: Mutex<HashSet<AttributeKey>>,
    pub entered: Notify,
    pub release: Notify,
}

impl MockGateway {
    pub fn new() -> Self {
        Self {
            missing: Mutex::new(false),
            bind_reply: Mutex::new(Reply::Success),
            reporting_reply: Mutex::new(Reply::Success),
            read_value: Mutex::new(None),
            bind_calls: AtomicUsize::new(0),
            read_calls: AtomicUsize::new(0),
            reporting_calls: Mutex::new(Vec::new()),
            listeners: Mutex::new(HashSet::new()),
            entered: Notify::new(),
            release: Notify::new(),
        }
    }

    pub fn with_missing_attribute(self) -> Self {
        *self.missing.lock() = true;
        self
    }

    pub fn set_bind_reply(&self, reply: Reply) {
        *self.bind_reply.lock() = reply;
    }

    pub fn set_reporting_reply(&self, reply: Reply) {
        *self.reporting_reply.lock() = reply;
    }

    pub fn set_read_value(&self, value: Option<RawValue>) {
        *self.read_value.lock() = value;
    }

    pub fn bind_count(&self) -> usize {
        self.bind_calls.load(Ordering::SeqCst)
    }

    pub fn reporting_count(&self) -> usize {
        self.reporting_calls.lock().len()
    }

    pub fn read_count(&self) -> usize {
        self.read_calls.load(Ordering::SeqCst)
    }

    async fn answer(&self, reply: Reply) -> Result<CommandResult> {
        match reply {
            Reply::Success => Ok(CommandResult::Success),
            Reply::Failure(status) => Ok(CommandResult::Failure {
                status: status.to_string(),
            }),
            Reply::Transport => Err(SyncError::Transport("operation interrupted".into())),
            Reply::Unsupported => Err(SyncError::Unsupported("reporting".into())),
            Reply::Closed => Err(SyncError::GatewayClosed),
            Reply::Gated => {
                self.entered.notify_one();
                self.release.notified().await;
                Ok(CommandResult::Success)
            }
            Reply::Hang => std::future::pending().await,
        }
    }
}

#[async_trait]
impl DeviceGateway for MockGateway {
    async fn resolve(&self, key: &AttributeKey) -> Result<()> {
        if *self.missing.lock() {
            return Err(SyncError::AttributeNotFound(key.to_string()));
        }
        Ok(())
    }

    async fn bind(&self, _key: &AttributeKey) -> Result<CommandResult> {
        self.bind_calls.fetch_add(1, Ordering::SeqCst);
        let reply = *self.bind_reply.lock();
        self.answer(reply).await
    }

    async fn set_reporting(
        &self,
        _key: &AttributeKey,
        min_interval: u16,
        max_interval: u16,
        reportable_change: Option<f64>,
    ) -> Result<CommandResult> {
        self.reporting_calls
            .lock()
            .push((min_interval, max_interval, reportable_change));
        let reply = *self.reporting_reply.lock();
        self.answer(reply).await
    }

    async fn read_attribute(
        &self,
        _key: &AttributeKey,
        _cache_max_age: Duration,
    ) -> Result<Option<RawValue>> {
        self.read_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.read_value.lock().clone())
    }

    async fn add_attribute_listener(&self, key: &AttributeKey) -> Result<()> {
        self.listeners.lock().insert(key.clone());
        Ok(())
    }

    async fn remove_attribute_listener(&self, key: &AttributeKey) {
        self.listeners.lock().remove(key);
    }
}
