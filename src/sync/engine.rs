//! Attribute synchronization engine.
//!
//! One engine keeps one device attribute fresh. It binds the device cluster,
//! negotiates attribute reporting and falls back to polling when either step
//! fails. Later configuration changes are reconciled against the device, and
//! attribute notifications are decoded, de-duplicated and published to the
//! channel sink.
//!
//! Gateway faults never escape the engine: they are turned into
//! `PollingActive` or `Failed` transitions. Only attribute resolution and
//! calls on a disposed engine return errors.

use super::binding::{AttributeBinding, BindingState};
use super::decoder::AttributeDecoder;
use super::dispatcher::NotificationDispatcher;
use super::kind::{AttributeKind, PollingPolicy};
use super::reporting::{ConfigOption, ReportingConfig, ReportingDefaults, ReportingUpdate};
use crate::error::{Result, SyncError};
use crate::gateway::{CommandResult, DeviceGateway};
use crate::sink::ChannelSink;
use crate::zcl::{AttributeKey, RawValue};
use log::{debug, error, info, trace, warn};
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Default bound on a single gateway command.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(10);

/// Everything an engine needs to know about the attribute it syncs.
#[derive(Clone)]
pub struct AttributeSpec {
    /// Channel the decoded values are published on
    pub channel: String,
    pub key: AttributeKey,
    pub defaults: ReportingDefaults,
    pub polling: PollingPolicy,
    pub decoder: Arc<dyn AttributeDecoder>,
    pub command_timeout: Duration,
}

impl AttributeSpec {
    /// Spec with the defaults of a known attribute kind.
    pub fn for_kind(
        channel: impl Into<String>,
        device: impl Into<String>,
        endpoint: u8,
        kind: AttributeKind,
    ) -> Self {
        Self {
            channel: channel.into(),
            key: AttributeKey::new(device, endpoint, kind.cluster(), kind.attribute()),
            defaults: kind.reporting_defaults(),
            polling: kind.polling_policy(),
            decoder: kind.decoder(),
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }
}

struct EngineState {
    binding: AttributeBinding,
    config: ReportingConfig,
}

pub struct SyncEngine {
    channel: String,
    key: AttributeKey,
    polling: PollingPolicy,
    decoder: Arc<dyn AttributeDecoder>,
    command_timeout: Duration,
    gateway: Arc<dyn DeviceGateway>,
    dispatcher: Arc<NotificationDispatcher>,
    sink: Arc<dyn ChannelSink>,
    state: Mutex<EngineState>,
    /// Held for the whole of a bind/reporting exchange
    command_lock: tokio::sync::Mutex<()>,
    cancel: CancellationToken,
    /// Only written while `state` is locked
    disposed: AtomicBool,
    /// Bumped on every binding transition
    transitions: watch::Sender<BindingState>,
}

impl SyncEngine {
    /// Resolve the attribute and register for its notifications.
    ///
    /// No bind or reporting command is sent; call [`activate`](Self::activate)
    /// for that.
    pub async fn initialize(
        gateway: Arc<dyn DeviceGateway>,
        dispatcher: Arc<NotificationDispatcher>,
        spec: AttributeSpec,
        sink: Arc<dyn ChannelSink>,
    ) -> Result<Arc<Self>> {
        if let Err(e) = gateway.resolve(&spec.key).await {
            error!("[Sync] {}: Error opening attribute: {}", spec.key, e);
            return Err(e);
        }

        let config = ReportingConfig::new(&spec.defaults);
        let (transitions, _) = watch::channel(BindingState::Unbound);
        let engine = Arc::new(Self {
            channel: spec.channel,
            key: spec.key,
            polling: spec.polling,
            decoder: spec.decoder,
            command_timeout: spec.command_timeout,
            gateway,
            dispatcher,
            sink,
            state: Mutex::new(EngineState {
                binding: AttributeBinding::new(config.polling_period()),
                config,
            }),
            command_lock: tokio::sync::Mutex::new(()),
            cancel: CancellationToken::new(),
            disposed: AtomicBool::new(false),
            transitions,
        });

        engine
            .dispatcher
            .register(engine.key.clone(), Arc::clone(&engine));
        if let Err(e) = engine.gateway.add_attribute_listener(&engine.key).await {
            error!("[Sync] {}: Failed to add attribute listener: {}", engine.key, e);
            engine.dispatcher.unregister(&engine.key);
            return Err(e);
        }

        info!(
            "[Sync] {}: Initialized channel '{}'",
            engine.key, engine.channel
        );
        Ok(engine)
    }

    /// Bind the cluster and configure reporting, falling back to polling.
    ///
    /// Returns the resulting binding state. Only a disposed engine yields an
    /// error.
    pub async fn activate(&self) -> Result<BindingState> {
        let _command = self.command_lock.lock().await;

        let (min, max, change) = {
            let state = self.lock_live()?;
            if state.binding.state() == BindingState::Failed {
                warn!(
                    "[Sync] {}: Binding failed, re-initialization required",
                    self.key
                );
                return Ok(BindingState::Failed);
            }
            (
                state.config.min_interval(),
                state.config.max_interval(),
                state.config.reportable_change(),
            )
        };

        debug!("[Sync] {}: Binding cluster", self.key);
        match self.await_command(self.gateway.bind(&self.key)).await {
            Ok(CommandResult::Success) => {
                self.apply(|binding| {
                    binding.mark_bound();
                })?;
            }
            Ok(CommandResult::Failure { status }) => {
                warn!(
                    "[Sync] {}: Bind rejected ({}), polling every {}s",
                    self.key, status, self.polling.high
                );
                return self.apply(|binding| {
                    binding.mark_polling_active(self.polling.high);
                });
            }
            Err(e) => return self.handle_fault(e, self.polling.high),
        }

        debug!(
            "[Sync] {}: Configuring reporting min={}s max={}s change={:?}",
            self.key, min, max, change
        );
        match self
            .await_command(self.gateway.set_reporting(&self.key, min, max, change))
            .await
        {
            Ok(result) => {
                self.handle_reporting_response(&result, self.polling.normal, u32::from(max))
            }
            Err(e) => self.handle_fault(e, self.polling.high),
        }
    }

    /// Apply a user configuration change and push it to the device.
    ///
    /// Identical values are a no-op. An unbound or failed binding only
    /// stores the new values for the next activation.
    pub async fn reconcile(&self, update: &ReportingUpdate) -> Result<BindingState> {
        let _command = self.command_lock.lock().await;

        let (state, min, max, change, polling_period) = {
            let mut state = self.lock_live()?;
            if !state.config.apply_update(update) {
                trace!("[Sync] {}: Reporting configuration unchanged", self.key);
                return Ok(state.binding.state());
            }
            (
                state.binding.state(),
                state.config.min_interval(),
                state.config.max_interval(),
                state.config.reportable_change(),
                state.config.polling_period(),
            )
        };

        if matches!(state, BindingState::Unbound | BindingState::Failed) {
            info!(
                "[Sync] {}: Reporting configuration stored, binding is {}",
                self.key, state
            );
            return Ok(state);
        }

        debug!(
            "[Sync] {}: Reconfiguring reporting min={}s max={}s change={:?}",
            self.key, min, max, change
        );
        match self
            .await_command(self.gateway.set_reporting(&self.key, min, max, change))
            .await
        {
            Ok(result) => self.handle_reporting_response(&result, polling_period, u32::from(max)),
            Err(e) => self.handle_fault(e, polling_period),
        }
    }

    /// Read the attribute from the device.
    ///
    /// Values returned directly by the gateway are handled like a
    /// notification; gateways that answer asynchronously deliver through the
    /// dispatcher instead.
    pub async fn refresh(&self) {
        match self.lock_live() {
            Ok(state) if state.binding.state() != BindingState::Failed => {}
            _ => return,
        }

        let read = tokio::select! {
            _ = self.cancel.cancelled() => return,
            outcome = tokio::time::timeout(
                self.command_timeout,
                self.gateway.read_attribute(&self.key, Duration::ZERO),
            ) => outcome,
        };

        match read {
            Ok(Ok(Some(value))) => {
                self.on_attribute_notification(&value);
            }
            Ok(Ok(None)) => {}
            Ok(Err(e)) if !e.is_recoverable() => {
                error!("[Sync] {}: Refresh failed, binding failed: {}", self.key, e);
                let _ = self.apply(|binding| {
                    binding.mark_failed();
                });
            }
            Ok(Err(e)) => warn!("[Sync] {}: Refresh failed: {}", self.key, e),
            Err(_) => warn!(
                "[Sync] {}: Refresh timed out after {:?}",
                self.key, self.command_timeout
            ),
        }
    }

    /// Decode a raw attribute value and publish it if it is new.
    ///
    /// Returns whether a channel update was published.
    pub fn on_attribute_notification(&self, raw: &RawValue) -> bool {
        let decoded = match self.decoder.decode(raw) {
            Ok(v) => v,
            Err(e) => {
                warn!("[Sync] {}: Dropping report {}: {}", self.key, raw, e);
                return false;
            }
        };

        {
            let mut state = self.state.lock();
            if self.disposed.load(Ordering::SeqCst) {
                return false;
            }
            if !state.binding.record_value(decoded.clone(), Instant::now()) {
                trace!("[Sync] {}: Duplicate report {}", self.key, decoded);
                return false;
            }
        }

        debug!("[Sync] {}: Attribute reports {}", self.key, decoded);
        self.sink.publish(&self.channel, &decoded);
        true
    }

    /// Stop syncing the attribute. Safe to call more than once and while a
    /// command is in flight; late completions are ignored.
    pub async fn dispose(&self) {
        {
            let mut state = self.state.lock();
            if self.disposed.swap(true, Ordering::SeqCst) {
                return;
            }
            state.binding.release();
            self.transitions.send_replace(BindingState::Unbound);
        }

        self.cancel.cancel();
        self.dispatcher.unregister(&self.key);
        self.gateway.remove_attribute_listener(&self.key).await;
        info!("[Sync] {}: Disposed channel '{}'", self.key, self.channel);
    }

    /// Re-resolve the attribute and clear a `Failed` binding.
    pub async fn reinitialize(&self) -> Result<()> {
        let _command = self.command_lock.lock().await;
        self.ensure_live()?;

        self.gateway.resolve(&self.key).await?;
        self.apply(|binding| binding.reset())?;
        info!("[Sync] {}: Re-initialized", self.key);
        Ok(())
    }

    pub fn key(&self) -> &AttributeKey {
        &self.key
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn state(&self) -> BindingState {
        self.state.lock().binding.state()
    }

    pub fn polling_period(&self) -> u32 {
        self.state.lock().binding.polling_period()
    }

    pub fn is_stale(&self) -> bool {
        self.state.lock().binding.is_stale(Instant::now())
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    pub fn editable_options(&self) -> Vec<ConfigOption> {
        self.state.lock().config.editable_options()
    }

    /// Receiver marked changed on every binding transition, including ones
    /// that only change the polling period.
    pub fn subscribe(&self) -> watch::Receiver<BindingState> {
        self.transitions.subscribe()
    }

    /// Token cancelled when the engine is disposed.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Success enables reporting with the max interval as staleness ceiling;
    /// failure polls at the normal period.
    fn handle_reporting_response(
        &self,
        result: &CommandResult,
        normal_polling: u32,
        max_reporting: u32,
    ) -> Result<BindingState> {
        match result {
            CommandResult::Success => {
                info!("[Sync] {}: Reporting active", self.key);
                self.apply(|binding| {
                    binding.mark_reporting_active(max_reporting);
                })
            }
            CommandResult::Failure { status } => {
                warn!(
                    "[Sync] {}: Reporting rejected ({}), polling every {}s",
                    self.key, status, normal_polling
                );
                self.apply(|binding| {
                    binding.mark_polling_active(normal_polling);
                })
            }
        }
    }

    fn handle_fault(&self, fault: SyncError, fallback_period: u32) -> Result<BindingState> {
        match fault {
            SyncError::Disposed => Err(SyncError::Disposed),
            e if e.is_recoverable() => {
                warn!(
                    "[Sync] {}: {}, polling every {}s",
                    self.key, e, fallback_period
                );
                self.apply(|binding| {
                    binding.mark_polling_active(fallback_period);
                })
            }
            e => {
                error!("[Sync] {}: {}, binding failed", self.key, e);
                self.apply(|binding| {
                    binding.mark_failed();
                })
            }
        }
    }

    async fn await_command<F>(&self, command: F) -> Result<CommandResult>
    where
        F: Future<Output = Result<CommandResult>>,
    {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(SyncError::Disposed),
            outcome = tokio::time::timeout(self.command_timeout, command) => match outcome {
                Ok(result) => result,
                Err(_) => Err(SyncError::Timeout(self.command_timeout)),
            },
        }
    }

    fn ensure_live(&self) -> Result<()> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(SyncError::Disposed);
        }
        Ok(())
    }

    fn lock_live(&self) -> Result<parking_lot::MutexGuard<'_, EngineState>> {
        let state = self.state.lock();
        if self.disposed.load(Ordering::SeqCst) {
            return Err(SyncError::Disposed);
        }
        Ok(state)
    }

    fn apply<F>(&self, transition: F) -> Result<BindingState>
    where
        F: FnOnce(&mut AttributeBinding),
    {
        let mut state = self.lock_live()?;
        transition(&mut state.binding);
        let current = state.binding.state();
        self.transitions.send_replace(current);
        Ok(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::mock::{MockGateway, Reply};
    use crate::sync::DecodedValue;
    use crate::sync::reporting::ChangeBounds;
    use crate::zcl::{ATTR_MEASURED_VALUE, ClusterType};
    use tokio_test::assert_ok;

    const DEVICE: &str = "0x00158d0001a2b3c4";

    #[derive(Default)]
    struct RecordingSink {
        updates: Mutex<Vec<(String, DecodedValue)>>,
    }

    impl RecordingSink {
        fn count(&self) -> usize {
            self.updates.lock().len()
        }
    }

    impl ChannelSink for RecordingSink {
        fn publish(&self, channel: &str, value: &DecodedValue) {
            self.updates
                .lock()
                .push((channel.to_string(), value.clone()));
        }
    }

    fn humidity_spec() -> AttributeSpec {
        let mut spec = AttributeSpec::for_kind("humidity", DEVICE, 1, AttributeKind::RelativeHumidity);
        spec.defaults = ReportingDefaults {
            min_interval: 1,
            max_interval: 3600,
            polling_period: 900,
            change: Some(ChangeBounds {
                default: 1.0,
                min: 1.0,
                max: 100.0,
            }),
        };
        spec.polling = PollingPolicy {
            normal: 900,
            high: 1500,
        };
        spec
    }

    struct Fixture {
        gateway: Arc<MockGateway>,
        dispatcher: Arc<NotificationDispatcher>,
        sink: Arc<RecordingSink>,
        engine: Arc<SyncEngine>,
    }

    async fn fixture_with(gateway: MockGateway, spec: AttributeSpec) -> Fixture {
        let gateway = Arc::new(gateway);
        let dispatcher = Arc::new(NotificationDispatcher::new());
        let sink = Arc::new(RecordingSink::default());
        let engine = SyncEngine::initialize(gateway.clone(), dispatcher.clone(), spec, sink.clone())
            .await
            .unwrap();
        Fixture {
            gateway,
            dispatcher,
            sink,
            engine,
        }
    }

    async fn fixture() -> Fixture {
        fixture_with(MockGateway::new(), humidity_spec()).await
    }

    #[tokio::test]
    async fn test_initialize_registers_without_commands() {
        let f = fixture().await;

        assert_eq!(f.engine.state(), BindingState::Unbound);
        assert_eq!(f.dispatcher.len(), 1);
        assert!(f.gateway.listeners.lock().contains(f.engine.key()));
        assert_eq!(f.gateway.bind_count(), 0);
        assert_eq!(f.gateway.reporting_count(), 0);
    }

    #[tokio::test]
    async fn test_initialize_missing_attribute() {
        let gateway = Arc::new(MockGateway::new().with_missing_attribute());
        let dispatcher = Arc::new(NotificationDispatcher::new());

        let result = SyncEngine::initialize(
            gateway.clone(),
            dispatcher.clone(),
            humidity_spec(),
            Arc::new(RecordingSink::default()),
        )
        .await;

        let Err(err) = result else {
            panic!("initialize succeeded for a missing attribute");
        };
        assert!(matches!(err, SyncError::AttributeNotFound(_)));
        assert!(dispatcher.is_empty());
        assert!(gateway.listeners.lock().is_empty());
    }

    #[tokio::test]
    async fn test_activate_reporting_success() {
        let f = fixture().await;

        let state = assert_ok!(f.engine.activate().await);

        assert_eq!(state, BindingState::ReportingActive);
        assert_eq!(f.engine.polling_period(), 3600);
        assert_eq!(
            *f.gateway.reporting_calls.lock(),
            vec![(1, 3600, Some(1.0))]
        );
    }

    #[tokio::test]
    async fn test_bind_interrupted_polls_high() {
        let f = fixture().await;
        f.gateway.set_bind_reply(Reply::Transport);

        let state = assert_ok!(f.engine.activate().await);

        assert_eq!(state, BindingState::PollingActive);
        assert_eq!(f.engine.polling_period(), 1500);
        assert_eq!(f.gateway.reporting_count(), 0);
    }

    #[tokio::test]
    async fn test_bind_rejected_polls_high() {
        let f = fixture().await;
        f.gateway.set_bind_reply(Reply::Failure("NOT_SUPPORTED"));

        assert_eq!(
            f.engine.activate().await.unwrap(),
            BindingState::PollingActive
        );
        assert_eq!(f.engine.polling_period(), 1500);
        assert_eq!(f.gateway.reporting_count(), 0);
    }

    #[tokio::test]
    async fn test_reporting_rejected_polls_normal() {
        let f = fixture().await;
        f.gateway
            .set_reporting_reply(Reply::Failure("UNREPORTABLE_ATTRIBUTE"));

        assert_eq!(
            f.engine.activate().await.unwrap(),
            BindingState::PollingActive
        );
        assert_eq!(f.engine.polling_period(), 900);
    }

    #[tokio::test]
    async fn test_reporting_unsupported_polls_high() {
        let f = fixture().await;
        f.gateway.set_reporting_reply(Reply::Unsupported);

        assert_eq!(
            f.engine.activate().await.unwrap(),
            BindingState::PollingActive
        );
        assert_eq!(f.engine.polling_period(), 1500);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bind_timeout_polls_high() {
        let f = fixture().await;
        f.gateway.set_bind_reply(Reply::Hang);

        assert_eq!(
            f.engine.activate().await.unwrap(),
            BindingState::PollingActive
        );
        assert_eq!(f.engine.polling_period(), 1500);
    }

    #[tokio::test]
    async fn test_gateway_closed_fails_until_reinitialized() {
        let f = fixture().await;
        f.gateway.set_bind_reply(Reply::Closed);

        assert_eq!(f.engine.activate().await.unwrap(), BindingState::Failed);
        // Failed is terminal: no new bind attempt
        assert_eq!(f.engine.activate().await.unwrap(), BindingState::Failed);
        assert_eq!(f.gateway.bind_count(), 1);

        f.gateway.set_bind_reply(Reply::Success);
        assert_ok!(f.engine.reinitialize().await);
        assert_eq!(f.engine.state(), BindingState::Unbound);
        assert_eq!(
            f.engine.activate().await.unwrap(),
            BindingState::ReportingActive
        );
    }

    #[tokio::test]
    async fn test_reconcile_identical_is_noop() {
        let f = fixture().await;
        f.engine.activate().await.unwrap();

        let update = ReportingUpdate {
            min_interval: Some(1),
            max_interval: Some(3600),
            reportable_change: Some(1.0),
            polling_period: Some(900),
        };
        let state = f.engine.reconcile(&update).await.unwrap();

        assert_eq!(state, BindingState::ReportingActive);
        assert_eq!(f.gateway.reporting_count(), 1);
    }

    #[tokio::test]
    async fn test_reconcile_pushes_new_configuration() {
        let f = fixture().await;
        f.engine.activate().await.unwrap();

        let update = ReportingUpdate {
            max_interval: Some(600),
            reportable_change: Some(500.0),
            ..Default::default()
        };
        let state = f.engine.reconcile(&update).await.unwrap();

        assert_eq!(state, BindingState::ReportingActive);
        assert_eq!(f.engine.polling_period(), 600);
        assert_eq!(
            f.gateway.reporting_calls.lock().last(),
            Some(&(1, 600, Some(100.0)))
        );
    }

    #[tokio::test]
    async fn test_reconcile_failure_uses_configured_polling() {
        let f = fixture().await;
        f.engine.activate().await.unwrap();
        f.gateway.set_reporting_reply(Reply::Failure("INVALID_VALUE"));

        let update = ReportingUpdate {
            min_interval: Some(30),
            polling_period: Some(120),
            ..Default::default()
        };
        let state = f.engine.reconcile(&update).await.unwrap();

        assert_eq!(state, BindingState::PollingActive);
        assert_eq!(f.engine.polling_period(), 120);
    }

    #[tokio::test]
    async fn test_reconcile_can_recover_reporting() {
        let f = fixture().await;
        f.gateway.set_reporting_reply(Reply::Failure("UNREPORTABLE_ATTRIBUTE"));
        f.engine.activate().await.unwrap();
        assert_eq!(f.engine.state(), BindingState::PollingActive);

        f.gateway.set_reporting_reply(Reply::Success);
        let state = f
            .engine
            .reconcile(&ReportingUpdate {
                min_interval: Some(10),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(state, BindingState::ReportingActive);
    }

    #[tokio::test]
    async fn test_reconcile_before_activation_only_stores() {
        let f = fixture().await;

        let state = f
            .engine
            .reconcile(&ReportingUpdate {
                min_interval: Some(60),
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(state, BindingState::Unbound);
        assert_eq!(f.gateway.reporting_count(), 0);

        f.engine.activate().await.unwrap();
        assert_eq!(
            f.gateway.reporting_calls.lock().first(),
            Some(&(60, 3600, Some(1.0)))
        );
    }

    #[tokio::test]
    async fn test_identical_notifications_publish_once() {
        let f = fixture().await;

        for _ in 0..5 {
            f.engine.on_attribute_notification(&RawValue::Integer(5550));
        }
        assert_eq!(f.sink.count(), 1);

        assert!(f.engine.on_attribute_notification(&RawValue::Integer(5600)));
        assert!(!f.engine.on_attribute_notification(&RawValue::Integer(5600)));
        assert!(f.engine.on_attribute_notification(&RawValue::Integer(5550)));
        assert_eq!(f.sink.count(), 3);

        let updates = f.sink.updates.lock();
        assert_eq!(
            updates[1],
            ("humidity".to_string(), DecodedValue::Decimal(56.0))
        );
    }

    #[tokio::test]
    async fn test_undecodable_notification_dropped() {
        let f = fixture().await;
        assert!(!f.engine.on_attribute_notification(&RawValue::Text("n/a".into())));
        assert_eq!(f.sink.count(), 0);
    }

    /// Sink that reads engine state from inside `publish`.
    #[derive(Default)]
    struct InspectingSink {
        engine: std::sync::OnceLock<Arc<SyncEngine>>,
        seen: Mutex<Vec<(BindingState, u32)>>,
    }

    impl ChannelSink for InspectingSink {
        fn publish(&self, _channel: &str, _value: &DecodedValue) {
            if let Some(engine) = self.engine.get() {
                self.seen
                    .lock()
                    .push((engine.state(), engine.polling_period()));
            }
        }
    }

    #[tokio::test]
    async fn test_sink_can_read_engine_state() {
        let sink = Arc::new(InspectingSink::default());
        let engine = SyncEngine::initialize(
            Arc::new(MockGateway::new()),
            Arc::new(NotificationDispatcher::new()),
            humidity_spec(),
            sink.clone(),
        )
        .await
        .unwrap();
        let _ = sink.engine.set(engine.clone());
        engine.activate().await.unwrap();

        assert!(engine.on_attribute_notification(&RawValue::Integer(5120)));
        assert_eq!(
            *sink.seen.lock(),
            vec![(BindingState::ReportingActive, 3600)]
        );
    }

    #[tokio::test]
    async fn test_transitions_are_signalled() {
        let f = fixture().await;
        let mut transitions = f.engine.subscribe();

        f.engine.activate().await.unwrap();
        assert!(transitions.has_changed().unwrap());
        assert_eq!(*transitions.borrow_and_update(), BindingState::ReportingActive);

        f.gateway.set_reporting_reply(Reply::Failure("INVALID_VALUE"));
        f.engine
            .reconcile(&ReportingUpdate {
                polling_period: Some(60),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(transitions.has_changed().unwrap());
        assert_eq!(*transitions.borrow_and_update(), BindingState::PollingActive);

        f.engine.dispose().await;
        assert_eq!(*transitions.borrow_and_update(), BindingState::Unbound);
    }

    #[tokio::test]
    async fn test_refresh_publishes_read_value() {
        let f = fixture().await;
        f.gateway.set_bind_reply(Reply::Transport);
        f.engine.activate().await.unwrap();
        f.gateway.set_read_value(Some(RawValue::Integer(4210)));

        f.engine.refresh().await;

        assert_eq!(f.gateway.read_count(), 1);
        assert_eq!(
            f.sink.updates.lock().first().map(|(_, v)| v.clone()),
            Some(DecodedValue::Decimal(42.1))
        );
    }

    #[tokio::test]
    async fn test_dispose_during_inflight_reporting() {
        let f = fixture().await;
        f.gateway.set_reporting_reply(Reply::Gated);

        let engine = f.engine.clone();
        let activation = tokio::spawn(async move { engine.activate().await });

        f.gateway.entered.notified().await;
        f.engine.dispose().await;
        f.gateway.release.notify_one();

        let outcome = activation.await.unwrap();
        assert!(matches!(outcome, Err(SyncError::Disposed)));
        assert_eq!(f.engine.state(), BindingState::Unbound);
        assert!(f.engine.is_disposed());
        assert!(f.dispatcher.is_empty());
        assert!(f.gateway.listeners.lock().is_empty());

        assert!(!f.engine.on_attribute_notification(&RawValue::Integer(5000)));
        assert_eq!(f.sink.count(), 0);
    }

    #[tokio::test]
    async fn test_dispose_idempotent() {
        let f = fixture().await;
        f.engine.dispose().await;
        f.engine.dispose().await;

        assert!(matches!(f.engine.activate().await, Err(SyncError::Disposed)));
        assert!(matches!(
            f.engine.reconcile(&ReportingUpdate::default()).await,
            Err(SyncError::Disposed)
        ));
        f.engine.refresh().await;
        assert_eq!(f.gateway.read_count(), 0);
    }

    #[tokio::test]
    async fn test_editable_options_follow_config() {
        let f = fixture().await;
        f.engine
            .reconcile(&ReportingUpdate {
                reportable_change: Some(7.0),
                ..Default::default()
            })
            .await
            .unwrap();

        let change = f
            .engine
            .editable_options()
            .into_iter()
            .find(|o| o.name == crate::sync::reporting::CONFIG_REPORTING_CHANGE)
            .unwrap();
        assert_eq!(change.value, 7.0);
    }

    #[tokio::test]
    async fn test_spec_for_kind() {
        let spec = AttributeSpec::for_kind("rh", DEVICE, 2, AttributeKind::RelativeHumidity);
        assert_eq!(
            spec.key,
            AttributeKey::new(DEVICE, 2, ClusterType::RelativeHumidityMeasurement, ATTR_MEASURED_VALUE)
        );
        assert_eq!(spec.command_timeout, DEFAULT_COMMAND_TIMEOUT);
    }
}
