// ── Agent runtime ──
//
// Wires the control channel, desired-state store, mode gate, reconciler and
// metrics reporter together. Three tasks run side by side:
//
//   * the channel task (edgeward-api) owns the transport,
//   * the dispatcher (this module's `run` loop) turns inbound frames into
//     store and mode updates and answers status requests,
//   * the worker runs reconciliation passes, one at a time.
//
// Triggers that arrive while a pass is running are coalesced into a single
// follow-up pass against the newest desired state.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use arc_swap::ArcSwapOption;
use chrono::Utc;
use edgeward_api::{
    ChannelHandle, Connector, ControlChannel, Inbound, Outbound, OutcomeReport, StatusReport,
};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::config::AgentConfig;
use crate::convert;
use crate::error::CoreError;
use crate::mode::{Mode, ModeGate};
use crate::model::{DesiredState, ValidationIssue};
use crate::provider::Provider;
use crate::reconcile::{ReconciliationOutcome, Reconciler};
use crate::reporter::Reporter;
use crate::store::{DesiredStateStore, Replace};

// ── Shared state ─────────────────────────────────────────────────────

/// State observable from outside the agent's tasks.
#[derive(Debug)]
pub struct AgentState {
    pub store: DesiredStateStore,
    pub mode: ModeGate,
    last_outcome: ArcSwapOption<ReconciliationOutcome>,
    reconciling: AtomicBool,
}

impl AgentState {
    pub fn new(initial_mode: Mode) -> Self {
        Self {
            store: DesiredStateStore::new(),
            mode: ModeGate::new(initial_mode),
            last_outcome: ArcSwapOption::empty(),
            reconciling: AtomicBool::new(false),
        }
    }

    /// Outcome of the most recent completed pass.
    pub fn last_outcome(&self) -> Option<Arc<ReconciliationOutcome>> {
        self.last_outcome.load_full()
    }

    /// Store a pushed desired state and, when it is stored, switch to the
    /// mode that came with it.
    ///
    /// The store is updated before the mode, so any pass that sees the new
    /// mode also sees this desired state.
    pub fn accept(&self, desired: DesiredState, mode: Option<Mode>) -> Replace {
        let replaced = self.store.replace(desired);
        if let (true, Some(mode)) = (replaced.is_stored(), mode) {
            self.mode.instruct(mode);
        }
        replaced
    }

    /// A pass is currently executing.
    pub fn is_reconciling(&self) -> bool {
        self.reconciling.load(Ordering::Acquire)
    }
}

// ── Agent ────────────────────────────────────────────────────────────

pub struct Agent {
    config: AgentConfig,
    provider: Arc<dyn Provider>,
    connector: Arc<dyn Connector>,
    state: Arc<AgentState>,
}

impl Agent {
    pub fn new(
        config: AgentConfig,
        provider: Arc<dyn Provider>,
        connector: Arc<dyn Connector>,
    ) -> Self {
        let state = Arc::new(AgentState::new(config.initial_mode));
        Self {
            config,
            provider,
            connector,
            state,
        }
    }

    pub fn state(&self) -> Arc<AgentState> {
        Arc::clone(&self.state)
    }

    /// Run until `cancel` fires or the control channel task ends.
    ///
    /// An in-flight reconciliation pass is allowed to finish before this
    /// returns.
    pub async fn run(self, cancel: CancellationToken) -> Result<(), CoreError> {
        info!(
            device_id = %self.config.device_id,
            endpoint = %self.config.endpoint,
            provider = self.provider.name(),
            mode = %self.state.mode.current(),
            "agent starting"
        );

        let stop = cancel.child_token();
        let (channel, mut inbound, channel_task) = ControlChannel::spawn(
            Arc::clone(&self.connector),
            self.config.channel_config(),
            stop.clone(),
        );

        let reconciler = Reconciler::new(
            Arc::clone(&self.provider),
            self.config.provider_timeout,
            self.config.retry,
        );
        let worker = tokio::spawn(reconcile_worker(
            Arc::clone(&self.state),
            reconciler,
            channel.clone(),
            self.config.resync_interval,
            stop.clone(),
        ));
        let reporter = Reporter::new(
            Arc::clone(&self.provider),
            self.config.device_id.clone(),
            self.config.metrics_interval,
            self.config.provider_timeout,
        )
        .spawn(channel.clone(), stop.clone());

        let dispatcher = Dispatcher {
            state: &self.state,
            channel: &channel,
            device_id: &self.config.device_id,
        };
        let mut connection = channel.subscribe_state();

        loop {
            tokio::select! {
                biased;
                () = stop.cancelled() => break,
                frame = inbound.recv() => {
                    let Some(frame) = frame else {
                        warn!("control channel closed");
                        break;
                    };
                    dispatcher.handle(frame);
                }
                changed = connection.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let connected = connection.borrow_and_update().is_connected();
                    if connected {
                        dispatcher.send_status(None);
                    }
                }
            }
        }

        info!("agent shutting down");
        stop.cancel();
        for (name, task) in [
            ("reconcile worker", worker),
            ("metrics reporter", reporter),
            ("control channel", channel_task),
        ] {
            if let Err(e) = task.await {
                warn!(task = name, error = %e, "task ended abnormally");
            }
        }
        Ok(())
    }
}

// ── Inbound dispatch ─────────────────────────────────────────────────

struct Dispatcher<'a> {
    state: &'a AgentState,
    channel: &'a ChannelHandle,
    device_id: &'a str,
}

impl Dispatcher<'_> {
    fn handle(&self, frame: Inbound) {
        let kind = frame.kind();
        trace!(kind, "inbound frame");
        match frame {
            Inbound::ConfigPush {
                sequence,
                mode,
                config,
            } => self.accept_push(sequence, mode.as_deref(), config),
            Inbound::StatusRequest { request_id } => self.send_status(request_id),
            Inbound::SetMode { mode } => match mode.parse::<Mode>() {
                Ok(mode) => {
                    self.state.mode.instruct(mode);
                }
                Err(_) => warn!(%mode, "ignoring SET_MODE with unknown mode"),
            },
            Inbound::Welcome { .. } | Inbound::AuthRejected { .. } | Inbound::HeartbeatAck { .. } => {
                debug!(kind, "ignoring handshake frame outside handshake");
            }
        }
    }

    fn accept_push(&self, sequence: u64, mode: Option<&str>, config: serde_json::Value) {
        if let Some(current) = self.state.store.sequence() {
            if sequence <= current {
                warn!(sequence, current, "discarding stale or duplicate push");
                return;
            }
        }

        let mode = match mode.map(str::parse::<Mode>).transpose() {
            Ok(mode) => mode,
            Err(_) => {
                let err = CoreError::ConfigValidation {
                    issues: vec![ValidationIssue::malformed(format!(
                        "unknown mode {:?}",
                        mode.unwrap_or_default()
                    ))],
                };
                self.reject(sequence, &err);
                return;
            }
        };

        let desired = match convert::desired_from_push(sequence, config) {
            Ok(desired) => desired,
            Err(err) => {
                self.reject(sequence, &err);
                return;
            }
        };

        info!(sequence, resources = desired.config.total(), "accepted desired state");
        if self.state.accept(desired, mode).is_stored() {
            self.channel.set_last_sequence(sequence);
        }
    }

    fn reject(&self, sequence: u64, err: &CoreError) {
        warn!(sequence, error = %err, "rejecting desired state");
        let report = convert::rejection_report(sequence, self.state.mode.current(), err);
        send(self.channel, Outbound::Nack(report));
    }

    fn send_status(&self, request_id: Option<String>) {
        let report = status_report(self.state, self.channel, self.device_id, request_id);
        send(self.channel, Outbound::StatusReport(report));
    }
}

/// Current agent status, as reported in `STATUS_REPORT`.
pub fn status_report(
    state: &AgentState,
    channel: &ChannelHandle,
    device_id: &str,
    request_id: Option<String>,
) -> StatusReport {
    StatusReport {
        request_id,
        device_id: device_id.to_owned(),
        timestamp: Utc::now(),
        connection: channel.state().label().to_owned(),
        mode: state.mode.current().to_string(),
        sequence: state.store.sequence(),
        reconciling: state.is_reconciling(),
        last_outcome: state
            .last_outcome()
            .map(|outcome| OutcomeReport::from(outcome.as_ref())),
    }
}

fn send(channel: &ChannelHandle, frame: Outbound) {
    let kind = frame.kind();
    if let Err(e) = channel.try_send(frame) {
        warn!(kind, error = %e, "outbound frame dropped");
    }
}

// ── Reconcile worker ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trigger {
    DesiredState,
    Mode,
    Resync,
}

async fn reconcile_worker(
    state: Arc<AgentState>,
    reconciler: Reconciler,
    channel: ChannelHandle,
    resync: Option<Duration>,
    cancel: CancellationToken,
) {
    let mut desired_rx = state.store.subscribe();
    let mut mode_rx = state.mode.subscribe();
    let mut resync_timer = resync.map(|period| {
        let mut timer = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        timer
    });

    loop {
        let trigger = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            changed = desired_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                Trigger::DesiredState
            }
            changed = mode_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                Trigger::Mode
            }
            () = next_resync(&mut resync_timer) => Trigger::Resync,
        };

        // Everything observed up to here is covered by this pass.
        mark_seen(&mut desired_rx);
        mark_seen(&mut mode_rx);

        let Some(desired) = state.store.current() else {
            debug!(?trigger, "no desired state yet, nothing to reconcile");
            continue;
        };
        let mode = state.mode.current();

        debug!(?trigger, sequence = desired.sequence, %mode, "reconcile triggered");
        state.reconciling.store(true, Ordering::Release);
        let outcome = reconciler.reconcile(&desired, mode).await;
        state.reconciling.store(false, Ordering::Release);

        let quiet = trigger == Trigger::Resync && outcome.plan.is_empty() && outcome.is_success();
        if !quiet {
            let report = OutcomeReport::from(&outcome);
            let frame = if outcome.is_success() {
                Outbound::Ack(report)
            } else {
                Outbound::Nack(report)
            };
            send(&channel, frame);
        }
        state.last_outcome.store(Some(Arc::new(outcome)));
    }
    debug!("reconcile worker exiting");
}

fn mark_seen<T>(rx: &mut watch::Receiver<T>) {
    rx.borrow_and_update();
}

async fn next_resync(timer: &mut Option<Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        }
        None => std::future::pending().await,
    }
}
