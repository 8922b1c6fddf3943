//! Persistent control channel with an explicit connection state machine.
//!
//! The channel owns the connection lifecycle:
//!
//! ```text
//! Disconnected → Connecting → Authenticating → Connected → Backoff → Connecting → …
//! ```
//!
//! [`ConnectionMachine`] is the single source of truth for that lifecycle and
//! is pure (no I/O), so every transition is unit-testable. [`ControlChannel`]
//! drives it from a background task: it connects through a [`Connector`],
//! performs the `HELLO`/`WELCOME` credential exchange, then runs a reader
//! half (inbound frames → `mpsc`) and a writer half (outbound queue +
//! heartbeats → transport) until the session breaks, backs off, and retries
//! forever. Only cancellation ends the loop.

use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures::{Sink, SinkExt, Stream, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::backoff::{BackoffPolicy, FailureCause};
use crate::error::Error;
use crate::protocol::{self, Hello, Inbound, Outbound};

const OUTBOUND_CHANNEL_CAPACITY: usize = 64;
const INBOUND_CHANNEL_CAPACITY: usize = 64;

/// Missed heartbeat intervals tolerated before the session is declared dead.
const IDLE_HEARTBEATS: u32 = 3;

// ── ConnectionState ──────────────────────────────────────────────────

/// Connection state, owned exclusively by the control channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Authenticating,
    Connected,
    Backoff { attempt: u32, delay: Duration },
}

impl ConnectionState {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Authenticating => "authenticating",
            Self::Connected => "connected",
            Self::Backoff { .. } => "backoff",
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Events that drive [`ConnectionMachine`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelEvent {
    ConnectAttempt,
    TransportEstablished,
    AuthSucceeded,
    AuthFailed,
    TransportError,
    BackoffElapsed,
}

// ── ConnectionMachine ────────────────────────────────────────────────

/// Pure connection state machine plus the backoff bookkeeping that goes
/// with it.
#[derive(Debug)]
pub struct ConnectionMachine {
    state: ConnectionState,
    policy: BackoffPolicy,
    attempt: u32,
    connected_since: Option<Instant>,
}

impl ConnectionMachine {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            policy,
            attempt: 0,
            connected_since: None,
        }
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    /// Number of consecutive failed sessions since the counter last reset.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Apply an event, returning the new state.
    ///
    /// Entering `Backoff` computes the wait from the policy. A session that
    /// stayed `Connected` for at least the stability threshold resets the
    /// attempt counter first.
    pub fn apply(&mut self, event: ChannelEvent, now: Instant) -> Result<&ConnectionState, Error> {
        use ChannelEvent as E;
        use ConnectionState as S;

        let current = self.state.clone();
        let next = match (current, event) {
            (S::Disconnected, E::ConnectAttempt) | (S::Backoff { .. }, E::BackoffElapsed) => {
                S::Connecting
            }
            (S::Connecting, E::TransportEstablished) => S::Authenticating,
            (S::Authenticating, E::AuthSucceeded) => {
                self.connected_since = Some(now);
                S::Connected
            }
            (S::Authenticating, E::AuthFailed) => self.enter_backoff(FailureCause::Auth, now),
            (S::Connecting | S::Authenticating | S::Connected, E::TransportError) => {
                self.enter_backoff(FailureCause::Connection, now)
            }
            (from, event) => {
                return Err(Error::InvalidTransition {
                    from: from.to_string(),
                    event: format!("{event:?}"),
                });
            }
        };

        self.state = next;
        Ok(&self.state)
    }

    fn enter_backoff(&mut self, cause: FailureCause, now: Instant) -> ConnectionState {
        if let Some(since) = self.connected_since.take() {
            if now.saturating_duration_since(since) >= self.policy.stability_threshold {
                self.attempt = 0;
            }
        }

        let attempt = self.attempt;
        let delay = self.policy.delay(attempt, cause);
        self.attempt = self.attempt.saturating_add(1);
        ConnectionState::Backoff { attempt, delay }
    }
}

// ── Transport abstraction ────────────────────────────────────────────

pub type FrameSink = Pin<Box<dyn Sink<String, Error = Error> + Send>>;
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<String, Error>> + Send>>;

/// An established, not yet authenticated, text-frame transport.
pub struct Connection {
    pub sink: FrameSink,
    pub stream: FrameStream,
}

/// Opens transports to the control plane.
///
/// Implemented over WebSocket by [`WebSocketConnector`](crate::WebSocketConnector);
/// tests plug in in-memory transports.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self) -> Result<Connection, Error>;
}

// ── ChannelConfig ────────────────────────────────────────────────────

/// Tuning for a control channel.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    pub device_id: String,
    pub credential: SecretString,
    pub agent_version: String,
    /// Interval between outbound heartbeats. The control plane may
    /// override it in `WELCOME`.
    pub heartbeat_interval: Duration,
    /// How long to wait for `WELCOME` after `HELLO`.
    pub auth_timeout: Duration,
    /// How long to wait for the transport to come up.
    pub connect_timeout: Duration,
    pub backoff: BackoffPolicy,
}

impl ChannelConfig {
    pub fn new(device_id: impl Into<String>, credential: SecretString) -> Self {
        let device_id = device_id.into();
        let backoff = BackoffPolicy::default().with_jitter_seed_from(&device_id);
        Self {
            device_id,
            credential,
            agent_version: env!("CARGO_PKG_VERSION").to_owned(),
            heartbeat_interval: Duration::from_secs(15),
            auth_timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(15),
            backoff,
        }
    }
}

// ── ChannelHandle ────────────────────────────────────────────────────

/// Handle to a running control channel.
///
/// Cheaply cloneable. Outbound frames are queued and flushed by the writer
/// half whenever a session is up.
#[derive(Clone)]
pub struct ChannelHandle {
    outbound: mpsc::Sender<Outbound>,
    state: watch::Receiver<ConnectionState>,
    last_sequence: Arc<watch::Sender<Option<u64>>>,
    cancel: CancellationToken,
}

impl ChannelHandle {
    /// Queue a frame without waiting. Fails if the queue is full or the
    /// channel has shut down.
    pub fn try_send(&self, frame: Outbound) -> Result<(), Error> {
        let kind = frame.kind();
        self.outbound.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                Error::Connection(format!("outbound queue full, dropped {kind}"))
            }
            mpsc::error::TrySendError::Closed(_) => {
                Error::Connection(format!("channel shut down, dropped {kind}"))
            }
        })
    }

    /// Queue a frame, waiting for queue capacity.
    pub async fn send(&self, frame: Outbound) -> Result<(), Error> {
        self.outbound
            .send(frame)
            .await
            .map_err(|e| Error::Connection(format!("channel shut down, dropped {}", e.0.kind())))
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.state.borrow().clone()
    }

    /// Subscribe to connection state changes.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Record the sequence number of the stored desired state; it is
    /// advertised in `HELLO` and heartbeats.
    pub fn set_last_sequence(&self, sequence: u64) {
        self.last_sequence.send_replace(Some(sequence));
    }

    /// Signal the background task to shut down.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

// ── ControlChannel ───────────────────────────────────────────────────

/// Spawns and owns the reconnecting control-channel task.
pub struct ControlChannel;

impl ControlChannel {
    /// Spawn the channel task.
    ///
    /// Returns the handle, the receiver of inbound frames (everything after
    /// the handshake), and the task's join handle. The first connection
    /// attempt happens asynchronously.
    pub fn spawn(
        connector: Arc<dyn Connector>,
        config: ChannelConfig,
        cancel: CancellationToken,
    ) -> (ChannelHandle, mpsc::Receiver<Inbound>, JoinHandle<()>) {
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_CHANNEL_CAPACITY);
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_CHANNEL_CAPACITY);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let (sequence_tx, sequence_rx) = watch::channel(None);

        let task = tokio::spawn(channel_loop(
            connector,
            config,
            outbound_rx,
            inbound_tx,
            state_tx,
            sequence_rx,
            cancel.clone(),
        ));

        let handle = ChannelHandle {
            outbound: outbound_tx,
            state: state_rx,
            last_sequence: Arc::new(sequence_tx),
            cancel,
        };

        (handle, inbound_rx, task)
    }
}

// ── Background loop ──────────────────────────────────────────────────

/// Main loop: connect → authenticate → session → backoff → reconnect.
async fn channel_loop(
    connector: Arc<dyn Connector>,
    config: ChannelConfig,
    mut outbound_rx: mpsc::Receiver<Outbound>,
    inbound_tx: mpsc::Sender<Inbound>,
    state_tx: watch::Sender<ConnectionState>,
    last_sequence: watch::Receiver<Option<u64>>,
    cancel: CancellationToken,
) {
    let mut machine = ConnectionMachine::new(config.backoff.clone());
    let instance_id = Uuid::new_v4();

    loop {
        let event = if matches!(machine.state(), ConnectionState::Backoff { .. }) {
            ChannelEvent::BackoffElapsed
        } else {
            ChannelEvent::ConnectAttempt
        };
        drive(&mut machine, &state_tx, event);

        let mut session = Session {
            config: &config,
            instance_id,
            machine: &mut machine,
            state_tx: &state_tx,
            last_sequence: &last_sequence,
        };

        let failure = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            failure = session.run(connector.as_ref(), &mut outbound_rx, &inbound_tx) => failure,
        };

        let event = if failure.is_auth() && *machine.state() == ConnectionState::Authenticating {
            ChannelEvent::AuthFailed
        } else {
            ChannelEvent::TransportError
        };
        warn!(error = %failure, state = %machine.state(), "control channel session ended");
        drive(&mut machine, &state_tx, event);

        let delay = match machine.state() {
            ConnectionState::Backoff { delay, .. } => *delay,
            _ => config.backoff.max_delay,
        };
        info!(
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            attempt = machine.attempt(),
            "waiting before reconnect"
        );

        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            () = tokio::time::sleep(delay) => {}
        }
    }

    state_tx.send_replace(ConnectionState::Disconnected);
    debug!("control channel loop exiting");
}

/// Apply an event and publish the resulting state.
fn drive(machine: &mut ConnectionMachine, state_tx: &watch::Sender<ConnectionState>, event: ChannelEvent) {
    match machine.apply(event, Instant::now()) {
        Ok(state) => {
            trace!(?event, state = %state, "connection transition");
            state_tx.send_replace(state.clone());
        }
        Err(e) => warn!(error = %e, "ignored connection event"),
    }
}

// ── Single session ───────────────────────────────────────────────────

struct Session<'a> {
    config: &'a ChannelConfig,
    instance_id: Uuid,
    machine: &'a mut ConnectionMachine,
    state_tx: &'a watch::Sender<ConnectionState>,
    last_sequence: &'a watch::Receiver<Option<u64>>,
}

impl Session<'_> {
    /// Run one session to completion. Always ends in an error: the channel
    /// never stops on its own.
    async fn run(
        &mut self,
        connector: &dyn Connector,
        outbound_rx: &mut mpsc::Receiver<Outbound>,
        inbound_tx: &mpsc::Sender<Inbound>,
    ) -> Error {
        let connect_timeout = self.config.connect_timeout;
        let connection = match tokio::time::timeout(connect_timeout, connector.connect()).await {
            Ok(Ok(connection)) => connection,
            Ok(Err(e)) => return e,
            Err(_) => return timeout_error("connect", connect_timeout),
        };
        drive(self.machine, self.state_tx, ChannelEvent::TransportEstablished);

        let Connection {
            mut sink,
            mut stream,
        } = connection;

        let heartbeat = match self.authenticate(&mut sink, &mut stream).await {
            Ok(heartbeat) => heartbeat,
            Err(e) => return e,
        };
        drive(self.machine, self.state_tx, ChannelEvent::AuthSucceeded);

        let idle = heartbeat * IDLE_HEARTBEATS;
        tokio::select! {
            failure = read_half(&mut stream, inbound_tx, idle) => failure,
            failure = write_half(&mut sink, outbound_rx, heartbeat, self.last_sequence) => failure,
        }
    }

    /// `HELLO` → `WELCOME` | `AUTH_REJECTED`. Returns the negotiated
    /// heartbeat interval.
    async fn authenticate(
        &self,
        sink: &mut FrameSink,
        stream: &mut FrameStream,
    ) -> Result<Duration, Error> {
        let hello = Outbound::Hello(Hello {
            device_id: self.config.device_id.clone(),
            instance_id: self.instance_id,
            agent_version: self.config.agent_version.clone(),
            credential: self.config.credential.expose_secret().to_owned(),
            last_sequence: *self.last_sequence.borrow(),
        });
        send_frame(sink, &hello).await?;

        let auth_timeout = self.config.auth_timeout;
        let text = match tokio::time::timeout(auth_timeout, stream.next()).await {
            Err(_) => return Err(timeout_error("authentication", auth_timeout)),
            Ok(None) => {
                return Err(Error::Closed {
                    code: 1006,
                    reason: "stream ended during authentication".into(),
                });
            }
            Ok(Some(frame)) => frame?,
        };

        match protocol::decode(&text)? {
            Inbound::Welcome {
                session_id,
                heartbeat_secs,
            } => {
                let heartbeat = heartbeat_secs
                    .filter(|secs| *secs > 0)
                    .map_or(self.config.heartbeat_interval, Duration::from_secs);
                info!(%session_id, heartbeat_secs = heartbeat.as_secs(), "control channel connected");
                Ok(heartbeat)
            }
            Inbound::AuthRejected { reason } => Err(Error::Auth { reason }),
            other => Err(Error::Protocol {
                message: format!("expected WELCOME, got {}", other.kind()),
                frame: text,
            }),
        }
    }
}

/// Forward inbound frames until the transport breaks or goes quiet.
async fn read_half(
    stream: &mut FrameStream,
    inbound_tx: &mpsc::Sender<Inbound>,
    idle: Duration,
) -> Error {
    loop {
        let text = match tokio::time::timeout(idle, stream.next()).await {
            Err(_) => return timeout_error("idle read", idle),
            Ok(None) => {
                return Error::Closed {
                    code: 1006,
                    reason: "stream ended".into(),
                };
            }
            Ok(Some(Err(e))) => return e,
            Ok(Some(Ok(text))) => text,
        };

        match protocol::decode(&text) {
            Ok(Inbound::HeartbeatAck { .. }) => trace!("heartbeat acknowledged"),
            Ok(Inbound::AuthRejected { reason }) => return Error::Auth { reason },
            Ok(Inbound::Welcome { .. }) => debug!("ignoring WELCOME outside handshake"),
            Ok(frame) => {
                debug!(kind = frame.kind(), "inbound frame");
                if inbound_tx.send(frame).await.is_err() {
                    return Error::Connection("inbound consumer dropped".into());
                }
            }
            // A single bad frame does not break the session.
            Err(e) => warn!(error = %e, "dropping undecodable frame"),
        }
    }
}

/// Flush queued frames and emit heartbeats until the transport breaks.
async fn write_half(
    sink: &mut FrameSink,
    outbound_rx: &mut mpsc::Receiver<Outbound>,
    heartbeat: Duration,
    last_sequence: &watch::Receiver<Option<u64>>,
) -> Error {
    let mut ticker = tokio::time::interval(heartbeat);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await; // consume the immediate first tick

    loop {
        let frame = tokio::select! {
            _ = ticker.tick() => Outbound::Heartbeat {
                timestamp: Utc::now(),
                sequence: *last_sequence.borrow(),
            },
            frame = outbound_rx.recv() => match frame {
                Some(frame) => frame,
                None => return Error::Connection("outbound queue closed".into()),
            },
        };

        if let Err(e) = send_frame(sink, &frame).await {
            return e;
        }
    }
}

async fn send_frame(sink: &mut FrameSink, frame: &Outbound) -> Result<(), Error> {
    let text = protocol::encode(frame)?;
    trace!(kind = frame.kind(), "outbound frame");
    sink.send(text).await
}

fn timeout_error(operation: &'static str, after: Duration) -> Error {
    Error::Timeout {
        operation,
        timeout_ms: u64::try_from(after.as_millis()).unwrap_or(u64::MAX),
    }
}

// ── Tests ────────────────────────────────────────────────────────────
