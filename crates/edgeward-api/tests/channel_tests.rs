#![allow(clippy::unwrap_used)]
// Integration tests for `ControlChannel` over an in-memory transport.
//
// Time is paused, so backoff sleeps and heartbeat intervals elapse
// instantly while keeping exact virtual timestamps.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use futures::channel::mpsc as fmpsc;
use futures::{SinkExt, StreamExt};
use secrecy::SecretString;
use serde_json::{Value, json};
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use edgeward_api::{
    BackoffPolicy, ChannelConfig, ChannelHandle, Connection, ConnectionState, Connector,
    ControlChannel, Error, Inbound, Outbound, OutcomeReport,
};

// ── In-memory transport ─────────────────────────────────────────────

/// Control-plane side of one in-memory session.
struct ServerEnd {
    to_agent: fmpsc::UnboundedSender<String>,
    from_agent: fmpsc::UnboundedReceiver<String>,
}

impl ServerEnd {
    async fn recv(&mut self) -> Value {
        let text = self.from_agent.next().await.expect("agent closed transport");
        serde_json::from_str(&text).unwrap()
    }

    async fn send(&mut self, frame: Value) {
        self.to_agent.send(frame.to_string()).await.unwrap();
    }
}

struct MemoryConnector {
    refuse: AtomicBool,
    attempts: AtomicU32,
    servers: mpsc::UnboundedSender<ServerEnd>,
    attempt_log: Mutex<Vec<(Instant, ConnectionState)>>,
    state: OnceLock<watch::Receiver<ConnectionState>>,
}

impl MemoryConnector {
    fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<ServerEnd>) {
        let (servers, accepted) = mpsc::unbounded_channel();
        let connector = Arc::new(Self {
            refuse: AtomicBool::new(false),
            attempts: AtomicU32::new(0),
            servers,
            attempt_log: Mutex::new(Vec::new()),
            state: OnceLock::new(),
        });
        (connector, accepted)
    }

    fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self) -> Result<Connection, Error> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let state = self
            .state
            .get()
            .map_or(ConnectionState::Disconnected, |rx| rx.borrow().clone());
        self.attempt_log.lock().unwrap().push((Instant::now(), state));

        if self.refuse.load(Ordering::SeqCst) {
            return Err(Error::Connection("connection refused".into()));
        }

        let (agent_tx, from_agent) = fmpsc::unbounded::<String>();
        let (to_agent, agent_rx) = fmpsc::unbounded::<String>();
        self.servers
            .send(ServerEnd {
                to_agent,
                from_agent,
            })
            .map_err(|_| Error::Connection("test harness gone".into()))?;

        Ok(Connection {
            sink: Box::pin(agent_tx.sink_map_err(|e| Error::Connection(e.to_string()))),
            stream: Box::pin(agent_rx.map(Ok)),
        })
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

fn config() -> ChannelConfig {
    let mut config = ChannelConfig::new("edge-01", SecretString::from("s3cret".to_string()));
    config.heartbeat_interval = Duration::from_secs(1);
    config.auth_timeout = Duration::from_secs(5);
    config.backoff = BackoffPolicy {
        initial_delay: Duration::from_secs(1),
        max_delay: Duration::from_secs(20),
        auth_min_delay: Duration::from_secs(30),
        stability_threshold: Duration::from_secs(60),
        jitter_seed: 42,
    };
    config
}

fn spawn(
    connector: &Arc<MemoryConnector>,
) -> (ChannelHandle, mpsc::Receiver<Inbound>, CancellationToken) {
    let cancel = CancellationToken::new();
    let (handle, inbound, _task) =
        ControlChannel::spawn(connector.clone(), config(), cancel.clone());
    connector.state.set(handle.subscribe_state()).unwrap();
    (handle, inbound, cancel)
}

async fn wait_for_state(
    handle: &ChannelHandle,
    predicate: impl Fn(&ConnectionState) -> bool,
) -> ConnectionState {
    let mut rx = handle.subscribe_state();
    loop {
        let current = rx.borrow_and_update().clone();
        if predicate(&current) {
            return current;
        }
        rx.changed().await.unwrap();
    }
}

/// Accept a session and complete the credential exchange.
async fn accept(accepted: &mut mpsc::UnboundedReceiver<ServerEnd>) -> (ServerEnd, Value) {
    let mut server = accepted.recv().await.unwrap();
    let hello = server.recv().await;
    server
        .send(json!({ "type": "WELCOME", "session_id": "sess-1" }))
        .await;
    (server, hello)
}

// ── Tests ───────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn handshake_then_config_push_and_ack() {
    let (connector, mut accepted) = MemoryConnector::new();
    let (handle, mut inbound, cancel) = spawn(&connector);
    handle.set_last_sequence(4);

    let (mut server, hello) = accept(&mut accepted).await;
    assert_eq!(hello["type"], "HELLO");
    assert_eq!(hello["device_id"], "edge-01");
    assert_eq!(hello["credential"], "s3cret");
    assert_eq!(hello["last_sequence"], 4);

    wait_for_state(&handle, ConnectionState::is_connected).await;

    server
        .send(json!({
            "type": "CONFIG_PUSH",
            "sequence": 5,
            "config": { "firewall": [] }
        }))
        .await;

    match inbound.recv().await.unwrap() {
        Inbound::ConfigPush { sequence, mode, .. } => {
            assert_eq!(sequence, 5);
            assert!(mode.is_none());
        }
        other => panic!("unexpected inbound frame: {other:?}"),
    }

    handle
        .try_send(Outbound::Ack(OutcomeReport {
            sequence: 5,
            mode: "shadow".into(),
            reason: None,
            domains: Vec::new(),
            started_at: None,
            finished_at: None,
        }))
        .unwrap();

    let ack = server.recv().await;
    assert_eq!(ack["type"], "ACK");
    assert_eq!(ack["sequence"], 5);

    cancel.cancel();
}

#[tokio::test(start_paused = true)]
async fn heartbeat_is_emitted_while_connected() {
    let (connector, mut accepted) = MemoryConnector::new();
    let (handle, _inbound, cancel) = spawn(&connector);
    handle.set_last_sequence(9);

    let (mut server, _) = accept(&mut accepted).await;
    let started = Instant::now();

    let frame = server.recv().await;
    assert_eq!(frame["type"], "HEARTBEAT");
    assert_eq!(frame["sequence"], 9);
    assert!(started.elapsed() >= Duration::from_secs(1));

    cancel.cancel();
}

#[tokio::test(start_paused = true)]
async fn auth_rejection_backs_off_with_auth_floor() {
    let (connector, mut accepted) = MemoryConnector::new();
    let (handle, _inbound, cancel) = spawn(&connector);

    let mut server = accepted.recv().await.unwrap();
    let _hello = server.recv().await;
    server
        .send(json!({ "type": "AUTH_REJECTED", "reason": "unknown device" }))
        .await;

    let state = wait_for_state(&handle, |s| matches!(s, ConnectionState::Backoff { .. })).await;
    assert_eq!(
        state,
        ConnectionState::Backoff {
            attempt: 0,
            delay: Duration::from_secs(30)
        }
    );

    cancel.cancel();
}

#[tokio::test(start_paused = true)]
async fn silent_control_plane_triggers_backoff() {
    let (connector, mut accepted) = MemoryConnector::new();
    let (handle, _inbound, cancel) = spawn(&connector);

    let (_server, _) = accept(&mut accepted).await;
    wait_for_state(&handle, ConnectionState::is_connected).await;
    let connected_at = Instant::now();

    // No HEARTBEAT_ACK ever arrives: three missed intervals end the session.
    wait_for_state(&handle, |s| matches!(s, ConnectionState::Backoff { .. })).await;
    assert!(connected_at.elapsed() >= Duration::from_secs(3));

    cancel.cancel();
}

#[tokio::test(start_paused = true)]
async fn transport_loss_retries_with_increasing_waits_up_to_ceiling() {
    let (connector, mut accepted) = MemoryConnector::new();
    let (handle, _inbound, cancel) = spawn(&connector);

    let (server, _) = accept(&mut accepted).await;
    wait_for_state(&handle, ConnectionState::is_connected).await;

    // Control plane goes away and stays away.
    connector.refuse.store(true, Ordering::SeqCst);
    drop(server);

    wait_for_state(&handle, |s| matches!(s, ConnectionState::Backoff { .. })).await;

    while connector.attempts() < 10 {
        tokio::time::sleep(Duration::from_millis(250)).await;
    }

    let log = connector.attempt_log.lock().unwrap().clone();
    // Every retry happens from `Connecting`, entered after the wait.
    for (_, state) in &log[1..] {
        assert_eq!(*state, ConnectionState::Connecting);
    }

    let ceiling = Duration::from_secs(20);
    let tolerance = Duration::from_millis(5);
    let gaps: Vec<Duration> = log[1..]
        .windows(2)
        .map(|pair| pair[1].0 - pair[0].0)
        .collect();

    for gap in &gaps {
        assert!(*gap <= ceiling + tolerance, "gap {gap:?} exceeds ceiling");
    }
    for pair in gaps.windows(2) {
        assert!(
            pair[1] > pair[0] || pair[1] + tolerance >= ceiling,
            "wait {:?} should exceed {:?}",
            pair[1],
            pair[0]
        );
    }
    assert!(*gaps.last().unwrap() + tolerance >= ceiling);

    cancel.cancel();
}

#[tokio::test(start_paused = true)]
async fn shutdown_ends_in_disconnected() {
    let (connector, mut accepted) = MemoryConnector::new();
    let (handle, _inbound, _cancel) = spawn(&connector);

    let (_server, _) = accept(&mut accepted).await;
    wait_for_state(&handle, ConnectionState::is_connected).await;

    handle.shutdown();
    wait_for_state(&handle, |s| *s == ConnectionState::Disconnected).await;
}
