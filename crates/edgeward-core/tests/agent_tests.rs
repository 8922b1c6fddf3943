#![allow(clippy::unwrap_used)]
// End-to-end tests for `Agent`: a scripted control plane on an in-memory
// transport, driving the in-memory provider.
//
// Time is paused; heartbeats are answered transparently by the helper so
// sessions stay up while the test waits for frames.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::channel::mpsc as fmpsc;
use futures::{SinkExt, StreamExt};
use secrecy::SecretString;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use url::Url;

use edgeward_api::{BackoffPolicy, Connection, Connector, Error};
use edgeward_core::provider::MemoryProvider;
use edgeward_core::{
    Agent, AgentConfig, AgentState, DesiredState, Domain, Mode, NetworkConfig, ProviderSettings,
    RetryPolicy,
};

// ── In-memory control plane ─────────────────────────────────────────

struct ControlPlane {
    to_agent: fmpsc::UnboundedSender<String>,
    from_agent: fmpsc::UnboundedReceiver<String>,
}

impl ControlPlane {
    async fn send(&mut self, frame: Value) {
        self.to_agent.send(frame.to_string()).await.unwrap();
    }

    /// Next frame that is not a heartbeat or metrics sample. Heartbeats
    /// are acknowledged on the way.
    async fn next(&mut self) -> Value {
        loop {
            let text = self
                .from_agent
                .next()
                .await
                .expect("agent closed transport");
            let frame: Value = serde_json::from_str(&text).unwrap();
            match frame["type"].as_str() {
                Some("HEARTBEAT") => self.send(json!({ "type": "HEARTBEAT_ACK" })).await,
                Some("METRICS_REPORT") => {}
                _ => return frame,
            }
        }
    }
}

struct MemoryConnector {
    sessions: mpsc::UnboundedSender<ControlPlane>,
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self) -> Result<Connection, Error> {
        let (agent_tx, from_agent) = fmpsc::unbounded::<String>();
        let (to_agent, agent_rx) = fmpsc::unbounded::<String>();
        self.sessions
            .send(ControlPlane {
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

// ── Harness ─────────────────────────────────────────────────────────

struct Harness {
    provider: Arc<MemoryProvider>,
    state: Arc<AgentState>,
    control: ControlPlane,
    cancel: CancellationToken,
    task: JoinHandle<Result<(), edgeward_core::CoreError>>,
}

fn agent_config(mode: Mode) -> AgentConfig {
    AgentConfig {
        device_id: "edge-01".into(),
        endpoint: Url::parse("wss://control.example.net/agent").unwrap(),
        credential: SecretString::from("s3cret".to_string()),
        initial_mode: mode,
        heartbeat_interval: Duration::from_secs(15),
        auth_timeout: Duration::from_secs(5),
        backoff: BackoffPolicy::default(),
        resync_interval: None,
        metrics_interval: Duration::from_secs(3600),
        provider_timeout: Duration::from_secs(5),
        retry: RetryPolicy::default(),
        provider: ProviderSettings::Memory,
    }
}

/// Start an agent and complete the handshake. Returns once the unprompted
/// status report after connecting has been received.
async fn start(mode: Mode) -> Harness {
    let provider = Arc::new(MemoryProvider::new());
    let (sessions, mut accepted) = mpsc::unbounded_channel();
    let connector = Arc::new(MemoryConnector { sessions });

    let agent = Agent::new(agent_config(mode), provider.clone(), connector);
    let state = agent.state();
    let cancel = CancellationToken::new();
    let task = tokio::spawn(agent.run(cancel.clone()));

    let mut control = accepted.recv().await.unwrap();
    let hello = control.next().await;
    assert_eq!(hello["type"], "HELLO");
    assert_eq!(hello["device_id"], "edge-01");
    control
        .send(json!({ "type": "WELCOME", "session_id": "sess-1" }))
        .await;

    let status = control.next().await;
    assert_eq!(status["type"], "STATUS_REPORT");
    assert_eq!(status["connection"], "connected");

    Harness {
        provider,
        state,
        control,
        cancel,
        task,
    }
}

fn https_push(sequence: u64) -> Value {
    json!({
        "type": "CONFIG_PUSH",
        "sequence": sequence,
        "config": {
            "firewall": [
                { "name": "allow-https", "priority": 10, "action": "allow",
                  "match": { "protocol": "tcp", "dst_port": 443 } }
            ]
        }
    })
}

fn domain<'a>(report: &'a Value, name: &str) -> &'a Value {
    report["domains"]
        .as_array()
        .unwrap()
        .iter()
        .find(|d| d["domain"] == name)
        .unwrap()
}

// ── Tests ───────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn push_is_reconciled_and_acknowledged() {
    let mut h = start(Mode::Enforce).await;

    h.control.send(https_push(5)).await;
    let ack = h.control.next().await;

    assert_eq!(ack["type"], "ACK");
    assert_eq!(ack["sequence"], 5);
    assert_eq!(ack["mode"], "enforce");
    let firewall = domain(&ack, "firewall");
    assert_eq!(firewall["status"], "applied");
    assert_eq!(firewall["planned"], 1);
    assert_eq!(firewall["applied"], 1);
    assert_eq!(domain(&ack, "routing")["status"], "unchanged");

    assert_eq!(h.state.store.sequence(), Some(5));
    assert_eq!(h.provider.snapshot().firewall.len(), 1);

    h.cancel.cancel();
    h.task.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn shadow_mode_reports_plan_until_enforced() {
    let mut h = start(Mode::Shadow).await;

    h.control.send(https_push(5)).await;
    let ack = h.control.next().await;
    assert_eq!(ack["type"], "ACK");
    assert_eq!(ack["mode"], "shadow");
    assert_eq!(domain(&ack, "firewall")["status"], "planned");
    assert_eq!(h.provider.total_apply_calls(), 0);

    h.control
        .send(json!({ "type": "SET_MODE", "mode": "enforce" }))
        .await;
    let ack = h.control.next().await;
    assert_eq!(ack["type"], "ACK");
    assert_eq!(ack["mode"], "enforce");
    assert_eq!(domain(&ack, "firewall")["status"], "applied");
    assert_eq!(h.provider.apply_calls(Domain::Firewall), 1);
    assert_eq!(h.state.mode.current(), Mode::Enforce);

    h.cancel.cancel();
    h.task.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn push_mode_applies_to_its_own_pass() {
    let mut h = start(Mode::Shadow).await;

    let mut push = https_push(6);
    push["mode"] = json!("enforce");
    h.control.send(push).await;

    let ack = h.control.next().await;
    assert_eq!(ack["mode"], "enforce");
    assert_eq!(domain(&ack, "firewall")["status"], "applied");

    h.cancel.cancel();
    h.task.await.unwrap().unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn mode_switch_is_published_after_its_desired_state() {
    for round in 0..50 {
        let state = Arc::new(AgentState::new(Mode::Shadow));
        assert!(state.accept(DesiredState::new(4, NetworkConfig::default()), None).is_stored());

        let mut mode_rx = state.mode.subscribe();
        let watcher = tokio::spawn({
            let state = Arc::clone(&state);
            async move {
                mode_rx.changed().await.unwrap();
                state.store.sequence()
            }
        });
        tokio::task::yield_now().await;

        state.accept(DesiredState::new(5, NetworkConfig::default()), Some(Mode::Enforce));
        assert_eq!(watcher.await.unwrap(), Some(5), "round {round}");
    }
}

#[test]
fn stale_push_does_not_switch_mode() {
    let state = AgentState::new(Mode::Shadow);
    state.accept(DesiredState::new(5, NetworkConfig::default()), None);

    let replaced = state.accept(DesiredState::new(5, NetworkConfig::default()), Some(Mode::Enforce));

    assert!(!replaced.is_stored());
    assert_eq!(state.mode.current(), Mode::Shadow);
}

#[tokio::test(start_paused = true)]
async fn malformed_push_is_rejected_and_not_stored() {
    let mut h = start(Mode::Enforce).await;

    h.control
        .send(json!({
            "type": "CONFIG_PUSH",
            "sequence": 3,
            "config": { "firewall": [ { "name": "no-action" } ] }
        }))
        .await;
    let nack = h.control.next().await;

    assert_eq!(nack["type"], "NACK");
    assert_eq!(nack["sequence"], 3);
    assert!(nack["reason"].as_str().unwrap().contains("action"));
    assert_eq!(h.state.store.sequence(), None);
    assert_eq!(h.provider.total_apply_calls(), 0);

    h.cancel.cancel();
    h.task.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn invalid_push_keeps_previous_state() {
    let mut h = start(Mode::Enforce).await;

    h.control.send(https_push(5)).await;
    assert_eq!(h.control.next().await["type"], "ACK");

    // Duplicate names within one domain.
    h.control
        .send(json!({
            "type": "CONFIG_PUSH",
            "sequence": 6,
            "config": { "firewall": [
                { "name": "dup", "action": "allow" },
                { "name": "dup", "action": "deny" }
            ] }
        }))
        .await;
    let nack = h.control.next().await;
    assert_eq!(nack["type"], "NACK");
    assert_eq!(nack["sequence"], 6);

    assert_eq!(h.state.store.sequence(), Some(5));
    assert_eq!(h.provider.snapshot().firewall[0].name, "allow-https");

    h.cancel.cancel();
    h.task.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn stale_push_is_discarded_silently() {
    let mut h = start(Mode::Enforce).await;

    h.control.send(https_push(5)).await;
    assert_eq!(h.control.next().await["type"], "ACK");

    h.control
        .send(json!({ "type": "CONFIG_PUSH", "sequence": 4, "config": {} }))
        .await;
    h.control
        .send(json!({ "type": "STATUS_REQUEST", "request_id": "req-1" }))
        .await;

    // The stale push produced nothing: the next frame is the status answer.
    let status = h.control.next().await;
    assert_eq!(status["type"], "STATUS_REPORT");
    assert_eq!(status["request_id"], "req-1");
    assert_eq!(status["sequence"], 5);
    assert_eq!(status["mode"], "enforce");
    assert_eq!(status["reconciling"], false);
    assert_eq!(status["last_outcome"]["sequence"], 5);

    assert_eq!(h.provider.snapshot().firewall.len(), 1);

    h.cancel.cancel();
    h.task.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn unknown_mode_instruction_is_ignored() {
    let mut h = start(Mode::Shadow).await;

    h.control
        .send(json!({ "type": "SET_MODE", "mode": "yolo" }))
        .await;
    h.control.send(json!({ "type": "STATUS_REQUEST" })).await;

    let status = h.control.next().await;
    assert_eq!(status["type"], "STATUS_REPORT");
    assert_eq!(status["mode"], "shadow");

    h.cancel.cancel();
    h.task.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn shutdown_returns_cleanly() {
    let h = start(Mode::Shadow).await;

    h.cancel.cancel();
    let result = tokio::time::timeout(Duration::from_secs(5), h.task)
        .await
        .unwrap()
        .unwrap();
    assert!(result.is_ok());
}
