//! Control-plane wire protocol.
//!
//! Every frame is a single JSON object tagged by `type`. Inbound frames flow
//! from the control plane to the agent, outbound frames the other way.
//!
//! ```json
//! {"type":"CONFIG_PUSH","sequence":5,"mode":"enforce","config":{ ... }}
//! {"type":"ACK","sequence":5,"mode":"enforce","domains":[ ... ], ...}
//! ```
//!
//! The desired-state payload of a `CONFIG_PUSH` is carried as raw JSON;
//! structural validation happens in `edgeward-core`.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Error;

// ── Inbound (control plane → agent) ─────────────────────────────────

/// A frame sent by the control plane.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Inbound {
    /// Credential exchange accepted.
    Welcome {
        session_id: String,
        /// Control-plane override for the heartbeat interval.
        #[serde(default)]
        heartbeat_secs: Option<u64>,
    },

    /// Credential exchange rejected.
    AuthRejected { reason: String },

    /// Full desired state, replacing whatever the agent holds.
    ConfigPush {
        sequence: u64,
        #[serde(default)]
        mode: Option<String>,
        config: serde_json::Value,
    },

    /// Ask the agent for an immediate status report.
    StatusRequest {
        #[serde(default)]
        request_id: Option<String>,
    },

    /// Switch the reconciliation mode without pushing new state.
    SetMode { mode: String },

    /// Liveness answer to `HEARTBEAT`.
    HeartbeatAck {
        #[serde(default)]
        timestamp: Option<DateTime<Utc>>,
    },
}

impl Inbound {
    /// Short label for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Welcome { .. } => "WELCOME",
            Self::AuthRejected { .. } => "AUTH_REJECTED",
            Self::ConfigPush { .. } => "CONFIG_PUSH",
            Self::StatusRequest { .. } => "STATUS_REQUEST",
            Self::SetMode { .. } => "SET_MODE",
            Self::HeartbeatAck { .. } => "HEARTBEAT_ACK",
        }
    }
}

// ── Outbound (agent → control plane) ────────────────────────────────

/// A frame sent by the agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Outbound {
    Hello(Hello),
    Heartbeat {
        timestamp: DateTime<Utc>,
        sequence: Option<u64>,
    },
    StatusReport(StatusReport),
    MetricsReport(MetricsReport),
    Ack(OutcomeReport),
    Nack(OutcomeReport),
}

impl Outbound {
    /// Short label for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Hello(_) => "HELLO",
            Self::Heartbeat { .. } => "HEARTBEAT",
            Self::StatusReport(_) => "STATUS_REPORT",
            Self::MetricsReport(_) => "METRICS_REPORT",
            Self::Ack(_) => "ACK",
            Self::Nack(_) => "NACK",
        }
    }
}

/// First frame after the transport is up: identifies and authenticates
/// the device.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct Hello {
    pub device_id: String,
    /// Random per-process identifier, lets the control plane tell restarts
    /// apart from reconnects.
    pub instance_id: Uuid,
    pub agent_version: String,
    pub credential: String,
    /// Sequence number of the desired state currently held, if any.
    pub last_sequence: Option<u64>,
}

impl fmt::Debug for Hello {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hello")
            .field("device_id", &self.device_id)
            .field("instance_id", &self.instance_id)
            .field("agent_version", &self.agent_version)
            .field("credential", &"[REDACTED]")
            .field("last_sequence", &self.last_sequence)
            .finish()
    }
}

/// Answer to `STATUS_REQUEST`, also sent unprompted after every reconnect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub device_id: String,
    pub timestamp: DateTime<Utc>,
    pub connection: String,
    pub mode: String,
    pub sequence: Option<u64>,
    pub reconciling: bool,
    pub last_outcome: Option<OutcomeReport>,
}

/// Per-reconciliation outcome, sent as `ACK` when every domain succeeded
/// and `NACK` otherwise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeReport {
    pub sequence: u64,
    pub mode: String,
    /// Set when the push was rejected before reconciliation (validation).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default)]
    pub domains: Vec<DomainReport>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainReport {
    pub domain: String,
    /// `unchanged`, `planned`, `applied` or `failed`.
    pub status: String,
    pub planned: u32,
    pub applied: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<OperationFailure>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationFailure {
    pub key: String,
    pub identity: String,
    pub kind: String,
    pub class: String,
    pub reason: String,
}

/// Periodic interface and counter snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsReport {
    pub device_id: String,
    pub timestamp: DateTime<Utc>,
    pub interfaces: Vec<InterfaceReport>,
    #[serde(default)]
    pub counters: BTreeMap<String, u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterfaceReport {
    pub name: String,
    pub up: bool,
    pub mac: Option<String>,
    pub mtu: Option<u32>,
    #[serde(default)]
    pub addresses: Vec<String>,
    pub rx_bytes: u64,
    pub tx_bytes: u64,
    pub rx_packets: u64,
    pub tx_packets: u64,
    pub rx_errors: u64,
    pub tx_errors: u64,
}

// ── Framing ─────────────────────────────────────────────────────────

/// Encode an outbound frame as JSON text.
pub fn encode(frame: &Outbound) -> Result<String, Error> {
    serde_json::to_string(frame).map_err(|e| Error::Protocol {
        message: format!("failed to encode {}: {e}", frame.kind()),
        frame: String::new(),
    })
}

/// Decode an inbound JSON text frame.
pub fn decode(text: &str) -> Result<Inbound, Error> {
    serde_json::from_str(text).map_err(|e| Error::Protocol {
        message: e.to_string(),
        frame: text.to_owned(),
    })
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn decode_config_push() {
        let frame = r#"{
            "type": "CONFIG_PUSH",
            "sequence": 5,
            "mode": "enforce",
            "config": { "firewall": [] }
        }"#;

        match decode(frame).unwrap() {
            Inbound::ConfigPush {
                sequence,
                mode,
                config,
            } => {
                assert_eq!(sequence, 5);
                assert_eq!(mode.as_deref(), Some("enforce"));
                assert!(config["firewall"].is_array());
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn decode_status_request_without_id() {
        let frame = decode(r#"{"type":"STATUS_REQUEST"}"#).unwrap();
        assert_eq!(frame, Inbound::StatusRequest { request_id: None });
    }

    #[test]
    fn decode_unknown_type_is_protocol_error() {
        let err = decode(r#"{"type":"REBOOT"}"#).unwrap_err();
        match err {
            Error::Protocol { frame, .. } => assert!(frame.contains("REBOOT")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn heartbeat_wire_shape() {
        let ts = DateTime::parse_from_rfc3339("2026-03-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let frame = Outbound::Heartbeat {
            timestamp: ts,
            sequence: Some(5),
        };
        insta::assert_snapshot!(
            encode(&frame).unwrap(),
            @r#"{"type":"HEARTBEAT","timestamp":"2026-03-01T12:00:00Z","sequence":5}"#
        );
    }

    #[test]
    fn hello_debug_redacts_credential() {
        let hello = Hello {
            device_id: "edge-01".into(),
            instance_id: Uuid::nil(),
            agent_version: "0.1.0".into(),
            credential: "super-secret".into(),
            last_sequence: None,
        };
        let printed = format!("{hello:?}");
        assert!(!printed.contains("super-secret"));
        assert!(printed.contains("REDACTED"));
    }

    #[test]
    fn nack_omits_empty_failures() {
        let report = OutcomeReport {
            sequence: 7,
            mode: "shadow".into(),
            reason: Some("validation failed".into()),
            domains: vec![DomainReport {
                domain: "nat".into(),
                status: "planned".into(),
                planned: 1,
                applied: 0,
                reason: None,
                failures: Vec::new(),
            }],
            started_at: None,
            finished_at: None,
        };
        let json = serde_json::to_value(Outbound::Nack(report)).unwrap();
        assert_eq!(json["type"], "NACK");
        assert_eq!(json["reason"], "validation failed");
        assert!(json["domains"][0].get("failures").is_none());
    }
}
