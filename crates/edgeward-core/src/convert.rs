// ── Wire ↔ model conversion ──
//
// The control channel speaks raw JSON; these functions turn pushed payloads
// into validated model values and turn reconciliation results into report
// frames.

use chrono::{DateTime, Utc};
use edgeward_api::{
    DomainReport, InterfaceReport, MetricsReport, OperationFailure, OutcomeReport,
};

use crate::error::CoreError;
use crate::mode::Mode;
use crate::model::{DesiredState, Interface, Metrics, NetworkConfig, ValidationIssue};
use crate::reconcile::{DomainStatus, OperationOutcome, ReconciliationOutcome};

/// Decode and validate the payload of a `CONFIG_PUSH`.
pub fn desired_from_push(
    sequence: u64,
    config: serde_json::Value,
) -> Result<DesiredState, CoreError> {
    let config: NetworkConfig =
        serde_json::from_value(config).map_err(|e| CoreError::ConfigValidation {
            issues: vec![ValidationIssue::malformed(format!(
                "desired state is not well-formed: {e}"
            ))],
        })?;
    config
        .validate()
        .map_err(|issues| CoreError::ConfigValidation { issues })?;
    Ok(DesiredState::new(sequence, config))
}

/// `NACK` payload for a push rejected before reconciliation.
pub fn rejection_report(sequence: u64, mode: Mode, reason: &CoreError) -> OutcomeReport {
    OutcomeReport {
        sequence,
        mode: mode.to_string(),
        reason: Some(reason.to_string()),
        domains: Vec::new(),
        started_at: None,
        finished_at: None,
    }
}

impl From<&ReconciliationOutcome> for OutcomeReport {
    fn from(outcome: &ReconciliationOutcome) -> Self {
        let domains = outcome
            .domains
            .iter()
            .map(|(domain, status)| {
                let ops: Vec<_> = outcome.plan.for_domain(*domain).collect();
                let applied = ops
                    .iter()
                    .filter(|op| op.outcome == Some(OperationOutcome::Applied))
                    .count();
                let failures = ops
                    .iter()
                    .filter_map(|op| match &op.outcome {
                        Some(OperationOutcome::Failed { class, reason }) => Some(OperationFailure {
                            key: op.key.to_string(),
                            identity: op.identity.clone(),
                            kind: op.kind.to_string(),
                            class: class.to_string(),
                            reason: reason.clone(),
                        }),
                        _ => None,
                    })
                    .collect();
                let reason = match status {
                    DomainStatus::Failed { reason, .. } => Some(reason.clone()),
                    _ => None,
                };

                DomainReport {
                    domain: domain.to_string(),
                    status: status.label().to_owned(),
                    planned: saturate(ops.len()),
                    applied: saturate(applied),
                    reason,
                    failures,
                }
            })
            .collect();

        OutcomeReport {
            sequence: outcome.sequence,
            mode: outcome.mode.to_string(),
            reason: None,
            domains,
            started_at: Some(outcome.started_at),
            finished_at: Some(outcome.finished_at),
        }
    }
}

fn saturate(n: usize) -> u32 {
    u32::try_from(n).unwrap_or(u32::MAX)
}

impl From<&Interface> for InterfaceReport {
    fn from(iface: &Interface) -> Self {
        Self {
            name: iface.name.clone(),
            up: iface.up,
            mac: iface.mac.clone(),
            mtu: iface.mtu,
            addresses: iface.addresses.clone(),
            rx_bytes: iface.stats.rx_bytes,
            tx_bytes: iface.stats.tx_bytes,
            rx_packets: iface.stats.rx_packets,
            tx_packets: iface.stats.tx_packets,
            rx_errors: iface.stats.rx_errors,
            tx_errors: iface.stats.tx_errors,
        }
    }
}

/// Assemble a `METRICS_REPORT` snapshot.
pub fn metrics_report(
    device_id: &str,
    timestamp: DateTime<Utc>,
    interfaces: &[Interface],
    metrics: Metrics,
) -> MetricsReport {
    MetricsReport {
        device_id: device_id.to_owned(),
        timestamp,
        interfaces: interfaces.iter().map(InterfaceReport::from).collect(),
        counters: metrics.counters,
    }
}
