//! Reconciler: diff desired against actual state and converge the device.
//!
//! A pass reads the actual configuration once, computes a plan ordered
//! routing → NAT → firewall → VPN → DDNS, and then either stops (shadow
//! mode: no `apply_*` call is ever made) or executes it domain by domain.
//! A failed domain never stops the domains after it, and nothing is rolled
//! back.

mod executor;
pub mod plan;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info};

use crate::config::RetryPolicy;
use crate::mode::Mode;
use crate::model::{
    ActualState, DdnsBinding, DesiredState, Domain, FirewallRule, NatRule, Route, VpnProfile,
};
use crate::provider::{self, FailureClass, Provider, ProviderError};
use executor::Executor;

pub use plan::{Operation, OperationKind, OperationOutcome, ReconciliationPlan};

/// Per-domain result of a pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DomainStatus {
    /// Actual already matched desired.
    Unchanged,
    /// Shadow mode: operations computed, none executed.
    Planned { operations: usize },
    Applied { operations: usize },
    Failed {
        class: FailureClass,
        reason: String,
        /// Operations that went through before the failure.
        applied: usize,
    },
}

impl DomainStatus {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Unchanged => "unchanged",
            Self::Planned { .. } => "planned",
            Self::Applied { .. } => "applied",
            Self::Failed { .. } => "failed",
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

/// Everything that happened in one pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconciliationOutcome {
    pub sequence: u64,
    pub mode: Mode,
    pub plan: ReconciliationPlan,
    pub domains: BTreeMap<Domain, DomainStatus>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl ReconciliationOutcome {
    /// No domain failed.
    pub fn is_success(&self) -> bool {
        !self.domains.values().any(DomainStatus::is_failed)
    }

    pub fn failed_domains(&self) -> Vec<Domain> {
        self.domains
            .iter()
            .filter(|(_, status)| status.is_failed())
            .map(|(domain, _)| *domain)
            .collect()
    }

    pub fn status(&self, domain: Domain) -> Option<&DomainStatus> {
        self.domains.get(&domain)
    }
}

/// Drives one provider. Holds no state between passes.
#[derive(Clone)]
pub struct Reconciler {
    provider: Arc<dyn Provider>,
    timeout: Duration,
    retry: RetryPolicy,
}

impl Reconciler {
    pub fn new(provider: Arc<dyn Provider>, timeout: Duration, retry: RetryPolicy) -> Self {
        Self {
            provider,
            timeout,
            retry,
        }
    }

    pub fn provider(&self) -> &Arc<dyn Provider> {
        &self.provider
    }

    /// Read the live configuration, bounded by the per-call timeout.
    pub async fn read_actual(&self) -> Result<ActualState, ProviderError> {
        provider::bounded(self.timeout, "read_config", self.provider.read_config()).await
    }

    /// Compute the plan for `desired` without executing anything.
    pub async fn plan(&self, desired: &DesiredState) -> Result<ReconciliationPlan, ProviderError> {
        let actual = self.read_actual().await?;
        Ok(ReconciliationPlan::compute(&desired.config, &actual))
    }

    /// Run one full pass. Never fails: every problem is attributed to a
    /// domain in the outcome.
    pub async fn reconcile(&self, desired: &DesiredState, mode: Mode) -> ReconciliationOutcome {
        let started_at = Utc::now();
        info!(sequence = desired.sequence, %mode, provider = self.provider.name(), "reconciliation pass started");

        let actual = match self.read_actual().await {
            Ok(actual) => actual,
            Err(err) => {
                error!(sequence = desired.sequence, error = %err, "cannot read actual state");
                let domains = Domain::ORDER
                    .into_iter()
                    .map(|domain| {
                        let status = DomainStatus::Failed {
                            class: err.class(),
                            reason: format!("reading actual state failed: {}", err.reason()),
                            applied: 0,
                        };
                        (domain, status)
                    })
                    .collect();
                return ReconciliationOutcome {
                    sequence: desired.sequence,
                    mode,
                    plan: ReconciliationPlan::default(),
                    domains,
                    started_at,
                    finished_at: Utc::now(),
                };
            }
        };

        let mut plan = ReconciliationPlan::compute(&desired.config, &actual);
        let executor = Executor {
            provider: self.provider.as_ref(),
            timeout: self.timeout,
            retry: self.retry,
        };

        let mut domains = BTreeMap::new();
        for domain in Domain::ORDER {
            let planned = plan.count(domain);
            let status = if planned == 0 {
                DomainStatus::Unchanged
            } else if mode == Mode::Shadow {
                plan.settle_domain(
                    domain,
                    &OperationOutcome::Skipped {
                        reason: "shadow mode".into(),
                    },
                );
                DomainStatus::Planned {
                    operations: planned,
                }
            } else {
                match domain {
                    Domain::Routing => executor.run_domain::<Route>(&actual.routes, &mut plan).await,
                    Domain::Nat => executor.run_domain::<NatRule>(&actual.nat, &mut plan).await,
                    Domain::Firewall => {
                        executor
                            .run_domain::<FirewallRule>(&actual.firewall, &mut plan)
                            .await
                    }
                    Domain::Vpn => executor.run_domain::<VpnProfile>(&actual.vpn, &mut plan).await,
                    Domain::Ddns => {
                        executor
                            .run_domain::<DdnsBinding>(&actual.ddns, &mut plan)
                            .await
                    }
                }
            };
            domains.insert(domain, status);
        }

        let outcome = ReconciliationOutcome {
            sequence: desired.sequence,
            mode,
            plan,
            domains,
            started_at,
            finished_at: Utc::now(),
        };
        info!(
            sequence = outcome.sequence,
            %mode,
            operations = outcome.plan.len(),
            failed = ?outcome.failed_domains(),
            "reconciliation pass finished"
        );
        outcome
    }
}
