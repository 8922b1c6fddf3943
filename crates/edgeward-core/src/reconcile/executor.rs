// ── Enforce-mode execution ──
//
// Providers take complete sets, not deltas. For each domain the executor
// keeps a working set seeded from the actual state; every operation edits the
// working set and pushes the whole, re-sorted set to the provider. The first
// failed operation stops the domain: later operations are skipped, earlier
// ones stay applied.

use std::time::Duration;

use tracing::{debug, info, warn};

use super::plan::{Operation, OperationKind, OperationOutcome, ReconciliationPlan};
use super::DomainStatus;
use crate::config::RetryPolicy;
use crate::model::{Domain, IdempotencyKey, Resource, sort_resources};
use crate::provider::{self, Provider, ProviderError};

pub(crate) struct Executor<'a> {
    pub(crate) provider: &'a dyn Provider,
    pub(crate) timeout: Duration,
    pub(crate) retry: RetryPolicy,
}

impl Executor<'_> {
    /// Execute every pending operation of `R`'s domain.
    pub(crate) async fn run_domain<R: Resource>(
        &self,
        actual: &[R],
        plan: &mut ReconciliationPlan,
    ) -> DomainStatus {
        let domain = R::DOMAIN;
        let mut working: Vec<R> = actual.to_vec();
        let mut applied = 0_usize;
        let mut failure: Option<ProviderError> = None;

        let ops: Vec<&mut Operation> = plan
            .operations
            .iter_mut()
            .filter(|op| op.domain == domain && op.outcome.is_none())
            .collect();

        for op in ops {
            if failure.is_some() {
                op.outcome = Some(OperationOutcome::Skipped {
                    reason: format!("not attempted: an earlier {domain} operation failed"),
                });
                continue;
            }

            match self.execute(&mut working, op).await {
                Ok(()) => {
                    info!(%domain, kind = %op.kind, identity = %op.identity, key = op.key.short(), "operation applied");
                    op.outcome = Some(OperationOutcome::Applied);
                    applied += 1;
                }
                Err(err) => {
                    warn!(%domain, kind = %op.kind, identity = %op.identity, error = %err, "operation failed, halting domain");
                    op.outcome = Some(OperationOutcome::Failed {
                        class: err.class(),
                        reason: err.reason().to_owned(),
                    });
                    failure = Some(err);
                }
            }
        }

        match failure {
            None => DomainStatus::Applied {
                operations: applied,
            },
            Some(err) => DomainStatus::Failed {
                class: err.class(),
                reason: err.reason().to_owned(),
                applied,
            },
        }
    }

    async fn execute<R: Resource>(
        &self,
        working: &mut Vec<R>,
        op: &Operation,
    ) -> Result<(), ProviderError> {
        match op.kind {
            OperationKind::Remove => {
                remove_entry(working, &op.identity, Some(&op.key));
                self.apply(working).await
            }
            OperationKind::Add => {
                let target = decode::<R>(op)?;
                working.push(target);
                self.apply(working).await
            }
            OperationKind::Modify => {
                let target = decode::<R>(op)?;
                remove_entry(working, &op.identity, op.replaces.as_ref());
                self.apply(working).await?;
                working.push(target);
                self.apply(working).await
            }
        }
    }

    /// One provider call with the per-call timeout, retrying transient
    /// failures with exponential backoff. Exhausted retries are reported
    /// as permanent.
    async fn apply<R: Resource>(&self, working: &mut [R]) -> Result<(), ProviderError> {
        sort_resources(working);
        let mut attempt = 1_u32;

        loop {
            let operation = apply_operation(R::DOMAIN);
            let result =
                provider::bounded(self.timeout, operation, R::apply(self.provider, working)).await;

            match result {
                Err(err) if err.is_transient() && attempt < self.retry.max_attempts => {
                    let delay = self.retry.delay(attempt - 1);
                    debug!(
                        domain = %R::DOMAIN,
                        attempt,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %err,
                        "transient provider failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) if err.is_transient() => {
                    return Err(ProviderError::Permanent(format!(
                        "gave up after {attempt} attempts: {}",
                        err.reason()
                    )));
                }
                other => return other,
            }
        }
    }
}

fn apply_operation(domain: Domain) -> &'static str {
    match domain {
        Domain::Routing => "apply_routing",
        Domain::Nat => "apply_nat",
        Domain::Firewall => "apply_firewall",
        Domain::Vpn => "apply_vpn",
        Domain::Ddns => "apply_ddns",
    }
}

/// Drop the entry with this identity and content key. Without a key, or
/// when nothing matches it, every entry with the identity goes.
fn remove_entry<R: Resource>(working: &mut Vec<R>, identity: &str, key: Option<&IdempotencyKey>) {
    let position = key.and_then(|key| {
        working
            .iter()
            .position(|r| r.identity() == identity && r.key() == *key)
    });
    match position {
        Some(index) => {
            working.remove(index);
        }
        None => working.retain(|r| r.identity() != identity),
    }
}

fn decode<R: Resource>(op: &Operation) -> Result<R, ProviderError> {
    serde_json::from_value(op.payload.clone()).map_err(|e| {
        ProviderError::Permanent(format!("unreadable payload for {}: {e}", op.identity))
    })
}
