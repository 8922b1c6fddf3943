// ── Reconciliation plan ──

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::model::{ActualState, Domain, IdempotencyKey, NetworkConfig, Resource, sort_resources};
use crate::provider::FailureClass;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum OperationKind {
    Add,
    Remove,
    /// Same identity, different content. Executed as remove then add.
    Modify,
}

/// What happened to an operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum OperationOutcome {
    Applied,
    Failed { class: FailureClass, reason: String },
    Skipped { reason: String },
}

/// Atomic unit of change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    pub domain: Domain,
    pub kind: OperationKind,
    pub identity: String,
    /// Idempotency key of the target payload (the removed entry for
    /// `Remove`).
    pub key: IdempotencyKey,
    /// Target entry, or the entry being removed.
    pub payload: serde_json::Value,
    /// Entry being replaced by a `Modify`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replaces: Option<IdempotencyKey>,
    /// `None` until the operation has been executed or skipped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<OperationOutcome>,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} ({})",
            self.domain,
            self.kind,
            self.identity,
            self.key.short()
        )
    }
}

/// Ordered operations for one pass. Domains appear in dependency order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationPlan {
    pub operations: Vec<Operation>,
}

impl ReconciliationPlan {
    /// Diff desired against actual, domain by domain in dependency order.
    pub fn compute(desired: &NetworkConfig, actual: &ActualState) -> Self {
        let mut operations = Vec::new();
        for domain in Domain::ORDER {
            let ops = match domain {
                Domain::Routing => diff(&desired.routes, &actual.routes),
                Domain::Nat => diff(&desired.nat, &actual.nat),
                Domain::Firewall => diff(&desired.firewall, &actual.firewall),
                Domain::Vpn => diff(&desired.vpn, &actual.vpn),
                Domain::Ddns => diff(&desired.ddns, &actual.ddns),
            };
            operations.extend(ops);
        }
        Self { operations }
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn for_domain(&self, domain: Domain) -> impl Iterator<Item = &Operation> {
        self.operations.iter().filter(move |op| op.domain == domain)
    }

    pub fn count(&self, domain: Domain) -> usize {
        self.for_domain(domain).count()
    }

    /// Record the same outcome on every operation of `domain` that has none.
    pub(crate) fn settle_domain(&mut self, domain: Domain, outcome: &OperationOutcome) {
        for op in self
            .operations
            .iter_mut()
            .filter(|op| op.domain == domain && op.outcome.is_none())
        {
            op.outcome = Some(outcome.clone());
        }
    }
}

/// Set difference keyed by identity.
///
/// Removals come first, then modifications, then additions, each in the
/// provider order of the domain, so the plan is deterministic. When the
/// actual state holds several entries with one identity, the one matching
/// the desired content is kept and the rest are removed.
pub fn diff<R: Resource>(desired: &[R], actual: &[R]) -> Vec<Operation> {
    let wanted: BTreeMap<String, &R> = desired.iter().map(|r| (r.identity(), r)).collect();
    let mut present: BTreeMap<String, Vec<&R>> = BTreeMap::new();
    for resource in actual {
        present.entry(resource.identity()).or_default().push(resource);
    }

    let mut removals: Vec<R> = Vec::new();
    let mut changes: Vec<(R, R)> = Vec::new();
    let mut additions: Vec<R> = Vec::new();

    for (identity, entries) in &present {
        let Some(target) = wanted.get(identity) else {
            removals.extend(entries.iter().map(|r| (*r).clone()));
            continue;
        };
        let target_key = target.key();
        let kept = entries
            .iter()
            .position(|r| r.key() == target_key)
            .unwrap_or(0);
        removals.extend(
            entries
                .iter()
                .enumerate()
                .filter(|(index, _)| *index != kept)
                .map(|(_, r)| (*r).clone()),
        );
        if entries[kept].key() != target_key {
            changes.push((entries[kept].clone(), (*target).clone()));
        }
    }

    for (identity, target) in &wanted {
        if !present.contains_key(identity) {
            additions.push((*target).clone());
        }
    }

    sort_resources(&mut removals);
    sort_resources(&mut additions);
    changes.sort_by(|a, b| R::ordering(&a.1, &b.1));

    let mut ops = Vec::with_capacity(removals.len() + changes.len() + additions.len());
    ops.extend(
        removals
            .iter()
            .map(|r| operation(OperationKind::Remove, r, None)),
    );
    ops.extend(
        changes
            .iter()
            .map(|(old, new)| operation(OperationKind::Modify, new, Some(old.key()))),
    );
    ops.extend(
        additions
            .iter()
            .map(|r| operation(OperationKind::Add, r, None)),
    );
    ops
}

fn operation<R: Resource>(
    kind: OperationKind,
    resource: &R,
    replaces: Option<IdempotencyKey>,
) -> Operation {
    Operation {
        domain: R::DOMAIN,
        kind,
        identity: resource.identity(),
        key: resource.key(),
        payload: serde_json::to_value(resource).unwrap_or(serde_json::Value::Null),
        replaces,
        outcome: None,
    }
}
