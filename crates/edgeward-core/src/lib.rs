//! Reconciliation engine for the edgeward device agent.
//!
//! This crate owns the network configuration model and everything that
//! turns a pushed desired state into device changes:
//!
//! - **[`model`]**: canonical types (`FirewallRule`, `NatRule`, `Route`,
//!   `VpnProfile`, `DdnsBinding`) with content-derived [`IdempotencyKey`]s
//!   and structural validation.
//!
//! - **[`Provider`]**: the seam to the device. Implementations for Linux
//!   (`ip`, `nft`, `wg`), a router HTTP management API, and an in-memory
//!   simulator.
//!
//! - **[`Reconciler`]**: diffs desired against actual per domain, orders
//!   the plan, and executes it with bounded retries, isolating failures to
//!   their domain. Honours shadow mode via [`ModeGate`].
//!
//! - **[`Agent`]**: the long-running runtime that ties the control channel
//!   from `edgeward-api` to the [`DesiredStateStore`], the reconciler and the
//!   metrics [`Reporter`].

pub mod agent;
pub mod config;
pub mod convert;
pub mod error;
pub mod mode;
pub mod model;
pub mod provider;
pub mod reconcile;
pub mod reporter;
pub mod store;

// ── Primary re-exports ──────────────────────────────────────────────
pub use agent::{Agent, AgentState};
pub use config::{AgentConfig, LinuxSettings, ProviderSettings, RetryPolicy, RouterApiSettings};
pub use error::CoreError;
pub use mode::{Mode, ModeGate};
pub use provider::{FailureClass, Provider, ProviderError};
pub use reconcile::{
    DomainStatus, Operation, OperationKind, OperationOutcome, ReconciliationOutcome,
    ReconciliationPlan, Reconciler,
};
pub use reporter::Reporter;
pub use store::{DesiredStateStore, Replace};

pub use model::{
    ActualState, DdnsBinding, DesiredState, Domain, FirewallAction, FirewallRule, IdempotencyKey,
    Interface, MatchSpec, Metrics, NatKind, NatRule, NetworkConfig, Prefix, Protocol, Resource,
    Route, Tunnel, ValidationIssue, VpnProfile,
};
