// ── NAT domain types ──

use std::cmp::Ordering;
use std::net::IpAddr;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use super::domain::Domain;
use super::firewall::MatchSpec;
use super::key::Resource;
use crate::provider::{Provider, ProviderError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum NatKind {
    /// Source NAT to the outgoing interface address.
    Masquerade,
    /// Source NAT to a fixed address.
    Snat,
    /// Destination NAT (port forwarding).
    Dnat,
}

/// A translation rule. Ordered by `(priority, name)` like firewall rules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NatRule {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub priority: u32,
    pub kind: NatKind,
    #[serde(rename = "match", default)]
    pub matches: MatchSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_address: Option<IpAddr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_port: Option<u16>,
}

impl NatRule {
    pub fn is_source_nat(&self) -> bool {
        matches!(self.kind, NatKind::Masquerade | NatKind::Snat)
    }
}

impl Resource for NatRule {
    const DOMAIN: Domain = Domain::Nat;

    fn identity(&self) -> String {
        self.name.clone()
    }

    fn ordering(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| self.name.cmp(&other.name))
    }

    fn apply<'a>(
        provider: &'a dyn Provider,
        set: &'a [Self],
    ) -> BoxFuture<'a, Result<(), ProviderError>> {
        provider.apply_nat(set)
    }
}
