// ── Firewall domain types ──

use std::cmp::Ordering;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use super::domain::Domain;
use super::key::Resource;
use super::prefix::Prefix;
use crate::provider::{Provider, ProviderError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FirewallAction {
    Allow,
    Deny,
    Reject,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Protocol {
    Tcp,
    Udp,
    Icmp,
}

/// Traffic predicate shared by firewall and NAT rules. Unset fields match
/// anything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<Protocol>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub src: Option<Prefix>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dst: Option<Prefix>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub src_port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dst_port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_interface: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub out_interface: Option<String>,
}

impl MatchSpec {
    pub fn is_any(&self) -> bool {
        *self == Self::default()
    }
}

/// A single filter rule. Rule sets are evaluated in `(priority, name)` order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirewallRule {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub priority: u32,
    pub action: FirewallAction,
    #[serde(rename = "match", default)]
    pub matches: MatchSpec,
    #[serde(default)]
    pub log: bool,
}

impl Resource for FirewallRule {
    const DOMAIN: Domain = Domain::Firewall;

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
        provider.apply_firewall(set)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::model::key::sort_resources;

    #[test]
    fn deserializes_minimal_rule() {
        let rule: FirewallRule = serde_json::from_str(
            r#"{"name":"https","match":{"dst_port":443},"action":"allow","priority":10}"#,
        )
        .unwrap();

        assert_eq!(rule.action, FirewallAction::Allow);
        assert_eq!(rule.matches.dst_port, Some(443));
        assert!(rule.matches.protocol.is_none());
        assert!(!rule.log);
    }

    #[test]
    fn orders_by_priority_then_name() {
        let rule = |name: &str, priority| FirewallRule {
            name: name.into(),
            priority,
            action: FirewallAction::Allow,
            matches: MatchSpec::default(),
            log: false,
        };
        let mut set = vec![rule("b", 10), rule("z", 1), rule("a", 10)];
        sort_resources(&mut set);

        let names: Vec<&str> = set.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, ["z", "a", "b"]);
    }
}
