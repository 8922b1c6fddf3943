// ── Desired and actual state ──
//
// Both are the same per-domain shape. A `DesiredState` additionally carries
// the control plane's sequence number; actual state is read fresh from the
// provider before every pass and never stored.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::domain::Domain;
use super::firewall::FirewallRule;
use super::key::Resource;
use super::nat::{NatKind, NatRule};
use super::routing::Route;
use super::vpn::{Tunnel, VpnProfile};
use super::ddns::DdnsBinding;

/// Per-domain configuration sets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkConfig {
    #[serde(default)]
    pub routes: Vec<Route>,
    #[serde(default)]
    pub nat: Vec<NatRule>,
    #[serde(default)]
    pub firewall: Vec<FirewallRule>,
    #[serde(default)]
    pub vpn: Vec<VpnProfile>,
    #[serde(default)]
    pub ddns: Vec<DdnsBinding>,
}

/// Live device configuration as read from the provider.
pub type ActualState = NetworkConfig;

/// The configuration the control plane wants the device to have.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DesiredState {
    pub sequence: u64,
    #[serde(flatten)]
    pub config: NetworkConfig,
}

impl DesiredState {
    pub fn new(sequence: u64, config: NetworkConfig) -> Self {
        Self { sequence, config }
    }
}

impl NetworkConfig {
    /// Number of entries in one domain.
    pub fn count(&self, domain: Domain) -> usize {
        match domain {
            Domain::Routing => self.routes.len(),
            Domain::Nat => self.nat.len(),
            Domain::Firewall => self.firewall.len(),
            Domain::Vpn => self.vpn.len(),
            Domain::Ddns => self.ddns.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        Domain::ORDER.iter().all(|d| self.count(*d) == 0)
    }

    /// Number of entries across every domain.
    pub fn total(&self) -> usize {
        Domain::ORDER.iter().map(|d| self.count(*d)).sum()
    }

    /// Structural validation. Collects every issue rather than stopping at
    /// the first.
    pub fn validate(&self) -> Result<(), Vec<ValidationIssue>> {
        let mut issues = Vec::new();

        check_identities(&self.routes, &mut issues);
        check_identities(&self.nat, &mut issues);
        check_identities(&self.firewall, &mut issues);
        check_identities(&self.vpn, &mut issues);
        check_identities(&self.ddns, &mut issues);

        for route in &self.routes {
            if route.destination.has_host_bits() {
                issues.push(ValidationIssue::new(
                    Domain::Routing,
                    route.identity(),
                    "route destination has host bits set",
                ));
            }
            if route.gateway.is_none() && route.interface.is_none() {
                issues.push(ValidationIssue::new(
                    Domain::Routing,
                    route.identity(),
                    "route needs a gateway or an interface",
                ));
            }
            if let Some(gateway) = route.gateway {
                if gateway.is_ipv4() != route.destination.is_ipv4() {
                    issues.push(ValidationIssue::new(
                        Domain::Routing,
                        route.identity(),
                        "gateway address family does not match destination",
                    ));
                }
            }
        }

        for rule in &self.firewall {
            check_ports(
                Domain::Firewall,
                &rule.name,
                [rule.matches.src_port, rule.matches.dst_port],
                &mut issues,
            );
        }

        for rule in &self.nat {
            check_ports(
                Domain::Nat,
                &rule.name,
                [rule.matches.src_port, rule.matches.dst_port, rule.to_port],
                &mut issues,
            );
            match rule.kind {
                NatKind::Dnat if rule.to_address.is_none() => issues.push(ValidationIssue::new(
                    Domain::Nat,
                    rule.name.clone(),
                    "dnat requires a translation address",
                )),
                NatKind::Snat if rule.to_address.is_none() => issues.push(ValidationIssue::new(
                    Domain::Nat,
                    rule.name.clone(),
                    "snat requires to_address",
                )),
                NatKind::Masquerade if rule.to_address.is_some() => {
                    issues.push(ValidationIssue::new(
                        Domain::Nat,
                        rule.name.clone(),
                        "masquerade takes no to_address",
                    ));
                }
                _ => {}
            }
        }

        for profile in &self.vpn {
            validate_tunnel(profile, &mut issues);
        }

        for binding in &self.ddns {
            if binding.provider.trim().is_empty() {
                issues.push(ValidationIssue::new(
                    Domain::Ddns,
                    binding.hostname.clone(),
                    "ddns binding requires a provider",
                ));
            }
            if binding.credentials_ref.trim().is_empty() {
                issues.push(ValidationIssue::new(
                    Domain::Ddns,
                    binding.hostname.clone(),
                    "ddns binding requires credentials_ref",
                ));
            }
        }

        if issues.is_empty() { Ok(()) } else { Err(issues) }
    }
}

fn check_identities<R: Resource>(set: &[R], issues: &mut Vec<ValidationIssue>) {
    let mut seen = HashSet::new();
    for (index, resource) in set.iter().enumerate() {
        let identity = resource.identity();
        if identity.trim().is_empty() {
            issues.push(ValidationIssue::new(
                R::DOMAIN,
                format!("#{index}"),
                "entry has an empty name",
            ));
        } else if !seen.insert(identity.clone()) {
            issues.push(ValidationIssue::new(
                R::DOMAIN,
                identity,
                "duplicate entry",
            ));
        }
    }
}

fn check_ports<const N: usize>(
    domain: Domain,
    identity: &str,
    ports: [Option<u16>; N],
    issues: &mut Vec<ValidationIssue>,
) {
    if ports.contains(&Some(0)) {
        issues.push(ValidationIssue::new(
            domain,
            identity.to_owned(),
            "port 0 is not a valid match or translation port",
        ));
    }
}

fn validate_tunnel(profile: &VpnProfile, issues: &mut Vec<ValidationIssue>) {
    let mut issue = |message: &str| {
        issues.push(ValidationIssue::new(
            Domain::Vpn,
            profile.name.clone(),
            message,
        ));
    };

    match &profile.tunnel {
        Tunnel::Wireguard(wg) => {
            if wg.private_key_ref.trim().is_empty() {
                issue("wireguard tunnel requires private_key_ref");
            }
            if wg.listen_port == Some(0) {
                issue("wireguard listen_port must be non-zero");
            }
            if wg.peers.iter().any(|peer| peer.public_key.trim().is_empty()) {
                issue("every wireguard peer needs a public key");
            }
        }
        Tunnel::Openvpn(ovpn) => {
            if ovpn.remote.trim().is_empty() {
                issue("openvpn tunnel requires a remote");
            }
            if ovpn.port == 0 {
                issue("openvpn port must be non-zero");
            }
        }
        Tunnel::Ipsec(ipsec) => {
            if ipsec.remote.trim().is_empty() {
                issue("ipsec tunnel requires a remote");
            }
            if ipsec.psk_ref.trim().is_empty() {
                issue("ipsec tunnel requires psk_ref");
            }
        }
    }
}

/// One structural problem in a pushed desired state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    /// `None` when the payload could not be decoded at all.
    pub domain: Option<Domain>,
    pub identity: String,
    pub message: String,
}

impl ValidationIssue {
    pub fn new(domain: Domain, identity: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            domain: Some(domain),
            identity: identity.into(),
            message: message.into(),
        }
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self {
            domain: None,
            identity: String::new(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.domain {
            Some(domain) => write!(f, "{domain}[{}]: {}", self.identity, self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn decode(value: serde_json::Value) -> DesiredState {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn desired_state_flattens_domains() {
        let desired = decode(json!({
            "sequence": 5,
            "firewall": [
                { "name": "https", "match": { "dst_port": 443 }, "action": "allow", "priority": 10 }
            ]
        }));
        assert_eq!(desired.sequence, 5);
        assert_eq!(desired.config.count(Domain::Firewall), 1);
        assert!(desired.config.routes.is_empty());
        assert!(desired.config.validate().is_ok());
    }

    #[test]
    fn validation_collects_every_issue() {
        let desired = decode(json!({
            "sequence": 1,
            "routes": [{ "destination": "10.1.0.0/16" }],
            "nat": [
                { "name": "fwd", "kind": "dnat", "match": { "dst_port": 8080 } },
                { "name": "out", "kind": "snat" }
            ],
            "firewall": [
                { "name": "a", "action": "allow", "match": { "dst_port": 0 } },
                { "name": "a", "action": "deny" },
                { "action": "deny" }
            ],
            "vpn": [{
                "name": "wg0",
                "tunnel": { "type": "wireguard", "private_key_ref": "file:/k", "peers": [{}] }
            }],
            "ddns": [{ "hostname": "edge.example.net" }]
        }));

        let issues = desired.config.validate().unwrap_err();
        let rendered: Vec<String> = issues.iter().map(ToString::to_string).collect();

        assert_eq!(
            rendered,
            vec![
                "firewall[a]: duplicate entry",
                "firewall[#2]: entry has an empty name",
                "routing[10.1.0.0/16 metric 0]: route needs a gateway or an interface",
                "firewall[a]: port 0 is not a valid match or translation port",
                "nat[fwd]: dnat requires a translation address",
                "nat[out]: snat requires to_address",
                "vpn[wg0]: every wireguard peer needs a public key",
                "ddns[edge.example.net]: ddns binding requires a provider",
                "ddns[edge.example.net]: ddns binding requires credentials_ref",
            ]
        );
    }

    #[test]
    fn route_destination_must_be_a_network() {
        let config = NetworkConfig {
            routes: vec![serde_json::from_value(json!({
                "destination": "10.0.0.1/24",
                "gateway": "192.0.2.1"
            }))
            .unwrap()],
            ..NetworkConfig::default()
        };
        let issues = config.validate().unwrap_err();
        assert_eq!(issues.len(), 1);
        assert_eq!(
            issues[0].to_string(),
            "routing[10.0.0.1/24 metric 0]: route destination has host bits set"
        );
    }

    #[test]
    fn gateway_family_must_match() {
        let config = NetworkConfig {
            routes: vec![serde_json::from_value(json!({
                "destination": "2001:db8::/32",
                "gateway": "192.0.2.1"
            }))
            .unwrap()],
            ..NetworkConfig::default()
        };
        let issues = config.validate().unwrap_err();
        assert_eq!(issues.len(), 1);
        assert!(issues[0].message.contains("address family"));
    }
}
