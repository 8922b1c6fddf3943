// ── VPN profiles ──

use std::cmp::Ordering;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use super::domain::Domain;
use super::key::Resource;
use super::prefix::Prefix;
use crate::provider::{Provider, ProviderError};

/// A named tunnel. Secrets are always references (`file:`, `env:`,
/// platform keystore names), never inline key material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VpnProfile {
    #[serde(default)]
    pub name: String,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    pub tunnel: Tunnel,
}

fn enabled_by_default() -> bool {
    true
}

impl VpnProfile {
    pub fn tunnel_type(&self) -> &'static str {
        match self.tunnel {
            Tunnel::Wireguard(_) => "wireguard",
            Tunnel::Openvpn(_) => "openvpn",
            Tunnel::Ipsec(_) => "ipsec",
        }
    }
}

/// Tunnel-type-specific configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Tunnel {
    Wireguard(WireGuardTunnel),
    Openvpn(OpenVpnTunnel),
    Ipsec(IpsecTunnel),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireGuardTunnel {
    pub private_key_ref: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub listen_port: Option<u16>,
    #[serde(default)]
    pub address: Vec<Prefix>,
    #[serde(default)]
    pub peers: Vec<WireGuardPeer>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireGuardPeer {
    #[serde(default)]
    pub public_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub allowed_ips: Vec<Prefix>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persistent_keepalive: Option<u16>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum OpenVpnProto {
    #[default]
    Udp,
    Tcp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenVpnTunnel {
    pub remote: String,
    #[serde(default = "default_openvpn_port")]
    pub port: u16,
    #[serde(default)]
    pub proto: OpenVpnProto,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_ref: Option<String>,
}

fn default_openvpn_port() -> u16 {
    1194
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpsecTunnel {
    pub remote: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_id: Option<String>,
    pub psk_ref: String,
    #[serde(default)]
    pub local_subnets: Vec<Prefix>,
    #[serde(default)]
    pub remote_subnets: Vec<Prefix>,
}

impl Resource for VpnProfile {
    const DOMAIN: Domain = Domain::Vpn;

    fn identity(&self) -> String {
        self.name.clone()
    }

    fn ordering(&self, other: &Self) -> Ordering {
        self.name.cmp(&other.name)
    }

    fn apply<'a>(
        provider: &'a dyn Provider,
        set: &'a [Self],
    ) -> BoxFuture<'a, Result<(), ProviderError>> {
        provider.apply_vpn(set)
    }
}
