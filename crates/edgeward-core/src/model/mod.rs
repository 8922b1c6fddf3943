// ── Network configuration model ──
//
// Every type here is the canonical, platform-neutral representation of one
// piece of device configuration. Providers translate to and from it; the
// reconciler only ever diffs these types.

pub mod ddns;
pub mod desired;
pub mod domain;
pub mod firewall;
pub mod interface;
pub mod key;
pub mod nat;
pub mod prefix;
pub mod routing;
pub mod vpn;

// ── Re-exports ──────────────────────────────────────────────────────

pub use ddns::DdnsBinding;
pub use desired::{ActualState, DesiredState, NetworkConfig, ValidationIssue};
pub use domain::Domain;
pub use firewall::{FirewallAction, FirewallRule, MatchSpec, Protocol};
pub use interface::{Interface, InterfaceStats, Metrics};
pub use key::{IdempotencyKey, Resource, sort_resources};
pub use nat::{NatKind, NatRule};
pub use prefix::{Prefix, PrefixError};
pub use routing::Route;
pub use vpn::{
    IpsecTunnel, OpenVpnProto, OpenVpnTunnel, Tunnel, VpnProfile, WireGuardPeer, WireGuardTunnel,
};
