// ── Configuration domains ──

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoStaticStr};

/// A configuration domain managed by the reconciler.
///
/// Declaration order is dependency order: NAT needs a route to exist,
/// firewall rules may reference NAT state, tunnels come up last.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
    IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Domain {
    Routing,
    Nat,
    Firewall,
    Vpn,
    Ddns,
}

impl Domain {
    /// Every domain, in the order reconciliation visits them.
    pub const ORDER: [Domain; 5] = [
        Domain::Routing,
        Domain::Nat,
        Domain::Firewall,
        Domain::Vpn,
        Domain::Ddns,
    ];

    pub fn as_str(self) -> &'static str {
        self.into()
    }
}
