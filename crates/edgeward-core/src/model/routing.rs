// ── Routing domain types ──

use std::cmp::Ordering;
use std::net::IpAddr;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use super::domain::Domain;
use super::key::Resource;
use super::prefix::Prefix;
use crate::provider::{Provider, ProviderError};

/// A static route in the agent-managed routing table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    pub destination: Prefix,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway: Option<IpAddr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interface: Option<String>,
    #[serde(default)]
    pub metric: u32,
}

/// Metric Linux records for an IPv6 route added without one.
pub const IPV6_DEFAULT_METRIC: u32 = 1024;

impl Route {
    /// The metric the route ends up with on the device. An IPv6 route
    /// with metric 0 is stored by the kernel at [`IPV6_DEFAULT_METRIC`].
    pub fn effective_metric(&self) -> u32 {
        if self.metric == 0 && !self.destination.is_ipv4() {
            IPV6_DEFAULT_METRIC
        } else {
            self.metric
        }
    }
}

impl Resource for Route {
    const DOMAIN: Domain = Domain::Routing;

    /// Destination plus metric: two routes to the same prefix with
    /// different metrics are distinct entries (primary and failover).
    fn identity(&self) -> String {
        format!("{} metric {}", self.destination, self.effective_metric())
    }

    fn ordering(&self, other: &Self) -> Ordering {
        self.effective_metric()
            .cmp(&other.effective_metric())
            .then_with(|| self.destination.cmp(&other.destination))
    }

    fn apply<'a>(
        provider: &'a dyn Provider,
        set: &'a [Self],
    ) -> BoxFuture<'a, Result<(), ProviderError>> {
        provider.apply_routing(set)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use serde_json::json;

    fn route(value: serde_json::Value) -> Route {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn ipv6_default_metric_matches_kernel_readback() {
        let desired = route(json!({ "destination": "2001:db8::/32", "gateway": "2001:db8:ffff::1" }));
        let live = route(json!({
            "destination": "2001:db8::/32",
            "gateway": "2001:db8:ffff::1",
            "metric": 1024
        }));
        assert_eq!(desired.identity(), "2001:db8::/32 metric 1024");
        assert_eq!(desired.identity(), live.identity());
    }

    #[test]
    fn ipv4_metric_zero_is_kept() {
        let desired = route(json!({ "destination": "10.1.0.0/16", "gateway": "192.0.2.1" }));
        assert_eq!(desired.effective_metric(), 0);
        assert_eq!(desired.identity(), "10.1.0.0/16 metric 0");
    }
}
