// ── Dynamic DNS bindings ──

use std::cmp::Ordering;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use super::domain::Domain;
use super::key::Resource;
use crate::provider::{Provider, ProviderError};

/// Keeps `hostname` pointed at the device's public address through a
/// DDNS service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DdnsBinding {
    /// Service name, e.g. `cloudflare`, `dyndns2`.
    #[serde(default)]
    pub provider: String,
    #[serde(default)]
    pub hostname: String,
    /// Reference to the service credentials, never the credentials.
    #[serde(default)]
    pub credentials_ref: String,
    /// Interface whose address is published. Defaults to the WAN.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interface: Option<String>,
}

impl Resource for DdnsBinding {
    const DOMAIN: Domain = Domain::Ddns;

    fn identity(&self) -> String {
        self.hostname.clone()
    }

    fn ordering(&self, other: &Self) -> Ordering {
        self.hostname.cmp(&other.hostname)
    }

    fn apply<'a>(
        provider: &'a dyn Provider,
        set: &'a [Self],
    ) -> BoxFuture<'a, Result<(), ProviderError>> {
        provider.apply_ddns(set)
    }
}
