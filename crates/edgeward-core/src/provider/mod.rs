// ── Provider abstraction ──
//
// A provider adapts the platform-neutral model to one platform family.
// Supporting a new platform means adding an implementation here; the
// reconciler never changes.

pub mod linux;
pub mod memory;
pub mod router_api;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use thiserror::Error;

use crate::config::ProviderSettings;
use crate::error::CoreError;
use crate::model::{
    ActualState, DdnsBinding, FirewallRule, Interface, Metrics, NatRule, Route, VpnProfile,
};

pub use linux::{CommandOutput, CommandRunner, LinuxProvider, SystemRunner};
pub use memory::MemoryProvider;
pub use router_api::RouterApiProvider;

/// How a provider call failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FailureClass {
    /// Retryable, e.g. a lock held by the platform's own tooling.
    Transient,
    /// Well-formed but rejected by the platform.
    Permanent,
    PermissionDenied,
}

/// A classified provider failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    #[error("transient failure: {0}")]
    Transient(String),

    #[error("rejected by platform: {0}")]
    Permanent(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),
}

impl ProviderError {
    pub fn class(&self) -> FailureClass {
        match self {
            Self::Transient(_) => FailureClass::Transient,
            Self::Permanent(_) => FailureClass::Permanent,
            Self::PermissionDenied(_) => FailureClass::PermissionDenied,
        }
    }

    pub fn reason(&self) -> &str {
        match self {
            Self::Transient(reason) | Self::Permanent(reason) | Self::PermissionDenied(reason) => {
                reason
            }
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    /// A provider call that exceeded its per-call bound.
    pub fn timed_out(operation: &str, after: Duration) -> Self {
        Self::Transient(format!(
            "{operation} timed out after {}ms",
            after.as_millis()
        ))
    }
}

/// Platform capability set.
///
/// Every `apply_*` receives the complete, ordered set for its domain and
/// must converge the device to exactly that set. Calling it twice with the
/// same input must leave the device as after the first call. Reads never
/// mutate state.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Short name for logs (`memory`, `linux`, `router-api`).
    fn name(&self) -> &'static str;

    async fn read_config(&self) -> Result<ActualState, ProviderError>;

    async fn apply_firewall(&self, rules: &[FirewallRule]) -> Result<(), ProviderError>;

    async fn apply_nat(&self, rules: &[NatRule]) -> Result<(), ProviderError>;

    async fn apply_routing(&self, routes: &[Route]) -> Result<(), ProviderError>;

    async fn apply_vpn(&self, profiles: &[VpnProfile]) -> Result<(), ProviderError>;

    /// Optional capability. Platforms without a DDNS client reject every
    /// non-empty binding set.
    async fn apply_ddns(&self, bindings: &[DdnsBinding]) -> Result<(), ProviderError> {
        if bindings.is_empty() {
            return Ok(());
        }
        Err(ProviderError::Permanent(format!(
            "dynamic DNS is not supported by the {} provider",
            self.name()
        )))
    }

    async fn get_metrics(&self) -> Result<Metrics, ProviderError>;

    async fn get_interfaces(&self) -> Result<Vec<Interface>, ProviderError>;
}

/// Run a provider call under the per-call timeout. An expired call counts
/// as a transient failure.
pub async fn bounded<T>(
    timeout: Duration,
    operation: &str,
    call: impl Future<Output = Result<T, ProviderError>>,
) -> Result<T, ProviderError> {
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(ProviderError::timed_out(operation, timeout)),
    }
}

/// Instantiate the provider named by the startup configuration.
pub fn build(settings: &ProviderSettings) -> Result<Arc<dyn Provider>, CoreError> {
    let provider: Arc<dyn Provider> = match settings {
        ProviderSettings::Memory => Arc::new(MemoryProvider::new()),
        ProviderSettings::Linux(linux) => Arc::new(LinuxProvider::new(linux.clone())),
        ProviderSettings::RouterApi(api) => Arc::new(RouterApiProvider::new(api)?),
    };
    tracing::info!(provider = provider.name(), "provider initialised");
    Ok(provider)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn error_classes() {
        let err = ProviderError::timed_out("apply_nat", Duration::from_secs(2));
        assert!(err.is_transient());
        assert_eq!(err.class(), FailureClass::Transient);
        assert_eq!(err.reason(), "apply_nat timed out after 2000ms");
        assert_eq!(FailureClass::PermissionDenied.to_string(), "permission_denied");
    }

    #[tokio::test]
    async fn default_ddns_capability_rejects_bindings() {
        let provider = LinuxProvider::new(crate::config::LinuxSettings::default());
        assert!(provider.apply_ddns(&[]).await.is_ok());

        let binding = DdnsBinding {
            provider: "cloudflare".into(),
            hostname: "edge.example.net".into(),
            credentials_ref: "env:CF_TOKEN".into(),
            interface: None,
        };
        let err = provider.apply_ddns(&[binding]).await.unwrap_err();
        assert_eq!(err.class(), FailureClass::Permanent);
    }
}
