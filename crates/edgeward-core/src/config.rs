// ── Runtime agent configuration ──
//
// These types describe how the agent runs: who it is, where the control
// plane lives, which provider to drive and how patiently. They never touch
// disk; `edgeward-config` builds an `AgentConfig` and hands it in.

use std::path::PathBuf;
use std::time::Duration;

use edgeward_api::{BackoffPolicy, ChannelConfig, TlsMode};
use secrecy::SecretString;
use url::Url;

use crate::mode::Mode;

/// Everything the agent needs at startup.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub device_id: String,
    /// Control-plane WebSocket endpoint (`wss://...`).
    pub endpoint: Url,
    pub credential: SecretString,
    /// Mode until the control plane says otherwise.
    pub initial_mode: Mode,
    pub heartbeat_interval: Duration,
    pub auth_timeout: Duration,
    pub backoff: BackoffPolicy,
    /// Periodic drift-correction pass. `None` disables it.
    pub resync_interval: Option<Duration>,
    pub metrics_interval: Duration,
    /// Upper bound on any single provider call.
    pub provider_timeout: Duration,
    pub retry: RetryPolicy,
    pub provider: ProviderSettings,
}

impl AgentConfig {
    /// Control-channel tuning derived from this configuration.
    pub fn channel_config(&self) -> ChannelConfig {
        let mut channel = ChannelConfig::new(self.device_id.clone(), self.credential.clone());
        channel.heartbeat_interval = self.heartbeat_interval;
        channel.auth_timeout = self.auth_timeout;
        channel.backoff = self
            .backoff
            .clone()
            .with_jitter_seed_from(&self.device_id);
        channel
    }
}

/// Bounded retry of transient provider failures within one pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. At least 1.
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Wait before retry number `retry` (0-based).
    pub fn delay(&self, retry: u32) -> Duration {
        let factor = 2_u32.saturating_pow(retry.min(16));
        self.initial_delay
            .saturating_mul(factor)
            .min(self.max_delay)
    }
}

/// Which provider to instantiate, with its parameters.
#[derive(Debug, Clone)]
pub enum ProviderSettings {
    /// In-process simulated device.
    Memory,
    Linux(LinuxSettings),
    RouterApi(RouterApiSettings),
}

impl ProviderSettings {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Linux(_) => "linux",
            Self::RouterApi(_) => "router-api",
        }
    }
}

/// Generic Linux network stack driven through `ip`, `nft` and `wg`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinuxSettings {
    pub ip_path: PathBuf,
    pub nft_path: PathBuf,
    pub wg_path: PathBuf,
    /// Where the provider keeps its record of applied rule sets.
    pub state_dir: PathBuf,
    pub sysfs_root: PathBuf,
    pub proc_root: PathBuf,
    /// Routing table owned by the agent.
    pub route_table: u32,
}

impl Default for LinuxSettings {
    fn default() -> Self {
        Self {
            ip_path: PathBuf::from("ip"),
            nft_path: PathBuf::from("nft"),
            wg_path: PathBuf::from("wg"),
            state_dir: PathBuf::from("/var/lib/edgeward"),
            sysfs_root: PathBuf::from("/sys"),
            proc_root: PathBuf::from("/proc"),
            route_table: 100,
        }
    }
}

/// Software router exposing a JSON REST API.
#[derive(Debug, Clone)]
pub struct RouterApiSettings {
    pub url: Url,
    pub api_key: Option<SecretString>,
    pub tls: TlsMode,
    pub timeout: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_delay_doubles_and_caps() {
        let retry = RetryPolicy::default();
        assert_eq!(retry.delay(0), Duration::from_millis(200));
        assert_eq!(retry.delay(1), Duration::from_millis(400));
        assert_eq!(retry.delay(2), Duration::from_millis(800));
        assert_eq!(retry.delay(10), Duration::from_secs(5));
        assert_eq!(retry.delay(u32::MAX), Duration::from_secs(5));
    }
}
