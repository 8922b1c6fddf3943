//! Configuration for the edgeward agent.
//!
//! A single TOML file (plus `EDGEWARD_`-prefixed environment overrides),
//! credential reference resolution (env, file, keyring, plaintext), and
//! translation into `edgeward_core::AgentConfig`. The core crate never reads
//! files or the environment itself; everything it needs comes through here.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use edgeward_api::{BackoffPolicy, TlsMode};
use edgeward_core::{
    AgentConfig, LinuxSettings, Mode, ProviderSettings, RetryPolicy, RouterApiSettings,
};

/// Service-wide configuration file, preferred when present.
pub const SYSTEM_CONFIG_PATH: &str = "/etc/edgeward/agent.toml";

/// Prefix for environment overrides. `__` separates nested keys, so
/// `EDGEWARD_AGENT__MODE=enforce` sets `[agent] mode`.
pub const ENV_PREFIX: &str = "EDGEWARD_";

/// Keyring service name used for `keyring:` credential references.
const KEYRING_SERVICE: &str = "edgeward";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("no credential available for {field}: {reason}")]
    NoCredentials { field: String, reason: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

fn invalid(field: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Validation {
        field: field.into(),
        reason: reason.into(),
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level agent configuration file.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub device: DeviceSection,

    #[serde(default)]
    pub control: ControlSection,

    #[serde(default)]
    pub agent: AgentSection,

    #[serde(default)]
    pub provider: ProviderSection,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct DeviceSection {
    /// Stable device identity presented in `HELLO`.
    #[serde(default)]
    pub id: String,
}

/// Control-plane connection.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ControlSection {
    /// WebSocket endpoint (`wss://...`).
    #[serde(default)]
    pub endpoint: String,

    /// Credential reference: `env:NAME`, `file:/path`, `keyring:entry`
    /// or `plain:value`.
    #[serde(default)]
    pub credential: String,

    #[serde(default = "default_heartbeat")]
    pub heartbeat_secs: u64,

    #[serde(default = "default_auth_timeout")]
    pub auth_timeout_secs: u64,

    #[serde(default)]
    pub backoff: BackoffSection,
}

impl Default for ControlSection {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            credential: String::new(),
            heartbeat_secs: default_heartbeat(),
            auth_timeout_secs: default_auth_timeout(),
            backoff: BackoffSection::default(),
        }
    }
}

fn default_heartbeat() -> u64 {
    15
}
fn default_auth_timeout() -> u64 {
    10
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BackoffSection {
    #[serde(default = "default_initial_ms")]
    pub initial_ms: u64,

    #[serde(default = "default_max_secs")]
    pub max_secs: u64,

    /// Floor applied after the control plane rejects our credential.
    #[serde(default = "default_auth_min_secs")]
    pub auth_min_secs: u64,

    /// A session lasting this long resets the backoff sequence.
    #[serde(default = "default_stable_secs")]
    pub stable_secs: u64,
}

impl Default for BackoffSection {
    fn default() -> Self {
        Self {
            initial_ms: default_initial_ms(),
            max_secs: default_max_secs(),
            auth_min_secs: default_auth_min_secs(),
            stable_secs: default_stable_secs(),
        }
    }
}

fn default_initial_ms() -> u64 {
    1000
}
fn default_max_secs() -> u64 {
    60
}
fn default_auth_min_secs() -> u64 {
    30
}
fn default_stable_secs() -> u64 {
    60
}

/// Reconciliation behaviour.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AgentSection {
    /// Startup mode: "shadow" or "enforce".
    #[serde(default = "default_mode")]
    pub mode: String,

    /// Periodic drift-correction pass. 0 disables it.
    #[serde(default)]
    pub resync_secs: u64,

    #[serde(default = "default_metrics_interval")]
    pub metrics_interval_secs: u64,

    #[serde(default = "default_timeout")]
    pub provider_timeout_secs: u64,

    #[serde(default)]
    pub retry: RetrySection,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            mode: default_mode(),
            resync_secs: 0,
            metrics_interval_secs: default_metrics_interval(),
            provider_timeout_secs: default_timeout(),
            retry: RetrySection::default(),
        }
    }
}

fn default_mode() -> String {
    "shadow".into()
}
fn default_metrics_interval() -> u64 {
    60
}
fn default_timeout() -> u64 {
    30
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetrySection {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_retry_initial_ms")]
    pub initial_ms: u64,

    #[serde(default = "default_retry_max_ms")]
    pub max_ms: u64,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_ms: default_retry_initial_ms(),
            max_ms: default_retry_max_ms(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}
fn default_retry_initial_ms() -> u64 {
    200
}
fn default_retry_max_ms() -> u64 {
    5000
}

/// Provider selector plus per-provider parameters. Only the table matching
/// `kind` is consulted.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProviderSection {
    /// "memory", "linux" or "router-api".
    #[serde(default = "default_kind")]
    pub kind: String,

    #[serde(default)]
    pub linux: LinuxSection,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub router_api: Option<RouterApiSection>,
}

impl Default for ProviderSection {
    fn default() -> Self {
        Self {
            kind: default_kind(),
            linux: LinuxSection::default(),
            router_api: None,
        }
    }
}

fn default_kind() -> String {
    "linux".into()
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LinuxSection {
    pub ip_path: PathBuf,
    pub nft_path: PathBuf,
    pub wg_path: PathBuf,
    pub state_dir: PathBuf,
    pub sysfs_root: PathBuf,
    pub proc_root: PathBuf,
    pub route_table: u32,
}

impl Default for LinuxSection {
    fn default() -> Self {
        let LinuxSettings {
            ip_path,
            nft_path,
            wg_path,
            state_dir,
            sysfs_root,
            proc_root,
            route_table,
        } = LinuxSettings::default();
        Self {
            ip_path,
            nft_path,
            wg_path,
            state_dir,
            sysfs_root,
            proc_root,
            route_table,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RouterApiSection {
    /// Management API base URL (e.g., "https://192.168.1.1:8443").
    pub url: String,

    /// Credential reference for the bearer token, if the API wants one.
    pub api_key: Option<String>,

    /// Accept self-signed certificates.
    #[serde(default)]
    pub insecure: bool,

    /// Path to a custom CA certificate.
    pub ca_cert: Option<PathBuf>,

    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

// ── Config file path ────────────────────────────────────────────────

/// The system-wide file when it exists, else the per-user config dir.
pub fn config_path() -> PathBuf {
    let system = PathBuf::from(SYSTEM_CONFIG_PATH);
    if system.exists() {
        return system;
    }
    ProjectDirs::from("net", "edgeward", "edgeward")
        .map_or(system, |dirs| dirs.config_dir().join("agent.toml"))
}

// ── Config loading ──────────────────────────────────────────────────

/// Load configuration from file + environment.
///
/// An explicit `path` must exist. Without one, [`config_path`] is used and
/// may be absent, in which case defaults and the environment must supply
/// everything.
pub fn load_config(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = match path {
        Some(explicit) => {
            if !explicit.is_file() {
                return Err(ConfigError::Io(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("config file not found: {}", explicit.display()),
                )));
            }
            explicit.to_path_buf()
        }
        None => config_path(),
    };
    tracing::debug!(path = %path.display(), "loading configuration");

    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(&path))
        .merge(Env::prefixed(ENV_PREFIX).split("__"));

    Ok(figment.extract()?)
}

// ── Credential resolution ───────────────────────────────────────────

/// Resolve a credential reference to its secret.
///
/// `env:NAME` reads an environment variable, `file:/path` reads a file
/// (trailing newline stripped), `keyring:entry` reads the system keyring
/// under the `edgeward` service, and `plain:value` is the value itself.
pub fn resolve_credential(field: &str, reference: &str) -> Result<SecretString, ConfigError> {
    let missing = |reason: String| ConfigError::NoCredentials {
        field: field.into(),
        reason,
    };

    let Some((scheme, target)) = reference.split_once(':') else {
        return Err(if reference.is_empty() {
            missing("not configured".into())
        } else {
            invalid(
                field,
                "expected a reference like env:NAME, file:/path, keyring:entry or plain:value",
            )
        });
    };

    let secret = match scheme {
        "env" => std::env::var(target)
            .map_err(|_| missing(format!("environment variable {target} is not set")))?,
        "file" => std::fs::read_to_string(target)
            .map_err(|e| missing(format!("cannot read {target}: {e}")))?
            .trim_end_matches(['\r', '\n'])
            .to_owned(),
        "keyring" => keyring::Entry::new(KEYRING_SERVICE, target)
            .and_then(|entry| entry.get_password())
            .map_err(|e| missing(format!("keyring entry {target}: {e}")))?,
        "plain" => target.to_owned(),
        other => {
            return Err(invalid(
                field,
                format!("unknown credential source '{other}'"),
            ));
        }
    };

    if secret.is_empty() {
        return Err(missing(format!("{scheme} source is empty")));
    }
    Ok(SecretString::from(secret))
}

/// Replace the value of a `plain:` reference so it can be printed.
fn redact_reference(reference: &str) -> String {
    match reference.split_once(':') {
        Some(("plain", _)) => "plain:<redacted>".into(),
        _ => reference.to_owned(),
    }
}

// ── Translation ─────────────────────────────────────────────────────

impl Config {
    /// Validate and build the runtime configuration, resolving credentials.
    pub fn to_agent_config(&self) -> Result<AgentConfig, ConfigError> {
        let device_id = self.device.id.trim();
        if device_id.is_empty() {
            return Err(invalid("device.id", "must not be empty"));
        }

        let endpoint = parse_url("control.endpoint", &self.control.endpoint)?;
        if !matches!(endpoint.scheme(), "ws" | "wss") {
            return Err(invalid(
                "control.endpoint",
                format!("expected a ws:// or wss:// URL, got '{}'", endpoint.scheme()),
            ));
        }
        if self.control.heartbeat_secs == 0 {
            return Err(invalid("control.heartbeat_secs", "must be at least 1"));
        }
        if self.control.auth_timeout_secs == 0 {
            return Err(invalid("control.auth_timeout_secs", "must be at least 1"));
        }

        let initial_mode = Mode::from_str(&self.agent.mode).map_err(|_| {
            invalid(
                "agent.mode",
                format!("expected 'shadow' or 'enforce', got '{}'", self.agent.mode),
            )
        })?;
        if self.agent.retry.max_attempts == 0 {
            return Err(invalid("agent.retry.max_attempts", "must be at least 1"));
        }
        if self.agent.metrics_interval_secs == 0 {
            return Err(invalid("agent.metrics_interval_secs", "must be at least 1"));
        }

        let provider = self.provider_settings()?;
        let provider_timeout = self.provider_timeout()?;
        let credential = resolve_credential("control.credential", &self.control.credential)?;

        let backoff = &self.control.backoff;
        Ok(AgentConfig {
            device_id: device_id.to_owned(),
            endpoint,
            credential,
            initial_mode,
            heartbeat_interval: Duration::from_secs(self.control.heartbeat_secs),
            auth_timeout: Duration::from_secs(self.control.auth_timeout_secs),
            backoff: BackoffPolicy {
                initial_delay: Duration::from_millis(backoff.initial_ms),
                max_delay: Duration::from_secs(backoff.max_secs),
                auth_min_delay: Duration::from_secs(backoff.auth_min_secs),
                stability_threshold: Duration::from_secs(backoff.stable_secs),
                ..BackoffPolicy::default()
            },
            resync_interval: (self.agent.resync_secs > 0)
                .then(|| Duration::from_secs(self.agent.resync_secs)),
            metrics_interval: Duration::from_secs(self.agent.metrics_interval_secs),
            provider_timeout,
            retry: self.retry_policy(),
            provider,
        })
    }

    /// Upper bound on a single provider call.
    pub fn provider_timeout(&self) -> Result<Duration, ConfigError> {
        if self.agent.provider_timeout_secs == 0 {
            return Err(invalid("agent.provider_timeout_secs", "must be at least 1"));
        }
        Ok(Duration::from_secs(self.agent.provider_timeout_secs))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        let retry = &self.agent.retry;
        RetryPolicy {
            max_attempts: retry.max_attempts.max(1),
            initial_delay: Duration::from_millis(retry.initial_ms),
            max_delay: Duration::from_millis(retry.max_ms),
        }
    }

    /// Build only the provider selection. Used by one-shot commands that
    /// never open the control channel.
    pub fn provider_settings(&self) -> Result<ProviderSettings, ConfigError> {
        match self.provider.kind.as_str() {
            "memory" => Ok(ProviderSettings::Memory),
            "linux" => {
                let linux = &self.provider.linux;
                Ok(ProviderSettings::Linux(LinuxSettings {
                    ip_path: linux.ip_path.clone(),
                    nft_path: linux.nft_path.clone(),
                    wg_path: linux.wg_path.clone(),
                    state_dir: linux.state_dir.clone(),
                    sysfs_root: linux.sysfs_root.clone(),
                    proc_root: linux.proc_root.clone(),
                    route_table: linux.route_table,
                }))
            }
            "router-api" => {
                let api = self.provider.router_api.as_ref().ok_or_else(|| {
                    invalid(
                        "provider.router_api",
                        "required when provider.kind = \"router-api\"",
                    )
                })?;
                let url = parse_url("provider.router_api.url", &api.url)?;
                let api_key = api
                    .api_key
                    .as_deref()
                    .map(|reference| resolve_credential("provider.router_api.api_key", reference))
                    .transpose()?;
                let tls = if api.insecure {
                    TlsMode::DangerAcceptInvalid
                } else if let Some(ref ca) = api.ca_cert {
                    TlsMode::CustomCa(ca.clone())
                } else {
                    TlsMode::System
                };
                Ok(ProviderSettings::RouterApi(RouterApiSettings {
                    url,
                    api_key,
                    tls,
                    timeout: Duration::from_secs(api.timeout_secs),
                }))
            }
            other => Err(invalid(
                "provider.kind",
                format!("expected 'memory', 'linux' or 'router-api', got '{other}'"),
            )),
        }
    }

    /// A copy safe to print: plaintext credentials are masked.
    pub fn redacted(&self) -> Config {
        let mut copy = self.clone();
        copy.control.credential = redact_reference(&copy.control.credential);
        if let Some(api) = copy.provider.router_api.as_mut() {
            api.api_key = api.api_key.as_deref().map(redact_reference);
        }
        copy
    }

    /// Pretty TOML rendering of [`Config::redacted`].
    pub fn summary(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(&self.redacted())?)
    }
}

fn parse_url(field: &str, raw: &str) -> Result<Url, ConfigError> {
    if raw.trim().is_empty() {
        return Err(invalid(field, "must not be empty"));
    }
    raw.parse()
        .map_err(|e| invalid(field, format!("invalid URL '{raw}': {e}")))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn redaction_masks_only_plaintext() {
        assert_eq!(redact_reference("plain:hunter2"), "plain:<redacted>");
        assert_eq!(redact_reference("env:EDGE_TOKEN"), "env:EDGE_TOKEN");
        assert_eq!(redact_reference("keyring:edge-01"), "keyring:edge-01");
    }

    #[test]
    fn bare_value_is_not_a_reference() {
        let err = resolve_credential("control.credential", "hunter2").unwrap_err();
        assert!(matches!(err, ConfigError::Validation { .. }), "{err}");
    }

    #[test]
    fn empty_reference_means_no_credential() {
        let err = resolve_credential("control.credential", "").unwrap_err();
        assert!(matches!(err, ConfigError::NoCredentials { .. }), "{err}");
    }

    #[test]
    fn unknown_scheme_is_rejected() {
        let err = resolve_credential("control.credential", "vault:edge").unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid control.credential: unknown credential source 'vault'"
        );
    }

    #[test]
    fn linux_defaults_match_core() {
        let section = LinuxSection::default();
        assert_eq!(section.route_table, LinuxSettings::default().route_table);
        assert_eq!(section.proc_root, PathBuf::from("/proc"));
    }
}
