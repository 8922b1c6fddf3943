//! Agent error types with miette diagnostics.
//!
//! Every failure the binary can end with maps to one stable exit code.
//! Control-plane trouble never ends up here: the channel keeps retrying.

use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

use edgeward_config::ConfigError;
use edgeward_core::CoreError;

/// Process exit codes.
pub mod exit_code {
    pub const SUCCESS: i32 = 0;
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const CONFIG: i32 = 3;
    pub const PROVIDER: i32 = 4;
}

#[derive(Debug, Error, Diagnostic)]
pub enum AgentError {
    // ── Configuration ────────────────────────────────────────────────
    #[error("Invalid configuration: {0}")]
    #[diagnostic(
        code(edgeward::config),
        help(
            "Check the agent configuration file and EDGEWARD_* environment overrides.\n\
             Run: edgeward check-config"
        )
    )]
    Config(#[from] ConfigError),

    // ── Input ────────────────────────────────────────────────────────
    #[error("Cannot use desired-state file {}: {reason}", .path.display())]
    #[diagnostic(
        code(edgeward::input),
        help("The file must hold a JSON (or YAML) object with routes, nat, firewall, vpn and ddns lists.")
    )]
    Input { path: PathBuf, reason: String },

    // ── Provider ─────────────────────────────────────────────────────
    #[error("Provider {operation} failed: {reason}")]
    #[diagnostic(
        code(edgeward::provider),
        help("Check that the agent can reach and manage the device (permissions, tool paths, API URL).")
    )]
    Provider { operation: String, reason: String },

    // ── Runtime ──────────────────────────────────────────────────────
    #[error("Agent stopped: {0}")]
    #[diagnostic(code(edgeward::runtime))]
    Runtime(CoreError),

    #[error("Cannot render output: {0}")]
    #[diagnostic(code(edgeward::output))]
    Output(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl AgentError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) => exit_code::CONFIG,
            Self::Input { .. } => exit_code::USAGE,
            Self::Provider { .. } => exit_code::PROVIDER,
            Self::Runtime(_) | Self::Output(_) | Self::Io(_) => exit_code::GENERAL,
        }
    }
}

// ── CoreError → AgentError mapping ───────────────────────────────────

impl From<CoreError> for AgentError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Config { message } => AgentError::Config(ConfigError::Validation {
                field: "provider".into(),
                reason: message,
            }),
            other => AgentError::Runtime(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_are_stable() {
        let config = AgentError::Config(ConfigError::Validation {
            field: "agent.mode".into(),
            reason: "nope".into(),
        });
        assert_eq!(config.exit_code(), 3);

        let provider_setup: AgentError = CoreError::Config {
            message: "invalid router API URL".into(),
        }
        .into();
        assert_eq!(provider_setup.exit_code(), exit_code::CONFIG);

        let provider = AgentError::Provider {
            operation: "plan".into(),
            reason: "could not plan firewall".into(),
        };
        assert_eq!(provider.exit_code(), exit_code::PROVIDER);

        let input = AgentError::Input {
            path: "desired.json".into(),
            reason: "bad".into(),
        };
        assert_eq!(input.exit_code(), exit_code::USAGE);

        let runtime: AgentError = CoreError::Internal("boom".into()).into();
        assert_eq!(runtime.exit_code(), exit_code::GENERAL);
    }
}
