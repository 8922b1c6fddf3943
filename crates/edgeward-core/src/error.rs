// ── Core error types ──
//
// Agent-level errors. Transport details from `edgeward-api` are folded into
// connection/auth variants by the `From` impl below. Provider failures are
// not errors at this level: they are recorded per domain in the
// reconciliation outcome.

use thiserror::Error;

use crate::model::ValidationIssue;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Control plane ────────────────────────────────────────────────
    #[error("Cannot reach control plane: {reason}")]
    ConnectionFailed { reason: String },

    #[error("Control plane rejected credentials: {message}")]
    AuthenticationFailed { message: String },

    #[error("Control plane operation timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    // ── Desired state ────────────────────────────────────────────────
    #[error("Desired state failed validation: {}", summarize(.issues))]
    ConfigValidation { issues: Vec<ValidationIssue> },

    // ── Configuration ────────────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    // ── Internal ─────────────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

fn summarize(issues: &[ValidationIssue]) -> String {
    match issues {
        [] => "no details".into(),
        [only] => only.to_string(),
        [first, rest @ ..] => format!("{first} (and {} more)", rest.len()),
    }
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<edgeward_api::Error> for CoreError {
    fn from(err: edgeward_api::Error) -> Self {
        use edgeward_api::Error as Api;

        match err {
            Api::Auth { reason } => CoreError::AuthenticationFailed { message: reason },
            Api::Timeout { timeout_ms, .. } => CoreError::Timeout { timeout_ms },
            Api::Connection(reason) => CoreError::ConnectionFailed { reason },
            Api::Closed { code, reason } => CoreError::ConnectionFailed {
                reason: format!("closed by peer (code {code}): {reason}"),
            },
            Api::Transport(e) => CoreError::ConnectionFailed {
                reason: e.to_string(),
            },
            Api::InvalidUrl(e) => CoreError::Config {
                message: format!("Invalid URL: {e}"),
            },
            Api::Tls(message) => CoreError::Config {
                message: format!("TLS setup failed: {message}"),
            },
            Api::Protocol { message, .. } => CoreError::Internal(format!("protocol: {message}")),
            Api::InvalidTransition { from, event } => {
                CoreError::Internal(format!("invalid channel transition {event} in {from}"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Domain;

    #[test]
    fn validation_message_summarizes() {
        let err = CoreError::ConfigValidation {
            issues: vec![
                ValidationIssue::new(Domain::Nat, "fwd", "dnat requires a translation address"),
                ValidationIssue::new(Domain::Nat, "out", "snat requires to_address"),
            ],
        };
        assert_eq!(
            err.to_string(),
            "Desired state failed validation: nat[fwd]: dnat requires a translation address (and 1 more)"
        );
    }

    #[test]
    fn api_auth_maps_to_authentication_failed() {
        let err: CoreError = edgeward_api::Error::Auth {
            reason: "unknown device".into(),
        }
        .into();
        assert!(matches!(err, CoreError::AuthenticationFailed { .. }));
    }
}
