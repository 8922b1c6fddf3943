use thiserror::Error;

/// Top-level error type for the `edgeward-api` crate.
///
/// Covers every failure mode of the control channel and the shared HTTP
/// transport. `edgeward-core` maps these into agent-level errors.
#[derive(Debug, Error)]
pub enum Error {
    // ── Connection ──────────────────────────────────────────────────
    /// Transport could not be established or broke mid-session.
    #[error("Control channel connection failed: {0}")]
    Connection(String),

    /// Peer closed the connection.
    #[error("Control channel closed (code {code}): {reason}")]
    Closed { code: u16, reason: String },

    /// A bounded wait expired (auth handshake, idle read, etc.)
    #[error("{operation} timed out after {timeout_ms}ms")]
    Timeout {
        operation: &'static str,
        timeout_ms: u64,
    },

    // ── Authentication ──────────────────────────────────────────────
    /// Credential exchange rejected by the control plane.
    #[error("Authentication rejected: {reason}")]
    Auth { reason: String },

    // ── Protocol ────────────────────────────────────────────────────
    /// A frame could not be decoded, or arrived out of order.
    #[error("Protocol error: {message}")]
    Protocol { message: String, frame: String },

    /// The connection state machine was driven with an event that is not
    /// valid in its current state.
    #[error("Invalid transition: {event} while {from}")]
    InvalidTransition { from: String, event: String },

    // ── HTTP transport ──────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, etc.)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// TLS handshake or certificate error.
    #[error("TLS error: {0}")]
    Tls(String),
}

impl Error {
    /// Returns `true` if the control plane rejected our credentials.
    ///
    /// Auth failures back off with a longer minimum interval.
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Auth { .. })
    }

    /// Returns `true` if this is a transient error worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout() || e.is_connect(),
            Self::Connection(_) | Self::Closed { .. } | Self::Timeout { .. } => true,
            _ => false,
        }
    }
}
