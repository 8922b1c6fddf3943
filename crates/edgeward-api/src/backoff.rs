// ── Reconnection backoff ──
//
// Exponential backoff with jitter, capped at a ceiling. Credential
// rejections use a longer floor so a misconfigured device does not hammer
// the control plane.

use std::time::Duration;

/// Why the channel entered `Backoff`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureCause {
    /// Transport-level failure (connect refused, read error, idle timeout).
    Connection,
    /// Credential exchange rejected.
    Auth,
}

/// Exponential backoff configuration for control-channel reconnection.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    /// Delay before the first reconnection attempt. Default: 1s.
    pub initial_delay: Duration,

    /// Upper bound on backoff delay. Default: 60s.
    pub max_delay: Duration,

    /// Minimum delay after an authentication failure. Default: 30s.
    pub auth_min_delay: Duration,

    /// A `Connected` period at least this long resets the attempt counter.
    /// Default: 60s.
    pub stability_threshold: Duration,

    /// Phase offset for the jitter curve so a fleet of devices that lost
    /// the control plane together does not reconnect in lockstep.
    pub jitter_seed: u64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            auth_min_delay: Duration::from_secs(30),
            stability_threshold: Duration::from_secs(60),
            jitter_seed: 0,
        }
    }
}

impl BackoffPolicy {
    /// Derive a jitter seed from a stable identifier (the device id).
    pub fn with_jitter_seed_from(mut self, id: &str) -> Self {
        // FNV-1a, enough to spread phases across a fleet.
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in id.bytes() {
            hash ^= u64::from(byte);
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
        self.jitter_seed = hash;
        self
    }

    /// Delay before reconnection attempt number `attempt` (0-based).
    ///
    /// `delay = min(initial * 2^attempt * jitter, max)`
    ///
    /// Jitter is +-25%. Because the base doubles each step, consecutive
    /// delays strictly increase until the ceiling is reached.
    pub fn delay(&self, attempt: u32, cause: FailureCause) -> Duration {
        let exponent = i32::try_from(attempt.min(30)).unwrap_or(30);
        let base = self.initial_delay.as_secs_f64() * 2.0_f64.powi(exponent);

        let phase = (self.jitter_seed % 1000) as f64 / 1000.0 * std::f64::consts::TAU;
        let jitter_factor = 1.0 + 0.25 * (f64::from(attempt) * 7.3 + phase).sin();

        let capped = (base * jitter_factor)
            .min(self.max_delay.as_secs_f64())
            .max(0.0);
        let delay = Duration::from_secs_f64(capped);

        match cause {
            FailureCause::Auth => delay.max(self.auth_min_delay),
            FailureCause::Connection => delay,
        }
    }
}
