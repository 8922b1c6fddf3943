// ── Mode gate ──
//
// The single authoritative shadow/enforce switch. It is seeded from startup
// configuration and afterwards changed only by control-plane instructions.
// The reconciler reads it once at the start of a pass, so a pass never mixes
// shadow and enforce semantics.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use tokio::sync::watch;

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Mode {
    /// Compute and report the plan, never touch the device.
    #[default]
    Shadow,
    /// Execute the plan.
    Enforce,
}

/// Shared, observable reconciliation mode.
#[derive(Debug)]
pub struct ModeGate {
    tx: watch::Sender<Mode>,
}

impl ModeGate {
    pub fn new(initial: Mode) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx }
    }

    pub fn current(&self) -> Mode {
        *self.tx.borrow()
    }

    /// Apply a control-plane instruction. Returns `true` if the mode changed.
    pub fn instruct(&self, mode: Mode) -> bool {
        let changed = self.tx.send_if_modified(|current| {
            if *current == mode {
                false
            } else {
                *current = mode;
                true
            }
        });
        if changed {
            tracing::info!(%mode, "reconciliation mode changed by control plane");
        }
        changed
    }

    pub fn subscribe(&self) -> watch::Receiver<Mode> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn parses_case_insensitively() {
        assert_eq!("Enforce".parse::<Mode>().unwrap(), Mode::Enforce);
        assert_eq!("shadow".parse::<Mode>().unwrap(), Mode::Shadow);
        assert!("observe".parse::<Mode>().is_err());
        assert_eq!(Mode::default(), Mode::Shadow);
    }

    #[test]
    fn instruct_reports_changes_only() {
        let gate = ModeGate::new(Mode::Shadow);
        let mut rx = gate.subscribe();

        assert!(!gate.instruct(Mode::Shadow));
        assert!(!rx.has_changed().unwrap());

        assert!(gate.instruct(Mode::Enforce));
        assert!(rx.has_changed().unwrap());
        assert_eq!(gate.current(), Mode::Enforce);
    }
}
