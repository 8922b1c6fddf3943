// ── Desired-state store ──
//
// Holds exactly one current desired state. A replacement is accepted only if
// its sequence number is strictly greater than the stored one, and always
// replaces wholesale. Readers get an `Arc` snapshot that stays stable for as
// long as they hold it, independent of later replacements.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, warn};

use crate::model::DesiredState;

/// Result of [`DesiredStateStore::replace`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Replace {
    Stored { previous: Option<u64> },
    /// Sequence not newer than the stored one; nothing changed.
    Stale { current: u64 },
}

impl Replace {
    pub fn is_stored(self) -> bool {
        matches!(self, Self::Stored { .. })
    }
}

/// Exclusive owner of the current desired state.
#[derive(Debug)]
pub struct DesiredStateStore {
    tx: watch::Sender<Option<Arc<DesiredState>>>,
}

impl Default for DesiredStateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DesiredStateStore {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx }
    }

    /// Replace the current desired state if `desired` is newer.
    ///
    /// The sequence check and the swap happen under the channel's write
    /// lock, so concurrent writers cannot interleave.
    pub fn replace(&self, desired: DesiredState) -> Replace {
        let incoming = desired.sequence;
        let mut result = Replace::Stale { current: incoming };

        self.tx.send_if_modified(|slot| {
            let previous = slot.as_ref().map(|d| d.sequence);
            match previous {
                Some(current) if incoming <= current => {
                    result = Replace::Stale { current };
                    false
                }
                _ => {
                    *slot = Some(Arc::new(desired));
                    result = Replace::Stored { previous };
                    true
                }
            }
        });

        match result {
            Replace::Stored { previous } => {
                debug!(sequence = incoming, ?previous, "desired state replaced");
            }
            Replace::Stale { current } => {
                warn!(
                    sequence = incoming,
                    current, "discarding stale or duplicate desired state"
                );
            }
        }
        result
    }

    pub fn current(&self) -> Option<Arc<DesiredState>> {
        self.tx.borrow().clone()
    }

    pub fn sequence(&self) -> Option<u64> {
        self.tx.borrow().as_ref().map(|d| d.sequence)
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<Arc<DesiredState>>> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::NetworkConfig;

    fn state(sequence: u64) -> DesiredState {
        DesiredState::new(sequence, NetworkConfig::default())
    }

    #[test]
    fn newer_sequence_replaces() {
        let store = DesiredStateStore::new();
        assert_eq!(store.replace(state(3)), Replace::Stored { previous: None });
        assert_eq!(store.replace(state(4)), Replace::Stored { previous: Some(3) });
        assert_eq!(store.sequence(), Some(4));
    }

    #[test]
    fn stale_and_duplicate_are_discarded() {
        let store = DesiredStateStore::new();
        store.replace(state(5));
        let before = store.current();
        let mut rx = store.subscribe();

        assert_eq!(store.replace(state(5)), Replace::Stale { current: 5 });
        assert_eq!(store.replace(state(2)), Replace::Stale { current: 5 });

        assert_eq!(store.sequence(), Some(5));
        assert!(matches!((before, store.current()), (Some(a), Some(b)) if Arc::ptr_eq(&a, &b)));
        assert!(!rx.has_changed().unwrap_or(true));
    }

    #[test]
    fn snapshot_survives_replacement() {
        let store = DesiredStateStore::new();
        store.replace(state(1));
        let snapshot = store.current();
        store.replace(state(2));
        assert_eq!(snapshot.map(|d| d.sequence), Some(1));
    }
}
