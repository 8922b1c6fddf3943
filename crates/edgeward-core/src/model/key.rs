// ── Resource identity and idempotency keys ──

use std::cmp::Ordering;
use std::fmt;

use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::domain::Domain;
use crate::provider::{Provider, ProviderError};

/// Content hash of a resource's canonical JSON encoding (hex SHA-256).
///
/// Two resources with the same key are interchangeable: applying either
/// produces the same device state.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    pub fn of<T: Serialize>(value: &T) -> Self {
        // Model types are plain data and always serialize.
        let canonical = serde_json::to_vec(value).unwrap_or_default();
        Self(hex::encode(Sha256::digest(&canonical)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex digits, for logs and rule comments.
    pub fn short(&self) -> &str {
        self.0.get(..12).unwrap_or(&self.0)
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for IdempotencyKey {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// A configuration entry the reconciler can diff and apply.
///
/// Each domain has exactly one resource type. The `apply` hook routes a
/// fully resolved set to the provider capability for that domain.
pub trait Resource:
    Serialize + DeserializeOwned + Clone + fmt::Debug + Send + Sync + 'static
{
    const DOMAIN: Domain;

    /// Stable identity within the domain. Entries with the same identity
    /// but different content are modifications of each other.
    fn identity(&self) -> String;

    /// Position within the resolved set handed to the provider.
    fn ordering(&self, other: &Self) -> Ordering;

    fn key(&self) -> IdempotencyKey {
        IdempotencyKey::of(self)
    }

    fn apply<'a>(
        provider: &'a dyn Provider,
        set: &'a [Self],
    ) -> BoxFuture<'a, Result<(), ProviderError>>;
}

/// Sort a resource set into provider order.
pub fn sort_resources<R: Resource>(set: &mut [R]) {
    set.sort_by(R::ordering);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize)]
    struct Sample {
        name: &'static str,
        port: u16,
    }

    #[test]
    fn key_is_stable_and_content_sensitive() {
        let a = IdempotencyKey::of(&Sample { name: "web", port: 443 });
        let b = IdempotencyKey::of(&Sample { name: "web", port: 443 });
        let c = IdempotencyKey::of(&Sample { name: "web", port: 80 });

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.as_str().len(), 64);
        assert_eq!(a.short().len(), 12);
    }
}
