//! Lease Service Contract
//!
//! A lease is a time-bounded exclusive right to act as leader for a key,
//! issued by an external lock service. The coordinator only talks to the
//! service through the [`LeaseClient`] trait; the quorum algorithm, clock
//! drift compensation and retry-on-contention policy all live behind it.

pub mod memory;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use memory::{MemoryLeaseClient, MemoryLeaseService};

/// Result of a lease service call
pub type LeaseResult<T> = std::result::Result<T, LeaseError>;

/// A lease held on a key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    /// Key the lease was acquired for
    pub key: String,
    /// Opaque token identifying this holder to the service
    pub token: String,
    /// When the lease lapses unless extended, by the holder's wall clock.
    /// The lease service keeps its own deadline and has the final say.
    pub expires_at: DateTime<Utc>,
}

impl Lease {
    /// Create a lease that expires `ttl` from now
    pub fn new(key: impl Into<String>, token: impl Into<String>, ttl: Duration) -> Self {
        let expires_at = chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|ttl| Utc::now().checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        Self {
            key: key.into(),
            token: token.into(),
            expires_at,
        }
    }

    /// Whether the expiration timestamp has passed
    pub fn is_expired(&self) -> bool {
        self.expires_at <= Utc::now()
    }

    /// Time left before expiry (zero once expired)
    pub fn remaining(&self) -> Duration {
        (self.expires_at - Utc::now()).to_std().unwrap_or(Duration::ZERO)
    }
}

/// Why a lease service call failed
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LeaseError {
    /// Another holder currently owns the key
    #[error("lease {key} is held by another owner")]
    Contention { key: String },

    /// The lease expired or was taken over
    #[error("lease {key} is no longer valid")]
    LeaseLost { key: String },

    /// Network, quorum or any other service failure
    #[error("lease service error: {message}")]
    Service { message: String },
}

impl LeaseError {
    /// Build a service error from anything printable
    pub fn service(message: impl ToString) -> Self {
        LeaseError::Service {
            message: message.to_string(),
        }
    }

    /// Expected contention, not a failure of the service
    pub fn is_contention(&self) -> bool {
        matches!(self, LeaseError::Contention { .. })
    }
}

/// Client for the external lease service.
///
/// Each call resolves or fails exactly once; any internal retry/backoff is
/// the implementation's business.
#[async_trait::async_trait]
pub trait LeaseClient: Send + Sync + 'static {
    /// Acquire `key` for `ttl`. Fails with [`LeaseError::Contention`] when
    /// another holder owns it.
    async fn acquire(&self, key: &str, ttl: Duration) -> LeaseResult<Lease>;

    /// Extend a held lease by `ttl`. Fails with [`LeaseError::LeaseLost`]
    /// when the lease is no longer valid.
    async fn extend(&self, lease: &Lease, ttl: Duration) -> LeaseResult<Lease>;

    /// Give the lease back early. Callers treat failure as non-fatal.
    async fn release(&self, lease: &Lease) -> LeaseResult<()>;
}

#[async_trait::async_trait]
impl<T: LeaseClient + ?Sized> LeaseClient for Arc<T> {
    async fn acquire(&self, key: &str, ttl: Duration) -> LeaseResult<Lease> {
        (**self).acquire(key, ttl).await
    }

    async fn extend(&self, lease: &Lease, ttl: Duration) -> LeaseResult<Lease> {
        (**self).extend(lease, ttl).await
    }

    async fn release(&self, lease: &Lease) -> LeaseResult<()> {
        (**self).release(lease).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lease_expiry() {
        let lease = Lease::new("jobs", "token-1", Duration::from_secs(60));
        assert!(!lease.is_expired());
        assert!(lease.remaining() > Duration::from_secs(50));

        let expired = Lease {
            expires_at: Utc::now() - chrono::Duration::seconds(1),
            ..lease
        };
        assert!(expired.is_expired());
        assert_eq!(expired.remaining(), Duration::ZERO);
    }

    #[test]
    fn test_error_classification() {
        assert!(LeaseError::Contention { key: "a".into() }.is_contention());
        assert!(!LeaseError::service("boom").is_contention());
    }

    #[test]
    fn test_error_serializes_with_kind() {
        let json = serde_json::to_string(&LeaseError::Contention { key: "a".into() }).unwrap();
        assert_eq!(json, r#"{"kind":"contention","key":"a"}"#);
    }
}
