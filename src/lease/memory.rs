//! In-Memory Lease Service
//!
//! A single-process lease table. It stands in for the quorum lock service in
//! the demo binary and in tests; expiry runs on the Tokio clock so paused-time
//! tests see leases lapse deterministically.
//!
//! The service's own expiry is authoritative. The [`Lease::expires_at`] it
//! hands back is only the holder's wall-clock estimate, so under a paused or
//! skewed Tokio clock the two can disagree; a lapsed entry then surfaces as
//! [`LeaseError::LeaseLost`] on the next extend.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::Mutex;
use tokio::time::Instant;
use uuid::Uuid;

use super::{Lease, LeaseClient, LeaseError, LeaseResult};

/// Current holder of a key
#[derive(Debug, Clone)]
struct Entry {
    token: String,
    expires_at: Instant,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

/// Shared lease table
#[derive(Debug, Clone, Default)]
pub struct MemoryLeaseService {
    entries: Arc<Mutex<HashMap<String, Entry>>>,
    /// Probability in `[0, 1]` that a call fails with a service error
    failure_rate: f64,
}

impl MemoryLeaseService {
    /// Create an empty lease table
    pub fn new() -> Self {
        Self::default()
    }

    /// Inject random service errors with probability `rate`
    pub fn with_failure_rate(mut self, rate: f64) -> Self {
        self.failure_rate = rate.clamp(0.0, 1.0);
        self
    }

    /// Hand out a client bound to this table
    pub fn client(&self) -> MemoryLeaseClient {
        MemoryLeaseClient {
            service: self.clone(),
        }
    }

    /// Token of the live holder of `key`, if any
    pub async fn holder(&self, key: &str) -> Option<String> {
        let now = Instant::now();
        self.entries
            .lock()
            .await
            .get(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.token.clone())
    }

    /// Drop whoever holds `key`, as if the lease had been stolen
    pub async fn revoke(&self, key: &str) -> bool {
        let removed = self.entries.lock().await.remove(key).is_some();
        if removed {
            tracing::info!("Revoked lease on {}", key);
        }
        removed
    }

    fn injected_failure(&self, op: &str) -> LeaseResult<()> {
        if self.failure_rate > 0.0 && rand::thread_rng().gen_bool(self.failure_rate) {
            return Err(LeaseError::service(format!("injected failure during {op}")));
        }
        Ok(())
    }

    async fn acquire(&self, key: &str, ttl: Duration) -> LeaseResult<Lease> {
        self.injected_failure("acquire")?;

        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        if entries.get(key).is_some_and(|entry| entry.is_live(now)) {
            return Err(LeaseError::Contention { key: key.to_string() });
        }

        let token = Uuid::new_v4().to_string();
        entries.insert(
            key.to_string(),
            Entry {
                token: token.clone(),
                expires_at: now + ttl,
            },
        );
        Ok(Lease::new(key, token, ttl))
    }

    async fn extend(&self, lease: &Lease, ttl: Duration) -> LeaseResult<Lease> {
        self.injected_failure("extend")?;

        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        match entries.get_mut(&lease.key) {
            Some(entry) if entry.token == lease.token && entry.is_live(now) => {
                entry.expires_at = now + ttl;
                Ok(Lease::new(lease.key.clone(), lease.token.clone(), ttl))
            }
            _ => Err(LeaseError::LeaseLost {
                key: lease.key.clone(),
            }),
        }
    }

    async fn release(&self, lease: &Lease) -> LeaseResult<()> {
        self.injected_failure("release")?;

        let mut entries = self.entries.lock().await;
        match entries.get(&lease.key) {
            Some(entry) if entry.token == lease.token => {
                entries.remove(&lease.key);
                Ok(())
            }
            _ => Err(LeaseError::service(format!(
                "lease {} is not held by this token",
                lease.key
            ))),
        }
    }
}

/// [`LeaseClient`] backed by a [`MemoryLeaseService`]
#[derive(Debug, Clone)]
pub struct MemoryLeaseClient {
    service: MemoryLeaseService,
}

#[async_trait::async_trait]
impl LeaseClient for MemoryLeaseClient {
    async fn acquire(&self, key: &str, ttl: Duration) -> LeaseResult<Lease> {
        self.service.acquire(key, ttl).await
    }

    async fn extend(&self, lease: &Lease, ttl: Duration) -> LeaseResult<Lease> {
        self.service.extend(lease, ttl).await
    }

    async fn release(&self, lease: &Lease) -> LeaseResult<()> {
        self.service.release(lease).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(10);

    #[tokio::test]
    async fn test_second_acquire_is_contention() {
        let service = MemoryLeaseService::new();
        let first = service.client().acquire("leader", TTL).await.unwrap();
        assert_eq!(service.holder("leader").await, Some(first.token.clone()));

        let err = service.client().acquire("leader", TTL).await.unwrap_err();
        assert_eq!(err, LeaseError::Contention { key: "leader".into() });

        // Other keys are independent
        assert!(service.client().acquire("other", TTL).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_lease_can_be_taken_over() {
        let service = MemoryLeaseService::new();
        let client = service.client();
        let old = client.acquire("leader", TTL).await.unwrap();

        tokio::time::advance(TTL + Duration::from_millis(1)).await;
        assert_eq!(service.holder("leader").await, None);

        let new = client.acquire("leader", TTL).await.unwrap();
        assert_ne!(old.token, new.token);

        let err = client.extend(&old, TTL).await.unwrap_err();
        assert_eq!(err, LeaseError::LeaseLost { key: "leader".into() });
    }

    #[tokio::test(start_paused = true)]
    async fn test_service_expiry_wins_over_holder_estimate() {
        let service = MemoryLeaseService::new();
        let client = service.client();
        let lease = client.acquire("leader", TTL).await.unwrap();

        // Tokio time moves, wall-clock time does not
        tokio::time::advance(TTL + Duration::from_millis(1)).await;
        assert_eq!(service.holder("leader").await, None);
        assert!(!lease.is_expired());

        assert_eq!(
            client.extend(&lease, TTL).await.unwrap_err(),
            LeaseError::LeaseLost { key: "leader".into() }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_extend_pushes_expiry() {
        let service = MemoryLeaseService::new();
        let client = service.client();
        let lease = client.acquire("leader", TTL).await.unwrap();

        tokio::time::advance(Duration::from_secs(8)).await;
        let lease = client.extend(&lease, TTL).await.unwrap();

        tokio::time::advance(Duration::from_secs(8)).await;
        assert_eq!(service.holder("leader").await, Some(lease.token));
    }

    #[tokio::test]
    async fn test_release_requires_matching_token() {
        let service = MemoryLeaseService::new();
        let client = service.client();
        let lease = client.acquire("leader", TTL).await.unwrap();

        let forged = Lease::new("leader", "someone-else", TTL);
        assert!(matches!(
            client.release(&forged).await,
            Err(LeaseError::Service { .. })
        ));

        client.release(&lease).await.unwrap();
        assert_eq!(service.holder("leader").await, None);
        assert!(client.release(&lease).await.is_err());
    }

    #[tokio::test]
    async fn test_revoke_loses_lease() {
        let service = MemoryLeaseService::new();
        let client = service.client();
        let lease = client.acquire("leader", TTL).await.unwrap();

        assert!(service.revoke("leader").await);
        assert!(!service.revoke("leader").await);
        assert!(matches!(
            client.extend(&lease, TTL).await,
            Err(LeaseError::LeaseLost { .. })
        ));
    }

    #[tokio::test]
    async fn test_failure_rate_one_always_fails() {
        let service = MemoryLeaseService::new().with_failure_rate(1.0);
        let err = service.client().acquire("leader", TTL).await.unwrap_err();
        assert!(matches!(err, LeaseError::Service { .. }));
        assert_eq!(service.holder("leader").await, None);
    }
}
