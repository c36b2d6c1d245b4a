//! WolfLease - Lease-Based Leader Election
//!
//! Elects exactly one leader among a fleet of cooperating processes by
//! holding a time-bounded lease from an external quorum lock service.
//!
//! # Architecture
//!
//! Each process runs a [`Coordinator`] per lease key. The coordinator is a
//! small state machine (follower / leader) driven by two mutually exclusive
//! timers: election retries while following, lease renewals while leading.
//! The lock service itself is reached only through the [`LeaseClient`] trait;
//! its ttl expiry is what guards against split-brain.
//!
//! # Features
//!
//! - Perpetual election retries with a fixed retry interval
//! - Lease renewal before expiry, with safe step-down on any renewal failure
//! - Explicit, idempotent resign that releases the lease
//! - Ordered `Elected` / `Resigned` / `Error` notifications
//! - In-memory lease service for local runs and tests

pub mod config;
pub mod error;
pub mod lease;
pub mod coordinator;

pub use config::{CoordinatorConfig, WolfLeaseConfig};
pub use coordinator::{Coordinator, CoordinatorEvent};
pub use error::{Error, Result};
pub use lease::{Lease, LeaseClient, LeaseError};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{CoordinatorConfig, WolfLeaseConfig};
    pub use crate::coordinator::{
        Coordinator, CoordinatorEvent, CoordinatorStatus, ElectionState, TimerKind,
    };
    pub use crate::error::{Error, Result};
    pub use crate::lease::{Lease, LeaseClient, LeaseError, LeaseResult, MemoryLeaseService};
}
