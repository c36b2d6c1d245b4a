//! Leader Election Coordinator
//!
//! Elects one leader per lease key by holding a lease from an external lock
//! service. A coordinator is a cheap handle onto a private actor task that
//! owns the held lease and the single pending timer, so every transition
//! (election attempt, renewal, resign) is serialized.
//!
//! States:
//! - **Follower**: no lease held; an election attempt is scheduled every
//!   retry interval until one succeeds. Retries never stop.
//! - **Leader**: lease held; a renewal is scheduled every renew interval.
//!   A failed renewal drops back to Follower.
//!
//! `resign()` cancels the pending timer, releases any held lease and stops
//! the cycle until `start()` is called again.

mod actor;
mod events;


use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::Instrument;

use crate::config::CoordinatorConfig;
use crate::error::{Error, Result};
use crate::lease::{Lease, LeaseClient};

use actor::CoordinatorActor;
use events::EventBus;

pub use events::{CoordinatorEvent, EventReceiver};

/// Election state as seen by the actor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElectionState {
    /// Not started, or resigned
    Stopped,
    /// Competing for the lease
    Follower,
    /// Holding the lease
    Leader,
}

/// Which timer is pending
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    /// Next election attempt
    Election,
    /// Next lease renewal
    Renewal,
}

/// The one pending timer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduledTimer {
    pub kind: TimerKind,
    pub deadline: Instant,
}

/// Snapshot of coordinator internals
#[derive(Debug, Clone)]
pub struct CoordinatorStatus {
    pub state: ElectionState,
    pub lease: Option<Lease>,
    pub timer: Option<ScheduledTimer>,
    /// An acquire or extend call is outstanding
    pub attempt_in_flight: bool,
}

/// Requests from handles to the actor
enum Command {
    Start { reply: oneshot::Sender<()> },
    Elect { reply: oneshot::Sender<()> },
    Resign { reply: oneshot::Sender<()> },
    Status { reply: oneshot::Sender<CoordinatorStatus> },
}

/// Handle to a running election coordinator.
///
/// Clones share the same actor. Once every handle is dropped the actor
/// releases any held lease and exits.
#[derive(Clone)]
pub struct Coordinator {
    key: Arc<str>,
    commands: mpsc::Sender<Command>,
    leader: Arc<AtomicBool>,
    events: EventBus,
}

impl Coordinator {
    /// Validate `config` and spawn the coordinator on the current Tokio
    /// runtime. Nothing happens until [`Coordinator::start`] is called.
    pub fn new<C: LeaseClient>(client: C, config: CoordinatorConfig) -> Result<Self> {
        config.validate()?;
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| Error::NoRuntime(e.to_string()))?;

        let (tx, rx) = mpsc::channel(32);
        let leader = Arc::new(AtomicBool::new(false));
        let events = EventBus::default();
        let key: Arc<str> = Arc::from(config.key.as_str());

        let span = tracing::info_span!("coordinator", key = %config.key);
        let actor = CoordinatorActor::new(
            Arc::new(client),
            config,
            rx,
            Arc::clone(&leader),
            events.clone(),
        );
        runtime.spawn(actor.run().instrument(span));

        Ok(Self {
            key,
            commands: tx,
            leader,
            events,
        })
    }

    /// Lease key this coordinator competes for
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Begin electing: the first attempt runs immediately. No-op when
    /// already running; restarts the cycle after a resign.
    pub async fn start(&self) -> Result<()> {
        self.request(|reply| Command::Start { reply }).await
    }

    /// Attempt an election now instead of waiting for the retry timer.
    /// No-op unless running as follower with no attempt outstanding.
    pub async fn elect_now(&self) -> Result<()> {
        self.request(|reply| Command::Elect { reply }).await
    }

    /// Stop electing and give up any held lease. Resolves once cleanup is
    /// complete; calling it again is a no-op.
    pub async fn resign(&self) -> Result<()> {
        self.request(|reply| Command::Resign { reply }).await
    }

    /// Whether this process currently holds the lease
    pub fn is_leader(&self) -> bool {
        self.leader.load(Ordering::Acquire)
    }

    /// Subscribe to state-transition events published from now on
    pub fn subscribe(&self) -> EventReceiver {
        self.events.subscribe()
    }

    /// Snapshot of the actor state
    pub async fn status(&self) -> Result<CoordinatorStatus> {
        self.request(|reply| Command::Status { reply }).await
    }

    async fn request<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(command(tx))
            .await
            .map_err(|_| Error::ShuttingDown)?;
        rx.await.map_err(|_| Error::ShuttingDown)
    }
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("key", &self.key)
            .field("is_leader", &self.is_leader())
            .finish()
    }
}
