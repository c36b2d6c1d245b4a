//! Coordinator actor: owns the lease and the pending timer.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::{self, BoxFuture, FutureExt};
use tokio::sync::mpsc;
use tokio::time::Instant;

use super::{
    Command, CoordinatorEvent, CoordinatorStatus, ElectionState, EventBus, ScheduledTimer,
    TimerKind,
};
use crate::config::CoordinatorConfig;
use crate::lease::{Lease, LeaseClient, LeaseError, LeaseResult};

/// Outstanding acquire or extend call
type InFlight = BoxFuture<'static, Attempt>;

/// Result of a lease call, tagged with what it was for
enum Attempt {
    Election(LeaseResult<Lease>),
    Renewal {
        previous: Lease,
        result: LeaseResult<Lease>,
    },
}

pub(super) struct CoordinatorActor {
    client: Arc<dyn LeaseClient>,
    config: CoordinatorConfig,
    commands: mpsc::Receiver<Command>,
    leader: Arc<AtomicBool>,
    events: EventBus,
    /// Between `start` and `resign`
    running: bool,
    lease: Option<Lease>,
    /// Election and renewal timers share one slot, so at most one is pending
    timer: Option<ScheduledTimer>,
    /// Never set while `timer` is set
    in_flight: Option<InFlight>,
}

impl CoordinatorActor {
    pub(super) fn new(
        client: Arc<dyn LeaseClient>,
        config: CoordinatorConfig,
        commands: mpsc::Receiver<Command>,
        leader: Arc<AtomicBool>,
        events: EventBus,
    ) -> Self {
        Self {
            client,
            config,
            commands,
            leader,
            events,
            running: false,
            lease: None,
            timer: None,
            in_flight: None,
        }
    }

    /// Actor loop. Exits once every handle is dropped.
    pub(super) async fn run(mut self) {
        tracing::debug!("Coordinator task started");

        loop {
            let timer = self.timer;
            tokio::select! {
                biased;

                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
                attempt = next_attempt(&mut self.in_flight) => {
                    self.in_flight = None;
                    self.complete(attempt).await;
                }
                kind = timer_expiry(timer) => {
                    self.timer = None;
                    self.fire(kind);
                }
            }
        }

        if self.running {
            tracing::info!("All coordinator handles dropped, resigning");
            self.resign().await;
        }
        tracing::debug!("Coordinator task exited");
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Start { reply } => {
                if self.running {
                    tracing::debug!("Coordinator already running");
                } else {
                    tracing::info!("Starting election for {}", self.config.key);
                    self.running = true;
                    self.begin_election();
                }
                let _ = reply.send(());
            }
            Command::Elect { reply } => {
                if self.running && self.lease.is_none() && self.in_flight.is_none() {
                    self.timer = None;
                    self.begin_election();
                } else {
                    tracing::debug!("Skipping on-demand election: not an idle follower");
                }
                let _ = reply.send(());
            }
            Command::Resign { reply } => {
                self.resign().await;
                let _ = reply.send(());
            }
            Command::Status { reply } => {
                let _ = reply.send(self.status());
            }
        }
    }

    fn status(&self) -> CoordinatorStatus {
        let state = match (self.running, &self.lease) {
            (false, _) => ElectionState::Stopped,
            (true, Some(_)) => ElectionState::Leader,
            (true, None) => ElectionState::Follower,
        };

        CoordinatorStatus {
            state,
            lease: self.lease.clone(),
            timer: self.timer,
            attempt_in_flight: self.in_flight.is_some(),
        }
    }

    fn fire(&mut self, kind: TimerKind) {
        match kind {
            TimerKind::Election => self.begin_election(),
            TimerKind::Renewal => self.begin_renewal(),
        }
    }

    fn begin_election(&mut self) {
        tracing::debug!("Attempting to acquire lease");

        let client = Arc::clone(&self.client);
        let key = self.config.key.clone();
        let ttl = self.config.ttl();
        self.timer = None;
        self.in_flight = Some(
            async move { Attempt::Election(client.acquire(&key, ttl).await) }.boxed(),
        );
    }

    fn begin_renewal(&mut self) {
        let Some(lease) = self.lease.clone() else {
            tracing::debug!("Renewal fired without a lease, going back to election");
            self.schedule(TimerKind::Election, self.config.retry_interval());
            return;
        };

        self.timer = None;

        // Extending an already lapsed lease cannot make us leader again
        if lease.is_expired() {
            let result = Err(LeaseError::LeaseLost {
                key: lease.key.clone(),
            });
            self.in_flight = Some(
                future::ready(Attempt::Renewal {
                    previous: lease,
                    result,
                })
                .boxed(),
            );
            return;
        }

        tracing::debug!(
            "Extending lease, {} ms remaining",
            lease.remaining().as_millis()
        );
        let client = Arc::clone(&self.client);
        let ttl = self.config.ttl();
        let remaining = lease.remaining();
        self.in_flight = Some(
            async move {
                // An extend still outstanding when the lease lapses counts as lost
                let result = match tokio::time::timeout(remaining, client.extend(&lease, ttl)).await
                {
                    Ok(result) => result,
                    Err(_) => {
                        tracing::warn!("Lease expired before extend completed");
                        Err(LeaseError::LeaseLost {
                            key: lease.key.clone(),
                        })
                    }
                };
                Attempt::Renewal {
                    previous: lease,
                    result,
                }
            }
            .boxed(),
        );
    }

    async fn complete(&mut self, attempt: Attempt) {
        match attempt {
            Attempt::Election(Ok(lease)) => {
                tracing::info!(
                    "Acquired lease, becoming LEADER (token: {}, expires: {})",
                    lease.token,
                    lease.expires_at
                );
                self.lease = Some(lease);
                self.set_leader(true);
                self.schedule(TimerKind::Renewal, self.config.renew_interval());
                self.publish(|key, at| CoordinatorEvent::Elected { key, at });
            }
            Attempt::Election(Err(cause)) if cause.is_contention() => {
                tracing::debug!("Lease is held elsewhere, staying follower");
                self.schedule(TimerKind::Election, self.config.retry_interval());
            }
            Attempt::Election(Err(cause)) => {
                tracing::error!("Election attempt failed: {}", cause);
                self.publish_error(cause);
                self.schedule(TimerKind::Election, self.config.retry_interval());
            }
            Attempt::Renewal {
                result: Ok(lease), ..
            } => {
                tracing::debug!("Lease extended until {}", lease.expires_at);
                self.lease = Some(lease);
                self.schedule(TimerKind::Renewal, self.config.renew_interval());
            }
            Attempt::Renewal {
                previous,
                result: Err(cause),
            } => {
                tracing::warn!("Lease renewal failed, stepping down: {}", cause);
                self.publish_error(cause);

                self.lease = None;
                self.set_leader(false);
                if let Err(e) = self.client.release(&previous).await {
                    tracing::warn!("Release after failed renewal failed: {}", e);
                }

                self.schedule(TimerKind::Election, self.config.retry_interval());
                self.publish(|key, at| CoordinatorEvent::Resigned { key, at });
            }
        }
    }

    async fn resign(&mut self) {
        if !self.running {
            tracing::debug!("Resign requested while not running, nothing to do");
            return;
        }

        tracing::info!("Resigning leadership");
        self.running = false;
        self.timer = None;
        self.set_leader(false);

        let mut held = self.lease.take();

        // An attempt already on the wire is settled here, never adopted
        if let Some(attempt) = self.in_flight.take() {
            match attempt.await {
                Attempt::Election(Ok(lease)) => {
                    tracing::info!("Lease acquired during resign, releasing it");
                    held = Some(lease);
                }
                Attempt::Election(Err(cause)) => {
                    tracing::debug!("Election attempt ended during resign: {}", cause);
                }
                Attempt::Renewal {
                    result: Ok(lease), ..
                } => {
                    held = Some(lease);
                }
                Attempt::Renewal {
                    result: Err(cause), ..
                } => {
                    tracing::warn!("Lease renewal failed during resign: {}", cause);
                }
            }
        }

        if let Some(lease) = held {
            if let Err(e) = self.client.release(&lease).await {
                tracing::error!("Release during resign failed: {}", e);
                self.publish_error(e);
            }
        }

        tracing::info!("Resign complete");
        self.publish(|key, at| CoordinatorEvent::Resigned { key, at });
    }

    fn schedule(&mut self, kind: TimerKind, after: Duration) {
        tracing::trace!("Scheduling {:?} in {:?}", kind, after);
        self.timer = Some(ScheduledTimer {
            kind,
            deadline: Instant::now() + after,
        });
    }

    fn set_leader(&self, leader: bool) {
        self.leader.store(leader, Ordering::Release);
    }

    fn publish(&self, event: impl FnOnce(String, chrono::DateTime<Utc>) -> CoordinatorEvent) {
        self.events.publish(event(self.config.key.clone(), Utc::now()));
    }

    fn publish_error(&self, cause: LeaseError) {
        self.publish(|key, at| CoordinatorEvent::Error { key, cause, at });
    }
}

async fn next_attempt(in_flight: &mut Option<InFlight>) -> Attempt {
    match in_flight {
        Some(attempt) => attempt.await,
        None => future::pending().await,
    }
}

async fn timer_expiry(timer: Option<ScheduledTimer>) -> TimerKind {
    match timer {
        Some(timer) => {
            tokio::time::sleep_until(timer.deadline).await;
            timer.kind
        }
        None => future::pending().await,
    }
}
