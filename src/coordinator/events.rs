//! Coordinator notifications

use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;

use crate::lease::LeaseError;

/// State-transition notification published by a coordinator
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum CoordinatorEvent {
    /// This process acquired the lease and is now leader
    Elected { key: String, at: DateTime<Utc> },
    /// This process stopped being leader (renewal failure or resign)
    Resigned { key: String, at: DateTime<Utc> },
    /// A lease operation failed
    Error {
        key: String,
        cause: LeaseError,
        at: DateTime<Utc>,
    },
}

impl CoordinatorEvent {
    /// Short name for logging
    pub fn name(&self) -> &'static str {
        match self {
            CoordinatorEvent::Elected { .. } => "elected",
            CoordinatorEvent::Resigned { .. } => "resigned",
            CoordinatorEvent::Error { .. } => "error",
        }
    }

    /// Lease key the event refers to
    pub fn key(&self) -> &str {
        match self {
            CoordinatorEvent::Elected { key, .. }
            | CoordinatorEvent::Resigned { key, .. }
            | CoordinatorEvent::Error { key, .. } => key,
        }
    }
}

/// Receiving end of a subscription
pub type EventReceiver = mpsc::UnboundedReceiver<CoordinatorEvent>;

/// Fan-out of events to every live subscriber, in publish order
#[derive(Debug, Clone, Default)]
pub(crate) struct EventBus {
    subscribers: Arc<Mutex<Vec<mpsc::UnboundedSender<CoordinatorEvent>>>>,
}

impl EventBus {
    pub(crate) fn subscribe(&self) -> EventReceiver {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        rx
    }

    pub(crate) fn publish(&self, event: CoordinatorEvent) {
        tracing::trace!("Publishing {} event", event.name());
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|tx| tx.send(event.clone()).is_ok());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resigned() -> CoordinatorEvent {
        CoordinatorEvent::Resigned {
            key: "leader".into(),
            at: Utc::now(),
        }
    }

    #[test]
    fn test_every_subscriber_gets_events_in_order() {
        let bus = EventBus::default();
        let mut first = bus.subscribe();
        let mut second = bus.subscribe();

        bus.publish(CoordinatorEvent::Elected {
            key: "leader".into(),
            at: Utc::now(),
        });
        bus.publish(resigned());

        for rx in [&mut first, &mut second] {
            assert_eq!(rx.try_recv().unwrap().name(), "elected");
            assert_eq!(rx.try_recv().unwrap().name(), "resigned");
            assert!(rx.try_recv().is_err());
        }
    }

    #[test]
    fn test_closed_subscribers_are_pruned() {
        let bus = EventBus::default();
        let dropped = bus.subscribe();
        let mut kept = bus.subscribe();
        drop(dropped);

        bus.publish(resigned());
        assert_eq!(bus.subscribers.lock().unwrap().len(), 1);
        assert_eq!(kept.try_recv().unwrap().key(), "leader");
    }

    #[test]
    fn test_event_json_shape() {
        let event = CoordinatorEvent::Error {
            key: "leader".into(),
            cause: LeaseError::service("timeout"),
            at: Utc::now(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "error");
        assert_eq!(json["cause"]["kind"], "service");
        assert_eq!(json["cause"]["message"], "timeout");
    }
}
