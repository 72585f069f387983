use super::connection::{ConnectionId, ConnectionState};
use crate::task::TaskState;
use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Notification published by a local manager
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ManagerEvent {
    ComponentAdded {
        process: String,
        component: String,
    },
    ComponentRemoved {
        process: String,
        component: String,
    },
    ComponentStateChanged {
        process: String,
        component: String,
        state: TaskState,
    },
    ConnectionStateChanged {
        id: ConnectionId,
        state: ConnectionState,
        /// Why a connection failed
        reason: Option<String>,
    },
    /// A remote process left the global registry
    ProcessRemoved { process: String },
}

/// Fan-out of [`ManagerEvent`]s to any number of subscribers
///
/// Subscribers get an unbounded receiver; dropping it unsubscribes.
#[derive(Clone, Default)]
pub struct EventBus {
    subscribers: Arc<Mutex<Vec<Sender<ManagerEvent>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Receiver<ManagerEvent> {
        let (tx, rx) = channel::unbounded();
        self.subscribers.lock().push(tx);
        rx
    }

    pub fn publish(&self, event: ManagerEvent) {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_reaches_every_subscriber() {
        let bus = EventBus::new();
        let a = bus.subscribe();
        let b = bus.subscribe();
        bus.publish(ManagerEvent::ProcessRemoved {
            process: "vision".into(),
        });
        assert_eq!(
            a.try_recv().unwrap(),
            ManagerEvent::ProcessRemoved {
                process: "vision".into()
            }
        );
        assert!(b.try_recv().is_ok());
    }

    #[test]
    fn test_dropped_subscriber_is_pruned() {
        let bus = EventBus::new();
        let rx = bus.subscribe();
        drop(rx);
        bus.publish(ManagerEvent::ComponentAdded {
            process: "p".into(),
            component: "c".into(),
        });
        assert_eq!(bus.subscriber_count(), 0);
    }
}
