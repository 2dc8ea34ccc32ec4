use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Local};
use tokio::sync::broadcast;

use crate::model::{ServiceId, ServiceStatus};

const EVENT_CAPACITY: usize = 256;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BridgeEvent {
    /// A lifecycle command is about to run
    ActionStarted {
        action: String,
        service: Option<ServiceId>,
    },
    /// The command returned and the follow-up poll completed
    ActionFinished {
        action: String,
        service: Option<ServiceId>,
        success: bool,
        message: Option<String>,
    },
    StatusChanged {
        id: ServiceId,
        status: ServiceStatus,
    },
    RuntimeAvailability {
        online: bool,
    },
}

#[derive(Clone, Debug)]
pub struct EventEnvelope {
    pub id: u64,
    pub at: DateTime<Local>,
    pub event: BridgeEvent,
}

/// Numbered broadcast of [`BridgeEvent`]s. Slow receivers lag and lose the
/// oldest events; status itself is always available from the watch channel.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EventEnvelope>,
    next_id: Arc<AtomicU64>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            tx,
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: BridgeEvent) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        // No receivers is fine
        let _ = self.tx.send(EventEnvelope {
            id,
            at: Local::now(),
            event,
        });
        id
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_ids_are_monotonic() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        bus.emit(BridgeEvent::RuntimeAvailability { online: true });
        bus.emit(BridgeEvent::StatusChanged {
            id: "apache".into(),
            status: ServiceStatus::Running,
        });

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert!(second.id > first.id);
        assert_eq!(
            second.event,
            BridgeEvent::StatusChanged {
                id: "apache".into(),
                status: ServiceStatus::Running
            }
        );
    }

    #[test]
    fn test_emit_without_receivers() {
        let bus = EventBus::new();
        assert_eq!(bus.emit(BridgeEvent::RuntimeAvailability { online: false }), 1);
        assert_eq!(bus.emit(BridgeEvent::RuntimeAvailability { online: false }), 2);
    }
}
