//! Domain events published by the registries.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::trace;

use crate::identifiers::EntityIdentifiers;

/// Broadcast channel capacity. Slow subscribers lag and lose the oldest
/// events.
const EVENT_BROADCAST_CAPACITY: usize = 256;

/// A change to a registry record, e.g. `gateway.update`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Event {
    pub name: String,
    pub identifiers: EntityIdentifiers,
    /// Field paths written by the operation. Empty for deletes.
    pub paths: Vec<String>,
    pub time: DateTime<Utc>,
}

impl Event {
    pub fn new(
        entity: &str,
        action: &str,
        identifiers: EntityIdentifiers,
        paths: Vec<String>,
    ) -> Self {
        Self {
            name: format!("{entity}.{action}"),
            identifiers,
            paths,
            time: Utc::now(),
        }
    }
}

/// Fan-out of registry events to any number of subscribers.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_BROADCAST_CAPACITY);
        Self { tx }
    }

    /// Publish an event. Events without subscribers are dropped.
    pub fn publish(&self, event: Event) {
        trace!(name = %event.name, identifiers = %event.identifiers, "Publishing event");
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let bus = EventBus::new();
        bus.publish(Event::new("gateway", "create", EntityIdentifiers::user("x1x"), vec![]));

        let mut rx = bus.subscribe();
        let event = Event::new(
            "gateway",
            "update",
            EntityIdentifiers::user("alice"),
            vec!["attributes".to_string()],
        );
        bus.publish(event.clone());
        assert_eq!(rx.recv().await.unwrap(), event);
        assert_eq!(event.name, "gateway.update");
    }
}
