//! Lossy broadcast bus for core lifecycle events.
//!
//! Consumers subscribe for observability only; nothing in the pipeline
//! depends on an event being received, and slow subscribers lag rather
//! than block the pipeline.

use tokio::sync::broadcast;

use crate::ProviderId;

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Lifecycle notifications emitted by the fetch pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoreEvent {
    CircuitOpened { provider: ProviderId },
    CircuitHalfOpen { provider: ProviderId },
    CircuitClosed { provider: ProviderId },
    /// Served an expired cache entry because live fetches were unavailable.
    StaleServed { provider: ProviderId, key: String },
}

/// Shared event publisher. Cloneable; all clones feed the same channel.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    /// Fire-and-forget publish; a send with no subscribers is not an error.
    pub fn publish(&self, event: CoreEvent) {
        let _ = self.sender.send(event);
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
    async fn subscribers_receive_published_events() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        bus.publish(CoreEvent::CircuitOpened {
            provider: ProviderId::Velo,
        });

        assert_eq!(
            rx.recv().await.expect("event delivered"),
            CoreEvent::CircuitOpened {
                provider: ProviderId::Velo
            }
        );
    }

    #[test]
    fn publishing_without_subscribers_is_harmless() {
        let bus = EventBus::new();
        bus.publish(CoreEvent::CircuitClosed {
            provider: ProviderId::Coingecko,
        });
    }
}
