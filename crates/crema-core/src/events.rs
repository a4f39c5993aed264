//! Scale lifecycle notifications.
//!
//! This module provides a broadcast channel of [`ScaleEvent`]s describing
//! binding, connection and reconnection changes of the processor's scale.
//! Weight data does not flow through here; see
//! [`event_weight_and_flow_update`].
//!
//! [`event_weight_and_flow_update`]: crate::ScaleProcessor::event_weight_and_flow_update

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crema_types::ScaleType;

use crate::traits::Scale;

/// Scale identifier for events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScaleId {
    /// Hardware address.
    pub address: String,
    /// Advertised name if known.
    pub name: Option<String>,
    /// Scale model.
    pub scale_type: ScaleType,
}

impl ScaleId {
    /// Snapshot the identity of a scale.
    pub fn of(scale: &dyn Scale) -> Self {
        Self {
            address: scale.address().to_string(),
            name: scale.name().map(str::to_string),
            scale_type: scale.scale_type(),
        }
    }
}

/// Events emitted by the processor about its scale.
///
/// All events are serializable for logging and IPC.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new event types
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
#[non_exhaustive]
pub enum ScaleEvent {
    /// A scale became the current scale.
    Bound { scale: ScaleId },
    /// The current scale was released without replacement.
    Unbound { previous: ScaleId },
    /// The current scale connected.
    Connected { scale: ScaleId },
    /// A replaced scale was disconnected and decommissioned.
    Retired { scale: ScaleId },
    /// The current scale reported a tare; history was cleared.
    TareSeen { scale: ScaleId },
    /// Reconnection attempt started.
    ReconnectStarted { scale: ScaleId, attempt: u32 },
    /// Reconnection succeeded.
    ReconnectSucceeded { scale: ScaleId, attempts: u32 },
    /// Reconnection gave up after the configured number of attempts.
    ReconnectFailed { scale: ScaleId, attempts: u32 },
}

/// Sender for scale events.
pub type EventSender = broadcast::Sender<ScaleEvent>;

/// Receiver for scale events.
pub type EventReceiver = broadcast::Receiver<ScaleEvent>;

/// Event dispatcher for sending events to multiple receivers.
#[derive(Debug, Clone)]
pub struct EventDispatcher {
    sender: EventSender,
}

impl EventDispatcher {
    /// Create a new event dispatcher.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Subscribe to events.
    pub fn subscribe(&self) -> EventReceiver {
        self.sender.subscribe()
    }

    /// Send an event.
    pub fn send(&self, event: ScaleEvent) {
        // Ignore error if no receivers
        let _ = self.sender.send(event);
    }

    /// Get the number of active receivers.
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new(100)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id() -> ScaleId {
        ScaleId {
            address: "AA:BB".into(),
            name: Some("Skale".into()),
            scale_type: ScaleType::AtomaxSkaleII,
        }
    }

    #[tokio::test]
    async fn test_dispatch_to_receiver() {
        let dispatcher = EventDispatcher::default();
        let mut rx = dispatcher.subscribe();
        dispatcher.send(ScaleEvent::Bound { scale: id() });

        match rx.recv().await.unwrap() {
            ScaleEvent::Bound { scale } => assert_eq!(scale.address, "AA:BB"),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_send_without_receivers_is_silent() {
        let dispatcher = EventDispatcher::new(0);
        dispatcher.send(ScaleEvent::Unbound { previous: id() });
        assert_eq!(dispatcher.receiver_count(), 0);
    }

    #[test]
    fn test_event_serialization_is_tagged() {
        let event = ScaleEvent::ReconnectStarted {
            scale: id(),
            attempt: 2,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "reconnect_started");
        assert_eq!(json["attempt"], 2);
        assert_eq!(json["scale"]["scale_type"], "AtomaxSkaleII");
    }
}
