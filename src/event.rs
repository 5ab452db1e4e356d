// MIT License - Copyright (c) 2026 Peter Wright
// Engine events

use crate::state::EngineStatus;

/// All events that can be emitted by the engine.
///
/// Users subscribe via `engine.subscribe()` to receive a
/// `tokio::sync::broadcast::Receiver<EngineEvent>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// A full telemetry refresh arrived from the boiler
    NewData,
    /// The boiler acknowledged a command
    Acknowledged,
    /// Engine status changed
    StatusChanged {
        old: EngineStatus,
        new: EngineStatus,
    },
}

/// Type alias for the broadcast sender.
pub type EventSender = tokio::sync::broadcast::Sender<EngineEvent>;

/// Type alias for the broadcast receiver.
pub type EventReceiver = tokio::sync::broadcast::Receiver<EngineEvent>;

/// Create a new event channel with the given capacity.
pub fn event_channel(capacity: usize) -> (EventSender, EventReceiver) {
    tokio::sync::broadcast::channel(capacity)
}
