//! Event system for the voiceplay engine
//!
//! One-to-many broadcasting over `tokio::sync::broadcast`. The engine's
//! control loop and any number of external observers (bot glue, logging
//! sinks) subscribe to the same bus; a slow or failing subscriber only
//! affects its own receiver, never the state machine.

use crate::track::Track;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Events published by the engine
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PlayerEvent {
    /// A track was appended to or inserted into the queue
    QueueChanged { timestamp: DateTime<Utc> },

    /// The queue was cleared in one operation
    QueueCleared { timestamp: DateTime<Utc> },

    /// A track began streaming to the transport
    PlaybackStarted {
        track: Track,
        timestamp: DateTime<Utc>,
    },

    /// A track stopped streaming.
    ///
    /// `completed` is false when the copy ended in an I/O fault rather than
    /// end-of-stream. A skipped track still reports `completed = true`:
    /// killing the decode process closes its output pipe cleanly.
    PlaybackFinished {
        track: Track,
        completed: bool,
        timestamp: DateTime<Utc>,
    },

    /// Playback of a track could not be started; the track was discarded
    PlaybackFailed {
        track: Track,
        message: String,
        timestamp: DateTime<Utc>,
    },

    /// The engine released its transport connection
    TransportDisconnected { timestamp: DateTime<Utc> },
}

impl PlayerEvent {
    /// Timestamp carried by any event variant
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            PlayerEvent::QueueChanged { timestamp }
            | PlayerEvent::QueueCleared { timestamp }
            | PlayerEvent::PlaybackStarted { timestamp, .. }
            | PlayerEvent::PlaybackFinished { timestamp, .. }
            | PlayerEvent::PlaybackFailed { timestamp, .. }
            | PlayerEvent::TransportDisconnected { timestamp } => *timestamp,
        }
    }
}

/// Broadcast bus for [`PlayerEvent`]
///
/// Cloneable handle; all clones share the same channel.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<PlayerEvent>,
    capacity: usize,
}

impl EventBus {
    /// Create a bus buffering up to `capacity` events per subscriber
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<PlayerEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers.
    ///
    /// Returns the subscriber count, or an error when nobody is listening.
    pub fn emit(
        &self,
        event: PlayerEvent,
    ) -> Result<usize, broadcast::error::SendError<PlayerEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring whether anyone is listening
    pub fn emit_lossy(&self, event: PlayerEvent) {
        let _ = self.tx.send(event);
    }

    /// Number of live subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
