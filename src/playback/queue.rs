//! Ordered track queue
//!
//! FIFO by default, with index-based insertion for "play now" semantics.
//! The queue never holds the currently streaming track; the engine removes
//! the head at the moment playback starts and parks it in
//! [`crate::state::PlayerState`].
//!
//! No internal locking: the engine serializes all access behind a single
//! lock on its control path.

use crate::error::{Error, Result};
use crate::events::{EventBus, PlayerEvent};
use crate::track::Track;
use tracing::debug;
use uuid::Uuid;

/// Ordered, mutable sequence of pending tracks
pub struct TrackQueue {
    tracks: Vec<Track>,
    events: EventBus,
}

impl TrackQueue {
    /// Create an empty queue publishing mutations on `events`
    pub fn new(events: EventBus) -> Self {
        Self {
            tracks: Vec::new(),
            events,
        }
    }

    /// Append a track to the tail and fire a queue-changed notification
    pub fn append(&mut self, track: Track) {
        debug!(title = %track.title, "queue append");
        self.tracks.push(track);
        self.events.emit_lossy(PlayerEvent::QueueChanged {
            timestamp: chrono::Utc::now(),
        });
    }

    /// Insert a track before `index` (clamped to the queue length) and fire
    /// a queue-changed notification
    pub fn insert_at(&mut self, index: usize, track: Track) {
        let index = index.min(self.tracks.len());
        debug!(title = %track.title, index, "queue insert");
        self.tracks.insert(index, track);
        self.events.emit_lossy(PlayerEvent::QueueChanged {
            timestamp: chrono::Utc::now(),
        });
    }

    /// Remove and return the head of the queue
    pub fn dequeue(&mut self) -> Result<Track> {
        if self.tracks.is_empty() {
            return Err(Error::EmptyQueue);
        }
        Ok(self.tracks.remove(0))
    }

    /// Return the head of the queue without removing it
    pub fn peek(&self) -> Result<&Track> {
        self.tracks.first().ok_or(Error::EmptyQueue)
    }

    /// Remove all tracks, firing a single queue-cleared notification
    pub fn clear(&mut self) {
        self.tracks.clear();
        self.events.emit_lossy(PlayerEvent::QueueCleared {
            timestamp: chrono::Utc::now(),
        });
    }

    /// Number of pending tracks
    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    /// Whether the queue holds no tracks
    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    /// Whether a track with the given id is queued
    pub fn contains(&self, id: Uuid) -> bool {
        self.tracks.iter().any(|t| t.id == id)
    }

    /// Position of the track with the given id, if queued
    pub fn index_of(&self, id: Uuid) -> Option<usize> {
        self.tracks.iter().position(|t| t.id == id)
    }

    /// Track at `index`, if in range
    pub fn get(&self, index: usize) -> Option<&Track> {
        self.tracks.get(index)
    }

    /// Replace the track at `index`. Returns false if out of range; no
    /// notification fires for in-place replacement.
    pub fn set(&mut self, index: usize, track: Track) -> bool {
        match self.tracks.get_mut(index) {
            Some(slot) => {
                *slot = track;
                true
            }
            None => false,
        }
    }

    /// Remove and return the track at `index`, if in range
    pub fn remove_at(&mut self, index: usize) -> Option<Track> {
        if index < self.tracks.len() {
            Some(self.tracks.remove(index))
        } else {
            None
        }
    }

    /// Snapshot of all pending tracks in playback order
    pub fn tracks(&self) -> Vec<Track> {
        self.tracks.clone()
    }
}
