//! Shared player state
//!
//! Thread-safe state read by external callers and written only by the
//! playback engine. Created once per player and kept alive for the life of
//! the session.

use crate::options::PlaybackOptions;
use crate::track::Track;
use crate::transport::{ChannelRef, SinkHandle};
use tokio::sync::RwLock;

/// Session-wide player state.
///
/// Uses RwLock for concurrent read access with rare writes.
pub struct PlayerState {
    /// Track currently being streamed (held outside the queue)
    current_track: RwLock<Option<Track>>,

    /// Whether a decode/stream operation is in flight
    playing: RwLock<bool>,

    /// Active transport connection, if any
    connection: RwLock<Option<SinkHandle>>,

    /// Target output channel for the next connect
    channel: RwLock<Option<ChannelRef>>,

    /// Playback policy flags
    options: RwLock<PlaybackOptions>,

    /// Set by an explicit stop so the drain path can tell a deliberate stop
    /// from a natural queue drain
    stop_requested: RwLock<bool>,
}

impl PlayerState {
    /// Create state with the given initial options
    pub fn new(options: PlaybackOptions) -> Self {
        Self {
            current_track: RwLock::new(None),
            playing: RwLock::new(false),
            connection: RwLock::new(None),
            channel: RwLock::new(None),
            options: RwLock::new(options),
            stop_requested: RwLock::new(false),
        }
    }

    /// Get the currently streaming track, if any
    pub async fn current_track(&self) -> Option<Track> {
        self.current_track.read().await.clone()
    }

    /// Set or clear the currently streaming track
    pub async fn set_current_track(&self, track: Option<Track>) {
        *self.current_track.write().await = track;
    }

    /// Whether a track is currently streaming
    pub async fn is_playing(&self) -> bool {
        *self.playing.read().await
    }

    pub(crate) async fn set_playing(&self, playing: bool) {
        *self.playing.write().await = playing;
    }

    /// Whether the engine holds a transport connection
    pub async fn is_connected(&self) -> bool {
        self.connection.read().await.is_some()
    }

    /// Active transport connection handle, if any
    pub async fn connection(&self) -> Option<SinkHandle> {
        *self.connection.read().await
    }

    pub(crate) async fn set_connection(&self, handle: Option<SinkHandle>) {
        *self.connection.write().await = handle;
    }

    /// Target channel for the next transport connect
    pub async fn channel(&self) -> Option<ChannelRef> {
        self.channel.read().await.clone()
    }

    pub(crate) async fn set_channel(&self, channel: Option<ChannelRef>) {
        *self.channel.write().await = channel;
    }

    /// Current playback options
    pub async fn options(&self) -> PlaybackOptions {
        *self.options.read().await
    }

    /// Replace the playback options
    pub async fn set_options(&self, options: PlaybackOptions) {
        *self.options.write().await = options;
    }

    pub(crate) async fn stop_requested(&self) -> bool {
        *self.stop_requested.read().await
    }

    pub(crate) async fn set_stop_requested(&self, requested: bool) {
        *self.stop_requested.write().await = requested;
    }
}

impl Default for PlayerState {
    fn default() -> Self {
        Self::new(PlaybackOptions::default())
    }
}
