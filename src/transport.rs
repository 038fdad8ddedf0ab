//! Transport collaborator contract
//!
//! The voice/audio output connection is external to the engine. The engine
//! only needs three things from it: connect to a channel, obtain a byte sink
//! for the connection, and disconnect. The raw audio written to the sink is
//! always interleaved stereo, signed 16-bit little-endian, 48 kHz.

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWrite;

/// Opaque reference to a target output channel.
///
/// The engine passes this through to [`Transport::connect`] without
/// interpreting it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelRef(pub String);

impl ChannelRef {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

/// Opaque handle to an established transport connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SinkHandle(pub u64);

/// Byte sink accepting raw PCM frames
pub type AudioSink = Box<dyn AsyncWrite + Send + Unpin>;

/// Voice-transport connection and frame sink
#[async_trait]
pub trait Transport: Send + Sync {
    /// Establish a connection to the given channel.
    ///
    /// Fails with [`crate::Error::Connection`] when the channel does not
    /// exist or a conflicting connection is already being established.
    async fn connect(&self, channel: &ChannelRef) -> Result<SinkHandle>;

    /// Obtain a byte sink for an established connection
    async fn sink(&self, handle: &SinkHandle) -> Result<AudioSink>;

    /// Tear down an established connection
    async fn disconnect(&self, handle: SinkHandle) -> Result<()>;
}
