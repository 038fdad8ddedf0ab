//! # voiceplay
//!
//! Track queue and playback orchestration engine for a single voice session.
//!
//! The engine accepts pre-resolved tracks, downloads them to local audio
//! files, and streams exactly one at a time through an external decode
//! process (ffmpeg producing stereo s16le 48 kHz PCM) into a transport byte
//! sink, advancing the queue automatically as tracks finish.
//!
//! Resolving queries ([`resolve::Resolver`]), fetching audio
//! ([`fetch::Downloader`]), and the voice connection itself
//! ([`transport::Transport`]) are collaborator contracts: the crate ships
//! stock YouTube implementations of the first two, while the transport is
//! always supplied by the host.
//!
//! ```no_run
//! use std::sync::Arc;
//! use voiceplay::{ChannelRef, Player, Track, YtDlpDownloader};
//!
//! # async fn example(transport: Arc<dyn voiceplay::Transport>) -> voiceplay::Result<()> {
//! let player = Player::builder()
//!     .downloader(Arc::new(YtDlpDownloader::new("./downloads")))
//!     .transport(transport)
//!     .build()?;
//!
//! let track = Track::new("Song", "https://www.youtube.com/watch?v=abc123", "Artist");
//! player.enqueue(ChannelRef::new("voice-1"), vec![track]).await?;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod events;
pub mod fetch;
pub mod options;
pub mod playback;
pub mod resolve;
pub mod state;
pub mod track;
pub mod transport;

pub use error::{Error, Result};
pub use events::{EventBus, PlayerEvent};
pub use fetch::{Downloader, YtDlpDownloader};
pub use options::PlaybackOptions;
pub use playback::{DecodeProcessManager, Player, PlayerBuilder, TrackQueue};
pub use resolve::{Resolver, YouTubeResolver};
pub use state::PlayerState;
pub use track::{ResolveSet, Track, TrackDetails};
pub use transport::{AudioSink, ChannelRef, SinkHandle, Transport};
