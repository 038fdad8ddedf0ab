//! Playback subsystem
//!
//! Queue, decode process management, and the orchestration engine.

pub mod decode;
pub mod engine;
pub mod queue;

pub use decode::{DecodeProcessManager, StreamOutcome, DEFAULT_TERMINATE_GRACE};
pub use engine::{Player, PlayerBuilder};
pub use queue::TrackQueue;
