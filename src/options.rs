//! Playback policy options
//!
//! Controls what the engine does around the edges of playback: whether to
//! release the transport when the queue drains or on an explicit stop, and
//! whether downloaded files are removed once played.

use serde::{Deserialize, Serialize};

/// Playback policy flags, read by the orchestrator at transition points.
///
/// Deserializable so hosts can load them from their own configuration file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackOptions {
    /// Disconnect from the transport when the queue drains naturally
    pub leave_on_end: bool,

    /// Disconnect when no listeners remain in the channel.
    ///
    /// Recognized but currently unenforced: the transport contract exposes
    /// no channel-occupancy information.
    pub leave_on_empty: bool,

    /// Disconnect after an explicit stop command
    pub leave_on_stop: bool,

    /// Remove a track's local file once it has finished streaming
    pub delete_after_play: bool,
}

impl Default for PlaybackOptions {
    fn default() -> Self {
        Self {
            leave_on_end: false,
            leave_on_empty: true,
            leave_on_stop: true,
            delete_after_play: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = PlaybackOptions::default();
        assert!(!options.leave_on_end);
        assert!(options.leave_on_empty);
        assert!(options.leave_on_stop);
        assert!(options.delete_after_play);
    }

    #[test]
    fn test_deserialize_from_toml() {
        let options: PlaybackOptions = toml::from_str(
            r#"
            leave_on_end = true
            delete_after_play = false
            "#,
        )
        .unwrap();

        assert!(options.leave_on_end);
        assert!(!options.delete_after_play);
        // Unspecified fields fall back to defaults
        assert!(options.leave_on_empty);
        assert!(options.leave_on_stop);
    }

    #[test]
    fn test_serialize_round_trip() {
        let options = PlaybackOptions {
            leave_on_end: true,
            leave_on_empty: false,
            leave_on_stop: false,
            delete_after_play: true,
        };
        let json = serde_json::to_string(&options).unwrap();
        let back: PlaybackOptions = serde_json::from_str(&json).unwrap();
        assert_eq!(options, back);
    }
}
