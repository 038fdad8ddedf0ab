//! Track data model
//!
//! A [`Track`] is the metadata for one playable audio item plus the local
//! file path populated once its audio has been fetched. [`ResolveSet`] is
//! what a resolver returns for a search query or playlist URL.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// Metadata and local file reference for one playable audio item
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Track {
    /// Unique id assigned when the track is constructed
    pub id: Uuid,

    /// Track title
    pub title: String,

    /// Source URL the audio is fetched from
    pub url: String,

    /// Channel/artist name
    pub author: String,

    /// Thumbnail image URL
    pub thumbnail_url: String,

    /// When the source was published, if known
    pub upload_date: Option<DateTime<Utc>>,

    /// Provider-specific payload, opaque to the engine
    pub details: TrackDetails,

    /// Local audio file, populated by the downloader.
    /// A track is eligible for playback only once this is set and the file
    /// exists on disk.
    pub file_path: Option<PathBuf>,
}

impl Track {
    /// Create a track from its source metadata, with no local file yet
    pub fn new(title: impl Into<String>, url: impl Into<String>, author: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: title.into(),
            url: url.into(),
            author: author.into(),
            thumbnail_url: String::new(),
            upload_date: None,
            details: TrackDetails::default(),
            file_path: None,
        }
    }

    /// True once the track has a local file that exists on disk
    pub fn is_playable(&self) -> bool {
        self.file_path.as_deref().is_some_and(|p| p.is_file())
    }
}

/// Provider-specific content details and statistics.
///
/// Carried through for display purposes; the engine never interprets these.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrackDetails {
    /// Duration formatted as H:MM:SS
    pub duration: Option<String>,
    /// Whether captions are available
    pub caption: Option<String>,
    /// "hd" or "sd"
    pub definition: Option<String>,
    pub view_count: Option<u64>,
    pub like_count: Option<u64>,
    pub dislike_count: Option<u64>,
    pub comment_count: Option<u64>,
    pub favorite_count: Option<u64>,
    pub licensed_content: Option<bool>,
    pub projection: Option<String>,
}

/// Result of resolving a query or playlist URL into tracks
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResolveSet {
    /// Whether this result came from a playlist URL
    pub is_playlist: bool,
    /// Title of the containing playlist, if any
    pub playlist_title: String,
    /// URL of the containing playlist, if any
    pub playlist_url: String,
    /// Thumbnail of the containing playlist, if any
    pub playlist_thumbnail_url: String,
    /// Resolved tracks; may be empty when nothing matched
    pub tracks: Vec<Track>,
}

impl ResolveSet {
    /// Whether the resolution produced any tracks
    pub fn has_tracks(&self) -> bool {
        !self.tracks.is_empty()
    }
}

/// Convert an ISO-8601 duration (e.g. "PT1H2M3S") to "H:MM:SS".
///
/// Returns None for strings that are not ISO-8601 durations.
pub fn format_iso8601_duration(iso: &str) -> Option<String> {
    let rest = iso.strip_prefix("PT").or_else(|| iso.strip_prefix("P"))?;

    let mut hours: u64 = 0;
    let mut minutes: u64 = 0;
    let mut seconds: u64 = 0;
    let mut digits = String::new();

    for c in rest.chars() {
        if c.is_ascii_digit() {
            digits.push(c);
            continue;
        }
        let value: u64 = digits.parse().ok()?;
        digits.clear();
        match c {
            'H' => hours = value,
            'M' => minutes = value,
            'S' => seconds = value,
            _ => return None,
        }
    }
    if !digits.is_empty() {
        return None;
    }

    Some(format_hms(hours * 3600 + minutes * 60 + seconds))
}

/// Convert a duration in milliseconds to "H:MM:SS"
pub fn format_duration_ms(ms: u64) -> String {
    format_hms(ms / 1000)
}

fn format_hms(total_seconds: u64) -> String {
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;
    format!("{}:{:02}:{:02}", hours, minutes, seconds)
}
