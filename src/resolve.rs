//! Query resolution
//!
//! The engine consumes the [`Resolver`] contract: turn a free-text query or
//! playlist URL into track metadata. [`YouTubeResolver`] is the stock
//! implementation over the YouTube Data API v3. Zero matches is a valid
//! outcome, not an error; callers check [`ResolveSet::has_tracks`].

use crate::error::{Error, Result};
use crate::track::{format_iso8601_duration, ResolveSet, Track, TrackDetails};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{info, warn};
use uuid::Uuid;

const PLAYLIST_URL_PREFIX: &str = "https://www.youtube.com/playlist?list=";
const DEFAULT_API_BASE: &str = "https://www.googleapis.com/youtube/v3";

/// Resolves a query or playlist URL into track metadata
#[async_trait]
pub trait Resolver: Send + Sync {
    /// Resolve `query` into zero or more tracks
    async fn resolve(&self, query: &str) -> Result<ResolveSet>;
}

/// Resolver backed by the YouTube Data API v3
pub struct YouTubeResolver {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl YouTubeResolver {
    /// Create a resolver with the given API key
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key: api_key.into(),
            base_url: DEFAULT_API_BASE.to_string(),
        }
    }

    /// Override the API base URL (for proxies and tests)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn get<T: serde::de::DeserializeOwned>(
        &self,
        resource: &str,
        query: &[(&str, &str)],
    ) -> Result<T> {
        let url = format!("{}/{}", self.base_url, resource);
        let response = self
            .http
            .get(&url)
            .query(query)
            .query(&[("key", self.api_key.as_str())])
            .send()
            .await
            .map_err(|e| Error::Resolve(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Error::Resolve(format!(
                "{} returned {}",
                resource,
                response.status()
            )));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| Error::Resolve(e.to_string()))
    }

    async fn fetch_video(&self, video_id: &str) -> Result<Option<VideoResource>> {
        let response: ListResponse<VideoResource> = self
            .get(
                "videos",
                &[
                    ("part", "snippet,contentDetails,statistics"),
                    ("id", video_id),
                    ("maxResults", "1"),
                ],
            )
            .await?;
        Ok(response.items.into_iter().next())
    }

    async fn resolve_playlist(&self, query: &str) -> Result<ResolveSet> {
        let playlist_id = query.trim_start_matches(PLAYLIST_URL_PREFIX);

        let playlists: ListResponse<PlaylistResource> = self
            .get(
                "playlists",
                &[("part", "snippet"), ("id", playlist_id), ("maxResults", "1")],
            )
            .await?;

        let Some(playlist) = playlists.items.into_iter().next() else {
            warn!("no results found for query: {}", query);
            return Ok(ResolveSet::default());
        };
        info!("found playlist: {}", playlist.snippet.title);

        let items: ListResponse<PlaylistItemResource> = self
            .get(
                "playlistItems",
                &[
                    ("part", "snippet"),
                    ("playlistId", playlist_id),
                    ("maxResults", "50"),
                ],
            )
            .await?;

        let mut tracks = Vec::new();
        for item in items.items {
            let Some(video_id) = item.snippet.resource_id.video_id else {
                continue;
            };
            match self.fetch_video(&video_id).await? {
                Some(video) => {
                    if let Some(track) = track_from_video(video) {
                        info!("found video: {}", track.title);
                        tracks.push(track);
                    }
                }
                None => info!("couldn't find video {}", video_id),
            }
        }

        Ok(ResolveSet {
            is_playlist: true,
            playlist_title: playlist.snippet.title,
            playlist_url: query.to_string(),
            playlist_thumbnail_url: playlist.snippet.thumbnails.default_url(),
            tracks,
        })
    }

    async fn resolve_search(&self, query: &str) -> Result<ResolveSet> {
        let results: ListResponse<SearchResource> = self
            .get(
                "search",
                &[
                    ("part", "snippet"),
                    ("order", "relevance"),
                    ("q", query),
                    ("maxResults", "1"),
                ],
            )
            .await?;

        let mut set = ResolveSet::default();

        let Some(result) = results.items.into_iter().next() else {
            warn!("no results found for query: {}", query);
            return Ok(set);
        };

        if result.id.kind == "youtube#video" {
            if let Some(video_id) = result.id.video_id {
                if let Some(video) = self.fetch_video(&video_id).await? {
                    if let Some(track) = track_from_video(video) {
                        info!("found video: {}", track.title);
                        set.tracks.push(track);
                    }
                }
            }
        }

        Ok(set)
    }
}

#[async_trait]
impl Resolver for YouTubeResolver {
    async fn resolve(&self, query: &str) -> Result<ResolveSet> {
        info!("resolving: {}", query);
        if query.starts_with(PLAYLIST_URL_PREFIX) {
            self.resolve_playlist(query).await
        } else {
            self.resolve_search(query).await
        }
    }
}

// ========================================
// Wire models (YouTube Data API v3)
// ========================================

#[derive(Debug, Deserialize)]
struct ListResponse<T> {
    // Path-form default: keeps serde from requiring T: Default
    #[serde(default = "Vec::new")]
    items: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct SearchResource {
    id: SearchResultId,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchResultId {
    kind: String,
    video_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PlaylistResource {
    snippet: PlaylistSnippet,
}

#[derive(Debug, Deserialize)]
struct PlaylistSnippet {
    title: String,
    #[serde(default)]
    thumbnails: Thumbnails,
}

#[derive(Debug, Deserialize)]
struct PlaylistItemResource {
    snippet: PlaylistItemSnippet,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlaylistItemSnippet {
    resource_id: PlaylistItemResourceId,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlaylistItemResourceId {
    video_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VideoResource {
    id: String,
    snippet: VideoSnippet,
    content_details: Option<ContentDetails>,
    statistics: Option<Statistics>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VideoSnippet {
    title: String,
    channel_title: String,
    published_at: Option<DateTime<Utc>>,
    #[serde(default)]
    thumbnails: Thumbnails,
}

#[derive(Debug, Default, Deserialize)]
struct Thumbnails {
    #[serde(rename = "default")]
    default_thumb: Option<Thumbnail>,
}

impl Thumbnails {
    fn default_url(&self) -> String {
        self.default_thumb
            .as_ref()
            .map(|t| t.url.clone())
            .unwrap_or_default()
    }
}

#[derive(Debug, Deserialize)]
struct Thumbnail {
    url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ContentDetails {
    duration: Option<String>,
    caption: Option<String>,
    definition: Option<String>,
    licensed_content: Option<bool>,
    projection: Option<String>,
}

/// Statistics counters arrive as JSON strings
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Statistics {
    view_count: Option<String>,
    like_count: Option<String>,
    dislike_count: Option<String>,
    comment_count: Option<String>,
    favorite_count: Option<String>,
}

fn parse_count(value: &Option<String>) -> Option<u64> {
    value.as_deref().and_then(|s| s.parse().ok())
}

/// Build a track from a video resource, dropping results with incomplete
/// core metadata.
fn track_from_video(video: VideoResource) -> Option<Track> {
    let snippet = video.snippet;
    let thumbnail_url = snippet.thumbnails.default_url();

    if snippet.title.is_empty() || snippet.channel_title.is_empty() || thumbnail_url.is_empty() {
        return None;
    }
    let upload_date = snippet.published_at?;

    let details = TrackDetails {
        duration: video
            .content_details
            .as_ref()
            .and_then(|c| c.duration.as_deref())
            .and_then(format_iso8601_duration),
        caption: video.content_details.as_ref().and_then(|c| c.caption.clone()),
        definition: video
            .content_details
            .as_ref()
            .and_then(|c| c.definition.clone()),
        licensed_content: video.content_details.as_ref().and_then(|c| c.licensed_content),
        projection: video.content_details.as_ref().and_then(|c| c.projection.clone()),
        view_count: video.statistics.as_ref().and_then(|s| parse_count(&s.view_count)),
        like_count: video.statistics.as_ref().and_then(|s| parse_count(&s.like_count)),
        dislike_count: video
            .statistics
            .as_ref()
            .and_then(|s| parse_count(&s.dislike_count)),
        comment_count: video
            .statistics
            .as_ref()
            .and_then(|s| parse_count(&s.comment_count)),
        favorite_count: video
            .statistics
            .as_ref()
            .and_then(|s| parse_count(&s.favorite_count)),
    };

    Some(Track {
        id: Uuid::new_v4(),
        title: snippet.title,
        url: format!("https://www.youtube.com/watch?v={}", video.id),
        author: snippet.channel_title,
        thumbnail_url,
        upload_date: Some(upload_date),
        details,
        file_path: None,
    })
}
