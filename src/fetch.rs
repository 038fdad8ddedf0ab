//! Track downloading
//!
//! The engine consumes the [`Downloader`] contract: turn a track's source
//! URL into a local audio file. [`YtDlpDownloader`] is the stock
//! implementation, shelling out to yt-dlp to extract a wav file into a
//! downloads directory. Fetching is idempotent: an already-downloaded file
//! is reused without re-fetching.

use crate::error::{Error, Result};
use crate::track::Track;
use async_trait::async_trait;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Fetches a track's audio to a local file
#[async_trait]
pub trait Downloader: Send + Sync {
    /// Produce a local audio file for the track's source URL.
    ///
    /// Fails with [`Error::Fetch`] on network or tool failure.
    async fn fetch(&self, track: &Track) -> Result<PathBuf>;
}

/// Downloader shelling out to yt-dlp (or a compatible tool)
pub struct YtDlpDownloader {
    program: String,
    downloads_dir: PathBuf,
}

impl YtDlpDownloader {
    /// Create a downloader writing into `downloads_dir` using `yt-dlp`
    pub fn new(downloads_dir: impl Into<PathBuf>) -> Self {
        Self::with_program("yt-dlp", downloads_dir)
    }

    /// Create a downloader using a custom download program
    pub fn with_program(program: impl Into<String>, downloads_dir: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            downloads_dir: downloads_dir.into(),
        }
    }

    /// Destination path for a source URL
    fn target_path(&self, url: &str) -> PathBuf {
        self.downloads_dir.join(format!("{}.wav", file_stem_for_url(url)))
    }
}

#[async_trait]
impl Downloader for YtDlpDownloader {
    async fn fetch(&self, track: &Track) -> Result<PathBuf> {
        let path = self.target_path(&track.url);

        if path.is_file() {
            info!(path = %path.display(), "download already exists, reusing");
            return Ok(path);
        }

        tokio::fs::create_dir_all(&self.downloads_dir)
            .await
            .map_err(|e| fetch_error(&track.url, format!("creating downloads dir: {e}")))?;

        debug!(program = %self.program, url = %track.url, "starting download");

        let mut child = Command::new(&self.program)
            .arg("-x")
            .arg("--audio-format")
            .arg("wav")
            .arg("-o")
            .arg(&path)
            .arg(&track.url)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| fetch_error(&track.url, format!("{}: {}", self.program, e)))?;

        // Progress lines go straight to the log while the tool runs
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!("download: {}", line);
                }
            });
        }

        let mut stderr_buf = String::new();
        if let Some(mut stderr) = child.stderr.take() {
            stderr.read_to_string(&mut stderr_buf).await.ok();
        }

        let status = child
            .wait()
            .await
            .map_err(|e| fetch_error(&track.url, e.to_string()))?;

        if !status.success() {
            for line in stderr_buf.lines() {
                warn!("download: {}", line);
            }
            return Err(fetch_error(
                &track.url,
                format!("{} exited with {}", self.program, status),
            ));
        }

        if !path.is_file() {
            return Err(fetch_error(
                &track.url,
                format!("no output file at {}", path.display()),
            ));
        }

        info!(path = %path.display(), "download finished");
        Ok(path)
    }
}

fn fetch_error(url: &str, message: String) -> Error {
    Error::Fetch {
        url: url.to_string(),
        message,
    }
}

/// Derive a filesystem-safe file stem from a source URL.
///
/// Uses the `v=` query value when present (YouTube watch URLs), otherwise
/// the last path segment.
fn file_stem_for_url(url: &str) -> String {
    let raw = url
        .split_once("v=")
        .map(|(_, rest)| rest.split('&').next().unwrap_or(rest))
        .or_else(|| url.trim_end_matches('/').rsplit('/').next())
        .unwrap_or(url);

    let stem: String = raw
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();

    if stem.is_empty() {
        "track".to_string()
    } else {
        stem
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;

    fn fake_ytdlp(dir: &Path, body: &str) -> String {
        let path = dir.join("ytdlp.sh");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.to_string_lossy().into_owned()
    }

    #[test]
    fn test_file_stem_for_url() {
        assert_eq!(
            file_stem_for_url("https://www.youtube.com/watch?v=dQw4w9WgXcQ"),
            "dQw4w9WgXcQ"
        );
        assert_eq!(
            file_stem_for_url("https://www.youtube.com/watch?v=abc123&t=42"),
            "abc123"
        );
        assert_eq!(file_stem_for_url("https://example.com/audio/song"), "song");
    }

    #[tokio::test]
    async fn test_fetch_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        // Output path is the 5th argument (-x --audio-format wav -o OUT URL)
        let program = fake_ytdlp(dir.path(), r#"printf 'fake-wav' > "$5""#);
        let downloads = dir.path().join("downloads");
        let downloader = YtDlpDownloader::with_program(program, &downloads);

        let track = Track::new("T", "https://www.youtube.com/watch?v=abc123", "A");
        let path = downloader.fetch(&track).await.unwrap();

        assert_eq!(path, downloads.join("abc123.wav"));
        assert_eq!(std::fs::read(&path).unwrap(), b"fake-wav");
    }

    #[tokio::test]
    async fn test_fetch_reuses_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        // A script that would clobber the file if it ran
        let program = fake_ytdlp(dir.path(), r#"printf 'clobbered' > "$5""#);
        let downloads = dir.path().join("downloads");
        std::fs::create_dir_all(&downloads).unwrap();
        std::fs::write(downloads.join("abc123.wav"), b"original").unwrap();

        let downloader = YtDlpDownloader::with_program(program, &downloads);
        let track = Track::new("T", "https://www.youtube.com/watch?v=abc123", "A");
        let path = downloader.fetch(&track).await.unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), b"original");
    }

    #[tokio::test]
    async fn test_fetch_failure_surfaces_fetch_error() {
        let dir = tempfile::tempdir().unwrap();
        let program = fake_ytdlp(dir.path(), "echo 'boom' >&2; exit 1");
        let downloader = YtDlpDownloader::with_program(program, dir.path().join("downloads"));

        let track = Track::new("T", "https://www.youtube.com/watch?v=broken1", "A");
        let result = downloader.fetch(&track).await;

        match result {
            Err(Error::Fetch { url, .. }) => {
                assert_eq!(url, "https://www.youtube.com/watch?v=broken1")
            }
            other => panic!("expected Fetch error, got {:?}", other.map(|p| p.display().to_string())),
        }
    }
}
