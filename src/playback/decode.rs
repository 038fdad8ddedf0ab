//! External decode process management
//!
//! Runs at most one decode process at a time, converting a local audio file
//! into raw PCM on its stdout: interleaved stereo, signed 16-bit
//! little-endian, 48 kHz. The engine copies that stream into the transport
//! sink and terminates the process with a bounded graceful-then-forced wait.

use crate::error::{Error, Result};
use std::path::Path;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::process::{Child, ChildStdout, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Default grace period before a lingering decode process is force-killed
pub const DEFAULT_TERMINATE_GRACE: Duration = Duration::from_secs(5);

/// Outcome of one stream-copy operation
#[derive(Debug, Clone, Copy)]
pub struct StreamOutcome {
    /// Bytes forwarded to the sink
    pub bytes: u64,
    /// True when the copy reached end-of-stream; false when it was cut
    /// short by termination or an I/O fault
    pub completed: bool,
}

/// Lifecycle manager for the external decode process.
///
/// Starting a new process always fully terminates the previous one first,
/// so two tracks' audio can never interleave on the sink.
pub struct DecodeProcessManager {
    program: String,
    grace: Duration,
    child: Mutex<Option<Child>>,
}

impl DecodeProcessManager {
    /// Create a manager driving the default `ffmpeg` binary
    pub fn new() -> Self {
        Self::with_program("ffmpeg", DEFAULT_TERMINATE_GRACE)
    }

    /// Create a manager driving a custom decode program with a custom
    /// termination grace period
    pub fn with_program(program: impl Into<String>, grace: Duration) -> Self {
        Self {
            program: program.into(),
            grace,
            child: Mutex::new(None),
        }
    }

    /// Spawn a decode process for `path`, returning its stdout stream.
    ///
    /// Any previously running process is terminated first.
    pub async fn start(&self, path: &Path) -> Result<ChildStdout> {
        self.terminate().await;

        debug!(program = %self.program, path = %path.display(), "starting decode process");

        let mut child = Command::new(&self.program)
            .arg("-hide_banner")
            .arg("-loglevel")
            .arg("panic")
            .arg("-i")
            .arg(path)
            .arg("-ac")
            .arg("2")
            .arg("-f")
            .arg("s16le")
            .arg("-ar")
            .arg("48000")
            .arg("pipe:1")
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::ProcessStart(format!("{}: {}", self.program, e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::ProcessStart("decode process has no stdout".into()))?;

        *self.child.lock().await = Some(child);
        Ok(stdout)
    }

    /// Forward bytes from the decode stream to the sink until end-of-stream.
    ///
    /// An I/O fault mid-copy is playback cancellation, not an error: it is
    /// logged and the outcome reports `completed = false`. The sink is
    /// flushed either way.
    pub async fn copy<R, W>(&self, reader: &mut R, sink: &mut W) -> StreamOutcome
    where
        R: AsyncRead + Unpin + ?Sized,
        W: AsyncWrite + Unpin + ?Sized,
    {
        let outcome = match tokio::io::copy(reader, sink).await {
            Ok(bytes) => StreamOutcome {
                bytes,
                completed: true,
            },
            Err(e) => {
                info!("playback was cancelled: {}", e);
                StreamOutcome {
                    bytes: 0,
                    completed: false,
                }
            }
        };

        if let Err(e) = sink.flush().await {
            debug!("sink flush after copy failed: {}", e);
        }

        outcome
    }

    /// Terminate the decode process: wait up to the grace period for a
    /// natural exit, then force-kill.
    ///
    /// Always leaves the process handle cleared. Safe no-op when nothing is
    /// running; concurrent callers serialize on the internal lock.
    pub async fn terminate(&self) {
        let mut guard = self.child.lock().await;
        let Some(mut child) = guard.take() else {
            return;
        };

        tokio::select! {
            result = child.wait() => match result {
                Ok(status) => debug!("decode process exited: {}", status),
                Err(e) => warn!("failed to reap decode process: {}", e),
            },
            _ = tokio::time::sleep(self.grace) => {
                info!("decode process still alive after {:?}, killing", self.grace);
                if let Err(e) = child.start_kill() {
                    warn!("failed to kill decode process: {}", e);
                }
                if let Err(e) = child.wait().await {
                    warn!("failed to reap killed decode process: {}", e);
                }
            }
        }
    }

    /// Whether a decode process handle is currently held
    pub async fn is_active(&self) -> bool {
        self.child.lock().await.is_some()
    }
}

impl Default for DecodeProcessManager {
    fn default() -> Self {
        Self::new()
    }
}
