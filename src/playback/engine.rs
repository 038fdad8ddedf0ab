//! Playback orchestration
//!
//! [`Player`] ties the queue, the decode process manager, and the transport
//! together. All state-machine decisions happen on one control loop task
//! consuming an internal message queue, so "track added while idle", "skip
//! mid-stream", and "queue emptied while playing" cannot race each other.
//!
//! A playback operation moves through four phases: idle, awaiting (track
//! dequeued, process starting), streaming (bytes flowing to the transport),
//! and draining (cleanup). Exactly one decode-and-stream operation is in
//! flight at any time, enforced by a single-permit semaphore held from just
//! before streaming until draining completes.

use crate::error::{Error, Result};
use crate::events::{EventBus, PlayerEvent};
use crate::fetch::Downloader;
use crate::options::PlaybackOptions;
use crate::playback::decode::DecodeProcessManager;
use crate::playback::queue::TrackQueue;
use crate::state::PlayerState;
use crate::track::Track;
use crate::transport::{ChannelRef, Transport};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock, Semaphore};
use tracing::{debug, error, info, warn};

/// Messages consumed by the control loop
enum ControlMessage {
    /// The queue may have gained a head while the player was idle
    QueueChanged,

    /// A playback operation ended (normally, cancelled, or failed to start)
    PlaybackEnded { outcome: PlaybackOutcome },

    /// Stop the control loop
    Shutdown,
}

/// How a playback operation ended
enum PlaybackOutcome {
    /// The stream ran, to its end or cut short; the queue advances either
    /// way
    Finished,

    /// Playback never reached streaming. When `retriable` is false the
    /// engine stays idle instead of auto-advancing (connect failures would
    /// fail again for the next track too).
    StartFailed { retriable: bool },
}

struct EngineContext {
    state: Arc<PlayerState>,
    queue: Arc<RwLock<TrackQueue>>,
    events: EventBus,
    decode: Arc<DecodeProcessManager>,
    downloader: Arc<dyn Downloader>,
    transport: Arc<dyn Transport>,
    /// Single-flight playback gate: one decode-and-stream operation at a time
    gate: Arc<Semaphore>,
    /// Set by skip/stop so a playback attempt whose decode process does not
    /// exist yet can still be cancelled; terminate alone cannot reach that
    /// window. Cleared when the next track is dequeued.
    cancel_requested: AtomicBool,
    control_tx: mpsc::UnboundedSender<ControlMessage>,
}

impl EngineContext {
    fn request_cancel(&self) {
        self.cancel_requested.store(true, Ordering::SeqCst);
    }

    fn take_cancel(&self) -> bool {
        self.cancel_requested.swap(false, Ordering::SeqCst)
    }
}

/// Builder for [`Player`]
pub struct PlayerBuilder {
    downloader: Option<Arc<dyn Downloader>>,
    transport: Option<Arc<dyn Transport>>,
    options: PlaybackOptions,
    decode: Option<DecodeProcessManager>,
    event_capacity: usize,
}

impl PlayerBuilder {
    fn new() -> Self {
        Self {
            downloader: None,
            transport: None,
            options: PlaybackOptions::default(),
            decode: None,
            event_capacity: 128,
        }
    }

    /// Downloader collaborator (required)
    pub fn downloader(mut self, downloader: Arc<dyn Downloader>) -> Self {
        self.downloader = Some(downloader);
        self
    }

    /// Transport collaborator (required)
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Initial playback options (defaults otherwise)
    pub fn options(mut self, options: PlaybackOptions) -> Self {
        self.options = options;
        self
    }

    /// Custom decode process manager (defaults to ffmpeg with a 5s grace)
    pub fn decode_manager(mut self, decode: DecodeProcessManager) -> Self {
        self.decode = Some(decode);
        self
    }

    /// Event bus capacity (defaults to 128)
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Construct the player and spawn its control loop.
    ///
    /// Fails with [`Error::InvalidState`] when a required collaborator is
    /// missing.
    pub fn build(self) -> Result<Player> {
        let downloader = self
            .downloader
            .ok_or_else(|| Error::InvalidState("player requires a downloader".into()))?;
        let transport = self
            .transport
            .ok_or_else(|| Error::InvalidState("player requires a transport".into()))?;

        let events = EventBus::new(self.event_capacity);
        let (control_tx, control_rx) = mpsc::unbounded_channel();

        let ctx = Arc::new(EngineContext {
            state: Arc::new(PlayerState::new(self.options)),
            queue: Arc::new(RwLock::new(TrackQueue::new(events.clone()))),
            events,
            decode: Arc::new(self.decode.unwrap_or_default()),
            downloader,
            transport,
            gate: Arc::new(Semaphore::new(1)),
            cancel_requested: AtomicBool::new(false),
            control_tx,
        });

        tokio::spawn(control_loop(Arc::clone(&ctx), control_rx));
        info!("player initialized");

        Ok(Player { ctx })
    }
}

/// Queue + playback orchestration engine for one voice session.
///
/// Cheap to clone; all clones drive the same session.
#[derive(Clone)]
pub struct Player {
    ctx: Arc<EngineContext>,
}

impl Player {
    /// Start building a player
    pub fn builder() -> PlayerBuilder {
        PlayerBuilder::new()
    }

    /// Subscribe to player events
    pub fn events(&self) -> tokio::sync::broadcast::Receiver<PlayerEvent> {
        self.ctx.events.subscribe()
    }

    /// Download each track in input order and append it to the queue.
    ///
    /// Playback starts automatically when the player is idle. A fetch
    /// failure skips that track and the batch continues; the first fetch
    /// error is returned once the whole batch has been processed.
    pub async fn enqueue(&self, channel: ChannelRef, tracks: Vec<Track>) -> Result<()> {
        self.ctx.state.set_channel(Some(channel)).await;

        let mut first_error = None;
        for mut track in tracks {
            match self.ctx.downloader.fetch(&track).await {
                Ok(path) => {
                    info!(title = %track.title, "downloaded: {}", path.display());
                    track.file_path = Some(path);
                    self.ctx.queue.write().await.append(track);
                    self.poke();
                }
                Err(e) => {
                    warn!(title = %track.title, "fetch failed, skipping track: {}", e);
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Enqueue tracks and replace the playback options in one call
    pub async fn enqueue_with_options(
        &self,
        channel: ChannelRef,
        tracks: Vec<Track>,
        options: PlaybackOptions,
    ) -> Result<()> {
        self.ctx.state.set_options(options).await;
        self.enqueue(channel, tracks).await
    }

    /// Download the tracks, insert them at the head of the queue, and force
    /// a skip of any in-flight track so the new head plays immediately.
    pub async fn insert_and_play_now(&self, channel: ChannelRef, tracks: Vec<Track>) -> Result<()> {
        self.ctx.state.set_channel(Some(channel)).await;

        // Preemption applies to whatever was underway when the call
        // arrived. When the player was idle, the head inserted below starts
        // playing during the downloads and must not be killed by its own
        // caller.
        let preempt = self.ctx.state.current_track().await.map(|t| t.id);

        let mut first_error = None;
        let mut inserted = 0usize;
        for mut track in tracks {
            match self.ctx.downloader.fetch(&track).await {
                Ok(path) => {
                    info!(title = %track.title, "downloaded: {}", path.display());
                    track.file_path = Some(path);
                    self.ctx.queue.write().await.insert_at(inserted, track);
                    inserted += 1;
                    self.poke();
                }
                Err(e) => {
                    warn!(title = %track.title, "fetch failed, skipping track: {}", e);
                    first_error.get_or_insert(e);
                }
            }
        }

        // Preempt the original track if it is still the one underway; the
        // control loop advances to the new head once it has drained.
        if inserted > 0 {
            if let Some(id) = preempt {
                if self
                    .ctx
                    .state
                    .current_track()
                    .await
                    .is_some_and(|t| t.id == id)
                {
                    self.ctx.request_cancel();
                    self.ctx.decode.terminate().await;
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Skip the currently streaming track
    pub async fn skip(&self) {
        info!("skip requested");
        self.ctx.request_cancel();
        self.ctx.decode.terminate().await;
    }

    /// Discard the next `count` queued tracks, then skip the currently
    /// streaming track. Discarded tracks' files are deleted when
    /// `delete_after_play` is set.
    pub async fn skip_ahead(&self, count: usize) {
        info!(count, "skip ahead requested");
        let delete = self.ctx.state.options().await.delete_after_play;

        {
            let mut queue = self.ctx.queue.write().await;
            for _ in 0..count {
                match queue.dequeue() {
                    Ok(track) => {
                        if delete {
                            remove_track_file(&track).await;
                        }
                    }
                    Err(_) => break,
                }
            }
        }

        self.ctx.request_cancel();
        self.ctx.decode.terminate().await;
    }

    /// Clear the queue and end playback. Disconnects from the transport
    /// when `leave_on_stop` is set, regardless of queue state.
    pub async fn stop(&self) {
        info!("stop requested");

        let playing = self.ctx.state.is_playing().await;
        if playing {
            // Mark the stop as deliberate; the drain path applies
            // leave_on_stop once cleanup for the current track finishes.
            self.ctx.state.set_stop_requested(true).await;
            self.ctx.request_cancel();
        }

        self.ctx.queue.write().await.clear();
        self.ctx.decode.terminate().await;

        // Nothing is draining, so the leave policy applies right here
        if !playing && self.ctx.state.options().await.leave_on_stop {
            disconnect(&self.ctx).await;
        }
    }

    /// True when the queue holds tracks or a track is currently streaming
    pub async fn has_pending(&self) -> bool {
        !self.ctx.queue.read().await.is_empty() || self.ctx.state.is_playing().await
    }

    /// The currently streaming track, if any
    pub async fn current_track(&self) -> Option<Track> {
        self.ctx.state.current_track().await
    }

    /// Snapshot of the session: the current track first (when one is
    /// streaming), then every queued track in playback order
    pub async fn view_queue(&self) -> Vec<Track> {
        let mut tracks = Vec::new();
        if let Some(current) = self.ctx.state.current_track().await {
            tracks.push(current);
        }
        tracks.extend(self.ctx.queue.read().await.tracks());
        tracks
    }

    /// Number of queued tracks (excluding the current track)
    pub async fn queue_len(&self) -> usize {
        self.ctx.queue.read().await.len()
    }

    /// Current playback options
    pub async fn options(&self) -> PlaybackOptions {
        self.ctx.state.options().await
    }

    /// Replace the playback options
    pub async fn set_options(&self, options: PlaybackOptions) {
        self.ctx.state.set_options(options).await;
    }

    /// Shared player state (read accessors)
    pub fn state(&self) -> Arc<PlayerState> {
        Arc::clone(&self.ctx.state)
    }

    /// Stop the control loop and terminate any decode process.
    ///
    /// The player is unusable afterwards.
    pub async fn shutdown(&self) {
        let _ = self.ctx.control_tx.send(ControlMessage::Shutdown);
        self.ctx.decode.terminate().await;
    }

    fn poke(&self) {
        let _ = self.ctx.control_tx.send(ControlMessage::QueueChanged);
    }
}

/// The single control path: every start/advance/drain decision runs here,
/// one message at a time.
async fn control_loop(ctx: Arc<EngineContext>, mut rx: mpsc::UnboundedReceiver<ControlMessage>) {
    let mut playing = false;

    while let Some(message) = rx.recv().await {
        match message {
            ControlMessage::QueueChanged => {
                if !playing {
                    playing = start_next(&ctx).await;
                }
            }
            ControlMessage::PlaybackEnded { outcome } => {
                playing = false;
                match outcome {
                    PlaybackOutcome::Finished
                    | PlaybackOutcome::StartFailed { retriable: true } => {
                        playing = start_next(&ctx).await;
                        if !playing {
                            handle_drained(&ctx).await;
                        }
                    }
                    PlaybackOutcome::StartFailed { retriable: false } => {
                        // Connect failures would hit the next track too;
                        // stay idle and wait for outside intervention.
                        debug!("playback start failed, staying idle");
                        ctx.state.set_stop_requested(false).await;
                    }
                }
            }
            ControlMessage::Shutdown => {
                debug!("control loop stopping");
                break;
            }
        }
    }
}

/// Dequeue the head and launch its playback task. Returns false when the
/// queue is empty.
async fn start_next(ctx: &Arc<EngineContext>) -> bool {
    let track = match ctx.queue.write().await.dequeue() {
        Ok(track) => track,
        Err(_) => return false,
    };

    debug!(title = %track.title, "dequeued next track");
    ctx.state.set_current_track(Some(track.clone())).await;
    ctx.state.set_playing(true).await;
    // Any earlier cancel request or stop marker belonged to the previous
    // track
    ctx.take_cancel();
    ctx.state.set_stop_requested(false).await;

    let ctx = Arc::clone(ctx);
    tokio::spawn(async move {
        // Single-flight gate: held for the whole decode-and-stream
        // operation, released only after draining cleanup.
        let Ok(permit) = ctx.gate.clone().acquire_owned().await else {
            // Gate closed means the engine is shutting down
            return;
        };

        let outcome = run_playback(&ctx, track).await;

        drop(permit);
        let _ = ctx
            .control_tx
            .send(ControlMessage::PlaybackEnded { outcome });
    });

    true
}

/// Drive one track through awaiting, streaming, and draining.
async fn run_playback(ctx: &Arc<EngineContext>, track: Track) -> PlaybackOutcome {
    let Some(path) = track.file_path.clone().filter(|p| p.is_file()) else {
        error!(title = %track.title, "track has no local file, discarding");
        fail(ctx, &track, "local audio file is missing").await;
        return PlaybackOutcome::StartFailed { retriable: true };
    };

    // Establish (or reuse) the transport connection
    let handle = match ctx.state.connection().await {
        Some(handle) => handle,
        None => {
            let Some(channel) = ctx.state.channel().await else {
                error!("no target channel configured");
                fail(ctx, &track, "no target channel configured").await;
                return PlaybackOutcome::StartFailed { retriable: false };
            };
            match ctx.transport.connect(&channel).await {
                Ok(handle) => {
                    info!(channel = %channel.0, "transport connected");
                    ctx.state.set_connection(Some(handle)).await;
                    handle
                }
                Err(e) => {
                    error!("transport connect failed: {}", e);
                    fail(ctx, &track, &e.to_string()).await;
                    return PlaybackOutcome::StartFailed { retriable: false };
                }
            }
        }
    };

    let mut sink = match ctx.transport.sink(&handle).await {
        Ok(sink) => sink,
        Err(e) => {
            error!("transport sink unavailable: {}", e);
            fail(ctx, &track, &e.to_string()).await;
            return PlaybackOutcome::StartFailed { retriable: false };
        }
    };

    // A skip or stop issued after the track was dequeued but before a
    // decode process exists has nothing to terminate; it parks a cancel
    // request that is honored here.
    if ctx.take_cancel() {
        info!(title = %track.title, "playback cancelled before the decode process started");
        if ctx.state.options().await.delete_after_play {
            remove_track_file(&track).await;
        }
        ctx.state.set_current_track(None).await;
        ctx.state.set_playing(false).await;
        ctx.events.emit_lossy(PlayerEvent::PlaybackFinished {
            track,
            completed: false,
            timestamp: chrono::Utc::now(),
        });
        return PlaybackOutcome::Finished;
    }

    let mut stream = match ctx.decode.start(&path).await {
        Ok(stream) => stream,
        Err(e) => {
            error!("decode process failed to start: {}", e);
            fail(ctx, &track, &e.to_string()).await;
            return PlaybackOutcome::StartFailed { retriable: true };
        }
    };

    // Same race on the far side of the spawn: a cancel that landed while
    // the process was being created found nothing to kill, so apply it now.
    if ctx.take_cancel() {
        ctx.decode.terminate().await;
    }

    // Streaming
    info!(title = %track.title, "playback started");
    ctx.events.emit_lossy(PlayerEvent::PlaybackStarted {
        track: track.clone(),
        timestamp: chrono::Utc::now(),
    });

    let outcome = ctx.decode.copy(&mut stream, &mut sink).await;

    // Draining: the process must be fully terminated before the file may be
    // deleted, and the current-track slot is released last.
    ctx.decode.terminate().await;

    if ctx.state.options().await.delete_after_play {
        remove_track_file(&track).await;
    }

    ctx.state.set_current_track(None).await;
    ctx.state.set_playing(false).await;

    info!(title = %track.title, completed = outcome.completed, "playback finished");
    ctx.events.emit_lossy(PlayerEvent::PlaybackFinished {
        track,
        completed: outcome.completed,
        timestamp: chrono::Utc::now(),
    });

    PlaybackOutcome::Finished
}

/// Discard a track that never reached streaming
async fn fail(ctx: &Arc<EngineContext>, track: &Track, message: &str) {
    ctx.state.set_current_track(None).await;
    ctx.state.set_playing(false).await;
    ctx.events.emit_lossy(PlayerEvent::PlaybackFailed {
        track: track.clone(),
        message: message.to_string(),
        timestamp: chrono::Utc::now(),
    });
}

/// Queue drained with nothing left to play: apply the leave policy.
///
/// Runs after cleanup and the playback-finished notification, so a
/// disconnect is always the last thing observers see for a session.
async fn handle_drained(ctx: &Arc<EngineContext>) {
    let options = ctx.state.options().await;
    let was_stop = ctx.state.stop_requested().await;
    ctx.state.set_stop_requested(false).await;

    let leave = if was_stop {
        options.leave_on_stop
    } else {
        options.leave_on_end
    };
    if leave {
        disconnect(ctx).await;
    }
}

/// Release the transport connection, if any. Errors are logged, never
/// propagated into the state machine.
async fn disconnect(ctx: &Arc<EngineContext>) {
    let Some(handle) = ctx.state.connection().await else {
        return;
    };
    ctx.state.set_connection(None).await;

    info!("leaving voice channel");
    if let Err(e) = ctx.transport.disconnect(handle).await {
        error!("transport disconnect failed: {}", e);
    }
    ctx.events.emit_lossy(PlayerEvent::TransportDisconnected {
        timestamp: chrono::Utc::now(),
    });
}

async fn remove_track_file(track: &Track) {
    let Some(path) = track.file_path.as_deref() else {
        return;
    };
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!(path = %path.display(), "deleted local file"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), "failed to delete local file: {}", e),
    }
}
