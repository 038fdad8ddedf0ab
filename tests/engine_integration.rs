//! Playback engine integration tests
//!
//! Drives the full orchestration path with mock collaborators: an in-memory
//! downloader, a transport whose sink collects bytes into a buffer, and a
//! shell script standing in for ffmpeg. Only the decode process is real.

#![cfg(unix)]

use std::collections::HashSet;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWrite;
use tokio::sync::broadcast;
use tokio::time::timeout;

use voiceplay::{
    ChannelRef, DecodeProcessManager, Downloader, Error, PlaybackOptions, Player, PlayerEvent,
    Result, SinkHandle, Track, Transport,
};

// ================================================================================================
// Test infrastructure
// ================================================================================================

/// Downloader that writes `audio:<url>` into a local wav file.
/// URLs listed in `fail_urls` fail with a fetch error instead.
struct MockDownloader {
    dir: PathBuf,
    fail_urls: HashSet<String>,
    delay: Duration,
}

impl MockDownloader {
    fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            fail_urls: HashSet::new(),
            delay: Duration::ZERO,
        }
    }

    fn failing_on(mut self, url: &str) -> Self {
        self.fail_urls.insert(url.to_string());
        self
    }

    /// Make each fetch take a while, like a real download would
    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn path_for(&self, track: &Track) -> PathBuf {
        let stem: String = track
            .url
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        self.dir.join(format!("{stem}.wav"))
    }
}

#[async_trait]
impl Downloader for MockDownloader {
    async fn fetch(&self, track: &Track) -> Result<PathBuf> {
        tokio::time::sleep(self.delay).await;
        if self.fail_urls.contains(&track.url) {
            return Err(Error::Fetch {
                url: track.url.clone(),
                message: "simulated network failure".into(),
            });
        }
        std::fs::create_dir_all(&self.dir)?;
        let path = self.path_for(track);
        std::fs::write(&path, format!("audio:{}", track.url))?;
        Ok(path)
    }
}

/// Sink writing into a shared byte buffer
struct BufferSink(Arc<Mutex<Vec<u8>>>);

impl AsyncWrite for BufferSink {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

/// Transport recording connects/disconnects and collecting sink bytes
struct MockTransport {
    data: Arc<Mutex<Vec<u8>>>,
    connects: AtomicUsize,
    disconnects: AtomicUsize,
    next_handle: AtomicU64,
    fail_connect: bool,
    connect_delay: Duration,
}

impl MockTransport {
    fn new() -> Self {
        Self {
            data: Arc::new(Mutex::new(Vec::new())),
            connects: AtomicUsize::new(0),
            disconnects: AtomicUsize::new(0),
            next_handle: AtomicU64::new(1),
            fail_connect: false,
            connect_delay: Duration::ZERO,
        }
    }

    fn failing() -> Self {
        Self {
            fail_connect: true,
            ..Self::new()
        }
    }

    /// Make connect take a while, like a real voice handshake would
    fn with_connect_delay(mut self, delay: Duration) -> Self {
        self.connect_delay = delay;
        self
    }

    fn sink_bytes(&self) -> Vec<u8> {
        self.data.lock().unwrap().clone()
    }

    fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    fn disconnect_count(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self, _channel: &ChannelRef) -> Result<SinkHandle> {
        tokio::time::sleep(self.connect_delay).await;
        if self.fail_connect {
            return Err(Error::Connection("simulated connect failure".into()));
        }
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(SinkHandle(self.next_handle.fetch_add(1, Ordering::SeqCst)))
    }

    async fn sink(&self, _handle: &SinkHandle) -> Result<voiceplay::AudioSink> {
        Ok(Box::new(BufferSink(Arc::clone(&self.data))))
    }

    async fn disconnect(&self, _handle: SinkHandle) -> Result<()> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct Harness {
    player: Player,
    transport: Arc<MockTransport>,
    events: broadcast::Receiver<PlayerEvent>,
    _dir: tempfile::TempDir,
}

/// Script standing in for ffmpeg; the input file is the 5th argument of the
/// fixed decode invocation (-hide_banner -loglevel panic -i FILE ...).
fn fake_decoder(dir: &Path, body: &str) -> String {
    let path = dir.join("decoder.sh");
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path.to_string_lossy().into_owned()
}

/// Decoder that streams the file and exits
const QUICK_DECODER: &str = r#"exec cat "$5""#;
/// Decoder that streams the file, then takes a beat before exiting
/// naturally (long enough for a batch enqueue to finish appending)
const SHORT_DECODER: &str = r#"cat "$5"; exec sleep 0.4"#;
/// Decoder that streams the file, then lingers until killed
const LINGERING_DECODER: &str = r#"cat "$5"; exec sleep 30"#;

fn harness(decoder_body: &str, options: PlaybackOptions) -> Harness {
    harness_with(decoder_body, options, MockTransport::new(), |dir| {
        MockDownloader::new(dir)
    })
}

fn harness_with(
    decoder_body: &str,
    options: PlaybackOptions,
    transport: MockTransport,
    make_downloader: impl FnOnce(PathBuf) -> MockDownloader,
) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let program = fake_decoder(dir.path(), decoder_body);
    let transport = Arc::new(transport);

    let player = Player::builder()
        .downloader(Arc::new(make_downloader(dir.path().join("downloads"))))
        .transport(Arc::clone(&transport) as Arc<dyn Transport>)
        .options(options)
        .decode_manager(DecodeProcessManager::with_program(
            program,
            Duration::from_millis(200),
        ))
        .build()
        .unwrap();

    let events = player.events();
    Harness {
        player,
        transport,
        events,
        _dir: dir,
    }
}

fn track(n: u32) -> Track {
    Track::new(
        format!("track-{n}"),
        format!("https://example.com/watch/{n}"),
        "test-author",
    )
}

fn channel() -> ChannelRef {
    ChannelRef::new("voice-channel-1")
}

async fn next_event(rx: &mut broadcast::Receiver<PlayerEvent>) -> PlayerEvent {
    timeout(Duration::from_secs(10), rx.recv())
        .await
        .expect("timed out waiting for player event")
        .expect("event bus closed")
}

/// Skip queue-mutation noise and return the next lifecycle event
async fn next_lifecycle_event(rx: &mut broadcast::Receiver<PlayerEvent>) -> PlayerEvent {
    loop {
        match next_event(rx).await {
            PlayerEvent::QueueChanged { .. } | PlayerEvent::QueueCleared { .. } => continue,
            event => return event,
        }
    }
}

async fn expect_started(rx: &mut broadcast::Receiver<PlayerEvent>) -> Track {
    match next_lifecycle_event(rx).await {
        PlayerEvent::PlaybackStarted { track, .. } => track,
        other => panic!("expected PlaybackStarted, got {other:?}"),
    }
}

async fn expect_finished(rx: &mut broadcast::Receiver<PlayerEvent>) -> Track {
    match next_lifecycle_event(rx).await {
        PlayerEvent::PlaybackFinished { track, .. } => track,
        other => panic!("expected PlaybackFinished, got {other:?}"),
    }
}

// ================================================================================================
// Scenarios
// ================================================================================================

#[tokio::test]
async fn enqueue_while_idle_plays_queue_in_order_and_leaves_on_end() {
    let options = PlaybackOptions {
        leave_on_end: true,
        ..Default::default()
    };
    let mut h = harness(SHORT_DECODER, options);

    h.player
        .enqueue(channel(), vec![track(1), track(2)])
        .await
        .unwrap();

    // A then B, with no overlap: every start is preceded by the previous finish
    assert_eq!(expect_started(&mut h.events).await.title, "track-1");
    assert_eq!(expect_finished(&mut h.events).await.title, "track-1");
    assert_eq!(expect_started(&mut h.events).await.title, "track-2");
    assert_eq!(expect_finished(&mut h.events).await.title, "track-2");

    // Queue drained without a deliberate stop: leave_on_end disconnects
    match next_lifecycle_event(&mut h.events).await {
        PlayerEvent::TransportDisconnected { .. } => {}
        other => panic!("expected TransportDisconnected, got {other:?}"),
    }

    assert!(!h.player.has_pending().await);
    assert!(h.player.current_track().await.is_none());
    assert_eq!(h.transport.connect_count(), 1);
    assert_eq!(h.transport.disconnect_count(), 1);
}

#[tokio::test]
async fn decoded_bytes_reach_the_transport_sink() {
    let mut h = harness(QUICK_DECODER, PlaybackOptions::default());

    h.player.enqueue(channel(), vec![track(7)]).await.unwrap();
    expect_started(&mut h.events).await;
    expect_finished(&mut h.events).await;

    let bytes = h.transport.sink_bytes();
    assert_eq!(bytes, b"audio:https://example.com/watch/7");
}

#[tokio::test]
async fn no_disconnect_on_drain_unless_leave_on_end() {
    let mut h = harness(QUICK_DECODER, PlaybackOptions::default());

    h.player.enqueue(channel(), vec![track(1)]).await.unwrap();
    expect_started(&mut h.events).await;
    expect_finished(&mut h.events).await;

    // Give the drain path a moment, then verify the connection survived
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(h.transport.disconnect_count(), 0);
}

#[tokio::test]
async fn fetch_failure_skips_track_but_batch_continues() {
    let bad_url = "https://example.com/watch/2";
    let mut h = harness_with(
        QUICK_DECODER,
        PlaybackOptions::default(),
        MockTransport::new(),
        |dir| MockDownloader::new(dir).failing_on(bad_url),
    );

    let result = h.player.enqueue(channel(), vec![track(1), track(2)]).await;

    // The caller hears about the failing track only
    match result {
        Err(Error::Fetch { url, .. }) => assert_eq!(url, bad_url),
        other => panic!("expected Fetch error, got {other:?}"),
    }

    // Track 1 still plays through
    assert_eq!(expect_started(&mut h.events).await.title, "track-1");
    assert_eq!(expect_finished(&mut h.events).await.title, "track-1");
    assert!(!h.player.has_pending().await);
}

#[tokio::test]
async fn skip_terminates_current_and_advances() {
    let mut h = harness(LINGERING_DECODER, PlaybackOptions::default());

    h.player
        .enqueue(channel(), vec![track(1), track(2)])
        .await
        .unwrap();
    assert_eq!(expect_started(&mut h.events).await.title, "track-1");
    assert!(h.player.has_pending().await);

    h.player.skip().await;

    assert_eq!(expect_finished(&mut h.events).await.title, "track-1");
    assert_eq!(expect_started(&mut h.events).await.title, "track-2");
}

#[tokio::test]
async fn skip_ahead_discards_queued_tracks_and_their_files() {
    let mut h = harness(LINGERING_DECODER, PlaybackOptions::default());

    h.player
        .enqueue(channel(), vec![track(1), track(2), track(3)])
        .await
        .unwrap();
    assert_eq!(expect_started(&mut h.events).await.title, "track-1");
    assert_eq!(h.player.queue_len().await, 2);

    // Track 2's file exists before the skip
    let queued = h.player.view_queue().await;
    let b_path = queued[1].file_path.clone().unwrap();
    assert!(b_path.is_file());

    h.player.skip_ahead(1).await;

    // Track 2 was discarded (and deleted, delete_after_play defaults on);
    // playback advances straight from 1 to 3
    assert_eq!(expect_finished(&mut h.events).await.title, "track-1");
    assert_eq!(expect_started(&mut h.events).await.title, "track-3");
    assert!(!b_path.exists());
}

#[tokio::test]
async fn stop_clears_queue_terminates_and_disconnects() {
    let mut h = harness(LINGERING_DECODER, PlaybackOptions::default());

    h.player
        .enqueue(channel(), vec![track(1), track(2), track(3)])
        .await
        .unwrap();
    assert_eq!(expect_started(&mut h.events).await.title, "track-1");

    h.player.stop().await;

    // Draining order: cleanup and the finish notification come first, the
    // leave_on_stop disconnect (defaults on) is the last thing observed
    assert_eq!(expect_finished(&mut h.events).await.title, "track-1");
    match next_lifecycle_event(&mut h.events).await {
        PlayerEvent::TransportDisconnected { .. } => {}
        other => panic!("expected TransportDisconnected, got {other:?}"),
    }

    assert_eq!(h.player.queue_len().await, 0);
    assert!(!h.player.has_pending().await);
    assert_eq!(h.transport.disconnect_count(), 1);

    // Nothing else starts playing
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(h.player.current_track().await.is_none());
}

#[tokio::test]
async fn insert_and_play_now_preempts_current_track() {
    let mut h = harness(LINGERING_DECODER, PlaybackOptions::default());

    h.player
        .enqueue(channel(), vec![track(1), track(2)])
        .await
        .unwrap();
    assert_eq!(expect_started(&mut h.events).await.title, "track-1");

    h.player
        .insert_and_play_now(channel(), vec![track(9)])
        .await
        .unwrap();

    // Track 1 drains, the inserted track takes over, and track 1 is gone
    // for good (not requeued)
    assert_eq!(expect_finished(&mut h.events).await.title, "track-1");
    assert_eq!(expect_started(&mut h.events).await.title, "track-9");

    let titles: Vec<String> = h
        .player
        .view_queue()
        .await
        .into_iter()
        .map(|t| t.title)
        .collect();
    assert_eq!(titles, vec!["track-9", "track-2"]);
}

#[tokio::test]
async fn insert_and_play_now_from_idle_keeps_its_own_head_streaming() {
    // Slow downloads: the inserted head starts playing while the rest of
    // the batch is still fetching, and must not be preempted by its own
    // caller once the batch completes.
    let mut h = harness_with(
        LINGERING_DECODER,
        PlaybackOptions::default(),
        MockTransport::new(),
        |dir| MockDownloader::new(dir).with_delay(Duration::from_millis(400)),
    );

    h.player
        .insert_and_play_now(channel(), vec![track(1), track(2)])
        .await
        .unwrap();

    assert_eq!(expect_started(&mut h.events).await.title, "track-1");

    // The head keeps streaming well past the end of the batch
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(h.player.current_track().await.unwrap().title, "track-1");
    assert_eq!(h.player.queue_len().await, 1);

    // And nothing finished in the meantime
    loop {
        match h.events.try_recv() {
            Ok(PlayerEvent::PlaybackFinished { track, .. }) => {
                panic!("{} finished prematurely", track.title)
            }
            Ok(_) => continue,
            Err(broadcast::error::TryRecvError::Empty) => break,
            Err(e) => panic!("event bus error: {e}"),
        }
    }

    h.player.stop().await;
}

#[tokio::test]
async fn delete_after_play_removes_local_file() {
    let mut h = harness(QUICK_DECODER, PlaybackOptions::default());

    h.player.enqueue(channel(), vec![track(1)]).await.unwrap();
    let started = expect_started(&mut h.events).await;
    let path = started.file_path.unwrap();

    expect_finished(&mut h.events).await;
    assert!(!path.exists());
}

#[tokio::test]
async fn finished_files_kept_without_delete_after_play() {
    let options = PlaybackOptions {
        delete_after_play: false,
        ..Default::default()
    };
    let mut h = harness(QUICK_DECODER, options);

    h.player.enqueue(channel(), vec![track(1)]).await.unwrap();
    let started = expect_started(&mut h.events).await;
    let path = started.file_path.unwrap();

    expect_finished(&mut h.events).await;
    assert!(path.exists());
}

#[tokio::test]
async fn connect_failure_discards_track_and_stays_idle() {
    let mut h = harness_with(
        QUICK_DECODER,
        PlaybackOptions::default(),
        MockTransport::failing(),
        MockDownloader::new,
    );

    h.player.enqueue(channel(), vec![track(1)]).await.unwrap();

    match next_lifecycle_event(&mut h.events).await {
        PlayerEvent::PlaybackFailed { track, .. } => assert_eq!(track.title, "track-1"),
        other => panic!("expected PlaybackFailed, got {other:?}"),
    }

    // The track was discarded and the engine stays idle
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(h.player.current_track().await.is_none());
    assert!(!h.player.has_pending().await);
    assert_eq!(h.transport.connect_count(), 0);
}

#[tokio::test]
async fn stop_during_connect_cancels_before_the_process_starts() {
    // The stop lands after the track was dequeued but while the transport
    // handshake is still in flight, so there is no process to terminate
    // yet; the playback attempt must still be cancelled.
    let mut h = harness_with(
        LINGERING_DECODER,
        PlaybackOptions::default(),
        MockTransport::new().with_connect_delay(Duration::from_millis(400)),
        MockDownloader::new,
    );

    h.player.enqueue(channel(), vec![track(1)]).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    h.player.stop().await;

    // No PlaybackStarted: the decode process never ran
    match next_lifecycle_event(&mut h.events).await {
        PlayerEvent::PlaybackFinished {
            track, completed, ..
        } => {
            assert_eq!(track.title, "track-1");
            assert!(!completed);
        }
        other => panic!("expected PlaybackFinished, got {other:?}"),
    }
    match next_lifecycle_event(&mut h.events).await {
        PlayerEvent::TransportDisconnected { .. } => {}
        other => panic!("expected TransportDisconnected, got {other:?}"),
    }

    assert!(h.player.current_track().await.is_none());
    assert!(!h.player.has_pending().await);
}

#[tokio::test]
async fn current_track_is_held_outside_the_queue() {
    let mut h = harness(LINGERING_DECODER, PlaybackOptions::default());

    h.player
        .enqueue(channel(), vec![track(1), track(2)])
        .await
        .unwrap();
    assert_eq!(expect_started(&mut h.events).await.title, "track-1");

    // The streaming track is current, not queued
    assert_eq!(h.player.current_track().await.unwrap().title, "track-1");
    assert_eq!(h.player.queue_len().await, 1);

    let titles: Vec<String> = h
        .player
        .view_queue()
        .await
        .into_iter()
        .map(|t| t.title)
        .collect();
    assert_eq!(titles, vec!["track-1", "track-2"]);

    h.player.stop().await;
}

#[tokio::test]
async fn transport_connection_is_reused_across_tracks() {
    let mut h = harness(QUICK_DECODER, PlaybackOptions::default());

    h.player
        .enqueue(channel(), vec![track(1), track(2), track(3)])
        .await
        .unwrap();

    for _ in 0..3 {
        expect_started(&mut h.events).await;
        expect_finished(&mut h.events).await;
    }

    assert_eq!(h.transport.connect_count(), 1);
}
