//! RoomSession - Per-Room Monitoring Loop
//!
//! ## Responsibilities
//!
//! - One supervised tokio task per room: sample -> detect -> match -> report
//! - State machine: Stopped -> Starting -> Running -> Stopping -> Stopped
//! - Cooperative, bounded-latency stop (the inter-frame delay is
//!   interruptible)
//! - Unconditional stream release on the way out, error path included
//!
//! ## Failure semantics
//!
//! - Stream open / frame read failures are fatal to this session only;
//!   the next reconciliation pass recreates the room if it is still active
//! - Roster refresh and attendance report failures are logged and the loop
//!   continues with the previous cache / without acknowledgement

use crate::backend_client::{ReportSink, RosterBackend};
use crate::face_client::{FaceDetector, DEFAULT_TOLERANCE};
use crate::roster_cache::{RosterCache, RosterSnapshot};
use crate::video_source::{Frame, VideoSource};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;

/// Every Nth frame is submitted to detection
pub const DEFAULT_SAMPLE_INTERVAL: u64 = 10;

/// Pause between loop iterations
pub const DEFAULT_FRAME_DELAY: Duration = Duration::from_secs(1);

/// Bound on waiting for a stopping loop before aborting it
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

/// Detection statistics, updated only by the session's own loop
#[derive(Debug, Clone, Default, Serialize)]
pub struct RoomStats {
    pub detections_count: u64,
    pub last_detection_at: Option<DateTime<Utc>>,
}

/// State + stats shared between the loop task and `describe()` readers
#[derive(Debug)]
struct SharedStatus {
    state: SessionState,
    stats: RoomStats,
}

/// Tunables for the monitoring loop
#[derive(Debug, Clone)]
pub struct MonitorSettings {
    /// Maximum embedding distance accepted as a match
    pub tolerance: f64,
    /// Submit every Nth frame to detection
    pub sample_interval: u64,
    /// Pause between loop iterations (interruptible by stop)
    pub frame_delay: Duration,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            tolerance: DEFAULT_TOLERANCE,
            sample_interval: DEFAULT_SAMPLE_INTERVAL,
            frame_delay: DEFAULT_FRAME_DELAY,
        }
    }
}

/// Collaborators a session needs; the registry clones one set per room
#[derive(Clone)]
pub struct SessionDeps {
    pub video: Arc<dyn VideoSource>,
    pub detector: Arc<dyn FaceDetector>,
    pub roster_backend: Arc<dyn RosterBackend>,
    pub report_sink: Arc<dyn ReportSink>,
}

/// Point-in-time, read-only view of a session
#[derive(Debug, Clone, Serialize)]
pub struct RoomSnapshot {
    pub room_id: String,
    pub display_code: String,
    pub source_locator: String,
    pub state: SessionState,
    pub stats: RoomStats,
    pub roster: RosterSnapshot,
}

/// One room's supervised monitoring session
pub struct RoomSession {
    room_id: String,
    display_code: String,
    source_locator: String,
    roster: Arc<RosterCache>,
    status: Arc<RwLock<SharedStatus>>,
    stop_tx: watch::Sender<bool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl RoomSession {
    /// Create the session and spawn its monitoring task
    ///
    /// The caller (registry) has already loaded the roster; the task opens
    /// the stream itself so registry locks are never held across video I/O.
    pub fn spawn(
        room_id: String,
        source_locator: String,
        display_code: String,
        roster: Arc<RosterCache>,
        deps: SessionDeps,
        settings: MonitorSettings,
    ) -> Self {
        let status = Arc::new(RwLock::new(SharedStatus {
            state: SessionState::Starting,
            stats: RoomStats::default(),
        }));
        let (stop_tx, stop_rx) = watch::channel(false);

        let ctx = MonitorContext {
            room_id: room_id.clone(),
            source_locator: source_locator.clone(),
            roster: roster.clone(),
            status: status.clone(),
            deps,
            settings,
        };

        let handle = tokio::spawn(run_monitor(ctx, stop_rx));

        Self {
            room_id,
            display_code,
            source_locator,
            roster,
            status,
            stop_tx,
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Signal stop and wait (bounded) for loop exit and stream release
    ///
    /// A loop that overruns the bound is aborted so a locator change can
    /// never leave two streams open for one room.
    pub async fn shutdown(&self, timeout: Duration) {
        let _ = self.stop_tx.send(true);

        let handle = self.handle.lock().await.take();
        if let Some(handle) = handle {
            let abort = handle.abort_handle();
            match tokio::time::timeout(timeout, handle).await {
                Ok(_) => {
                    tracing::debug!(room_id = %self.room_id, "Session stopped");
                }
                Err(_) => {
                    tracing::warn!(
                        room_id = %self.room_id,
                        timeout_ms = timeout.as_millis(),
                        "Session did not stop in time, aborting task"
                    );
                    abort.abort();
                    let mut status = self.status.write().await;
                    status.state = SessionState::Stopped;
                }
            }
        }
    }

    /// Current lifecycle state
    pub async fn state(&self) -> SessionState {
        self.status.read().await.state
    }

    /// Point-in-time snapshot; never blocks on the monitoring loop
    pub async fn snapshot(&self) -> RoomSnapshot {
        let (state, stats) = {
            let status = self.status.read().await;
            (status.state, status.stats.clone())
        };
        RoomSnapshot {
            room_id: self.room_id.clone(),
            display_code: self.display_code.clone(),
            source_locator: self.source_locator.clone(),
            state,
            stats,
            roster: self.roster.snapshot().await,
        }
    }

    /// The session's roster cache (for forced out-of-cycle refresh)
    pub fn roster(&self) -> &Arc<RosterCache> {
        &self.roster
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    pub fn source_locator(&self) -> &str {
        &self.source_locator
    }

    pub fn display_code(&self) -> &str {
        &self.display_code
    }
}

/// Everything the spawned loop owns
struct MonitorContext {
    room_id: String,
    source_locator: String,
    roster: Arc<RosterCache>,
    status: Arc<RwLock<SharedStatus>>,
    deps: SessionDeps,
    settings: MonitorSettings,
}

impl MonitorContext {
    async fn set_state(&self, state: SessionState) {
        self.status.write().await.state = state;
    }
}

/// The monitoring loop
async fn run_monitor(ctx: MonitorContext, mut stop_rx: watch::Receiver<bool>) {
    let mut stream = match ctx.deps.video.open(&ctx.source_locator).await {
        Ok(stream) => stream,
        Err(e) => {
            tracing::error!(
                room_id = %ctx.room_id,
                locator = %ctx.source_locator,
                error = %e,
                "Cannot open stream, session not started"
            );
            ctx.set_state(SessionState::Stopped).await;
            return;
        }
    };

    ctx.set_state(SessionState::Running).await;
    tracing::info!(
        room_id = %ctx.room_id,
        locator = %ctx.source_locator,
        "Monitoring started"
    );

    let sample_interval = ctx.settings.sample_interval.max(1);
    let mut frame_index: u64 = 0;

    loop {
        if *stop_rx.borrow() {
            tracing::debug!(room_id = %ctx.room_id, "Stop requested");
            break;
        }

        let frame = match stream.read_frame().await {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                tracing::error!(room_id = %ctx.room_id, "Stream ended, terminating session");
                break;
            }
            Err(e) => {
                tracing::error!(
                    room_id = %ctx.room_id,
                    error = %e,
                    "Frame read failed, terminating session"
                );
                break;
            }
        };

        // Sampling policy: frames 1, N+1, 2N+1, ... go to detection,
        // the rest are discarded with no state change
        if frame_index % sample_interval == 0 {
            if ctx.roster.is_stale(Utc::now()).await {
                match ctx.roster.refresh(ctx.deps.roster_backend.as_ref()).await {
                    Ok(entries) => {
                        tracing::debug!(
                            room_id = %ctx.room_id,
                            entries = entries,
                            "Roster cache refreshed in loop"
                        );
                    }
                    Err(e) => {
                        tracing::warn!(
                            room_id = %ctx.room_id,
                            error = %e,
                            "Roster refresh failed, keeping previous cache"
                        );
                    }
                }
            }

            process_frame(&ctx, &frame).await;
        }
        frame_index += 1;

        // Inter-iteration delay; the stop signal interrupts it so shutdown
        // latency stays bounded regardless of the configured delay
        tokio::select! {
            _ = stop_rx.changed() => break,
            _ = tokio::time::sleep(ctx.settings.frame_delay) => {}
        }
    }

    ctx.set_state(SessionState::Stopping).await;
    stream.close().await;
    ctx.set_state(SessionState::Stopped).await;

    tracing::info!(room_id = %ctx.room_id, "Monitoring stopped");
}

/// Detect, match and report one sampled frame
///
/// Detection and report failures are logged and swallowed here: they must
/// not terminate the loop.
async fn process_frame(ctx: &MonitorContext, frame: &Frame) {
    let faces = match ctx.deps.detector.detect(frame).await {
        Ok(faces) => faces,
        Err(e) => {
            tracing::warn!(room_id = %ctx.room_id, error = %e, "Face detection failed");
            return;
        }
    };

    if faces.is_empty() {
        return;
    }

    tracing::debug!(
        room_id = %ctx.room_id,
        faces = faces.len(),
        "Faces detected in frame"
    );

    let matches = ctx.roster.match_faces(&faces, ctx.settings.tolerance).await;
    if matches.is_empty() {
        return;
    }

    let captured_at = frame.captured_at;

    // Local stats first: they reflect local detections, independent of
    // backend acknowledgement
    {
        let mut status = ctx.status.write().await;
        status.stats.detections_count += matches.len() as u64;
        status.stats.last_detection_at = Some(captured_at);
    }

    tracing::info!(
        room_id = %ctx.room_id,
        matches = matches.len(),
        "Known faces recognized"
    );

    let sink = ctx.deps.report_sink.clone();
    let room_id = ctx.room_id.clone();
    tokio::spawn(async move {
        if let Err(e) = sink.report_matches(&room_id, &matches, captured_at).await {
            tracing::error!(
                room_id = %room_id,
                error = %e,
                "Attendance report failed"
            );
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, Result};
    use crate::face_client::{DetectedFace, FaceRegion};
    use crate::models::{MatchResult, RosterEntry};
    use crate::video_source::VideoStream;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    /// Video source with scripted failure points and open/close counters
    struct FakeVideo {
        opens: AtomicUsize,
        closes: Arc<AtomicUsize>,
        fail_open: bool,
        fail_read_after: Option<usize>,
    }

    impl FakeVideo {
        fn healthy() -> Self {
            Self {
                opens: AtomicUsize::new(0),
                closes: Arc::new(AtomicUsize::new(0)),
                fail_open: false,
                fail_read_after: None,
            }
        }

        fn failing_reads_after(n: usize) -> Self {
            Self {
                fail_read_after: Some(n),
                ..Self::healthy()
            }
        }
    }

    struct FakeStream {
        reads: usize,
        fail_read_after: Option<usize>,
        closes: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl VideoSource for FakeVideo {
        async fn open(&self, locator: &str) -> Result<Box<dyn VideoStream>> {
            if self.fail_open {
                return Err(Error::Stream(format!("cannot open {}", locator)));
            }
            self.opens.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(FakeStream {
                reads: 0,
                fail_read_after: self.fail_read_after,
                closes: self.closes.clone(),
            }))
        }
    }

    #[async_trait]
    impl VideoStream for FakeStream {
        async fn read_frame(&mut self) -> Result<Option<Frame>> {
            if let Some(limit) = self.fail_read_after {
                if self.reads >= limit {
                    return Err(Error::Stream("read failure".to_string()));
                }
            }
            self.reads += 1;
            Ok(Some(Frame {
                data: vec![0xFF, 0xD8, 0xFF, 0xD9],
                captured_at: Utc::now(),
            }))
        }

        async fn close(&mut self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Detector always finding one face at embedding zero
    struct OneFaceDetector;

    #[async_trait]
    impl FaceDetector for OneFaceDetector {
        async fn detect(&self, _frame: &Frame) -> Result<Vec<DetectedFace>> {
            Ok(vec![DetectedFace {
                region: FaceRegion {
                    top: 0,
                    right: 10,
                    bottom: 10,
                    left: 0,
                },
                embedding: vec![0.0; 4],
            }])
        }
    }

    struct OneEntryRoster;

    #[async_trait]
    impl RosterBackend for OneEntryRoster {
        async fn fetch_roster(&self, _room_id: &str) -> Result<Vec<RosterEntry>> {
            Ok(vec![RosterEntry {
                identity: 1,
                embedding: vec![0.0; 4],
            }])
        }
    }

    struct CountingSink {
        reports: AtomicUsize,
    }

    #[async_trait]
    impl ReportSink for CountingSink {
        async fn report_matches(
            &self,
            _room_id: &str,
            _matches: &[MatchResult],
            _captured_at: DateTime<Utc>,
        ) -> Result<()> {
            self.reports.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn fast_settings() -> MonitorSettings {
        MonitorSettings {
            tolerance: DEFAULT_TOLERANCE,
            sample_interval: 1,
            frame_delay: Duration::from_millis(5),
        }
    }

    fn deps(video: Arc<dyn VideoSource>, sink: Arc<dyn ReportSink>) -> SessionDeps {
        SessionDeps {
            video,
            detector: Arc::new(OneFaceDetector),
            roster_backend: Arc::new(OneEntryRoster),
            report_sink: sink,
        }
    }

    fn session_with(video: Arc<dyn VideoSource>, sink: Arc<dyn ReportSink>) -> RoomSession {
        let roster = Arc::new(RosterCache::with_default_ttl("2".to_string()));
        RoomSession::spawn(
            "2".to_string(),
            "http://cam/stream".to_string(),
            "20256A".to_string(),
            roster,
            deps(video, sink),
            fast_settings(),
        )
    }

    #[tokio::test]
    async fn test_loop_detects_and_updates_stats() {
        let video = Arc::new(FakeVideo::healthy());
        let sink = Arc::new(CountingSink {
            reports: AtomicUsize::new(0),
        });
        let session = session_with(video.clone(), sink.clone());

        tokio::time::sleep(Duration::from_millis(100)).await;

        let snap = session.snapshot().await;
        assert_eq!(snap.state, SessionState::Running);
        assert!(snap.stats.detections_count > 0);
        assert!(snap.stats.last_detection_at.is_some());
        assert!(sink.reports.load(Ordering::SeqCst) > 0);

        session.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn test_read_failure_terminates_and_releases_stream() {
        let video = Arc::new(FakeVideo::failing_reads_after(2));
        let closes = video.closes.clone();
        let sink = Arc::new(CountingSink {
            reports: AtomicUsize::new(0),
        });
        let session = session_with(video, sink);

        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(session.state().await, SessionState::Stopped);
        // Stream released even though the loop exited via error
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_open_failure_goes_straight_to_stopped() {
        let video = Arc::new(FakeVideo {
            fail_open: true,
            ..FakeVideo::healthy()
        });
        let sink = Arc::new(CountingSink {
            reports: AtomicUsize::new(0),
        });
        let session = session_with(video.clone(), sink);

        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(session.state().await, SessionState::Stopped);
        assert_eq!(video.opens.load(Ordering::SeqCst), 0);
        assert_eq!(video.closes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_long_frame_delay() {
        let video = Arc::new(FakeVideo::healthy());
        let closes = video.closes.clone();
        let sink = Arc::new(CountingSink {
            reports: AtomicUsize::new(0),
        });
        let roster = Arc::new(RosterCache::with_default_ttl("2".to_string()));
        let session = RoomSession::spawn(
            "2".to_string(),
            "http://cam/stream".to_string(),
            "20256A".to_string(),
            roster,
            deps(video, sink),
            MonitorSettings {
                frame_delay: Duration::from_secs(60),
                sample_interval: 1,
                tolerance: DEFAULT_TOLERANCE,
            },
        );

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(session.state().await, SessionState::Running);

        let started = Instant::now();
        session.shutdown(Duration::from_secs(5)).await;

        // The 60s delay must not be waited out
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(session.state().await, SessionState::Stopped);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }
}
