//! Shared fakes for integration tests
//!
//! Every fake records enough to assert on ordering (open/close events) and
//! failure injection is switchable at runtime so tests can script recovery.
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use salon_monitor::backend_client::{DirectoryBackend, ReportSink, RosterBackend};
use salon_monitor::error::{Error, Result};
use salon_monitor::face_client::{DetectedFace, FaceDetector, FaceRegion};
use salon_monitor::models::{ActiveRoom, MatchResult, RosterEntry};
use salon_monitor::room_registry::{RegistrySettings, RoomRegistry};
use salon_monitor::room_session::{MonitorSettings, SessionDeps};
use salon_monitor::video_source::{Frame, VideoSource, VideoStream};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Shared log behind [`RecordingVideo`]: open/close events as
/// `open:{locator}` / `close:{locator}`, plus the set of broken locators
pub struct VideoLog {
    events: Mutex<Vec<String>>,
    broken: Mutex<HashSet<String>>,
}

impl VideoLog {
    /// Streams opened for this locator fail their first read
    pub fn mark_broken(&self, locator: &str) {
        self.broken.lock().unwrap().insert(locator.to_string());
    }

    pub fn mark_healthy(&self, locator: &str) {
        self.broken.lock().unwrap().remove(locator);
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    pub fn open_count(&self) -> usize {
        self.count_prefix("open:")
    }

    pub fn close_count(&self) -> usize {
        self.count_prefix("close:")
    }

    fn count_prefix(&self, prefix: &str) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.starts_with(prefix))
            .count()
    }

    fn record(&self, event: String) {
        self.events.lock().unwrap().push(event);
    }
}

/// Video source recording every open/close into a shared [`VideoLog`]
pub struct RecordingVideo {
    log: Arc<VideoLog>,
}

impl RecordingVideo {
    pub fn new() -> (Self, Arc<VideoLog>) {
        let log = Arc::new(VideoLog {
            events: Mutex::new(Vec::new()),
            broken: Mutex::new(HashSet::new()),
        });
        (Self { log: log.clone() }, log)
    }
}

struct RecordingStream {
    locator: String,
    broken: bool,
    log: Arc<VideoLog>,
}

#[async_trait]
impl VideoSource for RecordingVideo {
    async fn open(&self, locator: &str) -> Result<Box<dyn VideoStream>> {
        self.log.record(format!("open:{}", locator));
        let broken = self.log.broken.lock().unwrap().contains(locator);
        Ok(Box::new(RecordingStream {
            locator: locator.to_string(),
            broken,
            log: self.log.clone(),
        }))
    }
}

#[async_trait]
impl VideoStream for RecordingStream {
    async fn read_frame(&mut self) -> Result<Option<Frame>> {
        if self.broken {
            return Err(Error::Stream(format!("broken stream {}", self.locator)));
        }
        Ok(Some(Frame {
            data: vec![0xFF, 0xD8, 0xFF, 0xD9],
            captured_at: Utc::now(),
        }))
    }

    async fn close(&mut self) {
        self.log.record(format!("close:{}", self.locator));
    }
}

/// Detector finding one face at embedding zero in every frame
pub struct OneFaceDetector;

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

/// Roster backend with one matching identity and a switchable failure flag
pub struct ScriptedRoster {
    fail: AtomicBool,
    pub fetches: AtomicUsize,
}

impl ScriptedRoster {
    pub fn new() -> Self {
        Self {
            fail: AtomicBool::new(false),
            fetches: AtomicUsize::new(0),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.fail.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl RosterBackend for ScriptedRoster {
    async fn fetch_roster(&self, room_id: &str) -> Result<Vec<RosterEntry>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::Backend(format!("roster fetch down for {}", room_id)));
        }
        Ok(vec![RosterEntry {
            identity: 1,
            embedding: vec![0.0; 4],
        }])
    }
}

/// Report sink that only counts
pub struct CountingSink {
    pub reports: AtomicUsize,
}

impl CountingSink {
    pub fn new() -> Self {
        Self {
            reports: AtomicUsize::new(0),
        }
    }
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

/// Directory backend with a swappable room list, failure flag and an
/// optional artificial fetch delay
pub struct ScriptedDirectory {
    rooms: Mutex<Vec<ActiveRoom>>,
    fail: AtomicBool,
    delay: Mutex<Option<Duration>>,
}

impl ScriptedDirectory {
    pub fn new(rooms: Vec<ActiveRoom>) -> Self {
        Self {
            rooms: Mutex::new(rooms),
            fail: AtomicBool::new(false),
            delay: Mutex::new(None),
        }
    }

    pub fn set_rooms(&self, rooms: Vec<ActiveRoom>) {
        *self.rooms.lock().unwrap() = rooms;
    }

    pub fn set_failing(&self, failing: bool) {
        self.fail.store(failing, Ordering::SeqCst);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }
}

#[async_trait]
impl DirectoryBackend for ScriptedDirectory {
    async fn fetch_active_rooms(&self) -> Result<Vec<ActiveRoom>> {
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::Backend("directory fetch down".to_string()));
        }
        Ok(self.rooms.lock().unwrap().clone())
    }
}

pub fn room(id: &str, locator: &str, code: &str) -> ActiveRoom {
    ActiveRoom {
        room_id: id.to_string(),
        source_locator: locator.to_string(),
        display_code: code.to_string(),
    }
}

/// Fast loop settings so tests finish in milliseconds
pub fn fast_settings() -> RegistrySettings {
    RegistrySettings {
        monitor: MonitorSettings {
            tolerance: 0.6,
            sample_interval: 1,
            frame_delay: Duration::from_millis(5),
        },
        roster_ttl: chrono::Duration::minutes(30),
        stop_timeout: Duration::from_secs(1),
    }
}

/// Fully faked test harness around a real registry
pub struct Harness {
    pub video: Arc<VideoLog>,
    pub roster: Arc<ScriptedRoster>,
    pub sink: Arc<CountingSink>,
    pub registry: Arc<RoomRegistry>,
}

impl Harness {
    pub fn new() -> Self {
        let (video, log) = RecordingVideo::new();
        let roster = Arc::new(ScriptedRoster::new());
        let sink = Arc::new(CountingSink::new());

        let deps = SessionDeps {
            video: Arc::new(video),
            detector: Arc::new(OneFaceDetector),
            roster_backend: roster.clone(),
            report_sink: sink.clone(),
        };

        let registry = Arc::new(RoomRegistry::new(deps, fast_settings()));

        Self {
            video: log,
            roster,
            sink,
            registry,
        }
    }
}
