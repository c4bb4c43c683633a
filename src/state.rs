//! Application state
//!
//! Holds all shared components and configuration

use crate::backend_client::BackendClient;
use crate::face_client::{FaceClient, DEFAULT_TOLERANCE};
use crate::room_registry::{RegistrySettings, RoomRegistry};
use crate::room_session::{
    MonitorSettings, SessionDeps, DEFAULT_FRAME_DELAY, DEFAULT_SAMPLE_INTERVAL,
    DEFAULT_STOP_TIMEOUT,
};
use crate::room_sync::{RoomSyncService, DEFAULT_SYNC_INTERVAL};
use crate::roster_cache::DEFAULT_TTL_MINUTES;
use crate::video_source::MjpegSource;
use std::sync::Arc;
use std::time::Duration;

/// Application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Attendance backend base URL
    pub backend_url: String,
    /// Face detection service base URL
    pub face_api_url: String,
    /// Maximum embedding distance accepted as a match
    pub match_tolerance: f64,
    /// Roster cache TTL in minutes
    pub roster_ttl_minutes: i64,
    /// Directory reconciliation interval in seconds
    pub sync_interval_secs: u64,
    /// Submit every Nth frame to detection
    pub frame_sample_interval: u64,
    /// Pause between monitoring loop iterations in milliseconds
    pub frame_delay_ms: u64,
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            backend_url: std::env::var("BACKEND_API_URL")
                .unwrap_or_else(|_| "http://localhost:8000".to_string()),
            face_api_url: std::env::var("FACE_API_URL")
                .unwrap_or_else(|_| "http://localhost:9000".to_string()),
            match_tolerance: std::env::var("MATCH_TOLERANCE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_TOLERANCE),
            roster_ttl_minutes: std::env::var("ROSTER_TTL_MINUTES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_TTL_MINUTES),
            sync_interval_secs: std::env::var("SYNC_INTERVAL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_SYNC_INTERVAL.as_secs()),
            frame_sample_interval: std::env::var("FRAME_SAMPLE_INTERVAL")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_SAMPLE_INTERVAL),
            frame_delay_ms: std::env::var("FRAME_DELAY_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_FRAME_DELAY.as_millis() as u64),
            host: std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: std::env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(8080),
        }
    }
}

impl AppConfig {
    /// Monitoring loop tunables derived from this config
    pub fn monitor_settings(&self) -> MonitorSettings {
        MonitorSettings {
            tolerance: self.match_tolerance,
            sample_interval: self.frame_sample_interval.max(1),
            frame_delay: Duration::from_millis(self.frame_delay_ms),
        }
    }

    /// Registry-wide settings derived from this config
    pub fn registry_settings(&self) -> RegistrySettings {
        RegistrySettings {
            monitor: self.monitor_settings(),
            roster_ttl: chrono::Duration::minutes(self.roster_ttl_minutes),
            stop_timeout: DEFAULT_STOP_TIMEOUT,
        }
    }
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Application config
    pub config: AppConfig,
    /// Attendance backend adapter (roster / directory / reports)
    pub backend: Arc<BackendClient>,
    /// Face detection service adapter
    pub face: Arc<FaceClient>,
    /// Room lifecycle map
    pub registry: Arc<RoomRegistry>,
    /// Directory reconciler
    pub sync: Arc<RoomSyncService>,
}

impl AppState {
    /// Wire up all components from config
    pub fn new(config: AppConfig) -> Self {
        let backend = Arc::new(BackendClient::new(config.backend_url.clone()));
        let face = Arc::new(FaceClient::new(config.face_api_url.clone()));
        let video = Arc::new(MjpegSource::new());

        let deps = SessionDeps {
            video,
            detector: face.clone(),
            roster_backend: backend.clone(),
            report_sink: backend.clone(),
        };

        let registry = Arc::new(RoomRegistry::new(deps, config.registry_settings()));
        let sync = Arc::new(RoomSyncService::with_interval(
            registry.clone(),
            backend.clone(),
            Duration::from_secs(config.sync_interval_secs),
        ));

        Self {
            config,
            backend,
            face,
            registry,
            sync,
        }
    }
}
