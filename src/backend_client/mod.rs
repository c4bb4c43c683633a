//! BackendClient - Attendance Backend Adapter
//!
//! ## Responsibilities
//!
//! - Fetch per-room face rosters (`GET /api/biometricos/matricula/{id}`)
//! - Fetch the active-camera directory (`GET /api/camaras/activas`)
//! - Report recognized faces (`POST /api/asistencias/registro-masivo`)
//!
//! The backend owns the authoritative room set; this adapter only decodes
//! its envelopes, it never interprets them.

use crate::error::{Error, Result};
use crate::models::{ActiveRoom, AttendanceReport, MatchResult, RosterEntry};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::time::Duration;

/// Roster provider boundary
#[async_trait]
pub trait RosterBackend: Send + Sync {
    async fn fetch_roster(&self, room_id: &str) -> Result<Vec<RosterEntry>>;
}

/// Active-camera directory boundary
#[async_trait]
pub trait DirectoryBackend: Send + Sync {
    async fn fetch_active_rooms(&self) -> Result<Vec<ActiveRoom>>;
}

/// Attendance reporting boundary (fire-and-forget from the session side)
#[async_trait]
pub trait ReportSink: Send + Sync {
    async fn report_matches(
        &self,
        room_id: &str,
        matches: &[MatchResult],
        captured_at: DateTime<Utc>,
    ) -> Result<()>;
}

/// Roster response envelope: `{"rostros": [...]}`
#[derive(Debug, Deserialize)]
struct RosterResponse {
    rostros: Vec<RosterEntry>,
}

/// Directory response envelope: `{"success": true, "data": [...]}`
#[derive(Debug, Deserialize)]
struct ActiveCamerasResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    data: Vec<ActiveCameraEntry>,
}

/// One camera row as the backend sends it
#[derive(Debug, Deserialize)]
struct ActiveCameraEntry {
    matricula_id: serde_json::Value,
    url_stream: String,
    matricula: MatriculaInfo,
}

#[derive(Debug, Deserialize)]
struct MatriculaInfo {
    codigo_matricula: String,
}

impl ActiveCameraEntry {
    /// Normalize to the internal directory entry
    ///
    /// `matricula_id` arrives as a number; the registry keys rooms by the
    /// string form of it.
    fn into_active_room(self) -> ActiveRoom {
        let room_id = match &self.matricula_id {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        ActiveRoom {
            room_id,
            source_locator: self.url_stream,
            display_code: self.matricula.codigo_matricula,
        }
    }
}

/// HTTP adapter for the attendance backend
pub struct BackendClient {
    client: reqwest::Client,
    base_url: String,
}

impl BackendClient {
    /// Create new backend client
    pub fn new(base_url: String) -> Self {
        Self::with_timeout(base_url, Duration::from_secs(10))
    }

    /// Create new backend client with custom timeout
    pub fn with_timeout(base_url: String, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("Failed to create HTTP client");

        Self { client, base_url }
    }

    /// Check backend reachability
    pub async fn health_check(&self) -> Result<bool> {
        let url = format!("{}/api/camaras/activas", self.base_url);
        match self.client.get(&url).send().await {
            Ok(resp) => Ok(resp.status().is_success()),
            Err(_) => Ok(false),
        }
    }

    /// Get base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl RosterBackend for BackendClient {
    async fn fetch_roster(&self, room_id: &str) -> Result<Vec<RosterEntry>> {
        let url = format!("{}/api/biometricos/matricula/{}", self.base_url, room_id);

        tracing::debug!(room_id = %room_id, "Fetching roster from backend");

        let resp = self.client.get(&url).send().await?;

        if !resp.status().is_success() {
            return Err(Error::Backend(format!(
                "roster fetch failed for room {}: HTTP {}",
                room_id,
                resp.status()
            )));
        }

        let body: RosterResponse = resp
            .json()
            .await
            .map_err(|e| Error::Parse(format!("roster response for room {}: {}", room_id, e)))?;

        Ok(body.rostros)
    }
}

#[async_trait]
impl DirectoryBackend for BackendClient {
    async fn fetch_active_rooms(&self) -> Result<Vec<ActiveRoom>> {
        let url = format!("{}/api/camaras/activas", self.base_url);

        tracing::debug!("Fetching active camera directory from backend");

        let resp = self.client.get(&url).send().await?;

        if !resp.status().is_success() {
            return Err(Error::Backend(format!(
                "active camera fetch failed: HTTP {}",
                resp.status()
            )));
        }

        let body: ActiveCamerasResponse = resp
            .json()
            .await
            .map_err(|e| Error::Parse(format!("active camera response: {}", e)))?;

        if !body.success {
            return Err(Error::Backend(
                "active camera response indicates failure".to_string(),
            ));
        }

        Ok(body
            .data
            .into_iter()
            .map(ActiveCameraEntry::into_active_room)
            .collect())
    }
}

#[async_trait]
impl ReportSink for BackendClient {
    async fn report_matches(
        &self,
        room_id: &str,
        matches: &[MatchResult],
        captured_at: DateTime<Utc>,
    ) -> Result<()> {
        let url = format!("{}/api/asistencias/registro-masivo", self.base_url);

        let report = AttendanceReport {
            matricula_id: room_id.to_string(),
            rostros_detectados: matches.to_vec(),
            captura: captured_at,
        };

        let resp = self.client.post(&url).json(&report).send().await?;

        if !resp.status().is_success() {
            return Err(Error::Backend(format!(
                "attendance report failed for room {}: HTTP {}",
                room_id,
                resp.status()
            )));
        }

        tracing::info!(
            room_id = %room_id,
            matches = matches.len(),
            "Attendance reported to backend"
        );

        Ok(())
    }
}
