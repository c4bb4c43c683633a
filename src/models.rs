//! Shared models and types for the salon monitor
//!
//! This module contains types shared across multiple modules
//! to avoid circular dependencies.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Fixed-length face embedding vector (128 dims from the detection service)
pub type Embedding = Vec<f64>;

/// Standard API response wrapper
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub backend_connected: bool,
    pub face_api_connected: bool,
    pub active_rooms: usize,
}

/// One known face eligible for matching in a room
///
/// Wire names (`id`, `encoding`) match the backend roster payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RosterEntry {
    #[serde(rename = "id")]
    pub identity: i64,
    #[serde(rename = "encoding")]
    pub embedding: Embedding,
}

/// One recognized face in one frame: known identity + embedding distance
///
/// Serialized as `{"id": .., "dist": ..}` for the attendance report payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchResult {
    #[serde(rename = "id")]
    pub identity: i64,
    #[serde(rename = "dist")]
    pub distance: f64,
}

/// One entry of the external active-camera directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveRoom {
    /// Opaque external room identifier (matricula_id upstream)
    pub room_id: String,
    /// Address of the room's video stream
    pub source_locator: String,
    /// Human-readable room label, informational only
    pub display_code: String,
}

/// Timestamped report of recognized faces for one room
#[derive(Debug, Clone, Serialize)]
pub struct AttendanceReport {
    pub matricula_id: String,
    pub rostros_detectados: Vec<MatchResult>,
    pub captura: DateTime<Utc>,
}
