//! FaceClient - Face Detection Service Adapter
//!
//! ## Responsibilities
//!
//! - Send detection requests to the face service (multipart JPEG upload)
//! - Parse face regions + 128-dim embeddings from the response
//! - Embedding comparison (Euclidean distance, tolerance rule)
//!
//! Detection runs remotely; comparison is pure local math so the matching
//! loop never leaves the process.

use crate::error::{Error, Result};
use crate::models::Embedding;
use crate::video_source::Frame;
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default match tolerance (face_recognition convention)
pub const DEFAULT_TOLERANCE: f64 = 0.6;

/// Pixel bounds of one detected face
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FaceRegion {
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
    pub left: i32,
}

/// One face found in a frame: where it is and its embedding
#[derive(Debug, Clone, Deserialize)]
pub struct DetectedFace {
    pub region: FaceRegion,
    #[serde(rename = "encoding")]
    pub embedding: Embedding,
}

/// Detection service response (`POST /v1/detect`)
#[derive(Debug, Clone, Deserialize)]
pub struct DetectResponse {
    pub count: usize,
    #[serde(default)]
    pub faces: Vec<DetectedFace>,
}

/// Detection primitive boundary: given a frame, return detected faces
#[async_trait]
pub trait FaceDetector: Send + Sync {
    async fn detect(&self, frame: &Frame) -> Result<Vec<DetectedFace>>;
}

/// Euclidean distance between two embeddings
///
/// Mismatched lengths yield infinity so the pair can never match.
pub fn compare_embeddings(a: &[f64], b: &[f64]) -> f64 {
    if a.len() != b.len() {
        return f64::INFINITY;
    }
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f64>()
        .sqrt()
}

/// Tolerance rule: a distance at or below the tolerance is a match
pub fn is_match(distance: f64, tolerance: f64) -> bool {
    distance <= tolerance
}

/// HTTP adapter for the face detection service
pub struct FaceClient {
    client: reqwest::Client,
    base_url: String,
}

impl FaceClient {
    /// Create new face client
    pub fn new(base_url: String) -> Self {
        Self::with_timeout(base_url, Duration::from_secs(30))
    }

    /// Create new face client with custom timeout
    pub fn with_timeout(base_url: String, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("Failed to create HTTP client");

        Self { client, base_url }
    }

    /// Check detection service health
    pub async fn health_check(&self) -> Result<bool> {
        let url = format!("{}/healthz", self.base_url);
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
impl FaceDetector for FaceClient {
    async fn detect(&self, frame: &Frame) -> Result<Vec<DetectedFace>> {
        let url = format!("{}/v1/detect", self.base_url);

        let form = Form::new().part(
            "file",
            Part::bytes(frame.data.clone())
                .file_name("frame.jpg")
                .mime_str("image/jpeg")?,
        );

        let resp = self.client.post(&url).multipart(form).send().await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Detection(format!(
                "face service detect failed: {} - {}",
                status, body
            )));
        }

        let result: DetectResponse = resp.json().await?;

        tracing::trace!(
            count = result.count,
            captured_at = %frame.captured_at,
            "Detection response received"
        );

        Ok(result.faces)
    }
}
