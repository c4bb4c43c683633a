//! VideoSource - MJPEG Stream Acquisition
//!
//! ## Responsibilities
//!
//! - Open an HTTP MJPEG stream (ESP32-CAM style `http://host:81/stream`)
//! - Split individual JPEG frames out of the byte stream
//! - Explicit handle release so a session can prove it closed its stream
//!
//! One stream handle per room session; the handle is owned by the session
//! task and released unconditionally when the loop exits.

use crate::error::{Error, Result};
use async_trait::async_trait;
use bytes::{Buf, Bytes, BytesMut};
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use futures::StreamExt;
use std::time::Duration;

/// JPEG start-of-image marker
const JPEG_SOI: [u8; 2] = [0xFF, 0xD8];
/// JPEG end-of-image marker
const JPEG_EOI: [u8; 2] = [0xFF, 0xD9];

/// Cap on buffered bytes while hunting for a frame boundary (2 MiB)
const MAX_BUFFER_BYTES: usize = 2 * 1024 * 1024;

/// Per-chunk read timeout; a stalled camera counts as a read failure
const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(15);

/// One video frame (JPEG bytes) with its capture timestamp
#[derive(Debug, Clone)]
pub struct Frame {
    pub data: Vec<u8>,
    pub captured_at: DateTime<Utc>,
}

/// Factory boundary: open a stream for a locator
#[async_trait]
pub trait VideoSource: Send + Sync {
    async fn open(&self, locator: &str) -> Result<Box<dyn VideoStream>>;
}

/// An open stream handle
///
/// `read_frame` returns `Ok(None)` on a clean end of stream. `close` must
/// be called by the owner when the loop exits, error path included.
#[async_trait]
pub trait VideoStream: Send {
    async fn read_frame(&mut self) -> Result<Option<Frame>>;
    async fn close(&mut self);
}

/// MJPEG-over-HTTP video source
pub struct MjpegSource {
    client: reqwest::Client,
    read_timeout: Duration,
}

impl MjpegSource {
    /// Create new MJPEG source
    pub fn new() -> Self {
        Self::with_read_timeout(DEFAULT_READ_TIMEOUT)
    }

    /// Create with a custom per-chunk read timeout
    pub fn with_read_timeout(read_timeout: Duration) -> Self {
        // No overall timeout: the MJPEG connection is long-lived
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            read_timeout,
        }
    }
}

impl Default for MjpegSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VideoSource for MjpegSource {
    async fn open(&self, locator: &str) -> Result<Box<dyn VideoStream>> {
        let resp = self
            .client
            .get(locator)
            .send()
            .await
            .map_err(|e| Error::Stream(format!("cannot open stream {}: {}", locator, e)))?;

        if !resp.status().is_success() {
            return Err(Error::Stream(format!(
                "cannot open stream {}: HTTP {}",
                locator,
                resp.status()
            )));
        }

        tracing::debug!(locator = %locator, "MJPEG stream opened");

        Ok(Box::new(MjpegStream {
            locator: locator.to_string(),
            chunks: resp.bytes_stream().boxed(),
            buf: BytesMut::new(),
            read_timeout: self.read_timeout,
            closed: false,
        }))
    }
}

/// An open MJPEG stream
pub struct MjpegStream {
    locator: String,
    chunks: BoxStream<'static, reqwest::Result<Bytes>>,
    buf: BytesMut,
    read_timeout: Duration,
    closed: bool,
}

#[async_trait]
impl VideoStream for MjpegStream {
    async fn read_frame(&mut self) -> Result<Option<Frame>> {
        if self.closed {
            return Err(Error::Stream(format!(
                "stream {} already closed",
                self.locator
            )));
        }

        loop {
            if let Some(jpeg) = extract_frame(&mut self.buf) {
                return Ok(Some(Frame {
                    data: jpeg.to_vec(),
                    captured_at: Utc::now(),
                }));
            }

            if self.buf.len() > MAX_BUFFER_BYTES {
                return Err(Error::Stream(format!(
                    "no frame boundary within {} bytes on {}",
                    MAX_BUFFER_BYTES, self.locator
                )));
            }

            let chunk = tokio::time::timeout(self.read_timeout, self.chunks.next())
                .await
                .map_err(|_| {
                    Error::Stream(format!(
                        "read timeout after {:?} on {}",
                        self.read_timeout, self.locator
                    ))
                })?;

            match chunk {
                Some(Ok(bytes)) => self.buf.extend_from_slice(&bytes),
                Some(Err(e)) => {
                    return Err(Error::Stream(format!(
                        "read failed on {}: {}",
                        self.locator, e
                    )))
                }
                // End of stream
                None => return Ok(None),
            }
        }
    }

    async fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.buf.clear();
            tracing::debug!(locator = %self.locator, "MJPEG stream closed");
        }
    }
}

/// Pull the next complete JPEG out of the buffer, if any
///
/// Bytes before the first SOI marker (multipart boundaries, headers) are
/// discarded. Returns the frame including both markers.
fn extract_frame(buf: &mut BytesMut) -> Option<Bytes> {
    let soi = find_marker(buf, &JPEG_SOI)?;
    if soi > 0 {
        buf.advance(soi);
    }

    let eoi = find_marker(&buf[2..], &JPEG_EOI)? + 2;
    Some(buf.split_to(eoi + 2).freeze())
}

/// Index of the first occurrence of a two-byte marker
fn find_marker(haystack: &[u8], marker: &[u8; 2]) -> Option<usize> {
    haystack
        .windows(2)
        .position(|w| w[0] == marker[0] && w[1] == marker[1])
}
