//! RoomSyncService - Registry Reconciliation
//!
//! ## Responsibilities
//!
//! - Fetch the backend's active-camera directory and diff it against the
//!   registry: create missing rooms, restart relocated or dead ones,
//!   remove rooms the backend no longer lists
//! - Periodic scheduler (default 5 minutes) plus on-demand trigger
//! - Single-flight: an in-progress sync is never overlapped
//!
//! A directory fetch failure abandons the whole cycle with the registry
//! untouched; the next cycle retries. Per-room create failures within a
//! cycle are counted and retried next cycle, they do not stop the diff.

use crate::backend_client::DirectoryBackend;
use crate::error::{Error, Result};
use crate::models::ActiveRoom;
use crate::room_registry::RoomRegistry;
use crate::room_session::SessionState;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;

/// Default reconciliation interval: 5 minutes
pub const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(300);

/// Reconciliation scheduler state, readable via the admin API
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncState {
    /// Last successful sync
    pub last_sync_at: Option<DateTime<Utc>>,
    /// Sync currently in flight
    pub is_running: bool,
    /// Next scheduled periodic sync
    pub next_sync_at: Option<DateTime<Utc>>,
    /// Failures since the last success
    pub consecutive_failures: u32,
    /// Last error message
    pub last_error: Option<String>,
}

/// What one sync cycle did
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncSummary {
    pub created: usize,
    pub removed: usize,
    pub restarted: usize,
    pub unchanged: usize,
    pub create_failures: usize,
}

/// Reconciler: makes the registry match the backend directory
pub struct RoomSyncService {
    registry: Arc<RoomRegistry>,
    directory: Arc<dyn DirectoryBackend>,
    interval: Duration,
    state: RwLock<SyncState>,
    /// Single-flight guard
    flight: Mutex<()>,
}

impl RoomSyncService {
    /// Create with the default 5-minute interval
    pub fn new(registry: Arc<RoomRegistry>, directory: Arc<dyn DirectoryBackend>) -> Self {
        Self::with_interval(registry, directory, DEFAULT_SYNC_INTERVAL)
    }

    /// Create with a custom periodic interval
    pub fn with_interval(
        registry: Arc<RoomRegistry>,
        directory: Arc<dyn DirectoryBackend>,
        interval: Duration,
    ) -> Self {
        Self {
            registry,
            directory,
            interval,
            state: RwLock::new(SyncState::default()),
            flight: Mutex::new(()),
        }
    }

    /// Start the periodic scheduler (background task)
    ///
    /// The first pass runs immediately so the registry is populated at
    /// startup, then every `interval`.
    pub fn start_periodic_sync(self: Arc<Self>) -> JoinHandle<()> {
        tracing::info!(
            interval_secs = self.interval.as_secs(),
            "Starting periodic room sync scheduler"
        );

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            loop {
                // First tick fires immediately
                ticker.tick().await;

                {
                    let mut state = self.state.write().await;
                    state.next_sync_at = Some(
                        Utc::now()
                            + chrono::Duration::seconds(self.interval.as_secs() as i64),
                    );
                }

                match self.sync_once().await {
                    Ok(summary) => {
                        tracing::info!(
                            created = summary.created,
                            removed = summary.removed,
                            restarted = summary.restarted,
                            unchanged = summary.unchanged,
                            create_failures = summary.create_failures,
                            "Periodic room sync completed"
                        );
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Periodic room sync failed");
                    }
                }
            }
        })
    }

    /// Run one reconciliation cycle
    ///
    /// Returns Conflict if a sync is already in flight.
    pub async fn sync_once(&self) -> Result<SyncSummary> {
        let _flight = self
            .flight
            .try_lock()
            .map_err(|_| Error::Conflict("sync already in progress".to_string()))?;

        {
            let mut state = self.state.write().await;
            state.is_running = true;
        }

        let result = self.execute_sync().await;

        {
            let mut state = self.state.write().await;
            state.is_running = false;
            match &result {
                Ok(_) => {
                    state.last_sync_at = Some(Utc::now());
                    state.consecutive_failures = 0;
                    state.last_error = None;
                }
                Err(e) => {
                    state.consecutive_failures += 1;
                    state.last_error = Some(e.to_string());
                }
            }
        }

        result
    }

    /// Current scheduler state
    pub async fn state(&self) -> SyncState {
        self.state.read().await.clone()
    }

    /// The fetch + diff itself
    async fn execute_sync(&self) -> Result<SyncSummary> {
        tracing::debug!("Fetching active camera directory");

        // Cycle-local failure: registry stays untouched
        let active = self.directory.fetch_active_rooms().await?;

        let desired: HashMap<String, ActiveRoom> = active
            .into_iter()
            .map(|room| (room.room_id.clone(), room))
            .collect();

        let mut summary = SyncSummary::default();

        for (room_id, entry) in &desired {
            match self.registry.describe(room_id).await {
                None => {
                    tracing::info!(
                        room_id = %room_id,
                        display_code = %entry.display_code,
                        "New active camera, registering room"
                    );
                    match self
                        .registry
                        .create(room_id, &entry.source_locator, &entry.display_code)
                        .await
                    {
                        Ok(()) => summary.created += 1,
                        Err(e) => {
                            tracing::error!(
                                room_id = %room_id,
                                error = %e,
                                "Room create failed, will retry next cycle"
                            );
                            summary.create_failures += 1;
                        }
                    }
                }
                Some(snapshot) if snapshot.source_locator != entry.source_locator => {
                    // Never mutate a running session's locator in place:
                    // stop the old stream fully, then start on the new one
                    tracing::info!(
                        room_id = %room_id,
                        old = %snapshot.source_locator,
                        new = %entry.source_locator,
                        "Stream locator changed, restarting room"
                    );
                    if let Err(e) = self
                        .restart_room(room_id, &entry.source_locator, &entry.display_code)
                        .await
                    {
                        tracing::error!(room_id = %room_id, error = %e, "Room restart failed");
                        summary.create_failures += 1;
                    } else {
                        summary.restarted += 1;
                    }
                }
                Some(snapshot) if snapshot.state == SessionState::Stopped => {
                    // The session died (stream failure); the directory
                    // still lists the room, so recreate it this pass
                    tracing::warn!(
                        room_id = %room_id,
                        "Session dead but room still active, recreating"
                    );
                    if let Err(e) = self
                        .restart_room(room_id, &entry.source_locator, &entry.display_code)
                        .await
                    {
                        tracing::error!(room_id = %room_id, error = %e, "Room recreate failed");
                        summary.create_failures += 1;
                    } else {
                        summary.restarted += 1;
                    }
                }
                Some(_) => summary.unchanged += 1,
            }
        }

        // Rooms the backend no longer lists
        for room_id in self.registry.list().await {
            if !desired.contains_key(&room_id) {
                tracing::info!(room_id = %room_id, "Camera deactivated, removing room");
                match self.registry.remove(&room_id).await {
                    Ok(()) => summary.removed += 1,
                    Err(Error::NotFound(_)) => {}
                    Err(e) => {
                        tracing::error!(room_id = %room_id, error = %e, "Room remove failed");
                    }
                }
            }
        }

        let rooms = self.registry.len().await;
        tracing::debug!(rooms, "Reconciliation cycle finished");

        Ok(summary)
    }

    /// Remove then create; the remove guarantees the old stream is closed
    /// before the new one opens
    async fn restart_room(
        &self,
        room_id: &str,
        source_locator: &str,
        display_code: &str,
    ) -> Result<()> {
        self.registry.remove(room_id).await?;
        self.registry
            .create(room_id, source_locator, display_code)
            .await
    }
}
