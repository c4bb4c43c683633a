//! RoomRegistry - Room Lifecycle Map
//!
//! ## Responsibilities
//!
//! - Own the room_id -> RoomSession map
//! - Serialize structural changes (create/remove) against each other
//! - Snapshot reads (describe/list) that never block the monitoring loops
//! - Forced out-of-cycle roster refresh for one room
//!
//! ## Locking
//!
//! Two locks, two jobs: the `admission` mutex serializes whole create and
//! remove sequences (both await on network I/O or task join); the `rooms`
//! RwLock protects only map insert/remove/lookup and is never held across
//! any blocking call.

use crate::error::{Error, Result};
use crate::room_session::{
    MonitorSettings, RoomSession, RoomSnapshot, SessionDeps, DEFAULT_STOP_TIMEOUT,
};
use crate::roster_cache::{RosterCache, DEFAULT_TTL_MINUTES};
use chrono::Duration as ChronoDuration;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};

/// Registry-wide settings: loop tunables plus lifecycle bounds
#[derive(Debug, Clone)]
pub struct RegistrySettings {
    /// Monitoring loop tunables applied to every session
    pub monitor: MonitorSettings,
    /// Roster cache TTL applied to every room
    pub roster_ttl: ChronoDuration,
    /// Bound on waiting for a session to stop during remove()
    pub stop_timeout: Duration,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            monitor: MonitorSettings::default(),
            roster_ttl: ChronoDuration::minutes(DEFAULT_TTL_MINUTES),
            stop_timeout: DEFAULT_STOP_TIMEOUT,
        }
    }
}

/// Thread-safe map of active room sessions
pub struct RoomRegistry {
    rooms: RwLock<HashMap<String, Arc<RoomSession>>>,
    /// Serializes create/remove end to end
    admission: Mutex<()>,
    deps: SessionDeps,
    settings: RegistrySettings,
}

impl RoomRegistry {
    /// Create an empty registry
    pub fn new(deps: SessionDeps, settings: RegistrySettings) -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            admission: Mutex::new(()),
            deps,
            settings,
        }
    }

    /// Register a room and start monitoring it
    ///
    /// The initial roster load runs before anything is registered: if it
    /// fails the room stays absent and a later reconciliation pass can
    /// retry. Duplicate room_ids are rejected without touching the
    /// existing session.
    pub async fn create(
        &self,
        room_id: &str,
        source_locator: &str,
        display_code: &str,
    ) -> Result<()> {
        let _admission = self.admission.lock().await;

        {
            let rooms = self.rooms.read().await;
            if rooms.contains_key(room_id) {
                return Err(Error::Conflict(format!(
                    "room {} already registered",
                    room_id
                )));
            }
        }

        let roster = Arc::new(RosterCache::new(
            room_id.to_string(),
            self.settings.roster_ttl,
        ));

        // Initial load gates registration
        let entries = roster
            .refresh(self.deps.roster_backend.as_ref())
            .await
            .map_err(|e| {
                tracing::error!(
                    room_id = %room_id,
                    error = %e,
                    "Initial roster load failed, room not registered"
                );
                e
            })?;

        let session = Arc::new(RoomSession::spawn(
            room_id.to_string(),
            source_locator.to_string(),
            display_code.to_string(),
            roster,
            self.deps.clone(),
            self.settings.monitor.clone(),
        ));

        self.rooms
            .write()
            .await
            .insert(room_id.to_string(), session);

        tracing::info!(
            room_id = %room_id,
            display_code = %display_code,
            locator = %source_locator,
            roster_entries = entries,
            "Room registered and monitoring"
        );

        Ok(())
    }

    /// Stop a room's session and drop it from the registry
    ///
    /// Waits (bounded) for the loop to exit and release its stream before
    /// the entry disappears, so a follow-up create for the same room never
    /// overlaps the old session.
    pub async fn remove(&self, room_id: &str) -> Result<()> {
        let _admission = self.admission.lock().await;

        let session = {
            let rooms = self.rooms.read().await;
            rooms.get(room_id).cloned()
        }
        .ok_or_else(|| Error::NotFound(format!("room {} not registered", room_id)))?;

        session.shutdown(self.settings.stop_timeout).await;

        self.rooms.write().await.remove(room_id);

        tracing::info!(room_id = %room_id, "Room deregistered");
        Ok(())
    }

    /// Point-in-time snapshot of one room, or None if unknown
    pub async fn describe(&self, room_id: &str) -> Option<RoomSnapshot> {
        let session = {
            let rooms = self.rooms.read().await;
            rooms.get(room_id).cloned()
        }?;
        Some(session.snapshot().await)
    }

    /// Snapshot of the currently registered room ids
    pub async fn list(&self) -> Vec<String> {
        self.rooms.read().await.keys().cloned().collect()
    }

    /// Snapshots of all registered rooms
    pub async fn describe_all(&self) -> Vec<RoomSnapshot> {
        let sessions: Vec<Arc<RoomSession>> =
            self.rooms.read().await.values().cloned().collect();

        let mut snapshots = Vec::with_capacity(sessions.len());
        for session in sessions {
            snapshots.push(session.snapshot().await);
        }
        snapshots
    }

    /// Force an out-of-cycle roster refresh for one room
    ///
    /// Goes through the session's own cache, so the atomic-replace
    /// invariant is identical to the in-loop refresh path.
    pub async fn refresh_roster(&self, room_id: &str) -> Result<usize> {
        let session = {
            let rooms = self.rooms.read().await;
            rooms.get(room_id).cloned()
        }
        .ok_or_else(|| Error::NotFound(format!("room {} not registered", room_id)))?;

        session
            .roster()
            .refresh(self.deps.roster_backend.as_ref())
            .await
    }

    /// Number of registered rooms
    pub async fn len(&self) -> usize {
        self.rooms.read().await.len()
    }

    /// Whether the registry is empty
    pub async fn is_empty(&self) -> bool {
        self.rooms.read().await.is_empty()
    }
}
