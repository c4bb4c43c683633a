//! Salon Monitor Library
//!
//! Classroom attendance camserver: supervises one monitoring task per
//! active room, matches detected faces against a per-room roster and
//! reports attendance to the backend.
//!
//! ## Architecture (8 Components)
//!
//! 1. RoomRegistry - room_id -> RoomSession lifecycle map
//! 2. RoomSession - one supervised monitoring loop per room
//! 3. RosterCache - per-room known-face cache with TTL
//! 4. RoomSyncService - reconciliation against the backend camera directory
//! 5. BackendClient - roster / directory / attendance adapter
//! 6. FaceClient - detection service adapter + embedding compare
//! 7. VideoSource - MJPEG stream acquisition
//! 8. WebAPI - REST admin endpoints
//!
//! ## Design Principles
//!
//! - The backend camera directory is the single source of truth for the
//!   set of rooms; the registry is eventually consistent with it
//! - Failure isolation: one room's stream or backend failure never
//!   affects another room
//! - Everything reachable from a session (cache, stats, stream handle)
//!   is owned by that session's task; others read snapshots only

pub mod backend_client;
pub mod error;
pub mod face_client;
pub mod models;
pub mod room_registry;
pub mod room_session;
pub mod room_sync;
pub mod roster_cache;
pub mod state;
pub mod video_source;
pub mod web_api;

pub use error::{Error, Result};
pub use state::AppState;
