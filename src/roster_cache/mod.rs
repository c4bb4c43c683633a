//! RosterCache - Per-Room Known-Face Cache
//!
//! ## Responsibilities
//!
//! - Hold the room's known identities + embeddings with a refresh TTL
//! - Atomic replacement on refresh: entries and timestamp change together
//!   or not at all
//! - First-match-wins comparison for detected embeddings
//!
//! The cache is owned by its RoomSession. Other components only ever see
//! `snapshot()` (counts and timestamps) - embedding vectors never leave
//! the matching path.

use crate::backend_client::RosterBackend;
use crate::error::Result;
use crate::face_client::{compare_embeddings, is_match, DetectedFace};
use crate::models::{MatchResult, RosterEntry};
use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;

/// Default refresh interval: 30 minutes
pub const DEFAULT_TTL_MINUTES: i64 = 30;

/// Inner state replaced wholesale on every successful refresh
///
/// Entries stay in backend order (a Vec, not a map) so first-match-wins
/// is deterministic.
#[derive(Debug, Default)]
struct RosterState {
    entries: Vec<RosterEntry>,
    last_refreshed: Option<DateTime<Utc>>,
}

/// Read-only view for status reporting
#[derive(Debug, Clone, serde::Serialize)]
pub struct RosterSnapshot {
    pub entry_count: usize,
    pub last_refreshed: Option<DateTime<Utc>>,
}

/// Per-room roster cache with TTL
pub struct RosterCache {
    room_id: String,
    ttl: Duration,
    inner: RwLock<RosterState>,
}

impl RosterCache {
    /// Create an empty, never-refreshed cache
    pub fn new(room_id: String, ttl: Duration) -> Self {
        Self {
            room_id,
            ttl,
            inner: RwLock::new(RosterState::default()),
        }
    }

    /// Create with the default 30-minute TTL
    pub fn with_default_ttl(room_id: String) -> Self {
        Self::new(room_id, Duration::minutes(DEFAULT_TTL_MINUTES))
    }

    /// Whether the cache needs a refresh at `now`
    ///
    /// Never-refreshed counts as stale.
    pub async fn is_stale(&self, now: DateTime<Utc>) -> bool {
        let inner = self.inner.read().await;
        match inner.last_refreshed {
            None => true,
            Some(at) => now - at > self.ttl,
        }
    }

    /// Refresh from the backend
    ///
    /// Only a fully successful fetch mutates state, and then entries and
    /// timestamp are replaced under one write lock. Any fetch or parse
    /// error leaves the previous contents untouched.
    pub async fn refresh(&self, backend: &dyn RosterBackend) -> Result<usize> {
        let entries = backend.fetch_roster(&self.room_id).await?;
        let count = entries.len();

        {
            let mut inner = self.inner.write().await;
            *inner = RosterState {
                entries,
                last_refreshed: Some(Utc::now()),
            };
        }

        tracing::info!(
            room_id = %self.room_id,
            entries = count,
            "Roster cache refreshed"
        );

        Ok(count)
    }

    /// Compare detected faces against the roster
    ///
    /// Each detected face yields at most one MatchResult: the first cached
    /// identity (in enumeration order) whose distance is within tolerance.
    pub async fn match_faces(&self, faces: &[DetectedFace], tolerance: f64) -> Vec<MatchResult> {
        let inner = self.inner.read().await;
        let mut matches = Vec::new();

        for face in faces {
            for entry in &inner.entries {
                let distance = compare_embeddings(&entry.embedding, &face.embedding);
                if is_match(distance, tolerance) {
                    matches.push(MatchResult {
                        identity: entry.identity,
                        distance,
                    });
                    break;
                }
            }
        }

        matches
    }

    /// Point-in-time view for `describe()` - no embeddings exposed
    pub async fn snapshot(&self) -> RosterSnapshot {
        let inner = self.inner.read().await;
        RosterSnapshot {
            entry_count: inner.entries.len(),
            last_refreshed: inner.last_refreshed,
        }
    }

    /// Room this cache belongs to
    pub fn room_id(&self) -> &str {
        &self.room_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::face_client::FaceRegion;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct ScriptedRoster {
        entries: Vec<RosterEntry>,
        fail: AtomicBool,
    }

    #[async_trait]
    impl RosterBackend for ScriptedRoster {
        async fn fetch_roster(&self, room_id: &str) -> Result<Vec<RosterEntry>> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(Error::Backend(format!("roster fetch down for {}", room_id)));
            }
            Ok(self.entries.clone())
        }
    }

    fn entry(identity: i64, value: f64) -> RosterEntry {
        RosterEntry {
            identity,
            embedding: vec![value; 4],
        }
    }

    fn face(value: f64) -> DetectedFace {
        DetectedFace {
            region: FaceRegion {
                top: 0,
                right: 1,
                bottom: 1,
                left: 0,
            },
            embedding: vec![value; 4],
        }
    }

    #[tokio::test]
    async fn test_never_refreshed_is_stale() {
        let cache = RosterCache::with_default_ttl("2".to_string());
        assert!(cache.is_stale(Utc::now()).await);
    }

    #[tokio::test]
    async fn test_fresh_after_refresh_then_stale_after_ttl() {
        let cache = RosterCache::new("2".to_string(), Duration::minutes(30));
        let backend = ScriptedRoster {
            entries: vec![entry(1, 0.0)],
            fail: AtomicBool::new(false),
        };

        cache.refresh(&backend).await.unwrap();
        let now = Utc::now();
        assert!(!cache.is_stale(now).await);
        assert!(cache.is_stale(now + Duration::minutes(31)).await);
    }

    #[tokio::test]
    async fn test_failed_refresh_leaves_previous_state() {
        let cache = RosterCache::with_default_ttl("2".to_string());
        let backend = ScriptedRoster {
            entries: vec![entry(1, 0.0), entry(2, 1.0)],
            fail: AtomicBool::new(false),
        };

        cache.refresh(&backend).await.unwrap();
        let before = cache.snapshot().await;
        assert_eq!(before.entry_count, 2);

        backend.fail.store(true, Ordering::SeqCst);
        assert!(cache.refresh(&backend).await.is_err());

        let after = cache.snapshot().await;
        assert_eq!(after.entry_count, 2);
        assert_eq!(after.last_refreshed, before.last_refreshed);
    }

    #[tokio::test]
    async fn test_first_match_wins_in_enumeration_order() {
        let cache = RosterCache::with_default_ttl("2".to_string());
        // Both entries are within tolerance of the probe; the first must win
        let backend = ScriptedRoster {
            entries: vec![entry(10, 0.0), entry(20, 0.1)],
            fail: AtomicBool::new(false),
        };
        cache.refresh(&backend).await.unwrap();

        let matches = cache.match_faces(&[face(0.05)], 1.0).await;
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].identity, 10);
    }

    #[tokio::test]
    async fn test_no_match_outside_tolerance() {
        let cache = RosterCache::with_default_ttl("2".to_string());
        let backend = ScriptedRoster {
            entries: vec![entry(10, 0.0)],
            fail: AtomicBool::new(false),
        };
        cache.refresh(&backend).await.unwrap();

        let matches = cache.match_faces(&[face(5.0)], 0.6).await;
        assert!(matches.is_empty());
    }

    #[tokio::test]
    async fn test_one_match_per_detected_face() {
        let cache = RosterCache::with_default_ttl("2".to_string());
        let backend = ScriptedRoster {
            entries: vec![entry(10, 0.0), entry(20, 0.0)],
            fail: AtomicBool::new(false),
        };
        cache.refresh(&backend).await.unwrap();

        // Two detected faces, both matching: two results, never four
        let matches = cache.match_faces(&[face(0.0), face(0.01)], 1.0).await;
        assert_eq!(matches.len(), 2);
        assert!(matches.iter().all(|m| m.identity == 10));
    }
}
