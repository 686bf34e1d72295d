//! Live room membership.
//!
//! Rooms are keyed by study group id and exist only while at least one session
//! occupies them. Both directions (room -> sessions for fan-out, session ->
//! rooms for disconnect cleanup) live behind one lock so they never disagree.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::events::SessionId;

#[derive(Debug, Default)]
struct Rooms {
    /// Room id -> occupying sessions.
    room_sessions: HashMap<String, HashSet<SessionId>>,
    /// Registered session -> rooms it occupies.
    session_rooms: HashMap<SessionId, HashSet<String>>,
}

/// Bidirectional room registry shared by every connection.
#[derive(Debug, Default)]
pub struct RoomRegistry {
    inner: Mutex<Rooms>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Rooms> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Track a new session. Only registered sessions can join rooms.
    pub fn register(&self, session_id: SessionId) {
        self.lock().session_rooms.entry(session_id).or_default();
    }

    /// Forget a session and drop it from every room it occupied.
    /// Returns the rooms it was in.
    pub fn unregister(&self, session_id: SessionId) -> Vec<String> {
        let mut rooms = self.lock();
        let Some(joined) = rooms.session_rooms.remove(&session_id) else {
            return Vec::new();
        };

        for room_id in &joined {
            if let Some(occupants) = rooms.room_sessions.get_mut(room_id) {
                occupants.remove(&session_id);
                if occupants.is_empty() {
                    rooms.room_sessions.remove(room_id);
                }
            }
        }

        joined.into_iter().collect()
    }

    /// Add a session to a room, creating the room on first occupant.
    ///
    /// Returns false if the session is not registered (it disconnected while
    /// its join was in flight).
    pub fn join(&self, room_id: &str, session_id: SessionId) -> bool {
        let mut rooms = self.lock();
        let Some(joined) = rooms.session_rooms.get_mut(&session_id) else {
            return false;
        };
        joined.insert(room_id.to_string());
        rooms
            .room_sessions
            .entry(room_id.to_string())
            .or_default()
            .insert(session_id);
        true
    }

    /// Remove a session from a room. Returns true if it was an occupant.
    pub fn leave(&self, room_id: &str, session_id: SessionId) -> bool {
        let mut rooms = self.lock();
        if let Some(joined) = rooms.session_rooms.get_mut(&session_id) {
            joined.remove(room_id);
        }

        let Some(occupants) = rooms.room_sessions.get_mut(room_id) else {
            return false;
        };
        let removed = occupants.remove(&session_id);
        if occupants.is_empty() {
            rooms.room_sessions.remove(room_id);
        }
        removed
    }

    /// Snapshot of a room's occupants, optionally without one session.
    pub fn occupants(&self, room_id: &str, exclude: Option<SessionId>) -> Vec<SessionId> {
        self.lock()
            .room_sessions
            .get(room_id)
            .map(|occupants| {
                occupants
                    .iter()
                    .copied()
                    .filter(|id| Some(*id) != exclude)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn contains(&self, room_id: &str, session_id: SessionId) -> bool {
        self.lock()
            .room_sessions
            .get(room_id)
            .is_some_and(|occupants| occupants.contains(&session_id))
    }

    pub fn rooms_of(&self, session_id: SessionId) -> Vec<String> {
        self.lock()
            .session_rooms
            .get(&session_id)
            .map(|joined| joined.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of live (occupied) rooms.
    pub fn room_count(&self) -> usize {
        self.lock().room_sessions.len()
    }
}
