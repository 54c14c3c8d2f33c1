//! Presence and typing tracker
//!
//! Ephemeral per-room typing sets. Every start is guarded by a monotonically
//! increasing token: the expiry timer scheduled for a start only fires its
//! removal if no later start or stop superseded it, so the auto-expiry
//! broadcast happens exactly once even when timers and stops race.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use log::trace;

struct TypingEntry {
    deadline: Instant,
    token: u64,
}

/// Per-room typing sets with timed auto-expiry
pub struct TypingTracker {
    /// room id -> user id -> entry
    rooms: HashMap<String, HashMap<String, TypingEntry>>,
    timeout: Duration,
    next_token: u64,
}

impl TypingTracker {
    pub fn new(timeout: Duration) -> Self {
        Self {
            rooms: HashMap::new(),
            timeout,
            next_token: 0,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Mark a user as typing in a room.
    ///
    /// Returns the token guarding this start, plus whether the user was not
    /// already typing (i.e. a typing-start broadcast is due).
    pub fn start_typing(&mut self, room_id: &str, user_id: &str) -> (u64, bool) {
        self.next_token += 1;
        let token = self.next_token;
        let entry = TypingEntry {
            deadline: Instant::now() + self.timeout,
            token,
        };
        let was_absent = self
            .rooms
            .entry(room_id.to_string())
            .or_default()
            .insert(user_id.to_string(), entry)
            .is_none();
        trace!("typing start: room={} user={} token={}", room_id, user_id, token);
        (token, was_absent)
    }

    /// Explicitly stop typing. Returns true if the user was in the set
    /// (i.e. a typing-stop broadcast is due). Supersedes any pending timer.
    pub fn stop_typing(&mut self, room_id: &str, user_id: &str) -> bool {
        let removed = match self.rooms.get_mut(room_id) {
            Some(users) => users.remove(user_id).is_some(),
            None => false,
        };
        self.prune_room(room_id);
        removed
    }

    /// Timer callback: remove the user only if the entry still belongs to the
    /// start that scheduled this timer. Returns true when the removal (and
    /// its typing-stop broadcast) should happen.
    pub fn expire_if_current(&mut self, room_id: &str, user_id: &str, token: u64) -> bool {
        let expired = match self.rooms.get_mut(room_id) {
            Some(users) => match users.get(user_id) {
                Some(entry) if entry.token == token => {
                    users.remove(user_id);
                    true
                }
                _ => false,
            },
            None => false,
        };
        self.prune_room(room_id);
        if expired {
            trace!("typing expired: room={} user={} token={}", room_id, user_id, token);
        }
        expired
    }

    /// Users currently typing in a room, excluding entries past their deadline
    pub fn typing_users(&self, room_id: &str) -> Vec<String> {
        let now = Instant::now();
        let mut users: Vec<String> = self
            .rooms
            .get(room_id)
            .map(|users| {
                users
                    .iter()
                    .filter(|(_, entry)| entry.deadline > now)
                    .map(|(user, _)| user.clone())
                    .collect()
            })
            .unwrap_or_default();
        users.sort();
        users
    }

    fn prune_room(&mut self, room_id: &str) {
        if self.rooms.get(room_id).map_or(false, |users| users.is_empty()) {
            self.rooms.remove(room_id);
        }
    }
}
