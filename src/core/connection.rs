//! Connection state
//! Handles the lifecycle of a single client transport session

use log::warn;
use serde::Serialize;
use std::collections::HashSet;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use uuid::Uuid;
use warp::ws::Message;

/// Represents the state of a single live transport session
pub struct Connection {
    pub id: String,
    pub user_id: String,
    pub display_name: String,
    pub sender: mpsc::UnboundedSender<Message>,
    pub connected_at: Instant,
    pub last_activity: Instant,
    /// Room ids this connection has joined
    pub rooms: HashSet<String>,
}

impl Connection {
    /// Create a new connection with a unique ID
    pub fn new(user_id: String, display_name: String, sender: mpsc::UnboundedSender<Message>) -> Self {
        let now = Instant::now();
        Self {
            id: Uuid::new_v4().to_string(),
            user_id,
            display_name,
            sender,
            connected_at: now,
            last_activity: now,
            rooms: HashSet::new(),
        }
    }

    /// Serialize and push an event through this connection
    pub fn send_json<T: Serialize>(&self, event: &T) -> bool {
        let text = match serde_json::to_string(event) {
            Ok(text) => text,
            Err(e) => {
                warn!("Failed to serialize event for connection {}: {}", self.id, e);
                return false;
            }
        };
        match self.sender.send(Message::text(text)) {
            Ok(_) => true,
            Err(_) => {
                warn!("Failed to send event to connection {} (channel closed)", self.id);
                false
            }
        }
    }

    /// Best-effort close frame; the forward task tears down when the sender drops
    pub fn send_close(&self) {
        let _ = self.sender.send(Message::close());
    }

    /// Record activity on this connection
    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    /// Check if the connection is stale (no activity for a while)
    pub fn is_stale(&self, threshold: Duration) -> bool {
        self.last_activity.elapsed() > threshold
    }
}
