//! External collaborator interfaces
//!
//! The relay core never owns chat business rules or persistence; it consumes
//! them through these narrow seams. Implementations may be backed by a
//! database, an RPC client, or the in-memory variant in [`memory`].

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

pub use memory::{InMemoryMessageService, InMemoryUserDirectory};

/// A persisted chat message as exposed on the wire
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub room_id: String,
    pub sender_id: String,
    pub sender_name: String,
    pub content: String,
    pub message_type: String,
    pub attachments: Vec<String>,
    pub reply_to_id: Option<String>,
    pub thread_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub edited_at: Option<DateTime<Utc>>,
}

/// Outbound message payload handed to the service for persistence
#[derive(Debug, Clone)]
pub struct MessageDraft {
    pub room_id: String,
    pub content: String,
    pub message_type: String,
    pub reply_to_id: Option<String>,
    pub thread_id: Option<String>,
    pub attachments: Vec<String>,
}

/// Receipt for a persisted deletion
#[derive(Debug, Clone)]
pub struct DeletionReceipt {
    pub message_id: String,
    pub room_id: String,
    pub for_everyone: bool,
}

/// Receipt for a persisted reaction change
#[derive(Debug, Clone)]
pub struct ReactionReceipt {
    pub message_id: String,
    pub room_id: String,
    pub user_id: String,
    pub emoji: String,
}

/// Chat persistence and business-rule collaborator
#[async_trait]
pub trait MessageService: Send + Sync {
    async fn send_message(
        &self,
        sender_id: &str,
        sender_name: &str,
        draft: MessageDraft,
    ) -> Result<ChatMessage>;

    async fn edit_message(&self, user_id: &str, message_id: &str, content: &str)
        -> Result<ChatMessage>;

    async fn delete_message(
        &self,
        user_id: &str,
        message_id: &str,
        for_everyone: bool,
    ) -> Result<DeletionReceipt>;

    async fn add_reaction(&self, user_id: &str, message_id: &str, emoji: &str)
        -> Result<ReactionReceipt>;

    async fn remove_reaction(&self, user_id: &str, message_id: &str, emoji: &str)
        -> Result<ReactionReceipt>;

    /// Source of truth for room participancy; the registry's room index is
    /// only a cache of this answer
    async fn is_participant(&self, user_id: &str, room_id: &str) -> Result<bool>;

    /// Rooms to auto-join at connect time, bounded by `limit`
    async fn list_user_rooms(&self, user_id: &str, limit: usize) -> Result<Vec<String>>;

    /// Mark recent messages in the room as read for the user
    async fn mark_read(&self, user_id: &str, room_id: &str) -> Result<()>;
}

/// A user record from the identity directory
#[derive(Debug, Clone)]
pub struct DirectoryUser {
    pub id: String,
    pub display_name: String,
    pub active: bool,
}

/// Identity directory collaborator, consulted after credential validation
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn lookup(&self, user_id: &str) -> Result<Option<DirectoryUser>>;
}
