//! Wire-level event surface for the realtime protocol

use serde::{Deserialize, Serialize};

use crate::service::ChatMessage;

/// Client-to-server events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    /// Join a chat room (membership re-validated against the message service)
    #[serde(rename = "join_chat")]
    JoinChat { room_id: String },

    /// Leave a chat room
    #[serde(rename = "leave_chat")]
    LeaveChat { room_id: String },

    /// Send a message to a room
    #[serde(rename = "send_message")]
    SendMessage {
        room_id: String,
        content: String,
        message_type: Option<String>,
        reply_to_id: Option<String>,
        thread_id: Option<String>,
        attachments: Option<Vec<String>>,
        /// Client-supplied id echoed back in the ack for optimistic UIs
        temp_id: Option<String>,
    },

    /// Edit an existing message
    #[serde(rename = "edit_message")]
    EditMessage { message_id: String, content: String },

    /// Delete a message
    #[serde(rename = "delete_message")]
    DeleteMessage {
        message_id: String,
        for_everyone: Option<bool>,
    },

    /// Start composing in a room
    #[serde(rename = "typing_start")]
    TypingStart { room_id: String },

    /// Stop composing in a room
    #[serde(rename = "typing_stop")]
    TypingStop { room_id: String },

    /// React to a message
    #[serde(rename = "add_reaction")]
    AddReaction { message_id: String, emoji: String },

    /// Remove a reaction from a message
    #[serde(rename = "remove_reaction")]
    RemoveReaction { message_id: String, emoji: String },
}

/// Server-to-client events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    /// Connection established and registered
    #[serde(rename = "connected")]
    Connected {
        connection_id: String,
        user_id: String,
        display_name: String,
        joined_rooms: Vec<String>,
    },

    /// New message fan-out
    #[serde(rename = "new_message")]
    NewMessage { message: ChatMessage },

    /// Ack for a sent message, correlated to the client's temp id
    #[serde(rename = "message_sent")]
    MessageSent {
        temp_id: Option<String>,
        message_id: String,
        room_id: String,
    },

    /// Message edit fan-out
    #[serde(rename = "message_edited")]
    MessageEdited { message: ChatMessage },

    /// Message deletion fan-out
    #[serde(rename = "message_deleted")]
    MessageDeleted {
        message_id: String,
        room_id: String,
        for_everyone: bool,
    },

    /// Typing indicator change
    #[serde(rename = "user_typing")]
    UserTyping {
        room_id: String,
        user_id: String,
        is_typing: bool,
    },

    /// Reaction added fan-out
    #[serde(rename = "reaction_added")]
    ReactionAdded {
        message_id: String,
        room_id: String,
        user_id: String,
        emoji: String,
    },

    /// Reaction removed fan-out
    #[serde(rename = "reaction_removed")]
    ReactionRemoved {
        message_id: String,
        room_id: String,
        user_id: String,
        emoji: String,
    },

    /// Join confirmation to the requesting connection
    #[serde(rename = "chat_joined")]
    ChatJoined { room_id: String },

    /// Leave confirmation to the requesting connection
    #[serde(rename = "chat_left")]
    ChatLeft { room_id: String },

    /// Distinct users currently online in a room
    #[serde(rename = "online_users_update")]
    OnlineUsersUpdate { room_id: String, users: Vec<String> },

    /// Failure correlated to a client-supplied temp id
    #[serde(rename = "message_error")]
    MessageError {
        temp_id: Option<String>,
        error: String,
    },

    /// Authentication failure
    #[serde(rename = "auth_error")]
    AuthError { message: String },

    /// Generic error scoped to the originating connection
    #[serde(rename = "error")]
    Error { code: String, message: String },
}
