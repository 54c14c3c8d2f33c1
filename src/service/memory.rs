//! In-memory collaborator implementations
//!
//! Capped per-room history without disk persistence. Used by the binary for
//! single-process deployments and by the test suite.

use std::collections::{HashMap, HashSet, VecDeque};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{RelayError, Result};
use crate::service::{
    ChatMessage, DeletionReceipt, DirectoryUser, MessageDraft, MessageService, ReactionReceipt,
    UserDirectory,
};

/// Maximum messages retained per room
const DEFAULT_HISTORY_CAP: usize = 1000;

struct RoomState {
    participants: HashSet<String>,
    messages: VecDeque<ChatMessage>,
    /// user id -> timestamp of last read
    read_cursors: HashMap<String, chrono::DateTime<Utc>>,
}

impl RoomState {
    fn new() -> Self {
        Self {
            participants: HashSet::new(),
            messages: VecDeque::new(),
            read_cursors: HashMap::new(),
        }
    }
}

#[derive(Default)]
struct ServiceState {
    rooms: HashMap<String, RoomState>,
    /// message id -> room id
    message_rooms: HashMap<String, String>,
    /// message id -> emoji -> reacting user ids
    reactions: HashMap<String, HashMap<String, HashSet<String>>>,
}

/// In-memory message service with capped per-room history
pub struct InMemoryMessageService {
    state: RwLock<ServiceState>,
    history_cap: usize,
}

impl InMemoryMessageService {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(ServiceState::default()),
            history_cap: DEFAULT_HISTORY_CAP,
        }
    }

    /// Seed a room and its participant set
    pub async fn add_room(&self, room_id: &str, participants: &[&str]) {
        let mut state = self.state.write().await;
        let room = state
            .rooms
            .entry(room_id.to_string())
            .or_insert_with(RoomState::new);
        for user in participants {
            room.participants.insert(user.to_string());
        }
    }

    pub async fn message_count(&self, room_id: &str) -> usize {
        let state = self.state.read().await;
        state.rooms.get(room_id).map_or(0, |room| room.messages.len())
    }
}

impl Default for InMemoryMessageService {
    fn default() -> Self {
        Self::new()
    }
}

fn require_participant(room: &RoomState, user_id: &str, room_id: &str) -> Result<()> {
    if room.participants.contains(user_id) {
        Ok(())
    } else {
        Err(RelayError::NotAParticipant {
            user_id: user_id.to_string(),
            room_id: room_id.to_string(),
        })
    }
}

#[async_trait]
impl MessageService for InMemoryMessageService {
    async fn send_message(
        &self,
        sender_id: &str,
        sender_name: &str,
        draft: MessageDraft,
    ) -> Result<ChatMessage> {
        let mut guard = self.state.write().await;
        let state = &mut *guard;
        let room = state
            .rooms
            .get_mut(&draft.room_id)
            .ok_or_else(|| RelayError::ServiceError(format!("unknown room {}", draft.room_id)))?;
        require_participant(room, sender_id, &draft.room_id)?;

        let message = ChatMessage {
            id: Uuid::new_v4().to_string(),
            room_id: draft.room_id.clone(),
            sender_id: sender_id.to_string(),
            sender_name: sender_name.to_string(),
            content: draft.content,
            message_type: draft.message_type,
            attachments: draft.attachments,
            reply_to_id: draft.reply_to_id,
            thread_id: draft.thread_id,
            created_at: Utc::now(),
            edited_at: None,
        };

        // Capped history: drop the oldest message and its indices
        if room.messages.len() >= self.history_cap {
            if let Some(expired) = room.messages.pop_front() {
                state.message_rooms.remove(&expired.id);
                state.reactions.remove(&expired.id);
            }
        }
        room.messages.push_back(message.clone());
        state
            .message_rooms
            .insert(message.id.clone(), draft.room_id.clone());

        Ok(message)
    }

    async fn edit_message(
        &self,
        user_id: &str,
        message_id: &str,
        content: &str,
    ) -> Result<ChatMessage> {
        let mut state = self.state.write().await;
        let room_id = state
            .message_rooms
            .get(message_id)
            .cloned()
            .ok_or_else(|| RelayError::MessageNotFound(message_id.to_string()))?;
        let room = state
            .rooms
            .get_mut(&room_id)
            .ok_or_else(|| RelayError::MessageNotFound(message_id.to_string()))?;

        let message = room
            .messages
            .iter_mut()
            .find(|m| m.id == message_id)
            .ok_or_else(|| RelayError::MessageNotFound(message_id.to_string()))?;
        if message.sender_id != user_id {
            return Err(RelayError::Unauthorized);
        }
        message.content = content.to_string();
        message.edited_at = Some(Utc::now());
        Ok(message.clone())
    }

    async fn delete_message(
        &self,
        user_id: &str,
        message_id: &str,
        for_everyone: bool,
    ) -> Result<DeletionReceipt> {
        let mut state = self.state.write().await;
        let room_id = state
            .message_rooms
            .get(message_id)
            .cloned()
            .ok_or_else(|| RelayError::MessageNotFound(message_id.to_string()))?;
        let room = state
            .rooms
            .get_mut(&room_id)
            .ok_or_else(|| RelayError::MessageNotFound(message_id.to_string()))?;

        let sender_id = room
            .messages
            .iter()
            .find(|m| m.id == message_id)
            .map(|m| m.sender_id.clone())
            .ok_or_else(|| RelayError::MessageNotFound(message_id.to_string()))?;
        if sender_id != user_id {
            return Err(RelayError::Unauthorized);
        }

        room.messages.retain(|m| m.id != message_id);
        state.message_rooms.remove(message_id);
        state.reactions.remove(message_id);

        Ok(DeletionReceipt {
            message_id: message_id.to_string(),
            room_id,
            for_everyone,
        })
    }

    async fn add_reaction(
        &self,
        user_id: &str,
        message_id: &str,
        emoji: &str,
    ) -> Result<ReactionReceipt> {
        let mut state = self.state.write().await;
        let room_id = state
            .message_rooms
            .get(message_id)
            .cloned()
            .ok_or_else(|| RelayError::MessageNotFound(message_id.to_string()))?;
        {
            let room = state
                .rooms
                .get(&room_id)
                .ok_or_else(|| RelayError::MessageNotFound(message_id.to_string()))?;
            require_participant(room, user_id, &room_id)?;
        }

        state
            .reactions
            .entry(message_id.to_string())
            .or_default()
            .entry(emoji.to_string())
            .or_default()
            .insert(user_id.to_string());

        Ok(ReactionReceipt {
            message_id: message_id.to_string(),
            room_id,
            user_id: user_id.to_string(),
            emoji: emoji.to_string(),
        })
    }

    async fn remove_reaction(
        &self,
        user_id: &str,
        message_id: &str,
        emoji: &str,
    ) -> Result<ReactionReceipt> {
        let mut state = self.state.write().await;
        let room_id = state
            .message_rooms
            .get(message_id)
            .cloned()
            .ok_or_else(|| RelayError::MessageNotFound(message_id.to_string()))?;

        if let Some(by_emoji) = state.reactions.get_mut(message_id) {
            if let Some(users) = by_emoji.get_mut(emoji) {
                users.remove(user_id);
                if users.is_empty() {
                    by_emoji.remove(emoji);
                }
            }
        }

        Ok(ReactionReceipt {
            message_id: message_id.to_string(),
            room_id,
            user_id: user_id.to_string(),
            emoji: emoji.to_string(),
        })
    }

    async fn is_participant(&self, user_id: &str, room_id: &str) -> Result<bool> {
        let state = self.state.read().await;
        Ok(state
            .rooms
            .get(room_id)
            .map_or(false, |room| room.participants.contains(user_id)))
    }

    async fn list_user_rooms(&self, user_id: &str, limit: usize) -> Result<Vec<String>> {
        let state = self.state.read().await;
        let mut rooms: Vec<String> = state
            .rooms
            .iter()
            .filter(|(_, room)| room.participants.contains(user_id))
            .map(|(id, _)| id.clone())
            .collect();
        rooms.sort();
        rooms.truncate(limit);
        Ok(rooms)
    }

    async fn mark_read(&self, user_id: &str, room_id: &str) -> Result<()> {
        let mut state = self.state.write().await;
        if let Some(room) = state.rooms.get_mut(room_id) {
            room.read_cursors.insert(user_id.to_string(), Utc::now());
        }
        Ok(())
    }
}

/// Static in-memory identity directory
pub struct InMemoryUserDirectory {
    users: RwLock<HashMap<String, DirectoryUser>>,
}

impl InMemoryUserDirectory {
    pub fn new() -> Self {
        Self {
            users: RwLock::new(HashMap::new()),
        }
    }

    pub async fn add_user(&self, id: &str, display_name: &str, active: bool) {
        let mut users = self.users.write().await;
        users.insert(
            id.to_string(),
            DirectoryUser {
                id: id.to_string(),
                display_name: display_name.to_string(),
                active,
            },
        );
    }
}

impl Default for InMemoryUserDirectory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UserDirectory for InMemoryUserDirectory {
    async fn lookup(&self, user_id: &str) -> Result<Option<DirectoryUser>> {
        let users = self.users.read().await;
        Ok(users.get(user_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft(room_id: &str, content: &str) -> MessageDraft {
        MessageDraft {
            room_id: room_id.to_string(),
            content: content.to_string(),
            message_type: "text".to_string(),
            reply_to_id: None,
            thread_id: None,
            attachments: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_send_requires_participancy() {
        let service = InMemoryMessageService::new();
        service.add_room("r1", &["alice"]).await;

        assert!(service.send_message("alice", "Alice", draft("r1", "hi")).await.is_ok());
        let denied = service.send_message("mallory", "Mallory", draft("r1", "hi")).await;
        assert!(matches!(denied, Err(RelayError::NotAParticipant { .. })));
    }

    #[tokio::test]
    async fn test_edit_and_delete_own_messages_only() {
        let service = InMemoryMessageService::new();
        service.add_room("r1", &["alice", "bob"]).await;
        let message = service.send_message("alice", "Alice", draft("r1", "hi")).await.unwrap();

        assert!(matches!(
            service.edit_message("bob", &message.id, "hijacked").await,
            Err(RelayError::Unauthorized)
        ));

        let edited = service.edit_message("alice", &message.id, "hello").await.unwrap();
        assert_eq!(edited.content, "hello");
        assert!(edited.edited_at.is_some());

        let receipt = service.delete_message("alice", &message.id, true).await.unwrap();
        assert_eq!(receipt.room_id, "r1");
        assert!(matches!(
            service.edit_message("alice", &message.id, "gone").await,
            Err(RelayError::MessageNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_reactions_round_trip() {
        let service = InMemoryMessageService::new();
        service.add_room("r1", &["alice", "bob"]).await;
        let message = service.send_message("alice", "Alice", draft("r1", "hi")).await.unwrap();

        let added = service.add_reaction("bob", &message.id, "👍").await.unwrap();
        assert_eq!(added.room_id, "r1");
        let removed = service.remove_reaction("bob", &message.id, "👍").await.unwrap();
        assert_eq!(removed.emoji, "👍");
    }

    #[tokio::test]
    async fn test_list_user_rooms_is_bounded() {
        let service = InMemoryMessageService::new();
        for i in 0..5 {
            service.add_room(&format!("r{}", i), &["alice"]).await;
        }
        let rooms = service.list_user_rooms("alice", 3).await.unwrap();
        assert_eq!(rooms.len(), 3);
    }
}
