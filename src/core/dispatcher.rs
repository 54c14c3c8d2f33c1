//! Protocol state machine: routes inbound client events through
//! rate limiting, validation and authorization, delegates business effects
//! to the message service, and fans results out to rooms.
//!
//! Handlers yield at collaborator calls, so any registry-dependent decision
//! taken before an await is re-verified after it. Errors are isolated to the
//! originating connection; the read loop never dies on a bad event.

use std::sync::Arc;

use log::{debug, warn};
use tokio::sync::mpsc;
use warp::ws::Message as WsMessage;

use crate::auth::UserIdentity;
use crate::constants::MAX_EVENT_BYTES;
use crate::core::events::{ClientEvent, ServerEvent};
use crate::core::hub::RelayHub;
use crate::core::rate_limiter::ActionClass;
use crate::error::{RelayError, Result};
use crate::service::{MessageDraft, MessageService};

pub struct Dispatcher {
    hub: Arc<RelayHub>,
    service: Arc<dyn MessageService>,
}

impl Dispatcher {
    pub fn new(hub: Arc<RelayHub>, service: Arc<dyn MessageService>) -> Self {
        Self { hub, service }
    }

    pub fn hub(&self) -> &Arc<RelayHub> {
        &self.hub
    }

    /// Register an authenticated connection and auto-join its recent rooms
    pub async fn handle_connect(
        &self,
        identity: &UserIdentity,
        sender: mpsc::UnboundedSender<WsMessage>,
    ) -> Result<String> {
        let connection_id = self
            .hub
            .register_connection(&identity.user_id, &identity.display_name, sender)
            .await?;

        let rooms = match self
            .service
            .list_user_rooms(&identity.user_id, self.hub.config().max_auto_join_chats)
            .await
        {
            Ok(rooms) => rooms,
            Err(e) => {
                warn!("Auto-join lookup failed for user {}: {}", identity.user_id, e);
                Vec::new()
            }
        };

        let mut joined_rooms = Vec::new();
        for room_id in rooms {
            match self.hub.join_room(&connection_id, &room_id).await {
                Ok(()) => joined_rooms.push(room_id),
                // The connection may have been evicted while we awaited
                Err(RelayError::ConnectionNotFound(_)) => break,
                Err(e) => warn!("Auto-join of room {} failed: {}", room_id, e),
            }
        }

        self.hub
            .send_to_connection(
                &connection_id,
                &ServerEvent::Connected {
                    connection_id: connection_id.clone(),
                    user_id: identity.user_id.clone(),
                    display_name: identity.display_name.clone(),
                    joined_rooms,
                },
            )
            .await;

        Ok(connection_id)
    }

    /// Voluntary or forced disconnect; idempotent
    pub async fn handle_disconnect(&self, connection_id: &str) {
        self.hub.unregister_connection(connection_id).await;
    }

    /// Route one inbound frame. All failures are reported to the originating
    /// connection only and never propagate out of this method.
    pub async fn dispatch(&self, connection_id: &str, raw: &str) {
        if raw.len() > MAX_EVENT_BYTES {
            warn!(
                "Oversized frame from connection {}: {} bytes",
                connection_id,
                raw.len()
            );
            self.report_error(connection_id, &RelayError::EventTooLarge(raw.len()))
                .await;
            return;
        }

        let event: ClientEvent = match serde_json::from_str(raw) {
            Ok(event) => event,
            Err(e) => {
                debug!("Unparseable event from connection {}: {}", connection_id, e);
                self.report_error(connection_id, &RelayError::EventParseError(e.to_string()))
                    .await;
                return;
            }
        };

        // Identity is resolved at connect time; a missing entry means the
        // connection was unregistered while this frame was in flight
        let (user_id, display_name) = match self.hub.connection_identity(connection_id).await {
            Some(identity) => identity,
            None => return,
        };
        self.hub.touch(connection_id).await;

        let result = match event {
            ClientEvent::JoinChat { room_id } => {
                self.handle_join_chat(connection_id, &user_id, &room_id).await
            }
            ClientEvent::LeaveChat { room_id } => {
                self.handle_leave_chat(connection_id, &user_id, &room_id).await
            }
            ClientEvent::SendMessage {
                room_id,
                content,
                message_type,
                reply_to_id,
                thread_id,
                attachments,
                temp_id,
            } => {
                self.handle_send_message(
                    connection_id,
                    &user_id,
                    &display_name,
                    MessageDraft {
                        room_id,
                        content,
                        message_type: message_type.unwrap_or_else(|| "text".to_string()),
                        reply_to_id,
                        thread_id,
                        attachments: attachments.unwrap_or_default(),
                    },
                    temp_id,
                )
                .await
            }
            ClientEvent::EditMessage { message_id, content } => {
                self.handle_edit_message(connection_id, &user_id, &message_id, &content)
                    .await
            }
            ClientEvent::DeleteMessage {
                message_id,
                for_everyone,
            } => {
                self.handle_delete_message(
                    connection_id,
                    &user_id,
                    &message_id,
                    for_everyone.unwrap_or(false),
                )
                .await
            }
            ClientEvent::TypingStart { room_id } => {
                self.handle_typing(connection_id, &user_id, &room_id, true).await
            }
            ClientEvent::TypingStop { room_id } => {
                self.handle_typing(connection_id, &user_id, &room_id, false).await
            }
            ClientEvent::AddReaction { message_id, emoji } => {
                self.handle_reaction(connection_id, &user_id, &message_id, &emoji, true)
                    .await
            }
            ClientEvent::RemoveReaction { message_id, emoji } => {
                self.handle_reaction(connection_id, &user_id, &message_id, &emoji, false)
                    .await
            }
        };

        if let Err(e) = result {
            self.report_error(connection_id, &e).await;
        }
    }

    /// Join a room after re-validating participancy with the source of truth
    async fn handle_join_chat(
        &self,
        connection_id: &str,
        user_id: &str,
        room_id: &str,
    ) -> Result<()> {
        if !self.service.is_participant(user_id, room_id).await? {
            return Err(RelayError::NotAParticipant {
                user_id: user_id.to_string(),
                room_id: room_id.to_string(),
            });
        }

        // Connection may have gone away during the participancy check
        match self.hub.join_room(connection_id, room_id).await {
            Ok(()) => {}
            Err(RelayError::ConnectionNotFound(_)) => return Ok(()),
            Err(e) => return Err(e),
        }

        if let Err(e) = self.service.mark_read(user_id, room_id).await {
            warn!("mark_read failed for user {} in room {}: {}", user_id, room_id, e);
        }

        self.hub
            .send_to_connection(
                connection_id,
                &ServerEvent::ChatJoined {
                    room_id: room_id.to_string(),
                },
            )
            .await;
        Ok(())
    }

    async fn handle_leave_chat(
        &self,
        connection_id: &str,
        user_id: &str,
        room_id: &str,
    ) -> Result<()> {
        match self.hub.leave_room(connection_id, room_id).await {
            Ok(()) => {}
            Err(RelayError::ConnectionNotFound(_)) => return Ok(()),
            Err(e) => return Err(e),
        }

        // Clear the typing indicator if this was the user's last connection
        // in the room
        if !self.hub.users_in_room(room_id).await.contains(&user_id.to_string()) {
            self.hub.stop_typing(room_id, user_id).await;
        }

        self.hub
            .send_to_connection(
                connection_id,
                &ServerEvent::ChatLeft {
                    room_id: room_id.to_string(),
                },
            )
            .await;
        Ok(())
    }

    async fn handle_send_message(
        &self,
        connection_id: &str,
        user_id: &str,
        display_name: &str,
        draft: MessageDraft,
        temp_id: Option<String>,
    ) -> Result<()> {
        if !self.hub.try_consume(user_id, ActionClass::Message).await {
            self.send_message_error(connection_id, temp_id, "Message rate limit exceeded")
                .await;
            return Ok(());
        }

        if let Err(reason) = self.validate_draft(&draft) {
            self.send_message_error(connection_id, temp_id, &reason).await;
            return Ok(());
        }

        // Membership cache check before paying for the collaborator call
        if !self.hub.is_in_room(connection_id, &draft.room_id).await {
            self.send_message_error(connection_id, temp_id, "Not joined to this chat")
                .await;
            return Ok(());
        }

        let room_id = draft.room_id.clone();
        let message = match self.service.send_message(user_id, display_name, draft).await {
            Ok(message) => message,
            Err(e) => {
                warn!("send_message failed for user {}: {}", user_id, e);
                self.send_message_error(connection_id, temp_id, &e.to_string()).await;
                return Ok(());
            }
        };

        // Fan out to the room as it stands after the await; connections that
        // left or were unregistered mid-call are simply no longer in the
        // snapshot, and the ack below no-ops if the sender itself is gone
        self.hub
            .broadcast_to_room(
                &room_id,
                &ServerEvent::NewMessage {
                    message: message.clone(),
                },
                Some(connection_id),
            )
            .await;
        self.hub
            .send_to_connection(
                connection_id,
                &ServerEvent::MessageSent {
                    temp_id,
                    message_id: message.id.clone(),
                    room_id,
                },
            )
            .await;
        Ok(())
    }

    async fn handle_edit_message(
        &self,
        _connection_id: &str,
        user_id: &str,
        message_id: &str,
        content: &str,
    ) -> Result<()> {
        let config = self.hub.config();
        if content.trim().is_empty() {
            return Err(RelayError::ValidationError("Message cannot be empty".to_string()));
        }
        if content.chars().count() > config.max_message_length {
            return Err(RelayError::ValidationError(format!(
                "Message exceeds {} characters",
                config.max_message_length
            )));
        }

        let message = self.service.edit_message(user_id, message_id, content).await?;
        let room_id = message.room_id.clone();
        self.hub
            .broadcast_to_room(&room_id, &ServerEvent::MessageEdited { message }, None)
            .await;
        Ok(())
    }

    async fn handle_delete_message(
        &self,
        _connection_id: &str,
        user_id: &str,
        message_id: &str,
        for_everyone: bool,
    ) -> Result<()> {
        let receipt = self
            .service
            .delete_message(user_id, message_id, for_everyone)
            .await?;
        self.hub
            .broadcast_to_room(
                &receipt.room_id,
                &ServerEvent::MessageDeleted {
                    message_id: receipt.message_id,
                    room_id: receipt.room_id.clone(),
                    for_everyone: receipt.for_everyone,
                },
                None,
            )
            .await;
        Ok(())
    }

    async fn handle_typing(
        &self,
        connection_id: &str,
        user_id: &str,
        room_id: &str,
        is_typing: bool,
    ) -> Result<()> {
        if is_typing {
            if !self.hub.try_consume(user_id, ActionClass::Typing).await {
                return Err(RelayError::RateLimited("typing".to_string()));
            }
            if !self.hub.is_in_room(connection_id, room_id).await {
                return Err(RelayError::NotAParticipant {
                    user_id: user_id.to_string(),
                    room_id: room_id.to_string(),
                });
            }
            Arc::clone(&self.hub).start_typing(room_id, user_id).await;
        } else {
            self.hub.stop_typing(room_id, user_id).await;
        }
        Ok(())
    }

    async fn handle_reaction(
        &self,
        _connection_id: &str,
        user_id: &str,
        message_id: &str,
        emoji: &str,
        add: bool,
    ) -> Result<()> {
        if !self.hub.try_consume(user_id, ActionClass::Reaction).await {
            return Err(RelayError::RateLimited("reaction".to_string()));
        }
        if emoji.is_empty() || emoji.chars().count() > 16 {
            return Err(RelayError::ValidationError("Invalid emoji".to_string()));
        }

        let receipt = if add {
            self.service.add_reaction(user_id, message_id, emoji).await?
        } else {
            self.service.remove_reaction(user_id, message_id, emoji).await?
        };

        let event = if add {
            ServerEvent::ReactionAdded {
                message_id: receipt.message_id,
                room_id: receipt.room_id.clone(),
                user_id: receipt.user_id,
                emoji: receipt.emoji,
            }
        } else {
            ServerEvent::ReactionRemoved {
                message_id: receipt.message_id,
                room_id: receipt.room_id.clone(),
                user_id: receipt.user_id,
                emoji: receipt.emoji,
            }
        };
        self.hub.broadcast_to_room(&receipt.room_id, &event, None).await;
        Ok(())
    }

    fn validate_draft(&self, draft: &MessageDraft) -> std::result::Result<(), String> {
        let config = self.hub.config();
        if draft.content.trim().is_empty() {
            return Err("Message cannot be empty".to_string());
        }
        if draft.content.chars().count() > config.max_message_length {
            return Err(format!(
                "Message exceeds {} characters",
                config.max_message_length
            ));
        }
        if draft.attachments.len() > config.max_attachments {
            return Err(format!("At most {} attachments allowed", config.max_attachments));
        }
        Ok(())
    }

    async fn send_message_error(
        &self,
        connection_id: &str,
        temp_id: Option<String>,
        error: &str,
    ) {
        self.hub
            .send_to_connection(
                connection_id,
                &ServerEvent::MessageError {
                    temp_id,
                    error: error.to_string(),
                },
            )
            .await;
    }

    async fn send_error(&self, connection_id: &str, code: &str, message: &str) {
        self.hub
            .send_to_connection(
                connection_id,
                &ServerEvent::Error {
                    code: code.to_string(),
                    message: message.to_string(),
                },
            )
            .await;
    }

    /// Map a handler failure to the event surface, scoped to the origin
    async fn report_error(&self, connection_id: &str, error: &RelayError) {
        let (code, message) = match error {
            RelayError::NotAParticipant { .. } => {
                ("NOT_A_PARTICIPANT", "You are not a participant of this chat".to_string())
            }
            RelayError::RateLimited(class) => {
                ("RATE_LIMITED", format!("Rate limit exceeded for {} events", class))
            }
            RelayError::ValidationError(msg) => ("VALIDATION", msg.clone()),
            RelayError::EventTooLarge(_) => {
                ("EVENT_TOO_LARGE", "Event exceeds size limit".to_string())
            }
            RelayError::EventParseError(_) => {
                ("INVALID_EVENT", "Malformed event payload".to_string())
            }
            RelayError::Unauthorized => ("UNAUTHORIZED", "Not allowed".to_string()),
            RelayError::MessageNotFound(id) => {
                ("MESSAGE_NOT_FOUND", format!("Message {} not found", id))
            }
            other => {
                warn!("Handler error for connection {}: {}", connection_id, other);
                ("SERVICE_ERROR", "Request could not be completed".to_string())
            }
        };
        self.send_error(connection_id, code, &message).await;
    }
}
