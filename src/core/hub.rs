//! Relay hub: owns the session registry, rate counters and typing sets,
//! fans events out to rooms, and runs the periodic sweepers.
//!
//! All three stores live behind `RwLock`s with synchronous-only mutation
//! APIs; no lock is ever held across an await, so each mutation appears
//! atomic relative to other handlers.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio::time::interval;
use warp::ws::Message as WsMessage;

use crate::config::RelayConfig;
use crate::constants::MAX_EVICTIONS_PER_SWEEP;
use crate::core::connection::Connection;
use crate::core::events::ServerEvent;
use crate::core::rate_limiter::{ActionClass, RateLimiter};
use crate::core::registry::SessionRegistry;
use crate::core::typing::TypingTracker;
use crate::error::Result;

pub struct RelayHub {
    registry: RwLock<SessionRegistry>,
    rate_limiter: RwLock<RateLimiter>,
    typing: RwLock<TypingTracker>,
    config: RelayConfig,
}

impl RelayHub {
    pub fn new(config: RelayConfig) -> Self {
        Self {
            registry: RwLock::new(SessionRegistry::new(
                config.max_connections_per_user,
                config.max_connections_total,
            )),
            rate_limiter: RwLock::new(RateLimiter::new(
                config.messages_per_minute,
                config.reactions_per_minute,
                config.typing_events_per_minute,
            )),
            typing: RwLock::new(TypingTracker::new(config.typing_timeout)),
            config,
        }
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Register an authenticated connection. Evicted siblings (per-user cap)
    /// get a close frame and their rooms are notified.
    pub async fn register_connection(
        &self,
        user_id: &str,
        display_name: &str,
        sender: mpsc::UnboundedSender<WsMessage>,
    ) -> Result<String> {
        let connection = Connection::new(user_id.to_string(), display_name.to_string(), sender);
        let connection_id = connection.id.clone();

        let evicted = {
            let mut registry = self.registry.write().await;
            registry.register(connection)?
        };

        for old in &evicted {
            old.send_json(&ServerEvent::Error {
                code: "CONNECTION_EVICTED".to_string(),
                message: "Connection replaced by a newer session".to_string(),
            });
            old.send_close();
        }
        for old in evicted {
            self.after_connection_removed(old).await;
        }

        info!("Connection {} registered for user {}", connection_id, user_id);
        Ok(connection_id)
    }

    /// Remove a connection from every index. Idempotent; safe to call from
    /// the disconnect path and the liveness sweeper concurrently.
    pub async fn unregister_connection(&self, connection_id: &str) {
        let removed = {
            let mut registry = self.registry.write().await;
            registry.unregister(connection_id)
        };
        if let Some(connection) = removed {
            info!(
                "Connection {} unregistered (user {})",
                connection_id, connection.user_id
            );
            self.after_connection_removed(connection).await;
        }
    }

    /// Post-removal bookkeeping: notify rooms the connection had joined and
    /// clear typing state the user can no longer sustain there.
    async fn after_connection_removed(&self, connection: Connection) {
        for room_id in &connection.rooms {
            let user_still_present = {
                let registry = self.registry.read().await;
                registry
                    .users_in_room(room_id)
                    .contains(&connection.user_id)
            };
            if !user_still_present {
                let was_typing = {
                    let mut typing = self.typing.write().await;
                    typing.stop_typing(room_id, &connection.user_id)
                };
                if was_typing {
                    self.broadcast_to_room(
                        room_id,
                        &ServerEvent::UserTyping {
                            room_id: room_id.clone(),
                            user_id: connection.user_id.clone(),
                            is_typing: false,
                        },
                        None,
                    )
                    .await;
                }
            }
            self.broadcast_online_users(room_id).await;
        }
    }

    /// Add a connection to a room index and notify the room.
    /// Authorization must already have been verified by the caller.
    pub async fn join_room(&self, connection_id: &str, room_id: &str) -> Result<()> {
        {
            let mut registry = self.registry.write().await;
            registry.join_room(connection_id, room_id)?;
        }
        self.broadcast_online_users(room_id).await;
        Ok(())
    }

    pub async fn leave_room(&self, connection_id: &str, room_id: &str) -> Result<()> {
        {
            let mut registry = self.registry.write().await;
            registry.leave_room(connection_id, room_id)?;
        }
        self.broadcast_online_users(room_id).await;
        Ok(())
    }

    async fn broadcast_online_users(&self, room_id: &str) {
        let users = {
            let registry = self.registry.read().await;
            registry.users_in_room(room_id)
        };
        self.broadcast_to_room(
            room_id,
            &ServerEvent::OnlineUsersUpdate {
                room_id: room_id.to_string(),
                users,
            },
            None,
        )
        .await;
    }

    /// Push an event to every connection registered for the room at the
    /// instant of the call. Sends to connections removed mid-flight no-op.
    pub async fn broadcast_to_room(
        &self,
        room_id: &str,
        event: &ServerEvent,
        exclude_connection: Option<&str>,
    ) -> usize {
        let senders = {
            let registry = self.registry.read().await;
            registry
                .connections_in_room(room_id)
                .into_iter()
                .filter(|id| Some(id.as_str()) != exclude_connection)
                .filter_map(|id| registry.get(&id).map(|c| (id, c.sender.clone())))
                .collect::<Vec<_>>()
        };

        let text = match serde_json::to_string(event) {
            Ok(text) => text,
            Err(e) => {
                warn!("Failed to serialize broadcast for room {}: {}", room_id, e);
                return 0;
            }
        };

        let mut delivered = 0;
        for (conn_id, sender) in senders {
            if sender.send(WsMessage::text(text.clone())).is_ok() {
                delivered += 1;
            } else {
                debug!("Dropped broadcast to closed connection {}", conn_id);
            }
        }
        delivered
    }

    /// Push an event to a single connection; no-ops if it is gone
    pub async fn send_to_connection(&self, connection_id: &str, event: &ServerEvent) -> bool {
        let registry = self.registry.read().await;
        match registry.get(connection_id) {
            Some(connection) => connection.send_json(event),
            None => false,
        }
    }

    pub async fn touch(&self, connection_id: &str) {
        let mut registry = self.registry.write().await;
        registry.touch(connection_id);
    }

    pub async fn contains_connection(&self, connection_id: &str) -> bool {
        let registry = self.registry.read().await;
        registry.contains(connection_id)
    }

    pub async fn is_in_room(&self, connection_id: &str, room_id: &str) -> bool {
        let registry = self.registry.read().await;
        registry.is_in_room(connection_id, room_id)
    }

    /// Identity cached in the registry for this connection
    pub async fn connection_identity(&self, connection_id: &str) -> Option<(String, String)> {
        let registry = self.registry.read().await;
        registry
            .get(connection_id)
            .map(|c| (c.user_id.clone(), c.display_name.clone()))
    }

    pub async fn connection_count(&self) -> usize {
        let registry = self.registry.read().await;
        registry.connection_count()
    }

    pub async fn users_in_room(&self, room_id: &str) -> Vec<String> {
        let registry = self.registry.read().await;
        registry.users_in_room(room_id)
    }

    pub async fn try_consume(&self, user_id: &str, class: ActionClass) -> bool {
        let mut limiter = self.rate_limiter.write().await;
        limiter.try_consume(user_id, class)
    }

    /// Mark a user as typing and schedule the auto-expiry timer.
    /// Broadcasts the typing-start indicator when the user was not already
    /// in the room's typing set.
    pub async fn start_typing(self: Arc<Self>, room_id: &str, user_id: &str) {
        let (token, started, timeout) = {
            let mut typing = self.typing.write().await;
            let (token, started) = typing.start_typing(room_id, user_id);
            (token, started, typing.timeout())
        };

        if started {
            self.broadcast_to_room(
                room_id,
                &ServerEvent::UserTyping {
                    room_id: room_id.to_string(),
                    user_id: user_id.to_string(),
                    is_typing: true,
                },
                None,
            )
            .await;
        }

        let room_id = room_id.to_string();
        let user_id = user_id.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            self.expire_typing(&room_id, &user_id, token).await;
        });
    }

    /// Remove the user from the room's typing set and cancel the pending timer
    pub async fn stop_typing(&self, room_id: &str, user_id: &str) {
        let stopped = {
            let mut typing = self.typing.write().await;
            typing.stop_typing(room_id, user_id)
        };
        if stopped {
            self.broadcast_typing_stopped(room_id, user_id).await;
        }
    }

    async fn expire_typing(&self, room_id: &str, user_id: &str, token: u64) {
        let expired = {
            let mut typing = self.typing.write().await;
            typing.expire_if_current(room_id, user_id, token)
        };
        if expired {
            debug!("Typing indicator expired: room={} user={}", room_id, user_id);
            self.broadcast_typing_stopped(room_id, user_id).await;
        }
    }

    async fn broadcast_typing_stopped(&self, room_id: &str, user_id: &str) {
        self.broadcast_to_room(
            room_id,
            &ServerEvent::UserTyping {
                room_id: room_id.to_string(),
                user_id: user_id.to_string(),
                is_typing: false,
            },
            None,
        )
        .await;
    }

    pub async fn typing_users(&self, room_id: &str) -> Vec<String> {
        let typing = self.typing.read().await;
        typing.typing_users(room_id)
    }

    /// Start the liveness and rate-counter sweepers. The returned handles let
    /// shutdown cancel the timers deterministically.
    pub fn start_sweepers(self: Arc<Self>) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();

        let hub = Arc::clone(&self);
        handles.push(tokio::spawn(async move {
            let mut ticker = interval(hub.config.cleanup_interval);
            ticker.tick().await; // first tick fires immediately
            loop {
                ticker.tick().await;
                hub.sweep_stale_connections(hub.config.stale_connection_threshold)
                    .await;
            }
        }));

        let hub = self;
        handles.push(tokio::spawn(async move {
            let mut ticker = interval(hub.config.cleanup_interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let dropped = {
                    let mut limiter = hub.rate_limiter.write().await;
                    limiter.sweep()
                };
                if dropped > 0 {
                    debug!("Rate limiter sweep dropped {} expired counters", dropped);
                }
            }
        }));

        handles
    }

    /// Force-disconnect connections idle past the threshold. Work per tick is
    /// bounded so a flood of dead connections cannot stall the loop.
    pub async fn sweep_stale_connections(&self, threshold: Duration) {
        let stale_ids = {
            let registry = self.registry.read().await;
            let mut stale = registry.stale_connections(threshold);
            if stale.len() > MAX_EVICTIONS_PER_SWEEP {
                warn!(
                    "{} stale connections detected, evicting {} this cycle",
                    stale.len(),
                    MAX_EVICTIONS_PER_SWEEP
                );
                stale.truncate(MAX_EVICTIONS_PER_SWEEP);
            }
            stale
        };

        if stale_ids.is_empty() {
            return;
        }
        info!("Evicting {} stale connections", stale_ids.len());

        for connection_id in stale_ids {
            {
                let registry = self.registry.read().await;
                // Tolerates a disconnect racing the sweep: the connection may
                // already be gone, and unregister below is idempotent
                if let Some(connection) = registry.get(&connection_id) {
                    connection.send_close();
                }
            }
            self.unregister_connection(&connection_id).await;
        }
    }
}
