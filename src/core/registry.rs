//! Session registry: bidirectional connection/user/room indices
//!
//! The registry is the single owner of connection state. Every operation is
//! synchronous so mutations appear atomic relative to other handlers; the
//! caller must not hold the enclosing lock across an await.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use log::{debug, info, warn};

use crate::core::connection::Connection;
use crate::error::{RelayError, Result};

/// In-memory connection/user/room indices
pub struct SessionRegistry {
    /// connection id -> connection
    connections: HashMap<String, Connection>,
    /// user id -> connection ids, oldest first
    user_connections: HashMap<String, Vec<String>>,
    /// room id -> connection ids currently joined
    room_connections: HashMap<String, HashSet<String>>,
    max_connections_per_user: usize,
    max_connections_total: usize,
}

impl SessionRegistry {
    pub fn new(max_connections_per_user: usize, max_connections_total: usize) -> Self {
        Self {
            connections: HashMap::new(),
            user_connections: HashMap::new(),
            room_connections: HashMap::new(),
            max_connections_per_user,
            max_connections_total,
        }
    }

    /// Register a new connection.
    ///
    /// Rejects when the process-wide cap is reached. When the per-user cap
    /// would be exceeded, the user's oldest connections are evicted and
    /// returned so the caller can close their transports.
    pub fn register(&mut self, connection: Connection) -> Result<Vec<Connection>> {
        if self.connections.len() >= self.max_connections_total {
            warn!(
                "Rejecting connection for user {}: server at capacity ({})",
                connection.user_id, self.max_connections_total
            );
            return Err(RelayError::ServerFull);
        }

        let mut evicted = Vec::new();
        let user_id = connection.user_id.clone();

        while self
            .user_connections
            .get(&user_id)
            .map_or(0, |ids| ids.len())
            >= self.max_connections_per_user
        {
            let oldest_id = match self
                .user_connections
                .get_mut(&user_id)
                .and_then(|ids| (!ids.is_empty()).then(|| ids.remove(0)))
            {
                Some(id) => id,
                None => break,
            };
            if let Some(old) = self.remove_connection_indices(&oldest_id) {
                info!(
                    "Evicting oldest connection {} for user {} (per-user cap {})",
                    old.id, user_id, self.max_connections_per_user
                );
                evicted.push(old);
            }
        }

        self.user_connections
            .entry(user_id)
            .or_default()
            .push(connection.id.clone());
        self.connections.insert(connection.id.clone(), connection);

        Ok(evicted)
    }

    /// Remove a connection from every index. Idempotent.
    pub fn unregister(&mut self, connection_id: &str) -> Option<Connection> {
        let connection = self.remove_connection_indices(connection_id)?;

        if let Some(conn_ids) = self.user_connections.get_mut(&connection.user_id) {
            conn_ids.retain(|id| id != connection_id);
            if conn_ids.is_empty() {
                self.user_connections.remove(&connection.user_id);
            }
        }

        debug!("Unregistered connection {} (user {})", connection_id, connection.user_id);
        Some(connection)
    }

    /// Remove the connection record and prune room indices, leaving the user
    /// fan-out set to the caller (eviction already holds the user entry).
    fn remove_connection_indices(&mut self, connection_id: &str) -> Option<Connection> {
        let connection = self.connections.remove(connection_id)?;
        for room_id in &connection.rooms {
            if let Some(members) = self.room_connections.get_mut(room_id) {
                members.remove(connection_id);
                if members.is_empty() {
                    self.room_connections.remove(room_id);
                }
            }
        }
        Some(connection)
    }

    /// Add a connection to a room index. Authorization is the caller's job.
    pub fn join_room(&mut self, connection_id: &str, room_id: &str) -> Result<()> {
        let connection = self
            .connections
            .get_mut(connection_id)
            .ok_or_else(|| RelayError::ConnectionNotFound(connection_id.to_string()))?;
        connection.rooms.insert(room_id.to_string());
        self.room_connections
            .entry(room_id.to_string())
            .or_default()
            .insert(connection_id.to_string());
        Ok(())
    }

    /// Remove a connection from a room index
    pub fn leave_room(&mut self, connection_id: &str, room_id: &str) -> Result<()> {
        let connection = self
            .connections
            .get_mut(connection_id)
            .ok_or_else(|| RelayError::ConnectionNotFound(connection_id.to_string()))?;
        connection.rooms.remove(room_id);
        if let Some(members) = self.room_connections.get_mut(room_id) {
            members.remove(connection_id);
            if members.is_empty() {
                self.room_connections.remove(room_id);
            }
        }
        Ok(())
    }

    pub fn get(&self, connection_id: &str) -> Option<&Connection> {
        self.connections.get(connection_id)
    }

    pub fn contains(&self, connection_id: &str) -> bool {
        self.connections.contains_key(connection_id)
    }

    /// Record activity for liveness tracking
    pub fn touch(&mut self, connection_id: &str) {
        if let Some(connection) = self.connections.get_mut(connection_id) {
            connection.touch();
        }
    }

    pub fn connections_of(&self, user_id: &str) -> Vec<String> {
        self.user_connections.get(user_id).cloned().unwrap_or_default()
    }

    pub fn connections_in_room(&self, room_id: &str) -> Vec<String> {
        self.room_connections
            .get(room_id)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Whether the connection has joined the given room
    pub fn is_in_room(&self, connection_id: &str, room_id: &str) -> bool {
        self.room_connections
            .get(room_id)
            .map(|members| members.contains(connection_id))
            .unwrap_or(false)
    }

    /// Distinct user ids with at least one connection in the room
    pub fn users_in_room(&self, room_id: &str) -> Vec<String> {
        let mut users: HashSet<&str> = HashSet::new();
        if let Some(members) = self.room_connections.get(room_id) {
            for conn_id in members {
                if let Some(connection) = self.connections.get(conn_id) {
                    users.insert(connection.user_id.as_str());
                }
            }
        }
        let mut users: Vec<String> = users.into_iter().map(String::from).collect();
        users.sort();
        users
    }

    /// Connections idle past the threshold
    pub fn stale_connections(&self, threshold: Duration) -> Vec<String> {
        self.connections
            .iter()
            .filter(|(_, conn)| conn.is_stale(threshold))
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn connection(user: &str) -> Connection {
        let (tx, _rx) = mpsc::unbounded_channel();
        Connection::new(user.to_string(), user.to_string(), tx)
    }

    #[test]
    fn test_register_and_lookup() {
        let mut registry = SessionRegistry::new(3, 100);
        let conn = connection("alice");
        let conn_id = conn.id.clone();

        assert!(registry.register(conn).unwrap().is_empty());
        assert!(registry.contains(&conn_id));
        assert_eq!(registry.connections_of("alice"), vec![conn_id]);
        assert_eq!(registry.connection_count(), 1);
    }

    #[test]
    fn test_per_user_cap_evicts_oldest() {
        let mut registry = SessionRegistry::new(3, 100);
        let mut ids = Vec::new();
        for _ in 0..3 {
            let conn = connection("alice");
            ids.push(conn.id.clone());
            assert!(registry.register(conn).unwrap().is_empty());
        }

        let fourth = connection("alice");
        let fourth_id = fourth.id.clone();
        let evicted = registry.register(fourth).unwrap();

        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].id, ids[0]);
        assert!(!registry.contains(&ids[0]));
        assert_eq!(registry.connections_of("alice").len(), 3);
        assert!(registry.connections_of("alice").contains(&fourth_id));
    }

    #[test]
    fn test_total_cap_rejects() {
        let mut registry = SessionRegistry::new(3, 2);
        registry.register(connection("a")).unwrap();
        registry.register(connection("b")).unwrap();
        assert!(matches!(registry.register(connection("c")), Err(RelayError::ServerFull)));
    }

    #[test]
    fn test_eviction_prunes_room_indices() {
        let mut registry = SessionRegistry::new(1, 100);
        let first = connection("alice");
        let first_id = first.id.clone();
        registry.register(first).unwrap();
        registry.join_room(&first_id, "r1").unwrap();

        let evicted = registry.register(connection("alice")).unwrap();
        assert_eq!(evicted.len(), 1);
        assert!(registry.connections_in_room("r1").is_empty());
    }

    #[test]
    fn test_unregister_is_idempotent() {
        let mut registry = SessionRegistry::new(3, 100);
        let conn = connection("alice");
        let conn_id = conn.id.clone();
        registry.register(conn).unwrap();
        registry.join_room(&conn_id, "r1").unwrap();

        assert!(registry.unregister(&conn_id).is_some());
        assert!(registry.unregister(&conn_id).is_none());
        assert!(registry.connections_of("alice").is_empty());
        assert!(registry.connections_in_room("r1").is_empty());
        assert_eq!(registry.connection_count(), 0);
    }

    #[test]
    fn test_room_membership_iff_joined() {
        let mut registry = SessionRegistry::new(3, 100);
        let conn = connection("alice");
        let conn_id = conn.id.clone();
        registry.register(conn).unwrap();

        assert!(!registry.is_in_room(&conn_id, "r1"));
        registry.join_room(&conn_id, "r1").unwrap();
        assert!(registry.is_in_room(&conn_id, "r1"));
        assert_eq!(registry.connections_in_room("r1"), vec![conn_id.clone()]);

        registry.leave_room(&conn_id, "r1").unwrap();
        assert!(!registry.is_in_room(&conn_id, "r1"));
        assert!(registry.connections_in_room("r1").is_empty());
    }

    #[test]
    fn test_users_in_room_is_distinct() {
        let mut registry = SessionRegistry::new(3, 100);
        for user in ["alice", "alice", "bob"] {
            let conn = connection(user);
            let conn_id = conn.id.clone();
            registry.register(conn).unwrap();
            registry.join_room(&conn_id, "r1").unwrap();
        }
        assert_eq!(registry.users_in_room("r1"), vec!["alice".to_string(), "bob".to_string()]);
    }

    #[test]
    fn test_stale_scan() {
        let mut registry = SessionRegistry::new(3, 100);
        let conn = connection("alice");
        let conn_id = conn.id.clone();
        registry.register(conn).unwrap();

        assert!(registry.stale_connections(Duration::from_secs(60)).is_empty());
        assert_eq!(registry.stale_connections(Duration::from_nanos(0)).len(), 1);
        assert_eq!(registry.stale_connections(Duration::from_nanos(0))[0], conn_id);
    }
}
