//! Server configuration module
//! Handles dynamic configuration parameters for the chat relay

use crate::constants::{
    DEFAULT_CLEANUP_INTERVAL_SECS, DEFAULT_HOST, DEFAULT_MAX_ATTACHMENTS,
    DEFAULT_MAX_AUTO_JOIN_CHATS, DEFAULT_MAX_CONNECTIONS_PER_USER, DEFAULT_MAX_CONNECTIONS_TOTAL,
    DEFAULT_MAX_MESSAGE_LENGTH, DEFAULT_MESSAGES_PER_MINUTE, DEFAULT_PORT,
    DEFAULT_REACTIONS_PER_MINUTE, DEFAULT_STALE_CONNECTION_SECS, DEFAULT_TYPING_EVENTS_PER_MINUTE,
    DEFAULT_TYPING_TIMEOUT_SECS,
};
use crate::error::{RelayError, Result};
use std::env;
use std::time::Duration;

/// Relay configuration parameters
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub host: String,
    pub port: u16,
    /// JWT secret for bearer credential validation
    pub jwt_secret: String,
    /// Maximum simultaneous connections per user before the oldest is evicted
    pub max_connections_per_user: usize,
    /// Hard cap on total registered connections
    pub max_connections_total: usize,
    /// Idle duration after which a connection is presumed dead
    pub stale_connection_threshold: Duration,
    /// Interval between liveness/rate-counter sweeps
    pub cleanup_interval: Duration,
    /// Typing indicator auto-expiry
    pub typing_timeout: Duration,
    /// Maximum message content length in characters
    pub max_message_length: usize,
    /// Maximum attachments per message
    pub max_attachments: usize,
    /// Upper bound on rooms auto-joined at connect time
    pub max_auto_join_chats: usize,
    /// Rate limit: messages per minute per user
    pub messages_per_minute: u32,
    /// Rate limit: reactions per minute per user
    pub reactions_per_minute: u32,
    /// Rate limit: typing events per minute per user
    pub typing_events_per_minute: u32,
    /// Users seeded into the identity directory at startup, as
    /// `(user id, display name)` pairs
    pub bootstrap_users: Vec<(String, String)>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        panic!("RelayConfig::default() is not allowed. Use RelayConfig::from_env() instead.");
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

/// Parse a comma-separated `id:display name` list; a bare `id` uses the id
/// as its display name. Empty entries are skipped.
fn parse_bootstrap_users(raw: &str) -> Vec<(String, String)> {
    raw.split(',')
        .filter_map(|entry| {
            let entry = entry.trim();
            if entry.is_empty() {
                return None;
            }
            match entry.split_once(':') {
                Some((id, name)) => {
                    let id = id.trim();
                    let name = name.trim();
                    if id.is_empty() {
                        return None;
                    }
                    let name = if name.is_empty() { id } else { name };
                    Some((id.to_string(), name.to_string()))
                }
                None => Some((entry.to_string(), entry.to_string())),
            }
        })
        .collect()
}

impl RelayConfig {
    /// Create a test configuration - only for tests
    pub fn for_testing() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            jwt_secret: "test-jwt-secret-0123456789-never-use-in-production".to_string(),
            max_connections_per_user: DEFAULT_MAX_CONNECTIONS_PER_USER,
            max_connections_total: 100,
            stale_connection_threshold: Duration::from_secs(DEFAULT_STALE_CONNECTION_SECS),
            cleanup_interval: Duration::from_secs(DEFAULT_CLEANUP_INTERVAL_SECS),
            typing_timeout: Duration::from_secs(DEFAULT_TYPING_TIMEOUT_SECS),
            max_message_length: DEFAULT_MAX_MESSAGE_LENGTH,
            max_attachments: DEFAULT_MAX_ATTACHMENTS,
            max_auto_join_chats: DEFAULT_MAX_AUTO_JOIN_CHATS,
            messages_per_minute: DEFAULT_MESSAGES_PER_MINUTE,
            reactions_per_minute: DEFAULT_REACTIONS_PER_MINUTE,
            typing_events_per_minute: DEFAULT_TYPING_EVENTS_PER_MINUTE,
            bootstrap_users: Vec::new(),
        }
    }

    /// Validate that the JWT secret meets minimum requirements
    fn validate_jwt_secret(secret: &str) -> Result<()> {
        if secret.len() < 32 {
            return Err(RelayError::ConfigError(
                "JWT secret must be at least 32 characters long".to_string(),
            ));
        }

        // Reject obvious placeholder values
        let insecure_patterns = ["your-secret-key", "change-this", "default", "password", "12345"];
        for pattern in &insecure_patterns {
            if secret.contains(pattern) {
                return Err(RelayError::ConfigError(format!(
                    "JWT secret contains insecure pattern '{}'. Generate one with: openssl rand -base64 32",
                    pattern
                )));
            }
        }

        Ok(())
    }

    /// Load configuration from environment variables if available
    pub fn from_env() -> Result<Self> {
        let host = env::var("CHAT_RELAY_HOST").unwrap_or(DEFAULT_HOST.to_string());
        let port = env_parse("CHAT_RELAY_PORT", DEFAULT_PORT);

        let jwt_secret = env::var("CHAT_RELAY_JWT_SECRET")
            .or_else(|_| env::var("JWT_SECRET"))
            .map_err(|_| {
                RelayError::ConfigError(
                    "JWT_SECRET environment variable is required. \
                     Generate one with: openssl rand -base64 32"
                        .to_string(),
                )
            })?;
        Self::validate_jwt_secret(&jwt_secret)?;

        let max_connections_per_user = env_parse(
            "CHAT_RELAY_MAX_CONNECTIONS_PER_USER",
            DEFAULT_MAX_CONNECTIONS_PER_USER,
        );
        if max_connections_per_user == 0 {
            return Err(RelayError::ConfigError(
                "CHAT_RELAY_MAX_CONNECTIONS_PER_USER must be at least 1".to_string(),
            ));
        }

        let stale_secs = env_parse("CHAT_RELAY_STALE_CONNECTION_SECS", DEFAULT_STALE_CONNECTION_SECS);
        let cleanup_secs = env_parse("CHAT_RELAY_CLEANUP_INTERVAL_SECS", DEFAULT_CLEANUP_INTERVAL_SECS);
        let typing_secs = env_parse("CHAT_RELAY_TYPING_TIMEOUT_SECS", DEFAULT_TYPING_TIMEOUT_SECS);

        Ok(Self {
            host,
            port,
            jwt_secret,
            max_connections_per_user,
            max_connections_total: env_parse(
                "CHAT_RELAY_MAX_CONNECTIONS_TOTAL",
                DEFAULT_MAX_CONNECTIONS_TOTAL,
            ),
            stale_connection_threshold: Duration::from_secs(stale_secs),
            cleanup_interval: Duration::from_secs(cleanup_secs),
            typing_timeout: Duration::from_secs(typing_secs),
            max_message_length: env_parse("CHAT_RELAY_MAX_MESSAGE_LENGTH", DEFAULT_MAX_MESSAGE_LENGTH),
            max_attachments: env_parse("CHAT_RELAY_MAX_ATTACHMENTS", DEFAULT_MAX_ATTACHMENTS),
            max_auto_join_chats: env_parse("CHAT_RELAY_MAX_AUTO_JOIN_CHATS", DEFAULT_MAX_AUTO_JOIN_CHATS),
            messages_per_minute: env_parse("CHAT_RELAY_MESSAGES_PER_MINUTE", DEFAULT_MESSAGES_PER_MINUTE),
            reactions_per_minute: env_parse("CHAT_RELAY_REACTIONS_PER_MINUTE", DEFAULT_REACTIONS_PER_MINUTE),
            typing_events_per_minute: env_parse(
                "CHAT_RELAY_TYPING_EVENTS_PER_MINUTE",
                DEFAULT_TYPING_EVENTS_PER_MINUTE,
            ),
            bootstrap_users: env::var("CHAT_RELAY_BOOTSTRAP_USERS")
                .map(|raw| parse_bootstrap_users(&raw))
                .unwrap_or_default(),
        })
    }
}
