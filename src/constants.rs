// Fundamental configuration constants
pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 3030;
pub const WS_PATH: &str = "ws";

// Connection management defaults
pub const DEFAULT_MAX_CONNECTIONS_PER_USER: usize = 3;
pub const DEFAULT_MAX_CONNECTIONS_TOTAL: usize = 10_000;
pub const DEFAULT_STALE_CONNECTION_SECS: u64 = 300;
pub const DEFAULT_CLEANUP_INTERVAL_SECS: u64 = 60;

// Presence defaults
pub const DEFAULT_TYPING_TIMEOUT_SECS: u64 = 5;

// Payload limits
pub const DEFAULT_MAX_MESSAGE_LENGTH: usize = 10_000;
pub const DEFAULT_MAX_ATTACHMENTS: usize = 10;
pub const DEFAULT_MAX_AUTO_JOIN_CHATS: usize = 50;
pub const MAX_EVENT_BYTES: usize = 65_536;

// Rate limit defaults (per user, per minute)
pub const DEFAULT_MESSAGES_PER_MINUTE: u32 = 30;
pub const DEFAULT_REACTIONS_PER_MINUTE: u32 = 60;
pub const DEFAULT_TYPING_EVENTS_PER_MINUTE: u32 = 120;

// Liveness sweeper bounds
pub const MAX_EVICTIONS_PER_SWEEP: usize = 50;
