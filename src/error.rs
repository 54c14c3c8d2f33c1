use std::error::Error;
use std::fmt;

#[derive(Debug)]
pub enum RelayError {
    // Registry errors
    ConnectionNotFound(String),
    ServerFull,

    // Auth errors
    AuthError(String),
    Unauthorized,

    // Authorization errors
    NotAParticipant { user_id: String, room_id: String },

    // Rate limiting
    RateLimited(String),

    // Validation errors
    ValidationError(String),
    EventTooLarge(usize),
    EventParseError(String),

    // Collaborator errors
    ServiceError(String),
    MessageNotFound(String),

    // Configuration errors
    ConfigError(String),
}

impl fmt::Display for RelayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectionNotFound(id) => write!(f, "Connection not found: {}", id),
            Self::ServerFull => write!(f, "Server connection limit reached"),
            Self::AuthError(msg) => write!(f, "Authentication error: {}", msg),
            Self::Unauthorized => write!(f, "Unauthorized access"),
            Self::NotAParticipant { user_id, room_id } => {
                write!(f, "User {} is not a participant of room {}", user_id, room_id)
            }
            Self::RateLimited(class) => write!(f, "Rate limit exceeded for {}", class),
            Self::ValidationError(msg) => write!(f, "Validation error: {}", msg),
            Self::EventTooLarge(size) => write!(f, "Event too large: {} bytes", size),
            Self::EventParseError(msg) => write!(f, "Event parse error: {}", msg),
            Self::ServiceError(msg) => write!(f, "Message service error: {}", msg),
            Self::MessageNotFound(id) => write!(f, "Message not found: {}", id),
            Self::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
        }
    }
}

impl Error for RelayError {}

// Generic result type for the relay
pub type Result<T> = std::result::Result<T, RelayError>;
