//! Core functionality for the chat relay

pub mod connection;
pub mod dispatcher;
pub mod events;
pub mod hub;
pub mod rate_limiter;
pub mod registry;
pub mod typing;

// Re-export main components for convenience
pub use connection::Connection;
pub use dispatcher::Dispatcher;
pub use events::{ClientEvent, ServerEvent};
pub use hub::RelayHub;
pub use rate_limiter::{ActionClass, RateLimiter};
pub use registry::SessionRegistry;
pub use typing::TypingTracker;
