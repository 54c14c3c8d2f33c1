//! Chat Relay - a realtime chat delivery hub
//!
//! Accepts long-lived bidirectional client connections, groups them into
//! rooms, and fans chat events out to every connection subscribed to a room,
//! with per-user rate limiting and stale-connection eviction.

pub mod auth;
pub mod config;
pub mod constants;
pub mod core;
pub mod error;
pub mod handlers;
pub mod service;

// Re-export main components
pub use config::*;
pub use constants::*;
