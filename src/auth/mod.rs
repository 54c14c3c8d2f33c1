//! Authentication for the relay

pub mod gate;

pub use gate::{AuthGate, Claims, UserIdentity};
