//! Transport handlers

pub mod websocket;
