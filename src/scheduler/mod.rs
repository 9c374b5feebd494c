//! Scheduler communication module
//!
//! Handles the WebSocket connection to the scheduler, including:
//! - Connection establishment with auto-reconnect
//! - Registration handshake and heartbeats
//! - Message sending and receiving
//! - Task lifecycle event delivery

mod client;

pub use client::*;
