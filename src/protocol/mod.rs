//! Protocol module for scheduler communication
//!
//! Defines the message types and serialization for the executor-scheduler
//! protocol. The protocol uses JSON over WebSocket with versioning support.

mod messages;
mod version;

pub use messages::*;
pub use version::*;
