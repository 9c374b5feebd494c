//! Task execution module
//!
//! Handles the task execution lifecycle:
//! - Receiving launch events from the scheduler connection
//! - Spawning one independent worker per task
//! - Tracking outstanding workers with cancellation handles
//! - Emitting status updates in per-task order

mod lifecycle;
mod state;
mod worker;

pub use lifecycle::*;
pub use state::*;
pub use worker::*;
