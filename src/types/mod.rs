//! Type definitions for the Magellan executor
//!
//! This module contains the task descriptor and the payload types exchanged
//! with the scheduler for a single search task.

mod task;

pub use task::*;
