//! Simulated annealing search
//!
//! The search module is pure algorithm: no I/O, no protocol knowledge.
//! Mutation and fitness are capability parameters supplied by the caller
//! through the `Objective` trait; the engine only owns the temperature
//! schedule, the acceptance rule, and the best-key bookkeeping.

mod cancel;
mod engine;
mod objective;

pub use cancel::*;
pub use engine::*;
pub use objective::*;
