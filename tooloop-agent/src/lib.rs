//! Loop engine: model round-trips, capability execution, and active-set injection policies.

pub mod decoder;
pub mod model;
pub mod policy;
pub mod runtime;

pub use runtime::{LoopEngine, LoopOutcome, LoopOutput, LoopReport};
