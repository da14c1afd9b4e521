pub mod controller;
pub mod rollover;

pub use controller::{CountdownController, TickOutcome};
pub use rollover::RolloverScheduler;
