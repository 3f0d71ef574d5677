//! Simulation toolkit for the radio capability arbiter.
//!
//! Provides mock HAL collaborators, a deterministic harness that plays the
//! modem side of every request, and TOML scenarios runnable from the
//! `radiocaps-sim` binary.

pub mod harness;
pub mod mock;
pub mod scenario;

pub use harness::{Harness, RequestKind, ResponsePolicy};
pub use scenario::{Scenario, ScenarioReport};
