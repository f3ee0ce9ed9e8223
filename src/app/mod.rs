//! Application lifecycle: wiring, start, run loop and graceful stop.

mod orchestrator;
mod runtime;
mod shutdown;
mod startup;
mod state;
mod types;

#[cfg(test)]
mod tests;

pub use orchestrator::MonitorOrchestrator;
pub use types::{ComponentState, ShutdownReason};
