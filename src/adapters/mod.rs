//! Adapters implementing domain ports.

pub mod process_executor;
pub mod simulated_executor;

pub use process_executor::ProcessExecutor;
pub use simulated_executor::SimulatedExecutor;
