pub mod action_executor;

pub use action_executor::{ActionExecutor, ExecutionReport};
