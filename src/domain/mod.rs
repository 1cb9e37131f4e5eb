//! Domain layer for the Warden decision engine
//!
//! Core models, the error taxonomy and the ports the engine depends on.

pub mod errors;
pub mod models;
pub mod ports;

pub use errors::{EngineError, EngineResult};
