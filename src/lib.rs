//! Supervisor-routed multi-agent assistant.
//!
//! The binary entry point is `src/main.rs`; everything it wires together is
//! exposed here for integration tests.

pub mod bootstrap;
pub mod core;
pub mod llm;
pub mod subsystems;
pub mod supervisor;

pub use crate::core::{config, error};
