//! Bootstrap layer: modules that run before subsystems start.
//!
//! - **logger**: tracing-subscriber initialisation.

pub mod logger;
