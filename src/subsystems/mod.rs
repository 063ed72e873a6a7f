//! Subsystems registered on the supervisor bus.

#[cfg(feature = "subsystem-agents")]
pub mod agents;
#[cfg(feature = "subsystem-comms")]
pub mod comms;
#[cfg(feature = "subsystem-llm")]
pub mod llm;
pub mod management;
#[cfg(feature = "subsystem-memory")]
pub mod memory;
pub mod runtime;
#[cfg(feature = "subsystem-tools")]
pub mod tools;
