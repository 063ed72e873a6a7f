//! Building blocks shared by the chat flow, the workers and the role agents.

pub mod json;
pub mod prompt;
