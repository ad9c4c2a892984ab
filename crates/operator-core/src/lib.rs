//! # operator-core
//!
//! Core types, traits, and the error taxonomy for the AI operator.
//! This crate defines the shared vocabulary used by every other crate in the workspace.

pub mod error;
pub mod message;
pub mod store;
pub mod tool;
pub mod types;

pub use error::{OperatorError, Result};
pub use message::{Message, MessageContent, Role};
pub use store::{ModelConfigStore, UsageSink};
pub use tool::{Tool, ToolCall};
pub use types::*;
