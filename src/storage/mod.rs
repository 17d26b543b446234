//! Storage Layer
//!
//! Handles persistence: JSON settings and the conversation store.

pub mod config;
pub mod conversation_store;

pub use config::*;
pub use conversation_store::*;
