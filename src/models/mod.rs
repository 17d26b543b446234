//! Data Models
//!
//! Contains the configuration data structures used throughout the agent.

pub mod settings;

pub use settings::*;
