//! Services
//!
//! The planning agent and the middleware it runs through.

pub mod agent;
pub mod middleware;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use agent::{ChatInput, ChatReply, ToolPlanningChatAgent};
pub use middleware::{default_pipeline, MiddlewarePipeline};
