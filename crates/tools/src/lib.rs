//! Cascade Agent Tools
//!
//! Tool-side building blocks of the planning loop:
//! - `PlannerAction` / `ToolAction` - tolerant parsing of planner output
//! - `ToolObservation` - pass/fail record of one tool execution
//! - `ToolExecutor` trait - never-failing tool dispatch, with the built-in
//!   `WorkspaceToolExecutor` filesystem backend
//! - `SandboxService` - virtual root mapping and the scoped workspace lease

pub mod error;
pub mod executor;
pub mod planner_action;
pub mod sandbox;

pub use error::{ToolError, ToolResult};
pub use executor::{ToolDescriptor, ToolExecutor, ToolObservation, WorkspaceToolExecutor};
pub use planner_action::{
    looks_like_malformed_structured_output, try_parse_planner_action, JsonObjectScanner,
    PlannerAction, ToolAction, CLARIFICATION_TOOL, DELEGATION_TOOL,
};
pub use sandbox::{SandboxConfig, SandboxService, WorkspaceLease, DEFAULT_VIRTUAL_ROOT};
