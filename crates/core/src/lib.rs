//! Cascade Agent Core
//!
//! Context bag types and event types for the
//! Cascade tool-planning agent workspace. This crate has no dependencies on
//! model providers, tools or the middleware runtime.
//!
//! ## Module Organization
//!
//! - `context` - Plain-data context pieces (`Metadata`, `ChatMode`, `AgentPhase`, `TodoItem`)
//! - `streaming` - Progress updates and human-in-the-loop approval events

pub mod context;
pub mod streaming;

// ── Context Types ──────────────────────────────────────────────────────
pub use context::{AgentPhase, ChatMode, Metadata, TodoItem, TodoStatus};

// ── Event Types ────────────────────────────────────────────────────────
pub use streaming::{
    ClarificationOption, ClarificationPayload, HitlApprovalRequest, HitlApprovalResponse,
    ProgressPayload, ProgressStage, ProgressUpdate, RiskLevel,
};
