//! Progress and Approval Event Types
//!
//! Provider-agnostic event types emitted while a request runs. These are
//! shared by the root crate (agent loop, HITL middleware) and any frontend
//! bridge that forwards them.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ============================================================================
// Progress updates
// ============================================================================

/// Stage tag of a progress update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStage {
    Planning,
    Model,
    Tool,
    Clarification,
    Final,
    Error,
}

impl ProgressStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProgressStage::Planning => "planning",
            ProgressStage::Model => "model",
            ProgressStage::Tool => "tool",
            ProgressStage::Clarification => "clarification",
            ProgressStage::Final => "final",
            ProgressStage::Error => "error",
        }
    }
}

/// One candidate reply offered with a clarification question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClarificationOption {
    pub label: String,
    pub value: String,
    pub recommended: bool,
}

/// Question plus exactly three reply options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClarificationPayload {
    pub question: String,
    pub options: Vec<ClarificationOption>,
}

/// Extra data attached to a progress update.
///
/// Only clarification updates carry a payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressPayload {
    pub clarification: ClarificationPayload,
}

/// A staged progress event delivered to the `on_update` callback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressUpdate {
    pub stage: ProgressStage,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<ProgressPayload>,
}

impl ProgressUpdate {
    pub fn new(stage: ProgressStage, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
            payload: None,
        }
    }

    pub fn clarification(message: impl Into<String>, payload: ClarificationPayload) -> Self {
        Self {
            stage: ProgressStage::Clarification,
            message: message.into(),
            payload: Some(ProgressPayload {
                clarification: payload,
            }),
        }
    }
}

// ============================================================================
// Human-in-the-loop approval
// ============================================================================

/// Risk classification of a pending tool call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
        }
    }

    pub fn requires_approval(&self) -> bool {
        !matches!(self, RiskLevel::Low)
    }
}

/// Emitted on the approval channel as `approval-required`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HitlApprovalRequest {
    pub task_id: String,
    pub operation: String,
    pub risk: RiskLevel,
    pub details: String,
    pub tool_calls: Vec<Value>,
}

/// Submitted by the user interface to resolve a pending approval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HitlApprovalResponse {
    pub task_id: String,
    pub approved: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl HitlApprovalResponse {
    pub fn approve(task_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            approved: true,
            reason: None,
        }
    }

    pub fn reject(task_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            approved: false,
            reason: Some(reason.into()),
        }
    }
}
