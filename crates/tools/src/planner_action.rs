//! Planner Action Parsing
//!
//! The planner model is asked to reply with a single JSON object:
//!
//! ```text
//! {"action": "answer", "answer": "..."}
//! {"action": "tool", "tool": "list_dir", "input": {"path": "/mnt/workspace"}, "reason": "..."}
//! ```
//!
//! Models wrap that object in markdown fences, prefix it with prose, or emit
//! half-finished JSON. `try_parse_planner_action` tolerates the first two;
//! `looks_like_malformed_structured_output` detects the third so broken JSON
//! is never reused as a draft answer.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Tool name the planner uses to ask the user a question.
pub const CLARIFICATION_TOOL: &str = "ask_clarification";

/// Tool name of the sub-task delegation action.
pub const DELEGATION_TOOL: &str = "delegate";

// ============================================================================
// Action types
// ============================================================================

/// A tool the planner wants executed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolAction {
    pub tool: String,
    #[serde(default = "empty_input")]
    pub input: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

fn empty_input() -> Value {
    Value::Object(Map::new())
}

impl ToolAction {
    pub fn new(tool: impl Into<String>, input: Value) -> Self {
        Self {
            tool: tool.into(),
            input,
            reason: None,
        }
    }

    /// Identity of the call within one turn: tool name plus serialized input.
    ///
    /// Object keys serialize in sorted order, so equal inputs give equal
    /// signatures regardless of the order the model wrote them in.
    pub fn signature(&self) -> String {
        format!("{}:{}", self.tool, self.input)
    }

    pub fn is_clarification(&self) -> bool {
        self.tool == CLARIFICATION_TOOL
    }

    pub fn is_delegation(&self) -> bool {
        self.tool == DELEGATION_TOOL
    }

    /// Question text of an `ask_clarification` call.
    pub fn clarification_question(&self) -> Option<&str> {
        self.input
            .get("question")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|q| !q.is_empty())
    }
}

/// One parsed planner decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum PlannerAction {
    Answer { answer: String },
    Tool(ToolAction),
}

impl PlannerAction {
    pub fn answer(text: impl Into<String>) -> Self {
        PlannerAction::Answer {
            answer: text.into(),
        }
    }

    pub fn tool(tool: impl Into<String>, input: Value) -> Self {
        PlannerAction::Tool(ToolAction::new(tool, input))
    }

    pub fn as_tool(&self) -> Option<&ToolAction> {
        match self {
            PlannerAction::Tool(action) => Some(action),
            PlannerAction::Answer { .. } => None,
        }
    }
}

// ============================================================================
// JSON object scanner
// ============================================================================

/// Iterates over top-level `{...}` spans embedded in free text.
///
/// Tracks brace depth and string/escape state explicitly so braces inside
/// string literals do not end an object early. After iteration,
/// `saw_unterminated()` reports whether an object was opened but never closed.
#[derive(Debug)]
pub struct JsonObjectScanner<'a> {
    text: &'a str,
    pos: usize,
    unterminated: bool,
}

impl<'a> JsonObjectScanner<'a> {
    pub fn new(text: &'a str) -> Self {
        Self {
            text,
            pos: 0,
            unterminated: false,
        }
    }

    pub fn saw_unterminated(&self) -> bool {
        self.unterminated
    }
}

impl<'a> Iterator for JsonObjectScanner<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<&'a str> {
        let bytes = self.text.as_bytes();
        let start = self.pos + self.text[self.pos..].find('{')?;

        let mut depth = 0usize;
        let mut in_string = false;
        let mut escaped = false;

        for (offset, &b) in bytes[start..].iter().enumerate() {
            if in_string {
                if escaped {
                    escaped = false;
                } else if b == b'\\' {
                    escaped = true;
                } else if b == b'"' {
                    in_string = false;
                }
                continue;
            }
            match b {
                b'"' => in_string = true,
                b'{' => depth += 1,
                b'}' => {
                    depth -= 1;
                    if depth == 0 {
                        let end = start + offset + 1;
                        self.pos = end;
                        return Some(&self.text[start..end]);
                    }
                }
                _ => {}
            }
        }

        self.unterminated = true;
        self.pos = self.text.len();
        None
    }
}

/// Bodies of markdown code fences, in order of appearance.
fn fenced_blocks(text: &str) -> Vec<&str> {
    let mut blocks = Vec::new();
    let mut rest = text;
    while let Some(open) = rest.find("```") {
        let after_open = &rest[open + 3..];
        // Skip the optional language tag on the opening line
        let body_start = after_open.find('\n').map(|nl| nl + 1).unwrap_or(after_open.len());
        let body = &after_open[body_start..];
        match body.find("```") {
            Some(close) => {
                blocks.push(body[..close].trim());
                rest = &body[close + 3..];
            }
            None => break,
        }
    }
    blocks
}

// ============================================================================
// Parsing
// ============================================================================

/// Parse raw planner text into an action.
///
/// Fenced blocks are tried first, then every embedded object in the raw text.
/// The first object that reads as an action wins.
pub fn try_parse_planner_action(text: &str) -> Option<PlannerAction> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }

    let fenced = fenced_blocks(trimmed);
    let candidates = fenced
        .iter()
        .flat_map(|block| JsonObjectScanner::new(*block))
        .chain(JsonObjectScanner::new(trimmed));

    for candidate in candidates {
        let Ok(Value::Object(obj)) = serde_json::from_str::<Value>(candidate) else {
            continue;
        };
        if let Some(action) = action_from_object(obj) {
            return Some(action);
        }
    }
    None
}

fn action_from_object(mut obj: Map<String, Value>) -> Option<PlannerAction> {
    let tag = obj
        .get("action")
        .and_then(Value::as_str)
        .map(|s| s.trim().to_ascii_lowercase());

    let tool_name = obj
        .get("tool")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string);

    match (tag.as_deref(), tool_name) {
        (Some("answer") | Some("final") | None, _)
            if obj.get("answer").map(Value::is_string) == Some(true) =>
        {
            let answer = obj.remove("answer").and_then(|v| v.as_str().map(str::to_string))?;
            Some(PlannerAction::Answer { answer })
        }
        (Some("tool") | None, Some(tool)) => {
            let input = match obj.remove("input") {
                Some(Value::Null) | None => empty_input(),
                Some(v) => v,
            };
            let reason = obj
                .get("reason")
                .and_then(Value::as_str)
                .map(str::to_string);
            Some(PlannerAction::Tool(ToolAction {
                tool,
                input,
                reason,
            }))
        }
        _ => None,
    }
}

/// Whether text that failed to parse is still JSON-shaped.
///
/// Such text must not be shown to the user or fed back as a draft answer.
pub fn looks_like_malformed_structured_output(text: &str) -> bool {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return false;
    }
    if trimmed.starts_with('{') || trimmed.starts_with('[') || trimmed.starts_with("```json") {
        return true;
    }
    if trimmed.contains("\"action\"") || trimmed.contains("\"tool\"") {
        return true;
    }
    let mut scanner = JsonObjectScanner::new(trimmed);
    while scanner.next().is_some() {}
    scanner.saw_unterminated()
}
