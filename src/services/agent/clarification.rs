//! Clarification Options
//!
//! Turns a planner's clarification question into exactly three reply
//! options. One model call proposes them; anything short of three usable
//! options falls back to a fixed set. The first option is always the
//! recommended one.

use cascade_agent_core::{ClarificationOption, ClarificationPayload};
use cascade_agent_llm::{ChatMessage, GenerateRequest};
use cascade_agent_tools::JsonObjectScanner;
use serde_json::Value;
use tracing::warn;

use crate::services::middleware::MiddlewareContext;
use crate::utils::error::{AppError, AppResult};

pub const OPTION_COUNT: usize = 3;

const OPTIONS_SYSTEM_PROMPT: &str = "Propose three short replies the user could give to the \
question below. Put the most likely reply first. Reply with JSON only: \
{\"options\":[{\"label\":\"...\",\"value\":\"...\"}]}";

/// Options used when the model's proposal is unusable.
pub fn fallback_options() -> Vec<ClarificationOption> {
    [
        ("Go with your best guess", "Please proceed with the most reasonable assumption."),
        ("I'll add more details", "I will provide more details about what I need."),
        ("Cancel this request", "Please stop here; no further action is needed."),
    ]
    .iter()
    .enumerate()
    .map(|(i, (label, value))| ClarificationOption {
        label: label.to_string(),
        value: value.to_string(),
        recommended: i == 0,
    })
    .collect()
}

fn option_from_value(value: &Value) -> Option<(String, String)> {
    let (label, value) = match value {
        Value::String(s) => (s.trim().to_string(), s.trim().to_string()),
        Value::Object(map) => {
            let label = map.get("label").and_then(Value::as_str).map(str::trim);
            let value = map.get("value").and_then(Value::as_str).map(str::trim);
            match (label, value) {
                (Some(l), Some(v)) => (l.to_string(), v.to_string()),
                (Some(l), None) => (l.to_string(), l.to_string()),
                (None, Some(v)) => (v.to_string(), v.to_string()),
                (None, None) => return None,
            }
        }
        _ => return None,
    };
    if label.is_empty() || value.is_empty() {
        None
    } else {
        Some((label, value))
    }
}

fn options_array(text: &str) -> Option<Vec<Value>> {
    let trimmed = text.trim();
    if let Ok(Value::Array(items)) = serde_json::from_str::<Value>(trimmed) {
        return Some(items);
    }
    JsonObjectScanner::new(trimmed)
        .filter_map(|span| serde_json::from_str::<Value>(span).ok())
        .find_map(|obj| match obj.get("options") {
            Some(Value::Array(items)) => Some(items.clone()),
            _ => None,
        })
}

/// Exactly three options from model text, or `None` if it has fewer usable ones.
pub fn parse_options(text: &str) -> Option<Vec<ClarificationOption>> {
    let parsed: Vec<(String, String)> = options_array(text)?
        .iter()
        .filter_map(option_from_value)
        .take(OPTION_COUNT)
        .collect();
    if parsed.len() < OPTION_COUNT {
        return None;
    }
    Some(
        parsed
            .into_iter()
            .enumerate()
            .map(|(i, (label, value))| ClarificationOption {
                label,
                value,
                recommended: i == 0,
            })
            .collect(),
    )
}

/// Ask the planner binding for reply options.
///
/// Returns the payload and the latency of the model call. Model failures
/// fall back to the fixed options; cancellation is an error.
pub async fn generate_options(
    ctx: &MiddlewareContext,
    question: &str,
) -> AppResult<(ClarificationPayload, u64)> {
    ctx.runtime.check_cancelled()?;
    let request = GenerateRequest::new(
        ctx.runtime.planner.clone(),
        vec![ChatMessage::user(format!(
            "User request: {}\nQuestion: {question}",
            ctx.user_message
        ))],
    )
    .with_system(OPTIONS_SYSTEM_PROMPT)
    .with_cancel(ctx.runtime.cancel.clone());

    let (options, latency_ms) = match ctx.runtime.models.generate_text(request).await {
        Ok(response) => match parse_options(&response.text) {
            Some(options) => (options, response.latency_ms),
            None => {
                warn!(task_id = %ctx.task_id, "clarification options unusable, using defaults");
                (fallback_options(), response.latency_ms)
            }
        },
        Err(e) if e.is_cancelled() => return Err(AppError::Cancelled),
        Err(e) => {
            warn!(task_id = %ctx.task_id, error = %e, "clarification options call failed, using defaults");
            (fallback_options(), 0)
        }
    };

    Ok((
        ClarificationPayload {
            question: question.to_string(),
            options,
        },
        latency_ms,
    ))
}

/// Reply text shown when the turn ends with a question.
pub fn format_reply(payload: &ClarificationPayload) -> String {
    let mut reply = payload.question.clone();
    reply.push_str("\n\n");
    for (i, option) in payload.options.iter().enumerate() {
        let marker = if option.recommended { " (recommended)" } else { "" };
        reply.push_str(&format!("{}. {}{marker}\n", i + 1, option.label));
    }
    reply.trim_end().to_string()
}
