//! Summarization Middleware
//!
//! Compresses long conversations before a model call. When the message list
//! grows past the configured count or character budget, everything except
//! the most recent messages is replaced by a single system message holding a
//! model-written summary.
//!
//! A failed summary call is not fatal: messages are left untouched and the
//! failure is recorded in metadata. Cancellation still propagates.

use async_trait::async_trait;
use cascade_agent_llm::ChatMessage;
use tracing::{info, warn};

use super::context::{MiddlewareContext, MIDDLEWARE_LATENCY_KEY};
use super::pipeline::{Middleware, Phase};
use crate::models::settings::SummarizationSettings;
use crate::utils::error::AppResult;

pub const SUMMARY_PREFIX: &str = "Summary of earlier conversation:";

const SUMMARIZER_SYSTEM_PROMPT: &str = "You compress conversation history. \
Summarize the conversation below in a few short paragraphs. Keep decisions, \
file paths, tool results and open questions. Do not add anything new.";

/// Characters of one message kept in the summarizer transcript.
const TRANSCRIPT_MESSAGE_CHARS: usize = 2_000;

pub struct SummarizationMiddleware;

impl SummarizationMiddleware {
    pub fn should_summarize(settings: &SummarizationSettings, messages: &[ChatMessage]) -> bool {
        if !settings.enabled || messages.len() <= settings.keep_recent {
            return false;
        }
        let total_chars: usize = messages.iter().map(ChatMessage::char_len).sum();
        messages.len() > settings.max_messages || total_chars > settings.max_chars
    }

    fn transcript(messages: &[ChatMessage]) -> String {
        messages
            .iter()
            .map(|m| {
                let content: String = m.content.chars().take(TRANSCRIPT_MESSAGE_CHARS).collect();
                format!("[{}] {}", m.role.as_str(), content)
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

#[async_trait]
impl Middleware for SummarizationMiddleware {
    fn name(&self) -> &str {
        "summarization"
    }

    fn phases(&self) -> &'static [Phase] {
        &[Phase::BeforeModel]
    }

    async fn before_model(&self, mut ctx: MiddlewareContext) -> AppResult<MiddlewareContext> {
        let settings = ctx.runtime.settings.summarization.clone();
        if !Self::should_summarize(&settings, &ctx.messages) {
            return Ok(ctx);
        }

        let split = ctx.messages.len() - settings.keep_recent;
        let transcript = Self::transcript(&ctx.messages[..split]);
        let result = ctx
            .runtime
            .generate_auxiliary(SUMMARIZER_SYSTEM_PROMPT, vec![ChatMessage::user(transcript)])
            .await;

        match result {
            Ok(response) => {
                ctx.metadata.increment(MIDDLEWARE_LATENCY_KEY, response.latency_ms);
                let summary = response.text.trim();
                if summary.is_empty() {
                    warn!(task_id = %ctx.task_id, "summarizer returned empty text");
                    return Ok(ctx
                        .with_metadata("summarizationApplied", false)
                        .with_metadata("summarizationError", "empty summary"));
                }

                let recent = ctx.messages.split_off(split);
                let mut messages = Vec::with_capacity(recent.len() + 1);
                messages.push(ChatMessage::system(format!("{SUMMARY_PREFIX}\n{summary}")));
                messages.extend(recent);

                info!(task_id = %ctx.task_id, summarized = split, "conversation summarized");
                Ok(ctx
                    .with_messages(messages)
                    .with_metadata("summarizationApplied", true)
                    .with_metadata("summarizedMessageCount", split as u64))
            }
            Err(e) if e.is_cancelled() => Err(e),
            Err(e) => {
                warn!(task_id = %ctx.task_id, error = %e, "summarization failed, keeping messages");
                Ok(ctx
                    .with_metadata("summarizationApplied", false)
                    .with_metadata("summarizationError", e.to_string()))
            }
        }
    }
}
