//! Title Middleware
//!
//! Gives a conversation a short title after its first completed turn. Runs
//! only when the request belongs to a conversation that has no title yet.
//! A failed title call falls back to the user message; a failed store write
//! is logged and recorded but never fails the request.

use async_trait::async_trait;
use cascade_agent_llm::ChatMessage;
use tracing::{debug, warn};

use super::context::{MiddlewareContext, MIDDLEWARE_LATENCY_KEY};
use super::pipeline::{Middleware, Phase};
use crate::storage::conversation_store::ConversationUpdate;
use crate::utils::error::AppResult;

pub const MAX_TITLE_CHARS: usize = 50;

const TITLE_SYSTEM_PROMPT: &str = "Write a title of at most six words for the \
conversation below. Reply with the title only, no quotes or punctuation at the end.";

pub struct TitleMiddleware;

/// First non-empty line, unquoted and capped at `MAX_TITLE_CHARS`.
pub fn clean_title(raw: &str) -> Option<String> {
    let line = raw.lines().map(str::trim).find(|l| !l.is_empty())?;
    let line = line
        .trim_start_matches(|c: char| c == '#' || c.is_whitespace())
        .trim_matches(|c: char| matches!(c, '"' | '\'' | '`' | '“' | '”' | '「' | '」' | '.' | '。'))
        .trim();
    if line.is_empty() {
        return None;
    }
    Some(truncate_chars(line, MAX_TITLE_CHARS))
}

fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let head: String = text.chars().take(max - 1).collect();
        format!("{}…", head.trim_end())
    }
}

#[async_trait]
impl Middleware for TitleMiddleware {
    fn name(&self) -> &str {
        "title"
    }

    fn phases(&self) -> &'static [Phase] {
        &[Phase::AfterAgent]
    }

    async fn after_agent(&self, mut ctx: MiddlewareContext) -> AppResult<MiddlewareContext> {
        let Some(conversation_id) = ctx.conversation_id.clone() else {
            return Ok(ctx);
        };

        let store = ctx.runtime.store.clone();
        match store.get_conversation(&conversation_id).await {
            Ok(Some(conversation)) if conversation.has_title() => return Ok(ctx),
            Ok(_) => {}
            Err(e) => {
                warn!(conversation_id = %conversation_id, error = %e, "failed to load conversation for title");
                return Ok(ctx.with_metadata("titleError", e.to_string()));
            }
        }

        let mut transcript = format!("User: {}", ctx.user_message);
        if let Some(reply) = &ctx.final_response {
            transcript.push_str(&format!("\nAssistant: {reply}"));
        }

        let generated = match ctx
            .runtime
            .generate_auxiliary(TITLE_SYSTEM_PROMPT, vec![ChatMessage::user(transcript)])
            .await
        {
            Ok(response) => {
                ctx.metadata.increment(MIDDLEWARE_LATENCY_KEY, response.latency_ms);
                clean_title(&response.text)
            }
            Err(e) if e.is_cancelled() => return Err(e),
            Err(e) => {
                warn!(conversation_id = %conversation_id, error = %e, "title generation failed, using message");
                None
            }
        };

        let title = match generated.or_else(|| clean_title(&ctx.user_message)) {
            Some(title) => title,
            None => return Ok(ctx),
        };

        let update = ConversationUpdate {
            title: Some(title.clone()),
        };
        match store.update_conversation(&conversation_id, update).await {
            Ok(_) => {
                debug!(conversation_id = %conversation_id, title = %title, "conversation titled");
                Ok(ctx
                    .with_metadata("titleGenerated", true)
                    .with_metadata("title", title))
            }
            Err(e) => {
                warn!(conversation_id = %conversation_id, error = %e, "failed to persist title");
                Ok(ctx.with_metadata("titleError", e.to_string()))
            }
        }
    }
}
