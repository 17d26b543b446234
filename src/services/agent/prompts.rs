//! Prompt builders for the planner and synthesizer calls.

use cascade_agent_core::{ChatMode, TodoItem, TodoStatus};
use cascade_agent_llm::ChatMessage;
use cascade_agent_tools::{ToolDescriptor, ToolObservation, CLARIFICATION_TOOL};

/// Characters of one observation's output replayed into a prompt.
const OBSERVATION_PROMPT_CHARS: usize = 4_000;

pub fn clarification_descriptor() -> ToolDescriptor {
    ToolDescriptor::new(
        CLARIFICATION_TOOL,
        "Ask the user one question when the request is ambiguous. input: {\"question\"}",
    )
}

pub fn planner_system_prompt(
    chat_mode: ChatMode,
    tools: &[ToolDescriptor],
    todos: Option<&[TodoItem]>,
    virtual_root: &str,
) -> String {
    let mut prompt = String::from(
        "You are the planning step of a coding assistant. Decide the single next action.\n\
         Reply with exactly one JSON object and nothing else:\n\
         {\"action\":\"answer\",\"answer\":\"...\"} when you can answer now\n\
         {\"action\":\"tool\",\"tool\":\"<name>\",\"input\":{...},\"reason\":\"...\"} to call one tool\n",
    );

    if tools.is_empty() {
        prompt.push_str("\nNo tools are available. Always answer directly.\n");
    } else {
        prompt.push_str("\nAvailable tools:\n");
        for tool in tools {
            prompt.push_str(&format!("- {}: {}\n", tool.name, tool.description));
        }
        prompt.push_str(&format!(
            "\nThe task workspace is mounted at {virtual_root}. Use paths below it.\n\
             Never repeat a tool call with the same input. Answer once the observations are enough.\n"
        ));
    }

    if chat_mode == ChatMode::Agent {
        prompt.push_str("\nYou are in agent mode: work towards completing the task list.\n");
        match todos {
            Some(items) if !items.is_empty() => {
                prompt.push_str("Task list:\n");
                for item in items {
                    let mark = match item.status {
                        TodoStatus::Completed => "x",
                        TodoStatus::InProgress => "~",
                        TodoStatus::Pending => " ",
                    };
                    prompt.push_str(&format!("- [{mark}] {}\n", item.content));
                }
            }
            _ => prompt.push_str("The task list is empty.\n"),
        }
    }
    prompt
}

pub fn synthesis_system_prompt(chat_mode: ChatMode) -> String {
    let mut prompt = String::from(
        "You are a helpful coding assistant. Write the final answer for the user from the \
         conversation and the tool observations. Only state what the observations support. \
         Reply in the language the user wrote in.",
    );
    if chat_mode == ChatMode::Agent {
        prompt.push_str(" Finish with the next step of the task if one remains.");
    }
    prompt
}

pub fn observation_message(index: usize, observation: &ToolObservation) -> ChatMessage {
    let status = if observation.ok { "ok" } else { "failed" };
    let mut output: String = observation.output.chars().take(OBSERVATION_PROMPT_CHARS).collect();
    if observation.output.chars().count() > OBSERVATION_PROMPT_CHARS {
        output.push_str("\n... (truncated)");
    }
    ChatMessage::system(format!(
        "Observation {} from {} ({status})\nInput: {}\nOutput:\n{output}",
        index + 1,
        observation.tool,
        observation.input,
    ))
}

/// Conversation followed by every observation so far.
pub fn planner_messages(messages: &[ChatMessage], observations: &[ToolObservation]) -> Vec<ChatMessage> {
    let mut out = messages.to_vec();
    out.extend(observations.iter().enumerate().map(|(i, o)| observation_message(i, o)));
    out
}

pub fn synthesis_messages(
    messages: &[ChatMessage],
    observations: &[ToolObservation],
    draft: Option<&str>,
) -> Vec<ChatMessage> {
    let mut out = planner_messages(messages, observations);
    if let Some(draft) = draft {
        out.push(ChatMessage::system(format!(
            "Draft answer from planning (rewrite it for the user):\n{draft}"
        )));
    }
    out
}
