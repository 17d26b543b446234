//! Agent Loop Integration Tests
//!
//! Drives `ToolPlanningChatAgent::send` end to end with scripted models and
//! tools: step budget, repeat guard, failure policy, clarification turns,
//! streaming synthesis and cancellation.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use cascade_agent::{AppError, ChatInput, OnDelta};
use cascade_agent_core::ProgressStage;
use cascade_agent_llm::{ChatMessage, ModelRole};
use cascade_agent_tools::{
    SandboxService, ToolAction, ToolDescriptor, ToolExecutor, ToolObservation,
    WorkspaceToolExecutor,
};
use serde_json::json;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use crate::support::{
    agent_with, only_task_dir, recorder, settings, workspace_agent, CallKind, ScriptedExecutor,
    ScriptedModels,
};

fn list_dir(path: &str) -> String {
    json!({"tool": "list_dir", "input": {"path": path}}).to_string()
}

fn answer(text: &str) -> String {
    json!({"action": "answer", "answer": text}).to_string()
}

// ============================================================================
// Validation
// ============================================================================

#[tokio::test]
async fn test_blank_message_is_rejected_without_model_calls() {
    let dir = TempDir::new().unwrap();
    let models = ScriptedModels::replying(&[]);
    let agent = workspace_agent(dir.path(), models.clone());

    for message in ["", "   ", "\n\t "] {
        let err = agent
            .send(ChatInput::new(message), None, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)), "{err:?}");
        assert_eq!(err.to_string(), "Validation error: Message cannot be empty");
    }
    assert_eq!(models.total_calls(), 0);
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

// ============================================================================
// End to end
// ============================================================================

/// Seeds a README into the task workspace, then behaves like the
/// filesystem executor.
struct SeedingExecutor {
    inner: WorkspaceToolExecutor,
}

#[async_trait]
impl ToolExecutor for SeedingExecutor {
    fn available_tools(&self) -> Vec<ToolDescriptor> {
        self.inner.available_tools()
    }

    async fn execute_planner_tool(
        &self,
        action: &ToolAction,
        sandbox: &SandboxService,
        workspace_path: &Path,
        cancel: &CancellationToken,
    ) -> ToolObservation {
        let readme = workspace_path.join("README.md");
        if !readme.exists() {
            std::fs::write(&readme, "# Project\n").unwrap();
        }
        self.inner
            .execute_planner_tool(action, sandbox, workspace_path, cancel)
            .await
    }
}

#[tokio::test]
async fn test_list_workspace_files_end_to_end() {
    let dir = TempDir::new().unwrap();
    let models = ScriptedModels::replying(&[
        &json!({"action": "tool", "tool": "list_dir", "input": {"path": "/mnt/workspace"}}).to_string(),
        &answer("I checked the workspace and found README.md"),
        "I checked the workspace and found README.md",
    ]);
    let agent = agent_with(
        settings(dir.path()),
        models.clone(),
        Arc::new(SeedingExecutor {
            inner: WorkspaceToolExecutor::new(),
        }),
    );

    let (on_update, events) = recorder();
    let deltas: Arc<Mutex<String>> = Arc::default();
    let sink = Arc::clone(&deltas);
    let on_delta: OnDelta = Arc::new(move |d: &str| sink.lock().unwrap().push_str(d));
    let reply = agent
        .send(
            ChatInput::new("请看看工作区里有什么文件"),
            Some(on_update),
            Some(on_delta),
            None,
        )
        .await
        .unwrap();

    assert!(reply.reply.contains("README.md"));
    assert_eq!(reply.reply, "I checked the workspace and found README.md");
    assert_eq!(reply.provider, "openai");
    assert_eq!(reply.model, "synthesizer-model");
    assert_eq!(*deltas.lock().unwrap(), reply.reply);
    assert_eq!(models.planner_calls(), 2);
    assert_eq!(models.stream_calls(), 1);

    // The second planner call sees the listing, and so does synthesis.
    let calls = models.calls();
    let listing_seen = |messages: &[ChatMessage]| {
        messages
            .iter()
            .any(|m| m.content.contains("Observation 1 from list_dir (ok)") && m.content.contains("README.md"))
    };
    assert!(listing_seen(&calls[1].1.messages));
    assert_eq!(calls[2].0, CallKind::Stream);
    assert_eq!(calls[2].1.target.role, ModelRole::Synthesizer);
    assert!(listing_seen(&calls[2].1.messages));

    // Task workspace was allocated and the sandbox released afterwards.
    let task_dir = only_task_dir(dir.path());
    assert!(task_dir.join("README.md").is_file());
    for sub in ["input", "staging", "output"] {
        assert!(task_dir.join(sub).is_dir());
    }
    assert!(agent.sandbox().current_workspace().is_none());

    let events = events.lock().unwrap();
    let stages: Vec<ProgressStage> = events.iter().map(|e| e.stage).collect();
    assert_eq!(stages.first(), Some(&ProgressStage::Planning));
    assert_eq!(stages.last(), Some(&ProgressStage::Final));
    assert!(events
        .iter()
        .any(|e| e.stage == ProgressStage::Tool && e.message.starts_with("list_dir ok: ")));
}

#[tokio::test]
async fn test_direct_answer_uses_one_planner_and_one_synthesis_call() {
    let dir = TempDir::new().unwrap();
    let models = ScriptedModels::replying(&[&answer("Paris"), "The capital of France is Paris."]);
    let executor = ScriptedExecutor::new(|_| Ok("unused".to_string()));
    let agent = agent_with(settings(dir.path()), models.clone(), executor.clone());

    let reply = agent
        .send(ChatInput::new("What is the capital of France?"), None, None, None)
        .await
        .unwrap();

    assert_eq!(reply.reply, "The capital of France is Paris.");
    assert_eq!(models.planner_calls(), 1);
    assert_eq!(models.stream_calls(), 1);
    assert!(executor.executed().is_empty());

    // The draft reaches synthesis; no observations do.
    let synthesis = &models.calls()[1].1;
    assert!(synthesis.messages.iter().any(|m| m.content.contains("Paris")));
    assert!(!synthesis.messages.iter().any(|m| m.content.contains("Observation")));
}

#[tokio::test]
async fn test_empty_synthesis_falls_back_to_draft() {
    let dir = TempDir::new().unwrap();
    let models = ScriptedModels::replying(&[&answer("Draft reply"), "   "]);
    let agent = workspace_agent(dir.path(), models);

    let reply = agent
        .send(ChatInput::new("hello"), None, None, None)
        .await
        .unwrap();
    assert_eq!(reply.reply, "Draft reply");
}

// ============================================================================
// Planning loop bounds
// ============================================================================

#[tokio::test]
async fn test_planner_calls_never_exceed_max_steps() {
    let dir = TempDir::new().unwrap();
    let mut replies: Vec<String> = (0..3).map(|i| list_dir(&format!("/mnt/workspace/d{i}"))).collect();
    replies.push("Summary of what I found.".to_string());
    let models = ScriptedModels::new(replies.into_iter().map(Ok).collect());
    let executor = ScriptedExecutor::new(|_| Ok("entry".to_string()));
    let mut settings = settings(dir.path());
    settings.max_steps = 3;
    let agent = agent_with(settings, models.clone(), executor.clone());

    let reply = agent
        .send(ChatInput::new("explore"), None, None, None)
        .await
        .unwrap();

    assert_eq!(reply.reply, "Summary of what I found.");
    assert_eq!(models.planner_calls(), 3);
    assert_eq!(executor.executed().len(), 3);
    assert_eq!(models.stream_calls(), 1);
}

#[tokio::test]
async fn test_repeated_tool_call_ends_planning() {
    let dir = TempDir::new().unwrap();
    let models = ScriptedModels::replying(&[
        &list_dir("/mnt/workspace"),
        &list_dir("/mnt/workspace"),
        "done",
    ]);
    let executor = ScriptedExecutor::new(|_| Ok("README.md".to_string()));
    let agent = agent_with(settings(dir.path()), models.clone(), executor.clone());

    agent
        .send(ChatInput::new("look around"), None, None, None)
        .await
        .unwrap();

    assert_eq!(executor.executed().len(), 1);
    assert_eq!(models.planner_calls(), 2);
}

#[tokio::test]
async fn test_missing_path_ends_planning_after_progress() {
    let dir = TempDir::new().unwrap();
    let models = ScriptedModels::replying(&[
        &list_dir("/mnt/workspace"),
        &json!({"tool": "read_file", "input": {"path": "/mnt/workspace/missing.txt"}}).to_string(),
        "The file does not exist.",
    ]);
    let agent = workspace_agent(dir.path(), models.clone());

    let reply = agent
        .send(ChatInput::new("read missing.txt"), None, None, None)
        .await
        .unwrap();

    assert_eq!(reply.reply, "The file does not exist.");
    assert_eq!(models.planner_calls(), 2);
    let synthesis = &models.calls()[2].1;
    assert!(synthesis
        .messages
        .iter()
        .any(|m| m.content.contains("path does not exist")));
}

#[tokio::test]
async fn test_escaping_path_ends_planning() {
    let dir = TempDir::new().unwrap();
    let models = ScriptedModels::replying(&[&list_dir("/etc"), "Not allowed."]);
    let agent = workspace_agent(dir.path(), models.clone());

    agent
        .send(ChatInput::new("list /etc"), None, None, None)
        .await
        .unwrap();
    assert_eq!(models.planner_calls(), 1);
}

#[tokio::test]
async fn test_recoverable_failure_after_success_keeps_planning() {
    let dir = TempDir::new().unwrap();
    let models = ScriptedModels::replying(&[
        &list_dir("/mnt/workspace/a"),
        &list_dir("/mnt/workspace/b"),
        &answer("partial"),
        "Here is what I could see.",
    ]);
    let executor = ScriptedExecutor::new(|action| match action.input["path"].as_str() {
        Some("/mnt/workspace/b") => Err("temporary listing error".to_string()),
        _ => Ok("file.txt".to_string()),
    });
    let agent = agent_with(settings(dir.path()), models.clone(), executor.clone());

    agent
        .send(ChatInput::new("list both"), None, None, None)
        .await
        .unwrap();
    assert_eq!(executor.executed().len(), 2);
    assert_eq!(models.planner_calls(), 3);
}

#[tokio::test]
async fn test_first_failure_ends_planning() {
    let dir = TempDir::new().unwrap();
    let models = ScriptedModels::replying(&[&list_dir("/mnt/workspace/a"), "Failed."]);
    let executor = ScriptedExecutor::new(|_| Err("temporary listing error".to_string()));
    let agent = agent_with(settings(dir.path()), models.clone(), executor.clone());

    agent
        .send(ChatInput::new("list"), None, None, None)
        .await
        .unwrap();
    assert_eq!(executor.executed().len(), 1);
    assert_eq!(models.planner_calls(), 1);
}

#[tokio::test]
async fn test_delegation_is_capped_and_ends_planning() {
    let dir = TempDir::new().unwrap();
    let models = ScriptedModels::replying(&[
        &json!({
            "tool": "delegate",
            "input": {"tasks": ["t1", "t2", "t3", "t4", "t5"]}
        })
        .to_string(),
        "All sub-tasks finished.",
    ]);
    let executor = ScriptedExecutor::new(|_| Ok("3 sub-tasks finished".to_string()));
    let mut settings = settings(dir.path());
    settings.hitl.enabled = false;
    let agent = agent_with(settings, models.clone(), executor.clone());

    agent
        .send(ChatInput::new("split the work"), None, None, None)
        .await
        .unwrap();

    let executed = executor.executed();
    assert_eq!(executed.len(), 1);
    assert_eq!(executed[0].input["tasks"], json!(["t1", "t2", "t3"]));
    assert_eq!(models.planner_calls(), 1);
}

#[tokio::test]
async fn test_malformed_planner_json_is_not_shown_to_user() {
    let dir = TempDir::new().unwrap();
    let models = ScriptedModels::replying(&[r#"{"tool": "list_dir", "input": {"path": "#, "I could not plan that."]);
    let agent = workspace_agent(dir.path(), models.clone());

    let reply = agent
        .send(ChatInput::new("list"), None, None, None)
        .await
        .unwrap();
    assert_eq!(reply.reply, "I could not plan that.");
    let synthesis = &models.calls()[1].1;
    assert!(!synthesis.messages.iter().any(|m| m.content.contains(r#""tool""#)));
}

// ============================================================================
// Clarification
// ============================================================================

fn ask(question: &str) -> String {
    json!({"tool": "ask_clarification", "input": {"question": question}}).to_string()
}

#[tokio::test]
async fn test_clarification_ends_turn_without_synthesis() {
    let dir = TempDir::new().unwrap();
    let models = ScriptedModels::replying(&[
        &ask("Which report do you mean?"),
        r#"{"options":[{"label":"Q3 sales","value":"the Q3 sales report"},{"label":"Q4 sales"},"Annual summary"]}"#,
    ]);
    let executor = ScriptedExecutor::new(|_| Ok("unused".to_string()));
    let agent = agent_with(settings(dir.path()), models.clone(), executor.clone());
    let (on_update, events) = recorder();

    let reply = agent
        .send(ChatInput::new("fix the report"), Some(on_update), None, None)
        .await
        .unwrap();

    assert_eq!(models.total_calls(), 2);
    assert_eq!(models.stream_calls(), 0);
    assert!(executor.executed().is_empty());
    assert_eq!(reply.model, "planner-model");
    assert!(reply.reply.starts_with("Which report do you mean?"));
    assert!(reply.reply.contains("1. Q3 sales (recommended)"));
    assert!(reply.reply.contains("3. Annual summary"));

    let events = events.lock().unwrap();
    let clarification = events
        .iter()
        .find(|e| e.stage == ProgressStage::Clarification)
        .unwrap();
    let payload = &clarification.payload.as_ref().unwrap().clarification;
    assert_eq!(payload.question, "Which report do you mean?");
    assert_eq!(payload.options.len(), 3);
    assert!(payload.options[0].recommended);
    assert!(!payload.options[1].recommended && !payload.options[2].recommended);
    assert_eq!(payload.options[0].value, "the Q3 sales report");
    assert_eq!(events.last().unwrap().stage, ProgressStage::Final);
}

#[tokio::test]
async fn test_clarification_falls_back_to_fixed_options() {
    let dir = TempDir::new().unwrap();
    let models = ScriptedModels::replying(&[&ask("Which folder?"), "Maybe input or output?"]);
    let agent = workspace_agent(dir.path(), models.clone());
    let (on_update, events) = recorder();

    let reply = agent
        .send(ChatInput::new("clean the folder"), Some(on_update), None, None)
        .await
        .unwrap();

    assert!(reply.reply.contains("1. Go with your best guess (recommended)"));
    let events = events.lock().unwrap();
    let payload = events
        .iter()
        .find_map(|e| e.payload.as_ref())
        .map(|p| p.clarification.clone())
        .unwrap();
    assert_eq!(payload.options.len(), 3);
    assert!(payload.options[0].recommended);
    assert_eq!(models.stream_calls(), 0);
}

// ============================================================================
// Failures and cancellation
// ============================================================================

#[tokio::test]
async fn test_abort_during_tool_stops_without_further_calls() {
    let dir = TempDir::new().unwrap();
    let abort = CancellationToken::new();
    let models = ScriptedModels::replying(&[&list_dir("/mnt/workspace"), &answer("never"), "never"]);
    let executor = ScriptedExecutor::cancelling(abort.clone());
    let agent = agent_with(settings(dir.path()), models.clone(), executor.clone());
    let (on_update, events) = recorder();

    let err = agent
        .send(ChatInput::new("list"), Some(on_update), None, Some(abort))
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::Cancelled));
    assert_eq!(models.total_calls(), 1);
    assert_eq!(executor.executed().len(), 1);
    assert!(agent.sandbox().current_workspace().is_none());
    // Cancellation is not reported as an error event.
    assert!(!events
        .lock()
        .unwrap()
        .iter()
        .any(|e| e.stage == ProgressStage::Error || e.stage == ProgressStage::Final));
}

#[tokio::test]
async fn test_already_aborted_request_makes_no_calls() {
    let dir = TempDir::new().unwrap();
    let abort = CancellationToken::new();
    abort.cancel();
    let models = ScriptedModels::replying(&[&answer("never")]);
    let agent = workspace_agent(dir.path(), models.clone());

    let err = agent
        .send(ChatInput::new("hello"), None, None, Some(abort))
        .await
        .unwrap_err();
    assert!(err.is_cancelled());
    assert_eq!(models.total_calls(), 0);
}

#[tokio::test]
async fn test_synthesis_failure_surfaces_error_event() {
    let dir = TempDir::new().unwrap();
    let models = ScriptedModels::new(vec![
        Ok(answer("draft")),
        Err(cascade_agent_llm::LlmError::other("upstream 502")),
    ]);
    let agent = workspace_agent(dir.path(), models);
    let (on_update, events) = recorder();

    let err = agent
        .send(ChatInput::new("hello"), Some(on_update), None, None)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("upstream 502"));

    let events = events.lock().unwrap();
    let last = events.last().unwrap();
    assert_eq!(last.stage, ProgressStage::Error);
    assert!(agent.sandbox().current_workspace().is_none());
}

// ============================================================================
// History and persistence
// ============================================================================

#[tokio::test]
async fn test_history_precedes_user_message_in_planner_prompt() {
    let dir = TempDir::new().unwrap();
    let models = ScriptedModels::replying(&[&answer("42"), "It is 42."]);
    let agent = workspace_agent(dir.path(), models.clone());

    agent
        .send(
            ChatInput::new("and now?").with_history(vec![
                ChatMessage::user("what is six times seven"),
                ChatMessage::assistant("42"),
            ]),
            None,
            None,
            None,
        )
        .await
        .unwrap();

    let planner = &models.calls()[0].1;
    let contents: Vec<&str> = planner.messages.iter().map(|m| m.content.as_str()).collect();
    let first = contents.iter().position(|c| *c == "what is six times seven").unwrap();
    let last = contents.iter().position(|c| *c == "and now?").unwrap();
    assert!(first < last);
}

#[tokio::test]
async fn test_conversation_gets_a_title() {
    let dir = TempDir::new().unwrap();
    let models = ScriptedModels::replying(&[&answer("hi"), "Hello there!", "\"Friendly greeting.\""]);
    let store = Arc::new(cascade_agent::InMemoryConversationStore::new());
    let agent = cascade_agent::ToolPlanningChatAgent::builder(
        settings(dir.path()),
        models.clone(),
        Arc::new(WorkspaceToolExecutor::new()),
    )
    .router(Arc::new(crate::support::FixedRouter))
    .store(store.clone())
    .build()
    .unwrap();

    agent
        .send(
            ChatInput::new("hello").with_conversation_id("conv-1"),
            None,
            None,
            None,
        )
        .await
        .unwrap();

    use cascade_agent::ConversationStore;
    let conversation = store.get_conversation("conv-1").await.unwrap().unwrap();
    assert_eq!(conversation.title.as_deref(), Some("Friendly greeting"));
    assert_eq!(models.total_calls(), 3);
}
