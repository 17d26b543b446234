//! Human-in-the-Loop Integration Tests
//!
//! Risky tool calls pause the turn on the approval broker. These tests play
//! the approving client over the broker's event channel.

use std::sync::Arc;

use cascade_agent::{ChatInput, ToolPlanningChatAgent};
use cascade_agent_core::{HitlApprovalRequest, HitlApprovalResponse, RiskLevel};
use serde_json::json;
use tempfile::TempDir;
use tokio::sync::mpsc;

use crate::support::{agent_with, settings, ScriptedExecutor, ScriptedModels};

fn shell(command: &str) -> String {
    json!({"tool": "shell", "input": {"command": command}}).to_string()
}

fn answer(text: &str) -> String {
    json!({"answer": text}).to_string()
}

/// Answers every approval request with `approved`, returning what it saw.
fn spawn_client(
    agent: &ToolPlanningChatAgent,
    mut rx: mpsc::Receiver<HitlApprovalRequest>,
    approved: bool,
) -> tokio::task::JoinHandle<Vec<HitlApprovalRequest>> {
    let broker = agent.broker();
    tokio::spawn(async move {
        let mut seen = Vec::new();
        while let Some(request) = rx.recv().await {
            let response = if approved {
                HitlApprovalResponse::approve(request.task_id.clone())
            } else {
                HitlApprovalResponse::reject(request.task_id.clone(), "not on my machine")
            };
            assert!(broker.submit_approval(response));
            seen.push(request);
        }
        seen
    })
}

#[tokio::test]
async fn test_rejected_command_is_not_executed() {
    let dir = TempDir::new().unwrap();
    let models = ScriptedModels::replying(&[
        &shell("rm -rf /mnt/workspace/output"),
        "I did not delete anything because the request was rejected.",
    ]);
    let executor = ScriptedExecutor::new(|_| Ok("deleted".to_string()));
    let agent = agent_with(settings(dir.path()), models.clone(), executor.clone());

    let (tx, rx) = mpsc::channel(4);
    agent.broker().set_event_sender(tx).await;
    let client = spawn_client(&agent, rx, false);

    let reply = agent
        .send(ChatInput::new("clean the output folder"), None, None, None)
        .await
        .unwrap();
    agent.broker().clear_event_sender().await;
    let seen = client.await.unwrap();

    assert!(executor.executed().is_empty());
    assert!(reply.reply.contains("rejected"));
    assert_eq!(models.planner_calls(), 1);
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].risk, RiskLevel::High);
    assert!(seen[0].operation.starts_with("shell: rm -rf"));
    assert_eq!(seen[0].tool_calls[0]["name"], "shell");

    let synthesis = &models.calls()[1].1;
    assert!(synthesis
        .messages
        .iter()
        .any(|m| m.content.contains("Tool call rejected: not on my machine")));
    assert_eq!(agent.broker().pending_count(), 0);
}

#[tokio::test]
async fn test_approved_command_runs() {
    let dir = TempDir::new().unwrap();
    let models = ScriptedModels::replying(&[
        &shell("rm -rf /mnt/workspace/output/tmp"),
        &answer("cleaned"),
        "The temporary files are gone.",
    ]);
    let executor = ScriptedExecutor::new(|_| Ok("removed 3 files".to_string()));
    let agent = agent_with(settings(dir.path()), models.clone(), executor.clone());

    let (tx, rx) = mpsc::channel(4);
    agent.broker().set_event_sender(tx).await;
    let client = spawn_client(&agent, rx, true);

    let reply = agent
        .send(ChatInput::new("remove the tmp files"), None, None, None)
        .await
        .unwrap();
    agent.broker().clear_event_sender().await;
    assert_eq!(client.await.unwrap().len(), 1);

    assert_eq!(reply.reply, "The temporary files are gone.");
    let executed = executor.executed();
    assert_eq!(executed.len(), 1);
    assert_eq!(executed[0].input["command"], "rm -rf /mnt/workspace/output/tmp");
}

#[tokio::test]
async fn test_repeated_risky_command_asks_once() {
    let dir = TempDir::new().unwrap();
    let models = ScriptedModels::replying(&[
        &shell("rm -rf /mnt/workspace/output/tmp"),
        &shell("rm -rf /mnt/workspace/output/tmp"),
        "The temporary files were removed once.",
    ]);
    let executor = ScriptedExecutor::new(|_| Ok("removed 3 files".to_string()));
    let agent = agent_with(settings(dir.path()), models.clone(), executor.clone());

    let (tx, rx) = mpsc::channel(4);
    agent.broker().set_event_sender(tx).await;
    let client = spawn_client(&agent, rx, true);

    let reply = agent
        .send(ChatInput::new("remove the tmp files"), None, None, None)
        .await
        .unwrap();
    agent.broker().clear_event_sender().await;

    assert_eq!(client.await.unwrap().len(), 1);
    assert_eq!(executor.executed().len(), 1);
    assert_eq!(models.planner_calls(), 2);
    assert_eq!(reply.reply, "The temporary files were removed once.");
}

#[tokio::test]
async fn test_without_approval_channel_risky_calls_are_rejected() {
    let dir = TempDir::new().unwrap();
    let models = ScriptedModels::replying(&[&shell("git push --force"), "Nothing was pushed."]);
    let executor = ScriptedExecutor::new(|_| Ok("pushed".to_string()));
    let agent = agent_with(settings(dir.path()), models.clone(), executor.clone());

    agent
        .send(ChatInput::new("push it"), None, None, None)
        .await
        .unwrap();

    assert!(executor.executed().is_empty());
    let synthesis = &models.calls()[1].1;
    assert!(synthesis
        .messages
        .iter()
        .any(|m| m.content.contains("No approval channel available")));
}

#[tokio::test]
async fn test_low_risk_calls_skip_approval() {
    let dir = TempDir::new().unwrap();
    let models = ScriptedModels::replying(&[
        &json!({"tool": "list_dir", "input": {"path": "/mnt/workspace/input"}}).to_string(),
        &answer("empty"),
        "The input folder is empty.",
    ]);
    let executor = ScriptedExecutor::new(|_| Ok("/mnt/workspace/input is empty".to_string()));
    let agent = agent_with(settings(dir.path()), models, executor.clone());

    let (tx, mut rx) = mpsc::channel(4);
    agent.broker().set_event_sender(tx).await;

    agent
        .send(ChatInput::new("what is in input?"), None, None, None)
        .await
        .unwrap();
    assert_eq!(executor.executed().len(), 1);
    assert!(rx.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn test_unanswered_request_times_out_as_rejection() {
    let dir = TempDir::new().unwrap();
    let models = ScriptedModels::replying(&[&shell("sudo reboot"), "The reboot was not approved in time."]);
    let executor = ScriptedExecutor::new(|_| Ok("rebooting".to_string()));
    let mut settings = settings(dir.path());
    settings.hitl.timeout_secs = 30;
    let agent = agent_with(settings, models.clone(), executor.clone());

    // Keep the receiver alive but never answer.
    let (tx, _rx) = mpsc::channel(4);
    agent.broker().set_event_sender(tx).await;

    let reply = agent
        .send(ChatInput::new("reboot the box"), None, None, None)
        .await
        .unwrap();

    assert_eq!(reply.reply, "The reboot was not approved in time.");
    assert!(executor.executed().is_empty());
    let synthesis = &models.calls()[1].1;
    assert!(synthesis
        .messages
        .iter()
        .any(|m| m.content.contains("Approval timed out after 30s")));
}

#[tokio::test]
async fn test_disabled_hitl_runs_risky_calls() {
    let dir = TempDir::new().unwrap();
    let models = ScriptedModels::replying(&[&shell("rm -rf /mnt/workspace/staging"), &answer("done"), "Done."]);
    let executor = ScriptedExecutor::new(|_| Ok("removed".to_string()));
    let mut settings = settings(dir.path());
    settings.hitl.enabled = false;
    let agent = agent_with(settings, models, executor.clone());

    agent
        .send(ChatInput::new("wipe staging"), None, None, None)
        .await
        .unwrap();
    assert_eq!(executor.executed().len(), 1);
}

#[tokio::test]
async fn test_abort_while_waiting_for_approval() {
    let dir = TempDir::new().unwrap();
    let models = ScriptedModels::replying(&[&shell("rm -rf /mnt/workspace"), "never"]);
    let executor = ScriptedExecutor::new(|_| Ok("removed".to_string()));
    let agent = Arc::new(agent_with(settings(dir.path()), models.clone(), executor.clone()));

    let (tx, mut rx) = mpsc::channel(4);
    agent.broker().set_event_sender(tx).await;
    let abort = tokio_util::sync::CancellationToken::new();

    let trigger = abort.clone();
    let watcher = tokio::spawn(async move {
        let request = rx.recv().await;
        trigger.cancel();
        request
    });

    let err = agent
        .send(ChatInput::new("wipe everything"), None, None, Some(abort))
        .await
        .unwrap_err();
    assert!(err.is_cancelled());
    assert!(watcher.await.unwrap().is_some());
    assert!(executor.executed().is_empty());
    assert_eq!(models.total_calls(), 1);
    assert_eq!(agent.broker().pending_count(), 0);
}
