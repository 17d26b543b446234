//! Approval Broker
//!
//! Correlates approval requests with user decisions. A waiting request is
//! registered under its task id; `submit_approval` resolves exactly that
//! wait. A wait that nobody answers resolves to a rejection at the timeout.
//! The pending entry is removed on every exit path by a scoped guard.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use cascade_agent_core::{HitlApprovalRequest, HitlApprovalResponse};
use tokio::sync::{mpsc, oneshot, RwLock};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::utils::error::{AppError, AppResult};

struct PendingApproval {
    id: Uuid,
    responder: oneshot::Sender<HitlApprovalResponse>,
}

/// Shared between the HITL middleware and whatever answers approvals.
#[derive(Default)]
pub struct ApprovalBroker {
    pending: Mutex<HashMap<String, PendingApproval>>,
    /// Channel approval requests are published on
    event_tx: RwLock<Option<mpsc::Sender<HitlApprovalRequest>>>,
}

/// Removes its own pending entry when dropped.
struct PendingGuard<'a> {
    broker: &'a ApprovalBroker,
    task_id: String,
    id: Uuid,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        let mut pending = self.broker.pending.lock().unwrap_or_else(|e| e.into_inner());
        if pending.get(&self.task_id).map(|p| p.id) == Some(self.id) {
            pending.remove(&self.task_id);
        }
    }
}

impl ApprovalBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connect the channel `approval-required` events are sent on.
    pub async fn set_event_sender(&self, tx: mpsc::Sender<HitlApprovalRequest>) {
        *self.event_tx.write().await = Some(tx);
    }

    pub async fn clear_event_sender(&self) {
        *self.event_tx.write().await = None;
    }

    /// Number of requests currently waiting for a decision.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Resolve the wait registered for `response.task_id`.
    ///
    /// Returns false when nothing is waiting for that task.
    pub fn submit_approval(&self, response: HitlApprovalResponse) -> bool {
        let entry = self
            .pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&response.task_id);
        match entry {
            Some(pending) => {
                info!(task_id = %response.task_id, approved = response.approved, "approval submitted");
                pending.responder.send(response).is_ok()
            }
            None => {
                warn!(task_id = %response.task_id, "approval submitted for unknown task");
                false
            }
        }
    }

    fn register(
        &self,
        task_id: &str,
        responder: oneshot::Sender<HitlApprovalResponse>,
    ) -> PendingGuard<'_> {
        let id = Uuid::new_v4();
        let previous = self
            .pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(task_id.to_string(), PendingApproval { id, responder });
        if previous.is_some() {
            warn!(task_id, "replacing an approval request that was still pending");
        }
        PendingGuard {
            broker: self,
            task_id: task_id.to_string(),
            id,
        }
    }

    /// Publish `request` and wait for the matching decision.
    ///
    /// Without a connected channel, or when publishing fails, the request is
    /// rejected immediately. One deadline covers both publishing and waiting,
    /// so a backed-up channel times out like an unanswered request. Timing
    /// out is a rejection; cancellation is an error.
    pub async fn request_approval(
        &self,
        request: HitlApprovalRequest,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> AppResult<HitlApprovalResponse> {
        let task_id = request.task_id.clone();
        let deadline = Instant::now() + timeout;
        let (tx, rx) = oneshot::channel();
        let _guard = self.register(&task_id, tx);

        let sender = self.event_tx.read().await.clone();
        let Some(sender) = sender else {
            warn!(task_id = %task_id, "no approval channel connected, rejecting");
            return Ok(HitlApprovalResponse::reject(
                task_id,
                "No approval channel available",
            ));
        };

        tokio::select! {
            _ = cancel.cancelled() => return Err(AppError::Cancelled),
            sent = tokio::time::timeout_at(deadline, sender.send(request)) => match sent {
                Ok(Ok(())) => {}
                Ok(Err(_)) => {
                    warn!(task_id = %task_id, "approval channel closed, rejecting");
                    return Ok(HitlApprovalResponse::reject(task_id, "Approval channel closed"));
                }
                Err(_) => {
                    warn!(task_id = %task_id, "approval channel full until timeout, rejecting");
                    return Ok(timed_out(task_id, timeout));
                }
            },
        }
        debug!(task_id = %task_id, timeout_secs = timeout.as_secs(), "waiting for approval");

        tokio::select! {
            _ = cancel.cancelled() => Err(AppError::Cancelled),
            result = tokio::time::timeout_at(deadline, rx) => match result {
                Ok(Ok(response)) => Ok(response),
                Ok(Err(_)) => Ok(HitlApprovalResponse::reject(
                    task_id,
                    "Approval request was superseded",
                )),
                Err(_) => {
                    warn!(task_id = %task_id, "approval timed out, rejecting");
                    Ok(timed_out(task_id, timeout))
                }
            },
        }
    }
}

fn timed_out(task_id: String, timeout: Duration) -> HitlApprovalResponse {
    HitlApprovalResponse::reject(task_id, format!("Approval timed out after {}s", timeout.as_secs()))
}
