use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::oneshot;
use uuid::Uuid;

/// Outcome of a resolved approval round-trip.
#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    pub approved: bool,
    pub reason: Option<String>,
}

/// Terminal failures of an approval wait.
#[derive(Debug, Error)]
pub enum ApprovalError {
    #[error("approval wait timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
    #[error("{0}")]
    Cancelled(String),
    #[error("approval waiter dropped")]
    Dropped,
}

#[derive(Debug)]
enum WaiterEvent {
    Resolved(Verdict),
    Cancelled(String),
}

/// Receiver half of a registered waiter. Created by
/// [`ApprovalRegistry::register`] and consumed by
/// [`ApprovalRegistry::await_decision`], so the waiter exists before the
/// matching request is published.
pub struct PendingApproval {
    rx: oneshot::Receiver<WaiterEvent>,
}

/// Process-wide correlation table for pending tool approvals.
///
/// One entry per outstanding request id; resolve, cancel, and timeout
/// all remove the entry, and the first remover wins. The lock is never
/// held across an await.
#[derive(Default)]
pub struct ApprovalRegistry {
    waiters: Mutex<HashMap<String, oneshot::Sender<WaiterEvent>>>,
}

impl ApprovalRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_request_id(&self) -> String {
        Uuid::new_v4().to_string()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, oneshot::Sender<WaiterEvent>>> {
        match self.waiters.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Register a waiter for `request_id`.
    pub fn register(&self, request_id: &str) -> PendingApproval {
        let (tx, rx) = oneshot::channel();
        if self.lock().insert(request_id.to_string(), tx).is_some() {
            tracing::warn!(request_id, "replaced existing approval waiter");
        }
        PendingApproval { rx }
    }

    /// Suspend until the first of: a matching resolve, a cancel, or the
    /// timeout. On timeout the entry is removed by compare-and-remove;
    /// if a racing resolve removed it first, its verdict is taken
    /// instead.
    pub async fn await_decision(
        &self,
        request_id: &str,
        mut pending: PendingApproval,
        timeout: Duration,
    ) -> Result<Verdict, ApprovalError> {
        let timeout_ms = timeout.as_millis() as u64;
        match tokio::time::timeout(timeout, &mut pending.rx).await {
            Ok(Ok(WaiterEvent::Resolved(verdict))) => Ok(verdict),
            Ok(Ok(WaiterEvent::Cancelled(reason))) => Err(ApprovalError::Cancelled(reason)),
            Ok(Err(_)) => Err(ApprovalError::Dropped),
            Err(_) => {
                let removed = self.lock().remove(request_id).is_some();
                if removed {
                    tracing::warn!(request_id, timeout_ms, "approval timed out");
                    return Err(ApprovalError::Timeout { timeout_ms });
                }
                // Lost the race: a resolve or cancel got there first.
                match pending.rx.try_recv() {
                    Ok(WaiterEvent::Resolved(verdict)) => Ok(verdict),
                    Ok(WaiterEvent::Cancelled(reason)) => Err(ApprovalError::Cancelled(reason)),
                    Err(_) => Err(ApprovalError::Timeout { timeout_ms }),
                }
            }
        }
    }

    /// Deliver a decision. Returns false (and logs the orphan) when no
    /// waiter matches.
    pub fn resolve(&self, request_id: &str, approved: bool, reason: Option<String>) -> bool {
        match self.lock().remove(request_id) {
            Some(tx) => {
                tracing::info!(request_id, approved, "approval resolved");
                if tx
                    .send(WaiterEvent::Resolved(Verdict { approved, reason }))
                    .is_err()
                {
                    tracing::debug!(request_id, "approval waiter gone before resolve");
                }
                true
            }
            None => {
                tracing::warn!(request_id, "orphan approval response, no pending request");
                false
            }
        }
    }

    /// Reject one waiter with `reason`. No-op if absent.
    pub fn cancel(&self, request_id: &str, reason: &str) {
        if let Some(tx) = self.lock().remove(request_id) {
            tracing::info!(request_id, reason, "approval cancelled");
            let _ = tx.send(WaiterEvent::Cancelled(reason.to_string()));
        }
    }

    /// Reject every pending waiter with `reason`.
    pub fn cancel_all(&self, reason: &str) {
        let drained: Vec<_> = self.lock().drain().collect();
        if drained.is_empty() {
            return;
        }
        tracing::info!(count = drained.len(), reason, "cancelling pending approvals");
        for (_, tx) in drained {
            let _ = tx.send(WaiterEvent::Cancelled(reason.to_string()));
        }
    }

    pub fn count(&self) -> usize {
        self.lock().len()
    }
}
