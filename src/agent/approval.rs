// src/agent/approval.rs
// Async approval gate for dangerous tools. The agent parks on a oneshot
// keyed by a nonce; the transport resolves it from a user callback.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::oneshot;
use uuid::Uuid;

/// How long an approval may stay unanswered before it counts as denied.
pub const APPROVAL_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Default)]
pub struct ApprovalBroker {
    pending: Mutex<HashMap<String, oneshot::Sender<bool>>>,
}

impl ApprovalBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a new approval and return its id plus the receiving end.
    pub fn start(&self) -> (String, oneshot::Receiver<bool>) {
        let id = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .expect("approval map poisoned")
            .insert(id.clone(), tx);
        (id, rx)
    }

    /// Resolve an approval from a transport callback. Returns false when
    /// the id is unknown or already resolved.
    pub fn resolve(&self, id: &str, approved: bool) -> bool {
        let sender = self
            .pending
            .lock()
            .expect("approval map poisoned")
            .remove(id);
        match sender {
            Some(tx) => tx.send(approved).is_ok(),
            None => false,
        }
    }

    /// Drop an approval without resolving (the waiting turn went away).
    pub fn cancel(&self, id: &str) {
        self.pending
            .lock()
            .expect("approval map poisoned")
            .remove(id);
    }

    /// Await the user's decision. Timeout and channel loss both count as
    /// denial, identically.
    pub async fn wait(&self, id: &str, rx: oneshot::Receiver<bool>) -> bool {
        let decision = tokio::time::timeout(APPROVAL_TIMEOUT, rx).await;
        match decision {
            Ok(Ok(approved)) => approved,
            _ => {
                self.cancel(id);
                false
            }
        }
    }

    #[cfg(test)]
    pub fn pending_count(&self) -> usize {
        self.pending.lock().unwrap().len()
    }
}
