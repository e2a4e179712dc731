//! Approval round-trips between the turn loop and the transport.

use std::collections::HashMap;

use parking_lot::Mutex;
use tokio::sync::oneshot;

/// Pending approval requests for one session.
///
/// The turn loop registers a request and awaits its receiver; the transport
/// resolves it when the matching `approval_response` arrives. On disconnect
/// every outstanding awaiter is rejected by dropping its sender.
#[derive(Default)]
pub struct ApprovalBroker {
    pending: Mutex<HashMap<String, oneshot::Sender<bool>>>,
}

impl ApprovalBroker {
    /// Create an empty broker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new request. Returns its id and the receiver the caller
    /// awaits. A dropped sender (disconnect) reads as a denial.
    pub fn request(&self) -> (String, oneshot::Receiver<bool>) {
        let request_id = uuid::Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(request_id.clone(), tx);
        (request_id, rx)
    }

    /// Resolve a request. Returns whether a matching awaiter existed.
    pub fn resolve(&self, request_id: &str, approved: bool) -> bool {
        match self.pending.lock().remove(request_id) {
            Some(tx) => tx.send(approved).is_ok(),
            None => {
                tracing::warn!(request_id, "Approval response without a pending request");
                false
            }
        }
    }

    /// Reject all outstanding requests (session close).
    pub fn reject_all(&self) {
        let mut pending = self.pending.lock();
        if !pending.is_empty() {
            tracing::info!(count = pending.len(), "Rejecting outstanding approvals");
        }
        pending.clear();
    }

    /// Outstanding request count.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_resolve_delivers_decision() {
        let broker = ApprovalBroker::new();
        let (id, rx) = broker.request();
        assert_eq!(broker.pending_count(), 1);

        assert!(broker.resolve(&id, true));
        assert_eq!(rx.await, Ok(true));
        assert_eq!(broker.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_unknown_request_id() {
        let broker = ApprovalBroker::new();
        assert!(!broker.resolve("ghost", true));
    }

    #[tokio::test]
    async fn test_reject_all_fails_awaiters() {
        let broker = ApprovalBroker::new();
        let (_id, rx) = broker.request();
        broker.reject_all();
        assert!(rx.await.is_err());
    }
}
