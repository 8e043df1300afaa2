//! Ticket-indexed registry of pending waits.

use std::collections::HashMap;

use tokio::sync::Mutex;
use tokio::sync::oneshot;

/// Registry of pending waits, keyed by ticket.
///
/// Each ticket holds at most one pending wait. The settlement channel is a
/// oneshot, so a settlement sent between registration and the first poll of
/// the receiver is buffered rather than lost. The map lock is held only for
/// registration and lookup; waiting happens outside it.
pub(crate) struct WaiterRegistry<S> {
    waiters: Mutex<HashMap<String, oneshot::Sender<S>>>,
}

impl<S> WaiterRegistry<S> {
    pub(crate) fn new() -> Self {
        Self {
            waiters: Mutex::new(HashMap::new()),
        }
    }

    /// Register a fresh wait for `ticket`.
    ///
    /// Any wait already registered for the ticket is displaced: its sender
    /// is dropped, which completes the displaced receiver with an error.
    pub(crate) async fn register(&self, ticket: &str) -> oneshot::Receiver<S> {
        let (tx, rx) = oneshot::channel();
        let mut waiters = self.waiters.lock().await;
        waiters.insert(ticket.to_string(), tx);
        rx
    }

    /// Deliver a settlement to the wait registered for `ticket`.
    ///
    /// Returns false when no wait is registered. A registered wait whose
    /// receiver has been dropped counts as delivered; the settlement is
    /// discarded with it.
    pub(crate) async fn settle(&self, ticket: &str, settlement: S) -> bool {
        let sender = {
            let mut waiters = self.waiters.lock().await;
            waiters.remove(ticket)
        };
        match sender {
            Some(tx) => {
                let _ = tx.send(settlement);
                true
            }
            None => false,
        }
    }

    /// Number of currently registered waits.
    pub(crate) async fn pending(&self) -> usize {
        self.waiters.lock().await.len()
    }
}
