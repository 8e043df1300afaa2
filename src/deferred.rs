//! The deferred contract shared by both deployment modes.

use async_trait::async_trait;

use crate::error::Result;

/// Ticket-correlated rendezvous between producers and waiters.
///
/// A waiter registers interest in a caller-chosen ticket with
/// [`await_ticket`](Deferred::await_ticket); a producer later settles that
/// ticket with [`resolve`](Deferred::resolve) or
/// [`reject`](Deferred::reject). Neither side holds a reference to the
/// other; the ticket is the only shared coordinate. Tickets are opaque and
/// unvalidated, assumed unique among outstanding waits on one instance, and
/// reusable once settled.
///
/// The contract is identical across deployment modes, so callers can stay
/// agnostic of where the other side runs. The trait is object safe:
/// `Arc<dyn Deferred<Value = T>>` erases the mode entirely.
///
/// There is no timeout or cancellation path. A wait with no matching
/// settlement suspends indefinitely; callers needing a bound wrap the wait
/// in their own deadline, e.g. `tokio::time::timeout`.
#[async_trait]
pub trait Deferred: Send + Sync {
    /// The value type delivered to waiters.
    type Value: Send;

    /// Settle `ticket` with a value, waking the wait registered for it.
    async fn resolve(&self, ticket: &str, value: Self::Value) -> Result<()>;

    /// Settle `ticket` with a rejection carrying `reason`.
    ///
    /// The wait registered for the ticket completes with
    /// [`DeferredError::Rejected`](crate::DeferredError::Rejected).
    async fn reject(&self, ticket: &str, reason: &str) -> Result<()>;

    /// Suspend until `ticket` is settled, returning the value or rejection.
    ///
    /// Registers a fresh wait, displacing any unclaimed wait already
    /// registered for the same ticket. Named `await_ticket` because `await`
    /// is a reserved keyword.
    async fn await_ticket(&self, ticket: &str) -> Result<Self::Value>;
}
