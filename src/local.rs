//! In-process deferred results.

use async_trait::async_trait;

use crate::deferred::Deferred;
use crate::error::DeferredError;
use crate::error::DisplacedSnafu;
use crate::error::Result;
use crate::error::TicketNotFoundSnafu;
use crate::registry::WaiterRegistry;

/// Deferred results for producers and waiters inside one process.
///
/// Settlements are handed to the registered wait directly through shared
/// memory; no serialization is involved and values of any type can cross.
/// Unlike the distributed mode, settling a ticket nobody waits on is
/// reported to the caller as [`DeferredError::TicketNotFound`], so a
/// producer that may run ahead of its waiter can retry until the wait is
/// registered.
///
/// # Example
///
/// ```ignore
/// use deferred::Deferred;
/// use deferred::LocalDeferred;
///
/// let deferred = LocalDeferred::<String>::new();
///
/// let (settled, published) = tokio::join!(
///     deferred.await_ticket("job-42"),
///     deferred.resolve("job-42", "done".to_string()),
/// );
///
/// published?;
/// assert_eq!(settled?, "done");
/// # Ok::<(), deferred::DeferredError>(())
/// ```
pub struct LocalDeferred<T> {
    waiters: WaiterRegistry<Result<T>>,
}

impl<T> LocalDeferred<T> {
    /// Create an instance with no registered waits.
    pub fn new() -> Self {
        Self {
            waiters: WaiterRegistry::new(),
        }
    }

    /// Number of tickets currently awaited.
    pub async fn pending_tickets(&self) -> usize {
        self.waiters.pending().await
    }

    async fn settle(&self, ticket: &str, settlement: Result<T>) -> Result<()> {
        if self.waiters.settle(ticket, settlement).await {
            Ok(())
        } else {
            TicketNotFoundSnafu { ticket }.fail()
        }
    }
}

impl<T> Default for LocalDeferred<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<T: Send + 'static> Deferred for LocalDeferred<T> {
    type Value = T;

    async fn resolve(&self, ticket: &str, value: T) -> Result<()> {
        self.settle(ticket, Ok(value)).await
    }

    async fn reject(&self, ticket: &str, reason: &str) -> Result<()> {
        let rejection = DeferredError::Rejected {
            ticket: ticket.to_string(),
            reason: reason.to_string(),
        };
        self.settle(ticket, Err(rejection)).await
    }

    async fn await_ticket(&self, ticket: &str) -> Result<T> {
        let rx = self.waiters.register(ticket).await;
        match rx.await {
            Ok(settlement) => settlement,
            Err(_) => DisplacedSnafu { ticket }.fail(),
        }
    }
}
