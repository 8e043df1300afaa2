//! Transport seam for the distributed mode.
//!
//! [`PubSubDeferred`](crate::PubSubDeferred) talks to its message channel
//! exclusively through these traits. [`RedisBroker`](crate::RedisBroker)
//! implements them over Redis pub/sub; [`MemoryBroker`](crate::MemoryBroker)
//! implements them in-process for tests and single-process deployments.

use async_trait::async_trait;
use snafu::Snafu;

/// Errors from broker transports.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum BrokerError {
    /// Establishing a connection failed.
    #[snafu(display("broker connect failed: {message}"))]
    Connect {
        /// Description of the failure.
        message: String,
    },

    /// Subscribing to a channel failed.
    #[snafu(display("subscribe to channel '{channel}' failed: {message}"))]
    Subscribe {
        /// The channel being subscribed.
        channel: String,
        /// Description of the failure.
        message: String,
    },

    /// Publishing a message failed.
    #[snafu(display("publish to channel '{channel}' failed: {message}"))]
    Publish {
        /// The channel being published to.
        channel: String,
        /// Description of the failure.
        message: String,
    },

    /// Receiving from an active subscription failed.
    #[snafu(display("subscription receive failed: {message}"))]
    Receive {
        /// Description of the failure.
        message: String,
    },

    /// The subscription ended.
    #[snafu(display("subscription closed: {reason}"))]
    SubscriptionClosed {
        /// Why the subscription ended.
        reason: String,
    },
}

/// Publish/subscribe transport with named channels and fan-out delivery.
///
/// Delivery is fire-and-forget: publishing succeeds once the broker accepts
/// the message, whether or not anyone is subscribed to receive it.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Publish `payload` on `channel`.
    async fn publish(&self, channel: &str, payload: &[u8]) -> Result<(), BrokerError>;

    /// Open a new subscription on `channel`.
    ///
    /// The subscription observes only messages published after it opens.
    async fn subscribe(&self, channel: &str) -> Result<Box<dyn BrokerSubscription>, BrokerError>;
}

/// A live subscription to one channel.
#[async_trait]
pub trait BrokerSubscription: Send {
    /// Receive the next message.
    ///
    /// Any error is fatal to this subscription: callers are expected to drop
    /// it and subscribe afresh.
    async fn next_message(&mut self) -> Result<Vec<u8>, BrokerError>;
}
