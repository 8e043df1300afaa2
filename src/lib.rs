//! Ticket-correlated deferred results, in one process or across many.
//!
//! A producer settles a caller-chosen ticket with a value or a rejection;
//! a waiter awaits that ticket. Neither side references the other, and a
//! wait registered before or after its settlement begins still rendezvouses
//! exactly once.
//!
//! Two deployment modes implement the same [`Deferred`] contract:
//! - [`LocalDeferred`] rendezvouses inside one process through shared
//!   memory.
//! - [`PubSubDeferred`] spans processes over a publish/subscribe broker:
//!   each process keeps one subscription on a shared channel, and whichever
//!   process awaits a ticket receives the settlement published for it.
//!   [`RedisDeferred`] is the Redis-backed instance; [`MemoryBroker`] backs
//!   the same machinery in-process for tests and single-process use.
//!
//! # Example
//!
//! ```ignore
//! use deferred::Deferred;
//! use deferred::LocalDeferred;
//!
//! let deferred = LocalDeferred::<String>::new();
//!
//! let (settled, published) = tokio::join!(
//!     deferred.await_ticket("job-42"),
//!     deferred.resolve("job-42", "done".to_string()),
//! );
//!
//! published?;
//! assert_eq!(settled?, "done");
//! # Ok::<(), deferred::DeferredError>(())
//! ```

mod broker;
mod codec;
mod deferred;
mod envelope;
mod error;
mod local;
mod memory;
mod pubsub;
mod redis;
mod registry;

pub use broker::Broker;
pub use broker::BrokerError;
pub use broker::BrokerSubscription;
pub use codec::CodecError;
pub use codec::JsonCodec;
pub use codec::PayloadCodec;
pub use codec::RawCodec;
pub use deferred::Deferred;
pub use envelope::Envelope;
pub use error::DeferredError;
pub use error::Result;
pub use local::LocalDeferred;
pub use memory::MemoryBroker;
pub use pubsub::PubSubConfig;
pub use pubsub::PubSubDeferred;
pub use pubsub::SubscriptionState;
pub use redis::RedisBroker;
pub use redis::RedisConfig;
pub use redis::RedisDeferred;
