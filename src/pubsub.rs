//! Distributed deferred results over a publish/subscribe channel.
//!
//! Every [`PubSubDeferred`] owns one background task that keeps a
//! subscription to the instance's channel alive for the instance's whole
//! lifetime, reconnecting with a fixed backoff whenever the transport
//! fails. Inbound settlements are routed to the wait registered for their
//! ticket in this process; settlements for tickets nobody here awaits are
//! dropped, since they are usually meant for another process sharing the
//! channel.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use snafu::ResultExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::broker::Broker;
use crate::codec::JsonCodec;
use crate::codec::PayloadCodec;
use crate::codec::RawCodec;
use crate::deferred::Deferred;
use crate::envelope::Envelope;
use crate::error::DecodeSnafu;
use crate::error::DisplacedSnafu;
use crate::error::EncodeSnafu;
use crate::error::RejectedSnafu;
use crate::error::Result;
use crate::registry::WaiterRegistry;

/// Configuration for the distributed mode.
#[derive(Debug, Clone)]
pub struct PubSubConfig {
    /// Delay between reconnect attempts after the subscription fails.
    pub reconnect_backoff: Duration,
}

impl Default for PubSubConfig {
    fn default() -> Self {
        Self {
            reconnect_backoff: Duration::from_secs(1),
        }
    }
}

/// Observable state of the subscription task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    /// Establishing the subscription.
    Connecting,
    /// Subscribed and dispatching messages.
    Subscribed,
    /// Subscription lost; waiting out the backoff before reconnecting.
    Faulted,
}

impl SubscriptionState {
    /// Returns true while the subscription is live.
    pub fn is_subscribed(&self) -> bool {
        matches!(self, SubscriptionState::Subscribed)
    }
}

/// Settlement routed from the subscription task to one waiter.
///
/// Payloads stay undecoded here; the awaiting side applies the instance's
/// codec, so a decode failure lands on the one wait it concerns.
#[derive(Debug, PartialEq, Eq)]
enum RemoteSettlement {
    /// The producer rejected the ticket with this reason.
    Rejected(String),
    /// The producer resolved the ticket with this payload.
    Payload(Vec<u8>),
}

/// Deferred results spanning processes over a publish/subscribe broker.
///
/// All processes sharing a broker and channel name participate in one
/// ticket namespace: a settlement published by any of them reaches the
/// process currently awaiting that ticket. Settling a ticket nobody awaits
/// succeeds and delivers nothing; publish success only confirms the broker
/// accepted the message.
///
/// Transport failures are never surfaced to waiters. The subscription task
/// retries forever, so a prolonged outage shows up only as waits that do
/// not complete; its progress is observable through
/// [`state`](PubSubDeferred::state) and
/// [`watch_state`](PubSubDeferred::watch_state).
///
/// Cloning is cheap and clones share the subscription, the waits, and the
/// broker. The subscription task stops when the last clone is dropped.
///
/// # Example
///
/// ```ignore
/// use deferred::Deferred;
/// use deferred::MemoryBroker;
/// use deferred::PubSubConfig;
/// use deferred::PubSubDeferred;
///
/// let broker = MemoryBroker::new();
/// let deferred: PubSubDeferred<String, _> =
///     PubSubDeferred::new(broker, "replies", PubSubConfig::default());
///
/// let wait = {
///     let deferred = deferred.clone();
///     tokio::spawn(async move { deferred.await_ticket("req-7").await })
/// };
///
/// // Possibly from a different process subscribed to "replies".
/// deferred.resolve("req-7", "pong".to_string()).await?;
///
/// assert_eq!(wait.await.unwrap()?, "pong");
/// # Ok::<(), deferred::DeferredError>(())
/// ```
pub struct PubSubDeferred<T, B: ?Sized> {
    inner: Arc<Inner<B>>,
    codec: Arc<dyn PayloadCodec<T>>,
}

impl<T, B: ?Sized> Clone for PubSubDeferred<T, B> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            codec: self.codec.clone(),
        }
    }
}

struct Inner<B: ?Sized> {
    channel: String,
    waiters: Arc<WaiterRegistry<RemoteSettlement>>,
    state_rx: watch::Receiver<SubscriptionState>,
    task: JoinHandle<()>,
    broker: Arc<B>,
}

impl<B: ?Sized> Drop for Inner<B> {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl<T, B> PubSubDeferred<T, B>
where
    B: Broker + ?Sized + 'static,
{
    /// Create an instance with the default JSON payload codec.
    ///
    /// Spawns the subscription task immediately; the instance is usable
    /// right away, though settlements published before the first subscribe
    /// completes are not observed. [`watch_state`](PubSubDeferred::watch_state)
    /// tells when the subscription is live.
    pub fn new(broker: Arc<B>, channel: impl Into<String>, config: PubSubConfig) -> Self
    where
        T: Serialize + DeserializeOwned,
    {
        Self::with_codec(broker, channel, config, JsonCodec)
    }

    /// Create an instance with a caller-supplied payload codec.
    pub fn with_codec<C>(
        broker: Arc<B>,
        channel: impl Into<String>,
        config: PubSubConfig,
        codec: C,
    ) -> Self
    where
        C: PayloadCodec<T> + 'static,
    {
        let channel = channel.into();
        let waiters = Arc::new(WaiterRegistry::new());
        let (state_tx, state_rx) = watch::channel(SubscriptionState::Connecting);

        let task = tokio::spawn(subscription_loop(
            broker.clone(),
            channel.clone(),
            waiters.clone(),
            state_tx,
            config.reconnect_backoff,
        ));

        Self {
            inner: Arc::new(Inner {
                channel,
                waiters,
                state_rx,
                task,
                broker,
            }),
            codec: Arc::new(codec),
        }
    }

    /// Name of the channel this instance publishes and subscribes on.
    pub fn channel(&self) -> &str {
        &self.inner.channel
    }

    /// Current state of the subscription task.
    pub fn state(&self) -> SubscriptionState {
        *self.inner.state_rx.borrow()
    }

    /// Watch subscription state transitions.
    pub fn watch_state(&self) -> watch::Receiver<SubscriptionState> {
        self.inner.state_rx.clone()
    }

    /// Number of tickets this process is currently awaiting.
    pub async fn pending_tickets(&self) -> usize {
        self.inner.waiters.pending().await
    }

    async fn publish_envelope(&self, envelope: &Envelope) -> Result<()> {
        let bytes = envelope.encode()?;
        self.inner
            .broker
            .publish(&self.inner.channel, &bytes)
            .await?;
        Ok(())
    }
}

impl<B> PubSubDeferred<Vec<u8>, B>
where
    B: Broker + ?Sized + 'static,
{
    /// Create an instance that delivers payload bytes verbatim.
    ///
    /// For waiters that cannot know the payload's concrete type: the wait
    /// returns exactly the bytes the producer published, and interpretation
    /// is left to the caller. Resolving through a raw instance publishes
    /// the given bytes untouched.
    pub fn raw(broker: Arc<B>, channel: impl Into<String>, config: PubSubConfig) -> Self {
        Self::with_codec(broker, channel, config, RawCodec)
    }
}

#[async_trait]
impl<T, B> Deferred for PubSubDeferred<T, B>
where
    T: Send + 'static,
    B: Broker + ?Sized + 'static,
{
    type Value = T;

    async fn resolve(&self, ticket: &str, value: T) -> Result<()> {
        let payload = self.codec.encode(&value).context(EncodeSnafu { ticket })?;
        self.publish_envelope(&Envelope::resolved(ticket, payload))
            .await
    }

    async fn reject(&self, ticket: &str, reason: &str) -> Result<()> {
        self.publish_envelope(&Envelope::rejected(ticket, reason))
            .await
    }

    async fn await_ticket(&self, ticket: &str) -> Result<T> {
        let rx = self.inner.waiters.register(ticket).await;
        let settlement = match rx.await {
            Ok(settlement) => settlement,
            Err(_) => return DisplacedSnafu { ticket }.fail(),
        };
        match settlement {
            RemoteSettlement::Rejected(reason) => RejectedSnafu { ticket, reason }.fail(),
            RemoteSettlement::Payload(payload) => {
                self.codec.decode(&payload).context(DecodeSnafu { ticket })
            }
        }
    }
}

/// Keep one subscription alive for the lifetime of the instance.
///
/// Connecting -> Subscribed while messages flow; any subscribe or receive
/// failure moves to Faulted, waits out the backoff and starts over. There
/// is no attempt limit.
async fn subscription_loop<B: Broker + ?Sized>(
    broker: Arc<B>,
    channel: String,
    waiters: Arc<WaiterRegistry<RemoteSettlement>>,
    state_tx: watch::Sender<SubscriptionState>,
    backoff: Duration,
) {
    loop {
        let _ = state_tx.send(SubscriptionState::Connecting);

        match broker.subscribe(&channel).await {
            Ok(mut subscription) => {
                info!(channel = %channel, "subscription established");
                let _ = state_tx.send(SubscriptionState::Subscribed);

                loop {
                    match subscription.next_message().await {
                        Ok(message) => dispatch(&waiters, &channel, &message).await,
                        Err(e) => {
                            warn!(channel = %channel, error = %e, "subscription lost");
                            break;
                        }
                    }
                }
            }
            Err(e) => {
                warn!(channel = %channel, error = %e, "subscribe failed");
            }
        }

        let _ = state_tx.send(SubscriptionState::Faulted);
        tokio::time::sleep(backoff).await;
    }
}

/// Route one inbound message to the wait that owns its ticket.
async fn dispatch(waiters: &WaiterRegistry<RemoteSettlement>, channel: &str, message: &[u8]) {
    let envelope = match Envelope::decode(message) {
        Ok(envelope) => envelope,
        Err(e) => {
            debug!(channel = %channel, error = %e, "skipping undecodable message");
            return;
        }
    };

    let Envelope {
        ticket,
        error,
        value,
    } = envelope;

    // An envelope carrying both fields counts as a rejection.
    let settlement = match error {
        Some(reason) => RemoteSettlement::Rejected(reason),
        None => RemoteSettlement::Payload(value.unwrap_or_default()),
    };

    if !waiters.settle(&ticket, settlement).await {
        debug!(channel = %channel, ticket = %ticket, "no wait for ticket, dropping settlement");
    }
}
