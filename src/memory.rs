//! In-process broker for tests and single-process deployments.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::sync::broadcast;

use crate::broker::Broker;
use crate::broker::BrokerError;
use crate::broker::BrokerSubscription;
use crate::broker::ReceiveSnafu;
use crate::broker::SubscriptionClosedSnafu;

/// Buffered messages per channel before slow subscribers start lagging.
const CHANNEL_CAPACITY: usize = 1024;

/// Broker backed by process-local broadcast channels.
///
/// Behaves like a real pub/sub server from the coordinator's point of view:
/// every subscriber on a channel sees every message published while it is
/// subscribed, and publishing to a channel nobody listens on succeeds and
/// delivers nothing. [`disconnect`](MemoryBroker::disconnect) severs all
/// live subscriptions, which exercises the reconnect path without a server.
pub struct MemoryBroker {
    channels: Mutex<HashMap<String, broadcast::Sender<Vec<u8>>>>,
}

impl MemoryBroker {
    /// Create a broker with no channels, wrapped in Arc.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Sever every live subscription, simulating a transport failure.
    ///
    /// Current subscribers observe a closed subscription. Later subscribe
    /// calls create fresh channels and succeed.
    pub async fn disconnect(&self) {
        self.channels.lock().await.clear();
    }

    /// Number of live subscriptions on `channel`.
    pub async fn subscriber_count(&self, channel: &str) -> usize {
        match self.channels.lock().await.get(channel) {
            Some(tx) => tx.receiver_count(),
            None => 0,
        }
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn publish(&self, channel: &str, payload: &[u8]) -> Result<(), BrokerError> {
        let channels = self.channels.lock().await;
        if let Some(tx) = channels.get(channel) {
            // Zero receivers is not a failure; delivery is fire-and-forget.
            let _ = tx.send(payload.to_vec());
        }
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<Box<dyn BrokerSubscription>, BrokerError> {
        let mut channels = self.channels.lock().await;
        let tx = channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        Ok(Box::new(MemorySubscription { rx: tx.subscribe() }))
    }
}

struct MemorySubscription {
    rx: broadcast::Receiver<Vec<u8>>,
}

#[async_trait]
impl BrokerSubscription for MemorySubscription {
    async fn next_message(&mut self) -> Result<Vec<u8>, BrokerError> {
        match self.rx.recv().await {
            Ok(payload) => Ok(payload),
            Err(broadcast::error::RecvError::Closed) => SubscriptionClosedSnafu {
                reason: "broker disconnected",
            }
            .fail(),
            Err(broadcast::error::RecvError::Lagged(missed)) => ReceiveSnafu {
                message: format!("subscriber lagged by {missed} messages"),
            }
            .fail(),
        }
    }
}
