//! Redis-backed broker and the deferred instances built on it.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bb8_redis::RedisConnectionManager;
use bb8_redis::bb8::Pool;
use bb8_redis::redis;
use futures_util::Stream;
use futures_util::StreamExt;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;
use tracing::info;

use crate::broker::Broker;
use crate::broker::BrokerError;
use crate::broker::BrokerSubscription;
use crate::broker::SubscriptionClosedSnafu;
use crate::codec::PayloadCodec;
use crate::pubsub::PubSubConfig;
use crate::pubsub::PubSubDeferred;

/// Connection settings for [`RedisBroker`].
#[derive(Debug, Clone)]
pub struct RedisConfig {
    /// Server hostname or IP.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Database index selected on connect.
    pub db: i64,
    /// Optional AUTH password.
    pub password: Option<String>,
    /// Maximum pooled connections for publishing.
    pub max_size: u32,
    /// Minimum idle connections the pool keeps ready.
    pub min_idle: Option<u32>,
    /// How long an idle pooled connection is kept before being closed.
    pub idle_timeout: Option<Duration>,
    /// How long to wait for a pooled connection before giving up.
    pub connection_timeout: Duration,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 6379,
            db: 0,
            password: None,
            max_size: 20,
            min_idle: None,
            idle_timeout: Some(Duration::from_secs(600)), // 10 minutes
            connection_timeout: Duration::from_secs(5),
        }
    }
}

impl RedisConfig {
    fn connection_info(&self) -> redis::ConnectionInfo {
        redis::ConnectionInfo {
            addr: redis::ConnectionAddr::Tcp(self.host.clone(), self.port),
            redis: redis::RedisConnectionInfo {
                db: self.db,
                password: self.password.clone(),
                ..Default::default()
            },
        }
    }
}

/// Broker over Redis pub/sub.
///
/// Publishes through a connection pool whose connections are validated when
/// borrowed. Each subscription holds its own dedicated connection, since a
/// subscribed Redis connection cannot carry other commands.
pub struct RedisBroker {
    client: redis::Client,
    pool: Pool<RedisConnectionManager>,
}

impl RedisBroker {
    /// Connect with the given settings.
    pub async fn connect(config: RedisConfig) -> Result<Self, BrokerError> {
        let info = config.connection_info();
        let client = redis::Client::open(info.clone()).map_err(|e| BrokerError::Connect {
            message: e.to_string(),
        })?;
        let manager = RedisConnectionManager::new(info).map_err(|e| BrokerError::Connect {
            message: e.to_string(),
        })?;
        let pool = Pool::builder()
            .max_size(config.max_size)
            .min_idle(config.min_idle)
            .idle_timeout(config.idle_timeout)
            .connection_timeout(config.connection_timeout)
            .build(manager)
            .await
            .map_err(|e| BrokerError::Connect {
                message: e.to_string(),
            })?;

        info!(host = %config.host, port = config.port, "connected to redis");
        Ok(Self { client, pool })
    }

    /// Wrap an externally built pool in place of all pool settings.
    ///
    /// `client` is used to open the dedicated subscription connections.
    pub fn with_pool(client: redis::Client, pool: Pool<RedisConnectionManager>) -> Self {
        Self { client, pool }
    }
}

#[async_trait]
impl Broker for RedisBroker {
    async fn publish(&self, channel: &str, payload: &[u8]) -> Result<(), BrokerError> {
        let mut conn = self.pool.get().await.map_err(|e| BrokerError::Publish {
            channel: channel.to_string(),
            message: e.to_string(),
        })?;

        let receivers: i64 = redis::cmd("PUBLISH")
            .arg(channel)
            .arg(payload)
            .query_async(&mut *conn)
            .await
            .map_err(|e| BrokerError::Publish {
                channel: channel.to_string(),
                message: e.to_string(),
            })?;

        debug!(channel = %channel, receivers, "published settlement");
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<Box<dyn BrokerSubscription>, BrokerError> {
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(|e| BrokerError::Subscribe {
                channel: channel.to_string(),
                message: e.to_string(),
            })?;
        pubsub
            .subscribe(channel)
            .await
            .map_err(|e| BrokerError::Subscribe {
                channel: channel.to_string(),
                message: e.to_string(),
            })?;

        Ok(Box::new(RedisSubscription {
            messages: Box::pin(pubsub.into_on_message()),
        }))
    }
}

struct RedisSubscription {
    messages: Pin<Box<dyn Stream<Item = redis::Msg> + Send>>,
}

#[async_trait]
impl BrokerSubscription for RedisSubscription {
    async fn next_message(&mut self) -> Result<Vec<u8>, BrokerError> {
        match self.messages.next().await {
            Some(message) => Ok(message.get_payload_bytes().to_vec()),
            None => SubscriptionClosedSnafu {
                reason: "redis connection closed",
            }
            .fail(),
        }
    }
}

/// Deferred results over Redis pub/sub.
pub type RedisDeferred<T> = PubSubDeferred<T, RedisBroker>;

impl<T> PubSubDeferred<T, RedisBroker> {
    /// Connect to Redis and create an instance with the JSON codec.
    pub async fn connect(
        config: RedisConfig,
        channel: impl Into<String>,
        pubsub: PubSubConfig,
    ) -> Result<Self, BrokerError>
    where
        T: Serialize + DeserializeOwned,
    {
        let broker = Arc::new(RedisBroker::connect(config).await?);
        Ok(Self::new(broker, channel, pubsub))
    }

    /// Connect to Redis with a caller-supplied payload codec.
    pub async fn connect_with_codec<C>(
        config: RedisConfig,
        channel: impl Into<String>,
        pubsub: PubSubConfig,
        codec: C,
    ) -> Result<Self, BrokerError>
    where
        C: PayloadCodec<T> + 'static,
    {
        let broker = Arc::new(RedisBroker::connect(config).await?);
        Ok(Self::with_codec(broker, channel, pubsub, codec))
    }
}

impl PubSubDeferred<Vec<u8>, RedisBroker> {
    /// Connect to Redis and deliver payload bytes verbatim.
    pub async fn connect_raw(
        config: RedisConfig,
        channel: impl Into<String>,
        pubsub: PubSubConfig,
    ) -> Result<Self, BrokerError> {
        let broker = Arc::new(RedisBroker::connect(config).await?);
        Ok(Self::raw(broker, channel, pubsub))
    }
}
