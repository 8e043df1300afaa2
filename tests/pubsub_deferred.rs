//! Integration tests for the distributed deferred mode.
//!
//! Runs the full publish/subscribe path against the in-process broker:
//! typed and raw payload delivery, rejections, the silent drop of unmatched
//! settlements, custom codecs, decode failures, reconnection after a
//! transport fault, and a concurrent sweep.

use std::time::Duration;

use deferred::CodecError;
use deferred::Deferred;
use deferred::DeferredError;
use deferred::MemoryBroker;
use deferred::PayloadCodec;
use deferred::PubSubConfig;
use deferred::PubSubDeferred;
use deferred::SubscriptionState;
use rand::Rng;
use serde::Deserialize;
use serde::Serialize;
use tokio::time::sleep;
use tokio::time::timeout;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Job {
    id: u64,
    status: String,
}

/// Block until the instance's subscription task reports it is live.
async fn wait_until_subscribed<T>(deferred: &PubSubDeferred<T, MemoryBroker>) {
    let mut rx = deferred.watch_state();
    timeout(Duration::from_secs(5), async {
        while !rx.borrow().is_subscribed() {
            rx.changed().await.unwrap();
        }
    })
    .await
    .expect("subscription did not come up");
}

/// Block until `count` waits are registered on the instance.
async fn wait_for_pending<T>(deferred: &PubSubDeferred<T, MemoryBroker>, count: usize) {
    timeout(Duration::from_secs(5), async {
        while deferred.pending_tickets().await != count {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("waits did not register");
}

// ============================================================================
// Delivery
// ============================================================================

/// A resolved value crosses the broker and completes the registered wait.
#[tokio::test]
async fn test_resolve_crosses_broker() {
    let broker = MemoryBroker::new();
    let deferred: PubSubDeferred<Job, _> =
        PubSubDeferred::new(broker, "jobs", PubSubConfig::default());
    wait_until_subscribed(&deferred).await;

    let waiter = {
        let deferred = deferred.clone();
        tokio::spawn(async move { deferred.await_ticket("job-1").await })
    };
    wait_for_pending(&deferred, 1).await;

    let job = Job {
        id: 1,
        status: "done".to_string(),
    };
    deferred.resolve("job-1", job.clone()).await.unwrap();

    let received = timeout(Duration::from_secs(5), waiter)
        .await
        .expect("wait did not complete")
        .unwrap()
        .unwrap();
    assert_eq!(received, job);
}

/// A rejection crosses the broker and fails the wait with the reason.
#[tokio::test]
async fn test_reject_crosses_broker() {
    let broker = MemoryBroker::new();
    let deferred: PubSubDeferred<Job, _> =
        PubSubDeferred::new(broker, "jobs", PubSubConfig::default());
    wait_until_subscribed(&deferred).await;

    let waiter = {
        let deferred = deferred.clone();
        tokio::spawn(async move { deferred.await_ticket("job-2").await })
    };
    wait_for_pending(&deferred, 1).await;

    deferred.reject("job-2", "upstream failure").await.unwrap();

    match timeout(Duration::from_secs(5), waiter)
        .await
        .expect("wait did not complete")
        .unwrap()
    {
        Err(DeferredError::Rejected { ticket, reason }) => {
            assert_eq!(ticket, "job-2");
            assert_eq!(reason, "upstream failure");
        }
        other => panic!("expected rejection, got {other:?}"),
    }
}

/// Separate instances sharing a broker and channel form one ticket
/// namespace: the producer's settlement reaches the consumer's wait.
#[tokio::test]
async fn test_delivery_between_instances() {
    let broker = MemoryBroker::new();
    let producer: PubSubDeferred<Job, _> =
        PubSubDeferred::new(broker.clone(), "jobs", PubSubConfig::default());
    let consumer: PubSubDeferred<Job, _> =
        PubSubDeferred::new(broker, "jobs", PubSubConfig::default());
    wait_until_subscribed(&producer).await;
    wait_until_subscribed(&consumer).await;

    let waiter = {
        let consumer = consumer.clone();
        tokio::spawn(async move { consumer.await_ticket("job-3").await })
    };
    wait_for_pending(&consumer, 1).await;

    let job = Job {
        id: 3,
        status: "shipped".to_string(),
    };
    producer.resolve("job-3", job.clone()).await.unwrap();

    let received = timeout(Duration::from_secs(5), waiter)
        .await
        .expect("wait did not complete")
        .unwrap()
        .unwrap();
    assert_eq!(received, job);
    assert_eq!(producer.pending_tickets().await, 0);
}

/// Settling a ticket nobody awaits succeeds and delivers nothing; a wait
/// registered afterwards only completes once the producer settles again.
#[tokio::test]
async fn test_settlement_without_wait_is_dropped() {
    let broker = MemoryBroker::new();
    let deferred: PubSubDeferred<Job, _> =
        PubSubDeferred::new(broker, "jobs", PubSubConfig::default());
    wait_until_subscribed(&deferred).await;

    let job = Job {
        id: 4,
        status: "orphaned".to_string(),
    };
    deferred.resolve("job-4", job.clone()).await.unwrap();

    // Let the dispatcher observe and drop the settlement before any wait
    // exists for the ticket.
    sleep(Duration::from_millis(50)).await;

    let waiter = {
        let deferred = deferred.clone();
        tokio::spawn(async move { deferred.await_ticket("job-4").await })
    };
    wait_for_pending(&deferred, 1).await;

    // The earlier settlement was published before the wait existed and is
    // gone for good.
    sleep(Duration::from_millis(100)).await;
    assert_eq!(deferred.pending_tickets().await, 1);

    deferred.resolve("job-4", job.clone()).await.unwrap();
    let received = timeout(Duration::from_secs(5), waiter)
        .await
        .expect("wait did not complete")
        .unwrap()
        .unwrap();
    assert_eq!(received, job);
}

// ============================================================================
// Codecs
// ============================================================================

/// A raw instance on the same channel observes the exact payload bytes a
/// typed producer published.
#[tokio::test]
async fn test_raw_instance_receives_verbatim_bytes() {
    let broker = MemoryBroker::new();
    let typed: PubSubDeferred<Job, _> =
        PubSubDeferred::new(broker.clone(), "jobs", PubSubConfig::default());
    let raw = PubSubDeferred::raw(broker, "jobs", PubSubConfig::default());
    wait_until_subscribed(&typed).await;
    wait_until_subscribed(&raw).await;

    let waiter = {
        let raw = raw.clone();
        tokio::spawn(async move { raw.await_ticket("job-5").await })
    };
    wait_for_pending(&raw, 1).await;

    let job = Job {
        id: 5,
        status: "queued".to_string(),
    };
    typed.resolve("job-5", job.clone()).await.unwrap();

    let bytes = timeout(Duration::from_secs(5), waiter)
        .await
        .expect("wait did not complete")
        .unwrap()
        .unwrap();
    let decoded: Job = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(decoded, job);
}

/// Encodes u64 values as decimal text.
struct DecimalCodec;

impl PayloadCodec<u64> for DecimalCodec {
    fn encode(&self, value: &u64) -> Result<Vec<u8>, CodecError> {
        Ok(value.to_string().into_bytes())
    }

    fn decode(&self, payload: &[u8]) -> Result<u64, CodecError> {
        let text = std::str::from_utf8(payload)
            .map_err(|e| CodecError::custom(format!("payload is not utf-8: {e}")))?;
        text.parse()
            .map_err(|e| CodecError::custom(format!("payload is not a decimal integer: {e}")))
    }
}

/// A caller-supplied codec controls the wire payload end to end.
#[tokio::test]
async fn test_custom_codec_round_trip() {
    let broker = MemoryBroker::new();
    let typed = PubSubDeferred::with_codec(
        broker.clone(),
        "numbers",
        PubSubConfig::default(),
        DecimalCodec,
    );
    let raw = PubSubDeferred::raw(broker, "numbers", PubSubConfig::default());
    wait_until_subscribed(&typed).await;
    wait_until_subscribed(&raw).await;

    let typed_waiter = {
        let typed = typed.clone();
        tokio::spawn(async move { typed.await_ticket("num-1").await })
    };
    let raw_waiter = {
        let raw = raw.clone();
        tokio::spawn(async move { raw.await_ticket("num-1").await })
    };
    wait_for_pending(&typed, 1).await;
    wait_for_pending(&raw, 1).await;

    typed.resolve("num-1", 123_456).await.unwrap();

    let value = timeout(Duration::from_secs(5), typed_waiter)
        .await
        .expect("wait did not complete")
        .unwrap()
        .unwrap();
    assert_eq!(value, 123_456);

    // The raw view shows the codec's wire form.
    let bytes = timeout(Duration::from_secs(5), raw_waiter)
        .await
        .expect("wait did not complete")
        .unwrap()
        .unwrap();
    assert_eq!(bytes, b"123456");
}

/// A payload the instance's codec cannot decode fails that wait alone; the
/// subscription keeps running and later settlements still arrive.
#[tokio::test]
async fn test_undecodable_payload_fails_single_wait() {
    let broker = MemoryBroker::new();
    let typed: PubSubDeferred<Job, _> =
        PubSubDeferred::new(broker.clone(), "jobs", PubSubConfig::default());
    let raw = PubSubDeferred::raw(broker, "jobs", PubSubConfig::default());
    wait_until_subscribed(&typed).await;
    wait_until_subscribed(&raw).await;

    let doomed = {
        let typed = typed.clone();
        tokio::spawn(async move { typed.await_ticket("job-6").await })
    };
    wait_for_pending(&typed, 1).await;

    raw.resolve("job-6", b"not json".to_vec()).await.unwrap();

    let result = timeout(Duration::from_secs(5), doomed)
        .await
        .expect("wait did not complete")
        .unwrap();
    assert!(matches!(result, Err(DeferredError::Decode { .. })));

    // The dispatcher survived; a valid settlement still gets through.
    let waiter = {
        let typed = typed.clone();
        tokio::spawn(async move { typed.await_ticket("job-7").await })
    };
    wait_for_pending(&typed, 1).await;

    let job = Job {
        id: 7,
        status: "recovered".to_string(),
    };
    typed.resolve("job-7", job.clone()).await.unwrap();

    let received = timeout(Duration::from_secs(5), waiter)
        .await
        .expect("wait did not complete")
        .unwrap()
        .unwrap();
    assert_eq!(received, job);
}

// ============================================================================
// Subscription lifecycle
// ============================================================================

/// A transport fault moves the subscription through Faulted back to
/// Subscribed, and a wait registered before the fault still receives a
/// settlement published after the recovery.
#[tokio::test]
async fn test_reconnects_after_transport_fault() {
    let broker = MemoryBroker::new();
    let config = PubSubConfig {
        reconnect_backoff: Duration::from_millis(200),
    };
    let deferred: PubSubDeferred<Job, _> =
        PubSubDeferred::new(broker.clone(), "jobs", config);
    wait_until_subscribed(&deferred).await;

    let waiter = {
        let deferred = deferred.clone();
        tokio::spawn(async move { deferred.await_ticket("job-8").await })
    };
    wait_for_pending(&deferred, 1).await;

    let mut rx = deferred.watch_state();
    broker.disconnect().await;

    // Watch the task fault and come back up.
    timeout(Duration::from_secs(5), async {
        let mut saw_fault = false;
        loop {
            rx.changed().await.unwrap();
            let state = *rx.borrow();
            if state == SubscriptionState::Faulted {
                saw_fault = true;
            }
            if saw_fault && state.is_subscribed() {
                return;
            }
        }
    })
    .await
    .expect("subscription did not recover");

    // The wait registered before the outage is untouched by the reconnect.
    assert_eq!(deferred.pending_tickets().await, 1);

    let job = Job {
        id: 8,
        status: "after outage".to_string(),
    };
    deferred.resolve("job-8", job.clone()).await.unwrap();

    let received = timeout(Duration::from_secs(5), waiter)
        .await
        .expect("wait did not complete")
        .unwrap()
        .unwrap();
    assert_eq!(received, job);
}

// ============================================================================
// Concurrency
// ============================================================================

/// Many tickets in flight on one channel settle independently: every wait
/// receives exactly the value resolved for its own ticket.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_tickets_do_not_cross() {
    const TICKETS: u64 = 500;

    let broker = MemoryBroker::new();
    let deferred: PubSubDeferred<u64, _> =
        PubSubDeferred::new(broker, "sweep", PubSubConfig::default());
    wait_until_subscribed(&deferred).await;

    let waiters: Vec<_> = (0..TICKETS)
        .map(|i| {
            let deferred = deferred.clone();
            tokio::spawn(async move { deferred.await_ticket(&format!("sweep-{i}")).await })
        })
        .collect();
    wait_for_pending(&deferred, TICKETS as usize).await;

    let producers: Vec<_> = (0..TICKETS)
        .map(|i| {
            let deferred = deferred.clone();
            tokio::spawn(async move {
                let delay = rand::thread_rng().gen_range(1u64..=3);
                sleep(Duration::from_millis(delay)).await;
                deferred.resolve(&format!("sweep-{i}"), i).await.unwrap();
            })
        })
        .collect();
    for producer in producers {
        producer.await.unwrap();
    }

    for (i, waiter) in waiters.into_iter().enumerate() {
        let value = timeout(Duration::from_secs(5), waiter)
            .await
            .expect("wait did not complete")
            .unwrap()
            .unwrap();
        assert_eq!(value, i as u64);
    }
    assert_eq!(deferred.pending_tickets().await, 0);
}

/// Dropping every clone stops the subscription task and releases the
/// broker-side subscription.
#[tokio::test]
async fn test_drop_releases_subscription() {
    let broker = MemoryBroker::new();
    let deferred: PubSubDeferred<Job, _> =
        PubSubDeferred::new(broker.clone(), "jobs", PubSubConfig::default());
    wait_until_subscribed(&deferred).await;
    assert_eq!(broker.subscriber_count("jobs").await, 1);

    drop(deferred);

    timeout(Duration::from_secs(5), async {
        while broker.subscriber_count("jobs").await != 0 {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("subscription was not released");
}
