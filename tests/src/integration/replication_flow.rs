//! # Replication Flow Integration Tests
//!
//! End-to-end coverage of the staged → published → dispatched pipeline:
//!
//! 1. Staged envelopes become durable gateway rows with strictly
//!    increasing sequence IDs, and the staged table drains to empty.
//! 2. A subscriber registered before publication observes every row with
//!    per-originator order preserved, regardless of cross-originator
//!    interleaving.
//! 3. Racing publish workers on the same store never produce duplicate
//!    gateway rows.

use node_runtime::{NodeConfig, ReplicationService};
use relay_registrant::Registrant;
use relay_replication::{
    EnvelopeBatch, PublishRetryPolicy, PublishWorker, PublishWorkerConfig, SubscribeWorker,
    SubscribeWorkerConfig, SubscriptionQuery,
};
use relay_storage::{EnvelopeStore, MemoryEnvelopeStore};
use shared_types::{GatewayEnvelopeRow, StagedEnvelope, Topic, VectorClockMap};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;

fn quick_publish_config() -> PublishWorkerConfig {
    PublishWorkerConfig {
        poll_interval: Duration::from_millis(10),
        page_size: 100,
        retry: PublishRetryPolicy {
            backoff: Duration::from_millis(10),
            max_attempts: None,
        },
    }
}

fn quick_subscribe_config() -> SubscribeWorkerConfig {
    SubscribeWorkerConfig {
        poll_interval: Duration::from_millis(10),
        page_size: 1000,
        buffer_size: 64,
    }
}

async fn wait_for<F: Fn() -> bool>(what: &str, condition: F) {
    timeout(Duration::from_secs(5), async {
        loop {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {what}"));
}

async fn recv_batch(receiver: &mut mpsc::Receiver<EnvelopeBatch>) -> EnvelopeBatch {
    timeout(Duration::from_secs(5), receiver.recv())
        .await
        .expect("timed out waiting for batch")
        .expect("subscription closed unexpectedly")
}

/// Signs and inserts a gateway row as another node would.
async fn publish_remote(
    store: &MemoryEnvelopeStore,
    registrant: &Registrant,
    sequence_id: u64,
    topic: &str,
) {
    let staged = StagedEnvelope {
        id: sequence_id as i64,
        topic: Topic::from(topic),
        payload: sequence_id.to_be_bytes().to_vec(),
        staged_at_ns: 0,
    };
    let envelope = registrant
        .sign_staged_envelope(&staged)
        .expect("sign")
        .encode()
        .expect("encode");
    store
        .insert_gateway_envelope(GatewayEnvelopeRow {
            originator_id: registrant.node_id(),
            sequence_id,
            topic: Topic::from(topic),
            envelope,
        })
        .await
        .expect("insert");
}

#[tokio::test]
async fn test_staged_envelopes_become_ordered_gateway_rows() {
    let store = Arc::new(MemoryEnvelopeStore::new());
    let registrant = Arc::new(Registrant::generate(1).expect("registrant"));

    for payload in [b"one".to_vec(), b"two".to_vec(), b"three".to_vec()] {
        store
            .stage_envelope(Topic::from("chat"), payload)
            .await
            .expect("stage");
    }

    let worker = PublishWorker::start(store.clone(), registrant, quick_publish_config())
        .expect("start publisher");

    wait_for("publication to drain", || {
        store.gateway_count() == 3 && store.staged_count() == 0
    })
    .await;

    let rows = store
        .select_gateway_envelopes(&VectorClockMap::new(), 100)
        .await
        .expect("select");
    let sequence_ids: Vec<u64> = rows.iter().map(|row| row.sequence_id).collect();
    assert_eq!(sequence_ids, vec![1, 2, 3]);

    worker.shutdown().await;
}

#[tokio::test]
async fn test_global_subscriber_sees_interleaved_originators_in_order() {
    let store = Arc::new(MemoryEnvelopeStore::new());
    let node1 = Registrant::generate(1).expect("registrant");
    let node2 = Registrant::generate(2).expect("registrant");

    let worker = SubscribeWorker::start(store.clone(), quick_subscribe_config())
        .await
        .expect("start subscriber");

    // Subscribe before any insertion.
    let mut subscription = worker.listen(&SubscriptionQuery::global());

    // Interleave two originators.
    publish_remote(&store, &node1, 1, "chat").await;
    publish_remote(&store, &node2, 1, "chat").await;
    publish_remote(&store, &node1, 2, "chat").await;
    publish_remote(&store, &node2, 2, "chat").await;
    publish_remote(&store, &node1, 3, "chat").await;
    publish_remote(&store, &node2, 3, "chat").await;

    let mut received = Vec::new();
    while received.len() < 6 {
        received.extend(recv_batch(&mut subscription).await);
    }

    // Per-originator order is preserved; cross-originator interleaving is
    // unconstrained.
    let mut by_originator: HashMap<u32, Vec<u64>> = HashMap::new();
    for envelope in &received {
        by_originator
            .entry(envelope.originator_id)
            .or_default()
            .push(envelope.sequence_id);
    }
    assert_eq!(by_originator.len(), 2);
    assert_eq!(by_originator[&1], vec![1, 2, 3]);
    assert_eq!(by_originator[&2], vec![1, 2, 3]);

    worker.shutdown().await;
}

#[tokio::test]
async fn test_racing_publishers_emit_exactly_one_row_per_envelope() {
    let store = Arc::new(MemoryEnvelopeStore::new());
    let registrant = Arc::new(Registrant::generate(1).expect("registrant"));

    for _ in 0..5 {
        let payload: Vec<u8> = (0..32).map(|_| rand::random::<u8>()).collect();
        store
            .stage_envelope(Topic::from("chat"), payload)
            .await
            .expect("stage");
    }

    // Two workers drain the same staged table, as two processes of the
    // same node would.
    let first = PublishWorker::start(store.clone(), registrant.clone(), quick_publish_config())
        .expect("start first");
    let second = PublishWorker::start(store.clone(), registrant.clone(), quick_publish_config())
        .expect("start second");

    wait_for("both workers to drain", || {
        store.gateway_count() == 5 && store.staged_count() == 0
    })
    .await;

    // Exactly one durable record per staged envelope.
    let rows = store
        .select_gateway_envelopes(&VectorClockMap::new(), 100)
        .await
        .expect("select");
    let sequence_ids: Vec<u64> = rows.iter().map(|row| row.sequence_id).collect();
    assert_eq!(sequence_ids, vec![1, 2, 3, 4, 5]);

    first.shutdown().await;
    second.shutdown().await;
}

#[tokio::test]
async fn test_service_end_to_end_publish_and_subscribe() -> anyhow::Result<()> {
    let store = Arc::new(MemoryEnvelopeStore::new());

    let mut config = NodeConfig::default();
    config.node.node_id = 1;
    config.replication.publish_poll_interval_ms = 10;
    config.replication.subscribe_poll_interval_ms = 10;

    let service = ReplicationService::start(&config, store).await?;

    let mut subscription = service.subscribe(&SubscriptionQuery::for_topics([Topic::from(
        "conversation/42",
    )]));

    service
        .publish(Topic::from("conversation/41"), b"other".to_vec())
        .await?;
    service
        .publish(Topic::from("conversation/42"), b"hello".to_vec())
        .await?;

    let batch = recv_batch(&mut subscription).await;
    assert_eq!(batch.len(), 1);
    assert_eq!(batch[0].topic, Topic::from("conversation/42"));
    assert_eq!(batch[0].envelope.open()?.payload, b"hello");

    service.shutdown().await;
    Ok(())
}
