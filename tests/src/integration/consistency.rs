//! # Consistency Integration Tests
//!
//! Vector clock behavior against a live store: monotonic observation,
//! forced resynchronization, and background reconciliation converging on
//! the authoritative per-originator maxima.

use relay_registrant::Registrant;
use relay_replication::{ResolveStrategy, VectorClock, VectorClockConfig};
use relay_storage::{EnvelopeStore, MemoryEnvelopeStore};
use shared_types::{GatewayEnvelopeRow, StagedEnvelope, Topic};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::timeout;

async fn publish_remote(
    store: &MemoryEnvelopeStore,
    registrant: &Registrant,
    sequence_id: u64,
) {
    let staged = StagedEnvelope {
        id: sequence_id as i64,
        topic: Topic::from("chat"),
        payload: vec![0u8],
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
            topic: Topic::from("chat"),
            envelope,
        })
        .await
        .expect("insert");
}

#[tokio::test]
async fn test_observations_never_regress() {
    let clock = VectorClock::new(
        Arc::new(MemoryEnvelopeStore::new()),
        VectorClockConfig::default(),
    );

    // Out-of-order observations are expected and tolerated.
    for sequence_id in [3u64, 1, 5, 2, 4] {
        clock.save(7, sequence_id);
    }
    assert_eq!(clock.get(7), 5);

    let mut last_seen = 0;
    for sequence_id in [6u64, 6, 8, 7, 9] {
        clock.save(7, sequence_id);
        let current = clock.values()[&7];
        assert!(current >= last_seen, "clock regressed: {current} < {last_seen}");
        last_seen = current;
    }
    assert_eq!(clock.get(7), 9);
}

#[tokio::test]
async fn test_force_sync_matches_reference_exactly() {
    let store = Arc::new(MemoryEnvelopeStore::new());
    let node1 = Registrant::generate(1).expect("registrant");
    let node2 = Registrant::generate(2).expect("registrant");

    for sequence_id in 1..=4 {
        publish_remote(&store, &node1, sequence_id).await;
    }
    for sequence_id in 1..=2 {
        publish_remote(&store, &node2, sequence_id).await;
    }

    let clock = VectorClock::new(store.clone(), VectorClockConfig::default());
    // Deliberately desynced in both directions: stale value, phantom
    // originator.
    clock.save(1, 1);
    clock.save(99, 1000);

    clock.force_sync().await.expect("force sync");

    let reference = store.select_vector_clock().await.expect("reference");
    assert_eq!(clock.values(), reference);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_reconciliation_converges_while_store_grows() {
    let store = Arc::new(MemoryEnvelopeStore::new());
    let node = Registrant::generate(3).expect("registrant");

    publish_remote(&store, &node, 1).await;

    let clock = VectorClock::new(
        store.clone(),
        VectorClockConfig {
            sync_interval: Duration::from_millis(20),
            resolve_strategy: ResolveStrategy::Reconcile,
        },
    );
    let (_shutdown, shutdown_rx) = watch::channel(false);
    clock.start(shutdown_rx).await.expect("start");
    assert_eq!(clock.get(3), 1);

    // The store moves on without the clock being told.
    for sequence_id in 2..=5 {
        publish_remote(&store, &node, sequence_id).await;
    }

    timeout(Duration::from_secs(5), async {
        loop {
            if clock.get(3) == 5 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("reconciliation never converged");
}
