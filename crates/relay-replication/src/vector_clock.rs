//! # Vector Clock
//!
//! Per-originator high-watermark tracker, seeded from the durable store and
//! periodically reconciled against it.
//!
//! The in-memory map is a cache of the node's belief about "latest sequence
//! ID seen per originator"; the store is authoritative. The reconciliation
//! loop catches divergence between the two, e.g. from a bug or a missed
//! update path, and resolves it per the configured [`ResolveStrategy`].

use crate::error::ReplicationError;
use parking_lot::RwLock;
use relay_storage::EnvelopeStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info};

/// What to do when the in-memory clock diverges from the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolveStrategy {
    /// Force a full resync from the store and continue. Steady-state
    /// default: self-healing beats downtime.
    #[default]
    Reconcile,
    /// Log fatally and halt the process. Early-deployment option: silent
    /// divergence is worse than a visible crash.
    Crash,
}

/// Vector clock configuration.
#[derive(Debug, Clone)]
pub struct VectorClockConfig {
    /// Interval between reconciliation passes.
    pub sync_interval: Duration,
    /// Divergence resolution strategy.
    pub resolve_strategy: ResolveStrategy,
}

impl Default for VectorClockConfig {
    fn default() -> Self {
        Self {
            sync_interval: Duration::from_secs(30),
            resolve_strategy: ResolveStrategy::Reconcile,
        }
    }
}

/// Per-originator high-watermark sequence tracker.
///
/// Cloning is cheap and shares the underlying state; reads take the read
/// lock, writes the write lock. Callers must not assume atomicity across a
/// read performed by one call and a resync performed by another.
#[derive(Clone)]
pub struct VectorClock {
    store: Arc<dyn EnvelopeStore>,
    config: VectorClockConfig,
    clock: Arc<RwLock<shared_types::VectorClockMap>>,
}

impl VectorClock {
    /// Creates an empty clock backed by `store`.
    pub fn new(store: Arc<dyn EnvelopeStore>, config: VectorClockConfig) -> Self {
        Self {
            store,
            config,
            clock: Arc::new(RwLock::new(shared_types::VectorClockMap::new())),
        }
    }

    /// Runs the initial blocking sync with the store, then starts the
    /// reconciliation loop in the background.
    ///
    /// Fails fast if the initial sync fails so the owning process can
    /// refuse to come up unhealthy. Once started, subsequent failures are
    /// handled per the configured strategy.
    pub async fn start(
        &self,
        shutdown: watch::Receiver<bool>,
    ) -> Result<(), ReplicationError> {
        self.force_sync().await?;

        let clock = self.clone();
        tokio::spawn(async move { clock.run_sync_loop(shutdown).await });

        Ok(())
    }

    /// Merges a newly observed sequence ID.
    ///
    /// Out-of-order observations are expected: a `sequence_id` at or below
    /// the stored value for that originator is ignored.
    pub fn save(&self, originator_id: shared_types::OriginatorId, sequence_id: shared_types::SequenceId) {
        let mut clock = self.clock.write();
        let entry = clock.entry(originator_id).or_insert(0);
        if sequence_id > *entry {
            *entry = sequence_id;
        }
    }

    /// Returns the highest observed sequence ID for an originator.
    ///
    /// Returns 0 for an unseen originator; 0 is never a valid sequence ID,
    /// so no `Option` is needed.
    #[must_use]
    pub fn get(&self, originator_id: shared_types::OriginatorId) -> shared_types::SequenceId {
        self.clock.read().get(&originator_id).copied().unwrap_or(0)
    }

    /// Returns a defensive copy of the whole clock.
    #[must_use]
    pub fn values(&self) -> shared_types::VectorClockMap {
        self.clock.read().clone()
    }

    /// Blocking full overwrite from the store: clears the map, then
    /// repopulates it. Used both for startup and for reconciliation.
    pub async fn force_sync(&self) -> Result<(), ReplicationError> {
        // The snapshot is taken without the lock held; holding a lock
        // across the store read is not allowed.
        let reference = self.store.select_vector_clock().await?;

        let mut clock = self.clock.write();
        clock.clear();
        clock.extend(reference);

        Ok(())
    }

    async fn run_sync_loop(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            resolve_strategy = ?self.config.resolve_strategy,
            sync_interval_ms = self.config.sync_interval.as_millis() as u64,
            "starting vector clock sync loop"
        );

        let start = tokio::time::Instant::now() + self.config.sync_interval;
        let mut timer = tokio::time::interval_at(start, self.config.sync_interval);
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!("stopping vector clock sync loop");
                    return;
                }
                _ = timer.tick() => {
                    if let Err(err) = self.run_integrity_check().await {
                        error!(error = %err, "integrity check failed");
                    }
                }
            }
        }
    }

    async fn run_integrity_check(&self) -> Result<(), ReplicationError> {
        let reference = self.store.select_vector_clock().await?;

        let mismatches = self.compare_against(&reference);
        if mismatches.is_empty() {
            debug!("vector clock integrity ok");
            return Ok(());
        }

        error!(mismatches = ?mismatches, "vector clock mismatch detected");

        match self.config.resolve_strategy {
            ResolveStrategy::Crash => {
                error!("vector clock mismatch detected, halting");
                std::process::exit(1);
            }
            ResolveStrategy::Reconcile => {
                self.force_sync().await?;
                info!("vector clock force synced with store");
            }
        }

        Ok(())
    }

    /// Compares the in-memory clock against a reference, key-for-key and
    /// length-for-length, holding only the read lock.
    fn compare_against(&self, reference: &shared_types::VectorClockMap) -> Vec<String> {
        let clock = self.clock.read();

        let mut mismatches = Vec::new();
        if clock.len() != reference.len() {
            mismatches.push(format!(
                "vector clocks have different lengths (have: {}, want: {})",
                clock.len(),
                reference.len()
            ));
        }

        for (originator_id, sequence_id) in reference {
            let have = clock.get(originator_id).copied().unwrap_or(0);
            if have != *sequence_id {
                mismatches.push(format!(
                    "originator {originator_id}: have {have}, want {sequence_id}"
                ));
            }
        }

        mismatches
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_storage::MemoryEnvelopeStore;
    use shared_types::{GatewayEnvelopeRow, Topic};
    use std::time::Duration;
    use tokio::time::timeout;

    async fn seed(store: &MemoryEnvelopeStore, rows: &[(u32, u64)]) {
        for (originator_id, sequence_id) in rows {
            store
                .insert_gateway_envelope(GatewayEnvelopeRow {
                    originator_id: *originator_id,
                    sequence_id: *sequence_id,
                    topic: Topic::from("t"),
                    envelope: vec![0xAA],
                })
                .await
                .expect("insert");
        }
    }

    #[tokio::test]
    async fn test_save_is_monotone() {
        let clock = VectorClock::new(
            Arc::new(MemoryEnvelopeStore::new()),
            VectorClockConfig::default(),
        );

        clock.save(1, 5);
        clock.save(1, 3);
        assert_eq!(clock.get(1), 5);

        clock.save(1, 9);
        assert_eq!(clock.get(1), 9);
    }

    #[tokio::test]
    async fn test_get_unseen_originator_is_zero() {
        let clock = VectorClock::new(
            Arc::new(MemoryEnvelopeStore::new()),
            VectorClockConfig::default(),
        );
        assert_eq!(clock.get(42), 0);
    }

    #[tokio::test]
    async fn test_values_is_a_defensive_copy() {
        let clock = VectorClock::new(
            Arc::new(MemoryEnvelopeStore::new()),
            VectorClockConfig::default(),
        );
        clock.save(1, 5);

        let mut copy = clock.values();
        copy.insert(1, 999);

        assert_eq!(clock.get(1), 5);
    }

    #[tokio::test]
    async fn test_force_sync_overwrites_desynced_state() {
        let store = Arc::new(MemoryEnvelopeStore::new());
        seed(&store, &[(1, 3), (2, 7)]).await;

        let clock = VectorClock::new(store, VectorClockConfig::default());
        // Deliberately desync: a stale originator and a stale value.
        clock.save(1, 1);
        clock.save(9, 100);

        clock.force_sync().await.expect("force sync");

        let values = clock.values();
        assert_eq!(values.get(&1), Some(&3));
        assert_eq!(values.get(&2), Some(&7));
        assert_eq!(values.len(), 2);
    }

    #[tokio::test]
    async fn test_compare_detects_length_and_value_mismatch() {
        let clock = VectorClock::new(
            Arc::new(MemoryEnvelopeStore::new()),
            VectorClockConfig::default(),
        );
        clock.save(1, 5);

        let mut reference = shared_types::VectorClockMap::new();
        reference.insert(1, 6);
        reference.insert(2, 1);

        let mismatches = clock.compare_against(&reference);
        assert_eq!(mismatches.len(), 3);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_reconcile_loop_self_heals() {
        let store = Arc::new(MemoryEnvelopeStore::new());
        seed(&store, &[(1, 3)]).await;

        let clock = VectorClock::new(
            store.clone(),
            VectorClockConfig {
                sync_interval: Duration::from_millis(20),
                resolve_strategy: ResolveStrategy::Reconcile,
            },
        );
        let (_shutdown, shutdown_rx) = watch::channel(false);
        clock.start(shutdown_rx).await.expect("start");

        // Desync after the initial sync; the loop must repair it.
        clock.save(9, 100);

        timeout(Duration::from_secs(2), async {
            loop {
                if clock.values().len() == 1 && clock.get(1) == 3 {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("clock never reconciled");
    }

    #[tokio::test]
    async fn test_start_fails_on_broken_store() {
        struct BrokenStore;

        #[async_trait::async_trait]
        impl EnvelopeStore for BrokenStore {
            async fn stage_envelope(
                &self,
                _topic: Topic,
                _payload: Vec<u8>,
            ) -> Result<shared_types::StagedEnvelope, relay_storage::StorageError>
            {
                Err(relay_storage::StorageError::Unavailable("down".into()))
            }
            async fn select_staged_envelopes(
                &self,
                _last_seen_id: i64,
                _limit: i32,
            ) -> Result<Vec<shared_types::StagedEnvelope>, relay_storage::StorageError>
            {
                Err(relay_storage::StorageError::Unavailable("down".into()))
            }
            async fn delete_staged_envelope(
                &self,
                _id: i64,
            ) -> Result<u64, relay_storage::StorageError> {
                Err(relay_storage::StorageError::Unavailable("down".into()))
            }
            async fn insert_gateway_envelope(
                &self,
                _row: GatewayEnvelopeRow,
            ) -> Result<u64, relay_storage::StorageError> {
                Err(relay_storage::StorageError::Unavailable("down".into()))
            }
            async fn select_gateway_envelopes(
                &self,
                _cursor: &shared_types::VectorClockMap,
                _limit: i32,
            ) -> Result<Vec<GatewayEnvelopeRow>, relay_storage::StorageError>
            {
                Err(relay_storage::StorageError::Unavailable("down".into()))
            }
            async fn select_vector_clock(
                &self,
            ) -> Result<shared_types::VectorClockMap, relay_storage::StorageError>
            {
                Err(relay_storage::StorageError::Unavailable("down".into()))
            }
        }

        let clock = VectorClock::new(Arc::new(BrokenStore), VectorClockConfig::default());
        let (_shutdown, shutdown_rx) = watch::channel(false);
        assert!(clock.start(shutdown_rx).await.is_err());
    }
}
