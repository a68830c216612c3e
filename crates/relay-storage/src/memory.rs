//! # In-Memory Envelope Store
//!
//! Implements [`EnvelopeStore`] over two ordered maps. Suitable for tests
//! and single-node operation; multi-node deployments use a relational
//! adapter behind the same trait.

use crate::store::{EnvelopeStore, StorageError};
use async_trait::async_trait;
use parking_lot::RwLock;
use shared_types::{
    GatewayEnvelopeRow, OriginatorId, SequenceId, StagedEnvelope, Topic, VectorClockMap,
};
use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::trace;

#[derive(Default)]
struct Tables {
    /// Next staging ID to assign. Staging IDs start at 1; sequence ID 0 is
    /// never valid.
    next_staged_id: i64,
    /// Staged envelopes by staging ID.
    staged: BTreeMap<i64, StagedEnvelope>,
    /// Published records by `(originator_id, sequence_id)`. The key order
    /// gives per-originator ascending sequence IDs on iteration.
    gateway: BTreeMap<(OriginatorId, SequenceId), GatewayEnvelopeRow>,
}

/// In-memory implementation of the envelope store.
pub struct MemoryEnvelopeStore {
    tables: RwLock<Tables>,
}

impl MemoryEnvelopeStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(Tables {
                next_staged_id: 1,
                ..Tables::default()
            }),
        }
    }

    /// Returns the number of rows currently in the staged table.
    #[must_use]
    pub fn staged_count(&self) -> usize {
        self.tables.read().staged.len()
    }

    /// Returns the number of rows currently in the gateway table.
    #[must_use]
    pub fn gateway_count(&self) -> usize {
        self.tables.read().gateway.len()
    }
}

impl Default for MemoryEnvelopeStore {
    fn default() -> Self {
        Self::new()
    }
}

fn now_ns() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0)
}

#[async_trait]
impl EnvelopeStore for MemoryEnvelopeStore {
    async fn stage_envelope(
        &self,
        topic: Topic,
        payload: Vec<u8>,
    ) -> Result<StagedEnvelope, StorageError> {
        let mut tables = self.tables.write();
        let id = tables.next_staged_id;
        tables.next_staged_id += 1;

        let staged = StagedEnvelope {
            id,
            topic,
            payload,
            staged_at_ns: now_ns(),
        };
        tables.staged.insert(id, staged.clone());

        trace!(staging_id = id, "envelope staged");
        Ok(staged)
    }

    async fn select_staged_envelopes(
        &self,
        last_seen_id: i64,
        limit: i32,
    ) -> Result<Vec<StagedEnvelope>, StorageError> {
        let tables = self.tables.read();
        Ok(tables
            .staged
            .range(last_seen_id + 1..)
            .take(limit.max(0) as usize)
            .map(|(_, env)| env.clone())
            .collect())
    }

    async fn delete_staged_envelope(&self, id: i64) -> Result<u64, StorageError> {
        let mut tables = self.tables.write();
        Ok(u64::from(tables.staged.remove(&id).is_some()))
    }

    async fn insert_gateway_envelope(
        &self,
        row: GatewayEnvelopeRow,
    ) -> Result<u64, StorageError> {
        let mut tables = self.tables.write();
        let key = (row.originator_id, row.sequence_id);
        if tables.gateway.contains_key(&key) {
            // Another process already published this position.
            return Ok(0);
        }
        tables.gateway.insert(key, row);
        Ok(1)
    }

    async fn select_gateway_envelopes(
        &self,
        cursor: &VectorClockMap,
        limit: i32,
    ) -> Result<Vec<GatewayEnvelopeRow>, StorageError> {
        let tables = self.tables.read();
        Ok(tables
            .gateway
            .iter()
            .filter(|((originator_id, sequence_id), _)| {
                *sequence_id > cursor.get(originator_id).copied().unwrap_or(0)
            })
            .take(limit.max(0) as usize)
            .map(|(_, row)| row.clone())
            .collect())
    }

    async fn select_vector_clock(&self) -> Result<VectorClockMap, StorageError> {
        let tables = self.tables.read();
        let mut clock = VectorClockMap::new();
        for (originator_id, sequence_id) in tables.gateway.keys() {
            let entry = clock.entry(*originator_id).or_insert(0);
            if *sequence_id > *entry {
                *entry = *sequence_id;
            }
        }
        Ok(clock)
    }
}
