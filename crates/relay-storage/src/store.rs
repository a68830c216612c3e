//! # Envelope Store Contract
//!
//! The typed query functions the replication core consumes. A relational
//! adapter implements these over its own schema; tests and single-node runs
//! use [`MemoryEnvelopeStore`].
//!
//! [`MemoryEnvelopeStore`]: crate::memory::MemoryEnvelopeStore

use async_trait::async_trait;
use shared_types::{GatewayEnvelopeRow, StagedEnvelope, Topic, VectorClockMap};
use thiserror::Error;

/// Errors from store queries.
///
/// The replication workers treat every store error as transient: the failed
/// tick is logged and retried, never surfaced past the worker.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// The store could not be reached.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A query failed.
    #[error("query failed: {0}")]
    Query(String),
}

/// Typed query layer over the staged and gateway envelope tables.
///
/// All methods must be safe under concurrent callers from multiple node
/// processes writing the same tables.
#[async_trait]
pub trait EnvelopeStore: Send + Sync {
    /// Inserts a client-submitted envelope into the staged table, assigning
    /// it the next monotonically increasing staging ID.
    async fn stage_envelope(
        &self,
        topic: Topic,
        payload: Vec<u8>,
    ) -> Result<StagedEnvelope, StorageError>;

    /// Returns up to `limit` staged envelopes with staging ID strictly
    /// greater than `last_seen_id`, in ascending ID order.
    async fn select_staged_envelopes(
        &self,
        last_seen_id: i64,
        limit: i32,
    ) -> Result<Vec<StagedEnvelope>, StorageError>;

    /// Deletes a staged envelope by its staging ID.
    ///
    /// Returns the number of rows affected; 0 means another worker already
    /// deleted the row, which callers must treat as success.
    async fn delete_staged_envelope(&self, id: i64) -> Result<u64, StorageError>;

    /// Inserts a published record into the gateway table, keyed by
    /// `(originator_id, sequence_id)`.
    ///
    /// Returns the number of rows affected; 0 means the key already exists
    /// (another process published the same position), which callers must
    /// treat as success.
    async fn insert_gateway_envelope(&self, row: GatewayEnvelopeRow)
        -> Result<u64, StorageError>;

    /// Returns up to `limit` gateway rows strictly after the per-originator
    /// cursor, in ascending `sequence_id` order within each originator.
    ///
    /// An originator absent from the cursor is read from sequence ID 0, i.e.
    /// from the beginning of its stream.
    async fn select_gateway_envelopes(
        &self,
        cursor: &VectorClockMap,
        limit: i32,
    ) -> Result<Vec<GatewayEnvelopeRow>, StorageError>;

    /// Returns the maximum sequence ID per originator currently in the
    /// gateway table. This is the authoritative vector clock.
    async fn select_vector_clock(&self) -> Result<VectorClockMap, StorageError>;
}
