//! # Core Domain Entities
//!
//! Defines the entities of the replication pipeline.
//!
//! ## Clusters
//!
//! - **Identity**: `OriginatorId`, `SequenceId`, `Signature`
//! - **Routing**: `Topic`
//! - **Pipeline**: `StagedEnvelope`, `GatewayEnvelopeRow`, `VectorClockMap`

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Identifier of the node that first assigned a sequence position to an
/// envelope. Small integers handed out by the network registry.
pub type OriginatorId = u32;

/// Per-originator monotonically increasing position of an envelope in that
/// originator's stream. A sequence ID of 0 is never valid.
pub type SequenceId = u64;

/// A 64-byte Ed25519 signature.
pub type Signature = [u8; 64];

/// Per-originator high-watermark map: the highest sequence ID observed for
/// each originator. Used as a resumable poll cursor and as the reference for
/// consistency checks.
pub type VectorClockMap = HashMap<OriginatorId, SequenceId>;

/// An opaque byte string identifying the logical conversation/stream an
/// envelope belongs to.
///
/// The core never interprets topic bytes; they are only compared for
/// equality and rendered as hex for logs and index keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct Topic(Vec<u8>);

impl Topic {
    /// Creates a topic from raw bytes.
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// Returns the raw topic bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Consumes the topic, returning the raw bytes.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    /// Returns the length of the topic in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if the topic is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(&self.0))
    }
}

impl From<Vec<u8>> for Topic {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl From<&[u8]> for Topic {
    fn from(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }
}

impl From<&str> for Topic {
    fn from(s: &str) -> Self {
        Self(s.as_bytes().to_vec())
    }
}

/// A client-submitted envelope not yet assigned a sequence position.
///
/// Created on client publish, consumed and deleted by the publish worker
/// once durably republished. Never mutated in place. The staging ID is
/// assigned by the store and is monotonically increasing; it becomes the
/// envelope's sequence ID once published.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagedEnvelope {
    /// Store-assigned, monotonically increasing staging ID.
    pub id: i64,
    /// Topic the payload belongs to.
    pub topic: Topic,
    /// Originator-bound unsigned payload.
    pub payload: Vec<u8>,
    /// Unix timestamp in nanoseconds when the envelope was staged.
    pub staged_at_ns: i64,
}

/// A durable gateway table row: the ordered unit of replication.
///
/// `(originator_id, sequence_id)` is globally unique and per-originator
/// monotonic. `envelope` holds the marshaled, signed [`GatewayEnvelope`]
/// bytes; readers deserialize once on dispatch. Rows are never updated and
/// never deleted except by out-of-band retention.
///
/// [`GatewayEnvelope`]: crate::envelope::GatewayEnvelope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayEnvelopeRow {
    /// Node that assigned the sequence position.
    pub originator_id: OriginatorId,
    /// Position in that originator's stream.
    pub sequence_id: SequenceId,
    /// Topic, duplicated out of the envelope for filtered queries.
    pub topic: Topic,
    /// Marshaled signed envelope bytes.
    pub envelope: Vec<u8>,
}
