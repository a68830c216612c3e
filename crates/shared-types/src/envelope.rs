//! # Gateway Envelope Wire Format
//!
//! The signed, sequence-stamped record exchanged between nodes.
//!
//! A [`GatewayEnvelope`] wraps the bincode-marshaled bytes of an
//! [`UnsignedGatewayEnvelope`] together with the originator's signature over
//! those bytes. Keeping the unsigned portion as opaque bytes means the
//! signature stays valid even if the unsigned schema gains fields later:
//! verifiers hash exactly what was signed.

use crate::entities::{OriginatorId, SequenceId, Signature, Topic};
use crate::errors::CodecError;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, Bytes};

/// The sequence-stamped plaintext produced by the registrant from a staged
/// envelope, before signing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnsignedGatewayEnvelope {
    /// Node that assigned the sequence position.
    pub originator_id: OriginatorId,
    /// Position in the originator's stream; taken from the staging ID.
    pub sequence_id: SequenceId,
    /// Topic the payload belongs to.
    pub topic: Topic,
    /// Opaque client payload.
    pub payload: Vec<u8>,
    /// Unix timestamp in nanoseconds when the originator sequenced the
    /// envelope.
    pub gateway_ns: i64,
    /// Unix timestamp in seconds after which the record may be pruned by
    /// out-of-band retention.
    pub expiry_unixtime: u64,
}

impl UnsignedGatewayEnvelope {
    /// Marshals the unsigned envelope to its canonical byte form.
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        bincode::serialize(self).map_err(CodecError::Encode)
    }

    /// Unmarshals an unsigned envelope from its canonical byte form.
    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        bincode::deserialize(bytes).map_err(CodecError::Decode)
    }
}

/// The durable, signed unit of replication.
///
/// `unsigned_bytes` is the marshaled [`UnsignedGatewayEnvelope`];
/// `signature` is the originator's Ed25519 signature over the digest of
/// those bytes.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayEnvelope {
    /// Marshaled unsigned envelope, exactly as signed.
    pub unsigned_bytes: Vec<u8>,
    /// Originator signature over the digest of `unsigned_bytes`.
    #[serde_as(as = "Bytes")]
    pub signature: Signature,
}

impl GatewayEnvelope {
    /// Marshals the signed envelope for storage in the gateway table.
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        bincode::serialize(self).map_err(CodecError::Encode)
    }

    /// Unmarshals a signed envelope from gateway table bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        bincode::deserialize(bytes).map_err(CodecError::Decode)
    }

    /// Decodes the unsigned portion.
    pub fn open(&self) -> Result<UnsignedGatewayEnvelope, CodecError> {
        UnsignedGatewayEnvelope::decode(&self.unsigned_bytes)
    }
}
