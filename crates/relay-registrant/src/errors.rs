//! Registrant error types.

use shared_types::CodecError;
use thiserror::Error;

/// Errors from signing and verification.
///
/// Signing errors are retried by the publish worker like any other
/// transient failure; verification errors mean the envelope must not be
/// trusted.
#[derive(Debug, Error)]
pub enum RegistrantError {
    /// Originator ID 0 is reserved and can never identify a node.
    #[error("originator ID 0 is not a valid node identity")]
    InvalidNodeId,

    /// The staged envelope carries a non-positive staging ID, which cannot
    /// become a sequence ID.
    #[error("staging ID {0} cannot be used as a sequence ID")]
    InvalidStagingId(i64),

    /// The unsigned envelope could not be marshaled.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// The public key bytes do not describe a valid Ed25519 point.
    #[error("invalid public key")]
    InvalidPublicKey,

    /// The signature does not match the envelope bytes.
    #[error("signature verification failed")]
    SignatureVerificationFailed,
}
