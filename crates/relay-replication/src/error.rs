//! Replication error types.

use relay_registrant::RegistrantError;
use relay_storage::StorageError;
use shared_types::CodecError;
use thiserror::Error;

/// Errors from the replication core.
///
/// Background workers only surface these from their start paths; once
/// running, every failure is either logged-and-retried or
/// logged-and-skipped.
#[derive(Debug, Error)]
pub enum ReplicationError {
    /// A store query failed.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Signing or verification failed.
    #[error("registrant error: {0}")]
    Registrant(#[from] RegistrantError),

    /// An envelope could not be marshaled or unmarshaled.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// A component was configured with unusable options.
    #[error("invalid options: {0}")]
    InvalidOptions(&'static str),
}
