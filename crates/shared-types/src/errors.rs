//! Shared error types.

use thiserror::Error;

/// Errors from envelope marshaling/unmarshaling.
///
/// Decode failures on the dispatch path are logged and the row is skipped;
/// they are never retried and never fatal.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Failed to marshal an envelope.
    #[error("failed to encode envelope: {0}")]
    Encode(#[source] bincode::Error),

    /// Failed to unmarshal an envelope.
    #[error("failed to decode envelope: {0}")]
    Decode(#[source] bincode::Error),
}
