//! # Relay Registrant - Node Signing Identity
//!
//! The registrant holds the node's originator ID and Ed25519 signing key,
//! and finalizes staged envelopes into sequence-stamped, signed gateway
//! envelopes.
//!
//! ## Security Properties
//!
//! - **Deterministic nonces**: Ed25519 needs no RNG at signing time.
//! - **Domain separation**: signatures cover a tagged SHA-256 digest, so an
//!   envelope signature can never be confused with any other signed payload.
//! - **Stamp-at-source**: the sequence ID is taken from the staging ID, so
//!   the store, not the signer, decides ordering.

pub mod errors;
pub mod registrant;

pub use errors::RegistrantError;
pub use registrant::{signing_digest, verify_gateway_envelope, Registrant, DEFAULT_RETENTION_DAYS};
