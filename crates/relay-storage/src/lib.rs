//! # Relay Storage - Typed Query Layer
//!
//! Defines the contract the replication core uses to talk to the durable
//! store, and an in-memory implementation of that contract.
//!
//! ## Contract Rules
//!
//! - All queries must be safe under concurrent callers from multiple node
//!   processes.
//! - Unique-key conflicts on gateway insert are expected, not exceptional:
//!   they surface as `rows affected == 0`, never as an error.
//! - Table schemas and SQL belong to the adapter behind the trait and are
//!   intentionally not modeled here.

// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod memory;
pub mod store;

pub use memory::MemoryEnvelopeStore;
pub use store::{EnvelopeStore, StorageError};
