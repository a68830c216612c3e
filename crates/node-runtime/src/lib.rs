//! # Node Runtime Library
//!
//! Wires the storage, registrant, and replication subsystems into a running
//! node. The main entry point is the `main.rs` binary; this library exposes
//! the container for tests and embedders.
//!
//! ## Architectural Patterns
//!
//! - **Subsystem-per-crate**: each concern lives behind its own crate
//!   boundary and is wired together here, nowhere else.
//! - **Store-as-port**: the runtime only ever sees `dyn EnvelopeStore`;
//!   swapping the in-memory store for a relational adapter touches only
//!   `main.rs`.

pub mod container;
pub mod telemetry;

pub use container::config::{ConfigError, NodeConfig};
pub use container::service::{ReplicationService, ServiceError};
pub use telemetry::{init_telemetry, TelemetryError};
