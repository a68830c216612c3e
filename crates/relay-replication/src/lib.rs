//! # Relay Replication - Replication and Dispatch Core
//!
//! Turns a client write into a durably ordered, idempotently-published
//! record and fans new records out to an unbounded set of concurrent
//! subscribers.
//!
//! ## Components
//!
//! - [`PollingSubscription`]: generic notify-or-timer store poller
//! - [`VectorClock`]: per-originator high-watermark tracker with store
//!   reconciliation
//! - [`PublishWorker`]: staged-envelope publisher, strictly in order,
//!   idempotent under races
//! - [`SubscribeWorker`]: subscription dispatcher with slow-consumer
//!   eviction
//!
//! ## Guarantees
//!
//! - Per-originator monotonicity of published sequence IDs
//! - Per-listener in-order delivery of records matching its filter
//! - Dispatch never blocks on a slow listener; eviction replaces blocking
//!
//! No delivery-latency guarantee and no delivery guarantee at all for a
//! listener that stops draining: the durable store is at-least-once, the
//! live fan-out is best-effort.

// Nursery lints that are too strict
#![allow(clippy::missing_const_for_fn)]
// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod error;
pub mod listeners;
pub mod polling;
pub mod publish_worker;
pub mod subscribe_worker;
pub mod vector_clock;

// Re-export main types
pub use error::ReplicationError;
pub use listeners::{EnvelopeBatch, ListenerFilter, PublishedEnvelope, SubscriptionQuery};
pub use polling::{PollableQuery, PollingOptions, PollingSubscription};
pub use publish_worker::{PublishRetryPolicy, PublishWorker, PublishWorkerConfig};
pub use subscribe_worker::{EnvelopeStream, SubscribeWorker, SubscribeWorkerConfig};
pub use vector_clock::{ResolveStrategy, VectorClock, VectorClockConfig};

/// Maximum envelope batches buffered per listener before backpressure
/// eviction.
pub const DEFAULT_SUBSCRIPTION_BUFFER_SIZE: usize = 1024;
