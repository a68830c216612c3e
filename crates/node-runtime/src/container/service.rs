//! # Replication Service
//!
//! The central container wiring storage, registrant, vector clock, and the
//! two replication workers together.
//!
//! ## Lifecycle
//!
//! Subsystems start in dependency order: the vector clock first (its
//! initial sync must succeed for the node to come up healthy), then the
//! publish and subscribe workers. Shutdown reverses nothing fancy: one
//! signal stops the vector clock loop, and each worker is stopped and
//! awaited.

use crate::container::config::{ConfigError, NodeConfig};
use relay_registrant::{Registrant, RegistrantError};
use relay_replication::{
    EnvelopeBatch, EnvelopeStream, PublishWorker, ReplicationError, SubscribeWorker,
    SubscriptionQuery, VectorClock,
};
use relay_storage::{EnvelopeStore, StorageError};
use shared_types::{OriginatorId, SequenceId, Topic, VectorClockMap};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::info;

/// Errors from the replication service.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// The configuration is unusable.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The registrant could not be constructed.
    #[error(transparent)]
    Registrant(#[from] RegistrantError),

    /// A subsystem failed to start.
    #[error(transparent)]
    Replication(#[from] ReplicationError),

    /// The store rejected a write.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Publish was called with an empty topic.
    #[error("topic must not be empty")]
    EmptyTopic,
}

/// A running node core: accepts envelope writes, replicates them, and fans
/// them out to subscribers.
pub struct ReplicationService {
    store: Arc<dyn EnvelopeStore>,
    registrant: Arc<Registrant>,
    vector_clock: VectorClock,
    publish_worker: PublishWorker,
    subscribe_worker: SubscribeWorker,
    shutdown: watch::Sender<bool>,
}

impl ReplicationService {
    /// Starts all subsystems.
    pub async fn start(
        config: &NodeConfig,
        store: Arc<dyn EnvelopeStore>,
    ) -> Result<Self, ServiceError> {
        config.validate()?;

        let registrant = Arc::new(match config.signing_seed()? {
            Some(seed) => Registrant::from_seed(
                config.node.node_id,
                seed,
                config.node.retention_days,
            )?,
            None => Registrant::generate(config.node.node_id)?,
        });

        let (shutdown, shutdown_rx) = watch::channel(false);

        let vector_clock =
            VectorClock::new(store.clone(), config.replication.vector_clock_config());
        vector_clock.start(shutdown_rx).await?;

        let publish_worker = PublishWorker::start(
            store.clone(),
            registrant.clone(),
            config.replication.publish_config(),
        )?;

        let subscribe_worker =
            SubscribeWorker::start(store.clone(), config.replication.subscribe_config()).await?;

        info!(originator_id = registrant.node_id(), "replication service started");

        Ok(Self {
            store,
            registrant,
            vector_clock,
            publish_worker,
            subscribe_worker,
            shutdown,
        })
    }

    /// Stages a client envelope and wakes the publish worker.
    ///
    /// Returns the staging ID, which becomes the envelope's sequence ID
    /// once published.
    pub async fn publish(&self, topic: Topic, payload: Vec<u8>) -> Result<i64, ServiceError> {
        if topic.is_empty() {
            return Err(ServiceError::EmptyTopic);
        }

        let staged = self.store.stage_envelope(topic, payload).await?;
        self.publish_worker.notify_staged_publish();
        Ok(staged.id)
    }

    /// Registers a subscriber; see [`SubscribeWorker::listen`].
    pub fn subscribe(&self, query: &SubscriptionQuery) -> mpsc::Receiver<EnvelopeBatch> {
        self.subscribe_worker.listen(query)
    }

    /// Registers a subscriber as a stream.
    pub fn subscribe_stream(&self, query: &SubscriptionQuery) -> EnvelopeStream {
        self.subscribe_worker.listen_stream(query)
    }

    /// Fire-and-forget wakeup for the publish worker, exposed for write
    /// paths that stage envelopes through a different connection.
    pub fn notify_staged_publish(&self) {
        self.publish_worker.notify_staged_publish();
    }

    /// Records an observed `(originator, sequence)` pair in the vector
    /// clock. Used by ingestion paths that learn about remote envelopes.
    pub fn record_observation(&self, originator_id: OriginatorId, sequence_id: SequenceId) {
        self.vector_clock.save(originator_id, sequence_id);
    }

    /// The node's resumption cursor: highest observed sequence ID per
    /// originator. Transport layers hand this to new subscribers.
    #[must_use]
    pub fn sequence_cursor(&self) -> VectorClockMap {
        self.vector_clock.values()
    }

    /// Highest observed sequence ID for one originator; 0 if unseen.
    #[must_use]
    pub fn originator_cursor(&self, originator_id: OriginatorId) -> SequenceId {
        self.vector_clock.get(originator_id)
    }

    /// Blocking vector clock resync from the store, for operational
    /// tooling and health checks.
    pub async fn force_sync(&self) -> Result<(), ServiceError> {
        self.vector_clock.force_sync().await?;
        Ok(())
    }

    /// This node's originator ID.
    #[must_use]
    pub fn node_id(&self) -> OriginatorId {
        self.registrant.node_id()
    }

    /// This node's public key bytes.
    #[must_use]
    pub fn public_key(&self) -> [u8; 32] {
        self.registrant.public_key()
    }

    /// Stops all subsystems and waits for them to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        self.publish_worker.shutdown().await;
        self.subscribe_worker.shutdown().await;
        info!("replication service stopped");
    }
}
