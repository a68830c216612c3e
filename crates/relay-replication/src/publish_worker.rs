//! # Publish Worker
//!
//! Drains newly staged envelopes, finalizes them through the registrant,
//! and durably publishes them into the gateway table.
//!
//! ## Ordering
//!
//! Envelopes are processed strictly in staging order, one at a time. A
//! failing envelope is retried with fixed backoff before the worker moves
//! on: a later-staged envelope from the same originator must never be
//! durably published before an earlier one.
//!
//! ## Idempotency
//!
//! Both the gateway insert and the staged delete treat zero rows affected
//! as success: another worker racing on the same envelope is expected. A
//! delete failure after a successful insert is logged and not retried;
//! once durably published, staging-row cleanup is best-effort.

use crate::error::ReplicationError;
use crate::polling::{PollableQuery, PollingOptions, PollingSubscription};
use async_trait::async_trait;
use relay_registrant::Registrant;
use relay_storage::EnvelopeStore;
use shared_types::{GatewayEnvelopeRow, StagedEnvelope};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Retry policy for a single failing envelope.
#[derive(Debug, Clone)]
pub struct PublishRetryPolicy {
    /// Fixed delay between attempts.
    pub backoff: Duration,
    /// Maximum attempts before the envelope is dead-lettered.
    ///
    /// `None` retries forever. Skipping an envelope leaves a permanent gap
    /// in this originator's sequence that vector-clock readers will never
    /// re-poll, so a bound is an explicit operator choice, not a default.
    pub max_attempts: Option<u32>,
}

impl Default for PublishRetryPolicy {
    fn default() -> Self {
        Self {
            backoff: Duration::from_secs(1),
            max_attempts: None,
        }
    }
}

/// Publish worker configuration.
#[derive(Debug, Clone)]
pub struct PublishWorkerConfig {
    /// Fallback poll interval over the staged table.
    pub poll_interval: Duration,
    /// Staged rows fetched per poll page.
    pub page_size: i32,
    /// Per-envelope retry policy.
    pub retry: PublishRetryPolicy,
}

impl Default for PublishWorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            page_size: 100,
            retry: PublishRetryPolicy::default(),
        }
    }
}

/// Pollable over the staged table; cursor = last seen staging ID.
struct StagedQuery {
    store: Arc<dyn EnvelopeStore>,
}

#[async_trait]
impl PollableQuery for StagedQuery {
    type Row = StagedEnvelope;
    type Cursor = i64;

    async fn poll(
        &self,
        last_seen: &i64,
        limit: i32,
    ) -> Result<(Vec<StagedEnvelope>, i64), ReplicationError> {
        let rows = self.store.select_staged_envelopes(*last_seen, limit).await?;
        let next = rows.last().map_or(*last_seen, |row| row.id);
        Ok((rows, next))
    }
}

/// A single background worker publishing staged envelopes in order.
pub struct PublishWorker {
    notify: Arc<Notify>,
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
    last_processed: Arc<AtomicI64>,
}

impl PublishWorker {
    /// Starts the worker.
    pub fn start(
        store: Arc<dyn EnvelopeStore>,
        registrant: Arc<Registrant>,
        config: PublishWorkerConfig,
    ) -> Result<Self, ReplicationError> {
        let subscription = PollingSubscription::new(
            StagedQuery {
                store: store.clone(),
            },
            0,
            PollingOptions {
                interval: config.poll_interval,
                page_size: config.page_size,
            },
        );
        let notify = subscription.notifier();

        let (shutdown, shutdown_rx) = watch::channel(false);
        let batches = subscription.start(shutdown_rx.clone())?;

        let last_processed = Arc::new(AtomicI64::new(0));
        let task = PublishTask {
            store,
            registrant,
            retry: config.retry,
            shutdown: shutdown_rx,
            last_processed: last_processed.clone(),
        };
        let handle = tokio::spawn(task.run(batches));
        info!("publish worker started");

        Ok(Self {
            notify,
            shutdown,
            handle,
            last_processed,
        })
    }

    /// Fire-and-forget wakeup used by the write path to reduce latency
    /// between staging and publication. Never blocks; wakeups coalesce.
    pub fn notify_staged_publish(&self) {
        self.notify.notify_one();
    }

    /// Staging ID of the most recently published envelope.
    #[must_use]
    pub fn last_processed(&self) -> i64 {
        self.last_processed.load(Ordering::SeqCst)
    }

    /// Stops the worker and waits for it to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        let _ = self.handle.await;
    }
}

struct PublishTask {
    store: Arc<dyn EnvelopeStore>,
    registrant: Arc<Registrant>,
    retry: PublishRetryPolicy,
    shutdown: watch::Receiver<bool>,
    last_processed: Arc<AtomicI64>,
}

impl PublishTask {
    async fn run(mut self, mut batches: mpsc::Receiver<Vec<StagedEnvelope>>) {
        while let Some(batch) = batches.recv().await {
            for staged in batch {
                debug!(staging_id = staged.id, "publishing envelope");
                if !self.publish_until_done(&staged).await {
                    return;
                }
                self.last_processed.store(staged.id, Ordering::SeqCst);
            }
        }
        debug!("staged subscription closed; stopping publish worker");
    }

    /// Retries one envelope until published or dead-lettered.
    ///
    /// Returns false only when shutdown interrupts the retry loop.
    async fn publish_until_done(&mut self, staged: &StagedEnvelope) -> bool {
        let mut attempts: u32 = 0;
        loop {
            if self.publish_staged_envelope(staged).await {
                return true;
            }

            attempts += 1;
            if let Some(max_attempts) = self.retry.max_attempts {
                if attempts >= max_attempts {
                    // Dead-letter escape: drop the staged row so it cannot
                    // wedge a later restart, and surface the loss loudly.
                    error!(
                        staging_id = staged.id,
                        topic = %staged.topic,
                        attempts,
                        "giving up on staged envelope; dead-lettering"
                    );
                    if let Err(err) = self.store.delete_staged_envelope(staged.id).await {
                        error!(
                            staging_id = staged.id,
                            error = %err,
                            "failed to delete dead-lettered staged envelope"
                        );
                    }
                    return true;
                }
            }

            tokio::select! {
                _ = self.shutdown.changed() => return false,
                () = tokio::time::sleep(self.retry.backoff) => {}
            }
        }
    }

    /// One publish attempt. Returns true when the envelope is durably
    /// published (by this worker or a racing one).
    async fn publish_staged_envelope(&self, staged: &StagedEnvelope) -> bool {
        let envelope = match self.registrant.sign_staged_envelope(staged) {
            Ok(envelope) => envelope,
            Err(err) => {
                error!(
                    staging_id = staged.id,
                    error = %err,
                    "failed to sign staged envelope"
                );
                return false;
            }
        };

        let envelope_bytes = match envelope.encode() {
            Ok(bytes) => bytes,
            Err(err) => {
                error!(
                    staging_id = staged.id,
                    error = %err,
                    "failed to marshal gateway envelope"
                );
                return false;
            }
        };

        let originator_id = self.registrant.node_id();
        let sequence_id = staged.id as u64;

        // On unique-key conflicts no error is returned, but rows affected
        // is 0.
        match self
            .store
            .insert_gateway_envelope(GatewayEnvelopeRow {
                originator_id,
                sequence_id,
                topic: staged.topic.clone(),
                envelope: envelope_bytes,
            })
            .await
        {
            Err(err) => {
                error!(
                    staging_id = staged.id,
                    error = %err,
                    "failed to insert gateway envelope"
                );
                return false;
            }
            Ok(0) => {
                // Envelope was already inserted by another worker.
                debug!(originator_id, sequence_id, "envelope already inserted");
            }
            Ok(_) => {}
        }

        // Try to delete the staged row regardless of whether the gateway
        // envelope was inserted here or elsewhere.
        match self.store.delete_staged_envelope(staged.id).await {
            Err(err) => {
                // Already durably published, so it is safe to continue.
                error!(
                    staging_id = staged.id,
                    error = %err,
                    "failed to delete staged envelope"
                );
                true
            }
            Ok(0) => {
                debug!(staging_id = staged.id, "envelope already deleted");
                true
            }
            Ok(_) => true,
        }
    }
}
