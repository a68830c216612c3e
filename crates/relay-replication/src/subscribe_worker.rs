//! # Subscribe Worker
//!
//! Listens for newly published gateway envelopes and fans them out to
//! registered listeners.
//!
//! Assumes many listeners: updates are sent non-blocking on buffered
//! channels, and a listener whose channel is full is evicted rather than
//! allowed to stall dispatch for everyone else. The poll cursor is a
//! vector clock advanced only forward, and each poll batch is processed
//! fully before the next, so a listener observes per-originator
//! non-decreasing sequence IDs. No cross-originator ordering is guaranteed.

use crate::error::ReplicationError;
use crate::listeners::{
    EnvelopeBatch, Listener, ListenerFilter, ListenerSet, ListenersMap, PublishedEnvelope,
    SubscriptionQuery,
};
use crate::polling::{PollableQuery, PollingOptions, PollingSubscription};
use crate::DEFAULT_SUBSCRIPTION_BUFFER_SIZE;
use async_trait::async_trait;
use relay_storage::EnvelopeStore;
use shared_types::{GatewayEnvelope, GatewayEnvelopeRow, OriginatorId, Topic, VectorClockMap};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_stream::Stream;
use tracing::{debug, error, info, trace};

/// Subscribe worker configuration.
#[derive(Debug, Clone)]
pub struct SubscribeWorkerConfig {
    /// Fallback poll interval over the gateway table.
    pub poll_interval: Duration,
    /// Gateway rows fetched per poll page.
    pub page_size: i32,
    /// Per-listener channel capacity; a listener that falls this far
    /// behind is evicted.
    pub buffer_size: usize,
}

impl Default for SubscribeWorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            page_size: 1000,
            buffer_size: DEFAULT_SUBSCRIPTION_BUFFER_SIZE,
        }
    }
}

/// Pollable over the gateway table; cursor = per-originator vector clock.
struct GatewayQuery {
    store: Arc<dyn EnvelopeStore>,
}

#[async_trait]
impl PollableQuery for GatewayQuery {
    type Row = GatewayEnvelopeRow;
    type Cursor = VectorClockMap;

    async fn poll(
        &self,
        last_seen: &VectorClockMap,
        limit: i32,
    ) -> Result<(Vec<GatewayEnvelopeRow>, VectorClockMap), ReplicationError> {
        let rows = self.store.select_gateway_envelopes(last_seen, limit).await?;

        let mut next = last_seen.clone();
        for row in &rows {
            let entry = next.entry(row.originator_id).or_insert(0);
            if row.sequence_id > *entry {
                *entry = row.sequence_id;
            }
        }
        Ok((rows, next))
    }
}

/// The three listener indices.
///
/// A listener can only be in one index, so no row is double-delivered to
/// the same listener. Owned exclusively by one worker instance; multiple
/// independent workers never interfere.
#[derive(Default)]
struct DispatchState {
    global_listeners: ListenerSet,
    originator_listeners: ListenersMap<OriginatorId>,
    topic_listeners: ListenersMap<Topic>,
}

impl DispatchState {
    fn register(&self, listener: Arc<Listener>) {
        match &listener.filter {
            ListenerFilter::Global => self.global_listeners.add(listener.clone()),
            ListenerFilter::Topics(topics) => self.topic_listeners.add(topics, &listener),
            ListenerFilter::Originators(originators) => {
                self.originator_listeners.add(originators, &listener);
            }
        }
    }
}

fn dispatch_to_originators(state: &Arc<DispatchState>, envelopes: &[Arc<PublishedEnvelope>]) {
    // Nested loops: the number of originators is expected to be small.
    state.originator_listeners.for_each_key(|originator_id, set| {
        let filtered: EnvelopeBatch = envelopes
            .iter()
            .filter(|envelope| envelope.originator_id == *originator_id)
            .cloned()
            .collect();
        dispatch_to_listeners(state, set, filtered);
    });
}

fn dispatch_to_topics(state: &Arc<DispatchState>, envelopes: &[Arc<PublishedEnvelope>]) {
    // Envelope by envelope: the number of envelopes per topic is expected
    // to be small in each tick.
    for envelope in envelopes {
        if let Some(set) = state.topic_listeners.get(&envelope.topic) {
            dispatch_to_listeners(state, &set, vec![envelope.clone()]);
        }
    }
}

fn dispatch_to_globals(state: &Arc<DispatchState>, envelopes: &[Arc<PublishedEnvelope>]) {
    dispatch_to_listeners(state, &state.global_listeners, envelopes.to_vec());
}

fn dispatch_to_listeners(
    state: &Arc<DispatchState>,
    listeners: &ListenerSet,
    envelopes: EnvelopeBatch,
) {
    if envelopes.is_empty() {
        return;
    }
    listeners.for_each(|listener| {
        if listener.is_closed() {
            return;
        }
        match listener.sender.try_send(envelopes.clone()) {
            Ok(()) => {
                trace!(num_envelopes = envelopes.len(), "sent envelopes to listener");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(listener_id = %listener.id, "stream closed, removing listener");
                close_listener(state, listener);
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!(listener_id = %listener.id, "channel full, removing listener");
                close_listener(state, listener);
            }
        }
    });
}

/// Marks the listener closed and removes it from its index off the
/// dispatch hot path. Dropping the last sender clone closes the listener's
/// channel exactly once.
fn close_listener(state: &Arc<DispatchState>, listener: &Arc<Listener>) {
    if !listener.mark_closed() {
        return;
    }

    let state = state.clone();
    let listener = listener.clone();
    tokio::spawn(async move {
        match &listener.filter {
            ListenerFilter::Global => state.global_listeners.remove(&listener.id),
            ListenerFilter::Topics(topics) => {
                state.topic_listeners.remove(topics, &listener.id);
            }
            ListenerFilter::Originators(originators) => {
                state.originator_listeners.remove(originators, &listener.id);
            }
        }
    });
}

/// A worker that listens for new gateway envelopes and sends them to
/// subscribers.
pub struct SubscribeWorker {
    state: Arc<DispatchState>,
    buffer_size: usize,
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl SubscribeWorker {
    /// Starts the worker, seeding the poll cursor from the store's vector
    /// clock. Fails if that read fails.
    pub async fn start(
        store: Arc<dyn EnvelopeStore>,
        config: SubscribeWorkerConfig,
    ) -> Result<Self, ReplicationError> {
        if config.buffer_size == 0 {
            return Err(ReplicationError::InvalidOptions(
                "buffer_size must be positive",
            ));
        }

        let cursor = store.select_vector_clock().await?;

        let subscription = PollingSubscription::new(
            GatewayQuery { store },
            cursor,
            PollingOptions {
                interval: config.poll_interval,
                page_size: config.page_size,
            },
        );

        let (shutdown, shutdown_rx) = watch::channel(false);
        let batches = subscription.start(shutdown_rx)?;

        let state = Arc::new(DispatchState::default());
        let dispatch_state = state.clone();
        let handle = tokio::spawn(run_dispatch(dispatch_state, batches));
        info!("subscribe worker started");

        Ok(Self {
            state,
            buffer_size: config.buffer_size,
            shutdown,
            handle,
        })
    }

    /// Registers a listener and returns the receive side of its buffered
    /// channel.
    ///
    /// Dropping the receiver is the cancellation handle: the listener is
    /// removed the next time dispatch touches its index. A listener that
    /// stops draining is evicted and its channel closed.
    pub fn listen(&self, query: &SubscriptionQuery) -> mpsc::Receiver<EnvelopeBatch> {
        let (sender, receiver) = mpsc::channel(self.buffer_size);
        let filter = ListenerFilter::classify(query);
        debug!(filter = ?filter, "adding listener");

        self.state.register(Listener::new(filter, sender));
        receiver
    }

    /// Like [`listen`], wrapped for use with stream combinators.
    ///
    /// [`listen`]: Self::listen
    pub fn listen_stream(&self, query: &SubscriptionQuery) -> EnvelopeStream {
        EnvelopeStream {
            receiver: self.listen(query),
        }
    }

    /// Stops the worker and waits for it to finish. Listener channels
    /// close as their senders are dropped with the indices.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        let _ = self.handle.await;
    }
}

async fn run_dispatch(
    state: Arc<DispatchState>,
    mut batches: mpsc::Receiver<Vec<GatewayEnvelopeRow>>,
) {
    while let Some(batch) = batches.recv().await {
        debug!(num_envelopes = batch.len(), "received new batch");

        let mut envelopes: EnvelopeBatch = Vec::with_capacity(batch.len());
        for row in batch {
            // Deserialize once per row; every matching listener shares the
            // result.
            match GatewayEnvelope::decode(&row.envelope) {
                Ok(envelope) => envelopes.push(Arc::new(PublishedEnvelope {
                    originator_id: row.originator_id,
                    sequence_id: row.sequence_id,
                    topic: row.topic,
                    envelope,
                })),
                Err(err) => {
                    // The row is durable; a fixed decoder can reprocess it
                    // after a cold resync. Never retried here.
                    error!(
                        originator_id = row.originator_id,
                        sequence_id = row.sequence_id,
                        error = %err,
                        "failed to decode gateway envelope"
                    );
                }
            }
        }

        dispatch_to_originators(&state, &envelopes);
        dispatch_to_topics(&state, &envelopes);
        dispatch_to_globals(&state, &envelopes);
    }
    debug!("gateway subscription closed; stopping subscribe worker");
}

/// A stream wrapper over a listener channel.
pub struct EnvelopeStream {
    receiver: mpsc::Receiver<EnvelopeBatch>,
}

impl Stream for EnvelopeStream {
    type Item = EnvelopeBatch;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}
