//! # Polling Subscription
//!
//! A generic primitive that repeatedly asks a query function for "new rows
//! since cursor X" and streams result batches to a channel.
//!
//! Each tick is triggered by an explicit notify signal or by a fallback
//! timer, whichever fires first. The dual trigger is required because the
//! same store is written by other processes too: a purely event-driven
//! wakeup would miss writes from peers, and a purely timer-driven loop
//! would add avoidable latency to local writes.
//!
//! The cursor type is generic and type-checked: an integer staging ID for
//! staged-envelope polling, a per-originator vector clock for
//! gateway-envelope polling.

use crate::error::ReplicationError;
use async_trait::async_trait;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Notify};
use tracing::{debug, error};

/// A pollable "new rows since cursor" query.
///
/// `poll` returns the next batch of rows after `last_seen` together with the
/// advanced cursor. Implementations must never return rows at or before the
/// cursor.
#[async_trait]
pub trait PollableQuery: Send + Sync + 'static {
    /// Row type produced by the query.
    type Row: Send + 'static;
    /// Cursor type the query resumes from.
    type Cursor: Clone + Send + Sync + 'static;

    /// Fetches up to `limit` rows strictly after `last_seen`.
    async fn poll(
        &self,
        last_seen: &Self::Cursor,
        limit: i32,
    ) -> Result<(Vec<Self::Row>, Self::Cursor), ReplicationError>;
}

/// Polling options for a subscription.
///
/// The subscription polls whenever notified, or at `interval` if not
/// notified.
#[derive(Debug, Clone)]
pub struct PollingOptions {
    /// Fallback poll interval.
    pub interval: Duration,
    /// Maximum rows fetched per query call.
    pub page_size: i32,
}

/// A subscription that polls a store for updates.
///
/// Assumes a single consumer: batches block on a channel of capacity one,
/// so a slow consumer backpressures the poll loop rather than buffering
/// unboundedly.
pub struct PollingSubscription<Q: PollableQuery> {
    query: Q,
    cursor: Q::Cursor,
    options: PollingOptions,
    notify: Arc<Notify>,
}

impl<Q: PollableQuery> PollingSubscription<Q> {
    /// Creates a subscription starting at `cursor`.
    pub fn new(query: Q, cursor: Q::Cursor, options: PollingOptions) -> Self {
        Self {
            query,
            cursor,
            options,
            notify: Arc::new(Notify::new()),
        }
    }

    /// Returns the notify handle producers use to wake the loop early.
    ///
    /// Notifications are coalesced: at most one wakeup is buffered while no
    /// poll is in flight.
    #[must_use]
    pub fn notifier(&self) -> Arc<Notify> {
        self.notify.clone()
    }

    /// Starts the poll loop and returns the batch channel.
    ///
    /// The loop stops only when `shutdown` fires; the channel is closed on
    /// stop, and consumers must drain it until then. Query errors never
    /// terminate the subscription.
    pub fn start(
        self,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<mpsc::Receiver<Vec<Q::Row>>, ReplicationError> {
        if self.options.page_size <= 0 {
            return Err(ReplicationError::InvalidOptions(
                "page_size must be positive",
            ));
        }

        let (updates, receiver) = mpsc::channel(1);
        let Self {
            query,
            mut cursor,
            options,
            notify,
        } = self;

        tokio::spawn(async move {
            if poll(&query, &mut cursor, &options, &updates, "startup")
                .await
                .is_break()
            {
                return;
            }

            let start = tokio::time::Instant::now() + options.interval;
            let mut timer = tokio::time::interval_at(start, options.interval);
            timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                let trigger = tokio::select! {
                    _ = shutdown.changed() => {
                        debug!("shutdown; stopping subscription");
                        return;
                    }
                    () = notify.notified() => "notification",
                    _ = timer.tick() => "timer_fallback",
                };

                if poll(&query, &mut cursor, &options, &updates, trigger)
                    .await
                    .is_break()
                {
                    return;
                }
            }
        });

        Ok(receiver)
    }
}

/// Repeatedly queries page by page until a short page or an error.
///
/// Returns `Break` only when the consumer has gone away. The cursor is
/// advanced only after a successful query, so a failed tick retries the
/// same page on the next trigger.
async fn poll<Q: PollableQuery>(
    query: &Q,
    cursor: &mut Q::Cursor,
    options: &PollingOptions,
    updates: &mpsc::Sender<Vec<Q::Row>>,
    trigger: &'static str,
) -> ControlFlow<()> {
    let mut total_rows = 0usize;
    loop {
        let (rows, next_cursor) = match query.poll(cursor, options.page_size).await {
            Ok(page) => page,
            Err(err) => {
                // Did not update the cursor; will retry on the next poll.
                error!(
                    error = %err,
                    trigger,
                    page_size = options.page_size,
                    "error querying for subscription"
                );
                return ControlFlow::Continue(());
            }
        };

        if rows.is_empty() {
            if total_rows == 0 && trigger == "notification" {
                // The notification poll found nothing; a peer's write will
                // be picked up by the timer fallback.
                debug!("notification poll returned no rows");
            }
            return ControlFlow::Continue(());
        }

        total_rows += rows.len();
        let row_count = rows.len();
        *cursor = next_cursor;

        if updates.send(rows).await.is_err() {
            debug!("batch channel closed; stopping subscription");
            return ControlFlow::Break(());
        }

        // A short page means there is currently nothing more to retrieve.
        if (row_count as i32) < options.page_size {
            return ControlFlow::Continue(());
        }
    }
}
