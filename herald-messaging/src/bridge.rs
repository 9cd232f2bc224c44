//! Feeding a consumer source into a dispatcher

use std::sync::Arc;

use futures::StreamExt;
use herald_events::EventDispatcher;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::{AckResult, ConsumerSource, Delivery, EventDecoder, MessagingError};

/// Counters for one bridge run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BridgeStats {
    /// Deliveries pulled from the source
    pub received: u64,
    /// Deliveries dispatched and acknowledged
    pub acked: u64,
    /// Deliveries that could not be decoded and were discarded
    pub rejected: u64,
    /// Deliveries whose dispatch failed and were handed back to the queue
    pub requeued: u64,
}

impl BridgeStats {
    fn record(&mut self, result: AckResult) {
        match result {
            AckResult::Acked => self.acked += 1,
            AckResult::Rejected => self.rejected += 1,
            AckResult::Requeued => self.requeued += 1,
        }
    }
}

/// Pulls deliveries from a queue, dispatches them as events and settles each
/// one with the broker.
///
/// - decoded and dispatched: acknowledged
/// - undecodable: rejected without requeue
/// - dispatch error: rejected with requeue
pub struct ConsumerBridge<D: EventDecoder> {
    source: Arc<dyn ConsumerSource>,
    dispatcher: EventDispatcher,
    decoder: D,
    queue: String,
}

impl<D: EventDecoder> ConsumerBridge<D> {
    /// Create a bridge for `queue`
    pub fn new(
        source: Arc<dyn ConsumerSource>,
        dispatcher: EventDispatcher,
        decoder: D,
        queue: impl Into<String>,
    ) -> Self {
        Self {
            source,
            dispatcher,
            decoder,
            queue: queue.into(),
        }
    }

    /// Queue this bridge consumes
    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Consume until the stream ends or `shutdown` turns `true`.
    ///
    /// Dropping the shutdown sender also stops the bridge.
    pub async fn run(
        &self,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<BridgeStats, MessagingError> {
        let mut stats = BridgeStats::default();

        if *shutdown.borrow() {
            return Ok(stats);
        }

        let mut deliveries = self.source.consume(&self.queue).await?;
        info!(queue = %self.queue, "Consumer bridge started");

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!(queue = %self.queue, "Consumer bridge shutting down");
                        break;
                    }
                }
                next = deliveries.next() => match next {
                    Some(Ok(delivery)) => {
                        stats.received += 1;
                        let result = self.process(delivery).await?;
                        stats.record(result);
                    }
                    Some(Err(e)) => {
                        error!(queue = %self.queue, error = %e, "Consumer error");
                        return Err(e);
                    }
                    None => {
                        debug!(queue = %self.queue, "Consumer stream ended");
                        break;
                    }
                },
            }
        }

        info!(
            queue = %self.queue,
            received = stats.received,
            acked = stats.acked,
            rejected = stats.rejected,
            requeued = stats.requeued,
            "Consumer bridge stopped"
        );

        Ok(stats)
    }

    /// Consume until the source's stream ends
    pub async fn run_to_end(&self) -> Result<BridgeStats, MessagingError> {
        let (_keep_open, shutdown) = watch::channel(false);
        self.run(shutdown).await
    }

    /// Decode, dispatch and settle one delivery
    pub async fn process(&self, delivery: Delivery) -> Result<AckResult, MessagingError> {
        let event = match self.decoder.decode(&delivery) {
            Ok(event) => event,
            Err(e) => {
                warn!(
                    queue = %self.queue,
                    delivery_tag = delivery.delivery_tag,
                    error = %e,
                    "Discarding undecodable delivery"
                );
                return delivery.reject(false).await;
            }
        };

        match self.dispatcher.dispatch(event).await {
            Ok(report) => {
                debug!(
                    queue = %self.queue,
                    event = %report.event_name,
                    handlers = report.invoked,
                    "Delivery dispatched"
                );
                delivery.ack().await
            }
            Err(e) => {
                error!(
                    queue = %self.queue,
                    delivery_tag = delivery.delivery_tag,
                    error = %e,
                    "Dispatch failed, requeueing delivery"
                );
                delivery.reject(true).await
            }
        }
    }
}
