//! In-memory broker implementing both collaborator interfaces.
//!
//! Routing follows AMQP direct-exchange rules: the empty exchange delivers to
//! the queue named by the routing key; any other exchange delivers to the
//! queues bound to it under that exact routing key.
//!
//! Requeued deliveries never travel through the publish channel, so a closed
//! queue still hands them back to its consumer until every delivery is settled.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{Notify, mpsc};
use tracing::debug;

use crate::{
    Acknowledger, ConsumerSource, Delivery, DeliveryStream, MessagingError, PublisherSink,
};

/// In-process broker backed by tokio channels.
///
/// Cloning shares the same queues and bindings.
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    state: Arc<BrokerState>,
}

#[derive(Default)]
struct BrokerState {
    queues: Mutex<HashMap<String, QueueState>>,
    /// (exchange, routing key) -> bound queues
    bindings: Mutex<HashMap<(String, String), Vec<String>>>,
    next_tag: AtomicU64,
    published: AtomicU64,
}

struct QueueState {
    /// Dropped by `close_queue`
    sender: Option<mpsc::UnboundedSender<Envelope>>,
    /// Present while no consumer is attached
    receiver: Option<mpsc::UnboundedReceiver<Envelope>>,
    unacked: HashMap<u64, Envelope>,
    /// Requeued deliveries, handed out before new payloads
    redelivery: VecDeque<Envelope>,
    /// Woken whenever a delivery is settled or requeued
    settled: Arc<Notify>,
}

#[derive(Debug, Clone)]
struct Envelope {
    exchange: String,
    routing_key: String,
    payload: Vec<u8>,
    redelivered: bool,
}

impl InMemoryBroker {
    /// Create an empty broker
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a queue. Declaring an existing queue is a no-op.
    pub fn declare_queue(&self, name: &str) {
        let mut queues = self.state.queues.lock();
        queues.entry(name.to_string()).or_insert_with(|| {
            let (sender, receiver) = mpsc::unbounded_channel();
            debug!(queue = name, "Queue declared");
            QueueState {
                sender: Some(sender),
                receiver: Some(receiver),
                unacked: HashMap::new(),
                redelivery: VecDeque::new(),
                settled: Arc::new(Notify::new()),
            }
        });
    }

    /// Bind a queue to an exchange under a routing key
    pub fn bind_queue(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), MessagingError> {
        if !self.state.queues.lock().contains_key(queue) {
            return Err(MessagingError::NotFound(format!("queue {}", queue)));
        }

        let mut bindings = self.state.bindings.lock();
        let bound = bindings
            .entry((exchange.to_string(), routing_key.to_string()))
            .or_default();
        if !bound.iter().any(|q| q == queue) {
            bound.push(queue.to_string());
        }

        debug!(
            queue = queue,
            exchange = exchange,
            routing_key = routing_key,
            "Queue bound to exchange"
        );
        Ok(())
    }

    /// Stop accepting new payloads on a queue.
    ///
    /// A consumer drains what is already buffered, keeps receiving requeued
    /// deliveries until all of them are settled, and then its stream ends.
    pub fn close_queue(&self, name: &str) -> Result<(), MessagingError> {
        let mut queues = self.state.queues.lock();
        let queue = queues
            .get_mut(name)
            .ok_or_else(|| MessagingError::NotFound(format!("queue {}", name)))?;
        queue.sender = None;
        Ok(())
    }

    /// Number of deliveries handed out on `queue` and not yet settled
    pub fn unacked_count(&self, queue: &str) -> usize {
        self.state
            .queues
            .lock()
            .get(queue)
            .map(|q| q.unacked.len())
            .unwrap_or(0)
    }

    /// Total payloads accepted by `publish`
    pub fn published_count(&self) -> u64 {
        self.state.published.load(Ordering::SeqCst)
    }

    fn route(&self, exchange: &str, routing_key: &str) -> Result<Vec<String>, MessagingError> {
        if exchange.is_empty() {
            return if self.state.queues.lock().contains_key(routing_key) {
                Ok(vec![routing_key.to_string()])
            } else {
                Err(MessagingError::NotFound(format!("queue {}", routing_key)))
            };
        }

        self.state
            .bindings
            .lock()
            .get(&(exchange.to_string(), routing_key.to_string()))
            .filter(|queues| !queues.is_empty())
            .cloned()
            .ok_or_else(|| {
                MessagingError::NotFound(format!(
                    "no binding for exchange {:?} with routing key {:?}",
                    exchange, routing_key
                ))
            })
    }
}

impl BrokerState {
    fn enqueue(&self, queue: &str, envelope: Envelope) -> Result<(), MessagingError> {
        let queues = self.queues.lock();
        let sender = queues
            .get(queue)
            .and_then(|q| q.sender.as_ref())
            .ok_or_else(|| MessagingError::ChannelClosed(format!("queue {}", queue)))?;

        sender
            .send(envelope)
            .map_err(|_| MessagingError::ChannelClosed(format!("queue {}", queue)))
    }

    /// Remove `tag` from the unacked set, putting it back for redelivery when
    /// `requeue` is set. Both happen under one lock.
    fn settle(&self, queue: &str, tag: u64, requeue: bool) -> Result<(), MessagingError> {
        let mut queues = self.queues.lock();
        let state = queues
            .get_mut(queue)
            .ok_or_else(|| MessagingError::NotFound(format!("queue {}", queue)))?;

        let mut envelope = state.unacked.remove(&tag).ok_or_else(|| {
            MessagingError::Acknowledge(format!("unknown delivery tag {} on {}", tag, queue))
        })?;

        if requeue {
            envelope.redelivered = true;
            state.redelivery.push_back(envelope);
        }

        state.settled.notify_waiters();
        Ok(())
    }
}

#[async_trait]
impl PublisherSink for InMemoryBroker {
    async fn publish(
        &self,
        destination: &str,
        routing_key: &str,
        payload: &[u8],
    ) -> Result<(), MessagingError> {
        let queues = self.route(destination, routing_key)?;

        debug!(
            exchange = destination,
            routing_key = routing_key,
            queues = queues.len(),
            "Publishing message"
        );

        for queue in &queues {
            self.state.enqueue(
                queue,
                Envelope {
                    exchange: destination.to_string(),
                    routing_key: routing_key.to_string(),
                    payload: payload.to_vec(),
                    redelivered: false,
                },
            )?;
        }

        self.state.published.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl ConsumerSource for InMemoryBroker {
    async fn consume(&self, queue: &str) -> Result<DeliveryStream, MessagingError> {
        let (receiver, settled) = {
            let mut queues = self.state.queues.lock();
            let state = queues
                .get_mut(queue)
                .ok_or_else(|| MessagingError::NotFound(format!("queue {}", queue)))?;
            let receiver = state.receiver.take().ok_or_else(|| {
                MessagingError::Subscribe(format!("queue {} already has a consumer", queue))
            })?;
            (receiver, state.settled.clone())
        };

        debug!(queue = queue, "Consumer attached");

        let consumer = QueueConsumer {
            state: self.state.clone(),
            queue: queue.to_string(),
            receiver: Some(receiver),
            settled,
            exhausted: false,
        };

        let stream = futures::stream::unfold(consumer, |mut consumer| async move {
            let envelope = consumer.next_envelope().await?;
            let delivery = consumer.track(envelope);
            Some((Ok::<_, MessagingError>(delivery), consumer))
        });

        Ok(Box::pin(stream))
    }
}

/// Attached consumer; hands its receiver back and requeues unsettled
/// deliveries when the stream is dropped.
struct QueueConsumer {
    state: Arc<BrokerState>,
    queue: String,
    receiver: Option<mpsc::UnboundedReceiver<Envelope>>,
    settled: Arc<Notify>,
    /// The queue was closed and its buffer drained
    exhausted: bool,
}

impl QueueConsumer {
    async fn next_envelope(&mut self) -> Option<Envelope> {
        let settled = self.settled.clone();

        loop {
            let notified = settled.notified();
            tokio::pin!(notified);
            // Register before inspecting state so a settle in between is not missed
            notified.as_mut().enable();

            {
                let mut queues = self.state.queues.lock();
                let queue = queues.get_mut(&self.queue)?;
                if let Some(envelope) = queue.redelivery.pop_front() {
                    return Some(envelope);
                }
                if self.exhausted && queue.unacked.is_empty() {
                    return None;
                }
            }

            if self.exhausted {
                notified.await;
                continue;
            }

            let receiver = self.receiver.as_mut()?;
            tokio::select! {
                envelope = receiver.recv() => match envelope {
                    Some(envelope) => return Some(envelope),
                    None => self.exhausted = true,
                },
                _ = &mut notified => {}
            }
        }
    }

    fn track(&self, envelope: Envelope) -> Delivery {
        let tag = self.state.next_tag.fetch_add(1, Ordering::SeqCst) + 1;

        if let Some(queue) = self.state.queues.lock().get_mut(&self.queue) {
            queue.unacked.insert(tag, envelope.clone());
        }

        let acker = MemoryAcker {
            state: self.state.clone(),
            queue: self.queue.clone(),
            tag,
        };

        Delivery::new(
            tag,
            envelope.exchange,
            envelope.routing_key,
            envelope.payload,
            Box::new(acker),
        )
        .redelivered(envelope.redelivered)
    }
}

impl Drop for QueueConsumer {
    fn drop(&mut self) {
        let mut queues = self.state.queues.lock();
        let Some(queue) = queues.get_mut(&self.queue) else {
            return;
        };

        let pending: Vec<Envelope> = queue.unacked.drain().map(|(_, e)| e).collect();
        for mut envelope in pending {
            envelope.redelivered = true;
            queue.redelivery.push_back(envelope);
        }

        queue.receiver = self.receiver.take();
        debug!(queue = %self.queue, "Consumer detached");
    }
}

struct MemoryAcker {
    state: Arc<BrokerState>,
    queue: String,
    tag: u64,
}

#[async_trait]
impl Acknowledger for MemoryAcker {
    async fn ack(&self) -> Result<(), MessagingError> {
        self.state.settle(&self.queue, self.tag, false)
    }

    async fn reject(&self, requeue: bool) -> Result<(), MessagingError> {
        self.state.settle(&self.queue, self.tag, requeue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::AckResult;
    use futures::StreamExt;

    fn broker_with_queue(queue: &str) -> InMemoryBroker {
        let broker = InMemoryBroker::new();
        broker.declare_queue(queue);
        broker
    }

    #[tokio::test]
    async fn test_default_exchange_routes_by_queue_name() {
        let broker = broker_with_queue("my-queue");
        broker.publish("", "my-queue", b"hello").await.unwrap();

        let mut stream = broker.consume("my-queue").await.unwrap();
        let delivery = stream.next().await.unwrap().unwrap();

        assert_eq!(delivery.payload, b"hello");
        assert_eq!(delivery.routing_key, "my-queue");
        assert!(!delivery.redelivered);
        assert_eq!(broker.published_count(), 1);
    }

    #[test]
    fn test_clones_share_queues() {
        let broker = broker_with_queue("shared");
        let clone = broker.clone();

        tokio_test::block_on(clone.publish("", "shared", b"from clone")).unwrap();

        assert_eq!(broker.published_count(), 1);
        let _stream = tokio_test::block_on(broker.consume("shared")).unwrap();
        assert!(tokio_test::block_on(clone.consume("shared")).is_err());
    }

    #[tokio::test]
    async fn test_bound_exchange_fans_out() {
        let broker = InMemoryBroker::new();
        broker.declare_queue("audit");
        broker.declare_queue("billing");
        broker.bind_queue("audit", "amq.direct", "").unwrap();
        broker.bind_queue("billing", "amq.direct", "").unwrap();

        broker.publish("amq.direct", "", b"Hello, World!").await.unwrap();

        for queue in ["audit", "billing"] {
            let mut stream = broker.consume(queue).await.unwrap();
            let delivery = stream.next().await.unwrap().unwrap();
            assert_eq!(delivery.exchange, "amq.direct");
            assert_eq!(delivery.payload_str().unwrap(), "Hello, World!");
        }
    }

    #[tokio::test]
    async fn test_publish_without_route_fails() {
        let broker = broker_with_queue("my-queue");

        let err = broker.publish("amq.direct", "", b"x").await.unwrap_err();
        assert!(matches!(err, MessagingError::NotFound(_)));

        let err = broker.publish("", "missing", b"x").await.unwrap_err();
        assert!(matches!(err, MessagingError::NotFound(_)));

        assert!(broker.bind_queue("missing", "amq.direct", "").is_err());
        assert_eq!(broker.published_count(), 0);
    }

    #[tokio::test]
    async fn test_ack_settles_and_double_consume_is_rejected() {
        let broker = broker_with_queue("my-queue");
        broker.publish("", "my-queue", b"one").await.unwrap();

        let mut stream = broker.consume("my-queue").await.unwrap();
        assert!(matches!(
            broker.consume("my-queue").await,
            Err(MessagingError::Subscribe(_))
        ));

        let delivery = stream.next().await.unwrap().unwrap();
        assert_eq!(broker.unacked_count("my-queue"), 1);
        assert_eq!(delivery.ack().await.unwrap(), AckResult::Acked);
        assert_eq!(broker.unacked_count("my-queue"), 0);
    }

    #[tokio::test]
    async fn test_requeued_delivery_comes_back_redelivered() {
        let broker = broker_with_queue("my-queue");
        broker.publish("", "my-queue", b"retry me").await.unwrap();

        let mut stream = broker.consume("my-queue").await.unwrap();
        let first = stream.next().await.unwrap().unwrap();
        let first_tag = first.delivery_tag;
        first.reject(true).await.unwrap();

        let second = stream.next().await.unwrap().unwrap();
        assert!(second.redelivered);
        assert_ne!(second.delivery_tag, first_tag);
        assert_eq!(second.payload, b"retry me");
        second.reject(false).await.unwrap();

        assert_eq!(broker.unacked_count("my-queue"), 0);
    }

    #[tokio::test]
    async fn test_dropped_stream_requeues_and_allows_restart() {
        let broker = broker_with_queue("my-queue");
        broker.publish("", "my-queue", b"unsettled").await.unwrap();

        {
            let mut stream = broker.consume("my-queue").await.unwrap();
            let delivery = stream.next().await.unwrap().unwrap();
            drop(stream);
            // Settling after detach refers to a tag that no longer exists
            assert!(delivery.ack().await.is_err());
        }

        let mut stream = broker.consume("my-queue").await.unwrap();
        let delivery = stream.next().await.unwrap().unwrap();
        assert!(delivery.redelivered);
        assert_eq!(delivery.payload, b"unsettled");
    }

    #[tokio::test]
    async fn test_closed_queue_ends_stream_after_drain() {
        let broker = broker_with_queue("my-queue");
        broker.publish("", "my-queue", b"last").await.unwrap();
        broker.close_queue("my-queue").unwrap();

        let mut stream = broker.consume("my-queue").await.unwrap();
        let delivery = stream.next().await.unwrap().unwrap();
        delivery.ack().await.unwrap();
        assert!(stream.next().await.is_none());

        assert!(matches!(
            broker.publish("", "my-queue", b"late").await,
            Err(MessagingError::ChannelClosed(_))
        ));
    }

    #[tokio::test]
    async fn test_requeue_on_closed_queue_keeps_delivery() {
        let broker = broker_with_queue("q");
        broker.publish("", "q", b"precious").await.unwrap();
        broker.close_queue("q").unwrap();

        let mut stream = broker.consume("q").await.unwrap();
        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first.reject(true).await.unwrap(), AckResult::Requeued);

        let again = stream.next().await.unwrap().unwrap();
        assert!(again.redelivered);
        assert_eq!(again.payload, b"precious");
        assert_eq!(broker.unacked_count("q"), 1);

        again.ack().await.unwrap();
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_closed_queue_stream_waits_for_outstanding_delivery() {
        let broker = broker_with_queue("q");
        broker.publish("", "q", b"slow").await.unwrap();
        broker.close_queue("q").unwrap();

        let mut stream = broker.consume("q").await.unwrap();
        let delivery = stream.next().await.unwrap().unwrap();

        // Settled from elsewhere while the consumer is already waiting
        let settle = tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            delivery.reject(true).await.unwrap();
        });

        let again = stream.next().await.unwrap().unwrap();
        assert!(again.redelivered);
        settle.await.unwrap();

        again.reject(false).await.unwrap();
        assert!(stream.next().await.is_none());
        assert_eq!(broker.unacked_count("q"), 0);
    }
}
