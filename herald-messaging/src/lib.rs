//! # Herald Messaging
//!
//! Broker collaborators for the Herald event dispatcher.
//!
//! The dispatcher itself is purely in-process. This crate describes the two
//! seams through which it meets a message broker:
//! - [`PublisherSink`] - sends a payload to a destination with a routing key
//! - [`ConsumerSource`] - yields a lazy, unbounded stream of [`Delivery`] values
//!   that must each be acknowledged
//!
//! It also ships an [`InMemoryBroker`] implementing both, a [`ConsumerBridge`]
//! that feeds consumed deliveries into an [`EventDispatcher`], and a
//! [`PublishingHandler`] that forwards dispatched events to a sink.
//!
//! ## Features
//!
//! - `rabbitmq` - RabbitMQ/AMQP backend via `lapin`
//!
//! ## Example
//!
//! ```rust,ignore
//! use herald_events::EventDispatcher;
//! use herald_messaging::{ConsumerBridge, InMemoryBroker, RoutingKeyDecoder};
//!
//! let broker = InMemoryBroker::new();
//! broker.declare_queue("my-queue");
//! broker.bind_queue("my-queue", "amq.direct", "");
//!
//! let dispatcher = EventDispatcher::new();
//! let bridge = ConsumerBridge::new(
//!     Arc::new(broker.clone()),
//!     dispatcher.clone(),
//!     RoutingKeyDecoder::with_default_name("message.received"),
//!     "my-queue",
//! );
//!
//! let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
//! let stats = bridge.run(shutdown_rx).await?;
//! ```
//!
//! [`EventDispatcher`]: herald_events::EventDispatcher

use std::fmt;
use std::pin::Pin;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::Stream;

pub mod bridge;
pub mod config;
pub mod decoder;
pub mod error;
pub mod handler;
pub mod memory;

#[cfg(feature = "rabbitmq")]
pub mod rabbitmq;

pub use bridge::{BridgeStats, ConsumerBridge};
pub use config::MessagingConfig;
pub use decoder::{EventDecoder, JsonEventDecoder, RoutingKeyDecoder};
pub use error::MessagingError;
pub use handler::PublishingHandler;
pub use memory::InMemoryBroker;

#[cfg(feature = "rabbitmq")]
pub use rabbitmq::RabbitMqBroker;

/// A stream of deliveries from one queue.
pub type DeliveryStream = Pin<Box<dyn Stream<Item = Result<Delivery, MessagingError>> + Send>>;

/// Acknowledgment result for a delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckResult {
    /// Delivery was acknowledged successfully
    Acked,
    /// Delivery was rejected and handed back to the queue
    Requeued,
    /// Delivery was rejected and discarded/dead-lettered
    Rejected,
}

/// Settles one delivery with the broker it came from.
#[async_trait]
pub trait Acknowledger: Send + Sync {
    /// Confirm successful processing.
    async fn ack(&self) -> Result<(), MessagingError>;

    /// Reject the delivery, optionally asking the broker to redeliver it.
    async fn reject(&self, requeue: bool) -> Result<(), MessagingError>;
}

/// A payload received from a broker queue.
///
/// Acknowledgment consumes the delivery, so each one is settled at most once.
/// A delivery dropped unsettled is left to the broker's redelivery rules.
pub struct Delivery {
    /// Delivery tag assigned by the broker
    pub delivery_tag: u64,
    /// Exchange the payload was published to
    pub exchange: String,
    /// Routing key the payload was published with
    pub routing_key: String,
    /// Raw payload bytes
    pub payload: Vec<u8>,
    /// Whether the broker delivered this payload before
    pub redelivered: bool,
    /// Content type announced by the publisher
    pub content_type: Option<String>,
    /// When the delivery was received
    pub received_at: DateTime<Utc>,
    acker: Box<dyn Acknowledger>,
}

impl Delivery {
    /// Create a delivery settled through `acker`
    pub fn new(
        delivery_tag: u64,
        exchange: impl Into<String>,
        routing_key: impl Into<String>,
        payload: Vec<u8>,
        acker: Box<dyn Acknowledger>,
    ) -> Self {
        Self {
            delivery_tag,
            exchange: exchange.into(),
            routing_key: routing_key.into(),
            payload,
            redelivered: false,
            content_type: None,
            received_at: Utc::now(),
            acker,
        }
    }

    /// Mark the delivery as redelivered
    pub fn redelivered(mut self, redelivered: bool) -> Self {
        self.redelivered = redelivered;
        self
    }

    /// Set the content type
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Get the payload as a UTF-8 string
    pub fn payload_str(&self) -> Result<&str, MessagingError> {
        std::str::from_utf8(&self.payload)
            .map_err(|e| MessagingError::Deserialization(e.to_string()))
    }

    /// Acknowledge successful processing
    pub async fn ack(self) -> Result<AckResult, MessagingError> {
        self.acker.ack().await?;
        Ok(AckResult::Acked)
    }

    /// Reject the delivery
    pub async fn reject(self, requeue: bool) -> Result<AckResult, MessagingError> {
        self.acker.reject(requeue).await?;
        Ok(if requeue {
            AckResult::Requeued
        } else {
            AckResult::Rejected
        })
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("delivery_tag", &self.delivery_tag)
            .field("exchange", &self.exchange)
            .field("routing_key", &self.routing_key)
            .field("size", &self.payload.len())
            .field("redelivered", &self.redelivered)
            .finish()
    }
}

/// Outbound side: hands payloads to a broker for out-of-process delivery.
///
/// Failures are reported to the caller and never retried here.
#[async_trait]
pub trait PublisherSink: Send + Sync {
    /// Publish `payload` to `destination` (an exchange) with `routing_key`.
    async fn publish(
        &self,
        destination: &str,
        routing_key: &str,
        payload: &[u8],
    ) -> Result<(), MessagingError>;
}

/// Inbound side: opens a consumer on a queue.
///
/// Each call starts a fresh stream; a dropped stream may be reopened.
#[async_trait]
pub trait ConsumerSource: Send + Sync {
    /// Start consuming deliveries from `queue`.
    async fn consume(&self, queue: &str) -> Result<DeliveryStream, MessagingError>;
}
