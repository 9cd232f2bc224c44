//! Forwarding dispatched events to a broker

use std::sync::Arc;

use async_trait::async_trait;
use herald_events::{Completion, Event, EventHandler, EventHandlerError};
use tracing::debug;

use crate::PublisherSink;

/// Event handler that publishes every event it receives to a sink.
///
/// The event is serialized as JSON. Without an explicit routing key the
/// event name is used.
pub struct PublishingHandler {
    sink: Arc<dyn PublisherSink>,
    exchange: String,
    routing_key: Option<String>,
    name: String,
}

impl PublishingHandler {
    /// Publish to `exchange` through `sink`
    pub fn new(sink: Arc<dyn PublisherSink>, exchange: impl Into<String>) -> Self {
        let exchange = exchange.into();
        Self {
            name: format!("publish:{}", exchange),
            sink,
            exchange,
            routing_key: None,
        }
    }

    /// Use a fixed routing key instead of the event name
    pub fn with_routing_key(mut self, routing_key: impl Into<String>) -> Self {
        self.routing_key = Some(routing_key.into());
        self
    }

    fn routing_key_for<'a>(&'a self, event: &'a Event) -> &'a str {
        self.routing_key.as_deref().unwrap_or_else(|| event.name())
    }
}

#[async_trait]
impl EventHandler for PublishingHandler {
    async fn handle(&self, event: Arc<Event>, done: Completion) -> Result<(), EventHandlerError> {
        let payload = serde_json::to_vec(event.as_ref())
            .map_err(|e| EventHandlerError::ProcessingError(e.to_string()))?;
        let routing_key = self.routing_key_for(&event);

        self.sink
            .publish(&self.exchange, routing_key, &payload)
            .await
            .map_err(|e| EventHandlerError::HandlerFailed(e.to_string()))?;

        debug!(
            event = %event.name(),
            exchange = %self.exchange,
            routing_key = routing_key,
            "Event published"
        );

        done.done();
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}
