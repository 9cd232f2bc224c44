//! Turning raw deliveries into dispatchable events

use herald_events::Event;

use crate::{Delivery, MessagingError};

/// Maps a raw delivery onto an [`Event`].
pub trait EventDecoder: Send + Sync + 'static {
    /// Decode one delivery
    fn decode(&self, delivery: &Delivery) -> Result<Event, MessagingError>;
}

impl<F> EventDecoder for F
where
    F: Fn(&Delivery) -> Result<Event, MessagingError> + Send + Sync + 'static,
{
    fn decode(&self, delivery: &Delivery) -> Result<Event, MessagingError> {
        self(delivery)
    }
}

/// Expects the payload to be a JSON-serialized [`Event`].
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonEventDecoder;

impl EventDecoder for JsonEventDecoder {
    fn decode(&self, delivery: &Delivery) -> Result<Event, MessagingError> {
        let event: Event = serde_json::from_slice(&delivery.payload)
            .map_err(|e| MessagingError::Deserialization(e.to_string()))?;

        if event.name().trim().is_empty() {
            return Err(MessagingError::Deserialization(
                "event name is empty".to_string(),
            ));
        }

        Ok(event)
    }
}

/// Uses the routing key as the event name and the body as the payload.
///
/// JSON bodies become structured payloads; any other UTF-8 body becomes a
/// string payload. Deliveries with an empty routing key take the default
/// name when one is set.
#[derive(Debug, Clone, Default)]
pub struct RoutingKeyDecoder {
    default_name: Option<String>,
}

impl RoutingKeyDecoder {
    /// Decoder without a fallback name
    pub fn new() -> Self {
        Self::default()
    }

    /// Decoder that names keyless deliveries `name`
    pub fn with_default_name(name: impl Into<String>) -> Self {
        Self {
            default_name: Some(name.into()),
        }
    }
}

impl EventDecoder for RoutingKeyDecoder {
    fn decode(&self, delivery: &Delivery) -> Result<Event, MessagingError> {
        let name = match (delivery.routing_key.as_str(), &self.default_name) {
            ("", Some(default)) => default.as_str(),
            (key, _) => key,
        };

        let payload = match serde_json::from_slice(&delivery.payload) {
            Ok(value) => value,
            Err(_) => serde_json::Value::String(delivery.payload_str()?.to_string()),
        };

        Event::new(name, payload).map_err(|e| MessagingError::Deserialization(e.to_string()))
    }
}
