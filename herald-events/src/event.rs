//! Event definitions and handler traits

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use uuid::Uuid;

use crate::completion::Completion;
use crate::error::{DispatcherError, Result};

/// Base event metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventMetadata {
    /// Unique event ID
    pub id: Uuid,

    /// Event name, used as the routing key
    pub name: String,

    /// Timestamp when event was created
    pub timestamp: DateTime<Utc>,

    /// Optional correlation ID for tracing
    pub correlation_id: Option<Uuid>,
}

impl EventMetadata {
    /// Create new event metadata
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        validate_event_name(&name)?;

        Ok(Self {
            id: Uuid::new_v4(),
            name,
            timestamp: Utc::now(),
            correlation_id: None,
        })
    }

    /// Set correlation ID
    pub fn with_correlation_id(mut self, id: Uuid) -> Self {
        self.correlation_id = Some(id);
        self
    }
}

/// A named, timestamped event carrying an application payload.
///
/// Events are immutable once built and are shared with handlers behind an
/// [`Arc`], so fan-out never copies the payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Event metadata
    #[serde(flatten)]
    pub metadata: EventMetadata,

    /// Event payload
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl Event {
    /// Create a new event.
    ///
    /// Fails with [`DispatcherError::InvalidEventName`] when `name` is empty
    /// or only whitespace.
    pub fn new(name: impl Into<String>, payload: serde_json::Value) -> Result<Self> {
        Ok(Self {
            metadata: EventMetadata::new(name)?,
            payload,
        })
    }

    /// Create an event with a `null` payload
    pub fn named(name: impl Into<String>) -> Result<Self> {
        Self::new(name, serde_json::Value::Null)
    }

    /// Create an event from any serializable payload
    pub fn json<T: Serialize>(name: impl Into<String>, payload: &T) -> Result<Self> {
        let payload = serde_json::to_value(payload)
            .map_err(|e| DispatcherError::Payload(e.to_string()))?;
        Self::new(name, payload)
    }

    /// Set correlation ID
    pub fn with_correlation_id(mut self, id: Uuid) -> Self {
        self.metadata = self.metadata.with_correlation_id(id);
        self
    }

    /// Get event name
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    /// Get event ID
    pub fn id(&self) -> Uuid {
        self.metadata.id
    }

    /// Get event timestamp
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.metadata.timestamp
    }

    /// Get the raw payload
    pub fn payload(&self) -> &serde_json::Value {
        &self.payload
    }

    /// Deserialize the payload into a typed value
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.payload.clone())
            .map_err(|e| DispatcherError::Payload(e.to_string()))
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Event {{ name: {}, id: {} }}", self.name(), self.id())
    }
}

pub(crate) fn validate_event_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(DispatcherError::InvalidEventName(name.to_string()));
    }
    Ok(())
}

/// Event handler error
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EventHandlerError {
    #[error("Handler failed: {0}")]
    HandlerFailed(String),

    #[error("Event processing error: {0}")]
    ProcessingError(String),

    #[error("Handler panicked: {0}")]
    Panicked(String),
}

/// Event handler trait
///
/// `done` must be signaled exactly once when the handler's work is finished.
/// Dropping it counts as signaling, so returning early or failing never
/// leaves a dispatch waiting. A handler may move `done` into background work
/// to extend its completion past its own return.
#[async_trait]
pub trait EventHandler: Send + Sync + 'static {
    /// Handle the event
    async fn handle(&self, event: Arc<Event>, done: Completion) -> Result<(), EventHandlerError>;

    /// Human-readable handler name used in logs
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// Shared reference to a registered handler.
///
/// Equality is identity: two `HandlerRef`s are equal only when they point at
/// the same handler allocation, regardless of the handler's contents.
#[derive(Clone)]
pub struct HandlerRef(Arc<dyn EventHandler>);

impl HandlerRef {
    /// Wrap a handler in a new identity
    pub fn new<H: EventHandler>(handler: H) -> Self {
        Self(Arc::new(handler))
    }

    /// Reuse an existing shared handler as the identity
    pub fn from_arc(handler: Arc<dyn EventHandler>) -> Self {
        Self(handler)
    }

    /// Stable identity of the underlying handler
    pub fn id(&self) -> HandlerId {
        HandlerId(Arc::as_ptr(&self.0).cast::<()>() as usize)
    }

    /// Handler name
    pub fn name(&self) -> &str {
        self.0.name()
    }

    pub(crate) async fn handle(
        &self,
        event: Arc<Event>,
        done: Completion,
    ) -> Result<(), EventHandlerError> {
        self.0.handle(event, done).await
    }
}

impl PartialEq for HandlerRef {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for HandlerRef {}

impl Hash for HandlerRef {
    fn hash<S: Hasher>(&self, state: &mut S) {
        self.id().hash(state);
    }
}

impl fmt::Debug for HandlerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRef")
            .field("name", &self.name())
            .field("id", &self.id())
            .finish()
    }
}

impl<H: EventHandler> From<Arc<H>> for HandlerRef {
    fn from(handler: Arc<H>) -> Self {
        Self(handler)
    }
}

/// Opaque handler identity (the handler's allocation address)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerId(usize);

impl fmt::Display for HandlerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Function-based event handler.
///
/// Completion is signaled when the returned future resolves.
pub struct FnHandler<F>(pub F);

#[async_trait]
impl<F, Fut> EventHandler for FnHandler<F>
where
    F: Fn(Arc<Event>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), EventHandlerError>> + Send,
{
    async fn handle(&self, event: Arc<Event>, done: Completion) -> Result<(), EventHandlerError> {
        let result = (self.0)(event).await;
        done.done();
        result
    }
}
