//! Dispatcher errors

use crate::event::EventHandlerError;

/// Errors returned by [`EventDispatcher`](crate::EventDispatcher) operations.
///
/// All variants are local and recoverable; none leave the registry in a
/// partially updated state.
#[derive(Debug, thiserror::Error)]
pub enum DispatcherError {
    #[error("Handler already registered for event: {0}")]
    AlreadyRegistered(String),

    #[error("Event not found: {0}")]
    EventNotFound(String),

    #[error("Handler not found for event: {0}")]
    HandlerNotFound(String),

    #[error("Invalid event name: {0:?}")]
    InvalidEventName(String),

    #[error("Invalid event payload: {0}")]
    Payload(String),

    #[error("{} handler(s) failed for event: {event}", .errors.len())]
    HandlersFailed {
        event: String,
        errors: Vec<EventHandlerError>,
    },
}

impl DispatcherError {
    /// Whether this is a lookup miss from `remove`
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            DispatcherError::EventNotFound(_) | DispatcherError::HandlerNotFound(_)
        )
    }
}

pub type Result<T, E = DispatcherError> = std::result::Result<T, E>;
