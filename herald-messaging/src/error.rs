//! Error types for messaging operations

use herald_events::DispatcherError;
use thiserror::Error;

/// Errors that can occur during messaging operations
#[derive(Error, Debug)]
pub enum MessagingError {
    /// Failed to connect to the broker
    #[error("Connection failed: {0}")]
    Connection(String),

    /// Failed to publish a message
    #[error("Publish failed: {0}")]
    Publish(String),

    /// Failed to subscribe to a queue
    #[error("Subscribe failed: {0}")]
    Subscribe(String),

    /// Failed to acknowledge a message
    #[error("Acknowledge failed: {0}")]
    Acknowledge(String),

    /// Failed to turn a delivery into an event
    #[error("Deserialization failed: {0}")]
    Deserialization(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    /// Channel/connection is closed
    #[error("Channel closed: {0}")]
    ChannelClosed(String),

    /// Queue, exchange or binding not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Dispatching a consumed event failed
    #[error("Dispatch failed: {0}")]
    Dispatch(#[from] DispatcherError),

    /// Internal broker error
    #[error("Broker error: {0}")]
    BrokerError(String),
}

impl MessagingError {
    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            MessagingError::Connection(_)
                | MessagingError::ChannelClosed(_)
                | MessagingError::BrokerError(_)
        )
    }

    /// Check if this error indicates a connection issue
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            MessagingError::Connection(_) | MessagingError::ChannelClosed(_)
        )
    }
}

#[cfg(feature = "rabbitmq")]
impl From<lapin::Error> for MessagingError {
    fn from(err: lapin::Error) -> Self {
        match &err {
            lapin::Error::IOError(_) => MessagingError::Connection(err.to_string()),
            lapin::Error::InvalidChannelState(_) => MessagingError::ChannelClosed(err.to_string()),
            lapin::Error::InvalidConnectionState(_) => MessagingError::Connection(err.to_string()),
            _ => MessagingError::BrokerError(err.to_string()),
        }
    }
}
