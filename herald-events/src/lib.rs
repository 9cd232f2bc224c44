//! In-process event dispatching for Herald
//!
//! This crate provides a registry of named events and a dispatcher that fans
//! each event out to every handler subscribed to its name.
//!
//! ## Features
//!
//! - **Named events** - Handlers subscribe by event name
//! - **Identity handlers** - Registrations are compared by reference, not by value
//! - **Ordered** - Handlers for one name run in registration order (sequential mode)
//! - **Completion join** - Concurrent fan-out waits for every handler to signal done
//! - **Fault isolation** - One failing or panicking handler never stalls the rest
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use herald_events::*;
//! use async_trait::async_trait;
//! use std::sync::Arc;
//!
//! struct SendReceipt;
//!
//! #[async_trait]
//! impl EventHandler for SendReceipt {
//!     async fn handle(&self, event: Arc<Event>, done: Completion) -> Result<(), EventHandlerError> {
//!         println!("Sending receipt for {}", event.payload());
//!         done.done();
//!         Ok(())
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let dispatcher = EventDispatcher::new();
//!     let receipt = dispatcher.subscribe("order.created", SendReceipt)?;
//!
//!     dispatcher
//!         .dispatch(Event::new("order.created", serde_json::json!({"id": 42}))?)
//!         .await?;
//!
//!     dispatcher.remove("order.created", &receipt)?;
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration
//!
//! ```rust,ignore
//! let dispatcher = EventDispatcherBuilder::new()
//!     .mode(DispatchMode::Sequential)     // Run handlers one by one, in order
//!     .fault_policy(FaultPolicy::Isolate) // Log handler failures, keep going
//!     .enable_logging(true)
//!     .build();
//! ```
//!
//! ## Completion
//!
//! Every handler receives a [`Completion`] token. Dropping it signals
//! completion, so a handler that returns early or fails cannot hang a
//! dispatch. Moving the token into spawned work keeps the dispatch waiting
//! until that work finishes.

pub mod completion;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod event;

pub use completion::{Completion, WaitGroup};
pub use config::{DispatchMode, DispatcherConfig, FaultPolicy};
pub use dispatcher::{DispatchReport, EventDispatcher, EventDispatcherBuilder};
pub use error::{DispatcherError, Result};
pub use event::{
    Event, EventHandler, EventHandlerError, EventMetadata, FnHandler, HandlerId, HandlerRef,
};
