//! Event dispatcher implementation

use crate::completion::WaitGroup;
use crate::config::{DispatchMode, DispatcherConfig, FaultPolicy};
use crate::error::{DispatcherError, Result};
use crate::event::{Event, EventHandler, EventHandlerError, HandlerRef, validate_event_name};
use futures::FutureExt;
use parking_lot::RwLock;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, error, info};

type Registry = HashMap<String, Vec<HandlerRef>>;

/// Registry of named events and the dispatcher that fans them out.
///
/// Cloning is cheap; clones share one registry. Separately constructed
/// dispatchers never share state.
#[derive(Clone)]
pub struct EventDispatcher {
    /// Handlers registered for each event name, in registration order
    handlers: Arc<RwLock<Registry>>,

    /// Configuration
    config: Arc<DispatcherConfig>,
}

/// Outcome of one dispatch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchReport {
    /// Name of the dispatched event
    pub event_name: String,

    /// Number of handlers invoked
    pub invoked: usize,

    /// Number of handlers that returned an error or panicked
    pub failed: usize,
}

impl DispatchReport {
    fn noop(event_name: &str) -> Self {
        Self {
            event_name: event_name.to_string(),
            invoked: 0,
            failed: 0,
        }
    }

    /// True when no handler was subscribed to the event
    pub fn is_noop(&self) -> bool {
        self.invoked == 0
    }
}

/// Per-handler result collected during a dispatch
enum Outcome {
    Ok,
    Failed(EventHandlerError),
    Panicked(Box<dyn Any + Send + 'static>),
}

impl EventDispatcher {
    /// Create new dispatcher
    pub fn new() -> Self {
        Self::with_config(DispatcherConfig::default())
    }

    /// Create dispatcher with custom config
    pub fn with_config(config: DispatcherConfig) -> Self {
        Self {
            handlers: Arc::new(RwLock::new(HashMap::new())),
            config: Arc::new(config),
        }
    }

    /// Get the dispatcher configuration
    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// Register a handler for an event name.
    ///
    /// Handlers for one name are kept in registration order. Registering the
    /// same handler identity twice fails with
    /// [`DispatcherError::AlreadyRegistered`] and leaves the registry as it was.
    pub fn register(&self, event_name: impl Into<String>, handler: HandlerRef) -> Result<()> {
        let event_name = event_name.into();
        validate_event_name(&event_name)?;

        {
            let mut handlers = self.handlers.write();
            let bucket = handlers.entry(event_name.clone()).or_default();

            if bucket.contains(&handler) {
                return Err(DispatcherError::AlreadyRegistered(event_name));
            }

            bucket.push(handler.clone());
        }

        if self.config.enable_logging {
            debug!(
                event = %event_name,
                handler = handler.name(),
                handler_id = %handler.id(),
                "Registered event handler"
            );
        }

        Ok(())
    }

    /// Wrap `handler` in a new identity, register it, and return the identity
    /// for later `has`/`remove` calls.
    ///
    /// # Examples
    ///
    /// ```rust,ignore
    /// let dispatcher = EventDispatcher::new();
    /// let handle = dispatcher.subscribe("order.created", SendReceipt)?;
    /// assert!(dispatcher.has("order.created", &handle));
    /// ```
    pub fn subscribe<H: EventHandler>(
        &self,
        event_name: impl Into<String>,
        handler: H,
    ) -> Result<HandlerRef> {
        let handler = HandlerRef::new(handler);
        self.register(event_name, handler.clone())?;
        Ok(handler)
    }

    /// Remove one registration.
    ///
    /// Fails with [`DispatcherError::EventNotFound`] when the event name was
    /// never registered (or was cleared), and [`DispatcherError::HandlerNotFound`] when the handler
    /// is not among them.
    pub fn remove(&self, event_name: &str, handler: &HandlerRef) -> Result<()> {
        {
            let mut handlers = self.handlers.write();
            let bucket = handlers
                .get_mut(event_name)
                .ok_or_else(|| DispatcherError::EventNotFound(event_name.to_string()))?;

            let index = bucket
                .iter()
                .position(|h| h == handler)
                .ok_or_else(|| DispatcherError::HandlerNotFound(event_name.to_string()))?;

            // An emptied bucket stays behind; every read treats it as absent
            bucket.remove(index);
        }

        if self.config.enable_logging {
            debug!(
                event = event_name,
                handler = handler.name(),
                handler_id = %handler.id(),
                "Removed event handler"
            );
        }

        Ok(())
    }

    /// Check whether `handler` is registered for `event_name`
    pub fn has(&self, event_name: &str, handler: &HandlerRef) -> bool {
        self.handlers
            .read()
            .get(event_name)
            .is_some_and(|bucket| bucket.contains(handler))
    }

    /// Clear all handlers
    pub fn clear(&self) {
        self.handlers.write().clear();

        if self.config.enable_logging {
            info!("Cleared all event handlers");
        }
    }

    /// Get handler count for an event name
    pub fn handler_count(&self, event_name: &str) -> usize {
        self.handlers
            .read()
            .get(event_name)
            .map(|h| h.len())
            .unwrap_or(0)
    }

    /// Total number of registrations across all event names
    pub fn len(&self) -> usize {
        self.handlers.read().values().map(Vec::len).sum()
    }

    /// True when nothing is registered
    pub fn is_empty(&self) -> bool {
        self.handlers.read().values().all(Vec::is_empty)
    }

    /// Event names that currently have handlers, sorted
    pub fn event_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .handlers
            .read()
            .iter()
            .filter(|(_, bucket)| !bucket.is_empty())
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    /// Dispatch an event to every handler registered for its name.
    ///
    /// Dispatching an event nobody subscribed to is a successful no-op.
    /// Returns once every invoked handler has signaled completion.
    ///
    /// # Panics
    ///
    /// In [`DispatchMode::Concurrent`] handlers run on spawned tasks, so this
    /// panics when called outside a Tokio runtime. Under
    /// [`FaultPolicy::Propagate`] a handler panic is resumed on the caller.
    pub async fn dispatch(&self, event: Event) -> Result<DispatchReport> {
        self.dispatch_shared(Arc::new(event)).await
    }

    /// Dispatch an already shared event
    ///
    /// # Panics
    ///
    /// Same conditions as [`dispatch`](Self::dispatch).
    pub async fn dispatch_shared(&self, event: Arc<Event>) -> Result<DispatchReport> {
        let event_name = event.name().to_string();

        // Point-in-time snapshot; the lock is released before any handler runs
        let handlers = match self.snapshot(&event_name) {
            Some(handlers) => handlers,
            None => {
                if self.config.enable_logging {
                    debug!(event = %event_name, "No handlers registered for event");
                }
                return Ok(DispatchReport::noop(&event_name));
            }
        };

        if self.config.enable_logging {
            info!(
                event = %event_name,
                event_id = %event.id(),
                handlers = handlers.len(),
                mode = ?self.config.mode,
                "Dispatching event"
            );
        }

        let outcomes = match self.config.mode {
            DispatchMode::Sequential => self.run_sequential(&handlers, &event).await,
            DispatchMode::Concurrent => self.run_concurrent(&handlers, &event).await,
        };

        self.settle(event_name, handlers.len(), outcomes)
    }

    fn snapshot(&self, event_name: &str) -> Option<Vec<HandlerRef>> {
        self.handlers
            .read()
            .get(event_name)
            .filter(|bucket| !bucket.is_empty())
            .cloned()
    }

    async fn run_sequential(&self, handlers: &[HandlerRef], event: &Arc<Event>) -> Vec<Outcome> {
        let group = WaitGroup::new();
        let mut outcomes = Vec::with_capacity(handlers.len());

        for handler in handlers {
            let invocation = handler.handle(event.clone(), group.completion());

            let outcome = match self.config.fault_policy {
                FaultPolicy::Isolate => match AssertUnwindSafe(invocation).catch_unwind().await {
                    Ok(Ok(())) => Outcome::Ok,
                    Ok(Err(e)) => Outcome::Failed(e),
                    Err(payload) => Outcome::Panicked(payload),
                },
                // Unwinding out of here is the propagated fault
                FaultPolicy::Propagate => match invocation.await {
                    Ok(()) => Outcome::Ok,
                    Err(e) => Outcome::Failed(e),
                },
            };

            // Next handler starts only after this one has signaled completion
            group.wait().await;

            let stop = matches!(outcome, Outcome::Failed(_))
                && self.config.fault_policy == FaultPolicy::Propagate;
            self.log_outcome(handler, event, &outcome);
            outcomes.push(outcome);

            if stop {
                break;
            }
        }

        outcomes
    }

    async fn run_concurrent(&self, handlers: &[HandlerRef], event: &Arc<Event>) -> Vec<Outcome> {
        let group = WaitGroup::new();
        let mut tasks = Vec::with_capacity(handlers.len());

        for handler in handlers {
            let handler = handler.clone();
            let event = event.clone();
            let done = group.completion();
            let task = tokio::spawn(async move { handler.handle(event, done).await });
            tasks.push(task);
        }

        // Wait for all handlers to signal completion
        group.wait().await;

        let mut outcomes = Vec::with_capacity(tasks.len());
        for (handler, task) in handlers.iter().zip(tasks) {
            let outcome = match task.await {
                Ok(Ok(())) => Outcome::Ok,
                Ok(Err(e)) => Outcome::Failed(e),
                Err(e) if e.is_panic() => Outcome::Panicked(e.into_panic()),
                Err(e) => Outcome::Failed(EventHandlerError::HandlerFailed(e.to_string())),
            };
            self.log_outcome(handler, event, &outcome);
            outcomes.push(outcome);
        }

        outcomes
    }

    fn log_outcome(&self, handler: &HandlerRef, event: &Event, outcome: &Outcome) {
        if !self.config.enable_logging {
            return;
        }

        match outcome {
            Outcome::Ok => {}
            Outcome::Failed(e) => {
                error!(
                    event = event.name(),
                    handler = handler.name(),
                    error = %e,
                    "Handler failed"
                );
            }
            Outcome::Panicked(payload) => {
                error!(
                    event = event.name(),
                    handler = handler.name(),
                    panic = %panic_message(payload.as_ref()),
                    "Handler panicked"
                );
            }
        }
    }

    fn settle(
        &self,
        event_name: String,
        invoked: usize,
        outcomes: Vec<Outcome>,
    ) -> Result<DispatchReport> {
        let mut errors = Vec::new();
        let mut panic_payload = None;

        for outcome in outcomes {
            match outcome {
                Outcome::Ok => {}
                Outcome::Failed(e) => errors.push(e),
                Outcome::Panicked(payload) => {
                    errors.push(EventHandlerError::Panicked(panic_message(payload.as_ref())));
                    panic_payload.get_or_insert(payload);
                }
            }
        }

        if self.config.fault_policy == FaultPolicy::Propagate {
            if let Some(payload) = panic_payload {
                panic::resume_unwind(payload);
            }
            if !errors.is_empty() {
                return Err(DispatcherError::HandlersFailed {
                    event: event_name,
                    errors,
                });
            }
        }

        if self.config.enable_logging {
            debug!(event = %event_name, invoked, failed = errors.len(), "Event dispatched");
        }

        Ok(DispatchReport {
            event_name,
            invoked,
            failed: errors.len(),
        })
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("events", &self.event_names())
            .field("config", &self.config)
            .finish()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Event dispatcher builder
pub struct EventDispatcherBuilder {
    config: DispatcherConfig,
}

impl EventDispatcherBuilder {
    /// Create new dispatcher builder
    pub fn new() -> Self {
        Self {
            config: DispatcherConfig::default(),
        }
    }

    /// Start from an existing configuration
    pub fn from_config(config: DispatcherConfig) -> Self {
        Self { config }
    }

    /// Set the fan-out mode
    pub fn mode(mut self, mode: DispatchMode) -> Self {
        self.config.mode = mode;
        self
    }

    /// Set the handler fault policy
    pub fn fault_policy(mut self, policy: FaultPolicy) -> Self {
        self.config.fault_policy = policy;
        self
    }

    /// Enable/disable logging
    pub fn enable_logging(mut self, enabled: bool) -> Self {
        self.config.enable_logging = enabled;
        self
    }

    /// Build the dispatcher
    pub fn build(self) -> EventDispatcher {
        EventDispatcher::with_config(self.config)
    }
}

impl Default for EventDispatcherBuilder {
    fn default() -> Self {
        Self::new()
    }
}
