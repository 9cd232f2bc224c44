// Herald - An in-process publish/subscribe event dispatcher for Rust
//
// Handlers register against event names; dispatching an event fans it out to
// every handler for that name and joins on their completion.

// Re-export core functionality
pub use herald_events::*;

// Re-export optional crates
#[cfg(feature = "log")]
pub use herald_log as log;

#[cfg(feature = "messaging")]
pub use herald_messaging as messaging;

// Prelude for common imports
pub mod prelude {
    pub use crate::{
        Completion,
        DispatchMode,
        DispatchReport,
        DispatcherConfig,
        DispatcherError,
        Event,
        EventDispatcher,
        EventDispatcherBuilder,
        EventHandler,
        EventHandlerError,
        FaultPolicy,
        FnHandler,
        HandlerRef,
    };

    #[cfg(feature = "messaging")]
    pub use crate::messaging::{
        ConsumerBridge,
        ConsumerSource,
        InMemoryBroker,
        PublisherSink,
        PublishingHandler,
    };
}
