pub mod aggregate;
pub mod interaction;
pub mod observer;
pub mod registry;

pub use aggregate::{AggregatorOptions, CollectSink, DialogAggregator, DialogSink};
pub use interaction::{now_rfc3339, Agent, Interaction, InteractionBody, Metrics};
pub use observer::{run_observer_loop, ConversationObserver, SessionError, SessionEvent};
pub use registry::{SessionHandle, SessionRegistry};
