pub mod events;
pub mod orchestrator;
pub mod resolver;
pub mod scorer;
pub mod variance;

pub use events::{BroadcastEventSink, EventError, EventSink, LoggingEventSink};
pub use orchestrator::{
    evaluate, BatchOutcome, BatchSummary, ManualMatch, MatchOptions, MatchingOrchestrator,
};
