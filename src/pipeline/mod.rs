//! Pipeline wiring: the engine that runs events end to end and the event
//! bus that fans out its observable state changes.

pub mod engine;
pub mod events;

pub use engine::DetectionEngine;
pub use events::{EventBus, LoggingSubscriber, PipelineEvent, PipelineSubscriber};
