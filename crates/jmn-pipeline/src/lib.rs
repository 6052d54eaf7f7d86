//! Job-posting event pipeline: matching, entitlement, notification dispatch, and the
//! consumer loop that ties them together.

pub mod config;
pub mod consumer;
pub mod dispatch;
pub mod entitlement;
pub mod locations;
pub mod logging;
pub mod matching;
pub mod realtime;
pub mod source;
pub mod wiring;

pub use config::PipelineConfig;
pub use consumer::{
    Collaborators, ConsumerSettings, Disposition, EventConsumer, EventOutcome, EventStage,
    PipelineError, RunSummary,
};
pub use dispatch::{
    DispatchError, DispatchOutcome, DispatchTimeouts, MatchNotificationPayload,
    NotificationDispatcher, PushResult,
};
pub use entitlement::EntitlementGate;
pub use locations::LocationDirectory;
pub use matching::{LocationResolver, MatchingConfig, MatchingEngine, NoLocationLookup, Weights};
pub use realtime::SessionHub;
pub use source::{ChannelSource, Delivery, EventSource, JsonLinesSource};

pub const CRATE_NAME: &str = "jmn-pipeline";
