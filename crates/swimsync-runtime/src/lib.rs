//! SwimSync Runtime Engine
//!
//! This crate contains the async engine of the SwimSync pipeline:
//! - `SensorSession`: lifecycle of one live sensor-monitoring session
//! - `MessageBus`: typed pub/sub and request/reply over the peer transport
//! - `SharedSessionState`: the cross-device parameter store
//! - `LapAggregator`: folds sensor streams into the per-lap ledger
//! - `PipelineBuilder` / `Pipeline`: the composition root wiring them
//!
//! `swimsync-core` provides the types and algorithms; this crate gives them
//! their delivery contexts and wiring.

pub mod aggregator;
pub mod builder;
pub mod bus;
pub mod sensor;
pub mod service;
pub mod state;

pub use aggregator::LapAggregator;
pub use builder::{Pipeline, PipelineBuilder};
pub use bus::{MessageBus, SubscriptionId};
pub use sensor::{SensorEvent, SensorSession, SensorState};
pub use service::{SessionService, WorkoutControl};
pub use state::{SharedSessionState, StateChange};

// Re-export core types for convenience
pub use swimsync_core::{
    config::SwimsyncConfig, InboundFrame, LinkState, MessageKind, Payload, PeerLink, PeerMessage,
    SensorPlatform, SessionCommand, SessionParameters, SwimStyle, SwimsyncError, SwimsyncResult,
    WatchStatus,
};
