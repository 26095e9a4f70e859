//! SwimSync Core Protocol Implementation
//!
//! This crate provides the foundational types, message taxonomy, and the lap
//! aggregation algorithm for the SwimSync live-telemetry pipeline. The async
//! engine that drives these types lives in `swimsync-runtime`; deterministic
//! test doubles live in `swimsync-harness`.

// ----------------------------------------------------------------------------
// Module Declarations
// ----------------------------------------------------------------------------

pub mod config;
pub mod errors;
pub mod ledger;
pub mod message;
pub mod params;
pub mod platform;
pub mod types;

// ----------------------------------------------------------------------------
// Public API
// ----------------------------------------------------------------------------

pub use errors::{RequestError, SensorError, SwimsyncError, TransportError};
pub use ledger::{LapLedger, LapRecord};
pub use message::{MessageKind, Payload, PeerMessage, SessionCommand, WatchStatus};
pub use params::{SessionParameters, DEFAULT_POOL_LENGTH_M};
pub use platform::{
    InboundFrame, LinkState, PeerLink, PlatformEvent, PlatformSessionHandle, SensorPlatform,
    SensorSessionConfig,
};
pub use types::{DeviceRole, SwimStyle, SystemTimeSource, TimeSource, Timestamp};

/// Crate-wide result alias
pub type SwimsyncResult<T> = core::result::Result<T, SwimsyncError>;
