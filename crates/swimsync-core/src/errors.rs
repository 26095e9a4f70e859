//! Error types for the SwimSync pipeline
//!
//! Failures from the sensor platform and the peer transport are delivered
//! through the same event channels as successes; these types discriminate
//! them. External failures never panic the process.

// ----------------------------------------------------------------------------
// Sensor Errors
// ----------------------------------------------------------------------------

/// Errors reported by the host sensor platform
#[derive(Debug, Clone, thiserror::Error)]
pub enum SensorError {
    /// The platform rejected the session configuration. Terminal for this
    /// attempt; callers must not retry automatically.
    #[error("session creation failed: {reason}")]
    CreationFailed { reason: String },

    /// Begin/end collection reported failure. Surfaced to the caller, but
    /// the session still transitions to inactive.
    #[error("data collection failed: {reason}")]
    CollectionFailed { reason: String },
}

// ----------------------------------------------------------------------------
// Transport Errors
// ----------------------------------------------------------------------------

/// Errors reported by the cross-device transport
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    /// The peer cannot currently receive messages. Callers treat this as
    /// "try later".
    #[error("peer is not reachable")]
    Unreachable,

    /// The transport is not available on this device at all
    #[error("transport is not supported on this device")]
    Unsupported,

    /// The transport refused to accept the outbound payload
    #[error("send failed: {reason}")]
    SendFailed { reason: String },

    /// The transport accepted the send but later signalled a delivery error
    #[error("delivery failed: {reason}")]
    DeliveryFailed { reason: String },
}

// ----------------------------------------------------------------------------
// Request Errors
// ----------------------------------------------------------------------------

/// Errors from the request/reply layer on top of the transport
#[derive(Debug, Clone, thiserror::Error)]
pub enum RequestError {
    /// No reply arrived before the deadline. Resolves exactly like a
    /// delivery error so callers have one failure shape to handle.
    #[error("request timed out after {timeout_ms}ms")]
    TimedOut { timeout_ms: u64 },

    /// A request of the same kind is already outstanding
    #[error("a request of this kind is already in flight")]
    AlreadyPending,
}

// ----------------------------------------------------------------------------
// Unified Error
// ----------------------------------------------------------------------------

/// Top-level error type for the SwimSync pipeline
#[derive(Debug, thiserror::Error)]
pub enum SwimsyncError {
    #[error(transparent)]
    Sensor(#[from] SensorError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Request(#[from] RequestError),

    #[error("channel error: {message}")]
    Channel { message: String },

    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
