//! External collaborator boundaries
//!
//! The host sensor platform and the cross-device transport are external to
//! this workspace. Their callback-based APIs are expressed here as async
//! traits plus channels: each collaborator pushes its events into one ordered
//! channel whose single consumer forms that subsystem's delivery context.

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use crate::errors::{SensorError, TransportError};
use crate::message::Payload;
use crate::types::Timestamp;

// ----------------------------------------------------------------------------
// Sensor Platform Boundary
// ----------------------------------------------------------------------------

/// Activity kind requested from the sensor platform
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityKind {
    Swimming,
}

/// Location configuration for the session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionLocation {
    IndoorPool,
}

/// Configuration handed to the platform when opening a session
#[derive(Debug, Clone, PartialEq)]
pub struct SensorSessionConfig {
    pub activity: ActivityKind,
    pub location: SessionLocation,
    /// Lap length in meters
    pub lap_length: f64,
}

impl SensorSessionConfig {
    /// Indoor pool swimming session with the given lap length
    pub fn pool_swim(lap_length: f64) -> Self {
        Self {
            activity: ActivityKind::Swimming,
            location: SessionLocation::IndoorPool,
            lap_length,
        }
    }
}

/// Opaque handle to a live platform session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PlatformSessionHandle(pub u64);

/// Lifecycle states the platform reports for its own session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlatformSessionState {
    NotStarted,
    Running,
    Ended,
}

/// Raw events pushed by the sensor platform.
///
/// Counters are session-cumulative; the platform may redeliver history, so
/// consumers gate on monotonicity and on lap-event timestamps.
#[derive(Debug, Clone, PartialEq)]
pub enum PlatformEvent {
    /// Heart-rate sample, bpm (most-recent-value semantics)
    HeartRate { bpm: f64 },
    /// Cumulative stroke count since session start
    StrokeCount { total: u32 },
    /// Cumulative active calories since session start
    Calories { total: f64 },
    /// Lap boundary; `timestamp` keys deduplication because the platform
    /// may redeliver the full event history on every callback
    Lap { timestamp: Timestamp, index: u32 },
    /// Platform session state transition
    StateChanged {
        from: PlatformSessionState,
        to: PlatformSessionState,
    },
    /// The platform failed the running session
    Failed { reason: String },
}

/// The host device's live-workout sensor API.
///
/// `start_session` hands the platform a channel; the platform pushes its
/// events there until the session is stopped or fails.
#[async_trait]
pub trait SensorPlatform: Send + Sync {
    /// Open a live session. Errors are terminal for this attempt.
    async fn start_session(
        &self,
        config: SensorSessionConfig,
        events: mpsc::Sender<PlatformEvent>,
    ) -> Result<PlatformSessionHandle, SensorError>;

    /// End the activity synchronously; finalization (turning the live
    /// session into a completed one) may continue asynchronously and report
    /// through the event channel.
    async fn stop_session(&self, handle: PlatformSessionHandle) -> Result<(), SensorError>;
}

// ----------------------------------------------------------------------------
// Peer Transport Boundary
// ----------------------------------------------------------------------------

/// Liveness of the link to the paired device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkState {
    /// The transport session with the peer is activated
    pub activated: bool,
    /// The peer can currently receive messages
    pub reachable: bool,
}

impl LinkState {
    pub fn up() -> Self {
        Self {
            activated: true,
            reachable: true,
        }
    }

    pub fn unreachable() -> Self {
        Self {
            activated: true,
            reachable: false,
        }
    }

    pub fn down() -> Self {
        Self {
            activated: false,
            reachable: false,
        }
    }
}

/// An inbound frame from the peer. `reply` is present on the reply-required
/// entry point; exactly one reply frame must be sent into it.
#[derive(Debug)]
pub struct InboundFrame {
    pub payload: Payload,
    pub reply: Option<oneshot::Sender<Payload>>,
}

impl InboundFrame {
    /// A frame on the no-reply entry point
    pub fn notify(payload: Payload) -> Self {
        Self {
            payload,
            reply: None,
        }
    }

    /// A frame on the reply-required entry point
    pub fn expecting_reply(payload: Payload) -> (Self, oneshot::Receiver<Payload>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                payload,
                reply: Some(tx),
            },
            rx,
        )
    }
}

/// The bidirectional channel to exactly one paired peer device.
///
/// Inbound frames and link-state changes arrive through channels handed to
/// the message router at composition time; this trait covers the outbound
/// half and the synchronous liveness checks.
#[async_trait]
pub trait PeerLink: Send + Sync {
    /// Whether the transport exists on this device at all
    fn is_supported(&self) -> bool;

    /// Whether the peer can currently receive messages. Synchronous; a
    /// liveness check, not a delivery guarantee.
    fn is_reachable(&self) -> bool;

    /// Fire-and-forget send. `Ok` means the transport accepted the payload,
    /// not that the peer processed it.
    async fn send(&self, payload: Payload) -> Result<(), TransportError>;

    /// Reply-capable send: resolves with the peer's reply frame or a
    /// delivery error.
    async fn send_with_reply(&self, payload: Payload) -> Result<Payload, TransportError>;
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_swim_config() {
        let config = SensorSessionConfig::pool_swim(33.3);
        assert_eq!(config.activity, ActivityKind::Swimming);
        assert_eq!(config.location, SessionLocation::IndoorPool);
        assert_eq!(config.lap_length, 33.3);
    }

    #[tokio::test]
    async fn test_reply_required_frame_carries_slot() {
        let (frame, rx) = InboundFrame::expecting_reply(Payload::new());
        let reply_to = frame.reply.expect("reply slot present");
        reply_to.send(Payload::new()).expect("receiver alive");
        assert!(rx.await.is_ok());
    }
}
