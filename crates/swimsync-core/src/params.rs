//! Shared session parameters
//!
//! The parameter set mirrored between the handheld and the wrist device.
//! Owned exclusively by the runtime's `SharedSessionState`; everything else
//! reads snapshots.

use serde::{Deserialize, Serialize};

use crate::types::SwimStyle;

/// Default pool length in meters when the user has not configured one
pub const DEFAULT_POOL_LENGTH_M: f64 = 25.0;

/// The user-facing parameters of one workout attempt.
///
/// Lives from session-service construction until an explicit reset; reset
/// restores every field to the defaults below.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionParameters {
    /// Pool length in meters, always > 0
    pub pool_length: f64,
    /// Stroke style for the workout
    pub style: SwimStyle,
    /// Target distance in meters
    pub target_distance: u32,
    /// Whether the full parameter set has been received from the peer
    pub is_ready: bool,
}

impl Default for SessionParameters {
    fn default() -> Self {
        Self {
            pool_length: DEFAULT_POOL_LENGTH_M,
            style: SwimStyle::Free,
            target_distance: 0,
            is_ready: false,
        }
    }
}
