//! Core types for the SwimSync protocol
//!
//! This module defines the fundamental types used throughout the pipeline,
//! using newtype patterns for semantic validation and type safety.

use core::fmt;
use core::ops::{Add, Sub};
use serde::{Deserialize, Serialize};

// ----------------------------------------------------------------------------
// Device Role
// ----------------------------------------------------------------------------

/// Which half of the paired-device setup a pipeline runs on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceRole {
    /// The wrist-worn sensor device driving the live workout session
    Wrist,
    /// The handheld companion device holding the session parameters
    Handheld,
}

impl fmt::Display for DeviceRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceRole::Wrist => write!(f, "wrist"),
            DeviceRole::Handheld => write!(f, "handheld"),
        }
    }
}

// ----------------------------------------------------------------------------
// Swim Style
// ----------------------------------------------------------------------------

/// Stroke style for a workout, carried over the wire as a small integer code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SwimStyle {
    Free,
    Breast,
    Back,
    Fly,
    Medley,
    Any,
}

impl SwimStyle {
    /// Wire code for this style (`swimmingStyle` payload key)
    pub fn code(self) -> u8 {
        match self {
            SwimStyle::Free => 0,
            SwimStyle::Breast => 1,
            SwimStyle::Back => 2,
            SwimStyle::Fly => 3,
            SwimStyle::Medley => 4,
            SwimStyle::Any => 5,
        }
    }

    /// Decode a wire code. Unknown codes return `None`; callers keep their
    /// previous value rather than guessing.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(SwimStyle::Free),
            1 => Some(SwimStyle::Breast),
            2 => Some(SwimStyle::Back),
            3 => Some(SwimStyle::Fly),
            4 => Some(SwimStyle::Medley),
            5 => Some(SwimStyle::Any),
            _ => None,
        }
    }
}

impl Default for SwimStyle {
    fn default() -> Self {
        SwimStyle::Free
    }
}

impl fmt::Display for SwimStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SwimStyle::Free => "freestyle",
            SwimStyle::Breast => "breaststroke",
            SwimStyle::Back => "backstroke",
            SwimStyle::Fly => "butterfly",
            SwimStyle::Medley => "medley",
            SwimStyle::Any => "any",
        };
        write!(f, "{}", name)
    }
}

// ----------------------------------------------------------------------------
// Timestamp
// ----------------------------------------------------------------------------

/// Millisecond timestamp since Unix epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Create a new timestamp
    pub fn new(millis: u64) -> Self {
        Self(millis)
    }

    /// Get current timestamp from the system clock
    pub fn now() -> Self {
        use std::time::{SystemTime, UNIX_EPOCH};
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Self(duration.as_millis() as u64)
    }

    /// Get the raw milliseconds
    pub fn as_millis(&self) -> u64 {
        self.0
    }

    /// Get duration since another timestamp (saturating)
    pub fn duration_since(&self, other: Self) -> core::time::Duration {
        core::time::Duration::from_millis(self.0.saturating_sub(other.0))
    }
}

impl Add<u64> for Timestamp {
    type Output = Timestamp;

    fn add(self, millis: u64) -> Timestamp {
        Timestamp(self.0 + millis)
    }
}

impl Sub for Timestamp {
    type Output = u64;

    fn sub(self, other: Timestamp) -> u64 {
        self.0.saturating_sub(other.0)
    }
}

// ----------------------------------------------------------------------------
// Time Source Trait
// ----------------------------------------------------------------------------

/// Trait for providing timestamps so that time-dependent logic (lap
/// debouncing, event deduplication) stays deterministic under test.
pub trait TimeSource {
    /// Get the current timestamp
    fn now(&self) -> Timestamp;
}

/// System clock implementation of TimeSource
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTimeSource;

impl SystemTimeSource {
    pub fn new() -> Self {
        Self
    }
}

impl TimeSource for SystemTimeSource {
    fn now(&self) -> Timestamp {
        Timestamp::now()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_style_codes_round_trip() {
        for style in [
            SwimStyle::Free,
            SwimStyle::Breast,
            SwimStyle::Back,
            SwimStyle::Fly,
            SwimStyle::Medley,
            SwimStyle::Any,
        ] {
            assert_eq!(SwimStyle::from_code(style.code()), Some(style));
        }
    }

    #[test]
    fn test_unknown_style_code() {
        assert_eq!(SwimStyle::from_code(6), None);
        assert_eq!(SwimStyle::from_code(255), None);
    }

    #[test]
    fn test_default_style_is_code_zero() {
        assert_eq!(SwimStyle::default().code(), 0);
    }

    #[test]
    fn test_timestamp_arithmetic() {
        let t1 = Timestamp::new(1000);
        let t2 = t1 + 500;
        assert_eq!(t2.as_millis(), 1500);
        assert_eq!(t2 - t1, 500);
        // subtraction saturates rather than panicking on reordered inputs
        assert_eq!(t1 - t2, 0);
        assert_eq!(t2.duration_since(t1).as_millis(), 500);
    }
}
