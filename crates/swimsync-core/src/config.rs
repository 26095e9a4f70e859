//! Centralized Configuration Management
//!
//! This module consolidates the configuration structures used throughout the
//! pipeline to provide a unified, consistent configuration interface.

use core::time::Duration;

use serde::{Deserialize, Serialize};

use crate::params::DEFAULT_POOL_LENGTH_M;
use crate::types::SwimStyle;

// ----------------------------------------------------------------------------
// Channel Configuration
// ----------------------------------------------------------------------------

/// Buffer sizes for the channels wiring the pipeline tasks together
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Buffer for raw platform events (sensor platform → delivery task)
    pub sensor_event_buffer_size: usize,
    /// Buffer for the gated sensor fan-out stream
    pub sensor_broadcast_buffer_size: usize,
    /// Buffer for inbound transport frames (transport → router)
    pub inbound_buffer_size: usize,
    /// Buffer for state-change and link-state notification streams
    pub notification_buffer_size: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            sensor_event_buffer_size: 128, // sensor callbacks can be bursty
            sensor_broadcast_buffer_size: 64,
            inbound_buffer_size: 64,
            notification_buffer_size: 32, // state changes are infrequent
        }
    }
}

impl ChannelConfig {
    /// Create configuration optimized for testing
    pub fn testing() -> Self {
        Self {
            sensor_event_buffer_size: 100,
            sensor_broadcast_buffer_size: 100,
            inbound_buffer_size: 100,
            notification_buffer_size: 100,
        }
    }
}

// ----------------------------------------------------------------------------
// Request Configuration
// ----------------------------------------------------------------------------

/// Configuration for request/reply behavior over the peer transport
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestConfig {
    /// Default deadline for a request/reply round trip
    pub default_timeout: Duration,
    /// Multiplier applied to `default_timeout` for the defensive fallback
    /// that clears a starved in-flight flag
    pub pending_fallback_multiplier: u32,
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(3),
            pending_fallback_multiplier: 2,
        }
    }
}

impl RequestConfig {
    /// Create configuration optimized for testing (fast deadlines)
    pub fn testing() -> Self {
        Self {
            default_timeout: Duration::from_millis(100),
            pending_fallback_multiplier: 2,
        }
    }

    /// Deadline for the in-flight-flag fallback timer
    pub fn pending_fallback(&self) -> Duration {
        self.default_timeout * self.pending_fallback_multiplier
    }
}

// ----------------------------------------------------------------------------
// Aggregator Configuration
// ----------------------------------------------------------------------------

/// Configuration for the lap aggregation algorithm
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatorConfig {
    /// Minimum quiet time between in-place updates of the current lap;
    /// prevents thrashing the ledger on every stroke sample
    pub quiet_interval: Duration,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            quiet_interval: Duration::from_secs(4),
        }
    }
}

impl AggregatorConfig {
    /// Create configuration optimized for testing (no debounce delay)
    pub fn testing() -> Self {
        Self {
            quiet_interval: Duration::from_millis(10),
        }
    }
}

// ----------------------------------------------------------------------------
// Session Defaults
// ----------------------------------------------------------------------------

/// Documented defaults for the shared session parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionDefaults {
    /// Pool length in meters
    pub pool_length: f64,
    /// Stroke style
    pub style: SwimStyle,
    /// Target distance in meters
    pub target_distance: u32,
}

impl Default for SessionDefaults {
    fn default() -> Self {
        Self {
            pool_length: DEFAULT_POOL_LENGTH_M,
            style: SwimStyle::Free,
            target_distance: 0,
        }
    }
}

// ----------------------------------------------------------------------------
// Master Configuration
// ----------------------------------------------------------------------------

/// Master configuration struct consolidating all pipeline configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SwimsyncConfig {
    /// Channel buffer configuration
    pub channels: ChannelConfig,
    /// Request/reply configuration
    pub request: RequestConfig,
    /// Lap aggregation configuration
    pub aggregator: AggregatorConfig,
    /// Session parameter defaults
    pub defaults: SessionDefaults,
}

impl SwimsyncConfig {
    /// Create new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Create configuration optimized for testing
    pub fn testing() -> Self {
        Self {
            channels: ChannelConfig::testing(),
            request: RequestConfig::testing(),
            aggregator: AggregatorConfig::testing(),
            defaults: SessionDefaults::default(),
        }
    }

    /// Validate the configuration for consistency and feasibility
    pub fn validate(&self) -> Result<(), String> {
        if self.channels.sensor_event_buffer_size == 0 {
            return Err("sensor event buffer size cannot be zero".into());
        }
        if self.channels.sensor_broadcast_buffer_size == 0 {
            return Err("sensor broadcast buffer size cannot be zero".into());
        }
        if self.channels.inbound_buffer_size == 0 {
            return Err("inbound buffer size cannot be zero".into());
        }
        if self.channels.notification_buffer_size == 0 {
            return Err("notification buffer size cannot be zero".into());
        }
        if self.request.default_timeout.is_zero() {
            return Err("request timeout cannot be zero".into());
        }
        if self.request.pending_fallback_multiplier == 0 {
            return Err("pending fallback multiplier cannot be zero".into());
        }
        if self.defaults.pool_length <= 0.0 {
            return Err("default pool length must be positive".into());
        }
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_validation() {
        let config = SwimsyncConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_testing_config() {
        let config = SwimsyncConfig::testing();
        assert!(config.validate().is_ok());
        assert!(config.request.default_timeout < RequestConfig::default().default_timeout);
    }

    #[test]
    fn test_invalid_config_validation() {
        let mut config = SwimsyncConfig::default();
        config.channels.inbound_buffer_size = 0;
        assert!(config.validate().is_err());

        let mut config = SwimsyncConfig::default();
        config.defaults.pool_length = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_request_fallback_deadline() {
        let config = RequestConfig::default();
        assert_eq!(config.pending_fallback(), Duration::from_secs(6));
    }

    #[test]
    fn test_documented_defaults() {
        let defaults = SessionDefaults::default();
        assert_eq!(defaults.pool_length, DEFAULT_POOL_LENGTH_M);
        assert_eq!(defaults.style.code(), 0);
        assert_eq!(defaults.target_distance, 0);
    }
}
