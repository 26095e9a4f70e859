//! Settable clock for deterministic tests

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use swimsync_core::{TimeSource, Timestamp};

/// A clock that only moves when told to
#[derive(Debug, Clone, Default)]
pub struct MockTimeSource {
    now: Arc<AtomicU64>,
}

impl MockTimeSource {
    /// Create a clock starting at zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a clock starting at the given millisecond value
    pub fn starting_at(millis: u64) -> Self {
        let source = Self::new();
        source.set(millis);
        source
    }

    /// Jump to an absolute time
    pub fn set(&self, millis: u64) {
        self.now.store(millis, Ordering::SeqCst);
    }

    /// Advance by a relative amount
    pub fn advance(&self, millis: u64) {
        self.now.fetch_add(millis, Ordering::SeqCst);
    }
}

impl TimeSource for MockTimeSource {
    fn now(&self) -> Timestamp {
        Timestamp::new(self.now.load(Ordering::SeqCst))
    }
}
