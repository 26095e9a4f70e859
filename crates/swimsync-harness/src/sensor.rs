//! Mock sensor platform
//!
//! A scriptable [`SensorPlatform`]: tests open a session through the
//! pipeline, then push platform events through [`MockSensorPlatform::emit`].
//! Records every start/stop so session-lifecycle invariants (idempotent
//! stop, never two live sessions) can be asserted.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

use swimsync_core::platform::{
    PlatformEvent, PlatformSessionHandle, SensorPlatform, SensorSessionConfig,
};
use swimsync_core::{SensorError, Timestamp};

// ----------------------------------------------------------------------------
// Mock Sensor Platform
// ----------------------------------------------------------------------------

struct MockSensorInner {
    fail_start: Mutex<Option<String>>,
    fail_stop: Mutex<Option<String>>,
    next_handle: AtomicU64,
    open_sessions: AtomicUsize,
    max_open_sessions: AtomicUsize,
    started: Mutex<Vec<SensorSessionConfig>>,
    stopped: Mutex<Vec<PlatformSessionHandle>>,
    events_tx: Mutex<Option<mpsc::Sender<PlatformEvent>>>,
    started_flag: AtomicBool,
}

/// Scriptable sensor platform double. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct MockSensorPlatform {
    inner: Arc<MockSensorInner>,
}

impl Default for MockSensorPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl MockSensorPlatform {
    /// A platform that accepts sessions and waits for scripted events
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MockSensorInner {
                fail_start: Mutex::new(None),
                fail_stop: Mutex::new(None),
                next_handle: AtomicU64::new(1),
                open_sessions: AtomicUsize::new(0),
                max_open_sessions: AtomicUsize::new(0),
                started: Mutex::new(Vec::new()),
                stopped: Mutex::new(Vec::new()),
                events_tx: Mutex::new(None),
                started_flag: AtomicBool::new(false),
            }),
        }
    }

    /// A platform that rejects every session creation with the given reason
    pub fn failing(reason: &str) -> Self {
        let platform = Self::new();
        platform.fail_next_start(reason);
        platform
    }

    /// Make the next `start_session` fail
    pub fn fail_next_start(&self, reason: &str) {
        *lock(&self.inner.fail_start) = Some(reason.to_string());
    }

    /// Make the next `stop_session` report a collection failure
    pub fn fail_next_stop(&self, reason: &str) {
        *lock(&self.inner.fail_stop) = Some(reason.to_string());
    }

    /// Push a platform event into the session opened last. Returns false
    /// when no session is open (the event is dropped, as the real platform
    /// would after teardown).
    pub async fn emit(&self, event: PlatformEvent) -> bool {
        let sender = lock(&self.inner.events_tx).clone();
        match sender {
            Some(sender) => sender.send(event).await.is_ok(),
            None => false,
        }
    }

    /// Convenience: emit a heart-rate sample
    pub async fn emit_heart_rate(&self, bpm: f64) -> bool {
        self.emit(PlatformEvent::HeartRate { bpm }).await
    }

    /// Convenience: emit a cumulative stroke sample
    pub async fn emit_strokes(&self, total: u32) -> bool {
        self.emit(PlatformEvent::StrokeCount { total }).await
    }

    /// Convenience: emit a lap boundary keyed by a source timestamp
    pub async fn emit_lap(&self, timestamp_ms: u64, index: u32) -> bool {
        self.emit(PlatformEvent::Lap {
            timestamp: Timestamp::new(timestamp_ms),
            index,
        })
        .await
    }

    /// Fail the running session, as `didFailWithError` would
    pub async fn fail_session(&self, reason: &str) -> bool {
        let delivered = self
            .emit(PlatformEvent::Failed {
                reason: reason.to_string(),
            })
            .await;
        if self.inner.started_flag.swap(false, Ordering::SeqCst) {
            self.inner.open_sessions.fetch_sub(1, Ordering::SeqCst);
        }
        delivered
    }

    /// Number of sessions ever opened
    pub fn start_count(&self) -> usize {
        lock(&self.inner.started).len()
    }

    /// Number of sessions ever closed
    pub fn stop_count(&self) -> usize {
        lock(&self.inner.stopped).len()
    }

    /// Sessions currently open
    pub fn open_sessions(&self) -> usize {
        self.inner.open_sessions.load(Ordering::SeqCst)
    }

    /// The most sessions that were ever open at once; must stay ≤ 1
    pub fn max_open_sessions(&self) -> usize {
        self.inner.max_open_sessions.load(Ordering::SeqCst)
    }

    /// Configuration of the most recently opened session
    pub fn last_config(&self) -> Option<SensorSessionConfig> {
        lock(&self.inner.started).last().cloned()
    }
}

#[async_trait]
impl SensorPlatform for MockSensorPlatform {
    async fn start_session(
        &self,
        config: SensorSessionConfig,
        events: mpsc::Sender<PlatformEvent>,
    ) -> Result<PlatformSessionHandle, SensorError> {
        if let Some(reason) = lock(&self.inner.fail_start).take() {
            debug!(%reason, "mock platform rejecting session");
            return Err(SensorError::CreationFailed { reason });
        }

        lock(&self.inner.started).push(config);
        *lock(&self.inner.events_tx) = Some(events);
        self.inner.started_flag.store(true, Ordering::SeqCst);

        let open = self.inner.open_sessions.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner
            .max_open_sessions
            .fetch_max(open, Ordering::SeqCst);

        let id = self.inner.next_handle.fetch_add(1, Ordering::SeqCst);
        debug!(handle = id, "mock platform opened session");
        Ok(PlatformSessionHandle(id))
    }

    async fn stop_session(&self, handle: PlatformSessionHandle) -> Result<(), SensorError> {
        lock(&self.inner.stopped).push(handle);
        if self.inner.started_flag.swap(false, Ordering::SeqCst) {
            self.inner.open_sessions.fetch_sub(1, Ordering::SeqCst);
        }
        // dropping the sender ends the pipeline's delivery task
        *lock(&self.inner.events_tx) = None;

        if let Some(reason) = lock(&self.inner.fail_stop).take() {
            return Err(SensorError::CollectionFailed { reason });
        }
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_start_records_config() {
        let platform = MockSensorPlatform::new();
        let (tx, _rx) = mpsc::channel(8);

        let handle = platform
            .start_session(SensorSessionConfig::pool_swim(25.0), tx)
            .await
            .expect("session opens");
        assert_eq!(platform.start_count(), 1);
        assert_eq!(platform.open_sessions(), 1);
        assert_eq!(platform.last_config().map(|c| c.lap_length), Some(25.0));

        platform.stop_session(handle).await.expect("session closes");
        assert_eq!(platform.open_sessions(), 0);
    }

    #[tokio::test]
    async fn test_failing_platform_rejects_once() {
        let platform = MockSensorPlatform::failing("rejected");
        let (tx, _rx) = mpsc::channel(8);
        let result = platform
            .start_session(SensorSessionConfig::pool_swim(25.0), tx)
            .await;
        assert!(matches!(result, Err(SensorError::CreationFailed { .. })));

        // the failure script is consumed; the next attempt succeeds
        let (tx, _rx) = mpsc::channel(8);
        assert!(platform
            .start_session(SensorSessionConfig::pool_swim(25.0), tx)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_emit_reaches_open_session() {
        let platform = MockSensorPlatform::new();
        let (tx, mut rx) = mpsc::channel(8);
        platform
            .start_session(SensorSessionConfig::pool_swim(25.0), tx)
            .await
            .expect("session opens");

        assert!(platform.emit_heart_rate(120.0).await);
        assert_eq!(
            rx.recv().await,
            Some(PlatformEvent::HeartRate { bpm: 120.0 })
        );
    }

    #[tokio::test]
    async fn test_emit_without_session_is_dropped() {
        let platform = MockSensorPlatform::new();
        assert!(!platform.emit_heart_rate(120.0).await);
    }
}
