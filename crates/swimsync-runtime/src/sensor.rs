//! Live sensor-monitoring session
//!
//! `SensorSession` owns the lifecycle of one session against the host sensor
//! platform. All platform events flow through one mpsc channel into a single
//! delivery task — the sensor subsystem's delivery context — which applies
//! the monotonic and deduplication gates before fanning the cleaned stream
//! out to subscribers.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use swimsync_core::config::ChannelConfig;
use swimsync_core::platform::{
    PlatformEvent, PlatformSessionHandle, SensorPlatform, SensorSessionConfig,
};
use swimsync_core::{SensorError, Timestamp};

// ----------------------------------------------------------------------------
// Session State
// ----------------------------------------------------------------------------

/// Lifecycle state of the sensor session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorState {
    Idle,
    Starting,
    Active,
    Stopping,
}

// ----------------------------------------------------------------------------
// Sensor Events
// ----------------------------------------------------------------------------

/// Gated sensor stream, fanned out to any number of subscribers.
///
/// Failures travel the same channel as data, discriminated by variant.
#[derive(Debug, Clone, PartialEq)]
pub enum SensorEvent {
    /// Heart-rate sample, bpm; a new sample supersedes the previous one
    HeartRate { bpm: f64 },
    /// Cumulative stroke count; guaranteed strictly increasing per session
    StrokeTotal { total: u32 },
    /// Cumulative active calories; guaranteed strictly increasing per session
    CalorieTotal { total: f64 },
    /// Deduplicated lap boundary
    LapBoundary { index: u32, timestamp: Timestamp },
    /// Session state transition
    StateChanged { state: SensorState },
    /// A platform failure, surfaced before the accompanying transition
    Error { message: String },
}

// ----------------------------------------------------------------------------
// Sensor Session
// ----------------------------------------------------------------------------

struct RunningSession {
    handle: PlatformSessionHandle,
    // Kept so an orderly shutdown can observe the delivery task draining;
    // the task ends on its own when the platform drops its sender.
    delivery: JoinHandle<()>,
}

/// Owns one live sensor-monitoring session.
///
/// `start` never leaves two concurrent sessions open; `stop` is idempotent.
pub struct SensorSession {
    platform: Arc<dyn SensorPlatform>,
    events: broadcast::Sender<SensorEvent>,
    channels: ChannelConfig,
    active: Arc<AtomicBool>,
    running: Option<RunningSession>,
}

impl SensorSession {
    /// Create an idle session wrapper around the given platform
    pub fn new(platform: Arc<dyn SensorPlatform>, channels: ChannelConfig) -> Self {
        let (events, _) = broadcast::channel(channels.sensor_broadcast_buffer_size);
        Self {
            platform,
            events,
            channels,
            active: Arc::new(AtomicBool::new(false)),
            running: None,
        }
    }

    /// Subscribe to the gated sensor stream
    pub fn subscribe(&self) -> broadcast::Receiver<SensorEvent> {
        self.events.subscribe()
    }

    /// Clone of the fan-out sender, for composition-time wiring
    pub fn event_sender(&self) -> broadcast::Sender<SensorEvent> {
        self.events.clone()
    }

    /// Whether a session is currently live
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Start a session configured for indoor pool swimming with the given
    /// lap length.
    ///
    /// An already-active session is stopped first — its synchronous stop
    /// portion completes before the new session begins. A platform rejection
    /// is terminal for this attempt: the error is surfaced on the event
    /// stream and returned, and no automatic retry happens.
    pub async fn start(&mut self, pool_length: f64) -> Result<(), SensorError> {
        if self.running.is_some() {
            debug!("start requested while active, stopping previous session first");
            self.stop().await;
        }

        self.emit_state(SensorState::Starting);
        let (events_tx, events_rx) = mpsc::channel(self.channels.sensor_event_buffer_size);
        let config = SensorSessionConfig::pool_swim(pool_length);

        match self.platform.start_session(config, events_tx).await {
            Ok(handle) => {
                info!(pool_length, "sensor session started");
                self.active.store(true, Ordering::SeqCst);
                self.emit_state(SensorState::Active);
                let delivery = tokio::spawn(delivery_loop(
                    events_rx,
                    self.events.clone(),
                    Arc::clone(&self.active),
                ));
                self.running = Some(RunningSession { handle, delivery });
                Ok(())
            }
            Err(error) => {
                warn!(%error, "sensor session creation failed");
                let _ = self.events.send(SensorEvent::Error {
                    message: error.to_string(),
                });
                self.emit_state(SensorState::Idle);
                Err(error)
            }
        }
    }

    /// Stop the active session. Idempotent: a no-op when nothing is active.
    ///
    /// The synchronous portion (ending the activity) completes before this
    /// returns; asynchronous finalization failures are reported on the event
    /// stream and never block a subsequent `start`.
    pub async fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            debug!("stop requested with no active session");
            return;
        };

        self.emit_state(SensorState::Stopping);
        self.active.store(false, Ordering::SeqCst);

        if let Err(error) = self.platform.stop_session(running.handle).await {
            // Surfaced, but the session still transitions to inactive so
            // callers are not stuck.
            warn!(%error, "ending sensor session reported failure");
            let _ = self.events.send(SensorEvent::Error {
                message: error.to_string(),
            });
        }

        // The delivery task drains remaining finalization events and exits
        // when the platform drops its sender.
        drop(running.delivery);

        self.emit_state(SensorState::Idle);
        info!("sensor session stopped");
    }

    fn emit_state(&self, state: SensorState) {
        let _ = self.events.send(SensorEvent::StateChanged { state });
    }
}

// ----------------------------------------------------------------------------
// Delivery Task
// ----------------------------------------------------------------------------

/// The sensor subsystem's delivery context: the only place platform events
/// are inspected, so subscribers never observe concurrent deliveries.
async fn delivery_loop(
    mut events_rx: mpsc::Receiver<PlatformEvent>,
    events: broadcast::Sender<SensorEvent>,
    active: Arc<AtomicBool>,
) {
    debug!("sensor delivery task starting");

    let mut last_strokes: Option<u32> = None;
    let mut last_calories: Option<f64> = None;
    // Append-only set of lap-event source timestamps; the platform may
    // redeliver its full event history on every callback.
    let mut seen_lap_events: HashSet<u64> = HashSet::new();

    while let Some(event) = events_rx.recv().await {
        match event {
            PlatformEvent::HeartRate { bpm } => {
                let _ = events.send(SensorEvent::HeartRate { bpm });
            }
            PlatformEvent::StrokeCount { total } => {
                if last_strokes.is_some_and(|previous| total <= previous) {
                    debug!(total, "discarding non-increasing stroke sample");
                    continue;
                }
                last_strokes = Some(total);
                let _ = events.send(SensorEvent::StrokeTotal { total });
            }
            PlatformEvent::Calories { total } => {
                if last_calories.is_some_and(|previous| total <= previous) {
                    debug!(total, "discarding non-increasing calorie sample");
                    continue;
                }
                last_calories = Some(total);
                let _ = events.send(SensorEvent::CalorieTotal { total });
            }
            PlatformEvent::Lap { timestamp, index } => {
                if !seen_lap_events.insert(timestamp.as_millis()) {
                    debug!(index, "discarding redelivered lap event");
                    continue;
                }
                let _ = events.send(SensorEvent::LapBoundary { index, timestamp });
            }
            PlatformEvent::StateChanged { from, to } => {
                debug!(?from, ?to, "platform session state changed");
            }
            PlatformEvent::Failed { reason } => {
                warn!(%reason, "sensor platform failed the session");
                // The error event must be observable before the transition.
                let _ = events.send(SensorEvent::Error {
                    message: reason.clone(),
                });
                active.store(false, Ordering::SeqCst);
                let _ = events.send(SensorEvent::StateChanged {
                    state: SensorState::Idle,
                });
            }
        }
    }

    debug!("sensor delivery task stopped");
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
