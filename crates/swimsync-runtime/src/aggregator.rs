//! Lap aggregation task
//!
//! Consumes the gated sensor stream and folds it into the [`LapLedger`].
//! This task is the ledger's only mutation path, so ledger updates are
//! totally ordered; external readers take snapshots through the handle.
//! Each ledger change is mirrored to the peer as telemetry.

use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use swimsync_core::config::SwimsyncConfig;
use swimsync_core::ledger::{LapLedger, LapRecord};
use swimsync_core::{PeerMessage, SystemTimeSource};

use crate::bus::MessageBus;
use crate::sensor::{SensorEvent, SensorState};
use crate::state::{SharedSessionState, StateChange};

// ----------------------------------------------------------------------------
// Lap Aggregator
// ----------------------------------------------------------------------------

/// Handle to the running aggregation task and its ledger
pub struct LapAggregator {
    ledger: Arc<Mutex<LapLedger<SystemTimeSource>>>,
    task: JoinHandle<()>,
}

impl LapAggregator {
    /// Spawn the aggregation task over a sensor subscription.
    ///
    /// The task also watches state changes for the current pool length and
    /// for reset notifications, which clear the ledger.
    pub fn spawn(
        sensor_events: broadcast::Receiver<SensorEvent>,
        state: SharedSessionState,
        bus: MessageBus,
        config: &SwimsyncConfig,
    ) -> Self {
        let ledger = Arc::new(Mutex::new(LapLedger::new(
            &config.aggregator,
            SystemTimeSource::new(),
        )));
        {
            let mut guard = lock(&ledger);
            guard.set_pool_length(state.pool_length());
        }
        let task = tokio::spawn(run(
            Arc::clone(&ledger),
            sensor_events,
            state.subscribe(),
            bus,
        ));
        Self { ledger, task }
    }

    /// Snapshot of the recorded laps, oldest first
    pub fn laps(&self) -> Vec<LapRecord> {
        lock(&self.ledger).laps().to_vec()
    }

    /// Session-relative cumulative stroke count
    pub fn session_strokes(&self) -> u32 {
        lock(&self.ledger).cumulative_strokes()
    }

    /// Abort the aggregation task
    pub fn shutdown(self) {
        self.task.abort();
    }
}

// ----------------------------------------------------------------------------
// Aggregation Task
// ----------------------------------------------------------------------------

async fn run(
    ledger: Arc<Mutex<LapLedger<SystemTimeSource>>>,
    mut sensor_events: broadcast::Receiver<SensorEvent>,
    mut state_changes: broadcast::Receiver<StateChange>,
    bus: MessageBus,
) {
    debug!("lap aggregator starting");
    loop {
        // biased: a pool-length change or reset that arrived before a sensor
        // sample must be applied before that sample is folded in
        tokio::select! {
            biased;
            change = state_changes.recv() => {
                match change {
                    Ok(StateChange::PoolLength(meters)) => {
                        lock(&ledger).set_pool_length(meters);
                    }
                    Ok(StateChange::Reset) => {
                        debug!("clearing lap ledger on reset");
                        lock(&ledger).reset();
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "state change stream lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            event = sensor_events.recv() => {
                match event {
                    Ok(event) => handle_sensor_event(&ledger, &bus, event).await,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "sensor stream lagged, samples dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }
    debug!("lap aggregator stopped");
}

async fn handle_sensor_event(
    ledger: &Arc<Mutex<LapLedger<SystemTimeSource>>>,
    bus: &MessageBus,
    event: SensorEvent,
) {
    match event {
        SensorEvent::HeartRate { bpm } => {
            lock(ledger).record_heart_rate(bpm);
            let _ = bus
                .publish(PeerMessage::HeartRate {
                    bpm: bpm.round().max(0.0) as u32,
                })
                .await;
        }
        SensorEvent::StrokeTotal { total } => {
            let session_strokes = {
                let mut guard = lock(ledger);
                guard.record_strokes(total);
                guard.cumulative_strokes()
            };
            let _ = bus
                .publish(PeerMessage::StrokeCount {
                    count: session_strokes,
                })
                .await;
        }
        SensorEvent::LapBoundary { index, .. } => {
            let finalized = lock(ledger).lap_boundary(index);
            if let Some(record) = finalized {
                debug!(
                    lap = record.lap_number,
                    strokes = record.stroke_count,
                    "lap finalized"
                );
                let _ = bus
                    .publish(PeerMessage::Lap {
                        number: record.lap_number,
                        strokes: record.stroke_count,
                        distance: record.distance,
                    })
                    .await;
            }
        }
        SensorEvent::StateChanged {
            state: SensorState::Idle,
        } => {
            // one last forced update of the in-flight lap
            lock(ledger).finalize();
        }
        SensorEvent::CalorieTotal { .. }
        | SensorEvent::StateChanged { .. }
        | SensorEvent::Error { .. } => {}
    }
}

/// Mutex poisoning only occurs after a panic in a holder; recover the data
/// rather than propagating the poison. The guard is never held across await.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
