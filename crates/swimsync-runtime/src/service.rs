//! Wrist-side session service
//!
//! Reacts to workout commands — from the paired handheld over the bus and
//! from the local UI through a control channel — by driving the
//! `SensorSession`, and mirrors the resulting status transitions back to the
//! peer as `watchStatus` messages. Also answers the peer's parameter
//! requests from the shared state.

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use swimsync_core::{MessageKind, PeerMessage, SessionCommand, WatchStatus};

use crate::bus::MessageBus;
use crate::sensor::{SensorEvent, SensorSession};
use crate::state::SharedSessionState;

// ----------------------------------------------------------------------------
// Local Control
// ----------------------------------------------------------------------------

/// User-initiated workout control, equivalent to the peer's commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkoutControl {
    Start,
    Stop,
}

// ----------------------------------------------------------------------------
// Session Service
// ----------------------------------------------------------------------------

/// Drives the sensor session from peer commands and local control
pub struct SessionService {
    sensor: SensorSession,
    state: SharedSessionState,
    bus: MessageBus,
    commands: mpsc::UnboundedReceiver<PeerMessage>,
    control: mpsc::Receiver<WorkoutControl>,
    sensor_events: broadcast::Receiver<SensorEvent>,
    /// Whether a `started` status has been announced and not yet retracted
    announced_active: bool,
}

impl SessionService {
    /// Wire the service and spawn its task. Returns the local control handle
    /// and the join handle.
    pub fn spawn(
        sensor: SensorSession,
        state: SharedSessionState,
        bus: MessageBus,
        control_buffer: usize,
    ) -> (mpsc::Sender<WorkoutControl>, JoinHandle<()>) {
        let (_command_id, commands) = bus.subscribe(MessageKind::Command);
        let (control_tx, control) = mpsc::channel(control_buffer);
        let sensor_events = sensor.subscribe();

        let service = Self {
            sensor,
            state,
            bus,
            commands,
            control,
            sensor_events,
            announced_active: false,
        };
        let task = tokio::spawn(service.run());
        (control_tx, task)
    }

    async fn run(mut self) {
        info!("session service starting");
        loop {
            tokio::select! {
                command = self.commands.recv() => {
                    match command {
                        Some(PeerMessage::Command(SessionCommand::Start)) => self.start_workout().await,
                        Some(PeerMessage::Command(SessionCommand::Stop)) => self.stop_workout().await,
                        Some(other) => debug!(kind = ?other.kind(), "ignoring non-command on command stream"),
                        None => break,
                    }
                }
                control = self.control.recv() => {
                    match control {
                        Some(WorkoutControl::Start) => self.start_workout().await,
                        Some(WorkoutControl::Stop) => self.stop_workout().await,
                        None => break,
                    }
                }
                event = self.sensor_events.recv() => {
                    match event {
                        Ok(SensorEvent::Error { .. }) => {
                            // an error while nothing is live anymore means the
                            // platform failed the session out from under us;
                            // retract the announced status so the handheld is
                            // not stuck on "started"
                            if self.announced_active && !self.sensor.is_active() {
                                self.announced_active = false;
                                let _ = self.bus.publish(PeerMessage::WatchStatus(WatchStatus::Stopped)).await;
                            }
                        }
                        Ok(_) => {}
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(skipped, "sensor stream lagged in session service");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
        }
        // leave the wrist in a stopped state on teardown
        self.sensor.stop().await;
        info!("session service stopped");
    }

    async fn start_workout(&mut self) {
        let pool_length = self.state.pool_length();
        match self.sensor.start(pool_length).await {
            Ok(()) => {
                self.announced_active = true;
                let _ = self
                    .bus
                    .publish(PeerMessage::WatchStatus(WatchStatus::Started))
                    .await;
            }
            Err(error) => {
                // terminal for this attempt; tell the peer we are not running
                warn!(%error, "workout start failed");
                let _ = self
                    .bus
                    .publish(PeerMessage::WatchStatus(WatchStatus::Stopped))
                    .await;
            }
        }
    }

    async fn stop_workout(&mut self) {
        let _ = self
            .bus
            .publish(PeerMessage::WatchStatus(WatchStatus::Stopping))
            .await;
        self.sensor.stop().await;
        self.announced_active = false;
        let _ = self
            .bus
            .publish(PeerMessage::WatchStatus(WatchStatus::Stopped))
            .await;
    }
}
