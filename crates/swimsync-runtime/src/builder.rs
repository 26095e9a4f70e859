//! Pipeline composition root
//!
//! Replaces the original app's process-wide singletons with explicitly
//! constructed services: consumers build a [`Pipeline`] per device role and
//! hold it for the app's lifetime. All channel wiring between the transport,
//! the bus router, the sensor session, and the aggregation task happens
//! here.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::info;

use swimsync_core::config::SwimsyncConfig;
use swimsync_core::platform::{InboundFrame, LinkState, PeerLink, SensorPlatform};
use swimsync_core::{
    DeviceRole, PeerMessage, SessionParameters, SwimsyncError, SwimsyncResult, TransportError,
};

use crate::aggregator::LapAggregator;
use crate::bus::MessageBus;
use crate::sensor::SensorSession;
use crate::service::{SessionService, WorkoutControl};
use crate::state::SharedSessionState;

// ----------------------------------------------------------------------------
// Pipeline Builder
// ----------------------------------------------------------------------------

/// Builder wiring the telemetry pipeline for one device
pub struct PipelineBuilder {
    role: DeviceRole,
    config: SwimsyncConfig,
    platform: Option<Arc<dyn SensorPlatform>>,
    link: Option<Arc<dyn PeerLink>>,
    inbound: Option<mpsc::Receiver<InboundFrame>>,
    link_changes: Option<watch::Receiver<LinkState>>,
}

impl PipelineBuilder {
    /// Pipeline for the wrist device: sensor session, aggregator, and the
    /// session service answering peer commands
    pub fn wrist() -> Self {
        Self::new(DeviceRole::Wrist)
    }

    /// Pipeline for the handheld device: bus and shared state only
    pub fn handheld() -> Self {
        Self::new(DeviceRole::Handheld)
    }

    fn new(role: DeviceRole) -> Self {
        Self {
            role,
            config: SwimsyncConfig::default(),
            platform: None,
            link: None,
            inbound: None,
            link_changes: None,
        }
    }

    /// Override the default configuration
    pub fn with_config(mut self, config: SwimsyncConfig) -> Self {
        self.config = config;
        self
    }

    /// Provide the host sensor platform (required for the wrist role)
    pub fn with_sensor_platform(mut self, platform: Arc<dyn SensorPlatform>) -> Self {
        self.platform = Some(platform);
        self
    }

    /// Provide the peer transport and its inbound/link-state channels
    pub fn with_peer_link(
        mut self,
        link: Arc<dyn PeerLink>,
        inbound: mpsc::Receiver<InboundFrame>,
        link_changes: watch::Receiver<LinkState>,
    ) -> Self {
        self.link = Some(link);
        self.inbound = Some(inbound);
        self.link_changes = Some(link_changes);
        self
    }

    /// Validate, wire, and spawn the pipeline tasks
    pub fn build(self) -> SwimsyncResult<Pipeline> {
        self.config
            .validate()
            .map_err(|reason| SwimsyncError::InvalidConfig { reason })?;

        let link = self.link.ok_or_else(|| SwimsyncError::InvalidConfig {
            reason: "a peer link is required".into(),
        })?;
        let inbound = self.inbound.ok_or_else(|| SwimsyncError::InvalidConfig {
            reason: "the peer link's inbound channel is required".into(),
        })?;
        let link_changes = self
            .link_changes
            .ok_or_else(|| SwimsyncError::InvalidConfig {
                reason: "the peer link's state channel is required".into(),
            })?;
        if !link.is_supported() {
            return Err(TransportError::Unsupported.into());
        }

        info!(role = %self.role, "building pipeline");

        let bus = MessageBus::new(link, &self.config);
        let mut tasks: Vec<JoinHandle<()>> = Vec::new();
        tasks.push(bus.spawn_router(inbound, link_changes));

        let state = SharedSessionState::new(bus.clone(), &self.config);
        tasks.push(state.spawn_inbound_apply());

        // Either side answers the peer's parameter requests from its own
        // state. A side with nothing configured replies "parameters not set"
        // so the requester clears its readiness instead of flipping it on.
        let responder_state = state.clone();
        bus.set_responder(move |message| match message {
            PeerMessage::PoolLengthRequest => Some(PeerMessage::PoolLength {
                meters: responder_state.pool_length(),
            }),
            PeerMessage::AllParametersRequest => {
                let params = responder_state.parameters();
                let defaults = SessionParameters::default();
                let configured = params.is_ready
                    || params.pool_length != defaults.pool_length
                    || params.style != defaults.style
                    || params.target_distance != defaults.target_distance;
                if configured {
                    Some(PeerMessage::AllParameters {
                        pool_length: params.pool_length,
                        style: params.style,
                        target_distance: params.target_distance,
                    })
                } else {
                    Some(PeerMessage::ParametersUnset)
                }
            }
            _ => None,
        });

        let (aggregator, control) = match self.role {
            DeviceRole::Wrist => {
                let platform = self.platform.ok_or_else(|| SwimsyncError::InvalidConfig {
                    reason: "the wrist pipeline requires a sensor platform".into(),
                })?;
                let sensor = SensorSession::new(platform, self.config.channels.clone());
                let aggregator = LapAggregator::spawn(
                    sensor.subscribe(),
                    state.clone(),
                    bus.clone(),
                    &self.config,
                );
                let (control, service_task) = SessionService::spawn(
                    sensor,
                    state.clone(),
                    bus.clone(),
                    self.config.channels.notification_buffer_size,
                );
                tasks.push(service_task);
                (Some(aggregator), Some(control))
            }
            DeviceRole::Handheld => (None, None),
        };

        Ok(Pipeline {
            role: self.role,
            bus,
            state,
            aggregator,
            control,
            tasks,
        })
    }
}

// ----------------------------------------------------------------------------
// Pipeline
// ----------------------------------------------------------------------------

/// A running telemetry pipeline; lives for the app's lifetime
pub struct Pipeline {
    role: DeviceRole,
    pub bus: MessageBus,
    pub state: SharedSessionState,
    aggregator: Option<LapAggregator>,
    control: Option<mpsc::Sender<WorkoutControl>>,
    tasks: Vec<JoinHandle<()>>,
}

impl Pipeline {
    /// Which device role this pipeline serves
    pub fn role(&self) -> DeviceRole {
        self.role
    }

    /// Lap records produced so far (wrist role only)
    pub fn laps(&self) -> Vec<swimsync_core::LapRecord> {
        self.aggregator
            .as_ref()
            .map(LapAggregator::laps)
            .unwrap_or_default()
    }

    /// Start a workout from the local side (wrist role only)
    pub async fn start_workout(&self) -> bool {
        match &self.control {
            Some(control) => control.send(WorkoutControl::Start).await.is_ok(),
            None => false,
        }
    }

    /// Stop the running workout from the local side (wrist role only)
    pub async fn stop_workout(&self) -> bool {
        match &self.control {
            Some(control) => control.send(WorkoutControl::Stop).await.is_ok(),
            None => false,
        }
    }

    /// Tear the pipeline down, aborting its tasks
    pub async fn shutdown(self) {
        info!(role = %self.role, "pipeline shutting down");
        drop(self.control);
        if let Some(aggregator) = self.aggregator {
            aggregator.shutdown();
        }
        for task in self.tasks {
            task.abort();
        }
    }
}
