//! Message taxonomy and classification
//!
//! Every frame exchanged between the two devices is a flat key/value map
//! (`Payload`). This module maps those maps onto a closed, typed
//! `PeerMessage` variant and back. Classification is dual-path: the
//! well-known-key heuristic runs first, because a reply the peer built for a
//! different purpose may not carry the explicit `messageType` tag; the tag is
//! consulted second. Classification is total — anything unrecognizable
//! becomes `PeerMessage::Unclassified` rather than an error.

use serde_json::{json, Map, Value};
use uuid::Uuid;

use crate::types::{SwimStyle, Timestamp};

/// Raw wire payload: a flat key/value map
pub type Payload = Map<String, Value>;

// ----------------------------------------------------------------------------
// Well-Known Payload Keys
// ----------------------------------------------------------------------------

/// Payload keys understood by both devices
pub mod keys {
    pub const COMMAND: &str = "command";
    pub const POOL_SIZE: &str = "poolSize";
    pub const REQUEST_POOL_LENGTH: &str = "requestPoolLength";
    pub const SWIMMING_STYLE: &str = "swimmingStyle";
    pub const TOTAL_METERS: &str = "totalMeters";
    pub const HEART_RATE: &str = "heartRate";
    pub const STROKE_COUNT: &str = "strokeCount";
    pub const LAP_NUMBER: &str = "lapNumber";
    pub const LAP_DISTANCE: &str = "lapDistance";
    pub const WATCH_STATUS: &str = "watchStatus";
    pub const REQUEST_ALL_PARAMETERS: &str = "requestAllParameters";
    pub const PARAMETERS_SET: &str = "parametersSet";
    pub const WORKOUTS_DATA: &str = "workoutsData";
    pub const REQUEST_WORKOUTS: &str = "requestWorkouts";
    pub const MESSAGE_TYPE: &str = "messageType";
    pub const CORRELATION_ID: &str = "correlationId";
    pub const ACK: &str = "ack";
    pub const RECEIVED_AT: &str = "receivedAt";
}

// ----------------------------------------------------------------------------
// Message Kind
// ----------------------------------------------------------------------------

/// Discriminant for subscription routing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Command,
    PoolLength,
    PoolLengthRequest,
    AllParameters,
    AllParametersRequest,
    SwimmingStyle,
    TargetDistance,
    HeartRate,
    StrokeCount,
    Lap,
    WatchStatus,
    WorkoutList,
    WorkoutListRequest,
    Unclassified,
}

impl MessageKind {
    /// Explicit `messageType` tag value for this kind
    pub fn tag(self) -> &'static str {
        match self {
            MessageKind::Command => "command",
            MessageKind::PoolLength => "poolSize",
            MessageKind::PoolLengthRequest => "requestPoolLength",
            MessageKind::AllParameters => "allParameters",
            MessageKind::AllParametersRequest => "requestAllParameters",
            MessageKind::SwimmingStyle => "swimmingStyle",
            MessageKind::TargetDistance => "totalMeters",
            MessageKind::HeartRate => "heartRate",
            MessageKind::StrokeCount => "strokeCount",
            MessageKind::Lap => "lap",
            MessageKind::WatchStatus => "watchStatus",
            MessageKind::WorkoutList => "workoutsData",
            MessageKind::WorkoutListRequest => "requestWorkouts",
            MessageKind::Unclassified => "unclassified",
        }
    }

    /// Reverse of [`MessageKind::tag`]
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "command" => Some(MessageKind::Command),
            "poolSize" => Some(MessageKind::PoolLength),
            "requestPoolLength" => Some(MessageKind::PoolLengthRequest),
            "allParameters" => Some(MessageKind::AllParameters),
            "requestAllParameters" => Some(MessageKind::AllParametersRequest),
            "swimmingStyle" => Some(MessageKind::SwimmingStyle),
            "totalMeters" => Some(MessageKind::TargetDistance),
            "heartRate" => Some(MessageKind::HeartRate),
            "strokeCount" => Some(MessageKind::StrokeCount),
            "lap" => Some(MessageKind::Lap),
            "watchStatus" => Some(MessageKind::WatchStatus),
            "workoutsData" => Some(MessageKind::WorkoutList),
            "requestWorkouts" => Some(MessageKind::WorkoutListRequest),
            _ => None,
        }
    }
}

// ----------------------------------------------------------------------------
// Command and Status Variants
// ----------------------------------------------------------------------------

/// Workout control commands sent by the handheld device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionCommand {
    Start,
    Stop,
}

impl SessionCommand {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionCommand::Start => "start",
            SessionCommand::Stop => "stop",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "start" => Some(SessionCommand::Start),
            "stop" => Some(SessionCommand::Stop),
            _ => None,
        }
    }
}

/// Wrist-side session status mirrored to the handheld
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchStatus {
    Started,
    Stopping,
    Stopped,
}

impl WatchStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            WatchStatus::Started => "started",
            WatchStatus::Stopping => "stopping",
            WatchStatus::Stopped => "stopped",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "started" => Some(WatchStatus::Started),
            "stopping" => Some(WatchStatus::Stopping),
            "stopped" => Some(WatchStatus::Stopped),
            _ => None,
        }
    }
}

// ----------------------------------------------------------------------------
// Peer Message
// ----------------------------------------------------------------------------

/// A classified message between the two devices.
///
/// The closed variant set replaces the duck-typed payload maps of the wire
/// layer; `Unclassified` keeps classification total.
#[derive(Debug, Clone, PartialEq)]
pub enum PeerMessage {
    /// Workout control command from the handheld
    Command(SessionCommand),
    /// Pool length value (setting push or request reply)
    PoolLength { meters: f64 },
    /// Ask the peer for its pool length
    PoolLengthRequest,
    /// Full parameter set
    AllParameters {
        pool_length: f64,
        style: SwimStyle,
        target_distance: u32,
    },
    /// Reply explicitly flagging that the peer has no parameters configured
    ParametersUnset,
    /// Ask the peer for the full parameter set
    AllParametersRequest,
    /// Stroke style value
    SwimmingStyle(SwimStyle),
    /// Target distance value in meters
    TargetDistance(u32),
    /// Latest heart rate in bpm
    HeartRate { bpm: u32 },
    /// Session-relative cumulative stroke count
    StrokeCount { count: u32 },
    /// A finalized lap record
    Lap {
        number: u32,
        strokes: u32,
        distance: f64,
    },
    /// Wrist session status transition
    WatchStatus(WatchStatus),
    /// Bulk workout list transfer (opaque here; consumed outside the core)
    WorkoutList(Value),
    /// Ask the peer for the bulk workout list
    WorkoutListRequest,
    /// A payload no classification path recognized; logged and dropped by
    /// the router, never propagated as an error
    Unclassified(Payload),
}

impl PeerMessage {
    /// The routing kind of this message
    pub fn kind(&self) -> MessageKind {
        match self {
            PeerMessage::Command(_) => MessageKind::Command,
            PeerMessage::PoolLength { .. } => MessageKind::PoolLength,
            PeerMessage::PoolLengthRequest => MessageKind::PoolLengthRequest,
            PeerMessage::AllParameters { .. } | PeerMessage::ParametersUnset => {
                MessageKind::AllParameters
            }
            PeerMessage::AllParametersRequest => MessageKind::AllParametersRequest,
            PeerMessage::SwimmingStyle(_) => MessageKind::SwimmingStyle,
            PeerMessage::TargetDistance(_) => MessageKind::TargetDistance,
            PeerMessage::HeartRate { .. } => MessageKind::HeartRate,
            PeerMessage::StrokeCount { .. } => MessageKind::StrokeCount,
            PeerMessage::Lap { .. } => MessageKind::Lap,
            PeerMessage::WatchStatus(_) => MessageKind::WatchStatus,
            PeerMessage::WorkoutList(_) => MessageKind::WorkoutList,
            PeerMessage::WorkoutListRequest => MessageKind::WorkoutListRequest,
            PeerMessage::Unclassified(_) => MessageKind::Unclassified,
        }
    }

    /// Encode this message as a wire payload, including the explicit tag
    pub fn into_payload(self) -> Payload {
        let kind = self.kind();
        let mut payload = Payload::new();
        match self {
            PeerMessage::Command(command) => {
                payload.insert(keys::COMMAND.into(), json!(command.as_str()));
            }
            PeerMessage::PoolLength { meters } => {
                payload.insert(keys::POOL_SIZE.into(), json!(meters));
            }
            PeerMessage::PoolLengthRequest => {
                payload.insert(keys::REQUEST_POOL_LENGTH.into(), json!(true));
            }
            PeerMessage::AllParameters {
                pool_length,
                style,
                target_distance,
            } => {
                payload.insert(keys::POOL_SIZE.into(), json!(pool_length));
                payload.insert(keys::SWIMMING_STYLE.into(), json!(style.code()));
                payload.insert(keys::TOTAL_METERS.into(), json!(target_distance));
                payload.insert(keys::PARAMETERS_SET.into(), json!(true));
            }
            PeerMessage::ParametersUnset => {
                payload.insert(keys::PARAMETERS_SET.into(), json!(false));
            }
            PeerMessage::AllParametersRequest => {
                payload.insert(keys::REQUEST_ALL_PARAMETERS.into(), json!(true));
            }
            PeerMessage::SwimmingStyle(style) => {
                payload.insert(keys::SWIMMING_STYLE.into(), json!(style.code()));
            }
            PeerMessage::TargetDistance(meters) => {
                payload.insert(keys::TOTAL_METERS.into(), json!(meters));
            }
            PeerMessage::HeartRate { bpm } => {
                payload.insert(keys::HEART_RATE.into(), json!(bpm));
            }
            PeerMessage::StrokeCount { count } => {
                payload.insert(keys::STROKE_COUNT.into(), json!(count));
            }
            PeerMessage::Lap {
                number,
                strokes,
                distance,
            } => {
                payload.insert(keys::LAP_NUMBER.into(), json!(number));
                payload.insert(keys::STROKE_COUNT.into(), json!(strokes));
                payload.insert(keys::LAP_DISTANCE.into(), json!(distance));
            }
            PeerMessage::WatchStatus(status) => {
                payload.insert(keys::WATCH_STATUS.into(), json!(status.as_str()));
            }
            PeerMessage::WorkoutList(data) => {
                payload.insert(keys::WORKOUTS_DATA.into(), data);
            }
            PeerMessage::WorkoutListRequest => {
                payload.insert(keys::REQUEST_WORKOUTS.into(), json!(true));
            }
            PeerMessage::Unclassified(map) => return map,
        }
        payload.insert(keys::MESSAGE_TYPE.into(), json!(kind.tag()));
        payload
    }

    /// Classify a raw inbound payload. Total: never fails, never panics.
    pub fn classify(payload: &Payload) -> PeerMessage {
        // Key-presence heuristic first: replies constructed by the peer for
        // another purpose may not carry the matching explicit tag.
        if let Some(message) = Self::classify_by_keys(payload) {
            return message;
        }
        // Explicit tag second.
        if let Some(kind) = payload
            .get(keys::MESSAGE_TYPE)
            .and_then(Value::as_str)
            .and_then(MessageKind::from_tag)
        {
            if let Some(message) = Self::parse_as(kind, payload) {
                return message;
            }
        }
        PeerMessage::Unclassified(payload.clone())
    }

    /// Key-presence heuristic over the well-known keys.
    ///
    /// The match order puts more specific shapes (full parameter set, lap
    /// record) before the single-value keys they share fields with.
    fn classify_by_keys(payload: &Payload) -> Option<PeerMessage> {
        if payload.contains_key(keys::COMMAND) {
            return Self::parse_as(MessageKind::Command, payload);
        }
        if payload.contains_key(keys::WATCH_STATUS) {
            return Self::parse_as(MessageKind::WatchStatus, payload);
        }
        if payload.contains_key(keys::REQUEST_ALL_PARAMETERS) {
            return Some(PeerMessage::AllParametersRequest);
        }
        if payload.contains_key(keys::REQUEST_POOL_LENGTH) {
            return Some(PeerMessage::PoolLengthRequest);
        }
        if payload.contains_key(keys::REQUEST_WORKOUTS) {
            return Some(PeerMessage::WorkoutListRequest);
        }
        if payload.contains_key(keys::WORKOUTS_DATA) {
            return Self::parse_as(MessageKind::WorkoutList, payload);
        }
        if payload.get(keys::PARAMETERS_SET) == Some(&Value::Bool(false)) {
            return Some(PeerMessage::ParametersUnset);
        }
        if payload.contains_key(keys::POOL_SIZE)
            && payload.contains_key(keys::SWIMMING_STYLE)
            && payload.contains_key(keys::TOTAL_METERS)
        {
            return Self::parse_as(MessageKind::AllParameters, payload);
        }
        if payload.contains_key(keys::LAP_NUMBER) {
            return Self::parse_as(MessageKind::Lap, payload);
        }
        if payload.contains_key(keys::POOL_SIZE) {
            return Self::parse_as(MessageKind::PoolLength, payload);
        }
        if payload.contains_key(keys::SWIMMING_STYLE) {
            return Self::parse_as(MessageKind::SwimmingStyle, payload);
        }
        if payload.contains_key(keys::TOTAL_METERS) {
            return Self::parse_as(MessageKind::TargetDistance, payload);
        }
        if payload.contains_key(keys::HEART_RATE) {
            return Self::parse_as(MessageKind::HeartRate, payload);
        }
        if payload.contains_key(keys::STROKE_COUNT) {
            return Self::parse_as(MessageKind::StrokeCount, payload);
        }
        None
    }

    /// Parse a payload as a specific kind. Returns `None` when the required
    /// values are missing or malformed.
    fn parse_as(kind: MessageKind, payload: &Payload) -> Option<PeerMessage> {
        match kind {
            MessageKind::Command => payload
                .get(keys::COMMAND)
                .and_then(Value::as_str)
                .and_then(SessionCommand::parse)
                .map(PeerMessage::Command),
            MessageKind::PoolLength => payload
                .get(keys::POOL_SIZE)
                .and_then(Value::as_f64)
                .filter(|meters| *meters > 0.0)
                .map(|meters| PeerMessage::PoolLength { meters }),
            MessageKind::PoolLengthRequest => Some(PeerMessage::PoolLengthRequest),
            MessageKind::AllParameters => {
                if payload.get(keys::PARAMETERS_SET) == Some(&Value::Bool(false)) {
                    return Some(PeerMessage::ParametersUnset);
                }
                let pool_length = payload
                    .get(keys::POOL_SIZE)
                    .and_then(Value::as_f64)
                    .filter(|meters| *meters > 0.0)?;
                let style = payload
                    .get(keys::SWIMMING_STYLE)
                    .and_then(Value::as_u64)
                    .and_then(|code| SwimStyle::from_code(u8::try_from(code).ok()?))?;
                let target_distance = payload
                    .get(keys::TOTAL_METERS)
                    .and_then(Value::as_u64)
                    .and_then(|meters| u32::try_from(meters).ok())?;
                Some(PeerMessage::AllParameters {
                    pool_length,
                    style,
                    target_distance,
                })
            }
            MessageKind::AllParametersRequest => Some(PeerMessage::AllParametersRequest),
            MessageKind::SwimmingStyle => payload
                .get(keys::SWIMMING_STYLE)
                .and_then(Value::as_u64)
                .and_then(|code| SwimStyle::from_code(u8::try_from(code).ok()?))
                .map(PeerMessage::SwimmingStyle),
            MessageKind::TargetDistance => payload
                .get(keys::TOTAL_METERS)
                .and_then(Value::as_u64)
                .and_then(|meters| u32::try_from(meters).ok())
                .map(PeerMessage::TargetDistance),
            MessageKind::HeartRate => payload
                .get(keys::HEART_RATE)
                .and_then(Value::as_u64)
                .and_then(|bpm| u32::try_from(bpm).ok())
                .map(|bpm| PeerMessage::HeartRate { bpm }),
            MessageKind::StrokeCount => payload
                .get(keys::STROKE_COUNT)
                .and_then(Value::as_u64)
                .and_then(|count| u32::try_from(count).ok())
                .map(|count| PeerMessage::StrokeCount { count }),
            MessageKind::Lap => {
                let number = payload
                    .get(keys::LAP_NUMBER)
                    .and_then(Value::as_u64)
                    .and_then(|n| u32::try_from(n).ok())?;
                let strokes = payload
                    .get(keys::STROKE_COUNT)
                    .and_then(Value::as_u64)
                    .and_then(|n| u32::try_from(n).ok())
                    .unwrap_or(0);
                let distance = payload
                    .get(keys::LAP_DISTANCE)
                    .and_then(Value::as_f64)
                    .unwrap_or(0.0);
                Some(PeerMessage::Lap {
                    number,
                    strokes,
                    distance,
                })
            }
            MessageKind::WatchStatus => payload
                .get(keys::WATCH_STATUS)
                .and_then(Value::as_str)
                .and_then(WatchStatus::parse)
                .map(PeerMessage::WatchStatus),
            MessageKind::WorkoutList => payload
                .get(keys::WORKOUTS_DATA)
                .cloned()
                .map(PeerMessage::WorkoutList),
            MessageKind::WorkoutListRequest => Some(PeerMessage::WorkoutListRequest),
            MessageKind::Unclassified => None,
        }
    }
}

// ----------------------------------------------------------------------------
// Correlation and Acknowledgement Helpers
// ----------------------------------------------------------------------------

/// Attach a correlation id for request/reply pairing
pub fn with_correlation(mut payload: Payload, correlation: Uuid) -> Payload {
    payload.insert(keys::CORRELATION_ID.into(), json!(correlation.to_string()));
    payload
}

/// Extract a correlation id, if the payload carries a valid one
pub fn correlation_id(payload: &Payload) -> Option<Uuid> {
    payload
        .get(keys::CORRELATION_ID)
        .and_then(Value::as_str)
        .and_then(|raw| Uuid::parse_str(raw).ok())
}

/// The minimal reply frame for a reply-required inbound message: an
/// acknowledgement flag plus a receipt timestamp. Domain responses are
/// merged over this by the router.
pub fn ack_frame(received_at: Timestamp) -> Payload {
    let mut payload = Payload::new();
    payload.insert(keys::ACK.into(), json!(true));
    payload.insert(keys::RECEIVED_AT.into(), json!(received_at.as_millis()));
    payload
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
