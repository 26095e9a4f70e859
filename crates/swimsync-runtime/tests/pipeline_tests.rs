//! Two-device pipeline tests over the loopback link
//!
//! A wrist pipeline (mock sensor platform) and a handheld pipeline run
//! against each other entirely in memory: commands flow handheld → wrist,
//! telemetry and status flow back, and parameters mirror in both directions.

use std::time::Duration;

use swimsync_harness::{loopback_pair, MockSensorPlatform};
use swimsync_runtime::{
    MessageKind, PeerMessage, Pipeline, PipelineBuilder, SessionCommand, SwimStyle, SwimsyncConfig,
    WatchStatus,
};

const DEADLINE: Duration = Duration::from_secs(2);

async fn next_message(
    rx: &mut tokio::sync::mpsc::UnboundedReceiver<PeerMessage>,
) -> PeerMessage {
    tokio::time::timeout(DEADLINE, rx.recv())
        .await
        .expect("message before deadline")
        .expect("stream open")
}

/// Wait until the mirrored pool length lands on the given pipeline
async fn wait_for_pool_length(pipeline: &Pipeline, meters: f64) {
    tokio::time::timeout(DEADLINE, async {
        while pipeline.state.pool_length() != meters {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("pool length mirrored before deadline");
}

/// Wrist + handheld pipelines wired through a loopback pair
fn two_device_setup() -> (Pipeline, Pipeline, MockSensorPlatform) {
    let (wrist_end, handheld_end) = loopback_pair(64);
    let platform = MockSensorPlatform::new();

    let wrist = PipelineBuilder::wrist()
        .with_config(SwimsyncConfig::testing())
        .with_sensor_platform(std::sync::Arc::new(platform.clone()))
        .with_peer_link(wrist_end.link, wrist_end.inbound, wrist_end.link_changes)
        .build()
        .expect("wrist pipeline builds");

    let handheld = PipelineBuilder::handheld()
        .with_config(SwimsyncConfig::testing())
        .with_peer_link(
            handheld_end.link,
            handheld_end.inbound,
            handheld_end.link_changes,
        )
        .build()
        .expect("handheld pipeline builds");

    (wrist, handheld, platform)
}

#[tokio::test]
async fn start_command_opens_exactly_one_session() {
    let (wrist, handheld, platform) = two_device_setup();
    let (_id, mut status_rx) = handheld.bus.subscribe(MessageKind::WatchStatus);

    assert!(
        handheld
            .bus
            .publish(PeerMessage::Command(SessionCommand::Start))
            .await
    );
    assert_eq!(
        next_message(&mut status_rx).await,
        PeerMessage::WatchStatus(WatchStatus::Started)
    );
    assert_eq!(platform.open_sessions(), 1);

    // a second start never leaves two concurrent sessions open
    handheld
        .bus
        .publish(PeerMessage::Command(SessionCommand::Start))
        .await;
    assert_eq!(
        next_message(&mut status_rx).await,
        PeerMessage::WatchStatus(WatchStatus::Started)
    );
    assert_eq!(platform.max_open_sessions(), 1);
    assert_eq!(platform.start_count(), 2);

    wrist.shutdown().await;
    handheld.shutdown().await;
}

#[tokio::test]
async fn stop_command_is_idempotent_and_reports_status() {
    let (wrist, handheld, platform) = two_device_setup();
    let (_id, mut status_rx) = handheld.bus.subscribe(MessageKind::WatchStatus);

    handheld
        .bus
        .publish(PeerMessage::Command(SessionCommand::Start))
        .await;
    assert_eq!(
        next_message(&mut status_rx).await,
        PeerMessage::WatchStatus(WatchStatus::Started)
    );

    for _ in 0..2 {
        handheld
            .bus
            .publish(PeerMessage::Command(SessionCommand::Stop))
            .await;
        assert_eq!(
            next_message(&mut status_rx).await,
            PeerMessage::WatchStatus(WatchStatus::Stopping)
        );
        assert_eq!(
            next_message(&mut status_rx).await,
            PeerMessage::WatchStatus(WatchStatus::Stopped)
        );
    }
    // the platform session was closed exactly once
    assert_eq!(platform.stop_count(), 1);
    assert_eq!(platform.open_sessions(), 0);

    wrist.shutdown().await;
    handheld.shutdown().await;
}

#[tokio::test]
async fn swim_scenario_produces_lap_ledger_and_telemetry() {
    let (wrist, handheld, platform) = two_device_setup();
    let (_id, mut lap_rx) = handheld.bus.subscribe(MessageKind::Lap);
    let (_sid, mut status_rx) = handheld.bus.subscribe(MessageKind::WatchStatus);

    // the handheld configures the pool, mirrored to the wrist
    handheld.state.set_pool_length(50.0).await;
    wait_for_pool_length(&wrist, 50.0).await;
    handheld
        .bus
        .publish(PeerMessage::Command(SessionCommand::Start))
        .await;
    assert_eq!(
        next_message(&mut status_rx).await,
        PeerMessage::WatchStatus(WatchStatus::Started)
    );

    // lap 1: 42 strokes, then the boundary that opens lap 2
    platform.emit_heart_rate(128.0).await;
    platform.emit_strokes(0).await;
    platform.emit_strokes(42).await;
    platform.emit_lap(1_000, 2).await;

    let lap1 = next_message(&mut lap_rx).await;
    assert_eq!(
        lap1,
        PeerMessage::Lap {
            number: 1,
            strokes: 42,
            distance: 50.0,
        }
    );

    // lap 2: up to 95 cumulative; a redelivered boundary (same source
    // timestamp) must not produce a duplicate record
    platform.emit_strokes(95).await;
    platform.emit_lap(1_000, 2).await;
    platform.emit_lap(2_000, 3).await;

    let lap2 = next_message(&mut lap_rx).await;
    assert_eq!(
        lap2,
        PeerMessage::Lap {
            number: 2,
            strokes: 53,
            distance: 50.0,
        }
    );

    handheld
        .bus
        .publish(PeerMessage::Command(SessionCommand::Stop))
        .await;
    assert_eq!(
        next_message(&mut status_rx).await,
        PeerMessage::WatchStatus(WatchStatus::Stopping)
    );
    assert_eq!(
        next_message(&mut status_rx).await,
        PeerMessage::WatchStatus(WatchStatus::Stopped)
    );

    let laps = wrist.laps();
    assert_eq!(laps.len(), 3);
    assert_eq!(laps[0].stroke_count, 42);
    assert_eq!(laps[1].stroke_count, 53);
    assert_eq!(laps[2].lap_number, 3);

    wrist.shutdown().await;
    handheld.shutdown().await;
}

#[tokio::test]
async fn parameters_flow_to_requesting_peer() {
    let (wrist, handheld, _platform) = two_device_setup();

    // handheld has a configuration; wrist asks for the full set
    handheld.state.set_pool_length(33.3).await;
    handheld.state.set_style(SwimStyle::Breast).await;
    handheld.state.set_target_distance(1000).await;

    assert!(wrist.state.request_all_parameters().await);
    let params = wrist.state.parameters();
    assert_eq!(params.pool_length, 33.3);
    assert_eq!(params.style, SwimStyle::Breast);
    assert_eq!(params.target_distance, 1000);
    assert!(params.is_ready);

    wrist.shutdown().await;
    handheld.shutdown().await;
}

#[tokio::test]
async fn unset_parameters_clear_readiness_and_touch_nothing() {
    let (wrist, handheld, _platform) = two_device_setup();

    // nothing configured on the handheld: it answers "parameters not set"
    assert!(!wrist.state.request_all_parameters().await);
    let params = wrist.state.parameters();
    assert_eq!(params.pool_length, 25.0);
    assert!(!params.is_ready);

    wrist.shutdown().await;
    handheld.shutdown().await;
}

#[tokio::test]
async fn pool_length_request_is_exclusive_while_pending() {
    let (wrist, handheld, _platform) = two_device_setup();
    handheld.state.set_pool_length(50.0).await;

    let racing = wrist.state.clone();
    let first = tokio::spawn(async move { racing.request_pool_length().await });
    tokio::task::yield_now().await;

    // back-to-back call while the first is outstanding
    let second = wrist.state.request_pool_length().await;
    let first = tokio::time::timeout(DEADLINE, first)
        .await
        .expect("first resolves")
        .expect("task completes");

    // exactly one of the two performed the request
    assert!(first ^ second, "one call wins, one is rejected");
    assert_eq!(wrist.state.pool_length(), 50.0);

    wrist.shutdown().await;
    handheld.shutdown().await;
}

#[tokio::test]
async fn reset_after_workout_clears_ledger_and_defaults() {
    let (wrist, handheld, platform) = two_device_setup();
    let (_id, mut status_rx) = handheld.bus.subscribe(MessageKind::WatchStatus);

    handheld.state.set_pool_length(50.0).await;
    wait_for_pool_length(&wrist, 50.0).await;
    handheld
        .bus
        .publish(PeerMessage::Command(SessionCommand::Start))
        .await;
    assert_eq!(
        next_message(&mut status_rx).await,
        PeerMessage::WatchStatus(WatchStatus::Started)
    );

    platform.emit_strokes(10).await;
    platform.emit_lap(500, 2).await;
    handheld
        .bus
        .publish(PeerMessage::Command(SessionCommand::Stop))
        .await;
    assert_eq!(
        next_message(&mut status_rx).await,
        PeerMessage::WatchStatus(WatchStatus::Stopping)
    );
    assert_eq!(
        next_message(&mut status_rx).await,
        PeerMessage::WatchStatus(WatchStatus::Stopped)
    );
    tokio::time::timeout(DEADLINE, async {
        while wrist.laps().is_empty() {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("ledger filled before deadline");

    wrist.state.reset_ready_state();
    // the aggregator clears its ledger on observing the reset
    tokio::time::timeout(DEADLINE, async {
        while !wrist.laps().is_empty() {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("ledger cleared before deadline");

    let params = wrist.state.parameters();
    assert_eq!(params.pool_length, 25.0);
    assert_eq!(params.style.code(), 0);
    assert_eq!(params.target_distance, 0);
    assert!(!params.is_ready);

    wrist.shutdown().await;
    handheld.shutdown().await;
}

#[tokio::test]
async fn platform_failure_retracts_started_status() {
    let (wrist, handheld, platform) = two_device_setup();
    let (_id, mut status_rx) = handheld.bus.subscribe(MessageKind::WatchStatus);

    handheld
        .bus
        .publish(PeerMessage::Command(SessionCommand::Start))
        .await;
    assert_eq!(
        next_message(&mut status_rx).await,
        PeerMessage::WatchStatus(WatchStatus::Started)
    );

    platform.fail_session("sensor hardware error").await;
    assert_eq!(
        next_message(&mut status_rx).await,
        PeerMessage::WatchStatus(WatchStatus::Stopped)
    );

    wrist.shutdown().await;
    handheld.shutdown().await;
}

#[tokio::test]
async fn failed_start_reports_stopped_not_started() {
    let (wrist, handheld, platform) = two_device_setup();
    let (_id, mut status_rx) = handheld.bus.subscribe(MessageKind::WatchStatus);

    platform.fail_next_start("no pool location permission");
    handheld
        .bus
        .publish(PeerMessage::Command(SessionCommand::Start))
        .await;

    // terminal for the attempt: no retry, the peer sees "stopped"
    assert_eq!(
        next_message(&mut status_rx).await,
        PeerMessage::WatchStatus(WatchStatus::Stopped)
    );
    assert_eq!(platform.open_sessions(), 0);

    wrist.shutdown().await;
    handheld.shutdown().await;
}
