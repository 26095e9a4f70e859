//! SwimSync demo binary
//!
//! Builds a wrist pipeline (scripted sensor platform) and a handheld
//! pipeline connected through an in-memory loopback link, runs a scripted
//! swim through them, and prints the resulting lap ledger.

mod cli;
mod config;

use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use swimsync_harness::{loopback_pair, MockSensorPlatform};
use swimsync_runtime::{
    MessageKind, PeerMessage, PipelineBuilder, SessionCommand, SwimsyncConfig,
};

use crate::cli::Cli;
use crate::config::DemoConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Cli::parse();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_new(&args.log).context("invalid log filter")?,
        )
        .init();

    let demo = DemoConfig::resolve(&args)?;
    info!(?demo, "starting scripted swim");

    // Wire the two devices back to back.
    let (wrist_end, handheld_end) = loopback_pair(64);
    let platform = MockSensorPlatform::new();

    let mut pipeline_config = SwimsyncConfig::default();
    // keep the demo snappy: update the in-flight lap every 50ms of quiet
    pipeline_config.aggregator.quiet_interval = Duration::from_millis(50);

    let wrist = PipelineBuilder::wrist()
        .with_config(pipeline_config.clone())
        .with_sensor_platform(std::sync::Arc::new(platform.clone()))
        .with_peer_link(wrist_end.link, wrist_end.inbound, wrist_end.link_changes)
        .build()
        .context("building wrist pipeline")?;
    let handheld = PipelineBuilder::handheld()
        .with_config(pipeline_config)
        .with_peer_link(
            handheld_end.link,
            handheld_end.inbound,
            handheld_end.link_changes,
        )
        .build()
        .context("building handheld pipeline")?;

    // The handheld watches the wrist's status and the finalized laps.
    let (_status_id, mut status_rx) = handheld.bus.subscribe(MessageKind::WatchStatus);
    let (_lap_id, mut lap_rx) = handheld.bus.subscribe(MessageKind::Lap);

    // Configure and start the workout from the handheld; wait for the pool
    // length to mirror onto the wrist before the session opens.
    handheld.state.set_pool_length(demo.pool_length).await;
    tokio::time::timeout(Duration::from_secs(5), async {
        while wrist.state.pool_length() != demo.pool_length {
            tokio::task::yield_now().await;
        }
    })
    .await
    .context("pool length never mirrored to the wrist")?;
    handheld
        .bus
        .publish(PeerMessage::Command(SessionCommand::Start))
        .await;
    wait_for_status(&mut status_rx, "started").await?;
    info!("wrist reported the workout as started");

    // Script the swim: each lap emits heart rate and stroke samples, then
    // the boundary event that finalizes it.
    let mut cumulative_strokes = 0u32;
    for lap in 1..=demo.laps {
        let bpm = 110.0 + f64::from(lap) * 4.0;
        platform.emit_heart_rate(bpm).await;

        let step = demo.strokes_per_lap.max(1) / 2;
        for _ in 0..2 {
            cumulative_strokes += step;
            platform.emit_strokes(cumulative_strokes).await;
            tokio::time::sleep(Duration::from_millis(demo.lap_millis / 2)).await;
        }
        platform
            .emit_lap(u64::from(lap) * demo.lap_millis, lap + 1)
            .await;

        if let Some(PeerMessage::Lap {
            number,
            strokes,
            distance,
        }) = recv_lap(&mut lap_rx).await
        {
            info!(number, strokes, distance, bpm, "lap finalized");
        }
    }

    // Stop and collect the ledger.
    handheld
        .bus
        .publish(PeerMessage::Command(SessionCommand::Stop))
        .await;
    wait_for_status(&mut status_rx, "stopped").await?;

    println!("\n lap  strokes  heart rate  distance");
    println!(" ---  -------  ----------  --------");
    for record in wrist.laps() {
        println!(
            " {:>3}  {:>7}  {:>10.0}  {:>7.1}m",
            record.lap_number, record.stroke_count, record.heart_rate, record.distance
        );
    }

    wrist.shutdown().await;
    handheld.shutdown().await;
    Ok(())
}

async fn wait_for_status(
    rx: &mut tokio::sync::mpsc::UnboundedReceiver<PeerMessage>,
    wanted: &str,
) -> anyhow::Result<()> {
    loop {
        let message = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .context("timed out waiting for watch status")?
            .context("status stream closed")?;
        if let PeerMessage::WatchStatus(status) = message {
            if status.as_str() == wanted {
                return Ok(());
            }
        }
    }
}

async fn recv_lap(
    rx: &mut tokio::sync::mpsc::UnboundedReceiver<PeerMessage>,
) -> Option<PeerMessage> {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .ok()
        .flatten()
}
