//! Command-line interface definition

use clap::Parser;

/// Run the SwimSync telemetry pipeline against a scripted swim
#[derive(Debug, Parser)]
#[command(name = "swimsync", version, about)]
pub struct Cli {
    /// Pool length in meters
    #[arg(long)]
    pub pool_length: Option<f64>,

    /// Number of laps in the scripted swim
    #[arg(long)]
    pub laps: Option<u32>,

    /// Strokes per lap in the scripted swim
    #[arg(long)]
    pub strokes_per_lap: Option<u32>,

    /// Milliseconds of simulated time per lap
    #[arg(long)]
    pub lap_millis: Option<u64>,

    /// Log filter, e.g. "info" or "swimsync_runtime=debug"
    #[arg(long, default_value = "info")]
    pub log: String,

    /// Path to a TOML configuration file (defaults to the platform
    /// configuration directory)
    #[arg(long)]
    pub config: Option<std::path::PathBuf>,
}
