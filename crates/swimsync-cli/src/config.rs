//! Demo configuration
//!
//! Values come from three layers, weakest first: built-in defaults, an
//! optional TOML file in the platform configuration directory, and the
//! command line.

use std::fs;
use std::path::PathBuf;

use anyhow::Context;
use serde::Deserialize;

use crate::cli::Cli;

/// Scripted-swim parameters
#[derive(Debug, Clone)]
pub struct DemoConfig {
    pub pool_length: f64,
    pub laps: u32,
    pub strokes_per_lap: u32,
    pub lap_millis: u64,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            pool_length: 25.0,
            laps: 6,
            strokes_per_lap: 20,
            lap_millis: 400,
        }
    }
}

/// On-disk representation; every field optional so partial files work
#[derive(Debug, Default, Deserialize)]
struct DemoConfigFile {
    pool_length: Option<f64>,
    laps: Option<u32>,
    strokes_per_lap: Option<u32>,
    lap_millis: Option<u64>,
}

impl DemoConfig {
    /// Resolve the configuration from defaults, file, and CLI flags
    pub fn resolve(cli: &Cli) -> anyhow::Result<Self> {
        let mut config = Self::default();

        if let Some(path) = cli.config.clone().or_else(default_config_path) {
            if path.exists() {
                let raw = fs::read_to_string(&path)
                    .with_context(|| format!("reading {}", path.display()))?;
                let file: DemoConfigFile = toml::from_str(&raw)
                    .with_context(|| format!("parsing {}", path.display()))?;
                if let Some(value) = file.pool_length {
                    config.pool_length = value;
                }
                if let Some(value) = file.laps {
                    config.laps = value;
                }
                if let Some(value) = file.strokes_per_lap {
                    config.strokes_per_lap = value;
                }
                if let Some(value) = file.lap_millis {
                    config.lap_millis = value;
                }
            }
        }

        if let Some(value) = cli.pool_length {
            config.pool_length = value;
        }
        if let Some(value) = cli.laps {
            config.laps = value;
        }
        if let Some(value) = cli.strokes_per_lap {
            config.strokes_per_lap = value;
        }
        if let Some(value) = cli.lap_millis {
            config.lap_millis = value;
        }

        anyhow::ensure!(config.pool_length > 0.0, "pool length must be positive");
        anyhow::ensure!(config.laps > 0, "at least one lap is required");
        anyhow::ensure!(config.lap_millis > 0, "lap duration must be positive");
        Ok(config)
    }
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("swimsync").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_cli_overrides_defaults() {
        let cli = Cli::parse_from([
            "swimsync",
            "--config",
            "/nonexistent/swimsync.toml",
            "--pool-length",
            "50",
            "--laps",
            "4",
        ]);
        let config = DemoConfig::resolve(&cli).expect("valid config");
        assert_eq!(config.pool_length, 50.0);
        assert_eq!(config.laps, 4);
        assert_eq!(config.strokes_per_lap, DemoConfig::default().strokes_per_lap);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let cli = Cli::parse_from(["swimsync", "--pool-length", "0"]);
        assert!(DemoConfig::resolve(&cli).is_err());
    }
}
