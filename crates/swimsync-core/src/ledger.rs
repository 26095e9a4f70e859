//! Per-lap ledger built from cumulative sensor counters
//!
//! The sensor platform reports strokes as a monotonically increasing session
//! total and laps as discrete boundary events that can race with sample
//! delivery. This module folds both into an ordered sequence of per-lap
//! records. All mutation happens through one owner (the runtime aggregator
//! task); the ledger itself is a plain deterministic state machine driven by
//! a [`TimeSource`].

use core::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::AggregatorConfig;
use crate::params::DEFAULT_POOL_LENGTH_M;
use crate::types::{TimeSource, Timestamp};

// ----------------------------------------------------------------------------
// Lap Record
// ----------------------------------------------------------------------------

/// One completed (or in-flight) pool length.
///
/// The most recent record is mutated in place until the next lap boundary
/// finalizes it. `lap_number` is contiguous starting at 1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LapRecord {
    /// 1-based lap number
    pub lap_number: u32,
    /// Last time this record was touched
    pub timestamp: Timestamp,
    /// Strokes taken within this lap (delta of the cumulative counter)
    pub stroke_count: u32,
    /// Heart rate snapshot folded in at the last update, bpm
    pub heart_rate: f64,
    /// Lap distance in meters (the pool length at the last update)
    pub distance: f64,
}

// ----------------------------------------------------------------------------
// Lap Ledger
// ----------------------------------------------------------------------------

/// Folds cumulative stroke samples, heart-rate samples, and lap boundary
/// events into per-lap records.
pub struct LapLedger<T: TimeSource> {
    laps: Vec<LapRecord>,
    /// Last accepted cumulative stroke value; never decreases
    cumulative_strokes: u32,
    /// Cumulative value observed at the current lap's start boundary;
    /// only ever rolls forward
    strokes_at_lap_start: u32,
    current_lap: u32,
    /// Most-recent-value heart rate, folded into the next ledger update
    last_heart_rate: f64,
    pool_length: f64,
    quiet_interval: Duration,
    last_update: Option<Timestamp>,
    time_source: T,
}

impl<T: TimeSource> LapLedger<T> {
    /// Create an empty ledger
    pub fn new(config: &AggregatorConfig, time_source: T) -> Self {
        Self {
            laps: Vec::new(),
            cumulative_strokes: 0,
            strokes_at_lap_start: 0,
            current_lap: 1,
            last_heart_rate: 0.0,
            pool_length: DEFAULT_POOL_LENGTH_M,
            quiet_interval: config.quiet_interval,
            last_update: None,
            time_source,
        }
    }

    /// Set the pool length used as the distance of subsequent lap updates
    pub fn set_pool_length(&mut self, meters: f64) {
        if meters > 0.0 {
            self.pool_length = meters;
        }
    }

    /// Record a heart-rate sample. Most-recent-value semantics: it replaces
    /// the previous sample and is folded into the next lap update, never
    /// applied retroactively to finalized laps.
    pub fn record_heart_rate(&mut self, bpm: f64) {
        if bpm >= 0.0 {
            self.last_heart_rate = bpm;
        }
    }

    /// Record a cumulative stroke-count sample.
    ///
    /// The first sample of a session opens lap 1 immediately. Later samples
    /// update the current lap in place, debounced by the quiet interval.
    /// A sample below the tracked cumulative value never regresses it.
    /// Returns true when the ledger changed.
    pub fn record_strokes(&mut self, cumulative: u32) -> bool {
        if cumulative > self.cumulative_strokes {
            self.cumulative_strokes = cumulative;
        }
        let now = self.time_source.now();

        if self.laps.is_empty() {
            self.open_lap(self.current_lap, now);
            return true;
        }

        let quiet_elapsed = self
            .last_update
            .map(|last| now.duration_since(last) > self.quiet_interval)
            .unwrap_or(true);
        if quiet_elapsed {
            self.apply_current(now);
            return true;
        }
        false
    }

    /// Process a lap boundary event carrying the platform's lap index.
    ///
    /// A contiguous index finalizes the current lap, rolls the lap-start
    /// cumulative value forward, and opens a fresh zero-stroke record.
    /// Re-delivered or reordered indices correct the existing record instead
    /// of creating duplicates. Returns the finalized record, if one was
    /// produced by this event.
    pub fn lap_boundary(&mut self, index: u32) -> Option<LapRecord> {
        let now = self.time_source.now();

        if self.laps.is_empty() {
            // Boundary arrived before any sample: open the lap the platform
            // says we are in.
            self.current_lap = index.max(1);
            self.open_lap(self.current_lap, now);
            return None;
        }

        if index <= self.current_lap {
            if index == self.current_lap {
                // Redelivery of the boundary that opened the current lap:
                // recompute with the same inputs, which cannot double-count.
                self.apply_current(now);
            } else {
                // Boundary for an already-finalized lap; its delta was fixed
                // when the next lap opened. Leave it untouched.
                warn!(
                    index,
                    current = self.current_lap,
                    "stale lap boundary ignored"
                );
            }
            return None;
        }

        if index > self.current_lap + 1 {
            debug!(
                index,
                current = self.current_lap,
                "lap boundary skipped indices, adopting platform numbering"
            );
        }

        // Finalize the in-flight lap with the cumulative value held right
        // now (process-time snapshot), then roll forward.
        self.apply_current(now);
        let finalized = self.laps.last().cloned();
        self.strokes_at_lap_start = self.cumulative_strokes;
        self.current_lap = index;
        self.open_lap(index, now);
        finalized
    }

    /// Force one last update of the in-flight lap; called at session end.
    /// Idempotent: repeating it with the same inputs changes nothing.
    pub fn finalize(&mut self) -> bool {
        if self.laps.is_empty() {
            return false;
        }
        let now = self.time_source.now();
        self.apply_current(now);
        true
    }

    /// Clear every record and counter back to the initial state
    pub fn reset(&mut self) {
        self.laps.clear();
        self.cumulative_strokes = 0;
        self.strokes_at_lap_start = 0;
        self.current_lap = 1;
        self.last_heart_rate = 0.0;
        self.pool_length = DEFAULT_POOL_LENGTH_M;
        self.last_update = None;
    }

    /// The recorded laps, oldest first
    pub fn laps(&self) -> &[LapRecord] {
        &self.laps
    }

    /// Last accepted cumulative stroke value (session-relative total)
    pub fn cumulative_strokes(&self) -> u32 {
        self.cumulative_strokes
    }

    /// The lap currently being filled in
    pub fn current_lap(&self) -> u32 {
        self.current_lap
    }

    /// Most recent heart-rate sample, bpm
    pub fn last_heart_rate(&self) -> f64 {
        self.last_heart_rate
    }

    fn open_lap(&mut self, number: u32, now: Timestamp) {
        self.laps.push(LapRecord {
            lap_number: number,
            timestamp: now,
            stroke_count: self
                .cumulative_strokes
                .saturating_sub(self.strokes_at_lap_start),
            heart_rate: self.last_heart_rate,
            distance: self.pool_length,
        });
        self.last_update = Some(now);
    }

    /// Recompute the current lap's record in place from the tracked
    /// cumulative value. Update, not append.
    fn apply_current(&mut self, now: Timestamp) {
        let delta = self
            .cumulative_strokes
            .saturating_sub(self.strokes_at_lap_start);
        if let Some(entry) = self.laps.last_mut() {
            entry.stroke_count = delta;
            entry.heart_rate = self.last_heart_rate;
            entry.distance = self.pool_length;
            entry.timestamp = now;
        }
        self.last_update = Some(now);
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
