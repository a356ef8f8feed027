//! Run diagnostics: tick counts, per-stage timing, budget overruns.
//!
//! Collected by the [`Application`](crate::Application) while it runs
//! and available once it reaches `Terminated`. Durations are serialized
//! as fractional seconds (`f64`) since `std::time::Duration` does not
//! implement serde traits.

use std::fmt::Write as _;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Serde support for `std::time::Duration` as fractional seconds.
mod duration_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    /// Serialize a `Duration` as fractional seconds (`f64`).
    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        duration.as_secs_f64().serialize(serializer)
    }

    /// Deserialize a `Duration` from fractional seconds (`f64`).
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(|_| {
            serde::de::Error::custom(
                "duration seconds must be finite, non-negative, and representable as a Duration",
            )
        })
    }
}

/// Diagnostics for one complete run of an application.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunDiagnostics {
    /// Number of ticks started.
    pub ticks: u64,
    /// Whether a halt was requested while stages were being attached.
    pub init_failed: bool,
    /// Ticks cut short by a stage returning `SkipFrame`.
    pub skipped_frames: u64,
    /// Updates that returned an error (each one halts the pipeline).
    pub failed_updates: u64,
    /// Ticks that exceeded the configured tick budget.
    pub budget_overruns: u64,
    /// Per-stage timing, in registration order.
    pub stages: Vec<StageDiagnostics>,
}

impl RunDiagnostics {
    /// Human-readable multi-line report.
    #[must_use]
    pub fn report(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Ticks: {}", self.ticks);
        if self.init_failed {
            let _ = writeln!(out, "Initialization failed: no ticks were run");
        }
        let _ = writeln!(out, "Skipped frames: {}", self.skipped_frames);
        let _ = writeln!(out, "Failed updates: {}", self.failed_updates);
        let _ = writeln!(out, "Budget overruns: {}", self.budget_overruns);
        let _ = writeln!(out);
        let _ = writeln!(
            out,
            "{:<4} {:<20} {:>8} {:>12} {:>12}",
            "#", "Stage", "Updates", "Mean (ms)", "Max (ms)"
        );
        let _ = writeln!(out, "{}", "-".repeat(60));
        for stage in &self.stages {
            let _ = writeln!(
                out,
                "{:<4} {:<20} {:>8} {:>12.3} {:>12.3}",
                stage.index,
                stage.name,
                stage.updates,
                stage.mean().as_secs_f64() * 1000.0,
                stage.max.as_secs_f64() * 1000.0,
            );
        }
        out
    }
}

/// Timing for one stage across a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageDiagnostics {
    /// Stage name.
    pub name: String,
    /// Registration index.
    pub index: usize,
    /// Number of `update` calls.
    pub updates: u64,
    /// Summed wall-clock time of all `update` calls (seconds).
    #[serde(with = "duration_serde")]
    pub total: Duration,
    /// Slowest single `update` call (seconds).
    #[serde(with = "duration_serde")]
    pub max: Duration,
}

impl StageDiagnostics {
    pub(crate) const fn new(name: String, index: usize) -> Self {
        Self {
            name,
            index,
            updates: 0,
            total: Duration::ZERO,
            max: Duration::ZERO,
        }
    }

    /// Account for one `update` call.
    pub(crate) fn record(&mut self, elapsed: Duration) {
        self.updates += 1;
        self.total += elapsed;
        self.max = self.max.max(elapsed);
    }

    /// Mean `update` duration, zero when the stage never ran.
    #[must_use]
    pub fn mean(&self) -> Duration {
        u32::try_from(self.updates)
            .ok()
            .filter(|&n| n > 0)
            .map_or(Duration::ZERO, |n| self.total / n)
    }
}
