//! Run records and the persistence boundary.
//!
//! A run is persisted as an ordered stream of records:
//!
//! ```text
//! RunStart (1)
//!    │
//!    ├── PointRecord (N, one per attempted angle, in sweep order)
//!    │
//! RunStop (1, Completed or Aborted)
//! ```
//!
//! Records are appended one at a time as each angle completes, so a run
//! that dies mid-sweep leaves a valid prefix: every record present is
//! fully formed, and the attempted points can be recovered verbatim.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::data::Spectrum;
use crate::error::SweepResult;

/// Generate a new unique run identifier.
pub fn new_run_id() -> String {
    Uuid::new_v4().to_string()
}

/// Record stream entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunRecord {
    /// First record of every run: intent and sweep parameters.
    Start(RunStart),
    /// One attempted angle, successful or failed.
    Point(PointRecord),
    /// Last record of every gracefully closed run.
    Stop(RunStop),
}

/// Run-level metadata, written before the first point.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunStart {
    /// Unique run identifier.
    pub run_id: String,
    /// Run creation timestamp.
    pub created_at: DateTime<Utc>,
    /// First angle of the sweep, degrees.
    pub start_angle_deg: f64,
    /// Last angle of the sweep, degrees.
    pub end_angle_deg: f64,
    /// Number of sweep points.
    pub points: u32,
    /// Spectrometer center wavelength, nanometers.
    pub target_wavelength_nm: f64,
    /// Grating turret index used for the run.
    pub grating_index: u32,
    /// Integration-time presets, longest first, seconds.
    pub presets_s: Vec<f64>,
    /// Hard saturation threshold in counts.
    pub saturation_threshold: f64,
}

/// Outcome of one attempted angle.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PointOutcomeRecord {
    /// The point was acquired and its files written.
    Completed {
        /// Integration time that produced the accepted frame, seconds.
        integration_time_s: f64,
        /// Peak raw counts of the accepted signal frame.
        max_counts: f64,
        /// True when the background came from the run cache rather than
        /// a fresh trigger-off acquisition.
        background_from_cache: bool,
        /// File name of the native-format signal export, relative to the
        /// run's raw-data directory.
        signal_file: String,
        /// File name of the background-subtracted text spectrum.
        net_file: String,
    },
    /// The point could not be acquired; the sweep moved on.
    Failed {
        /// Why the point failed (e.g. every preset saturated).
        reason: String,
    },
}

/// Manifest entry for one attempted angle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PointRecord {
    /// Zero-based position in the sweep sequence.
    pub seq: u32,
    /// Target angle, degrees.
    pub angle_degrees: f64,
    /// Acquisition timestamp for this point.
    pub recorded_at: DateTime<Utc>,
    /// What happened.
    pub outcome: PointOutcomeRecord,
}

/// Terminal status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Every angle in the sweep was attempted and the manifest closed.
    Completed,
    /// The run ended early: fatal device error, failed precondition, or
    /// external cancellation. The manifest still closed with the prefix
    /// of points committed before the abort.
    Aborted,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Completed => write!(f, "completed"),
            RunStatus::Aborted => write!(f, "aborted"),
        }
    }
}

/// Closing record of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunStop {
    /// Run identifier, matching the start record.
    pub run_id: String,
    /// Terminal status.
    pub status: RunStatus,
    /// Failure reason; present when `status` is aborted.
    pub reason: Option<String>,
    /// Number of points attempted (committed to the manifest).
    pub points_attempted: u32,
    /// Close timestamp.
    pub finished_at: DateTime<Utc>,
}

/// Fully acquired scan point, ready to persist.
///
/// The invariant established by the acquisition pipeline: `signal`,
/// `background` and `net` were all taken (or derived from frames taken)
/// at `integration_time_s`, with identical sample counts.
#[derive(Debug, Clone)]
pub struct ScanPoint {
    /// Zero-based position in the sweep sequence.
    pub seq: u32,
    /// Stage angle for this point, degrees.
    pub angle_degrees: f64,
    /// Integration time of the accepted frame, seconds.
    pub integration_time_s: f64,
    /// Peak raw counts of the accepted signal frame, before smoothing.
    pub max_counts: f64,
    /// Denoised signal frame (trigger on).
    pub signal: Spectrum,
    /// Denoised background frame (trigger off), shared with the run cache.
    pub background: Arc<Spectrum>,
    /// Background-subtracted net spectrum.
    pub net: Spectrum,
    /// True when the background was reused from the cache.
    pub background_from_cache: bool,
    /// Native-format export of the signal frame.
    pub native_signal: Vec<u8>,
}

/// Persistence boundary for a run.
///
/// Exactly one writer exists per run and records arrive strictly in sweep
/// order. Implementations must make each call durable before returning,
/// so that a crash between calls preserves every prior record.
pub trait RunSink: Send {
    /// Persist the run-start record. Called once, before any point.
    fn open(&mut self, start: &RunStart) -> SweepResult<()>;

    /// Persist a completed point (manifest entry plus its data files).
    fn record_point(&mut self, point: &ScanPoint) -> SweepResult<()>;

    /// Persist a failed point.
    fn record_failure(&mut self, seq: u32, angle_degrees: f64, reason: &str) -> SweepResult<()>;

    /// Close the run with its terminal record.
    fn close(&mut self, stop: &RunStop) -> SweepResult<()>;
}
