//! Append-only run writer.
//!
//! Layout of one run:
//!
//! ```text
//! <save_dir>/
//!   20260805_sweep_001/
//!     manifest.jsonl          one record per line: start, points, stop
//!     raw_data/
//!       20260805_spectrum_angle_85.00deg_t_0.1s_000.tsv
//!       20260805_spectrum_angle_85.00deg_t_0.1s_000_subtracted.txt
//!       ...
//! ```
//!
//! Every manifest append is flushed and fsynced before the call returns,
//! and data files are written before their manifest entry. A process that
//! dies mid-run therefore leaves a manifest whose every line is complete
//! and whose every referenced file exists — a valid prefix of the sweep.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::{debug, info};

use ase_core::error::{SweepError, SweepResult};
use ase_core::run::{
    PointOutcomeRecord, PointRecord, RunRecord, RunSink, RunStart, RunStop, ScanPoint,
};

/// Filesystem-backed run sink.
pub struct RunWriter {
    run_dir: PathBuf,
    raw_data_dir: PathBuf,
    manifest: File,
    date_stamp: String,
}

impl RunWriter {
    /// Create the next free run directory under `base_dir` and open its
    /// manifest.
    pub fn create(base_dir: &Path) -> SweepResult<Self> {
        fs::create_dir_all(base_dir)?;
        let date_stamp = Utc::now().format("%Y%m%d").to_string();

        let mut index = 1u32;
        let run_dir = loop {
            let candidate = base_dir.join(format!("{date_stamp}_sweep_{index:03}"));
            if !candidate.exists() {
                break candidate;
            }
            index += 1;
        };
        fs::create_dir(&run_dir)?;
        let raw_data_dir = run_dir.join("raw_data");
        fs::create_dir(&raw_data_dir)?;

        let manifest = OpenOptions::new()
            .create_new(true)
            .append(true)
            .open(run_dir.join("manifest.jsonl"))?;

        info!(run_dir = %run_dir.display(), "created run directory");
        Ok(Self {
            run_dir,
            raw_data_dir,
            manifest,
            date_stamp,
        })
    }

    /// Directory holding this run's manifest and data.
    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    fn append_record(&mut self, record: &RunRecord) -> SweepResult<()> {
        let line = serde_json::to_string(record).map_err(|err| {
            SweepError::Storage(std::io::Error::new(std::io::ErrorKind::InvalidData, err))
        })?;
        writeln!(self.manifest, "{line}")?;
        self.manifest.flush()?;
        self.manifest.sync_data()?;
        Ok(())
    }

    fn point_basename(&self, point: &ScanPoint) -> String {
        format!(
            "{}_spectrum_angle_{:.2}deg_t_{}s_{:03}",
            self.date_stamp, point.angle_degrees, point.integration_time_s, point.seq
        )
    }

    fn write_net_text(&self, path: &Path, point: &ScanPoint) -> SweepResult<()> {
        let mut out = String::new();
        out.push_str(&format!(
            "# Date: {}\n",
            point.net.meta.acquired_at.format("%Y%m%d-%H%M%S")
        ));
        out.push_str(&format!("# Angle (deg): {:.2}\n", point.angle_degrees));
        out.push_str(&format!(
            "# Integration time (s): {}\n",
            point.integration_time_s
        ));
        out.push_str(&format!(
            "# Accumulations: {}\n",
            point.signal.meta.accumulations
        ));
        out.push_str(&format!(
            "# Background: {}\n",
            if point.background_from_cache {
                "cached"
            } else {
                "fresh"
            }
        ));
        out.push_str("# ---\n");
        out.push_str("# Wavelength (nm), Intensity (counts, signal - background)\n");
        for (wavelength, counts) in point.net.wavelength_nm.iter().zip(point.net.counts.iter()) {
            out.push_str(&format!("{wavelength:.4}, {counts:.2}\n"));
        }
        fs::write(path, out)?;
        Ok(())
    }
}

impl RunSink for RunWriter {
    fn open(&mut self, start: &RunStart) -> SweepResult<()> {
        self.append_record(&RunRecord::Start(start.clone()))
    }

    fn record_point(&mut self, point: &ScanPoint) -> SweepResult<()> {
        let base = self.point_basename(point);
        let signal_file = format!("{base}.tsv");
        let net_file = format!("{base}_subtracted.txt");

        // data files land before the manifest entry that references them
        fs::write(self.raw_data_dir.join(&signal_file), &point.native_signal)?;
        self.write_net_text(&self.raw_data_dir.join(&net_file), point)?;
        debug!(%signal_file, %net_file, "wrote point data files");

        self.append_record(&RunRecord::Point(PointRecord {
            seq: point.seq,
            angle_degrees: point.angle_degrees,
            recorded_at: Utc::now(),
            outcome: PointOutcomeRecord::Completed {
                integration_time_s: point.integration_time_s,
                max_counts: point.max_counts,
                background_from_cache: point.background_from_cache,
                signal_file,
                net_file,
            },
        }))
    }

    fn record_failure(&mut self, seq: u32, angle_degrees: f64, reason: &str) -> SweepResult<()> {
        self.append_record(&RunRecord::Point(PointRecord {
            seq,
            angle_degrees,
            recorded_at: Utc::now(),
            outcome: PointOutcomeRecord::Failed {
                reason: reason.to_string(),
            },
        }))
    }

    fn close(&mut self, stop: &RunStop) -> SweepResult<()> {
        self.append_record(&RunRecord::Stop(stop.clone()))?;
        self.manifest.sync_all()?;
        info!(
            status = %stop.status,
            points = stop.points_attempted,
            "closed run manifest"
        );
        Ok(())
    }
}
