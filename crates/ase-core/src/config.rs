//! Run configuration.
//!
//! The configuration is read once at startup (TOML file plus `ASE_*`
//! environment overrides) and never reloaded: edits after the sweep has
//! started do not take effect. Defaults reproduce the values the
//! instrument is normally operated with, so an empty file is a valid,
//! runnable configuration for the simulated bench.

use std::path::{Path, PathBuf};

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::error::SweepError;

/// Angle sweep range.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    /// First angle of the sweep, degrees.
    #[serde(default = "default_start_deg")]
    pub start_deg: f64,
    /// Last angle of the sweep, degrees.
    #[serde(default = "default_end_deg")]
    pub end_deg: f64,
    /// Number of points, linearly spaced between start and end.
    #[serde(default = "default_points")]
    pub points: u32,
}

fn default_start_deg() -> f64 {
    85.0
}

fn default_end_deg() -> f64 {
    280.0
}

fn default_points() -> u32 {
    50
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            start_deg: default_start_deg(),
            end_deg: default_end_deg(),
            points: default_points(),
        }
    }
}

/// Auto-ranging acquisition parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcquisitionConfig {
    /// Integration-time presets in seconds, longest (most sensitive)
    /// first. The step-down selector walks this list toward shorter
    /// times when a frame saturates.
    #[serde(default = "default_presets_s")]
    pub presets_s: Vec<f64>,
    /// Hard saturation threshold in counts: a frame containing any sample
    /// at or above this value is discarded.
    #[serde(default = "default_saturation_threshold")]
    pub saturation_threshold: f64,
    /// Soft threshold in counts. A successful frame peaking above this
    /// starts the next angle one preset shorter. `None` disables the
    /// proactive step-down.
    #[serde(default = "default_warning_threshold")]
    pub warning_threshold: Option<f64>,
    /// On-detector accumulations per frame.
    #[serde(default = "default_accumulations")]
    pub accumulations: u32,
    /// Boxcar denoiser window in samples; 0 or 1 disables smoothing.
    #[serde(default = "default_denoiser_window")]
    pub denoiser_window: u32,
    /// Start each angle at the time that last succeeded, instead of the
    /// longest preset.
    #[serde(default = "default_true")]
    pub resume_from_last: bool,
    /// Settle pause after a stage move, seconds.
    #[serde(default = "default_pause_after_move_s")]
    pub pause_after_move_s: f64,
    /// Settle pause after toggling the trigger, seconds.
    #[serde(default = "default_trigger_settle_s")]
    pub trigger_settle_s: f64,
}

fn default_presets_s() -> Vec<f64> {
    vec![4.0, 0.1]
}

fn default_saturation_threshold() -> f64 {
    65_530.0
}

fn default_warning_threshold() -> Option<f64> {
    Some(50_000.0)
}

fn default_accumulations() -> u32 {
    1
}

fn default_denoiser_window() -> u32 {
    5
}

fn default_true() -> bool {
    true
}

fn default_pause_after_move_s() -> f64 {
    0.5
}

fn default_trigger_settle_s() -> f64 {
    0.5
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            presets_s: default_presets_s(),
            saturation_threshold: default_saturation_threshold(),
            warning_threshold: default_warning_threshold(),
            accumulations: default_accumulations(),
            denoiser_window: default_denoiser_window(),
            resume_from_last: default_true(),
            pause_after_move_s: default_pause_after_move_s(),
            trigger_settle_s: default_trigger_settle_s(),
        }
    }
}

/// Detector cooling precondition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoolingConfig {
    /// Cooling setpoint, degrees Celsius.
    #[serde(default = "default_cooling_target_c")]
    pub target_c: f64,
    /// The sweep may start once the detector is at or below this
    /// temperature, degrees Celsius.
    #[serde(default = "default_ready_threshold_c")]
    pub ready_threshold_c: f64,
    /// Temperature poll interval, seconds.
    #[serde(default = "default_poll_interval_s")]
    pub poll_interval_s: f64,
    /// Maximum total wait for the detector to cool, seconds.
    #[serde(default = "default_cooling_timeout_s")]
    pub timeout_s: f64,
    /// Abort the run when the timeout expires. When false, the timeout
    /// logs a warning and the sweep proceeds with a warm detector.
    #[serde(default = "default_true")]
    pub abort_on_timeout: bool,
}

fn default_cooling_target_c() -> f64 {
    -70.0
}

fn default_ready_threshold_c() -> f64 {
    -50.0
}

fn default_poll_interval_s() -> f64 {
    5.0
}

fn default_cooling_timeout_s() -> f64 {
    600.0
}

impl Default for CoolingConfig {
    fn default() -> Self {
        Self {
            target_c: default_cooling_target_c(),
            ready_threshold_c: default_ready_threshold_c(),
            poll_interval_s: default_poll_interval_s(),
            timeout_s: default_cooling_timeout_s(),
            abort_on_timeout: default_true(),
        }
    }
}

/// Spectrometer preconditioning parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpectrometerConfig {
    /// Center wavelength for the sweep, nanometers.
    #[serde(default = "default_wavelength_nm")]
    pub target_wavelength_nm: f64,
    /// Grating turret index to use.
    #[serde(default = "default_grating_index")]
    pub grating_index: u32,
    /// Detector cooling precondition.
    #[serde(default)]
    pub cooling: CoolingConfig,
}

fn default_wavelength_nm() -> f64 {
    450.0
}

fn default_grating_index() -> u32 {
    1
}

impl Default for SpectrometerConfig {
    fn default() -> Self {
        Self {
            target_wavelength_nm: default_wavelength_nm(),
            grating_index: default_grating_index(),
            cooling: CoolingConfig::default(),
        }
    }
}

/// Pulse generator setup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PulserConfig {
    /// Output pulse width, seconds.
    #[serde(default = "default_pulse_width_s")]
    pub pulse_width_s: f64,
    /// Pulse repetition period, seconds.
    #[serde(default = "default_pulse_period_s")]
    pub pulse_period_s: f64,
    /// Output amplitude, volts.
    #[serde(default = "default_amplitude_v")]
    pub amplitude_v: f64,
}

fn default_pulse_width_s() -> f64 {
    5e-6
}

fn default_pulse_period_s() -> f64 {
    0.1
}

fn default_amplitude_v() -> f64 {
    5.0
}

impl Default for PulserConfig {
    fn default() -> Self {
        Self {
            pulse_width_s: default_pulse_width_s(),
            pulse_period_s: default_pulse_period_s(),
            amplitude_v: default_amplitude_v(),
        }
    }
}

/// Failure handling policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Keep sweeping after a point exhausts every preset. When false, the
    /// first exhausted point aborts the run.
    #[serde(default = "default_true")]
    pub continue_after_exhausted_presets: bool,
    /// Abort the run on the first adapter failure mid-sweep.
    #[serde(default = "default_true")]
    pub abort_on_device_error: bool,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            continue_after_exhausted_presets: default_true(),
            abort_on_device_error: default_true(),
        }
    }
}

/// Complete run configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepConfig {
    /// Base directory under which run directories are created.
    #[serde(default = "default_save_dir")]
    pub save_dir: PathBuf,
    /// Angle sweep range.
    #[serde(default)]
    pub scan: ScanConfig,
    /// Auto-ranging acquisition parameters.
    #[serde(default)]
    pub acquisition: AcquisitionConfig,
    /// Spectrometer preconditioning.
    #[serde(default)]
    pub spectrometer: SpectrometerConfig,
    /// Pulse generator setup.
    #[serde(default)]
    pub pulser: PulserConfig,
    /// Failure handling policy.
    #[serde(default)]
    pub policy: PolicyConfig,
}

fn default_save_dir() -> PathBuf {
    PathBuf::from("data")
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            save_dir: default_save_dir(),
            scan: ScanConfig::default(),
            acquisition: AcquisitionConfig::default(),
            spectrometer: SpectrometerConfig::default(),
            pulser: PulserConfig::default(),
            policy: PolicyConfig::default(),
        }
    }
}

impl SweepConfig {
    /// Load configuration from an optional TOML file with `ASE_*`
    /// environment overrides layered on top of the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, SweepError> {
        let mut figment = Figment::from(Serialized::defaults(SweepConfig::default()));
        if let Some(path) = path {
            if !path.exists() {
                return Err(SweepError::Config(format!(
                    "config file not found: {}",
                    path.display()
                )));
            }
            figment = figment.merge(Toml::file(path));
        }
        let config: SweepConfig = figment
            .merge(Env::prefixed("ASE_").split("__"))
            .extract()
            .map_err(|e| SweepError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Semantic validation beyond what deserialization enforces.
    pub fn validate(&self) -> Result<(), SweepError> {
        if self.scan.points == 0 {
            return Err(SweepError::Config("scan.points must be at least 1".into()));
        }
        if self.acquisition.presets_s.is_empty() {
            return Err(SweepError::Config(
                "acquisition.presets_s must not be empty".into(),
            ));
        }
        if self.acquisition.presets_s.iter().any(|&t| t <= 0.0) {
            return Err(SweepError::Config(
                "acquisition.presets_s entries must be positive".into(),
            ));
        }
        if self
            .acquisition
            .presets_s
            .windows(2)
            .any(|pair| pair[1] >= pair[0])
        {
            return Err(SweepError::Config(
                "acquisition.presets_s must be strictly decreasing (longest first)".into(),
            ));
        }
        if self.acquisition.saturation_threshold <= 0.0 {
            return Err(SweepError::Config(
                "acquisition.saturation_threshold must be positive".into(),
            ));
        }
        if self.acquisition.accumulations == 0 {
            return Err(SweepError::Config(
                "acquisition.accumulations must be at least 1".into(),
            ));
        }
        if self.acquisition.pause_after_move_s < 0.0 || self.acquisition.trigger_settle_s < 0.0 {
            return Err(SweepError::Config("settle pauses must not be negative".into()));
        }
        if self.spectrometer.cooling.poll_interval_s <= 0.0 {
            return Err(SweepError::Config(
                "spectrometer.cooling.poll_interval_s must be positive".into(),
            ));
        }
        if self.spectrometer.cooling.timeout_s < 0.0 {
            return Err(SweepError::Config(
                "spectrometer.cooling.timeout_s must not be negative".into(),
            ));
        }
        if self.pulser.pulse_width_s <= 0.0 || self.pulser.pulse_period_s <= 0.0 {
            return Err(SweepError::Config(
                "pulser pulse width and period must be positive".into(),
            ));
        }
        if self.pulser.pulse_width_s >= self.pulser.pulse_period_s {
            return Err(SweepError::Config(
                "pulser.pulse_width_s must be shorter than pulse_period_s".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let config = SweepConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.acquisition.presets_s, vec![4.0, 0.1]);
        assert_eq!(config.scan.points, 50);
    }

    #[test]
    fn rejects_non_descending_presets() {
        let mut config = SweepConfig::default();
        config.acquisition.presets_s = vec![0.1, 4.0];
        assert!(matches!(config.validate(), Err(SweepError::Config(_))));

        config.acquisition.presets_s = vec![1.0, 1.0];
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_empty_presets_and_zero_points() {
        let mut config = SweepConfig::default();
        config.acquisition.presets_s.clear();
        assert!(config.validate().is_err());

        let mut config = SweepConfig::default();
        config.scan.points = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_pulse_width_at_or_above_period() {
        let mut config = SweepConfig::default();
        config.pulser.pulse_width_s = config.pulser.pulse_period_s;
        assert!(config.validate().is_err());
    }

    #[test]
    fn loads_toml_over_defaults() {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .unwrap();
        writeln!(
            file,
            "[scan]\nstart_deg = 10.0\nend_deg = 20.0\npoints = 3\n\n\
             [acquisition]\npresets_s = [2.0, 0.5, 0.05]"
        )
        .unwrap();

        let config = SweepConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.scan.start_deg, 10.0);
        assert_eq!(config.scan.points, 3);
        assert_eq!(config.acquisition.presets_s, vec![2.0, 0.5, 0.05]);
        // untouched sections keep their defaults
        assert_eq!(config.spectrometer.target_wavelength_nm, 450.0);
    }

    #[test]
    fn missing_file_is_an_error() {
        let err = SweepConfig::load(Some(Path::new("/nonexistent/sweep.toml"))).unwrap_err();
        assert!(matches!(err, SweepError::Config(_)));
    }

    #[test]
    fn invalid_file_values_fail_validation() {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .unwrap();
        writeln!(file, "[acquisition]\npresets_s = []").unwrap();
        assert!(SweepConfig::load(Some(file.path())).is_err());
    }
}
