//! Spectrum data model.
//!
//! A [`Spectrum`] is one captured readout: an ordered wavelength axis, a
//! counts array of the same length, and the acquisition metadata needed to
//! label it unambiguously. Spectra are immutable once acquired; every
//! processing step (smoothing, subtraction) returns a new value.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Acquisition conditions attached to every captured spectrum.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcquisitionMeta {
    /// Integration (exposure) time in seconds.
    pub integration_time_s: f64,
    /// Number of on-detector accumulations summed into this readout.
    pub accumulations: u32,
    /// Whether the excitation trigger was enabled during the exposure.
    pub trigger_on: bool,
    /// Filter-wheel angle at acquisition time, if the stage was positioned.
    pub angle_degrees: Option<f64>,
    /// Wall-clock acquisition timestamp.
    pub acquired_at: DateTime<Utc>,
}

/// One captured spectrum with its acquisition metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Spectrum {
    /// Wavelength axis in nanometers, ascending.
    pub wavelength_nm: Vec<f64>,
    /// Intensity per sample, in detector counts.
    pub counts: Vec<f64>,
    /// Acquisition conditions.
    pub meta: AcquisitionMeta,
}

impl Spectrum {
    /// Build a spectrum, checking that axis and counts line up.
    pub fn new(
        wavelength_nm: Vec<f64>,
        counts: Vec<f64>,
        meta: AcquisitionMeta,
    ) -> Result<Self, String> {
        if wavelength_nm.len() != counts.len() {
            return Err(format!(
                "axis/counts length mismatch: {} vs {}",
                wavelength_nm.len(),
                counts.len()
            ));
        }
        if wavelength_nm.is_empty() {
            return Err("empty spectrum".into());
        }
        Ok(Self {
            wavelength_nm,
            counts,
            meta,
        })
    }

    /// Number of samples.
    pub fn len(&self) -> usize {
        self.counts.len()
    }

    /// True when the spectrum holds no samples.
    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Largest count value in the spectrum.
    pub fn max_counts(&self) -> f64 {
        self.counts.iter().copied().fold(f64::MIN, f64::max)
    }

    /// Saturation test against the detector's hard limit.
    ///
    /// Checked on raw counts, before any smoothing, so a clipped peak is
    /// never masked by the denoiser.
    pub fn is_saturated(&self, threshold: f64) -> bool {
        self.counts.iter().any(|&c| c >= threshold)
    }

    /// Sample-wise subtraction of a background spectrum.
    ///
    /// The result keeps this spectrum's metadata. Fails if the two spectra
    /// have different sample counts.
    pub fn subtract(&self, background: &Spectrum) -> Result<Spectrum, String> {
        if self.len() != background.len() {
            return Err(format!(
                "sample count mismatch: signal {} vs background {}",
                self.len(),
                background.len()
            ));
        }
        let counts = self
            .counts
            .iter()
            .zip(background.counts.iter())
            .map(|(s, b)| s - b)
            .collect();
        Ok(Spectrum {
            wavelength_nm: self.wavelength_nm.clone(),
            counts,
            meta: self.meta.clone(),
        })
    }

    /// Boxcar-smoothed copy of this spectrum.
    ///
    /// `window` is the full averaging width in samples; a window of 0 or 1
    /// is a pass-through. The window is truncated at the spectrum edges so
    /// the output length always matches the input.
    pub fn smoothed(&self, window: usize) -> Spectrum {
        if window <= 1 {
            return self.clone();
        }
        let half = window / 2;
        let n = self.counts.len();
        let mut counts = Vec::with_capacity(n);
        for i in 0..n {
            let lo = i.saturating_sub(half);
            let hi = (i + half + 1).min(n);
            let sum: f64 = self.counts[lo..hi].iter().sum();
            counts.push(sum / (hi - lo) as f64);
        }
        Spectrum {
            wavelength_nm: self.wavelength_nm.clone(),
            counts,
            meta: self.meta.clone(),
        }
    }
}
