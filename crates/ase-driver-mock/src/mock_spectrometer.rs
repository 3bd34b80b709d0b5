//! Mock spectrometer (monochromator + cooled CCD).
//!
//! Synthesizes spectra from a simple physical model: a flat dark baseline
//! that scales with integration time, plus a Gaussian emission peak that
//! is present only while the bench trigger line is on. Counts clamp at
//! the detector full scale, so long exposures saturate exactly like the
//! real instrument.
//!
//! Tests can pin behavior precisely:
//! - [`MockSpectrometer::push_signal_peak`] scripts the peak amplitude of
//!   upcoming trigger-on acquisitions, one value per frame.
//! - A cooling rate of zero simulates a detector that never reaches its
//!   setpoint.
//! - Per-trigger-state acquisition counters expose how many signal vs.
//!   background frames were actually taken.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tokio::time::sleep;
use tracing::debug;

use ase_core::capabilities::{
    GratingInfo, GratingSelect, Lifecycle, SpectrumAcquisition, ThermalControl, WavelengthTunable,
};
use ase_core::data::{AcquisitionMeta, Spectrum};
use ase_core::error::{DeviceError, DeviceErrorKind};

use crate::bench::SimulatedBench;

const DEVICE: &str = "spectrometer";

/// Configuration for [`MockSpectrometer`].
#[derive(Debug, Clone)]
pub struct MockSpectrometerConfig {
    /// Number of detector pixels.
    pub pixels: usize,
    /// Spectral span covered by the detector, nanometers.
    pub span_nm: f64,
    /// Emission peak center, nanometers.
    pub peak_nm: f64,
    /// Emission peak full width at half maximum, nanometers.
    pub peak_fwhm_nm: f64,
    /// Peak signal rate while the trigger is on, counts per second.
    pub signal_counts_per_s: f64,
    /// Dark baseline rate, counts per second.
    pub dark_counts_per_s: f64,
    /// Detector full scale; counts clamp here.
    pub full_scale: f64,
    /// Readout overhead added to every acquisition.
    pub readout_time: Duration,
    /// Sleep for the real integration time during `acquire`. Off by
    /// default so tests run fast.
    pub simulate_exposure: bool,
    /// Detector temperature at power-on, Celsius.
    pub initial_temperature_c: f64,
    /// Temperature drop applied per poll while above the setpoint,
    /// Celsius. Zero means the detector never cools.
    pub cooling_rate_c_per_poll: f64,
    /// Peak-to-peak amplitude of additive readout noise, counts.
    pub noise_counts: f64,
    /// Seed for the noise generator.
    pub seed: u64,
}

impl Default for MockSpectrometerConfig {
    fn default() -> Self {
        Self {
            pixels: 512,
            span_nm: 100.0,
            peak_nm: 455.0,
            peak_fwhm_nm: 8.0,
            signal_counts_per_s: 20_000.0,
            dark_counts_per_s: 150.0,
            full_scale: 65_535.0,
            readout_time: Duration::from_millis(1),
            simulate_exposure: false,
            initial_temperature_c: 20.0,
            cooling_rate_c_per_poll: 100.0,
            noise_counts: 0.0,
            seed: 0,
        }
    }
}

/// Simulated spectrometer.
pub struct MockSpectrometer {
    bench: Arc<SimulatedBench>,
    config: MockSpectrometerConfig,
    connected: AtomicBool,
    refuse_connect: AtomicBool,
    temperature_c: Mutex<f64>,
    setpoint_c: Mutex<Option<f64>>,
    wavelength_nm: Mutex<f64>,
    grating: AtomicU32,
    scripted_peaks: Mutex<VecDeque<f64>>,
    signal_acquisitions: AtomicU32,
    background_acquisitions: AtomicU32,
    fail_next_acquire: Mutex<Option<DeviceErrorKind>>,
    rng: Mutex<ChaCha8Rng>,
}

impl MockSpectrometer {
    /// Create a spectrometer attached to the given bench.
    pub fn new(bench: Arc<SimulatedBench>) -> Self {
        Self::with_config(bench, MockSpectrometerConfig::default())
    }

    /// Create a spectrometer with a custom model.
    pub fn with_config(bench: Arc<SimulatedBench>, config: MockSpectrometerConfig) -> Self {
        Self {
            bench,
            connected: AtomicBool::new(false),
            refuse_connect: AtomicBool::new(false),
            temperature_c: Mutex::new(config.initial_temperature_c),
            setpoint_c: Mutex::new(None),
            wavelength_nm: Mutex::new(0.0),
            grating: AtomicU32::new(0),
            scripted_peaks: Mutex::new(VecDeque::new()),
            signal_acquisitions: AtomicU32::new(0),
            background_acquisitions: AtomicU32::new(0),
            fail_next_acquire: Mutex::new(None),
            rng: Mutex::new(ChaCha8Rng::seed_from_u64(config.seed)),
            config,
        }
    }

    /// Script the peak amplitude (total counts at the peak pixel) of the
    /// next trigger-on acquisitions, consumed one per frame.
    pub fn push_signal_peak(&self, counts: f64) {
        if let Ok(mut queue) = self.scripted_peaks.lock() {
            queue.push_back(counts);
        }
    }

    /// Make the next acquisition fail with the given error kind.
    pub fn inject_acquire_failure(&self, kind: DeviceErrorKind) {
        if let Ok(mut slot) = self.fail_next_acquire.lock() {
            *slot = Some(kind);
        }
    }

    /// Simulate the instrument link being held by other software.
    pub fn set_refuse_connect(&self, refuse: bool) {
        self.refuse_connect.store(refuse, Ordering::SeqCst);
    }

    /// Frames acquired with the trigger on.
    pub fn signal_acquisitions(&self) -> u32 {
        self.signal_acquisitions.load(Ordering::SeqCst)
    }

    /// Frames acquired with the trigger off.
    pub fn background_acquisitions(&self) -> u32 {
        self.background_acquisitions.load(Ordering::SeqCst)
    }

    fn ensure_connected(&self) -> Result<(), DeviceError> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(DeviceError::unavailable(DEVICE, "not connected"))
        }
    }

    fn axis(&self) -> Vec<f64> {
        let center = self.wavelength_nm.lock().map(|w| *w).unwrap_or(0.0);
        let n = self.config.pixels;
        let step = self.config.span_nm / (n.saturating_sub(1)).max(1) as f64;
        let first = center - self.config.span_nm / 2.0;
        (0..n).map(|i| first + step * i as f64).collect()
    }

    fn synthesize(&self, integration_time_s: f64, accumulations: u32, trigger_on: bool) -> Spectrum {
        let axis = self.axis();
        let exposure = integration_time_s * accumulations as f64;
        let dark = self.config.dark_counts_per_s * exposure;

        let sigma = self.config.peak_fwhm_nm / (8.0 * std::f64::consts::LN_2).sqrt();
        let profile: Vec<f64> = axis
            .iter()
            .map(|&wl| {
                let delta = wl - self.config.peak_nm;
                (-delta * delta / (2.0 * sigma * sigma)).exp()
            })
            .collect();

        // Scripted amplitudes are absolute peak counts: the dark floor and
        // the pixel grid are compensated so the frame's maximum equals the
        // scripted value exactly (with noise off).
        let amplitude = if trigger_on {
            let scripted = self
                .scripted_peaks
                .lock()
                .ok()
                .and_then(|mut queue| queue.pop_front());
            match scripted {
                Some(peak) => {
                    let grid_max = profile.iter().copied().fold(f64::MIN, f64::max);
                    (peak - dark).max(0.0) / grid_max.max(f64::MIN_POSITIVE)
                }
                None => self.config.signal_counts_per_s * exposure,
            }
        } else {
            0.0
        };

        let mut rng = self.rng.lock().ok();
        let counts = profile
            .iter()
            .map(|&factor| {
                let noise = match rng.as_deref_mut() {
                    Some(rng) if self.config.noise_counts > 0.0 => {
                        rng.gen_range(-0.5..0.5) * self.config.noise_counts
                    }
                    _ => 0.0,
                };
                (dark + amplitude * factor + noise).clamp(0.0, self.config.full_scale)
            })
            .collect();

        Spectrum {
            wavelength_nm: axis,
            counts,
            meta: AcquisitionMeta {
                integration_time_s,
                accumulations,
                trigger_on,
                angle_degrees: None,
                acquired_at: Utc::now(),
            },
        }
    }
}

#[async_trait]
impl Lifecycle for MockSpectrometer {
    async fn connect(&self) -> Result<(), DeviceError> {
        if self.refuse_connect.load(Ordering::SeqCst) {
            return Err(DeviceError::unavailable(
                DEVICE,
                "instrument link already claimed",
            ));
        }
        sleep(self.config.readout_time).await;
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), DeviceError> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl SpectrumAcquisition for MockSpectrometer {
    async fn acquire(
        &self,
        integration_time_s: f64,
        accumulations: u32,
    ) -> Result<Spectrum, DeviceError> {
        self.ensure_connected()?;
        if integration_time_s <= 0.0 {
            return Err(DeviceError::new(
                DEVICE,
                DeviceErrorKind::InvalidParameter,
                format!("integration time {integration_time_s}s out of range"),
            ));
        }
        if let Ok(mut slot) = self.fail_next_acquire.lock() {
            if let Some(kind) = slot.take() {
                return Err(DeviceError::new(DEVICE, kind, "injected fault"));
            }
        }

        if self.config.simulate_exposure {
            sleep(Duration::from_secs_f64(
                integration_time_s * accumulations as f64,
            ))
            .await;
        }
        sleep(self.config.readout_time).await;

        let trigger_on = self.bench.trigger_on();
        if trigger_on {
            self.signal_acquisitions.fetch_add(1, Ordering::SeqCst);
        } else {
            self.background_acquisitions.fetch_add(1, Ordering::SeqCst);
        }
        debug!(integration_time_s, accumulations, trigger_on, "synthesizing frame");
        Ok(self.synthesize(integration_time_s, accumulations, trigger_on))
    }

    async fn export_native(&self, spectrum: &Spectrum) -> Result<Vec<u8>, DeviceError> {
        self.ensure_connected()?;
        // Tab-separated export mimicking the vendor's text dump.
        let mut out = String::new();
        out.push_str("# simulated spectrometer export v1\n");
        out.push_str(&format!(
            "# integration_time_s={} accumulations={} trigger_on={}\n",
            spectrum.meta.integration_time_s,
            spectrum.meta.accumulations,
            spectrum.meta.trigger_on,
        ));
        for (wl, counts) in spectrum.wavelength_nm.iter().zip(spectrum.counts.iter()) {
            out.push_str(&format!("{wl:.4}\t{counts:.2}\n"));
        }
        Ok(out.into_bytes())
    }
}

#[async_trait]
impl ThermalControl for MockSpectrometer {
    async fn temperature_celsius(&self) -> Result<f64, DeviceError> {
        self.ensure_connected()?;
        let setpoint = self.setpoint_c.lock().ok().and_then(|s| *s);
        let mut temp = self
            .temperature_c
            .lock()
            .map_err(|_| DeviceError::communication(DEVICE, "temperature state poisoned"))?;
        if let Some(setpoint) = setpoint {
            if *temp > setpoint {
                *temp = (*temp - self.config.cooling_rate_c_per_poll).max(setpoint);
            }
        }
        Ok(*temp)
    }

    async fn set_temperature_setpoint(&self, celsius: f64) -> Result<(), DeviceError> {
        self.ensure_connected()?;
        if let Ok(mut setpoint) = self.setpoint_c.lock() {
            *setpoint = Some(celsius);
        }
        Ok(())
    }
}

#[async_trait]
impl WavelengthTunable for MockSpectrometer {
    async fn set_wavelength(&self, nm: f64) -> Result<(), DeviceError> {
        self.ensure_connected()?;
        if nm <= 0.0 {
            return Err(DeviceError::new(
                DEVICE,
                DeviceErrorKind::InvalidParameter,
                format!("wavelength {nm}nm out of range"),
            ));
        }
        sleep(self.config.readout_time).await;
        if let Ok(mut wavelength) = self.wavelength_nm.lock() {
            *wavelength = nm;
        }
        Ok(())
    }

    async fn wavelength(&self) -> Result<f64, DeviceError> {
        self.ensure_connected()?;
        self.wavelength_nm
            .lock()
            .map(|w| *w)
            .map_err(|_| DeviceError::communication(DEVICE, "wavelength state poisoned"))
    }
}

#[async_trait]
impl GratingSelect for MockSpectrometer {
    async fn grating_index(&self) -> Result<u32, DeviceError> {
        self.ensure_connected()?;
        Ok(self.grating.load(Ordering::SeqCst))
    }

    async fn set_grating_index(&self, index: u32) -> Result<(), DeviceError> {
        self.ensure_connected()?;
        if index > 1 {
            return Err(DeviceError::new(
                DEVICE,
                DeviceErrorKind::InvalidParameter,
                format!("grating index {index} not installed"),
            ));
        }
        sleep(self.config.readout_time).await;
        self.grating.store(index, Ordering::SeqCst);
        Ok(())
    }

    async fn grating_info(&self) -> Result<Vec<GratingInfo>, DeviceError> {
        self.ensure_connected()?;
        Ok(vec![
            GratingInfo {
                index: 0,
                grooves_per_mm: 1800.0,
                blaze: "500nm".into(),
            },
            GratingInfo {
                index: 1,
                grooves_per_mm: 600.0,
                blaze: "1000nm".into(),
            },
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn connected(config: MockSpectrometerConfig) -> (Arc<SimulatedBench>, MockSpectrometer) {
        let bench = SimulatedBench::new();
        let spectrometer = MockSpectrometer::with_config(bench.clone(), config);
        spectrometer.connect().await.unwrap();
        spectrometer.set_wavelength(450.0).await.unwrap();
        (bench, spectrometer)
    }

    #[tokio::test]
    async fn background_frames_have_no_peak() {
        let (bench, spectrometer) = connected(MockSpectrometerConfig::default()).await;

        bench.set_trigger(false);
        let background = spectrometer.acquire(0.1, 1).await.unwrap();
        let expected_dark = 150.0 * 0.1;
        assert!(background
            .counts
            .iter()
            .all(|&c| (c - expected_dark).abs() < 1e-9));
        assert!(!background.meta.trigger_on);

        bench.set_trigger(true);
        let signal = spectrometer.acquire(0.1, 1).await.unwrap();
        assert!(signal.max_counts() > expected_dark + 100.0);
        assert!(signal.meta.trigger_on);
    }

    #[tokio::test]
    async fn scripted_peaks_set_exact_maxima() {
        let (bench, spectrometer) = connected(MockSpectrometerConfig::default()).await;
        bench.set_trigger(true);

        spectrometer.push_signal_peak(1500.0);
        spectrometer.push_signal_peak(400.0);

        let first = spectrometer.acquire(4.0, 1).await.unwrap();
        assert!((first.max_counts() - 1500.0).abs() < 1e-6);

        let second = spectrometer.acquire(0.1, 1).await.unwrap();
        assert!((second.max_counts() - 400.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn long_exposures_clamp_at_full_scale() {
        let (bench, spectrometer) = connected(MockSpectrometerConfig::default()).await;
        bench.set_trigger(true);

        let frame = spectrometer.acquire(10.0, 1).await.unwrap();
        assert_eq!(frame.max_counts(), 65_535.0);
    }

    #[tokio::test]
    async fn acquisition_counters_split_by_trigger_state() {
        let (bench, spectrometer) = connected(MockSpectrometerConfig::default()).await;

        bench.set_trigger(true);
        spectrometer.acquire(0.1, 1).await.unwrap();
        spectrometer.acquire(0.1, 1).await.unwrap();
        bench.set_trigger(false);
        spectrometer.acquire(0.1, 1).await.unwrap();

        assert_eq!(spectrometer.signal_acquisitions(), 2);
        assert_eq!(spectrometer.background_acquisitions(), 1);
    }

    #[tokio::test]
    async fn cooling_walks_toward_setpoint() {
        let config = MockSpectrometerConfig {
            initial_temperature_c: 20.0,
            cooling_rate_c_per_poll: 50.0,
            ..MockSpectrometerConfig::default()
        };
        let (_bench, spectrometer) = connected(config).await;

        spectrometer.set_temperature_setpoint(-70.0).await.unwrap();
        assert_eq!(spectrometer.temperature_celsius().await.unwrap(), -30.0);
        assert_eq!(spectrometer.temperature_celsius().await.unwrap(), -70.0);
        // holds at the setpoint
        assert_eq!(spectrometer.temperature_celsius().await.unwrap(), -70.0);
    }

    #[tokio::test]
    async fn zero_cooling_rate_never_cools() {
        let config = MockSpectrometerConfig {
            cooling_rate_c_per_poll: 0.0,
            ..MockSpectrometerConfig::default()
        };
        let (_bench, spectrometer) = connected(config).await;

        spectrometer.set_temperature_setpoint(-70.0).await.unwrap();
        assert_eq!(spectrometer.temperature_celsius().await.unwrap(), 20.0);
        assert_eq!(spectrometer.temperature_celsius().await.unwrap(), 20.0);
    }

    #[tokio::test]
    async fn native_export_is_parseable_text() {
        let (bench, spectrometer) = connected(MockSpectrometerConfig::default()).await;
        bench.set_trigger(true);

        let frame = spectrometer.acquire(0.1, 1).await.unwrap();
        let bytes = spectrometer.export_native(&frame).await.unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.starts_with("# simulated spectrometer export"));
        let data_lines = text.lines().filter(|l| !l.starts_with('#')).count();
        assert_eq!(data_lines, frame.len());
    }

    #[tokio::test]
    async fn rejects_nonpositive_integration_time() {
        let (_bench, spectrometer) = connected(MockSpectrometerConfig::default()).await;
        let err = spectrometer.acquire(0.0, 1).await.unwrap_err();
        assert_eq!(err.kind, DeviceErrorKind::InvalidParameter);
    }
}
