//! Hardware capability traits.
//!
//! Devices implement the fine-grained capabilities they actually support
//! instead of one monolithic instrument trait:
//!
//! - A rotation stage implements `Lifecycle + Movable`.
//! - A pulse generator implements `Lifecycle + TriggerControl`.
//! - A spectrometer implements `Lifecycle + SpectrumAcquisition +
//!   ThermalControl + WavelengthTunable + GratingSelect`.
//!
//! Each trait is async, thread-safe (`Send + Sync`) and fails with the
//! typed [`DeviceError`], so orchestration code can categorize failures
//! without knowing which driver produced them. Every method is a blocking
//! wait bounded by a device-internal timeout: a call either completes,
//! or returns a `Timeout` error — it never hangs indefinitely.

use async_trait::async_trait;

use crate::data::Spectrum;
use crate::error::DeviceError;

/// Capability: connection lifecycle.
///
/// `connect` claims an exclusive handle to the device and must fail with
/// an `Unavailable` error if the hardware is unreachable or already held
/// by other software. `disconnect` releases the handle and is expected to
/// succeed on a device that was never connected (idempotent teardown).
#[async_trait]
pub trait Lifecycle: Send + Sync {
    /// Claim an exclusive handle to the device.
    async fn connect(&self) -> Result<(), DeviceError>;

    /// Release the device handle, leaving the hardware quiescent.
    async fn disconnect(&self) -> Result<(), DeviceError>;
}

/// Capability: motion control.
///
/// Positions are in degrees. `move_abs` blocks until the device confirms
/// the motion completed (or its internal timeout expires).
#[async_trait]
pub trait Movable: Send + Sync {
    /// Move to an absolute position and wait for the motion to settle.
    async fn move_abs(&self, degrees: f64) -> Result<(), DeviceError>;

    /// Current position in degrees.
    async fn position(&self) -> Result<f64, DeviceError>;

    /// Return to the mechanical zero stop.
    async fn home(&self) -> Result<(), DeviceError>;
}

/// Capability: excitation trigger control.
///
/// Drives the pulse train feeding the excitation source. The acquisition
/// pipeline relies on `set_trigger(false)` being safe to call repeatedly:
/// it is the quiesce primitive used on every exit path.
#[async_trait]
pub trait TriggerControl: Send + Sync {
    /// Program the pulse train without enabling the output.
    ///
    /// Called once during preconditioning; the output stays disabled
    /// until `set_trigger(true)`.
    async fn configure_pulse(
        &self,
        width_s: f64,
        period_s: f64,
        amplitude_v: f64,
    ) -> Result<(), DeviceError>;

    /// Enable or disable the trigger output.
    async fn set_trigger(&self, enabled: bool) -> Result<(), DeviceError>;

    /// Whether the trigger output is currently enabled.
    async fn is_triggering(&self) -> Result<bool, DeviceError>;
}

/// Capability: single-spectrum acquisition.
#[async_trait]
pub trait SpectrumAcquisition: Send + Sync {
    /// Expose the detector and read back one spectrum.
    ///
    /// Blocks for roughly `integration_time_s * accumulations` plus
    /// readout overhead. The returned spectrum carries its acquisition
    /// metadata; the caller fills in the stage angle.
    async fn acquire(
        &self,
        integration_time_s: f64,
        accumulations: u32,
    ) -> Result<Spectrum, DeviceError>;

    /// Serialize a captured spectrum in the instrument's native format.
    ///
    /// The bytes are opaque to the rest of the system; they are archived
    /// next to the processed data so vendor tooling can reopen the raw
    /// acquisition.
    async fn export_native(&self, spectrum: &Spectrum) -> Result<Vec<u8>, DeviceError>;
}

/// Capability: detector thermal control.
#[async_trait]
pub trait ThermalControl: Send + Sync {
    /// Current detector temperature in degrees Celsius.
    async fn temperature_celsius(&self) -> Result<f64, DeviceError>;

    /// Set the cooling setpoint in degrees Celsius.
    async fn set_temperature_setpoint(&self, celsius: f64) -> Result<(), DeviceError>;
}

/// Capability: center-wavelength tuning of the dispersive element.
#[async_trait]
pub trait WavelengthTunable: Send + Sync {
    /// Move the monochromator to a center wavelength, blocking until settled.
    async fn set_wavelength(&self, nm: f64) -> Result<(), DeviceError>;

    /// Current center wavelength in nanometers.
    async fn wavelength(&self) -> Result<f64, DeviceError>;
}

/// Description of one installed grating.
#[derive(Debug, Clone)]
pub struct GratingInfo {
    /// Turret index of the grating.
    pub index: u32,
    /// Groove density in grooves per millimeter.
    pub grooves_per_mm: f64,
    /// Blaze description as reported by the instrument.
    pub blaze: String,
}

/// Capability: grating turret selection.
#[async_trait]
pub trait GratingSelect: Send + Sync {
    /// Index of the currently selected grating.
    async fn grating_index(&self) -> Result<u32, DeviceError>;

    /// Rotate the turret to the given grating, blocking until settled.
    ///
    /// A no-op when the turret is already at the requested index.
    async fn set_grating_index(&self, index: u32) -> Result<(), DeviceError>;

    /// Enumerate the installed gratings for the run log.
    async fn grating_info(&self) -> Result<Vec<GratingInfo>, DeviceError>;
}

// =============================================================================
// Composite device roles (for trait objects)
// =============================================================================

/// Composite role: rotation stage (filter wheel).
pub trait RotationStage: Lifecycle + Movable {}
impl<T: Lifecycle + Movable> RotationStage for T {}

/// Composite role: pulse generator driving the excitation source.
pub trait PulseGenerator: Lifecycle + TriggerControl {}
impl<T: Lifecycle + TriggerControl> PulseGenerator for T {}

/// Composite role: spectrometer (monochromator + cooled detector).
pub trait Spectrometer:
    Lifecycle + SpectrumAcquisition + ThermalControl + WavelengthTunable + GratingSelect
{
}
impl<T> Spectrometer for T where
    T: Lifecycle + SpectrumAcquisition + ThermalControl + WavelengthTunable + GratingSelect
{
}
