//! Simulated bench drivers for the ase-sweep system.
//!
//! Three mock devices implementing the capability traits from
//! [`ase_core::capabilities`], linked through a shared
//! [`SimulatedBench`](bench::SimulatedBench) so the spectrometer's output
//! actually depends on the pulser's trigger line:
//!
//! - [`MockRotator`](mock_rotator::MockRotator) — rotation stage with
//!   bounded travel and scaled motion time.
//! - [`MockPulser`](mock_pulser::MockPulser) — trigger source.
//! - [`MockSpectrometer`](mock_spectrometer::MockSpectrometer) —
//!   Gaussian emission + dark baseline model with full-scale clamping,
//!   scripted peak overrides and a configurable cooling curve.
//!
//! Used by the engine's test suites and by the binary's simulate mode.

pub mod bench;
pub mod mock_pulser;
pub mod mock_rotator;
pub mod mock_spectrometer;

pub use bench::SimulatedBench;
pub use mock_pulser::{MockPulser, MockPulserConfig, PulseSettings};
pub use mock_rotator::{MockRotator, MockRotatorConfig};
pub use mock_spectrometer::{MockSpectrometer, MockSpectrometerConfig};
