//! Mock pulse generator.
//!
//! Simulates the trigger source feeding the excitation laser: connect,
//! drive the trigger line of the shared bench, disconnect. Faults can be
//! injected per call to exercise the engine's failure paths.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::sleep;

use ase_core::capabilities::{Lifecycle, TriggerControl};
use ase_core::error::{DeviceError, DeviceErrorKind};

use crate::bench::SimulatedBench;

const DEVICE: &str = "pulser";

/// Configuration for [`MockPulser`].
#[derive(Debug, Clone)]
pub struct MockPulserConfig {
    /// Simulated serial round-trip per command.
    pub command_latency: Duration,
}

impl Default for MockPulserConfig {
    fn default() -> Self {
        Self {
            command_latency: Duration::from_millis(1),
        }
    }
}

/// Programmed pulse train parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PulseSettings {
    /// Output pulse width, seconds.
    pub width_s: f64,
    /// Pulse repetition period, seconds.
    pub period_s: f64,
    /// Output amplitude, volts.
    pub amplitude_v: f64,
}

/// Simulated pulse generator.
pub struct MockPulser {
    bench: Arc<SimulatedBench>,
    config: MockPulserConfig,
    connected: AtomicBool,
    refuse_connect: AtomicBool,
    pulse: Mutex<Option<PulseSettings>>,
    fail_next: Mutex<Option<DeviceErrorKind>>,
}

impl MockPulser {
    /// Create a pulser attached to the given bench.
    pub fn new(bench: Arc<SimulatedBench>) -> Self {
        Self::with_config(bench, MockPulserConfig::default())
    }

    /// Create a pulser with custom timing.
    pub fn with_config(bench: Arc<SimulatedBench>, config: MockPulserConfig) -> Self {
        Self {
            bench,
            config,
            connected: AtomicBool::new(false),
            refuse_connect: AtomicBool::new(false),
            pulse: Mutex::new(None),
            fail_next: Mutex::new(None),
        }
    }

    /// The last programmed pulse train, if any.
    pub fn pulse_settings(&self) -> Option<PulseSettings> {
        self.pulse.lock().ok().and_then(|p| *p)
    }

    /// Make the next trigger command fail with the given error kind.
    pub fn inject_failure(&self, kind: DeviceErrorKind) {
        if let Ok(mut slot) = self.fail_next.lock() {
            *slot = Some(kind);
        }
    }

    /// Simulate the port being held by other software: `connect` will
    /// refuse until cleared.
    pub fn set_refuse_connect(&self, refuse: bool) {
        self.refuse_connect.store(refuse, Ordering::SeqCst);
    }

    fn take_injected_failure(&self) -> Option<DeviceError> {
        let kind = self.fail_next.lock().ok()?.take()?;
        Some(DeviceError::new(DEVICE, kind, "injected fault"))
    }

    fn ensure_connected(&self) -> Result<(), DeviceError> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(DeviceError::unavailable(DEVICE, "not connected"))
        }
    }
}

#[async_trait]
impl Lifecycle for MockPulser {
    async fn connect(&self) -> Result<(), DeviceError> {
        if self.refuse_connect.load(Ordering::SeqCst) {
            return Err(DeviceError::unavailable(
                DEVICE,
                "serial port already claimed",
            ));
        }
        sleep(self.config.command_latency).await;
        self.connected.store(true, Ordering::SeqCst);
        // power-on state: output disabled
        self.bench.set_trigger(false);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), DeviceError> {
        if self.connected.swap(false, Ordering::SeqCst) {
            // a real close stops the pulse train before dropping the port
            self.bench.set_trigger(false);
        }
        Ok(())
    }
}

#[async_trait]
impl TriggerControl for MockPulser {
    async fn configure_pulse(
        &self,
        width_s: f64,
        period_s: f64,
        amplitude_v: f64,
    ) -> Result<(), DeviceError> {
        self.ensure_connected()?;
        if width_s <= 0.0 || period_s <= 0.0 || width_s >= period_s {
            return Err(DeviceError::new(
                DEVICE,
                DeviceErrorKind::InvalidParameter,
                format!("pulse width {width_s}s incompatible with period {period_s}s"),
            ));
        }
        sleep(self.config.command_latency).await;
        if let Ok(mut pulse) = self.pulse.lock() {
            *pulse = Some(PulseSettings {
                width_s,
                period_s,
                amplitude_v,
            });
        }
        Ok(())
    }

    async fn set_trigger(&self, enabled: bool) -> Result<(), DeviceError> {
        self.ensure_connected()?;
        if let Some(err) = self.take_injected_failure() {
            return Err(err);
        }
        sleep(self.config.command_latency).await;
        self.bench.set_trigger(enabled);
        Ok(())
    }

    async fn is_triggering(&self) -> Result<bool, DeviceError> {
        self.ensure_connected()?;
        Ok(self.bench.trigger_on())
    }
}
