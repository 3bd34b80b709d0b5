//! Mock rotation stage (piezo rotation mount).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio::time::sleep;

use ase_core::capabilities::{Lifecycle, Movable};
use ase_core::error::{DeviceError, DeviceErrorKind};

const DEVICE: &str = "rotator";

/// Configuration for [`MockRotator`].
#[derive(Debug, Clone)]
pub struct MockRotatorConfig {
    /// Initial position in degrees.
    pub initial_position: f64,
    /// Lower travel limit in degrees.
    pub min_position: f64,
    /// Upper travel limit in degrees.
    pub max_position: f64,
    /// Simulated motion time per degree of travel.
    pub time_per_degree: Duration,
}

impl Default for MockRotatorConfig {
    fn default() -> Self {
        Self {
            initial_position: 0.0,
            min_position: 0.0,
            max_position: 360.0,
            time_per_degree: Duration::from_micros(50),
        }
    }
}

/// Simulated rotation stage with bounded travel and scaled motion time.
pub struct MockRotator {
    config: MockRotatorConfig,
    position_degrees: RwLock<f64>,
    connected: AtomicBool,
    refuse_connect: AtomicBool,
    homed: AtomicBool,
    fail_next_move: Mutex<Option<DeviceErrorKind>>,
}

impl MockRotator {
    /// Create a rotator with default configuration.
    pub fn new() -> Self {
        Self::with_config(MockRotatorConfig::default())
    }

    /// Create a rotator with custom limits and timing.
    pub fn with_config(config: MockRotatorConfig) -> Self {
        Self {
            position_degrees: RwLock::new(config.initial_position),
            config,
            connected: AtomicBool::new(false),
            refuse_connect: AtomicBool::new(false),
            homed: AtomicBool::new(false),
            fail_next_move: Mutex::new(None),
        }
    }

    /// Make the next move command fail with the given error kind.
    pub fn inject_move_failure(&self, kind: DeviceErrorKind) {
        if let Ok(mut slot) = self.fail_next_move.lock() {
            *slot = Some(kind);
        }
    }

    /// Simulate the serial port being held by other software.
    pub fn set_refuse_connect(&self, refuse: bool) {
        self.refuse_connect.store(refuse, Ordering::SeqCst);
    }

    /// Whether the stage has been homed since connect.
    pub fn is_homed(&self) -> bool {
        self.homed.load(Ordering::SeqCst)
    }

    fn ensure_connected(&self) -> Result<(), DeviceError> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(DeviceError::unavailable(DEVICE, "not connected"))
        }
    }

    fn motion_time(&self, distance_degrees: f64) -> Duration {
        self.config.time_per_degree.mul_f64(distance_degrees.abs())
    }
}

impl Default for MockRotator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Lifecycle for MockRotator {
    async fn connect(&self) -> Result<(), DeviceError> {
        if self.refuse_connect.load(Ordering::SeqCst) {
            return Err(DeviceError::unavailable(
                DEVICE,
                "serial port already claimed",
            ));
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), DeviceError> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl Movable for MockRotator {
    async fn move_abs(&self, degrees: f64) -> Result<(), DeviceError> {
        self.ensure_connected()?;
        if let Ok(mut slot) = self.fail_next_move.lock() {
            if let Some(kind) = slot.take() {
                return Err(DeviceError::new(DEVICE, kind, "injected fault"));
            }
        }
        if !(self.config.min_position..=self.config.max_position).contains(&degrees) {
            return Err(DeviceError::new(
                DEVICE,
                DeviceErrorKind::InvalidParameter,
                format!(
                    "position {degrees} outside travel ({}..{})",
                    self.config.min_position, self.config.max_position
                ),
            ));
        }

        let current = *self.position_degrees.read().await;
        sleep(self.motion_time(degrees - current)).await;
        *self.position_degrees.write().await = degrees;
        Ok(())
    }

    async fn position(&self) -> Result<f64, DeviceError> {
        self.ensure_connected()?;
        Ok(*self.position_degrees.read().await)
    }

    async fn home(&self) -> Result<(), DeviceError> {
        self.ensure_connected()?;
        let current = *self.position_degrees.read().await;
        sleep(self.motion_time(current)).await;
        *self.position_degrees.write().await = 0.0;
        self.homed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_rotator() -> MockRotator {
        MockRotator::with_config(MockRotatorConfig {
            time_per_degree: Duration::ZERO,
            ..MockRotatorConfig::default()
        })
    }

    #[tokio::test]
    async fn moves_to_absolute_position() {
        let rotator = fast_rotator();
        rotator.connect().await.unwrap();

        rotator.move_abs(90.0).await.unwrap();
        assert_eq!(rotator.position().await.unwrap(), 90.0);
    }

    #[tokio::test]
    async fn rejects_out_of_range_targets() {
        let rotator = fast_rotator();
        rotator.connect().await.unwrap();

        let err = rotator.move_abs(400.0).await.unwrap_err();
        assert_eq!(err.kind, DeviceErrorKind::InvalidParameter);
        let err = rotator.move_abs(-1.0).await.unwrap_err();
        assert_eq!(err.kind, DeviceErrorKind::InvalidParameter);
    }

    #[tokio::test]
    async fn homing_returns_to_zero() {
        let rotator = fast_rotator();
        rotator.connect().await.unwrap();

        rotator.move_abs(180.0).await.unwrap();
        assert!(!rotator.is_homed());
        rotator.home().await.unwrap();
        assert!(rotator.is_homed());
        assert_eq!(rotator.position().await.unwrap(), 0.0);
    }

    #[tokio::test]
    async fn commands_require_connection() {
        let rotator = fast_rotator();
        let err = rotator.move_abs(10.0).await.unwrap_err();
        assert_eq!(err.kind, DeviceErrorKind::Unavailable);
    }

    #[tokio::test]
    async fn injected_move_failure_fires_once() {
        let rotator = fast_rotator();
        rotator.connect().await.unwrap();

        rotator.inject_move_failure(DeviceErrorKind::Timeout);
        let err = rotator.move_abs(10.0).await.unwrap_err();
        assert_eq!(err.kind, DeviceErrorKind::Timeout);

        rotator.move_abs(10.0).await.unwrap();
    }
}
