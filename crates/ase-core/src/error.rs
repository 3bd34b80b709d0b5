//! Error types for the acquisition system.
//!
//! Two layers:
//!
//! - [`DeviceError`] is what every adapter call can fail with. It carries
//!   the device label, a [`DeviceErrorKind`] category and a message, so the
//!   sweep engine can decide whether a failure is a connection problem, a
//!   timeout or a protocol fault without string matching.
//! - [`SweepError`] is the run-level taxonomy. Recoverable conditions
//!   (a saturated point that exhausted its presets) never appear here; they
//!   are recorded in the manifest and the sweep continues. Everything in
//!   this enum is fatal for the run and triggers teardown.

use thiserror::Error;

/// Category of a device-level failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceErrorKind {
    /// Device could not be claimed: unreachable, or already held by other
    /// software (the vendor GUI left open, a stale serial handle).
    Unavailable,
    /// Established link broke mid-command: garbled response, dropped
    /// connection, protocol error.
    Communication,
    /// The device did not answer or settle within its bounded wait.
    Timeout,
    /// Device rejected the command because it is executing another one.
    Busy,
    /// Command argument outside the device's accepted range.
    InvalidParameter,
    /// Device reported an internal fault (motor stall, sensor error).
    Hardware,
}

impl std::fmt::Display for DeviceErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            DeviceErrorKind::Unavailable => "unavailable",
            DeviceErrorKind::Communication => "communication",
            DeviceErrorKind::Timeout => "timeout",
            DeviceErrorKind::Busy => "busy",
            DeviceErrorKind::InvalidParameter => "invalid_parameter",
            DeviceErrorKind::Hardware => "hardware",
        };
        write!(f, "{}", label)
    }
}

/// Failure reported by a device adapter.
#[derive(Error, Debug, Clone)]
#[error("device '{device}' {kind} error: {message}")]
pub struct DeviceError {
    /// Adapter label (e.g. "rotator", "spectrometer", "pulser").
    pub device: String,
    /// Failure category.
    pub kind: DeviceErrorKind,
    /// Human-readable detail.
    pub message: String,
}

impl DeviceError {
    pub fn new(
        device: impl Into<String>,
        kind: DeviceErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            device: device.into(),
            kind,
            message: message.into(),
        }
    }

    /// Shorthand for an [`DeviceErrorKind::Unavailable`] error.
    pub fn unavailable(device: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(device, DeviceErrorKind::Unavailable, message)
    }

    /// Shorthand for a [`DeviceErrorKind::Communication`] error.
    pub fn communication(device: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(device, DeviceErrorKind::Communication, message)
    }

    /// Shorthand for a [`DeviceErrorKind::Timeout`] error.
    pub fn timeout(device: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(device, DeviceErrorKind::Timeout, message)
    }
}

/// Convenience alias for results using the run-level error type.
pub type SweepResult<T> = std::result::Result<T, SweepError>;

/// Fatal run-level errors.
///
/// All variants end the run: the engine transitions to finalizing,
/// releases the hardware and closes the manifest as aborted with the
/// error text as the reason.
#[derive(Error, Debug)]
pub enum SweepError {
    /// A device could not be claimed during the connect phase.
    ///
    /// Raised before the sweep starts; no points have been attempted.
    #[error("device unavailable: {0}")]
    DeviceUnavailable(DeviceError),

    /// A device failed mid-run.
    ///
    /// Adapter-level communication failures are not retried by the
    /// pipeline; they surface here and abort the remaining sweep (subject
    /// to the configured failure policy).
    #[error("device failure: {0}")]
    Device(DeviceError),

    /// A startup precondition was not met within its bounded wait
    /// (e.g. the detector never reached its operating temperature).
    #[error("precondition '{what}' not met after {waited_s:.0}s")]
    PreconditionTimeout {
        /// Which precondition timed out.
        what: String,
        /// How long the engine waited before giving up.
        waited_s: f64,
    },

    /// External cancellation request (operator abort).
    #[error("sweep cancelled")]
    Cancelled,

    /// A point failed and the configured policy forbids continuing.
    ///
    /// Point failures are normally recorded and skipped; this variant
    /// only appears when `continue_after_exhausted_presets` is off.
    #[error("point at {angle_degrees}° failed: {reason}")]
    PointFailed {
        /// Angle of the failed point.
        angle_degrees: f64,
        /// Why the point failed.
        reason: String,
    },

    /// Configuration rejected by validation.
    #[error("configuration error: {0}")]
    Config(String),

    /// Persistence failure while writing the run directory or manifest.
    #[error("storage error: {0}")]
    Storage(#[from] std::io::Error),

    /// Numeric failure while reducing captured spectra.
    #[error("data processing error: {0}")]
    Processing(String),
}

impl SweepError {
    /// True for errors raised before any point was attempted.
    pub fn is_startup(&self) -> bool {
        matches!(
            self,
            SweepError::DeviceUnavailable(_)
                | SweepError::PreconditionTimeout { .. }
                | SweepError::Config(_)
        )
    }
}
