//! Sweep orchestration engine.
//!
//! Drives one filter-wheel sweep from hardware claim to hardware release:
//!
//! - [`exposure`]: auto-ranging integration-time selection (step-down on
//!   saturation, cross-angle resume memory).
//! - [`background`]: per-run cache of trigger-off frames keyed by
//!   integration time.
//! - [`point`]: the per-angle acquisition pipeline (move, auto-ranged
//!   signal, background resolve, denoise, subtract).
//! - [`sweep`]: the run state machine (connect, precondition, sweep,
//!   finalize) with guaranteed teardown and an always-closed manifest.
//! - [`preview`]: single-slot live preview mailbox.
//! - [`cancel`]: cooperative cancellation observed between atomic steps.
//!
//! One control task drives everything; the preview receiver is the only
//! cross-task boundary and can never slow acquisition down.

pub mod background;
pub mod cancel;
pub mod exposure;
pub mod point;
pub mod preview;
pub mod sweep;

pub use background::BackgroundCache;
pub use cancel::CancelToken;
pub use exposure::{ExposureSelector, PresetsExhausted};
pub use point::{acquire_point, AcquireContext, PointOutcome};
pub use preview::{PreviewChannel, PreviewReceiver, PreviewUpdate};
pub use sweep::{RunOutcome, SweepDevices, SweepEngine, SweepState};
