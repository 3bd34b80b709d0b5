//! Sweep orchestration state machine.
//!
//! The engine owns one run from hardware claim to hardware release:
//!
//! ```text
//! Idle ──▶ Connecting ──▶ Preconditioning ──▶ Sweeping ──▶ Finalizing ──▶ Completed
//!              │                 │                │                          │
//!              └─────────────────┴────────────────┘                          ▼
//!                       (fatal error / cancellation)                      Aborted
//! ```
//!
//! Finalizing is unconditional: every path out of the earlier states goes
//! through it, so the trigger is stopped, the stage homed and all three
//! adapters released no matter how the run ended. The manifest is closed
//! on every graceful path, completed or aborted, so a partial run is a
//! valid artifact rather than corrupted state.
//!
//! A single control task drives everything; devices are commanded
//! strictly sequentially because motion, trigger state and exposure are
//! causally ordered within each point.

use std::sync::Arc;

use chrono::Utc;
use tokio::time::{sleep, Duration, Instant};
use tracing::{debug, error, info, warn};

use ase_core::capabilities::{PulseGenerator, RotationStage, Spectrometer};
use ase_core::config::SweepConfig;
use ase_core::error::{SweepError, SweepResult};
use ase_core::run::{new_run_id, RunSink, RunStart, RunStatus, RunStop};

use crate::background::BackgroundCache;
use crate::cancel::CancelToken;
use crate::exposure::ExposureSelector;
use crate::point::{acquire_point, AcquireContext, PointOutcome};
use crate::preview::{PreviewChannel, PreviewReceiver, PreviewUpdate};

/// Borrowed handles to the three instruments of the bench.
///
/// The engine does not own the hardware: handles are claimed in
/// `Connecting` and released in `Finalizing`, and the adapters outlive
/// the run.
pub struct SweepDevices {
    /// Filter-wheel rotation stage.
    pub stage: Arc<dyn RotationStage>,
    /// Spectrometer.
    pub spectrometer: Arc<dyn Spectrometer>,
    /// Excitation pulse generator.
    pub pulser: Arc<dyn PulseGenerator>,
}

/// Engine lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepState {
    /// Constructed, nothing claimed.
    Idle,
    /// Claiming exclusive device handles.
    Connecting,
    /// Cooling check, grating and wavelength setup, homing.
    Preconditioning,
    /// Iterating the angle sequence.
    Sweeping,
    /// Releasing hardware (always runs).
    Finalizing,
    /// All angles attempted, manifest closed.
    Completed,
    /// Ended early; manifest closed with the committed prefix.
    Aborted,
}

impl std::fmt::Display for SweepState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            SweepState::Idle => "idle",
            SweepState::Connecting => "connecting",
            SweepState::Preconditioning => "preconditioning",
            SweepState::Sweeping => "sweeping",
            SweepState::Finalizing => "finalizing",
            SweepState::Completed => "completed",
            SweepState::Aborted => "aborted",
        };
        write!(f, "{}", label)
    }
}

/// Legal state transitions.
pub(crate) fn transition_allowed(from: SweepState, to: SweepState) -> bool {
    use SweepState::*;
    matches!(
        (from, to),
        (Idle, Connecting)
            | (Connecting, Preconditioning)
            | (Connecting, Finalizing)
            | (Preconditioning, Sweeping)
            | (Preconditioning, Finalizing)
            | (Sweeping, Finalizing)
            | (Finalizing, Completed)
            | (Finalizing, Aborted)
    )
}

/// What a finished run reports to its caller.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    /// Terminal status.
    pub status: RunStatus,
    /// Number of points committed to the manifest.
    pub points_attempted: u32,
    /// Failure reason when aborted.
    pub reason: Option<String>,
}

/// Sweep orchestration engine.
pub struct SweepEngine {
    config: SweepConfig,
    devices: SweepDevices,
    state: SweepState,
    cancel: CancelToken,
    preview: PreviewChannel,
}

impl SweepEngine {
    /// Build an engine over validated configuration and device handles.
    pub fn new(config: SweepConfig, devices: SweepDevices) -> SweepResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            devices,
            state: SweepState::Idle,
            cancel: CancelToken::new(),
            preview: PreviewChannel::new(),
        })
    }

    /// Token for requesting cancellation from another task (Ctrl-C).
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Subscribe to the live preview mailbox.
    pub fn subscribe_preview(&self) -> PreviewReceiver {
        self.preview.subscribe()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SweepState {
        self.state
    }

    /// Drive one run to completion or abort.
    ///
    /// Always releases the hardware and closes the manifest before
    /// returning. `Err` is reserved for failing to open the sink; every
    /// other failure is reported through the outcome so the committed
    /// prefix stays addressable.
    pub async fn run(mut self, sink: &mut dyn RunSink) -> SweepResult<RunOutcome> {
        let run_id = new_run_id();
        info!(
            %run_id,
            start_deg = self.config.scan.start_deg,
            end_deg = self.config.scan.end_deg,
            points = self.config.scan.points,
            "starting sweep"
        );
        sink.open(&self.run_start(&run_id))?;

        let result = self.execute(sink).await;

        self.transition(SweepState::Finalizing);
        self.finalize().await;

        let (status, points_attempted, reason) = match result {
            Ok(points) => (RunStatus::Completed, points, None),
            Err((err, points)) => {
                error!(error = %err, points_committed = points, "sweep aborted");
                (RunStatus::Aborted, points, Some(err.to_string()))
            }
        };

        let stop = RunStop {
            run_id: run_id.clone(),
            status,
            reason: reason.clone(),
            points_attempted,
            finished_at: Utc::now(),
        };
        if let Err(err) = sink.close(&stop) {
            warn!(error = %err, "failed to close run manifest");
        }

        self.transition(match status {
            RunStatus::Completed => SweepState::Completed,
            RunStatus::Aborted => SweepState::Aborted,
        });
        info!(%run_id, %status, points_attempted, "sweep finished");

        Ok(RunOutcome {
            status,
            points_attempted,
            reason,
        })
    }

    fn run_start(&self, run_id: &str) -> RunStart {
        RunStart {
            run_id: run_id.to_string(),
            created_at: Utc::now(),
            start_angle_deg: self.config.scan.start_deg,
            end_angle_deg: self.config.scan.end_deg,
            points: self.config.scan.points,
            target_wavelength_nm: self.config.spectrometer.target_wavelength_nm,
            grating_index: self.config.spectrometer.grating_index,
            presets_s: self.config.acquisition.presets_s.clone(),
            saturation_threshold: self.config.acquisition.saturation_threshold,
        }
    }

    /// Connect, precondition and sweep. On error, reports how many points
    /// were committed before the failure.
    async fn execute(&mut self, sink: &mut dyn RunSink) -> Result<u32, (SweepError, u32)> {
        self.transition(SweepState::Connecting);
        self.connect_all().await.map_err(|e| (e, 0))?;

        self.transition(SweepState::Preconditioning);
        self.precondition().await.map_err(|e| (e, 0))?;

        self.transition(SweepState::Sweeping);
        self.sweep(sink).await
    }

    /// Claim exclusive handles to all three adapters, in a fixed order.
    ///
    /// Fails fast on the first refusal; whatever connected before the
    /// failure is released by the finalizing pass.
    async fn connect_all(&self) -> SweepResult<()> {
        self.devices
            .stage
            .connect()
            .await
            .map_err(SweepError::DeviceUnavailable)?;
        debug!(device = "rotator", "connected");
        self.devices
            .pulser
            .connect()
            .await
            .map_err(SweepError::DeviceUnavailable)?;
        debug!(device = "pulser", "connected");
        self.devices
            .spectrometer
            .connect()
            .await
            .map_err(SweepError::DeviceUnavailable)?;
        debug!(device = "spectrometer", "connected");
        Ok(())
    }

    /// Bring the bench into a known, ready state before the first point.
    async fn precondition(&self) -> SweepResult<()> {
        if self.cancel.is_cancelled() {
            return Err(SweepError::Cancelled);
        }

        self.wait_for_cooling().await?;

        // grating report, informational only
        match self.devices.spectrometer.grating_info().await {
            Ok(gratings) => {
                for grating in gratings {
                    info!(
                        index = grating.index,
                        grooves_per_mm = grating.grooves_per_mm,
                        blaze = %grating.blaze,
                        "installed grating"
                    );
                }
            }
            Err(err) => warn!(error = %err, "could not read grating report"),
        }

        let target_grating = self.config.spectrometer.grating_index;
        let current = self
            .devices
            .spectrometer
            .grating_index()
            .await
            .map_err(SweepError::Device)?;
        if current != target_grating {
            info!(from = current, to = target_grating, "moving grating turret");
            self.devices
                .spectrometer
                .set_grating_index(target_grating)
                .await
                .map_err(SweepError::Device)?;
        }

        let wavelength = self.config.spectrometer.target_wavelength_nm;
        info!(wavelength_nm = wavelength, "moving to target wavelength");
        self.devices
            .spectrometer
            .set_wavelength(wavelength)
            .await
            .map_err(SweepError::Device)?;
        let confirmed = self
            .devices
            .spectrometer
            .wavelength()
            .await
            .map_err(SweepError::Device)?;
        info!(wavelength_nm = confirmed, "wavelength confirmed");

        // program the pulse train, output still disabled
        let pulser_config = &self.config.pulser;
        self.devices
            .pulser
            .configure_pulse(
                pulser_config.pulse_width_s,
                pulser_config.pulse_period_s,
                pulser_config.amplitude_v,
            )
            .await
            .map_err(SweepError::Device)?;

        // known-off trigger before any exposure
        self.devices
            .pulser
            .set_trigger(false)
            .await
            .map_err(SweepError::Device)?;

        info!("homing stage");
        self.devices
            .stage
            .home()
            .await
            .map_err(SweepError::Device)?;

        Ok(())
    }

    /// Poll detector temperature until ready, bounded by the configured
    /// timeout.
    async fn wait_for_cooling(&self) -> SweepResult<()> {
        let cooling = &self.config.spectrometer.cooling;
        self.devices
            .spectrometer
            .set_temperature_setpoint(cooling.target_c)
            .await
            .map_err(SweepError::Device)?;

        let started = Instant::now();
        loop {
            if self.cancel.is_cancelled() {
                return Err(SweepError::Cancelled);
            }
            let temperature = self
                .devices
                .spectrometer
                .temperature_celsius()
                .await
                .map_err(SweepError::Device)?;
            if temperature <= cooling.ready_threshold_c {
                info!(temperature_c = temperature, "detector cooled");
                return Ok(());
            }
            let waited = started.elapsed().as_secs_f64();
            if waited >= cooling.timeout_s {
                if cooling.abort_on_timeout {
                    return Err(SweepError::PreconditionTimeout {
                        what: "detector cooling".into(),
                        waited_s: waited,
                    });
                }
                warn!(
                    temperature_c = temperature,
                    waited_s = waited,
                    "cooling timed out, proceeding with a warm detector"
                );
                return Ok(());
            }
            debug!(temperature_c = temperature, "detector still cooling");
            sleep(Duration::from_secs_f64(cooling.poll_interval_s)).await;
        }
    }

    /// Iterate the angle sequence, committing one manifest record per
    /// attempted point.
    async fn sweep(&mut self, sink: &mut dyn RunSink) -> Result<u32, (SweepError, u32)> {
        let angles = angle_sequence(
            self.config.scan.start_deg,
            self.config.scan.end_deg,
            self.config.scan.points,
        );
        let mut selector = ExposureSelector::new(
            self.config.acquisition.presets_s.clone(),
            self.config.acquisition.resume_from_last,
            self.config.acquisition.warning_threshold,
        )
        .map_err(|e| (SweepError::Config(e), 0))?;
        let mut cache = BackgroundCache::new();
        let mut committed = 0u32;

        for (seq, &angle) in angles.iter().enumerate() {
            let seq = seq as u32;
            if self.cancel.is_cancelled() {
                return Err((SweepError::Cancelled, committed));
            }
            info!(
                step = seq + 1,
                total = angles.len(),
                angle_degrees = angle,
                "scan point"
            );

            let mut ctx = AcquireContext {
                spectrometer: self.devices.spectrometer.as_ref(),
                stage: self.devices.stage.as_ref(),
                pulser: self.devices.pulser.as_ref(),
                acquisition: &self.config.acquisition,
                selector: &mut selector,
                cache: &mut cache,
                cancel: &self.cancel,
            };

            match acquire_point(&mut ctx, seq, angle).await {
                Ok(PointOutcome::Completed(point)) => {
                    sink.record_point(&point).map_err(|e| (e, committed))?;
                    committed += 1;
                    self.preview.publish(PreviewUpdate::from_point(&point));
                }
                Ok(PointOutcome::Failed { reason }) => {
                    sink.record_failure(seq, angle, &reason)
                        .map_err(|e| (e, committed))?;
                    committed += 1;
                    if !self.config.policy.continue_after_exhausted_presets {
                        return Err((
                            SweepError::PointFailed {
                                angle_degrees: angle,
                                reason,
                            },
                            committed,
                        ));
                    }
                }
                Err(SweepError::Device(device_err))
                    if !self.config.policy.abort_on_device_error =>
                {
                    warn!(
                        error = %device_err,
                        angle_degrees = angle,
                        "device error on point, continuing per policy"
                    );
                    sink.record_failure(seq, angle, &device_err.to_string())
                        .map_err(|e| (e, committed))?;
                    committed += 1;
                }
                Err(err) => return Err((err, committed)),
            }
        }

        Ok(committed)
    }

    /// Release the bench. Best effort on every device, errors collected
    /// into the log rather than raised.
    async fn finalize(&self) {
        // excitation must never outlive the run
        if let Err(err) = self.devices.pulser.set_trigger(false).await {
            warn!(error = %err, "failed to stop trigger during teardown");
        }
        if let Err(err) = self.devices.stage.home().await {
            warn!(error = %err, "failed to home stage during teardown");
        }
        for (name, result) in [
            ("rotator", self.devices.stage.disconnect().await),
            ("pulser", self.devices.pulser.disconnect().await),
            ("spectrometer", self.devices.spectrometer.disconnect().await),
        ] {
            match result {
                Ok(()) => debug!(device = name, "disconnected"),
                Err(err) => warn!(device = name, error = %err, "failed to disconnect"),
            }
        }
    }

    fn transition(&mut self, to: SweepState) {
        if !transition_allowed(self.state, to) {
            // indicates a control-flow bug, not a runtime condition
            error!(from = %self.state, to = %to, "illegal state transition");
            debug_assert!(false, "illegal state transition {} -> {}", self.state, to);
        }
        debug!(from = %self.state, to = %to, "state transition");
        self.state = to;
    }
}

/// Linearly spaced angle sequence, rounded to 0.01 degrees.
pub(crate) fn angle_sequence(start_deg: f64, end_deg: f64, points: u32) -> Vec<f64> {
    let round2 = |x: f64| (x * 100.0).round() / 100.0;
    if points <= 1 {
        return vec![round2(start_deg)];
    }
    let step = (end_deg - start_deg) / (points - 1) as f64;
    (0..points)
        .map(|i| round2(start_deg + step * i as f64))
        .collect()
}
