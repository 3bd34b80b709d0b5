//! Scan-point acquisition pipeline.
//!
//! One call acquires everything a single angle needs: stage motion, the
//! auto-ranged signal frame, a matching background (cached or fresh),
//! denoising and subtraction. The causal ordering is fixed by physics and
//! must not be rearranged: motion completes before exposure, the trigger
//! runs only during signal exposures, and backgrounds are taken with the
//! trigger confirmed off.
//!
//! The trigger ends in the off state on every exit path — success,
//! exhausted presets, device failure or cancellation.

use tokio::time::{sleep, Duration};
use tracing::{debug, info, warn};

use ase_core::capabilities::{PulseGenerator, RotationStage, Spectrometer};
use ase_core::config::AcquisitionConfig;
use ase_core::data::Spectrum;
use ase_core::error::{SweepError, SweepResult};
use ase_core::run::ScanPoint;

use crate::background::BackgroundCache;
use crate::cancel::CancelToken;
use crate::exposure::ExposureSelector;

/// Everything the pipeline borrows for one point.
///
/// The selector and cache are owned by the sweep engine and live across
/// angles; the pipeline mutates them through these borrows on the single
/// control task.
pub struct AcquireContext<'a> {
    /// Spectrometer handle.
    pub spectrometer: &'a dyn Spectrometer,
    /// Rotation stage handle.
    pub stage: &'a dyn RotationStage,
    /// Pulse generator handle.
    pub pulser: &'a dyn PulseGenerator,
    /// Acquisition parameters.
    pub acquisition: &'a AcquisitionConfig,
    /// Cross-angle exposure memory.
    pub selector: &'a mut ExposureSelector,
    /// Per-run background store.
    pub cache: &'a mut BackgroundCache,
    /// Cancellation flag, polled between atomic steps.
    pub cancel: &'a CancelToken,
}

/// Result of one attempted angle.
#[derive(Debug)]
pub enum PointOutcome {
    /// Point fully acquired.
    Completed(Box<ScanPoint>),
    /// Point given up on; the sweep may continue.
    Failed {
        /// Why the point failed.
        reason: String,
    },
}

/// Acquire one scan point at the given angle.
///
/// Recoverable failures (preset exhaustion) return
/// [`PointOutcome::Failed`]; adapter failures and cancellation propagate
/// as errors after the trigger has been quiesced.
pub async fn acquire_point(
    ctx: &mut AcquireContext<'_>,
    seq: u32,
    angle_degrees: f64,
) -> SweepResult<PointOutcome> {
    debug!(seq, angle_degrees, "moving stage");
    ctx.stage
        .move_abs(angle_degrees)
        .await
        .map_err(SweepError::Device)?;
    let arrived = ctx.stage.position().await.map_err(SweepError::Device)?;
    debug!(seq, arrived_degrees = arrived, "stage settled");
    sleep_s(ctx.acquisition.pause_after_move_s).await;

    let (raw_signal, integration_time_s) = match acquire_signal(ctx, seq, angle_degrees).await? {
        SignalAttempt::Accepted {
            frame,
            integration_time_s,
        } => (frame, integration_time_s),
        SignalAttempt::Exhausted { reason } => {
            return Ok(PointOutcome::Failed { reason });
        }
    };

    // Background resolution. The trigger is already off here; a cache
    // miss costs one extra exposure, a hit costs nothing.
    let (background, background_from_cache) = match ctx.cache.get(integration_time_s) {
        Some(cached) => {
            debug!(integration_time_s, "background cache hit");
            (cached, true)
        }
        None => {
            if ctx.cancel.is_cancelled() {
                return Err(SweepError::Cancelled);
            }
            // excitation must be confirmed off before a dark exposure
            if ctx
                .pulser
                .is_triggering()
                .await
                .map_err(SweepError::Device)?
            {
                ctx.pulser
                    .set_trigger(false)
                    .await
                    .map_err(SweepError::Device)?;
            }
            info!(integration_time_s, "acquiring background");
            let frame = ctx
                .spectrometer
                .acquire(integration_time_s, ctx.acquisition.accumulations)
                .await
                .map_err(SweepError::Device)?;
            let denoised = frame.smoothed(ctx.acquisition.denoiser_window as usize);
            (ctx.cache.put(integration_time_s, denoised), false)
        }
    };

    let max_counts = raw_signal.max_counts();
    let mut signal = raw_signal.smoothed(ctx.acquisition.denoiser_window as usize);
    signal.meta.angle_degrees = Some(angle_degrees);
    let net = signal
        .subtract(&background)
        .map_err(SweepError::Processing)?;
    let native_signal = ctx
        .spectrometer
        .export_native(&signal)
        .await
        .map_err(SweepError::Device)?;

    ctx.selector.commit(max_counts);
    info!(
        seq,
        angle_degrees,
        integration_time_s,
        max_counts,
        background_from_cache,
        "point acquired"
    );

    Ok(PointOutcome::Completed(Box::new(ScanPoint {
        seq,
        angle_degrees,
        integration_time_s,
        max_counts,
        signal,
        background,
        net,
        background_from_cache,
        native_signal,
    })))
}

/// Result of the auto-ranging attempt loop.
enum SignalAttempt {
    Accepted {
        frame: Spectrum,
        integration_time_s: f64,
    },
    Exhausted {
        reason: String,
    },
}

/// Step down the preset ladder until a frame comes back unsaturated.
///
/// Leaves the trigger off on every return path.
async fn acquire_signal(
    ctx: &mut AcquireContext<'_>,
    seq: u32,
    angle_degrees: f64,
) -> SweepResult<SignalAttempt> {
    ctx.selector.begin_angle();
    let mut previous_saturated = false;

    loop {
        if ctx.cancel.is_cancelled() {
            quiesce_trigger(ctx.pulser).await;
            return Err(SweepError::Cancelled);
        }

        let integration_time_s = match ctx.selector.next(previous_saturated) {
            Ok(time) => time,
            Err(exhausted) => {
                quiesce_trigger(ctx.pulser).await;
                warn!(seq, angle_degrees, %exhausted, "giving up on point");
                return Ok(SignalAttempt::Exhausted {
                    reason: exhausted.to_string(),
                });
            }
        };

        debug!(seq, integration_time_s, "trying signal exposure");
        if let Err(err) = ctx.pulser.set_trigger(true).await {
            quiesce_trigger(ctx.pulser).await;
            return Err(SweepError::Device(err));
        }
        sleep_s(ctx.acquisition.trigger_settle_s).await;

        let frame = match ctx
            .spectrometer
            .acquire(integration_time_s, ctx.acquisition.accumulations)
            .await
        {
            Ok(frame) => frame,
            Err(err) => {
                quiesce_trigger(ctx.pulser).await;
                return Err(SweepError::Device(err));
            }
        };

        ctx.pulser
            .set_trigger(false)
            .await
            .map_err(SweepError::Device)?;
        sleep_s(ctx.acquisition.trigger_settle_s).await;

        // Saturation is judged on raw counts; smoothing could hide a
        // clipped peak.
        if frame.is_saturated(ctx.acquisition.saturation_threshold) {
            warn!(
                seq,
                integration_time_s,
                max_counts = frame.max_counts(),
                "frame saturated, stepping down"
            );
            previous_saturated = true;
            continue;
        }

        return Ok(SignalAttempt::Accepted {
            frame,
            integration_time_s,
        });
    }
}

/// Best-effort trigger shutdown for cleanup paths.
async fn quiesce_trigger(pulser: &dyn PulseGenerator) {
    if let Err(err) = pulser.set_trigger(false).await {
        warn!(error = %err, "failed to disable trigger during cleanup");
    }
}

async fn sleep_s(seconds: f64) {
    if seconds > 0.0 {
        sleep(Duration::from_secs_f64(seconds)).await;
    }
}
