//! End-to-end sweep tests over the simulated bench and the filesystem
//! run writer.

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use ase_core::config::SweepConfig;
use ase_core::run::{PointOutcomeRecord, RunRecord, RunStatus};
use ase_driver_mock::{
    MockPulser, MockRotator, MockRotatorConfig, MockSpectrometer, MockSpectrometerConfig,
    SimulatedBench,
};
use ase_engine::{SweepDevices, SweepEngine};
use ase_storage::RunWriter;

struct Bench {
    bench: Arc<SimulatedBench>,
    stage: Arc<MockRotator>,
    spectrometer: Arc<MockSpectrometer>,
    pulser: Arc<MockPulser>,
}

fn bench() -> Bench {
    bench_with(MockSpectrometerConfig::default())
}

fn bench_with(spectrometer_config: MockSpectrometerConfig) -> Bench {
    let bench = SimulatedBench::new();
    let stage = Arc::new(MockRotator::with_config(MockRotatorConfig {
        time_per_degree: Duration::ZERO,
        ..MockRotatorConfig::default()
    }));
    let spectrometer = Arc::new(MockSpectrometer::with_config(
        bench.clone(),
        MockSpectrometerConfig {
            readout_time: Duration::ZERO,
            ..spectrometer_config
        },
    ));
    let pulser = Arc::new(MockPulser::new(bench.clone()));
    Bench {
        bench,
        stage,
        spectrometer,
        pulser,
    }
}

fn devices(bench: &Bench) -> SweepDevices {
    SweepDevices {
        stage: bench.stage.clone(),
        spectrometer: bench.spectrometer.clone(),
        pulser: bench.pulser.clone(),
    }
}

fn fast_config(save_dir: &Path, points: u32) -> SweepConfig {
    let mut config = SweepConfig::default();
    config.save_dir = save_dir.to_path_buf();
    config.scan.start_deg = 85.0;
    config.scan.end_deg = 280.0;
    config.scan.points = points;
    config.acquisition.presets_s = vec![0.2, 0.1];
    config.acquisition.saturation_threshold = 1000.0;
    config.acquisition.warning_threshold = None;
    config.acquisition.pause_after_move_s = 0.0;
    config.acquisition.trigger_settle_s = 0.0;
    config.acquisition.denoiser_window = 0;
    config.spectrometer.cooling.poll_interval_s = 0.005;
    config.spectrometer.cooling.timeout_s = 1.0;
    config
}

fn manifest_records(run_dir: &Path) -> Vec<RunRecord> {
    let text = fs::read_to_string(run_dir.join("manifest.jsonl")).unwrap();
    text.lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

#[tokio::test]
async fn completes_a_sweep_in_angle_order() {
    let bench = bench();
    // one acceptable frame per angle
    for _ in 0..3 {
        bench.spectrometer.push_signal_peak(400.0);
    }

    let save = tempfile::tempdir().unwrap();
    let config = fast_config(save.path(), 3);
    let engine = SweepEngine::new(config, devices(&bench)).unwrap();
    let preview = engine.subscribe_preview();
    let mut writer = RunWriter::create(save.path()).unwrap();

    let outcome = engine.run(&mut writer).await.unwrap();
    assert_eq!(outcome.status, RunStatus::Completed);
    assert_eq!(outcome.points_attempted, 3);
    assert!(outcome.reason.is_none());

    let records = manifest_records(writer.run_dir());
    assert!(matches!(records.first(), Some(RunRecord::Start(_))));
    assert!(matches!(records.last(), Some(RunRecord::Stop(_))));
    let angles: Vec<f64> = records
        .iter()
        .filter_map(|r| match r {
            RunRecord::Point(p) => Some(p.angle_degrees),
            _ => None,
        })
        .collect();
    assert_eq!(angles, vec![85.0, 182.5, 280.0]);

    // teardown left the bench quiescent
    assert!(!bench.bench.trigger_on());
    assert!(bench.stage.is_homed());
    // preconditioning programmed the pulse train
    assert!(bench.pulser.pulse_settings().is_some());

    // the preview mailbox holds the newest point, even after the run ended
    let latest = preview.borrow().clone().unwrap();
    assert_eq!(latest.seq, 2);
    assert_eq!(latest.angle_degrees, 280.0);
}

#[tokio::test]
async fn same_preset_across_angles_reuses_one_background() {
    let bench = bench();
    for _ in 0..3 {
        bench.spectrometer.push_signal_peak(400.0);
    }

    let save = tempfile::tempdir().unwrap();
    let config = fast_config(save.path(), 3);
    let engine = SweepEngine::new(config, devices(&bench)).unwrap();
    let mut writer = RunWriter::create(save.path()).unwrap();

    let outcome = engine.run(&mut writer).await.unwrap();
    assert_eq!(outcome.status, RunStatus::Completed);

    // one trigger-off exposure for the whole run; angles 2 and 3 hit the cache
    assert_eq!(bench.spectrometer.background_acquisitions(), 1);
    assert_eq!(bench.spectrometer.signal_acquisitions(), 3);

    let records = manifest_records(writer.run_dir());
    let cached_flags: Vec<bool> = records
        .iter()
        .filter_map(|r| match r {
            RunRecord::Point(p) => match &p.outcome {
                PointOutcomeRecord::Completed {
                    background_from_cache,
                    ..
                } => Some(*background_from_cache),
                _ => None,
            },
            _ => None,
        })
        .collect();
    assert_eq!(cached_flags, vec![false, true, true]);
}

#[tokio::test]
async fn exhausted_point_is_recorded_and_sweep_continues() {
    let bench = bench();
    // angle 1 ok, angle 2 saturates both presets, angle 3 ok
    bench.spectrometer.push_signal_peak(400.0);
    bench.spectrometer.push_signal_peak(5000.0);
    bench.spectrometer.push_signal_peak(5000.0);
    bench.spectrometer.push_signal_peak(300.0);

    let save = tempfile::tempdir().unwrap();
    let config = fast_config(save.path(), 3);
    let engine = SweepEngine::new(config, devices(&bench)).unwrap();
    let mut writer = RunWriter::create(save.path()).unwrap();

    let outcome = engine.run(&mut writer).await.unwrap();
    assert_eq!(outcome.status, RunStatus::Completed);
    assert_eq!(outcome.points_attempted, 3);

    let records = manifest_records(writer.run_dir());
    let outcomes: Vec<bool> = records
        .iter()
        .filter_map(|r| match r {
            RunRecord::Point(p) => {
                Some(matches!(p.outcome, PointOutcomeRecord::Completed { .. }))
            }
            _ => None,
        })
        .collect();
    assert_eq!(outcomes, vec![true, false, true]);
}

#[tokio::test]
async fn unavailable_device_aborts_before_the_sweep() {
    let bench = bench();
    bench.pulser.set_refuse_connect(true);

    let save = tempfile::tempdir().unwrap();
    let config = fast_config(save.path(), 3);
    let engine = SweepEngine::new(config, devices(&bench)).unwrap();
    let mut writer = RunWriter::create(save.path()).unwrap();

    let outcome = engine.run(&mut writer).await.unwrap();
    assert_eq!(outcome.status, RunStatus::Aborted);
    assert_eq!(outcome.points_attempted, 0);
    assert!(outcome.reason.unwrap().contains("unavailable"));

    // manifest still closed: start + stop
    let records = manifest_records(writer.run_dir());
    assert_eq!(records.len(), 2);
    assert!(matches!(records[1], RunRecord::Stop(_)));
}

#[tokio::test]
async fn device_failure_mid_run_aborts_with_teardown() {
    let bench = bench();
    bench
        .stage
        .inject_move_failure(ase_core::error::DeviceErrorKind::Timeout);

    let save = tempfile::tempdir().unwrap();
    let config = fast_config(save.path(), 3);
    let engine = SweepEngine::new(config, devices(&bench)).unwrap();
    let mut writer = RunWriter::create(save.path()).unwrap();

    let outcome = engine.run(&mut writer).await.unwrap();
    assert_eq!(outcome.status, RunStatus::Aborted);
    assert_eq!(outcome.points_attempted, 0);
    assert!(outcome.reason.unwrap().contains("rotator"));
    assert!(!bench.bench.trigger_on());
}

#[tokio::test]
async fn cancellation_aborts_with_hardware_released() {
    let bench = bench();
    let save = tempfile::tempdir().unwrap();
    let config = fast_config(save.path(), 3);
    let engine = SweepEngine::new(config, devices(&bench)).unwrap();
    let cancel = engine.cancel_token();
    cancel.cancel();

    let mut writer = RunWriter::create(save.path()).unwrap();
    let outcome = engine.run(&mut writer).await.unwrap();

    assert_eq!(outcome.status, RunStatus::Aborted);
    assert_eq!(outcome.points_attempted, 0);
    assert!(outcome.reason.unwrap().contains("cancelled"));
    assert!(!bench.bench.trigger_on());
    assert!(bench.stage.is_homed());

    let records = manifest_records(writer.run_dir());
    assert!(matches!(records.last(), Some(RunRecord::Stop(_))));
}

#[tokio::test]
async fn cooling_timeout_aborts_by_default() {
    let bench = bench_with(MockSpectrometerConfig {
        cooling_rate_c_per_poll: 0.0, // never cools
        ..MockSpectrometerConfig::default()
    });

    let save = tempfile::tempdir().unwrap();
    let mut config = fast_config(save.path(), 3);
    config.spectrometer.cooling.timeout_s = 0.02;
    let engine = SweepEngine::new(config, devices(&bench)).unwrap();
    let mut writer = RunWriter::create(save.path()).unwrap();

    let outcome = engine.run(&mut writer).await.unwrap();
    assert_eq!(outcome.status, RunStatus::Aborted);
    assert!(outcome.reason.unwrap().contains("detector cooling"));
}

#[tokio::test]
async fn cooling_timeout_can_warn_and_continue() {
    let bench = bench_with(MockSpectrometerConfig {
        cooling_rate_c_per_poll: 0.0,
        ..MockSpectrometerConfig::default()
    });
    bench.spectrometer.push_signal_peak(400.0);

    let save = tempfile::tempdir().unwrap();
    let mut config = fast_config(save.path(), 1);
    config.spectrometer.cooling.timeout_s = 0.02;
    config.spectrometer.cooling.abort_on_timeout = false;
    let engine = SweepEngine::new(config, devices(&bench)).unwrap();
    let mut writer = RunWriter::create(save.path()).unwrap();

    let outcome = engine.run(&mut writer).await.unwrap();
    assert_eq!(outcome.status, RunStatus::Completed);
    assert_eq!(outcome.points_attempted, 1);
}

#[tokio::test]
async fn stop_on_first_failed_point_when_policy_forbids_continuing() {
    let bench = bench();
    bench.spectrometer.push_signal_peak(5000.0);
    bench.spectrometer.push_signal_peak(5000.0);

    let save = tempfile::tempdir().unwrap();
    let mut config = fast_config(save.path(), 3);
    config.policy.continue_after_exhausted_presets = false;
    let engine = SweepEngine::new(config, devices(&bench)).unwrap();
    let mut writer = RunWriter::create(save.path()).unwrap();

    let outcome = engine.run(&mut writer).await.unwrap();
    assert_eq!(outcome.status, RunStatus::Aborted);
    // the failed point itself was still committed
    assert_eq!(outcome.points_attempted, 1);
    assert!(outcome.reason.unwrap().contains("failed"));
}
