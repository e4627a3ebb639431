use approx::assert_relative_eq;
use assay_vision::config::MonitorConfig;
use assay_vision::core_modules::frame::{Frame, rgb_to_hsv};
use assay_vision::core_modules::threshold::ThresholdProfile;
use assay_vision::core_modules::tracker::{TrackUpdate, TrackerState};
use assay_vision::error::MonitorError;
use assay_vision::pipeline::{MonitorPipeline, TickOutcome};
use image::{Rgb, RgbImage};

const BENCH: [u8; 3] = [30, 30, 30];

fn dish(color: [u8; 3]) -> Frame {
    Frame::from_image(RgbImage::from_fn(320, 240, |x, y| {
        let d = ((x as f64 - 160.0).powi(2) + (y as f64 - 120.0).powi(2)).sqrt();
        if d <= 60.0 { Rgb(color) } else { Rgb(BENCH) }
    }))
}

fn bench_only() -> Frame {
    Frame::from_image(RgbImage::from_pixel(320, 240, Rgb(BENCH)))
}

fn advanced_stats(outcome: TickOutcome) -> (TrackUpdate, assay_vision::core_modules::color_sampler::ColorStats) {
    match outcome {
        TickOutcome::Advanced { track, stats } => (track, stats),
        other => panic!("expected an advanced tick, got {other:?}"),
    }
}

#[test]
fn drifting_sample_raises_the_alarm_after_a_stable_period() {
    let orange = [200, 80, 40];
    let amber = [200, 100, 40];
    let mut pipeline = MonitorPipeline::new(&MonitorConfig::default());
    pipeline.set_reference(&dish(orange)).unwrap();
    pipeline.set_profile(Some(ThresholdProfile {
        h_decay: Some(2.0),
        ..ThresholdProfile::new("hue-rise")
    }));

    for _ in 0..5 {
        pipeline.update(&dish(orange)).unwrap();
    }
    assert!(!pipeline.is_threshold_exceeded());
    assert_eq!(pipeline.latest_sample().unwrap().relative.h, 0.0);

    let expected_h = rgb_to_hsv(amber[0], amber[1], amber[2])[0] as f64
        - rgb_to_hsv(orange[0], orange[1], orange[2])[0] as f64;
    assert!(expected_h > 2.0);
    for _ in 0..80 {
        let (track, _) = advanced_stats(pipeline.update(&dish(amber)).unwrap());
        assert!(matches!(track, TrackUpdate::Detected { .. }));
    }
    let latest = pipeline.latest_sample().unwrap();
    assert_relative_eq!(latest.relative.h, expected_h, epsilon = 1e-9);
    assert!(pipeline.is_threshold_exceeded());
    assert_eq!(pipeline.sample_count(), 85);
}

#[test]
fn a_detection_miss_keeps_the_previous_region() {
    let mut pipeline = MonitorPipeline::new(&MonitorConfig::default());
    pipeline.set_reference(&dish([200, 80, 40])).unwrap();
    let ellipse = *pipeline.current_ellipse().unwrap();
    let mask = pipeline.current_mask().unwrap().clone();

    let (track, stats) = advanced_stats(pipeline.update(&bench_only()).unwrap());
    assert_eq!(track, TrackUpdate::Reused);
    assert_eq!(pipeline.ellipse_score(), Some(0.0));
    assert_eq!(pipeline.current_ellipse(), Some(&ellipse));
    assert_eq!(pipeline.current_mask(), Some(&mask));
    // The stale mask now only covers bench.
    assert_relative_eq!(stats.v_mean, 30.0);
}

#[test]
fn disabling_masking_switches_to_full_frame_sampling() {
    let mut pipeline = MonitorPipeline::new(&MonitorConfig::default());
    let frame = dish([200, 80, 40]);
    pipeline.set_reference(&frame).unwrap();
    let (_, masked) = advanced_stats(pipeline.update(&frame).unwrap());
    assert_relative_eq!(masked.v_mean, 200.0);

    pipeline.set_ellipse_masking(false);
    assert!(!pipeline.is_ellipse_enabled());
    assert!(pipeline.current_ellipse().is_none());
    assert!(pipeline.current_mask().is_none());

    let (track, whole) = advanced_stats(pipeline.update(&frame).unwrap());
    assert_eq!(track, TrackUpdate::Disabled);
    assert!(whole.v_mean < 200.0 && whole.v_mean > 30.0);
    assert_eq!(pipeline.last_region().unwrap().pixel_count, 320 * 240);
}

#[test]
fn frozen_mask_survives_a_moving_dish() {
    let mut pipeline = MonitorPipeline::new(&MonitorConfig::default());
    pipeline.set_reference(&dish([200, 80, 40])).unwrap();
    assert!(pipeline.freeze_mask());
    assert_eq!(pipeline.tracker_state(), TrackerState::Frozen);
    let ellipse = *pipeline.current_ellipse().unwrap();

    let (track, _) = advanced_stats(pipeline.update(&bench_only()).unwrap());
    assert_eq!(track, TrackUpdate::Frozen);
    assert_eq!(pipeline.current_ellipse(), Some(&ellipse));
}

#[test]
fn smoothed_history_matches_sample_count() {
    let mut config = MonitorConfig::default();
    config.analyzer.smoothing_window = Some(2);
    let mut pipeline = MonitorPipeline::new(&config);
    pipeline.set_reference(&dish([200, 80, 40])).unwrap();
    for _ in 0..6 {
        pipeline.update(&dish([200, 90, 40])).unwrap();
    }
    let history = pipeline.get_history();
    assert!(history.smoothed);
    assert_eq!(history.len(), 6);
    assert_eq!(history.ddv.len(), 6);
    assert_eq!(pipeline.sample_count(), 6);
}

#[test]
fn frozen_mask_keeps_sampling_after_a_resolution_change() {
    let mut pipeline = MonitorPipeline::new(&MonitorConfig::default());
    pipeline.set_reference(&dish([200, 80, 40])).unwrap();
    pipeline.freeze_mask();

    let larger = Frame::from_image(RgbImage::from_fn(400, 300, |x, y| {
        let d = ((x as f64 - 160.0).powi(2) + (y as f64 - 120.0).powi(2)).sqrt();
        if d <= 60.0 { Rgb([200, 80, 40]) } else { Rgb(BENCH) }
    }));
    let (track, stats) = advanced_stats(pipeline.update(&larger).unwrap());
    assert_eq!(track, TrackUpdate::Frozen);
    assert_relative_eq!(stats.v_mean, 200.0);
    let mask = pipeline.current_mask().unwrap();
    assert_eq!((mask.width(), mask.height()), (400, 300));
}

#[test]
fn empty_regions_skip_ticks_then_escalate() {
    let mut config = MonitorConfig::default();
    // A full margin shrinks the mask ellipse to nothing.
    config.tracker.ellipse_margin = 1.0;
    config.max_consecutive_empty_regions = 3;
    let mut pipeline = MonitorPipeline::new(&config);
    let frame = dish([200, 80, 40]);

    let err = pipeline.set_reference(&frame).unwrap_err();
    assert!(matches!(err, MonitorError::EmptyRegion));

    for expected in 1..=2 {
        match pipeline.update(&frame).unwrap() {
            TickOutcome::EmptyRegion { consecutive, .. } => assert_eq!(consecutive, expected),
            other => panic!("expected an empty region, got {other:?}"),
        }
    }
    let err = pipeline.update(&frame).unwrap_err();
    assert!(matches!(err, MonitorError::PersistentEmptyRegion { frames: 3 }));
    assert_eq!(pipeline.sample_count(), 0);

    // One good tick over the whole frame resets the run.
    pipeline.set_ellipse_masking(false);
    let (track, _) = advanced_stats(pipeline.update(&frame).unwrap());
    assert_eq!(track, TrackUpdate::Disabled);
    assert_eq!(pipeline.sample_count(), 1);

    pipeline.set_ellipse_masking(true);
    match pipeline.update(&frame).unwrap() {
        TickOutcome::EmptyRegion { consecutive, .. } => assert_eq!(consecutive, 1),
        other => panic!("expected an empty region, got {other:?}"),
    }
    assert_eq!(pipeline.sample_count(), 1);
}
