// Demo runner: feeds a synthetic dish whose colour drifts into the monitor and
// reports when the configured profile fires.
//
//   cargo run -- [config.yaml]

use anyhow::{Context, Result};
use assay_vision::config::MonitorConfig;
use assay_vision::core_modules::frame::Frame;
use assay_vision::core_modules::threshold::{ProfileRegistry, ThresholdProfile};
use assay_vision::error::MonitorError;
use assay_vision::frame_stream::{
    self, FrameSource, PauseOnEndOfStream, SourceFrame, StreamObserver, StreamRunner,
};
use assay_vision::pipeline::{MonitorPipeline, TickOutcome};
use image::{Rgb, RgbImage};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const WIDTH: u32 = 320;
const HEIGHT: u32 = 240;
const DISH_RADIUS: f64 = 70.0;
const BACKGROUND: [u8; 3] = [25, 25, 30];
const TOTAL_FRAMES: u32 = 600;
/// Frames before the sample starts changing colour.
const STABLE_FRAMES: u32 = 100;

/// A dish on a dark bench. After `STABLE_FRAMES` the sample slowly shifts
/// from orange towards yellow.
struct SyntheticDish {
    frame_index: u32,
}

impl SyntheticDish {
    fn new() -> Self {
        Self { frame_index: 0 }
    }

    fn render(index: u32) -> Frame {
        let drift = index.saturating_sub(STABLE_FRAMES) as f64 / (TOTAL_FRAMES - STABLE_FRAMES) as f64;
        let sample = [200, (80.0 + 90.0 * drift).round() as u8, 40];
        // Slight wobble so the tracker has something to follow.
        let cx = WIDTH as f64 / 2.0 + 3.0 * (index as f64 * 0.05).sin();
        let cy = HEIGHT as f64 / 2.0 + 2.0 * (index as f64 * 0.03).cos();
        let image = RgbImage::from_fn(WIDTH, HEIGHT, |x, y| {
            let dx = x as f64 - cx;
            let dy = y as f64 - cy;
            if dx * dx + dy * dy <= DISH_RADIUS * DISH_RADIUS {
                Rgb(sample)
            } else {
                Rgb(BACKGROUND)
            }
        });
        Frame::from_image(image)
    }
}

impl FrameSource for SyntheticDish {
    fn grab(&mut self) -> assay_vision::Result<SourceFrame> {
        if self.frame_index >= TOTAL_FRAMES {
            return Ok(SourceFrame::EndOfStream);
        }
        let frame = Self::render(self.frame_index);
        self.frame_index += 1;
        Ok(SourceFrame::Frame(frame))
    }
}

/// Logs alarm transitions and pauses the pipeline when the source ends.
struct ConsoleObserver {
    pause: PauseOnEndOfStream,
    alarmed: AtomicBool,
    finished: AtomicBool,
}

impl StreamObserver for ConsoleObserver {
    fn on_end_of_stream(&self) {
        self.pause.on_end_of_stream();
        self.finished.store(true, Ordering::SeqCst);
    }

    fn on_tick(&self, outcome: &TickOutcome, threshold_exceeded: bool) {
        if let TickOutcome::EmptyRegion { consecutive, .. } = outcome {
            warn!(consecutive, "empty sample region");
        }
        if self.alarmed.swap(threshold_exceeded, Ordering::SeqCst) != threshold_exceeded {
            if threshold_exceeded {
                warn!("ALARM: colour change threshold exceeded");
            } else {
                info!("alarm cleared");
            }
        }
    }

    fn on_error(&self, error: &MonitorError) {
        error!(%error, "monitor reported an error");
    }
}

fn profiles() -> ProfileRegistry {
    [
        ThresholdProfile {
            h_decay: Some(3.0),
            dh: Some(0.0),
            ..ThresholdProfile::new("hue-rise")
        },
        ThresholdProfile {
            v_decay: Some(-10.0),
            ..ThresholdProfile::new("darkening")
        },
    ]
    .into_iter()
    .collect()
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("assay_vision=info")),
        )
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => MonitorConfig::load(&path).with_context(|| format!("loading {path}"))?,
        None => MonitorConfig::default(),
    };
    info!(
        "Analyzer: decay alpha={:.3}, smoothing={:?}; stream: capture={}ms analysis={}ms",
        config.analyzer.decay_alpha,
        config.analyzer.smoothing_window,
        config.stream.capture_interval_ms,
        config.stream.analysis_interval_ms
    );

    let registry = profiles();
    info!("Profiles available: {}", registry.names().join(", "));

    let mut pipeline = MonitorPipeline::new(&config);
    let reference = pipeline
        .set_reference(&SyntheticDish::render(0))
        .context("sampling the reference frame")?;
    info!(
        "Reference: h={:.1} s={:.1} v={:.1}",
        reference.h_mean, reference.s_mean, reference.v_mean
    );
    pipeline.set_profile(registry.get("hue-rise").cloned());

    let pipeline = frame_stream::share(pipeline);
    let observer = Arc::new(ConsoleObserver {
        pause: PauseOnEndOfStream::new(Arc::clone(&pipeline)),
        alarmed: AtomicBool::new(false),
        finished: AtomicBool::new(false),
    });
    let runner = StreamRunner::spawn(
        SyntheticDish::new(),
        Arc::clone(&pipeline),
        observer.clone(),
        &config.stream,
    );

    while !observer.finished.load(Ordering::SeqCst) {
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
    runner.stop();
    runner.join().await?;

    let mut guard = frame_stream::lock_pipeline(&pipeline);
    let history = guard.get_history();
    info!(
        "Recorded {} samples; alarm {}",
        history.len(),
        if guard.is_threshold_exceeded() { "ON" } else { "off" }
    );
    if let Some(snapshot) = guard.latest_sample().map(|s| s.snapshot()) {
        println!("{}", serde_yaml::to_string(&snapshot)?);
    }
    Ok(())
}
