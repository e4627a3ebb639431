// THEORY:
// The frame stream decouples the camera from the analysis. Two tokio tasks run
// side by side:
//
//   capture loop  (fast, ~30 ms) ── publish ──▶ LatestFrame ──▶ latest_since ── analysis loop (slow, ~100 ms)
//
// Key architectural principles:
// 1.  **Single slot, no queue:** `LatestFrame` holds exactly one frame. The
//     producer overwrites it; the consumer copies it out under the lock. Frames
//     the consumer was too slow for are skipped silently, so there is no backlog
//     and the producer never waits on the consumer.
// 2.  **Never analyse the same frame twice:** Each published frame carries an id.
//     The analysis loop only takes a frame newer than the last one it saw, so a
//     capture stall delays analysis instead of repeating it.
// 3.  **Cooperative stop:** Both loops check a shared `StopFlag` once per
//     iteration. Stopping is observed within one interval, never instantly.
// 4.  **Events, not callbacks:** End of stream and tick results are reported
//     through the `StreamObserver` trait, keeping the core free of driver code.

use crate::config::StreamConfig;
use crate::core_modules::frame::Frame;
use crate::error::{MonitorError, Result};
use crate::pipeline::{MonitorPipeline, TickOutcome};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// The pipeline as shared between the analysis loop and the driver.
pub type SharedPipeline = Arc<Mutex<MonitorPipeline>>;

pub fn share(pipeline: MonitorPipeline) -> SharedPipeline {
    Arc::new(Mutex::new(pipeline))
}

/// Locks a shared pipeline. A panic in another holder does not leave the
/// pipeline half-updated, so a poisoned lock is recovered rather than propagated.
pub fn lock_pipeline(pipeline: &SharedPipeline) -> MutexGuard<'_, MonitorPipeline> {
    pipeline.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Single-slot handoff holding the most recent frame and its id.
#[derive(Clone, Default)]
pub struct LatestFrame {
    slot: Arc<Mutex<Option<(u64, Frame)>>>,
}

impl LatestFrame {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self) -> MutexGuard<'_, Option<(u64, Frame)>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replaces the held frame. Returns the id given to it; ids start at 1.
    pub fn publish(&self, frame: Frame) -> u64 {
        let mut slot = self.slot();
        let id = slot.as_ref().map_or(1, |(id, _)| id + 1);
        *slot = Some((id, frame));
        id
    }

    /// A copy of the held frame, if any.
    pub fn latest(&self) -> Option<(u64, Frame)> {
        self.slot().clone()
    }

    /// A copy of the held frame only if it is newer than `seen`.
    pub fn latest_since(&self, seen: u64) -> Option<(u64, Frame)> {
        self.slot()
            .as_ref()
            .filter(|(id, _)| *id > seen)
            .map(|(id, frame)| (*id, frame.clone()))
    }
}

/// Result of asking a source for a frame. Never blocks.
#[derive(Debug, Clone)]
pub enum SourceFrame {
    Frame(Frame),
    /// Nothing new yet; ask again next interval.
    NotReady,
    /// The source is exhausted (e.g. a video file reached its end).
    EndOfStream,
}

pub trait FrameSource: Send + 'static {
    fn grab(&mut self) -> Result<SourceFrame>;
}

/// Receives stream events. Every method has a no-op default.
pub trait StreamObserver: Send + Sync + 'static {
    fn on_end_of_stream(&self) {}

    fn on_tick(&self, _outcome: &TickOutcome, _threshold_exceeded: bool) {}

    fn on_error(&self, _error: &MonitorError) {}
}

/// Pauses the analysis once the source runs dry.
pub struct PauseOnEndOfStream {
    pipeline: SharedPipeline,
}

impl PauseOnEndOfStream {
    pub fn new(pipeline: SharedPipeline) -> Self {
        Self { pipeline }
    }
}

impl StreamObserver for PauseOnEndOfStream {
    fn on_end_of_stream(&self) {
        lock_pipeline(&self.pipeline).toggle_pause(Some(true));
    }
}

/// Shared stop request for both loops.
#[derive(Debug, Clone, Default)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Handles to the running capture and analysis tasks.
pub struct StreamRunner {
    stop: StopFlag,
    latest: LatestFrame,
    capture: JoinHandle<()>,
    analysis: JoinHandle<()>,
}

impl StreamRunner {
    /// Starts both loops on the current tokio runtime.
    pub fn spawn<S>(
        source: S,
        pipeline: SharedPipeline,
        observer: Arc<dyn StreamObserver>,
        config: &StreamConfig,
    ) -> Self
    where
        S: FrameSource,
    {
        let stop = StopFlag::new();
        let latest = LatestFrame::new();

        let capture = tokio::spawn(capture_loop(
            source,
            latest.clone(),
            stop.clone(),
            Arc::clone(&observer),
            Duration::from_millis(config.capture_interval_ms.max(1)),
        ));
        let analysis = tokio::spawn(analysis_loop(
            pipeline,
            latest.clone(),
            stop.clone(),
            observer,
            Duration::from_millis(config.analysis_interval_ms.max(1)),
        ));
        info!(
            capture_ms = config.capture_interval_ms,
            analysis_ms = config.analysis_interval_ms,
            "frame stream started"
        );

        Self {
            stop,
            latest,
            capture,
            analysis,
        }
    }

    pub fn stop_flag(&self) -> StopFlag {
        self.stop.clone()
    }

    pub fn latest_frame(&self) -> &LatestFrame {
        &self.latest
    }

    /// Asks both loops to finish after their current iteration.
    pub fn stop(&self) {
        info!("frame stream stop requested");
        self.stop.stop();
    }

    /// Waits for both loops to exit. Call `stop` first or this waits forever.
    pub async fn join(self) -> Result<()> {
        let (capture, analysis) = tokio::join!(self.capture, self.analysis);
        capture?;
        analysis?;
        info!("frame stream stopped");
        Ok(())
    }
}

async fn capture_loop<S: FrameSource>(
    mut source: S,
    latest: LatestFrame,
    stop: StopFlag,
    observer: Arc<dyn StreamObserver>,
    period: Duration,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;
        if stop.is_stopped() {
            break;
        }
        match source.grab() {
            Ok(SourceFrame::Frame(frame)) => {
                let id = latest.publish(frame);
                debug!(id, "frame captured");
            }
            Ok(SourceFrame::NotReady) => {}
            Ok(SourceFrame::EndOfStream) => {
                info!("frame source reached end of stream");
                observer.on_end_of_stream();
                break;
            }
            Err(err) => warn!(%err, "frame grab failed"),
        }
    }
}

async fn analysis_loop(
    pipeline: SharedPipeline,
    latest: LatestFrame,
    stop: StopFlag,
    observer: Arc<dyn StreamObserver>,
    period: Duration,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut seen = 0;
    loop {
        ticker.tick().await;
        if stop.is_stopped() {
            break;
        }
        let Some((id, frame)) = latest.latest_since(seen) else {
            continue;
        };
        seen = id;

        let (result, exceeded) = {
            let mut guard = lock_pipeline(&pipeline);
            let result = guard.update(&frame);
            (result, guard.is_threshold_exceeded())
        };
        match result {
            Ok(outcome) => observer.on_tick(&outcome, exceeded),
            Err(err) => {
                error!(%err, frame = id, "analysis tick failed");
                observer.on_error(&err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn frame(level: u8) -> Frame {
        Frame::from_image(RgbImage::from_pixel(4, 4, Rgb([level, level, level])))
    }

    #[test]
    fn latest_frame_overwrites_and_counts() {
        let slot = LatestFrame::new();
        assert!(slot.latest().is_none());
        assert_eq!(slot.publish(frame(1)), 1);
        assert_eq!(slot.publish(frame(2)), 2);
        let (id, held) = slot.latest().unwrap();
        assert_eq!(id, 2);
        assert_eq!(held, frame(2));
    }

    #[test]
    fn latest_since_skips_already_seen_frames() {
        let slot = LatestFrame::new();
        slot.publish(frame(1));
        assert!(slot.latest_since(0).is_some());
        assert!(slot.latest_since(1).is_none());
        slot.publish(frame(3));
        assert_eq!(slot.latest_since(1).map(|(id, _)| id), Some(2));
    }

    #[test]
    fn stop_flag_is_shared_between_clones() {
        let flag = StopFlag::new();
        let other = flag.clone();
        assert!(!other.is_stopped());
        flag.stop();
        assert!(other.is_stopped());
    }
}
