// THEORY:
// The `pipeline` module is the top-level API of the monitor. It wires the
// stages into a single object a driver can call in any order:
//
//   Stage 1: Region   - `EllipseTracker` refreshes the ellipse and its mask.
//   Stage 2: Colour   - the frame is converted to HSV once per tick.
//   Stage 3: Sampling - `ColorSampler` reduces the masked pixels to mean stats.
//   Stage 4: Signal   - `SignalAnalyzer` appends one sample and judges the alarm.
//
// Failures degrade gracefully. A detection miss is absorbed by the tracker. An
// empty sample region skips the tick without advancing the series; only when
// that keeps happening for `max_consecutive_empty_regions` ticks in a row is it
// escalated as an error, since by then the configuration itself is wrong.

use crate::config::MonitorConfig;
use crate::core_modules::color_sampler::{ColorSampler, ColorStats, RegionStats};
use crate::core_modules::conic::Ellipse;
use crate::core_modules::frame::Frame;
use crate::core_modules::signal_analyzer::{SignalAnalyzer, SignalHistory, SignalSample};
use crate::core_modules::threshold::ThresholdProfile;
use crate::core_modules::tracker::{EllipseTracker, Mask, TrackUpdate, TrackerState};
use crate::error::{MonitorError, Result};
use tracing::{debug, info, warn};

/// What a single `update` call did.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TickOutcome {
    /// Analysis is paused; the tracker was not touched.
    Paused,
    /// One sample was appended.
    Advanced { track: TrackUpdate, stats: ColorStats },
    /// The region held no pixels; nothing was appended.
    EmptyRegion { track: TrackUpdate, consecutive: u32 },
}

pub struct MonitorPipeline {
    tracker: EllipseTracker,
    sampler: ColorSampler,
    analyzer: SignalAnalyzer,
    max_consecutive_empty_regions: u32,
    consecutive_empty_regions: u32,
    /// Statistics of the most recent successful sample.
    last_region: Option<RegionStats>,
}

impl MonitorPipeline {
    pub fn new(config: &MonitorConfig) -> Self {
        Self {
            tracker: EllipseTracker::new(&config.tracker),
            sampler: ColorSampler::new(),
            analyzer: SignalAnalyzer::new(&config.analyzer),
            max_consecutive_empty_regions: config.max_consecutive_empty_regions.max(1),
            consecutive_empty_regions: 0,
            last_region: None,
        }
    }

    /// Samples `frame` and makes it the new baseline. The series starts over.
    pub fn set_reference(&mut self, frame: &Frame) -> Result<ColorStats> {
        self.tracker.update(frame);
        let region = self.sample(frame)?;
        self.analyzer.set_reference(region.means);
        self.consecutive_empty_regions = 0;
        self.last_region = Some(region);
        Ok(region.means)
    }

    /// Runs one analysis tick over `frame`.
    pub fn update(&mut self, frame: &Frame) -> Result<TickOutcome> {
        if self.analyzer.is_paused() {
            return Ok(TickOutcome::Paused);
        }

        let track = self.tracker.update(frame);
        match self.sample(frame) {
            Ok(region) => {
                self.consecutive_empty_regions = 0;
                self.last_region = Some(region);
                self.analyzer.update(region.means);
                debug!(?track, pixels = region.pixel_count, "tick advanced");
                Ok(TickOutcome::Advanced {
                    track,
                    stats: region.means,
                })
            }
            Err(MonitorError::EmptyRegion) => {
                self.consecutive_empty_regions += 1;
                let consecutive = self.consecutive_empty_regions;
                if consecutive >= self.max_consecutive_empty_regions {
                    warn!(frames = consecutive, "sample region has been empty for too long");
                    return Err(MonitorError::PersistentEmptyRegion { frames: consecutive });
                }
                warn!(consecutive, "sample region is empty; tick skipped");
                Ok(TickOutcome::EmptyRegion { track, consecutive })
            }
            Err(other) => Err(other),
        }
    }

    fn sample(&self, frame: &Frame) -> Result<RegionStats> {
        let hsv = frame.to_hsv();
        self.sampler.sample_detailed(&hsv, self.tracker.current_mask())
    }

    pub fn toggle_pause(&mut self, state: Option<bool>) -> bool {
        self.analyzer.toggle_pause(state)
    }

    pub fn freeze_mask(&mut self) -> bool {
        self.tracker.freeze_mask()
    }

    pub fn set_ellipse_masking(&mut self, enabled: bool) {
        self.tracker.set_ellipse_masking(enabled);
    }

    pub fn set_profile(&mut self, profile: Option<ThresholdProfile>) {
        self.analyzer.set_profile(profile);
    }

    pub fn set_smoothing_window(&mut self, window: Option<usize>) {
        info!(?window, "smoothing window changed");
        self.analyzer.set_smoothing_window(window);
    }

    pub fn get_history(&mut self) -> SignalHistory {
        self.analyzer.get_history()
    }

    pub fn current_mask(&self) -> Option<&Mask> {
        self.tracker.current_mask()
    }

    pub fn current_ellipse(&self) -> Option<&Ellipse> {
        self.tracker.current_ellipse()
    }

    pub fn inner_ellipse(&self) -> Option<&Ellipse> {
        self.tracker.inner_ellipse()
    }

    pub fn ellipse_score(&self) -> Option<f64> {
        self.tracker.ellipse_score()
    }

    pub fn tracker_state(&self) -> TrackerState {
        self.tracker.state()
    }

    pub fn latest_sample(&self) -> Option<&SignalSample> {
        self.analyzer.latest()
    }

    pub fn last_region(&self) -> Option<&RegionStats> {
        self.last_region.as_ref()
    }

    pub fn reference(&self) -> Option<ColorStats> {
        self.analyzer.reference()
    }

    pub fn sample_count(&self) -> usize {
        self.analyzer.len()
    }

    pub fn is_threshold_exceeded(&self) -> bool {
        self.analyzer.is_threshold_exceeded()
    }

    pub fn is_paused(&self) -> bool {
        self.analyzer.is_paused()
    }

    pub fn is_mask_frozen(&self) -> bool {
        self.tracker.is_mask_frozen()
    }

    pub fn is_ellipse_enabled(&self) -> bool {
        self.tracker.is_ellipse_enabled()
    }
}
