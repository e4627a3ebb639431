// THEORY:
// The `SignalAnalyzer` is the temporal memory of the monitor. Every analysis
// tick hands it one `ColorStats`, and it turns that into one appended sample of
// four signals per channel:
//
//   relative = stats − reference
//   decay    = alpha · relative + (1 − alpha) · previous decay   (seeded by the first relative)
//   d1       = decay − previous decay                              (0 on the first sample)
//   d2       = d1 − previous d1, only while the previous d1 is nonzero, else 0
//
// Key architectural principles:
// 1.  **Raw history is authoritative:** Samples are only ever appended, one per
//     `update`. Smoothing happens on a read-time copy in `get_history` and never
//     writes back, so two reads of the same history are identical.
// 2.  **Pause freezes, it does not drop:** While paused, `update` is a no-op and
//     the last sample stays as it was.
// 3.  **One alarm, two timings:** With smoothing off the alarm is re-evaluated on
//     every `update` from the raw latest sample. With smoothing on it is
//     re-evaluated on `get_history`, from the smoothed tail of each series.

use crate::config::AnalyzerConfig;
use crate::core_modules::color_sampler::ColorStats;
use crate::core_modules::smoothing::smooth_cascade;
use crate::core_modules::threshold::{ThresholdEvaluator, ThresholdProfile};
use serde::Serialize;
use std::ops::Sub;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

/// One value per HSV channel.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct Triple {
    pub h: f64,
    pub s: f64,
    pub v: f64,
}

impl Triple {
    pub fn new(h: f64, s: f64, v: f64) -> Self {
        Self { h, s, v }
    }

    fn zip_with(self, other: Self, f: impl Fn(f64, f64) -> f64) -> Self {
        Self::new(f(self.h, other.h), f(self.s, other.s), f(self.v, other.v))
    }
}

impl From<ColorStats> for Triple {
    fn from(stats: ColorStats) -> Self {
        Self::new(stats.h_mean, stats.s_mean, stats.v_mean)
    }
}

impl Sub for Triple {
    type Output = Triple;

    fn sub(self, rhs: Self) -> Self::Output {
        self.zip_with(rhs, |a, b| a - b)
    }
}

/// A single appended point of the recorded signal.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SignalSample {
    pub timestamp: SystemTime,
    pub relative: Triple,
    pub decay: Triple,
    pub first_derivative: Triple,
    pub second_derivative: Triple,
}

impl SignalSample {
    pub fn snapshot(&self) -> SignalSnapshot {
        SignalSnapshot {
            decay: self.decay,
            first_derivative: self.first_derivative,
            second_derivative: self.second_derivative,
        }
    }
}

/// The nine values a threshold profile is checked against.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct SignalSnapshot {
    pub decay: Triple,
    pub first_derivative: Triple,
    pub second_derivative: Triple,
}

/// The full recorded series, as handed to display and export collaborators.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct SignalHistory {
    /// Seconds since the Unix epoch, one per sample.
    pub timestamps: Vec<f64>,
    pub h_relative: Vec<f64>,
    pub s_relative: Vec<f64>,
    pub v_relative: Vec<f64>,
    pub h_decay: Vec<f64>,
    pub s_decay: Vec<f64>,
    pub v_decay: Vec<f64>,
    pub dh: Vec<f64>,
    pub ds: Vec<f64>,
    pub dv: Vec<f64>,
    pub ddh: Vec<f64>,
    pub dds: Vec<f64>,
    pub ddv: Vec<f64>,
    /// Whether the decay and derivative series went through the smoothing cascade.
    pub smoothed: bool,
}

impl SignalHistory {
    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    fn from_samples(samples: &[SignalSample]) -> Self {
        let series = |f: fn(&SignalSample) -> f64| samples.iter().map(f).collect::<Vec<f64>>();
        Self {
            timestamps: samples.iter().map(|s| epoch_seconds(s.timestamp)).collect(),
            h_relative: series(|s| s.relative.h),
            s_relative: series(|s| s.relative.s),
            v_relative: series(|s| s.relative.v),
            h_decay: series(|s| s.decay.h),
            s_decay: series(|s| s.decay.s),
            v_decay: series(|s| s.decay.v),
            dh: series(|s| s.first_derivative.h),
            ds: series(|s| s.first_derivative.s),
            dv: series(|s| s.first_derivative.v),
            ddh: series(|s| s.second_derivative.h),
            dds: series(|s| s.second_derivative.s),
            ddv: series(|s| s.second_derivative.v),
            smoothed: false,
        }
    }

    /// Values at the last index of the decay and derivative series.
    fn tail_snapshot(&self) -> Option<SignalSnapshot> {
        let last = |series: &[f64]| series.last().copied();
        Some(SignalSnapshot {
            decay: Triple::new(last(&self.h_decay)?, last(&self.s_decay)?, last(&self.v_decay)?),
            first_derivative: Triple::new(last(&self.dh)?, last(&self.ds)?, last(&self.dv)?),
            second_derivative: Triple::new(last(&self.ddh)?, last(&self.dds)?, last(&self.ddv)?),
        })
    }
}

fn epoch_seconds(timestamp: SystemTime) -> f64 {
    timestamp
        .duration_since(UNIX_EPOCH)
        .map_or(0.0, |d| d.as_secs_f64())
}

pub struct SignalAnalyzer {
    /// Baseline every sample is measured against.
    reference: Option<Triple>,
    history: Vec<SignalSample>,
    /// Weight of the newest relative value in the decay filter.
    decay_alpha: f64,
    /// Base window of the read-time smoothing cascade, if enabled.
    smoothing_window: Option<usize>,
    profile: Option<ThresholdProfile>,
    /// Snapshot produced by the most recent smoothed read.
    smoothed_snapshot: Option<SignalSnapshot>,
    is_paused: bool,
    is_threshold_exceeded: bool,
}

impl SignalAnalyzer {
    pub fn new(config: &AnalyzerConfig) -> Self {
        Self {
            reference: None,
            history: Vec::new(),
            decay_alpha: config.decay_alpha.clamp(0.0, 1.0),
            smoothing_window: config.smoothing_window.filter(|&w| w > 0),
            profile: None,
            smoothed_snapshot: None,
            is_paused: false,
            is_threshold_exceeded: false,
        }
    }

    /// Stores a new baseline and starts the series over.
    pub fn set_reference(&mut self, stats: ColorStats) {
        info!(h = stats.h_mean, s = stats.s_mean, v = stats.v_mean, "reference set");
        self.reference = Some(stats.into());
        self.clear_history();
    }

    /// Drops every recorded sample, keeping the reference.
    pub fn clear_history(&mut self) {
        self.history.clear();
        self.smoothed_snapshot = None;
        self.set_alarm(false);
    }

    /// Appends one sample stamped with the wall clock. Returns false when paused.
    pub fn update(&mut self, stats: ColorStats) -> bool {
        self.update_at(stats, SystemTime::now())
    }

    /// Appends one sample with an explicit timestamp. Returns false when paused.
    pub fn update_at(&mut self, stats: ColorStats, timestamp: SystemTime) -> bool {
        if self.is_paused {
            return false;
        }
        let current = Triple::from(stats);
        let reference = match self.reference {
            Some(reference) => reference,
            None => {
                warn!("update without a reference; using this sample as the reference");
                self.reference = Some(current);
                current
            }
        };

        let relative = current - reference;
        let sample = match self.history.last() {
            None => SignalSample {
                timestamp,
                relative,
                decay: relative,
                first_derivative: Triple::default(),
                second_derivative: Triple::default(),
            },
            Some(previous) => {
                let alpha = self.decay_alpha;
                let decay = relative.zip_with(previous.decay, |rel, prev| alpha * rel + (1.0 - alpha) * prev);
                let first_derivative = decay - previous.decay;
                let second_derivative = first_derivative.zip_with(previous.first_derivative, second_difference);
                SignalSample {
                    timestamp,
                    relative,
                    decay,
                    first_derivative,
                    second_derivative,
                }
            }
        };
        self.history.push(sample);
        debug!(
            samples = self.history.len(),
            decay_h = sample.decay.h,
            decay_s = sample.decay.s,
            decay_v = sample.decay.v,
            "signal advanced"
        );

        if self.smoothing_window.is_none() {
            self.evaluate(sample.snapshot());
        }
        true
    }

    /// `None` flips the pause state, `Some(state)` sets it. Returns the new state.
    pub fn toggle_pause(&mut self, state: Option<bool>) -> bool {
        self.is_paused = state.unwrap_or(!self.is_paused);
        info!(paused = self.is_paused, "analysis pause toggled");
        self.is_paused
    }

    /// Activates (or with `None`, clears) the threshold profile and re-checks the alarm.
    pub fn set_profile(&mut self, profile: Option<ThresholdProfile>) {
        info!(profile = profile.as_ref().map(|p| p.name.as_str()), "threshold profile changed");
        self.profile = profile;
        match self.current_snapshot() {
            Some(snapshot) => self.evaluate(snapshot),
            None => self.set_alarm(false),
        }
    }

    pub fn set_smoothing_window(&mut self, window: Option<usize>) {
        self.smoothing_window = window.filter(|&w| w > 0);
        self.smoothed_snapshot = None;
    }

    /// The recorded series. With smoothing enabled, the decay and derivative
    /// series are the smoothed cascade and the alarm is re-evaluated on its tail.
    pub fn get_history(&mut self) -> SignalHistory {
        let mut history = SignalHistory::from_samples(&self.history);
        let Some(window) = self.smoothing_window else {
            return history;
        };
        if history.is_empty() {
            return history;
        }

        let h = smooth_cascade(&history.h_decay, window);
        let s = smooth_cascade(&history.s_decay, window);
        let v = smooth_cascade(&history.v_decay, window);
        history.h_decay = h.decay;
        history.s_decay = s.decay;
        history.v_decay = v.decay;
        history.dh = h.first_derivative;
        history.ds = s.first_derivative;
        history.dv = v.first_derivative;
        history.ddh = h.second_derivative;
        history.dds = s.second_derivative;
        history.ddv = v.second_derivative;
        history.smoothed = true;

        if let Some(snapshot) = history.tail_snapshot() {
            self.smoothed_snapshot = Some(snapshot);
            self.evaluate(snapshot);
        }
        history
    }

    /// The snapshot the alarm is currently judged on.
    pub fn current_snapshot(&self) -> Option<SignalSnapshot> {
        match self.smoothing_window {
            Some(_) => self.smoothed_snapshot,
            None => self.history.last().map(SignalSample::snapshot),
        }
    }

    fn evaluate(&mut self, snapshot: SignalSnapshot) {
        let exceeded = ThresholdEvaluator::evaluate_optional(self.profile.as_ref(), &snapshot);
        self.set_alarm(exceeded);
    }

    fn set_alarm(&mut self, exceeded: bool) {
        if exceeded != self.is_threshold_exceeded {
            info!(exceeded, samples = self.history.len(), "threshold state changed");
        }
        self.is_threshold_exceeded = exceeded;
    }

    pub fn reference(&self) -> Option<ColorStats> {
        self.reference.map(|r| ColorStats::new(r.h, r.s, r.v))
    }

    pub fn latest(&self) -> Option<&SignalSample> {
        self.history.last()
    }

    pub fn samples(&self) -> &[SignalSample] {
        &self.history
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    pub fn profile(&self) -> Option<&ThresholdProfile> {
        self.profile.as_ref()
    }

    pub fn is_paused(&self) -> bool {
        self.is_paused
    }

    pub fn is_threshold_exceeded(&self) -> bool {
        self.is_threshold_exceeded
    }
}

// Only differenced while the previous first derivative is nonzero.
fn second_difference(first_derivative: f64, previous_first_derivative: f64) -> f64 {
    if previous_first_derivative != 0.0 {
        first_derivative - previous_first_derivative
    } else {
        0.0
    }
}
