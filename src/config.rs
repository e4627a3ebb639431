use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Tunables for locating and following the sample region.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Weight given to the previous ellipse when blending with a new detection.
    pub blend_alpha: f64,
    /// Fraction by which the tracked ellipse is shrunk before it becomes the mask.
    pub ellipse_margin: f64,
    /// Low hysteresis threshold of the edge detector.
    pub canny_low: f32,
    /// High hysteresis threshold of the edge detector.
    pub canny_high: f32,
    /// Shortest accepted contour perimeter, as a multiple of the frame width.
    pub min_perimeter_ratio: f64,
    /// Longest accepted contour perimeter, as a multiple of the frame width.
    pub max_perimeter_ratio: f64,
    /// Fewest contour points an ellipse is fitted to.
    pub min_contour_points: usize,
    /// Smallest accepted minor/major axis ratio.
    pub min_aspect_ratio: f64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            blend_alpha: 0.6,
            ellipse_margin: 0.1,
            canny_low: 50.0,
            canny_high: 150.0,
            min_perimeter_ratio: 0.4,
            max_perimeter_ratio: 3.0,
            min_contour_points: 5,
            min_aspect_ratio: 0.5,
        }
    }
}

/// Tunables for the temporal signal analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    /// Weight of the newest relative value in the exponential decay filter.
    pub decay_alpha: f64,
    /// Base window of the read-time smoothing cascade; `None` disables smoothing.
    pub smoothing_window: Option<usize>,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            decay_alpha: 0.05,
            smoothing_window: None,
        }
    }
}

/// Cadence of the capture and analysis loops.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub capture_interval_ms: u64,
    pub analysis_interval_ms: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            capture_interval_ms: 30,
            analysis_interval_ms: 100,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub tracker: TrackerConfig,
    pub analyzer: AnalyzerConfig,
    pub stream: StreamConfig,
    /// How many empty sampling regions in a row are tolerated before the
    /// pipeline reports a configuration error instead of skipping the frame.
    pub max_consecutive_empty_regions: u32,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            tracker: TrackerConfig::default(),
            analyzer: AnalyzerConfig::default(),
            stream: StreamConfig::default(),
            max_consecutive_empty_regions: 10,
        }
    }
}

impl MonitorConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_yaml_str(&contents)
    }

    pub fn from_yaml_str(contents: &str) -> Result<Self> {
        let config: MonitorConfig = serde_yaml::from_str(contents)?;
        Ok(config)
    }
}
