// THEORY:
// The `EllipseTracker` adds memory to region finding. Detection alone is
// stateless and jittery: the fitted outline wobbles by a pixel or two per frame
// and now and then a frame yields nothing at all (motion blur, a hand over the
// dish). The tracker turns that stream of independent detections into one stable
// region of interest.
//
// Key architectural principles:
// 1.  **Temporal smoothing**: a new detection is blended with the previous region,
//     weighted towards the past (`blend_alpha`). Angles are blended across the
//     0/180 seam of an undirected axis.
// 2.  **Graceful degradation**: a frame with no usable candidate reuses the last
//     region with a score of 0. Only if nothing was ever found is there no region.
// 3.  **Safe sampling area**: the mask is rasterised from an *inner* ellipse,
//     shrunk by `ellipse_margin`, so the rim of the dish and anti-aliased edge
//     pixels never contaminate the colour statistics.
// 4.  **Operator control**: the region can be frozen in place, or masking turned
//     off so statistics are computed over the whole frame.
//
// Lifecycle:
//     NoPrior ──detection──▶ Tracking ──freeze──▶ Frozen ──freeze──▶ Tracking
//        ▲                                                    │
//        └────────── masking re-enabled ◀── EllipseDisabled ◀─┘ (masking off, from any state)

use crate::config::TrackerConfig;
use crate::core_modules::conic::{Ellipse, normalize_degrees};
use crate::core_modules::edge_contours::EdgeContourExtractor;
use crate::core_modules::ellipse_scorer::EllipseCandidateScorer;
use crate::core_modules::frame::Frame;
use image::{GrayImage, Luma};
use tracing::{debug, info};

/// Binary sampling mask, one byte per frame pixel, non-zero inside the region.
pub type Mask = GrayImage;

const MASK_ON: u8 = 255;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerState {
    /// No ellipse has been accepted yet.
    NoPrior,
    /// A region is being followed and refreshed every frame.
    Tracking,
    /// Region updates are suspended; the last mask stays in force.
    Frozen,
    /// Masking is off; statistics cover the whole frame.
    EllipseDisabled,
}

/// What a single `update` did to the tracked region.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TrackUpdate {
    /// A candidate was found and blended into the region.
    Detected { score: f64 },
    /// Nothing found; the previous region was kept with score 0.
    Reused,
    /// Nothing found and nothing to fall back on.
    NoRegion,
    /// Updates are frozen; nothing changed.
    Frozen,
    /// Masking is disabled; nothing was detected.
    Disabled,
}

/// Follows the single sample region across frames and owns its mask.
pub struct EllipseTracker {
    extractor: EdgeContourExtractor,
    scorer: EllipseCandidateScorer,
    /// Weight of the previous ellipse when blending (0.6 keeps 60% of the past).
    blend_alpha: f64,
    /// Fraction the tracked ellipse is shrunk by to obtain the mask ellipse.
    ellipse_margin: f64,
    /// The tracked (blended) ellipse. Also the reference for temporal scoring.
    current_ellipse: Option<Ellipse>,
    /// The margin-shrunk ellipse the mask is rasterised from.
    inner_ellipse: Option<Ellipse>,
    /// The sampling mask for the current region. Replaced wholesale on update.
    current_mask: Option<Mask>,
    /// Score of the latest update: the winning candidate's score, or 0 on reuse.
    ellipse_score: Option<f64>,
    is_mask_frozen: bool,
    is_ellipse_enabled: bool,
}

impl EllipseTracker {
    pub fn new(config: &TrackerConfig) -> Self {
        Self {
            extractor: EdgeContourExtractor::new(config.canny_low, config.canny_high),
            scorer: EllipseCandidateScorer::new(config),
            blend_alpha: config.blend_alpha,
            ellipse_margin: config.ellipse_margin,
            current_ellipse: None,
            inner_ellipse: None,
            current_mask: None,
            ellipse_score: None,
            is_mask_frozen: false,
            is_ellipse_enabled: true,
        }
    }

    /// Refreshes the region from a new frame.
    pub fn update(&mut self, frame: &Frame) -> TrackUpdate {
        if !self.is_ellipse_enabled {
            return TrackUpdate::Disabled;
        }
        if self.is_mask_frozen {
            // The frozen region stays put, but its mask must match the frame.
            if let Some(inner) = self.inner_ellipse {
                let resized = self
                    .current_mask
                    .as_ref()
                    .is_none_or(|m| m.width() != frame.width() || m.height() != frame.height());
                if resized {
                    debug!(width = frame.width(), height = frame.height(), "re-rasterising frozen mask");
                    self.current_mask = Some(rasterize_mask(&inner, frame.width(), frame.height()));
                }
            }
            return TrackUpdate::Frozen;
        }

        let contours = self.extractor.extract(frame);
        let candidate = self.scorer.best_candidate(
            &contours,
            frame.width(),
            frame.height(),
            self.current_ellipse.as_ref(),
        );

        match (candidate, self.current_ellipse) {
            (Some(found), previous) => {
                let tracked = match previous {
                    Some(prev) => blend_ellipses(&prev, &found.ellipse, self.blend_alpha),
                    None => found.ellipse,
                };
                self.accept(tracked, found.score, frame.width(), frame.height());
                TrackUpdate::Detected { score: found.score }
            }
            (None, Some(previous)) => {
                debug!("no ellipse candidate this frame; reusing previous region");
                // Rebuild only if the frame size changed under us.
                let stale = self
                    .current_mask
                    .as_ref()
                    .is_none_or(|m| m.width() != frame.width() || m.height() != frame.height());
                if stale {
                    self.accept(previous, 0.0, frame.width(), frame.height());
                } else {
                    self.ellipse_score = Some(0.0);
                }
                TrackUpdate::Reused
            }
            (None, None) => {
                debug!(contours = contours.len(), "no ellipse candidate and no prior region");
                TrackUpdate::NoRegion
            }
        }
    }

    fn accept(&mut self, tracked: Ellipse, score: f64, width: u32, height: u32) {
        let inner = tracked.scaled(1.0 - self.ellipse_margin);
        self.current_mask = Some(rasterize_mask(&inner, width, height));
        self.inner_ellipse = Some(inner);
        self.current_ellipse = Some(tracked);
        self.ellipse_score = Some(score);
    }

    /// Toggles the frozen state and returns whether the mask is now frozen.
    pub fn freeze_mask(&mut self) -> bool {
        self.is_mask_frozen = !self.is_mask_frozen;
        info!(frozen = self.is_mask_frozen, "mask freeze toggled");
        self.is_mask_frozen
    }

    /// Turns masking on or off. Turning it off discards the region entirely.
    pub fn set_ellipse_masking(&mut self, enabled: bool) {
        info!("ellipse fitting was {}", if enabled { "enabled" } else { "disabled" });
        self.is_ellipse_enabled = enabled;
        if !enabled {
            self.reset();
        }
    }

    /// Forgets the tracked region without changing the freeze/enable flags.
    pub fn reset(&mut self) {
        self.current_ellipse = None;
        self.inner_ellipse = None;
        self.current_mask = None;
        self.ellipse_score = None;
    }

    pub fn state(&self) -> TrackerState {
        if !self.is_ellipse_enabled {
            TrackerState::EllipseDisabled
        } else if self.is_mask_frozen {
            TrackerState::Frozen
        } else if self.current_ellipse.is_some() {
            TrackerState::Tracking
        } else {
            TrackerState::NoPrior
        }
    }

    pub fn current_ellipse(&self) -> Option<&Ellipse> {
        self.current_ellipse.as_ref()
    }

    pub fn inner_ellipse(&self) -> Option<&Ellipse> {
        self.inner_ellipse.as_ref()
    }

    pub fn current_mask(&self) -> Option<&Mask> {
        self.current_mask.as_ref()
    }

    pub fn ellipse_score(&self) -> Option<f64> {
        self.ellipse_score
    }

    pub fn is_mask_frozen(&self) -> bool {
        self.is_mask_frozen
    }

    pub fn is_ellipse_enabled(&self) -> bool {
        self.is_ellipse_enabled
    }
}

/// Blends `previous` and `current`, giving `alpha` weight to `previous`.
pub fn blend_ellipses(previous: &Ellipse, current: &Ellipse, alpha: f64) -> Ellipse {
    let mix = |p: f64, c: f64| alpha * p + (1.0 - alpha) * c;
    Ellipse::new(
        (
            mix(previous.center.0, current.center.0),
            mix(previous.center.1, current.center.1),
        ),
        (
            mix(previous.axes.0, current.axes.0),
            mix(previous.axes.1, current.axes.1),
        ),
        blend_angles(previous.angle, current.angle, alpha),
    )
}

/// Weighted mean of two undirected axis angles in degrees.
///
/// When the angles are more than 90 degrees apart, the smaller one is lifted by
/// 180 so both describe the axis from the same side of the seam.
pub fn blend_angles(previous: f64, current: f64, alpha: f64) -> f64 {
    let (mut p, mut c) = (previous, current);
    if (p - c).abs() > 90.0 {
        if p < c {
            p += 180.0;
        } else {
            c += 180.0;
        }
    }
    normalize_degrees(alpha * p + (1.0 - alpha) * c)
}

/// Filled binary mask of `ellipse`, sampled at pixel centres.
pub fn rasterize_mask(ellipse: &Ellipse, width: u32, height: u32) -> Mask {
    let mut mask = GrayImage::new(width, height);
    let reach = ellipse.axes.0 * 0.5;
    let x_range = pixel_span(ellipse.center.0, reach, width);
    let y_range = pixel_span(ellipse.center.1, reach, height);
    for y in y_range {
        for x in x_range.clone() {
            if ellipse.contains(x as f64, y as f64) {
                mask.put_pixel(x, y, Luma([MASK_ON]));
            }
        }
    }
    mask
}

/// Pixel indices within `reach` of `center`, clipped to `[0, limit)`.
fn pixel_span(center: f64, reach: f64, limit: u32) -> std::ops::Range<u32> {
    if limit == 0 || !center.is_finite() || !reach.is_finite() {
        return 0..0;
    }
    let low = (center - reach).floor().max(0.0).min(limit as f64) as u32;
    let high = ((center + reach).ceil() + 1.0).max(0.0).min(limit as f64) as u32;
    low..high.max(low)
}
