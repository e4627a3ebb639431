// THEORY:
// The `ColorSampler` reduces a frame in the working colour model to a handful of
// numbers: the mean hue, saturation and value over the sample region. Averaging
// over hundreds of pixels is what makes the downstream signal usable; sensor
// noise on individual pixels cancels out and only coherent colour change
// survives.
//
// An empty region is a hard failure here. A mean over zero pixels is NaN, and a
// NaN fed into the decay filter would poison every later sample, so the caller
// is told explicitly instead.

use crate::core_modules::frame::HsvFrame;
use crate::core_modules::tracker::Mask;
use crate::error::{MonitorError, Result};
use serde::Serialize;

/// Mean colour of the sample region for one analysis tick.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct ColorStats {
    pub h_mean: f64,
    pub s_mean: f64,
    pub v_mean: f64,
}

impl ColorStats {
    pub fn new(h_mean: f64, s_mean: f64, v_mean: f64) -> Self {
        Self {
            h_mean,
            s_mean,
            v_mean,
        }
    }
}

/// Full description of a sampled region: means, spreads and size.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RegionStats {
    pub means: ColorStats,
    /// Population standard deviation per channel.
    pub h_std: f64,
    pub s_std: f64,
    pub v_std: f64,
    /// Number of pixels that contributed.
    pub pixel_count: usize,
}

/// Computes masked colour statistics.
#[derive(Debug, Clone, Copy, Default)]
pub struct ColorSampler;

impl ColorSampler {
    pub fn new() -> Self {
        Self
    }

    /// Channel means over the pixels where `mask > 0`, or over the whole frame
    /// when there is no mask.
    pub fn sample(&self, frame: &HsvFrame, mask: Option<&Mask>) -> Result<ColorStats> {
        self.sample_detailed(frame, mask).map(|stats| stats.means)
    }

    /// Means plus per-channel standard deviation and pixel count.
    pub fn sample_detailed(&self, frame: &HsvFrame, mask: Option<&Mask>) -> Result<RegionStats> {
        if let Some(mask) = mask {
            if mask.width() != frame.width() || mask.height() != frame.height() {
                return Err(MonitorError::MaskSizeMismatch {
                    mask_width: mask.width(),
                    mask_height: mask.height(),
                    frame_width: frame.width(),
                    frame_height: frame.height(),
                });
            }
        }

        let mut sums = [0u64; 3];
        let mut squares = [0u64; 3];
        let mut count = 0usize;

        let mut accumulate = |pixel: [u8; 3]| {
            for channel in 0..3 {
                let value = pixel[channel] as u64;
                sums[channel] += value;
                squares[channel] += value * value;
            }
            count += 1;
        };

        match mask {
            Some(mask) => {
                for (pixel, selector) in frame.pixels().zip(mask.pixels()) {
                    if selector.0[0] > 0 {
                        accumulate(pixel);
                    }
                }
            }
            None => frame.pixels().for_each(&mut accumulate),
        }

        if count == 0 {
            return Err(MonitorError::EmptyRegion);
        }

        let n = count as f64;
        let mean = |channel: usize| sums[channel] as f64 / n;
        let std = |channel: usize| {
            let m = mean(channel);
            (squares[channel] as f64 / n - m * m).max(0.0).sqrt()
        };

        Ok(RegionStats {
            means: ColorStats::new(mean(0), mean(1), mean(2)),
            h_std: std(0),
            s_std: std(1),
            v_std: std(2),
            pixel_count: count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::frame::Frame;
    use approx::assert_relative_eq;
    use image::{GrayImage, Luma, Rgb, RgbImage};

    /// Left half pure red, right half pure blue.
    fn split_frame() -> HsvFrame {
        Frame::from_image(RgbImage::from_fn(10, 4, |x, _| {
            if x < 5 { Rgb([255, 0, 0]) } else { Rgb([0, 0, 255]) }
        }))
        .to_hsv()
    }

    #[test]
    fn unmasked_mean_covers_the_whole_frame() {
        let stats = ColorSampler::new().sample_detailed(&split_frame(), None).unwrap();
        assert_relative_eq!(stats.means.h_mean, 60.0);
        assert_relative_eq!(stats.means.s_mean, 255.0);
        assert_relative_eq!(stats.h_std, 60.0);
        assert_eq!(stats.pixel_count, 40);
    }

    #[test]
    fn mask_restricts_the_mean() {
        let mask = GrayImage::from_fn(10, 4, |x, _| Luma([if x >= 5 { 255 } else { 0 }]));
        let stats = ColorSampler::new().sample(&split_frame(), Some(&mask)).unwrap();
        assert_relative_eq!(stats.h_mean, 120.0);
        assert_relative_eq!(stats.v_mean, 255.0);
    }

    #[test]
    fn empty_mask_is_an_error_not_nan() {
        let mask = GrayImage::new(10, 4);
        let err = ColorSampler::new().sample(&split_frame(), Some(&mask)).unwrap_err();
        assert!(matches!(err, MonitorError::EmptyRegion));
    }

    #[test]
    fn mismatched_mask_is_rejected() {
        let mask = GrayImage::from_pixel(3, 3, Luma([255]));
        let err = ColorSampler::new().sample(&split_frame(), Some(&mask)).unwrap_err();
        assert!(matches!(err, MonitorError::MaskSizeMismatch { mask_width: 3, .. }));
    }
}
