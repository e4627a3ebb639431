// THEORY:
// The `EdgeContourExtractor` is the first, stateless stage of region finding. It
// turns a colour frame into a set of candidate boundaries without knowing
// anything about ellipses:
//
// 1.  **Intensity**: collapse the frame to luma.
// 2.  **Contrast normalisation**: stretch the 2nd..98th percentile range to the
//     full byte range. Percentiles instead of min/max keep a few specular
//     highlights or dead pixels from flattening the whole stretch.
// 3.  **Edges**: Canny with hysteresis.
// 4.  **Contours**: border-following over the edge map, keeping the hierarchy
//     (outer/hole border type and parent index) that the follower produces.
//
// A flat frame has no usable percentile spread. That is not an error; it simply
// yields no contours and the tracker downstream decides what to do about it.

use crate::core_modules::frame::Frame;
use image::{GrayImage, Luma};
use imageproc::contours::{Contour, find_contours};
use imageproc::edges::canny;
use tracing::debug;

const LOW_PERCENTILE: f64 = 2.0;
const HIGH_PERCENTILE: f64 = 98.0;

/// Extracts boundary contours from frames. Holds only the edge thresholds.
#[derive(Debug, Clone)]
pub struct EdgeContourExtractor {
    canny_low: f32,
    canny_high: f32,
}

impl EdgeContourExtractor {
    pub fn new(canny_low: f32, canny_high: f32) -> Self {
        Self {
            canny_low,
            canny_high,
        }
    }

    /// Runs the full intensity → normalise → edges → contours chain.
    pub fn extract(&self, frame: &Frame) -> Vec<Contour<i32>> {
        let gray = frame.to_luma();
        let Some(normalized) = rescale_intensity(&gray) else {
            debug!("flat frame, percentile spread is zero; no contours");
            return Vec::new();
        };
        let edges = canny(&normalized, self.canny_low, self.canny_high);
        find_contours::<i32>(&edges)
    }
}

/// Stretches the 2nd..98th percentile range of `gray` to `[0, 255]`.
/// Returns `None` when the two percentiles coincide.
pub fn rescale_intensity(gray: &GrayImage) -> Option<GrayImage> {
    let (black_point, white_point) = percentile_bounds(gray)?;
    let span = white_point - black_point;
    if span <= f64::EPSILON {
        return None;
    }
    let mut out = GrayImage::new(gray.width(), gray.height());
    for (source, target) in gray.pixels().zip(out.pixels_mut()) {
        let stretched = ((source.0[0] as f64 - black_point) / span).clamp(0.0, 1.0) * 255.0;
        *target = Luma([stretched.round() as u8]);
    }
    Some(out)
}

/// Low and high percentile of the intensity distribution, linearly
/// interpolated between ranks.
pub fn percentile_bounds(gray: &GrayImage) -> Option<(f64, f64)> {
    let count = gray.width() as usize * gray.height() as usize;
    if count == 0 {
        return None;
    }
    let mut histogram = [0usize; 256];
    for pixel in gray.pixels() {
        histogram[pixel.0[0] as usize] += 1;
    }
    Some((
        percentile(&histogram, count, LOW_PERCENTILE),
        percentile(&histogram, count, HIGH_PERCENTILE),
    ))
}

fn percentile(histogram: &[usize; 256], count: usize, p: f64) -> f64 {
    let rank = p / 100.0 * (count - 1) as f64;
    let lower_rank = rank.floor() as usize;
    let upper_rank = rank.ceil() as usize;
    let lower = value_at_rank(histogram, lower_rank);
    let upper = value_at_rank(histogram, upper_rank);
    lower + (upper - lower) * (rank - lower_rank as f64)
}

/// Intensity of the `rank`-th smallest pixel (0-based).
fn value_at_rank(histogram: &[usize; 256], rank: usize) -> f64 {
    let mut seen = 0usize;
    for (value, &bin) in histogram.iter().enumerate() {
        seen += bin;
        if seen > rank {
            return value as f64;
        }
    }
    255.0
}

/// Closed arc length of a contour.
pub fn perimeter(contour: &Contour<i32>) -> f64 {
    let points = &contour.points;
    if points.len() < 2 {
        return 0.0;
    }
    points
        .iter()
        .zip(points.iter().cycle().skip(1))
        .map(|(a, b)| {
            let dx = (b.x - a.x) as f64;
            let dy = (b.y - a.y) as f64;
            (dx * dx + dy * dy).sqrt()
        })
        .sum()
}
