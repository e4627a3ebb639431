// THEORY:
// The `EllipseCandidateScorer` decides which of the many contours in a frame is
// the sample region. Each contour is first filtered on cheap geometric grounds,
// then fitted and scored:
//
//   base_score  = perimeter · (1 − |1 − aspect_ratio|) · center_weight
//   final_score = base_score · (1 + temporal_score)
//
// - Perimeter favours the large, dominant outline of a dish over specks.
// - The aspect term favours round outlines.
// - `center_weight` favours outlines near the middle of the frame, where the
//   operator places the sample.
// - `temporal_score` is only present once an ellipse has been accepted before. It
//   rewards candidates that sit where the last region was and have a similar
//   area, so one noisy frame cannot make the tracker jump to a different object.
//
// The highest strictly-greater score wins; on a tie the earlier contour stays.

use crate::config::TrackerConfig;
use crate::core_modules::conic::{Ellipse, distance, fit_ellipse};
use crate::core_modules::edge_contours::perimeter;
use imageproc::contours::Contour;

/// An accepted ellipse and the score that won it the selection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoredEllipse {
    pub ellipse: Ellipse,
    pub score: f64,
}

#[derive(Debug, Clone)]
pub struct EllipseCandidateScorer {
    min_perimeter_ratio: f64,
    max_perimeter_ratio: f64,
    min_contour_points: usize,
    min_aspect_ratio: f64,
}

impl EllipseCandidateScorer {
    pub fn new(config: &TrackerConfig) -> Self {
        Self {
            min_perimeter_ratio: config.min_perimeter_ratio,
            max_perimeter_ratio: config.max_perimeter_ratio,
            min_contour_points: config.min_contour_points.max(5),
            min_aspect_ratio: config.min_aspect_ratio,
        }
    }

    /// Picks the best-scoring ellipse among `contours`, if any qualifies.
    pub fn best_candidate(
        &self,
        contours: &[Contour<i32>],
        frame_width: u32,
        frame_height: u32,
        previous: Option<&Ellipse>,
    ) -> Option<ScoredEllipse> {
        let mut best: Option<ScoredEllipse> = None;
        let mut best_score = 0.0;
        for contour in contours {
            let Some(candidate) = self.score_contour(contour, frame_width, frame_height, previous)
            else {
                continue;
            };
            if candidate.score > best_score {
                best_score = candidate.score;
                best = Some(candidate);
            }
        }
        best
    }

    /// Filters, fits and scores a single contour.
    pub fn score_contour(
        &self,
        contour: &Contour<i32>,
        frame_width: u32,
        frame_height: u32,
        previous: Option<&Ellipse>,
    ) -> Option<ScoredEllipse> {
        let width = frame_width as f64;
        let length = perimeter(contour);
        if length < self.min_perimeter_ratio * width || length > self.max_perimeter_ratio * width {
            return None;
        }
        if contour.points.len() < self.min_contour_points {
            return None;
        }
        let points: Vec<(f64, f64)> = contour
            .points
            .iter()
            .map(|p| (p.x as f64, p.y as f64))
            .collect();
        let ellipse = fit_ellipse(&points)?;
        if ellipse.aspect_ratio() < self.min_aspect_ratio {
            return None;
        }
        let score = score_ellipse(&ellipse, length, frame_width, frame_height, previous);
        Some(ScoredEllipse { ellipse, score })
    }
}

/// Score of a fitted ellipse whose source contour has perimeter `length`.
pub fn score_ellipse(
    ellipse: &Ellipse,
    length: f64,
    frame_width: u32,
    frame_height: u32,
    previous: Option<&Ellipse>,
) -> f64 {
    let width = frame_width as f64;
    let height = frame_height as f64;
    let base = length * (1.0 - (1.0 - ellipse.aspect_ratio()).abs()) * center_weight(ellipse, width, height);
    let temporal = previous.map_or(0.0, |prev| temporal_score(ellipse, prev, width));
    base * (1.0 + temporal)
}

/// 1 at the frame centre, falling linearly to 0 at half the diagonal.
pub fn center_weight(ellipse: &Ellipse, width: f64, height: f64) -> f64 {
    let frame_center = (width / 2.0, height / 2.0);
    let half_diagonal = 0.5 * (width * width + height * height).sqrt();
    if half_diagonal <= 0.0 {
        return 0.0;
    }
    (1.0 - distance(ellipse.center, frame_center) / half_diagonal).clamp(0.0, 1.0)
}

/// Similarity to the previously accepted ellipse, in `(0, 1]`.
pub fn temporal_score(ellipse: &Ellipse, previous: &Ellipse, width: f64) -> f64 {
    let dist_weight = (-ellipse.center_distance(previous) / (0.2 * width)).exp();
    let previous_area = previous.area();
    let area_ratio = if previous_area > 0.0 {
        ellipse.area() / previous_area
    } else {
        0.0
    };
    let size_weight = (-(1.0 - area_ratio).abs()).exp();
    0.5 * (dist_weight + size_weight)
}
