// THEORY:
// Geometry for the sample region. The region is modelled as an ellipse because a
// circular dish or well seen by a camera that is not perfectly square-on projects
// to one. This module owns two things:
//
// 1.  The `Ellipse` value type in the "rotated rectangle" convention used by
//     image tooling: centre, full axis lengths and the major-axis direction in
//     degrees, normalised so `major >= minor` and the angle lies in [0, 180).
//     An ellipse's major axis is undirected, so 0 and 180 degrees are the same
//     orientation; consumers that average angles must respect that seam.
// 2.  A direct least-squares conic fit (Fitzgibbon's ellipse-specific method in
//     the numerically stable Halíř–Flusser partitioning). Points are shifted to
//     their centroid and scaled before the fit so the scatter matrix stays well
//     conditioned for contours hundreds of pixels across.

use nalgebra::{Matrix3, Vector3};
use std::f64::consts::{FRAC_PI_2, PI, SQRT_2};

/// Fewest points that determine a conic.
pub const MIN_FIT_POINTS: usize = 5;

const DEGENERATE_EPSILON: f64 = 1e-12;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ellipse {
    /// Centre in pixel coordinates (x right, y down).
    pub center: (f64, f64),
    /// Full axis lengths as `(major, minor)`.
    pub axes: (f64, f64),
    /// Direction of the major axis in degrees, in `[0, 180)`.
    pub angle: f64,
}

impl Ellipse {
    /// Builds an ellipse, reordering the axes so the larger comes first and
    /// wrapping the angle into `[0, 180)`.
    pub fn new(center: (f64, f64), axes: (f64, f64), angle: f64) -> Self {
        let (axes, angle) = if axes.0 >= axes.1 {
            (axes, angle)
        } else {
            ((axes.1, axes.0), angle + 90.0)
        };
        Self {
            center,
            axes,
            angle: normalize_degrees(angle),
        }
    }

    pub fn major(&self) -> f64 {
        self.axes.0
    }

    pub fn minor(&self) -> f64 {
        self.axes.1
    }

    pub fn area(&self) -> f64 {
        PI * 0.25 * self.axes.0 * self.axes.1
    }

    /// `minor / major`, 1.0 for a circle. Zero for a degenerate ellipse.
    pub fn aspect_ratio(&self) -> f64 {
        if self.axes.0 <= 0.0 {
            return 0.0;
        }
        self.axes.1 / self.axes.0
    }

    pub fn center_distance(&self, other: &Ellipse) -> f64 {
        distance(self.center, other.center)
    }

    /// Same centre and orientation, both axes multiplied by `factor`.
    pub fn scaled(&self, factor: f64) -> Self {
        Self {
            center: self.center,
            axes: (self.axes.0 * factor, self.axes.1 * factor),
            angle: self.angle,
        }
    }

    /// Whether `(x, y)` lies inside or on the ellipse.
    pub fn contains(&self, x: f64, y: f64) -> bool {
        let semi_major = self.axes.0 * 0.5;
        let semi_minor = self.axes.1 * 0.5;
        if semi_major <= 0.0 || semi_minor <= 0.0 {
            return false;
        }
        let (sin, cos) = self.angle.to_radians().sin_cos();
        let dx = x - self.center.0;
        let dy = y - self.center.1;
        let along = dx * cos + dy * sin;
        let across = -dx * sin + dy * cos;
        (along / semi_major).powi(2) + (across / semi_minor).powi(2) <= 1.0
    }

    pub fn is_finite(&self) -> bool {
        self.center.0.is_finite()
            && self.center.1.is_finite()
            && self.axes.0.is_finite()
            && self.axes.1.is_finite()
            && self.angle.is_finite()
    }
}

pub fn distance(a: (f64, f64), b: (f64, f64)) -> f64 {
    ((a.0 - b.0).powi(2) + (a.1 - b.1).powi(2)).sqrt()
}

/// Wraps an angle in degrees into `[0, 180)`.
pub fn normalize_degrees(angle: f64) -> f64 {
    let wrapped = angle.rem_euclid(180.0);
    // rem_euclid can round up to exactly 180 for tiny negative inputs.
    if wrapped >= 180.0 { 0.0 } else { wrapped }
}

/// General conic `A x² + B xy + C y² + D x + E y + F = 0` as `[A, B, C, D, E, F]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Conic(pub [f64; 6]);

impl Conic {
    /// Geometric parameters of the conic, or `None` if it is not a real ellipse.
    pub fn to_ellipse(&self) -> Option<Ellipse> {
        let [a, b, c, d, e, f] = self.0;
        let denom = 4.0 * a * c - b * b;
        if denom <= DEGENERATE_EPSILON * (a * a + b * b + c * c) {
            return None;
        }
        let cx = (b * e - 2.0 * c * d) / denom;
        let cy = (b * d - 2.0 * a * e) / denom;
        let at_center = a * cx * cx + b * cx * cy + c * cy * cy + d * cx + e * cy + f;

        let mean = 0.5 * (a + c);
        let spread = 0.5 * ((a - c).powi(2) + b * b).sqrt();
        let lambda_strong = mean + spread.copysign(mean);
        let lambda_weak = mean - spread.copysign(mean);

        let semi_short_sq = -at_center / lambda_strong;
        let semi_long_sq = -at_center / lambda_weak;
        if !(semi_short_sq > 0.0 && semi_long_sq > 0.0) {
            return None;
        }

        // Eigenvector of the quadratic part for the larger-magnitude eigenvalue
        // points along the short axis.
        let strong_direction = 0.5 * b.atan2(a - c);
        let short_direction = if mean >= 0.0 {
            strong_direction
        } else {
            strong_direction + FRAC_PI_2
        };
        let ellipse = Ellipse::new(
            (cx, cy),
            (2.0 * semi_long_sq.sqrt(), 2.0 * semi_short_sq.sqrt()),
            (short_direction + FRAC_PI_2).to_degrees(),
        );
        ellipse.is_finite().then_some(ellipse)
    }
}

/// Least-squares ellipse through `points`. `None` when there are too few
/// points, the system is singular, or the best conic is not an ellipse.
pub fn fit_ellipse(points: &[(f64, f64)]) -> Option<Ellipse> {
    if points.len() < MIN_FIT_POINTS {
        return None;
    }
    let (mean_x, mean_y, scale) = normalization(points);

    let mut s1 = Matrix3::<f64>::zeros();
    let mut s2 = Matrix3::<f64>::zeros();
    let mut s3 = Matrix3::<f64>::zeros();
    for &(px, py) in points {
        let x = (px - mean_x) * scale;
        let y = (py - mean_y) * scale;
        let quadratic = Vector3::new(x * x, x * y, y * y);
        let linear = Vector3::new(x, y, 1.0);
        s1 += quadratic * quadratic.transpose();
        s2 += quadratic * linear.transpose();
        s3 += linear * linear.transpose();
    }

    // Collinear points leave the linear scatter block singular.
    let n = points.len() as f64;
    if s3.determinant().abs() <= DEGENERATE_EPSILON * n * n * n {
        return None;
    }
    let s3_inv = s3.try_inverse()?;
    let t = -s3_inv * s2.transpose();
    let reduced = s1 + s2 * t;
    // Premultiply by the inverse of the ellipse constraint matrix
    // [[0, 0, 2], [0, -1, 0], [2, 0, 0]].
    let system = Matrix3::new(
        reduced[(2, 0)] * 0.5,
        reduced[(2, 1)] * 0.5,
        reduced[(2, 2)] * 0.5,
        -reduced[(1, 0)],
        -reduced[(1, 1)],
        -reduced[(1, 2)],
        reduced[(0, 0)] * 0.5,
        reduced[(0, 1)] * 0.5,
        reduced[(0, 2)] * 0.5,
    );

    let quadratic_part = elliptic_eigenvector(&system)?;
    let linear_part = t * quadratic_part;
    let normalized = [
        quadratic_part[0],
        quadratic_part[1],
        quadratic_part[2],
        linear_part[0],
        linear_part[1],
        linear_part[2],
    ];
    if normalized.iter().any(|v| !v.is_finite()) {
        return None;
    }
    denormalize(normalized, mean_x, mean_y, scale).to_ellipse()
}

/// Centroid and the scale that brings the mean distance from it to √2.
fn normalization(points: &[(f64, f64)]) -> (f64, f64, f64) {
    let n = points.len() as f64;
    let mean_x = points.iter().map(|p| p.0).sum::<f64>() / n;
    let mean_y = points.iter().map(|p| p.1).sum::<f64>() / n;
    let mean_distance = points
        .iter()
        .map(|&p| distance(p, (mean_x, mean_y)))
        .sum::<f64>()
        / n;
    let scale = if mean_distance > DEGENERATE_EPSILON {
        SQRT_2 / mean_distance
    } else {
        1.0
    };
    (mean_x, mean_y, scale)
}

/// Maps a conic fitted in `x' = s (x - mx)`, `y' = s (y - my)` back to pixels.
fn denormalize(c: [f64; 6], mx: f64, my: f64, s: f64) -> Conic {
    let [a, b, cc, d, e, f] = c;
    let s2 = s * s;
    Conic([
        a * s2,
        b * s2,
        cc * s2,
        -2.0 * a * s2 * mx - b * s2 * my + d * s,
        -b * s2 * mx - 2.0 * cc * s2 * my + e * s,
        a * s2 * mx * mx + b * s2 * mx * my + cc * s2 * my * my - d * s * mx - e * s * my + f,
    ])
}

/// The eigenvector of `system` satisfying the ellipse condition `4AC - B² > 0`.
fn elliptic_eigenvector(system: &Matrix3<f64>) -> Option<Vector3<f64>> {
    let trace = system.trace();
    let minors = system[(0, 0)] * system[(1, 1)] - system[(0, 1)] * system[(1, 0)]
        + system[(0, 0)] * system[(2, 2)]
        - system[(0, 2)] * system[(2, 0)]
        + system[(1, 1)] * system[(2, 2)]
        - system[(1, 2)] * system[(2, 1)];
    let determinant = system.determinant();

    let mut best: Option<(f64, Vector3<f64>)> = None;
    for eigenvalue in real_cubic_roots(-trace, minors, -determinant) {
        let shifted = system - Matrix3::identity() * eigenvalue;
        let Some(vector) = null_vector(&shifted) else {
            continue;
        };
        let condition = 4.0 * vector[0] * vector[2] - vector[1] * vector[1];
        if condition <= 0.0 {
            continue;
        }
        let replace = match best {
            Some((value, _)) => eigenvalue.abs() < value,
            None => true,
        };
        if replace {
            best = Some((eigenvalue.abs(), vector));
        }
    }
    best.map(|(_, vector)| vector)
}

/// Direction spanning the null space of a rank-2 matrix: the largest cross
/// product of two of its rows.
fn null_vector(m: &Matrix3<f64>) -> Option<Vector3<f64>> {
    let rows = [
        m.row(0).transpose(),
        m.row(1).transpose(),
        m.row(2).transpose(),
    ];
    let candidates = [
        rows[0].cross(&rows[1]),
        rows[0].cross(&rows[2]),
        rows[1].cross(&rows[2]),
    ];
    let best = candidates
        .iter()
        .max_by(|a, b| a.norm_squared().total_cmp(&b.norm_squared()))?;
    let norm = best.norm();
    if norm < 1e-15 {
        return None;
    }
    Some(best / norm)
}

/// Real roots of `x³ + p2 x² + p1 x + p0`.
fn real_cubic_roots(p2: f64, p1: f64, p0: f64) -> Vec<f64> {
    let shift = -p2 / 3.0;
    let p = p1 - p2 * p2 / 3.0;
    let q = 2.0 * p2 * p2 * p2 / 27.0 - p2 * p1 / 3.0 + p0;
    let discriminant = q * q / 4.0 + p * p * p / 27.0;

    if discriminant > 0.0 {
        let root = discriminant.sqrt();
        vec![(-q / 2.0 + root).cbrt() + (-q / 2.0 - root).cbrt() + shift]
    } else if p.abs() < 1e-300 {
        vec![shift]
    } else {
        let r = (-p / 3.0).sqrt();
        let phi = (-q / (2.0 * r * r * r)).clamp(-1.0, 1.0).acos();
        (0..3)
            .map(|k| 2.0 * r * ((phi + 2.0 * PI * k as f64) / 3.0).cos() + shift)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn sample(ellipse: &Ellipse, n: usize) -> Vec<(f64, f64)> {
        let (sin, cos) = ellipse.angle.to_radians().sin_cos();
        (0..n)
            .map(|i| {
                let t = 2.0 * PI * i as f64 / n as f64;
                let u = ellipse.axes.0 * 0.5 * t.cos();
                let v = ellipse.axes.1 * 0.5 * t.sin();
                (
                    ellipse.center.0 + u * cos - v * sin,
                    ellipse.center.1 + u * sin + v * cos,
                )
            })
            .collect()
    }

    #[test]
    fn recovers_a_rotated_ellipse() {
        let truth = Ellipse::new((160.0, 120.0), (90.0, 60.0), 30.0);
        let fitted = fit_ellipse(&sample(&truth, 64)).expect("fit");
        assert_relative_eq!(fitted.center.0, 160.0, epsilon = 1e-6);
        assert_relative_eq!(fitted.center.1, 120.0, epsilon = 1e-6);
        assert_relative_eq!(fitted.axes.0, 90.0, epsilon = 1e-6);
        assert_relative_eq!(fitted.axes.1, 60.0, epsilon = 1e-6);
        assert_relative_eq!(fitted.angle, 30.0, epsilon = 1e-6);
    }

    #[test]
    fn steep_orientation_stays_in_range() {
        let truth = Ellipse::new((50.0, 40.0), (40.0, 20.0), 170.0);
        let fitted = fit_ellipse(&sample(&truth, 40)).expect("fit");
        assert_relative_eq!(fitted.angle, 170.0, epsilon = 1e-6);
    }

    #[test]
    fn five_points_are_enough() {
        let truth = Ellipse::new((10.0, 10.0), (8.0, 6.0), 0.0);
        let fitted = fit_ellipse(&sample(&truth, 5)).expect("fit");
        assert_relative_eq!(fitted.axes.0, 8.0, epsilon = 1e-6);
        assert_relative_eq!(fitted.axes.1, 6.0, epsilon = 1e-6);
    }

    #[test]
    fn rejects_short_and_collinear_inputs() {
        assert!(fit_ellipse(&[(0.0, 0.0), (1.0, 1.0), (2.0, 0.0), (3.0, 2.0)]).is_none());
        let line: Vec<_> = (0..10).map(|i| (i as f64, 2.0 * i as f64)).collect();
        assert!(fit_ellipse(&line).is_none());
    }

    #[test]
    fn constructor_canonicalises_axes_and_angle() {
        let e = Ellipse::new((0.0, 0.0), (10.0, 20.0), 135.0);
        assert_eq!(e.axes, (20.0, 10.0));
        assert_relative_eq!(e.angle, 45.0);
        assert_relative_eq!(Ellipse::new((0.0, 0.0), (2.0, 1.0), -30.0).angle, 150.0);
    }

    #[test]
    fn containment_follows_rotation() {
        let e = Ellipse::new((0.0, 0.0), (20.0, 4.0), 90.0);
        assert!(e.contains(0.0, 9.0));
        assert!(!e.contains(9.0, 0.0));
    }
}
