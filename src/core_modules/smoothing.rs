// THEORY:
// Read-time smoothing for the recorded signal. Differentiation amplifies
// high-frequency noise, and each further derivative amplifies it again, so the
// cascade smooths more aggressively the higher the derivative order:
//
//   decay  ──MA(W)──▶ smoothed decay ──diff──▶ d1 ──MA(2W)──▶ smoothed d1
//                                              smoothed d1 ──diff──▶ d2 ──MA(4W)──▶ smoothed d2
//
// Everything here is a pure function over slices. The stored history is never
// touched, so reading the same snapshot twice gives identical output.

/// Centred moving average of `window` samples. The input is padded with its
/// first and last values so the output has the same length as the input.
pub fn moving_average(series: &[f64], window: usize) -> Vec<f64> {
    let window = window.max(1);
    let Some((&first, &last)) = series.first().zip(series.last()) else {
        return Vec::new();
    };
    let pad_before = window / 2;
    let pad_after = window - 1 - pad_before;
    let padded: Vec<f64> = std::iter::repeat_n(first, pad_before)
        .chain(series.iter().copied())
        .chain(std::iter::repeat_n(last, pad_after))
        .collect();
    padded
        .windows(window)
        .map(|w| w.iter().sum::<f64>() / window as f64)
        .collect()
}

/// Backward difference with the first element differenced against itself,
/// so the output starts with 0 and has the input's length.
pub fn backward_difference(series: &[f64]) -> Vec<f64> {
    let Some(&first) = series.first() else {
        return Vec::new();
    };
    std::iter::once(first)
        .chain(series.iter().copied())
        .collect::<Vec<f64>>()
        .windows(2)
        .map(|pair| pair[1] - pair[0])
        .collect()
}

/// Smoothed decay, first and second derivative series of one channel.
#[derive(Debug, Clone, PartialEq)]
pub struct SmoothedChannel {
    pub decay: Vec<f64>,
    pub first_derivative: Vec<f64>,
    pub second_derivative: Vec<f64>,
}

/// Runs the full cascade over a raw decay series with base window `window`.
pub fn smooth_cascade(decay: &[f64], window: usize) -> SmoothedChannel {
    let window = window.max(1);
    let smoothed_decay = moving_average(decay, window);
    let first_derivative = moving_average(&backward_difference(&smoothed_decay), 2 * window);
    let second_derivative = moving_average(&backward_difference(&first_derivative), 4 * window);
    SmoothedChannel {
        decay: smoothed_decay,
        first_derivative,
        second_derivative,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn moving_average_preserves_length_and_pads_edges() {
        let out = moving_average(&[0.0, 3.0, 6.0, 9.0], 3);
        assert_eq!(out.len(), 4);
        assert_relative_eq!(out[0], 1.0);
        assert_relative_eq!(out[1], 3.0);
        assert_relative_eq!(out[3], 8.0);
    }

    #[test]
    fn even_windows_lean_backwards() {
        // Window 2 averages each sample with its predecessor.
        let out = moving_average(&[2.0, 4.0, 8.0], 2);
        assert_eq!(out, vec![2.0, 3.0, 6.0]);
    }

    #[test]
    fn window_one_is_identity() {
        let series = [1.0, -2.0, 5.0];
        assert_eq!(moving_average(&series, 1), series.to_vec());
        assert_eq!(moving_average(&series, 0), series.to_vec());
    }

    #[test]
    fn difference_starts_at_zero() {
        assert_eq!(backward_difference(&[5.0, 7.0, 4.0]), vec![0.0, 2.0, -3.0]);
        assert!(backward_difference(&[]).is_empty());
    }

    #[test]
    fn cascade_is_deterministic_and_length_preserving() {
        let decay: Vec<f64> = (0..30).map(|i| (i as f64 * 0.3).sin() * 5.0).collect();
        let first = smooth_cascade(&decay, 3);
        let second = smooth_cascade(&decay, 3);
        assert_eq!(first, second);
        assert_eq!(first.decay.len(), 30);
        assert_eq!(first.first_derivative.len(), 30);
        assert_eq!(first.second_derivative.len(), 30);
    }

    #[test]
    fn linear_ramp_has_constant_slope_in_the_interior() {
        let ramp: Vec<f64> = (0..40).map(|i| i as f64).collect();
        let smoothed = smooth_cascade(&ramp, 2);
        for &slope in &smoothed.first_derivative[10..30] {
            assert_relative_eq!(slope, 1.0, epsilon = 1e-12);
        }
        for &curvature in &smoothed.second_derivative[20..24] {
            assert_relative_eq!(curvature, 0.0, epsilon = 1e-12);
        }
    }
}
