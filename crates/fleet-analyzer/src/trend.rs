//! First-to-last trend evaluation and variance helpers

/// Dead-band below which a series counts as stable
pub const TREND_DEAD_BAND: f64 = 0.05;

/// Direction of a monotonic first-to-last trend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trend {
    Rising,
    Falling,
    Stable,
}

/// Relative change from first to last; 0 when the first value is ~0
pub fn relative_change(first: f64, last: f64) -> f64 {
    if first.abs() < f64::EPSILON {
        return 0.0;
    }
    (last - first) / first
}

/// Classify a series by its first-to-last relative change with the 5%
/// dead-band for "stable"
pub fn classify(values: &[f64]) -> Trend {
    let (Some(first), Some(last)) = (values.first(), values.last()) else {
        return Trend::Stable;
    };
    let change = relative_change(*first, *last);
    if change > TREND_DEAD_BAND {
        Trend::Rising
    } else if change < -TREND_DEAD_BAND {
        Trend::Falling
    } else {
        Trend::Stable
    }
}

/// Unbiased sample variance; 0 for fewer than two values
pub fn sample_variance(values: &[f64]) -> f64 {
    let n = values.len();
    if n < 2 {
        return 0.0;
    }
    let mean = values.iter().sum::<f64>() / n as f64;
    values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1) as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_change_is_stable() {
        assert_eq!(classify(&[100.0, 101.0, 103.0]), Trend::Stable);
    }

    #[test]
    fn rising_and_falling_cross_the_dead_band() {
        assert_eq!(classify(&[100.0, 120.0]), Trend::Rising);
        assert_eq!(classify(&[100.0, 80.0]), Trend::Falling);
    }

    #[test]
    fn empty_and_singleton_series_are_stable() {
        assert_eq!(classify(&[]), Trend::Stable);
        assert_eq!(classify(&[42.0]), Trend::Stable);
    }

    #[test]
    fn zero_first_value_yields_no_change() {
        assert_eq!(relative_change(0.0, 50.0), 0.0);
    }

    #[test]
    fn variance_of_flat_series_is_zero() {
        assert_eq!(sample_variance(&[40.0, 40.0, 40.0]), 0.0);
    }

    #[test]
    fn variance_matches_hand_computation() {
        // values 1..=5: mean 3, sum of squares 10, n-1 = 4
        let variance = sample_variance(&[1.0, 2.0, 3.0, 4.0, 5.0]);
        assert!((variance - 2.5).abs() < f64::EPSILON);
    }
}
