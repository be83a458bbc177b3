//! Time of Emergence detection.
//!
//! Determines, per spatial point, when a climate-change signal becomes
//! permanently distinguishable from natural variability: the time series is
//! scanned from its most recent step backwards, and the emergence index is
//! the step right after the last time the signal was still within the noise
//! envelope. Intermittent early crossings that drop back below the
//! threshold are ignored; only the final sustained crossing counts.

use ndarray::{Array1, Array2, ArrayView1, ArrayView2};

use crate::masked::{is_valid_f64, mean_valid, FILL_VALUE_F64};

/// Configuration for emergence detection.
#[derive(Clone, Copy, Debug)]
pub struct ToeConfig {
    /// Noise multiplier: the signal must exceed `multiplier × noise`.
    pub multiplier: f64,
    /// Reference period `[start, end)` in time indices, whose mean defines
    /// the anomaly baseline.
    pub reference_period: (usize, usize),
}

impl ToeConfig {
    pub fn new(multiplier: f64, reference_period: (usize, usize)) -> Self {
        Self {
            multiplier,
            reference_period,
        }
    }
}

/// Anomaly of a `(time, point)` series relative to its reference-period
/// mean per point.
///
/// Points whose reference mean is undefined are masked at every time step.
pub fn anomaly_vs_reference(
    series: ArrayView2<'_, f64>,
    reference_period: (usize, usize),
) -> Array2<f64> {
    let (n_time, n_points) = series.dim();
    let (p0, p1) = reference_period;
    let p1 = p1.min(n_time);
    let mut out = Array2::from_elem((n_time, n_points), FILL_VALUE_F64);
    for i in 0..n_points {
        let baseline = mean_valid((p0..p1).map(|t| series[[t, i]]));
        if !is_valid_f64(baseline) {
            continue;
        }
        for t in 0..n_time {
            let v = series[[t, i]];
            if is_valid_f64(v) {
                out[[t, i]] = v - baseline;
            }
        }
    }
    out
}

/// Time of emergence of a signal over a noise magnitude, per point.
///
/// `signal` is `(time, point)`, `noise` one magnitude per point. The
/// emergence index is the number of time steps from the start of the series
/// to the last sustained crossing of `multiplier × noise`:
///
/// - a signal above threshold at every step emerges at index 0;
/// - a signal never above threshold reports the series length (not yet
///   emerged), as do points with invalid noise;
/// - a step function crossing at index k and staying above reports k.
///
/// Missing signal values count as not exceeding.
pub fn time_of_emergence(
    signal: ArrayView2<'_, f64>,
    noise: ArrayView1<'_, f64>,
    multiplier: f64,
) -> Array1<usize> {
    let (n_time, n_points) = signal.dim();
    debug_assert_eq!(noise.len(), n_points);
    Array1::from_iter((0..n_points).map(|i| {
        if !is_valid_f64(noise[i]) {
            return n_time;
        }
        let threshold = multiplier * noise[i];
        let exceeds = |t: usize| {
            let v = signal[[t, i]];
            is_valid_f64(v) && v.abs() >= threshold
        };
        // Last step still inside the noise envelope, scanning backwards
        match (0..n_time).rev().find(|&t| !exceeds(t)) {
            Some(t) => t + 1,
            None => 0,
        }
    }))
}

/// Detect emergence of a raw series against a noise field: anomaly vs the
/// configured reference period, then threshold crossing.
pub fn detect(
    series: ArrayView2<'_, f64>,
    noise: ArrayView1<'_, f64>,
    config: &ToeConfig,
) -> Array1<usize> {
    let anomaly = anomaly_vs_reference(series, config.reference_period);
    time_of_emergence(anomaly.view(), noise, config.multiplier)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array2};

    fn column(values: &[f64]) -> Array2<f64> {
        Array2::from_shape_vec((values.len(), 1), values.to_vec()).unwrap()
    }

    #[test]
    fn test_always_above_emerges_at_zero() {
        let signal = column(&[5.0; 10]);
        let noise = array![1.0];
        let toe = time_of_emergence(signal.view(), noise.view(), 2.0);
        assert_eq!(toe[0], 0);
    }

    #[test]
    fn test_never_above_reports_series_length() {
        let signal = column(&[0.5; 10]);
        let noise = array![1.0];
        let toe = time_of_emergence(signal.view(), noise.view(), 2.0);
        assert_eq!(toe[0], 10);
    }

    #[test]
    fn test_step_function_emerges_at_step() {
        let mut values = vec![0.0; 10];
        for v in values.iter_mut().skip(4) {
            *v = 5.0;
        }
        let signal = column(&values);
        let noise = array![1.0];
        let toe = time_of_emergence(signal.view(), noise.view(), 2.0);
        assert_eq!(toe[0], 4);
    }

    #[test]
    fn test_intermittent_crossing_ignored() {
        // Crosses at t=2, drops back at t=4, final sustained crossing at t=6
        let signal = column(&[0.0, 0.0, 5.0, 5.0, 0.0, 0.0, 5.0, 5.0, 5.0, 5.0]);
        let noise = array![1.0];
        let toe = time_of_emergence(signal.view(), noise.view(), 2.0);
        assert_eq!(toe[0], 6);
    }

    #[test]
    fn test_negative_signal_counts() {
        let signal = column(&[0.0, -5.0, -5.0, -5.0]);
        let noise = array![1.0];
        let toe = time_of_emergence(signal.view(), noise.view(), 2.0);
        assert_eq!(toe[0], 1);
    }

    #[test]
    fn test_invalid_noise_never_emerges() {
        let signal = column(&[5.0; 6]);
        let noise = array![crate::masked::FILL_VALUE_F64];
        let toe = time_of_emergence(signal.view(), noise.view(), 2.0);
        assert_eq!(toe[0], 6);
    }

    #[test]
    fn test_missing_signal_is_not_exceeding() {
        let signal = column(&[5.0, crate::masked::FILL_VALUE_F64, 5.0, 5.0]);
        let noise = array![1.0];
        let toe = time_of_emergence(signal.view(), noise.view(), 2.0);
        assert_eq!(toe[0], 2);
    }

    #[test]
    fn test_anomaly_vs_reference() {
        let series = column(&[1.0, 3.0, 10.0, 12.0]);
        let anom = anomaly_vs_reference(series.view(), (0, 2));
        assert_eq!(anom[[0, 0]], -1.0);
        assert_eq!(anom[[3, 0]], 10.0);
    }

    #[test]
    fn test_detect_pipeline() {
        // Reference period mean 0, noise 1, multiplier 2: emerges once the
        // anomaly passes 2 for good
        let series = column(&[0.0, 0.0, 0.0, 1.0, 4.0, 5.0, 6.0, 7.0]);
        let noise = array![1.0];
        let config = ToeConfig::new(2.0, (0, 3));
        let toe = detect(series.view(), noise.view(), &config);
        assert_eq!(toe[0], 4);
    }
}
