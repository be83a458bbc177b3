//! Missing-value convention and masked reductions.
//!
//! Climate-model output is heterogeneous: land points, seasonally outcropping
//! isopycnals and ice-shelf cavities leave large parts of every field
//! undefined. Masking is therefore explicit throughout the crate: a value is
//! either valid or equal to the fill value, and reductions skip fill values
//! rather than relying on NaN propagation.
//!
//! The fill value follows the CF-conventions default, and validity is a
//! range check so that values already multiplied or differenced with a fill
//! value are also rejected.

use ndarray::{Array, ArrayView, Axis, Dimension, RemoveAxis};

/// Fill value for missing data (CF-conventions standard).
pub const FILL_VALUE_F64: f64 = 9.96920996838687e+36;
pub const FILL_VALUE_F32: f32 = 9.96921e+36;

/// Check if a value is valid (not a fill value).
#[inline]
pub fn is_valid_f64(v: f64) -> bool {
    v.is_finite() && v.abs() < 1.0e+30
}

/// Check if a value is valid (not a fill value).
#[inline]
pub fn is_valid_f32(v: f32) -> bool {
    v.is_finite() && v.abs() < 1.0e+30
}

/// Mean of the valid entries of an iterator, or the fill value if none are.
pub fn mean_valid(values: impl Iterator<Item = f64>) -> f64 {
    let mut sum = 0.0;
    let mut count = 0usize;
    for v in values {
        if is_valid_f64(v) {
            sum += v;
            count += 1;
        }
    }
    if count == 0 {
        FILL_VALUE_F64
    } else {
        sum / count as f64
    }
}

/// Sum of the valid entries of an iterator, or the fill value if none are.
pub fn sum_valid(values: impl Iterator<Item = f64>) -> f64 {
    let mut sum = 0.0;
    let mut count = 0usize;
    for v in values {
        if is_valid_f64(v) {
            sum += v;
            count += 1;
        }
    }
    if count == 0 {
        FILL_VALUE_F64
    } else {
        sum
    }
}

/// Population standard deviation of the valid entries, or fill if none.
pub fn std_valid(values: impl Iterator<Item = f64> + Clone) -> f64 {
    let mean = mean_valid(values.clone());
    if !is_valid_f64(mean) {
        return FILL_VALUE_F64;
    }
    let mut sum = 0.0;
    let mut count = 0usize;
    for v in values {
        if is_valid_f64(v) {
            sum += (v - mean) * (v - mean);
            count += 1;
        }
    }
    (sum / count as f64).sqrt()
}

/// Fraction of valid entries, in [0, 1].
pub fn valid_fraction(values: impl Iterator<Item = f64>) -> f64 {
    let mut valid = 0usize;
    let mut total = 0usize;
    for v in values {
        total += 1;
        if is_valid_f64(v) {
            valid += 1;
        }
    }
    if total == 0 {
        0.0
    } else {
        valid as f64 / total as f64
    }
}

/// Masked mean along one axis of an n-d array.
///
/// Lanes with no valid entry yield the fill value, so the output mask is the
/// intersection of the input masks along the reduced axis.
pub fn masked_mean_axis<D>(a: ArrayView<'_, f64, D>, axis: Axis) -> Array<f64, D::Smaller>
where
    D: Dimension + RemoveAxis,
{
    a.map_axis(axis, |lane| mean_valid(lane.iter().copied()))
}

/// Masked population standard deviation along one axis.
pub fn masked_std_axis<D>(a: ArrayView<'_, f64, D>, axis: Axis) -> Array<f64, D::Smaller>
where
    D: Dimension + RemoveAxis,
{
    a.map_axis(axis, |lane| std_valid(lane.iter().copied()))
}
