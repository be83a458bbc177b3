//! Annual reduction of monthly binned fields.
//!
//! Besides the annual mean itself, the monthly thickness mask yields the
//! persistence of each isopycnal bin — the percentage of months in the year
//! the bin holds water — and from persistence the "bowl": the shallowest
//! density level that is persistently ocean rather than seasonally
//! outcropped. Everything above the bowl belongs to the mixed layer and is
//! excluded from interior watermass statistics downstream.

use ndarray::{Array1, Array3, ArrayView2, ArrayView3};

use crate::error::{Error, Result};
use crate::masked::{is_valid_f64, mean_valid, FILL_VALUE_F64};

/// A bin is part of the bowl interior once it is occupied at least this
/// percentage of the year.
pub const PERSISTENCE_THRESHOLD: f64 = 99.0;

/// Masked annual means of a monthly field, `(months, lev, point)` to
/// `(years, lev, point)`.
///
/// The month count must be a whole number of years.
pub fn annual_mean(monthly: ArrayView3<'_, f64>) -> Result<Array3<f64>> {
    let (n_months, n_lev, n_points) = monthly.dim();
    if n_months % 12 != 0 {
        return Err(Error::ShapeMismatch {
            context: "annual mean over months",
            expected: vec![12 * (n_months / 12).max(1), n_lev, n_points],
            actual: vec![n_months, n_lev, n_points],
        });
    }
    let n_years = n_months / 12;
    let mut out = Array3::from_elem((n_years, n_lev, n_points), FILL_VALUE_F64);
    for y in 0..n_years {
        for l in 0..n_lev {
            for i in 0..n_points {
                let months = (0..12).map(|m| monthly[[y * 12 + m, l, i]]);
                out[[y, l, i]] = mean_valid(months);
            }
        }
    }
    Ok(out)
}

/// Annual persistence of each isopycnal bin, in percent of months occupied.
///
/// A bin counts as occupied in a month when its thickness is valid. Bins
/// never occupied are masked rather than reported as 0%.
pub fn persistence(monthly_thickness: ArrayView3<'_, f64>) -> Result<Array3<f64>> {
    let (n_months, n_lev, n_points) = monthly_thickness.dim();
    if n_months % 12 != 0 {
        return Err(Error::ShapeMismatch {
            context: "persistence over months",
            expected: vec![12 * (n_months / 12).max(1), n_lev, n_points],
            actual: vec![n_months, n_lev, n_points],
        });
    }
    let n_years = n_months / 12;
    let mut out = Array3::from_elem((n_years, n_lev, n_points), FILL_VALUE_F64);
    for y in 0..n_years {
        for l in 0..n_lev {
            for i in 0..n_points {
                let occupied = (0..12)
                    .filter(|&m| is_valid_f64(monthly_thickness[[y * 12 + m, l, i]]))
                    .count();
                if occupied > 0 {
                    out[[y, l, i]] = occupied as f64 / 12.0 * 100.0;
                }
            }
        }
    }
    Ok(out)
}

/// Properties on the bowl (shallowest persistent isopycnal), one value per
/// horizontal point.
#[derive(Clone, Debug)]
pub struct BowlProperties {
    /// Depth of the bowl (m).
    pub depth: Array1<f64>,
    /// Density of the bowl (σₙ).
    pub sigma: Array1<f64>,
    /// Temperature on the bowl (°C).
    pub temperature: Array1<f64>,
    /// Salinity on the bowl (PSS-78).
    pub salinity: Array1<f64>,
}

/// Locate the bowl per column and read the binned properties there.
///
/// The bowl index is the first density level whose persistence meets
/// [`PERSISTENCE_THRESHOLD`]. Columns with no such level, or with a masked
/// depth at it, have no bowl and are masked throughout.
pub fn bowl_properties(
    persistence: ArrayView2<'_, f64>,
    depth: ArrayView2<'_, f64>,
    temperature: ArrayView2<'_, f64>,
    salinity: ArrayView2<'_, f64>,
    axis_levels: &[f64],
) -> BowlProperties {
    let (n_lev, n_points) = persistence.dim();
    debug_assert_eq!(depth.dim(), (n_lev, n_points));
    debug_assert_eq!(axis_levels.len(), n_lev);

    let mut out = BowlProperties {
        depth: Array1::from_elem(n_points, FILL_VALUE_F64),
        sigma: Array1::from_elem(n_points, FILL_VALUE_F64),
        temperature: Array1::from_elem(n_points, FILL_VALUE_F64),
        salinity: Array1::from_elem(n_points, FILL_VALUE_F64),
    };

    for i in 0..n_points {
        let p_top = (0..n_lev).find(|&l| {
            let p = persistence[[l, i]];
            is_valid_f64(p) && p >= PERSISTENCE_THRESHOLD
        });
        let Some(l) = p_top else { continue };
        if !is_valid_f64(depth[[l, i]]) {
            continue;
        }
        out.depth[i] = depth[[l, i]];
        out.sigma[i] = axis_levels[l];
        out.temperature[i] = temperature[[l, i]];
        out.salinity[i] = salinity[[l, i]];
    }

    out
}

/// Fraction of the water column that is persistent, per point, in percent.
///
/// Thickness-weighted mean of persistence over the density axis:
/// Σ(persistence·thickness) / Σ(thickness) over bins where both are valid.
pub fn column_persistence_fraction(
    persistence: ArrayView2<'_, f64>,
    thickness: ArrayView2<'_, f64>,
) -> Array1<f64> {
    let (n_lev, n_points) = persistence.dim();
    debug_assert_eq!(thickness.dim(), (n_lev, n_points));
    Array1::from_iter((0..n_points).map(|i| {
        let mut weighted = 0.0;
        let mut total = 0.0;
        for l in 0..n_lev {
            let p = persistence[[l, i]];
            let h = thickness[[l, i]];
            if is_valid_f64(p) && is_valid_f64(h) {
                weighted += p * h;
                total += h;
            }
        }
        if total > 0.0 {
            weighted / total
        } else {
            FILL_VALUE_F64
        }
    }))
}
