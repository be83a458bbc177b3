//! Zonal statistics per basin.
//!
//! Fields regridded to the reference grid are masked by basin and averaged
//! over longitude; zonal thickness times the basin's zonal area sum gives
//! the isopycnal volume.

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, ArrayView3};

use crate::masked::{is_valid_f64, mean_valid, FILL_VALUE_F64};

/// Masked zonal (longitude) mean of a `(lat, lon)` field restricted to a
/// basin, shape `(lat,)`.
pub fn masked_zonal_mean(field: ArrayView2<'_, f64>, mask: &Array2<bool>) -> Array1<f64> {
    let (n_lat, n_lon) = field.dim();
    debug_assert_eq!(mask.dim(), (n_lat, n_lon));
    Array1::from_iter((0..n_lat).map(|j| {
        mean_valid(
            (0..n_lon)
                .filter(|&i| mask[[j, i]])
                .map(|i| field[[j, i]]),
        )
    }))
}

/// Masked zonal mean of a `(lev, lat, lon)` field, shape `(lev, lat)`.
pub fn masked_zonal_mean3(field: ArrayView3<'_, f64>, mask: &Array2<bool>) -> Array2<f64> {
    let (n_lev, n_lat, _) = field.dim();
    let mut out = Array2::from_elem((n_lev, n_lat), FILL_VALUE_F64);
    for l in 0..n_lev {
        let zonal = masked_zonal_mean(field.index_axis(ndarray::Axis(0), l), mask);
        out.row_mut(l).assign(&zonal);
    }
    out
}

/// Isopycnal volume from zonal thickness and the basin's zonal area sum, in
/// m³ (callers scale to 10¹² m³ at the file boundary).
pub fn isopycnal_volume(
    zonal_thickness: ArrayView2<'_, f64>,
    zonal_area: ArrayView1<'_, f64>,
) -> Array2<f64> {
    let (n_lev, n_lat) = zonal_thickness.dim();
    debug_assert_eq!(zonal_area.len(), n_lat);
    let mut out = Array2::from_elem((n_lev, n_lat), FILL_VALUE_F64);
    for l in 0..n_lev {
        for j in 0..n_lat {
            let h = zonal_thickness[[l, j]];
            if is_valid_f64(h) {
                out[[l, j]] = h * zonal_area[j];
            }
        }
    }
    out
}
