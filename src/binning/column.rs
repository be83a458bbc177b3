//! Remapping of a single water column onto the density grid.
//!
//! Model density is not guaranteed monotonic with depth (mixed layers,
//! inversions near coasts and ice shelves), so the column is first reduced
//! to the sub-range between its running-minimum and running-maximum density
//! indices, and the isopycnal depths are read off that sub-profile by
//! piecewise-linear interpolation. Degenerate columns are masked, never
//! errors: partial coverage is the norm in climate-model output.

use crate::eos::sigma_n;
use crate::grid::DensityGrid;
use crate::masked::{is_valid_f64, FILL_VALUE_F64};

/// Maximum plausible ocean depth (m); thicknesses at or beyond this are
/// inversion artifacts and are masked.
pub const MAX_OCEAN_DEPTH: f64 = 6000.0;

/// One horizontal grid point's vertical profile at one time step.
///
/// `depth` holds cell centers (strictly increasing), `bounds` the cell
/// interfaces (length `depth.len() + 1`); profiles are aligned with `depth`.
#[derive(Clone, Copy, Debug)]
pub struct GridColumn<'a> {
    /// Depth-cell centers (m, positive down).
    pub depth: &'a [f64],
    /// Depth-cell interfaces (m), one more than `depth`.
    pub bounds: &'a [f64],
    /// Potential temperature profile (°C).
    pub temperature: &'a [f64],
    /// Salinity profile (PSS-78).
    pub salinity: &'a [f64],
}

impl<'a> GridColumn<'a> {
    /// Deepest valid cell of the column, or `None` if the surface cell is
    /// already missing.
    ///
    /// Ocean model levels are valid from the surface down to the bathymetry,
    /// so the valid region is the prefix before the first missing cell.
    pub fn bottom_index(&self) -> Option<usize> {
        let mut bottom = None;
        for k in 0..self.depth.len() {
            if is_valid_f64(self.temperature[k]) && is_valid_f64(self.salinity[k]) {
                bottom = Some(k);
            } else {
                break;
            }
        }
        bottom
    }
}

/// A column remapped onto the density grid.
///
/// Each field has `n_levels + 1` entries: one per target density plus the
/// trailing bottom sentinel, which carries the depth of the sea floor and
/// the bottom cell's temperature and salinity.
#[derive(Clone, Debug)]
pub struct BinnedColumn {
    /// Depth of each isopycnal (m).
    pub depth: Vec<f64>,
    /// Thickness of each isopycnal bin (m); the sentinel level has none.
    pub thickness: Vec<f64>,
    /// Temperature on each isopycnal (°C).
    pub temperature: Vec<f64>,
    /// Salinity on each isopycnal (PSS-78).
    pub salinity: Vec<f64>,
}

impl BinnedColumn {
    /// A fully-masked column for `n_levels` target densities.
    pub fn filled(n_levels: usize) -> Self {
        Self {
            depth: vec![FILL_VALUE_F64; n_levels + 1],
            thickness: vec![FILL_VALUE_F64; n_levels + 1],
            temperature: vec![FILL_VALUE_F64; n_levels + 1],
            salinity: vec![FILL_VALUE_F64; n_levels + 1],
        }
    }
}

/// Remap one column onto the density grid.
///
/// Entirely masked columns return a fully-masked result. A target density
/// lighter than anything in the column pins to the surface (depth 0), one
/// denser than anything pins to the bottom sentinel depth; temperature and
/// salinity stay missing at pinned levels since the bottom properties are
/// carried on the sentinel.
pub fn bin_column(col: &GridColumn<'_>, grid: &DensityGrid) -> BinnedColumn {
    let n_s = grid.n_levels();
    let mut out = BinnedColumn::filled(n_s);

    let Some(bottom) = col.bottom_index() else {
        return out;
    };

    // Bottom sentinel: sea-floor depth and bottom-cell water properties
    let bottom_depth = col.bounds[bottom + 1];
    out.depth[n_s] = bottom_depth;
    out.temperature[n_s] = col.temperature[bottom];
    out.salinity[n_s] = col.salinity[bottom];

    let sigma: Vec<f64> = (0..=bottom)
        .map(|k| sigma_n(col.temperature[k], col.salinity[k]))
        .collect();

    // Strictly increasing sub-range between the density minimum and maximum
    let mut i_min = argmin(&sigma);
    let mut i_max = argmax(&sigma);
    if i_min > i_max {
        i_min = i_max;
    }

    // Weak or absent stratification: interpolating on the monotonic
    // sub-range would be degenerate, use the full profile instead
    if sigma[bottom] - sigma[0] < grid.fine_step() {
        i_min = 0;
        i_max = bottom;
    }

    let sz = &sigma[i_min..=i_max];
    let zz = &col.depth[i_min..=i_max];
    let tt = &col.temperature[i_min..=i_max];
    let ss = &col.salinity[i_min..=i_max];
    let sz_min = sz[0];
    let sz_max = sz[sz.len() - 1];

    for (js, &target) in grid.levels().iter().enumerate() {
        if target < sz_min {
            // Lighter than the whole column: isopycnal outcrops, pin to the
            // surface
            out.depth[js] = 0.0;
        } else if target > sz_max {
            // Denser than the whole column: pin to the sea floor
            out.depth[js] = bottom_depth;
        } else if let Some(z) = interp_linear(target, sz, zz) {
            out.depth[js] = z;
            if let Some(t) = interp_linear(z, zz, tt) {
                out.temperature[js] = t;
            }
            if let Some(s) = interp_linear(z, zz, ss) {
                out.salinity[js] = s;
            }
        }
    }

    // Thickness as the first difference of isopycnal depth; the first
    // level's thickness is its own depth
    if is_valid_f64(out.depth[0]) {
        out.thickness[0] = out.depth[0];
    }
    for js in 1..n_s {
        if is_valid_f64(out.depth[js]) && is_valid_f64(out.depth[js - 1]) {
            out.thickness[js] = out.depth[js] - out.depth[js - 1];
        }
    }
    for t in out.thickness[..n_s].iter_mut() {
        if is_valid_f64(*t) && (*t <= 0.0 || *t >= MAX_OCEAN_DEPTH) {
            *t = FILL_VALUE_F64;
        }
    }

    out
}

/// Index of the first occurrence of the minimum.
fn argmin(values: &[f64]) -> usize {
    let mut best = 0;
    for (i, &v) in values.iter().enumerate() {
        if v < values[best] {
            best = i;
        }
    }
    best
}

/// Index of the first occurrence of the maximum.
fn argmax(values: &[f64]) -> usize {
    let mut best = 0;
    for (i, &v) in values.iter().enumerate() {
        if v > values[best] {
            best = i;
        }
    }
    best
}

/// Piecewise-linear interpolation of `fp` against `xp` at `x`.
///
/// Scans for the first interval with `xp[m] <= x <= xp[m+1]`; intervals the
/// sub-profile traverses backwards are skipped. Returns `None` when `x` is
/// in no interval.
fn interp_linear(x: f64, xp: &[f64], fp: &[f64]) -> Option<f64> {
    if xp.len() == 1 {
        return (x == xp[0]).then(|| fp[0]);
    }
    for m in 0..xp.len() - 1 {
        let (x0, x1) = (xp[m], xp[m + 1]);
        if x0 <= x && x <= x1 {
            if x1 == x0 {
                return Some(fp[m]);
            }
            let w = (x - x0) / (x1 - x0);
            return Some(fp[m] + w * (fp[m + 1] - fp[m]));
        }
    }
    None
}
