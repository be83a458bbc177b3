//! Chunk driver for the binning engine.
//!
//! Operates on one time chunk of model output with the horizontal dimensions
//! flattened to a single point axis, the layout the per-column kernel wants.
//! Columns are independent, so the point loop is embarrassingly parallel and
//! runs under rayon when the `parallel` feature is enabled.

use ndarray::{Array3, ArrayView3};

use crate::binning::column::{bin_column, BinnedColumn, GridColumn};
use crate::error::{Error, Result};
use crate::grid::DensityGrid;
use crate::masked::FILL_VALUE_F64;

/// Vertical and horizontal layout of the source model grid.
#[derive(Clone, Debug)]
pub struct SourceGrid {
    /// Depth-cell centers (m), strictly increasing.
    pub depth: Vec<f64>,
    /// Depth-cell interfaces (m), length `depth.len() + 1`.
    pub depth_bounds: Vec<f64>,
    /// Number of latitude rows.
    pub n_lat: usize,
    /// Number of longitude columns.
    pub n_lon: usize,
}

impl SourceGrid {
    /// Number of horizontal points (the flattened point axis).
    pub fn n_points(&self) -> usize {
        self.n_lat * self.n_lon
    }

    /// Total 3-D grid size; drives the time-chunk length.
    pub fn grid_size(&self) -> usize {
        self.n_points() * self.depth.len()
    }
}

/// One time chunk of binned fields, shape `(time, n_levels + 1, point)`.
#[derive(Clone, Debug)]
pub struct BinnedChunk {
    pub depth: Array3<f64>,
    pub thickness: Array3<f64>,
    pub temperature: Array3<f64>,
    pub salinity: Array3<f64>,
}

impl BinnedChunk {
    fn filled(n_time: usize, n_levels: usize, n_points: usize) -> Self {
        let shape = (n_time, n_levels + 1, n_points);
        Self {
            depth: Array3::from_elem(shape, FILL_VALUE_F64),
            thickness: Array3::from_elem(shape, FILL_VALUE_F64),
            temperature: Array3::from_elem(shape, FILL_VALUE_F64),
            salinity: Array3::from_elem(shape, FILL_VALUE_F64),
        }
    }
}

/// Bin one time chunk of temperature/salinity onto the density grid.
///
/// Inputs have shape `(time, depth, point)`. The temperature and salinity
/// arrays must agree on every axis and match the source grid; any
/// disagreement is the fatal [`Error::ShapeMismatch`].
pub fn bin_chunk(
    temperature: ArrayView3<'_, f64>,
    salinity: ArrayView3<'_, f64>,
    source: &SourceGrid,
    grid: &DensityGrid,
) -> Result<BinnedChunk> {
    if temperature.dim() != salinity.dim() {
        return Err(Error::ShapeMismatch {
            context: "temperature vs salinity",
            expected: temperature.shape().to_vec(),
            actual: salinity.shape().to_vec(),
        });
    }
    let (n_time, n_depth, n_points) = temperature.dim();
    if n_depth != source.depth.len()
        || n_points != source.n_points()
        || source.depth_bounds.len() != n_depth + 1
    {
        return Err(Error::ShapeMismatch {
            context: "field vs source grid",
            expected: vec![source.depth.len(), source.n_points()],
            actual: vec![n_depth, n_points],
        });
    }

    let n_s = grid.n_levels();
    let mut out = BinnedChunk::filled(n_time, n_s, n_points);

    for t in 0..n_time {
        let temp_t = temperature.index_axis(ndarray::Axis(0), t);
        let salt_t = salinity.index_axis(ndarray::Axis(0), t);
        let columns = bin_all_columns(temp_t, salt_t, source, grid);
        for (i, col) in columns.into_iter().enumerate() {
            scatter_column(&mut out, t, i, col);
        }
    }

    Ok(out)
}

fn scatter_column(out: &mut BinnedChunk, t: usize, i: usize, col: BinnedColumn) {
    for (js, &v) in col.depth.iter().enumerate() {
        out.depth[[t, js, i]] = v;
    }
    for (js, &v) in col.thickness.iter().enumerate() {
        out.thickness[[t, js, i]] = v;
    }
    for (js, &v) in col.temperature.iter().enumerate() {
        out.temperature[[t, js, i]] = v;
    }
    for (js, &v) in col.salinity.iter().enumerate() {
        out.salinity[[t, js, i]] = v;
    }
}

/// Gather one column's profiles into contiguous scratch and bin it.
fn bin_one_column(
    temp_t: ndarray::ArrayView2<'_, f64>,
    salt_t: ndarray::ArrayView2<'_, f64>,
    source: &SourceGrid,
    grid: &DensityGrid,
    i: usize,
) -> BinnedColumn {
    let n_depth = source.depth.len();
    let prof_t: Vec<f64> = (0..n_depth).map(|k| temp_t[[k, i]]).collect();
    let prof_s: Vec<f64> = (0..n_depth).map(|k| salt_t[[k, i]]).collect();
    let col = GridColumn {
        depth: &source.depth,
        bounds: &source.depth_bounds,
        temperature: &prof_t,
        salinity: &prof_s,
    };
    bin_column(&col, grid)
}

#[cfg(feature = "parallel")]
fn bin_all_columns(
    temp_t: ndarray::ArrayView2<'_, f64>,
    salt_t: ndarray::ArrayView2<'_, f64>,
    source: &SourceGrid,
    grid: &DensityGrid,
) -> Vec<BinnedColumn> {
    use rayon::prelude::*;
    (0..source.n_points())
        .into_par_iter()
        .map(|i| bin_one_column(temp_t, salt_t, source, grid, i))
        .collect()
}

#[cfg(not(feature = "parallel"))]
fn bin_all_columns(
    temp_t: ndarray::ArrayView2<'_, f64>,
    salt_t: ndarray::ArrayView2<'_, f64>,
    source: &SourceGrid,
    grid: &DensityGrid,
) -> Vec<BinnedColumn> {
    (0..source.n_points())
        .map(|i| bin_one_column(temp_t, salt_t, source, grid, i))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::DensityGridSpec;
    use crate::masked::is_valid_f64;

    fn source(n_depth: usize, n_lat: usize, n_lon: usize) -> SourceGrid {
        SourceGrid {
            depth: (0..n_depth).map(|k| 10.0 * k as f64 + 5.0).collect(),
            depth_bounds: (0..=n_depth).map(|k| 10.0 * k as f64).collect(),
            n_lat,
            n_lon,
        }
    }

    fn fields(n_time: usize, n_depth: usize, n_points: usize) -> (Array3<f64>, Array3<f64>) {
        let temp = Array3::from_shape_fn((n_time, n_depth, n_points), |(_, k, _)| {
            25.0 - 2.0 * k as f64
        });
        let salt = Array3::from_elem((n_time, n_depth, n_points), 35.0);
        (temp, salt)
    }

    #[test]
    fn test_shape_mismatch_is_fatal() {
        let src = source(10, 2, 3);
        let (temp, _) = fields(2, 10, 6);
        let (_, salt) = fields(3, 10, 6);
        let grid = DensityGrid::build(&DensityGridSpec::default());
        let err = bin_chunk(temp.view(), salt.view(), &src, &grid);
        assert!(matches!(err, Err(Error::ShapeMismatch { .. })));
    }

    #[test]
    fn test_chunk_layout() {
        let src = source(10, 2, 3);
        let (temp, salt) = fields(2, 10, 6);
        let grid = DensityGrid::build(&DensityGridSpec::default());
        let out = bin_chunk(temp.view(), salt.view(), &src, &grid).unwrap();
        assert_eq!(out.depth.dim(), (2, grid.n_levels() + 1, 6));
        // All columns identical, so every point agrees at every level
        for js in 0..=grid.n_levels() {
            let v = out.depth[[0, js, 0]];
            for i in 1..6 {
                assert_eq!(out.depth[[0, js, i]], v);
            }
        }
    }

    #[test]
    fn test_masked_point_stays_masked() {
        let src = source(10, 1, 2);
        let (mut temp, salt) = fields(1, 10, 2);
        for k in 0..10 {
            temp[[0, k, 1]] = crate::masked::FILL_VALUE_F64;
        }
        let grid = DensityGrid::build(&DensityGridSpec::default());
        let out = bin_chunk(temp.view(), salt.view(), &src, &grid).unwrap();
        for js in 0..=grid.n_levels() {
            assert!(!is_valid_f64(out.depth[[0, js, 1]]));
        }
        // The valid point still binned
        assert!(is_valid_f64(out.depth[[0, grid.n_levels(), 0]]));
    }
}
