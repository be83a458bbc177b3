//! Chunked run driver.
//!
//! Binds the binning engine to the aggregation stages over one model run:
//! monthly chunks are binned, reduced to annual means, regridded to the
//! reference grid, masked by basin and collapsed to zonal statistics, with
//! persistence and bowl diagnostics along the way. Each chunk's working
//! arrays are fully consumed before the next chunk is read, so peak memory
//! is one chunk's footprint rather than the full time series.

use ndarray::{Array1, Array2, Array3, Array4, ArrayView1, ArrayView2, ArrayView3, Axis};
use std::time::Instant;

use crate::aggregate::{
    annual_mean, bowl_properties, column_persistence_fraction, isopycnal_volume,
    masked_zonal_mean, persistence,
};
use crate::binning::{bin_chunk, BinnedChunk, SourceGrid};
use crate::error::{Error, Result};
use crate::grid::{cell_areas, Basin, BasinMasks, DensityGrid, DensityGridSpec};
use crate::masked::FILL_VALUE_F64;
use crate::regrid::Regridder;

/// Which part of the input time axis to process.
#[derive(Clone, Copy, Debug)]
pub enum TimeRange {
    /// The full series.
    All,
    /// `count` steps starting at `start`.
    Slice { start: usize, count: usize },
}

impl TimeRange {
    /// Resolve to `[tmin, tmax)` against the series length.
    pub fn resolve(&self, n_time: usize) -> (usize, usize) {
        match *self {
            TimeRange::All => (0, n_time),
            TimeRange::Slice { start, count } => {
                let tmin = start.min(n_time);
                (tmin, (tmin + count).min(n_time))
            }
        }
    }
}

/// Configuration of one binning run.
#[derive(Clone, Copy, Debug)]
pub struct BinningConfig {
    /// Target density grid parameters.
    pub grid: DensityGridSpec,
    /// Time steps to process.
    pub time_range: TimeRange,
    /// Keep monthly binned fields in the output (they are large).
    pub monthly_output: bool,
    /// Print per-chunk progress and timings.
    pub verbose: bool,
}

impl Default for BinningConfig {
    fn default() -> Self {
        Self {
            grid: DensityGridSpec::default(),
            time_range: TimeRange::All,
            monthly_output: false,
            verbose: false,
        }
    }
}

/// Months per chunk as a function of the 3-D grid size: small grids can
/// afford ten years at a time, large grids read two.
pub fn chunk_length(grid_size: usize) -> usize {
    if grid_size <= 1_000_000 {
        120
    } else {
        24
    }
}

/// Chunk bounds `[start, end)` covering `[tmin, tmax)`.
pub fn chunk_bounds(tmin: usize, tmax: usize, chunk: usize) -> Vec<(usize, usize)> {
    let mut bounds = Vec::new();
    let mut t = tmin;
    while t < tmax {
        let end = (t + chunk).min(tmax);
        bounds.push((t, end));
        t = end;
    }
    bounds
}

/// The reference grid the outputs live on: coordinates, cell areas and
/// basin masks.
#[derive(Clone, Debug)]
pub struct TargetGrid {
    pub lat: Vec<f64>,
    pub lon: Vec<f64>,
    pub areas: Array2<f64>,
    pub basins: BasinMasks,
}

impl TargetGrid {
    /// Build from coordinates and the integer basin-code field.
    pub fn from_basin_codes(
        lat: Vec<f64>,
        lon: Vec<f64>,
        codes: ArrayView2<'_, f64>,
    ) -> Result<Self> {
        if codes.dim() != (lat.len(), lon.len()) {
            return Err(Error::ShapeMismatch {
                context: "basin codes vs coordinates",
                expected: vec![lat.len(), lon.len()],
                actual: codes.shape().to_vec(),
            });
        }
        let areas = cell_areas(&lon, &lat);
        let basins = BasinMasks::from_codes(codes);
        Ok(Self {
            lat,
            lon,
            areas,
            basins,
        })
    }

    pub fn n_lat(&self) -> usize {
        self.lat.len()
    }

    pub fn n_lon(&self) -> usize {
        self.lon.len()
    }

    /// Zonal area sums for each basin, in basin-axis order.
    pub fn zonal_areas(&self) -> [Array1<f64>; 4] {
        Basin::ALL.map(|b| self.basins.zonal_area(self.areas.view(), b))
    }
}

/// Zonal fields per basin, `(years, basin, density, latitude)`.
#[derive(Clone, Debug)]
pub struct ZonalFields {
    pub depth: Array4<f64>,
    pub thickness: Array4<f64>,
    /// Isopycnal volume (m³).
    pub volume: Array4<f64>,
    pub temperature: Array4<f64>,
    pub salinity: Array4<f64>,
    pub persistence: Array4<f64>,
}

/// Zonal bowl properties per basin, `(years, basin, latitude)`.
#[derive(Clone, Debug)]
pub struct BowlZonal {
    pub depth: Array3<f64>,
    pub sigma: Array3<f64>,
    pub temperature: Array3<f64>,
    pub salinity: Array3<f64>,
}

/// Bowl and persistence maps on the reference grid, `(years, lat, lon)`.
#[derive(Clone, Debug)]
pub struct BowlMaps {
    pub depth: Array3<f64>,
    pub temperature: Array3<f64>,
    pub salinity: Array3<f64>,
    /// Thickness-weighted persistent fraction of the column (%).
    pub column_fraction: Array3<f64>,
}

/// Annual products of one chunk.
#[derive(Clone, Debug)]
pub struct AnnualOutputs {
    pub zonal: ZonalFields,
    pub bowl_zonal: BowlZonal,
    pub bowl_maps: BowlMaps,
}

/// Everything one chunk produces.
#[derive(Clone, Debug)]
pub struct ChunkDiagnostics {
    /// Monthly binned fields on the source grid.
    pub binned: BinnedChunk,
    /// Annual diagnostics; absent when the chunk is shorter than a year.
    pub annual: Option<AnnualOutputs>,
}

/// Bin and aggregate one time chunk.
///
/// `temperature` and `salinity` are `(time, depth, point)` on the source
/// grid; the regridder must map onto `target`'s grid.
pub fn process_chunk(
    temperature: ArrayView3<'_, f64>,
    salinity: ArrayView3<'_, f64>,
    source: &SourceGrid,
    grid: &DensityGrid,
    target: &TargetGrid,
    regridder: &dyn Regridder,
) -> Result<ChunkDiagnostics> {
    if regridder.target_shape() != (target.n_lat(), target.n_lon()) {
        return Err(Error::ShapeMismatch {
            context: "regridder vs target grid",
            expected: vec![target.n_lat(), target.n_lon()],
            actual: vec![regridder.target_shape().0, regridder.target_shape().1],
        });
    }

    let binned = bin_chunk(temperature, salinity, source, grid)?;
    let n_time = temperature.dim().0;
    if n_time % 12 != 0 {
        return Ok(ChunkDiagnostics {
            binned,
            annual: None,
        });
    }
    let n_years = n_time / 12;
    let n_axis = grid.n_levels() + 1;
    let axis_levels = grid.axis_levels();
    let (n_lat_t, n_lon_t) = (target.n_lat(), target.n_lon());
    let n_points_t = n_lat_t * n_lon_t;

    // Annual means and persistence on the source grid
    let depth_y = annual_mean(binned.depth.view())?;
    let thick_y = annual_mean(binned.thickness.view())?;
    let temp_y = annual_mean(binned.temperature.view())?;
    let salt_y = annual_mean(binned.salinity.view())?;
    let pers_y = persistence(binned.thickness.view())?;

    let zonal_areas = target.zonal_areas();
    let mut zonal = ZonalFields {
        depth: Array4::from_elem((n_years, 4, n_axis, n_lat_t), FILL_VALUE_F64),
        thickness: Array4::from_elem((n_years, 4, n_axis, n_lat_t), FILL_VALUE_F64),
        volume: Array4::from_elem((n_years, 4, n_axis, n_lat_t), FILL_VALUE_F64),
        temperature: Array4::from_elem((n_years, 4, n_axis, n_lat_t), FILL_VALUE_F64),
        salinity: Array4::from_elem((n_years, 4, n_axis, n_lat_t), FILL_VALUE_F64),
        persistence: Array4::from_elem((n_years, 4, n_axis, n_lat_t), FILL_VALUE_F64),
    };
    let mut bowl_zonal = BowlZonal {
        depth: Array3::from_elem((n_years, 4, n_lat_t), FILL_VALUE_F64),
        sigma: Array3::from_elem((n_years, 4, n_lat_t), FILL_VALUE_F64),
        temperature: Array3::from_elem((n_years, 4, n_lat_t), FILL_VALUE_F64),
        salinity: Array3::from_elem((n_years, 4, n_lat_t), FILL_VALUE_F64),
    };
    let mut bowl_maps = BowlMaps {
        depth: Array3::from_elem((n_years, n_lat_t, n_lon_t), FILL_VALUE_F64),
        temperature: Array3::from_elem((n_years, n_lat_t, n_lon_t), FILL_VALUE_F64),
        salinity: Array3::from_elem((n_years, n_lat_t, n_lon_t), FILL_VALUE_F64),
        column_fraction: Array3::from_elem((n_years, n_lat_t, n_lon_t), FILL_VALUE_F64),
    };

    for y in 0..n_years {
        // Regrid every level of every annual field onto the target grid
        let depth_i = regrid_levels(depth_y.index_axis(Axis(0), y), source, regridder);
        let thick_i = regrid_levels(thick_y.index_axis(Axis(0), y), source, regridder);
        let temp_i = regrid_levels(temp_y.index_axis(Axis(0), y), source, regridder);
        let salt_i = regrid_levels(salt_y.index_axis(Axis(0), y), source, regridder);
        let pers_i = regrid_levels(pers_y.index_axis(Axis(0), y), source, regridder);

        for basin in Basin::ALL {
            let b = basin.index();
            let mask = target.basins.mask(basin);
            for l in 0..n_axis {
                let dz = masked_zonal_mean(depth_i.index_axis(Axis(0), l), mask);
                let tz = masked_zonal_mean(thick_i.index_axis(Axis(0), l), mask);
                let xz = masked_zonal_mean(temp_i.index_axis(Axis(0), l), mask);
                let sz = masked_zonal_mean(salt_i.index_axis(Axis(0), l), mask);
                let pz = masked_zonal_mean(pers_i.index_axis(Axis(0), l), mask);
                for j in 0..n_lat_t {
                    zonal.depth[[y, b, l, j]] = dz[j];
                    zonal.thickness[[y, b, l, j]] = tz[j];
                    zonal.temperature[[y, b, l, j]] = xz[j];
                    zonal.salinity[[y, b, l, j]] = sz[j];
                    zonal.persistence[[y, b, l, j]] = pz[j];
                }
            }
            let vol = isopycnal_volume(
                zonal.thickness.slice(ndarray::s![y, b, .., ..]),
                zonal_areas[b].view(),
            );
            zonal.volume.slice_mut(ndarray::s![y, b, .., ..]).assign(&vol);
        }

        // Bowl on the source grid, then regridded
        let bowl = bowl_properties(
            pers_y.index_axis(Axis(0), y),
            depth_y.index_axis(Axis(0), y),
            temp_y.index_axis(Axis(0), y),
            salt_y.index_axis(Axis(0), y),
            &axis_levels,
        );
        let bowl_depth_i = regridder.regrid(to_latlon(bowl.depth.view(), source).view());
        let bowl_sigma_i = regridder.regrid(to_latlon(bowl.sigma.view(), source).view());
        let bowl_temp_i = regridder.regrid(to_latlon(bowl.temperature.view(), source).view());
        let bowl_salt_i = regridder.regrid(to_latlon(bowl.salinity.view(), source).view());

        bowl_maps
            .depth
            .index_axis_mut(Axis(0), y)
            .assign(&bowl_depth_i);
        bowl_maps
            .temperature
            .index_axis_mut(Axis(0), y)
            .assign(&bowl_temp_i);
        bowl_maps
            .salinity
            .index_axis_mut(Axis(0), y)
            .assign(&bowl_salt_i);

        for basin in Basin::ALL {
            let b = basin.index();
            let mask = target.basins.mask(basin);
            let dz = masked_zonal_mean(bowl_depth_i.view(), mask);
            let rz = masked_zonal_mean(bowl_sigma_i.view(), mask);
            let xz = masked_zonal_mean(bowl_temp_i.view(), mask);
            let sz = masked_zonal_mean(bowl_salt_i.view(), mask);
            for j in 0..n_lat_t {
                bowl_zonal.depth[[y, b, j]] = dz[j];
                bowl_zonal.sigma[[y, b, j]] = rz[j];
                bowl_zonal.temperature[[y, b, j]] = xz[j];
                bowl_zonal.salinity[[y, b, j]] = sz[j];
            }
        }

        // Persistent fraction of the column on the target grid
        let pers_flat =
            Array2::from_shape_fn((n_axis, n_points_t), |(l, p)| {
                pers_i[[l, p / n_lon_t, p % n_lon_t]]
            });
        let thick_flat =
            Array2::from_shape_fn((n_axis, n_points_t), |(l, p)| {
                thick_i[[l, p / n_lon_t, p % n_lon_t]]
            });
        let fraction = column_persistence_fraction(pers_flat.view(), thick_flat.view());
        for j in 0..n_lat_t {
            for i in 0..n_lon_t {
                bowl_maps.column_fraction[[y, j, i]] = fraction[j * n_lon_t + i];
            }
        }
    }

    Ok(ChunkDiagnostics {
        binned,
        annual: Some(AnnualOutputs {
            zonal,
            bowl_zonal,
            bowl_maps,
        }),
    })
}

/// Regrid every density level of a `(lev, point)` field, producing
/// `(lev, lat, lon)` on the target grid.
fn regrid_levels(
    field: ArrayView2<'_, f64>,
    source: &SourceGrid,
    regridder: &dyn Regridder,
) -> Array3<f64> {
    let n_lev = field.dim().0;
    let (n_lat_t, n_lon_t) = regridder.target_shape();
    let mut out = Array3::from_elem((n_lev, n_lat_t, n_lon_t), FILL_VALUE_F64);
    for l in 0..n_lev {
        let regridded = regridder.regrid(to_latlon(field.index_axis(Axis(0), l), source).view());
        out.index_axis_mut(Axis(0), l).assign(&regridded);
    }
    out
}

/// Unflatten a point-indexed field back to `(lat, lon)` on the source grid.
fn to_latlon(slice: ArrayView1<'_, f64>, source: &SourceGrid) -> Array2<f64> {
    Array2::from_shape_fn((source.n_lat, source.n_lon), |(j, i)| {
        slice[j * source.n_lon + i]
    })
}

/// Per-chunk progress reporting for long runs.
pub struct ChunkProgress {
    verbose: bool,
    n_chunks: usize,
    started: Instant,
    chunk_started: Instant,
}

impl ChunkProgress {
    pub fn new(verbose: bool, n_chunks: usize) -> Self {
        let now = Instant::now();
        Self {
            verbose,
            n_chunks,
            started: now,
            chunk_started: now,
        }
    }

    /// Call before processing chunk `idx` with time bounds `bounds`.
    pub fn chunk_start(&mut self, idx: usize, bounds: (usize, usize)) {
        self.chunk_started = Instant::now();
        if self.verbose {
            println!(
                " --> time chunk {}/{} (months {}..{})",
                idx + 1,
                self.n_chunks,
                bounds.0,
                bounds.1
            );
        }
    }

    /// Call after chunk `idx` completes.
    pub fn chunk_done(&mut self) {
        if self.verbose {
            println!(
                "     chunk wall time: {:.2} s",
                self.chunk_started.elapsed().as_secs_f64()
            );
        }
    }

    /// Call once after the last chunk.
    pub fn finish(&self) {
        if self.verbose {
            println!(
                " total wall time: {:.2} s",
                self.started.elapsed().as_secs_f64()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::regrid::IdentityRegridder;
    use ndarray::Array3 as A3;

    #[test]
    fn test_time_range_resolve() {
        assert_eq!(TimeRange::All.resolve(100), (0, 100));
        assert_eq!(
            TimeRange::Slice {
                start: 12,
                count: 24
            }
            .resolve(100),
            (12, 36)
        );
        // Clamped to the series
        assert_eq!(
            TimeRange::Slice {
                start: 90,
                count: 24
            }
            .resolve(100),
            (90, 100)
        );
    }

    #[test]
    fn test_chunk_length_by_grid_size() {
        assert_eq!(chunk_length(500_000), 120);
        assert_eq!(chunk_length(5_000_000), 24);
    }

    #[test]
    fn test_chunk_bounds_cover_range() {
        let bounds = chunk_bounds(0, 50, 24);
        assert_eq!(bounds, vec![(0, 24), (24, 48), (48, 50)]);
    }

    fn tiny_setup() -> (SourceGrid, DensityGrid, TargetGrid) {
        let source = SourceGrid {
            depth: (0..10).map(|k| 10.0 * k as f64 + 5.0).collect(),
            depth_bounds: (0..=10).map(|k| 10.0 * k as f64).collect(),
            n_lat: 2,
            n_lon: 3,
        };
        let grid = DensityGrid::build(&DensityGridSpec::default());
        let codes = Array2::from_shape_vec(
            (2, 3),
            vec![1.0, 2.0, 3.0, 1.0, 2.0, 3.0],
        )
        .unwrap();
        let target =
            TargetGrid::from_basin_codes(vec![-30.0, 30.0], vec![0.0, 120.0, 240.0], codes.view())
                .unwrap();
        (source, grid, target)
    }

    fn stratified_fields(n_time: usize, source: &SourceGrid) -> (A3<f64>, A3<f64>) {
        let n_depth = source.depth.len();
        let n_points = source.n_points();
        let temp = A3::from_shape_fn((n_time, n_depth, n_points), |(_, k, _)| {
            25.0 - 2.0 * k as f64
        });
        let salt = A3::from_elem((n_time, n_depth, n_points), 35.0);
        (temp, salt)
    }

    #[test]
    fn test_process_chunk_short_chunk_has_no_annual() {
        let (source, grid, target) = tiny_setup();
        let (temp, salt) = stratified_fields(6, &source);
        let regridder = IdentityRegridder::new(2, 3);
        let out = process_chunk(
            temp.view(),
            salt.view(),
            &source,
            &grid,
            &target,
            &regridder,
        )
        .unwrap();
        assert!(out.annual.is_none());
        assert_eq!(out.binned.depth.dim().0, 6);
    }

    #[test]
    fn test_process_chunk_annual_shapes() {
        let (source, grid, target) = tiny_setup();
        let (temp, salt) = stratified_fields(24, &source);
        let regridder = IdentityRegridder::new(2, 3);
        let out = process_chunk(
            temp.view(),
            salt.view(),
            &source,
            &grid,
            &target,
            &regridder,
        )
        .unwrap();
        let annual = out.annual.expect("two full years");
        let n_axis = grid.n_levels() + 1;
        assert_eq!(annual.zonal.depth.dim(), (2, 4, n_axis, 2));
        assert_eq!(annual.bowl_zonal.depth.dim(), (2, 4, 2));
        assert_eq!(annual.bowl_maps.depth.dim(), (2, 2, 3));
    }

    #[test]
    fn test_process_chunk_persistent_column_has_full_persistence() {
        let (source, grid, target) = tiny_setup();
        let (temp, salt) = stratified_fields(12, &source);
        let regridder = IdentityRegridder::new(2, 3);
        let out = process_chunk(
            temp.view(),
            salt.view(),
            &source,
            &grid,
            &target,
            &regridder,
        )
        .unwrap();
        let annual = out.annual.unwrap();
        // The fields are time-invariant, so any occupied bin persists all
        // year: zonal persistence is either 100 or masked
        for &p in annual.zonal.persistence.iter() {
            if crate::masked::is_valid_f64(p) {
                assert!((p - 100.0).abs() < 1e-9);
            }
        }
    }

    #[test]
    fn test_regridder_shape_checked() {
        let (source, grid, target) = tiny_setup();
        let (temp, salt) = stratified_fields(12, &source);
        let regridder = IdentityRegridder::new(5, 7);
        let err = process_chunk(
            temp.view(),
            salt.view(),
            &source,
            &grid,
            &target,
            &regridder,
        );
        assert!(matches!(err, Err(Error::ShapeMismatch { .. })));
    }
}
