//! # isobin-rs
//!
//! Density binning of ocean climate-model output.
//!
//! This crate post-processes 4-D (time, depth, lat, lon) temperature and
//! salinity fields from ocean models: it remaps them from depth coordinates
//! onto an approximate neutral density coordinate and derives the
//! diagnostics built on that remapping. The building blocks:
//!
//! - Neutral density equation of state (McDougall & Jackett 2005)
//! - Target density grid with fine/coarse spacing
//! - Isopycnal binning engine (depth, thickness, T, S per isopycnal)
//! - Annual means, bin persistence and the mixed-layer "bowl"
//! - Basin-masked zonal means and isopycnal volumes
//! - Multi-model ensemble statistics (mean, coverage, sign agreement,
//!   bowl truncation, intermodel spread)
//! - Time of Emergence detection of forced signals over noise
//! - Surface water-mass transformation from buoyancy fluxes
//!
//! Regridding between horizontal grids is delegated through the
//! [`regrid::Regridder`] trait; NetCDF I/O lives behind the `netcdf`
//! feature, and the column loops parallelize under the `parallel` feature.
//!
//! Missing data is explicit throughout: fields carry the CF fill value and
//! every reduction skips it (see [`masked`]). Degenerate water columns are
//! masked, never errors; only shape mismatches between companion fields
//! abort a run.

pub mod aggregate;
pub mod binning;
pub mod ensemble;
pub mod eos;
pub mod error;
pub mod grid;
pub mod io;
pub mod masked;
pub mod pipeline;
pub mod regrid;
pub mod toe;
pub mod transform;

// Re-export main types for convenience
pub use aggregate::{
    annual_mean, bowl_properties, column_persistence_fraction, isopycnal_volume,
    masked_zonal_mean, persistence, BowlProperties, PERSISTENCE_THRESHOLD,
};
pub use binning::{
    bin_chunk, bin_column, BinnedChunk, BinnedColumn, GridColumn, SourceGrid, MAX_OCEAN_DEPTH,
};
pub use ensemble::{ensemble_stats, stack_members, EnsembleConfig, EnsembleInput, EnsembleStats};
pub use eos::{haline_contraction, neutral_density, sigma_n, specific_heat, thermal_expansion};
pub use error::{Error, Result};
pub use grid::{cell_areas, Basin, BasinMasks, DensityGrid, DensityGridSpec};
pub use masked::{is_valid_f32, is_valid_f64, FILL_VALUE_F32, FILL_VALUE_F64};
pub use pipeline::{
    chunk_bounds, chunk_length, process_chunk, AnnualOutputs, BinningConfig, BowlMaps, BowlZonal,
    ChunkDiagnostics, ChunkProgress, TargetGrid, TimeRange, ZonalFields,
};
pub use regrid::{IdentityRegridder, Regridder};
pub use toe::{anomaly_vs_reference, detect, time_of_emergence, ToeConfig};
pub use transform::{surface_transformation, SurfaceFluxes, TransformationBins};

pub use io::{fix_salinity_units, fix_temperature_units};
#[cfg(feature = "netcdf")]
pub use io::{
    read_basin_codes, read_bowl_sigma, read_cell_areas, read_zonal_variable, run_density_binning,
    EnsembleWriter, ModelReader, MonthlyWriter, WriterConfig, ZonalWriter,
};
