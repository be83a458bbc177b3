//! Input/output: unit repair for model fields and NetCDF read/write
//! (feature `netcdf`).

mod units;

pub use units::{fix_salinity_units, fix_temperature_units};

#[cfg(feature = "netcdf")]
mod netcdf_io;

#[cfg(feature = "netcdf")]
pub use netcdf_io::{
    read_basin_codes, read_bowl_sigma, read_cell_areas, read_zonal_variable, run_density_binning,
    EnsembleWriter, ModelReader, MonthlyWriter, WriterConfig, ZonalWriter,
};
