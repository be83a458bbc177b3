//! NetCDF readers and writers for density-binned output.
//!
//! Readers load gridded model fields (temperature, salinity, cell area,
//! basin codes) into the crate's missing-value convention; writers produce
//! the annual/zonal diagnostics file, the optional monthly binned file and
//! the ensemble statistics file. Output variables are written at `f32`
//! precision with CF-style attributes.
//!
//! # Example
//!
//! ```rust,ignore
//! use isobin_rs::io::{run_density_binning, WriterConfig};
//! use isobin_rs::pipeline::BinningConfig;
//! use isobin_rs::regrid::IdentityRegridder;
//!
//! let config = BinningConfig::default();
//! run_density_binning(
//!     "thetao.nc", "so.nc", "areacello.nc", "basinmask.nc",
//!     WriterConfig::new("density_zon.nc"),
//!     None,
//!     &config,
//!     &regridder,
//! )?;
//! ```

use chrono::Utc;
use ndarray::{Array2, Array3, Array4, Axis};

use crate::binning::{BinnedChunk, SourceGrid};
use crate::ensemble::EnsembleStats;
use crate::error::{Error, Result};
use crate::grid::{Basin, DensityGrid};
use crate::io::{fix_salinity_units, fix_temperature_units};
use crate::masked::{is_valid_f64, FILL_VALUE_F32, FILL_VALUE_F64};
use crate::pipeline::{
    chunk_bounds, chunk_length, process_chunk, AnnualOutputs, BinningConfig, ChunkProgress,
    TargetGrid,
};
use crate::regrid::Regridder;

/// Basin variable-name suffixes in basin-axis order.
const SUFFIXES: [&str; 4] = ["", "a", "p", "i"];

// ============================================================================
// Reading
// ============================================================================

/// Reader over a pair of temperature/salinity history files.
pub struct ModelReader {
    file_t: netcdf::File,
    file_s: netcdf::File,
    var_t: String,
    var_s: String,
    fill_t: f64,
    fill_s: f64,
    n_time: usize,
    source: SourceGrid,
}

impl ModelReader {
    /// Open both files and verify that the variables agree on every axis.
    pub fn open(path_t: &str, path_s: &str) -> Result<Self> {
        Self::open_vars(path_t, "thetao", path_s, "so")
    }

    /// Open with explicit variable names.
    pub fn open_vars(path_t: &str, var_t: &str, path_s: &str, var_s: &str) -> Result<Self> {
        let file_t = netcdf::open(path_t)?;
        let file_s = netcdf::open(path_s)?;

        let (shape_t, fill_t) = var_info(&file_t, var_t)?;
        let (shape_s, fill_s) = var_info(&file_s, var_s)?;
        if shape_t != shape_s {
            return Err(Error::ShapeMismatch {
                context: "thetao vs so",
                expected: shape_t,
                actual: shape_s,
            });
        }
        if shape_t.len() != 4 {
            return Err(Error::InvalidData(format!(
                "expected 4-D (time, depth, lat, lon) input, got {} dims",
                shape_t.len()
            )));
        }

        let depth = read_f64_1d(&file_t, "lev")?;
        let bounds = read_depth_bounds(&file_t, depth.len())?;
        let source = SourceGrid {
            depth,
            depth_bounds: bounds,
            n_lat: shape_t[2],
            n_lon: shape_t[3],
        };

        Ok(Self {
            file_t,
            file_s,
            var_t: var_t.to_string(),
            var_s: var_s.to_string(),
            fill_t,
            fill_s,
            n_time: shape_t[0],
            source,
        })
    }

    /// Length of the time axis.
    pub fn n_time(&self) -> usize {
        self.n_time
    }

    /// Vertical and horizontal layout of the model grid.
    pub fn source_grid(&self) -> &SourceGrid {
        &self.source
    }

    /// Read months `[t0, t1)` of both fields, flattened to
    /// `(time, depth, point)` with units repaired and missing values mapped
    /// to the crate fill value.
    pub fn read_chunk(&self, t0: usize, t1: usize) -> Result<(Array3<f64>, Array3<f64>)> {
        let mut temp = self.read_field(&self.file_t, &self.var_t, self.fill_t, t0, t1)?;
        let mut salt = self.read_field(&self.file_s, &self.var_s, self.fill_s, t0, t1)?;
        if fix_temperature_units(&mut temp) {
            println!("     {}: units corrected (K -> degC)", self.var_t);
        }
        if fix_salinity_units(&mut salt) {
            println!("     {}: units corrected (kg/kg -> PSS)", self.var_s);
        }
        let n_depth = self.source.depth.len();
        let n_points = self.source.n_points();
        let shape = (t1 - t0, n_depth, n_points);
        let temp = Array3::from_shape_vec(shape, temp)
            .map_err(|e| Error::InvalidData(e.to_string()))?;
        let salt = Array3::from_shape_vec(shape, salt)
            .map_err(|e| Error::InvalidData(e.to_string()))?;
        Ok((temp, salt))
    }

    fn read_field(
        &self,
        file: &netcdf::File,
        name: &str,
        fill: f64,
        t0: usize,
        t1: usize,
    ) -> Result<Vec<f64>> {
        let var = file
            .variable(name)
            .ok_or_else(|| Error::MissingVariable(name.to_string()))?;
        let mut raw: Vec<f64> = var.get_values::<f64, _>((t0..t1, .., .., ..))?;
        for v in raw.iter_mut() {
            if !v.is_finite() || same_fill(*v, fill) {
                *v = FILL_VALUE_F64;
            }
        }
        Ok(raw)
    }
}

/// Read the horizontal cell-area field (`areacello`), shape `(lat, lon)`.
pub fn read_cell_areas(path: &str) -> Result<Array2<f64>> {
    let file = netcdf::open(path)?;
    let var = file
        .variable("areacello")
        .ok_or_else(|| Error::MissingVariable("areacello".into()))?;
    let dims: Vec<usize> = var.dimensions().iter().map(|d| d.len()).collect();
    if dims.len() != 2 {
        return Err(Error::InvalidData(format!(
            "areacello must be 2-D, got {} dims",
            dims.len()
        )));
    }
    let raw: Vec<f64> = var.get_values::<f64, _>(..)?;
    let mut out = Array2::from_shape_vec((dims[0], dims[1]), raw)
        .map_err(|e| Error::InvalidData(e.to_string()))?;
    for v in out.iter_mut() {
        if !is_valid_f64(*v) {
            *v = FILL_VALUE_F64;
        }
    }
    Ok(out)
}

/// Read the reference-grid basin-code field and its coordinates.
pub fn read_basin_codes(path: &str, var_name: &str) -> Result<(Vec<f64>, Vec<f64>, Array2<f64>)> {
    let file = netcdf::open(path)?;
    let lat = read_f64_1d(&file, "lat")?;
    let lon = read_f64_1d(&file, "lon")?;
    let var = file
        .variable(var_name)
        .ok_or_else(|| Error::MissingVariable(var_name.to_string()))?;
    let raw: Vec<f64> = var.get_values::<f64, _>(..)?;
    let codes = Array2::from_shape_vec((lat.len(), lon.len()), raw)
        .map_err(|e| Error::InvalidData(e.to_string()))?;
    Ok((lat, lon, codes))
}

/// Read one zonal variable of a member file across the basin suffixes,
/// assembled as `(time, basin, density, latitude)`.
pub fn read_zonal_variable(path: &str, base: &str) -> Result<Array4<f64>> {
    let file = netcdf::open(path)?;
    let mut out: Option<Array4<f64>> = None;
    for (b, suffix) in SUFFIXES.iter().enumerate() {
        let name = format!("{base}{suffix}");
        let var = file
            .variable(&name)
            .ok_or_else(|| Error::MissingVariable(name.clone()))?;
        let dims: Vec<usize> = var.dimensions().iter().map(|d| d.len()).collect();
        if dims.len() != 3 {
            return Err(Error::InvalidData(format!(
                "{name} must be (time, lev, lat), got {} dims",
                dims.len()
            )));
        }
        let raw: Vec<f64> = var.get_values::<f64, _>(..)?;
        let field = Array3::from_shape_vec((dims[0], dims[1], dims[2]), raw)
            .map_err(|e| Error::InvalidData(e.to_string()))?;
        let stacked = out.get_or_insert_with(|| {
            Array4::from_elem((dims[0], 4, dims[1], dims[2]), FILL_VALUE_F64)
        });
        if stacked.dim() != (dims[0], 4, dims[1], dims[2]) {
            return Err(Error::ShapeMismatch {
                context: "zonal variable across basins",
                expected: stacked.shape().to_vec(),
                actual: dims,
            });
        }
        for ((t, l, j), &value) in field.indexed_iter() {
            stacked[[t, b, l, j]] = if is_valid_f64(value) {
                value
            } else {
                FILL_VALUE_F64
            };
        }
    }
    out.ok_or_else(|| Error::MissingVariable(base.to_string()))
}

/// Read the zonal bowl density of a member file, `(time, basin, latitude)`.
pub fn read_bowl_sigma(path: &str) -> Result<Array3<f64>> {
    let file = netcdf::open(path)?;
    let mut out: Option<Array3<f64>> = None;
    for (b, suffix) in SUFFIXES.iter().enumerate() {
        let name = format!("ptopsigma{suffix}");
        let var = file
            .variable(&name)
            .ok_or_else(|| Error::MissingVariable(name.clone()))?;
        let dims: Vec<usize> = var.dimensions().iter().map(|d| d.len()).collect();
        let raw: Vec<f64> = var.get_values::<f64, _>(..)?;
        let field = Array2::from_shape_vec((dims[0], dims[1]), raw)
            .map_err(|e| Error::InvalidData(e.to_string()))?;
        let stacked = out
            .get_or_insert_with(|| Array3::from_elem((dims[0], 4, dims[1]), FILL_VALUE_F64));
        for ((t, j), &v) in field.indexed_iter() {
            stacked[[t, b, j]] = if is_valid_f64(v) { v } else { FILL_VALUE_F64 };
        }
    }
    out.ok_or_else(|| Error::MissingVariable("ptopsigma".into()))
}

fn var_info(file: &netcdf::File, name: &str) -> Result<(Vec<usize>, f64)> {
    let var = file
        .variable(name)
        .ok_or_else(|| Error::MissingVariable(name.to_string()))?;
    let shape: Vec<usize> = var.dimensions().iter().map(|d| d.len()).collect();
    let fill = var
        .attribute("_FillValue")
        .and_then(|a| a.value().ok())
        .and_then(|v| match v {
            netcdf::AttributeValue::Float(f) => Some(f as f64),
            netcdf::AttributeValue::Double(d) => Some(d),
            _ => None,
        })
        .unwrap_or(FILL_VALUE_F64);
    Ok((shape, fill))
}

fn read_f64_1d(file: &netcdf::File, name: &str) -> Result<Vec<f64>> {
    let var = file
        .variable(name)
        .ok_or_else(|| Error::MissingVariable(name.to_string()))?;
    Ok(var.get_values::<f64, _>(..)?)
}

/// Depth-cell interfaces from `lev_bnds`, as `n_depth + 1` edges.
fn read_depth_bounds(file: &netcdf::File, n_depth: usize) -> Result<Vec<f64>> {
    let var = file
        .variable("lev_bnds")
        .ok_or_else(|| Error::MissingVariable("lev_bnds".into()))?;
    let raw: Vec<f64> = var.get_values::<f64, _>(..)?;
    if raw.len() != 2 * n_depth {
        return Err(Error::ShapeMismatch {
            context: "lev_bnds vs lev",
            expected: vec![n_depth, 2],
            actual: vec![raw.len() / 2, 2],
        });
    }
    // Upper bound of each cell plus the lower bound of the deepest cell
    let mut edges: Vec<f64> = (0..n_depth).map(|k| raw[2 * k]).collect();
    edges.push(raw[2 * n_depth - 1]);
    Ok(edges)
}

/// Fill comparison tolerant of the f32-to-f64 promotion of `_FillValue`.
///
/// For the usual huge-magnitude fills, anything within a factor of ten of
/// the fill is missing too, so arithmetic residue on masked points (fill
/// minus fill, fill times weight) is caught.
fn same_fill(v: f64, fill: f64) -> bool {
    if fill != 0.0 && ((v - fill) / fill).abs() < 1e-6 {
        return true;
    }
    fill.abs() > 1e10 && v.abs() >= fill.abs() / 10.0
}

// ============================================================================
// Writing
// ============================================================================

/// Configuration for output files.
#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Output file path.
    pub path: String,
    /// Title attribute.
    pub title: Option<String>,
    /// Institution attribute.
    pub institution: Option<String>,
    /// Source attribute (producing tool).
    pub source: Option<String>,
    /// First year of the series, for the time axis units.
    pub start_year: i64,
}

impl WriterConfig {
    /// Create a new configuration with the given output path.
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            title: None,
            institution: None,
            source: Some("isobin-rs".to_string()),
            start_year: 1851,
        }
    }

    /// Set the title attribute.
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Set the institution attribute.
    pub fn with_institution(mut self, institution: impl Into<String>) -> Self {
        self.institution = Some(institution.into());
        self
    }

    /// Set the first year of the time axis.
    pub fn with_start_year(mut self, year: i64) -> Self {
        self.start_year = year;
        self
    }

    fn write_globals(&self, file: &mut netcdf::FileMut) -> Result<()> {
        file.add_attribute("Conventions", "CF-1.8")?;
        if let Some(ref title) = self.title {
            file.add_attribute("title", title.as_str())?;
        }
        if let Some(ref institution) = self.institution {
            file.add_attribute("institution", institution.as_str())?;
        }
        if let Some(ref source) = self.source {
            file.add_attribute("source", source.as_str())?;
        }
        let now = Utc::now();
        file.add_attribute(
            "history",
            format!(
                "{}: density binning by isobin-rs",
                now.format("%Y-%m-%d %H:%M:%S UTC")
            )
            .as_str(),
        )?;
        Ok(())
    }
}

/// Writer for the annual zonal-diagnostics file.
pub struct ZonalWriter {
    file: netcdf::FileMut,
    n_lev: usize,
    n_lat: usize,
    n_lon: usize,
}

impl ZonalWriter {
    /// Create the file: axes, zonal and bowl variables for every basin, and
    /// the persistence maps.
    pub fn create(
        config: &WriterConfig,
        axis_levels: &[f64],
        lat: &[f64],
        lon: &[f64],
    ) -> Result<Self> {
        let mut file = netcdf::create(&config.path)?;
        file.add_unlimited_dimension("time")?;
        file.add_dimension("lev", axis_levels.len())?;
        file.add_dimension("lat", lat.len())?;
        file.add_dimension("lon", lon.len())?;

        {
            let mut time_var = file.add_variable::<f64>("time", &["time"])?;
            time_var.put_attribute("long_name", "time")?;
            time_var.put_attribute("units", format!("years since {}", config.start_year).as_str())?;
        }
        {
            let mut lev_var = file.add_variable::<f64>("lev", &["lev"])?;
            lev_var.put_attribute("long_name", "ocean neutral density coordinate")?;
            lev_var.put_attribute("units", "kg m-3 (anomaly, minus 1000)")?;
            lev_var.put_attribute("positive", "down")?;
            lev_var.put_values(axis_levels, ..)?;
        }
        {
            let mut lat_var = file.add_variable::<f64>("lat", &["lat"])?;
            lat_var.put_attribute("standard_name", "latitude")?;
            lat_var.put_attribute("units", "degrees_north")?;
            lat_var.put_values(lat, ..)?;
        }
        {
            let mut lon_var = file.add_variable::<f64>("lon", &["lon"])?;
            lon_var.put_attribute("standard_name", "longitude")?;
            lon_var.put_attribute("units", "degrees_east")?;
            lon_var.put_values(lon, ..)?;
        }

        for basin in Basin::ALL {
            let s = basin.suffix();
            let label = basin.label();
            add_var(
                &mut file,
                &format!("isondepth{s}"),
                &["time", "lev", "lat"],
                &format!("{label} zonal depth of isopycnal"),
                "m",
            )?;
            add_var(
                &mut file,
                &format!("isonthick{s}"),
                &["time", "lev", "lat"],
                &format!("{label} zonal thickness of isopycnal"),
                "m",
            )?;
            add_var(
                &mut file,
                &format!("isonvol{s}"),
                &["time", "lev", "lat"],
                &format!("{label} volume of isopycnal"),
                "10.e12 m^3",
            )?;
            add_var(
                &mut file,
                &format!("thetao{s}"),
                &["time", "lev", "lat"],
                &format!("{label} zonal temperature on isopycnal"),
                "degrees_C",
            )?;
            add_var(
                &mut file,
                &format!("so{s}"),
                &["time", "lev", "lat"],
                &format!("{label} zonal salinity on isopycnal"),
                "1e-3",
            )?;
            add_var(
                &mut file,
                &format!("isonpers{s}"),
                &["time", "lev", "lat"],
                &format!("{label} zonal persistence of isopycnal bins"),
                "% of time",
            )?;
            add_var(
                &mut file,
                &format!("ptopdepth{s}"),
                &["time", "lat"],
                &format!("{label} zonal depth of shallowest persistent ocean on ison"),
                "m",
            )?;
            add_var(
                &mut file,
                &format!("ptopsigma{s}"),
                &["time", "lat"],
                &format!("{label} zonal rhon of shallowest persistent ocean on ison"),
                "sigma_n",
            )?;
            add_var(
                &mut file,
                &format!("ptoptemp{s}"),
                &["time", "lat"],
                &format!("{label} zonal temperature of shallowest persistent ocean on ison"),
                "degrees_C",
            )?;
            add_var(
                &mut file,
                &format!("ptopsalt{s}"),
                &["time", "lat"],
                &format!("{label} zonal salinity of shallowest persistent ocean on ison"),
                "1e-3",
            )?;
        }

        add_var(
            &mut file,
            "persim",
            &["time", "lat", "lon"],
            "fraction of persistence on isopycnal bins",
            "% of column",
        )?;
        add_var(
            &mut file,
            "ptopdepth2",
            &["time", "lat", "lon"],
            "depth of shallowest persistent ocean on ison",
            "m",
        )?;
        add_var(
            &mut file,
            "ptoptemp2",
            &["time", "lat", "lon"],
            "temperature of shallowest persistent ocean on ison",
            "degrees_C",
        )?;
        add_var(
            &mut file,
            "ptopsalt2",
            &["time", "lat", "lon"],
            "salinity of shallowest persistent ocean on ison",
            "1e-3",
        )?;

        config.write_globals(&mut file)?;

        Ok(Self {
            file,
            n_lev: axis_levels.len(),
            n_lat: lat.len(),
            n_lon: lon.len(),
        })
    }

    /// Append one chunk of annual diagnostics starting at year `year0`.
    pub fn append_annual(&mut self, year0: usize, annual: &AnnualOutputs) -> Result<()> {
        let n_years = annual.zonal.depth.dim().0;
        let years: Vec<f64> = (0..n_years).map(|y| (year0 + y) as f64).collect();
        self.file
            .variable_mut("time")
            .ok_or_else(|| Error::MissingVariable("time".into()))?
            .put_values(&years, year0..year0 + n_years)?;

        for basin in Basin::ALL {
            let b = basin.index();
            let s = basin.suffix();
            self.put_zonal(&format!("isondepth{s}"), year0, &annual.zonal.depth, b, 1.0)?;
            self.put_zonal(
                &format!("isonthick{s}"),
                year0,
                &annual.zonal.thickness,
                b,
                1.0,
            )?;
            // Volume is written in units of 10^12 m^3
            self.put_zonal(&format!("isonvol{s}"), year0, &annual.zonal.volume, b, 1e-12)?;
            self.put_zonal(
                &format!("thetao{s}"),
                year0,
                &annual.zonal.temperature,
                b,
                1.0,
            )?;
            self.put_zonal(&format!("so{s}"), year0, &annual.zonal.salinity, b, 1.0)?;
            self.put_zonal(
                &format!("isonpers{s}"),
                year0,
                &annual.zonal.persistence,
                b,
                1.0,
            )?;
            self.put_bowl(&format!("ptopdepth{s}"), year0, &annual.bowl_zonal.depth, b)?;
            self.put_bowl(&format!("ptopsigma{s}"), year0, &annual.bowl_zonal.sigma, b)?;
            self.put_bowl(
                &format!("ptoptemp{s}"),
                year0,
                &annual.bowl_zonal.temperature,
                b,
            )?;
            self.put_bowl(
                &format!("ptopsalt{s}"),
                year0,
                &annual.bowl_zonal.salinity,
                b,
            )?;
        }

        self.put_map("persim", year0, &annual.bowl_maps.column_fraction)?;
        self.put_map("ptopdepth2", year0, &annual.bowl_maps.depth)?;
        self.put_map("ptoptemp2", year0, &annual.bowl_maps.temperature)?;
        self.put_map("ptopsalt2", year0, &annual.bowl_maps.salinity)?;
        Ok(())
    }

    fn put_zonal(
        &mut self,
        name: &str,
        year0: usize,
        field: &Array4<f64>,
        basin: usize,
        scale: f64,
    ) -> Result<()> {
        let (n_years, _, n_lev, n_lat) = field.dim();
        debug_assert_eq!((n_lev, n_lat), (self.n_lev, self.n_lat));
        let slab = field.index_axis(Axis(1), basin);
        let buf = to_f32_scaled(slab.iter().copied(), scale);
        self.file
            .variable_mut(name)
            .ok_or_else(|| Error::MissingVariable(name.to_string()))?
            .put_values(&buf, (year0..year0 + n_years, .., ..))?;
        Ok(())
    }

    fn put_bowl(
        &mut self,
        name: &str,
        year0: usize,
        field: &Array3<f64>,
        basin: usize,
    ) -> Result<()> {
        let (n_years, _, _) = field.dim();
        let slab = field.index_axis(Axis(1), basin);
        let buf = to_f32_scaled(slab.iter().copied(), 1.0);
        self.file
            .variable_mut(name)
            .ok_or_else(|| Error::MissingVariable(name.to_string()))?
            .put_values(&buf, (year0..year0 + n_years, ..))?;
        Ok(())
    }

    fn put_map(&mut self, name: &str, year0: usize, field: &Array3<f64>) -> Result<()> {
        let (n_years, n_lat, n_lon) = field.dim();
        debug_assert_eq!((n_lat, n_lon), (self.n_lat, self.n_lon));
        let buf = to_f32_scaled(field.iter().copied(), 1.0);
        self.file
            .variable_mut(name)
            .ok_or_else(|| Error::MissingVariable(name.to_string()))?
            .put_values(&buf, (year0..year0 + n_years, .., ..))?;
        Ok(())
    }
}

/// Writer for the monthly binned fields on the source grid.
pub struct MonthlyWriter {
    file: netcdf::FileMut,
}

impl MonthlyWriter {
    /// Create the file with the source-grid layout.
    pub fn create(
        config: &WriterConfig,
        axis_levels: &[f64],
        source: &SourceGrid,
        areas: Option<&Array2<f64>>,
    ) -> Result<Self> {
        let mut file = netcdf::create(&config.path)?;
        file.add_unlimited_dimension("time")?;
        file.add_dimension("lev", axis_levels.len())?;
        file.add_dimension("y", source.n_lat)?;
        file.add_dimension("x", source.n_lon)?;

        {
            let mut time_var = file.add_variable::<f64>("time", &["time"])?;
            time_var.put_attribute("long_name", "time")?;
            time_var.put_attribute("units", "months since start of run")?;
        }
        {
            let mut lev_var = file.add_variable::<f64>("lev", &["lev"])?;
            lev_var.put_attribute("long_name", "ocean neutral density coordinate")?;
            lev_var.put_attribute("units", "kg m-3 (anomaly, minus 1000)")?;
            lev_var.put_values(axis_levels, ..)?;
        }

        add_var(
            &mut file,
            "isondepth",
            &["time", "lev", "y", "x"],
            "depth of isopycnal",
            "m",
        )?;
        add_var(
            &mut file,
            "isonthick",
            &["time", "lev", "y", "x"],
            "thickness of isopycnal",
            "m",
        )?;
        add_var(
            &mut file,
            "thetao",
            &["time", "lev", "y", "x"],
            "temperature on isopycnal",
            "degrees_C",
        )?;
        add_var(
            &mut file,
            "so",
            &["time", "lev", "y", "x"],
            "salinity on isopycnal",
            "1e-3",
        )?;

        // Cell areas let volumes be recomputed from the monthly file
        if let Some(areas) = areas {
            let buf = to_f32_scaled(areas.iter().copied(), 1.0);
            let mut area_var = file.add_variable::<f32>("areacello", &["y", "x"])?;
            area_var.put_attribute("long_name", "grid cell area")?;
            area_var.put_attribute("units", "m2")?;
            area_var.put_attribute("_FillValue", FILL_VALUE_F32)?;
            area_var.put_values(&buf, (.., ..))?;
        }

        config.write_globals(&mut file)?;
        Ok(Self { file })
    }

    /// Append one chunk of monthly binned fields at month offset `t0`.
    pub fn append_chunk(&mut self, t0: usize, binned: &BinnedChunk) -> Result<()> {
        let (n_time, _, _) = binned.depth.dim();
        let months: Vec<f64> = (0..n_time).map(|m| (t0 + m) as f64).collect();
        self.file
            .variable_mut("time")
            .ok_or_else(|| Error::MissingVariable("time".into()))?
            .put_values(&months, t0..t0 + n_time)?;
        for (name, field) in [
            ("isondepth", &binned.depth),
            ("isonthick", &binned.thickness),
            ("thetao", &binned.temperature),
            ("so", &binned.salinity),
        ] {
            let buf = to_f32_scaled(field.iter().copied(), 1.0);
            self.file
                .variable_mut(name)
                .ok_or_else(|| Error::MissingVariable(name.to_string()))?
                .put_values(&buf, (t0..t0 + n_time, .., .., ..))?;
        }
        Ok(())
    }
}

/// Writer for ensemble statistics of zonal variables.
pub struct EnsembleWriter {
    file: netcdf::FileMut,
    wrote_coverage: bool,
}

impl EnsembleWriter {
    /// Create the file with the zonal layout of the member files.
    pub fn create(
        config: &WriterConfig,
        axis_levels: &[f64],
        lat: &[f64],
        n_time: usize,
    ) -> Result<Self> {
        let mut file = netcdf::create(&config.path)?;
        file.add_dimension("time", n_time)?;
        file.add_dimension("lev", axis_levels.len())?;
        file.add_dimension("lat", lat.len())?;
        {
            let mut time_var = file.add_variable::<f64>("time", &["time"])?;
            time_var.put_attribute("units", format!("years since {}", config.start_year).as_str())?;
            let years: Vec<f64> = (0..n_time).map(|t| t as f64).collect();
            time_var.put_values(&years, ..)?;
        }
        {
            let mut lev_var = file.add_variable::<f64>("lev", &["lev"])?;
            lev_var.put_attribute("units", "kg m-3 (anomaly, minus 1000)")?;
            lev_var.put_values(axis_levels, ..)?;
        }
        {
            let mut lat_var = file.add_variable::<f64>("lat", &["lat"])?;
            lat_var.put_attribute("units", "degrees_north")?;
            lat_var.put_values(lat, ..)?;
        }
        config.write_globals(&mut file)?;
        Ok(Self {
            file,
            wrote_coverage: false,
        })
    }

    /// Write the statistics of one variable (per basin suffix): the mean,
    /// the `<var>Agree` and `<var>Bowl` variants, the inter-model standard
    /// deviation when present, and the member coverage once per file.
    pub fn write_variable(&mut self, base: &str, stats: &EnsembleStats) -> Result<()> {
        if !self.wrote_coverage {
            self.write_stat("isonpercent", &stats.coverage, "percentage of MME bin", "%")?;
            self.wrote_coverage = true;
        }
        self.write_stat(base, &stats.mean, "ensemble mean", "")?;
        self.write_stat(
            &format!("{base}Agree"),
            &stats.agreement,
            "agreement of anomaly sign across members",
            "fraction",
        )?;
        self.write_stat(
            &format!("{base}Bowl"),
            &stats.bowl_masked,
            "ensemble mean below the bowl",
            "",
        )?;
        if let Some(ref std) = stats.std_dev {
            self.write_stat(
                &format!("{base}ModStd"),
                std,
                "intermodel standard deviation",
                "",
            )?;
        }
        Ok(())
    }

    fn write_stat(
        &mut self,
        base: &str,
        field: &Array4<f64>,
        long_name: &str,
        units: &str,
    ) -> Result<()> {
        for basin in Basin::ALL {
            let name = format!("{base}{}", basin.suffix());
            let slab = field.index_axis(Axis(1), basin.index());
            let buf = to_f32_scaled(slab.iter().copied(), 1.0);
            {
                let mut var = self.file.add_variable::<f32>(&name, &["time", "lev", "lat"])?;
                var.put_attribute(
                    "long_name",
                    format!("{} {long_name}", basin.label()).as_str(),
                )?;
                if !units.is_empty() {
                    var.put_attribute("units", units)?;
                }
                var.put_attribute("_FillValue", FILL_VALUE_F32)?;
                var.put_values(&buf, (.., .., ..))?;
            }
        }
        Ok(())
    }
}

/// Add one `f32` output variable with the standard attributes.
fn add_var(
    file: &mut netcdf::FileMut,
    name: &str,
    dims: &[&str],
    long_name: &str,
    units: &str,
) -> Result<()> {
    let mut var = file.add_variable::<f32>(name, dims)?;
    var.put_attribute("long_name", long_name)?;
    var.put_attribute("units", units)?;
    var.put_attribute("_FillValue", FILL_VALUE_F32)?;
    Ok(())
}

/// Convert to `f32` for writing, scaling valid values and pinning missing
/// ones to the f32 fill.
fn to_f32_scaled(values: impl Iterator<Item = f64>, scale: f64) -> Vec<f32> {
    values
        .map(|v| {
            if is_valid_f64(v) {
                (v * scale) as f32
            } else {
                FILL_VALUE_F32
            }
        })
        .collect()
}

// ============================================================================
// Full run driver
// ============================================================================

/// Run density binning over a full model run: read in memory-bounded time
/// chunks, bin and aggregate each, and append to the output files.
///
/// Writes the annual zonal-diagnostics file, and the monthly binned file
/// when `monthly` is given and `config.monthly_output` is set. Any shape
/// disagreement between companion inputs aborts before anything is written.
#[allow(clippy::too_many_arguments)]
pub fn run_density_binning(
    path_t: &str,
    path_s: &str,
    path_area: &str,
    path_basin: &str,
    annual: WriterConfig,
    monthly: Option<WriterConfig>,
    config: &BinningConfig,
    regridder: &dyn Regridder,
) -> Result<()> {
    let reader = ModelReader::open(path_t, path_s)?;
    let source = reader.source_grid().clone();
    let grid = DensityGrid::build(&config.grid);
    let axis_levels = grid.axis_levels();

    let areas = read_cell_areas(path_area)?;
    let (lat_t, lon_t, codes) = read_basin_codes(path_basin, "basinmask3")?;
    let target = TargetGrid::from_basin_codes(lat_t, lon_t, codes.view())?;

    let (tmin, tmax) = config.time_range.resolve(reader.n_time());
    let chunk = chunk_length(source.grid_size()).min(tmax.saturating_sub(tmin).max(1));
    let bounds = chunk_bounds(tmin, tmax, chunk);

    if config.verbose {
        println!(
            " ==> grid size {}, months {}..{}, chunk length {} ({} chunks)",
            source.grid_size(),
            tmin,
            tmax,
            chunk,
            bounds.len()
        );
    }

    let mut zonal_writer =
        ZonalWriter::create(&annual, &axis_levels, &target.lat, &target.lon)?;
    let mut monthly_writer = match (&monthly, config.monthly_output) {
        (Some(cfg), true) => Some(MonthlyWriter::create(
            cfg,
            &axis_levels,
            &source,
            Some(&areas),
        )?),
        _ => None,
    };

    let mut progress = ChunkProgress::new(config.verbose, bounds.len());
    for (idx, &(t0, t1)) in bounds.iter().enumerate() {
        progress.chunk_start(idx, (t0, t1));
        let (temp, salt) = reader.read_chunk(t0, t1)?;
        let diagnostics = process_chunk(
            temp.view(),
            salt.view(),
            &source,
            &grid,
            &target,
            regridder,
        )?;
        if let Some(ref annual_out) = diagnostics.annual {
            zonal_writer.append_annual((t0 - tmin) / 12, annual_out)?;
        }
        if let Some(ref mut w) = monthly_writer {
            w.append_chunk(t0 - tmin, &diagnostics.binned)?;
        }
        progress.chunk_done();
    }
    progress.finish();

    Ok(())
}
