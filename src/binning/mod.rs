//! Isopycnal binning engine.
//!
//! Remaps vertical profiles of temperature and salinity from fixed-depth
//! coordinates onto the target density coordinate: for every horizontal grid
//! point and time step, the depth, thickness, temperature and salinity of
//! each target isopycnal.

mod column;
mod engine;

pub use column::{bin_column, BinnedColumn, GridColumn, MAX_OCEAN_DEPTH};
pub use engine::{bin_chunk, BinnedChunk, SourceGrid};
