//! Reduction of monthly binned fields: annual means, persistence, the bowl,
//! and zonal statistics per basin.

mod annual;
mod zonal;

pub use annual::{
    annual_mean, bowl_properties, column_persistence_fraction, persistence, BowlProperties,
    PERSISTENCE_THRESHOLD,
};
pub use zonal::{isopycnal_volume, masked_zonal_mean, masked_zonal_mean3};
