//! Grids: the target density coordinate and the horizontal reference grid.

mod area;
mod basin;
mod density;

pub use area::cell_areas;
pub use basin::{Basin, BasinMasks};
pub use density::{DensityGrid, DensityGridSpec};
