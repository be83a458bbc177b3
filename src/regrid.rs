//! Horizontal regridding seam.
//!
//! Interpolating from a model's native (often curvilinear) grid onto the
//! reference grid is delegated to an external regridding library; this crate
//! only defines the seam. Implementations are black boxes that take a
//! `(lat, lon)` field on the source grid and return one on the target grid,
//! preserving the missing-value convention.

use ndarray::{Array2, ArrayView2};

/// A horizontal regridder from the model grid to the reference grid.
pub trait Regridder {
    /// Shape `(lat, lon)` of the target grid.
    fn target_shape(&self) -> (usize, usize);

    /// Regrid one horizontal field. Input is `(lat, lon)` on the source
    /// grid; output is `(lat, lon)` on the target grid with fill values
    /// where the source is missing.
    fn regrid(&self, field: ArrayView2<'_, f64>) -> Array2<f64>;
}

/// No-op regridder for runs whose model grid already is the reference grid.
#[derive(Clone, Debug)]
pub struct IdentityRegridder {
    shape: (usize, usize),
}

impl IdentityRegridder {
    pub fn new(n_lat: usize, n_lon: usize) -> Self {
        Self {
            shape: (n_lat, n_lon),
        }
    }
}

impl Regridder for IdentityRegridder {
    fn target_shape(&self) -> (usize, usize) {
        self.shape
    }

    fn regrid(&self, field: ArrayView2<'_, f64>) -> Array2<f64> {
        debug_assert_eq!(field.dim(), self.shape);
        field.to_owned()
    }
}
