//! Ocean basin masks decoded from an integer basin-code field.
//!
//! The reference grid carries one code per horizontal point: 1 = Atlantic,
//! 2 = Pacific, 3 = Indian; anything else is land or a marginal sea. Zonal
//! statistics are produced for the three basins plus the global ocean, in
//! that fixed order.

use ndarray::{Array1, Array2, ArrayView2};

use crate::masked::is_valid_f64;

/// Ocean basin selector. The order of [`Basin::ALL`] fixes the basin axis of
/// every stacked output.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Basin {
    Global,
    Atlantic,
    Pacific,
    Indian,
}

impl Basin {
    /// All basins in output-axis order.
    pub const ALL: [Basin; 4] = [
        Basin::Global,
        Basin::Atlantic,
        Basin::Pacific,
        Basin::Indian,
    ];

    /// Position on the basin axis.
    pub fn index(self) -> usize {
        match self {
            Basin::Global => 0,
            Basin::Atlantic => 1,
            Basin::Pacific => 2,
            Basin::Indian => 3,
        }
    }

    /// Variable-name suffix used by the writers ("", "a", "p", "i").
    pub fn suffix(self) -> &'static str {
        match self {
            Basin::Global => "",
            Basin::Atlantic => "a",
            Basin::Pacific => "p",
            Basin::Indian => "i",
        }
    }

    /// Human-readable label for long_name attributes.
    pub fn label(self) -> &'static str {
        match self {
            Basin::Global => "Global",
            Basin::Atlantic => "Atl.",
            Basin::Pacific => "Pac.",
            Basin::Indian => "Ind.",
        }
    }
}

/// Per-basin wet masks on the reference grid, shape `(lat, lon)`.
#[derive(Clone, Debug)]
pub struct BasinMasks {
    masks: [Array2<bool>; 4],
}

impl BasinMasks {
    /// Decode basin codes (1 = Atlantic, 2 = Pacific, 3 = Indian). The
    /// global mask is the union of the three basins.
    pub fn from_codes(codes: ArrayView2<'_, f64>) -> Self {
        let shape = (codes.nrows(), codes.ncols());
        let mut global = Array2::from_elem(shape, false);
        let mut atlantic = global.clone();
        let mut pacific = global.clone();
        let mut indian = global.clone();
        for ((j, i), &code) in codes.indexed_iter() {
            if !is_valid_f64(code) {
                continue;
            }
            let code = code.round() as i64;
            match code {
                1 => atlantic[[j, i]] = true,
                2 => pacific[[j, i]] = true,
                3 => indian[[j, i]] = true,
                _ => continue,
            }
            global[[j, i]] = true;
        }
        Self {
            masks: [global, atlantic, pacific, indian],
        }
    }

    /// Wet mask of one basin.
    pub fn mask(&self, basin: Basin) -> &Array2<bool> {
        &self.masks[basin.index()]
    }

    /// Zonal sum of cell areas within one basin, shape `(lat,)`.
    pub fn zonal_area(&self, areas: ArrayView2<'_, f64>, basin: Basin) -> Array1<f64> {
        let mask = self.mask(basin);
        Array1::from_iter((0..areas.nrows()).map(|j| {
            (0..areas.ncols())
                .filter(|&i| mask[[j, i]])
                .map(|i| areas[[j, i]])
                .sum()
        }))
    }
}
