//! Target density grid for isopycnal binning.
//!
//! The grid is a non-uniform sequence of neutral density anomaly values
//! (σₙ, kg/m³ minus 1000): fine spacing over the light range where the
//! thermocline lives, coarse spacing over the dense range below. It is built
//! once from configuration and shared read-only by every column and run.

/// Parameters of the target density grid.
///
/// Precondition (not checked at runtime): `rho_min < rho_intermediate <
/// rho_max`; callers validate before use.
#[derive(Clone, Copy, Debug)]
pub struct DensityGridSpec {
    /// Lightest target density (σₙ).
    pub rho_min: f64,
    /// Break point between fine and coarse spacing.
    pub rho_intermediate: f64,
    /// Densest target density.
    pub rho_max: f64,
    /// Bin width on [rho_min, rho_intermediate).
    pub fine_step: f64,
    /// Bin width on [rho_intermediate, rho_max).
    pub coarse_step: f64,
}

impl Default for DensityGridSpec {
    /// Standard grid with a zoom on the higher densities: 35 fine + 25
    /// coarse levels.
    fn default() -> Self {
        Self {
            rho_min: 19.0,
            rho_intermediate: 26.0,
            rho_max: 28.5,
            fine_step: 0.2,
            coarse_step: 0.1,
        }
    }
}

/// The target density grid: ordered levels and per-level bin widths.
#[derive(Clone, Debug)]
pub struct DensityGrid {
    levels: Vec<f64>,
    deltas: Vec<f64>,
    fine_step: f64,
    coarse_step: f64,
}

impl DensityGrid {
    /// Build the grid from its parameters.
    pub fn build(spec: &DensityGridSpec) -> Self {
        let mut levels = range_levels(spec.rho_min, spec.rho_intermediate, spec.fine_step);
        let n_fine = levels.len();
        levels.extend(range_levels(
            spec.rho_intermediate,
            spec.rho_max,
            spec.coarse_step,
        ));
        let mut deltas = vec![spec.fine_step; n_fine];
        deltas.resize(levels.len(), spec.coarse_step);
        Self {
            levels,
            deltas,
            fine_step: spec.fine_step,
            coarse_step: spec.coarse_step,
        }
    }

    /// Number of target levels (without the bottom sentinel).
    pub fn n_levels(&self) -> usize {
        self.levels.len()
    }

    /// Target density values, strictly increasing.
    pub fn levels(&self) -> &[f64] {
        &self.levels
    }

    /// Per-level bin widths.
    pub fn deltas(&self) -> &[f64] {
        &self.deltas
    }

    /// Fine bin width; also the stratification threshold of the binning
    /// engine.
    pub fn fine_step(&self) -> f64 {
        self.fine_step
    }

    /// Coarse bin width.
    pub fn coarse_step(&self) -> f64 {
        self.coarse_step
    }

    /// Axis variant with one trailing sentinel level (the bottom cell),
    /// length `n_levels() + 1`.
    pub fn axis_levels(&self) -> Vec<f64> {
        let mut axis = self.levels.clone();
        axis.push(self.levels[self.levels.len() - 1] + self.coarse_step);
        axis
    }
}

/// Levels `start + i * step` strictly below `stop`.
fn range_levels(start: f64, stop: f64, step: f64) -> Vec<f64> {
    let n = (((stop - start) / step) - 1e-9).ceil() as usize;
    (0..n).map(|i| start + i as f64 * step).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_default_grid_has_60_levels() {
        // 35 fine levels on [19, 26) + 25 coarse on [26, 28.5)
        let grid = DensityGrid::build(&DensityGridSpec::default());
        assert_eq!(grid.n_levels(), 60);
        assert_eq!(grid.axis_levels().len(), 61);
    }

    #[test]
    fn test_levels_strictly_increasing() {
        let grid = DensityGrid::build(&DensityGridSpec::default());
        for w in grid.levels().windows(2) {
            assert!(w[1] > w[0]);
        }
        let axis = grid.axis_levels();
        assert!(axis[60] > axis[59]);
    }

    #[test]
    fn test_level_values() {
        let grid = DensityGrid::build(&DensityGridSpec::default());
        assert_relative_eq!(grid.levels()[0], 19.0);
        assert_relative_eq!(grid.levels()[34], 25.8, epsilon = 1e-9);
        assert_relative_eq!(grid.levels()[35], 26.0);
        assert_relative_eq!(grid.levels()[59], 28.4, epsilon = 1e-9);
        // Sentinel extends the last coarse bin
        assert_relative_eq!(grid.axis_levels()[60], 28.5, epsilon = 1e-9);
    }

    #[test]
    fn test_deltas_match_spacing() {
        let grid = DensityGrid::build(&DensityGridSpec::default());
        assert_eq!(grid.deltas().len(), 60);
        assert_relative_eq!(grid.deltas()[0], 0.2);
        assert_relative_eq!(grid.deltas()[34], 0.2);
        assert_relative_eq!(grid.deltas()[35], 0.1);
        assert_relative_eq!(grid.deltas()[59], 0.1);
    }

    #[test]
    fn test_custom_grid_length() {
        let spec = DensityGridSpec {
            rho_min: 20.0,
            rho_intermediate: 24.0,
            rho_max: 28.0,
            fine_step: 0.5,
            coarse_step: 0.25,
        };
        let grid = DensityGrid::build(&spec);
        // (24-20)/0.5 + (28-24)/0.25 = 8 + 16
        assert_eq!(grid.n_levels(), 24);
    }
}
