//! Multi-model ensemble aggregation of density-binned fields.
//!
//! Individual runs carry independent missing-data masks: each model resolves
//! different basins, outcrops different isopycnals and fails in different
//! marginal seas. The aggregator merges runs into a masked ensemble mean
//! with an explicit member-coverage percentage, a sign-agreement field for
//! anomaly direction, and a variant truncated above the mixed-layer bowl.
//! Every written variable obeys the same validity contract: at least the
//! coverage threshold of members valid AND below the bowl.

use ndarray::{Array2, Array4, Array5, ArrayView4, ArrayView5, Axis};

use crate::error::{Error, Result};
use crate::masked::{is_valid_f64, mean_valid, std_valid, FILL_VALUE_F64};

/// Configuration of the ensemble aggregator.
#[derive(Clone, Copy, Debug)]
pub struct EnsembleConfig {
    /// Reference period `[start, end)` in time indices for anomaly signs.
    pub reference_period: (usize, usize),
    /// Minimum percentage of valid members for a bin to be kept.
    pub coverage_threshold: f64,
    /// Multi-model mode: members are already ensemble means carrying their
    /// own agreement and bowl fields, and an inter-model standard deviation
    /// is produced.
    pub mme: bool,
}

impl EnsembleConfig {
    /// Single-model ensemble statistics with the standard 50% coverage rule.
    pub fn new(reference_period: (usize, usize)) -> Self {
        Self {
            reference_period,
            coverage_threshold: 50.0,
            mme: false,
        }
    }

    /// Switch to multi-model mode.
    pub fn with_mme(mut self, mme: bool) -> Self {
        self.mme = mme;
        self
    }

    /// Override the member-coverage threshold (percent).
    pub fn with_coverage_threshold(mut self, threshold: f64) -> Self {
        self.coverage_threshold = threshold;
        self
    }
}

/// Stacked per-run input to the aggregator.
///
/// `field` is `(run, time, basin, density, latitude)`; `bowl_sigma` the
/// per-run bowl density `(run, time, basin, latitude)`. The `member_*`
/// fields are required in multi-model mode, where each member is itself an
/// ensemble mean with precomputed agreement and bowl-truncated variants.
#[derive(Clone, Copy, Debug)]
pub struct EnsembleInput<'a> {
    pub field: ArrayView5<'a, f64>,
    pub bowl_sigma: ArrayView4<'a, f64>,
    pub member_agreement: Option<ArrayView5<'a, f64>>,
    pub member_bowl_field: Option<ArrayView5<'a, f64>>,
}

/// Aggregated ensemble statistics, each `(time, basin, density, latitude)`.
#[derive(Clone, Debug)]
pub struct EnsembleStats {
    /// Masked ensemble mean.
    pub mean: Array4<f64>,
    /// Percentage of valid members, masked below the coverage threshold.
    pub coverage: Array4<f64>,
    /// Mean sign of the anomaly vs the reference period, in [-1, 1].
    pub agreement: Array4<f64>,
    /// Ensemble mean truncated above the bowl.
    pub bowl_masked: Array4<f64>,
    /// Inter-model standard deviation (multi-model mode only).
    pub std_dev: Option<Array4<f64>>,
}

/// Stack per-run fields `(time, basin, density, latitude)` into the run
/// axis, rejecting members whose time axis disagrees.
pub fn stack_members(members: &[Array4<f64>]) -> Result<Array5<f64>> {
    let first = members
        .first()
        .ok_or_else(|| Error::InvalidData("empty member list".into()))?;
    let dim = first.dim();
    for m in members {
        if m.dim() != dim {
            return Err(Error::ShapeMismatch {
                context: "ensemble member axes",
                expected: first.shape().to_vec(),
                actual: m.shape().to_vec(),
            });
        }
    }
    let (t, b, l, j) = dim;
    let mut out = Array5::from_elem((members.len(), t, b, l, j), FILL_VALUE_F64);
    for (r, m) in members.iter().enumerate() {
        out.index_axis_mut(Axis(0), r).assign(m);
    }
    Ok(out)
}

/// Compute the ensemble statistics.
///
/// `axis_levels` is the density axis of the field (including the bottom
/// sentinel); it orders the bowl truncation.
pub fn ensemble_stats(
    input: &EnsembleInput<'_>,
    axis_levels: &[f64],
    config: &EnsembleConfig,
) -> Result<EnsembleStats> {
    let (n_runs, n_time, n_basins, n_lev, n_lat) = input.field.dim();
    if input.bowl_sigma.dim() != (n_runs, n_time, n_basins, n_lat) {
        return Err(Error::ShapeMismatch {
            context: "bowl sigma vs field",
            expected: vec![n_runs, n_time, n_basins, n_lat],
            actual: input.bowl_sigma.shape().to_vec(),
        });
    }
    if axis_levels.len() != n_lev {
        return Err(Error::ShapeMismatch {
            context: "density axis vs field",
            expected: vec![n_lev],
            actual: vec![axis_levels.len()],
        });
    }
    if config.mme && (input.member_agreement.is_none() || input.member_bowl_field.is_none()) {
        return Err(Error::InvalidData(
            "multi-model mode needs member agreement and bowl fields".into(),
        ));
    }

    let shape = (n_time, n_basins, n_lev, n_lat);

    // Member coverage, masked below the threshold
    let mut coverage = Array4::from_elem(shape, FILL_VALUE_F64);
    for t in 0..n_time {
        for b in 0..n_basins {
            for l in 0..n_lev {
                for j in 0..n_lat {
                    let valid = (0..n_runs)
                        .filter(|&r| is_valid_f64(input.field[[r, t, b, l, j]]))
                        .count();
                    let pct = valid as f64 / n_runs as f64 * 100.0;
                    if pct >= config.coverage_threshold {
                        coverage[[t, b, l, j]] = pct;
                    }
                }
            }
        }
    }

    // Masked ensemble mean, then the coverage rule
    let mut mean = Array4::from_elem(shape, FILL_VALUE_F64);
    for t in 0..n_time {
        for b in 0..n_basins {
            for l in 0..n_lev {
                for j in 0..n_lat {
                    if is_valid_f64(coverage[[t, b, l, j]]) {
                        mean[[t, b, l, j]] =
                            mean_valid((0..n_runs).map(|r| input.field[[r, t, b, l, j]]));
                    }
                }
            }
        }
    }

    let agreement = match input.member_agreement {
        // Multi-model mode: average the members' agreement fields
        Some(member) => masked_run_mean(member, &coverage),
        // Anomaly sign vs the reference period, averaged over runs
        None => anomaly_sign_agreement(input.field, config.reference_period, &coverage),
    };

    // Bowl density limit per (basin, latitude): run- and time-averaged
    let mut siglimit = Array2::from_elem((n_basins, n_lat), FILL_VALUE_F64);
    for b in 0..n_basins {
        for j in 0..n_lat {
            siglimit[[b, j]] = mean_valid(
                (0..n_runs)
                    .flat_map(|r| (0..n_time).map(move |t| (r, t)))
                    .map(|(r, t)| input.bowl_sigma[[r, t, b, j]]),
            );
        }
    }

    let mut bowl_masked = match input.member_bowl_field {
        Some(member) => masked_run_mean(member, &coverage),
        None => mean.clone(),
    };
    let mut std_dev = match (config.mme, input.member_bowl_field) {
        (true, Some(member)) => {
            let mut std = Array4::from_elem(shape, FILL_VALUE_F64);
            for t in 0..n_time {
                for b in 0..n_basins {
                    for l in 0..n_lev {
                        for j in 0..n_lat {
                            if is_valid_f64(coverage[[t, b, l, j]]) {
                                std[[t, b, l, j]] =
                                    std_valid(RunLane::new(member, t, b, l, j, n_runs));
                            }
                        }
                    }
                }
            }
            Some(std)
        }
        _ => None,
    };

    // Truncate above the bowl: mask every level lighter than the bowl
    // density; an undefined bowl masks the whole column
    let mut agreement = agreement;
    for b in 0..n_basins {
        for j in 0..n_lat {
            let cut = if is_valid_f64(siglimit[[b, j]]) {
                axis_levels
                    .iter()
                    .position(|&s| s >= siglimit[[b, j]])
                    .unwrap_or(n_lev)
            } else {
                n_lev
            };
            for t in 0..n_time {
                for l in 0..cut {
                    bowl_masked[[t, b, l, j]] = FILL_VALUE_F64;
                    agreement[[t, b, l, j]] = FILL_VALUE_F64;
                    if let Some(std) = std_dev.as_mut() {
                        std[[t, b, l, j]] = FILL_VALUE_F64;
                    }
                }
            }
        }
    }

    Ok(EnsembleStats {
        mean,
        coverage,
        agreement,
        bowl_masked,
        std_dev,
    })
}

/// Masked mean over the run axis, gated by the coverage mask.
fn masked_run_mean(field: ArrayView5<'_, f64>, coverage: &Array4<f64>) -> Array4<f64> {
    let (n_runs, n_time, n_basins, n_lev, n_lat) = field.dim();
    let mut out = Array4::from_elem((n_time, n_basins, n_lev, n_lat), FILL_VALUE_F64);
    for t in 0..n_time {
        for b in 0..n_basins {
            for l in 0..n_lev {
                for j in 0..n_lat {
                    if is_valid_f64(coverage[[t, b, l, j]]) {
                        out[[t, b, l, j]] =
                            mean_valid((0..n_runs).map(|r| field[[r, t, b, l, j]]));
                    }
                }
            }
        }
    }
    out
}

/// Mean over runs of the sign of the anomaly vs the reference-period mean.
fn anomaly_sign_agreement(
    field: ArrayView5<'_, f64>,
    reference_period: (usize, usize),
    coverage: &Array4<f64>,
) -> Array4<f64> {
    let (n_runs, n_time, n_basins, n_lev, n_lat) = field.dim();
    let (p0, p1) = reference_period;
    let p1 = p1.min(n_time);
    let mut out = Array4::from_elem((n_time, n_basins, n_lev, n_lat), FILL_VALUE_F64);
    for b in 0..n_basins {
        for l in 0..n_lev {
            for j in 0..n_lat {
                // Per-run baseline over the reference period
                let baselines: Vec<f64> = (0..n_runs)
                    .map(|r| mean_valid((p0..p1).map(|t| field[[r, t, b, l, j]])))
                    .collect();
                for t in 0..n_time {
                    if !is_valid_f64(coverage[[t, b, l, j]]) {
                        continue;
                    }
                    let signs = (0..n_runs).map(|r| {
                        let v = field[[r, t, b, l, j]];
                        if is_valid_f64(v) && is_valid_f64(baselines[r]) {
                            (v - baselines[r]).signum()
                        } else {
                            FILL_VALUE_F64
                        }
                    });
                    out[[t, b, l, j]] = mean_valid(signs);
                }
            }
        }
    }
    out
}

/// Cloneable iterator over the run axis at a fixed (t, b, l, j), for the
/// two-pass standard deviation.
#[derive(Clone)]
struct RunLane<'a> {
    field: ArrayView5<'a, f64>,
    t: usize,
    b: usize,
    l: usize,
    j: usize,
    r: usize,
    n_runs: usize,
}

impl<'a> RunLane<'a> {
    fn new(
        field: ArrayView5<'a, f64>,
        t: usize,
        b: usize,
        l: usize,
        j: usize,
        n_runs: usize,
    ) -> Self {
        Self {
            field,
            t,
            b,
            l,
            j,
            r: 0,
            n_runs,
        }
    }
}

impl Iterator for RunLane<'_> {
    type Item = f64;

    fn next(&mut self) -> Option<f64> {
        if self.r >= self.n_runs {
            return None;
        }
        let v = self.field[[self.r, self.t, self.b, self.l, self.j]];
        self.r += 1;
        Some(v)
    }
}
