//! Surface water-mass transformation in density space.
//!
//! Bins the surface buoyancy flux — a heat part from the net surface heat
//! flux and a freshwater part from evaporation minus precipitation — by the
//! surface neutral density, following Walin (1982) and Speer & Tziperman
//! (1992). The density flux integrated over each bin, divided by the bin
//! width, is the rate at which surface forcing transforms water across that
//! isopycnal.

use ndarray::{Array1, Array2, ArrayView1, ArrayView2};

use crate::eos::{haline_contraction, sigma_n, specific_heat, thermal_expansion};
use crate::error::{Error, Result};
use crate::grid::DensityGrid;
use crate::masked::{is_valid_f64, FILL_VALUE_F64};

/// kg/m²/s (= mm/s of water) to m/s.
const CONV_FRESHWATER: f64 = 1.0e-3;
/// W to PW.
const CONV_PETAWATT: f64 = 1.0e-15;
/// m³/s to Sv.
const CONV_SVERDRUP: f64 = 1.0e-6;

/// Surface forcing fields for one run, `(time, point)` with cell areas per
/// point.
#[derive(Clone, Copy, Debug)]
pub struct SurfaceFluxes<'a> {
    /// Sea surface temperature (°C).
    pub sst: ArrayView2<'a, f64>,
    /// Sea surface salinity (PSS-78).
    pub sss: ArrayView2<'a, f64>,
    /// Net surface heat flux (W/m², positive into the ocean).
    pub net_heat: ArrayView2<'a, f64>,
    /// Freshwater flux E−P (kg/m²/s, positive for net evaporation).
    pub freshwater: ArrayView2<'a, f64>,
    /// Horizontal cell areas (m²).
    pub area: ArrayView1<'a, f64>,
}

/// Density-binned surface transformation, `(time, n_levels + 1)`; the last
/// bin is open-ended above the densest grid level.
#[derive(Clone, Debug)]
pub struct TransformationBins {
    /// Total surface density flux per bin (kg/s).
    pub density_flux: Array2<f64>,
    /// Heat-flux contribution (kg/s).
    pub heat_component: Array2<f64>,
    /// Freshwater contribution (kg/s).
    pub freshwater_component: Array2<f64>,
    /// Outcrop area of each bin (m²).
    pub bin_area: Array2<f64>,
    /// Transformation rate per bin (Sv).
    pub transformation: Array2<f64>,
    /// Domain-integrated heat flux per time step (PW).
    pub total_heat: Array1<f64>,
    /// Domain-integrated freshwater flux per time step (Sv).
    pub total_freshwater: Array1<f64>,
}

/// Bin the surface buoyancy fluxes of one run into density space.
///
/// Masked surface points are skipped; a fully masked time step leaves its
/// row at the fill value.
pub fn surface_transformation(
    fluxes: &SurfaceFluxes<'_>,
    grid: &DensityGrid,
) -> Result<TransformationBins> {
    let (n_time, n_points) = fluxes.sst.dim();
    for (context, dim) in [
        ("sss vs sst", fluxes.sss.dim()),
        ("net heat flux vs sst", fluxes.net_heat.dim()),
        ("freshwater flux vs sst", fluxes.freshwater.dim()),
    ] {
        if dim != (n_time, n_points) {
            return Err(Error::ShapeMismatch {
                context,
                expected: vec![n_time, n_points],
                actual: vec![dim.0, dim.1],
            });
        }
    }
    if fluxes.area.len() != n_points {
        return Err(Error::ShapeMismatch {
            context: "cell area vs surface fields",
            expected: vec![n_points],
            actual: vec![fluxes.area.len()],
        });
    }

    let n_s = grid.n_levels();
    let edges = grid.axis_levels();
    let shape = (n_time, n_s + 1);
    let mut out = TransformationBins {
        density_flux: Array2::from_elem(shape, FILL_VALUE_F64),
        heat_component: Array2::from_elem(shape, FILL_VALUE_F64),
        freshwater_component: Array2::from_elem(shape, FILL_VALUE_F64),
        bin_area: Array2::from_elem(shape, FILL_VALUE_F64),
        transformation: Array2::from_elem(shape, FILL_VALUE_F64),
        total_heat: Array1::from_elem(n_time, FILL_VALUE_F64),
        total_freshwater: Array1::from_elem(n_time, FILL_VALUE_F64),
    };

    for t in 0..n_time {
        let mut heat = vec![0.0; n_s + 1];
        let mut fresh = vec![0.0; n_s + 1];
        let mut area = vec![0.0; n_s + 1];
        let mut any = vec![false; n_s + 1];
        let mut sum_heat = 0.0;
        let mut sum_fresh = 0.0;
        let mut seen = false;

        for i in 0..n_points {
            let sst = fluxes.sst[[t, i]];
            let sss = fluxes.sss[[t, i]];
            let qnet = fluxes.net_heat[[t, i]];
            let emp = fluxes.freshwater[[t, i]];
            if !is_valid_f64(sst)
                || !is_valid_f64(sss)
                || !is_valid_f64(qnet)
                || !is_valid_f64(emp)
            {
                continue;
            }
            let sigma = sigma_n(sst, sss);
            let alpha = thermal_expansion(sst, sss);
            let beta = haline_contraction(sst, sss);
            let cp = specific_heat(sst, sss, 0.0);

            // Buoyancy flux as surface mass fluxes (kg/m²/s)
            let f_heat = -(alpha / cp) * qnet;
            let f_fresh = (sigma + 1000.0) * beta * sss * emp * CONV_FRESHWATER;

            let a = fluxes.area[i];
            let k = bin_index(sigma, &edges, n_s);
            heat[k] += f_heat * a;
            fresh[k] += f_fresh * a;
            area[k] += a;
            any[k] = true;
            sum_heat += qnet * a;
            sum_fresh += emp * CONV_FRESHWATER * a;
            seen = true;
        }

        if !seen {
            continue;
        }
        for k in 0..=n_s {
            if !any[k] {
                continue;
            }
            out.heat_component[[t, k]] = heat[k];
            out.freshwater_component[[t, k]] = fresh[k];
            out.density_flux[[t, k]] = heat[k] + fresh[k];
            out.bin_area[[t, k]] = area[k];
            // Transformation across the isopycnal: flux / bin width, as a
            // volume flux of reference-density water
            let delta = if k < n_s {
                grid.deltas()[k]
            } else {
                grid.coarse_step()
            };
            out.transformation[[t, k]] =
                (heat[k] + fresh[k]) / delta / 1000.0 * CONV_SVERDRUP;
        }
        out.total_heat[t] = sum_heat * CONV_PETAWATT;
        out.total_freshwater[t] = sum_fresh * CONV_SVERDRUP;
    }

    Ok(out)
}

/// Which bin a surface density falls in: bins `[edges[k], edges[k+1])`, with
/// the last bin open above the densest level and everything lighter than the
/// grid collected in bin 0.
fn bin_index(sigma: f64, edges: &[f64], n_s: usize) -> usize {
    if sigma >= edges[n_s] {
        return n_s;
    }
    match edges[..=n_s].iter().rposition(|&e| sigma >= e) {
        Some(k) => k,
        None => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::DensityGridSpec;
    use ndarray::{Array1, Array2};

    fn grid() -> DensityGrid {
        DensityGrid::build(&DensityGridSpec::default())
    }

    #[test]
    fn test_uniform_surface_fills_single_bin() {
        let g = grid();
        let n = 4;
        let sst = Array2::from_elem((1, n), 10.0);
        let sss = Array2::from_elem((1, n), 35.0);
        let qnet = Array2::from_elem((1, n), 100.0);
        let emp = Array2::from_elem((1, n), 0.0);
        let area = Array1::from_elem(n, 1.0e10);
        let fluxes = SurfaceFluxes {
            sst: sst.view(),
            sss: sss.view(),
            net_heat: qnet.view(),
            freshwater: emp.view(),
            area: area.view(),
        };
        let bins = surface_transformation(&fluxes, &g).unwrap();
        let occupied: Vec<usize> = (0..=g.n_levels())
            .filter(|&k| is_valid_f64(bins.bin_area[[0, k]]))
            .collect();
        assert_eq!(occupied.len(), 1);
        let k = occupied[0];
        // The whole domain area outcrops in that bin
        assert!((bins.bin_area[[0, k]] - 4.0e10).abs() < 1.0);
        // Warming (positive qnet) makes water lighter: negative density flux
        assert!(bins.density_flux[[0, k]] < 0.0);
    }

    #[test]
    fn test_bin_areas_sum_to_domain() {
        let g = grid();
        let n = 8;
        // Spread SSTs so several bins outcrop
        let sst = Array2::from_shape_fn((1, n), |(_, i)| 2.0 + 3.0 * i as f64);
        let sss = Array2::from_elem((1, n), 35.0);
        let qnet = Array2::from_elem((1, n), 50.0);
        let emp = Array2::from_elem((1, n), 1.0e-5);
        let area = Array1::from_elem(n, 2.0e10);
        let fluxes = SurfaceFluxes {
            sst: sst.view(),
            sss: sss.view(),
            net_heat: qnet.view(),
            freshwater: emp.view(),
            area: area.view(),
        };
        let bins = surface_transformation(&fluxes, &g).unwrap();
        let total: f64 = (0..=g.n_levels())
            .map(|k| bins.bin_area[[0, k]])
            .filter(|&a| is_valid_f64(a))
            .sum();
        assert!((total - 16.0e10).abs() < 1.0);
    }

    #[test]
    fn test_masked_points_skipped() {
        let g = grid();
        let mut sst = Array2::from_elem((1, 2), 10.0);
        sst[[0, 1]] = FILL_VALUE_F64;
        let sss = Array2::from_elem((1, 2), 35.0);
        let qnet = Array2::from_elem((1, 2), 100.0);
        let emp = Array2::from_elem((1, 2), 0.0);
        let area = Array1::from_elem(2, 1.0e10);
        let fluxes = SurfaceFluxes {
            sst: sst.view(),
            sss: sss.view(),
            net_heat: qnet.view(),
            freshwater: emp.view(),
            area: area.view(),
        };
        let bins = surface_transformation(&fluxes, &g).unwrap();
        let total: f64 = (0..=g.n_levels())
            .map(|k| bins.bin_area[[0, k]])
            .filter(|&a| is_valid_f64(a))
            .sum();
        assert!((total - 1.0e10).abs() < 1.0);
    }

    #[test]
    fn test_shape_mismatch_rejected() {
        let g = grid();
        let sst = Array2::from_elem((1, 2), 10.0);
        let sss = Array2::from_elem((2, 2), 35.0);
        let qnet = Array2::from_elem((1, 2), 0.0);
        let emp = Array2::from_elem((1, 2), 0.0);
        let area = Array1::from_elem(2, 1.0);
        let fluxes = SurfaceFluxes {
            sst: sst.view(),
            sss: sss.view(),
            net_heat: qnet.view(),
            freshwater: emp.view(),
            area: area.view(),
        };
        assert!(matches!(
            surface_transformation(&fluxes, &g),
            Err(Error::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_bin_index_edges() {
        let g = grid();
        let edges = g.axis_levels();
        let n_s = g.n_levels();
        // Lighter than the grid collects in bin 0
        assert_eq!(bin_index(10.0, &edges, n_s), 0);
        // Dense end is open
        assert_eq!(bin_index(40.0, &edges, n_s), n_s);
        // Exact lower edge belongs to its bin
        assert_eq!(bin_index(edges[3], &edges, n_s), 3);
    }
}
