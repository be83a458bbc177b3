//! Spherical cell areas for the horizontal reference grid.

use ndarray::Array2;

/// Earth radius (metres).
const EARTH_RADIUS: f64 = 6_371_000.0;

/// Grid-cell areas on the sphere, shape `(lat, lon)`, in m².
///
/// Coordinates are cell mid-points; each cell spans half-way to its
/// neighbours and area = R²·(λ₂−λ₁)·(sin φ₂ − sin φ₁). The first and last
/// latitude rows are bounded by the poles; the first and last longitude
/// columns copy their inner neighbour.
pub fn cell_areas(lon: &[f64], lat: &[f64]) -> Array2<f64> {
    let n_lon = lon.len();
    let n_lat = lat.len();
    let mut area = Array2::<f64>::zeros((n_lat, n_lon));

    let radconv = std::f64::consts::PI / 180.0;
    let lonr: Vec<f64> = lon.iter().map(|&l| l * radconv).collect();
    let latr: Vec<f64> = lat.iter().map(|&l| l * radconv).collect();
    let r2 = EARTH_RADIUS * EARTH_RADIUS;

    for i in 1..n_lon - 1 {
        let lonm1 = (lonr[i - 1] + lonr[i]) * 0.5;
        let lonp1 = (lonr[i] + lonr[i + 1]) * 0.5;
        let dlon = lonp1 - lonm1;
        for j in 1..n_lat - 1 {
            let latm1 = (latr[j - 1] + latr[j]) * 0.5;
            let latp1 = (latr[j] + latr[j + 1]) * 0.5;
            area[[j, i]] = r2 * dlon * (latp1.sin() - latm1.sin());
        }
        // North and south bounds
        let latm1 = (-90.0 * radconv + latr[0]) * 0.5;
        let latp1 = (latr[0] + latr[1]) * 0.5;
        area[[0, i]] = r2 * dlon * (latp1.sin() - latm1.sin());
        let latm1 = (latr[n_lat - 2] + latr[n_lat - 1]) * 0.5;
        let latp1 = (latr[n_lat - 1] + 90.0 * radconv) * 0.5;
        area[[n_lat - 1, i]] = r2 * dlon * (latp1.sin() - latm1.sin());
    }
    // East and west bounds
    for j in 0..n_lat {
        area[[j, 0]] = area[[j, 1]];
        area[[j, n_lon - 1]] = area[[j, n_lon - 2]];
    }

    area
}
