//! Equation of state for seawater: approximate neutral density.
//!
//! Computes the neutral density γₐ(θ, S) of McDougall & Jackett (2005) from
//! potential temperature and salinity. Density binning places every isopycnal
//! surface by interpolating against this polynomial, so the coefficients are
//! part of the crate's contract, not an implementation detail.
//!
//! # References
//!
//! - McDougall, T. J. and D. R. Jackett (2005): The material derivative of
//!   neutral density. Journal of Marine Research, 63 (1), pp 159-185.
//! - Millero et al. (1973) for the specific heat of seawater.
//!
//! # Units
//!
//! - Potential temperature: °C
//! - Salinity: PSS-78
//! - Density: kg/m³ (the `sigma` variants return the anomaly, minus 1000)
//!
//! # Example
//!
//! ```
//! use isobin_rs::eos::neutral_density;
//!
//! // Check value from the reference implementation
//! let rho = neutral_density(20.0, 35.0);
//! assert!((rho - 1024.5941675119673).abs() < 1e-9);
//! ```

use crate::masked::{is_valid_f64, FILL_VALUE_F64};

/// Compute approximate neutral density (kg/m³).
///
/// Invalid inputs propagate as the fill value; no error is raised.
pub fn neutral_density(theta: f64, salt: f64) -> f64 {
    if !is_valid_f64(theta) || !is_valid_f64(salt) {
        return FILL_VALUE_F64;
    }
    let zt = theta;
    let zs = salt;
    let zsr = zs.max(0.0).sqrt();
    let zr1 = ((-4.3159255086706703e-4 * zt + 8.1157118782170051e-2) * zt
        + 2.2280832068441331e-1)
        * zt
        + 1002.3063688892480;
    let zr2 = (-1.7052298331414675e-7 * zs - 3.1710675488863952e-3 * zt
        - 1.0304537539692924e-4)
        * zs;
    let zr3 = (((-2.3850178558212048e-9 * zt - 1.6212552470310961e-7) * zt
        + 7.8717799560577725e-5)
        * zt
        + 4.3907692647825900e-5)
        * zt
        + 1.0;
    let zr4 = ((-2.2744455733317707e-9 * zt * zt + 6.0399864718597388e-6) * zt
        - 5.1268124398160734e-4)
        * zs;
    let zr5 = (-1.3409379420216683e-9 * zt * zt - 3.6138532339703262e-5) * zs * zsr;
    (zr1 + zr2) / (zr3 + zr4 + zr5)
}

/// Neutral density anomaly σₙ = γₐ − 1000 (kg/m³).
#[inline]
pub fn sigma_n(theta: f64, salt: f64) -> f64 {
    let rho = neutral_density(theta, salt);
    if is_valid_f64(rho) {
        rho - 1000.0
    } else {
        FILL_VALUE_F64
    }
}

/// Thermal expansion coefficient α = −(1/ρ) ∂ρ/∂T (1/°C).
///
/// Forward finite difference on the neutral density polynomial, matching the
/// surface-transformation diagnostic.
pub fn thermal_expansion(theta: f64, salt: f64) -> f64 {
    let dt = 0.05;
    let siga = sigma_n(theta, salt);
    let sigb = sigma_n(theta + dt, salt);
    if !is_valid_f64(siga) || !is_valid_f64(sigb) {
        return FILL_VALUE_F64;
    }
    -0.001 * (sigb - siga) / dt / (1.0 + 1.0e-3 * siga)
}

/// Haline contraction coefficient β = (1/ρ) ∂ρ/∂S (1/PSS).
pub fn haline_contraction(theta: f64, salt: f64) -> f64 {
    let ds = 0.01;
    let siga = sigma_n(theta, salt);
    let sigb = sigma_n(theta, salt + ds);
    if !is_valid_f64(siga) || !is_valid_f64(sigb) {
        return FILL_VALUE_F64;
    }
    0.001 * (sigb - siga) / ds / (1.0 + 1.0e-3 * siga)
}

/// Specific heat of seawater (J/kg/°C), Millero et al. (1973).
///
/// # Arguments
/// * `theta` - Temperature in °C
/// * `salt` - Salinity in PSS-78
/// * `pressure` - Pressure in bar (0 at the surface)
pub fn specific_heat(theta: f64, salt: f64, pressure: f64) -> f64 {
    if !is_valid_f64(theta) || !is_valid_f64(salt) {
        return FILL_VALUE_F64;
    }
    let t = theta;
    let s = salt;
    let p = pressure;
    let sr = s.abs().sqrt();

    // Specific heat cp0 for p = 0
    let a = (-1.38e-3 * t + 0.10727) * t - 7.644;
    let b = (5.35e-5 * t - 4.08e-3) * t + 0.177;
    let c = (((2.093236e-5 * t - 2.654387e-3) * t + 0.1412855) * t - 3.720283) * t + 4217.4;
    let cp0 = (b * sr + a) * s + c;

    // Pressure and temperature terms for s = 0
    let a = (((1.7168e-8 * t + 2.0357e-6) * t - 3.13885e-4) * t + 1.45747e-2) * t - 0.49592;
    let b = (((2.2956e-11 * t - 4.0027e-9) * t + 2.87533e-7) * t - 1.08645e-5) * t + 2.4931e-4;
    let c = ((6.136e-13 * t - 6.5637e-11) * t + 2.6380e-9) * t - 5.422e-8;
    let cp1 = ((c * p + b) * p + a) * p;

    // Pressure and temperature terms for s > 0
    let a = (((-2.9179e-10 * t + 2.5941e-8) * t + 9.802e-7) * t - 1.28315e-4) * t + 4.9247e-3;
    let b = (3.122e-8 * t - 1.517e-6) * t - 1.2331e-4;
    let a = (a + b * sr) * s;
    let b = ((1.8448e-11 * t - 2.3905e-9) * t + 1.17054e-7) * t - 2.9558e-6;
    let b = (b + 9.971e-8 * sr) * s;
    let c = (3.513e-13 * t - 1.7682e-11) * t + 5.540e-10;
    let c = (c - 1.4300e-12 * t * sr) * s;
    let cp2 = ((c * p + b) * p + a) * p;

    cp0 + cp1 + cp2
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_reference_check_value() {
        // Reference value of the McDougall & Jackett polynomial
        assert_relative_eq!(
            neutral_density(20.0, 35.0),
            1024.5941675119673,
            epsilon = 1e-9
        );
    }

    #[test]
    fn test_density_temperature_dependence() {
        // Warmer water is lighter at constant salinity
        assert!(neutral_density(5.0, 35.0) > neutral_density(15.0, 35.0));
    }

    #[test]
    fn test_density_salinity_dependence() {
        // Saltier water is heavier at constant temperature
        assert!(neutral_density(10.0, 35.0) > neutral_density(10.0, 30.0));
    }

    #[test]
    fn test_sigma_anomaly() {
        let rho = neutral_density(20.0, 35.0);
        assert_relative_eq!(sigma_n(20.0, 35.0), rho - 1000.0);
    }

    #[test]
    fn test_invalid_input_propagates_fill() {
        use crate::masked::{is_valid_f64, FILL_VALUE_F64};
        assert!(!is_valid_f64(neutral_density(FILL_VALUE_F64, 35.0)));
        assert!(!is_valid_f64(sigma_n(20.0, FILL_VALUE_F64)));
        assert!(!is_valid_f64(thermal_expansion(f64::NAN, 35.0)));
    }

    #[test]
    fn test_thermal_expansion_range() {
        // ~2e-4 /°C for seawater at 10°C, 35 PSS
        let alpha = thermal_expansion(10.0, 35.0);
        assert!(alpha > 1e-4 && alpha < 3e-4);
    }

    #[test]
    fn test_haline_contraction_range() {
        // ~7.5e-4 /PSS for seawater at 10°C, 35 PSS
        let beta = haline_contraction(10.0, 35.0);
        assert!(beta > 5e-4 && beta < 1e-3);
    }

    #[test]
    fn test_specific_heat_range() {
        // ~3990 J/kg/°C for surface seawater
        let cp = specific_heat(10.0, 35.0, 0.0);
        assert!(cp > 3900.0 && cp < 4100.0);

        // Fresh water is close to 4190 J/kg/°C
        let cp_fresh = specific_heat(15.0, 0.0, 0.0);
        assert!((cp_fresh - 4185.0).abs() < 20.0);
    }
}
