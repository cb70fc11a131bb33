// This file is part of Mork.
//
// Mork is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// Mork is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with Mork.  If not, see <http://www.gnu.org/licenses/>.
use crate::colorspace::{
    cie_color_coefficient_at_wavelength, convert_xyz_to_srgb, LAMBDA_MAX, LAMBDA_MIN,
};
use nalgebra::Vector3;

pub const LAMBDA_R: f64 = 680.0;
pub const LAMBDA_G: f64 = 550.0;
pub const LAMBDA_B: f64 = 440.0;

/// The wavelengths at which the final RGB lookup tables are expressed.
pub fn reference_lambdas() -> Vector3<f64> {
    Vector3::new(LAMBDA_R, LAMBDA_G, LAMBDA_B)
}

// Lumens per watt at 555nm.
pub const MAX_LUMINOUS_EFFICACY: f64 = 683.0;

// Step of the spectral integrations, in nm.
const INTEGRATION_STEP: usize = 1;

/// Evaluate the wavelength-based table at the given wavelength, interpolating
/// between adjacent samples and clamping outside of the table.
pub fn interpolate(wavelengths: &[f64], values: &[f64], wavelength: f64) -> f64 {
    debug_assert_eq!(wavelengths.len(), values.len());
    if values.is_empty() {
        return 0.0;
    }
    if wavelength < wavelengths[0] {
        return values[0];
    }
    for (wl, v) in wavelengths.windows(2).zip(values.windows(2)) {
        if wavelength < wl[1] {
            let u = (wavelength - wl[0]) / (wl[1] - wl[0]);
            return v[0] * (1.0 - u) + v[1] * u;
        }
    }
    values[values.len() - 1]
}

pub fn interpolate_vec3(
    wavelengths: &[f64],
    values: &[f64],
    lambdas: &Vector3<f64>,
    scale: f64,
) -> Vector3<f64> {
    lambdas.map(|lambda| interpolate(wavelengths, values, lambda) * scale)
}

fn integration_range() -> impl Iterator<Item = f64> {
    (LAMBDA_MIN as usize..LAMBDA_MAX as usize)
        .step_by(INTEGRATION_STEP)
        .map(|lambda| lambda as f64)
}

/// Factors converting radiance at `LAMBDA_R`, `LAMBDA_G`, `LAMBDA_B` into
/// luminance, assuming the full spectrum behaves like the solar spectrum
/// times `(lambda / lambda_ref) ^ lambda_power`. The returned constants are in
/// lumen.nm / watt.
pub fn compute_spectral_radiance_to_luminance_factors(
    wavelengths: &[f64],
    solar_irradiance: &[f64],
    lambda_power: f64,
) -> [f64; 3] {
    let lambda_ref = [LAMBDA_R, LAMBDA_G, LAMBDA_B];
    let solar = lambda_ref.map(|lambda| interpolate(wavelengths, solar_irradiance, lambda));
    let mut k = [0f64; 3];
    for lambda in integration_range() {
        let rgb_bar = convert_xyz_to_srgb(cie_color_coefficient_at_wavelength(lambda), 1.0);
        let irradiance = interpolate(wavelengths, solar_irradiance, lambda);
        for c in 0..3 {
            k[c] += rgb_bar[c] * irradiance / solar[c] * (lambda / lambda_ref[c]).powf(lambda_power);
        }
    }
    k.map(|v| v * MAX_LUMINOUS_EFFICACY * INTEGRATION_STEP as f64)
}

/// Integrate a spectrum against the color matching functions and return the
/// linear sRGB luminance it produces.
pub fn convert_spectrum_to_linear_srgb(wavelengths: &[f64], spectrum: &[f64]) -> [f64; 3] {
    let mut xyz = Vector3::zeros();
    for lambda in integration_range() {
        let value = interpolate(wavelengths, spectrum, lambda);
        xyz += cie_color_coefficient_at_wavelength(lambda) * value;
    }
    let rgb = convert_xyz_to_srgb(xyz, MAX_LUMINOUS_EFFICACY * INTEGRATION_STEP as f64);
    [rgb.x, rgb.y, rgb.z]
}
