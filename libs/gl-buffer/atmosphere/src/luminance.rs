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
use crate::{
    colorspace::{cie_color_coefficient_at_wavelength, xyz_to_srgb_matrix, LAMBDA_MAX, LAMBDA_MIN},
    config::AtmosphereConfig,
    spectrum::{
        compute_spectral_radiance_to_luminance_factors, reference_lambdas, MAX_LUMINOUS_EFFICACY,
    },
};
use nalgebra::{Matrix3, Vector3};

/// What the lookup tables hold, decided once from the number of
/// precomputed wavelengths.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum LuminanceMode {
    /// Radiance at the three reference wavelengths, converted to luminance
    /// with fixed factors at render time.
    Radiance,
    /// Luminance integrated over the visible spectrum, three wavelengths at
    /// a time, with `iterations` passes.
    PrecomputedIlluminance { iterations: usize },
}

/// One run of the precomputation pipeline.
#[derive(Clone, Debug, PartialEq)]
pub struct WavelengthPass {
    pub lambdas: Vector3<f64>,
    pub luminance_from_radiance: Matrix3<f64>,
    // Accumulate into the persistent tables instead of replacing them.
    pub blend: bool,
}

impl LuminanceMode {
    pub fn from_num_wavelengths(num_precomputed_wavelengths: usize) -> Self {
        if num_precomputed_wavelengths <= 3 {
            Self::Radiance
        } else {
            Self::PrecomputedIlluminance {
                iterations: (num_precomputed_wavelengths + 2) / 3,
            }
        }
    }

    /// Conversion from the values stored in the scattering tables to
    /// luminance. Precomputed luminance only lacks the luminous efficacy.
    pub fn sky_spectral_radiance_to_luminance(&self, config: &AtmosphereConfig) -> [f64; 3] {
        match self {
            Self::Radiance => compute_spectral_radiance_to_luminance_factors(
                &config.wavelengths,
                &config.solar_irradiance,
                -3.0,
            ),
            Self::PrecomputedIlluminance { .. } => [MAX_LUMINOUS_EFFICACY; 3],
        }
    }

    pub fn sun_spectral_radiance_to_luminance(&self, config: &AtmosphereConfig) -> [f64; 3] {
        compute_spectral_radiance_to_luminance_factors(
            &config.wavelengths,
            &config.solar_irradiance,
            0.0,
        )
    }

    pub fn passes(&self) -> Vec<WavelengthPass> {
        match *self {
            Self::Radiance => vec![WavelengthPass {
                lambdas: reference_lambdas(),
                luminance_from_radiance: Matrix3::identity(),
                blend: false,
            }],
            Self::PrecomputedIlluminance { iterations } => {
                let dlambda = (LAMBDA_MAX - LAMBDA_MIN) / (3 * iterations) as f64;
                (0..iterations)
                    .map(|i| {
                        let lambdas = Vector3::new(0.5, 1.5, 2.5)
                            .map(|offset| LAMBDA_MIN + (3.0 * i as f64 + offset) * dlambda);
                        WavelengthPass {
                            lambdas,
                            luminance_from_radiance: luminance_from_radiance(&lambdas, dlambda),
                            blend: i > 0,
                        }
                    })
                    .collect()
            }
        }
    }

    /// After the last pass the transmittance table holds the last pass's
    /// wavelengths and must be recomputed at the reference wavelengths.
    pub fn recomputes_transmittance(&self) -> bool {
        matches!(self, Self::PrecomputedIlluminance { .. })
    }

    /// Preprocessor lines selecting the client API entry points.
    pub fn api_defines(&self) -> &'static str {
        match self {
            Self::Radiance => "#define RADIANCE_API_ENABLED\n",
            Self::PrecomputedIlluminance { .. } => "",
        }
    }
}

// Row c, column k: the contribution of radiance at lambdas[k] to sRGB
// channel c over a band of width dlambda.
fn luminance_from_radiance(lambdas: &Vector3<f64>, dlambda: f64) -> Matrix3<f64> {
    let xyz_to_srgb = xyz_to_srgb_matrix();
    let mut m = Matrix3::zeros();
    for (k, lambda) in lambdas.iter().enumerate() {
        let rgb = xyz_to_srgb * cie_color_coefficient_at_wavelength(*lambda) * dlambda;
        m.set_column(k, &rgb);
    }
    m
}
