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
use crate::spectrum::{convert_spectrum_to_linear_srgb, interpolate, reference_lambdas, LAMBDA_R};
use anyhow::{bail, ensure, Result};

/// One piece of a piecewise density profile. Density at altitude `h` is
/// `exp_term * exp(exp_scale * h) + linear_term * h + constant_term`,
/// clamped to [0, 1]. Lengths are in meters.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct DensityProfileLayer {
    // Height of this layer, except for the last layer which always
    // extends to the top of the atmosphere region.
    pub width: f64,
    pub exp_term: f64,
    pub exp_scale: f64,
    pub linear_term: f64,
    pub constant_term: f64,
}

impl DensityProfileLayer {
    pub const ZERO: Self = Self {
        width: 0.0,
        exp_term: 0.0,
        exp_scale: 0.0,
        linear_term: 0.0,
        constant_term: 0.0,
    };

    pub fn new(
        width: f64,
        exp_term: f64,
        exp_scale: f64,
        linear_term: f64,
        constant_term: f64,
    ) -> Self {
        Self {
            width,
            exp_term,
            exp_scale,
            linear_term,
            constant_term,
        }
    }

    /// An exponentially decaying layer with the given scale height.
    pub fn exponential(scale_height: f64) -> Self {
        Self::new(0.0, 1.0, -1.0 / scale_height, 0.0, 0.0)
    }

    pub fn density(&self, altitude: f64) -> f64 {
        let density = self.exp_term * (self.exp_scale * altitude).exp()
            + self.linear_term * altitude
            + self.constant_term;
        density.clamp(0.0, 1.0)
    }

    fn is_finite(&self) -> bool {
        [
            self.width,
            self.exp_term,
            self.exp_scale,
            self.linear_term,
            self.constant_term,
        ]
        .iter()
        .all(|v| v.is_finite())
    }
}

/// A density profile of exactly two layers, from low to high.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct DensityProfile {
    layers: [DensityProfileLayer; DensityProfile::LAYER_COUNT],
}

impl DensityProfile {
    pub const LAYER_COUNT: usize = 2;

    /// Normalize a list of at most two layers. Missing layers are prepended
    /// as zero layers so that the given ones stay on top.
    pub fn new(layers: &[DensityProfileLayer]) -> Result<Self> {
        if layers.len() > Self::LAYER_COUNT {
            bail!(
                "a density profile has at most {} layers, got {}",
                Self::LAYER_COUNT,
                layers.len()
            );
        }
        let mut out = [DensityProfileLayer::ZERO; Self::LAYER_COUNT];
        out[Self::LAYER_COUNT - layers.len()..].copy_from_slice(layers);
        Ok(Self { layers: out })
    }

    pub fn layers(&self) -> &[DensityProfileLayer; Self::LAYER_COUNT] {
        &self.layers
    }

    pub fn density(&self, altitude: f64) -> f64 {
        if altitude < self.layers[0].width {
            self.layers[0].density(altitude)
        } else {
            self.layers[1].density(altitude)
        }
    }
}

/// The physical description of an atmosphere. Spectral quantities are
/// sampled at `wavelengths` (in nm, ascending); lengths are in meters and
/// angles in radians.
#[derive(Clone, Debug)]
pub struct AtmosphereConfig {
    pub wavelengths: Vec<f64>,
    // W.m^-2.nm^-1 at the top of the atmosphere.
    pub solar_irradiance: Vec<f64>,
    pub sun_angular_radius: f64,
    // From the planet center to the ground.
    pub bottom_radius: f64,
    // From the planet center to the top of the simulated atmosphere.
    pub top_radius: f64,
    pub rayleigh_density: Vec<DensityProfileLayer>,
    // Per wavelength, at maximum density, in m^-1.
    pub rayleigh_scattering: Vec<f64>,
    pub mie_density: Vec<DensityProfileLayer>,
    pub mie_scattering: Vec<f64>,
    pub mie_extinction: Vec<f64>,
    // Asymmetry parameter of the Cornette-Shanks phase function.
    pub mie_phase_function_g: f64,
    // Density of the absorbing molecules, ozone for the Earth.
    pub absorption_density: Vec<DensityProfileLayer>,
    pub absorption_extinction: Vec<f64>,
    pub ground_albedo: Vec<f64>,
    // The largest sun zenith angle for which scattering is precomputed. For
    // the Earth, 102 degrees yields negligible sky light below it.
    pub max_sun_zenith_angle: f64,
    // Length unit used in the shaders; 1000 renders in kilometers.
    pub length_unit_in_meters: f64,
}

impl AtmosphereConfig {
    pub fn validate(&self) -> Result<()> {
        ensure!(
            !self.wavelengths.is_empty(),
            "atmosphere config has no wavelengths"
        );
        ensure!(
            self.wavelengths.iter().all(|w| w.is_finite()),
            "atmosphere config has non-finite wavelengths"
        );
        ensure!(
            self.wavelengths.windows(2).all(|w| w[0] < w[1]),
            "atmosphere wavelengths must be strictly ascending"
        );
        for (name, values) in [
            ("solar_irradiance", &self.solar_irradiance),
            ("rayleigh_scattering", &self.rayleigh_scattering),
            ("mie_scattering", &self.mie_scattering),
            ("mie_extinction", &self.mie_extinction),
            ("absorption_extinction", &self.absorption_extinction),
            ("ground_albedo", &self.ground_albedo),
        ] {
            ensure!(
                values.len() == self.wavelengths.len(),
                "{} has {} values for {} wavelengths",
                name,
                values.len(),
                self.wavelengths.len()
            );
            ensure!(
                values.iter().all(|v| v.is_finite()),
                "{} has non-finite values",
                name
            );
        }
        // The luminance factors divide by the solar irradiance at the
        // reference wavelengths, and single Mie extrapolation divides by the
        // scattering coefficients at the red one.
        for lambda in reference_lambdas().iter() {
            let irradiance = interpolate(&self.wavelengths, &self.solar_irradiance, *lambda);
            ensure!(
                irradiance > 0.0,
                "solar_irradiance must be positive at {}nm, got {}",
                lambda,
                irradiance
            );
        }
        for (name, values) in [
            ("rayleigh_scattering", &self.rayleigh_scattering),
            ("mie_scattering", &self.mie_scattering),
        ] {
            let value = interpolate(&self.wavelengths, values, LAMBDA_R);
            ensure!(
                value > 0.0,
                "{} must be positive at {}nm, got {}",
                name,
                LAMBDA_R,
                value
            );
        }
        for (name, layers) in [
            ("rayleigh_density", &self.rayleigh_density),
            ("mie_density", &self.mie_density),
            ("absorption_density", &self.absorption_density),
        ] {
            ensure!(
                layers.len() <= DensityProfile::LAYER_COUNT,
                "{} has {} layers; at most {} are supported",
                name,
                layers.len(),
                DensityProfile::LAYER_COUNT
            );
            ensure!(
                layers.iter().all(|l| l.is_finite()),
                "{} has non-finite terms",
                name
            );
        }
        ensure!(
            self.bottom_radius > 0.0 && self.bottom_radius.is_finite(),
            "bottom_radius must be positive, got {}",
            self.bottom_radius
        );
        ensure!(
            self.top_radius.is_finite() && self.bottom_radius < self.top_radius,
            "top_radius ({}) must be above bottom_radius ({})",
            self.top_radius,
            self.bottom_radius
        );
        ensure!(
            self.length_unit_in_meters > 0.0 && self.length_unit_in_meters.is_finite(),
            "length_unit_in_meters must be positive, got {}",
            self.length_unit_in_meters
        );
        ensure!(
            self.sun_angular_radius > 0.0 && self.sun_angular_radius.is_finite(),
            "sun_angular_radius must be positive, got {}",
            self.sun_angular_radius
        );
        ensure!(
            self.mie_phase_function_g > -1.0 && self.mie_phase_function_g < 1.0,
            "mie_phase_function_g must be in (-1, 1), got {}",
            self.mie_phase_function_g
        );
        ensure!(
            self.max_sun_zenith_angle.is_finite(),
            "max_sun_zenith_angle must be finite"
        );
        Ok(())
    }

    pub fn rayleigh_profile(&self) -> Result<DensityProfile> {
        DensityProfile::new(&self.rayleigh_density)
    }

    pub fn mie_profile(&self) -> Result<DensityProfile> {
        DensityProfile::new(&self.mie_density)
    }

    pub fn absorption_profile(&self) -> Result<DensityProfile> {
        DensityProfile::new(&self.absorption_density)
    }

    /// The color of the sun in linear sRGB, normalized to a mean of 1. Clients
    /// divide by it to white balance the rendered luminance.
    pub fn white_point(&self) -> [f64; 3] {
        let rgb = convert_spectrum_to_linear_srgb(&self.wavelengths, &self.solar_irradiance);
        let mean = (rgb[0] + rgb[1] + rgb[2]) / 3.0;
        rgb.map(|c| c / mean)
    }
}

/// How the lookup tables are computed and stored.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ModelOptions {
    // 3 or fewer precomputes radiance at 680, 550 and 440nm; more integrates
    // luminance over the full spectrum in ceil(n / 3) passes.
    pub num_precomputed_wavelengths: usize,
    // Store single Mie scattering in the alpha channel of the scattering
    // texture rather than in a separate texture.
    pub combine_scattering_textures: bool,
    // Half float 3D textures.
    pub half_precision: bool,
}

impl Default for ModelOptions {
    fn default() -> Self {
        Self {
            num_precomputed_wavelengths: 3,
            combine_scattering_textures: true,
            half_precision: true,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::earth_consts::EarthOptions;
    use approx::assert_relative_eq;

    #[test]
    fn test_profile_padding() -> Result<()> {
        let empty = DensityProfile::new(&[])?;
        assert_eq!(empty.layers(), &[DensityProfileLayer::ZERO; 2]);

        let rayleigh = DensityProfileLayer::exponential(8000.0);
        let single = DensityProfile::new(&[rayleigh])?;
        assert_eq!(single.layers()[0], DensityProfileLayer::ZERO);
        assert_eq!(single.layers()[1], rayleigh);

        let ozone = [
            DensityProfileLayer::new(25_000.0, 0.0, 0.0, 1.0 / 15_000.0, -2.0 / 3.0),
            DensityProfileLayer::new(0.0, 0.0, 0.0, -1.0 / 15_000.0, 8.0 / 3.0),
        ];
        assert_eq!(DensityProfile::new(&ozone)?.layers(), &ozone);
        Ok(())
    }

    #[test]
    fn test_profile_rejects_three_layers() {
        let layer = DensityProfileLayer::exponential(1000.0);
        assert!(DensityProfile::new(&[layer, layer, layer]).is_err());
    }

    #[test]
    fn test_zero_layer_has_no_density() {
        for altitude in [0.0, 1.0, 1000.0, 60_000.0] {
            assert_eq!(DensityProfileLayer::ZERO.density(altitude), 0.0);
        }
        let profile = DensityProfile::new(&[]).map(|p| p.density(500.0));
        assert_eq!(profile.ok(), Some(0.0));
    }

    #[test]
    fn test_ozone_profile_shape() -> Result<()> {
        let config = AtmosphereConfig::earth(&EarthOptions::default(), &ModelOptions::default());
        let ozone = config.absorption_profile()?;
        assert_relative_eq!(ozone.density(0.0), 0.0);
        assert_relative_eq!(ozone.density(25_000.0), 1.0, epsilon = 1e-12);
        assert_relative_eq!(ozone.density(10_000.0), 0.0, epsilon = 1e-12);
        assert_relative_eq!(ozone.density(32_500.0), 0.5, epsilon = 1e-12);
        assert_relative_eq!(ozone.density(50_000.0), 0.0, epsilon = 1e-12);
        Ok(())
    }

    #[test]
    fn test_validate_earth() -> Result<()> {
        AtmosphereConfig::earth(&EarthOptions::default(), &ModelOptions::default()).validate()
    }

    #[test]
    fn test_validate_rejects_bad_tables() {
        let base = AtmosphereConfig::earth(&EarthOptions::default(), &ModelOptions::default());

        let mut config = base.clone();
        config.mie_extinction.pop();
        let err = config.validate().err().map(|e| e.to_string());
        assert!(err.unwrap_or_default().contains("mie_extinction"));

        let mut config = base.clone();
        config.wavelengths.swap(0, 1);
        assert!(config.validate().is_err());

        let mut config = base.clone();
        config.wavelengths.clear();
        assert!(config.validate().is_err());

        let mut config = base.clone();
        config.top_radius = config.bottom_radius;
        assert!(config.validate().is_err());

        let mut config = base.clone();
        config.rayleigh_density = vec![DensityProfileLayer::exponential(8000.0); 3];
        assert!(config.validate().is_err());

        let mut config = base;
        config.length_unit_in_meters = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_dark_reference_wavelengths() {
        let earth = AtmosphereConfig::earth(&EarthOptions::default(), &ModelOptions::default());

        let mut config = earth.clone();
        config.solar_irradiance = vec![0.0; config.wavelengths.len()];
        let err = config.validate().err().map(|e| e.to_string()).unwrap_or_default();
        assert!(err.contains("solar_irradiance"), "{}", err);

        // Zero only around 550nm is enough to break the green factor.
        let mut config = earth.clone();
        for (w, v) in config.wavelengths.iter().zip(config.solar_irradiance.iter_mut()) {
            if (*w - 550.0).abs() <= 10.0 {
                *v = 0.0;
            }
        }
        assert!(config.validate().is_err());

        let mut config = earth.clone();
        config.rayleigh_scattering = vec![0.0; config.wavelengths.len()];
        assert!(config.validate().is_err());

        let mut config = earth;
        config.mie_scattering = vec![-1e-6; config.wavelengths.len()];
        let err = config.validate().err().map(|e| e.to_string()).unwrap_or_default();
        assert!(err.contains("mie_scattering"), "{}", err);
    }

    #[test]
    fn test_white_point_of_flat_spectrum() {
        let mut config = AtmosphereConfig::earth(
            &EarthOptions {
                constant_solar_spectrum: true,
                ..Default::default()
            },
            &ModelOptions::default(),
        );
        let white = config.white_point();
        assert_relative_eq!((white[0] + white[1] + white[2]) / 3.0, 1.0, epsilon = 1e-12);

        // Scaling the spectrum does not change the normalized color.
        for v in config.solar_irradiance.iter_mut() {
            *v *= 7.0;
        }
        let scaled = config.white_point();
        for c in 0..3 {
            assert_relative_eq!(white[c], scaled[c], epsilon = 1e-12);
        }
    }
}
