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
    config::{AtmosphereConfig, DensityProfile, DensityProfileLayer},
    luminance::LuminanceMode,
    spectrum::interpolate_vec3,
    tables::{
        IRRADIANCE_TEXTURE_HEIGHT, IRRADIANCE_TEXTURE_WIDTH, SCATTERING_TEXTURE_MU_SIZE,
        SCATTERING_TEXTURE_MU_S_SIZE, SCATTERING_TEXTURE_NU_SIZE, SCATTERING_TEXTURE_R_SIZE,
        TRANSMITTANCE_TEXTURE_HEIGHT, TRANSMITTANCE_TEXTURE_WIDTH,
    },
};
use anyhow::{ensure, Result};
use nalgebra::Vector3;

const DEFINITIONS_GLSL: &str = include_str!("../shaders/definitions.glsl");
const FUNCTIONS_GLSL: &str = include_str!("../shaders/functions.glsl");

/// Format a float so that it round trips and always reads as a GLSL float.
pub(crate) fn glsl_float(v: f64) -> String {
    let mut s = format!("{:?}", v);
    if !s.contains(|c| c == '.' || c == 'e') {
        s.push_str(".0");
    }
    s
}

fn glsl_vec3(v: &Vector3<f64>) -> String {
    format!(
        "vec3({},{},{})",
        glsl_float(v.x),
        glsl_float(v.y),
        glsl_float(v.z)
    )
}

/// Builds the GLSL prelude of every atmosphere shader: the table sizes, the
/// atmosphere parameters evaluated at three wavelengths, the luminance
/// conversion constants, and the radiative transfer functions.
#[derive(Clone, Debug)]
pub struct ShaderHeader {
    config: AtmosphereConfig,
    rayleigh_density: DensityProfile,
    mie_density: DensityProfile,
    absorption_density: DensityProfile,
    combine_scattering_textures: bool,
    sky_spectral_radiance_to_luminance: [f64; 3],
    sun_spectral_radiance_to_luminance: [f64; 3],
}

impl ShaderHeader {
    pub fn new(
        config: &AtmosphereConfig,
        mode: LuminanceMode,
        combine_scattering_textures: bool,
    ) -> Result<Self> {
        let sky = mode.sky_spectral_radiance_to_luminance(config);
        let sun = mode.sun_spectral_radiance_to_luminance(config);
        ensure!(
            sky.iter().chain(sun.iter()).all(|v| v.is_finite()),
            "radiance to luminance factors are not finite (sky {:?}, sun {:?})",
            sky,
            sun
        );
        Ok(Self {
            config: config.to_owned(),
            rayleigh_density: config.rayleigh_profile()?,
            mie_density: config.mie_profile()?,
            absorption_density: config.absorption_profile()?,
            combine_scattering_textures,
            sky_spectral_radiance_to_luminance: sky,
            sun_spectral_radiance_to_luminance: sun,
        })
    }

    pub fn sky_spectral_radiance_to_luminance(&self) -> [f64; 3] {
        self.sky_spectral_radiance_to_luminance
    }

    pub fn sun_spectral_radiance_to_luminance(&self) -> [f64; 3] {
        self.sun_spectral_radiance_to_luminance
    }

    fn spectrum(&self, values: &[f64], lambdas: &Vector3<f64>, scale: f64) -> String {
        glsl_vec3(&interpolate_vec3(
            &self.config.wavelengths,
            values,
            lambdas,
            scale,
        ))
    }

    fn density_layer(&self, layer: &DensityProfileLayer) -> String {
        let unit = self.config.length_unit_in_meters;
        format!(
            "DensityProfileLayer({},{},{},{},{})",
            glsl_float(layer.width / unit),
            glsl_float(layer.exp_term),
            glsl_float(layer.exp_scale * unit),
            glsl_float(layer.linear_term * unit),
            glsl_float(layer.constant_term)
        )
    }

    fn density_profile(&self, profile: &DensityProfile) -> String {
        let layers = profile
            .layers()
            .iter()
            .map(|layer| self.density_layer(layer))
            .collect::<Vec<_>>();
        format!(
            "DensityProfile(DensityProfileLayer[{}]({}))",
            DensityProfile::LAYER_COUNT,
            layers.join(",")
        )
    }

    fn atmosphere_parameters(&self, lambdas: &Vector3<f64>) -> String {
        let c = &self.config;
        let unit = c.length_unit_in_meters;
        let fields = [
            self.spectrum(&c.solar_irradiance, lambdas, 1.0),
            glsl_float(c.sun_angular_radius),
            glsl_float(c.bottom_radius / unit),
            glsl_float(c.top_radius / unit),
            self.density_profile(&self.rayleigh_density),
            self.spectrum(&c.rayleigh_scattering, lambdas, unit),
            self.density_profile(&self.mie_density),
            self.spectrum(&c.mie_scattering, lambdas, unit),
            self.spectrum(&c.mie_extinction, lambdas, unit),
            glsl_float(c.mie_phase_function_g),
            self.density_profile(&self.absorption_density),
            self.spectrum(&c.absorption_extinction, lambdas, unit),
            self.spectrum(&c.ground_albedo, lambdas, 1.0),
            glsl_float(c.max_sun_zenith_angle.cos()),
        ];
        format!(
            "const AtmosphereParameters ATMOSPHERE = AtmosphereParameters(\n    {});\n",
            fields.join(",\n    ")
        )
    }

    /// The header for one wavelength triple. Pure: the same lambdas always
    /// produce the same text.
    pub fn generate(&self, lambdas: &Vector3<f64>) -> String {
        let mut out = String::with_capacity(DEFINITIONS_GLSL.len() + FUNCTIONS_GLSL.len() + 4096);
        out.push_str("#version 330\n");
        for (name, value) in [
            ("TRANSMITTANCE_TEXTURE_WIDTH", TRANSMITTANCE_TEXTURE_WIDTH),
            ("TRANSMITTANCE_TEXTURE_HEIGHT", TRANSMITTANCE_TEXTURE_HEIGHT),
            ("SCATTERING_TEXTURE_R_SIZE", SCATTERING_TEXTURE_R_SIZE),
            ("SCATTERING_TEXTURE_MU_SIZE", SCATTERING_TEXTURE_MU_SIZE),
            ("SCATTERING_TEXTURE_MU_S_SIZE", SCATTERING_TEXTURE_MU_S_SIZE),
            ("SCATTERING_TEXTURE_NU_SIZE", SCATTERING_TEXTURE_NU_SIZE),
            ("IRRADIANCE_TEXTURE_WIDTH", IRRADIANCE_TEXTURE_WIDTH),
            ("IRRADIANCE_TEXTURE_HEIGHT", IRRADIANCE_TEXTURE_HEIGHT),
        ] {
            out.push_str(&format!("const int {} = {};\n", name, value));
        }
        if self.combine_scattering_textures {
            out.push_str("#define COMBINED_SCATTERING_TEXTURES\n");
        }
        out.push_str(DEFINITIONS_GLSL);
        out.push_str(&self.atmosphere_parameters(lambdas));
        out.push_str(&format!(
            "const vec3 SKY_SPECTRAL_RADIANCE_TO_LUMINANCE = {};\n",
            glsl_vec3(&Vector3::from(self.sky_spectral_radiance_to_luminance))
        ));
        out.push_str(&format!(
            "const vec3 SUN_SPECTRAL_RADIANCE_TO_LUMINANCE = {};\n",
            glsl_vec3(&Vector3::from(self.sun_spectral_radiance_to_luminance))
        ));
        out.push_str(FUNCTIONS_GLSL);
        out
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{config::ModelOptions, earth_consts::EarthOptions, spectrum::reference_lambdas};

    fn earth_header(combine: bool) -> Result<ShaderHeader> {
        let config = AtmosphereConfig::earth(
            &EarthOptions {
                constant_solar_spectrum: true,
                ..Default::default()
            },
            &ModelOptions::default(),
        );
        ShaderHeader::new(&config, LuminanceMode::Radiance, combine)
    }

    #[test]
    fn test_glsl_float() {
        assert_eq!(glsl_float(1.0), "1.0");
        assert_eq!(glsl_float(6360.0), "6360.0");
        assert_eq!(glsl_float(-0.125), "-0.125");
        assert_eq!(glsl_float(0.1), "0.1");
        for v in [1.0 / 3.0, 1e-7, -2.5e-9, 1e20, 123456789.0] {
            let s = glsl_float(v);
            assert!(s.contains('.') || s.contains('e'), "{}", s);
            assert_eq!(s.parse::<f64>().ok(), Some(v));
        }
    }

    #[test]
    fn test_refuses_non_finite_luminance_factors() {
        let mut config = AtmosphereConfig::earth(
            &EarthOptions::default(),
            &ModelOptions::default(),
        );
        config.solar_irradiance = vec![0.0; config.wavelengths.len()];
        for mode in [
            LuminanceMode::Radiance,
            LuminanceMode::PrecomputedIlluminance { iterations: 15 },
        ] {
            let err = ShaderHeader::new(&config, mode, true)
                .err()
                .map(|e| e.to_string())
                .unwrap_or_default();
            assert!(err.contains("not finite"), "{}", err);
        }
    }

    #[test]
    fn test_mie_fade_follows_sun_elevation() -> Result<()> {
        let text = earth_header(false)?.generate(&reference_lambdas());
        assert!(text.contains("single_mie_scattering * smoothstep(0.0, 0.01, mu_s);"));
        assert!(!text.contains("smoothstep(0.0, 0.01, mu);"));
        Ok(())
    }

    #[test]
    fn test_header_structure() -> Result<()> {
        let text = earth_header(true)?.generate(&reference_lambdas());
        assert!(text.starts_with("#version 330\n"));
        assert!(text.contains("const int TRANSMITTANCE_TEXTURE_WIDTH = 256;\n"));
        assert!(text.contains("const int SCATTERING_TEXTURE_MU_SIZE = 128;\n"));
        assert!(text.contains("const int IRRADIANCE_TEXTURE_HEIGHT = 16;\n"));
        assert!(text.contains("#define COMBINED_SCATTERING_TEXTURES\n"));

        // Everything is declared before it is used.
        let definitions = text.find("struct AtmosphereParameters");
        let atmosphere = text.find("const AtmosphereParameters ATMOSPHERE");
        let sky = text.find("SKY_SPECTRAL_RADIANCE_TO_LUMINANCE =");
        let functions = text.find("GetTransmittanceToTopAtmosphereBoundary");
        assert!(definitions.is_some());
        assert!(definitions < atmosphere && atmosphere < sky && sky < functions);

        let text = earth_header(false)?.generate(&reference_lambdas());
        assert!(!text.contains("#define COMBINED_SCATTERING_TEXTURES"));
        Ok(())
    }

    #[test]
    fn test_atmosphere_literal() -> Result<()> {
        let text = earth_header(true)?.generate(&reference_lambdas());
        // Solar irradiance first, then lengths in kilometers.
        assert!(text.contains("AtmosphereParameters(\n    vec3(1.5,1.5,1.5),\n    0.004675,\n    6360.0,\n    6420.0,\n"));
        // A single Rayleigh layer is padded with a zero layer below it, and
        // its scale is expressed per kilometer.
        assert!(text.contains(
            "DensityProfile(DensityProfileLayer[2](DensityProfileLayer(0.0,0.0,0.0,0.0,0.0),DensityProfileLayer(0.0,1.0,-0.125,0.0,0.0)))"
        ));
        // The ozone profile keeps both of its layers.
        assert!(text.contains("DensityProfileLayer(25.0,0.0,0.0,0.06666666666666667,-0.6666666666666666)"));
        assert!(text.contains("0.8,\n"));
        Ok(())
    }

    #[test]
    fn test_generate_is_pure() -> Result<()> {
        let header = earth_header(true)?;
        let a = header.generate(&reference_lambdas());
        let b = header.generate(&reference_lambdas());
        assert_eq!(a, b);
        let c = header.generate(&Vector3::new(400.0, 500.0, 600.0));
        assert_ne!(a, c);
        Ok(())
    }

    #[test]
    fn test_rejects_long_profiles() {
        let mut config = AtmosphereConfig::earth(
            &EarthOptions::default(),
            &ModelOptions::default(),
        );
        config.mie_density = vec![DensityProfileLayer::exponential(1200.0); 3];
        assert!(ShaderHeader::new(&config, LuminanceMode::Radiance, true).is_err());
    }
}
