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
use crate::config::{AtmosphereConfig, DensityProfileLayer, ModelOptions};
use std::f64::consts::PI;

// Values from "Reference Solar Spectral Irradiance: ASTM G-173", ETR column
// (see http://rredc.nrel.gov/solar/spectra/am1.5/ASTMG173/ASTMG173.html),
// summed and averaged in each bin (e.g. the value for 360nm is the average
// of the ASTM G-173 values for all wavelengths between 360 and 370nm).
// Values in W.m^-2.
const LAMBDA_MIN: u32 = 360;
const LAMBDA_MAX: u32 = 830;
const LAMBDA_STEP: usize = 10;
const SOLAR_IRRADIANCE: [f64; 48] = [
    1.11776, 1.14259, 1.01249, 1.14716, 1.72765, 1.73054, 1.6887, 1.61253, 1.91198, 2.03474,
    2.02042, 2.02212, 1.93377, 1.95809, 1.91686, 1.8298, 1.8685, 1.8931, 1.85149, 1.8504, 1.8341,
    1.8345, 1.8147, 1.78158, 1.7533, 1.6965, 1.68194, 1.64654, 1.6048, 1.52143, 1.55622, 1.5113,
    1.474, 1.4482, 1.41018, 1.36775, 1.34188, 1.31429, 1.28303, 1.26758, 1.2367, 1.2082, 1.18737,
    1.14683, 1.12362, 1.1058, 1.07124, 1.04992,
];
// Values from http://www.iup.uni-bremen.de/gruppen/molspec/databases/
// referencespectra/o3spectra2011/index.html for 233K, summed and averaged in
// each bin (e.g. the value for 360nm is the average of the original values
// for all wavelengths between 360 and 370nm). Values in m^2.
const OZONE_CROSS_SECTION: [f64; 48] = [
    1.18e-27, 2.182e-28, 2.818e-28, 6.636e-28, 1.527e-27, 2.763e-27, 5.52e-27, 8.451e-27,
    1.582e-26, 2.316e-26, 3.669e-26, 4.924e-26, 7.752e-26, 9.016e-26, 1.48e-25, 1.602e-25,
    2.139e-25, 2.755e-25, 3.091e-25, 3.5e-25, 4.266e-25, 4.672e-25, 4.398e-25, 4.701e-25,
    5.019e-25, 4.305e-25, 3.74e-25, 3.215e-25, 2.662e-25, 2.238e-25, 1.852e-25, 1.473e-25,
    1.209e-25, 9.423e-26, 7.455e-26, 6.566e-26, 5.105e-26, 4.15e-26, 4.228e-26, 3.237e-26,
    2.451e-26, 2.801e-26, 2.534e-26, 1.624e-26, 1.465e-26, 2.078e-26, 1.383e-26, 7.105e-27,
];
// From https://en.wikipedia.org/wiki/Dobson_unit, in molecules.m^-2.
const DOBSON_UNIT: f64 = 2.687e20;
// Maximum number density of ozone molecules, in m^-3 (computed so at to get
// 300 Dobson units of ozone - for this we divide 300 DU by the integral of
// the ozone density profile defined below, which is equal to 15km).
const MAX_OZONE_NUMBER_DENSITY: f64 = 300.0 * DOBSON_UNIT / 15_000.0;
const CONSTANT_SOLAR_IRRADIANCE: f64 = 1.5;
const SUN_ANGULAR_RADIUS: f64 = 0.00935 / 2.0;
const BOTTOM_RADIUS: f64 = 6_360_000.0;
const TOP_RADIUS: f64 = 6_420_000.0;
const RAYLEIGH_SCATTER_COEFFICIENT: f64 = 1.24062e-6;
const RAYLEIGH_SCALE_HEIGHT: f64 = 8000.0;
const MIE_SCALE_HEIGHT: f64 = 1200.0;
const MIE_ANGSTROM_ALPHA: f64 = 0.0;
const MIE_ANGSTROM_BETA: f64 = 5.328e-3;
const MIE_SINGLE_SCATTERING_ALBEDO: f64 = 0.9;
const MIE_PHASE_FUNCTION_G: f64 = 0.8;
const GROUND_ALBEDO: f64 = 0.1;
const LENGTH_UNIT_IN_METERS: f64 = 1000.0;

#[derive(Copy, Clone, Debug)]
pub struct EarthOptions {
    pub constant_solar_spectrum: bool,
    pub use_ozone: bool,
}

impl Default for EarthOptions {
    fn default() -> Self {
        Self {
            constant_solar_spectrum: false,
            use_ozone: true,
        }
    }
}

impl AtmosphereConfig {
    /// An Earth-like atmosphere sampled every 10nm from 360nm to 830nm.
    /// The lowest sun depends on the table precision the model will use.
    pub fn earth(options: &EarthOptions, model: &ModelOptions) -> Self {
        let mut wavelengths = Vec::new();
        let mut solar_irradiance = Vec::new();
        let mut rayleigh_scattering = Vec::new();
        let mut mie_scattering = Vec::new();
        let mut mie_extinction = Vec::new();
        let mut absorption_extinction = Vec::new();
        let mut ground_albedo = Vec::new();
        for ((l, sun_irr), ozone_cross_sec) in (LAMBDA_MIN..=LAMBDA_MAX)
            .step_by(LAMBDA_STEP)
            .zip(SOLAR_IRRADIANCE.iter())
            .zip(OZONE_CROSS_SECTION.iter())
        {
            let lf = f64::from(l);
            wavelengths.push(lf);
            solar_irradiance.push(if options.constant_solar_spectrum {
                CONSTANT_SOLAR_IRRADIANCE
            } else {
                *sun_irr
            });
            let lambda = lf / 1000.0; // um
            rayleigh_scattering.push(RAYLEIGH_SCATTER_COEFFICIENT * lambda.powf(-4.0));
            let mie = MIE_ANGSTROM_BETA / MIE_SCALE_HEIGHT * lambda.powf(-MIE_ANGSTROM_ALPHA);
            mie_scattering.push(mie * MIE_SINGLE_SCATTERING_ALBEDO);
            mie_extinction.push(mie);
            absorption_extinction.push(if options.use_ozone {
                MAX_OZONE_NUMBER_DENSITY * ozone_cross_sec
            } else {
                0.0
            });
            ground_albedo.push(GROUND_ALBEDO);
        }

        // Half precision tables lose accuracy for very low suns, so stop earlier.
        let max_sun_zenith_degrees = if model.half_precision { 102.0 } else { 120.0 };
        let max_sun_zenith_angle = max_sun_zenith_degrees / 180.0 * PI;

        Self {
            wavelengths,
            solar_irradiance,
            sun_angular_radius: SUN_ANGULAR_RADIUS,
            bottom_radius: BOTTOM_RADIUS,
            top_radius: TOP_RADIUS,
            rayleigh_density: vec![DensityProfileLayer::exponential(RAYLEIGH_SCALE_HEIGHT)],
            rayleigh_scattering,
            mie_density: vec![DensityProfileLayer::exponential(MIE_SCALE_HEIGHT)],
            mie_scattering,
            mie_extinction,
            mie_phase_function_g: MIE_PHASE_FUNCTION_G,
            // Density profile increasing linearly from 0 to 1 between 10 and
            // 25km, and decreasing linearly from 1 to 0 between 25 and 40km.
            absorption_density: vec![
                DensityProfileLayer::new(25_000.0, 0.0, 0.0, 1.0 / 15_000.0, -2.0 / 3.0),
                DensityProfileLayer::new(0.0, 0.0, 0.0, -1.0 / 15_000.0, 8.0 / 3.0),
            ],
            absorption_extinction,
            ground_albedo,
            max_sun_zenith_angle,
            length_unit_in_meters: LENGTH_UNIT_IN_METERS,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_earth_tables() {
        let earth = AtmosphereConfig::earth(&EarthOptions::default(), &ModelOptions::default());
        assert_eq!(earth.wavelengths.len(), 48);
        assert_eq!(earth.wavelengths[0], 360.0);
        assert_eq!(earth.wavelengths[47], 830.0);
        assert_relative_eq!(earth.max_sun_zenith_angle.cos(), -0.2079, epsilon = 1e-4);
        // Rayleigh scattering at 550nm is about 13.6e-6 m^-1.
        let rayleigh_550 = earth.rayleigh_scattering[19];
        assert_relative_eq!(rayleigh_550, 13.56e-6, max_relative = 1e-2);
    }

    #[test]
    fn test_earth_options() {
        let flat = AtmosphereConfig::earth(
            &EarthOptions {
                constant_solar_spectrum: true,
                use_ozone: false,
            },
            &ModelOptions {
                half_precision: false,
                ..Default::default()
            },
        );
        assert!(flat.solar_irradiance.iter().all(|v| *v == 1.5));
        assert!(flat.absorption_extinction.iter().all(|v| *v == 0.0));
        assert_relative_eq!(flat.max_sun_zenith_angle, 120f64.to_radians(), epsilon = 1e-12);
    }
}
