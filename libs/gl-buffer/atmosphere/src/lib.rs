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

// Precomputed atmospheric scattering after Eric Bruneton's reference
// implementation:
//     https://ebruneton.github.io/precomputed_atmospheric_scattering/
// Which is:
//     Copyright (c) 2017 Eric Bruneton
// Mistakes in this port to Rust and OpenGL 3.3 are ours.
mod colorspace;
mod config;
mod earth_consts;
mod luminance;
mod model;
mod precompute;
mod shader_header;
mod spectrum;
mod tables;

pub use crate::{
    colorspace::{
        cie_color_matching_function_table_value, convert_xyz_to_srgb, LAMBDA_MAX, LAMBDA_MIN,
        XYZ_TO_SRGB,
    },
    config::{AtmosphereConfig, DensityProfile, DensityProfileLayer, ModelOptions},
    earth_consts::EarthOptions,
    luminance::{LuminanceMode, WavelengthPass},
    model::{Model, TextureUnits, DEFAULT_SCATTERING_ORDERS},
    precompute::{precompute, recompute_transmittance, Precompute, Scratch, FULLSCREEN_VERTEX_SHADER},
    shader_header::ShaderHeader,
    spectrum::{
        compute_spectral_radiance_to_luminance_factors, convert_spectrum_to_linear_srgb,
        interpolate, reference_lambdas, LAMBDA_B, LAMBDA_G, LAMBDA_R, MAX_LUMINOUS_EFFICACY,
    },
    tables::{
        LookupTextures, MieScattering, TableFormats, IRRADIANCE_EXTENT, IRRADIANCE_TEXTURE_HEIGHT,
        IRRADIANCE_TEXTURE_WIDTH, SCATTERING_EXTENT, SCATTERING_TEXTURE_MU_SIZE,
        SCATTERING_TEXTURE_MU_S_SIZE, SCATTERING_TEXTURE_NU_SIZE, SCATTERING_TEXTURE_R_SIZE,
        TRANSMITTANCE_EXTENT, TRANSMITTANCE_TEXTURE_HEIGHT, TRANSMITTANCE_TEXTURE_WIDTH,
    },
};
