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
    config::{AtmosphereConfig, ModelOptions},
    luminance::LuminanceMode,
    precompute::{precompute, recompute_transmittance, Scratch},
    shader_header::ShaderHeader,
    spectrum::reference_lambdas,
    tables::{LookupTextures, MieScattering, TableFormats},
};
use anyhow::{ensure, Context, Result};
use gpu::{Precision, RenderDevice, ShaderStage};
use log::{info, trace};
use std::time::Instant;

const ATMOSPHERE_GLSL: &str = include_str!("../shaders/atmosphere.glsl");

pub const DEFAULT_SCATTERING_ORDERS: u32 = 4;

/// Texture units used by `Model::set_program_uniforms`.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct TextureUnits {
    pub transmittance: u32,
    pub scattering: u32,
    pub irradiance: u32,
    pub single_mie_scattering: u32,
}

impl Default for TextureUnits {
    fn default() -> Self {
        Self {
            transmittance: 0,
            scattering: 1,
            irradiance: 2,
            single_mie_scattering: 3,
        }
    }
}

/// An atmosphere: its lookup tables and the shader that exposes them to
/// rendering programs.
///
/// `new` allocates the tables and compiles the API shader; `init` fills the
/// tables. Link `shader()` into any program that renders the sky or aerial
/// perspective, then call `set_program_uniforms` on that program.
pub struct Model<D: RenderDevice> {
    config: AtmosphereConfig,
    options: ModelOptions,
    mode: LuminanceMode,
    header: ShaderHeader,
    formats: TableFormats,
    textures: LookupTextures<D::Texture>,
    shader_source: String,
    shader: D::Shader,
}

impl<D: RenderDevice> Model<D> {
    pub fn new(device: &mut D, config: &AtmosphereConfig, options: &ModelOptions) -> Result<Self> {
        trace!("Model::new");
        config.validate().context("invalid atmosphere config")?;
        ensure!(
            options.num_precomputed_wavelengths > 0,
            "at least one wavelength must be precomputed"
        );

        let mode = LuminanceMode::from_num_wavelengths(options.num_precomputed_wavelengths);
        let header = ShaderHeader::new(config, mode, options.combine_scattering_textures)?;

        let precision = if options.half_precision {
            Precision::Half
        } else {
            Precision::Full
        };
        let rgb_render_targets = device.supports_rgb_render_target(precision);
        if !rgb_render_targets {
            info!("rgb float textures are not renderable, using rgba tables");
        }
        let formats = TableFormats::new(
            rgb_render_targets,
            precision,
            options.combine_scattering_textures,
        );
        let textures = LookupTextures::new(device, &formats)?;

        let shader_source = format!(
            "{}{}{}",
            header.generate(&reference_lambdas()),
            mode.api_defines(),
            ATMOSPHERE_GLSL
        );
        let shader = match device.create_shader(ShaderStage::Fragment, "atmosphere-api", &shader_source)
        {
            Ok(shader) => shader,
            Err(e) => {
                textures.destroy(device);
                return Err(e);
            }
        };

        Ok(Self {
            config: config.to_owned(),
            options: *options,
            mode,
            header,
            formats,
            textures,
            shader_source,
            shader,
        })
    }

    /// Precompute the lookup tables with `num_scattering_orders` orders of
    /// scattering. May be called again; each call replaces the tables.
    pub fn init(&mut self, device: &mut D, num_scattering_orders: u32) -> Result<()> {
        trace!("Model::init({})", num_scattering_orders);
        ensure!(
            num_scattering_orders >= 1,
            "at least one scattering order is required"
        );
        let start = Instant::now();
        let mut scratch = Scratch::new(device, &self.formats)?;
        let result = self.fill_tables(device, &mut scratch, num_scattering_orders);
        scratch.destroy(device);
        result?;
        let time = start.elapsed();
        info!(
            "atmosphere precompute ({:?}, {} orders): {}.{:03}ms",
            self.mode,
            num_scattering_orders,
            time.as_millis(),
            time.subsec_micros() % 1000
        );
        Ok(())
    }

    fn fill_tables(
        &self,
        device: &mut D,
        scratch: &mut Scratch<D>,
        num_scattering_orders: u32,
    ) -> Result<()> {
        precompute(
            device,
            &self.header,
            scratch,
            &self.textures,
            &self.mode.passes(),
            num_scattering_orders,
        )?;
        if self.mode.recomputes_transmittance() {
            recompute_transmittance(
                device,
                &self.header,
                scratch,
                &self.textures,
                &reference_lambdas(),
            )?;
        }
        Ok(())
    }

    /// Bind the lookup tables to the samplers that `shader()` declares in
    /// `program`. When single Mie scattering is combined, its sampler gets
    /// the scattering table.
    pub fn set_program_uniforms(
        &self,
        device: &mut D,
        program: &D::Program,
        units: TextureUnits,
    ) -> Result<()> {
        device.bind_texture(
            program,
            "transmittance_texture",
            &self.textures.transmittance,
            units.transmittance,
        )?;
        device.bind_texture(
            program,
            "scattering_texture",
            &self.textures.scattering,
            units.scattering,
        )?;
        device.bind_texture(
            program,
            "irradiance_texture",
            &self.textures.irradiance,
            units.irradiance,
        )?;
        let single_mie_scattering = match &self.textures.single_mie_scattering {
            MieScattering::Combined => &self.textures.scattering,
            MieScattering::Separate(texture) => texture,
        };
        device.bind_texture(
            program,
            "single_mie_scattering_texture",
            single_mie_scattering,
            units.single_mie_scattering,
        )
    }

    pub fn config(&self) -> &AtmosphereConfig {
        &self.config
    }

    pub fn options(&self) -> &ModelOptions {
        &self.options
    }

    pub fn mode(&self) -> LuminanceMode {
        self.mode
    }

    pub fn header(&self) -> &ShaderHeader {
        &self.header
    }

    pub fn transmittance_texture(&self) -> &D::Texture {
        &self.textures.transmittance
    }

    pub fn scattering_texture(&self) -> &D::Texture {
        &self.textures.scattering
    }

    pub fn single_mie_scattering_texture(&self) -> Option<&D::Texture> {
        self.textures.single_mie_scattering.texture()
    }

    pub fn irradiance_texture(&self) -> &D::Texture {
        &self.textures.irradiance
    }

    /// The compiled API fragment shader, to be linked with a program's own
    /// shaders.
    pub fn shader(&self) -> &D::Shader {
        &self.shader
    }

    pub fn shader_source(&self) -> &str {
        &self.shader_source
    }

    pub fn destroy(self, device: &mut D) {
        self.textures.destroy(device);
        device.destroy_shader(self.shader);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::earth_consts::EarthOptions;
    use gpu::{build_program, Command, RecordingDevice, TextureFormat};

    fn earth() -> AtmosphereConfig {
        AtmosphereConfig::earth(&EarthOptions::default(), &ModelOptions::default())
    }

    #[test]
    fn test_radiance_model() -> Result<()> {
        let mut device = RecordingDevice::default();
        let model = Model::new(&mut device, &earth(), &ModelOptions::default())?;
        assert_eq!(model.mode(), LuminanceMode::Radiance);
        assert!(model.shader_source().contains("#define RADIANCE_API_ENABLED\n"));
        assert!(model.shader_source().contains("vec3 GetSkyLuminance("));
        assert!(model
            .shader_source()
            .starts_with(&model.header().generate(&reference_lambdas())));
        assert!(model.single_mie_scattering_texture().is_none());
        assert_eq!(device.live_textures(), 3);
        assert_eq!(device.live_shaders(), 1);
        model.destroy(&mut device);
        assert_eq!(device.live_textures(), 0);
        assert_eq!(device.live_shaders(), 0);
        Ok(())
    }

    #[test]
    fn test_illuminance_model() -> Result<()> {
        let mut device = RecordingDevice::default();
        let options = ModelOptions {
            num_precomputed_wavelengths: 15,
            ..Default::default()
        };
        let mut model = Model::new(&mut device, &earth(), &options)?;
        assert_eq!(
            model.mode(),
            LuminanceMode::PrecomputedIlluminance { iterations: 5 }
        );
        assert!(!model.shader_source().contains("RADIANCE_API_ENABLED"));

        device.clear_commands();
        model.init(&mut device, 2)?;
        let links = device
            .commands()
            .iter()
            .filter(|c| {
                matches!(c, Command::LinkProgram { label } if label == "atmosphere-compute-transmittance")
            })
            .count();
        assert_eq!(links, 6);

        // The transmittance table ends up at the reference wavelengths.
        let reference = model.header().generate(&reference_lambdas());
        let last = device.draws().last();
        assert!(last.map_or(false, |d| d.program == "atmosphere-compute-transmittance"
            && d.fragment.starts_with(reference.as_str())));

        // Scratch state is gone.
        assert_eq!(device.live_textures(), 3);
        assert_eq!(device.live_framebuffers(), 0);
        assert_eq!(device.live_programs(), 0);
        model.destroy(&mut device);
        Ok(())
    }

    #[test]
    fn test_rejects_bad_input() -> Result<()> {
        let mut device = RecordingDevice::default();
        let mut config = earth();
        config.bottom_radius = config.top_radius;
        assert!(Model::new(&mut device, &config, &ModelOptions::default()).is_err());

        let mut dark = earth();
        dark.solar_irradiance = vec![0.0; dark.wavelengths.len()];
        assert!(Model::new(&mut device, &dark, &ModelOptions::default()).is_err());

        let options = ModelOptions {
            num_precomputed_wavelengths: 0,
            ..Default::default()
        };
        assert!(Model::new(&mut device, &earth(), &options).is_err());
        assert_eq!(device.commands().len(), 0);

        let mut model = Model::new(&mut device, &earth(), &ModelOptions::default())?;
        assert!(model.init(&mut device, 0).is_err());
        model.destroy(&mut device);
        Ok(())
    }

    #[test]
    fn test_api_compile_failure() {
        let mut device = RecordingDevice::default();
        device.fail_compile("atmosphere-api");
        let err = Model::new(&mut device, &earth(), &ModelOptions::default())
            .err()
            .map(|e| e.to_string())
            .unwrap_or_default();
        assert!(err.contains("atmosphere-api"));
        assert_eq!(device.live_textures(), 0);
    }

    #[test]
    fn test_init_failure_releases_scratch() -> Result<()> {
        let mut device = RecordingDevice::default();
        let mut model = Model::new(&mut device, &earth(), &ModelOptions::default())?;
        device.fail_compile("atmosphere-compute-multiple-scattering");
        assert!(model.init(&mut device, 4).is_err());
        assert_eq!(device.live_textures(), 3);
        assert_eq!(device.live_framebuffers(), 0);
        assert_eq!(device.live_programs(), 0);
        model.destroy(&mut device);
        Ok(())
    }

    #[test]
    fn test_rgba_fallback() -> Result<()> {
        let mut device = RecordingDevice::without_rgb_render_targets();
        let options = ModelOptions {
            combine_scattering_textures: false,
            ..Default::default()
        };
        let mut model = Model::new(&mut device, &earth(), &options)?;
        model.init(&mut device, 2)?;
        assert!(device.created_textures().all(|c| matches!(
            c,
            Command::CreateTexture {
                format: TextureFormat::Rgba,
                ..
            }
        )));
        model.destroy(&mut device);
        Ok(())
    }

    #[test]
    fn test_set_program_uniforms() -> Result<()> {
        let mut device = RecordingDevice::default();
        let model = Model::new(&mut device, &earth(), &ModelOptions::default())?;
        let program = build_program(
            &mut device,
            "sky",
            crate::FULLSCREEN_VERTEX_SHADER,
            None,
            model.shader_source(),
        )?;
        device.clear_commands();
        model.set_program_uniforms(&mut device, &program, TextureUnits::default())?;
        let bindings = device
            .commands()
            .iter()
            .filter_map(|c| match c {
                Command::BindTexture {
                    name, texture, unit, ..
                } => Some((name.as_str(), texture.as_str(), *unit)),
                _ => None,
            })
            .collect::<Vec<_>>();
        assert_eq!(
            bindings,
            vec![
                ("transmittance_texture", "atmosphere-transmittance-texture", 0),
                ("scattering_texture", "atmosphere-scattering-texture", 1),
                ("irradiance_texture", "atmosphere-irradiance-texture", 2),
                (
                    "single_mie_scattering_texture",
                    "atmosphere-scattering-texture",
                    3
                ),
            ]
        );
        device.destroy_program(program);
        model.destroy(&mut device);
        Ok(())
    }
}
