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
    luminance::WavelengthPass,
    shader_header::ShaderHeader,
    tables::{
        LookupTextures, MieScattering, TableFormats, IRRADIANCE_EXTENT, SCATTERING_EXTENT,
    },
};
use anyhow::{anyhow, Result};
use gpu::{build_program, create_textures, ColorTarget, RenderDevice, Uniform};
use log::debug;
use nalgebra::{Matrix3, Vector3};
use std::time::Instant;

pub const FULLSCREEN_VERTEX_SHADER: &str = include_str!("../shaders/fullscreen.vert.glsl");
const LAYER_GEOMETRY_SHADER: &str = include_str!("../shaders/layer.geom.glsl");
const COMPUTE_TRANSMITTANCE_SHADER: &str =
    include_str!("../shaders/compute_transmittance.frag.glsl");
const COMPUTE_DIRECT_IRRADIANCE_SHADER: &str =
    include_str!("../shaders/compute_direct_irradiance.frag.glsl");
const COMPUTE_SINGLE_SCATTERING_SHADER: &str =
    include_str!("../shaders/compute_single_scattering.frag.glsl");
const COMPUTE_SCATTERING_DENSITY_SHADER: &str =
    include_str!("../shaders/compute_scattering_density.frag.glsl");
const COMPUTE_INDIRECT_IRRADIANCE_SHADER: &str =
    include_str!("../shaders/compute_indirect_irradiance.frag.glsl");
const COMPUTE_MULTIPLE_SCATTERING_SHADER: &str =
    include_str!("../shaders/compute_multiple_scattering.frag.glsl");

fn report_time(stage: &str, lambdas: &Vector3<f64>, start: Instant) {
    let time = start.elapsed();
    debug!(
        "{:<20}[{:.1}, {:.1}, {:.1}]: {}.{:03}ms",
        stage,
        lambdas.x,
        lambdas.y,
        lambdas.z,
        time.as_millis(),
        time.subsec_micros() % 1000
    );
}

fn matrix_uniform(m: &Matrix3<f64>) -> Uniform {
    let m = m.cast::<f32>();
    let mut values = [0f32; 9];
    // nalgebra storage is column-major, as is GLSL's.
    values.copy_from_slice(m.as_slice());
    Uniform::Mat3(values)
}

/// Temporary state of one model initialization: the framebuffer that every
/// pass draws with, and the delta textures holding the contribution of the
/// current scattering order.
///
/// There is no separate texture for the multiple scattering delta. Once the
/// second order starts, the single Rayleigh values are folded into the
/// persistent scattering table and their texture is reused.
pub struct Scratch<D: RenderDevice> {
    framebuffer: D::Framebuffer,
    delta_irradiance: D::Texture,
    delta_rayleigh_scattering: D::Texture,
    delta_mie_scattering: D::Texture,
    delta_scattering_density: D::Texture,
}

impl<D: RenderDevice> Scratch<D> {
    pub fn new(device: &mut D, formats: &TableFormats) -> Result<Self> {
        let framebuffer = device.create_framebuffer()?;
        let textures = create_textures(
            device,
            [
                &TableFormats::table_2d("atmosphere-delta-irradiance-texture", IRRADIANCE_EXTENT),
                &formats.table_3d("atmosphere-delta-rayleigh-scattering-texture", formats.rgb),
                &formats.table_3d("atmosphere-delta-mie-scattering-texture", formats.rgb),
                &formats.table_3d("atmosphere-delta-scattering-density-texture", formats.rgb),
            ],
        );
        match textures {
            Ok(
                [delta_irradiance, delta_rayleigh_scattering, delta_mie_scattering, delta_scattering_density],
            ) => Ok(Self {
                framebuffer,
                delta_irradiance,
                delta_rayleigh_scattering,
                delta_mie_scattering,
                delta_scattering_density,
            }),
            Err(e) => {
                device.destroy_framebuffer(framebuffer);
                Err(e)
            }
        }
    }

    pub fn destroy(self, device: &mut D) {
        device.destroy_texture(self.delta_irradiance);
        device.destroy_texture(self.delta_rayleigh_scattering);
        device.destroy_texture(self.delta_mie_scattering);
        device.destroy_texture(self.delta_scattering_density);
        device.destroy_framebuffer(self.framebuffer);
    }
}

/// The six precomputation programs, compiled against the header for one
/// wavelength triple.
pub struct Precompute<D: RenderDevice> {
    lambdas: Vector3<f64>,
    transmittance: D::Program,
    direct_irradiance: D::Program,
    single_scattering: D::Program,
    scattering_density: D::Program,
    indirect_irradiance: D::Program,
    multiple_scattering: D::Program,
}

impl<D: RenderDevice> Precompute<D> {
    pub fn new(device: &mut D, header: &ShaderHeader, lambdas: &Vector3<f64>) -> Result<Self> {
        let prelude = header.generate(lambdas);
        let stages = [
            ("atmosphere-compute-transmittance", false, COMPUTE_TRANSMITTANCE_SHADER),
            ("atmosphere-compute-direct-irradiance", false, COMPUTE_DIRECT_IRRADIANCE_SHADER),
            ("atmosphere-compute-single-scattering", true, COMPUTE_SINGLE_SCATTERING_SHADER),
            ("atmosphere-compute-scattering-density", true, COMPUTE_SCATTERING_DENSITY_SHADER),
            ("atmosphere-compute-indirect-irradiance", false, COMPUTE_INDIRECT_IRRADIANCE_SHADER),
            ("atmosphere-compute-multiple-scattering", true, COMPUTE_MULTIPLE_SCATTERING_SHADER),
        ];
        let mut programs = Vec::with_capacity(stages.len());
        for (label, layered, fragment) in stages {
            let geometry = if layered {
                Some(LAYER_GEOMETRY_SHADER)
            } else {
                None
            };
            let source = format!("{}{}", prelude, fragment);
            match build_program(device, label, FULLSCREEN_VERTEX_SHADER, geometry, &source) {
                Ok(program) => programs.push(program),
                Err(e) => {
                    for program in programs {
                        device.destroy_program(program);
                    }
                    return Err(e);
                }
            }
        }
        let [transmittance, direct_irradiance, single_scattering, scattering_density, indirect_irradiance, multiple_scattering]: [D::Program; 6] =
            programs
                .try_into()
                .map_err(|_| anyhow!("expected six precomputation programs"))?;
        Ok(Self {
            lambdas: *lambdas,
            transmittance,
            direct_irradiance,
            single_scattering,
            scattering_density,
            indirect_irradiance,
            multiple_scattering,
        })
    }

    pub fn destroy(self, device: &mut D) {
        device.destroy_program(self.transmittance);
        device.destroy_program(self.direct_irradiance);
        device.destroy_program(self.single_scattering);
        device.destroy_program(self.scattering_density);
        device.destroy_program(self.indirect_irradiance);
        device.destroy_program(self.multiple_scattering);
    }

    /// Fill the lookup tables for one wavelength pass, computing scattering
    /// orders 1 through `num_scattering_orders`.
    ///
    /// With `pass.blend` unset the persistent tables are replaced, otherwise
    /// this pass's luminance is added to them. The transmittance table is
    /// always replaced.
    pub fn run(
        &self,
        device: &mut D,
        scratch: &mut Scratch<D>,
        textures: &LookupTextures<D::Texture>,
        pass: &WavelengthPass,
        num_scattering_orders: u32,
    ) -> Result<()> {
        let Scratch {
            framebuffer,
            delta_irradiance,
            delta_rayleigh_scattering,
            delta_mie_scattering,
            delta_scattering_density,
        } = scratch;
        // Multiple scattering deltas overwrite the single Rayleigh deltas.
        let delta_multiple_scattering = &*delta_rayleigh_scattering;
        let luminance_from_radiance = matrix_uniform(&pass.luminance_from_radiance);
        let lambdas = &self.lambdas;

        let start = Instant::now();
        device.draw_fullscreen_quad(
            framebuffer,
            &self.transmittance,
            &[ColorTarget::overwrite(&textures.transmittance)],
        )?;
        report_time("transmittance", lambdas, start);

        let start = Instant::now();
        device.bind_texture(
            &self.direct_irradiance,
            "transmittance_texture",
            &textures.transmittance,
            0,
        )?;
        device.draw_fullscreen_quad(
            framebuffer,
            &self.direct_irradiance,
            &[
                ColorTarget::overwrite(&*delta_irradiance),
                ColorTarget::new(&textures.irradiance, pass.blend),
            ],
        )?;
        report_time("direct-irradiance", lambdas, start);

        let start = Instant::now();
        let program = &self.single_scattering;
        device.set_uniform(
            program,
            "luminance_from_radiance",
            luminance_from_radiance.clone(),
        )?;
        device.bind_texture(program, "transmittance_texture", &textures.transmittance, 0)?;
        for layer in 0..SCATTERING_EXTENT.depth {
            device.set_uniform(program, "layer", Uniform::Int(layer as i32))?;
            let mut targets = vec![
                ColorTarget::overwrite(&*delta_rayleigh_scattering),
                ColorTarget::overwrite(&*delta_mie_scattering),
                ColorTarget::new(&textures.scattering, pass.blend),
            ];
            if let MieScattering::Separate(single_mie_scattering) = &textures.single_mie_scattering
            {
                targets.push(ColorTarget::new(single_mie_scattering, pass.blend));
            }
            device.draw_fullscreen_quad(framebuffer, program, &targets)?;
        }
        report_time("single-scattering", lambdas, start);

        for scattering_order in 2..=num_scattering_orders as i32 {
            let start = Instant::now();
            let program = &self.scattering_density;
            device.bind_texture(program, "transmittance_texture", &textures.transmittance, 0)?;
            device.bind_texture(
                program,
                "single_rayleigh_scattering_texture",
                &*delta_rayleigh_scattering,
                1,
            )?;
            device.bind_texture(
                program,
                "single_mie_scattering_texture",
                &*delta_mie_scattering,
                2,
            )?;
            device.bind_texture(
                program,
                "multiple_scattering_texture",
                delta_multiple_scattering,
                3,
            )?;
            device.bind_texture(program, "irradiance_texture", &*delta_irradiance, 4)?;
            device.set_uniform(program, "scattering_order", Uniform::Int(scattering_order))?;
            for layer in 0..SCATTERING_EXTENT.depth {
                device.set_uniform(program, "layer", Uniform::Int(layer as i32))?;
                device.draw_fullscreen_quad(
                    framebuffer,
                    program,
                    &[ColorTarget::overwrite(&*delta_scattering_density)],
                )?;
            }
            report_time("scattering-density", lambdas, start);

            let start = Instant::now();
            let program = &self.indirect_irradiance;
            device.set_uniform(
                program,
                "luminance_from_radiance",
                luminance_from_radiance.clone(),
            )?;
            device.bind_texture(
                program,
                "single_rayleigh_scattering_texture",
                &*delta_rayleigh_scattering,
                1,
            )?;
            device.bind_texture(
                program,
                "single_mie_scattering_texture",
                &*delta_mie_scattering,
                2,
            )?;
            device.bind_texture(
                program,
                "multiple_scattering_texture",
                delta_multiple_scattering,
                3,
            )?;
            device.set_uniform(
                program,
                "scattering_order",
                Uniform::Int(scattering_order - 1),
            )?;
            device.draw_fullscreen_quad(
                framebuffer,
                program,
                &[
                    ColorTarget::overwrite(&*delta_irradiance),
                    ColorTarget::accumulate(&textures.irradiance),
                ],
            )?;
            report_time("indirect-irradiance", lambdas, start);

            let start = Instant::now();
            let program = &self.multiple_scattering;
            device.set_uniform(
                program,
                "luminance_from_radiance",
                luminance_from_radiance.clone(),
            )?;
            device.bind_texture(program, "transmittance_texture", &textures.transmittance, 0)?;
            device.bind_texture(
                program,
                "scattering_density_texture",
                &*delta_scattering_density,
                1,
            )?;
            for layer in 0..SCATTERING_EXTENT.depth {
                device.set_uniform(program, "layer", Uniform::Int(layer as i32))?;
                device.draw_fullscreen_quad(
                    framebuffer,
                    program,
                    &[
                        ColorTarget::overwrite(delta_multiple_scattering),
                        ColorTarget::accumulate(&textures.scattering),
                    ],
                )?;
            }
            report_time("multiple-scattering", lambdas, start);
        }
        Ok(())
    }
}

/// Run every pass in order, compiling and releasing the programs of each
/// pass around it.
pub fn precompute<D: RenderDevice>(
    device: &mut D,
    header: &ShaderHeader,
    scratch: &mut Scratch<D>,
    textures: &LookupTextures<D::Texture>,
    passes: &[WavelengthPass],
    num_scattering_orders: u32,
) -> Result<()> {
    for pass in passes {
        let programs = Precompute::new(device, header, &pass.lambdas)?;
        let result = programs.run(device, scratch, textures, pass, num_scattering_orders);
        programs.destroy(device);
        result?;
    }
    Ok(())
}

/// Replace the transmittance table with transmittance at `lambdas`.
pub fn recompute_transmittance<D: RenderDevice>(
    device: &mut D,
    header: &ShaderHeader,
    scratch: &mut Scratch<D>,
    textures: &LookupTextures<D::Texture>,
    lambdas: &Vector3<f64>,
) -> Result<()> {
    let start = Instant::now();
    let source = format!("{}{}", header.generate(lambdas), COMPUTE_TRANSMITTANCE_SHADER);
    let program = build_program(
        device,
        "atmosphere-compute-transmittance",
        FULLSCREEN_VERTEX_SHADER,
        None,
        &source,
    )?;
    let result = device.draw_fullscreen_quad(
        &mut scratch.framebuffer,
        &program,
        &[ColorTarget::overwrite(&textures.transmittance)],
    );
    device.destroy_program(program);
    report_time("transmittance", lambdas, start);
    result
}
