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
use anyhow::{ensure, Result};
use atmosphere::{Model, TextureUnits, FULLSCREEN_VERTEX_SHADER};
use gpu::{
    ColorTarget, Extent3d, Precision, RenderDevice, ShaderStage, TextureDescriptor,
    TextureDimension, TextureFormat, Uniform,
};
use log::{info, warn};

const SKY_CHECK_SHADER: &str = include_str!("../shaders/sky_check.frag.glsl");

// 50m above the ground, in kilometers from the planet center.
const CAMERA_ALTITUDE: f32 = 0.05;
const VIEW_DIRECTION: [f32; 3] = [1.0, 0.0, 0.02];
const SUN_ZENITH: [f32; 3] = [0.0, 0.0, 1.0];
const SUN_NADIR: [f32; 3] = [0.0, 0.0, -1.0];
// The day sky must be at least this much brighter than the night sky.
const MIN_DAY_NIGHT_RATIO: f32 = 100.0;

fn luminance(rgb: &[f32; 3]) -> f32 {
    0.2126 * rgb[0] + 0.7152 * rgb[1] + 0.0722 * rgb[2]
}

/// Compare the horizon luminance with the sun overhead and below the planet.
pub fn evaluate(day: &[f32; 3], night: &[f32; 3]) -> Result<()> {
    ensure!(
        day.iter().chain(night.iter()).all(|v| v.is_finite()),
        "sky luminance is not finite: day {:?}, night {:?}",
        day,
        night
    );
    let (day_luminance, night_luminance) = (luminance(day), luminance(night));
    ensure!(
        day_luminance > 0.0 && day_luminance > night_luminance * MIN_DAY_NIGHT_RATIO,
        "day sky ({}) is not brighter than night sky ({})",
        day_luminance,
        night_luminance
    );
    if day[2] <= day[0] {
        warn!("day sky at the horizon is not blue: {:?}", day);
    }
    Ok(())
}

struct SkyCheck<D: RenderDevice> {
    program: D::Program,
    target: D::Texture,
}

impl<D: RenderDevice> SkyCheck<D> {
    fn new(device: &mut D, model: &Model<D>) -> Result<Self> {
        let vertex = device.create_shader(
            ShaderStage::Vertex,
            "atmosphere-sky-check",
            FULLSCREEN_VERTEX_SHADER,
        )?;
        let fragment =
            device.create_shader(ShaderStage::Fragment, "atmosphere-sky-check", SKY_CHECK_SHADER);
        let program = fragment.and_then(|fragment| {
            let program =
                device.link_program("atmosphere-sky-check", &[&vertex, model.shader(), &fragment]);
            device.destroy_shader(fragment);
            program
        });
        device.destroy_shader(vertex);
        let program = program?;
        let target = device.create_texture(&TextureDescriptor {
            label: "atmosphere-sky-check-target",
            dimension: TextureDimension::D2,
            extent: Extent3d::new_2d(4, 4),
            format: TextureFormat::Rgba,
            precision: Precision::Full,
        });
        match target {
            Ok(target) => Ok(Self { program, target }),
            Err(e) => {
                device.destroy_program(program);
                Err(e)
            }
        }
    }

    fn sample(
        &self,
        device: &mut D,
        framebuffer: &mut D::Framebuffer,
        model: &Model<D>,
        sun_direction: [f32; 3],
    ) -> Result<[f32; 3]> {
        let bottom_radius =
            (model.config().bottom_radius / model.config().length_unit_in_meters) as f32;
        model.set_program_uniforms(device, &self.program, TextureUnits::default())?;
        device.set_uniform(
            &self.program,
            "camera_position",
            Uniform::Vec3([0.0, 0.0, bottom_radius + CAMERA_ALTITUDE]),
        )?;
        device.set_uniform(&self.program, "view_direction", Uniform::Vec3(VIEW_DIRECTION))?;
        device.set_uniform(&self.program, "sun_dir", Uniform::Vec3(sun_direction))?;
        device.draw_fullscreen_quad(
            framebuffer,
            &self.program,
            &[ColorTarget::overwrite(&self.target)],
        )?;
        let texels = device.read_texture(&self.target)?;
        let mut sum = [0f32; 3];
        for texel in texels.chunks_exact(4) {
            for (acc, v) in sum.iter_mut().zip(texel) {
                *acc += v;
            }
        }
        let count = (texels.len() / 4).max(1) as f32;
        Ok([sum[0] / count, sum[1] / count, sum[2] / count])
    }

    fn destroy(self, device: &mut D) {
        device.destroy_texture(self.target);
        device.destroy_program(self.program);
    }
}

/// Render the horizon luminance for a camera just above the ground with the
/// sun at the zenith and at the nadir, and fail unless the former is much
/// brighter.
pub fn check_sky<D: RenderDevice>(device: &mut D, model: &Model<D>) -> Result<()> {
    let check = SkyCheck::new(device, model)?;
    let mut framebuffer = match device.create_framebuffer() {
        Ok(framebuffer) => framebuffer,
        Err(e) => {
            check.destroy(device);
            return Err(e);
        }
    };
    let samples = check
        .sample(device, &mut framebuffer, model, SUN_ZENITH)
        .and_then(|day| {
            let night = check.sample(device, &mut framebuffer, model, SUN_NADIR)?;
            Ok((day, night))
        });
    device.destroy_framebuffer(framebuffer);
    check.destroy(device);
    let (day, night) = samples?;
    info!("horizon luminance: day {:?}, night {:?}", day, night);
    evaluate(&day, &night)
}

#[cfg(test)]
mod test {
    use super::*;
    use atmosphere::{AtmosphereConfig, EarthOptions, ModelOptions};
    use gpu::{Command, RecordingDevice};

    #[test]
    fn test_evaluate() {
        assert!(evaluate(&[5.0, 6.0, 8.0], &[0.0, 0.0, 0.0]).is_ok());
        assert!(evaluate(&[5.0, 6.0, 8.0], &[0.1, 0.1, 0.1]).is_ok());
        // Red skies are suspicious but not fatal.
        assert!(evaluate(&[8.0, 6.0, 5.0], &[0.0, 0.0, 0.0]).is_ok());
        assert!(evaluate(&[1.0, 1.0, 1.0], &[1.0, 1.0, 1.0]).is_err());
        assert!(evaluate(&[0.0, 0.0, 0.0], &[0.0, 0.0, 0.0]).is_err());
        assert!(evaluate(&[f32::NAN, 1.0, 1.0], &[0.0, 0.0, 0.0]).is_err());
    }

    #[test]
    fn test_check_sky_draws_twice() -> Result<()> {
        let mut device = RecordingDevice::default();
        let config = AtmosphereConfig::earth(&EarthOptions::default(), &ModelOptions::default());
        let model = Model::new(&mut device, &config, &ModelOptions::default())?;
        device.clear_commands();
        // Every draw writes the same value on this device, so the check fails.
        assert!(check_sky(&mut device, &model).is_err());
        let suns = device
            .commands()
            .iter()
            .filter_map(|c| match c {
                Command::SetUniform {
                    name,
                    value: Uniform::Vec3(v),
                    ..
                } if name == "sun_dir" => Some(*v),
                _ => None,
            })
            .collect::<Vec<_>>();
        assert_eq!(suns, vec![SUN_ZENITH, SUN_NADIR]);
        assert_eq!(device.draws().count(), 2);
        assert_eq!(device.live_programs(), 0);
        assert_eq!(device.live_framebuffers(), 0);
        assert_eq!(device.live_textures(), 3);
        model.destroy(&mut device);
        Ok(())
    }
}
