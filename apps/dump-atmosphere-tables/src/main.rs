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
mod sky_check;

use anyhow::{anyhow, Context, Result};
use atmosphere::{AtmosphereConfig, EarthOptions, Model, ModelOptions};
use gpu::{glow, Extent3d, GlDevice, GlTexture, RenderDevice};
use image::{ImageBuffer, Luma, Rgb};
use log::info;
use sdl2::video::GLProfile;
use std::{
    fs,
    path::{Path, PathBuf},
    time::Instant,
};
use structopt::StructOpt;

/// Precompute atmospheric scattering tables for an Earth-like planet
#[derive(Debug, StructOpt)]
struct Opt {
    /// Directory to write the tables into
    #[structopt(short, long, parse(from_os_str))]
    output: PathBuf,

    /// Number of wavelengths to precompute; more than 3 precomputes luminance
    #[structopt(short, long, default_value = "15")]
    wavelengths: usize,

    /// Number of scattering orders to compute
    #[structopt(short, long, default_value = "4")]
    scattering_orders: u32,

    /// Store single Mie scattering in its own texture
    #[structopt(long)]
    separate_textures: bool,

    /// Use 32 bit floats for the scattering tables
    #[structopt(long)]
    full_precision: bool,

    /// Use a constant solar spectrum instead of the measured one
    #[structopt(long)]
    constant_solar_spectrum: bool,

    /// Leave ozone out of the atmosphere
    #[structopt(long)]
    no_ozone: bool,

    /// Also write a PNG preview of every table layer
    #[structopt(long)]
    png: bool,

    /// Render the sky and check that it is plausible
    #[structopt(long)]
    check_sky: bool,
}

fn main() -> Result<()> {
    env_logger::init();
    let opt = Opt::from_args();

    let sdl = sdl2::init().map_err(|e| anyhow!("sdl init: {}", e))?;
    let video = sdl.video().map_err(|e| anyhow!("sdl video: {}", e))?;
    let gl_attr = video.gl_attr();
    gl_attr.set_context_profile(GLProfile::Core);
    gl_attr.set_context_version(3, 3);
    let window = video
        .window("dump-atmosphere-tables", 64, 64)
        .opengl()
        .hidden()
        .build()?;
    let _context = window
        .gl_create_context()
        .map_err(|e| anyhow!("creating GL context: {}", e))?;
    let gl = unsafe {
        glow::Context::from_loader_function(|name| video.gl_get_proc_address(name) as *const _)
    };
    let mut device = GlDevice::new(gl)?;

    let options = ModelOptions {
        num_precomputed_wavelengths: opt.wavelengths,
        combine_scattering_textures: !opt.separate_textures,
        half_precision: !opt.full_precision,
    };
    let config = AtmosphereConfig::earth(
        &EarthOptions {
            constant_solar_spectrum: opt.constant_solar_spectrum,
            use_ozone: !opt.no_ozone,
        },
        &options,
    );

    let mut model = Model::new(&mut device, &config, &options)?;
    let result = run(&opt, &mut device, &mut model);
    model.destroy(&mut device);
    result
}

fn run(opt: &Opt, device: &mut GlDevice, model: &mut Model<GlDevice>) -> Result<()> {
    let precompute_start = Instant::now();
    model.init(device, opt.scattering_orders)?;
    info!("precompute time: {:?}", precompute_start.elapsed());

    let write_start = Instant::now();
    fs::create_dir_all(&opt.output)
        .with_context(|| format!("creating {}", opt.output.display()))?;
    let mut tables = vec![
        ("transmittance", model.transmittance_texture()),
        ("irradiance", model.irradiance_texture()),
        ("scattering", model.scattering_texture()),
    ];
    if let Some(texture) = model.single_mie_scattering_texture() {
        tables.push(("single_mie_scattering", texture));
    }
    for (name, texture) in tables {
        let texels = device.read_texture(texture)?;
        show_range(&texels, name);
        write_table(&opt.output.join(format!("{}.f32.bin", name)), &texels)?;
        if opt.png {
            // The alpha channel only carries data for combined Mie scattering.
            let alpha = name == "scattering" && model.single_mie_scattering_texture().is_none();
            write_previews(&opt.output, name, texture, &texels, alpha)?;
        }
    }
    info!("write time: {:?}", write_start.elapsed());

    if opt.check_sky {
        sky_check::check_sky(device, model)?;
    }
    Ok(())
}

fn show_range(texels: &[f32], name: &str) {
    let (min, max) = texels
        .iter()
        .filter(|v| v.is_finite())
        .fold((f32::MAX, f32::MIN), |(lo, hi), v| (lo.min(*v), hi.max(*v)));
    info!("range of {}: {} -> {}", name, min, max);
}

// RGBA f32, rows of width texels, layer after layer.
fn write_table(path: &Path, texels: &[f32]) -> Result<()> {
    let bytes = texels
        .iter()
        .flat_map(|v| v.to_le_bytes())
        .collect::<Vec<u8>>();
    fs::write(path, bytes).with_context(|| format!("writing {}", path.display()))
}

// Map to [0, 255] relative to the brightest finite value of the table.
fn split_pixels(texels: &[f32]) -> (Vec<u8>, Vec<u8>) {
    let max = texels
        .iter()
        .filter(|v| v.is_finite())
        .fold(0f32, |hi, v| hi.max(*v));
    let scale = if max > 0.0 { 1.0 / max } else { 0.0 };
    let encode = |v: f32| {
        let v = (v * scale).clamp(0.0, 1.0).powf(1.0 / 2.2);
        if v.is_nan() {
            0
        } else {
            (v * 255.0) as u8
        }
    };
    let mut rgb = Vec::with_capacity(texels.len() / 4 * 3);
    let mut alpha = Vec::with_capacity(texels.len() / 4);
    for texel in texels.chunks_exact(4) {
        rgb.extend(texel[..3].iter().map(|v| encode(*v)));
        alpha.push(encode(texel[3]));
    }
    (rgb, alpha)
}

fn preview_name(dir: &Path, name: &str, extent: Extent3d, layer: u32) -> PathBuf {
    if extent.depth > 1 {
        dir.join(format!("{}-layer{:02}.png", name, layer))
    } else {
        dir.join(format!("{}.png", name))
    }
}

fn write_previews(
    dir: &Path,
    name: &str,
    texture: &GlTexture,
    texels: &[f32],
    alpha: bool,
) -> Result<()> {
    let extent = texture.extent();
    let (rgb, mie) = split_pixels(texels);
    let layer_pixels = (extent.width * extent.height) as usize;
    for layer in 0..extent.depth {
        let range = layer as usize * layer_pixels..(layer as usize + 1) * layer_pixels;
        let path = preview_name(dir, name, extent, layer);
        let data = rgb[range.start * 3..range.end * 3].to_vec();
        ImageBuffer::<Rgb<u8>, _>::from_raw(extent.width, extent.height, data)
            .ok_or_else(|| anyhow!("bad preview size for {}", name))?
            .save(&path)
            .with_context(|| format!("writing {}", path.display()))?;
        if alpha {
            let path = preview_name(dir, &format!("{}-mie", name), extent, layer);
            let data = mie[range].to_vec();
            ImageBuffer::<Luma<u8>, _>::from_raw(extent.width, extent.height, data)
                .ok_or_else(|| anyhow!("bad preview size for {}", name))?
                .save(&path)
                .with_context(|| format!("writing {}", path.display()))?;
        }
    }
    Ok(())
}
