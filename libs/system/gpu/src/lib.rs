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
mod gl;
mod recording;

pub use crate::{
    gl::{GlDevice, GlFramebuffer, GlProgram, GlShader, GlTexture},
    recording::{
        Command, DrawCall, RecordedFramebuffer, RecordedProgram, RecordedShader, RecordedTexture,
        RecordingDevice,
    },
};

// Note: re-export so that applications can build a context without a direct dependency.
pub use glow;

use anyhow::{anyhow, Result};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Extent3d {
    pub width: u32,
    pub height: u32,
    pub depth: u32,
}

impl Extent3d {
    pub const fn new_2d(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            depth: 1,
        }
    }

    pub const fn new_3d(width: u32, height: u32, depth: u32) -> Self {
        Self {
            width,
            height,
            depth,
        }
    }

    pub fn texel_count(&self) -> usize {
        self.width as usize * self.height as usize * self.depth as usize
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TextureDimension {
    D2,
    D3,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TextureFormat {
    Rgb,
    Rgba,
}

/// Storage precision of floating point texels.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Precision {
    Half,
    Full,
}

#[derive(Copy, Clone, Debug)]
pub struct TextureDescriptor<'a> {
    pub label: &'a str,
    pub dimension: TextureDimension,
    pub extent: Extent3d,
    pub format: TextureFormat,
    pub precision: Precision,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ShaderStage {
    Vertex,
    Geometry,
    Fragment,
}

/// Uniform values. Matrices are stored in column-major order.
#[derive(Clone, Debug, PartialEq)]
pub enum Uniform {
    Int(i32),
    Float(f32),
    Vec3([f32; 3]),
    Mat3([f32; 9]),
}

/// A color attachment for a draw. When `blend` is set, the fragment output
/// is added to the existing contents, otherwise it replaces them.
#[derive(Debug)]
pub struct ColorTarget<'a, T> {
    pub texture: &'a T,
    pub blend: bool,
}

impl<'a, T> Clone for ColorTarget<'a, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<'a, T> Copy for ColorTarget<'a, T> {}

impl<'a, T> ColorTarget<'a, T> {
    pub fn new(texture: &'a T, blend: bool) -> Self {
        Self { texture, blend }
    }

    pub fn overwrite(texture: &'a T) -> Self {
        Self::new(texture, false)
    }

    pub fn accumulate(texture: &'a T) -> Self {
        Self::new(texture, true)
    }
}

/// The small slice of a graphics API that precomputation needs: float
/// textures (2D and 3D), fragment programs, uniforms, and full screen quad
/// draws into a framebuffer with per-attachment additive blending.
///
/// When drawing into 3D textures, every target is attached as a layered
/// attachment and the program selects the destination slice through its
/// `layer` uniform.
pub trait RenderDevice {
    type Texture;
    type Framebuffer;
    type Shader;
    type Program;

    fn create_texture(&mut self, desc: &TextureDescriptor) -> Result<Self::Texture>;
    fn destroy_texture(&mut self, texture: Self::Texture);

    /// Report whether 3 channel float textures of the given precision can be
    /// used as render targets.
    fn supports_rgb_render_target(&mut self, precision: Precision) -> bool;

    fn create_framebuffer(&mut self) -> Result<Self::Framebuffer>;
    fn destroy_framebuffer(&mut self, framebuffer: Self::Framebuffer);

    fn create_shader(
        &mut self,
        stage: ShaderStage,
        label: &str,
        source: &str,
    ) -> Result<Self::Shader>;
    fn destroy_shader(&mut self, shader: Self::Shader);

    fn link_program(&mut self, label: &str, shaders: &[&Self::Shader]) -> Result<Self::Program>;
    fn destroy_program(&mut self, program: Self::Program);

    fn set_uniform(&mut self, program: &Self::Program, name: &str, value: Uniform)
        -> Result<()>;
    fn bind_texture(
        &mut self,
        program: &Self::Program,
        name: &str,
        texture: &Self::Texture,
        unit: u32,
    ) -> Result<()>;

    fn draw_fullscreen_quad(
        &mut self,
        framebuffer: &mut Self::Framebuffer,
        program: &Self::Program,
        targets: &[ColorTarget<Self::Texture>],
    ) -> Result<()>;

    /// Read back all texels as RGBA f32, layer after layer.
    fn read_texture(&mut self, texture: &Self::Texture) -> Result<Vec<f32>>;
}

/// Create every texture or none of them: on failure the textures that were
/// already created are destroyed again.
pub fn create_textures<D: RenderDevice, const N: usize>(
    device: &mut D,
    descs: [&TextureDescriptor; N],
) -> Result<[D::Texture; N]> {
    let mut textures = Vec::with_capacity(N);
    for desc in descs {
        match device.create_texture(desc) {
            Ok(texture) => textures.push(texture),
            Err(e) => {
                for texture in textures {
                    device.destroy_texture(texture);
                }
                return Err(e.context(format!("creating {}", desc.label)));
            }
        }
    }
    textures
        .try_into()
        .map_err(|v: Vec<D::Texture>| anyhow!("expected {} textures, got {}", N, v.len()))
}

/// Compile the given stages and link them. The intermediate shader objects
/// are released whether or not the link succeeds.
pub fn build_program<D: RenderDevice>(
    device: &mut D,
    label: &str,
    vertex: &str,
    geometry: Option<&str>,
    fragment: &str,
) -> Result<D::Program> {
    let stages = [
        (ShaderStage::Vertex, Some(vertex)),
        (ShaderStage::Geometry, geometry),
        (ShaderStage::Fragment, Some(fragment)),
    ];
    let mut shaders = Vec::with_capacity(stages.len());
    let mut compiled = Ok(());
    for (stage, source) in stages {
        if let Some(source) = source {
            match device.create_shader(stage, label, source) {
                Ok(shader) => shaders.push(shader),
                Err(e) => {
                    compiled = Err(e);
                    break;
                }
            }
        }
    }
    let program = compiled.and_then(|()| {
        let refs = shaders.iter().collect::<Vec<_>>();
        device.link_program(label, &refs)
    });
    for shader in shaders {
        device.destroy_shader(shader);
    }
    program
}

#[cfg(test)]
mod test {
    use super::*;

    const VERT: &str = "#version 330\nvoid main() {}";
    const FRAG: &str = "#version 330\nvoid main() {}";

    #[test]
    fn test_build_program_releases_shaders() -> Result<()> {
        let mut device = RecordingDevice::default();
        let program = build_program(&mut device, "test", VERT, Some(VERT), FRAG)?;
        assert_eq!(device.live_shaders(), 0);
        assert_eq!(device.live_programs(), 1);
        device.destroy_program(program);
        assert_eq!(device.live_programs(), 0);
        Ok(())
    }

    #[test]
    fn test_build_program_reports_compile_failure() {
        let mut device = RecordingDevice::default();
        device.fail_compile("broken");
        let err = build_program(&mut device, "broken", VERT, None, FRAG)
            .err()
            .map(|e| e.to_string())
            .unwrap_or_default();
        assert!(err.contains("broken"));
        assert_eq!(device.live_shaders(), 0);
        assert_eq!(device.live_programs(), 0);
    }

    #[test]
    fn test_create_textures_is_all_or_nothing() -> Result<()> {
        let mut device = RecordingDevice::default();
        let good = TextureDescriptor {
            label: "good",
            dimension: TextureDimension::D2,
            extent: Extent3d::new_2d(4, 4),
            format: TextureFormat::Rgba,
            precision: Precision::Full,
        };
        let bad = TextureDescriptor {
            label: "bad",
            extent: Extent3d::new_2d(0, 4),
            ..good
        };
        assert!(create_textures(&mut device, [&good, &good, &bad]).is_err());
        assert_eq!(device.live_textures(), 0);

        let [a, b] = create_textures(&mut device, [&good, &good])?;
        assert_eq!(device.live_textures(), 2);
        device.destroy_texture(a);
        device.destroy_texture(b);
        Ok(())
    }

    #[test]
    fn test_extent_texel_count() {
        assert_eq!(Extent3d::new_2d(256, 64).texel_count(), 256 * 64);
        assert_eq!(Extent3d::new_3d(256, 128, 32).texel_count(), 256 * 128 * 32);
    }
}
