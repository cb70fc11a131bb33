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
    ColorTarget, Extent3d, Precision, RenderDevice, ShaderStage, TextureDescriptor,
    TextureDimension, TextureFormat, Uniform,
};
use anyhow::{bail, ensure, Result};
use glow::HasContext;
use log::{debug, info, trace};

const QUAD_VERTICES: [f32; 8] = [-1.0, -1.0, 1.0, -1.0, -1.0, 1.0, 1.0, 1.0];

fn internal_format(format: TextureFormat, precision: Precision) -> u32 {
    match (format, precision) {
        (TextureFormat::Rgb, Precision::Half) => glow::RGB16F,
        (TextureFormat::Rgb, Precision::Full) => glow::RGB32F,
        (TextureFormat::Rgba, Precision::Half) => glow::RGBA16F,
        (TextureFormat::Rgba, Precision::Full) => glow::RGBA32F,
    }
}

fn pixel_format(format: TextureFormat) -> u32 {
    match format {
        TextureFormat::Rgb => glow::RGB,
        TextureFormat::Rgba => glow::RGBA,
    }
}

#[derive(Debug)]
pub struct GlTexture {
    raw: glow::Texture,
    dimension: TextureDimension,
    extent: Extent3d,
    label: String,
}

impl GlTexture {
    pub fn extent(&self) -> Extent3d {
        self.extent
    }

    fn target(&self) -> u32 {
        match self.dimension {
            TextureDimension::D2 => glow::TEXTURE_2D,
            TextureDimension::D3 => glow::TEXTURE_3D,
        }
    }
}

#[derive(Debug)]
pub struct GlFramebuffer {
    raw: glow::Framebuffer,
    attached: Vec<glow::Texture>,
}

#[derive(Debug)]
pub struct GlShader {
    raw: glow::Shader,
    label: String,
    source: String,
}

#[derive(Debug)]
pub struct GlProgram {
    raw: glow::Program,
    label: String,
}

/// A `RenderDevice` on top of an OpenGL 3.3 core context.
pub struct GlDevice {
    gl: glow::Context,
    quad_vertex_array: glow::VertexArray,
    quad_vertex_buffer: glow::Buffer,
}

impl GlDevice {
    pub fn new(gl: glow::Context) -> Result<Self> {
        let version = gl.version();
        info!(
            "OpenGL {}.{} {}",
            version.major, version.minor, version.vendor_info
        );
        ensure!(
            version.is_embedded || (version.major, version.minor) >= (3, 3),
            "OpenGL 3.3 or later is required, found {}.{}",
            version.major,
            version.minor
        );

        let bytes = QUAD_VERTICES
            .iter()
            .flat_map(|v| v.to_ne_bytes())
            .collect::<Vec<u8>>();
        let (quad_vertex_array, quad_vertex_buffer) = unsafe {
            let vao = gl.create_vertex_array().map_err(anyhow::Error::msg)?;
            let vbo = gl.create_buffer().map_err(anyhow::Error::msg)?;
            gl.bind_vertex_array(Some(vao));
            gl.bind_buffer(glow::ARRAY_BUFFER, Some(vbo));
            gl.buffer_data_u8_slice(glow::ARRAY_BUFFER, &bytes, glow::STATIC_DRAW);
            gl.vertex_attrib_pointer_f32(0, 2, glow::FLOAT, false, 0, 0);
            gl.enable_vertex_attrib_array(0);
            gl.bind_vertex_array(None);
            gl.bind_buffer(glow::ARRAY_BUFFER, None);
            (vao, vbo)
        };

        Ok(Self {
            gl,
            quad_vertex_array,
            quad_vertex_buffer,
        })
    }

    fn check_error(&self, context: &str) -> Result<()> {
        let err = unsafe { self.gl.get_error() };
        match err {
            glow::NO_ERROR => Ok(()),
            glow::OUT_OF_MEMORY => bail!("out of GPU memory in {}", context),
            code => bail!("GL error 0x{:X} in {}", code, context),
        }
    }

    fn attach(&mut self, framebuffer: &mut GlFramebuffer, textures: &[glow::Texture]) -> Result<()> {
        if framebuffer.attached == textures {
            return Ok(());
        }
        unsafe {
            for i in textures.len()..framebuffer.attached.len() {
                self.gl.framebuffer_texture(
                    glow::FRAMEBUFFER,
                    glow::COLOR_ATTACHMENT0 + i as u32,
                    None,
                    0,
                );
            }
            for (i, texture) in textures.iter().enumerate() {
                self.gl.framebuffer_texture(
                    glow::FRAMEBUFFER,
                    glow::COLOR_ATTACHMENT0 + i as u32,
                    Some(*texture),
                    0,
                );
            }
            let draw_buffers = (0..textures.len() as u32)
                .map(|i| glow::COLOR_ATTACHMENT0 + i)
                .collect::<Vec<_>>();
            self.gl.draw_buffers(&draw_buffers);
            let status = self.gl.check_framebuffer_status(glow::FRAMEBUFFER);
            if status != glow::FRAMEBUFFER_COMPLETE {
                framebuffer.attached.clear();
                bail!("framebuffer incomplete: status 0x{:X}", status);
            }
        }
        framebuffer.attached = textures.to_vec();
        Ok(())
    }
}

impl Drop for GlDevice {
    fn drop(&mut self) {
        unsafe {
            self.gl.delete_vertex_array(self.quad_vertex_array);
            self.gl.delete_buffer(self.quad_vertex_buffer);
        }
    }
}

impl RenderDevice for GlDevice {
    type Texture = GlTexture;
    type Framebuffer = GlFramebuffer;
    type Shader = GlShader;
    type Program = GlProgram;

    fn create_texture(&mut self, desc: &TextureDescriptor) -> Result<GlTexture> {
        trace!("create_texture({}, {:?})", desc.label, desc.extent);
        let internal = internal_format(desc.format, desc.precision) as i32;
        let raw = unsafe { self.gl.create_texture() }.map_err(anyhow::Error::msg)?;
        let texture = GlTexture {
            raw,
            dimension: desc.dimension,
            extent: desc.extent,
            label: desc.label.to_owned(),
        };
        let target = texture.target();
        unsafe {
            self.gl.bind_texture(target, Some(raw));
            self.gl
                .tex_parameter_i32(target, glow::TEXTURE_MIN_FILTER, glow::LINEAR as i32);
            self.gl
                .tex_parameter_i32(target, glow::TEXTURE_MAG_FILTER, glow::LINEAR as i32);
            self.gl
                .tex_parameter_i32(target, glow::TEXTURE_WRAP_S, glow::CLAMP_TO_EDGE as i32);
            self.gl
                .tex_parameter_i32(target, glow::TEXTURE_WRAP_T, glow::CLAMP_TO_EDGE as i32);
            match desc.dimension {
                TextureDimension::D2 => self.gl.tex_image_2d(
                    target,
                    0,
                    internal,
                    desc.extent.width as i32,
                    desc.extent.height as i32,
                    0,
                    pixel_format(desc.format),
                    glow::FLOAT,
                    glow::PixelUnpackData::Slice(None),
                ),
                TextureDimension::D3 => {
                    self.gl.tex_parameter_i32(
                        target,
                        glow::TEXTURE_WRAP_R,
                        glow::CLAMP_TO_EDGE as i32,
                    );
                    self.gl.tex_image_3d(
                        target,
                        0,
                        internal,
                        desc.extent.width as i32,
                        desc.extent.height as i32,
                        desc.extent.depth as i32,
                        0,
                        pixel_format(desc.format),
                        glow::FLOAT,
                        glow::PixelUnpackData::Slice(None),
                    )
                }
            }
            self.gl.bind_texture(target, None);
        }
        if let Err(e) = self.check_error(desc.label) {
            self.destroy_texture(texture);
            return Err(e);
        }
        Ok(texture)
    }

    fn destroy_texture(&mut self, texture: GlTexture) {
        trace!("destroy_texture({})", texture.label);
        unsafe { self.gl.delete_texture(texture.raw) };
    }

    fn supports_rgb_render_target(&mut self, precision: Precision) -> bool {
        let probe = TextureDescriptor {
            label: "rgb-render-target-probe",
            dimension: TextureDimension::D2,
            extent: Extent3d::new_2d(1, 1),
            format: TextureFormat::Rgb,
            precision,
        };
        let texture = match self.create_texture(&probe) {
            Ok(texture) => texture,
            Err(_) => return false,
        };
        let supported = unsafe {
            match self.gl.create_framebuffer() {
                Ok(fbo) => {
                    self.gl.bind_framebuffer(glow::FRAMEBUFFER, Some(fbo));
                    self.gl.framebuffer_texture(
                        glow::FRAMEBUFFER,
                        glow::COLOR_ATTACHMENT0,
                        Some(texture.raw),
                        0,
                    );
                    let status = self.gl.check_framebuffer_status(glow::FRAMEBUFFER);
                    self.gl.bind_framebuffer(glow::FRAMEBUFFER, None);
                    self.gl.delete_framebuffer(fbo);
                    status == glow::FRAMEBUFFER_COMPLETE
                }
                Err(_) => false,
            }
        };
        self.destroy_texture(texture);
        debug!("RGB {:?} render targets supported: {}", precision, supported);
        supported
    }

    fn create_framebuffer(&mut self) -> Result<GlFramebuffer> {
        let raw = unsafe { self.gl.create_framebuffer() }.map_err(anyhow::Error::msg)?;
        Ok(GlFramebuffer {
            raw,
            attached: Vec::new(),
        })
    }

    fn destroy_framebuffer(&mut self, framebuffer: GlFramebuffer) {
        unsafe { self.gl.delete_framebuffer(framebuffer.raw) };
    }

    fn create_shader(&mut self, stage: ShaderStage, label: &str, source: &str) -> Result<GlShader> {
        let kind = match stage {
            ShaderStage::Vertex => glow::VERTEX_SHADER,
            ShaderStage::Geometry => glow::GEOMETRY_SHADER,
            ShaderStage::Fragment => glow::FRAGMENT_SHADER,
        };
        unsafe {
            let raw = self.gl.create_shader(kind).map_err(anyhow::Error::msg)?;
            self.gl.shader_source(raw, source);
            self.gl.compile_shader(raw);
            if !self.gl.get_shader_compile_status(raw) {
                let log = self.gl.get_shader_info_log(raw);
                self.gl.delete_shader(raw);
                bail!(
                    "failed to compile {:?} shader '{}':\n{}\nsource:\n{}",
                    stage,
                    label,
                    log,
                    source
                );
            }
            Ok(GlShader {
                raw,
                label: label.to_owned(),
                source: source.to_owned(),
            })
        }
    }

    fn destroy_shader(&mut self, shader: GlShader) {
        unsafe { self.gl.delete_shader(shader.raw) };
    }

    fn link_program(&mut self, label: &str, shaders: &[&GlShader]) -> Result<GlProgram> {
        unsafe {
            let raw = self.gl.create_program().map_err(anyhow::Error::msg)?;
            for shader in shaders {
                self.gl.attach_shader(raw, shader.raw);
            }
            self.gl.link_program(raw);
            for shader in shaders {
                self.gl.detach_shader(raw, shader.raw);
            }
            if !self.gl.get_program_link_status(raw) {
                let log = self.gl.get_program_info_log(raw);
                self.gl.delete_program(raw);
                let sources = shaders
                    .iter()
                    .map(|shader| format!("// {}\n{}", shader.label, shader.source))
                    .collect::<Vec<_>>()
                    .join("\n");
                bail!(
                    "failed to link program '{}':\n{}\nsources:\n{}",
                    label,
                    log,
                    sources
                );
            }
            Ok(GlProgram {
                raw,
                label: label.to_owned(),
            })
        }
    }

    fn destroy_program(&mut self, program: GlProgram) {
        unsafe { self.gl.delete_program(program.raw) };
    }

    fn set_uniform(&mut self, program: &GlProgram, name: &str, value: Uniform) -> Result<()> {
        unsafe {
            self.gl.use_program(Some(program.raw));
            let location = self.gl.get_uniform_location(program.raw, name);
            if location.is_none() {
                trace!("uniform {} is not active in {}", name, program.label);
            }
            let location = location.as_ref();
            match value {
                Uniform::Int(v) => self.gl.uniform_1_i32(location, v),
                Uniform::Float(v) => self.gl.uniform_1_f32(location, v),
                Uniform::Vec3([x, y, z]) => self.gl.uniform_3_f32(location, x, y, z),
                Uniform::Mat3(m) => self.gl.uniform_matrix_3_f32_slice(location, false, &m),
            }
        }
        self.check_error(&program.label)
    }

    fn bind_texture(
        &mut self,
        program: &GlProgram,
        name: &str,
        texture: &GlTexture,
        unit: u32,
    ) -> Result<()> {
        unsafe {
            self.gl.active_texture(glow::TEXTURE0 + unit);
            self.gl.bind_texture(texture.target(), Some(texture.raw));
        }
        self.set_uniform(program, name, Uniform::Int(unit as i32))
    }

    fn draw_fullscreen_quad(
        &mut self,
        framebuffer: &mut GlFramebuffer,
        program: &GlProgram,
        targets: &[ColorTarget<GlTexture>],
    ) -> Result<()> {
        ensure!(!targets.is_empty(), "draw into {} without targets", program.label);
        let extent = targets[0].texture.extent;
        let raw_targets = targets.iter().map(|t| t.texture.raw).collect::<Vec<_>>();
        unsafe {
            self.gl
                .bind_framebuffer(glow::FRAMEBUFFER, Some(framebuffer.raw));
        }
        self.attach(framebuffer, &raw_targets)?;
        unsafe {
            self.gl
                .viewport(0, 0, extent.width as i32, extent.height as i32);
            for (i, target) in targets.iter().enumerate() {
                if target.blend {
                    self.gl.enable_draw_buffer(glow::BLEND, i as u32);
                } else {
                    self.gl.disable_draw_buffer(glow::BLEND, i as u32);
                }
            }
            self.gl.blend_equation_separate(glow::FUNC_ADD, glow::FUNC_ADD);
            self.gl
                .blend_func_separate(glow::ONE, glow::ONE, glow::ONE, glow::ONE);
            self.gl.use_program(Some(program.raw));
            self.gl.bind_vertex_array(Some(self.quad_vertex_array));
            self.gl.draw_arrays(glow::TRIANGLE_STRIP, 0, 4);
            self.gl.bind_vertex_array(None);
            for i in 0..targets.len() {
                self.gl.disable_draw_buffer(glow::BLEND, i as u32);
            }
            self.gl.bind_framebuffer(glow::FRAMEBUFFER, None);
        }
        self.check_error(&program.label)
    }

    fn read_texture(&mut self, texture: &GlTexture) -> Result<Vec<f32>> {
        let mut bytes = vec![0u8; texture.extent.texel_count() * 4 * 4];
        unsafe {
            self.gl.bind_texture(texture.target(), Some(texture.raw));
            self.gl.get_tex_image(
                texture.target(),
                0,
                glow::RGBA,
                glow::FLOAT,
                glow::PixelPackData::Slice(Some(&mut bytes)),
            );
            self.gl.bind_texture(texture.target(), None);
        }
        self.check_error(&texture.label)?;
        Ok(bytes
            .chunks_exact(4)
            .map(|b| f32::from_ne_bytes([b[0], b[1], b[2], b[3]]))
            .collect())
    }
}
