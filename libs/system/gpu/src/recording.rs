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
use std::{collections::HashMap, rc::Rc};

const MAX_COLOR_TARGETS: usize = 4;

/// One full screen draw as seen by the device.
#[derive(Clone, Debug)]
pub struct DrawCall {
    pub program: String,
    /// Identifier of the framebuffer the draw went through.
    pub framebuffer: usize,
    /// Fragment shader source of the drawing program.
    pub fragment: Rc<str>,
    pub layer: Option<i32>,
    /// Target texture labels paired with their blend flag.
    pub targets: Vec<(String, bool)>,
}

#[derive(Clone, Debug)]
pub enum Command {
    CreateTexture {
        label: String,
        dimension: TextureDimension,
        extent: Extent3d,
        format: TextureFormat,
        precision: Precision,
    },
    DestroyTexture {
        label: String,
    },
    LinkProgram {
        label: String,
    },
    SetUniform {
        program: String,
        name: String,
        value: Uniform,
    },
    BindTexture {
        program: String,
        name: String,
        texture: String,
        unit: u32,
    },
    Draw(DrawCall),
}

#[derive(Debug)]
pub struct RecordedTexture {
    id: usize,
}

#[derive(Debug)]
pub struct RecordedFramebuffer {
    id: usize,
}

#[derive(Debug)]
pub struct RecordedShader {
    stage: ShaderStage,
    label: String,
    source: Rc<str>,
}

#[derive(Debug)]
pub struct RecordedProgram {
    id: usize,
}

#[derive(Debug)]
struct TextureState {
    label: String,
    dimension: TextureDimension,
    extent: Extent3d,
    layers: Vec<f32>,
    live: bool,
}

#[derive(Debug)]
struct ProgramState {
    label: String,
    fragment: Rc<str>,
    uniforms: HashMap<String, Uniform>,
    samplers: HashMap<String, usize>,
    live: bool,
}

/// A `RenderDevice` that performs no rendering. It records every command,
/// tracks object lifetimes, and keeps one value per texture layer that
/// counts writes: a replacing draw sets the layer to 1 and a blending draw
/// adds 1. This is enough to check the order, targets and blend modes of a
/// pass sequence without a GPU.
#[derive(Debug)]
pub struct RecordingDevice {
    commands: Vec<Command>,
    textures: Vec<TextureState>,
    programs: Vec<ProgramState>,
    live_shaders: usize,
    framebuffers: Vec<bool>,
    rgb_render_targets: bool,
    failing_label: Option<String>,
    failing_link_label: Option<String>,
}

impl Default for RecordingDevice {
    fn default() -> Self {
        Self {
            commands: Vec::new(),
            textures: Vec::new(),
            programs: Vec::new(),
            live_shaders: 0,
            framebuffers: Vec::new(),
            rgb_render_targets: true,
            failing_label: None,
            failing_link_label: None,
        }
    }
}

impl RecordingDevice {
    /// A device on which 3 channel float textures are not renderable.
    pub fn without_rgb_render_targets() -> Self {
        Self {
            rgb_render_targets: false,
            ..Default::default()
        }
    }

    /// Make every shader compiled under `label` fail to compile.
    pub fn fail_compile(&mut self, label: &str) {
        self.failing_label = Some(label.to_owned());
    }

    /// Make the program linked under `label` fail to link.
    pub fn fail_link(&mut self, label: &str) {
        self.failing_link_label = Some(label.to_owned());
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn clear_commands(&mut self) {
        self.commands.clear();
    }

    pub fn draws(&self) -> impl Iterator<Item = &DrawCall> {
        self.commands.iter().filter_map(|c| match c {
            Command::Draw(draw) => Some(draw),
            _ => None,
        })
    }

    pub fn created_textures(&self) -> impl Iterator<Item = &Command> {
        self.commands
            .iter()
            .filter(|c| matches!(c, Command::CreateTexture { .. }))
    }

    /// Per layer write counters for the texture.
    pub fn texture_layers(&self, texture: &RecordedTexture) -> &[f32] {
        &self.textures[texture.id].layers
    }

    pub fn fill_texture(&mut self, texture: &RecordedTexture, value: f32) {
        for layer in self.textures[texture.id].layers.iter_mut() {
            *layer = value;
        }
    }

    pub fn live_textures(&self) -> usize {
        self.textures.iter().filter(|t| t.live).count()
    }

    pub fn live_programs(&self) -> usize {
        self.programs.iter().filter(|p| p.live).count()
    }

    pub fn live_shaders(&self) -> usize {
        self.live_shaders
    }

    pub fn live_framebuffers(&self) -> usize {
        self.framebuffers.iter().filter(|live| **live).count()
    }

    fn texture_state(&self, texture: &RecordedTexture) -> Result<&TextureState> {
        let state = &self.textures[texture.id];
        ensure!(state.live, "use of destroyed texture {}", state.label);
        Ok(state)
    }

    fn program_state(&mut self, program: &RecordedProgram) -> Result<&mut ProgramState> {
        let state = &mut self.programs[program.id];
        ensure!(state.live, "use of destroyed program {}", state.label);
        Ok(state)
    }
}

impl RenderDevice for RecordingDevice {
    type Texture = RecordedTexture;
    type Framebuffer = RecordedFramebuffer;
    type Shader = RecordedShader;
    type Program = RecordedProgram;

    fn create_texture(&mut self, desc: &TextureDescriptor) -> Result<RecordedTexture> {
        ensure!(
            desc.extent.texel_count() > 0,
            "empty texture {}",
            desc.label
        );
        let depth = match desc.dimension {
            TextureDimension::D2 => {
                ensure!(desc.extent.depth == 1, "2D texture {} with depth", desc.label);
                1
            }
            TextureDimension::D3 => desc.extent.depth as usize,
        };
        self.commands.push(Command::CreateTexture {
            label: desc.label.to_owned(),
            dimension: desc.dimension,
            extent: desc.extent,
            format: desc.format,
            precision: desc.precision,
        });
        self.textures.push(TextureState {
            label: desc.label.to_owned(),
            dimension: desc.dimension,
            extent: desc.extent,
            layers: vec![0f32; depth],
            live: true,
        });
        Ok(RecordedTexture {
            id: self.textures.len() - 1,
        })
    }

    fn destroy_texture(&mut self, texture: RecordedTexture) {
        let state = &mut self.textures[texture.id];
        state.live = false;
        self.commands.push(Command::DestroyTexture {
            label: state.label.clone(),
        });
    }

    fn supports_rgb_render_target(&mut self, _precision: Precision) -> bool {
        self.rgb_render_targets
    }

    fn create_framebuffer(&mut self) -> Result<RecordedFramebuffer> {
        self.framebuffers.push(true);
        Ok(RecordedFramebuffer {
            id: self.framebuffers.len() - 1,
        })
    }

    fn destroy_framebuffer(&mut self, framebuffer: RecordedFramebuffer) {
        self.framebuffers[framebuffer.id] = false;
    }

    fn create_shader(
        &mut self,
        stage: ShaderStage,
        label: &str,
        source: &str,
    ) -> Result<RecordedShader> {
        if self.failing_label.as_deref() == Some(label) {
            bail!(
                "failed to compile {:?} shader '{}':\nsimulated compile error\nsource:\n{}",
                stage,
                label,
                source
            );
        }
        ensure!(
            source.trim_start().starts_with("#version"),
            "shader '{}' does not start with a #version directive",
            label
        );
        self.live_shaders += 1;
        Ok(RecordedShader {
            stage,
            label: label.to_owned(),
            source: source.into(),
        })
    }

    fn destroy_shader(&mut self, _shader: RecordedShader) {
        self.live_shaders -= 1;
    }

    fn link_program(&mut self, label: &str, shaders: &[&RecordedShader]) -> Result<RecordedProgram> {
        if self.failing_link_label.as_deref() == Some(label) {
            let sources = shaders
                .iter()
                .map(|shader| format!("// {}\n{}", shader.label, shader.source))
                .collect::<Vec<_>>()
                .join("\n");
            bail!(
                "failed to link program '{}':\nsimulated link error\nsources:\n{}",
                label,
                sources
            );
        }
        let fragments = shaders
            .iter()
            .filter(|s| s.stage == ShaderStage::Fragment)
            .map(|s| s.source.as_ref())
            .collect::<Vec<_>>();
        ensure!(
            !fragments.is_empty(),
            "program '{}' has no fragment stage",
            label
        );
        self.commands.push(Command::LinkProgram {
            label: label.to_owned(),
        });
        self.programs.push(ProgramState {
            label: label.to_owned(),
            fragment: fragments.join("\n").into(),
            uniforms: HashMap::new(),
            samplers: HashMap::new(),
            live: true,
        });
        Ok(RecordedProgram {
            id: self.programs.len() - 1,
        })
    }

    fn destroy_program(&mut self, program: RecordedProgram) {
        self.programs[program.id].live = false;
    }

    fn set_uniform(
        &mut self,
        program: &RecordedProgram,
        name: &str,
        value: Uniform,
    ) -> Result<()> {
        let state = self.program_state(program)?;
        state.uniforms.insert(name.to_owned(), value.clone());
        let label = state.label.clone();
        self.commands.push(Command::SetUniform {
            program: label,
            name: name.to_owned(),
            value,
        });
        Ok(())
    }

    fn bind_texture(
        &mut self,
        program: &RecordedProgram,
        name: &str,
        texture: &RecordedTexture,
        unit: u32,
    ) -> Result<()> {
        let texture_label = self.texture_state(texture)?.label.clone();
        let state = self.program_state(program)?;
        state.samplers.insert(name.to_owned(), texture.id);
        state.uniforms.insert(name.to_owned(), Uniform::Int(unit as i32));
        let label = state.label.clone();
        self.commands.push(Command::BindTexture {
            program: label,
            name: name.to_owned(),
            texture: texture_label,
            unit,
        });
        Ok(())
    }

    fn draw_fullscreen_quad(
        &mut self,
        framebuffer: &mut RecordedFramebuffer,
        program: &RecordedProgram,
        targets: &[ColorTarget<RecordedTexture>],
    ) -> Result<()> {
        ensure!(
            self.framebuffers[framebuffer.id],
            "draw through destroyed framebuffer {}",
            framebuffer.id
        );
        ensure!(
            !targets.is_empty() && targets.len() <= MAX_COLOR_TARGETS,
            "a draw needs between 1 and {} targets, got {}",
            MAX_COLOR_TARGETS,
            targets.len()
        );
        let state = self.program_state(program)?;
        let label = state.label.clone();
        let fragment = state.fragment.clone();
        let layer = match state.uniforms.get("layer") {
            Some(Uniform::Int(layer)) => Some(*layer),
            _ => None,
        };
        let sampled = state.samplers.values().copied().collect::<Vec<_>>();

        let dimension = self.texture_state(targets[0].texture)?.dimension;
        let mut recorded = Vec::with_capacity(targets.len());
        for target in targets {
            let texture = self.texture_state(target.texture)?;
            ensure!(
                texture.dimension == dimension,
                "{} mixes layered and non-layered attachments",
                label
            );
            ensure!(
                !sampled.contains(&target.texture.id),
                "{} samples {} while rendering into it",
                label,
                texture.label
            );
            recorded.push((texture.label.clone(), target.blend));
        }

        for target in targets {
            let state = &mut self.textures[target.texture.id];
            let index = match state.dimension {
                TextureDimension::D2 => 0,
                TextureDimension::D3 => {
                    let layer = layer.unwrap_or(0);
                    ensure!(
                        layer >= 0 && (layer as u32) < state.extent.depth,
                        "layer {} out of range for {}",
                        layer,
                        state.label
                    );
                    layer as usize
                }
            };
            if target.blend {
                state.layers[index] += 1.0;
            } else {
                state.layers[index] = 1.0;
            }
        }

        self.commands.push(Command::Draw(DrawCall {
            program: label,
            framebuffer: framebuffer.id,
            fragment,
            layer,
            targets: recorded,
        }));
        Ok(())
    }

    fn read_texture(&mut self, texture: &RecordedTexture) -> Result<Vec<f32>> {
        let state = self.texture_state(texture)?;
        let per_layer = (state.extent.width * state.extent.height) as usize * 4;
        Ok(state
            .layers
            .iter()
            .flat_map(|v| std::iter::repeat(*v).take(per_layer))
            .collect())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::build_program;

    const VERT: &str = "#version 330\nvoid main() {}";
    const FRAG: &str = "#version 330\nout vec4 color;\nvoid main() {}";

    fn layered(device: &mut RecordingDevice, label: &str) -> Result<RecordedTexture> {
        device.create_texture(&TextureDescriptor {
            label,
            dimension: TextureDimension::D3,
            extent: Extent3d::new_3d(4, 4, 3),
            format: TextureFormat::Rgba,
            precision: Precision::Half,
        })
    }

    #[test]
    fn test_overwrite_and_blend() -> Result<()> {
        let mut device = RecordingDevice::default();
        let a = layered(&mut device, "a")?;
        let b = layered(&mut device, "b")?;
        let program = build_program(&mut device, "p", VERT, None, FRAG)?;
        let mut fb = device.create_framebuffer()?;
        for _ in 0..2 {
            for layer in 0..3 {
                device.set_uniform(&program, "layer", Uniform::Int(layer))?;
                device.draw_fullscreen_quad(
                    &mut fb,
                    &program,
                    &[ColorTarget::overwrite(&a), ColorTarget::accumulate(&b)],
                )?;
            }
        }
        assert_eq!(device.texture_layers(&a), &[1.0, 1.0, 1.0]);
        assert_eq!(device.texture_layers(&b), &[2.0, 2.0, 2.0]);
        assert_eq!(device.draws().count(), 6);
        Ok(())
    }

    #[test]
    fn test_rejects_feedback_loop() -> Result<()> {
        let mut device = RecordingDevice::default();
        let a = layered(&mut device, "a")?;
        let program = build_program(&mut device, "p", VERT, None, FRAG)?;
        let mut fb = device.create_framebuffer()?;
        device.bind_texture(&program, "input", &a, 0)?;
        assert!(device
            .draw_fullscreen_quad(&mut fb, &program, &[ColorTarget::overwrite(&a)])
            .is_err());
        Ok(())
    }

    #[test]
    fn test_rejects_mixed_attachments() -> Result<()> {
        let mut device = RecordingDevice::default();
        let a = layered(&mut device, "a")?;
        let b = device.create_texture(&TextureDescriptor {
            label: "b",
            dimension: TextureDimension::D2,
            extent: Extent3d::new_2d(4, 4),
            format: TextureFormat::Rgba,
            precision: Precision::Full,
        })?;
        let program = build_program(&mut device, "p", VERT, None, FRAG)?;
        let mut fb = device.create_framebuffer()?;
        assert!(device
            .draw_fullscreen_quad(
                &mut fb,
                &program,
                &[ColorTarget::overwrite(&a), ColorTarget::overwrite(&b)]
            )
            .is_err());
        device.destroy_texture(a);
        assert_eq!(device.live_textures(), 1);
        Ok(())
    }

    #[test]
    fn test_draws_record_their_framebuffer() -> Result<()> {
        let mut device = RecordingDevice::default();
        let a = layered(&mut device, "a")?;
        let program = build_program(&mut device, "p", VERT, None, FRAG)?;
        let mut first = device.create_framebuffer()?;
        let mut second = device.create_framebuffer()?;
        device.draw_fullscreen_quad(&mut first, &program, &[ColorTarget::overwrite(&a)])?;
        device.draw_fullscreen_quad(&mut second, &program, &[ColorTarget::overwrite(&a)])?;
        let ids = device.draws().map(|d| d.framebuffer).collect::<Vec<_>>();
        assert_eq!(ids.len(), 2);
        assert_ne!(ids[0], ids[1]);
        assert_eq!(device.live_framebuffers(), 2);
        device.destroy_framebuffer(second);
        assert_eq!(device.live_framebuffers(), 1);
        device.destroy_framebuffer(first);
        assert_eq!(device.live_framebuffers(), 0);
        Ok(())
    }

    #[test]
    fn test_link_failure_reports_sources() {
        let mut device = RecordingDevice::default();
        device.fail_link("p");
        let err = build_program(&mut device, "p", VERT, None, FRAG)
            .err()
            .map(|e| e.to_string())
            .unwrap_or_default();
        assert!(err.contains("failed to link program 'p'"), "{}", err);
        assert!(err.contains(VERT), "{}", err);
        assert!(err.contains(FRAG), "{}", err);
        assert_eq!(device.live_shaders(), 0);
        assert_eq!(device.live_programs(), 0);

        // Other programs still link.
        assert!(build_program(&mut device, "q", VERT, None, FRAG).is_ok());
    }

    #[test]
    fn test_read_texture_expands_layers() -> Result<()> {
        let mut device = RecordingDevice::default();
        let a = layered(&mut device, "a")?;
        device.fill_texture(&a, 0.5);
        let texels = device.read_texture(&a)?;
        assert_eq!(texels.len(), 4 * 4 * 3 * 4);
        assert!(texels.iter().all(|v| (*v - 0.5).abs() < f32::EPSILON));
        Ok(())
    }
}
