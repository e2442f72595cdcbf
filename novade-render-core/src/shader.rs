//! Built-in shader programs used by the frame pipeline.

use crate::device::{GpuDevice, ProgramId, Uniform};
use crate::error::DeviceError;
use crate::vertex::{POSITION_ATTRIBUTE, TEXCOORD_ATTRIBUTE};
use glam::Mat4;
use std::rc::Rc;
use tracing::{debug, error};

const TEXTURED_VERTEX_GLES: &str = r#"#version 100
attribute vec2 position;
attribute vec2 texcoord;
uniform mat4 mvp;
uniform mat4 textureMatrix;
varying vec2 v_texcoord;
void main() {
    v_texcoord = (textureMatrix * vec4(texcoord, 0.0, 1.0)).xy;
    gl_Position = mvp * vec4(position, 0.0, 1.0);
}
"#;

const TEXTURED_FRAGMENT_GLES: &str = r#"#version 100
precision mediump float;
uniform sampler2D sampler;
uniform float opacity;
varying vec2 v_texcoord;
void main() {
    gl_FragColor = texture2D(sampler, v_texcoord) * opacity;
}
"#;

const SOLID_VERTEX_GLES: &str = r#"#version 100
attribute vec2 position;
uniform mat4 mvp;
void main() {
    gl_Position = mvp * vec4(position, 0.0, 1.0);
}
"#;

const SOLID_FRAGMENT_GLES: &str = r#"#version 100
precision mediump float;
uniform vec4 color;
void main() {
    gl_FragColor = color;
}
"#;

const TEXTURED_VERTEX_GL: &str = r#"#version 140
in vec2 position;
in vec2 texcoord;
uniform mat4 mvp;
uniform mat4 textureMatrix;
out vec2 v_texcoord;
void main() {
    v_texcoord = (textureMatrix * vec4(texcoord, 0.0, 1.0)).xy;
    gl_Position = mvp * vec4(position, 0.0, 1.0);
}
"#;

const TEXTURED_FRAGMENT_GL: &str = r#"#version 140
uniform sampler2D sampler;
uniform float opacity;
in vec2 v_texcoord;
out vec4 fragColor;
void main() {
    fragColor = texture(sampler, v_texcoord) * opacity;
}
"#;

const SOLID_VERTEX_GL: &str = r#"#version 140
in vec2 position;
uniform mat4 mvp;
void main() {
    gl_Position = mvp * vec4(position, 0.0, 1.0);
}
"#;

const SOLID_FRAGMENT_GL: &str = r#"#version 140
uniform vec4 color;
out vec4 fragColor;
void main() {
    fragColor = color;
}
"#;

/// A linked program on a [`GpuDevice`]; deleted on drop.
pub struct ShaderProgram {
    device: Rc<dyn GpuDevice>,
    id: ProgramId,
    name: &'static str,
}

impl std::fmt::Debug for ShaderProgram {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShaderProgram")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish()
    }
}

impl ShaderProgram {
    pub fn new(
        device: Rc<dyn GpuDevice>,
        name: &'static str,
        vertex_src: &str,
        fragment_src: &str,
    ) -> Result<Self, DeviceError> {
        let attributes = [(POSITION_ATTRIBUTE, "position"), (TEXCOORD_ATTRIBUTE, "texcoord")];
        let id = device.create_program(vertex_src, fragment_src, &attributes)?;
        debug!(target: "gl", "Linked {} shader as {}", name, id);
        Ok(Self { device, id, name })
    }

    pub fn id(&self) -> ProgramId {
        self.id
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn bind(&self) {
        self.device.use_program(Some(self.id));
    }

    pub fn unbind(&self) {
        self.device.use_program(None);
    }

    /// Sets a uniform; the program must be bound. Returns `false` for
    /// uniforms the linker optimized away.
    pub fn set_uniform(&self, name: &str, value: Uniform) -> bool {
        self.device.set_uniform(self.id, name, value)
    }

    pub fn set_mvp(&self, mvp: &Mat4) -> bool {
        self.set_uniform("mvp", Uniform::Mat4(mvp.to_cols_array()))
    }

    pub fn set_texture_matrix(&self, matrix: &Mat4) -> bool {
        self.set_uniform("textureMatrix", Uniform::Mat4(matrix.to_cols_array()))
    }
}

impl Drop for ShaderProgram {
    fn drop(&mut self) {
        self.device.delete_program(self.id);
    }
}

/// Owns the built-in programs for one device.
///
/// A program that fails to build is logged and left out; callers see `None`
/// and skip the draws that need it.
pub struct ShaderManager {
    textured: Option<ShaderProgram>,
    solid: Option<ShaderProgram>,
}

impl ShaderManager {
    pub fn new(device: Rc<dyn GpuDevice>) -> Self {
        let gles = device.info().gles;
        let (textured_vs, textured_fs, solid_vs, solid_fs) = if gles {
            (TEXTURED_VERTEX_GLES, TEXTURED_FRAGMENT_GLES, SOLID_VERTEX_GLES, SOLID_FRAGMENT_GLES)
        } else {
            (TEXTURED_VERTEX_GL, TEXTURED_FRAGMENT_GL, SOLID_VERTEX_GL, SOLID_FRAGMENT_GL)
        };
        let build = |name: &'static str, vs: &str, fs: &str| match ShaderProgram::new(device.clone(), name, vs, fs) {
            Ok(program) => Some(program),
            Err(e) => {
                error!(target: "gl", "Failed to build the {} shader: {}", name, e);
                None
            }
        };
        Self {
            textured: build("textured", textured_vs, textured_fs),
            solid: build("solid", solid_vs, solid_fs),
        }
    }

    pub fn textured(&self) -> Option<&ShaderProgram> {
        self.textured.as_ref()
    }

    pub fn solid(&self) -> Option<&ShaderProgram> {
        self.solid.as_ref()
    }
}

/// Orthographic projection mapping `size` pixels, origin top-left, to clip space.
pub fn projection(size: crate::geometry::Size) -> Mat4 {
    Mat4::orthographic_rh_gl(0.0, size.width as f32, size.height as f32, 0.0, -1.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::software::SoftwareDevice;
    use crate::geometry::Size;
    use glam::Vec4;

    #[test]
    fn builds_both_programs_and_sets_uniforms() {
        let device = Rc::new(SoftwareDevice::new());
        let shaders = ShaderManager::new(device.clone());
        let textured = shaders.textured().unwrap();
        textured.bind();
        assert!(textured.set_mvp(&Mat4::IDENTITY));
        assert!(textured.set_uniform("opacity", Uniform::Float(0.5)));
        assert!(!textured.set_uniform("color", Uniform::Vec4([1.0; 4])));
        assert_eq!(device.uniform(textured.id(), "opacity"), Some(Uniform::Float(0.5)));
        assert!(shaders.solid().is_some());
    }

    #[test]
    fn link_failure_leaves_program_out() {
        let device = Rc::new(SoftwareDevice::new());
        device.fail_next_program_link("syntax error");
        let shaders = ShaderManager::new(device);
        assert!(shaders.textured().is_none());
        assert!(shaders.solid().is_some());
    }

    #[test]
    fn projection_maps_top_left_to_upper_clip_corner() {
        let p = projection(Size::new(200, 100)) * Vec4::new(0.0, 0.0, 0.0, 1.0);
        assert_eq!((p.x, p.y), (-1.0, 1.0));
        let p = projection(Size::new(200, 100)) * Vec4::new(200.0, 100.0, 0.0, 1.0);
        assert_eq!((p.x, p.y), (1.0, -1.0));
    }
}
