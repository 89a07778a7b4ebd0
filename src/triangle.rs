// The one thing we draw
//
// No vertex buffer: the vertex shader indexes this uniform block with
// gl_VertexIndex, so the layout here must match the std140 block in
// shaders/triangle.vert (two arrays of three vec4, 16-byte stride).

use glam::Vec4;

/// Vertices per draw
pub const VERTEX_COUNT: u32 = 3;

/// Uniform block contents: clip-space positions followed by vertex colors
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TriangleUniform {
    pub positions: [Vec4; 3],
    pub colors: [Vec4; 3],
}

impl TriangleUniform {
    /// Full-viewport triangle with red, green and blue corners
    pub fn clip_space() -> Self {
        Self {
            positions: [
                Vec4::new(0.0, 1.0, 0.0, 1.0),
                Vec4::new(1.0, -1.0, 0.0, 1.0),
                Vec4::new(-1.0, -1.0, 0.0, 1.0),
            ],
            colors: [
                Vec4::new(1.0, 0.0, 0.0, 1.0),
                Vec4::new(0.0, 1.0, 0.0, 1.0),
                Vec4::new(0.0, 0.0, 1.0, 1.0),
            ],
        }
    }

    /// Size of the uniform buffer in bytes
    pub const fn size() -> u64 {
        std::mem::size_of::<Self>() as u64
    }
}
