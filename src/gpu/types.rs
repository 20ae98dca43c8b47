use bytemuck::{Pod, Zeroable};

/// Left and right edge colors of a note bar. Shaded as a horizontal gradient.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct NoteColor {
    pub left: [f32; 4],
    pub right: [f32; 4],
}

/// One visible note in render space: `0.0` is the current time, `1.0` the end of the
/// look-ahead window. Uploaded as a per-instance vertex.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct RenderNote {
    pub start: f32,
    pub end: f32,
    pub color: NoteColor,
}

pub const RENDER_NOTE_STRIDE: u32 = std::mem::size_of::<RenderNote>() as u32;

pub const RENDER_NOTE_ATTRIBUTES: [wgpu::VertexAttribute; 4] = wgpu::vertex_attr_array![
    0 => Float32,
    1 => Float32,
    2 => Float32x4,
    3 => Float32x4,
];

/// Uniform block shared by every draw; the horizontal extent changes per key column.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct FrameConstants {
    pub note_left_x: f32,
    pub note_right_x: f32,
    pub border_width: f32,
    // Screen height divided by screen width.
    pub screen_aspect: f32,
}

pub const FRAME_CONSTANTS_SIZE: u64 = std::mem::size_of::<FrameConstants>() as u64;
