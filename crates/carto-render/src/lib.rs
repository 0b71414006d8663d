// SPDX-License-Identifier: CEPL-1.0
use anyhow::Result;
use bitflags::bitflags;
use bytemuck::{Pod, Zeroable};
use std::path::PathBuf;

mod config;

pub use config::{RendererConfig, VsyncMode};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct RenderSize {
    pub width: u32,
    pub height: u32,
}

impl RenderSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Where a buffer lives; fixes how updates reach it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MemoryClass {
    /// Device-local, written through transfer commands.
    Static,
    /// Host-visible, rewritten by the CPU every frame.
    Dynamic,
    /// Host-visible upload source.
    Staging,
    /// Host-visible download target.
    Readback,
}

impl MemoryClass {
    pub fn is_host_visible(self) -> bool {
        !matches!(self, MemoryClass::Static)
    }
}

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct BufferUsage: u32 {
        const VERTEX       = 1 << 0;
        const INDEX        = 1 << 1;
        const UNIFORM      = 1 << 2;
        const STORAGE      = 1 << 3;
        const TRANSFER_SRC = 1 << 4;
        const TRANSFER_DST = 1 << 5;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    Rgba8,
    Bgra8,
    /// Single channel, used for glyph and mask atlases.
    R8,
}

impl TextureFormat {
    pub const fn bytes_per_pixel(self) -> u32 {
        match self {
            TextureFormat::Rgba8 | TextureFormat::Bgra8 => 4,
            TextureFormat::R8 => 1,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum SamplerKind {
    #[default]
    Linear,
    Nearest,
}

/// Sub-rectangle of a texture, in texels.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TextureRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl TextureRegion {
    pub const fn whole(width: u32, height: u32) -> Self {
        Self {
            x: 0,
            y: 0,
            width,
            height,
        }
    }

    pub fn fits_within(&self, width: u32, height: u32) -> bool {
        self.x.checked_add(self.width).is_some_and(|r| r <= width)
            && self.y.checked_add(self.height).is_some_and(|b| b <= height)
    }
}

// --- vertex layouts shared by the map pipelines ---

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct ColorVertex {
    pub pos: [f32; 3],
    pub color: [f32; 4],
}

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct TexturedVertex {
    pub pos: [f32; 3],
    pub uv: [f32; 2],
    pub color: [f32; 4],
}

/// Per-draw push constant block: transform slot plus a tint multiplied into the vertex color.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct DrawConstants {
    pub transform_index: u32,
    pub _pad: [u32; 3],
    pub tint: [f32; 4],
}

impl DrawConstants {
    pub fn new(transform_index: u32, tint: [f32; 4]) -> Self {
        Self {
            transform_index,
            _pad: [0; 3],
            tint,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameStatus {
    /// An image was acquired; draws are recorded.
    Ready,
    /// No image this frame (surface out of date, paused, ...). Draws are dropped.
    Degraded,
}

/// The frame contract every backend honours.
pub trait Renderer {
    fn resize(&mut self, size: RenderSize);
    fn start_frame(&mut self) -> Result<FrameStatus>;
    fn end_frame(&mut self) -> Result<()>;
    fn set_clear_color(&mut self, rgba: [f32; 4]);
    fn clear_framebuffer(&mut self, rgba: [f32; 4]);
    fn clear_depth_buffer(&mut self);
    /// Finish the current frame and copy its pixels, RGBA8 row-major, into `pixels`.
    fn read_framebuffer(&mut self, pixels: &mut [u8], width: u32, height: u32) -> Result<()>;
    fn set_vsync(&mut self, _on: bool) {}
}

pub fn default_shader_dir() -> PathBuf {
    PathBuf::from("shaders")
}
