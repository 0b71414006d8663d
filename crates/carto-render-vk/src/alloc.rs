// SPDX-License-Identifier: CEPL-1.0
use crate::error::Result;
use ash::vk;
use carto_render::{BufferUsage, MemoryClass};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RawBuffer {
    pub buffer: vk::Buffer,
    pub memory: vk::DeviceMemory,
    pub size: u64,
    pub class: MemoryClass,
}

#[derive(Clone, Copy, Debug)]
pub struct ImageDesc {
    pub extent: vk::Extent2D,
    pub format: vk::Format,
    pub usage: vk::ImageUsageFlags,
    pub aspect: vk::ImageAspectFlags,
}

impl ImageDesc {
    pub fn depth(extent: vk::Extent2D, format: vk::Format) -> Self {
        Self {
            extent,
            format,
            usage: vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            aspect: vk::ImageAspectFlags::DEPTH,
        }
    }

    pub fn sampled(extent: vk::Extent2D, format: vk::Format) -> Self {
        Self {
            extent,
            format,
            usage: vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_DST,
            aspect: vk::ImageAspectFlags::COLOR,
        }
    }

    pub fn render_target(extent: vk::Extent2D, format: vk::Format) -> Self {
        Self {
            extent,
            format,
            usage: vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_SRC,
            aspect: vk::ImageAspectFlags::COLOR,
        }
    }
}

/// Device-local image plus the one view everything samples or renders through.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RawImage {
    pub image: vk::Image,
    pub memory: vk::DeviceMemory,
    pub view: vk::ImageView,
    pub extent: vk::Extent2D,
    pub format: vk::Format,
}

/// Create/destroy contract for GPU memory. Host access goes through
/// `write_buffer`/`read_buffer` so callers never hold mapped pointers.
pub trait ResourceAllocator {
    fn create_buffer(&self, size: u64, class: MemoryClass, usage: BufferUsage)
        -> Result<RawBuffer>;
    fn destroy_buffer(&self, buffer: RawBuffer);
    fn create_image(&self, desc: &ImageDesc) -> Result<RawImage>;
    fn destroy_image(&self, image: RawImage);
    fn write_buffer(&self, buffer: &RawBuffer, offset: u64, data: &[u8]) -> Result<()>;
    fn read_buffer(&self, buffer: &RawBuffer, offset: u64, out: &mut [u8]) -> Result<()>;
}

pub fn memory_flags(class: MemoryClass) -> vk::MemoryPropertyFlags {
    match class {
        MemoryClass::Static => vk::MemoryPropertyFlags::DEVICE_LOCAL,
        MemoryClass::Dynamic | MemoryClass::Staging | MemoryClass::Readback => {
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT
        }
    }
}

/// Usage bits implied by the memory class on top of what the caller asked for.
pub fn buffer_usage_flags(class: MemoryClass, usage: BufferUsage) -> vk::BufferUsageFlags {
    let mut flags = vk::BufferUsageFlags::empty();
    if usage.contains(BufferUsage::VERTEX) {
        flags |= vk::BufferUsageFlags::VERTEX_BUFFER;
    }
    if usage.contains(BufferUsage::INDEX) {
        flags |= vk::BufferUsageFlags::INDEX_BUFFER;
    }
    if usage.contains(BufferUsage::UNIFORM) {
        flags |= vk::BufferUsageFlags::UNIFORM_BUFFER;
    }
    if usage.contains(BufferUsage::STORAGE) {
        flags |= vk::BufferUsageFlags::STORAGE_BUFFER;
    }
    if usage.contains(BufferUsage::TRANSFER_SRC) {
        flags |= vk::BufferUsageFlags::TRANSFER_SRC;
    }
    if usage.contains(BufferUsage::TRANSFER_DST) {
        flags |= vk::BufferUsageFlags::TRANSFER_DST;
    }
    match class {
        MemoryClass::Static | MemoryClass::Readback => flags | vk::BufferUsageFlags::TRANSFER_DST,
        MemoryClass::Staging => flags | vk::BufferUsageFlags::TRANSFER_SRC,
        MemoryClass::Dynamic => flags,
    }
}

pub(crate) fn check_range(offset: u64, len: u64, size: u64) -> Result<()> {
    match offset.checked_add(len) {
        Some(end) if end <= size => Ok(()),
        _ => Err(crate::RenderError::OutOfBounds { offset, len, size }),
    }
}
