// SPDX-License-Identifier: CEPL-1.0
use super::{VkBackend, VkContext};
use crate::alloc::{buffer_usage_flags, check_range, memory_flags, ImageDesc, RawBuffer, RawImage, ResourceAllocator};
use crate::error::{RenderError, Result};
use ash::vk;
use carto_render::{BufferUsage, MemoryClass};
use tracing::debug;

impl VkContext {
    /// Allocate and bind memory for `req`. Device-local requests fall back to
    /// any compatible type (integrated GPUs); host-visible ones never do.
    unsafe fn allocate_for(
        &self,
        req: vk::MemoryRequirements,
        flags: vk::MemoryPropertyFlags,
    ) -> Result<vk::DeviceMemory> {
        let host = flags.contains(vk::MemoryPropertyFlags::HOST_VISIBLE);
        let index = self
            .find_memory_type(req.memory_type_bits, flags)
            .or_else(|| {
                (!host)
                    .then(|| self.find_memory_type(req.memory_type_bits, vk::MemoryPropertyFlags::empty()))
                    .flatten()
            })
            .ok_or(RenderError::NoMemoryType(flags))?;
        let info = vk::MemoryAllocateInfo {
            s_type: vk::StructureType::MEMORY_ALLOCATE_INFO,
            allocation_size: req.size,
            memory_type_index: index,
            ..Default::default()
        };
        Ok(unsafe { self.device.allocate_memory(&info, None) }?)
    }

    /// Map `len` bytes at `offset`, hand them to `f`, unmap. Memory is coherent.
    unsafe fn with_mapped<R>(
        &self,
        buffer: &RawBuffer,
        offset: u64,
        len: usize,
        f: impl FnOnce(*mut u8) -> R,
    ) -> Result<R> {
        if !buffer.class.is_host_visible() {
            return Err(RenderError::InvalidUpdate(format!(
                "{:?} buffer is not host visible",
                buffer.class
            )));
        }
        check_range(offset, len as u64, buffer.size)?;
        if len == 0 {
            return Ok(f(std::ptr::null_mut()));
        }
        let d = &self.device;
        let ptr = unsafe { d.map_memory(buffer.memory, offset, len as u64, vk::MemoryMapFlags::empty()) }?;
        let out = f(ptr.cast());
        unsafe { d.unmap_memory(buffer.memory) };
        Ok(out)
    }
}

impl ResourceAllocator for VkBackend {
    fn create_buffer(&self, size: u64, class: MemoryClass, usage: BufferUsage) -> Result<RawBuffer> {
        let ctx = &self.ctx;
        let d = self.device();
        let families = ctx.queues.sharing_families();
        let info = vk::BufferCreateInfo {
            s_type: vk::StructureType::BUFFER_CREATE_INFO,
            // zero-sized buffers are invalid; the recorded size stays as asked
            size: size.max(4),
            usage: buffer_usage_flags(class, usage),
            sharing_mode: ctx.queues.sharing_mode(),
            queue_family_index_count: families.len() as u32,
            p_queue_family_indices: families.as_ptr(),
            ..Default::default()
        };
        unsafe {
            let buffer = d.create_buffer(&info, None)?;
            let req = d.get_buffer_memory_requirements(buffer);
            let memory = match ctx.allocate_for(req, memory_flags(class)) {
                Ok(m) => m,
                Err(e) => {
                    d.destroy_buffer(buffer, None);
                    return Err(e);
                }
            };
            if let Err(e) = d.bind_buffer_memory(buffer, memory, 0) {
                d.destroy_buffer(buffer, None);
                d.free_memory(memory, None);
                return Err(e.into());
            }
            debug!("vk: {class:?} buffer {size} bytes");
            Ok(RawBuffer {
                buffer,
                memory,
                size,
                class,
            })
        }
    }

    fn destroy_buffer(&self, buffer: RawBuffer) {
        let d = self.device();
        unsafe {
            d.destroy_buffer(buffer.buffer, None);
            d.free_memory(buffer.memory, None);
        }
    }

    fn create_image(&self, desc: &ImageDesc) -> Result<RawImage> {
        let d = self.device();
        let info = vk::ImageCreateInfo {
            s_type: vk::StructureType::IMAGE_CREATE_INFO,
            image_type: vk::ImageType::TYPE_2D,
            format: desc.format,
            extent: vk::Extent3D {
                width: desc.extent.width,
                height: desc.extent.height,
                depth: 1,
            },
            mip_levels: 1,
            array_layers: 1,
            samples: vk::SampleCountFlags::TYPE_1,
            tiling: vk::ImageTiling::OPTIMAL,
            usage: desc.usage,
            sharing_mode: vk::SharingMode::EXCLUSIVE,
            initial_layout: vk::ImageLayout::UNDEFINED,
            ..Default::default()
        };
        unsafe {
            let image = d.create_image(&info, None)?;
            let req = d.get_image_memory_requirements(image);
            let memory = match self
                .ctx
                .allocate_for(req, vk::MemoryPropertyFlags::DEVICE_LOCAL)
            {
                Ok(m) => m,
                Err(e) => {
                    d.destroy_image(image, None);
                    return Err(e);
                }
            };
            let view = d.bind_image_memory(image, memory, 0).and_then(|()| {
                let view_info = vk::ImageViewCreateInfo {
                    s_type: vk::StructureType::IMAGE_VIEW_CREATE_INFO,
                    image,
                    view_type: vk::ImageViewType::TYPE_2D,
                    format: desc.format,
                    subresource_range: vk::ImageSubresourceRange {
                        aspect_mask: desc.aspect,
                        base_mip_level: 0,
                        level_count: 1,
                        base_array_layer: 0,
                        layer_count: 1,
                    },
                    ..Default::default()
                };
                d.create_image_view(&view_info, None)
            });
            match view {
                Ok(view) => Ok(RawImage {
                    image,
                    memory,
                    view,
                    extent: desc.extent,
                    format: desc.format,
                }),
                Err(e) => {
                    d.destroy_image(image, None);
                    d.free_memory(memory, None);
                    Err(e.into())
                }
            }
        }
    }

    fn destroy_image(&self, image: RawImage) {
        let d = self.device();
        unsafe {
            d.destroy_image_view(image.view, None);
            d.destroy_image(image.image, None);
            d.free_memory(image.memory, None);
        }
    }

    fn write_buffer(&self, buffer: &RawBuffer, offset: u64, data: &[u8]) -> Result<()> {
        unsafe {
            self.ctx.with_mapped(buffer, offset, data.len(), |dst| {
                if !dst.is_null() {
                    std::ptr::copy_nonoverlapping(data.as_ptr(), dst, data.len());
                }
            })
        }
    }

    fn read_buffer(&self, buffer: &RawBuffer, offset: u64, out: &mut [u8]) -> Result<()> {
        let len = out.len();
        unsafe {
            self.ctx.with_mapped(buffer, offset, len, |src| {
                if !src.is_null() {
                    std::ptr::copy_nonoverlapping(src, out.as_mut_ptr(), len);
                }
            })
        }
    }
}
