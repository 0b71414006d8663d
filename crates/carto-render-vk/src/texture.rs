// SPDX-License-Identifier: CEPL-1.0
use crate::alloc::{ImageDesc, RawImage};
use crate::backend::{Command, GpuBackend, ImageBarrier};
use crate::context::{DrawContext, Retired};
use crate::error::{RenderError, Result};
use ash::vk;
use carto_render::{SamplerKind, TextureFormat, TextureRegion};
use std::cell::Cell;
use std::sync::Arc;
use tracing::debug;

pub fn vk_format(format: TextureFormat) -> vk::Format {
    match format {
        TextureFormat::Rgba8 => vk::Format::R8G8B8A8_UNORM,
        TextureFormat::Bgra8 => vk::Format::B8G8R8A8_UNORM,
        TextureFormat::R8 => vk::Format::R8_UNORM,
    }
}

#[derive(Debug)]
pub struct TextureHandle {
    image: RawImage,
    set: vk::DescriptorSet,
    format: TextureFormat,
    sampler: SamplerKind,
    // false until the first upload moves the image out of UNDEFINED
    initialized: Cell<bool>,
}

impl TextureHandle {
    pub fn width(&self) -> u32 {
        self.image.extent.width
    }

    pub fn height(&self) -> u32 {
        self.image.extent.height
    }

    pub fn format(&self) -> TextureFormat {
        self.format
    }

    pub fn sampler(&self) -> SamplerKind {
        self.sampler
    }

    pub fn descriptor_set(&self) -> vk::DescriptorSet {
        self.set
    }

    pub fn image(&self) -> vk::Image {
        self.image.image
    }
}

fn color_barrier(
    image: vk::Image,
    old_layout: vk::ImageLayout,
    new_layout: vk::ImageLayout,
) -> ImageBarrier {
    let (src_stage, src_access) = match old_layout {
        vk::ImageLayout::UNDEFINED => (vk::PipelineStageFlags::TOP_OF_PIPE, vk::AccessFlags::empty()),
        vk::ImageLayout::TRANSFER_DST_OPTIMAL => {
            (vk::PipelineStageFlags::TRANSFER, vk::AccessFlags::TRANSFER_WRITE)
        }
        _ => (vk::PipelineStageFlags::FRAGMENT_SHADER, vk::AccessFlags::SHADER_READ),
    };
    let (dst_stage, dst_access) = match new_layout {
        vk::ImageLayout::TRANSFER_DST_OPTIMAL => {
            (vk::PipelineStageFlags::TRANSFER, vk::AccessFlags::TRANSFER_WRITE)
        }
        _ => (vk::PipelineStageFlags::FRAGMENT_SHADER, vk::AccessFlags::SHADER_READ),
    };
    ImageBarrier {
        image,
        aspect: vk::ImageAspectFlags::COLOR,
        old_layout,
        new_layout,
        src_stage,
        dst_stage,
        src_access,
        dst_access,
    }
}

impl<G: GpuBackend> DrawContext<G> {
    pub fn generate_texture(
        &mut self,
        width: u32,
        height: u32,
        format: TextureFormat,
        sampler: SamplerKind,
        pixels: Option<&[u8]>,
    ) -> Result<TextureHandle> {
        let tex = self.create_texture_image(width, height, format, sampler)?;
        let uploaded = match pixels {
            Some(px) => self.update_texture(&tex, TextureRegion::whole(width, height), px),
            None => self.with_transfer(|_, gpu, cmd| {
                gpu.record(
                    cmd,
                    Command::ImageBarrier(color_barrier(
                        tex.image.image,
                        vk::ImageLayout::UNDEFINED,
                        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                    )),
                );
                tex.initialized.set(true);
                Ok(())
            }),
        };
        if let Err(e) = uploaded {
            self.retire(Retired::Image(tex.image));
            return Err(e);
        }
        Ok(tex)
    }

    fn create_texture_image(
        &mut self,
        width: u32,
        height: u32,
        format: TextureFormat,
        sampler: SamplerKind,
    ) -> Result<TextureHandle> {
        if width == 0 || height == 0 {
            return Err(RenderError::InvalidUpdate(format!(
                "texture size {width}x{height}"
            )));
        }
        let device = Arc::clone(self.device());
        device.ensure_valid()?;
        let gpu = device.gpu();
        let extent = vk::Extent2D { width, height };
        let image = gpu.create_image(&ImageDesc::sampled(extent, vk_format(format)))?;
        let set = match device.allocate_set(device.texture_layout()) {
            Ok(set) => set,
            Err(e) => {
                gpu.destroy_image(image);
                return Err(e);
            }
        };
        gpu.write_image_descriptor(set, 0, image.view, device.sampler(sampler));
        debug!("texture {width}x{height} {format:?} created");
        Ok(TextureHandle {
            image,
            set,
            format,
            sampler,
            initialized: Cell::new(false),
        })
    }

    /// Stage `pixels` (tightly packed rows of `region`) and copy them into the texture.
    pub fn update_texture(
        &mut self,
        tex: &TextureHandle,
        region: TextureRegion,
        pixels: &[u8],
    ) -> Result<()> {
        if !region.fits_within(tex.width(), tex.height()) {
            return Err(RenderError::InvalidUpdate(format!(
                "region {region:?} outside {}x{} texture",
                tex.width(),
                tex.height()
            )));
        }
        let len = region.width as u64 * region.height as u64 * tex.format.bytes_per_pixel() as u64;
        if (pixels.len() as u64) < len {
            return Err(RenderError::OutOfBounds {
                offset: 0,
                len,
                size: pixels.len() as u64,
            });
        }
        if len == 0 {
            return Ok(());
        }

        self.with_transfer(|ctx, gpu, cmd| {
            let staged = ctx.staging_mut().write(gpu, &pixels[..len as usize])?;
            let old = if tex.initialized.get() {
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
            } else {
                vk::ImageLayout::UNDEFINED
            };
            gpu.record(
                cmd,
                Command::ImageBarrier(color_barrier(
                    tex.image.image,
                    old,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                )),
            );
            gpu.record(
                cmd,
                Command::CopyBufferToImage {
                    src: staged.buffer,
                    dst: tex.image.image,
                    region: vk::BufferImageCopy {
                        buffer_offset: staged.offset,
                        buffer_row_length: 0,
                        buffer_image_height: 0,
                        image_subresource: vk::ImageSubresourceLayers {
                            aspect_mask: vk::ImageAspectFlags::COLOR,
                            mip_level: 0,
                            base_array_layer: 0,
                            layer_count: 1,
                        },
                        image_offset: vk::Offset3D {
                            x: region.x as i32,
                            y: region.y as i32,
                            z: 0,
                        },
                        image_extent: vk::Extent3D {
                            width: region.width,
                            height: region.height,
                            depth: 1,
                        },
                    },
                },
            );
            gpu.record(
                cmd,
                Command::ImageBarrier(color_barrier(
                    tex.image.image,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                )),
            );
            tex.initialized.set(true);
            Ok(())
        })
    }

    /// Swap in a fresh image of the new size. Contents are not preserved.
    pub fn resize_texture(&mut self, tex: &mut TextureHandle, width: u32, height: u32) -> Result<()> {
        let fresh = self.generate_texture(width, height, tex.format, tex.sampler, None)?;
        let old = std::mem::replace(tex, fresh);
        self.retire(Retired::Image(old.image));
        Ok(())
    }

    pub fn destroy_texture(&mut self, tex: TextureHandle) {
        self.retire(Retired::Image(tex.image));
    }
}
