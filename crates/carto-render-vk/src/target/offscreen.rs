// SPDX-License-Identifier: CEPL-1.0
use super::{to_extent, PresentationTarget};
use crate::alloc::{ImageDesc, RawImage};
use crate::backend::{GpuBackend, QueueRole};
use crate::error::{RenderError, Result};
use ash::vk;
use carto_render::RenderSize;
use tracing::{debug, info};

pub const OFFSCREEN_FORMAT: vk::Format = vk::Format::R8G8B8A8_UNORM;

/// A single color image nobody presents. Frames are read back with
/// `read_framebuffer`; the render pass leaves the image ready for the copy.
pub struct OffscreenTarget<G: GpuBackend> {
    gpu: G,
    color: Option<RawImage>,
    framebuffer: vk::Framebuffer,
    in_frame: bool,
}

impl<G: GpuBackend> OffscreenTarget<G> {
    /// `gpu` is a handle onto the same device the draw context uses.
    pub fn new(gpu: G) -> Self {
        Self {
            gpu,
            color: None,
            framebuffer: vk::Framebuffer::null(),
            in_frame: false,
        }
    }

    fn release(&mut self) {
        if self.framebuffer != vk::Framebuffer::null() {
            self.gpu.destroy_framebuffer(self.framebuffer);
            self.framebuffer = vk::Framebuffer::null();
        }
        if let Some(color) = self.color.take() {
            self.gpu.destroy_image(color);
        }
        self.in_frame = false;
    }
}

impl<G: GpuBackend> PresentationTarget for OffscreenTarget<G> {
    fn needs_present_queue(&self) -> bool {
        false
    }

    fn resize(&mut self, preferred: RenderSize) -> Result<RenderSize> {
        self.release();
        if preferred.is_empty() {
            return Err(RenderError::InvalidUpdate(format!(
                "offscreen size {}x{}",
                preferred.width, preferred.height
            )));
        }
        let color = self
            .gpu
            .create_image(&ImageDesc::render_target(to_extent(preferred), OFFSCREEN_FORMAT))?;
        self.color = Some(color);
        info!("offscreen target {}x{}", preferred.width, preferred.height);
        Ok(preferred)
    }

    fn create_framebuffers(&mut self, render_pass: vk::RenderPass, depth: &RawImage) -> Result<()> {
        if self.framebuffer != vk::Framebuffer::null() {
            self.gpu.destroy_framebuffer(self.framebuffer);
            self.framebuffer = vk::Framebuffer::null();
        }
        let color = self.color.ok_or(RenderError::NoImage)?;
        self.framebuffer =
            self.gpu
                .create_framebuffer(render_pass, &[color.view, depth.view], color.extent)?;
        Ok(())
    }

    fn start_frame(&mut self) -> bool {
        self.in_frame = self.color.is_some() && self.framebuffer != vk::Framebuffer::null();
        self.in_frame
    }

    fn end_frame(&mut self, wait: bool) -> std::result::Result<(), vk::Result> {
        self.in_frame = false;
        if wait {
            self.gpu.wait_idle(QueueRole::Graphics)?;
        }
        Ok(())
    }

    fn discard_frame(&mut self) {
        debug!("offscreen frame discarded");
        self.in_frame = false;
    }

    fn current_image(&self) -> Option<vk::Image> {
        self.color.filter(|_| self.in_frame).map(|c| c.image)
    }

    fn current_image_index(&self) -> Option<u32> {
        self.in_frame.then_some(0)
    }

    fn current_framebuffer(&self) -> Option<vk::Framebuffer> {
        self.in_frame.then_some(self.framebuffer)
    }

    fn acquire_semaphore(&self) -> Option<vk::Semaphore> {
        None
    }

    fn present_semaphore(&self) -> Option<vk::Semaphore> {
        None
    }

    fn color_format(&self) -> vk::Format {
        OFFSCREEN_FORMAT
    }

    fn extent(&self) -> vk::Extent2D {
        self.color.map(|c| c.extent).unwrap_or_default()
    }

    fn final_layout(&self) -> vk::ImageLayout {
        vk::ImageLayout::TRANSFER_SRC_OPTIMAL
    }

    fn resize_requested(&self) -> bool {
        self.color.is_none() || self.framebuffer == vk::Framebuffer::null()
    }

    fn request_resize(&mut self) {
        self.release();
    }

    fn destroy(&mut self) {
        self.release();
    }
}
