// SPDX-License-Identifier: CEPL-1.0
use crate::alloc::RawImage;
use crate::error::Result;
use ash::vk;
use carto_render::RenderSize;

mod offscreen;
mod swapchain;

pub use offscreen::OffscreenTarget;
pub use swapchain::SwapchainTarget;

/// What the draw context renders into. Chosen once at construction.
///
/// `current_*` accessors are only meaningful between a successful `start_frame`
/// and the matching `end_frame`/`discard_frame`.
pub trait PresentationTarget {
    fn needs_present_queue(&self) -> bool;

    /// Rebuild for `preferred` (clamped to what the surface allows). On failure
    /// the target has no images and keeps asking for another resize.
    fn resize(&mut self, preferred: RenderSize) -> Result<RenderSize>;

    fn create_framebuffers(&mut self, render_pass: vk::RenderPass, depth: &RawImage)
        -> Result<()>;

    /// Acquire the next image. `false` means render nothing this frame.
    fn start_frame(&mut self) -> bool;

    /// Present (if this target presents). With `wait`, block until the present queue is idle.
    fn end_frame(&mut self, wait: bool) -> std::result::Result<(), vk::Result>;

    /// Give up an acquired image without presenting it.
    fn discard_frame(&mut self);

    fn current_image(&self) -> Option<vk::Image>;
    fn current_image_index(&self) -> Option<u32>;
    fn current_framebuffer(&self) -> Option<vk::Framebuffer>;

    fn acquire_semaphore(&self) -> Option<vk::Semaphore>;
    fn present_semaphore(&self) -> Option<vk::Semaphore>;

    fn color_format(&self) -> vk::Format;
    fn extent(&self) -> vk::Extent2D;
    /// Layout images are left in by the render pass.
    fn final_layout(&self) -> vk::ImageLayout;

    /// Set when the surface went out of date or the last resize failed.
    fn resize_requested(&self) -> bool;

    /// Ask for another `resize` at the next frame start.
    fn request_resize(&mut self);

    fn set_vsync(&mut self, _on: bool) {}

    fn destroy(&mut self);
}

pub(crate) fn to_extent(size: RenderSize) -> vk::Extent2D {
    vk::Extent2D {
        width: size.width,
        height: size.height,
    }
}
