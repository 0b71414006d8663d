// SPDX-License-Identifier: CEPL-1.0
use super::PresentationTarget;
use crate::alloc::RawImage;
use crate::error::{RenderError, Result};
use crate::vulkan::VkContext;
use ash::khr::swapchain;
use ash::vk;
use carto_render::{RenderSize, RendererConfig, VsyncMode};
use std::sync::Arc;
use tracing::{debug, info, warn};

fn pm_name(m: vk::PresentModeKHR) -> &'static str {
    match m {
        vk::PresentModeKHR::FIFO => "FIFO",
        vk::PresentModeKHR::MAILBOX => "MAILBOX",
        vk::PresentModeKHR::IMMEDIATE => "IMMEDIATE",
        vk::PresentModeKHR::FIFO_RELAXED => "FIFO_RELAXED",
        _ => "OTHER",
    }
}

pub(crate) fn choose_present_mode(
    modes: &[vk::PresentModeKHR],
    vsync: bool,
    mode: VsyncMode,
) -> vk::PresentModeKHR {
    let order: &[vk::PresentModeKHR] = match (vsync, mode) {
        (false, _) => &[
            vk::PresentModeKHR::IMMEDIATE,
            vk::PresentModeKHR::MAILBOX,
            vk::PresentModeKHR::FIFO,
        ],
        (true, VsyncMode::Mailbox) => &[vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::FIFO],
        (true, VsyncMode::Fifo) => &[vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX],
    };
    order
        .iter()
        .copied()
        .find(|m| modes.contains(m))
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

/// SDR only: sRGB formats first, then UNORM with the sRGB color space, then
/// whatever the driver lists first.
pub(crate) fn pick_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    let find = |pred: &dyn Fn(&vk::SurfaceFormatKHR) -> bool| formats.iter().copied().find(|f| pred(f));
    find(&|f| f.format == vk::Format::B8G8R8A8_SRGB)
        .or_else(|| find(&|f| f.format == vk::Format::R8G8B8A8_SRGB))
        .or_else(|| {
            find(&|f| {
                f.format == vk::Format::B8G8R8A8_UNORM
                    && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
            })
        })
        .or_else(|| formats.first().copied())
}

pub(crate) fn extent_from_caps(caps: &vk::SurfaceCapabilitiesKHR, want: RenderSize) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        caps.current_extent
    } else {
        vk::Extent2D {
            width: want
                .width
                .clamp(caps.min_image_extent.width, caps.max_image_extent.width),
            height: want
                .height
                .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
        }
    }
}

/// One more than the minimum, clamped to the maximum (0 = unbounded).
pub(crate) fn image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let want = caps.min_image_count + 1;
    if caps.max_image_count > 0 {
        want.min(caps.max_image_count)
    } else {
        want
    }
}

/// A window surface's swapchain. Rendering waits on `acquire_sem`; present
/// waits on `present_sem`. Frames are fully drained before the next acquire,
/// so one pair of semaphores is enough.
pub struct SwapchainTarget {
    ctx: Arc<VkContext>,
    loader: swapchain::Device,
    swapchain: vk::SwapchainKHR,
    surface_format: vk::SurfaceFormatKHR,
    extent: vk::Extent2D,
    images: Vec<vk::Image>,
    views: Vec<vk::ImageView>,
    framebuffers: Vec<vk::Framebuffer>,
    acquire_sem: vk::Semaphore,
    present_sem: vk::Semaphore,
    current: Option<u32>,
    needs_resize: bool,
    vsync: bool,
    vsync_mode: VsyncMode,
}

unsafe fn create_semaphore(device: &ash::Device) -> Result<vk::Semaphore> {
    let info = vk::SemaphoreCreateInfo {
        s_type: vk::StructureType::SEMAPHORE_CREATE_INFO,
        ..Default::default()
    };
    Ok(unsafe { device.create_semaphore(&info, None) }?)
}

impl SwapchainTarget {
    /// The context must have been created with a window. Images come with the
    /// first `resize`.
    pub fn new(ctx: Arc<VkContext>, cfg: &RendererConfig) -> Result<Self> {
        let loader = ctx
            .swapchain_loader
            .clone()
            .ok_or_else(|| RenderError::Window("context has no surface".into()))?;
        let d = &ctx.device;
        let acquire_sem = unsafe { create_semaphore(d)? };
        let present_sem = match unsafe { create_semaphore(d) } {
            Ok(s) => s,
            Err(e) => {
                unsafe { d.destroy_semaphore(acquire_sem, None) };
                return Err(e);
            }
        };
        Ok(Self {
            loader,
            swapchain: vk::SwapchainKHR::null(),
            surface_format: vk::SurfaceFormatKHR::default(),
            extent: vk::Extent2D::default(),
            images: Vec::new(),
            views: Vec::new(),
            framebuffers: Vec::new(),
            acquire_sem,
            present_sem,
            current: None,
            needs_resize: true,
            vsync: cfg.vsync,
            vsync_mode: cfg.vsync_mode,
            ctx,
        })
    }

    fn destroy_framebuffers(&mut self) {
        let d = &self.ctx.device;
        for fb in self.framebuffers.drain(..) {
            unsafe { d.destroy_framebuffer(fb, None) };
        }
    }

    fn destroy_views(&mut self) {
        let d = &self.ctx.device;
        for iv in self.views.drain(..) {
            unsafe { d.destroy_image_view(iv, None) };
        }
        self.images.clear();
    }

    fn destroy_swapchain(&mut self) {
        self.destroy_framebuffers();
        self.destroy_views();
        if self.swapchain != vk::SwapchainKHR::null() {
            unsafe { self.loader.destroy_swapchain(self.swapchain, None) };
            self.swapchain = vk::SwapchainKHR::null();
        }
        self.current = None;
    }

    unsafe fn recreate(&mut self, preferred: RenderSize) -> Result<RenderSize> {
        let ctx = Arc::clone(&self.ctx);
        let surface = ctx
            .surface
            .as_ref()
            .ok_or_else(|| RenderError::Window("context has no surface".into()))?;
        let (phys, handle) = (ctx.physical, surface.handle);
        let caps = unsafe { surface.loader.get_physical_device_surface_capabilities(phys, handle) }?;
        let extent = extent_from_caps(&caps, preferred);
        if extent.width == 0 || extent.height == 0 {
            // minimized; try again on the next resize
            return Err(RenderError::Vk(vk::Result::ERROR_OUT_OF_DATE_KHR));
        }
        let formats = unsafe { surface.loader.get_physical_device_surface_formats(phys, handle) }?;
        let modes = unsafe { surface.loader.get_physical_device_surface_present_modes(phys, handle) }?;
        let format = pick_surface_format(&formats)
            .ok_or(RenderError::Vk(vk::Result::ERROR_FORMAT_NOT_SUPPORTED))?;
        let present_mode = choose_present_mode(&modes, self.vsync, self.vsync_mode);

        let mut usage = vk::ImageUsageFlags::COLOR_ATTACHMENT;
        if caps
            .supported_usage_flags
            .contains(vk::ImageUsageFlags::TRANSFER_SRC)
        {
            usage |= vk::ImageUsageFlags::TRANSFER_SRC;
        }
        let pre_transform = if caps
            .supported_transforms
            .contains(vk::SurfaceTransformFlagsKHR::IDENTITY)
        {
            vk::SurfaceTransformFlagsKHR::IDENTITY
        } else {
            caps.current_transform
        };
        let queues = ctx.queues;
        let families = queues.sharing_families();

        // STRICT ORDER: old views/framebuffers go first, the old swapchain only
        // after the new one has been created from it.
        self.destroy_framebuffers();
        self.destroy_views();
        let old = std::mem::replace(&mut self.swapchain, vk::SwapchainKHR::null());
        let info = vk::SwapchainCreateInfoKHR {
            s_type: vk::StructureType::SWAPCHAIN_CREATE_INFO_KHR,
            surface: handle,
            min_image_count: image_count(&caps),
            image_format: format.format,
            image_color_space: format.color_space,
            image_extent: extent,
            image_array_layers: 1,
            image_usage: usage,
            image_sharing_mode: queues.sharing_mode(),
            queue_family_index_count: families.len() as u32,
            p_queue_family_indices: families.as_ptr(),
            pre_transform,
            composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
            present_mode,
            clipped: vk::TRUE,
            old_swapchain: old,
            ..Default::default()
        };
        let created = unsafe { self.loader.create_swapchain(&info, None) };
        if old != vk::SwapchainKHR::null() {
            unsafe { self.loader.destroy_swapchain(old, None) };
        }
        self.swapchain = created?;
        self.surface_format = format;
        self.extent = extent;
        self.images = unsafe { self.loader.get_swapchain_images(self.swapchain) }?;

        let d = &ctx.device;
        for &image in &self.images {
            let info = vk::ImageViewCreateInfo {
                s_type: vk::StructureType::IMAGE_VIEW_CREATE_INFO,
                image,
                view_type: vk::ImageViewType::TYPE_2D,
                format: format.format,
                subresource_range: vk::ImageSubresourceRange {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    base_mip_level: 0,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: 1,
                },
                ..Default::default()
            };
            self.views.push(unsafe { d.create_image_view(&info, None) }?);
        }

        info!(
            "swapchain {}x{} {:?}/{:?} {} images, {}",
            extent.width,
            extent.height,
            format.format,
            format.color_space,
            self.images.len(),
            pm_name(present_mode)
        );
        Ok(RenderSize::new(extent.width, extent.height))
    }
}

impl PresentationTarget for SwapchainTarget {
    fn needs_present_queue(&self) -> bool {
        true
    }

    fn resize(&mut self, preferred: RenderSize) -> Result<RenderSize> {
        match unsafe { self.recreate(preferred) } {
            Ok(size) => {
                self.needs_resize = false;
                Ok(size)
            }
            Err(e) => {
                self.destroy_swapchain();
                self.needs_resize = true;
                Err(e)
            }
        }
    }

    fn create_framebuffers(&mut self, render_pass: vk::RenderPass, depth: &RawImage) -> Result<()> {
        self.destroy_framebuffers();
        let ctx = Arc::clone(&self.ctx);
        let d = &ctx.device;
        let mut built = Vec::with_capacity(self.views.len());
        for &view in &self.views {
            let attachments = [view, depth.view];
            let info = vk::FramebufferCreateInfo {
                s_type: vk::StructureType::FRAMEBUFFER_CREATE_INFO,
                render_pass,
                attachment_count: attachments.len() as u32,
                p_attachments: attachments.as_ptr(),
                width: self.extent.width,
                height: self.extent.height,
                layers: 1,
                ..Default::default()
            };
            match unsafe { d.create_framebuffer(&info, None) } {
                Ok(fb) => built.push(fb),
                Err(e) => {
                    for fb in built {
                        unsafe { d.destroy_framebuffer(fb, None) };
                    }
                    self.needs_resize = true;
                    return Err(e.into());
                }
            }
        }
        self.framebuffers = built;
        Ok(())
    }

    fn start_frame(&mut self) -> bool {
        self.current = None;
        if self.swapchain == vk::SwapchainKHR::null() || self.framebuffers.len() != self.images.len() {
            return false;
        }
        let acquired = unsafe {
            self.loader
                .acquire_next_image(self.swapchain, u64::MAX, self.acquire_sem, vk::Fence::null())
        };
        match acquired {
            Ok((index, suboptimal)) => {
                if suboptimal {
                    debug!("swapchain suboptimal; resizing after this frame");
                    self.needs_resize = true;
                }
                self.current = Some(index);
                true
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                self.needs_resize = true;
                false
            }
            Err(e) => {
                warn!("acquire_next_image: {e}");
                self.needs_resize = true;
                false
            }
        }
    }

    fn end_frame(&mut self, wait: bool) -> std::result::Result<(), vk::Result> {
        let Some(index) = self.current.take() else {
            return Ok(());
        };
        let present = vk::PresentInfoKHR {
            s_type: vk::StructureType::PRESENT_INFO_KHR,
            wait_semaphore_count: 1,
            p_wait_semaphores: &self.present_sem,
            swapchain_count: 1,
            p_swapchains: &self.swapchain,
            p_image_indices: &index,
            ..Default::default()
        };
        let queue = self.ctx.present_queue;
        match unsafe { self.loader.queue_present(queue, &present) } {
            Ok(false) => {}
            Ok(true) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                debug!("present: surface out of date");
                self.needs_resize = true;
            }
            Err(e) => {
                self.needs_resize = true;
                return Err(e);
            }
        }
        if wait {
            unsafe { self.ctx.device.queue_wait_idle(queue) }?;
        }
        Ok(())
    }

    fn discard_frame(&mut self) {
        // The acquire semaphore may still be pending and the image stays
        // acquired: swap the semaphore and rebuild the swapchain to get it back.
        if self.current.take().is_none() {
            return;
        }
        let d = &self.ctx.device;
        unsafe {
            if let Err(e) = d.device_wait_idle() {
                warn!("discard_frame: device_wait_idle: {e}");
            }
            match create_semaphore(d) {
                Ok(fresh) => {
                    d.destroy_semaphore(self.acquire_sem, None);
                    self.acquire_sem = fresh;
                }
                Err(e) => warn!("discard_frame: replacing acquire semaphore: {e}"),
            }
        }
        self.needs_resize = true;
    }

    fn current_image(&self) -> Option<vk::Image> {
        self.current.and_then(|i| self.images.get(i as usize).copied())
    }

    fn current_image_index(&self) -> Option<u32> {
        self.current
    }

    fn current_framebuffer(&self) -> Option<vk::Framebuffer> {
        self.current
            .and_then(|i| self.framebuffers.get(i as usize).copied())
    }

    fn acquire_semaphore(&self) -> Option<vk::Semaphore> {
        Some(self.acquire_sem)
    }

    fn present_semaphore(&self) -> Option<vk::Semaphore> {
        Some(self.present_sem)
    }

    fn color_format(&self) -> vk::Format {
        self.surface_format.format
    }

    fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    fn final_layout(&self) -> vk::ImageLayout {
        vk::ImageLayout::PRESENT_SRC_KHR
    }

    fn resize_requested(&self) -> bool {
        self.needs_resize
    }

    fn request_resize(&mut self) {
        self.needs_resize = true;
    }

    fn set_vsync(&mut self, on: bool) {
        if self.vsync != on {
            self.vsync = on;
            self.needs_resize = true;
        }
    }

    fn destroy(&mut self) {
        unsafe {
            if let Err(e) = self.ctx.device.device_wait_idle() {
                warn!("swapchain teardown: device_wait_idle: {e}");
            }
        }
        self.destroy_swapchain();
        let d = &self.ctx.device;
        for sem in [&mut self.acquire_sem, &mut self.present_sem] {
            if *sem != vk::Semaphore::null() {
                unsafe { d.destroy_semaphore(*sem, None) };
                *sem = vk::Semaphore::null();
            }
        }
    }
}
