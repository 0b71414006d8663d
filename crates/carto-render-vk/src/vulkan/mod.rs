// SPDX-License-Identifier: CEPL-1.0
//! The real device behind [`GpuBackend`](crate::backend::GpuBackend): instance, device, queues and the
//! handful of long-lived objects every backend call needs.
use crate::error::{RenderError, Result};
use crate::queue::QueueAssignment;
use ash::khr::swapchain;
use ash::vk;
use carto_render::RendererConfig;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

mod commands;
mod instance;
mod memory;
mod objects;

use instance::{DebugMessenger, Surface};

/// Raw handles of the window a swapchain presents to.
#[derive(Clone, Copy, Debug)]
pub struct WindowHandles {
    pub display: RawDisplayHandle,
    pub window: RawWindowHandle,
}

pub struct VkContext {
    // kept alive for the loader; never read after init
    _entry: ash::Entry,
    pub(crate) instance: ash::Instance,
    debug: Option<DebugMessenger>,
    pub(crate) surface: Option<Surface>,
    pub(crate) physical: vk::PhysicalDevice,
    pub(crate) memory_properties: vk::PhysicalDeviceMemoryProperties,
    pub(crate) device: ash::Device,
    pub(crate) swapchain_loader: Option<swapchain::Device>,
    pub(crate) queues: QueueAssignment,
    pub(crate) graphics_queue: vk::Queue,
    pub(crate) present_queue: vk::Queue,
    pub(crate) depth_format: vk::Format,
    pub(crate) command_pool: vk::CommandPool,
    pub(crate) pipeline_cache: vk::PipelineCache,
    cache_path: Option<PathBuf>,
    alive: AtomicBool,
}

/// Everything created so far during `VkContext::new`; dropping it undoes that.
struct Partial {
    entry: ash::Entry,
    instance: Option<ash::Instance>,
    debug: Option<DebugMessenger>,
    surface: Option<Surface>,
    device: Option<ash::Device>,
    command_pool: vk::CommandPool,
}

impl Drop for Partial {
    fn drop(&mut self) {
        unsafe {
            if let Some(device) = self.device.take() {
                if self.command_pool != vk::CommandPool::null() {
                    device.destroy_command_pool(self.command_pool, None);
                }
                device.destroy_device(None);
            }
            if let Some(s) = self.surface.take() {
                s.loader.destroy_surface(s.handle, None);
            }
            if let Some(d) = self.debug.take() {
                d.destroy();
            }
            if let Some(i) = self.instance.take() {
                i.destroy_instance(None);
            }
        }
    }
}

impl VkContext {
    /// Bring up Vulkan. With `window` the device must be able to present to it;
    /// without, any graphics-capable device will do.
    pub fn new(cfg: &RendererConfig, window: Option<WindowHandles>) -> Result<Self> {
        // STRICT ORDER:
        // 1) Instance (WSI extensions for `window`, debug utils if validating)
        // 2) Surface from THIS instance
        // 3) Physical device + queues checked AGAINST that surface
        // 4) Device, queues, pool, cache
        let entry = unsafe { ash::Entry::load() }.map_err(|e| RenderError::Loader(e.to_string()))?;
        let mut p = Partial {
            entry,
            instance: None,
            debug: None,
            surface: None,
            device: None,
            command_pool: vk::CommandPool::null(),
        };

        let (inst, validation) = unsafe {
            instance::create_instance(&p.entry, window.map(|w| w.display), cfg.validation)?
        };
        let inst = p.instance.insert(inst).clone();
        if validation {
            p.debug = Some(unsafe { instance::create_debug_messenger(&p.entry, &inst)? });
        }
        if let Some(w) = window {
            p.surface =
                Some(unsafe { instance::create_surface(&p.entry, &inst, w.display, w.window)? });
        }

        let (physical, queues) = unsafe { instance::pick_device(&inst, p.surface.as_ref())? };
        let device = unsafe { instance::create_device(&inst, physical, &queues, window.is_some())? };
        let device = p.device.insert(device).clone();
        p.command_pool = unsafe { instance::create_command_pool(&device, queues.graphics_index)? };

        let props = unsafe { inst.get_physical_device_properties(physical) };
        let cache_path = cfg
            .pipeline_cache
            .then(|| instance::pipeline_cache_path(&props));
        let pipeline_cache =
            unsafe { instance::create_or_load_pipeline_cache(&device, cache_path.as_deref())? };

        let ctx = unsafe {
            Self {
                memory_properties: inst.get_physical_device_memory_properties(physical),
                depth_format: instance::pick_depth_format(&inst, physical),
                graphics_queue: device.get_device_queue(queues.graphics_index, 0),
                present_queue: device.get_device_queue(queues.present_index, 0),
                swapchain_loader: window.map(|_| swapchain::Device::new(&inst, &device)),
                _entry: p.entry.clone(),
                instance: p.instance.take().ok_or_else(|| RenderError::NoDevice("instance lost".into()))?,
                debug: p.debug.take(),
                surface: p.surface.take(),
                device: p.device.take().ok_or_else(|| RenderError::NoDevice("device lost".into()))?,
                physical,
                queues,
                command_pool: std::mem::replace(&mut p.command_pool, vk::CommandPool::null()),
                pipeline_cache,
                cache_path,
                alive: AtomicBool::new(true),
            }
        };
        info!(
            "vk: device ready (depth {:?}, {} queue families)",
            ctx.depth_format,
            ctx.queues.unique_families().len()
        );
        Ok(ctx)
    }

    pub fn queues(&self) -> QueueAssignment {
        self.queues
    }

    pub(crate) fn queue(&self, role: crate::backend::QueueRole) -> vk::Queue {
        match role {
            crate::backend::QueueRole::Graphics => self.graphics_queue,
            crate::backend::QueueRole::Present => self.present_queue,
        }
    }

    pub(crate) fn find_memory_type(
        &self,
        type_bits: u32,
        req: vk::MemoryPropertyFlags,
    ) -> Option<u32> {
        let mem = &self.memory_properties;
        (0..mem.memory_type_count).find(|&i| {
            (type_bits & (1 << i)) != 0 && mem.memory_types[i as usize].property_flags.contains(req)
        })
    }

    /// Destroy the device and everything instance-level. Children (pools,
    /// pipelines, swapchains) must already be gone. Later calls do nothing.
    fn destroy(&self) {
        if !self.alive.swap(false, Ordering::AcqRel) {
            return;
        }
        // STRICT TEARDOWN ORDER:
        // - device_wait_idle()
        // - Save + destroy pipeline cache, destroy command pool
        // - Destroy device BEFORE surface
        // - Debug messenger, then instance last
        unsafe {
            let d = &self.device;
            if let Err(e) = d.device_wait_idle() {
                warn!("vk: device_wait_idle during shutdown: {e}");
            }
            if let Some(path) = &self.cache_path {
                instance::save_pipeline_cache(d, self.pipeline_cache, path);
            }
            d.destroy_pipeline_cache(self.pipeline_cache, None);
            d.destroy_command_pool(self.command_pool, None);
            d.destroy_device(None);
            if let Some(s) = &self.surface {
                s.loader.destroy_surface(s.handle, None);
            }
            if let Some(dbg) = &self.debug {
                dbg.destroy();
            }
            self.instance.destroy_instance(None);
        }
        info!("vk: shut down");
    }
}

impl Drop for VkContext {
    fn drop(&mut self) {
        if self.alive.load(Ordering::Acquire) {
            warn!("vk: context dropped without shutdown");
            self.destroy();
        }
    }
}

/// Shared handle onto one [`VkContext`]. Cloning is cheap; the device and
/// every presentation target hold one.
#[derive(Clone)]
pub struct VkBackend {
    ctx: Arc<VkContext>,
}

impl VkBackend {
    pub fn new(ctx: VkContext) -> Self {
        Self { ctx: Arc::new(ctx) }
    }

    pub fn context(&self) -> &Arc<VkContext> {
        &self.ctx
    }

    fn device(&self) -> &ash::Device {
        &self.ctx.device
    }
}
