// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
//! Vulkan renderer core: device, frame lifecycle and GPU resources behind the
//! `carto_render::Renderer` surface.
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use std::sync::Arc;
use tracing::info;

use carto_render::{RenderSize, RendererConfig};

mod alloc;
mod backend;
mod buffer;
mod context;
mod descriptor;
mod device;
mod draw;
mod error;
mod pipeline;
mod queue;
mod staging;
mod sync;
mod target;
mod texture;
mod vulkan;

#[cfg(test)]
mod testing;

pub use alloc::{ImageDesc, RawBuffer, RawImage, ResourceAllocator};
pub use backend::{Command, GpuBackend, ImageBarrier, QueueRole, SetBinding, Submission};
pub use buffer::{BufferHandle, MultiBuffer};
pub use context::{DrawContext, FrameState, INLINE_UPDATE_LIMIT};
pub use descriptor::{CapacityTable, DescriptorBackend, DescriptorPoolSet, SetLayout};
pub use device::{Device, FrameLock};
pub use draw::{DrawCall, IndexRange, RecordingState, TransformRing};
pub use error::{RenderError, Result};
pub use pipeline::{PipelineKind, PipelineSet, ShaderLibrary};
pub use queue::QueueAssignment;
pub use staging::StagingRing;
pub use sync::{SyncToken, TransferEvent};
pub use target::{OffscreenTarget, PresentationTarget, SwapchainTarget};
pub use texture::{vk_format, TextureHandle};
pub use vulkan::{VkBackend, VkContext, WindowHandles};

pub use ash::vk;

/// A draw context on the real Vulkan backend.
pub type VkDrawContext = DrawContext<VkBackend>;

/// Renderer presenting to `window` through a swapchain.
pub fn create_windowed<W>(window: &W, cfg: &RendererConfig, size: RenderSize) -> Result<VkDrawContext>
where
    W: HasDisplayHandle + HasWindowHandle,
{
    let handles = WindowHandles {
        display: window
            .display_handle()
            .map_err(|e| RenderError::Window(e.to_string()))?
            .as_raw(),
        window: window
            .window_handle()
            .map_err(|e| RenderError::Window(e.to_string()))?
            .as_raw(),
    };
    let backend = VkBackend::new(VkContext::new(cfg, Some(handles))?);
    let ctx = Arc::clone(backend.context());
    // STRICT ORDER: the device owns backend teardown, so it exists before the target
    let device = Arc::new(Device::new(backend, cfg)?);
    let target = match SwapchainTarget::new(ctx, cfg) {
        Ok(t) => t,
        Err(e) => {
            device.invalidate();
            return Err(e);
        }
    };
    info!("renderer: windowed {}x{}", size.width, size.height);
    DrawContext::new(
        device,
        Box::new(target),
        ShaderLibrary::from_dir(&cfg.shader_dir),
        cfg,
        size,
    )
}

/// Renderer drawing into an offscreen color image; no window or present queue.
pub fn create_offscreen(cfg: &RendererConfig, size: RenderSize) -> Result<VkDrawContext> {
    let backend = VkBackend::new(VkContext::new(cfg, None)?);
    let target = OffscreenTarget::new(backend.clone());
    let device = Arc::new(Device::new(backend, cfg)?);
    info!("renderer: offscreen {}x{}", size.width, size.height);
    DrawContext::new(
        device,
        Box::new(target),
        ShaderLibrary::from_dir(&cfg.shader_dir),
        cfg,
        size,
    )
}
