// SPDX-License-Identifier: CEPL-1.0
use crate::backend::{GpuBackend, SetBinding};
use crate::descriptor::{CapacityTable, DescriptorPoolSet, SetLayout};
use crate::error::{RenderError, Result};
use ash::vk;
use carto_render::{RendererConfig, SamplerKind};
use parking_lot::lock_api::ArcMutexGuard;
use parking_lot::{Mutex, RawMutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

/// Held from `start_frame` to `end_frame`; teardown waits on it.
pub type FrameLock = ArcMutexGuard<RawMutex, ()>;

#[derive(Debug, Default)]
struct DeviceObjects {
    globals_layout: Option<SetLayout>,
    texture_layout: Option<SetLayout>,
    linear: vk::Sampler,
    nearest: vk::Sampler,
}

impl DeviceObjects {
    fn destroy<G: GpuBackend>(&mut self, gpu: &G) {
        for s in [&mut self.linear, &mut self.nearest] {
            if *s != vk::Sampler::null() {
                gpu.destroy_sampler(*s);
                *s = vk::Sampler::null();
            }
        }
        for l in [self.globals_layout.take(), self.texture_layout.take()]
            .into_iter()
            .flatten()
        {
            gpu.destroy_set_layout(l.handle);
        }
    }
}

/// The renderer's device: backend, descriptor pools, samplers and the shared set layouts.
/// Created once, torn down once by `invalidate`.
pub struct Device<G: GpuBackend> {
    gpu: G,
    pools: Mutex<DescriptorPoolSet>,
    objects: Mutex<DeviceObjects>,
    globals_layout: SetLayout,
    texture_layout: SetLayout,
    linear: vk::Sampler,
    nearest: vk::Sampler,
    resources: Arc<Mutex<()>>,
    torn_down: Mutex<bool>,
    valid: AtomicBool,
}

impl<G: GpuBackend> Device<G> {
    /// Takes ownership of `gpu`. On failure everything created so far, the
    /// backend included, is destroyed again.
    pub fn new(gpu: G, cfg: &RendererConfig) -> Result<Self> {
        let mut objects = DeviceObjects::default();
        match Self::create_objects(&gpu, cfg, &mut objects) {
            Ok((pools, globals_layout, texture_layout)) => Ok(Self {
                linear: objects.linear,
                nearest: objects.nearest,
                globals_layout,
                texture_layout,
                gpu,
                pools: Mutex::new(pools),
                objects: Mutex::new(objects),
                resources: Arc::new(Mutex::new(())),
                torn_down: Mutex::new(false),
                valid: AtomicBool::new(true),
            }),
            Err(e) => {
                objects.destroy(&gpu);
                gpu.shutdown();
                Err(e)
            }
        }
    }

    fn create_objects(
        gpu: &G,
        cfg: &RendererConfig,
        out: &mut DeviceObjects,
    ) -> Result<(DescriptorPoolSet, SetLayout, SetLayout)> {
        let storage = vk::DescriptorType::STORAGE_BUFFER;
        let sampled = vk::DescriptorType::COMBINED_IMAGE_SAMPLER;

        let globals = SetLayout {
            handle: gpu.create_set_layout(&[SetBinding {
                binding: 0,
                ty: storage,
                stages: vk::ShaderStageFlags::VERTEX,
            }])?,
            demand: vec![(storage, 1)],
        };
        out.globals_layout = Some(globals.clone());
        let texture = SetLayout {
            handle: gpu.create_set_layout(&[SetBinding {
                binding: 0,
                ty: sampled,
                stages: vk::ShaderStageFlags::FRAGMENT,
            }])?,
            demand: vec![(sampled, 1)],
        };
        out.texture_layout = Some(texture.clone());
        out.linear = gpu.create_sampler(SamplerKind::Linear)?;
        out.nearest = gpu.create_sampler(SamplerKind::Nearest)?;

        let sets = cfg.descriptor_initial_sets.max(1);
        let capacity = CapacityTable::new(sets, &[(storage, sets), (sampled, sets)]);
        let pools = DescriptorPoolSet::new(gpu, capacity)?;
        Ok((pools, globals, texture))
    }

    pub fn gpu(&self) -> &G {
        &self.gpu
    }

    pub fn globals_layout(&self) -> &SetLayout {
        &self.globals_layout
    }

    pub fn texture_layout(&self) -> &SetLayout {
        &self.texture_layout
    }

    pub fn sampler(&self, kind: SamplerKind) -> vk::Sampler {
        match kind {
            SamplerKind::Linear => self.linear,
            SamplerKind::Nearest => self.nearest,
        }
    }

    pub fn allocate_set(&self, layout: &SetLayout) -> Result<vk::DescriptorSet> {
        self.ensure_valid()?;
        self.pools.lock().create_new_set(&self.gpu, layout)
    }

    pub fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Acquire)
    }

    pub fn ensure_valid(&self) -> Result<()> {
        if self.is_valid() {
            Ok(())
        } else {
            Err(RenderError::DeviceInvalidated)
        }
    }

    /// Blocks while another frame holds the lock; fails once the device is gone.
    pub fn lock_frame(&self) -> Result<FrameLock> {
        let guard = self.resources.lock_arc();
        self.ensure_valid()?;
        Ok(guard)
    }

    /// Tear everything down. Waits for an in-flight frame to finish; later calls are no-ops.
    pub fn invalidate(&self) {
        let mut torn_down = self.torn_down.lock();
        if *torn_down {
            return;
        }
        let _frame = self.resources.lock();
        self.valid.store(false, Ordering::Release);

        self.gpu.device_wait_idle();
        self.pools.lock().destroy(&self.gpu);
        self.objects.lock().destroy(&self.gpu);
        self.gpu.shutdown();

        *torn_down = true;
        info!("device invalidated");
    }
}

impl<G: GpuBackend> Drop for Device<G> {
    fn drop(&mut self) {
        if self.is_valid() {
            warn!("device dropped without invalidate; tearing down now");
        }
        self.invalidate();
    }
}
