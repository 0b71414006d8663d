// SPDX-License-Identifier: CEPL-1.0
//! Recording backend and scripted target for unit tests. No GPU involved.
use crate::alloc::{check_range, ImageDesc, RawBuffer, RawImage, ResourceAllocator};
use crate::backend::{Command, GpuBackend, QueueRole, SetBinding, Submission};
use crate::context::DrawContext;
use crate::descriptor::DescriptorBackend;
use crate::device::Device;
use crate::error::{RenderError, Result};
use crate::pipeline::{PipelineDesc, ShaderLibrary};
use crate::queue::QueueAssignment;
use crate::target::PresentationTarget;
use ash::vk::{self, Handle};
use carto_render::{BufferUsage, MemoryClass, RenderSize, RendererConfig, SamplerKind};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubmitRecord {
    pub command_buffers: Vec<vk::CommandBuffer>,
    pub waited: bool,
    pub signaled: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Call {
    Begin(vk::CommandBuffer),
    End(vk::CommandBuffer),
    Record(vk::CommandBuffer, &'static str),
    Submit(SubmitRecord),
    WaitIdle(QueueRole),
    DeviceWaitIdle,
    Shutdown,
}

#[derive(Default)]
struct MockState {
    next_handle: u64,
    buffers: HashMap<vk::Buffer, Vec<u8>>,
    buffers_created: usize,
    images: HashSet<vk::Image>,
    pools: HashSet<vk::DescriptorPool>,
    sets: HashMap<vk::DescriptorSet, vk::DescriptorPool>,
    refuse_sets: bool,
    fail_next_pool: bool,
    samplers: HashSet<vk::Sampler>,
    framebuffers: HashSet<vk::Framebuffer>,
    recording: HashSet<vk::CommandBuffer>,
    commands: HashMap<vk::CommandBuffer, Vec<&'static str>>,
    calls: Vec<Call>,
    submit_failures: VecDeque<vk::Result>,
    image_failures: VecDeque<vk::Result>,
    shutdowns: usize,
}

impl MockState {
    fn handle(&mut self) -> u64 {
        self.next_handle += 1;
        0x1000 + self.next_handle
    }

    fn emulate(&mut self, command: &Command<'_>) {
        match *command {
            Command::UpdateBuffer { dst, offset, data } => {
                let mem = self.buffers.get_mut(&dst).expect("update of unknown buffer");
                mem[offset as usize..offset as usize + data.len()].copy_from_slice(data);
            }
            Command::CopyBuffer { src, dst, region } => {
                let from = self.buffers[&src]
                    [region.src_offset as usize..(region.src_offset + region.size) as usize]
                    .to_vec();
                let mem = self.buffers.get_mut(&dst).expect("copy into unknown buffer");
                mem[region.dst_offset as usize..(region.dst_offset + region.size) as usize]
                    .copy_from_slice(&from);
            }
            Command::CopyImageToBuffer { dst, region, .. } => {
                // every pixel reads back as bytes 1, 2, 3, 4
                let len = (region.image_extent.width * region.image_extent.height * 4) as usize;
                let start = region.buffer_offset as usize;
                let mem = self.buffers.get_mut(&dst).expect("readback into unknown buffer");
                for (i, b) in mem[start..start + len].iter_mut().enumerate() {
                    *b = (i % 4) as u8 + 1;
                }
            }
            _ => {}
        }
    }
}

/// Shares its state with every clone, so a `probe` keeps working after the
/// original has been moved into a `Device`.
#[derive(Clone, Default)]
pub struct MockGpu {
    state: Arc<Mutex<MockState>>,
}

impl MockGpu {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn probe(&self) -> MockGpu {
        self.clone()
    }

    pub fn buffers_created(&self) -> usize {
        self.state.lock().buffers_created
    }

    pub fn live_buffers(&self) -> usize {
        self.state.lock().buffers.len()
    }

    pub fn buffer_is_live(&self, buffer: vk::Buffer) -> bool {
        self.state.lock().buffers.contains_key(&buffer)
    }

    pub fn buffer_bytes(&self, buffer: vk::Buffer, offset: u64, len: usize) -> Vec<u8> {
        let s = self.state.lock();
        s.buffers[&buffer][offset as usize..offset as usize + len].to_vec()
    }

    pub fn image_is_live(&self, image: vk::Image) -> bool {
        self.state.lock().images.contains(&image)
    }

    pub fn descriptor_set_is_live(&self, set: vk::DescriptorSet) -> bool {
        let s = self.state.lock();
        s.sets.get(&set).is_some_and(|pool| s.pools.contains(pool))
    }

    pub fn refuse_descriptor_sets(&self, refuse: bool) {
        self.state.lock().refuse_sets = refuse;
    }

    pub fn fail_next_pool_creation(&self) {
        self.state.lock().fail_next_pool = true;
    }

    pub fn live_pools(&self) -> usize {
        self.state.lock().pools.len()
    }

    pub fn live_framebuffers(&self) -> usize {
        self.state.lock().framebuffers.len()
    }

    pub fn live_images(&self) -> usize {
        self.state.lock().images.len()
    }

    pub fn live_samplers(&self) -> usize {
        self.state.lock().samplers.len()
    }

    pub fn script_submit_failure(&self, result: vk::Result) {
        self.state.lock().submit_failures.push_back(result);
    }

    /// The next `create_image` fails with `result`.
    pub fn script_image_failure(&self, result: vk::Result) {
        self.state.lock().image_failures.push_back(result);
    }

    pub fn shutdowns(&self) -> usize {
        self.state.lock().shutdowns
    }

    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().calls.clone()
    }

    /// Commands of this name recorded since the last `clear_calls`.
    pub fn count(&self, name: &str) -> usize {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|c| matches!(c, Call::Record(_, n) if *n == name))
            .count()
    }

    pub fn submits(&self) -> Vec<SubmitRecord> {
        self.state
            .lock()
            .calls
            .iter()
            .filter_map(|c| match c {
                Call::Submit(s) => Some(s.clone()),
                _ => None,
            })
            .collect()
    }

    /// What `cmd` holds since it was last begun.
    pub fn commands_in(&self, cmd: vk::CommandBuffer) -> Vec<&'static str> {
        self.state
            .lock()
            .commands
            .get(&cmd)
            .cloned()
            .unwrap_or_default()
    }
}

impl ResourceAllocator for MockGpu {
    fn create_buffer(&self, size: u64, class: MemoryClass, _usage: BufferUsage) -> Result<RawBuffer> {
        let mut s = self.state.lock();
        let buffer = vk::Buffer::from_raw(s.handle());
        s.buffers.insert(buffer, vec![0; size as usize]);
        s.buffers_created += 1;
        Ok(RawBuffer {
            buffer,
            memory: vk::DeviceMemory::from_raw(s.handle()),
            size,
            class,
        })
    }

    fn destroy_buffer(&self, buffer: RawBuffer) {
        let removed = self.state.lock().buffers.remove(&buffer.buffer);
        assert!(removed.is_some(), "double destroy of {:?}", buffer.buffer);
    }

    fn create_image(&self, desc: &ImageDesc) -> Result<RawImage> {
        let mut s = self.state.lock();
        if let Some(r) = s.image_failures.pop_front() {
            return Err(r.into());
        }
        let image = vk::Image::from_raw(s.handle());
        s.images.insert(image);
        Ok(RawImage {
            image,
            memory: vk::DeviceMemory::from_raw(s.handle()),
            view: vk::ImageView::from_raw(s.handle()),
            extent: desc.extent,
            format: desc.format,
        })
    }

    fn destroy_image(&self, image: RawImage) {
        let removed = self.state.lock().images.remove(&image.image);
        assert!(removed, "double destroy of {:?}", image.image);
    }

    fn write_buffer(&self, buffer: &RawBuffer, offset: u64, data: &[u8]) -> Result<()> {
        check_range(offset, data.len() as u64, buffer.size)?;
        let mut s = self.state.lock();
        let mem = s.buffers.get_mut(&buffer.buffer).ok_or(RenderError::DeviceInvalidated)?;
        mem[offset as usize..offset as usize + data.len()].copy_from_slice(data);
        Ok(())
    }

    fn read_buffer(&self, buffer: &RawBuffer, offset: u64, out: &mut [u8]) -> Result<()> {
        check_range(offset, out.len() as u64, buffer.size)?;
        let s = self.state.lock();
        let mem = s.buffers.get(&buffer.buffer).ok_or(RenderError::DeviceInvalidated)?;
        out.copy_from_slice(&mem[offset as usize..offset as usize + out.len()]);
        Ok(())
    }
}

impl DescriptorBackend for MockGpu {
    fn create_descriptor_pool(
        &self,
        _max_sets: u32,
        _sizes: &[vk::DescriptorPoolSize],
    ) -> Result<vk::DescriptorPool> {
        let mut s = self.state.lock();
        if std::mem::take(&mut s.fail_next_pool) {
            return Err(RenderError::Vk(vk::Result::ERROR_OUT_OF_HOST_MEMORY));
        }
        let pool = vk::DescriptorPool::from_raw(s.handle());
        s.pools.insert(pool);
        Ok(pool)
    }

    fn allocate_descriptor_set(
        &self,
        pool: vk::DescriptorPool,
        _layout: vk::DescriptorSetLayout,
    ) -> std::result::Result<vk::DescriptorSet, vk::Result> {
        let mut s = self.state.lock();
        if s.refuse_sets {
            return Err(vk::Result::ERROR_OUT_OF_POOL_MEMORY);
        }
        assert!(s.pools.contains(&pool), "allocation from dead pool");
        let set = vk::DescriptorSet::from_raw(s.handle());
        s.sets.insert(set, pool);
        Ok(set)
    }

    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool) {
        self.state.lock().pools.remove(&pool);
    }
}

impl GpuBackend for MockGpu {
    fn queues(&self) -> QueueAssignment {
        QueueAssignment {
            graphics_index: 0,
            present_index: 0,
            is_universal: true,
        }
    }

    fn depth_format(&self) -> vk::Format {
        vk::Format::D32_SFLOAT
    }

    fn create_command_buffers(&self, count: u32) -> Result<Vec<vk::CommandBuffer>> {
        let mut s = self.state.lock();
        Ok((0..count)
            .map(|_| vk::CommandBuffer::from_raw(s.handle()))
            .collect())
    }

    fn begin_commands(&self, cmd: vk::CommandBuffer) -> Result<()> {
        let mut s = self.state.lock();
        assert!(s.recording.insert(cmd), "{cmd:?} begun twice");
        s.commands.insert(cmd, Vec::new());
        s.calls.push(Call::Begin(cmd));
        Ok(())
    }

    fn end_commands(&self, cmd: vk::CommandBuffer) -> Result<()> {
        let mut s = self.state.lock();
        assert!(s.recording.remove(&cmd), "{cmd:?} ended while not recording");
        s.calls.push(Call::End(cmd));
        Ok(())
    }

    fn record(&self, cmd: vk::CommandBuffer, command: Command<'_>) {
        let mut s = self.state.lock();
        assert!(
            s.recording.contains(&cmd),
            "{} recorded into idle {cmd:?}",
            command.name()
        );
        s.emulate(&command);
        s.commands.entry(cmd).or_default().push(command.name());
        s.calls.push(Call::Record(cmd, command.name()));
    }

    fn submit(&self, submission: &Submission<'_>) -> std::result::Result<(), vk::Result> {
        let mut s = self.state.lock();
        for cmd in submission.command_buffers {
            assert!(!s.recording.contains(cmd), "{cmd:?} submitted while recording");
        }
        s.calls.push(Call::Submit(SubmitRecord {
            command_buffers: submission.command_buffers.to_vec(),
            waited: submission.wait.is_some(),
            signaled: submission.signal.is_some(),
        }));
        match s.submit_failures.pop_front() {
            Some(r) => Err(r),
            None => Ok(()),
        }
    }

    fn wait_idle(&self, role: QueueRole) -> std::result::Result<(), vk::Result> {
        self.state.lock().calls.push(Call::WaitIdle(role));
        Ok(())
    }

    fn device_wait_idle(&self) {
        self.state.lock().calls.push(Call::DeviceWaitIdle);
    }

    fn create_event(&self) -> Result<vk::Event> {
        Ok(vk::Event::from_raw(self.state.lock().handle()))
    }

    fn destroy_event(&self, _event: vk::Event) {}

    fn create_render_pass(
        &self,
        _color: vk::Format,
        _depth: vk::Format,
        _final_layout: vk::ImageLayout,
    ) -> Result<vk::RenderPass> {
        Ok(vk::RenderPass::from_raw(self.state.lock().handle()))
    }

    fn destroy_render_pass(&self, _render_pass: vk::RenderPass) {}

    fn create_framebuffer(
        &self,
        _render_pass: vk::RenderPass,
        _attachments: &[vk::ImageView],
        _extent: vk::Extent2D,
    ) -> Result<vk::Framebuffer> {
        let mut s = self.state.lock();
        let fb = vk::Framebuffer::from_raw(s.handle());
        s.framebuffers.insert(fb);
        Ok(fb)
    }

    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer) {
        let removed = self.state.lock().framebuffers.remove(&framebuffer);
        assert!(removed, "double destroy of {framebuffer:?}");
    }

    fn create_set_layout(&self, _bindings: &[SetBinding]) -> Result<vk::DescriptorSetLayout> {
        Ok(vk::DescriptorSetLayout::from_raw(self.state.lock().handle()))
    }

    fn destroy_set_layout(&self, _layout: vk::DescriptorSetLayout) {}

    fn create_pipeline_layout(
        &self,
        _set_layouts: &[vk::DescriptorSetLayout],
        _push_constant_bytes: u32,
    ) -> Result<vk::PipelineLayout> {
        Ok(vk::PipelineLayout::from_raw(self.state.lock().handle()))
    }

    fn destroy_pipeline_layout(&self, _layout: vk::PipelineLayout) {}

    fn create_pipeline(&self, _desc: &PipelineDesc<'_>) -> Result<vk::Pipeline> {
        Ok(vk::Pipeline::from_raw(self.state.lock().handle()))
    }

    fn destroy_pipeline(&self, _pipeline: vk::Pipeline) {}

    fn create_sampler(&self, _kind: SamplerKind) -> Result<vk::Sampler> {
        let mut s = self.state.lock();
        let sampler = vk::Sampler::from_raw(s.handle());
        s.samplers.insert(sampler);
        Ok(sampler)
    }

    fn destroy_sampler(&self, sampler: vk::Sampler) {
        self.state.lock().samplers.remove(&sampler);
    }

    fn write_buffer_descriptor(
        &self,
        _set: vk::DescriptorSet,
        _binding: u32,
        _ty: vk::DescriptorType,
        _buffer: vk::Buffer,
        _range: u64,
    ) {
    }

    fn write_image_descriptor(
        &self,
        _set: vk::DescriptorSet,
        _binding: u32,
        _view: vk::ImageView,
        _sampler: vk::Sampler,
    ) {
    }

    fn shutdown(&self) {
        let mut s = self.state.lock();
        s.shutdowns += 1;
        s.calls.push(Call::Shutdown);
    }
}

/// Knobs and counters shared between a test and its `ScriptedTarget`.
#[derive(Debug)]
pub struct TargetScript {
    pub fail_resize: bool,
    /// What a failing resize reports.
    pub resize_error: vk::Result,
    /// Results of the next presents; empty means success.
    pub present_results: VecDeque<vk::Result>,
    pub acquire_ok: bool,
    pub format: vk::Format,
    pub resizes: usize,
    pub presents: usize,
    pub discards: usize,
    pub framebuffer_builds: usize,
}

impl Default for TargetScript {
    fn default() -> Self {
        Self {
            fail_resize: false,
            resize_error: vk::Result::ERROR_OUT_OF_DATE_KHR,
            present_results: VecDeque::new(),
            acquire_ok: true,
            format: vk::Format::B8G8R8A8_UNORM,
            resizes: 0,
            presents: 0,
            discards: 0,
            framebuffer_builds: 0,
        }
    }
}

const SCRIPTED_IMAGES: u32 = 3;

/// Swapchain stand-in with three fake images.
pub struct ScriptedTarget {
    script: Arc<Mutex<TargetScript>>,
    extent: vk::Extent2D,
    has_images: bool,
    has_framebuffers: bool,
    needs_resize: bool,
    current: Option<u32>,
    next: u32,
}

impl ScriptedTarget {
    pub fn new(script: Arc<Mutex<TargetScript>>) -> Self {
        Self {
            script,
            extent: vk::Extent2D::default(),
            has_images: false,
            has_framebuffers: false,
            needs_resize: false,
            current: None,
            next: 0,
        }
    }
}

impl PresentationTarget for ScriptedTarget {
    fn needs_present_queue(&self) -> bool {
        true
    }

    fn resize(&mut self, preferred: RenderSize) -> Result<RenderSize> {
        let mut script = self.script.lock();
        script.resizes += 1;
        self.has_framebuffers = false;
        self.current = None;
        if script.fail_resize {
            self.has_images = false;
            self.needs_resize = true;
            return Err(script.resize_error.into());
        }
        self.extent = vk::Extent2D {
            width: preferred.width,
            height: preferred.height,
        };
        self.has_images = true;
        self.needs_resize = false;
        Ok(preferred)
    }

    fn create_framebuffers(&mut self, _render_pass: vk::RenderPass, _depth: &RawImage) -> Result<()> {
        if !self.has_images {
            return Err(RenderError::NoImage);
        }
        self.has_framebuffers = true;
        self.script.lock().framebuffer_builds += 1;
        Ok(())
    }

    fn start_frame(&mut self) -> bool {
        if !self.has_images || !self.script.lock().acquire_ok {
            return false;
        }
        self.current = Some(self.next);
        self.next = (self.next + 1) % SCRIPTED_IMAGES;
        true
    }

    fn end_frame(&mut self, _wait: bool) -> std::result::Result<(), vk::Result> {
        let mut script = self.script.lock();
        script.presents += 1;
        self.current = None;
        match script.present_results.pop_front() {
            Some(r) => {
                self.needs_resize = true;
                Err(r)
            }
            None => Ok(()),
        }
    }

    fn discard_frame(&mut self) {
        self.script.lock().discards += 1;
        self.current = None;
    }

    fn current_image(&self) -> Option<vk::Image> {
        self.current
            .map(|i| vk::Image::from_raw(0x9000 + u64::from(i)))
    }

    fn current_image_index(&self) -> Option<u32> {
        self.current
    }

    fn current_framebuffer(&self) -> Option<vk::Framebuffer> {
        self.current
            .filter(|_| self.has_framebuffers)
            .map(|i| vk::Framebuffer::from_raw(0xA000 + u64::from(i)))
    }

    fn acquire_semaphore(&self) -> Option<vk::Semaphore> {
        Some(vk::Semaphore::from_raw(0xB001))
    }

    fn present_semaphore(&self) -> Option<vk::Semaphore> {
        Some(vk::Semaphore::from_raw(0xB002))
    }

    fn color_format(&self) -> vk::Format {
        self.script.lock().format
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

    fn destroy(&mut self) {
        self.has_images = false;
        self.has_framebuffers = false;
    }
}

fn spirv_blob() -> Vec<u8> {
    [0x0723_0203u32, 0x0001_0000, 0, 1, 0]
        .iter()
        .flat_map(|w| w.to_le_bytes())
        .collect()
}

/// A 64x48 draw context over a fresh `MockGpu` and a `ScriptedTarget`.
pub fn harness(script: TargetScript) -> (DrawContext<MockGpu>, Arc<Mutex<TargetScript>>) {
    let cfg = RendererConfig {
        transform_capacity: 8,
        descriptor_initial_sets: 4,
        staging_initial_bytes: 4096,
        ..RendererConfig::default()
    };
    let device = Arc::new(Device::new(MockGpu::new(), &cfg).expect("mock device"));
    let script = Arc::new(Mutex::new(script));
    let blob = spirv_blob();
    let shaders = ShaderLibrary::in_memory()
        .with_bytes("flat", &blob, &blob)
        .and_then(|lib| lib.with_bytes("textured", &blob, &blob))
        .expect("in-memory shaders");
    let ctx = DrawContext::new(
        device,
        Box::new(ScriptedTarget::new(Arc::clone(&script))),
        shaders,
        &cfg,
        RenderSize::new(64, 48),
    )
    .expect("draw context over mock");
    (ctx, script)
}
