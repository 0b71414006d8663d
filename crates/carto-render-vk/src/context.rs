// SPDX-License-Identifier: CEPL-1.0
use crate::alloc::{check_range, ImageDesc, RawBuffer, RawImage};
use crate::backend::{Command, GpuBackend, ImageBarrier, QueueRole, Submission};
use crate::buffer::{BufferHandle, MultiBuffer};
use crate::device::{Device, FrameLock};
use crate::draw::{emit_draw, DrawCall, RecordingState, TransformRing};
use crate::error::{RenderError, Result};
use crate::pipeline::{PipelineKind, PipelineSet, ShaderLibrary};
use crate::staging::StagingRing;
use crate::sync::{write_after_write, TransferEvent};
use crate::target::{to_extent, PresentationTarget};
use ash::vk;
use carto_render::{
    BufferUsage, FrameStatus, MemoryClass, RenderSize, Renderer, RendererConfig,
};
use glam::Mat4;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Largest Static update recorded inline; anything bigger goes through staging.
pub const INLINE_UPDATE_LIMIT: u64 = 65_536;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameState {
    Idle,
    Recording,
    Submitted,
}

/// Resources whose destruction waits for the recording frame to finish.
#[derive(Debug)]
pub(crate) enum Retired {
    Buffer(RawBuffer),
    Image(RawImage),
}

impl Retired {
    fn destroy<G: GpuBackend + ?Sized>(self, gpu: &G) {
        match self {
            Retired::Buffer(b) => gpu.destroy_buffer(b),
            Retired::Image(i) => gpu.destroy_image(i),
        }
    }
}

#[derive(Debug)]
struct FrameCommands {
    transfer: vk::CommandBuffer,
    graphics: vk::CommandBuffer,
    // one-shot uploads outside a frame
    upload: vk::CommandBuffer,
    event: TransferEvent,
}

/// Frame lifecycle and resource front end for one presentation target.
///
/// `start_frame` begins a transfer and a graphics command buffer; everything
/// recorded until `end_frame` is submitted as one batch, transfer first.
pub struct DrawContext<G: GpuBackend> {
    device: Arc<Device<G>>,
    target: Box<dyn PresentationTarget>,
    shaders: ShaderLibrary,

    state: FrameState,
    frame: FrameCommands,
    serial: u64,
    image: Option<u32>,
    frame_lock: Option<FrameLock>,

    pending_resize: Option<RenderSize>,
    paused: bool,
    size: RenderSize,

    render_pass: vk::RenderPass,
    color_format: vk::Format,
    depth: Option<RawImage>,
    pipelines: Option<PipelineSet>,

    staging: StagingRing,
    transforms: TransformRing,
    transform_buffer: Option<MultiBuffer>,
    transform_sets: Vec<vk::DescriptorSet>,
    current_transform: u32,

    recording: RecordingState,
    in_render_pass: bool,
    retired: Vec<Retired>,
    clear_color: [f32; 4],
}

impl<G: GpuBackend> DrawContext<G> {
    /// Build the frame machinery around `target` and size it to `size`.
    /// The context owns teardown: dropping it invalidates `device`.
    pub fn new(
        device: Arc<Device<G>>,
        mut target: Box<dyn PresentationTarget>,
        shaders: ShaderLibrary,
        cfg: &RendererConfig,
        size: RenderSize,
    ) -> Result<Self> {
        let transforms = TransformRing::new(cfg.transform_capacity);
        let (frame, transform_buffer) = match Self::frame_objects(&device, &transforms) {
            Ok(v) => v,
            Err(e) => {
                target.destroy();
                return Err(e);
            }
        };

        let mut ctx = Self {
            target,
            shaders,
            state: FrameState::Idle,
            frame,
            serial: 0,
            image: None,
            frame_lock: None,
            pending_resize: None,
            paused: false,
            size,
            render_pass: vk::RenderPass::null(),
            color_format: vk::Format::UNDEFINED,
            depth: None,
            pipelines: None,
            staging: StagingRing::new(cfg.staging_initial_bytes),
            transforms,
            transform_buffer: Some(transform_buffer),
            transform_sets: Vec::new(),
            current_transform: 0,
            recording: RecordingState::default(),
            in_render_pass: false,
            retired: Vec::new(),
            clear_color: cfg.clear_color,
            device,
        };
        // on failure `ctx` drops here and releases what was built
        ctx.apply_resize(size)?;
        info!(
            "draw context ready ({}x{}, {:?})",
            ctx.size.width, ctx.size.height, ctx.color_format
        );
        Ok(ctx)
    }

    fn frame_objects(
        device: &Device<G>,
        transforms: &TransformRing,
    ) -> Result<(FrameCommands, MultiBuffer)> {
        device.ensure_valid()?;
        let gpu = device.gpu();
        let cbs = gpu.create_command_buffers(3)?;
        let [transfer, graphics, upload] = cbs[..] else {
            return Err(RenderError::Init {
                what: "command buffer allocation",
                result: vk::Result::ERROR_INITIALIZATION_FAILED,
            });
        };
        let event = TransferEvent::new(gpu)?;
        match MultiBuffer::create(
            gpu,
            transforms.byte_capacity(),
            MemoryClass::Dynamic,
            BufferUsage::STORAGE,
        ) {
            Ok(b) => Ok((
                FrameCommands {
                    transfer,
                    graphics,
                    upload,
                    event,
                },
                b,
            )),
            Err(e) => {
                event.destroy(gpu);
                Err(e)
            }
        }
    }

    pub fn device(&self) -> &Arc<Device<G>> {
        &self.device
    }

    pub fn state(&self) -> FrameState {
        self.state
    }

    /// Serial of the current (or last) frame; starts at 1.
    pub fn frame_serial(&self) -> u64 {
        self.serial
    }

    pub fn size(&self) -> RenderSize {
        self.size
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn color_format(&self) -> vk::Format {
        self.color_format
    }

    pub(crate) fn staging_mut(&mut self) -> &mut StagingRing {
        &mut self.staging
    }

    pub(crate) fn transfer_commands(&self) -> vk::CommandBuffer {
        self.frame.transfer
    }

    // ---- frame lifecycle ----

    pub fn start_frame(&mut self) -> Result<FrameStatus> {
        if self.state == FrameState::Recording {
            debug!("start_frame while recording; closing frame {}", self.serial);
            self.end_frame()?;
        }

        if let Some(size) = self.pending_resize.take() {
            self.apply_resize(size)?;
        } else if !self.paused && self.target.resize_requested() {
            self.apply_resize(self.size)?;
        }

        self.frame_lock = Some(self.device.lock_frame()?);
        self.serial += 1;

        let transform_set = match self.next_transform_set() {
            Ok(set) => set,
            Err(e) => {
                self.frame_lock = None;
                return Err(e);
            }
        };

        let acquired = !self.paused && self.target.start_frame();
        self.image = match (
            acquired,
            self.target.current_image_index(),
            self.target.current_framebuffer(),
        ) {
            (true, Some(index), Some(_)) => Some(index),
            (true, ..) => {
                self.target.discard_frame();
                None
            }
            _ => None,
        };

        let device = Arc::clone(&self.device);
        let gpu = device.gpu();
        let (transfer, graphics) = (self.frame.transfer, self.frame.graphics);
        if let Err(e) = gpu.begin_commands(transfer) {
            self.abort_start();
            return Err(e);
        }
        if let Err(e) = gpu.begin_commands(graphics) {
            if let Err(e) = gpu.end_commands(transfer) {
                debug!("ending transfer commands after failed begin: {e}");
            }
            self.abort_start();
            return Err(e);
        }

        self.state = FrameState::Recording;
        self.staging.reset();
        self.transforms.reset();
        self.current_transform = 0;
        self.recording = RecordingState::default();
        self.in_render_pass = false;

        gpu.record(transfer, self.frame.event.reset());
        gpu.record(graphics, self.frame.event.wait());

        if let (Some(_), Some(framebuffer)) = (self.image, self.target.current_framebuffer()) {
            let extent = self.target.extent();
            gpu.record(
                graphics,
                Command::BeginRenderPass {
                    render_pass: self.render_pass,
                    framebuffer,
                    extent,
                    clear_color: self.clear_color,
                },
            );
            gpu.record(graphics, Command::SetViewport { extent });
            if let Some(pipelines) = &self.pipelines {
                gpu.record(
                    graphics,
                    Command::BindDescriptorSet {
                        layout: pipelines.layout,
                        index: 0,
                        set: transform_set,
                    },
                );
            }
            self.in_render_pass = true;
        }

        Ok(if self.image.is_some() {
            FrameStatus::Ready
        } else {
            FrameStatus::Degraded
        })
    }

    fn abort_start(&mut self) {
        if self.image.take().is_some() {
            self.target.discard_frame();
        }
        self.frame_lock = None;
        self.state = FrameState::Idle;
    }

    /// Submit the frame and, if it has an image, present it and wait for the
    /// present queue. A no-op unless recording.
    pub fn end_frame(&mut self) -> Result<()> {
        if self.state != FrameState::Recording {
            return Ok(());
        }
        let device = Arc::clone(&self.device);
        let gpu = device.gpu();
        let (transfer, graphics) = (self.frame.transfer, self.frame.graphics);

        if let Err(e) = self.flush_transforms(gpu) {
            error!("transform upload failed: {e}");
        }
        if self.in_render_pass {
            gpu.record(graphics, Command::EndRenderPass);
            self.in_render_pass = false;
        }
        gpu.record(transfer, self.frame.event.signal());

        let ended = gpu.end_commands(transfer).and(gpu.end_commands(graphics));
        self.state = FrameState::Submitted;

        let outcome = match ended {
            Ok(()) => self.submit_and_present(gpu, [transfer, graphics]),
            Err(e) => {
                if self.image.is_some() {
                    self.target.discard_frame();
                }
                match e {
                    RenderError::DeviceLost => Err(e),
                    e => {
                        warn!("frame {} dropped: {e}", self.serial);
                        Ok(())
                    }
                }
            }
        };

        // everything above has waited for the queues; nothing references these any more
        for r in self.retired.drain(..) {
            r.destroy(gpu);
        }
        self.frame_lock = None;
        self.image = None;
        self.state = FrameState::Idle;
        outcome
    }

    fn submit_and_present(&mut self, gpu: &G, cbs: [vk::CommandBuffer; 2]) -> Result<()> {
        let has_image = self.image.is_some();
        let submission = Submission {
            command_buffers: &cbs,
            wait: self
                .target
                .acquire_semaphore()
                .filter(|_| has_image)
                .map(|s| (s, vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)),
            signal: self.target.present_semaphore().filter(|_| has_image),
        };

        if let Err(r) = gpu.submit(&submission) {
            if has_image {
                self.target.discard_frame();
            }
            settle(gpu);
            return frame_failure(self.serial, "submit", r);
        }

        if has_image {
            if let Err(r) = self.target.end_frame(true) {
                settle(gpu);
                return frame_failure(self.serial, "present", r);
            }
        } else if let Err(r) = gpu.wait_idle(QueueRole::Graphics) {
            return frame_failure(self.serial, "queue wait", r);
        }
        Ok(())
    }

    fn flush_transforms(&self, gpu: &G) -> Result<()> {
        match &self.transform_buffer {
            Some(mb) => gpu.write_buffer(mb.current().raw(), 0, self.transforms.as_bytes()),
            None => Ok(()),
        }
    }

    fn next_transform_set(&mut self) -> Result<vk::DescriptorSet> {
        let device = Arc::clone(&self.device);
        let gpu = device.gpu();
        let mb = self
            .transform_buffer
            .as_mut()
            .ok_or(RenderError::DeviceInvalidated)?;
        mb.reset();
        let buf = mb.inc(gpu)?;
        let (buffer, range) = (buf.native(), buf.size());
        let generation = mb.current_index();
        while self.transform_sets.len() <= generation {
            let set = device.allocate_set(device.globals_layout())?;
            gpu.write_buffer_descriptor(set, 0, vk::DescriptorType::STORAGE_BUFFER, buffer, range);
            self.transform_sets.push(set);
        }
        Ok(self.transform_sets[generation])
    }

    // ---- size, target ----

    /// Deferred until the next `start_frame`. An empty size pauses rendering.
    pub fn resize(&mut self, size: RenderSize) {
        self.pending_resize = Some(size);
    }

    pub fn set_vsync(&mut self, on: bool) {
        self.target.set_vsync(on);
    }

    fn apply_resize(&mut self, size: RenderSize) -> Result<()> {
        if size.is_empty() {
            if !self.paused {
                info!("render size is empty; pausing");
            }
            self.paused = true;
            return Ok(());
        }
        self.paused = false;

        let device = Arc::clone(&self.device);
        device.ensure_valid()?;
        let gpu = device.gpu();
        gpu.device_wait_idle();

        // kept on failure so the retry asks for the same size
        self.size = size;
        let actual = match self.target.resize(size) {
            Ok(actual) => actual,
            Err(RenderError::DeviceLost) => return Err(RenderError::DeviceLost),
            Err(e) => {
                warn!("target resize to {}x{} failed: {e}", size.width, size.height);
                self.target.request_resize();
                return Ok(());
            }
        };
        self.size = actual;

        let format = self.target.color_format();
        if format != self.color_format || self.render_pass == vk::RenderPass::null() {
            self.rebuild_pipelines(&device, format)?;
        }

        if let Some(old) = self.depth.take() {
            gpu.destroy_image(old);
        }
        let depth = match gpu.create_image(&ImageDesc::depth(to_extent(actual), gpu.depth_format())) {
            Ok(depth) => depth,
            Err(RenderError::DeviceLost) => return Err(RenderError::DeviceLost),
            Err(e) => {
                warn!("depth buffer {}x{} failed: {e}", actual.width, actual.height);
                self.target.request_resize();
                return Ok(());
            }
        };
        self.depth = Some(depth);

        match self.target.create_framebuffers(self.render_pass, &depth) {
            Ok(()) => {}
            Err(RenderError::DeviceLost) => return Err(RenderError::DeviceLost),
            Err(e) => {
                warn!("framebuffer creation failed: {e}");
                self.target.request_resize();
            }
        }
        debug!("resized to {}x{}", actual.width, actual.height);
        Ok(())
    }

    fn rebuild_pipelines(&mut self, device: &Device<G>, format: vk::Format) -> Result<()> {
        let gpu = device.gpu();
        if let Some(mut old) = self.pipelines.take() {
            old.destroy(gpu);
        }
        if self.render_pass != vk::RenderPass::null() {
            gpu.destroy_render_pass(self.render_pass);
            self.render_pass = vk::RenderPass::null();
        }
        self.render_pass =
            gpu.create_render_pass(format, gpu.depth_format(), self.target.final_layout())?;
        let layouts = [device.globals_layout().handle, device.texture_layout().handle];
        self.pipelines = Some(PipelineSet::create(
            gpu,
            &mut self.shaders,
            self.render_pass,
            &layouts,
        )?);
        self.color_format = format;
        info!("pipelines built for {format:?}");
        Ok(())
    }

    // ---- clears, readback ----

    pub fn set_clear_color(&mut self, rgba: [f32; 4]) {
        self.clear_color = rgba;
    }

    pub fn clear_framebuffer(&mut self, rgba: [f32; 4]) {
        self.record_clear(Some(rgba), None);
    }

    pub fn clear_depth_buffer(&mut self) {
        self.record_clear(None, Some(1.0));
    }

    fn record_clear(&mut self, color: Option<[f32; 4]>, depth: Option<f32>) {
        if !self.in_render_pass {
            return;
        }
        self.device.gpu().record(
            self.frame.graphics,
            Command::ClearAttachments {
                color,
                depth,
                extent: self.target.extent(),
            },
        );
    }

    /// Copy the top-left `width`x`height` RGBA8 pixels of the current frame into
    /// `pixels` (rows of `width * 4` bytes). Ends the frame.
    pub fn read_framebuffer(&mut self, pixels: &mut [u8], width: u32, height: u32) -> Result<()> {
        if self.state != FrameState::Recording {
            return Err(RenderError::NoImage);
        }
        let stride = width as usize * 4;
        let needed = (stride * height as usize) as u64;
        if (pixels.len() as u64) < needed {
            return Err(RenderError::OutOfBounds {
                offset: 0,
                len: needed,
                size: pixels.len() as u64,
            });
        }
        let image = match (self.image, self.target.current_image()) {
            (Some(_), Some(image)) => image,
            _ => {
                self.end_frame()?;
                return Err(RenderError::NoImage);
            }
        };
        let extent = self.target.extent();
        let (w, h) = (width.min(extent.width), height.min(extent.height));
        if w == 0 || h == 0 {
            return self.end_frame();
        }

        let device = Arc::clone(&self.device);
        let gpu = device.gpu();
        let row = w as usize * 4;
        let bytes = (row * h as usize) as u64;
        let readback = BufferHandle::create(gpu, bytes, MemoryClass::Readback, BufferUsage::TRANSFER_DST)?;

        let graphics = self.frame.graphics;
        if self.in_render_pass {
            gpu.record(graphics, Command::EndRenderPass);
            self.in_render_pass = false;
        }
        let layout = self.target.final_layout();
        let transition = layout != vk::ImageLayout::TRANSFER_SRC_OPTIMAL;
        if transition {
            gpu.record(graphics, Command::ImageBarrier(readback_barrier(image, layout, true)));
        }
        gpu.record(
            graphics,
            Command::CopyImageToBuffer {
                src: image,
                dst: readback.native(),
                region: vk::BufferImageCopy {
                    buffer_offset: 0,
                    buffer_row_length: 0,
                    buffer_image_height: 0,
                    image_subresource: vk::ImageSubresourceLayers {
                        aspect_mask: vk::ImageAspectFlags::COLOR,
                        mip_level: 0,
                        base_array_layer: 0,
                        layer_count: 1,
                    },
                    image_offset: vk::Offset3D::default(),
                    image_extent: vk::Extent3D {
                        width: w,
                        height: h,
                        depth: 1,
                    },
                },
            },
        );
        if transition {
            gpu.record(graphics, Command::ImageBarrier(readback_barrier(image, layout, false)));
        }

        let mut tight = vec![0u8; bytes as usize];
        let read = self.end_frame().and_then(|()| {
            gpu.wait_idle(QueueRole::Graphics)?;
            gpu.read_buffer(readback.raw(), 0, &mut tight)
        });
        gpu.destroy_buffer(readback.into_raw());
        read?;

        let bgra = matches!(
            self.color_format,
            vk::Format::B8G8R8A8_UNORM | vk::Format::B8G8R8A8_SRGB
        );
        for (y, src) in tight.chunks_exact(row).enumerate() {
            let dst = &mut pixels[y * stride..y * stride + row];
            dst.copy_from_slice(src);
            if bgra {
                for px in dst.chunks_exact_mut(4) {
                    px.swap(0, 2);
                }
            }
        }
        Ok(())
    }

    // ---- buffers ----

    pub fn create_buffer(
        &mut self,
        size: u64,
        class: MemoryClass,
        usage: BufferUsage,
    ) -> Result<BufferHandle> {
        self.device.ensure_valid()?;
        BufferHandle::create(self.device.gpu(), size, class, usage)
    }

    pub fn create_multi_buffer(
        &mut self,
        size: u64,
        class: MemoryClass,
        usage: BufferUsage,
    ) -> Result<MultiBuffer> {
        self.device.ensure_valid()?;
        MultiBuffer::create(self.device.gpu(), size, class, usage)
    }

    /// Advance `buffer` to its next generation, creating it on first use.
    pub fn next_generation<'a>(&self, buffer: &'a mut MultiBuffer) -> Result<&'a BufferHandle> {
        self.device.ensure_valid()?;
        buffer.inc(self.device.gpu())
    }

    pub fn destroy_buffer(&mut self, buffer: BufferHandle) {
        self.retire(Retired::Buffer(buffer.into_raw()));
    }

    pub fn destroy_multi_buffer(&mut self, buffer: MultiBuffer) {
        for b in buffer.into_buffers() {
            self.retire(Retired::Buffer(b.into_raw()));
        }
    }

    pub fn update_buffer_at(&mut self, buffer: &BufferHandle, offset: u64, data: &[u8]) -> Result<()> {
        self.update_buffer_regions(buffer, &[(offset, data)])
    }

    /// Scattered writes into one buffer. All ranges are checked before anything is written.
    pub fn update_buffer_regions(&mut self, buffer: &BufferHandle, regions: &[(u64, &[u8])]) -> Result<()> {
        for &(offset, data) in regions {
            check_range(offset, data.len() as u64, buffer.size())?;
        }
        match buffer.memory_class() {
            MemoryClass::Readback => Err(RenderError::InvalidUpdate(
                "readback buffers are only written by the device".into(),
            )),
            MemoryClass::Dynamic | MemoryClass::Staging => {
                self.device.ensure_valid()?;
                let gpu = self.device.gpu();
                for &(offset, data) in regions {
                    gpu.write_buffer(buffer.raw(), offset, data)?;
                }
                Ok(())
            }
            MemoryClass::Static => {
                if regions.iter().all(|(_, d)| d.is_empty()) {
                    return Ok(());
                }
                let dst = buffer.native();
                let recording = self.state == FrameState::Recording;
                let rewrite = recording && buffer.sync_token().written_in(self.serial);
                self.with_transfer(|ctx, gpu, cmd| {
                    if rewrite {
                        gpu.record(cmd, write_after_write(dst));
                    }
                    for &(offset, data) in regions {
                        ctx.record_static_update(gpu, cmd, dst, offset, data)?;
                    }
                    Ok(())
                })?;
                if recording {
                    buffer.sync_token().mark_written(self.serial);
                }
                Ok(())
            }
        }
    }

    fn record_static_update(
        &mut self,
        gpu: &G,
        cmd: vk::CommandBuffer,
        dst: vk::Buffer,
        offset: u64,
        data: &[u8],
    ) -> Result<()> {
        let len = data.len() as u64;
        if len == 0 {
            return Ok(());
        }
        if len <= INLINE_UPDATE_LIMIT && offset % 4 == 0 && len % 4 == 0 {
            gpu.record(cmd, Command::UpdateBuffer { dst, offset, data });
            return Ok(());
        }
        let staged = self.staging.write(gpu, data)?;
        gpu.record(
            cmd,
            Command::CopyBuffer {
                src: staged.buffer,
                dst,
                region: vk::BufferCopy {
                    src_offset: staged.offset,
                    dst_offset: offset,
                    size: len,
                },
            },
        );
        Ok(())
    }

    /// Run `record` against the frame's transfer command buffer, or outside a
    /// frame against a one-shot buffer that is submitted and waited on.
    pub(crate) fn with_transfer<F>(&mut self, record: F) -> Result<()>
    where
        F: FnOnce(&mut Self, &G, vk::CommandBuffer) -> Result<()>,
    {
        let device = Arc::clone(&self.device);
        let gpu = device.gpu();
        if self.state == FrameState::Recording {
            device.ensure_valid()?;
            let cmd = self.frame.transfer;
            return record(self, gpu, cmd);
        }

        let _lock = device.lock_frame()?;
        let cmd = self.frame.upload;
        gpu.begin_commands(cmd)?;
        let recorded = record(self, gpu, cmd);
        let ended = gpu.end_commands(cmd);
        let result = recorded.and(ended).and_then(|()| {
            gpu.submit(&Submission {
                command_buffers: &[cmd],
                wait: None,
                signal: None,
            })?;
            gpu.wait_idle(QueueRole::Graphics)?;
            Ok(())
        });
        self.staging.reset();
        result
    }

    /// Destroy now, or after the recording frame has finished with it.
    pub(crate) fn retire(&mut self, resource: Retired) {
        if self.state == FrameState::Recording {
            self.retired.push(resource);
        } else if self.device.is_valid() {
            resource.destroy(self.device.gpu());
        }
    }

    // ---- drawing ----

    /// Push a transform for the following draws; returns its slot.
    pub fn set_global_attributes(&mut self, transform: Mat4) -> Result<u32> {
        let slot = self.transforms.push(transform)?;
        self.current_transform = slot;
        Ok(slot)
    }

    /// Following draws use the identity transform again.
    pub fn reset_global_attributes(&mut self) {
        self.current_transform = 0;
    }

    /// Dropped silently when the frame has nothing to draw into.
    pub fn draw(&mut self, call: &DrawCall) -> Result<()> {
        if call.kind == PipelineKind::Textured && call.texture.is_none() {
            return Err(RenderError::InvalidUpdate("textured draw without a texture".into()));
        }
        if !self.in_render_pass {
            return Ok(());
        }
        let Some(pipelines) = &self.pipelines else {
            return Ok(());
        };
        emit_draw(
            self.device.gpu(),
            self.frame.graphics,
            &mut self.recording,
            pipelines,
            self.current_transform,
            call,
        );
        Ok(())
    }
}

fn settle<G: GpuBackend + ?Sized>(gpu: &G) {
    if let Err(r) = gpu.wait_idle(QueueRole::Graphics) {
        debug!("wait after failed frame: {r}");
    }
}

fn frame_failure(serial: u64, what: &str, r: vk::Result) -> Result<()> {
    match RenderError::from(r) {
        RenderError::DeviceLost => {
            error!("{what} of frame {serial}: device lost");
            Err(RenderError::DeviceLost)
        }
        e => {
            warn!("{what} of frame {serial} failed, frame dropped: {e}");
            Ok(())
        }
    }
}

fn readback_barrier(image: vk::Image, layout: vk::ImageLayout, to_transfer: bool) -> ImageBarrier {
    let attachment = (
        vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
    );
    let transfer = (vk::PipelineStageFlags::TRANSFER, vk::AccessFlags::TRANSFER_READ);
    let (old_layout, new_layout, src, dst) = if to_transfer {
        (layout, vk::ImageLayout::TRANSFER_SRC_OPTIMAL, attachment, transfer)
    } else {
        (
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            layout,
            transfer,
            (vk::PipelineStageFlags::BOTTOM_OF_PIPE, vk::AccessFlags::empty()),
        )
    };
    ImageBarrier {
        image,
        aspect: vk::ImageAspectFlags::COLOR,
        old_layout,
        new_layout,
        src_stage: src.0,
        dst_stage: dst.0,
        src_access: src.1,
        dst_access: dst.1,
    }
}

impl<G: GpuBackend> Drop for DrawContext<G> {
    fn drop(&mut self) {
        if let Err(e) = self.end_frame() {
            warn!("closing frame on drop: {e}");
        }
        let device = Arc::clone(&self.device);
        if let Ok(_frame) = device.lock_frame() {
            let gpu = device.gpu();
            gpu.device_wait_idle();
            for r in self.retired.drain(..) {
                r.destroy(gpu);
            }
            self.staging.destroy(gpu);
            if let Some(mb) = self.transform_buffer.take() {
                for b in mb.into_buffers() {
                    gpu.destroy_buffer(b.into_raw());
                }
            }
            if let Some(depth) = self.depth.take() {
                gpu.destroy_image(depth);
            }
            if let Some(mut pipelines) = self.pipelines.take() {
                pipelines.destroy(gpu);
            }
            if self.render_pass != vk::RenderPass::null() {
                gpu.destroy_render_pass(self.render_pass);
                self.render_pass = vk::RenderPass::null();
            }
            gpu.destroy_event(self.frame.event.handle());
            self.target.destroy();
        }
        device.invalidate();
    }
}

impl<G: GpuBackend> Renderer for DrawContext<G> {
    fn resize(&mut self, size: RenderSize) {
        DrawContext::resize(self, size);
    }

    fn start_frame(&mut self) -> anyhow::Result<FrameStatus> {
        Ok(DrawContext::start_frame(self)?)
    }

    fn end_frame(&mut self) -> anyhow::Result<()> {
        Ok(DrawContext::end_frame(self)?)
    }

    fn set_clear_color(&mut self, rgba: [f32; 4]) {
        DrawContext::set_clear_color(self, rgba);
    }

    fn clear_framebuffer(&mut self, rgba: [f32; 4]) {
        DrawContext::clear_framebuffer(self, rgba);
    }

    fn clear_depth_buffer(&mut self) {
        DrawContext::clear_depth_buffer(self);
    }

    fn read_framebuffer(&mut self, pixels: &mut [u8], width: u32, height: u32) -> anyhow::Result<()> {
        Ok(DrawContext::read_framebuffer(self, pixels, width, height)?)
    }

    fn set_vsync(&mut self, on: bool) {
        DrawContext::set_vsync(self, on);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{harness, Call, TargetScript};

    fn vertices(ctx: &mut DrawContext<crate::testing::MockGpu>, class: MemoryClass) -> BufferHandle {
        ctx.create_buffer(1 << 20, class, BufferUsage::VERTEX).unwrap()
    }

    #[test]
    fn double_start_closes_the_open_frame() {
        let (mut ctx, script) = harness(TargetScript::default());
        assert_eq!(ctx.start_frame().unwrap(), FrameStatus::Ready);
        // the mock panics on a second begin of a recording command buffer
        assert_eq!(ctx.start_frame().unwrap(), FrameStatus::Ready);
        ctx.end_frame().unwrap();
        assert_eq!(ctx.state(), FrameState::Idle);
        assert_eq!(script.lock().presents, 2);
        assert_eq!(ctx.device().gpu().submits().len(), 2);
    }

    #[test]
    fn frame_contract_through_trait_object() {
        let (mut ctx, script) = harness(TargetScript::default());
        let r: &mut dyn Renderer = &mut ctx;
        r.set_clear_color([0.1, 0.2, 0.3, 1.0]);
        assert_eq!(r.start_frame().unwrap(), FrameStatus::Ready);
        r.clear_depth_buffer();
        r.end_frame().unwrap();
        assert_eq!(script.lock().presents, 1);
        assert_eq!(ctx.state(), FrameState::Idle);
    }

    #[test]
    fn failed_resize_degrades_and_still_reaches_idle() {
        let (mut ctx, script) = harness(TargetScript::default());
        script.lock().fail_resize = true;
        ctx.resize(RenderSize::new(128, 96));
        ctx.device().gpu().clear_calls();

        assert_eq!(ctx.start_frame().unwrap(), FrameStatus::Degraded);
        let buf = vertices(&mut ctx, MemoryClass::Dynamic);
        ctx.draw(&DrawCall::geometry(&buf, 3)).unwrap();
        ctx.clear_framebuffer([1.0; 4]);
        ctx.end_frame().unwrap();

        let gpu = ctx.device().gpu();
        assert_eq!(gpu.count("draw"), 0);
        assert_eq!(gpu.count("begin_render_pass"), 0);
        assert_eq!(gpu.count("clear_attachments"), 0);
        assert_eq!(ctx.state(), FrameState::Idle);
        let submits = gpu.submits();
        assert_eq!(submits.len(), 1);
        assert!(!submits[0].waited && !submits[0].signaled);
        assert_eq!(script.lock().presents, 0);

        // the target keeps asking; once it can resize, frames come back
        script.lock().fail_resize = false;
        assert_eq!(ctx.start_frame().unwrap(), FrameStatus::Ready);
        ctx.end_frame().unwrap();
        assert_eq!(ctx.size(), RenderSize::new(128, 96));
        ctx.destroy_buffer(buf);
    }

    #[test]
    fn out_of_memory_on_swapchain_rebuild_is_not_fatal() {
        let (mut ctx, script) = harness(TargetScript::default());
        {
            let mut s = script.lock();
            s.fail_resize = true;
            s.resize_error = vk::Result::ERROR_OUT_OF_DEVICE_MEMORY;
        }
        ctx.resize(RenderSize::new(128, 96));
        assert_eq!(ctx.start_frame().unwrap(), FrameStatus::Degraded);
        ctx.end_frame().unwrap();
        assert_eq!(ctx.start_frame().unwrap(), FrameStatus::Degraded);
        ctx.end_frame().unwrap();
        assert_eq!(script.lock().resizes, 3);

        script.lock().fail_resize = false;
        assert_eq!(ctx.start_frame().unwrap(), FrameStatus::Ready);
        ctx.end_frame().unwrap();
        assert_eq!(ctx.size(), RenderSize::new(128, 96));
    }

    #[test]
    fn failed_depth_buffer_retries_on_the_next_frame() {
        let (mut ctx, script) = harness(TargetScript::default());
        ctx.device()
            .gpu()
            .script_image_failure(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);
        ctx.resize(RenderSize::new(80, 60));
        assert_eq!(ctx.start_frame().unwrap(), FrameStatus::Degraded);
        ctx.end_frame().unwrap();
        let builds = script.lock().framebuffer_builds;

        assert_eq!(ctx.start_frame().unwrap(), FrameStatus::Ready);
        ctx.end_frame().unwrap();
        assert_eq!(script.lock().framebuffer_builds, builds + 1);
    }

    #[test]
    fn device_lost_during_resize_is_fatal() {
        let (mut ctx, script) = harness(TargetScript::default());
        {
            let mut s = script.lock();
            s.fail_resize = true;
            s.resize_error = vk::Result::ERROR_DEVICE_LOST;
        }
        ctx.resize(RenderSize::new(128, 96));
        let err = ctx.start_frame().unwrap_err();
        assert!(matches!(err, RenderError::DeviceLost));
        assert_eq!(ctx.state(), FrameState::Idle);
    }

    #[test]
    fn failed_acquire_degrades_the_frame() {
        let (mut ctx, script) = harness(TargetScript::default());
        script.lock().acquire_ok = false;
        assert_eq!(ctx.start_frame().unwrap(), FrameStatus::Degraded);
        let mut px = vec![0u8; 4 * 4 * 4];
        assert!(matches!(
            ctx.read_framebuffer(&mut px, 4, 4),
            Err(RenderError::NoImage)
        ));
        assert_eq!(ctx.state(), FrameState::Idle);
    }

    #[test]
    fn staging_is_rewound_by_start_frame() {
        let (mut ctx, _script) = harness(TargetScript::default());
        let buf = vertices(&mut ctx, MemoryClass::Static);
        ctx.start_frame().unwrap();
        ctx.update_buffer_at(&buf, 0, &vec![1u8; 100_000]).unwrap();
        ctx.update_buffer_at(&buf, 100_000, &vec![2u8; 100_000]).unwrap();
        assert!(ctx.staging_mut().bytes_used() > 0);
        ctx.end_frame().unwrap();

        ctx.start_frame().unwrap();
        assert_eq!(ctx.staging_mut().bytes_used(), 0);
        assert_eq!(ctx.staging_mut().active_index(), 0);
        ctx.end_frame().unwrap();
        ctx.destroy_buffer(buf);
    }

    #[test]
    fn static_updates_pick_path_by_size() {
        let (mut ctx, _script) = harness(TargetScript::default());
        let buf = vertices(&mut ctx, MemoryClass::Static);
        ctx.start_frame().unwrap();
        let transfer = ctx.transfer_commands();
        ctx.update_buffer_at(&buf, 0, &[9u8; 1024]).unwrap();
        ctx.update_buffer_at(&buf, 4096, &vec![5u8; INLINE_UPDATE_LIMIT as usize + 4])
            .unwrap();
        let cmds = ctx.device().gpu().commands_in(transfer);
        assert_eq!(cmds.iter().filter(|c| **c == "update_buffer").count(), 1);
        assert_eq!(cmds.iter().filter(|c| **c == "copy_buffer").count(), 1);
        assert!(buf.sync_token().written_in(ctx.frame_serial()));
        // the second write waits for the first
        let barrier = cmds.iter().position(|c| *c == "buffer_barrier").unwrap();
        let first = cmds.iter().position(|c| *c == "update_buffer").unwrap();
        let second = cmds.iter().position(|c| *c == "copy_buffer").unwrap();
        assert!(first < barrier && barrier < second);
        ctx.end_frame().unwrap();

        let gpu = ctx.device().gpu();
        assert_eq!(gpu.buffer_bytes(buf.native(), 0, 4), vec![9; 4]);
        assert_eq!(gpu.buffer_bytes(buf.native(), 4096 + 65_536, 4), vec![5; 4]);
        ctx.destroy_buffer(buf);
    }

    #[test]
    fn first_write_of_a_frame_needs_no_barrier() {
        let (mut ctx, _script) = harness(TargetScript::default());
        let a = vertices(&mut ctx, MemoryClass::Static);
        let b = vertices(&mut ctx, MemoryClass::Static);
        ctx.update_buffer_at(&a, 0, &[1; 16]).unwrap();
        assert!(!a.sync_token().written_in(ctx.frame_serial()));

        ctx.start_frame().unwrap();
        let transfer = ctx.transfer_commands();
        ctx.update_buffer_at(&a, 0, &[2; 16]).unwrap();
        ctx.update_buffer_at(&b, 0, &[3; 16]).unwrap();
        ctx.end_frame().unwrap();
        let gpu = ctx.device().gpu();
        assert!(!gpu.commands_in(transfer).contains(&"buffer_barrier"));

        // a new frame starts clean
        ctx.start_frame().unwrap();
        ctx.update_buffer_at(&a, 0, &[4; 16]).unwrap();
        assert!(!ctx.device().gpu().commands_in(transfer).contains(&"buffer_barrier"));
        ctx.end_frame().unwrap();
        ctx.destroy_buffer(a);
        ctx.destroy_buffer(b);
    }

    #[test]
    fn static_update_outside_a_frame_is_submitted_immediately() {
        let (mut ctx, _script) = harness(TargetScript::default());
        let buf = vertices(&mut ctx, MemoryClass::Static);
        ctx.device().gpu().clear_calls();
        ctx.update_buffer_regions(&buf, &[(0, &[1, 2, 3, 4]), (64, &[5, 6, 7, 8])])
            .unwrap();
        let gpu = ctx.device().gpu();
        assert_eq!(gpu.submits().len(), 1);
        assert_eq!(gpu.count("update_buffer"), 2);
        assert_eq!(gpu.buffer_bytes(buf.native(), 64, 4), vec![5, 6, 7, 8]);
        ctx.destroy_buffer(buf);
    }

    #[test]
    fn invalid_updates_are_rejected_before_recording() {
        let (mut ctx, _script) = harness(TargetScript::default());
        let rb = ctx
            .create_buffer(64, MemoryClass::Readback, BufferUsage::empty())
            .unwrap();
        assert!(matches!(
            ctx.update_buffer_at(&rb, 0, &[0; 4]),
            Err(RenderError::InvalidUpdate(_))
        ));
        let dynamic = ctx
            .create_buffer(64, MemoryClass::Dynamic, BufferUsage::UNIFORM)
            .unwrap();
        ctx.device().gpu().clear_calls();
        let err = ctx
            .update_buffer_regions(&dynamic, &[(0, &[1; 8]), (60, &[1; 8])])
            .unwrap_err();
        assert!(matches!(err, RenderError::OutOfBounds { offset: 60, .. }));
        assert_eq!(ctx.device().gpu().buffer_bytes(dynamic.native(), 0, 8), vec![0; 8]);
        ctx.update_buffer_at(&dynamic, 8, &[3; 8]).unwrap();
        assert_eq!(ctx.device().gpu().buffer_bytes(dynamic.native(), 8, 8), vec![3; 8]);
        ctx.destroy_buffer(rb);
        ctx.destroy_buffer(dynamic);
    }

    #[test]
    fn transform_overflow_is_fatal() {
        let (mut ctx, _script) = harness(TargetScript::default());
        ctx.start_frame().unwrap();
        // slot 0 is identity; the harness ring holds 8
        for i in 1..8 {
            assert_eq!(ctx.set_global_attributes(Mat4::IDENTITY).unwrap(), i);
        }
        let err = ctx.set_global_attributes(Mat4::IDENTITY).unwrap_err();
        assert!(matches!(err, RenderError::TransformRingOverflow { capacity: 8 }));
        assert!(err.is_fatal());
        ctx.end_frame().unwrap();
    }

    #[test]
    fn transforms_reach_the_storage_buffer() {
        let (mut ctx, _script) = harness(TargetScript::default());
        ctx.start_frame().unwrap();
        let m = Mat4::from_translation(glam::Vec3::new(3.0, 4.0, 5.0));
        assert_eq!(ctx.set_global_attributes(m).unwrap(), 1);
        ctx.end_frame().unwrap();

        let buffer = ctx.transform_buffer.as_ref().unwrap().current().native();
        let bytes = ctx.device().gpu().buffer_bytes(buffer, 64, 64);
        let floats: &[f32] = bytemuck::cast_slice(&bytes);
        assert_eq!(&floats[12..15], &[3.0, 4.0, 5.0]);
    }

    #[test]
    fn device_lost_on_submit_is_fatal_and_leaves_idle() {
        let (mut ctx, script) = harness(TargetScript::default());
        ctx.device()
            .gpu()
            .script_submit_failure(vk::Result::ERROR_DEVICE_LOST);
        ctx.start_frame().unwrap();
        let err = ctx.end_frame().unwrap_err();
        assert!(matches!(err, RenderError::DeviceLost));
        assert_eq!(ctx.state(), FrameState::Idle);
        assert_eq!(script.lock().discards, 1);
        // the resource mutex was released
        assert_eq!(ctx.start_frame().unwrap(), FrameStatus::Ready);
        ctx.end_frame().unwrap();
    }

    #[test]
    fn device_lost_on_present_is_fatal_and_leaves_idle() {
        let (mut ctx, script) = harness(TargetScript::default());
        script
            .lock()
            .present_results
            .push_back(vk::Result::ERROR_DEVICE_LOST);
        ctx.start_frame().unwrap();
        let err = ctx.end_frame().unwrap_err();
        assert!(matches!(err, RenderError::DeviceLost));
        assert_eq!(ctx.state(), FrameState::Idle);
        assert_eq!(script.lock().presents, 1);
        // the resource mutex was released
        assert_eq!(ctx.start_frame().unwrap(), FrameStatus::Ready);
        ctx.end_frame().unwrap();
    }

    #[test]
    fn lost_surface_on_present_drops_the_frame_and_rebuilds() {
        let (mut ctx, script) = harness(TargetScript::default());
        script
            .lock()
            .present_results
            .push_back(vk::Result::ERROR_SURFACE_LOST_KHR);
        ctx.start_frame().unwrap();
        ctx.end_frame().unwrap();
        assert_eq!(ctx.state(), FrameState::Idle);
        let resizes = script.lock().resizes;

        assert_eq!(ctx.start_frame().unwrap(), FrameStatus::Ready);
        ctx.end_frame().unwrap();
        assert_eq!(script.lock().resizes, resizes + 1);
        assert_eq!(script.lock().presents, 2);
    }

    #[test]
    fn other_submit_failures_drop_the_frame() {
        let (mut ctx, script) = harness(TargetScript::default());
        ctx.device()
            .gpu()
            .script_submit_failure(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);
        ctx.start_frame().unwrap();
        ctx.end_frame().unwrap();
        assert_eq!(script.lock().presents, 0);
        ctx.start_frame().unwrap();
        ctx.end_frame().unwrap();
        assert_eq!(script.lock().presents, 1);
    }

    #[test]
    fn invalidated_device_refuses_new_frames() {
        let (mut ctx, _script) = harness(TargetScript::default());
        ctx.device().invalidate();
        assert!(matches!(
            ctx.start_frame(),
            Err(RenderError::DeviceInvalidated)
        ));
        assert_eq!(ctx.state(), FrameState::Idle);
    }

    #[test]
    fn readback_swizzles_bgra_and_ends_the_frame() {
        let (mut ctx, _script) = harness(TargetScript::default());
        ctx.start_frame().unwrap();
        let mut px = vec![0u8; 2 * 2 * 4];
        ctx.read_framebuffer(&mut px, 2, 2).unwrap();
        assert_eq!(ctx.state(), FrameState::Idle);
        assert_eq!(&px[..4], &[3, 2, 1, 4]);
        assert_eq!(&px[12..], &[3, 2, 1, 4]);

        let gpu = ctx.device().gpu();
        // present layout -> transfer src -> back
        assert_eq!(gpu.count("image_barrier"), 2);
        assert_eq!(gpu.count("copy_image_to_buffer"), 1);

        let mut short = vec![0u8; 3];
        ctx.start_frame().unwrap();
        assert!(matches!(
            ctx.read_framebuffer(&mut short, 2, 2),
            Err(RenderError::OutOfBounds { .. })
        ));
        ctx.end_frame().unwrap();
        assert!(matches!(
            ctx.read_framebuffer(&mut px, 2, 2),
            Err(RenderError::NoImage)
        ));
    }

    #[test]
    fn readback_keeps_rgba_order_for_rgba_targets() {
        let (mut ctx, _script) = harness(TargetScript {
            format: vk::Format::R8G8B8A8_UNORM,
            ..TargetScript::default()
        });
        ctx.start_frame().unwrap();
        let mut px = vec![0u8; 4];
        ctx.read_framebuffer(&mut px, 1, 1).unwrap();
        assert_eq!(px, vec![1, 2, 3, 4]);
    }

    #[test]
    fn redundant_binds_are_skipped() {
        let (mut ctx, _script) = harness(TargetScript::default());
        let buf = vertices(&mut ctx, MemoryClass::Dynamic);
        ctx.start_frame().unwrap();
        for _ in 0..4 {
            ctx.draw(&DrawCall::geometry(&buf, 3)).unwrap();
        }
        ctx.draw(&DrawCall::geometry(&buf, 2).lines()).unwrap();
        ctx.end_frame().unwrap();

        let gpu = ctx.device().gpu();
        assert_eq!(gpu.count("draw"), 5);
        assert_eq!(gpu.count("bind_pipeline"), 2);
        assert_eq!(gpu.count("bind_vertex_buffer"), 1);
        assert_eq!(gpu.count("push_constants"), 1);
        ctx.destroy_buffer(buf);
    }

    #[test]
    fn a_new_transform_pushes_new_constants() {
        let (mut ctx, _script) = harness(TargetScript::default());
        let buf = vertices(&mut ctx, MemoryClass::Dynamic);
        ctx.start_frame().unwrap();
        ctx.draw(&DrawCall::geometry(&buf, 3)).unwrap();
        ctx.set_global_attributes(Mat4::from_scale(glam::Vec3::splat(2.0)))
            .unwrap();
        ctx.draw(&DrawCall::geometry(&buf, 3)).unwrap();
        ctx.draw(&DrawCall::geometry(&buf, 3).tint([1.0, 0.0, 0.0, 1.0]))
            .unwrap();
        ctx.end_frame().unwrap();
        assert_eq!(ctx.device().gpu().count("push_constants"), 3);
        ctx.destroy_buffer(buf);
    }

    #[test]
    fn textured_draw_requires_a_texture() {
        let (mut ctx, _script) = harness(TargetScript::default());
        let buf = vertices(&mut ctx, MemoryClass::Dynamic);
        let mut call = DrawCall::geometry(&buf, 6);
        call.kind = PipelineKind::Textured;
        assert!(ctx.draw(&call).is_err());
        ctx.destroy_buffer(buf);
    }

    #[test]
    fn retired_buffers_outlive_their_frame() {
        let (mut ctx, _script) = harness(TargetScript::default());
        let mut mb = ctx
            .create_multi_buffer(256, MemoryClass::Dynamic, BufferUsage::VERTEX)
            .unwrap();
        ctx.next_generation(&mut mb).unwrap();
        ctx.next_generation(&mut mb).unwrap();
        assert_eq!(mb.generations(), 2);
        let last = mb.current().native();

        ctx.start_frame().unwrap();
        ctx.destroy_multi_buffer(mb);
        assert!(ctx.device().gpu().buffer_is_live(last));
        ctx.end_frame().unwrap();
        assert!(!ctx.device().gpu().buffer_is_live(last));
    }

    #[test]
    fn frame_submits_transfer_before_graphics_with_semaphores() {
        let (mut ctx, _script) = harness(TargetScript::default());
        ctx.device().gpu().clear_calls();
        ctx.start_frame().unwrap();
        let transfer = ctx.transfer_commands();
        ctx.end_frame().unwrap();

        let gpu = ctx.device().gpu();
        let submits = gpu.submits();
        assert_eq!(submits.len(), 1);
        assert_eq!(submits[0].command_buffers[0], transfer);
        assert_eq!(submits[0].command_buffers.len(), 2);
        assert!(submits[0].waited && submits[0].signaled);
        let cmds = gpu.commands_in(transfer);
        assert_eq!(cmds.first(), Some(&"reset_event"));
        assert_eq!(cmds.last(), Some(&"set_event"));
        let graphics = submits[0].command_buffers[1];
        assert_eq!(gpu.commands_in(graphics).first(), Some(&"wait_event"));
    }

    #[test]
    fn empty_size_pauses_until_resized() {
        let (mut ctx, script) = harness(TargetScript::default());
        ctx.resize(RenderSize::new(0, 0));
        assert_eq!(ctx.start_frame().unwrap(), FrameStatus::Degraded);
        ctx.end_frame().unwrap();
        assert!(ctx.is_paused());
        let resizes = script.lock().resizes;
        ctx.resize(RenderSize::new(32, 32));
        assert_eq!(ctx.start_frame().unwrap(), FrameStatus::Ready);
        ctx.end_frame().unwrap();
        assert_eq!(script.lock().resizes, resizes + 1);
        assert_eq!(ctx.size(), RenderSize::new(32, 32));
    }

    #[test]
    fn drop_tears_the_device_down() {
        let (ctx, _script) = harness(TargetScript::default());
        let probe = ctx.device().gpu().probe();
        drop(ctx);
        assert_eq!(probe.shutdowns(), 1);
        assert!(probe
            .calls()
            .iter()
            .any(|c| matches!(c, Call::DeviceWaitIdle)));
        assert_eq!(probe.live_buffers(), 0);
    }
}
