// SPDX-License-Identifier: CEPL-1.0
use crate::alloc::ResourceAllocator;
use crate::descriptor::DescriptorBackend;
use crate::error::Result;
use crate::pipeline::PipelineDesc;
use crate::queue::QueueAssignment;
use ash::vk;
use carto_render::SamplerKind;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueueRole {
    Graphics,
    Present,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ImageBarrier {
    pub image: vk::Image,
    pub aspect: vk::ImageAspectFlags,
    pub old_layout: vk::ImageLayout,
    pub new_layout: vk::ImageLayout,
    pub src_stage: vk::PipelineStageFlags,
    pub dst_stage: vk::PipelineStageFlags,
    pub src_access: vk::AccessFlags,
    pub dst_access: vk::AccessFlags,
}

/// Everything the frame code records. One variant per command-buffer call.
#[derive(Clone, Copy, Debug)]
pub enum Command<'a> {
    UpdateBuffer {
        dst: vk::Buffer,
        offset: u64,
        data: &'a [u8],
    },
    CopyBuffer {
        src: vk::Buffer,
        dst: vk::Buffer,
        region: vk::BufferCopy,
    },
    CopyBufferToImage {
        src: vk::Buffer,
        dst: vk::Image,
        region: vk::BufferImageCopy,
    },
    CopyImageToBuffer {
        src: vk::Image,
        dst: vk::Buffer,
        region: vk::BufferImageCopy,
    },
    ImageBarrier(ImageBarrier),
    /// Whole-buffer memory dependency on one queue.
    BufferBarrier {
        buffer: vk::Buffer,
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
        src_access: vk::AccessFlags,
        dst_access: vk::AccessFlags,
    },
    SetEvent {
        event: vk::Event,
        stage: vk::PipelineStageFlags,
    },
    ResetEvent {
        event: vk::Event,
        stage: vk::PipelineStageFlags,
    },
    WaitEvent {
        event: vk::Event,
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
        src_access: vk::AccessFlags,
        dst_access: vk::AccessFlags,
    },
    BeginRenderPass {
        render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        extent: vk::Extent2D,
        clear_color: [f32; 4],
    },
    EndRenderPass,
    ClearAttachments {
        color: Option<[f32; 4]>,
        depth: Option<f32>,
        extent: vk::Extent2D,
    },
    /// Viewport and scissor covering `extent`.
    SetViewport {
        extent: vk::Extent2D,
    },
    BindPipeline {
        pipeline: vk::Pipeline,
    },
    BindDescriptorSet {
        layout: vk::PipelineLayout,
        index: u32,
        set: vk::DescriptorSet,
    },
    PushConstants {
        layout: vk::PipelineLayout,
        data: &'a [u8],
    },
    BindVertexBuffer {
        buffer: vk::Buffer,
        offset: u64,
    },
    BindIndexBuffer {
        buffer: vk::Buffer,
        offset: u64,
    },
    Draw {
        vertex_count: u32,
        first_vertex: u32,
    },
    DrawIndexed {
        index_count: u32,
        first_index: u32,
        vertex_offset: i32,
    },
}

impl Command<'_> {
    pub fn name(&self) -> &'static str {
        match self {
            Command::UpdateBuffer { .. } => "update_buffer",
            Command::CopyBuffer { .. } => "copy_buffer",
            Command::CopyBufferToImage { .. } => "copy_buffer_to_image",
            Command::CopyImageToBuffer { .. } => "copy_image_to_buffer",
            Command::ImageBarrier(_) => "image_barrier",
            Command::BufferBarrier { .. } => "buffer_barrier",
            Command::SetEvent { .. } => "set_event",
            Command::ResetEvent { .. } => "reset_event",
            Command::WaitEvent { .. } => "wait_event",
            Command::BeginRenderPass { .. } => "begin_render_pass",
            Command::EndRenderPass => "end_render_pass",
            Command::ClearAttachments { .. } => "clear_attachments",
            Command::SetViewport { .. } => "set_viewport",
            Command::BindPipeline { .. } => "bind_pipeline",
            Command::BindDescriptorSet { .. } => "bind_descriptor_set",
            Command::PushConstants { .. } => "push_constants",
            Command::BindVertexBuffer { .. } => "bind_vertex_buffer",
            Command::BindIndexBuffer { .. } => "bind_index_buffer",
            Command::Draw { .. } => "draw",
            Command::DrawIndexed { .. } => "draw_indexed",
        }
    }
}

/// One queue submission: command buffers in order, optional semaphore wait and signal.
#[derive(Clone, Copy, Debug)]
pub struct Submission<'a> {
    pub command_buffers: &'a [vk::CommandBuffer],
    pub wait: Option<(vk::Semaphore, vk::PipelineStageFlags)>,
    pub signal: Option<vk::Semaphore>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SetBinding {
    pub binding: u32,
    pub ty: vk::DescriptorType,
    pub stages: vk::ShaderStageFlags,
}

/// The device seam. Frame code only talks to the GPU through this trait.
pub trait GpuBackend: ResourceAllocator + DescriptorBackend {
    fn queues(&self) -> QueueAssignment;
    fn depth_format(&self) -> vk::Format;

    // --- command buffers & submission ---
    fn create_command_buffers(&self, count: u32) -> Result<Vec<vk::CommandBuffer>>;
    fn begin_commands(&self, cmd: vk::CommandBuffer) -> Result<()>;
    fn end_commands(&self, cmd: vk::CommandBuffer) -> Result<()>;
    fn record(&self, cmd: vk::CommandBuffer, command: Command<'_>);
    /// Raw result so callers can tell device loss from an ordinary failure.
    fn submit(&self, submission: &Submission<'_>) -> std::result::Result<(), vk::Result>;
    fn wait_idle(&self, role: QueueRole) -> std::result::Result<(), vk::Result>;
    fn device_wait_idle(&self);

    // --- sync ---
    fn create_event(&self) -> Result<vk::Event>;
    fn destroy_event(&self, event: vk::Event);

    // --- pipeline objects ---
    fn create_render_pass(
        &self,
        color: vk::Format,
        depth: vk::Format,
        final_layout: vk::ImageLayout,
    ) -> Result<vk::RenderPass>;
    fn destroy_render_pass(&self, render_pass: vk::RenderPass);
    fn create_framebuffer(
        &self,
        render_pass: vk::RenderPass,
        attachments: &[vk::ImageView],
        extent: vk::Extent2D,
    ) -> Result<vk::Framebuffer>;
    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer);
    fn create_set_layout(&self, bindings: &[SetBinding]) -> Result<vk::DescriptorSetLayout>;
    fn destroy_set_layout(&self, layout: vk::DescriptorSetLayout);
    fn create_pipeline_layout(
        &self,
        set_layouts: &[vk::DescriptorSetLayout],
        push_constant_bytes: u32,
    ) -> Result<vk::PipelineLayout>;
    fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout);
    fn create_pipeline(&self, desc: &PipelineDesc<'_>) -> Result<vk::Pipeline>;
    fn destroy_pipeline(&self, pipeline: vk::Pipeline);
    fn create_sampler(&self, kind: SamplerKind) -> Result<vk::Sampler>;
    fn destroy_sampler(&self, sampler: vk::Sampler);

    // --- descriptor writes ---
    fn write_buffer_descriptor(
        &self,
        set: vk::DescriptorSet,
        binding: u32,
        ty: vk::DescriptorType,
        buffer: vk::Buffer,
        range: u64,
    );
    fn write_image_descriptor(
        &self,
        set: vk::DescriptorSet,
        binding: u32,
        view: vk::ImageView,
        sampler: vk::Sampler,
    );

    /// Final teardown of the device itself; every child object is gone by now.
    fn shutdown(&self);
}
