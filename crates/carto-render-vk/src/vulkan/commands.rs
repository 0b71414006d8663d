// SPDX-License-Identifier: CEPL-1.0
use super::objects::{self, PUSH_STAGES};
use super::VkBackend;
use crate::backend::{Command, GpuBackend, ImageBarrier, QueueRole, SetBinding, Submission};
use crate::error::Result;
use crate::pipeline::PipelineDesc;
use crate::queue::QueueAssignment;
use ash::vk;
use carto_render::SamplerKind;
use tracing::warn;

fn color_subresource() -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        base_mip_level: 0,
        level_count: 1,
        base_array_layer: 0,
        layer_count: 1,
    }
}

fn image_memory_barrier(b: &ImageBarrier) -> vk::ImageMemoryBarrier<'static> {
    vk::ImageMemoryBarrier {
        s_type: vk::StructureType::IMAGE_MEMORY_BARRIER,
        src_access_mask: b.src_access,
        dst_access_mask: b.dst_access,
        old_layout: b.old_layout,
        new_layout: b.new_layout,
        src_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
        dst_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
        image: b.image,
        subresource_range: vk::ImageSubresourceRange {
            aspect_mask: b.aspect,
            ..color_subresource()
        },
        ..Default::default()
    }
}

fn full_rect(extent: vk::Extent2D) -> vk::Rect2D {
    vk::Rect2D {
        offset: vk::Offset2D { x: 0, y: 0 },
        extent,
    }
}

impl VkBackend {
    unsafe fn encode(&self, cb: vk::CommandBuffer, command: Command<'_>) {
        let d = self.device();
        unsafe {
            match command {
                Command::UpdateBuffer { dst, offset, data } => d.cmd_update_buffer(cb, dst, offset, data),
                Command::CopyBuffer { src, dst, region } => d.cmd_copy_buffer(cb, src, dst, &[region]),
                Command::CopyBufferToImage { src, dst, region } => d.cmd_copy_buffer_to_image(
                    cb,
                    src,
                    dst,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    &[region],
                ),
                Command::CopyImageToBuffer { src, dst, region } => d.cmd_copy_image_to_buffer(
                    cb,
                    src,
                    vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                    dst,
                    &[region],
                ),
                Command::ImageBarrier(b) => d.cmd_pipeline_barrier(
                    cb,
                    b.src_stage,
                    b.dst_stage,
                    vk::DependencyFlags::empty(),
                    &[],
                    &[],
                    &[image_memory_barrier(&b)],
                ),
                Command::BufferBarrier {
                    buffer,
                    src_stage,
                    dst_stage,
                    src_access,
                    dst_access,
                } => {
                    let barrier = vk::BufferMemoryBarrier {
                        s_type: vk::StructureType::BUFFER_MEMORY_BARRIER,
                        src_access_mask: src_access,
                        dst_access_mask: dst_access,
                        src_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
                        dst_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
                        buffer,
                        offset: 0,
                        size: vk::WHOLE_SIZE,
                        ..Default::default()
                    };
                    d.cmd_pipeline_barrier(
                        cb,
                        src_stage,
                        dst_stage,
                        vk::DependencyFlags::empty(),
                        &[],
                        &[barrier],
                        &[],
                    );
                }
                Command::SetEvent { event, stage } => d.cmd_set_event(cb, event, stage),
                Command::ResetEvent { event, stage } => d.cmd_reset_event(cb, event, stage),
                Command::WaitEvent {
                    event,
                    src_stage,
                    dst_stage,
                    src_access,
                    dst_access,
                } => {
                    let barrier = vk::MemoryBarrier {
                        s_type: vk::StructureType::MEMORY_BARRIER,
                        src_access_mask: src_access,
                        dst_access_mask: dst_access,
                        ..Default::default()
                    };
                    d.cmd_wait_events(cb, &[event], src_stage, dst_stage, &[barrier], &[], &[]);
                }
                Command::BeginRenderPass {
                    render_pass,
                    framebuffer,
                    extent,
                    clear_color,
                } => {
                    let clear = [
                        vk::ClearValue {
                            color: vk::ClearColorValue { float32: clear_color },
                        },
                        vk::ClearValue {
                            depth_stencil: vk::ClearDepthStencilValue {
                                depth: 1.0,
                                stencil: 0,
                            },
                        },
                    ];
                    let info = vk::RenderPassBeginInfo {
                        s_type: vk::StructureType::RENDER_PASS_BEGIN_INFO,
                        render_pass,
                        framebuffer,
                        render_area: full_rect(extent),
                        clear_value_count: clear.len() as u32,
                        p_clear_values: clear.as_ptr(),
                        ..Default::default()
                    };
                    d.cmd_begin_render_pass(cb, &info, vk::SubpassContents::INLINE);
                }
                Command::EndRenderPass => d.cmd_end_render_pass(cb),
                Command::ClearAttachments {
                    color,
                    depth,
                    extent,
                } => {
                    let mut attachments = Vec::with_capacity(2);
                    if let Some(rgba) = color {
                        attachments.push(vk::ClearAttachment {
                            aspect_mask: vk::ImageAspectFlags::COLOR,
                            color_attachment: 0,
                            clear_value: vk::ClearValue {
                                color: vk::ClearColorValue { float32: rgba },
                            },
                        });
                    }
                    if let Some(depth) = depth {
                        attachments.push(vk::ClearAttachment {
                            aspect_mask: vk::ImageAspectFlags::DEPTH,
                            color_attachment: 0,
                            clear_value: vk::ClearValue {
                                depth_stencil: vk::ClearDepthStencilValue { depth, stencil: 0 },
                            },
                        });
                    }
                    let rect = vk::ClearRect {
                        rect: full_rect(extent),
                        base_array_layer: 0,
                        layer_count: 1,
                    };
                    if !attachments.is_empty() {
                        d.cmd_clear_attachments(cb, &attachments, &[rect]);
                    }
                }
                Command::SetViewport { extent } => {
                    let viewport = vk::Viewport {
                        x: 0.0,
                        y: 0.0,
                        width: extent.width as f32,
                        height: extent.height as f32,
                        min_depth: 0.0,
                        max_depth: 1.0,
                    };
                    d.cmd_set_viewport(cb, 0, &[viewport]);
                    d.cmd_set_scissor(cb, 0, &[full_rect(extent)]);
                }
                Command::BindPipeline { pipeline } => {
                    d.cmd_bind_pipeline(cb, vk::PipelineBindPoint::GRAPHICS, pipeline)
                }
                Command::BindDescriptorSet { layout, index, set } => d.cmd_bind_descriptor_sets(
                    cb,
                    vk::PipelineBindPoint::GRAPHICS,
                    layout,
                    index,
                    &[set],
                    &[],
                ),
                Command::PushConstants { layout, data } => {
                    d.cmd_push_constants(cb, layout, PUSH_STAGES, 0, data)
                }
                Command::BindVertexBuffer { buffer, offset } => {
                    d.cmd_bind_vertex_buffers(cb, 0, &[buffer], &[offset])
                }
                Command::BindIndexBuffer { buffer, offset } => {
                    d.cmd_bind_index_buffer(cb, buffer, offset, vk::IndexType::UINT32)
                }
                Command::Draw {
                    vertex_count,
                    first_vertex,
                } => d.cmd_draw(cb, vertex_count, 1, first_vertex, 0),
                Command::DrawIndexed {
                    index_count,
                    first_index,
                    vertex_offset,
                } => d.cmd_draw_indexed(cb, index_count, 1, first_index, vertex_offset, 0),
            }
        }
    }
}

impl GpuBackend for VkBackend {
    fn queues(&self) -> QueueAssignment {
        self.ctx.queues
    }

    fn depth_format(&self) -> vk::Format {
        self.ctx.depth_format
    }

    fn create_command_buffers(&self, count: u32) -> Result<Vec<vk::CommandBuffer>> {
        let info = vk::CommandBufferAllocateInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_ALLOCATE_INFO,
            command_pool: self.ctx.command_pool,
            level: vk::CommandBufferLevel::PRIMARY,
            command_buffer_count: count,
            ..Default::default()
        };
        Ok(unsafe { self.device().allocate_command_buffers(&info) }?)
    }

    fn begin_commands(&self, cmd: vk::CommandBuffer) -> Result<()> {
        let d = self.device();
        let info = vk::CommandBufferBeginInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
            flags: vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
            ..Default::default()
        };
        unsafe {
            d.reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())?;
            d.begin_command_buffer(cmd, &info)?;
        }
        Ok(())
    }

    fn end_commands(&self, cmd: vk::CommandBuffer) -> Result<()> {
        Ok(unsafe { self.device().end_command_buffer(cmd) }?)
    }

    fn record(&self, cmd: vk::CommandBuffer, command: Command<'_>) {
        unsafe { self.encode(cmd, command) }
    }

    fn submit(&self, submission: &Submission<'_>) -> std::result::Result<(), vk::Result> {
        let (wait_sems, wait_stages): (Vec<_>, Vec<_>) = submission.wait.into_iter().unzip();
        let signal: Vec<_> = submission.signal.into_iter().collect();
        let info = vk::SubmitInfo {
            s_type: vk::StructureType::SUBMIT_INFO,
            wait_semaphore_count: wait_sems.len() as u32,
            p_wait_semaphores: wait_sems.as_ptr(),
            p_wait_dst_stage_mask: wait_stages.as_ptr(),
            command_buffer_count: submission.command_buffers.len() as u32,
            p_command_buffers: submission.command_buffers.as_ptr(),
            signal_semaphore_count: signal.len() as u32,
            p_signal_semaphores: signal.as_ptr(),
            ..Default::default()
        };
        unsafe {
            self.device().queue_submit(
                self.ctx.graphics_queue,
                std::slice::from_ref(&info),
                vk::Fence::null(),
            )
        }
    }

    fn wait_idle(&self, role: QueueRole) -> std::result::Result<(), vk::Result> {
        unsafe { self.device().queue_wait_idle(self.ctx.queue(role)) }
    }

    fn device_wait_idle(&self) {
        if let Err(e) = unsafe { self.device().device_wait_idle() } {
            warn!("vk: device_wait_idle: {e}");
        }
    }

    fn create_event(&self) -> Result<vk::Event> {
        let info = vk::EventCreateInfo {
            s_type: vk::StructureType::EVENT_CREATE_INFO,
            ..Default::default()
        };
        Ok(unsafe { self.device().create_event(&info, None) }?)
    }

    fn destroy_event(&self, event: vk::Event) {
        unsafe { self.device().destroy_event(event, None) };
    }

    fn create_render_pass(
        &self,
        color: vk::Format,
        depth: vk::Format,
        final_layout: vk::ImageLayout,
    ) -> Result<vk::RenderPass> {
        unsafe { objects::create_render_pass(&self.ctx, color, depth, final_layout) }
    }

    fn destroy_render_pass(&self, render_pass: vk::RenderPass) {
        unsafe { self.device().destroy_render_pass(render_pass, None) };
    }

    fn create_framebuffer(
        &self,
        render_pass: vk::RenderPass,
        attachments: &[vk::ImageView],
        extent: vk::Extent2D,
    ) -> Result<vk::Framebuffer> {
        unsafe { objects::create_framebuffer(&self.ctx, render_pass, attachments, extent) }
    }

    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer) {
        unsafe { self.device().destroy_framebuffer(framebuffer, None) };
    }

    fn create_set_layout(&self, bindings: &[SetBinding]) -> Result<vk::DescriptorSetLayout> {
        unsafe { objects::create_set_layout(&self.ctx, bindings) }
    }

    fn destroy_set_layout(&self, layout: vk::DescriptorSetLayout) {
        unsafe { self.device().destroy_descriptor_set_layout(layout, None) };
    }

    fn create_pipeline_layout(
        &self,
        set_layouts: &[vk::DescriptorSetLayout],
        push_constant_bytes: u32,
    ) -> Result<vk::PipelineLayout> {
        unsafe { objects::create_pipeline_layout(&self.ctx, set_layouts, push_constant_bytes) }
    }

    fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout) {
        unsafe { self.device().destroy_pipeline_layout(layout, None) };
    }

    fn create_pipeline(&self, desc: &PipelineDesc<'_>) -> Result<vk::Pipeline> {
        unsafe { objects::create_pipeline(&self.ctx, desc) }
    }

    fn destroy_pipeline(&self, pipeline: vk::Pipeline) {
        unsafe { self.device().destroy_pipeline(pipeline, None) };
    }

    fn create_sampler(&self, kind: SamplerKind) -> Result<vk::Sampler> {
        unsafe { objects::create_sampler(&self.ctx, kind) }
    }

    fn destroy_sampler(&self, sampler: vk::Sampler) {
        unsafe { self.device().destroy_sampler(sampler, None) };
    }

    fn write_buffer_descriptor(
        &self,
        set: vk::DescriptorSet,
        binding: u32,
        ty: vk::DescriptorType,
        buffer: vk::Buffer,
        range: u64,
    ) {
        unsafe { objects::write_buffer_descriptor(&self.ctx, set, binding, ty, buffer, range) }
    }

    fn write_image_descriptor(
        &self,
        set: vk::DescriptorSet,
        binding: u32,
        view: vk::ImageView,
        sampler: vk::Sampler,
    ) {
        unsafe { objects::write_image_descriptor(&self.ctx, set, binding, view, sampler) }
    }

    fn shutdown(&self) {
        self.ctx.destroy();
    }
}
