// SPDX-License-Identifier: CEPL-1.0
use super::{VkBackend, VkContext};
use crate::backend::SetBinding;
use crate::descriptor::DescriptorBackend;
use crate::error::{RenderError, Result};
use crate::pipeline::PipelineDesc;
use ash::vk;
use carto_render::SamplerKind;
use std::ffi::CStr;

const ENTRY_POINT: &CStr = c"main";

pub(super) const PUSH_STAGES: vk::ShaderStageFlags = vk::ShaderStageFlags::from_raw(
    vk::ShaderStageFlags::VERTEX.as_raw() | vk::ShaderStageFlags::FRAGMENT.as_raw(),
);

/// Color + depth, one subpass. The color attachment is cleared on load and left
/// in `final_layout`, ready for present or a transfer read.
pub(super) unsafe fn create_render_pass(
    ctx: &VkContext,
    color: vk::Format,
    depth: vk::Format,
    final_layout: vk::ImageLayout,
) -> Result<vk::RenderPass> {
    let attachments = [
        vk::AttachmentDescription {
            format: color,
            samples: vk::SampleCountFlags::TYPE_1,
            load_op: vk::AttachmentLoadOp::CLEAR,
            store_op: vk::AttachmentStoreOp::STORE,
            stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
            stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
            initial_layout: vk::ImageLayout::UNDEFINED,
            final_layout,
            ..Default::default()
        },
        vk::AttachmentDescription {
            format: depth,
            samples: vk::SampleCountFlags::TYPE_1,
            load_op: vk::AttachmentLoadOp::CLEAR,
            store_op: vk::AttachmentStoreOp::DONT_CARE,
            stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
            stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
            initial_layout: vk::ImageLayout::UNDEFINED,
            final_layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            ..Default::default()
        },
    ];
    let color_ref = vk::AttachmentReference {
        attachment: 0,
        layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
    };
    let depth_ref = vk::AttachmentReference {
        attachment: 1,
        layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
    };
    let subpass = vk::SubpassDescription {
        pipeline_bind_point: vk::PipelineBindPoint::GRAPHICS,
        color_attachment_count: 1,
        p_color_attachments: &color_ref,
        p_depth_stencil_attachment: &depth_ref,
        ..Default::default()
    };
    let attachment_stages =
        vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS;
    let dependencies = [
        vk::SubpassDependency {
            src_subpass: vk::SUBPASS_EXTERNAL,
            dst_subpass: 0,
            src_stage_mask: attachment_stages,
            dst_stage_mask: attachment_stages,
            src_access_mask: vk::AccessFlags::empty(),
            dst_access_mask: vk::AccessFlags::COLOR_ATTACHMENT_WRITE
                | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            ..Default::default()
        },
        // readback copies the color attachment right after the pass
        vk::SubpassDependency {
            src_subpass: 0,
            dst_subpass: vk::SUBPASS_EXTERNAL,
            src_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            dst_stage_mask: vk::PipelineStageFlags::TRANSFER,
            src_access_mask: vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
            dst_access_mask: vk::AccessFlags::TRANSFER_READ,
            ..Default::default()
        },
    ];
    let info = vk::RenderPassCreateInfo {
        s_type: vk::StructureType::RENDER_PASS_CREATE_INFO,
        attachment_count: attachments.len() as u32,
        p_attachments: attachments.as_ptr(),
        subpass_count: 1,
        p_subpasses: &subpass,
        dependency_count: dependencies.len() as u32,
        p_dependencies: dependencies.as_ptr(),
        ..Default::default()
    };
    Ok(unsafe { ctx.device.create_render_pass(&info, None) }?)
}

pub(super) unsafe fn create_framebuffer(
    ctx: &VkContext,
    render_pass: vk::RenderPass,
    attachments: &[vk::ImageView],
    extent: vk::Extent2D,
) -> Result<vk::Framebuffer> {
    let info = vk::FramebufferCreateInfo {
        s_type: vk::StructureType::FRAMEBUFFER_CREATE_INFO,
        render_pass,
        attachment_count: attachments.len() as u32,
        p_attachments: attachments.as_ptr(),
        width: extent.width,
        height: extent.height,
        layers: 1,
        ..Default::default()
    };
    Ok(unsafe { ctx.device.create_framebuffer(&info, None) }?)
}

pub(super) unsafe fn create_set_layout(
    ctx: &VkContext,
    bindings: &[SetBinding],
) -> Result<vk::DescriptorSetLayout> {
    let bindings: Vec<_> = bindings
        .iter()
        .map(|b| vk::DescriptorSetLayoutBinding {
            binding: b.binding,
            descriptor_type: b.ty,
            descriptor_count: 1,
            stage_flags: b.stages,
            ..Default::default()
        })
        .collect();
    let info = vk::DescriptorSetLayoutCreateInfo {
        s_type: vk::StructureType::DESCRIPTOR_SET_LAYOUT_CREATE_INFO,
        binding_count: bindings.len() as u32,
        p_bindings: bindings.as_ptr(),
        ..Default::default()
    };
    Ok(unsafe { ctx.device.create_descriptor_set_layout(&info, None) }?)
}

pub(super) unsafe fn create_pipeline_layout(
    ctx: &VkContext,
    set_layouts: &[vk::DescriptorSetLayout],
    push_constant_bytes: u32,
) -> Result<vk::PipelineLayout> {
    let range = vk::PushConstantRange {
        stage_flags: PUSH_STAGES,
        offset: 0,
        size: push_constant_bytes,
    };
    let info = vk::PipelineLayoutCreateInfo {
        s_type: vk::StructureType::PIPELINE_LAYOUT_CREATE_INFO,
        set_layout_count: set_layouts.len() as u32,
        p_set_layouts: set_layouts.as_ptr(),
        push_constant_range_count: u32::from(push_constant_bytes > 0),
        p_push_constant_ranges: &range,
        ..Default::default()
    };
    Ok(unsafe { ctx.device.create_pipeline_layout(&info, None) }?)
}

unsafe fn shader_module(ctx: &VkContext, code: &[u32]) -> Result<vk::ShaderModule> {
    let info = vk::ShaderModuleCreateInfo {
        s_type: vk::StructureType::SHADER_MODULE_CREATE_INFO,
        p_code: code.as_ptr(),
        code_size: code.len() * 4,
        ..Default::default()
    };
    Ok(unsafe { ctx.device.create_shader_module(&info, None) }?)
}

pub(super) unsafe fn create_pipeline(ctx: &VkContext, desc: &PipelineDesc<'_>) -> Result<vk::Pipeline> {
    // STRICT: built against `desc.render_pass` subpass 0; a color format change
    // means a new render pass and a rebuild before recording.
    let d = &ctx.device;
    let vs = unsafe { shader_module(ctx, &desc.shaders.vertex)? };
    let fs = match unsafe { shader_module(ctx, &desc.shaders.fragment) } {
        Ok(fs) => fs,
        Err(e) => {
            unsafe { d.destroy_shader_module(vs, None) };
            return Err(e);
        }
    };

    let stages = [
        vk::PipelineShaderStageCreateInfo {
            s_type: vk::StructureType::PIPELINE_SHADER_STAGE_CREATE_INFO,
            stage: vk::ShaderStageFlags::VERTEX,
            module: vs,
            p_name: ENTRY_POINT.as_ptr(),
            ..Default::default()
        },
        vk::PipelineShaderStageCreateInfo {
            s_type: vk::StructureType::PIPELINE_SHADER_STAGE_CREATE_INFO,
            stage: vk::ShaderStageFlags::FRAGMENT,
            module: fs,
            p_name: ENTRY_POINT.as_ptr(),
            ..Default::default()
        },
    ];

    let layout = desc.kind.vertex_layout();
    let binding = vk::VertexInputBindingDescription {
        binding: 0,
        stride: layout.stride,
        input_rate: vk::VertexInputRate::VERTEX,
    };
    let attributes: Vec<_> = layout
        .attributes
        .iter()
        .map(|&(location, format, offset)| vk::VertexInputAttributeDescription {
            location,
            binding: 0,
            format,
            offset,
        })
        .collect();
    let vertex_input = vk::PipelineVertexInputStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_VERTEX_INPUT_STATE_CREATE_INFO,
        vertex_binding_description_count: 1,
        p_vertex_binding_descriptions: &binding,
        vertex_attribute_description_count: attributes.len() as u32,
        p_vertex_attribute_descriptions: attributes.as_ptr(),
        ..Default::default()
    };
    let input_assembly = vk::PipelineInputAssemblyStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_INPUT_ASSEMBLY_STATE_CREATE_INFO,
        topology: desc.kind.topology(),
        ..Default::default()
    };
    let dyn_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
    let dynamic_state = vk::PipelineDynamicStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_DYNAMIC_STATE_CREATE_INFO,
        dynamic_state_count: dyn_states.len() as u32,
        p_dynamic_states: dyn_states.as_ptr(),
        ..Default::default()
    };
    let viewport_state = vk::PipelineViewportStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_VIEWPORT_STATE_CREATE_INFO,
        viewport_count: 1,
        scissor_count: 1,
        ..Default::default()
    };
    // map geometry has no consistent winding
    let raster = vk::PipelineRasterizationStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_RASTERIZATION_STATE_CREATE_INFO,
        polygon_mode: vk::PolygonMode::FILL,
        cull_mode: vk::CullModeFlags::NONE,
        front_face: vk::FrontFace::COUNTER_CLOCKWISE,
        line_width: 1.0,
        ..Default::default()
    };
    let multisample = vk::PipelineMultisampleStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_MULTISAMPLE_STATE_CREATE_INFO,
        rasterization_samples: vk::SampleCountFlags::TYPE_1,
        ..Default::default()
    };
    let depth_stencil = vk::PipelineDepthStencilStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_DEPTH_STENCIL_STATE_CREATE_INFO,
        depth_test_enable: vk::TRUE,
        depth_write_enable: vk::TRUE,
        depth_compare_op: vk::CompareOp::LESS_OR_EQUAL,
        ..Default::default()
    };
    // straight alpha over whatever is already drawn
    let blend_attachment = vk::PipelineColorBlendAttachmentState {
        blend_enable: vk::TRUE,
        src_color_blend_factor: vk::BlendFactor::SRC_ALPHA,
        dst_color_blend_factor: vk::BlendFactor::ONE_MINUS_SRC_ALPHA,
        color_blend_op: vk::BlendOp::ADD,
        src_alpha_blend_factor: vk::BlendFactor::ONE,
        dst_alpha_blend_factor: vk::BlendFactor::ONE_MINUS_SRC_ALPHA,
        alpha_blend_op: vk::BlendOp::ADD,
        color_write_mask: vk::ColorComponentFlags::RGBA,
    };
    let color_blend = vk::PipelineColorBlendStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_COLOR_BLEND_STATE_CREATE_INFO,
        attachment_count: 1,
        p_attachments: &blend_attachment,
        ..Default::default()
    };

    let info = vk::GraphicsPipelineCreateInfo {
        s_type: vk::StructureType::GRAPHICS_PIPELINE_CREATE_INFO,
        stage_count: stages.len() as u32,
        p_stages: stages.as_ptr(),
        p_vertex_input_state: &vertex_input,
        p_input_assembly_state: &input_assembly,
        p_viewport_state: &viewport_state,
        p_rasterization_state: &raster,
        p_multisample_state: &multisample,
        p_depth_stencil_state: &depth_stencil,
        p_color_blend_state: &color_blend,
        p_dynamic_state: &dynamic_state,
        layout: desc.layout,
        render_pass: desc.render_pass,
        subpass: 0,
        ..Default::default()
    };
    let created = unsafe {
        d.create_graphics_pipelines(ctx.pipeline_cache, std::slice::from_ref(&info), None)
    };
    unsafe {
        d.destroy_shader_module(vs, None);
        d.destroy_shader_module(fs, None);
    }
    match created {
        Ok(pipelines) => pipelines.into_iter().next().ok_or_else(|| RenderError::Shader {
            name: desc.kind.shader_name().to_owned(),
            reason: "driver returned no pipeline".into(),
        }),
        Err((_, r)) => Err(RenderError::Shader {
            name: desc.kind.shader_name().to_owned(),
            reason: format!("pipeline creation failed: {r}"),
        }),
    }
}

pub(super) unsafe fn create_sampler(ctx: &VkContext, kind: SamplerKind) -> Result<vk::Sampler> {
    let filter = match kind {
        SamplerKind::Linear => vk::Filter::LINEAR,
        SamplerKind::Nearest => vk::Filter::NEAREST,
    };
    let info = vk::SamplerCreateInfo {
        s_type: vk::StructureType::SAMPLER_CREATE_INFO,
        mag_filter: filter,
        min_filter: filter,
        mipmap_mode: vk::SamplerMipmapMode::NEAREST,
        address_mode_u: vk::SamplerAddressMode::CLAMP_TO_EDGE,
        address_mode_v: vk::SamplerAddressMode::CLAMP_TO_EDGE,
        address_mode_w: vk::SamplerAddressMode::CLAMP_TO_EDGE,
        max_lod: 0.0,
        border_color: vk::BorderColor::FLOAT_TRANSPARENT_BLACK,
        ..Default::default()
    };
    Ok(unsafe { ctx.device.create_sampler(&info, None) }?)
}

pub(super) unsafe fn write_buffer_descriptor(
    ctx: &VkContext,
    set: vk::DescriptorSet,
    binding: u32,
    ty: vk::DescriptorType,
    buffer: vk::Buffer,
    range: u64,
) {
    let info = vk::DescriptorBufferInfo {
        buffer,
        offset: 0,
        range,
    };
    let write = vk::WriteDescriptorSet {
        s_type: vk::StructureType::WRITE_DESCRIPTOR_SET,
        dst_set: set,
        dst_binding: binding,
        descriptor_count: 1,
        descriptor_type: ty,
        p_buffer_info: &info,
        ..Default::default()
    };
    unsafe { ctx.device.update_descriptor_sets(std::slice::from_ref(&write), &[]) };
}

pub(super) unsafe fn write_image_descriptor(
    ctx: &VkContext,
    set: vk::DescriptorSet,
    binding: u32,
    view: vk::ImageView,
    sampler: vk::Sampler,
) {
    let info = vk::DescriptorImageInfo {
        sampler,
        image_view: view,
        image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
    };
    let write = vk::WriteDescriptorSet {
        s_type: vk::StructureType::WRITE_DESCRIPTOR_SET,
        dst_set: set,
        dst_binding: binding,
        descriptor_count: 1,
        descriptor_type: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
        p_image_info: &info,
        ..Default::default()
    };
    unsafe { ctx.device.update_descriptor_sets(std::slice::from_ref(&write), &[]) };
}

impl DescriptorBackend for VkBackend {
    fn create_descriptor_pool(
        &self,
        max_sets: u32,
        sizes: &[vk::DescriptorPoolSize],
    ) -> Result<vk::DescriptorPool> {
        let info = vk::DescriptorPoolCreateInfo {
            s_type: vk::StructureType::DESCRIPTOR_POOL_CREATE_INFO,
            max_sets,
            pool_size_count: sizes.len() as u32,
            p_pool_sizes: sizes.as_ptr(),
            ..Default::default()
        };
        Ok(unsafe { self.device().create_descriptor_pool(&info, None) }?)
    }

    fn allocate_descriptor_set(
        &self,
        pool: vk::DescriptorPool,
        layout: vk::DescriptorSetLayout,
    ) -> std::result::Result<vk::DescriptorSet, vk::Result> {
        let info = vk::DescriptorSetAllocateInfo {
            s_type: vk::StructureType::DESCRIPTOR_SET_ALLOCATE_INFO,
            descriptor_pool: pool,
            descriptor_set_count: 1,
            p_set_layouts: &layout,
            ..Default::default()
        };
        let sets = unsafe { self.device().allocate_descriptor_sets(&info) }?;
        sets.into_iter()
            .next()
            .ok_or(vk::Result::ERROR_OUT_OF_POOL_MEMORY)
    }

    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool) {
        unsafe { self.device().destroy_descriptor_pool(pool, None) };
    }
}
