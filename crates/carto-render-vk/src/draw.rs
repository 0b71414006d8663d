// SPDX-License-Identifier: CEPL-1.0
use crate::backend::{Command, GpuBackend};
use crate::buffer::BufferHandle;
use crate::error::{RenderError, Result};
use crate::pipeline::{PipelineKind, PipelineSet};
use crate::texture::TextureHandle;
use ash::vk;
use carto_render::DrawConstants;
use glam::Mat4;

/// Per-frame transforms, uploaded once at `end_frame` and indexed from push constants.
/// Slot 0 is always identity.
#[derive(Debug)]
pub struct TransformRing {
    slots: Vec<Mat4>,
    capacity: usize,
}

impl TransformRing {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let mut slots = Vec::with_capacity(capacity);
        slots.push(Mat4::IDENTITY);
        Self { slots, capacity }
    }

    pub fn reset(&mut self) {
        self.slots.truncate(1);
    }

    pub fn push(&mut self, m: Mat4) -> Result<u32> {
        if self.slots.len() >= self.capacity {
            return Err(RenderError::TransformRingOverflow {
                capacity: self.capacity,
            });
        }
        self.slots.push(m);
        Ok((self.slots.len() - 1) as u32)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn byte_capacity(&self) -> u64 {
        (self.capacity * std::mem::size_of::<Mat4>()) as u64
    }

    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.slots)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IndexRange {
    pub buffer: vk::Buffer,
    pub offset: u64,
    pub count: u32,
    pub first: u32,
}

/// Immutable description of one draw.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DrawCall {
    pub kind: PipelineKind,
    pub vertex_buffer: vk::Buffer,
    pub vertex_offset: u64,
    pub vertex_count: u32,
    pub first_vertex: u32,
    pub index: Option<IndexRange>,
    pub texture: Option<vk::DescriptorSet>,
    pub tint: [f32; 4],
}

impl DrawCall {
    pub fn geometry(buffer: &BufferHandle, vertex_count: u32) -> Self {
        Self {
            kind: PipelineKind::Flat,
            vertex_buffer: buffer.native(),
            vertex_offset: 0,
            vertex_count,
            first_vertex: 0,
            index: None,
            texture: None,
            tint: [1.0; 4],
        }
    }

    pub fn textured(mut self, texture: &TextureHandle) -> Self {
        self.kind = PipelineKind::Textured;
        self.texture = Some(texture.descriptor_set());
        self
    }

    pub fn lines(mut self) -> Self {
        self.kind = PipelineKind::Lines;
        self.texture = None;
        self
    }

    pub fn indexed(mut self, indices: &BufferHandle, index_count: u32) -> Self {
        self.index = Some(IndexRange {
            buffer: indices.native(),
            offset: 0,
            count: index_count,
            first: 0,
        });
        self
    }

    pub fn vertex_offset(mut self, bytes: u64) -> Self {
        self.vertex_offset = bytes;
        self
    }

    pub fn first_vertex(mut self, first: u32) -> Self {
        self.first_vertex = first;
        self
    }

    pub fn tint(mut self, rgba: [f32; 4]) -> Self {
        self.tint = rgba;
        self
    }
}

/// What the graphics command buffer currently has bound. Reset every frame.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct RecordingState {
    pub pipeline: Option<PipelineKind>,
    pub texture: Option<vk::DescriptorSet>,
    pub vertex_buffer: Option<(vk::Buffer, u64)>,
    pub index_buffer: Option<(vk::Buffer, u64)>,
    pub constants: Option<(u32, [f32; 4])>,
}

pub(crate) fn emit_draw<G: GpuBackend + ?Sized>(
    gpu: &G,
    cmd: vk::CommandBuffer,
    state: &mut RecordingState,
    pipelines: &PipelineSet,
    transform: u32,
    call: &DrawCall,
) {
    if state.pipeline != Some(call.kind) {
        gpu.record(
            cmd,
            Command::BindPipeline {
                pipeline: pipelines.get(call.kind),
            },
        );
        state.pipeline = Some(call.kind);
    }

    if let Some(set) = call.texture {
        if state.texture != Some(set) {
            gpu.record(
                cmd,
                Command::BindDescriptorSet {
                    layout: pipelines.layout,
                    index: 1,
                    set,
                },
            );
            state.texture = Some(set);
        }
    }

    let vb = (call.vertex_buffer, call.vertex_offset);
    if state.vertex_buffer != Some(vb) {
        gpu.record(
            cmd,
            Command::BindVertexBuffer {
                buffer: vb.0,
                offset: vb.1,
            },
        );
        state.vertex_buffer = Some(vb);
    }

    if state.constants != Some((transform, call.tint)) {
        let constants = DrawConstants::new(transform, call.tint);
        gpu.record(
            cmd,
            Command::PushConstants {
                layout: pipelines.layout,
                data: bytemuck::bytes_of(&constants),
            },
        );
        state.constants = Some((transform, call.tint));
    }

    match call.index {
        Some(ix) => {
            if state.index_buffer != Some((ix.buffer, ix.offset)) {
                gpu.record(
                    cmd,
                    Command::BindIndexBuffer {
                        buffer: ix.buffer,
                        offset: ix.offset,
                    },
                );
                state.index_buffer = Some((ix.buffer, ix.offset));
            }
            gpu.record(
                cmd,
                Command::DrawIndexed {
                    index_count: ix.count,
                    first_index: ix.first,
                    vertex_offset: call.first_vertex as i32,
                },
            );
        }
        None => gpu.record(
            cmd,
            Command::Draw {
                vertex_count: call.vertex_count,
                first_vertex: call.first_vertex,
            },
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_overflow_is_fatal() {
        let mut ring = TransformRing::new(3);
        assert_eq!(ring.push(Mat4::from_scale(glam::Vec3::splat(2.0))).unwrap(), 1);
        assert_eq!(ring.push(Mat4::IDENTITY).unwrap(), 2);
        let err = ring.push(Mat4::IDENTITY).unwrap_err();
        assert!(matches!(err, RenderError::TransformRingOverflow { capacity: 3 }));
        assert!(err.is_fatal());
        ring.reset();
        assert_eq!(ring.len(), 1);
        assert_eq!(ring.push(Mat4::IDENTITY).unwrap(), 1);
    }

    #[test]
    fn ring_bytes_are_column_major_floats() {
        let mut ring = TransformRing::new(4);
        ring.push(Mat4::from_translation(glam::Vec3::new(5.0, 6.0, 7.0)))
            .unwrap();
        let bytes = ring.as_bytes();
        assert_eq!(bytes.len(), 2 * 64);
        let floats: &[f32] = bytemuck::cast_slice(bytes);
        assert_eq!(&floats[16 + 12..16 + 15], &[5.0, 6.0, 7.0]);
        assert_eq!(ring.byte_capacity(), 256);
    }
}
