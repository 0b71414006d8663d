// SPDX-License-Identifier: CEPL-1.0
use crate::backend::{Command, GpuBackend};
use crate::error::Result;
use ash::vk;
use std::cell::Cell;

/// Frame serial of the last device-side write into a buffer. 0 means never written.
///
/// Transfer writes recorded in one frame run back to back; a buffer written
/// again in the same frame gets a `write_after_write` barrier first.
#[derive(Debug, Default)]
pub struct SyncToken {
    last_write: Cell<u64>,
}

impl SyncToken {
    pub fn mark_written(&self, frame: u64) {
        self.last_write.set(frame);
    }

    pub fn written_in(&self, frame: u64) -> bool {
        frame != 0 && self.last_write.get() == frame
    }

    pub fn last_write(&self) -> u64 {
        self.last_write.get()
    }
}

/// Orders a transfer write into `buffer` after an earlier one in the same command buffer.
pub fn write_after_write(buffer: vk::Buffer) -> Command<'static> {
    Command::BufferBarrier {
        buffer,
        src_stage: vk::PipelineStageFlags::TRANSFER,
        dst_stage: vk::PipelineStageFlags::TRANSFER,
        src_access: vk::AccessFlags::TRANSFER_WRITE,
        dst_access: vk::AccessFlags::TRANSFER_WRITE,
    }
}

/// Event the transfer command buffer sets after its last copy and the graphics
/// command buffer waits on before its first read.
#[derive(Debug)]
pub struct TransferEvent {
    event: vk::Event,
}

impl TransferEvent {
    pub fn new<G: GpuBackend + ?Sized>(gpu: &G) -> Result<Self> {
        Ok(Self {
            event: gpu.create_event()?,
        })
    }

    pub fn handle(&self) -> vk::Event {
        self.event
    }

    pub fn reset(&self) -> Command<'static> {
        Command::ResetEvent {
            event: self.event,
            stage: vk::PipelineStageFlags::TRANSFER,
        }
    }

    pub fn signal(&self) -> Command<'static> {
        Command::SetEvent {
            event: self.event,
            stage: vk::PipelineStageFlags::TRANSFER,
        }
    }

    pub fn wait(&self) -> Command<'static> {
        Command::WaitEvent {
            event: self.event,
            src_stage: vk::PipelineStageFlags::TRANSFER,
            dst_stage: vk::PipelineStageFlags::VERTEX_INPUT
                | vk::PipelineStageFlags::VERTEX_SHADER
                | vk::PipelineStageFlags::FRAGMENT_SHADER,
            src_access: vk::AccessFlags::TRANSFER_WRITE,
            dst_access: vk::AccessFlags::VERTEX_ATTRIBUTE_READ
                | vk::AccessFlags::INDEX_READ
                | vk::AccessFlags::SHADER_READ,
        }
    }

    pub fn destroy<G: GpuBackend + ?Sized>(self, gpu: &G) {
        gpu.destroy_event(self.event);
    }
}
