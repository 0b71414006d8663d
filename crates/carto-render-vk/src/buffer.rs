// SPDX-License-Identifier: CEPL-1.0
use crate::alloc::{RawBuffer, ResourceAllocator};
use crate::error::Result;
use crate::sync::SyncToken;
use ash::vk;
use carto_render::{BufferUsage, MemoryClass};
use tracing::debug;

#[derive(Debug)]
pub struct BufferHandle {
    raw: RawBuffer,
    usage: BufferUsage,
    sync: SyncToken,
}

impl BufferHandle {
    pub(crate) fn create<A: ResourceAllocator + ?Sized>(
        alloc: &A,
        size: u64,
        class: MemoryClass,
        usage: BufferUsage,
    ) -> Result<Self> {
        Ok(Self {
            raw: alloc.create_buffer(size, class, usage)?,
            usage,
            sync: SyncToken::default(),
        })
    }

    pub fn native(&self) -> vk::Buffer {
        self.raw.buffer
    }

    pub fn size(&self) -> u64 {
        self.raw.size
    }

    pub fn memory_class(&self) -> MemoryClass {
        self.raw.class
    }

    pub fn usage(&self) -> BufferUsage {
        self.usage
    }

    pub fn sync_token(&self) -> &SyncToken {
        &self.sync
    }

    pub(crate) fn raw(&self) -> &RawBuffer {
        &self.raw
    }

    pub(crate) fn into_raw(self) -> RawBuffer {
        self.raw
    }
}

/// A logical buffer backed by one physical buffer per in-flight generation.
///
/// `inc` hands out generation `cursor` and advances; a generation's buffer is
/// created the first time it is reached and reused on every later pass.
/// `reset` rewinds the cursor for a new recording pass.
#[derive(Debug)]
pub struct MultiBuffer {
    buffers: Vec<BufferHandle>,
    cursor: usize,
    current: usize,
    size: u64,
    class: MemoryClass,
    usage: BufferUsage,
}

impl MultiBuffer {
    pub(crate) fn create<A: ResourceAllocator + ?Sized>(
        alloc: &A,
        size: u64,
        class: MemoryClass,
        usage: BufferUsage,
    ) -> Result<Self> {
        let first = BufferHandle::create(alloc, size, class, usage)?;
        Ok(Self {
            buffers: vec![first],
            cursor: 0,
            current: 0,
            size,
            class,
            usage,
        })
    }

    pub fn inc<A: ResourceAllocator + ?Sized>(&mut self, alloc: &A) -> Result<&BufferHandle> {
        let idx = self.cursor;
        if idx == self.buffers.len() {
            let b = BufferHandle::create(alloc, self.size, self.class, self.usage)?;
            self.buffers.push(b);
            debug!(
                "multi-buffer grew to {} generations ({} bytes each)",
                self.buffers.len(),
                self.size
            );
        }
        self.cursor += 1;
        self.current = idx;
        Ok(&self.buffers[idx])
    }

    pub fn reset(&mut self) {
        self.cursor = 0;
    }

    /// Generation most recently handed out by `inc` (generation 0 before the first call).
    pub fn current(&self) -> &BufferHandle {
        &self.buffers[self.current]
    }

    pub fn current_index(&self) -> usize {
        self.current
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn generations(&self) -> usize {
        self.buffers.len()
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn memory_class(&self) -> MemoryClass {
        self.class
    }

    pub(crate) fn into_buffers(self) -> Vec<BufferHandle> {
        self.buffers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockGpu;
    use std::collections::HashSet;

    fn fresh(gpu: &MockGpu) -> MultiBuffer {
        MultiBuffer::create(gpu, 256, MemoryClass::Dynamic, BufferUsage::VERTEX).unwrap()
    }

    #[test]
    fn n_incs_yield_max_one_n_buffers() {
        for n in 0..6 {
            let gpu = MockGpu::new();
            let mut mb = fresh(&gpu);
            let mut seen = HashSet::new();
            seen.insert(mb.current().native());
            for _ in 0..n {
                seen.insert(mb.inc(&gpu).unwrap().native());
            }
            assert_eq!(mb.generations(), n.max(1));
            assert_eq!(seen.len(), n.max(1));
        }
    }

    #[test]
    fn reset_cycles_reuse_generations() {
        let gpu = MockGpu::new();
        let mut mb = fresh(&gpu);
        for _ in 0..3 {
            mb.inc(&gpu).unwrap();
        }
        let created = gpu.buffers_created();
        for _ in 0..10 {
            mb.reset();
            mb.inc(&gpu).unwrap();
            mb.inc(&gpu).unwrap();
        }
        assert_eq!(gpu.buffers_created(), created);
        assert_eq!(mb.generations(), 3);
        assert_eq!(mb.current_index(), 1);
    }

    #[test]
    fn generations_share_size_and_class() {
        let gpu = MockGpu::new();
        let mut mb = fresh(&gpu);
        mb.inc(&gpu).unwrap();
        let b = mb.inc(&gpu).unwrap();
        assert_eq!(b.size(), 256);
        assert_eq!(b.memory_class(), MemoryClass::Dynamic);
        assert_eq!(mb.cursor(), 2);
    }
}
