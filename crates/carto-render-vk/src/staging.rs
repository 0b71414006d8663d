// SPDX-License-Identifier: CEPL-1.0
use crate::alloc::{RawBuffer, ResourceAllocator};
use crate::error::Result;
use ash::vk;
use carto_render::{BufferUsage, MemoryClass};
use tracing::debug;

pub const STAGING_ALIGN: u64 = 4;
const MIN_STAGING_BYTES: u64 = 4096;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StagingAlloc {
    pub buffer: vk::Buffer,
    pub buffer_index: usize,
    pub offset: u64,
    pub size: u64,
}

fn align_up(v: u64, a: u64) -> u64 {
    v.div_ceil(a) * a
}

/// Bump allocator over a growing list of staging buffers. Rewound every frame.
#[derive(Debug)]
pub struct StagingRing {
    buffers: Vec<RawBuffer>,
    active: usize,
    used: u64,
    initial: u64,
}

impl StagingRing {
    pub fn new(initial_bytes: u64) -> Self {
        Self {
            buffers: Vec::new(),
            active: 0,
            used: 0,
            initial: initial_bytes.max(MIN_STAGING_BYTES).next_power_of_two(),
        }
    }

    pub fn reset(&mut self) {
        self.active = 0;
        self.used = 0;
    }

    pub fn active_index(&self) -> usize {
        self.active
    }

    pub fn bytes_used(&self) -> u64 {
        self.used
    }

    pub fn capacities(&self) -> impl Iterator<Item = u64> + '_ {
        self.buffers.iter().map(|b| b.size)
    }

    pub fn alloc<A: ResourceAllocator + ?Sized>(
        &mut self,
        alloc: &A,
        size: u64,
    ) -> Result<StagingAlloc> {
        let size = size.max(1);
        loop {
            if let Some(buf) = self.buffers.get(self.active) {
                let offset = align_up(self.used, STAGING_ALIGN);
                if offset + size <= buf.size {
                    self.used = offset + size;
                    return Ok(StagingAlloc {
                        buffer: buf.buffer,
                        buffer_index: self.active,
                        offset,
                        size,
                    });
                }
                self.active += 1;
                self.used = 0;
                continue;
            }

            let cap = match self.buffers.last() {
                Some(last) => (last.size * 2).max(size.next_power_of_two()),
                None => self.initial.max(size.next_power_of_two()),
            };
            let raw = alloc.create_buffer(cap, MemoryClass::Staging, BufferUsage::TRANSFER_SRC)?;
            debug!(
                "staging ring: buffer #{} with {} bytes",
                self.buffers.len(),
                cap
            );
            self.buffers.push(raw);
            self.active = self.buffers.len() - 1;
            self.used = 0;
        }
    }

    /// Allocate and fill in one go.
    pub fn write<A: ResourceAllocator + ?Sized>(
        &mut self,
        alloc: &A,
        data: &[u8],
    ) -> Result<StagingAlloc> {
        let a = self.alloc(alloc, data.len() as u64)?;
        alloc.write_buffer(&self.buffers[a.buffer_index], a.offset, data)?;
        Ok(a)
    }

    pub fn destroy<A: ResourceAllocator + ?Sized>(&mut self, alloc: &A) {
        for b in self.buffers.drain(..) {
            alloc.destroy_buffer(b);
        }
        self.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockGpu;

    fn overlaps(a: &StagingAlloc, b: &StagingAlloc) -> bool {
        a.buffer == b.buffer && a.offset < b.offset + b.size && b.offset < a.offset + a.size
    }

    #[test]
    fn allocations_are_aligned_and_disjoint() {
        let gpu = MockGpu::new();
        let mut ring = StagingRing::new(4096);
        let sizes = [3u64, 17, 1, 4096, 5, 2000, 2000, 2000, 9000, 6];
        let allocs: Vec<_> = sizes.iter().map(|&s| ring.alloc(&gpu, s).unwrap()).collect();
        for (i, a) in allocs.iter().enumerate() {
            assert_eq!(a.offset % STAGING_ALIGN, 0, "offset {}", a.offset);
            for b in &allocs[i + 1..] {
                assert!(!overlaps(a, b), "{a:?} overlaps {b:?}");
            }
        }
    }

    #[test]
    fn grows_in_powers_of_two() {
        let gpu = MockGpu::new();
        let mut ring = StagingRing::new(4096);
        ring.alloc(&gpu, 4000).unwrap();
        ring.alloc(&gpu, 4000).unwrap();
        let big = ring.alloc(&gpu, 100_000).unwrap();
        let caps: Vec<u64> = ring.capacities().collect();
        assert_eq!(caps, vec![4096, 8192, 131_072]);
        assert_eq!(big.buffer_index, 2);
        assert!(caps.iter().all(|c| c.is_power_of_two()));
    }

    #[test]
    fn reset_rewinds_and_reuses() {
        let gpu = MockGpu::new();
        let mut ring = StagingRing::new(4096);
        ring.alloc(&gpu, 3000).unwrap();
        ring.alloc(&gpu, 3000).unwrap();
        assert_eq!(ring.active_index(), 1);
        ring.reset();
        assert_eq!((ring.active_index(), ring.bytes_used()), (0, 0));
        let created = gpu.buffers_created();
        ring.alloc(&gpu, 3000).unwrap();
        ring.alloc(&gpu, 3000).unwrap();
        assert_eq!(gpu.buffers_created(), created);
    }

    #[test]
    fn write_lands_in_staging_memory() {
        let gpu = MockGpu::new();
        let mut ring = StagingRing::new(4096);
        ring.alloc(&gpu, 1).unwrap();
        let a = ring.write(&gpu, &[1, 2, 3, 4, 5]).unwrap();
        assert_eq!(a.offset, 4);
        assert_eq!(gpu.buffer_bytes(a.buffer, a.offset, 5), vec![1, 2, 3, 4, 5]);
    }
}
