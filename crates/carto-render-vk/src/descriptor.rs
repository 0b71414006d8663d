// SPDX-License-Identifier: CEPL-1.0
use crate::error::{RenderError, Result};
use ash::vk;
use tracing::{debug, info};

/// Raw pool calls the pool set needs from the device.
pub trait DescriptorBackend {
    fn create_descriptor_pool(
        &self,
        max_sets: u32,
        sizes: &[vk::DescriptorPoolSize],
    ) -> Result<vk::DescriptorPool>;
    /// Raw result: `ERROR_OUT_OF_POOL_MEMORY`/`ERROR_FRAGMENTED_POOL` mean "grow".
    fn allocate_descriptor_set(
        &self,
        pool: vk::DescriptorPool,
        layout: vk::DescriptorSetLayout,
    ) -> std::result::Result<vk::DescriptorSet, vk::Result>;
    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool);
}

/// A set layout plus how many descriptors of each type one set consumes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SetLayout {
    pub handle: vk::DescriptorSetLayout,
    pub demand: Vec<(vk::DescriptorType, u32)>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CapacityTable {
    pub sets: u32,
    pub per_type: Vec<(vk::DescriptorType, u32)>,
}

impl CapacityTable {
    pub fn new(sets: u32, per_type: &[(vk::DescriptorType, u32)]) -> Self {
        Self {
            sets: sets.max(1),
            per_type: per_type.to_vec(),
        }
    }

    pub fn get(&self, ty: vk::DescriptorType) -> u32 {
        lookup(&self.per_type, ty)
    }

    fn set(&mut self, ty: vk::DescriptorType, count: u32) {
        match self.per_type.iter_mut().find(|(t, _)| *t == ty) {
            Some(e) => e.1 = count,
            None => self.per_type.push((ty, count)),
        }
    }

    fn pool_sizes(&self) -> Vec<vk::DescriptorPoolSize> {
        self.per_type
            .iter()
            .filter(|(_, n)| *n > 0)
            .map(|&(ty, descriptor_count)| vk::DescriptorPoolSize {
                ty,
                descriptor_count,
            })
            .collect()
    }
}

fn lookup(table: &[(vk::DescriptorType, u32)], ty: vk::DescriptorType) -> u32 {
    table
        .iter()
        .find(|(t, _)| *t == ty)
        .map(|&(_, n)| n)
        .unwrap_or(0)
}

#[derive(Debug)]
struct Pool {
    handle: vk::DescriptorPool,
    sets_remaining: u32,
    per_type_remaining: Vec<(vk::DescriptorType, u32)>,
}

impl Pool {
    fn fits(&self, layout: &SetLayout) -> bool {
        self.sets_remaining > 0
            && layout
                .demand
                .iter()
                .all(|&(ty, n)| lookup(&self.per_type_remaining, ty) >= n)
    }

    fn consume(&mut self, layout: &SetLayout) {
        self.sets_remaining -= 1;
        for &(ty, n) in &layout.demand {
            if let Some(e) = self.per_type_remaining.iter_mut().find(|(t, _)| *t == ty) {
                e.1 -= n;
            }
        }
    }
}

/// Descriptor sets are bump-allocated from the newest pool. When it refuses,
/// the capacity table grows and a fresh pool is opened; older pools stay alive
/// until `destroy`.
#[derive(Debug)]
pub struct DescriptorPoolSet {
    capacity: CapacityTable,
    pools: Vec<Pool>,
    // descriptors issued per type across every pool
    high_water: Vec<(vk::DescriptorType, u32)>,
    sets_issued: u32,
}

impl DescriptorPoolSet {
    pub fn new<B: DescriptorBackend + ?Sized>(backend: &B, capacity: CapacityTable) -> Result<Self> {
        let mut set = Self {
            capacity,
            pools: Vec::new(),
            high_water: Vec::new(),
            sets_issued: 0,
        };
        set.open_pool(backend)?;
        Ok(set)
    }

    pub fn capacity(&self) -> &CapacityTable {
        &self.capacity
    }

    pub fn pool_count(&self) -> usize {
        self.pools.len()
    }

    pub fn create_new_set<B: DescriptorBackend + ?Sized>(
        &mut self,
        backend: &B,
        layout: &SetLayout,
    ) -> Result<vk::DescriptorSet> {
        // 1) current pool
        if let Some(set) = self.try_allocate(backend, layout)? {
            return Ok(set);
        }

        // 2) grow, open a fresh pool
        self.grow(layout);
        self.open_pool(backend)?;

        // 3) retry once; the fresh pool was sized for this layout
        match self.try_allocate(backend, layout)? {
            Some(set) => Ok(set),
            None => Err(RenderError::DescriptorPoolCorrupt),
        }
    }

    fn try_allocate<B: DescriptorBackend + ?Sized>(
        &mut self,
        backend: &B,
        layout: &SetLayout,
    ) -> Result<Option<vk::DescriptorSet>> {
        let Some(pool) = self.pools.last_mut() else {
            return Ok(None);
        };
        if !pool.fits(layout) {
            return Ok(None);
        }
        match backend.allocate_descriptor_set(pool.handle, layout.handle) {
            Ok(set) => {
                pool.consume(layout);
                self.sets_issued += 1;
                for &(ty, n) in &layout.demand {
                    match self.high_water.iter_mut().find(|(t, _)| *t == ty) {
                        Some(e) => e.1 += n,
                        None => self.high_water.push((ty, n)),
                    }
                }
                Ok(Some(set))
            }
            Err(vk::Result::ERROR_OUT_OF_POOL_MEMORY) | Err(vk::Result::ERROR_FRAGMENTED_POOL) => {
                // driver disagrees with our bookkeeping; treat the pool as spent
                pool.sets_remaining = 0;
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn grow(&mut self, layout: &SetLayout) {
        let current = self.pools.last();
        for &(ty, need) in &layout.demand {
            let cap = self.capacity.get(ty);
            let remaining = current.map_or(0, |p| lookup(&p.per_type_remaining, ty));
            let grown = if remaining < need {
                cap.saturating_mul(2)
                    .max(lookup(&self.high_water, ty).saturating_add(need))
            } else {
                cap.max(need)
            };
            self.capacity.set(ty, grown);
        }
        if current.map_or(true, |p| p.sets_remaining == 0) {
            self.capacity.sets = self
                .capacity
                .sets
                .saturating_mul(2)
                .max(self.sets_issued.saturating_add(1));
        }
        debug!(
            "descriptor pools: grew to {:?} after {} sets (high water {:?})",
            self.capacity, self.sets_issued, self.high_water
        );
    }

    fn open_pool<B: DescriptorBackend + ?Sized>(&mut self, backend: &B) -> Result<()> {
        let handle =
            backend.create_descriptor_pool(self.capacity.sets, &self.capacity.pool_sizes())?;
        self.pools.push(Pool {
            handle,
            sets_remaining: self.capacity.sets,
            per_type_remaining: self.capacity.per_type.clone(),
        });
        if self.pools.len() > 1 {
            info!("descriptor pools: opened pool #{}", self.pools.len());
        }
        Ok(())
    }

    pub fn destroy<B: DescriptorBackend + ?Sized>(&mut self, backend: &B) {
        for p in self.pools.drain(..) {
            backend.destroy_descriptor_pool(p.handle);
        }
    }
}
