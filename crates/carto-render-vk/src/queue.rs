// SPDX-License-Identifier: CEPL-1.0
use ash::vk;

/// Which queue families render and present. Fixed for the device's lifetime.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueAssignment {
    pub graphics_index: u32,
    pub present_index: u32,
    pub is_universal: bool,
}

impl QueueAssignment {
    /// First family that can both draw and present wins. Failing that, the first
    /// graphics family and the first presenting family are paired up.
    pub fn select<P>(families: &[vk::QueueFamilyProperties], mut can_present: P) -> Option<Self>
    where
        P: FnMut(u32) -> bool,
    {
        let graphics = |q: &vk::QueueFamilyProperties| {
            q.queue_count > 0 && q.queue_flags.contains(vk::QueueFlags::GRAPHICS)
        };

        for (i, q) in families.iter().enumerate() {
            let i = i as u32;
            if graphics(q) && can_present(i) {
                return Some(Self {
                    graphics_index: i,
                    present_index: i,
                    is_universal: true,
                });
            }
        }

        let graphics_index = families.iter().position(graphics)? as u32;
        let present_index = (0..families.len() as u32).find(|&i| can_present(i))?;
        Some(Self {
            graphics_index,
            present_index,
            is_universal: false,
        })
    }

    pub fn sharing_mode(&self) -> vk::SharingMode {
        if self.is_universal {
            vk::SharingMode::EXCLUSIVE
        } else {
            vk::SharingMode::CONCURRENT
        }
    }

    /// Family indices a shared resource must name; empty when exclusive.
    pub fn sharing_families(&self) -> Vec<u32> {
        if self.is_universal {
            Vec::new()
        } else {
            vec![self.graphics_index, self.present_index]
        }
    }

    /// Distinct families that need a queue at device creation.
    pub fn unique_families(&self) -> Vec<u32> {
        if self.graphics_index == self.present_index {
            vec![self.graphics_index]
        } else {
            vec![self.graphics_index, self.present_index]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags, count: u32) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: count,
            ..Default::default()
        }
    }

    #[test]
    fn universal_family_is_used_for_both() {
        let fams = [family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::TRANSFER, 1)];
        let q = QueueAssignment::select(&fams, |_| true).unwrap();
        assert!(q.is_universal);
        assert_eq!(q.graphics_index, q.present_index);
        assert_eq!(q.sharing_mode(), vk::SharingMode::EXCLUSIVE);
        assert_eq!(q.unique_families(), vec![0]);
    }

    #[test]
    fn universal_preferred_over_earlier_graphics_only() {
        let fams = [
            family(vk::QueueFlags::GRAPHICS, 1),
            family(vk::QueueFlags::COMPUTE, 1),
            family(vk::QueueFlags::GRAPHICS, 1),
        ];
        let q = QueueAssignment::select(&fams, |i| i >= 1).unwrap();
        assert!(q.is_universal);
        assert_eq!(q.graphics_index, 2);
    }

    #[test]
    fn disjoint_families_are_split() {
        let fams = [
            family(vk::QueueFlags::COMPUTE, 1),
            family(vk::QueueFlags::GRAPHICS, 1),
            family(vk::QueueFlags::TRANSFER, 1),
        ];
        let q = QueueAssignment::select(&fams, |i| i == 2).unwrap();
        assert!(!q.is_universal);
        assert_eq!(q.graphics_index, 1);
        assert_eq!(q.present_index, 2);
        assert_eq!(q.sharing_mode(), vk::SharingMode::CONCURRENT);
        assert_eq!(q.sharing_families(), vec![1, 2]);
    }

    #[test]
    fn nothing_matches() {
        let fams = [family(vk::QueueFlags::COMPUTE, 1)];
        assert_eq!(QueueAssignment::select(&fams, |_| true), None);
        let fams = [family(vk::QueueFlags::GRAPHICS, 1)];
        assert_eq!(QueueAssignment::select(&fams, |_| false), None);
        assert_eq!(QueueAssignment::select(&[], |_| true), None);
    }

    #[test]
    fn empty_family_is_skipped() {
        let fams = [
            family(vk::QueueFlags::GRAPHICS, 0),
            family(vk::QueueFlags::GRAPHICS, 2),
        ];
        let q = QueueAssignment::select(&fams, |_| true).unwrap();
        assert_eq!(q.graphics_index, 1);
    }
}
