//! Per-shader descriptor sets replicated across frames in flight
//!
//! Each set index gets one layout and one allocated set per frame slot, all
//! drawn from a single pool sized from the reflected bindings. Writes either
//! go to every slot (`write_shared`) or to one (`write_dynamic`); the
//! flattened per-frame list handed to command recording is rebuilt lazily
//! when a slot is dirty.

use std::collections::BTreeMap;
use std::sync::Arc;

use ash::vk;

use crate::render::backend::{DescriptorPoolSize, DescriptorResources, DescriptorWrite, GpuDevice};
use crate::render::shader::reflection::{DescriptorBinding, ShaderReflectionInfo};
use crate::render::VulkanResult;

/// Pool sizes for `frames_in_flight` copies of every set, coalesced by descriptor type
pub fn pool_sizes(descriptor_sets: &BTreeMap<u32, Vec<DescriptorBinding>>, frames_in_flight: usize) -> Vec<DescriptorPoolSize> {
    let mut totals: Vec<DescriptorPoolSize> = Vec::new();
    for binding in descriptor_sets.values().flatten() {
        let count = binding.count * frames_in_flight as u32;
        match totals.iter_mut().find(|size| size.kind == binding.kind) {
            Some(size) => size.count += count,
            None => totals.push(DescriptorPoolSize {
                kind: binding.kind,
                count,
            }),
        }
    }
    totals
}

struct SetSlots {
    bindings: Vec<DescriptorBinding>,
    layouts: Vec<vk::DescriptorSetLayout>,
    sets: Vec<vk::DescriptorSet>,
}

/// Descriptor layouts, pool and per-frame sets of one shader
pub struct DescriptorResourcePool {
    device: Arc<dyn GpuDevice>,
    frames_in_flight: usize,
    pool: vk::DescriptorPool,
    slots: BTreeMap<u32, SetSlots>,
    flattened: Vec<Vec<vk::DescriptorSet>>,
    dirty: Vec<bool>,
}

impl DescriptorResourcePool {
    /// Create layouts, the pool and all sets for a reflected shader
    pub fn new(
        device: Arc<dyn GpuDevice>,
        reflection: &ShaderReflectionInfo,
        frames_in_flight: usize,
    ) -> VulkanResult<Self> {
        let frames_in_flight = frames_in_flight.max(1);
        let mut this = Self {
            device,
            frames_in_flight,
            pool: vk::DescriptorPool::null(),
            slots: BTreeMap::new(),
            flattened: vec![Vec::new(); frames_in_flight],
            dirty: vec![true; frames_in_flight],
        };
        if reflection.descriptor_sets.is_empty() {
            return Ok(this);
        }

        // Partially built state is released by Drop on early return.
        for (set, bindings) in &reflection.descriptor_sets {
            let mut layouts = Vec::with_capacity(frames_in_flight);
            for _ in 0..frames_in_flight {
                layouts.push(this.device.create_descriptor_set_layout(bindings)?);
            }
            this.slots.insert(
                *set,
                SetSlots {
                    bindings: bindings.clone(),
                    layouts,
                    sets: Vec::new(),
                },
            );
        }

        let sizes = pool_sizes(&reflection.descriptor_sets, frames_in_flight);
        let max_sets = (this.slots.len() * frames_in_flight) as u32;
        this.pool = this.device.create_descriptor_pool(max_sets, &sizes)?;
        log::debug!(
            "[DESCRIPTOR] Pool {:?}: {} sets, sizes {:?}",
            this.pool,
            max_sets,
            sizes
        );

        for slot in this.slots.values_mut() {
            slot.sets = this.device.allocate_descriptor_sets(this.pool, &slot.layouts)?;
        }
        Ok(this)
    }

    /// Number of frame slots
    pub fn frames_in_flight(&self) -> usize {
        self.frames_in_flight
    }

    /// Backing pool, null when the shader has no descriptors
    pub fn pool(&self) -> vk::DescriptorPool {
        self.pool
    }

    /// Layouts of every set for one frame slot, in ascending set order
    pub fn layouts(&self, frame: usize) -> Vec<vk::DescriptorSetLayout> {
        self.slots
            .values()
            .filter_map(|slot| slot.layouts.get(frame).copied())
            .collect()
    }

    /// Whether the flattened list for `frame` will be rebuilt on next access
    pub fn is_dirty(&self, frame: usize) -> bool {
        self.dirty.get(frame).copied().unwrap_or(false)
    }

    /// Write the same resources into every frame slot
    pub fn write_shared(&mut self, set: u32, binding: u32, resources: &DescriptorResources) -> bool {
        let Some(kind) = self.binding_kind(set, binding) else {
            return false;
        };
        let writes: Vec<DescriptorWrite> = self.slots[&set]
            .sets
            .iter()
            .map(|target| DescriptorWrite {
                set: *target,
                binding,
                kind,
                resources: resources.clone(),
            })
            .collect();
        self.device.update_descriptor_sets(&writes);
        self.dirty.iter_mut().for_each(|dirty| *dirty = true);
        true
    }

    /// Write resources into one frame slot only
    pub fn write_dynamic(&mut self, frame: usize, set: u32, binding: u32, resources: &DescriptorResources) -> bool {
        if frame >= self.frames_in_flight {
            log::error!(
                "[DESCRIPTOR] Frame {} out of range (frames in flight: {})",
                frame,
                self.frames_in_flight
            );
            return false;
        }
        let Some(kind) = self.binding_kind(set, binding) else {
            return false;
        };
        let target = self.slots[&set].sets[frame];
        self.device.update_descriptor_sets(&[DescriptorWrite {
            set: target,
            binding,
            kind,
            resources: resources.clone(),
        }]);
        self.dirty[frame] = true;
        true
    }

    /// Sets bound for `frame`, one per set index in ascending order
    pub fn descriptor_sets(&mut self, frame: usize) -> &[vk::DescriptorSet] {
        if frame >= self.frames_in_flight {
            log::error!(
                "[DESCRIPTOR] Frame {} out of range (frames in flight: {})",
                frame,
                self.frames_in_flight
            );
            return &[];
        }
        if self.dirty[frame] {
            self.flattened[frame] = self
                .slots
                .values()
                .filter_map(|slot| slot.sets.get(frame).copied())
                .collect();
            self.dirty[frame] = false;
        }
        &self.flattened[frame]
    }

    fn binding_kind(&self, set: u32, binding: u32) -> Option<vk::DescriptorType> {
        let Some(slot) = self.slots.get(&set) else {
            log::error!("[DESCRIPTOR] Set {} is not declared by this shader", set);
            return None;
        };
        let kind = slot
            .bindings
            .iter()
            .find(|entry| entry.binding == binding)
            .map(|entry| entry.kind);
        if kind.is_none() {
            log::error!("[DESCRIPTOR] Binding {} is not declared in set {}", binding, set);
        }
        kind
    }
}

impl Drop for DescriptorResourcePool {
    fn drop(&mut self) {
        self.device.destroy_descriptor_pool(self.pool);
        for slot in self.slots.values() {
            for layout in &slot.layouts {
                self.device.destroy_descriptor_set_layout(*layout);
            }
        }
    }
}
