//! Descriptor layouts, set allocators, and the bindless descriptor pool.

use std::collections::HashMap;

use ash::vk;
use parking_lot::Mutex;

use crate::error::Error;

pub const MAX_BINDINGS: usize = 16;
pub const MAX_SETS: usize = 8;
/// Sentinel array-size meaning "this binding is a variable-size bindless
/// array", detected instead of a concrete count.
pub const UNSIZED: u32 = u32::MAX;

/// Eleven bitmasks over up to `MAX_BINDINGS` bindings, one bit per binding
/// index per resource kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct DescriptorSetLayoutMask {
    pub sampled_image: u16,
    pub sampled_buffer: u16,
    pub storage_image: u16,
    pub storage_buffer: u16,
    pub uniform_buffer: u16,
    pub sampler: u16,
    pub separate_image: u16,
    pub input_attachment: u16,
    pub immutable_sampler: u16,
    pub float_mask: u16,
    pub array_sizes: [u32; MAX_BINDINGS],
}

impl DescriptorSetLayoutMask {
    pub fn is_bindless_binding(&self, binding: usize) -> bool {
        self.array_sizes[binding] == UNSIZED
    }

    pub fn binding_count(&self) -> u32 {
        (self.sampled_image
            | self.sampled_buffer
            | self.storage_image
            | self.storage_buffer
            | self.uniform_buffer
            | self.sampler
            | self.separate_image
            | self.input_attachment)
            .count_ones()
    }
}

#[derive(Debug, Clone, Default)]
pub struct DescriptorSetLayoutDesc {
    pub mask: DescriptorSetLayoutMask,
    pub stage_mask: vk::ShaderStageFlags,
}

/// One binding within a single live set, used as the key a set's hash is
/// derived from (the `CommandBuffer`'s dirty mask recomputes this whenever
/// a binding changes).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DescriptorBinding {
    pub binding: u32,
    pub resource_cookie: u64,
    pub offset: u64,
}

const DESCRIPTOR_SETS_PER_POOL: u32 = 64;

struct Pool {
    raw: vk::DescriptorPool,
    sets_allocated: u32,
}

/// One per unique `(layout, stage_mask)` hash. Maintains a ring of pools
/// and recycles vacant set slots hashed by the binding state that produced
/// them, keeping them alive for `ring_size` frames via `TemporaryHashMap`.
pub struct DescriptorSetAllocator {
    layout: vk::DescriptorSetLayout,
    desc: DescriptorSetLayoutDesc,
    pools: Mutex<Vec<Pool>>,
    live_sets: Mutex<TemporaryHashMap<u64, vk::DescriptorSet>>,
}

impl DescriptorSetAllocator {
    pub fn new(
        device: &ash::Device,
        desc: DescriptorSetLayoutDesc,
        ring_size: u32,
    ) -> Result<DescriptorSetAllocator, Error> {
        let layout = create_set_layout(device, &desc)?;
        Ok(DescriptorSetAllocator {
            layout,
            desc,
            pools: Mutex::new(Vec::new()),
            live_sets: Mutex::new(TemporaryHashMap::new(ring_size)),
        })
    }

    pub fn layout(&self) -> vk::DescriptorSetLayout {
        self.layout
    }

    /// Returns a cached set for `binding_hash` if one from a previous
    /// frame is still alive, otherwise allocates fresh.
    pub fn allocate(
        &self,
        device: &ash::Device,
        binding_hash: u64,
    ) -> Result<vk::DescriptorSet, Error> {
        {
            let mut live = self.live_sets.lock();
            if let Some(set) = live.touch(&binding_hash) {
                return Ok(set);
            }
        }

        let mut pools = self.pools.lock();
        let set = self.allocate_from_pools(device, &mut pools)?;
        self.live_sets.lock().insert(binding_hash, set);
        Ok(set)
    }

    fn allocate_from_pools(
        &self,
        device: &ash::Device,
        pools: &mut Vec<Pool>,
    ) -> Result<vk::DescriptorSet, Error> {
        if let Some(pool) = pools
            .iter_mut()
            .find(|p| p.sets_allocated < DESCRIPTOR_SETS_PER_POOL)
        {
            let set = allocate_one(device, pool.raw, self.layout)?;
            pool.sets_allocated += 1;
            return Ok(set);
        }

        let raw = create_pool(device, &self.desc, DESCRIPTOR_SETS_PER_POOL)?;
        let set = allocate_one(device, raw, self.layout)?;
        pools.push(Pool {
            raw,
            sets_allocated: 1,
        });
        Ok(set)
    }

    /// Advances every live-set slot's age by one frame, evicting entries
    /// older than the ring size.
    pub fn advance_frame(&self) {
        self.live_sets.lock().advance_frame();
    }

    pub unsafe fn destroy(&self, device: &ash::Device) {
        device.destroy_descriptor_set_layout(self.layout, None);
        for pool in self.pools.lock().iter() {
            device.destroy_descriptor_pool(pool.raw, None);
        }
    }
}

fn create_set_layout(
    device: &ash::Device,
    desc: &DescriptorSetLayoutDesc,
) -> Result<vk::DescriptorSetLayout, Error> {
    let mut bindings = Vec::new();
    for binding in 0..MAX_BINDINGS as u32 {
        let bit = 1u16 << binding;
        let descriptor_type = if desc.mask.uniform_buffer & bit != 0 {
            Some(vk::DescriptorType::UNIFORM_BUFFER)
        } else if desc.mask.storage_buffer & bit != 0 {
            Some(vk::DescriptorType::STORAGE_BUFFER)
        } else if desc.mask.sampled_image & bit != 0 {
            Some(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
        } else if desc.mask.storage_image & bit != 0 {
            Some(vk::DescriptorType::STORAGE_IMAGE)
        } else if desc.mask.separate_image & bit != 0 {
            Some(vk::DescriptorType::SAMPLED_IMAGE)
        } else if desc.mask.sampler & bit != 0 {
            Some(vk::DescriptorType::SAMPLER)
        } else if desc.mask.input_attachment & bit != 0 {
            Some(vk::DescriptorType::INPUT_ATTACHMENT)
        } else {
            None
        };

        let Some(descriptor_type) = descriptor_type else {
            continue;
        };

        let count = if desc.mask.is_bindless_binding(binding as usize) {
            4096
        } else {
            desc.mask.array_sizes[binding as usize].max(1)
        };

        bindings.push(
            vk::DescriptorSetLayoutBinding::builder()
                .binding(binding)
                .descriptor_type(descriptor_type)
                .descriptor_count(count)
                .stage_flags(desc.stage_mask)
                .build(),
        );
    }

    let has_bindless = (0..MAX_BINDINGS).any(|b| desc.mask.is_bindless_binding(b));
    let mut binding_flags = vec![vk::DescriptorBindingFlags::empty(); bindings.len()];
    if has_bindless {
        if let Some(last) = binding_flags.last_mut() {
            *last = vk::DescriptorBindingFlags::PARTIALLY_BOUND
                | vk::DescriptorBindingFlags::VARIABLE_DESCRIPTOR_COUNT;
        }
    }
    let mut flags_info =
        vk::DescriptorSetLayoutBindingFlagsCreateInfo::builder().binding_flags(&binding_flags);

    let mut info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(&bindings);
    if has_bindless {
        info = info
            .flags(vk::DescriptorSetLayoutCreateFlags::UPDATE_AFTER_BIND_POOL)
            .push_next(&mut flags_info);
    }

    unsafe {
        device
            .create_descriptor_set_layout(&info, None)
            .map_err(Error::from)
    }
}

fn create_pool(
    device: &ash::Device,
    desc: &DescriptorSetLayoutDesc,
    max_sets: u32,
) -> Result<vk::DescriptorPool, Error> {
    let pool_sizes = [
        vk::DescriptorPoolSize::builder()
            .ty(vk::DescriptorType::UNIFORM_BUFFER)
            .descriptor_count(max_sets * 4)
            .build(),
        vk::DescriptorPoolSize::builder()
            .ty(vk::DescriptorType::STORAGE_BUFFER)
            .descriptor_count(max_sets * 4)
            .build(),
        vk::DescriptorPoolSize::builder()
            .ty(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
            .descriptor_count(max_sets * 8)
            .build(),
        vk::DescriptorPoolSize::builder()
            .ty(vk::DescriptorType::STORAGE_IMAGE)
            .descriptor_count(max_sets * 4)
            .build(),
    ];
    let _ = desc;
    let info = vk::DescriptorPoolCreateInfo::builder()
        .max_sets(max_sets)
        .pool_sizes(&pool_sizes)
        .flags(vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET);
    unsafe { device.create_descriptor_pool(&info, None).map_err(Error::from) }
}

fn allocate_one(
    device: &ash::Device,
    pool: vk::DescriptorPool,
    layout: vk::DescriptorSetLayout,
) -> Result<vk::DescriptorSet, Error> {
    let layouts = [layout];
    let info = vk::DescriptorSetAllocateInfo::builder()
        .descriptor_pool(pool)
        .set_layouts(&layouts);
    let sets = unsafe { device.allocate_descriptor_sets(&info).map_err(Error::from)? };
    Ok(sets[0])
}

/// Keeps entries alive for the last `ring` frames, recycling vacant slots.
/// Mirrors the pattern the descriptor allocator and the framebuffer/
/// transient-attachment caches (§4.4, §4.5) all need: "alive for N frames,
/// then reclaimed."
pub struct TemporaryHashMap<K, V> {
    ring: u32,
    entries: HashMap<K, (V, u32)>,
}

impl<K: Eq + std::hash::Hash + Clone, V: Clone> TemporaryHashMap<K, V> {
    pub fn new(ring: u32) -> Self {
        TemporaryHashMap {
            ring,
            entries: HashMap::new(),
        }
    }

    /// Resets the entry's age to 0 and returns its value if present.
    pub fn touch(&mut self, key: &K) -> Option<V> {
        if let Some((value, age)) = self.entries.get_mut(key) {
            *age = 0;
            Some(value.clone())
        } else {
            None
        }
    }

    pub fn insert(&mut self, key: K, value: V) {
        self.entries.insert(key, (value, 0));
    }

    /// Ages every entry by one and evicts anything older than the ring
    /// size, returning the evicted values so the caller can queue their
    /// teardown.
    pub fn advance_frame(&mut self) -> Vec<V> {
        let ring = self.ring;
        let mut evicted = Vec::new();
        self.entries.retain(|_, (value, age)| {
            *age += 1;
            if *age > ring {
                evicted.push(value.clone());
                false
            } else {
                true
            }
        });
        evicted
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

/// A bindless descriptor set: one variable-size set with an explicit
/// allocation cursor, updated directly via `vkUpdateDescriptorSets` rather
/// than going through the ring-based allocator above.
pub struct BindlessDescriptorPool {
    pool: vk::DescriptorPool,
    layout: vk::DescriptorSetLayout,
    set: vk::DescriptorSet,
    cursor: Mutex<u32>,
    capacity: u32,
}

impl BindlessDescriptorPool {
    pub fn new(
        device: &ash::Device,
        layout: vk::DescriptorSetLayout,
        descriptor_count: u32,
    ) -> Result<BindlessDescriptorPool, Error> {
        let pool_sizes = [vk::DescriptorPoolSize::builder()
            .ty(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
            .descriptor_count(descriptor_count)
            .build()];
        let pool_info = vk::DescriptorPoolCreateInfo::builder()
            .max_sets(1)
            .pool_sizes(&pool_sizes)
            .flags(vk::DescriptorPoolCreateFlags::UPDATE_AFTER_BIND);
        let pool = unsafe { device.create_descriptor_pool(&pool_info, None).map_err(Error::from)? };

        let counts = [descriptor_count];
        let mut variable_count =
            vk::DescriptorSetVariableDescriptorCountAllocateInfo::builder()
                .descriptor_counts(&counts);
        let layouts = [layout];
        let set_info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(pool)
            .set_layouts(&layouts)
            .push_next(&mut variable_count);
        let sets = unsafe { device.allocate_descriptor_sets(&set_info).map_err(Error::from)? };

        Ok(BindlessDescriptorPool {
            pool,
            layout,
            set: sets[0],
            cursor: Mutex::new(0),
            capacity: descriptor_count,
        })
    }

    pub fn set(&self) -> vk::DescriptorSet {
        self.set
    }

    /// Reserves the next free slot in the variable-size array.
    pub fn allocate_slot(&self) -> u32 {
        let mut cursor = self.cursor.lock();
        assert!(*cursor < self.capacity, "bindless descriptor pool exhausted");
        let slot = *cursor;
        *cursor += 1;
        slot
    }

    pub fn set_texture(
        &self,
        device: &ash::Device,
        binding: u32,
        slot: u32,
        view: vk::ImageView,
        layout: vk::ImageLayout,
        sampler: vk::Sampler,
    ) {
        let image_info = [vk::DescriptorImageInfo::builder()
            .image_view(view)
            .image_layout(layout)
            .sampler(sampler)
            .build()];
        let write = vk::WriteDescriptorSet::builder()
            .dst_set(self.set)
            .dst_binding(binding)
            .dst_array_element(slot)
            .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
            .image_info(&image_info);
        unsafe { device.update_descriptor_sets(std::slice::from_ref(&write), &[]) };
    }

    pub unsafe fn destroy(&self, device: &ash::Device) {
        device.destroy_descriptor_pool(self.pool, None);
        let _ = self.layout;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn temporary_hash_map_evicts_after_ring_frames() {
        let mut map: TemporaryHashMap<u32, &'static str> = TemporaryHashMap::new(2);
        map.insert(1, "a");
        assert_eq!(map.touch(&1), Some("a"));

        map.advance_frame(); // age 1
        assert_eq!(map.touch(&1), Some("a")); // touched, age reset to 0
        map.advance_frame(); // age 1
        map.advance_frame(); // age 2, still <= ring
        let evicted = map.advance_frame(); // age 3, evicted
        assert_eq!(evicted, vec!["a"]);
        assert_eq!(map.len(), 0);
    }

    #[test]
    fn bindless_binding_detected_by_unsized_sentinel() {
        let mut mask = DescriptorSetLayoutMask::default();
        mask.array_sizes[3] = UNSIZED;
        assert!(mask.is_bindless_binding(3));
        assert!(!mask.is_bindless_binding(0));
    }
}
