//! GPU buffers.

use ash::vk;
use gpu_alloc::MemoryBlock;

use crate::cookie::Cookie;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryDomain {
    /// Device-local, not host-visible. The common case for vertex/index/
    /// storage buffers filled via a staging upload.
    Device,
    /// Host-visible, not guaranteed coherent; requires explicit flush.
    Host,
    /// Host-visible and coherent; the common case for per-frame uniform
    /// rings that are written every frame and never explicitly flushed.
    HostCoherent,
    /// Resizable BAR / SAM: device-local and host-visible in one mapping.
    LinkedDeviceHost,
}

#[derive(Debug, Clone, Copy)]
pub struct BufferDesc {
    pub size: u64,
    pub usage: vk::BufferUsageFlags,
    pub domain: MemoryDomain,
    /// Request `vkGetBufferDeviceAddress` at creation time.
    pub device_address: bool,
}

pub struct Buffer {
    raw: vk::Buffer,
    memory: MemoryBlock<vk::DeviceMemory>,
    desc: BufferDesc,
    cookie: Cookie,
    mapped_ptr: Option<std::ptr::NonNull<u8>>,
    device_address: Option<vk::DeviceAddress>,
}

// SAFETY: the raw pointer is only ever dereferenced by the thread that owns
// the Handle<Buffer>, per the crate's internal-sync contract (§5).
unsafe impl Send for Buffer {}
unsafe impl Sync for Buffer {}

impl Buffer {
    pub(crate) fn new(
        raw: vk::Buffer,
        memory: MemoryBlock<vk::DeviceMemory>,
        desc: BufferDesc,
        cookie: Cookie,
        mapped_ptr: Option<std::ptr::NonNull<u8>>,
        device_address: Option<vk::DeviceAddress>,
    ) -> Buffer {
        Buffer {
            raw,
            memory,
            desc,
            cookie,
            mapped_ptr,
            device_address,
        }
    }

    pub fn raw(&self) -> vk::Buffer {
        self.raw
    }

    pub fn desc(&self) -> BufferDesc {
        self.desc
    }

    pub fn cookie(&self) -> Cookie {
        self.cookie
    }

    pub fn size(&self) -> u64 {
        self.desc.size
    }

    /// Persistently mapped pointer, present for `Host`/`HostCoherent`/
    /// `LinkedDeviceHost` domains.
    pub fn mapped_ptr(&self) -> Option<std::ptr::NonNull<u8>> {
        self.mapped_ptr
    }

    pub fn device_address(&self) -> Option<vk::DeviceAddress> {
        self.device_address
    }

    pub fn memory_block(&self) -> &MemoryBlock<vk::DeviceMemory> {
        &self.memory
    }

    pub(crate) fn into_memory(self) -> MemoryBlock<vk::DeviceMemory> {
        self.memory
    }

    pub unsafe fn destroy_raw(&self, device: &ash::Device) {
        device.destroy_buffer(self.raw, None);
    }
}

pub(crate) fn usage_for_domain(domain: MemoryDomain) -> gpu_alloc::UsageFlags {
    match domain {
        MemoryDomain::Device => gpu_alloc::UsageFlags::FAST_DEVICE_ACCESS,
        MemoryDomain::Host => gpu_alloc::UsageFlags::HOST_ACCESS,
        MemoryDomain::HostCoherent => {
            gpu_alloc::UsageFlags::HOST_ACCESS | gpu_alloc::UsageFlags::UPLOAD
        }
        MemoryDomain::LinkedDeviceHost => {
            gpu_alloc::UsageFlags::FAST_DEVICE_ACCESS | gpu_alloc::UsageFlags::HOST_ACCESS
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_flags_match_domain_intent() {
        assert!(usage_for_domain(MemoryDomain::HostCoherent)
            .contains(gpu_alloc::UsageFlags::HOST_ACCESS));
        assert!(usage_for_domain(MemoryDomain::Device)
            .contains(gpu_alloc::UsageFlags::FAST_DEVICE_ACCESS));
    }
}
