//! Render-graph resource declarations and their post-bake dimensions.

use ash::vk;
use sid_vec::{Id, IdVec};

use super::pass::PassId;

pub struct ResourceTag;
/// Identifies a logical resource in a [`super::RenderGraphBuilder`].
pub type ResourceId = Id<ResourceTag, u32>;

bitflags::bitflags! {
    #[derive(Default)]
    pub struct QueueMask: u8 {
        const GRAPHICS       = 1 << 0;
        const COMPUTE        = 1 << 1;
        const ASYNC_COMPUTE  = 1 << 2;
        const ASYNC_GRAPHICS = 1 << 3;
    }
}

impl QueueMask {
    /// True once the mask spans more than one queue kind after Compute has
    /// been folded into Graphics by queue coalescing (step 4 of bake).
    /// AsyncCompute and AsyncGraphics are always counted as distinct from
    /// each other and from Graphics, even if the driver happens to resolve
    /// them to the same family index.
    pub fn crosses_queues(self) -> bool {
        self.bits().count_ones() > 1
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceType {
    Buffer,
    Texture,
    Proxy,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SizeClass {
    Absolute { width: u32, height: u32, depth: u32 },
    SwapchainRelative { scale_x: f32, scale_y: f32 },
    InputRelative { input: ResourceId, scale_x: f32, scale_y: f32 },
}

bitflags::bitflags! {
    #[derive(Default)]
    pub struct AttachmentFlags: u32 {
        const PERSISTENT          = 1 << 0;
        const UNORM_SRGB_ALIAS    = 1 << 1;
        const SUPPORTS_PREROTATE  = 1 << 2;
        const GENERATE_MIPS       = 1 << 3;
        const INTERNAL_TRANSIENT  = 1 << 4;
        const INTERNAL_PROXY      = 1 << 5;
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BufferInfo {
    pub size: u64,
    pub usage: vk::BufferUsageFlags,
}

/// A logical resource declared by one or more passes. `physical_index`
/// stays `None` until a successful bake.
#[derive(Debug, Clone)]
pub struct RenderResource {
    pub id: ResourceId,
    pub name: String,
    pub ty: ResourceType,
    pub size_class: SizeClass,
    pub format: vk::Format,
    pub samples: u32,
    pub mip_levels: u32,
    pub array_layers: u32,
    pub extra_usage: vk::ImageUsageFlags,
    pub buffer_info: Option<BufferInfo>,
    pub flags: AttachmentFlags,
    /// Set when `RenderGraphBuilder::read_history` references this
    /// resource: the bake allocates a second physical slot for it.
    pub is_history_target: bool,
    /// Set via `SetTransientState(true)`; the spec forbids combining this
    /// with use as a blit source (validated at bake step 1).
    pub transient_only: bool,
    pub physical_index: Option<u32>,
    pub used_queues: QueueMask,
    pub writers: Vec<PassId>,
    pub readers: Vec<PassId>,
}

impl RenderResource {
    pub fn is_buffer_like(&self) -> bool {
        self.buffer_info.is_some() || self.extra_usage.contains(vk::ImageUsageFlags::STORAGE)
    }
}

/// Concrete, resolved dimensions of one physical resource slot, produced by
/// bake step 2 (size resolution) and consumed by every later step.
#[derive(Debug, Clone)]
pub struct ResourceDimensions {
    pub format: vk::Format,
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub layers: u32,
    pub mip_levels: u32,
    pub samples: u32,
    pub buffer_info: Option<BufferInfo>,
    pub queue_mask: QueueMask,
    pub usage: vk::ImageUsageFlags,
    pub flags: AttachmentFlags,
    pub surface_transform: bool,
    pub name: String,
}

impl ResourceDimensions {
    pub fn is_buffer_like(&self) -> bool {
        self.buffer_info.is_some() || self.usage.contains(vk::ImageUsageFlags::STORAGE)
    }

    pub fn uses_semaphore(&self) -> bool {
        self.queue_mask.crosses_queues()
    }

    /// Two resources may share a physical slot only if they describe the
    /// same equivalence class (size, format, sample count, buffer-ness).
    pub fn aliasing_class_eq(&self, other: &ResourceDimensions) -> bool {
        self.is_buffer_like() == other.is_buffer_like()
            && self.format == other.format
            && self.width == other.width
            && self.height == other.height
            && self.depth == other.depth
            && self.layers == other.layers
            && self.mip_levels == other.mip_levels
            && self.samples == other.samples
            && self
                .buffer_info
                .map(|b| b.size)
                == other.buffer_info.map(|b| b.size)
    }
}

pub fn empty_resources() -> IdVec<ResourceId, RenderResource> {
    IdVec::new()
}
