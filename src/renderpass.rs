//! RenderPass/Framebuffer caching and the transient-attachment allocator.

use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use ash::vk;
use fxhash::FxHasher64;

use crate::cookie::Cookie;
use crate::descriptor::TemporaryHashMap;
use crate::error::Error;
use crate::image::{Image, ImageDesc};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AttachmentDesc {
    pub format: vk::Format,
    pub samples: vk::SampleCountFlags,
    pub load_op: vk::AttachmentLoadOp,
    pub store_op: vk::AttachmentStoreOp,
    pub initial_layout: vk::ImageLayout,
    pub final_layout: vk::ImageLayout,
}

#[derive(Debug, Clone)]
pub struct SubpassDesc {
    pub color_attachments: Vec<u32>,
    pub depth_stencil_attachment: Option<u32>,
    pub input_attachments: Vec<u32>,
}

#[derive(Debug, Clone)]
pub struct RenderPassDesc {
    pub attachments: Vec<AttachmentDesc>,
    pub subpasses: Vec<SubpassDesc>,
    pub dependencies: Vec<vk::SubpassDependency>,
}

impl RenderPassDesc {
    /// Two render passes are compatible (share a VkRenderPass) iff their
    /// attachment formats, sample counts, and subpass dependency shape
    /// match — exactly what this hashes.
    pub fn compatibility_hash(&self) -> u64 {
        let mut hasher = FxHasher64::default();
        for a in &self.attachments {
            a.format.hash(&mut hasher);
            a.samples.hash(&mut hasher);
        }
        for s in &self.subpasses {
            s.color_attachments.hash(&mut hasher);
            s.depth_stencil_attachment.hash(&mut hasher);
            s.input_attachments.hash(&mut hasher);
        }
        self.subpasses.len().hash(&mut hasher);
        self.dependencies.len().hash(&mut hasher);
        hasher.finish()
    }

    pub fn has_depth_stencil(&self) -> bool {
        self.subpasses
            .iter()
            .any(|s| s.depth_stencil_attachment.is_some())
    }
}

pub struct RenderPass {
    raw: vk::RenderPass,
    desc: RenderPassDesc,
    compat_hash: u64,
}

impl RenderPass {
    pub fn new(device: &ash::Device, desc: RenderPassDesc) -> Result<RenderPass, Error> {
        let attachments: Vec<vk::AttachmentDescription> = desc
            .attachments
            .iter()
            .map(|a| {
                vk::AttachmentDescription::builder()
                    .format(a.format)
                    .samples(a.samples)
                    .load_op(a.load_op)
                    .store_op(a.store_op)
                    .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
                    .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                    .initial_layout(a.initial_layout)
                    .final_layout(a.final_layout)
                    .build()
            })
            .collect();

        // Subpass attachment-reference arrays must outlive the
        // `SubpassDescription` builders that reference them.
        let mut color_refs_storage = Vec::with_capacity(desc.subpasses.len());
        let mut input_refs_storage = Vec::with_capacity(desc.subpasses.len());
        let mut depth_refs_storage: Vec<Option<vk::AttachmentReference>> =
            Vec::with_capacity(desc.subpasses.len());

        for subpass in &desc.subpasses {
            color_refs_storage.push(
                subpass
                    .color_attachments
                    .iter()
                    .map(|&i| {
                        vk::AttachmentReference::builder()
                            .attachment(i)
                            .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
                            .build()
                    })
                    .collect::<Vec<_>>(),
            );
            input_refs_storage.push(
                subpass
                    .input_attachments
                    .iter()
                    .map(|&i| {
                        vk::AttachmentReference::builder()
                            .attachment(i)
                            .layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
                            .build()
                    })
                    .collect::<Vec<_>>(),
            );
            depth_refs_storage.push(subpass.depth_stencil_attachment.map(|i| {
                vk::AttachmentReference::builder()
                    .attachment(i)
                    .layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
                    .build()
            }));
        }

        let subpasses: Vec<vk::SubpassDescription> = (0..desc.subpasses.len())
            .map(|i| {
                let mut builder = vk::SubpassDescription::builder()
                    .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
                    .color_attachments(&color_refs_storage[i])
                    .input_attachments(&input_refs_storage[i]);
                if let Some(depth_ref) = &depth_refs_storage[i] {
                    builder = builder.depth_stencil_attachment(depth_ref);
                }
                builder.build()
            })
            .collect();

        let info = vk::RenderPassCreateInfo::builder()
            .attachments(&attachments)
            .subpasses(&subpasses)
            .dependencies(&desc.dependencies);

        let raw = unsafe { device.create_render_pass(&info, None).map_err(Error::from)? };
        let compat_hash = desc.compatibility_hash();

        Ok(RenderPass {
            raw,
            desc,
            compat_hash,
        })
    }

    pub fn raw(&self) -> vk::RenderPass {
        self.raw
    }

    pub fn desc(&self) -> &RenderPassDesc {
        &self.desc
    }

    pub fn compat_hash(&self) -> u64 {
        self.compat_hash
    }

    pub unsafe fn destroy(&self, device: &ash::Device) {
        device.destroy_render_pass(self.raw, None);
    }
}

/// Hash key for a `RenderPass` lookup: the render pass description's
/// compatibility hash. `RenderPassCache` is a thin `HashMap` (not the
/// two-list cache, since render passes are created far less often than
/// pipelines are looked up) guarded by the Device lock.
#[derive(Default)]
pub struct RenderPassCache {
    entries: HashMap<u64, std::sync::Arc<RenderPass>>,
}

impl RenderPassCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_create(
        &mut self,
        device: &ash::Device,
        desc: RenderPassDesc,
    ) -> Result<std::sync::Arc<RenderPass>, Error> {
        let hash = desc.compatibility_hash();
        if let Some(existing) = self.entries.get(&hash) {
            return Ok(existing.clone());
        }
        let pass = std::sync::Arc::new(RenderPass::new(device, desc)?);
        self.entries.insert(hash, pass.clone());
        Ok(pass)
    }

    pub unsafe fn destroy_all(&self, device: &ash::Device) {
        for pass in self.entries.values() {
            pass.destroy(device);
        }
    }
}

pub const FRAMEBUFFER_RING_SIZE: u32 = 8;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FramebufferKey {
    pub render_pass_compat_hash: u64,
    pub view_cookies: Vec<Cookie>,
    pub width: u32,
    pub height: u32,
    pub layers: u32,
}

pub struct Framebuffer {
    raw: vk::Framebuffer,
}

impl Framebuffer {
    pub unsafe fn destroy(&self, device: &ash::Device) {
        device.destroy_framebuffer(self.raw, None);
    }

    pub fn raw(&self) -> vk::Framebuffer {
        self.raw
    }
}

/// Pairs a compatible `RenderPass` with a concrete set of image views and
/// extents, cached over an 8-frame ring (§4.5).
pub struct FramebufferCache {
    live: TemporaryHashMap<FramebufferKey, std::sync::Arc<Framebuffer>>,
}

impl Default for FramebufferCache {
    fn default() -> Self {
        Self::new()
    }
}

impl FramebufferCache {
    pub fn new() -> Self {
        FramebufferCache {
            live: TemporaryHashMap::new(FRAMEBUFFER_RING_SIZE),
        }
    }

    pub fn get_or_create(
        &mut self,
        device: &ash::Device,
        render_pass: vk::RenderPass,
        key: FramebufferKey,
        views: &[vk::ImageView],
    ) -> Result<std::sync::Arc<Framebuffer>, Error> {
        if let Some(fb) = self.live.touch(&key) {
            return Ok(fb);
        }

        let info = vk::FramebufferCreateInfo::builder()
            .render_pass(render_pass)
            .attachments(views)
            .width(key.width)
            .height(key.height)
            .layers(key.layers);
        let raw = unsafe { device.create_framebuffer(&info, None).map_err(Error::from)? };
        let fb = std::sync::Arc::new(Framebuffer { raw });
        self.live.insert(key, fb.clone());
        Ok(fb)
    }

    /// Ages every entry, returning framebuffers that fell out of the ring
    /// so the caller can queue their destruction.
    pub fn advance_frame(&mut self) -> Vec<std::sync::Arc<Framebuffer>> {
        self.live.advance_frame()
    }
}

/// Vends short-lived image handles keyed by (extent, format, samples,
/// layers, user-index) in an 8-frame ring, for render-graph-owned
/// attachments the physical-pass coalesce never promoted to persistent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransientKey {
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub format: vk::Format,
    pub samples: vk::SampleCountFlags,
    pub layers: u32,
    pub user_index: u32,
}

pub struct TransientAttachmentAllocator {
    live: TemporaryHashMap<TransientKey, Cookie>,
}

impl Default for TransientAttachmentAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl TransientAttachmentAllocator {
    pub fn new() -> Self {
        TransientAttachmentAllocator {
            live: TemporaryHashMap::new(FRAMEBUFFER_RING_SIZE),
        }
    }

    /// Returns the cookie of a reusable transient image for `key`, or
    /// `None` if the caller must allocate a fresh one (which it then
    /// registers via `register`).
    pub fn acquire(&mut self, key: TransientKey) -> Option<Cookie> {
        self.live.touch(&key)
    }

    pub fn register(&mut self, key: TransientKey, cookie: Cookie) {
        self.live.insert(key, cookie);
    }

    pub fn advance_frame(&mut self) -> Vec<Cookie> {
        self.live.advance_frame()
    }

    pub fn key_for(desc: &ImageDesc, user_index: u32) -> TransientKey {
        TransientKey {
            width: desc.extent.width,
            height: desc.extent.height,
            depth: desc.extent.depth,
            format: desc.format,
            samples: desc.samples,
            layers: desc.array_layers,
            user_index,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attachment() -> AttachmentDesc {
        AttachmentDesc {
            format: vk::Format::R8G8B8A8_SRGB,
            samples: vk::SampleCountFlags::TYPE_1,
            load_op: vk::AttachmentLoadOp::CLEAR,
            store_op: vk::AttachmentStoreOp::STORE,
            initial_layout: vk::ImageLayout::UNDEFINED,
            final_layout: vk::ImageLayout::PRESENT_SRC_KHR,
        }
    }

    #[test]
    fn compatible_passes_hash_equal() {
        let a = RenderPassDesc {
            attachments: vec![attachment()],
            subpasses: vec![SubpassDesc {
                color_attachments: vec![0],
                depth_stencil_attachment: None,
                input_attachments: vec![],
            }],
            dependencies: vec![],
        };
        let b = a.clone();
        assert_eq!(a.compatibility_hash(), b.compatibility_hash());
    }

    #[test]
    fn differing_formats_hash_differently() {
        let mut a = attachment();
        let desc_a = RenderPassDesc {
            attachments: vec![a],
            subpasses: vec![SubpassDesc {
                color_attachments: vec![0],
                depth_stencil_attachment: None,
                input_attachments: vec![],
            }],
            dependencies: vec![],
        };
        a.format = vk::Format::R16G16B16A16_SFLOAT;
        let desc_b = RenderPassDesc {
            attachments: vec![a],
            ..desc_a.clone()
        };
        assert_ne!(desc_a.compatibility_hash(), desc_b.compatibility_hash());
    }

    #[test]
    fn transient_allocator_recycles_matching_keys() {
        let mut alloc = TransientAttachmentAllocator::new();
        let key = TransientKey {
            width: 1920,
            height: 1080,
            depth: 1,
            format: vk::Format::R16_SFLOAT,
            samples: vk::SampleCountFlags::TYPE_1,
            layers: 1,
            user_index: 0,
        };
        assert!(alloc.acquire(key).is_none());
        let allocator = crate::cookie::CookieAllocator::new();
        let cookie = allocator.next();
        alloc.register(key, cookie);
        assert_eq!(alloc.acquire(key), Some(cookie));
    }
}
