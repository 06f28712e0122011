//! Images, image views, and samplers.

use ash::vk;
use gpu_alloc::MemoryBlock;

use crate::cookie::Cookie;
use crate::error::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageDomain {
    /// A regular, persistent image allocated for the lifetime of the handle.
    Physical,
    /// Owned by the render graph's transient-attachment allocator; never
    /// escapes a single physical pass.
    Transient,
    /// One of the swapchain's backbuffer images; not destroyed by the pool,
    /// only unregistered when the swapchain is recreated.
    Swapchain,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayoutTracking {
    /// One layout for the whole image.
    Single(vk::ImageLayout),
    /// Tracked per subresource (array layer x mip level); used for images
    /// whose layers transition independently (e.g. cubemap faces rendered
    /// one at a time).
    PerSubresource,
}

#[derive(Debug, Clone, Copy)]
pub struct ImageDesc {
    pub extent: vk::Extent3D,
    pub format: vk::Format,
    pub mip_levels: u32,
    pub array_layers: u32,
    pub samples: vk::SampleCountFlags,
    pub usage: vk::ImageUsageFlags,
    pub domain: ImageDomain,
    pub flags: vk::ImageCreateFlags,
}

impl ImageDesc {
    pub fn is_buffer_like(&self) -> bool {
        // Storage images participate in the graph's buffer-like aliasing
        // class: they never share a slot with a regular attachment.
        self.usage.contains(vk::ImageUsageFlags::STORAGE)
    }
}

pub struct Image {
    raw: vk::Image,
    memory: Option<MemoryBlock<vk::DeviceMemory>>,
    desc: ImageDesc,
    cookie: Cookie,
    layout: LayoutTracking,
    per_subresource_layouts: Vec<vk::ImageLayout>,
}

impl Image {
    pub(crate) fn new(
        raw: vk::Image,
        memory: Option<MemoryBlock<vk::DeviceMemory>>,
        desc: ImageDesc,
        cookie: Cookie,
    ) -> Image {
        let subresource_count = (desc.mip_levels * desc.array_layers) as usize;
        Image {
            raw,
            memory,
            desc,
            cookie,
            layout: LayoutTracking::Single(vk::ImageLayout::UNDEFINED),
            per_subresource_layouts: vec![vk::ImageLayout::UNDEFINED; subresource_count],
        }
    }

    pub fn raw(&self) -> vk::Image {
        self.raw
    }

    pub fn desc(&self) -> ImageDesc {
        self.desc
    }

    pub fn cookie(&self) -> Cookie {
        self.cookie
    }

    pub fn current_layout(&self) -> vk::ImageLayout {
        match self.layout {
            LayoutTracking::Single(l) => l,
            LayoutTracking::PerSubresource => self.per_subresource_layouts[0],
        }
    }

    pub fn set_layout(&mut self, layout: vk::ImageLayout) {
        self.layout = LayoutTracking::Single(layout);
        for l in &mut self.per_subresource_layouts {
            *l = layout;
        }
    }

    pub fn set_subresource_layout(&mut self, mip: u32, layer: u32, layout: vk::ImageLayout) {
        self.layout = LayoutTracking::PerSubresource;
        let index = (layer * self.desc.mip_levels + mip) as usize;
        self.per_subresource_layouts[index] = layout;
    }

    pub unsafe fn destroy_raw(&self, device: &ash::Device) {
        if self.desc.domain != ImageDomain::Swapchain {
            device.destroy_image(self.raw, None);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ViewAspect {
    Color,
    Depth,
    Stencil,
    DepthStencil,
}

pub struct ImageView {
    raw: vk::ImageView,
    format: vk::Format,
    view_type: vk::ImageViewType,
    aspect: ViewAspect,
    base_mip: u32,
    mip_count: u32,
    base_layer: u32,
    layer_count: u32,
    cookie: Cookie,
}

impl ImageView {
    pub(crate) fn new(
        raw: vk::ImageView,
        format: vk::Format,
        view_type: vk::ImageViewType,
        aspect: ViewAspect,
        base_mip: u32,
        mip_count: u32,
        base_layer: u32,
        layer_count: u32,
        cookie: Cookie,
    ) -> ImageView {
        ImageView {
            raw,
            format,
            view_type,
            aspect,
            base_mip,
            mip_count,
            base_layer,
            layer_count,
            cookie,
        }
    }

    pub fn raw(&self) -> vk::ImageView {
        self.raw
    }

    pub fn format(&self) -> vk::Format {
        self.format
    }

    pub fn view_type(&self) -> vk::ImageViewType {
        self.view_type
    }

    pub fn aspect(&self) -> ViewAspect {
        self.aspect
    }

    pub fn subresource_range(&self) -> vk::ImageSubresourceRange {
        let aspect_mask = match self.aspect {
            ViewAspect::Color => vk::ImageAspectFlags::COLOR,
            ViewAspect::Depth => vk::ImageAspectFlags::DEPTH,
            ViewAspect::Stencil => vk::ImageAspectFlags::STENCIL,
            ViewAspect::DepthStencil => {
                vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
            }
        };
        vk::ImageSubresourceRange::builder()
            .aspect_mask(aspect_mask)
            .base_mip_level(self.base_mip)
            .level_count(self.mip_count)
            .base_array_layer(self.base_layer)
            .layer_count(self.layer_count)
            .build()
    }

    pub fn cookie(&self) -> Cookie {
        self.cookie
    }

    pub unsafe fn destroy_raw(&self, device: &ash::Device) {
        device.destroy_image_view(self.raw, None);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SamplerDesc {
    pub mag_filter: vk::Filter,
    pub min_filter: vk::Filter,
    pub mipmap_mode: vk::SamplerMipmapMode,
    pub address_mode: [vk::SamplerAddressMode; 3],
    pub anisotropy: Option<ordered_float::OrderedFloat<f32>>,
    pub compare: Option<vk::CompareOp>,
}

pub struct Sampler {
    raw: vk::Sampler,
    desc: SamplerDesc,
    cookie: Cookie,
}

impl Sampler {
    pub fn new(device: &ash::Device, desc: SamplerDesc, cookie: Cookie) -> Result<Sampler, Error> {
        let mut info = vk::SamplerCreateInfo::builder()
            .mag_filter(desc.mag_filter)
            .min_filter(desc.min_filter)
            .mipmap_mode(desc.mipmap_mode)
            .address_mode_u(desc.address_mode[0])
            .address_mode_v(desc.address_mode[1])
            .address_mode_w(desc.address_mode[2]);
        if let Some(aniso) = desc.anisotropy {
            info = info.anisotropy_enable(true).max_anisotropy(aniso.into_inner());
        }
        if let Some(compare) = desc.compare {
            info = info.compare_enable(true).compare_op(compare);
        }
        let raw = unsafe { device.create_sampler(&info, None).map_err(Error::from)? };
        Ok(Sampler { raw, desc, cookie })
    }

    pub fn raw(&self) -> vk::Sampler {
        self.raw
    }

    pub fn desc(&self) -> SamplerDesc {
        self.desc
    }

    pub fn cookie(&self) -> Cookie {
        self.cookie
    }

    pub unsafe fn destroy(&self, device: &ash::Device) {
        device.destroy_sampler(self.raw, None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn desc(usage: vk::ImageUsageFlags) -> ImageDesc {
        ImageDesc {
            extent: vk::Extent3D { width: 1, height: 1, depth: 1 },
            format: vk::Format::R8G8B8A8_UNORM,
            mip_levels: 1,
            array_layers: 1,
            samples: vk::SampleCountFlags::TYPE_1,
            usage,
            domain: ImageDomain::Physical,
            flags: vk::ImageCreateFlags::empty(),
        }
    }

    #[test]
    fn storage_images_are_buffer_like() {
        assert!(desc(vk::ImageUsageFlags::STORAGE).is_buffer_like());
        assert!(!desc(vk::ImageUsageFlags::COLOR_ATTACHMENT).is_buffer_like());
    }
}
