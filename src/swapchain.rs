//! The presentation surface and its swapchain.
//!
//! The Device does not own the `VkSwapchainKHR` (§4.2): negotiating a
//! surface format, image count, and present mode is a window-system concern
//! that has nothing to do with per-frame command scheduling, and recreating
//! a swapchain on resize must not disturb in-flight frame contexts. This
//! collaborator owns the surface, the swapchain, and the backbuffer images
//! wrapped into the Device's image pool with [`ImageDomain::Swapchain`].

use ash::extensions::khr;
use ash::vk;
use raw_window_handle::{HasRawDisplayHandle, HasRawWindowHandle};

use crate::device::Device;
use crate::error::Error;
use crate::handle::Handle;
use crate::image::{Image, ImageDesc, ImageDomain, ImageView, ViewAspect};
use crate::sync::Semaphore;

/// What `acquire` returns. `SwapchainOutOfDate`/`SwapchainSuboptimal` are
/// folded into `NeedsRecreate` rather than bubbled up as raw errors, since
/// the only correct response to either is the same: resize and rebuild.
pub enum AcquireOutcome {
    Acquired {
        image_index: u32,
        acquire_semaphore: Semaphore,
    },
    NeedsRecreate,
}

struct Backbuffers {
    images: Vec<Handle<Image>>,
    views: Vec<Handle<ImageView>>,
}

/// Owns the surface and swapchain; a window resize or `VK_ERROR_OUT_OF_DATE_KHR`
/// requires calling [`Swapchain::rebuild`], not replacing this value.
pub struct Swapchain {
    surface_loader: khr::Surface,
    surface: vk::SurfaceKHR,
    loader: khr::Swapchain,
    raw: vk::SwapchainKHR,
    format: vk::Format,
    extent: vk::Extent2D,
    present_family: u32,
    backbuffers: Backbuffers,
}

impl Swapchain {
    /// Creates the surface from a windowing backend's raw handles and an
    /// initial swapchain sized to `width`x`height`.
    pub fn new<W>(device: &Device, window: &W, width: u32, height: u32) -> Result<Swapchain, Error>
    where
        W: HasRawWindowHandle + HasRawDisplayHandle,
    {
        let entry = device.context().entry();
        let instance = device.context().instance();
        let physical_device = device.context().physical_device();

        let surface = unsafe {
            ash_window::create_surface(
                entry,
                instance,
                window.raw_display_handle(),
                window.raw_window_handle(),
                None,
            )
            .map_err(Error::from)?
        };
        let surface_loader = khr::Surface::new(entry, instance);

        let present_family = select_present_family(
            instance,
            physical_device,
            device.context().queue_assignment().graphics_family,
            &surface_loader,
            surface,
        )?;

        let (loader, raw, format, extent) = create_swapchain_khr(
            instance,
            device.raw(),
            physical_device,
            &surface_loader,
            surface,
            width,
            height,
            vk::SwapchainKHR::null(),
        )?;

        let backbuffers = wrap_backbuffer_images(device, &loader, raw, format, extent)?;

        Ok(Swapchain {
            surface_loader,
            surface,
            loader,
            raw,
            format,
            extent,
            present_family,
            backbuffers,
        })
    }

    pub fn format(&self) -> vk::Format {
        self.format
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn present_family(&self) -> u32 {
        self.present_family
    }

    pub fn image_count(&self) -> usize {
        self.backbuffers.images.len()
    }

    pub fn image_view(&self, image_index: u32) -> &Handle<ImageView> {
        &self.backbuffers.views[image_index as usize]
    }

    /// Acquires the next backbuffer image, creating a fresh binary semaphore
    /// for the presentation engine to signal. The caller binds the returned
    /// semaphore onto the Device via `bind_acquire_semaphore` before
    /// recording the frame's command buffers.
    pub fn acquire(&self, device: &Device) -> Result<AcquireOutcome, Error> {
        let semaphore = Semaphore::new(device.raw())?.with_foreign_queue(true);
        let result = unsafe {
            self.loader
                .acquire_next_image(self.raw, u64::MAX, semaphore.raw(), vk::Fence::null())
        };
        match result {
            Ok((image_index, suboptimal)) => {
                if suboptimal {
                    // Defer recreate one frame, as the caller still has a
                    // valid image to render into this time (§7, error kinds).
                    warn!("swapchain suboptimal at image {image_index}, deferring recreate");
                }
                Ok(AcquireOutcome::Acquired {
                    image_index,
                    acquire_semaphore: semaphore,
                })
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                unsafe { semaphore.destroy(device.raw()) };
                Ok(AcquireOutcome::NeedsRecreate)
            }
            Err(e) => Err(Error::from(e)),
        }
    }

    /// Presents `image_index`, waiting on the Device's consumed release
    /// semaphore. Returns `true` if the caller should rebuild the swapchain
    /// before the next acquire (out of date or suboptimal).
    pub fn present(
        &self,
        present_queue: vk::Queue,
        image_index: u32,
        wait_semaphore: vk::Semaphore,
    ) -> Result<bool, Error> {
        let wait = [wait_semaphore];
        let swapchains = [self.raw];
        let indices = [image_index];
        let info = vk::PresentInfoKHR::builder()
            .wait_semaphores(&wait)
            .swapchains(&swapchains)
            .image_indices(&indices);
        match unsafe { self.loader.queue_present(present_queue, &info) } {
            Ok(suboptimal) => Ok(suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(true),
            Err(e) => Err(Error::from(e)),
        }
    }

    /// Rebuilds the swapchain at a new extent, e.g. after a window resize or
    /// an `AcquireOutcome::NeedsRecreate`. The old backbuffer image views
    /// are dropped here (their `VkImageView`s are destroyed once the Device
    /// drains its free list); the swapchain images themselves are never
    /// destroyed by us, only unregistered, since the old `VkSwapchainKHR`
    /// still owns them until `vkDestroySwapchainKHR` below.
    pub fn rebuild(&mut self, device: &Device, width: u32, height: u32) -> Result<(), Error> {
        let instance = device.context().instance();
        let physical_device = device.context().physical_device();

        let (loader, raw, format, extent) = create_swapchain_khr(
            instance,
            device.raw(),
            physical_device,
            &self.surface_loader,
            self.surface,
            width,
            height,
            self.raw,
        )?;

        let backbuffers = wrap_backbuffer_images(device, &loader, raw, format, extent)?;

        let old_loader = std::mem::replace(&mut self.loader, loader);
        let old_raw = std::mem::replace(&mut self.raw, raw);
        self.format = format;
        self.extent = extent;
        self.backbuffers = backbuffers;

        unsafe { old_loader.destroy_swapchain(old_raw, None) };
        Ok(())
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        unsafe {
            self.loader.destroy_swapchain(self.raw, None);
            self.surface_loader.destroy_surface(self.surface, None);
        }
    }
}

fn select_present_family(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    graphics_family: u32,
    surface_loader: &khr::Surface,
    surface: vk::SurfaceKHR,
) -> Result<u32, Error> {
    let supports = |family: u32| unsafe {
        surface_loader
            .get_physical_device_surface_support(physical_device, family, surface)
            .unwrap_or(false)
    };
    if supports(graphics_family) {
        return Ok(graphics_family);
    }
    let families = unsafe { instance.get_physical_device_queue_family_properties(physical_device) };
    (0..families.len() as u32)
        .find(|&f| supports(f))
        .ok_or(Error::SurfaceLost)
}

#[allow(clippy::too_many_arguments)]
fn create_swapchain_khr(
    instance: &ash::Instance,
    device: &ash::Device,
    physical_device: vk::PhysicalDevice,
    surface_loader: &khr::Surface,
    surface: vk::SurfaceKHR,
    width: u32,
    height: u32,
    old_swapchain: vk::SwapchainKHR,
) -> Result<(khr::Swapchain, vk::SwapchainKHR, vk::Format, vk::Extent2D), Error> {
    let capabilities = unsafe {
        surface_loader
            .get_physical_device_surface_capabilities(physical_device, surface)
            .map_err(Error::from)?
    };
    let formats = unsafe {
        surface_loader
            .get_physical_device_surface_formats(physical_device, surface)
            .map_err(Error::from)?
    };
    let present_modes = unsafe {
        surface_loader
            .get_physical_device_surface_present_modes(physical_device, surface)
            .map_err(Error::from)?
    };

    let surface_format = formats
        .iter()
        .find(|f| {
            f.format == vk::Format::B8G8R8A8_SRGB
                && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .copied()
        .or_else(|| formats.first().copied())
        .ok_or(Error::SurfaceLost)?;

    let present_mode = present_modes
        .iter()
        .copied()
        .find(|&m| m == vk::PresentModeKHR::MAILBOX)
        .unwrap_or(vk::PresentModeKHR::FIFO);

    let extent = if capabilities.current_extent.width != u32::MAX {
        capabilities.current_extent
    } else {
        vk::Extent2D {
            width: width.clamp(
                capabilities.min_image_extent.width,
                capabilities.max_image_extent.width,
            ),
            height: height.clamp(
                capabilities.min_image_extent.height,
                capabilities.max_image_extent.height,
            ),
        }
    };

    let mut image_count = capabilities.min_image_count + 1;
    if capabilities.max_image_count > 0 && image_count > capabilities.max_image_count {
        image_count = capabilities.max_image_count;
    }

    let info = vk::SwapchainCreateInfoKHR::builder()
        .surface(surface)
        .min_image_count(image_count)
        .image_format(surface_format.format)
        .image_color_space(surface_format.color_space)
        .image_extent(extent)
        .image_array_layers(1)
        .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
        .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
        .pre_transform(capabilities.current_transform)
        .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
        .present_mode(present_mode)
        .clipped(true)
        .old_swapchain(old_swapchain);

    let loader = khr::Swapchain::new(instance, device);
    let raw = unsafe { loader.create_swapchain(&info, None).map_err(Error::from)? };

    Ok((loader, raw, surface_format.format, extent))
}

fn wrap_backbuffer_images(
    device: &Device,
    loader: &khr::Swapchain,
    swapchain: vk::SwapchainKHR,
    format: vk::Format,
    extent: vk::Extent2D,
) -> Result<Backbuffers, Error> {
    let raw_images = unsafe { loader.get_swapchain_images(swapchain).map_err(Error::from)? };

    let mut images = Vec::with_capacity(raw_images.len());
    let mut views = Vec::with_capacity(raw_images.len());
    for raw_image in raw_images {
        let desc = ImageDesc {
            extent: vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            },
            format,
            mip_levels: 1,
            array_layers: 1,
            samples: vk::SampleCountFlags::TYPE_1,
            usage: vk::ImageUsageFlags::COLOR_ATTACHMENT,
            domain: ImageDomain::Swapchain,
            flags: vk::ImageCreateFlags::empty(),
        };
        let image = device.register_swapchain_image(raw_image, desc);
        let view = device.create_image_view(&image, ViewAspect::Color, 0, 1, 0, 1)?;
        images.push(image);
        views.push(view);
    }

    Ok(Backbuffers { images, views })
}
