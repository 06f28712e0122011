//! Instance and physical-device selection, feature negotiation, and queue
//! family discovery. `Context` is the first thing an application builds;
//! everything else hangs off the `Device` it produces.

use std::ffi::{CStr, CString};

use ash::vk;

use crate::config::GfxConfig;
use crate::error::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueKind {
    Graphics,
    Compute,
    Transfer,
    Present,
    AsyncCompute,
    AsyncGraphics,
}

/// Queue family assignment resolved at device-creation time. Compute and
/// Transfer fall back to the Graphics family when the driver exposes no
/// dedicated family for them; Graphics is always present.
#[derive(Debug, Clone, Copy)]
pub struct QueueAssignment {
    pub graphics_family: u32,
    pub compute_family: u32,
    pub transfer_family: u32,
    pub present_family: u32,
    pub compute_is_dedicated: bool,
    pub transfer_is_dedicated: bool,
}

impl QueueAssignment {
    pub fn family_for(&self, kind: QueueKind) -> u32 {
        match kind {
            QueueKind::Graphics | QueueKind::AsyncGraphics => self.graphics_family,
            QueueKind::Compute | QueueKind::AsyncCompute => self.compute_family,
            QueueKind::Transfer => self.transfer_family,
            QueueKind::Present => self.present_family,
        }
    }
}

/// Grouped core + extension feature structs queried through
/// `VkPhysicalDeviceFeatures2`'s `p_next` chain. Dynamic rendering is
/// deliberately absent: the core targets the classic VkRenderPass model.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeviceInfo {
    pub features: vk::PhysicalDeviceFeatures,
    pub timeline_semaphore: bool,
    pub descriptor_indexing: bool,
    pub timestamp_period: f32,
    pub max_bound_descriptor_sets: u32,
}

pub struct Context {
    entry: ash::Entry,
    instance: ash::Instance,
    physical_device: vk::PhysicalDevice,
    device_info: DeviceInfo,
    queue_assignment: QueueAssignment,
    cfg: GfxConfig,
}

impl Context {
    /// `required_surface_extensions` comes from the windowing backend
    /// (e.g. `ash_window::enumerate_required_extensions`); this module
    /// does not itself depend on a window crate.
    pub fn new(
        required_surface_extensions: &[&CStr],
        cfg: GfxConfig,
    ) -> Result<Context, Error> {
        let entry = unsafe {
            ash::Entry::load()
                .map_err(|e| Error::InitializationFailed(format!("failed to load Vulkan: {e}")))?
        };

        let app_name = CString::new("vkforge").unwrap();
        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name)
            .application_version(vk::make_api_version(0, 0, 1, 0))
            .engine_name(&app_name)
            .api_version(vk::API_VERSION_1_3);

        let mut extension_names: Vec<CString> = required_surface_extensions
            .iter()
            .map(|s| s.to_owned())
            .collect();
        extension_names.extend(cfg.instance_extensions.iter().map(|s| {
            CString::new(s.as_str()).expect("instance extension name must not contain NUL")
        }));
        if cfg.validation {
            extension_names.push(CString::new("VK_EXT_debug_utils").unwrap());
        }
        let extension_ptrs: Vec<*const i8> = extension_names.iter().map(|s| s.as_ptr()).collect();

        let mut layer_names: Vec<CString> = Vec::new();
        if cfg.validation {
            layer_names.push(CString::new("VK_LAYER_KHRONOS_validation").unwrap());
        }
        let layer_ptrs: Vec<*const i8> = layer_names.iter().map(|s| s.as_ptr()).collect();

        let instance_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&extension_ptrs)
            .enabled_layer_names(&layer_ptrs);

        let instance = unsafe {
            entry
                .create_instance(&instance_info, None)
                .map_err(|e| Error::InitializationFailed(format!("vkCreateInstance: {e}")))?
        };

        let (physical_device, queue_assignment, device_info) =
            select_physical_device(&instance)?;

        Ok(Context {
            entry,
            instance,
            physical_device,
            device_info,
            queue_assignment,
            cfg,
        })
    }

    pub fn entry(&self) -> &ash::Entry {
        &self.entry
    }

    pub fn instance(&self) -> &ash::Instance {
        &self.instance
    }

    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    pub fn device_info(&self) -> &DeviceInfo {
        &self.device_info
    }

    pub fn queue_assignment(&self) -> QueueAssignment {
        self.queue_assignment
    }

    pub fn config(&self) -> &GfxConfig {
        &self.cfg
    }

    /// Creates the logical device and its queues, enabling the features
    /// negotiated in `device_info` plus the required extensions.
    pub fn create_logical_device(&self) -> Result<ash::Device, Error> {
        let mut required_extensions = vec![CString::new("VK_KHR_swapchain").unwrap()];
        required_extensions.extend(
            self.cfg
                .device_extensions
                .iter()
                .map(|s| CString::new(s.as_str()).unwrap()),
        );
        let extension_ptrs: Vec<*const i8> =
            required_extensions.iter().map(|s| s.as_ptr()).collect();

        let priorities = [1.0f32];
        let mut unique_families = vec![
            self.queue_assignment.graphics_family,
            self.queue_assignment.present_family,
        ];
        if self.queue_assignment.compute_is_dedicated {
            unique_families.push(self.queue_assignment.compute_family);
        }
        if self.queue_assignment.transfer_is_dedicated {
            unique_families.push(self.queue_assignment.transfer_family);
        }
        unique_families.sort_unstable();
        unique_families.dedup();

        let queue_infos: Vec<vk::DeviceQueueCreateInfo> = unique_families
            .iter()
            .map(|&family| {
                vk::DeviceQueueCreateInfo::builder()
                    .queue_family_index(family)
                    .queue_priorities(&priorities)
                    .build()
            })
            .collect();

        let mut timeline_features = vk::PhysicalDeviceTimelineSemaphoreFeatures::builder()
            .timeline_semaphore(true);

        let device_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_infos)
            .enabled_extension_names(&extension_ptrs)
            .enabled_features(&self.device_info.features)
            .push_next(&mut timeline_features);

        let device = unsafe {
            self.instance
                .create_device(self.physical_device, &device_info, None)
                .map_err(Error::from)?
        };

        Ok(device)
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        unsafe { self.instance.destroy_instance(None) };
    }
}

fn select_physical_device(
    instance: &ash::Instance,
) -> Result<(vk::PhysicalDevice, QueueAssignment, DeviceInfo), Error> {
    let physical_devices = unsafe {
        instance
            .enumerate_physical_devices()
            .map_err(Error::from)?
    };

    if physical_devices.is_empty() {
        return Err(Error::NoSuitableGPU);
    }

    // Prefer discrete GPUs; fall back to the first enumerated device.
    let physical_device = *physical_devices
        .iter()
        .max_by_key(|&&pd| {
            let props = unsafe { instance.get_physical_device_properties(pd) };
            match props.device_type {
                vk::PhysicalDeviceType::DISCRETE_GPU => 3,
                vk::PhysicalDeviceType::INTEGRATED_GPU => 2,
                vk::PhysicalDeviceType::VIRTUAL_GPU => 1,
                _ => 0,
            }
        })
        .ok_or(Error::NoSuitableGPU)?;

    let props = unsafe { instance.get_physical_device_properties(physical_device) };
    let families =
        unsafe { instance.get_physical_device_queue_family_properties(physical_device) };

    let graphics_family = families
        .iter()
        .position(|f| f.queue_flags.contains(vk::QueueFlags::GRAPHICS))
        .ok_or(Error::QueueUnavailable(QueueKind::Graphics))? as u32;

    // A dedicated compute family has COMPUTE but not GRAPHICS; prefer that,
    // otherwise alias onto the graphics family.
    let dedicated_compute = families
        .iter()
        .enumerate()
        .position(|(i, f)| {
            i as u32 != graphics_family
                && f.queue_flags.contains(vk::QueueFlags::COMPUTE)
                && !f.queue_flags.contains(vk::QueueFlags::GRAPHICS)
        })
        .map(|i| i as u32);

    let dedicated_transfer = families
        .iter()
        .enumerate()
        .position(|(i, f)| {
            i as u32 != graphics_family
                && Some(i as u32) != dedicated_compute
                && f.queue_flags.contains(vk::QueueFlags::TRANSFER)
                && !f
                    .queue_flags
                    .intersects(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE)
        })
        .map(|i| i as u32);

    let queue_assignment = QueueAssignment {
        graphics_family,
        compute_family: dedicated_compute.unwrap_or(graphics_family),
        transfer_family: dedicated_transfer.unwrap_or(graphics_family),
        // Present-family discovery requires a live VkSurfaceKHR; callers that
        // need presentation re-resolve this via `Swapchain::new`, which
        // queries `get_physical_device_surface_support` against the real
        // surface. We default to the graphics family here, which is
        // correct on every desktop driver that exposes a combined
        // graphics+present queue.
        present_family: graphics_family,
        compute_is_dedicated: dedicated_compute.is_some(),
        transfer_is_dedicated: dedicated_transfer.is_some(),
    };

    let mut features2 = vk::PhysicalDeviceFeatures2::default();
    let mut timeline_features = vk::PhysicalDeviceTimelineSemaphoreFeatures::default();
    let mut descriptor_indexing_features =
        vk::PhysicalDeviceDescriptorIndexingFeatures::default();
    features2.p_next = &mut timeline_features as *mut _ as *mut std::ffi::c_void;
    timeline_features.p_next =
        &mut descriptor_indexing_features as *mut _ as *mut std::ffi::c_void;
    unsafe { instance.get_physical_device_features2(physical_device, &mut features2) };

    let device_info = DeviceInfo {
        features: features2.features,
        timeline_semaphore: timeline_features.timeline_semaphore == vk::TRUE,
        descriptor_indexing: descriptor_indexing_features.shader_sampled_image_array_non_uniform_indexing
            == vk::TRUE,
        timestamp_period: props.limits.timestamp_period,
        max_bound_descriptor_sets: props.limits.max_bound_descriptor_sets,
    };

    info!(
        "selected physical device \"{}\" (graphics family {}, compute {}{}, transfer {}{})",
        unsafe { CStr::from_ptr(props.device_name.as_ptr()) }.to_string_lossy(),
        graphics_family,
        queue_assignment.compute_family,
        if queue_assignment.compute_is_dedicated { " (dedicated)" } else { " (aliased)" },
        queue_assignment.transfer_family,
        if queue_assignment.transfer_is_dedicated { " (dedicated)" } else { " (aliased)" },
    );

    Ok((physical_device, queue_assignment, device_info))
}
