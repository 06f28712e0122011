//! Crate-wide error type.
//!
//! `vk::Result` is never blanket-`#[from]`'d: driver result codes are
//! triaged into the specific kind they actually mean, so callers can match
//! on `Error::DeviceLost` etc. without picking apart a raw `vk::Result`.

use crate::graph::{PassId, ResourceId};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to initialize: {0}")]
    InitializationFailed(String),

    #[error("host out of memory")]
    OutOfHostMemory,

    #[error("device out of memory")]
    OutOfDeviceMemory,

    #[error("device lost")]
    DeviceLost,

    #[error("surface lost")]
    SurfaceLost,

    #[error("swapchain out of date")]
    SwapchainOutOfDate,

    #[error("swapchain suboptimal")]
    SwapchainSuboptimal,

    #[error("no suitable GPU found")]
    NoSuitableGPU,

    #[error("required extension missing: {0}")]
    RequiredExtensionMissing(String),

    #[error("no queue available for {0:?}")]
    QueueUnavailable(crate::context::QueueKind),

    #[error("render graph invalid: {0}")]
    GraphInvalid(String),

    #[error("render graph is cyclic")]
    GraphIsCyclic,

    #[error("render graph bake failed: {reason} (pass={pass:?}, resource={resource:?})")]
    GraphBakeFailed {
        reason: String,
        pass: Option<PassId>,
        resource: Option<ResourceId>,
    },

    #[error("resource not found")]
    ResourceNotFound,

    #[error("incompatible state: {0}")]
    IncompatibleState(String),

    #[error("vulkan error: {0:?}")]
    Vulkan(ash::vk::Result),
}

impl From<ash::vk::Result> for Error {
    fn from(result: ash::vk::Result) -> Self {
        use ash::vk::Result as R;
        match result {
            R::ERROR_DEVICE_LOST => Error::DeviceLost,
            R::ERROR_OUT_OF_DEVICE_MEMORY => Error::OutOfDeviceMemory,
            R::ERROR_OUT_OF_HOST_MEMORY => Error::OutOfHostMemory,
            R::ERROR_SURFACE_LOST_KHR => Error::SurfaceLost,
            R::SUBOPTIMAL_KHR => Error::SwapchainSuboptimal,
            R::ERROR_OUT_OF_DATE_KHR => Error::SwapchainOutOfDate,
            other => Error::InitializationFailed(format!("unhandled vulkan result: {other:?}")),
        }
    }
}

impl Error {
    pub fn graph_bake_failed(reason: impl Into<String>) -> Self {
        Error::GraphBakeFailed {
            reason: reason.into(),
            pass: None,
            resource: None,
        }
    }

    pub fn graph_bake_failed_at(
        reason: impl Into<String>,
        pass: Option<PassId>,
        resource: Option<ResourceId>,
    ) -> Self {
        Error::GraphBakeFailed {
            reason: reason.into(),
            pass,
            resource,
        }
    }
}
