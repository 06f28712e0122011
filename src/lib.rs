//! vkforge: the GPU resource and execution core of the engine.
//!
//! This crate owns instance/device creation, per-frame command scheduling,
//! the descriptor/pipeline caches, and the render-graph compiler. Everything
//! above it (asset import, scene/ECS, editor UI) is a collaborator that only
//! sees the interfaces exposed here.

#[macro_use]
extern crate log;

pub mod buffer;
pub mod cache;
pub mod command_buffer;
pub mod config;
pub mod context;
pub mod cookie;
pub mod descriptor;
pub mod device;
pub mod error;
pub mod graph;
pub mod handle;
pub mod image;
pub mod pipeline;
pub mod pool;
pub mod query;
pub mod renderpass;
pub mod scheduler;
pub mod swapchain;
pub mod sync;

pub use config::GfxConfig;
pub use context::Context;
pub use cookie::Cookie;
pub use device::Device;
pub use error::Error;
pub use handle::Handle;

pub type Result<T> = std::result::Result<T, Error>;
