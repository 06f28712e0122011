//! The render graph: declaration (§4.6.1), bake (§4.6), and the
//! synchronization primitives bake produces.

pub mod bake;
pub mod barrier;
pub mod execute;
pub mod pass;
pub mod resource;

pub use bake::{bake, BakedGraph, PhysicalPass};
pub use barrier::SyncOp;
pub use execute::GraphExecutor;
pub use pass::{
    AccessKind, PassId, PassTag, Queue, RenderGraphBuilder, RenderPassDecl, RenderPassInterface,
    ResourceEdge, ResourceHandle,
};
pub use resource::{
    AttachmentFlags, BufferInfo, QueueMask, RenderResource, ResourceDimensions, ResourceId,
    ResourceTag, ResourceType, SizeClass,
};

#[cfg(test)]
mod tests;
