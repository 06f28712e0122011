//! Render-graph pass declarations and the builder API used to construct a
//! graph (§4.6.1): `RenderGraphBuilder::add_pass` is the only mutation
//! entry point.

use ash::vk;
use sid_vec::{FromIndex, Id, IdVec};

use super::resource::{
    AttachmentFlags, BufferInfo, QueueMask, RenderResource, ResourceId, ResourceType, SizeClass,
};
use crate::command_buffer::CommandBuffer;
use crate::device::Device;
use crate::error::Error;
use crate::scheduler::TaskComposer;

pub struct PassTag;
pub type PassId = Id<PassTag, u32>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Queue {
    Graphics,
    Compute,
    AsyncCompute,
    AsyncGraphics,
}

impl Queue {
    pub fn mask(self) -> QueueMask {
        match self {
            Queue::Graphics => QueueMask::GRAPHICS,
            Queue::Compute => QueueMask::COMPUTE,
            Queue::AsyncCompute => QueueMask::ASYNC_COMPUTE,
            Queue::AsyncGraphics => QueueMask::ASYNC_GRAPHICS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessKind {
    ColorOutput,
    DepthStencil,
    Resolve,
    Input,
    BlitSource,
    BlitDest,
    StorageTexture,
    History,
    Attachment,
    Uniform,
    StorageBuffer,
    Vertex,
    Index,
    Indirect,
    TransferBuffer,
    Proxy,
    ExternalLock,
}

impl AccessKind {
    /// `(access mask, pipeline stage, image layout)` for this role, used by
    /// barrier synthesis (bake step 7). Buffer-only roles return
    /// `UNDEFINED` for layout since it's meaningless for them.
    pub fn access_stage_layout(self) -> (vk::AccessFlags, vk::PipelineStageFlags, vk::ImageLayout) {
        use vk::AccessFlags as A;
        use vk::ImageLayout as L;
        use vk::PipelineStageFlags as S;
        match self {
            AccessKind::ColorOutput => (
                A::COLOR_ATTACHMENT_WRITE,
                S::COLOR_ATTACHMENT_OUTPUT,
                L::COLOR_ATTACHMENT_OPTIMAL,
            ),
            AccessKind::DepthStencil => (
                A::DEPTH_STENCIL_ATTACHMENT_WRITE,
                S::EARLY_FRAGMENT_TESTS | S::LATE_FRAGMENT_TESTS,
                L::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            ),
            AccessKind::Resolve => (
                A::COLOR_ATTACHMENT_WRITE,
                S::COLOR_ATTACHMENT_OUTPUT,
                L::COLOR_ATTACHMENT_OPTIMAL,
            ),
            AccessKind::Input | AccessKind::Attachment => (
                A::SHADER_READ,
                S::FRAGMENT_SHADER,
                L::SHADER_READ_ONLY_OPTIMAL,
            ),
            AccessKind::BlitSource => (A::TRANSFER_READ, S::TRANSFER, L::TRANSFER_SRC_OPTIMAL),
            AccessKind::BlitDest => (A::TRANSFER_WRITE, S::TRANSFER, L::TRANSFER_DST_OPTIMAL),
            AccessKind::StorageTexture => (
                A::SHADER_READ | A::SHADER_WRITE,
                S::COMPUTE_SHADER,
                L::GENERAL,
            ),
            AccessKind::History => (A::SHADER_READ, S::FRAGMENT_SHADER, L::SHADER_READ_ONLY_OPTIMAL),
            AccessKind::Uniform => (A::UNIFORM_READ, S::VERTEX_SHADER | S::FRAGMENT_SHADER, L::UNDEFINED),
            AccessKind::StorageBuffer => (
                A::SHADER_READ | A::SHADER_WRITE,
                S::COMPUTE_SHADER,
                L::UNDEFINED,
            ),
            AccessKind::Vertex => (A::VERTEX_ATTRIBUTE_READ, S::VERTEX_INPUT, L::UNDEFINED),
            AccessKind::Index => (A::INDEX_READ, S::VERTEX_INPUT, L::UNDEFINED),
            AccessKind::Indirect => (A::INDIRECT_COMMAND_READ, S::DRAW_INDIRECT, L::UNDEFINED),
            AccessKind::TransferBuffer => (A::TRANSFER_READ | A::TRANSFER_WRITE, S::TRANSFER, L::UNDEFINED),
            AccessKind::Proxy | AccessKind::ExternalLock => (A::empty(), S::TOP_OF_PIPE, L::UNDEFINED),
        }
    }

    pub fn is_write(self) -> bool {
        matches!(
            self,
            AccessKind::ColorOutput
                | AccessKind::DepthStencil
                | AccessKind::Resolve
                | AccessKind::BlitDest
                | AccessKind::StorageTexture
                | AccessKind::StorageBuffer
                | AccessKind::TransferBuffer
        )
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ResourceEdge {
    pub resource: ResourceId,
    pub access: AccessKind,
}

/// Optional lifecycle callbacks a pass may supply. All but `build_commands`
/// have default bodies, matching §9's capability-set redesign of the
/// teacher's manual virtual interfaces.
pub trait RenderPassInterface: Send + Sync {
    fn need_pass(&self) -> bool {
        true
    }

    /// One-time GPU-resource setup (pipelines, samplers, uniform layouts)
    /// against a live `Device`, run once per pass before its first frame
    /// of command recording.
    fn setup(&self, _device: &Device) {}

    /// Lets the pass inspect the fully-declared graph once every pass has
    /// registered its edges, before bake runs. Read-only: dependency
    /// edges themselves are declared through `PassBuilder`, not here.
    fn setup_dependencies(&self, _graph: &RenderGraphBuilder) {}

    /// Enqueues CPU-side work (scene culling, uniform updates) onto the
    /// composer's current pipeline stage, ahead of command recording for
    /// this frame (§4.6, execute step 1).
    fn prepare(&self, _composer: &TaskComposer) {}

    fn clear_values(&self) -> Vec<vk::ClearValue> {
        Vec::new()
    }

    fn build_commands(&self, cmd: &mut CommandBuffer);

    fn build_commands_for_layer(&self, cmd: &mut CommandBuffer, _layer: u32) {
        self.build_commands(cmd);
    }

    fn separate_layered(&self) -> bool {
        false
    }
}

pub struct RenderPassDecl {
    pub id: PassId,
    pub name: String,
    pub queue: Queue,
    pub inputs: Vec<ResourceEdge>,
    pub outputs: Vec<ResourceEdge>,
    pub interface: Option<std::sync::Arc<dyn RenderPassInterface>>,
}

impl RenderPassDecl {
    pub fn need_pass(&self) -> bool {
        self.interface.as_ref().map_or(true, |i| i.need_pass())
    }
}

/// A fresh handle to a resource, carrying the pass id that produced it —
/// returned by `PassBuilder::write` so callers can chain `.read(...)` calls
/// without re-looking the resource up by name.
#[derive(Debug, Clone, Copy)]
pub struct ResourceHandle {
    pub id: ResourceId,
    pub writer: PassId,
}

pub struct RenderGraphBuilder {
    pub(crate) resources: IdVec<ResourceId, RenderResource>,
    pub(crate) passes: IdVec<PassId, RenderPassDecl>,
    pub(crate) resource_names: std::collections::HashMap<String, ResourceId>,
    pub(crate) backbuffer_source: Option<ResourceId>,
    pub(crate) backbuffer_dimensions: (u32, u32),
}

impl Default for RenderGraphBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RenderGraphBuilder {
    pub fn new() -> Self {
        RenderGraphBuilder {
            resources: IdVec::new(),
            passes: IdVec::new(),
            resource_names: std::collections::HashMap::new(),
            backbuffer_source: None,
            backbuffer_dimensions: (0, 0),
        }
    }

    pub fn set_backbuffer_dimensions(&mut self, width: u32, height: u32) {
        self.backbuffer_dimensions = (width, height);
    }

    pub fn resource(&self, id: ResourceId) -> &RenderResource {
        &self.resources[id]
    }

    pub fn resource_by_name(&self, name: &str) -> Option<ResourceId> {
        self.resource_names.get(name).copied()
    }

    fn get_or_declare_texture(&mut self, name: &str, size_class: SizeClass, format: vk::Format) -> ResourceId {
        if let Some(&id) = self.resource_names.get(name) {
            return id;
        }
        let id = self.resources.push(RenderResource {
            id: Id::from_index(self.resources.len()),
            name: name.to_string(),
            ty: ResourceType::Texture,
            size_class,
            format,
            samples: 1,
            mip_levels: 1,
            array_layers: 1,
            extra_usage: vk::ImageUsageFlags::empty(),
            buffer_info: None,
            flags: AttachmentFlags::empty(),
            is_history_target: false,
            transient_only: false,
            physical_index: None,
            used_queues: QueueMask::empty(),
            writers: Vec::new(),
            readers: Vec::new(),
        });
        self.resource_names.insert(name.to_string(), id);
        id
    }

    fn get_or_declare_buffer(&mut self, name: &str, size: u64, usage: vk::BufferUsageFlags) -> ResourceId {
        if let Some(&id) = self.resource_names.get(name) {
            return id;
        }
        let id = self.resources.push(RenderResource {
            id: Id::from_index(self.resources.len()),
            name: name.to_string(),
            ty: ResourceType::Buffer,
            size_class: SizeClass::Absolute { width: 0, height: 0, depth: 0 },
            format: vk::Format::UNDEFINED,
            samples: 1,
            mip_levels: 1,
            array_layers: 1,
            extra_usage: vk::ImageUsageFlags::empty(),
            buffer_info: Some(BufferInfo { size, usage }),
            flags: AttachmentFlags::empty(),
            is_history_target: false,
            transient_only: false,
            physical_index: None,
            used_queues: QueueMask::empty(),
            writers: Vec::new(),
            readers: Vec::new(),
        });
        self.resource_names.insert(name.to_string(), id);
        id
    }

    pub fn set_backbuffer_source(&mut self, name: &str) {
        let id = self.get_or_declare_texture(name, SizeClass::SwapchainRelative { scale_x: 1.0, scale_y: 1.0 }, vk::Format::R8G8B8A8_SRGB);
        self.backbuffer_source = Some(id);
    }

    pub fn backbuffer_source(&self) -> Option<ResourceId> {
        self.backbuffer_source
    }

    pub fn backbuffer_dimensions(&self) -> (u32, u32) {
        self.backbuffer_dimensions
    }

    pub fn add_pass(&mut self, name: &str, queue: Queue) -> PassBuilder<'_> {
        let id: PassId = Id::from_index(self.passes.len());
        self.passes.push(RenderPassDecl {
            id,
            name: name.to_string(),
            queue,
            inputs: Vec::new(),
            outputs: Vec::new(),
            interface: None,
        });
        PassBuilder { graph: self, pass: id }
    }

    pub fn passes(&self) -> &IdVec<PassId, RenderPassDecl> {
        &self.passes
    }

    pub fn resources(&self) -> &IdVec<ResourceId, RenderResource> {
        &self.resources
    }
}

pub struct PassBuilder<'a> {
    graph: &'a mut RenderGraphBuilder,
    pass: PassId,
}

impl<'a> PassBuilder<'a> {
    pub fn id(&self) -> PassId {
        self.pass
    }

    fn record_read(&mut self, id: ResourceId, access: AccessKind) -> Result<(), Error> {
        if access == AccessKind::BlitSource && self.graph.resources[id].transient_only {
            return Err(Error::GraphInvalid(format!(
                "resource \"{}\" is marked transient-only and cannot be used as a blit source",
                self.graph.resources[id].name
            )));
        }
        self.graph.resources[id].readers.push(self.pass);
        self.graph.resources[id].used_queues |= self.graph.passes[self.pass].queue.mask();
        self.graph.passes[self.pass].inputs.push(ResourceEdge { resource: id, access });
        Ok(())
    }

    pub fn read_texture(mut self, name: &str, access: AccessKind) -> Result<Self, Error> {
        let id = self.graph.get_or_declare_texture(
            name,
            SizeClass::SwapchainRelative { scale_x: 1.0, scale_y: 1.0 },
            vk::Format::R8G8B8A8_UNORM,
        );
        self.record_read(id, access)?;
        Ok(self)
    }

    /// Reads the *previous frame's* write of `name`; the bake allocates a
    /// second physical slot for it (invariant 3).
    pub fn read_history(mut self, name: &str) -> Result<Self, Error> {
        let id = self
            .graph
            .resource_by_name(name)
            .ok_or_else(|| Error::GraphInvalid(format!("history read of unknown resource \"{name}\"")))?;
        self.graph.resources[id].is_history_target = true;
        self.record_read(id, AccessKind::History)?;
        Ok(self)
    }

    pub fn write_texture(
        mut self,
        name: &str,
        size_class: SizeClass,
        format: vk::Format,
        access: AccessKind,
    ) -> Result<(ResourceHandle, Self), Error> {
        let id = self.graph.get_or_declare_texture(name, size_class, format);
        self.graph.resources[id].writers.push(self.pass);
        self.graph.resources[id].used_queues |= self.graph.passes[self.pass].queue.mask();
        self.graph.passes[self.pass].outputs.push(ResourceEdge { resource: id, access });
        Ok((ResourceHandle { id, writer: self.pass }, self))
    }

    pub fn write_buffer(
        mut self,
        name: &str,
        size: u64,
        usage: vk::BufferUsageFlags,
        access: AccessKind,
    ) -> Result<(ResourceHandle, Self), Error> {
        let id = self.graph.get_or_declare_buffer(name, size, usage);
        self.graph.resources[id].writers.push(self.pass);
        self.graph.resources[id].used_queues |= self.graph.passes[self.pass].queue.mask();
        self.graph.passes[self.pass].outputs.push(ResourceEdge { resource: id, access });
        Ok((ResourceHandle { id, writer: self.pass }, self))
    }

    pub fn mark_transient_only(self, name: &str) -> Self {
        if let Some(id) = self.graph.resource_by_name(name) {
            self.graph.resources[id].transient_only = true;
            self.graph.resources[id].flags |= AttachmentFlags::INTERNAL_TRANSIENT;
        }
        self
    }

    pub fn set_build_callback(self, interface: std::sync::Arc<dyn RenderPassInterface>) -> Self {
        self.graph.passes[self.pass].interface = Some(interface);
        self
    }

    pub fn finish(self) -> PassId {
        self.pass
    }
}
