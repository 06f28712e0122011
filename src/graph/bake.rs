//! The bake algorithm: turns a [`RenderGraphBuilder`] declaration into an
//! executable [`BakedGraph`] (§4.6).

use std::collections::HashMap;

use petgraph::graph::{DiGraph, NodeIndex};
use sid_vec::ToIndex;

use super::barrier::{choose_sync_op, SyncOp};
use super::pass::{AccessKind, PassId, Queue, RenderGraphBuilder};
use super::resource::{AttachmentFlags, QueueMask, ResourceDimensions, ResourceId, ResourceType, SizeClass};
use crate::error::Error;

/// A coalesced group of logical passes sharing one physical render pass
/// (one VkRenderPass, multiple subpasses).
#[derive(Debug, Clone)]
pub struct PhysicalPass {
    pub queue: Queue,
    pub logical_passes: Vec<PassId>,
}

#[derive(Debug)]
pub struct BakedGraph {
    pub execution_order: Vec<PassId>,
    pub physical_passes: Vec<PhysicalPass>,
    pub dimensions: HashMap<ResourceId, ResourceDimensions>,
    pub physical_slots: Vec<ResourceDimensions>,
    pub aliasing: HashMap<ResourceId, u32>,
    pub history_aliasing: HashMap<ResourceId, u32>,
    pub sync_ops: Vec<SyncOp>,
    pub swapchain_physical_pass: Option<usize>,
}

impl BakedGraph {
    pub fn physical_pass_count(&self) -> usize {
        self.physical_passes.len()
    }

    pub fn physical_allocation_count(&self) -> usize {
        self.physical_slots.len()
    }

    pub fn barriers(&self) -> impl Iterator<Item = &SyncOp> {
        self.sync_ops
            .iter()
            .filter(|op| matches!(op, SyncOp::PipelineBarrier { .. }))
    }

    pub fn semaphores(&self) -> impl Iterator<Item = &SyncOp> {
        self.sync_ops
            .iter()
            .filter(|op| matches!(op, SyncOp::Semaphore { .. }))
    }

    pub fn split_events(&self) -> impl Iterator<Item = &SyncOp> {
        self.sync_ops
            .iter()
            .filter(|op| matches!(op, SyncOp::SplitEvent { .. }))
    }
}

fn effective_queue(queue: Queue) -> Queue {
    match queue {
        Queue::Compute => Queue::Graphics,
        other => other,
    }
}

/// Resolves every resource's absolute extent, following `InputRelative`
/// chains with cycle detection.
fn resolve_sizes(
    graph: &RenderGraphBuilder,
    backbuffer: (u32, u32),
) -> Result<HashMap<ResourceId, (u32, u32, u32)>, Error> {
    let mut resolved = HashMap::new();
    let mut in_progress = std::collections::HashSet::new();

    fn resolve_one(
        id: ResourceId,
        graph: &RenderGraphBuilder,
        backbuffer: (u32, u32),
        resolved: &mut HashMap<ResourceId, (u32, u32, u32)>,
        in_progress: &mut std::collections::HashSet<ResourceId>,
    ) -> Result<(u32, u32, u32), Error> {
        if let Some(&dims) = resolved.get(&id) {
            return Ok(dims);
        }
        if !in_progress.insert(id) {
            return Err(Error::GraphIsCyclic);
        }

        let resource = graph.resource(id);
        let dims = match resource.size_class {
            SizeClass::Absolute { width, height, depth } => (width, height, depth),
            SizeClass::SwapchainRelative { scale_x, scale_y } => (
                (backbuffer.0 as f32 * scale_x) as u32,
                (backbuffer.1 as f32 * scale_y) as u32,
                1,
            ),
            SizeClass::InputRelative { input, scale_x, scale_y } => {
                let (iw, ih, _) = resolve_one(input, graph, backbuffer, resolved, in_progress)?;
                ((iw as f32 * scale_x) as u32, (ih as f32 * scale_y) as u32, 1)
            }
        };

        in_progress.remove(&id);
        resolved.insert(id, dims);
        Ok(dims)
    }

    for resource in graph.resources().iter() {
        resolve_one(resource.id, graph, backbuffer, &mut resolved, &mut in_progress)?;
    }

    Ok(resolved)
}

fn topological_order(graph: &RenderGraphBuilder) -> Result<Vec<PassId>, Error> {
    let mut dag: DiGraph<PassId, ()> = DiGraph::new();
    let mut nodes: Vec<NodeIndex> = Vec::with_capacity(graph.passes().len());
    for pass in graph.passes().iter() {
        nodes.push(dag.add_node(pass.id));
    }

    for resource in graph.resources().iter() {
        for &writer in &resource.writers {
            for &reader in &resource.readers {
                dag.update_edge(nodes[writer.to_index()], nodes[reader.to_index()], ());
            }
        }
    }

    petgraph::algo::toposort(&dag, None)
        .map(|order| order.into_iter().map(|n| dag[n]).collect())
        .map_err(|_| Error::GraphIsCyclic)
}

pub(crate) fn attachment_resources(pass: &super::pass::RenderPassDecl) -> std::collections::HashSet<ResourceId> {
    let is_attachment_role = |a: AccessKind| {
        matches!(
            a,
            AccessKind::ColorOutput | AccessKind::DepthStencil | AccessKind::Resolve | AccessKind::Attachment
        )
    };
    pass.outputs
        .iter()
        .chain(pass.inputs.iter())
        .filter(|e| is_attachment_role(e.access))
        .map(|e| e.resource)
        .collect()
}

fn group_physical_passes(
    graph: &RenderGraphBuilder,
    order: &[PassId],
) -> Vec<PhysicalPass> {
    let mut physical: Vec<PhysicalPass> = Vec::new();

    for &pass_id in order {
        let decl = &graph.passes()[pass_id];
        let queue = effective_queue(decl.queue);
        let attachments = attachment_resources(decl);

        let merges_with_last = physical.last().is_some_and(|last| {
            last.queue == queue
                && last.logical_passes.iter().any(|&prev_id| {
                    !attachment_resources(&graph.passes()[prev_id])
                        .is_disjoint(&attachments)
                })
        });

        if merges_with_last {
            physical.last_mut().unwrap().logical_passes.push(pass_id);
        } else {
            physical.push(PhysicalPass {
                queue,
                logical_passes: vec![pass_id],
            });
        }
    }

    physical
}

struct Interval {
    first: usize,
    last: usize,
}

/// Greedy first-fit bin-packing by lifetime interval within one
/// aliasing-equivalence class (invariant: slot intervals never overlap).
fn assign_slots(
    candidates: Vec<(ResourceId, Interval, ResourceDimensions)>,
) -> (Vec<ResourceDimensions>, HashMap<ResourceId, u32>) {
    let mut slots: Vec<(ResourceDimensions, usize)> = Vec::new(); // (dims, busy_until)
    let mut assignment = HashMap::new();

    let mut sorted = candidates;
    sorted.sort_by_key(|(_, interval, _)| interval.first);

    for (id, interval, dims) in sorted {
        let existing_slot = slots.iter().position(|(slot_dims, busy_until)| {
            slot_dims.aliasing_class_eq(&dims) && *busy_until < interval.first
        });

        match existing_slot {
            Some(slot_index) => {
                slots[slot_index].1 = interval.last;
                assignment.insert(id, slot_index as u32);
            }
            None => {
                slots.push((dims, interval.last));
                assignment.insert(id, (slots.len() - 1) as u32);
            }
        }
    }

    (slots.into_iter().map(|(dims, _)| dims).collect(), assignment)
}

pub fn bake(graph: &RenderGraphBuilder) -> Result<BakedGraph, Error> {
    for pass in graph.passes().iter() {
        if let Some(interface) = &pass.interface {
            interface.setup_dependencies(graph);
        }
    }

    // Step 1: validate.
    for resource in graph.resources().iter() {
        if !resource.readers.is_empty() && resource.writers.is_empty() {
            return Err(Error::graph_bake_failed_at(
                format!("resource \"{}\" has readers but no writer", resource.name),
                None,
                Some(resource.id),
            ));
        }
    }
    for pass in graph.passes().iter() {
        for edge in &pass.inputs {
            if edge.access == AccessKind::BlitSource && graph.resource(edge.resource).transient_only {
                return Err(Error::GraphInvalid(format!(
                    "resource \"{}\" is transient-only and cannot be a blit source",
                    graph.resource(edge.resource).name
                )));
            }
        }
    }

    // Step 2: resolve sizes.
    let resolved_sizes = resolve_sizes(graph, graph.backbuffer_dimensions())?;

    // Step 3: topological sort.
    let execution_order = topological_order(graph)?;

    // Step 4 + 5: queue coalescing is baked into `effective_queue`, used
    // while grouping into physical passes.
    let physical_passes = group_physical_passes(graph, &execution_order);

    let mut physical_pass_of: HashMap<PassId, usize> = HashMap::new();
    for (index, pass) in physical_passes.iter().enumerate() {
        for &logical in &pass.logical_passes {
            physical_pass_of.insert(logical, index);
        }
    }

    // Build per-resource dimensions.
    let mut dimensions = HashMap::new();
    for resource in graph.resources().iter() {
        let (w, h, d) = resolved_sizes[&resource.id];
        let queue_mask = resource
            .writers
            .iter()
            .chain(resource.readers.iter())
            .fold(QueueMask::empty(), |mask, &pass_id| {
                mask | graph.passes()[pass_id].queue.mask()
            });
        dimensions.insert(
            resource.id,
            ResourceDimensions {
                format: resource.format,
                width: w,
                height: h,
                depth: d,
                layers: resource.array_layers,
                mip_levels: resource.mip_levels,
                samples: resource.samples,
                buffer_info: resource.buffer_info,
                queue_mask,
                usage: resource.extra_usage,
                flags: resource.flags,
                surface_transform: false,
                name: resource.name.clone(),
            },
        );
    }

    // Step 6: resource aliasing. Persistent and buffer-like resources each
    // get a dedicated slot; everything else is binned by lifetime within its
    // aliasing-equivalence class. History targets additionally occupy a
    // second, independent physical slot (invariant 3: a history read sees
    // the previous frame's completed write, never this frame's).
    let mut dedicated: Vec<(ResourceId, ResourceDimensions)> = Vec::new();
    let mut primary: Vec<(ResourceId, Interval, ResourceDimensions)> = Vec::new();
    let mut history: Vec<(ResourceId, Interval, ResourceDimensions)> = Vec::new();

    for resource in graph.resources().iter() {
        if resource.ty == ResourceType::Proxy || resource.writers.is_empty() {
            continue;
        }
        let dims = dimensions[&resource.id].clone();
        let persistent = resource.flags.contains(AttachmentFlags::PERSISTENT);

        if persistent || dims.is_buffer_like() {
            dedicated.push((resource.id, dims));
            continue;
        }

        let first = resource.writers.iter().map(|p| physical_pass_of[p]).min().unwrap();
        let last = resource
            .readers
            .iter()
            .chain(resource.writers.iter())
            .map(|p| physical_pass_of[p])
            .max()
            .unwrap_or(first);
        primary.push((resource.id, Interval { first, last }, dims.clone()));

        if resource.is_history_target {
            history.push((resource.id, Interval { first, last: first }, dims));
        }
    }

    let (primary_slots, aliasing) = assign_slots(primary);
    let (history_slots, history_assignment) = assign_slots(history);

    let mut physical_slots = primary_slots;
    let history_offset = physical_slots.len() as u32;
    physical_slots.extend(history_slots);
    let history_aliasing: HashMap<ResourceId, u32> = history_assignment
        .into_iter()
        .map(|(id, slot)| (id, slot + history_offset))
        .collect();

    let mut aliasing = aliasing;
    let dedicated_offset = physical_slots.len() as u32;
    for (index, (id, dims)) in dedicated.into_iter().enumerate() {
        aliasing.insert(id, dedicated_offset + index as u32);
        physical_slots.push(dims);
    }

    // Step 7: barrier & event synthesis.
    let mut sync_ops = Vec::new();
    for resource in graph.resources().iter() {
        if resource.writers.is_empty() {
            continue;
        }
        let writer = resource.writers[0];
        let writer_queue = effective_queue(graph.passes()[writer].queue);
        let writer_access = graph.passes()[writer]
            .outputs
            .iter()
            .find(|e| e.resource == resource.id)
            .map(|e| e.access)
            .unwrap_or(AccessKind::ColorOutput);
        let (src_access, src_stage, old_layout) = writer_access.access_stage_layout();

        for &reader in &resource.readers {
            let reader_access = graph.passes()[reader]
                .inputs
                .iter()
                .find(|e| e.resource == resource.id)
                .map(|e| e.access)
                .unwrap_or(AccessKind::Input);

            if reader_access == AccessKind::History {
                // Reads the previous frame's completed write; no
                // this-frame synchronization is needed.
                continue;
            }

            let reader_queue = effective_queue(graph.passes()[reader].queue);
            let (dst_access, dst_stage, new_layout) = reader_access.access_stage_layout();

            let writer_physical = physical_pass_of[&writer];
            let reader_physical = physical_pass_of[&reader];
            let intervening_work = reader_physical > writer_physical + 1;

            sync_ops.push(choose_sync_op(
                resource.id,
                writer,
                writer_queue != reader_queue,
                reader,
                src_access,
                dst_access,
                src_stage,
                dst_stage,
                old_layout,
                new_layout,
                intervening_work,
            ));
        }
    }

    // Step 8: swapchain integration.
    let swapchain_physical_pass = graph
        .backbuffer_source()
        .and_then(|id| graph.resource(id).writers.first().copied())
        .and_then(|pass| physical_pass_of.get(&pass).copied());

    Ok(BakedGraph {
        execution_order,
        physical_passes,
        dimensions,
        physical_slots,
        aliasing,
        history_aliasing,
        sync_ops,
        swapchain_physical_pass,
    })
}
