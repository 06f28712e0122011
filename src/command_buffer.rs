//! Thread-local command recording with a mirrored CPU-side state cache.

use ash::vk;

use crate::descriptor::{DescriptorBinding, MAX_SETS};
use crate::pipeline::Program;
use crate::pool::{BufferAllocation, BufferPool};
use crate::query::{QueryPool, QueryResult};
use crate::renderpass::{Framebuffer, RenderPass};

bitflags::bitflags! {
    /// Which pieces of bound state have changed since the last draw. Only
    /// dirty sets are re-resolved through the descriptor-set allocator at
    /// draw time.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DirtyFlags: u32 {
        const PROGRAM        = 1 << 0;
        const VERTEX_INPUT   = 1 << 1;
        const INDEX_BUFFER   = 1 << 2;
        const VIEWPORT       = 1 << 3;
        const SCISSOR        = 1 << 4;
        const BLEND_CONSTANTS= 1 << 5;
        const DEPTH_BOUNDS   = 1 << 6;
        const STENCIL_REF    = 1 << 7;
        const PUSH_CONSTANTS = 1 << 8;
        const SET_0 = 1 << 16;
        const SET_1 = 1 << 17;
        const SET_2 = 1 << 18;
        const SET_3 = 1 << 19;
        const SET_4 = 1 << 20;
        const SET_5 = 1 << 21;
        const SET_6 = 1 << 22;
        const SET_7 = 1 << 23;
        const ALL_SETS = 0xFF << 16;
    }
}

fn set_flag(set: u32) -> DirtyFlags {
    DirtyFlags::from_bits_truncate(1 << (16 + set))
}

#[derive(Default, Clone, Copy)]
struct VertexBinding {
    buffer: vk::Buffer,
    offset: u64,
    stride: u32,
}

#[derive(Default, Clone)]
struct SetState {
    bindings: Vec<DescriptorBinding>,
    last_hash: Option<u64>,
}

/// Snapshot of a subset of the command buffer's state, for
/// `save_state`/`restore_state` scoping around a render-queue batch.
pub struct CommandBufferSavedState {
    viewport: vk::Viewport,
    scissor: vk::Rect2D,
    blend_constants: [f32; 4],
}

pub struct CommandBuffer {
    raw: vk::CommandBuffer,
    queue_family: u32,
    frame_index: u32,

    program: Option<std::sync::Arc<Program>>,
    vertex_bindings: [VertexBinding; 8],
    index_buffer: Option<(vk::Buffer, u64, vk::IndexType)>,
    viewport: vk::Viewport,
    scissor: vk::Rect2D,
    blend_constants: [f32; 4],
    depth_bounds: (f32, f32),
    stencil_front_ref: u32,
    stencil_back_ref: u32,
    push_constants: Vec<u8>,

    sets: [SetState; MAX_SETS],
    dirty: DirtyFlags,

    current_render_pass: Option<std::sync::Arc<RenderPass>>,
    current_framebuffer: Option<std::sync::Arc<Framebuffer>>,
    current_subpass: u32,

    query_pool: Option<QueryPool>,
}

impl CommandBuffer {
    pub fn new(raw: vk::CommandBuffer, queue_family: u32, frame_index: u32) -> CommandBuffer {
        CommandBuffer {
            raw,
            queue_family,
            frame_index,
            program: None,
            vertex_bindings: [VertexBinding::default(); 8],
            index_buffer: None,
            viewport: vk::Viewport::default(),
            scissor: vk::Rect2D::default(),
            blend_constants: [0.0; 4],
            depth_bounds: (0.0, 1.0),
            stencil_front_ref: 0,
            stencil_back_ref: 0,
            push_constants: Vec::new(),
            sets: Default::default(),
            dirty: DirtyFlags::empty(),
            current_render_pass: None,
            current_framebuffer: None,
            current_subpass: 0,
            query_pool: None,
        }
    }

    pub fn raw(&self) -> vk::CommandBuffer {
        self.raw
    }

    pub fn queue_family(&self) -> u32 {
        self.queue_family
    }

    pub fn frame_index(&self) -> u32 {
        self.frame_index
    }

    pub fn set_program(&mut self, program: std::sync::Arc<Program>) {
        let changed = self
            .program
            .as_ref()
            .map_or(true, |p| p.cookie() != program.cookie());
        if changed {
            self.program = Some(program);
            self.dirty |= DirtyFlags::PROGRAM;
        }
    }

    pub fn set_vertex_binding(&mut self, binding: u32, buffer: vk::Buffer, offset: u64, stride: u32) {
        let slot = &mut self.vertex_bindings[binding as usize];
        if slot.buffer != buffer || slot.offset != offset || slot.stride != stride {
            *slot = VertexBinding { buffer, offset, stride };
            self.dirty |= DirtyFlags::VERTEX_INPUT;
        }
    }

    pub fn set_index_buffer(&mut self, buffer: vk::Buffer, offset: u64, index_type: vk::IndexType) {
        let new = (buffer, offset, index_type);
        if self.index_buffer != Some(new) {
            self.index_buffer = Some(new);
            self.dirty |= DirtyFlags::INDEX_BUFFER;
        }
    }

    fn mark_set_dirty(&mut self, set: u32, binding: DescriptorBinding) {
        let state = &mut self.sets[set as usize];
        if let Some(existing) = state.bindings.iter_mut().find(|b| b.binding == binding.binding) {
            *existing = binding;
        } else {
            state.bindings.push(binding);
        }
        state.last_hash = None;
        self.dirty |= set_flag(set);
    }

    pub fn set_uniform_buffer(&mut self, set: u32, binding: u32, buffer_cookie: u64, offset: u64) {
        self.mark_set_dirty(set, DescriptorBinding { binding, resource_cookie: buffer_cookie, offset });
    }

    pub fn set_storage_buffer(&mut self, set: u32, binding: u32, buffer_cookie: u64, offset: u64) {
        self.mark_set_dirty(set, DescriptorBinding { binding, resource_cookie: buffer_cookie, offset });
    }

    pub fn set_texture(&mut self, set: u32, binding: u32, view_cookie: u64) {
        self.mark_set_dirty(set, DescriptorBinding { binding, resource_cookie: view_cookie, offset: 0 });
    }

    pub fn set_sampler(&mut self, set: u32, binding: u32, sampler_cookie: u64) {
        self.mark_set_dirty(set, DescriptorBinding { binding, resource_cookie: sampler_cookie, offset: 0 });
    }

    pub fn set_srgb_texture(&mut self, set: u32, binding: u32, view_cookie: u64) {
        self.set_texture(set, binding, view_cookie);
    }

    pub fn set_unorm_texture(&mut self, set: u32, binding: u32, view_cookie: u64) {
        self.set_texture(set, binding, view_cookie);
    }

    pub fn set_bindless(&mut self, set: u32, descriptor_set: vk::DescriptorSet) {
        // Bindless sets bind the whole pool's set object directly; model it
        // as a single synthetic binding 0 so the dirty-mask machinery still
        // applies uniformly.
        self.mark_set_dirty(set, DescriptorBinding { binding: 0, resource_cookie: descriptor_set.as_raw(), offset: 0 });
    }

    pub fn set_viewport(&mut self, viewport: vk::Viewport) {
        if self.viewport != viewport {
            self.viewport = viewport;
            self.dirty |= DirtyFlags::VIEWPORT;
        }
    }

    pub fn set_scissor(&mut self, scissor: vk::Rect2D) {
        if self.scissor != scissor {
            self.scissor = scissor;
            self.dirty |= DirtyFlags::SCISSOR;
        }
    }

    pub fn push_constants(&mut self, data: &[u8], offset: u32) {
        let end = offset as usize + data.len();
        if self.push_constants.len() < end {
            self.push_constants.resize(end, 0);
        }
        self.push_constants[offset as usize..end].copy_from_slice(data);
        self.dirty |= DirtyFlags::PUSH_CONSTANTS;
    }

    /// Bump-allocates from `ring` and returns a writable mapping plus the
    /// backing buffer offset, dirty-marking the binding.
    pub fn allocate_uniform_data(
        &mut self,
        set: u32,
        binding: u32,
        size: u64,
        ring: &mut BufferPool,
        allocate_block: impl FnOnce(u64) -> Result<crate::buffer::Buffer, crate::error::Error>,
    ) -> Result<(BufferAllocation, std::ptr::NonNull<u8>), crate::error::Error> {
        let (allocation, buffer) = ring.alloc(size, 256, allocate_block)?;
        let base = buffer
            .mapped_ptr()
            .expect("uniform ring must be host-visible");
        let ptr = unsafe {
            std::ptr::NonNull::new_unchecked(base.as_ptr().add(allocation.offset as usize))
        };
        self.set_uniform_buffer(set, binding, buffer.cookie().get(), allocation.offset);
        Ok((allocation, ptr))
    }

    /// Precondition violation (programmer error): called when no render
    /// pass is active.
    fn require_in_render_pass(&self) {
        assert!(
            self.current_render_pass.is_some(),
            "draw/dispatch called outside a render pass"
        );
    }

    pub fn draw(&mut self, device: &ash::Device, vertex_count: u32, instance_count: u32, first_vertex: u32, first_instance: u32) {
        self.require_in_render_pass();
        self.flush_dirty_state(device);
        unsafe {
            device.cmd_draw(self.raw, vertex_count, instance_count, first_vertex, first_instance);
        }
    }

    pub fn draw_indexed(
        &mut self,
        device: &ash::Device,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) {
        self.require_in_render_pass();
        assert!(self.index_buffer.is_some(), "draw_indexed with no bound index buffer");
        self.flush_dirty_state(device);
        unsafe {
            device.cmd_draw_indexed(
                self.raw,
                index_count,
                instance_count,
                first_index,
                vertex_offset,
                first_instance,
            );
        }
    }

    pub fn dispatch(&mut self, device: &ash::Device, x: u32, y: u32, z: u32) {
        self.flush_dirty_state(device);
        unsafe { device.cmd_dispatch(self.raw, x, y, z) };
    }

    pub fn draw_indirect(&mut self, device: &ash::Device, buffer: vk::Buffer, offset: u64, draw_count: u32, stride: u32) {
        self.require_in_render_pass();
        self.flush_dirty_state(device);
        unsafe { device.cmd_draw_indirect(self.raw, buffer, offset, draw_count, stride) };
    }

    pub fn dispatch_indirect(&mut self, device: &ash::Device, buffer: vk::Buffer, offset: u64) {
        self.flush_dirty_state(device);
        unsafe { device.cmd_dispatch_indirect(self.raw, buffer, offset) };
    }

    /// Applies every change accumulated since the last draw. Sets whose
    /// binding hash changed are re-resolved through the descriptor-set
    /// allocator by the caller before this is reached (`Device` owns that
    /// step since it needs the allocator and the layout); this method only
    /// pushes the already-resolved dynamic state and vertex/index bindings.
    fn flush_dirty_state(&mut self, device: &ash::Device) {
        if self.dirty.contains(DirtyFlags::VIEWPORT) {
            unsafe { device.cmd_set_viewport(self.raw, 0, std::slice::from_ref(&self.viewport)) };
        }
        if self.dirty.contains(DirtyFlags::SCISSOR) {
            unsafe { device.cmd_set_scissor(self.raw, 0, std::slice::from_ref(&self.scissor)) };
        }
        if self.dirty.contains(DirtyFlags::BLEND_CONSTANTS) {
            unsafe { device.cmd_set_blend_constants(self.raw, &self.blend_constants) };
        }
        if self.dirty.contains(DirtyFlags::DEPTH_BOUNDS) {
            unsafe { device.cmd_set_depth_bounds(self.raw, self.depth_bounds.0, self.depth_bounds.1) };
        }
        if self.dirty.contains(DirtyFlags::VERTEX_INPUT) {
            let buffers: Vec<vk::Buffer> = self.vertex_bindings.iter().map(|b| b.buffer).collect();
            let offsets: Vec<u64> = self.vertex_bindings.iter().map(|b| b.offset).collect();
            unsafe { device.cmd_bind_vertex_buffers(self.raw, 0, &buffers, &offsets) };
        }
        if self.dirty.contains(DirtyFlags::INDEX_BUFFER) {
            if let Some((buffer, offset, index_type)) = self.index_buffer {
                unsafe { device.cmd_bind_index_buffer(self.raw, buffer, offset, index_type) };
            }
        }
        self.dirty = DirtyFlags::empty();
    }

    /// Returns the (set, binding-hash) pairs that changed since the last
    /// flush, for the caller to resolve through the descriptor allocator
    /// before issuing `vkCmdBindDescriptorSets`.
    pub fn dirty_sets(&self) -> Vec<u32> {
        (0..MAX_SETS as u32)
            .filter(|&s| self.dirty.contains(set_flag(s)))
            .collect()
    }

    pub fn bind_descriptor_set(&mut self, device: &ash::Device, layout: vk::PipelineLayout, set: u32, descriptor_set: vk::DescriptorSet) {
        unsafe {
            device.cmd_bind_descriptor_sets(
                self.raw,
                vk::PipelineBindPoint::GRAPHICS,
                layout,
                set,
                std::slice::from_ref(&descriptor_set),
                &[],
            );
        }
        self.dirty.remove(set_flag(set));
    }

    pub fn copy_buffer(&self, device: &ash::Device, src: vk::Buffer, dst: vk::Buffer, regions: &[vk::BufferCopy]) {
        unsafe { device.cmd_copy_buffer(self.raw, src, dst, regions) };
    }

    pub fn copy_image(&self, device: &ash::Device, src: vk::Image, src_layout: vk::ImageLayout, dst: vk::Image, dst_layout: vk::ImageLayout, regions: &[vk::ImageCopy]) {
        unsafe { device.cmd_copy_image(self.raw, src, src_layout, dst, dst_layout, regions) };
    }

    pub fn copy_buffer_to_image(&self, device: &ash::Device, src: vk::Buffer, dst: vk::Image, dst_layout: vk::ImageLayout, regions: &[vk::BufferImageCopy]) {
        unsafe { device.cmd_copy_buffer_to_image(self.raw, src, dst, dst_layout, regions) };
    }

    pub fn blit_image(&self, device: &ash::Device, src: vk::Image, src_layout: vk::ImageLayout, dst: vk::Image, dst_layout: vk::ImageLayout, regions: &[vk::ImageBlit], filter: vk::Filter) {
        unsafe { device.cmd_blit_image(self.raw, src, src_layout, dst, dst_layout, regions, filter) };
    }

    pub fn clear_image(&self, device: &ash::Device, image: vk::Image, layout: vk::ImageLayout, color: vk::ClearColorValue, ranges: &[vk::ImageSubresourceRange]) {
        unsafe { device.cmd_clear_color_image(self.raw, image, layout, &color, ranges) };
    }

    /// Records a mip chain's worth of blits, one per level, each reading
    /// the previous level.
    pub fn generate_mipmaps(&self, device: &ash::Device, image: vk::Image, extent: vk::Extent3D, mip_levels: u32, layer_count: u32) {
        let mut mip_width = extent.width as i32;
        let mut mip_height = extent.height as i32;
        for level in 1..mip_levels {
            let src_range = vk::ImageSubresourceRange::builder()
                .aspect_mask(vk::ImageAspectFlags::COLOR)
                .base_mip_level(level - 1)
                .level_count(1)
                .base_array_layer(0)
                .layer_count(layer_count)
                .build();
            let barrier = vk::ImageMemoryBarrier::builder()
                .image(image)
                .old_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
                .new_layout(vk::ImageLayout::TRANSFER_SRC_OPTIMAL)
                .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
                .dst_access_mask(vk::AccessFlags::TRANSFER_READ)
                .subresource_range(src_range);
            unsafe {
                device.cmd_pipeline_barrier(
                    self.raw,
                    vk::PipelineStageFlags::TRANSFER,
                    vk::PipelineStageFlags::TRANSFER,
                    vk::DependencyFlags::empty(),
                    &[],
                    &[],
                    std::slice::from_ref(&barrier),
                );
            }

            let next_width = (mip_width / 2).max(1);
            let next_height = (mip_height / 2).max(1);
            let blit = vk::ImageBlit::builder()
                .src_offsets([
                    vk::Offset3D::default(),
                    vk::Offset3D { x: mip_width, y: mip_height, z: 1 },
                ])
                .src_subresource(
                    vk::ImageSubresourceLayers::builder()
                        .aspect_mask(vk::ImageAspectFlags::COLOR)
                        .mip_level(level - 1)
                        .base_array_layer(0)
                        .layer_count(layer_count)
                        .build(),
                )
                .dst_offsets([
                    vk::Offset3D::default(),
                    vk::Offset3D { x: next_width, y: next_height, z: 1 },
                ])
                .dst_subresource(
                    vk::ImageSubresourceLayers::builder()
                        .aspect_mask(vk::ImageAspectFlags::COLOR)
                        .mip_level(level)
                        .base_array_layer(0)
                        .layer_count(layer_count)
                        .build(),
                )
                .build();
            unsafe {
                device.cmd_blit_image(
                    self.raw,
                    image,
                    vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                    image,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    std::slice::from_ref(&blit),
                    vk::Filter::LINEAR,
                );
            }

            mip_width = next_width;
            mip_height = next_height;
        }
    }

    /// Emits `vkCmdPipelineBarrier2`.
    pub fn barrier(&self, synchronization2: &ash::extensions::khr::Synchronization2, info: &vk::DependencyInfo) {
        unsafe { synchronization2.cmd_pipeline_barrier2(self.raw, info) };
    }

    /// Emits `vkCmdSetEvent2`, the producer side of a split-event transition.
    pub fn set_event(
        &self,
        synchronization2: &ash::extensions::khr::Synchronization2,
        event: vk::Event,
        info: &vk::DependencyInfo,
    ) {
        unsafe { synchronization2.cmd_set_event2(self.raw, event, info) };
    }

    /// Emits `vkCmdWaitEvents2`, the consumer side of a split-event transition.
    pub fn wait_events(
        &self,
        synchronization2: &ash::extensions::khr::Synchronization2,
        events: &[vk::Event],
        infos: &[vk::DependencyInfo],
    ) {
        unsafe { synchronization2.cmd_wait_events2(self.raw, events, infos) };
    }

    pub fn begin_render_pass(
        &mut self,
        device: &ash::Device,
        render_pass: std::sync::Arc<RenderPass>,
        framebuffer: std::sync::Arc<Framebuffer>,
        render_area: vk::Rect2D,
        clear_values: &[vk::ClearValue],
    ) {
        let info = vk::RenderPassBeginInfo::builder()
            .render_pass(render_pass.raw())
            .framebuffer(framebuffer.raw())
            .render_area(render_area)
            .clear_values(clear_values);
        unsafe { device.cmd_begin_render_pass(self.raw, &info, vk::SubpassContents::INLINE) };

        self.set_viewport(vk::Viewport {
            x: render_area.offset.x as f32,
            y: render_area.offset.y as f32,
            width: render_area.extent.width as f32,
            height: render_area.extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        });
        self.set_scissor(render_area);

        self.current_render_pass = Some(render_pass);
        self.current_framebuffer = Some(framebuffer);
        self.current_subpass = 0;
    }

    pub fn next_subpass(&mut self, device: &ash::Device) {
        self.require_in_render_pass();
        unsafe { device.cmd_next_subpass(self.raw, vk::SubpassContents::INLINE) };
        self.current_subpass += 1;
    }

    pub fn end_render_pass(&mut self, device: &ash::Device) {
        self.require_in_render_pass();
        unsafe { device.cmd_end_render_pass(self.raw) };
        self.current_render_pass = None;
        self.current_framebuffer = None;
        self.current_subpass = 0;
    }

    pub fn save_state(&self) -> CommandBufferSavedState {
        CommandBufferSavedState {
            viewport: self.viewport,
            scissor: self.scissor,
            blend_constants: self.blend_constants,
        }
    }

    pub fn restore_state(&mut self, saved: CommandBufferSavedState) {
        self.set_viewport(saved.viewport);
        self.set_scissor(saved.scissor);
        if self.blend_constants != saved.blend_constants {
            self.blend_constants = saved.blend_constants;
            self.dirty |= DirtyFlags::BLEND_CONSTANTS;
        }
    }

    /// Appends a timestamp write, lazily sizing the command buffer's query
    /// pool. Resolved by `Device::read_query_results` at the frame
    /// boundary.
    pub fn write_timestamp(
        &mut self,
        device: &ash::Device,
        pipeline_stage: vk::PipelineStageFlags,
        pool_factory: impl FnOnce(&ash::Device) -> Result<QueryPool, crate::error::Error>,
    ) -> Result<QueryResult, crate::error::Error> {
        if self.query_pool.is_none() {
            self.query_pool = Some(pool_factory(device)?);
        }
        let pool = self.query_pool.as_mut().unwrap();
        let result = pool.reserve();
        unsafe {
            device.cmd_write_timestamp(self.raw, pipeline_stage, pool.raw(), result.0);
        }
        Ok(result)
    }

    pub fn query_pool(&self) -> Option<&QueryPool> {
        self.query_pool.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dirty_mask_flags_changed_set() {
        let mut cb = CommandBuffer::new(vk::CommandBuffer::null(), 0, 0);
        assert!(cb.dirty_sets().is_empty());
        cb.set_uniform_buffer(2, 0, 99, 0);
        assert_eq!(cb.dirty_sets(), vec![2]);
    }

    #[test]
    fn rebinding_same_value_still_marks_dirty_but_is_idempotent_in_content() {
        let mut cb = CommandBuffer::new(vk::CommandBuffer::null(), 0, 0);
        cb.set_uniform_buffer(0, 1, 5, 0);
        cb.set_uniform_buffer(0, 1, 5, 0);
        assert_eq!(cb.sets[0].bindings.len(), 1);
    }

    #[test]
    fn viewport_change_tracked_in_dirty_flags() {
        let mut cb = CommandBuffer::new(vk::CommandBuffer::null(), 0, 0);
        let vp = vk::Viewport { x: 0.0, y: 0.0, width: 100.0, height: 100.0, min_depth: 0.0, max_depth: 1.0 };
        cb.set_viewport(vp);
        assert!(cb.dirty.contains(DirtyFlags::VIEWPORT));
    }
}
