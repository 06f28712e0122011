//! The `Device`: owns the logical device, per-frame contexts, object pools,
//! and the caches layered on top of them (§4.2).
//!
//! Each public entry point locks a single [`DeviceState`] mutex and
//! delegates to a `_no_lock` sibling; internal call sites that already hold
//! the lock (e.g. `end_frame` calling into descriptor-allocator promotion)
//! go straight to the sibling instead of re-entering.

use std::collections::HashMap;
use std::sync::Arc;

use ash::vk;
use parking_lot::Mutex;

use crate::buffer::{usage_for_domain, Buffer, BufferDesc, MemoryDomain};
use crate::cache::TwoListCache;
use crate::command_buffer::CommandBuffer;
use crate::context::{Context, QueueAssignment, QueueKind};
use crate::cookie::{Cookie, CookieAllocator};
use crate::descriptor::{DescriptorSetAllocator, DescriptorSetLayoutDesc};
use crate::error::Error;
use crate::graph::Queue as GraphQueue;
use crate::handle::{Handle, Pool};
use crate::image::{Image, ImageDesc, ImageDomain, ImageView, Sampler, SamplerDesc, ViewAspect};
use crate::pipeline::ProgramCache;
use crate::pool::BufferPool;
use crate::query::{QueryPool, QueryResult};
use crate::renderpass::{
    Framebuffer, FramebufferCache, FramebufferKey, RenderPass, RenderPassCache, RenderPassDesc,
    TransientAttachmentAllocator,
};
use crate::sync::{Fence, Semaphore, TimelineSemaphore};

#[cfg(test)]
mod tests;

/// Maps a render-graph logical queue onto the physical queue family it
/// submits through. `AsyncCompute` and `Compute` share the compute family;
/// `AsyncGraphics` and `Graphics` share the graphics family (§4.6.1's
/// queue-coalescing step folds the logical distinction back out).
pub fn physical_queue_for(queue: GraphQueue) -> QueueKind {
    match queue {
        GraphQueue::Graphics | GraphQueue::AsyncGraphics => QueueKind::Graphics,
        GraphQueue::Compute | GraphQueue::AsyncCompute => QueueKind::Compute,
    }
}

const QUEUE_KINDS: [QueueKind; 3] = [QueueKind::Graphics, QueueKind::Compute, QueueKind::Transfer];

enum PendingDestroy {
    Buffer(Buffer),
    Image(Image),
    ImageView(ImageView),
    Sampler(Sampler),
    Semaphore(Semaphore),
}

impl PendingDestroy {
    unsafe fn destroy(&self, device: &ash::Device) {
        match self {
            PendingDestroy::Buffer(b) => b.destroy_raw(device),
            PendingDestroy::Image(i) => i.destroy_raw(device),
            PendingDestroy::ImageView(v) => v.destroy_raw(device),
            PendingDestroy::Sampler(s) => s.destroy(device),
            PendingDestroy::Semaphore(s) => s.destroy(device),
        }
    }
}

#[derive(Default)]
struct QueueSubmission {
    command_buffers: Vec<vk::CommandBuffer>,
    wait_semaphores: Vec<vk::Semaphore>,
    wait_stages: Vec<vk::PipelineStageFlags>,
    signal_semaphores: Vec<vk::Semaphore>,
}

/// Per-frame-in-flight state: command pools, submission lists, the
/// destruction queue that's drained once this slot's fence has been waited
/// on again, and the uniform-data bump ring (§4.8).
pub struct FrameContext {
    fence: Fence,
    command_pools: HashMap<QueueKind, vk::CommandPool>,
    /// Every command buffer ever allocated from this frame's pools; reset
    /// (not freed) each cycle, so this doubles as the post-reset free list.
    allocated_command_buffers: HashMap<QueueKind, Vec<vk::CommandBuffer>>,
    free_command_buffers: HashMap<QueueKind, Vec<vk::CommandBuffer>>,
    submissions: HashMap<QueueKind, QueueSubmission>,
    destroy_queue: Vec<PendingDestroy>,
    query_pools: Vec<QueryPool>,
    uniform_ring: BufferPool,
    swapchain_touched: bool,
}

impl FrameContext {
    fn new(device: &ash::Device, cfg: &crate::config::GfxConfig, qa: &QueueAssignment) -> Result<FrameContext, Error> {
        let mut command_pools = HashMap::new();
        for &kind in &QUEUE_KINDS {
            let family = qa.family_for(kind);
            let info = vk::CommandPoolCreateInfo::builder()
                .queue_family_index(family)
                .flags(vk::CommandPoolCreateFlags::TRANSIENT);
            let pool = unsafe { device.create_command_pool(&info, None).map_err(Error::from)? };
            command_pools.insert(kind, pool);
        }

        Ok(FrameContext {
            fence: Fence::new(device, true)?,
            command_pools,
            allocated_command_buffers: HashMap::new(),
            free_command_buffers: HashMap::new(),
            submissions: HashMap::new(),
            destroy_queue: Vec::new(),
            query_pools: Vec::new(),
            uniform_ring: BufferPool::new(
                vk::BufferUsageFlags::UNIFORM_BUFFER,
                MemoryDomain::HostCoherent,
                cfg.buffer_pool_block_size,
            ),
            swapchain_touched: false,
        })
    }

    unsafe fn destroy(&self, device: &ash::Device) {
        for pool in self.command_pools.values() {
            device.destroy_command_pool(*pool, None);
        }
        self.fence.destroy(device);
        self.uniform_ring.destroy(device);
        for pool in &self.query_pools {
            pool.destroy(device);
        }
        for pending in &self.destroy_queue {
            pending.destroy(device);
        }
    }
}

/// Everything the Device mutex guards: object pools, per-frame contexts,
/// caches, and swapchain-binding state (§4.2).
struct DeviceState {
    buffers: Pool<Buffer>,
    images: Pool<Image>,
    image_views: Pool<ImageView>,

    frames: Vec<FrameContext>,
    frame_cursor: usize,

    timelines: HashMap<QueueKind, TimelineSemaphore>,

    sampler_cache: TwoListCache<SamplerDesc, Sampler>,
    render_pass_cache: RenderPassCache,
    framebuffer_cache: FramebufferCache,
    descriptor_allocators: HashMap<u64, Arc<DescriptorSetAllocator>>,
    program_cache: ProgramCache,
    transient_attachments: TransientAttachmentAllocator,

    current_acquire_semaphore: Option<Semaphore>,
    current_release_semaphore: Option<Semaphore>,
    current_swapchain_image_index: Option<u32>,
}

/// Owns the logical device, every pooled GPU object, and the caches layered
/// on top of them. The Device does not own the `VkSwapchainKHR`; see
/// [`crate::swapchain::Swapchain`].
pub struct Device {
    context: Context,
    raw: ash::Device,
    synchronization2: ash::extensions::khr::Synchronization2,
    queues: HashMap<QueueKind, vk::Queue>,
    allocator: Mutex<gpu_alloc::GpuAllocator<vk::DeviceMemory>>,
    cookies: CookieAllocator,
    max_frames_in_flight: u32,
    state: Mutex<DeviceState>,
}

fn map_alloc_error(e: gpu_alloc::AllocationError) -> Error {
    use gpu_alloc::AllocationError::*;
    match e {
        OutOfDeviceMemory => Error::OutOfDeviceMemory,
        OutOfHostMemory => Error::OutOfHostMemory,
        NoCompatibleMemoryTypes => {
            Error::IncompatibleState("no memory type compatible with allocation request".into())
        }
        TooManyObjects => Error::OutOfDeviceMemory,
    }
}

impl Device {
    pub fn new(context: Context) -> Result<Device, Error> {
        let raw = context.create_logical_device()?;
        let synchronization2 =
            ash::extensions::khr::Synchronization2::new(context.instance(), &raw);

        let qa = context.queue_assignment();
        let mut queues = HashMap::new();
        queues.insert(QueueKind::Graphics, unsafe {
            raw.get_device_queue(qa.graphics_family, 0)
        });
        queues.insert(QueueKind::Compute, unsafe {
            raw.get_device_queue(qa.compute_family, 0)
        });
        queues.insert(QueueKind::Transfer, unsafe {
            raw.get_device_queue(qa.transfer_family, 0)
        });
        queues.insert(QueueKind::Present, unsafe {
            raw.get_device_queue(qa.present_family, 0)
        });

        let props = unsafe {
            gpu_alloc_ash::device_properties(context.instance(), vk::API_VERSION_1_3, context.physical_device())
                .map_err(|_| {
                    Error::InitializationFailed(
                        "failed to query device properties for the GPU allocator".into(),
                    )
                })?
        };
        let allocator = gpu_alloc::GpuAllocator::new(gpu_alloc::Config::i_am_prototyping(), props);

        let cfg = context.config().clone();
        let mut frames = Vec::with_capacity(cfg.frames_in_flight as usize);
        for _ in 0..cfg.frames_in_flight {
            frames.push(FrameContext::new(&raw, &cfg, &qa)?);
        }

        let mut timelines = HashMap::new();
        for &kind in &QUEUE_KINDS {
            timelines.insert(kind, TimelineSemaphore::new(&raw, 0)?);
        }

        let state = Mutex::new(DeviceState {
            buffers: Pool::new(),
            images: Pool::new(),
            image_views: Pool::new(),
            frames,
            frame_cursor: 0,
            timelines,
            sampler_cache: TwoListCache::new(),
            render_pass_cache: RenderPassCache::new(),
            framebuffer_cache: FramebufferCache::new(),
            descriptor_allocators: HashMap::new(),
            program_cache: ProgramCache::new(),
            transient_attachments: TransientAttachmentAllocator::new(),
            current_acquire_semaphore: None,
            current_release_semaphore: None,
            current_swapchain_image_index: None,
        });

        Ok(Device {
            context,
            raw,
            synchronization2,
            queues,
            allocator: Mutex::new(allocator),
            cookies: CookieAllocator::new(),
            max_frames_in_flight: cfg.frames_in_flight,
            state,
        })
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn raw(&self) -> &ash::Device {
        &self.raw
    }

    pub fn synchronization2(&self) -> &ash::extensions::khr::Synchronization2 {
        &self.synchronization2
    }

    pub fn queue(&self, kind: QueueKind) -> vk::Queue {
        self.queues[&kind]
    }

    pub fn max_frames_in_flight(&self) -> u32 {
        self.max_frames_in_flight
    }

    pub fn wait_idle(&self) -> Result<(), Error> {
        unsafe { self.raw.device_wait_idle().map_err(Error::from) }
    }

    // ---- frame lifecycle (§4.2) -------------------------------------

    /// Advances the frame-context cursor. Waits on the incoming slot's fence
    /// (so its prior frame's GPU work is known complete), drains its
    /// destruction queue, then resets its command pools and uniform ring
    /// for reuse.
    pub fn next_frame(&self) -> Result<(), Error> {
        let mut state = self.state.lock();
        self.next_frame_no_lock(&mut state)
    }

    fn next_frame_no_lock(&self, state: &mut DeviceState) -> Result<(), Error> {
        state.frame_cursor = (state.frame_cursor + 1) % state.frames.len();
        let index = state.frame_cursor;

        state.frames[index].fence.wait(&self.raw, u64::MAX)?;
        state.frames[index].fence.reset(&self.raw)?;

        self.read_query_results_no_lock(state, index)?;

        let frame = &mut state.frames[index];
        for pending in frame.destroy_queue.drain(..) {
            unsafe { pending.destroy(&self.raw) };
        }
        for pool in &frame.command_pools {
            unsafe { self.raw.reset_command_pool(*pool.1, vk::CommandPoolResetFlags::empty()) }
                .map_err(Error::from)?;
        }
        // The whole pool was just reset: every command buffer ever
        // allocated from it is free again, not just the ones that were
        // idle before this cycle.
        frame.free_command_buffers = frame.allocated_command_buffers.clone();
        frame.submissions.clear();
        frame.query_pools.clear();
        frame.uniform_ring.reset();
        frame.swapchain_touched = false;

        let evicted_framebuffers = state.framebuffer_cache.advance_frame();
        drop(evicted_framebuffers); // Arc-backed: dropped once refcount reaches zero elsewhere.
        let evicted_transients = state.transient_attachments.advance_frame();
        drop(evicted_transients);
        for allocator in state.descriptor_allocators.values() {
            allocator.advance_frame();
        }
        state.sampler_cache.promote_read_write_to_read_only();

        Ok(())
    }

    fn current_frame<'a>(&self, state: &'a mut DeviceState) -> &'a mut FrameContext {
        let index = state.frame_cursor;
        &mut state.frames[index]
    }

    /// Allocates (or reuses) a command buffer bound to `queue`'s family for
    /// the current frame, calling `vkBeginCommandBuffer`.
    pub fn begin_command_buffer(&self, queue: QueueKind) -> Result<CommandBuffer, Error> {
        let mut state = self.state.lock();
        let frame_index = state.frame_cursor;
        let frame = self.current_frame(&mut state);

        let raw = if let Some(existing) = frame
            .free_command_buffers
            .get_mut(&queue)
            .and_then(|v| v.pop())
        {
            existing
        } else {
            let pool = frame.command_pools[&queue];
            let info = vk::CommandBufferAllocateInfo::builder()
                .command_pool(pool)
                .level(vk::CommandBufferLevel::PRIMARY)
                .command_buffer_count(1);
            let bufs = unsafe { self.raw.allocate_command_buffers(&info).map_err(Error::from)? };
            frame.allocated_command_buffers.entry(queue).or_default().push(bufs[0]);
            bufs[0]
        };

        let qa = self.context.queue_assignment();
        let family = qa.family_for(queue);

        let begin_info = vk::CommandBufferBeginInfo::builder()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe {
            self.raw
                .begin_command_buffer(raw, &begin_info)
                .map_err(Error::from)?
        };

        Ok(CommandBuffer::new(raw, family, frame_index as u32))
    }

    /// Ends recording and appends the command buffer to the current
    /// frame's per-queue submission list; the actual `vkQueueSubmit` is
    /// deferred to `end_frame` so cross-thread submissions to one queue
    /// stay ordered under a single lock (§5). `wait_semaphores` and
    /// `out_semaphores` are the cross-queue handoffs the render-graph bake
    /// placed here (`SyncOp::Semaphore`, §4.6 step 7).
    pub fn submit(
        &self,
        queue: QueueKind,
        cmd: CommandBuffer,
        wait_semaphores: &[(vk::Semaphore, vk::PipelineStageFlags)],
        out_semaphores: &[vk::Semaphore],
    ) -> Result<(), Error> {
        let mut state = self.state.lock();
        self.submit_no_lock(&mut state, queue, cmd, wait_semaphores, out_semaphores)
    }

    fn submit_no_lock(
        &self,
        state: &mut DeviceState,
        queue: QueueKind,
        cmd: CommandBuffer,
        wait_semaphores: &[(vk::Semaphore, vk::PipelineStageFlags)],
        out_semaphores: &[vk::Semaphore],
    ) -> Result<(), Error> {
        let raw = cmd.raw();
        unsafe { self.raw.end_command_buffer(raw).map_err(Error::from)? };

        let frame = self.current_frame(state);
        let submission = frame.submissions.entry(queue).or_default();
        submission.command_buffers.push(raw);
        for &(sem, stage) in wait_semaphores {
            submission.wait_semaphores.push(sem);
            submission.wait_stages.push(stage);
        }
        submission.signal_semaphores.extend_from_slice(out_semaphores);
        frame.free_command_buffers.entry(queue).or_default();
        Ok(())
    }

    /// A specialization of `submit` for staging/upload work: always goes to
    /// the Transfer queue, and when `flush` is set, returns a freshly
    /// signalled semaphore other queues can wait on this frame.
    pub fn submit_staging(
        &self,
        cmd: CommandBuffer,
        flush: bool,
    ) -> Result<Option<vk::Semaphore>, Error> {
        let mut state = self.state.lock();
        if !flush {
            self.submit_no_lock(&mut state, QueueKind::Transfer, cmd, &[], &[])?;
            return Ok(None);
        }

        let sem = Semaphore::new(&self.raw)?;
        let raw = sem.raw();
        self.submit_no_lock(&mut state, QueueKind::Transfer, cmd, &[], &[raw])?;
        // Retained until this frame slot recycles, by which point every
        // queue that could have waited on it has long since finished.
        self.current_frame(&mut state)
            .destroy_queue
            .push(PendingDestroy::Semaphore(sem));
        Ok(Some(raw))
    }

    /// Marks the current frame as having produced the backbuffer, so
    /// `end_frame` attaches the swapchain release semaphore to whichever
    /// queue's submission runs last.
    pub fn mark_swapchain_touched(&self) {
        let mut state = self.state.lock();
        self.current_frame(&mut state).swapchain_touched = true;
    }

    pub fn bind_acquire_semaphore(&self, semaphore: Semaphore, image_index: u32) {
        let mut state = self.state.lock();
        state.current_acquire_semaphore = Some(semaphore);
        state.current_swapchain_image_index = Some(image_index);
    }

    /// Detaches this frame's release semaphore for the presenter to wait
    /// on. Returns `None` if the swapchain was never touched this frame.
    pub fn consume_release_semaphore(&self) -> Option<vk::Semaphore> {
        let mut state = self.state.lock();
        state.current_release_semaphore.take().map(|mut s| {
            s.consume();
            s.raw()
        })
    }

    /// Performs the per-queue `vkQueueSubmit`s in dependency order
    /// (Transfer → Compute → Graphics), attaching timeline signals and, on
    /// whichever queue touched the swapchain, the release semaphore.
    pub fn end_frame(&self) -> Result<(), Error> {
        let mut state = self.state.lock();
        self.end_frame_no_lock(&mut state)
    }

    fn end_frame_no_lock(&self, state: &mut DeviceState) -> Result<(), Error> {
        let acquire = state.current_acquire_semaphore.take();
        let touched_swapchain = self.current_frame(state).swapchain_touched;

        let release_semaphore = if touched_swapchain {
            Some(Semaphore::new(&self.raw)?.with_foreign_queue(false))
        } else {
            None
        };

        const ORDER: [QueueKind; 3] = [QueueKind::Transfer, QueueKind::Compute, QueueKind::Graphics];
        let frame_index = state.frame_cursor;
        let frame_fence = state.frames[frame_index].fence.raw();

        for (step, &queue) in ORDER.iter().enumerate() {
            let is_last = step == ORDER.len() - 1;
            let timeline_value = {
                let timeline = state.timelines.get_mut(&queue).unwrap();
                timeline.reserve_signal_value()
            };

            let frame = &mut state.frames[frame_index];
            let Some(mut submission) = frame.submissions.remove(&queue) else {
                continue;
            };

            let mut wait_semaphores = std::mem::take(&mut submission.wait_semaphores);
            let mut wait_stages = std::mem::take(&mut submission.wait_stages);
            if is_last {
                if let Some(acquire) = &acquire {
                    wait_semaphores.push(acquire.raw());
                    wait_stages.push(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT);
                }
            }

            let timeline_semaphore_raw = state.timelines[&queue].raw();
            let mut signal_semaphores = submission.signal_semaphores.clone();
            signal_semaphores.push(timeline_semaphore_raw);
            let mut signal_values = vec![0u64; signal_semaphores.len() - 1];
            signal_values.push(timeline_value);

            if is_last {
                if let Some(release) = &release_semaphore {
                    signal_semaphores.push(release.raw());
                    signal_values.push(0);
                }
            }

            let wait_values = vec![0u64; wait_semaphores.len()];
            let mut timeline_info = vk::TimelineSemaphoreSubmitInfo::builder()
                .wait_semaphore_values(&wait_values)
                .signal_semaphore_values(&signal_values);

            let submit_info = vk::SubmitInfo::builder()
                .command_buffers(&submission.command_buffers)
                .wait_semaphores(&wait_semaphores)
                .wait_dst_stage_mask(&wait_stages)
                .signal_semaphores(&signal_semaphores)
                .push_next(&mut timeline_info);

            let fence = if is_last { frame_fence } else { vk::Fence::null() };
            unsafe {
                self.raw
                    .queue_submit(self.queues[&queue], &[submit_info.build()], fence)
                    .map_err(Error::from)?
            };
        }

        state.current_release_semaphore = release_semaphore;
        Ok(())
    }

    // ---- object creation ---------------------------------------------

    pub fn create_buffer(&self, desc: BufferDesc) -> Result<Handle<Buffer>, Error> {
        let mut state = self.state.lock();
        let buffer = self.create_buffer_no_lock(desc)?;
        Ok(state.buffers.insert(buffer))
    }

    fn create_buffer_no_lock(&self, desc: BufferDesc) -> Result<Buffer, Error> {
        let info = vk::BufferCreateInfo::builder().size(desc.size).usage(desc.usage);
        let raw = unsafe { self.raw.create_buffer(&info, None).map_err(Error::from)? };
        let requirements = unsafe { self.raw.get_buffer_memory_requirements(raw) };

        let block = unsafe {
            self.allocator.lock().alloc(
                gpu_alloc_ash::AshMemoryDevice::wrap(&self.raw),
                gpu_alloc::Request {
                    size: requirements.size,
                    align_mask: requirements.alignment - 1,
                    usage: usage_for_domain(desc.domain),
                    memory_types: requirements.memory_type_bits,
                },
            )
        }
        .map_err(map_alloc_error)?;

        unsafe {
            self.raw
                .bind_buffer_memory(raw, *block.memory(), block.offset())
                .map_err(Error::from)?
        };

        let mapped_ptr = if matches!(
            desc.domain,
            MemoryDomain::Host | MemoryDomain::HostCoherent | MemoryDomain::LinkedDeviceHost
        ) {
            let ptr = unsafe {
                block
                    .map(gpu_alloc_ash::AshMemoryDevice::wrap(&self.raw), 0, desc.size as usize)
                    .map_err(map_alloc_error)?
            };
            Some(ptr)
        } else {
            None
        };

        let device_address = if desc.device_address {
            let info = vk::BufferDeviceAddressInfo::builder().buffer(raw);
            Some(unsafe { self.raw.get_buffer_device_address(&info) })
        } else {
            None
        };

        let cookie = self.cookies.next();
        Ok(Buffer::new(raw, block, desc, cookie, mapped_ptr, device_address))
    }

    pub fn create_image(&self, desc: ImageDesc) -> Result<Handle<Image>, Error> {
        let mut state = self.state.lock();
        let image = self.create_image_no_lock(desc)?;
        Ok(state.images.insert(image))
    }

    fn create_image_no_lock(&self, desc: ImageDesc) -> Result<Image, Error> {
        let view_type = if desc.array_layers > 1 {
            vk::ImageType::TYPE_2D
        } else {
            vk::ImageType::TYPE_2D
        };
        let info = vk::ImageCreateInfo::builder()
            .image_type(view_type)
            .format(desc.format)
            .extent(desc.extent)
            .mip_levels(desc.mip_levels)
            .array_layers(desc.array_layers)
            .samples(desc.samples)
            .usage(desc.usage)
            .flags(desc.flags)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .tiling(vk::ImageTiling::OPTIMAL);
        let raw = unsafe { self.raw.create_image(&info, None).map_err(Error::from)? };
        let requirements = unsafe { self.raw.get_image_memory_requirements(raw) };

        let block = unsafe {
            self.allocator.lock().alloc(
                gpu_alloc_ash::AshMemoryDevice::wrap(&self.raw),
                gpu_alloc::Request {
                    size: requirements.size,
                    align_mask: requirements.alignment - 1,
                    usage: gpu_alloc::UsageFlags::FAST_DEVICE_ACCESS,
                    memory_types: requirements.memory_type_bits,
                },
            )
        }
        .map_err(map_alloc_error)?;

        unsafe {
            self.raw
                .bind_image_memory(raw, *block.memory(), block.offset())
                .map_err(Error::from)?
        };

        let cookie = self.cookies.next();
        Ok(Image::new(raw, Some(block), desc, cookie))
    }

    pub fn create_image_view(
        &self,
        image: &Handle<Image>,
        aspect: ViewAspect,
        base_mip: u32,
        mip_count: u32,
        base_layer: u32,
        layer_count: u32,
    ) -> Result<Handle<ImageView>, Error> {
        let mut state = self.state.lock();
        let (raw_image, format) = {
            let image = state
                .images
                .get(image)
                .ok_or(Error::ResourceNotFound)?;
            (image.raw(), image.desc().format)
        };

        let aspect_mask = match aspect {
            ViewAspect::Color => vk::ImageAspectFlags::COLOR,
            ViewAspect::Depth => vk::ImageAspectFlags::DEPTH,
            ViewAspect::Stencil => vk::ImageAspectFlags::STENCIL,
            ViewAspect::DepthStencil => vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL,
        };
        let view_type = if layer_count > 1 {
            vk::ImageViewType::TYPE_2D_ARRAY
        } else {
            vk::ImageViewType::TYPE_2D
        };
        let range = vk::ImageSubresourceRange::builder()
            .aspect_mask(aspect_mask)
            .base_mip_level(base_mip)
            .level_count(mip_count)
            .base_array_layer(base_layer)
            .layer_count(layer_count)
            .build();
        let info = vk::ImageViewCreateInfo::builder()
            .image(raw_image)
            .view_type(view_type)
            .format(format)
            .subresource_range(range);
        let raw = unsafe { self.raw.create_image_view(&info, None).map_err(Error::from)? };
        let cookie = self.cookies.next();
        let view = ImageView::new(raw, format, view_type, aspect, base_mip, mip_count, base_layer, layer_count, cookie);
        Ok(state.image_views.insert(view))
    }

    /// Wraps a `VkImage` owned by a swapchain into the image pool without
    /// allocating or binding memory for it; `destroy_raw` is a no-op for
    /// [`ImageDomain::Swapchain`] images, so dropping the returned handle at
    /// recreate time only ever frees the pool slot, never the real image.
    pub fn register_swapchain_image(&self, raw: vk::Image, desc: ImageDesc) -> Handle<Image> {
        debug_assert_eq!(desc.domain, ImageDomain::Swapchain);
        let cookie = self.cookies.next();
        let mut state = self.state.lock();
        state.images.insert(Image::new(raw, None, desc, cookie))
    }

    /// Resolves a live image handle to its raw `VkImage` and creation
    /// descriptor, for collaborators (the render-graph executor) that need
    /// to build `vk::ImageMemoryBarrier2`s or attachment descriptions
    /// without owning the pool themselves.
    pub fn image_raw(&self, image: &Handle<Image>) -> Result<(vk::Image, ImageDesc), Error> {
        let state = self.state.lock();
        state
            .images
            .get(image)
            .map(|i| (i.raw(), i.desc()))
            .ok_or(Error::ResourceNotFound)
    }

    /// Raw view handle plus its cookie, used as the `FramebufferKey`
    /// attachment identity (§4.5).
    pub fn image_view_info(&self, view: &Handle<ImageView>) -> Result<(vk::ImageView, Cookie), Error> {
        let state = self.state.lock();
        state
            .image_views
            .get(view)
            .map(|v| (v.raw(), v.cookie()))
            .ok_or(Error::ResourceNotFound)
    }

    /// Looks up (or creates) the sampler matching `desc` through the
    /// sampler two-list cache (§4.4).
    pub fn get_or_create_sampler(&self, desc: SamplerDesc) -> Result<Arc<Sampler>, Error> {
        let state = self.state.lock();
        if let Some(existing) = state.sampler_cache.get_or_pending(&desc) {
            return Ok(existing);
        }
        drop(state);
        let cookie = self.cookies.next();
        let sampler = Sampler::new(&self.raw, desc, cookie)?;
        let state = self.state.lock();
        Ok(state.sampler_cache.insert(desc, sampler))
    }

    pub fn get_or_create_render_pass(&self, desc: RenderPassDesc) -> Result<Arc<RenderPass>, Error> {
        let mut state = self.state.lock();
        state.render_pass_cache.get_or_create(&self.raw, desc)
    }

    pub fn get_or_create_framebuffer(
        &self,
        render_pass: vk::RenderPass,
        key: FramebufferKey,
        views: &[vk::ImageView],
    ) -> Result<Arc<Framebuffer>, Error> {
        let mut state = self.state.lock();
        state.framebuffer_cache.get_or_create(&self.raw, render_pass, key, views)
    }

    /// One allocator per unique `(layout, stage_mask)` hash (§4.4).
    pub fn get_or_create_descriptor_allocator(
        &self,
        desc: DescriptorSetLayoutDesc,
    ) -> Result<Arc<DescriptorSetAllocator>, Error> {
        use std::hash::{Hash, Hasher};
        let mut hasher = fxhash::FxHasher64::default();
        desc.mask.hash(&mut hasher);
        desc.stage_mask.hash(&mut hasher);
        let hash = hasher.finish();

        let mut state = self.state.lock();
        if let Some(existing) = state.descriptor_allocators.get(&hash) {
            return Ok(existing.clone());
        }
        let allocator = Arc::new(DescriptorSetAllocator::new(
            &self.raw,
            desc,
            self.max_frames_in_flight,
        )?);
        state.descriptor_allocators.insert(hash, allocator.clone());
        Ok(allocator)
    }

    // ---- queries --------------------------------------------------------

    /// Resolves every timestamp query written `QUERY_RESULT_IN_FLIGHT`
    /// frames ago into nanoseconds, called from `next_frame` once the
    /// slot's fence has signalled (§4.3.1).
    fn read_query_results_no_lock(
        &self,
        state: &mut DeviceState,
        frame_index: usize,
    ) -> Result<(), Error> {
        let timestamp_period = self.context.device_info().timestamp_period;
        for pool in &state.frames[frame_index].query_pools {
            let _ = pool.resolve_all(&self.raw, timestamp_period)?;
        }
        Ok(())
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        let _ = self.wait_idle();
        let mut state = self.state.lock();

        for pending in state.buffers.drain_free_list() {
            unsafe { pending.destroy_raw(&self.raw) };
        }
        for pending in state.images.drain_free_list() {
            unsafe { pending.destroy_raw(&self.raw) };
        }
        for pending in state.image_views.drain_free_list() {
            unsafe { pending.destroy_raw(&self.raw) };
        }

        for allocator in state.descriptor_allocators.values() {
            unsafe { allocator.destroy(&self.raw) };
        }
        unsafe { state.render_pass_cache.destroy_all(&self.raw) };

        for timeline in state.timelines.values() {
            unsafe { timeline.destroy(&self.raw) };
        }
        for frame in &state.frames {
            unsafe { frame.destroy(&self.raw) };
        }

        unsafe { self.raw.destroy_device(None) };
    }
}
