//! Smoke test for the render-graph executor: opens a window, builds a
//! one-pass graph that writes the backbuffer, and bakes + executes it every
//! frame through the full `Context` -> `Device` -> `Swapchain` ->
//! `RenderGraphBuilder` -> `GraphExecutor` stack. No geometry or shaders;
//! that's the pipeline/descriptor system's job, not the executor's.

use std::ffi::CStr;
use std::sync::Arc;

use ash::vk;
use raw_window_handle::{HasRawDisplayHandle, HasRawWindowHandle};
use vkforge::context::{Context, QueueKind};
use vkforge::device::Device;
use vkforge::graph::{AccessKind, BakedGraph, GraphExecutor, Queue, RenderGraphBuilder, RenderPassInterface};
use vkforge::scheduler::{Pool, TaskComposer};
use vkforge::swapchain::{AcquireOutcome, Swapchain};
use vkforge::{GfxConfig, Result};
use winit::event::{Event, WindowEvent};
use winit::event_loop::{ControlFlow, EventLoop};
use winit::window::WindowBuilder;

struct ClearPass {
    color: [f32; 4],
}

impl RenderPassInterface for ClearPass {
    fn clear_values(&self) -> Vec<vk::ClearValue> {
        vec![vk::ClearValue { color: vk::ClearColorValue { float32: self.color } }]
    }

    fn build_commands(&self, _cmd: &mut vkforge::command_buffer::CommandBuffer) {}
}

fn build_graph(width: u32, height: u32, color: [f32; 4]) -> (RenderGraphBuilder, BakedGraph) {
    let mut graph = RenderGraphBuilder::new();
    graph.set_backbuffer_dimensions(width, height);

    let pass = graph.add_pass("clear", Queue::Graphics);
    let (_, pass) = pass
        .write_texture(
            "color",
            vkforge::graph::SizeClass::SwapchainRelative { scale_x: 1.0, scale_y: 1.0 },
            vk::Format::B8G8R8A8_SRGB,
            AccessKind::ColorOutput,
        )
        .expect("declaring the backbuffer output should not fail");
    pass.set_build_callback(Arc::new(ClearPass { color })).finish();
    graph.set_backbuffer_source("color");

    let baked = vkforge::graph::bake(&graph).expect("a single clear pass always bakes");
    (graph, baked)
}

fn main() -> Result<()> {
    pretty_env_logger::init();

    let event_loop = EventLoop::new();
    let window = WindowBuilder::new()
        .with_title("vkforge clear-screen demo")
        .with_inner_size(winit::dpi::LogicalSize::new(1280, 720))
        .build(&event_loop)
        .expect("failed to create window");

    let required_extensions = ash_window::enumerate_required_extensions(window.raw_display_handle())
        .expect("failed to enumerate required surface extensions");
    let required_extensions: Vec<&CStr> = required_extensions
        .iter()
        .map(|&ptr| unsafe { CStr::from_ptr(ptr) })
        .collect();

    let context = Context::new(&required_extensions, GfxConfig::default())?;
    let device = Device::new(context)?;
    let mut swapchain = Swapchain::new(&device, &window, 1280, 720)?;
    let mut executor = GraphExecutor::new();
    let composer = TaskComposer::new(Pool::new());

    let mut color = [0.02, 0.02, 0.05, 1.0];
    let mut needs_rebuild = false;

    event_loop.run(move |event, _, control_flow| {
        *control_flow = ControlFlow::Poll;

        match event {
            Event::WindowEvent { event: WindowEvent::CloseRequested, .. } => {
                *control_flow = ControlFlow::Exit;
            }
            Event::WindowEvent { event: WindowEvent::Resized(size), .. } => {
                if size.width > 0 && size.height > 0 {
                    needs_rebuild = true;
                }
            }
            Event::MainEventsCleared => {
                if needs_rebuild {
                    let size = window.inner_size();
                    swapchain.rebuild(&device, size.width, size.height).expect("swapchain rebuild failed");
                    needs_rebuild = false;
                }

                device.next_frame().expect("next_frame failed");

                match swapchain.acquire(&device).expect("acquire failed") {
                    AcquireOutcome::Acquired { image_index, acquire_semaphore } => {
                        device.bind_acquire_semaphore(acquire_semaphore, image_index);

                        let extent = swapchain.extent();
                        color[0] = (color[0] + 0.001) % 1.0;
                        let (graph, baked) = build_graph(extent.width, extent.height, color);

                        executor
                            .execute(
                                &device,
                                &graph,
                                &baked,
                                &composer,
                                Some((swapchain.image_view(image_index), extent)),
                            )
                            .expect("graph execution failed");

                        device.end_frame().expect("end_frame failed");

                        if let Some(release) = device.consume_release_semaphore() {
                            let present_queue = device.queue(QueueKind::Present);
                            let needs_recreate = swapchain
                                .present(present_queue, image_index, release)
                                .expect("present failed");
                            if needs_recreate {
                                needs_rebuild = true;
                            }
                        }
                    }
                    AcquireOutcome::NeedsRecreate => {
                        needs_rebuild = true;
                    }
                }
            }
            Event::LoopDestroyed => {
                device.wait_idle().ok();
                executor.destroy(&device);
            }
            _ => {}
        }
    });
}
