use ash::vk;

use super::bake::bake;
use super::pass::{AccessKind, Queue, RenderGraphBuilder};
use super::resource::SizeClass;

fn swapchain_relative() -> SizeClass {
    SizeClass::SwapchainRelative { scale_x: 1.0, scale_y: 1.0 }
}

#[test]
fn triangle_bakes_to_a_single_physical_pass() {
    let mut graph = RenderGraphBuilder::new();
    graph.set_backbuffer_dimensions(1920, 1080);

    let pass = graph.add_pass("triangle", Queue::Graphics);
    let (_, pass) = pass
        .write_texture("color", swapchain_relative(), vk::Format::R8G8B8A8_SRGB, AccessKind::ColorOutput)
        .unwrap();
    pass.finish();
    graph.set_backbuffer_source("color");

    let baked = bake(&graph).expect("bake should succeed");

    assert_eq!(baked.physical_pass_count(), 1);
    assert_eq!(baked.swapchain_physical_pass, Some(0));
    let color_id = graph.resource_by_name("color").unwrap();
    let dims = &baked.dimensions[&color_id];
    assert_eq!((dims.width, dims.height), (1920, 1080));
}

#[test]
fn ping_pong_blur_separates_into_two_passes_with_one_barrier() {
    let mut graph = RenderGraphBuilder::new();
    graph.set_backbuffer_dimensions(1920, 1080);

    let horizontal = graph.add_pass("blur-h", Queue::Graphics);
    let (_, horizontal) = horizontal
        .write_texture("blur_h", swapchain_relative(), vk::Format::R8G8B8A8_UNORM, AccessKind::ColorOutput)
        .unwrap();
    horizontal.finish();

    let vertical = graph.add_pass("blur-v", Queue::Graphics);
    let vertical = vertical.read_texture("blur_h", AccessKind::Input).unwrap();
    let (_, vertical) = vertical
        .write_texture("color", swapchain_relative(), vk::Format::R8G8B8A8_SRGB, AccessKind::ColorOutput)
        .unwrap();
    vertical.finish();
    graph.set_backbuffer_source("color");

    let baked = bake(&graph).expect("bake should succeed");

    assert_eq!(baked.physical_pass_count(), 2);
    assert_eq!(baked.barriers().count(), 1);
    assert_eq!(baked.semaphores().count(), 0);
}

#[test]
fn async_compute_producer_forces_a_semaphore_handoff() {
    let mut graph = RenderGraphBuilder::new();
    graph.set_backbuffer_dimensions(1920, 1080);

    let luminance = graph.add_pass("luminance", Queue::AsyncCompute);
    let (_, luminance) = luminance
        .write_texture("lum", swapchain_relative(), vk::Format::R16_SFLOAT, AccessKind::StorageTexture)
        .unwrap();
    luminance.finish();

    let tonemap = graph.add_pass("tonemap", Queue::Graphics);
    let tonemap = tonemap.read_texture("lum", AccessKind::Input).unwrap();
    let (_, tonemap) = tonemap
        .write_texture("color", swapchain_relative(), vk::Format::R8G8B8A8_SRGB, AccessKind::ColorOutput)
        .unwrap();
    tonemap.finish();
    graph.set_backbuffer_source("color");

    let baked = bake(&graph).expect("bake should succeed");

    assert_eq!(baked.semaphores().count(), 1);
    assert_eq!(baked.barriers().count(), 0);
}

#[test]
fn non_overlapping_attachments_alias_into_few_physical_allocations() {
    let mut graph = RenderGraphBuilder::new();
    graph.set_backbuffer_dimensions(1920, 1080);

    for i in 0..4 {
        let pass = graph.add_pass(&format!("pass-{i}"), Queue::Graphics);
        let (_, pass) = pass
            .write_texture(
                &format!("att{i}"),
                SizeClass::Absolute { width: 512, height: 512, depth: 1 },
                vk::Format::R8G8B8A8_UNORM,
                AccessKind::ColorOutput,
            )
            .unwrap();
        pass.finish();
    }

    let baked = bake(&graph).expect("bake should succeed");

    assert_eq!(baked.physical_pass_count(), 4);
    assert!(baked.physical_allocation_count() <= 2);
}

#[test]
fn history_read_gets_its_own_physical_slot() {
    let mut graph = RenderGraphBuilder::new();
    graph.set_backbuffer_dimensions(1920, 1080);

    let accumulate = graph.add_pass("accumulate", Queue::Graphics);
    let (_, accumulate) = accumulate
        .write_texture("tonemap", swapchain_relative(), vk::Format::R16G16B16A16_SFLOAT, AccessKind::ColorOutput)
        .unwrap();
    accumulate.finish();

    let resolve = graph.add_pass("resolve", Queue::Graphics);
    let resolve = resolve.read_history("tonemap").unwrap();
    let (_, resolve) = resolve
        .write_texture("color", swapchain_relative(), vk::Format::R8G8B8A8_SRGB, AccessKind::ColorOutput)
        .unwrap();
    resolve.finish();
    graph.set_backbuffer_source("color");

    let baked = bake(&graph).expect("bake should succeed");

    let tonemap_id = graph.resource_by_name("tonemap").unwrap();
    assert!(baked.aliasing.contains_key(&tonemap_id));
    assert!(baked.history_aliasing.contains_key(&tonemap_id));
    assert_ne!(baked.aliasing[&tonemap_id], baked.history_aliasing[&tonemap_id]);
}

#[test]
fn swapchain_relative_resources_rescale_after_recreate() {
    let mut graph = RenderGraphBuilder::new();
    graph.set_backbuffer_dimensions(1920, 1080);
    let pass = graph.add_pass("triangle", Queue::Graphics);
    let (_, pass) = pass
        .write_texture("color", swapchain_relative(), vk::Format::R8G8B8A8_SRGB, AccessKind::ColorOutput)
        .unwrap();
    pass.finish();
    graph.set_backbuffer_source("color");

    let first = bake(&graph).expect("bake should succeed");
    let color_id = graph.resource_by_name("color").unwrap();
    assert_eq!(
        (first.dimensions[&color_id].width, first.dimensions[&color_id].height),
        (1920, 1080)
    );

    graph.set_backbuffer_dimensions(2560, 1440);
    let second = bake(&graph).expect("re-bake after recreate should succeed");
    assert_eq!(
        (second.dimensions[&color_id].width, second.dimensions[&color_id].height),
        (2560, 1440)
    );
}
