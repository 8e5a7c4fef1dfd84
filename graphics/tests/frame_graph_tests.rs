//! Frame graph ordering, barriers and resource lifetime through the public API.

mod common;

use std::cell::RefCell;
use std::rc::Rc;

use common::Backend;
use meridian_graphics::RenderContext;
use meridian_graphics::backend::{RecordedCommand, RecordingContext};
use meridian_graphics::graph::{
    BufferCreateParams, GraphicsPipelineParams, ImageCreateParams, PipelineCreateParams,
    RenderPassInfo, ResourceType, ResourceUsage,
};
use meridian_graphics::types::{Barrier, BarrierTarget};
use meridian_graphics::{
    Access, Extent3d, FrameGraph, GraphError, ImageLayout, PipelineStage, TextureFormat,
};
use rstest::rstest;

fn particles_writer() -> RenderPassInfo {
    RenderPassInfo::new("simulate").with_usage(
        ResourceUsage::write("particles", PipelineStage::COMPUTE, ResourceType::Ssbo)
            .with_create(BufferCreateParams::new(4096)),
    )
}

fn particles_reader(name: &str, stage: PipelineStage, resource_type: ResourceType) -> RenderPassInfo {
    RenderPassInfo::new(name).with_usage(ResourceUsage::read("particles", stage, resource_type))
}

/// Register every pass with a closure that logs its name into `log`.
fn register_logged(graph: &mut FrameGraph, passes: Vec<RenderPassInfo>, log: &Rc<RefCell<Vec<String>>>) {
    for info in passes {
        let name = info.name.clone();
        graph.register_render_pass(info);
        let log = Rc::clone(log);
        graph.register_render_pass_exe(name, move |params| {
            log.borrow_mut().push(params.pass_name.to_string());
        });
    }
}

fn run_frame(graph: &mut FrameGraph, ctx: &mut dyn RenderContext) -> Result<(), GraphError> {
    let cmd = ctx.begin_frame().expect("begin_frame");
    let result = graph.execute(ctx, cmd, &[]);
    ctx.end_frame(cmd).expect("end_frame");
    result
}

#[rstest]
#[case::recording(Backend::Recording)]
#[case::vulkan(Backend::Vulkan)]
fn test_compute_writer_runs_before_readers(#[case] backend: Backend) {
    let Some(mut ctx) = backend.create_context() else {
        return;
    };
    let log = Rc::new(RefCell::new(Vec::new()));
    let mut graph = FrameGraph::new();
    register_logged(
        &mut graph,
        vec![
            particles_writer(),
            particles_reader("draw_particles", PipelineStage::VERTEX_INPUT, ResourceType::VertexBuffer),
            particles_reader("count_particles", PipelineStage::COMPUTE, ResourceType::Ssbo),
            particles_reader("draw_trails", PipelineStage::VERTEX_INPUT, ResourceType::VertexBuffer),
        ],
        &log,
    );

    run_frame(&mut graph, ctx.as_mut()).unwrap();
    assert_eq!(
        *log.borrow(),
        vec!["simulate", "draw_particles", "count_particles", "draw_trails"]
    );

    let compiled = graph.compiled().expect("compiled graph");
    let writer = compiled.position_of("simulate").unwrap();
    for reader in ["draw_particles", "count_particles", "draw_trails"] {
        assert!(writer < compiled.position_of(reader).unwrap());
    }
    assert!(compiled.barriers_for("simulate").is_empty());
    assert!(!compiled.barriers_for("draw_particles").is_empty());
    assert!(!compiled.barriers_for("count_particles").is_empty());
    // Vertex input already waited on the write.
    assert!(compiled.barriers_for("draw_trails").is_empty());

    graph.destroy(ctx.as_mut());
}

#[rstest]
#[case::recording(Backend::Recording)]
#[case::vulkan(Backend::Vulkan)]
fn test_registration_order_breaks_ties(#[case] backend: Backend) {
    let Some(mut ctx) = backend.create_context() else {
        return;
    };
    let log = Rc::new(RefCell::new(Vec::new()));
    let mut graph = FrameGraph::new();
    register_logged(
        &mut graph,
        ["zeta", "alpha", "mid"]
            .into_iter()
            .map(RenderPassInfo::new)
            .collect(),
        &log,
    );

    for _ in 0..3 {
        run_frame(&mut graph, ctx.as_mut()).unwrap();
    }
    let expected: Vec<String> = ["zeta", "alpha", "mid"].repeat(3).into_iter().map(String::from).collect();
    assert_eq!(*log.borrow(), expected);
    graph.destroy(ctx.as_mut());
}

#[rstest]
#[case::recording(Backend::Recording)]
#[case::vulkan(Backend::Vulkan)]
fn test_swapchain_images_follow_resize(#[case] backend: Backend) {
    let Some(mut ctx) = backend.create_context() else {
        return;
    };
    let mut graph = FrameGraph::new();
    graph.register_render_pass(
        RenderPassInfo::new("bloom").with_usage(
            ResourceUsage::write("bloom_half", PipelineStage::COMPUTE, ResourceType::ImageStorage)
                .with_create(ImageCreateParams::swapchain_scaled(TextureFormat::Rgba16Float, 0.5)),
        ),
    );
    graph.register_render_pass_exe("bloom", |_| {});

    ctx.set_swapchain_extent(Extent3d::new_2d(800, 600));
    graph.resize(Extent3d::new_2d(800, 600));
    run_frame(&mut graph, ctx.as_mut()).unwrap();
    let extent = graph.vault().get("bloom_half").and_then(|r| r.extent());
    assert_eq!(extent, Some(Extent3d::new_2d(400, 300)));

    ctx.set_swapchain_extent(Extent3d::new_2d(1920, 1080));
    graph.resize(Extent3d::new_2d(1920, 1080));
    run_frame(&mut graph, ctx.as_mut()).unwrap();
    let extent = graph.vault().get("bloom_half").and_then(|r| r.extent());
    assert_eq!(extent, Some(Extent3d::new_2d(960, 540)));

    graph.destroy(ctx.as_mut());
}

#[test]
fn test_cycle_fails_without_executing() {
    let mut ctx = RecordingContext::new();
    let log = Rc::new(RefCell::new(Vec::new()));
    let mut graph = FrameGraph::new();
    register_logged(
        &mut graph,
        vec![RenderPassInfo::new("a"), RenderPassInfo::new("b")],
        &log,
    );
    graph.add_dependency("a", "b");
    graph.add_dependency("b", "a");

    assert!(matches!(
        run_frame(&mut graph, &mut ctx),
        Err(GraphError::CyclicDependency)
    ));
    assert!(log.borrow().is_empty());
}

#[test]
fn test_forward_pass_draws_inside_rendering_scope() {
    let mut ctx = RecordingContext::new();
    let mut graph = FrameGraph::new();
    graph.register_render_pass(
        RenderPassInfo::new("forward")
            .with_usage(
                ResourceUsage::write("color", PipelineStage::COLOR_ATTACHMENT, ResourceType::ColorAttachment)
                    .with_create(ImageCreateParams::swapchain(TextureFormat::Rgba8Unorm)),
            )
            .with_pipeline(PipelineCreateParams::Graphics(
                GraphicsPipelineParams::new(vec![0x0723_0203], vec![0x0723_0203])
                    .with_color_format(TextureFormat::Rgba8Unorm),
            )),
    );
    graph.register_render_pass_exe("forward", |params| {
        if let Some(pipeline) = params.pipeline {
            params.ctx.bind_pipeline(params.cmd, pipeline);
        }
    });
    graph.register_render_pass(
        RenderPassInfo::new("present_copy").with_usage(ResourceUsage::read(
            "color",
            PipelineStage::TRANSFER,
            ResourceType::TransferSrcImage,
        )),
    );
    graph.register_render_pass_exe("present_copy", |_| {});

    ctx.set_swapchain_extent(Extent3d::new_2d(320, 240));
    run_frame(&mut graph, &mut ctx).unwrap();

    let commands = &ctx.last_submission().unwrap().commands;
    let begin = commands
        .iter()
        .position(|c| matches!(c, RecordedCommand::BeginRendering(_)))
        .expect("rendering scope");
    let bind = commands
        .iter()
        .position(|c| matches!(c, RecordedCommand::BindPipeline(_)))
        .unwrap();
    let end = commands
        .iter()
        .position(|c| matches!(c, RecordedCommand::EndRendering))
        .unwrap();
    assert!(begin < bind && bind < end);

    let RecordedCommand::BeginRendering(targets) = &commands[begin] else {
        unreachable!();
    };
    assert_eq!(targets.extent, Extent3d::new_2d(320, 240));
    // The copy pass transitions the attachment after the scope closes.
    assert!(matches!(commands[end + 1], RecordedCommand::Barriers(_)));
    graph.destroy(&mut ctx);
}

fn recorded_barriers(ctx: &RecordingContext) -> Vec<Vec<Barrier>> {
    ctx.last_submission()
        .unwrap()
        .commands
        .iter()
        .filter_map(|c| match c {
            RecordedCommand::Barriers(b) => Some(b.clone()),
            _ => None,
        })
        .collect()
}

#[rstest]
#[case::double_buffered(2)]
#[case::triple_buffered(3)]
fn test_shared_buffer_rewrite_waits_on_previous_frame(#[case] frames_in_flight: usize) {
    let mut ctx = RecordingContext::new().with_frames_in_flight(frames_in_flight);
    let log = Rc::new(RefCell::new(Vec::new()));
    let mut graph = FrameGraph::new();
    register_logged(
        &mut graph,
        vec![
            particles_writer(),
            particles_reader("shade", PipelineStage::FRAGMENT_SHADER, ResourceType::Ssbo),
        ],
        &log,
    );

    run_frame(&mut graph, &mut ctx).unwrap();
    assert_eq!(recorded_barriers(&ctx).len(), 1);

    for _ in 0..frames_in_flight {
        run_frame(&mut graph, &mut ctx).unwrap();
        let barriers = recorded_barriers(&ctx);
        assert_eq!(barriers.len(), 2);

        // Recorded ahead of the writer: last frame's write and read must drain.
        let entry = barriers[0][0];
        assert_eq!(entry.src_access, Access::WRITE);
        assert_eq!(
            entry.src_stage,
            PipelineStage::COMPUTE | PipelineStage::FRAGMENT_SHADER
        );
        assert_eq!(entry.dst_access, Access::WRITE);
        assert_eq!(entry.dst_stage, PipelineStage::COMPUTE);
    }
    graph.destroy(&mut ctx);
}

#[test]
fn test_storage_image_rewrite_keeps_layout_and_waits() {
    let mut ctx = RecordingContext::new();
    let mut graph = FrameGraph::new();
    graph.register_render_pass(RenderPassInfo::new("blur").with_usage(
        ResourceUsage::write("scratch", PipelineStage::COMPUTE, ResourceType::ImageStorage)
            .with_create(ImageCreateParams::absolute(32, 32, TextureFormat::Rgba8Unorm)),
    ));
    graph.register_render_pass_exe("blur", |_| {});

    run_frame(&mut graph, &mut ctx).unwrap();
    let first = recorded_barriers(&ctx);
    assert_eq!(first.len(), 1);
    assert!(first[0][0].src_stage.is_empty());

    // Same layout both frames, yet the second write still waits on the first.
    run_frame(&mut graph, &mut ctx).unwrap();
    let second = recorded_barriers(&ctx);
    assert_eq!(second.len(), 1);
    let barrier = second[0][0];
    assert_eq!(barrier.src_access, Access::WRITE);
    assert_eq!(barrier.src_stage, PipelineStage::COMPUTE);
    assert!(matches!(
        barrier.target,
        BarrierTarget::Image {
            old_layout: ImageLayout::General,
            new_layout: ImageLayout::General,
            ..
        }
    ));
}
