//! Pipeline creation from SPIR-V.
//!
//! Pipelines carry no descriptor sets: per-draw data travels as push
//! constants and attachments use dynamic rendering, so a pipeline only needs
//! its attachment formats up front.

use std::ffi::CString;
use std::mem::offset_of;

use ash::vk;
use meridian_core::scene::Vertex;

use super::conversion::convert_texture_format;
use crate::error::GraphicsError;
use crate::graph::{ComputePipelineParams, GraphicsPipelineParams};

/// A created pipeline and what recording needs to know about it.
#[derive(Debug, Clone, Copy)]
pub(super) struct NativePipeline {
    pub pipeline: vk::Pipeline,
    pub layout: vk::PipelineLayout,
    pub bind_point: vk::PipelineBindPoint,
    pub push_constant_stages: vk::ShaderStageFlags,
    pub push_constant_size: u32,
}

fn create_shader_module(
    device: &ash::Device,
    spirv: &[u32],
) -> Result<vk::ShaderModule, GraphicsError> {
    if spirv.is_empty() {
        return Err(GraphicsError::PipelineCreationFailed(
            "empty SPIR-V module".to_string(),
        ));
    }
    let info = vk::ShaderModuleCreateInfo::default().code(spirv);
    unsafe { device.create_shader_module(&info, None) }.map_err(|e| {
        GraphicsError::PipelineCreationFailed(format!("Failed to create shader module: {e:?}"))
    })
}

fn entry_name(entry: &str) -> Result<CString, GraphicsError> {
    CString::new(entry).map_err(|e| {
        GraphicsError::InvalidParameter(format!("Invalid entry point name '{entry}': {e}"))
    })
}

fn create_layout(
    device: &ash::Device,
    stages: vk::ShaderStageFlags,
    push_constant_size: u32,
) -> Result<vk::PipelineLayout, GraphicsError> {
    let ranges = [vk::PushConstantRange {
        stage_flags: stages,
        offset: 0,
        size: push_constant_size,
    }];
    let ranges: &[vk::PushConstantRange] = if push_constant_size > 0 {
        &ranges
    } else {
        &[]
    };
    let info = vk::PipelineLayoutCreateInfo::default().push_constant_ranges(ranges);
    unsafe { device.create_pipeline_layout(&info, None) }.map_err(|e| {
        GraphicsError::PipelineCreationFailed(format!("Failed to create pipeline layout: {e:?}"))
    })
}

/// Attributes of the interleaved fat buffer vertex, in shader location order.
fn vertex_attributes() -> [vk::VertexInputAttributeDescription; 6] {
    let attribute = |location: u32, format: vk::Format, offset: usize| {
        vk::VertexInputAttributeDescription {
            location,
            binding: 0,
            format,
            offset: offset as u32,
        }
    };
    [
        attribute(0, vk::Format::R32G32B32_SFLOAT, offset_of!(Vertex, position)),
        attribute(1, vk::Format::R32G32B32_SFLOAT, offset_of!(Vertex, normal)),
        attribute(2, vk::Format::R32G32_SFLOAT, offset_of!(Vertex, uv)),
        attribute(3, vk::Format::R32G32B32A32_SFLOAT, offset_of!(Vertex, tangent)),
        attribute(4, vk::Format::R32G32B32A32_UINT, offset_of!(Vertex, joints)),
        attribute(5, vk::Format::R32G32B32A32_SFLOAT, offset_of!(Vertex, weights)),
    ]
}

pub(super) fn create_graphics_pipeline(
    device: &ash::Device,
    params: &GraphicsPipelineParams,
) -> Result<NativePipeline, GraphicsError> {
    let vertex_entry = entry_name(&params.vertex_entry)?;
    let fragment_entry = entry_name(&params.fragment_entry)?;

    let vertex_module = create_shader_module(device, &params.vertex_spirv)?;
    let fragment_module = match create_shader_module(device, &params.fragment_spirv) {
        Ok(module) => module,
        Err(e) => {
            unsafe { device.destroy_shader_module(vertex_module, None) };
            return Err(e);
        }
    };

    let push_constant_stages = vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT;
    let result = create_layout(device, push_constant_stages, params.push_constant_size)
        .and_then(|layout| {
            build_graphics_pipeline(
                device,
                params,
                layout,
                [
                    (vk::ShaderStageFlags::VERTEX, vertex_module, &vertex_entry),
                    (vk::ShaderStageFlags::FRAGMENT, fragment_module, &fragment_entry),
                ],
            )
            .inspect_err(|_| unsafe { device.destroy_pipeline_layout(layout, None) })
            .map(|pipeline| (pipeline, layout))
        });

    // Modules are baked into the pipeline and can go right away.
    unsafe {
        device.destroy_shader_module(vertex_module, None);
        device.destroy_shader_module(fragment_module, None);
    }

    let (pipeline, layout) = result?;
    Ok(NativePipeline {
        pipeline,
        layout,
        bind_point: vk::PipelineBindPoint::GRAPHICS,
        push_constant_stages,
        push_constant_size: params.push_constant_size,
    })
}

fn build_graphics_pipeline(
    device: &ash::Device,
    params: &GraphicsPipelineParams,
    layout: vk::PipelineLayout,
    stages: [(vk::ShaderStageFlags, vk::ShaderModule, &CString); 2],
) -> Result<vk::Pipeline, GraphicsError> {
    let shader_stages = stages.map(|(stage, module, entry)| {
        vk::PipelineShaderStageCreateInfo::default()
            .stage(stage)
            .module(module)
            .name(entry.as_c_str())
    });

    let bindings = [vk::VertexInputBindingDescription {
        binding: 0,
        stride: Vertex::SIZE as u32,
        input_rate: vk::VertexInputRate::VERTEX,
    }];
    let attributes = vertex_attributes();
    let vertex_input_state = if params.vertex_input {
        vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_binding_descriptions(&bindings)
            .vertex_attribute_descriptions(&attributes)
    } else {
        vk::PipelineVertexInputStateCreateInfo::default()
    };

    let input_assembly_state = vk::PipelineInputAssemblyStateCreateInfo::default()
        .topology(vk::PrimitiveTopology::TRIANGLE_LIST);

    let viewport_state = vk::PipelineViewportStateCreateInfo::default()
        .viewport_count(1)
        .scissor_count(1);

    let cull_mode = if params.cull_back_faces {
        vk::CullModeFlags::BACK
    } else {
        vk::CullModeFlags::NONE
    };
    let rasterization_state = vk::PipelineRasterizationStateCreateInfo::default()
        .polygon_mode(vk::PolygonMode::FILL)
        .line_width(1.0)
        .cull_mode(cull_mode)
        .front_face(vk::FrontFace::COUNTER_CLOCKWISE);

    let multisample_state = vk::PipelineMultisampleStateCreateInfo::default()
        .rasterization_samples(vk::SampleCountFlags::TYPE_1);

    let depth_stencil_state = vk::PipelineDepthStencilStateCreateInfo::default()
        .depth_test_enable(params.depth_test)
        .depth_write_enable(params.depth_write)
        .depth_compare_op(vk::CompareOp::LESS_OR_EQUAL);

    let blend_attachments: Vec<_> = params
        .color_formats
        .iter()
        .map(|_| {
            vk::PipelineColorBlendAttachmentState::default()
                .color_write_mask(vk::ColorComponentFlags::RGBA)
                .blend_enable(false)
        })
        .collect();
    let color_blend_state =
        vk::PipelineColorBlendStateCreateInfo::default().attachments(&blend_attachments);

    let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
    let dynamic_state = vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

    let color_formats: Vec<vk::Format> = params
        .color_formats
        .iter()
        .map(|format| convert_texture_format(*format))
        .collect();
    let depth_format = params
        .depth_format
        .map(convert_texture_format)
        .unwrap_or(vk::Format::UNDEFINED);
    let stencil_format = match params.depth_format {
        Some(format) if format.has_stencil() => depth_format,
        _ => vk::Format::UNDEFINED,
    };
    let mut rendering_info = vk::PipelineRenderingCreateInfo::default()
        .color_attachment_formats(&color_formats)
        .depth_attachment_format(depth_format)
        .stencil_attachment_format(stencil_format);

    let info = vk::GraphicsPipelineCreateInfo::default()
        .stages(&shader_stages)
        .vertex_input_state(&vertex_input_state)
        .input_assembly_state(&input_assembly_state)
        .viewport_state(&viewport_state)
        .rasterization_state(&rasterization_state)
        .multisample_state(&multisample_state)
        .depth_stencil_state(&depth_stencil_state)
        .color_blend_state(&color_blend_state)
        .dynamic_state(&dynamic_state)
        .layout(layout)
        .push_next(&mut rendering_info);

    let pipelines =
        unsafe { device.create_graphics_pipelines(vk::PipelineCache::null(), &[info], None) }
            .map_err(|(_, e)| {
                GraphicsError::PipelineCreationFailed(format!(
                    "Failed to create graphics pipeline: {e:?}"
                ))
            })?;
    pipelines.into_iter().next().ok_or_else(|| {
        GraphicsError::PipelineCreationFailed("driver returned no pipeline".to_string())
    })
}

pub(super) fn create_compute_pipeline(
    device: &ash::Device,
    params: &ComputePipelineParams,
) -> Result<NativePipeline, GraphicsError> {
    let entry = entry_name(&params.entry)?;
    let module = create_shader_module(device, &params.spirv)?;
    let push_constant_stages = vk::ShaderStageFlags::COMPUTE;

    let result = create_layout(device, push_constant_stages, params.push_constant_size)
        .and_then(|layout| {
            let stage = vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::COMPUTE)
                .module(module)
                .name(entry.as_c_str());
            let info = vk::ComputePipelineCreateInfo::default()
                .stage(stage)
                .layout(layout);
            let created = unsafe {
                device.create_compute_pipelines(vk::PipelineCache::null(), &[info], None)
            }
            .map_err(|(_, e)| {
                GraphicsError::PipelineCreationFailed(format!(
                    "Failed to create compute pipeline: {e:?}"
                ))
            })
            .and_then(|pipelines| {
                pipelines.into_iter().next().ok_or_else(|| {
                    GraphicsError::PipelineCreationFailed("driver returned no pipeline".to_string())
                })
            });
            match created {
                Ok(pipeline) => Ok((pipeline, layout)),
                Err(e) => {
                    unsafe { device.destroy_pipeline_layout(layout, None) };
                    Err(e)
                }
            }
        });

    unsafe { device.destroy_shader_module(module, None) };

    let (pipeline, layout) = result?;
    Ok(NativePipeline {
        pipeline,
        layout,
        bind_point: vk::PipelineBindPoint::COMPUTE,
        push_constant_stages,
        push_constant_size: params.push_constant_size,
    })
}
