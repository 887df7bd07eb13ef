// SPDX-License-Identifier: CEPL-1.0
//! Everything whose lifetime is one swapchain generation.

use std::io::Cursor;
use std::mem::{offset_of, size_of};

use ash::util::read_spv;
use ash::vk;
use lodge_assets::ModelVertex;
use lodge_math::CameraUniform;
use lodge_render::{FrameError, PresentPreference, RenderSize};
use tracing::debug;

use crate::context::DeviceContext;
use crate::error::VkResultExt;
use crate::frames::FrameResourcePool;
use crate::memory::{GpuBuffer, GpuImage};
use crate::model::GpuModel;
use crate::swapchain::SwapchainGeneration;

pub struct SwapchainResources {
    pub generation: SwapchainGeneration,
    pub render_pass: vk::RenderPass,
    pub pipeline_layout: vk::PipelineLayout,
    pub pipeline: vk::Pipeline,
    pub depth: Option<GpuImage>,
    /// One per swapchain image.
    pub framebuffers: Vec<vk::Framebuffer>,
    /// One per swapchain image, host-visible.
    pub uniforms: Vec<GpuBuffer>,
    pub descriptor_pool: vk::DescriptorPool,
    /// One per swapchain image.
    pub descriptor_sets: Vec<vk::DescriptorSet>,
    /// One per swapchain image. Signaled by the submit that draws the image,
    /// waited by its present.
    pub render_complete: Vec<vk::Semaphore>,
}

/// Binding 0: camera block (vertex). Binding 1: model texture (fragment).
/// Outlives every swapchain generation.
pub unsafe fn create_set_layout(device: &ash::Device) -> Result<vk::DescriptorSetLayout, FrameError> {
    let bindings = [
        vk::DescriptorSetLayoutBinding {
            binding: 0,
            descriptor_type: vk::DescriptorType::UNIFORM_BUFFER,
            descriptor_count: 1,
            stage_flags: vk::ShaderStageFlags::VERTEX,
            ..Default::default()
        },
        vk::DescriptorSetLayoutBinding {
            binding: 1,
            descriptor_type: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            descriptor_count: 1,
            stage_flags: vk::ShaderStageFlags::FRAGMENT,
            ..Default::default()
        },
    ];
    let ci = vk::DescriptorSetLayoutCreateInfo {
        s_type: vk::StructureType::DESCRIPTOR_SET_LAYOUT_CREATE_INFO,
        binding_count: bindings.len() as u32,
        p_bindings: bindings.as_ptr(),
        ..Default::default()
    };
    device
        .create_descriptor_set_layout(&ci, None)
        .or_fatal("create_descriptor_set_layout")
}

impl SwapchainResources {
    /// Everything but the swapchain still null. Destroying this is a no-op
    /// apart from the generation.
    fn unbuilt(generation: SwapchainGeneration) -> Self {
        Self {
            generation,
            render_pass: vk::RenderPass::null(),
            pipeline_layout: vk::PipelineLayout::null(),
            pipeline: vk::Pipeline::null(),
            depth: None,
            framebuffers: Vec::new(),
            uniforms: Vec::new(),
            descriptor_pool: vk::DescriptorPool::null(),
            descriptor_sets: Vec::new(),
            render_complete: Vec::new(),
        }
    }

    /// On failure everything created so far is destroyed before returning.
    pub unsafe fn create(
        ctx: &DeviceContext,
        frames: &mut FrameResourcePool,
        set_layout: vk::DescriptorSetLayout,
        model: &GpuModel,
        want: RenderSize,
        pref: PresentPreference,
    ) -> Result<Self, FrameError> {
        let generation = SwapchainGeneration::create(ctx, want, pref)?;
        let mut res = Self::unbuilt(generation);
        if let Err(e) = res.build(ctx, frames, set_layout, model) {
            res.destroy(ctx, frames);
            return Err(e);
        }

        debug!(
            "swapchain resources: {} framebuffers, {} uniform buffers, depth {:?}, {:?}",
            res.framebuffers.len(),
            res.uniforms.len(),
            ctx.depth_format,
            res.generation.present_mode
        );
        Ok(res)
    }

    // STRICT ORDER (create):
    // 1) swapchain + image views (already in `generation`)
    // 2) render pass (color format from 1)
    // 3) pipeline layout + pipeline (viewport from 1)
    // 4) depth image
    // 5) framebuffers
    // 6) uniform buffers, descriptor pool, sets
    // 7) render-complete semaphores
    // 8) command buffers, image ownership table
    unsafe fn build(
        &mut self,
        ctx: &DeviceContext,
        frames: &mut FrameResourcePool,
        set_layout: vk::DescriptorSetLayout,
        model: &GpuModel,
    ) -> Result<(), FrameError> {
        let d = &ctx.device;
        let extent = self.generation.extent;
        let image_count = self.generation.image_count();

        self.render_pass = create_render_pass(d, self.generation.format.format, ctx.depth_format)?;
        let (pipeline_layout, pipeline) = create_pipeline(d, self.render_pass, extent, set_layout)?;
        self.pipeline_layout = pipeline_layout;
        self.pipeline = pipeline;
        let depth = self.depth.insert(GpuImage::new(
            ctx,
            extent,
            ctx.depth_format,
            vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            vk::ImageAspectFlags::DEPTH,
        )?);
        let depth_view = depth.view;

        self.framebuffers.reserve(image_count);
        for &view in &self.generation.views {
            let attachments = [view, depth_view];
            let fb_info = vk::FramebufferCreateInfo {
                s_type: vk::StructureType::FRAMEBUFFER_CREATE_INFO,
                render_pass: self.render_pass,
                attachment_count: attachments.len() as u32,
                p_attachments: attachments.as_ptr(),
                width: extent.width,
                height: extent.height,
                layers: 1,
                ..Default::default()
            };
            self.framebuffers
                .push(d.create_framebuffer(&fb_info, None).or_fatal("create_framebuffer")?);
        }

        self.uniforms.reserve(image_count);
        for _ in 0..image_count {
            self.uniforms.push(GpuBuffer::host_visible(
                ctx,
                size_of::<CameraUniform>() as vk::DeviceSize,
                vk::BufferUsageFlags::UNIFORM_BUFFER,
            )?);
        }
        let (descriptor_pool, descriptor_sets) =
            create_descriptor_sets(d, set_layout, &self.uniforms, model)?;
        self.descriptor_pool = descriptor_pool;
        self.descriptor_sets = descriptor_sets;

        let sem_ci = vk::SemaphoreCreateInfo {
            s_type: vk::StructureType::SEMAPHORE_CREATE_INFO,
            ..Default::default()
        };
        self.render_complete.reserve(image_count);
        for _ in 0..image_count {
            self.render_complete
                .push(d.create_semaphore(&sem_ci, None).or_fatal("create_semaphore")?);
        }

        frames.allocate_command_buffers(d)?;
        frames.track_images(image_count);
        Ok(())
    }

    pub fn extent(&self) -> RenderSize {
        RenderSize::new(self.generation.extent.width, self.generation.extent.height)
    }

    pub fn image_count(&self) -> usize {
        self.generation.image_count()
    }

    // STRICT ORDER (destroy), device idle:
    // framebuffers, depth, descriptor pool (frees sets) + uniforms,
    // render-complete semaphores, command buffers, pipeline, layout,
    // render pass, views, swapchain
    // Handles never built are null, which every destroy call accepts.
    pub unsafe fn destroy(self, ctx: &DeviceContext, frames: &mut FrameResourcePool) {
        let d = &ctx.device;
        for &fb in &self.framebuffers {
            d.destroy_framebuffer(fb, None);
        }
        if let Some(depth) = self.depth {
            depth.destroy(d);
        }
        d.destroy_descriptor_pool(self.descriptor_pool, None);
        for ubo in self.uniforms {
            ubo.destroy(d);
        }
        for &sem in &self.render_complete {
            d.destroy_semaphore(sem, None);
        }
        frames.free_command_buffers(d);
        d.destroy_pipeline(self.pipeline, None);
        d.destroy_pipeline_layout(self.pipeline_layout, None);
        d.destroy_render_pass(self.render_pass, None);
        self.generation.destroy(ctx);
    }
}

unsafe fn create_render_pass(
    device: &ash::Device,
    color_format: vk::Format,
    depth_format: vk::Format,
) -> Result<vk::RenderPass, FrameError> {
    let attachments = [
        vk::AttachmentDescription {
            format: color_format,
            samples: vk::SampleCountFlags::TYPE_1,
            load_op: vk::AttachmentLoadOp::CLEAR,
            store_op: vk::AttachmentStoreOp::STORE,
            stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
            stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
            initial_layout: vk::ImageLayout::UNDEFINED,
            final_layout: vk::ImageLayout::PRESENT_SRC_KHR,
            ..Default::default()
        },
        vk::AttachmentDescription {
            format: depth_format,
            samples: vk::SampleCountFlags::TYPE_1,
            load_op: vk::AttachmentLoadOp::CLEAR,
            store_op: vk::AttachmentStoreOp::DONT_CARE,
            stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
            stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
            initial_layout: vk::ImageLayout::UNDEFINED,
            final_layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            ..Default::default()
        },
    ];
    let color_ref = vk::AttachmentReference {
        attachment: 0,
        layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
    };
    let depth_ref = vk::AttachmentReference {
        attachment: 1,
        layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
    };
    let subpass = vk::SubpassDescription {
        pipeline_bind_point: vk::PipelineBindPoint::GRAPHICS,
        color_attachment_count: 1,
        p_color_attachments: &color_ref,
        p_depth_stencil_attachment: &depth_ref,
        ..Default::default()
    };
    let dependency = external_dependency();
    let ci = vk::RenderPassCreateInfo {
        s_type: vk::StructureType::RENDER_PASS_CREATE_INFO,
        attachment_count: attachments.len() as u32,
        p_attachments: attachments.as_ptr(),
        subpass_count: 1,
        p_subpasses: &subpass,
        dependency_count: 1,
        p_dependencies: &dependency,
        ..Default::default()
    };
    device
        .create_render_pass(&ci, None)
        .or_fatal("create_render_pass")
}

/// Holds attachment writes until the acquire semaphore has been waited, and
/// orders this frame's depth clear after the previous frame's depth writes:
/// every slot shares the one depth image.
fn external_dependency() -> vk::SubpassDependency {
    vk::SubpassDependency {
        src_subpass: vk::SUBPASS_EXTERNAL,
        dst_subpass: 0,
        src_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
            | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS
            | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS,
        src_access_mask: vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
        dst_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
            | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS
            | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS,
        dst_access_mask: vk::AccessFlags::COLOR_ATTACHMENT_WRITE
            | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
        ..Default::default()
    }
}

unsafe fn shader_module(device: &ash::Device, bytes: &[u8]) -> Result<vk::ShaderModule, FrameError> {
    let code = read_spv(&mut Cursor::new(bytes)).map_err(|e| FrameError::Api {
        call: "read_spv",
        detail: e.to_string(),
    })?;
    let ci = vk::ShaderModuleCreateInfo {
        s_type: vk::StructureType::SHADER_MODULE_CREATE_INFO,
        p_code: code.as_ptr(),
        code_size: code.len() * 4,
        ..Default::default()
    };
    device
        .create_shader_module(&ci, None)
        .or_fatal("create_shader_module")
}

fn vertex_attributes() -> [vk::VertexInputAttributeDescription; 3] {
    [
        vk::VertexInputAttributeDescription {
            location: 0,
            binding: 0,
            format: vk::Format::R32G32B32_SFLOAT,
            offset: offset_of!(ModelVertex, pos) as u32,
        },
        vk::VertexInputAttributeDescription {
            location: 1,
            binding: 0,
            format: vk::Format::R32G32B32_SFLOAT,
            offset: offset_of!(ModelVertex, color) as u32,
        },
        vk::VertexInputAttributeDescription {
            location: 2,
            binding: 0,
            format: vk::Format::R32G32_SFLOAT,
            offset: offset_of!(ModelVertex, uv) as u32,
        },
    ]
}

/// Full-surface viewport; the projection already flips Y.
fn full_viewport(extent: vk::Extent2D) -> (vk::Viewport, vk::Rect2D) {
    (
        vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        },
        vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent,
        },
    )
}

unsafe fn create_pipeline(
    device: &ash::Device,
    render_pass: vk::RenderPass,
    extent: vk::Extent2D,
    set_layout: vk::DescriptorSetLayout,
) -> Result<(vk::PipelineLayout, vk::Pipeline), FrameError> {
    // STRICT: viewport and render pass are baked in; rebuilt with every swapchain.
    let vs_bytes = include_bytes!(concat!(env!("OUT_DIR"), "/model.vert.spv"));
    let fs_bytes = include_bytes!(concat!(env!("OUT_DIR"), "/model.frag.spv"));
    let vs = shader_module(device, vs_bytes)?;
    let fs = match shader_module(device, fs_bytes) {
        Ok(m) => m,
        Err(e) => {
            device.destroy_shader_module(vs, None);
            return Err(e);
        }
    };

    let stages = [
        vk::PipelineShaderStageCreateInfo {
            s_type: vk::StructureType::PIPELINE_SHADER_STAGE_CREATE_INFO,
            stage: vk::ShaderStageFlags::VERTEX,
            module: vs,
            p_name: c"main".as_ptr(),
            ..Default::default()
        },
        vk::PipelineShaderStageCreateInfo {
            s_type: vk::StructureType::PIPELINE_SHADER_STAGE_CREATE_INFO,
            stage: vk::ShaderStageFlags::FRAGMENT,
            module: fs,
            p_name: c"main".as_ptr(),
            ..Default::default()
        },
    ];

    let vb = vk::VertexInputBindingDescription {
        binding: 0,
        stride: ModelVertex::STRIDE as u32,
        input_rate: vk::VertexInputRate::VERTEX,
    };
    let va = vertex_attributes();
    let vertex_input = vk::PipelineVertexInputStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_VERTEX_INPUT_STATE_CREATE_INFO,
        vertex_binding_description_count: 1,
        p_vertex_binding_descriptions: &vb,
        vertex_attribute_description_count: va.len() as u32,
        p_vertex_attribute_descriptions: va.as_ptr(),
        ..Default::default()
    };
    let input_assembly = vk::PipelineInputAssemblyStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_INPUT_ASSEMBLY_STATE_CREATE_INFO,
        topology: vk::PrimitiveTopology::TRIANGLE_LIST,
        ..Default::default()
    };
    let (viewport, scissor) = full_viewport(extent);
    let viewport_state = vk::PipelineViewportStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_VIEWPORT_STATE_CREATE_INFO,
        viewport_count: 1,
        p_viewports: &viewport,
        scissor_count: 1,
        p_scissors: &scissor,
        ..Default::default()
    };
    let raster = vk::PipelineRasterizationStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_RASTERIZATION_STATE_CREATE_INFO,
        polygon_mode: vk::PolygonMode::FILL,
        cull_mode: vk::CullModeFlags::BACK,
        front_face: vk::FrontFace::COUNTER_CLOCKWISE,
        line_width: 1.0,
        ..Default::default()
    };
    let multisample = vk::PipelineMultisampleStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_MULTISAMPLE_STATE_CREATE_INFO,
        rasterization_samples: vk::SampleCountFlags::TYPE_1,
        ..Default::default()
    };
    let depth_stencil = vk::PipelineDepthStencilStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_DEPTH_STENCIL_STATE_CREATE_INFO,
        depth_test_enable: vk::TRUE,
        depth_write_enable: vk::TRUE,
        depth_compare_op: vk::CompareOp::LESS,
        ..Default::default()
    };
    let color_blend_att = vk::PipelineColorBlendAttachmentState {
        color_write_mask: vk::ColorComponentFlags::RGBA,
        blend_enable: vk::FALSE,
        ..Default::default()
    };
    let color_blend = vk::PipelineColorBlendStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_COLOR_BLEND_STATE_CREATE_INFO,
        attachment_count: 1,
        p_attachments: &color_blend_att,
        ..Default::default()
    };

    let layout_info = vk::PipelineLayoutCreateInfo {
        s_type: vk::StructureType::PIPELINE_LAYOUT_CREATE_INFO,
        set_layout_count: 1,
        p_set_layouts: &set_layout,
        ..Default::default()
    };
    let layout = match device.create_pipeline_layout(&layout_info, None) {
        Ok(l) => l,
        Err(e) => {
            device.destroy_shader_module(vs, None);
            device.destroy_shader_module(fs, None);
            return Err(crate::error::classify("create_pipeline_layout", e));
        }
    };

    let pipeline_info = vk::GraphicsPipelineCreateInfo {
        s_type: vk::StructureType::GRAPHICS_PIPELINE_CREATE_INFO,
        stage_count: stages.len() as u32,
        p_stages: stages.as_ptr(),
        p_vertex_input_state: &vertex_input,
        p_input_assembly_state: &input_assembly,
        p_viewport_state: &viewport_state,
        p_rasterization_state: &raster,
        p_multisample_state: &multisample,
        p_depth_stencil_state: &depth_stencil,
        p_color_blend_state: &color_blend,
        layout,
        render_pass,
        subpass: 0,
        ..Default::default()
    };
    let created = device.create_graphics_pipelines(
        vk::PipelineCache::null(),
        std::slice::from_ref(&pipeline_info),
        None,
    );
    device.destroy_shader_module(vs, None);
    device.destroy_shader_module(fs, None);

    match created {
        Ok(pipelines) => Ok((layout, pipelines[0])),
        Err((_, err)) => {
            device.destroy_pipeline_layout(layout, None);
            Err(crate::error::classify("create_graphics_pipelines", err))
        }
    }
}

unsafe fn create_descriptor_sets(
    device: &ash::Device,
    set_layout: vk::DescriptorSetLayout,
    uniforms: &[GpuBuffer],
    model: &GpuModel,
) -> Result<(vk::DescriptorPool, Vec<vk::DescriptorSet>), FrameError> {
    let count = uniforms.len() as u32;
    let sizes = [
        vk::DescriptorPoolSize {
            ty: vk::DescriptorType::UNIFORM_BUFFER,
            descriptor_count: count,
        },
        vk::DescriptorPoolSize {
            ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            descriptor_count: count,
        },
    ];
    let pool_ci = vk::DescriptorPoolCreateInfo {
        s_type: vk::StructureType::DESCRIPTOR_POOL_CREATE_INFO,
        max_sets: count,
        pool_size_count: sizes.len() as u32,
        p_pool_sizes: sizes.as_ptr(),
        ..Default::default()
    };
    let pool = device
        .create_descriptor_pool(&pool_ci, None)
        .or_fatal("create_descriptor_pool")?;

    let layouts = vec![set_layout; uniforms.len()];
    let ai = vk::DescriptorSetAllocateInfo {
        s_type: vk::StructureType::DESCRIPTOR_SET_ALLOCATE_INFO,
        descriptor_pool: pool,
        descriptor_set_count: count,
        p_set_layouts: layouts.as_ptr(),
        ..Default::default()
    };
    let sets = match device.allocate_descriptor_sets(&ai) {
        Ok(s) => s,
        Err(e) => {
            device.destroy_descriptor_pool(pool, None);
            return Err(crate::error::classify("allocate_descriptor_sets", e));
        }
    };

    let image_info = vk::DescriptorImageInfo {
        sampler: model.sampler,
        image_view: model.texture.view,
        image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
    };
    for (&set, ubo) in sets.iter().zip(uniforms) {
        let buffer_info = vk::DescriptorBufferInfo {
            buffer: ubo.buffer,
            offset: 0,
            range: ubo.size,
        };
        let writes = [
            vk::WriteDescriptorSet {
                s_type: vk::StructureType::WRITE_DESCRIPTOR_SET,
                dst_set: set,
                dst_binding: 0,
                descriptor_count: 1,
                descriptor_type: vk::DescriptorType::UNIFORM_BUFFER,
                p_buffer_info: &buffer_info,
                ..Default::default()
            },
            vk::WriteDescriptorSet {
                s_type: vk::StructureType::WRITE_DESCRIPTOR_SET,
                dst_set: set,
                dst_binding: 1,
                descriptor_count: 1,
                descriptor_type: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                p_image_info: &image_info,
                ..Default::default()
            },
        ];
        device.update_descriptor_sets(&writes, &[]);
    }

    Ok((pool, sets))
}
