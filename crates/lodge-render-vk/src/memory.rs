// SPDX-License-Identifier: CEPL-1.0
//! Buffers, images and one-shot transfer commands.

use ash::vk;
use lodge_render::FrameError;

use crate::context::DeviceContext;
use crate::error::VkResultExt;

pub fn find_memory_type(
    props: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    req: vk::MemoryPropertyFlags,
) -> Option<u32> {
    (0..props.memory_type_count).find(|&i| {
        (type_bits & (1 << i)) != 0 && props.memory_types[i as usize].property_flags.contains(req)
    })
}

unsafe fn allocate(
    ctx: &DeviceContext,
    req: vk::MemoryRequirements,
    props: vk::MemoryPropertyFlags,
) -> Result<vk::DeviceMemory, FrameError> {
    let memory_type_index = find_memory_type(&ctx.memory_props, req.memory_type_bits, props)
        .ok_or(FrameError::AllocationFailure {
            call: "find_memory_type",
        })?;
    let mai = vk::MemoryAllocateInfo {
        s_type: vk::StructureType::MEMORY_ALLOCATE_INFO,
        allocation_size: req.size,
        memory_type_index,
        ..Default::default()
    };
    ctx.device.allocate_memory(&mai, None).or_fatal("allocate_memory")
}

/// A buffer with its own dedicated allocation.
pub struct GpuBuffer {
    pub buffer: vk::Buffer,
    pub memory: vk::DeviceMemory,
    pub size: vk::DeviceSize,
}

impl GpuBuffer {
    pub unsafe fn new(
        ctx: &DeviceContext,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        props: vk::MemoryPropertyFlags,
    ) -> Result<Self, FrameError> {
        let bci = vk::BufferCreateInfo {
            s_type: vk::StructureType::BUFFER_CREATE_INFO,
            size,
            usage,
            sharing_mode: vk::SharingMode::EXCLUSIVE,
            ..Default::default()
        };
        let d = &ctx.device;
        let buffer = d.create_buffer(&bci, None).or_fatal("create_buffer")?;
        let req = d.get_buffer_memory_requirements(buffer);
        let memory = match allocate(ctx, req, props) {
            Ok(m) => m,
            Err(e) => {
                d.destroy_buffer(buffer, None);
                return Err(e);
            }
        };
        let buf = Self {
            buffer,
            memory,
            size,
        };
        if let Err(e) = d
            .bind_buffer_memory(buffer, memory, 0)
            .or_fatal("bind_buffer_memory")
        {
            buf.destroy(d);
            return Err(e);
        }
        Ok(buf)
    }

    pub unsafe fn host_visible(
        ctx: &DeviceContext,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
    ) -> Result<Self, FrameError> {
        Self::new(
            ctx,
            size,
            usage,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )
    }

    /// Map, copy, unmap. Memory must be host-visible and coherent.
    pub unsafe fn write(&self, device: &ash::Device, bytes: &[u8]) -> Result<(), FrameError> {
        debug_assert!(bytes.len() as vk::DeviceSize <= self.size);
        let ptr = device
            .map_memory(self.memory, 0, self.size, vk::MemoryMapFlags::empty())
            .or_fatal("map_memory")?;
        std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr as *mut u8, bytes.len());
        device.unmap_memory(self.memory);
        Ok(())
    }

    pub unsafe fn destroy(self, device: &ash::Device) {
        device.destroy_buffer(self.buffer, None);
        device.free_memory(self.memory, None);
    }
}

/// 2D image, its memory and a single-mip view.
pub struct GpuImage {
    pub image: vk::Image,
    pub memory: vk::DeviceMemory,
    pub view: vk::ImageView,
}

impl GpuImage {
    pub unsafe fn new(
        ctx: &DeviceContext,
        extent: vk::Extent2D,
        format: vk::Format,
        usage: vk::ImageUsageFlags,
        aspect: vk::ImageAspectFlags,
    ) -> Result<Self, FrameError> {
        let d = &ctx.device;
        let img_ci = vk::ImageCreateInfo {
            s_type: vk::StructureType::IMAGE_CREATE_INFO,
            image_type: vk::ImageType::TYPE_2D,
            format,
            extent: vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            },
            mip_levels: 1,
            array_layers: 1,
            samples: vk::SampleCountFlags::TYPE_1,
            tiling: vk::ImageTiling::OPTIMAL,
            usage,
            sharing_mode: vk::SharingMode::EXCLUSIVE,
            initial_layout: vk::ImageLayout::UNDEFINED,
            ..Default::default()
        };
        let image = d.create_image(&img_ci, None).or_fatal("create_image")?;
        let req = d.get_image_memory_requirements(image);
        let memory = match allocate(ctx, req, vk::MemoryPropertyFlags::DEVICE_LOCAL) {
            Ok(m) => m,
            Err(e) => {
                d.destroy_image(image, None);
                return Err(e);
            }
        };
        let mut img = Self {
            image,
            memory,
            view: vk::ImageView::null(),
        };
        let bound = d
            .bind_image_memory(image, memory, 0)
            .or_fatal("bind_image_memory")
            .and_then(|()| create_view(d, image, format, aspect));
        match bound {
            Ok(view) => {
                img.view = view;
                Ok(img)
            }
            Err(e) => {
                img.destroy(d);
                Err(e)
            }
        }
    }

    pub unsafe fn destroy(self, device: &ash::Device) {
        device.destroy_image_view(self.view, None);
        device.destroy_image(self.image, None);
        device.free_memory(self.memory, None);
    }
}

pub unsafe fn create_view(
    device: &ash::Device,
    image: vk::Image,
    format: vk::Format,
    aspect: vk::ImageAspectFlags,
) -> Result<vk::ImageView, FrameError> {
    let view_ci = vk::ImageViewCreateInfo {
        s_type: vk::StructureType::IMAGE_VIEW_CREATE_INFO,
        image,
        view_type: vk::ImageViewType::TYPE_2D,
        format,
        subresource_range: subresource(aspect),
        ..Default::default()
    };
    device
        .create_image_view(&view_ci, None)
        .or_fatal("create_image_view")
}

fn subresource(aspect: vk::ImageAspectFlags) -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask: aspect,
        base_mip_level: 0,
        level_count: 1,
        base_array_layer: 0,
        layer_count: 1,
    }
}

/// Records through `record`, submits to the graphics queue and waits for the
/// queue to drain. Startup uploads only.
pub unsafe fn one_shot(
    ctx: &DeviceContext,
    pool: vk::CommandPool,
    record: impl FnOnce(&ash::Device, vk::CommandBuffer),
) -> Result<(), FrameError> {
    let d = &ctx.device;
    let ai = vk::CommandBufferAllocateInfo {
        s_type: vk::StructureType::COMMAND_BUFFER_ALLOCATE_INFO,
        command_pool: pool,
        level: vk::CommandBufferLevel::PRIMARY,
        command_buffer_count: 1,
        ..Default::default()
    };
    let cmd = d
        .allocate_command_buffers(&ai)
        .or_fatal("allocate_command_buffers")?[0];
    let bi = vk::CommandBufferBeginInfo {
        s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
        flags: vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
        ..Default::default()
    };
    d.begin_command_buffer(cmd, &bi)
        .or_fatal("begin_command_buffer")?;
    record(d, cmd);
    d.end_command_buffer(cmd).or_fatal("end_command_buffer")?;

    let si = vk::SubmitInfo {
        s_type: vk::StructureType::SUBMIT_INFO,
        command_buffer_count: 1,
        p_command_buffers: &cmd,
        ..Default::default()
    };
    d.queue_submit(ctx.graphics_queue, std::slice::from_ref(&si), vk::Fence::null())
        .or_fatal("queue_submit")?;
    d.queue_wait_idle(ctx.graphics_queue)
        .or_fatal("queue_wait_idle")?;
    d.free_command_buffers(pool, std::slice::from_ref(&cmd));
    Ok(())
}

/// Device-local buffer filled through a temporary staging buffer.
pub unsafe fn upload_buffer(
    ctx: &DeviceContext,
    pool: vk::CommandPool,
    usage: vk::BufferUsageFlags,
    bytes: &[u8],
) -> Result<GpuBuffer, FrameError> {
    let size = bytes.len() as vk::DeviceSize;
    let staging = GpuBuffer::host_visible(ctx, size, vk::BufferUsageFlags::TRANSFER_SRC)?;
    staging.write(&ctx.device, bytes)?;

    let dst = GpuBuffer::new(
        ctx,
        size,
        usage | vk::BufferUsageFlags::TRANSFER_DST,
        vk::MemoryPropertyFlags::DEVICE_LOCAL,
    )?;
    let copied = one_shot(ctx, pool, |d, cmd| {
        let region = vk::BufferCopy {
            src_offset: 0,
            dst_offset: 0,
            size,
        };
        d.cmd_copy_buffer(cmd, staging.buffer, dst.buffer, std::slice::from_ref(&region));
    });
    staging.destroy(&ctx.device);
    if let Err(e) = copied {
        dst.destroy(&ctx.device);
        return Err(e);
    }
    Ok(dst)
}

/// Access and stage masks for the two layout changes a sampled texture goes
/// through.
fn transition_masks(
    old: vk::ImageLayout,
    new: vk::ImageLayout,
) -> Option<(vk::AccessFlags, vk::AccessFlags, vk::PipelineStageFlags, vk::PipelineStageFlags)> {
    match (old, new) {
        (vk::ImageLayout::UNDEFINED, vk::ImageLayout::TRANSFER_DST_OPTIMAL) => Some((
            vk::AccessFlags::empty(),
            vk::AccessFlags::TRANSFER_WRITE,
            vk::PipelineStageFlags::TOP_OF_PIPE,
            vk::PipelineStageFlags::TRANSFER,
        )),
        (vk::ImageLayout::TRANSFER_DST_OPTIMAL, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL) => {
            Some((
                vk::AccessFlags::TRANSFER_WRITE,
                vk::AccessFlags::SHADER_READ,
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::FRAGMENT_SHADER,
            ))
        }
        _ => None,
    }
}

pub unsafe fn cmd_transition_color(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    image: vk::Image,
    old: vk::ImageLayout,
    new: vk::ImageLayout,
) {
    let Some((src_access, dst_access, src_stage, dst_stage)) = transition_masks(old, new) else {
        debug_assert!(false, "unsupported layout transition {old:?} -> {new:?}");
        return;
    };
    let barrier = vk::ImageMemoryBarrier {
        s_type: vk::StructureType::IMAGE_MEMORY_BARRIER,
        src_access_mask: src_access,
        dst_access_mask: dst_access,
        old_layout: old,
        new_layout: new,
        src_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
        dst_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
        image,
        subresource_range: subresource(vk::ImageAspectFlags::COLOR),
        ..Default::default()
    };
    device.cmd_pipeline_barrier(
        cmd,
        src_stage,
        dst_stage,
        vk::DependencyFlags::empty(),
        &[],
        &[],
        std::slice::from_ref(&barrier),
    );
}
