// SPDX-License-Identifier: CEPL-1.0
//! Scene data that survives swapchain rebuilds: geometry, texture, sampler.

use ash::vk;
use lodge_assets::{MeshData, TextureData};
use lodge_render::FrameError;
use tracing::debug;

use crate::context::DeviceContext;
use crate::error::VkResultExt;
use crate::memory::{self, GpuBuffer, GpuImage};

pub const TEXTURE_FORMAT: vk::Format = vk::Format::R8G8B8A8_SRGB;

pub struct GpuModel {
    pub vertices: GpuBuffer,
    pub indices: GpuBuffer,
    pub index_count: u32,
    pub texture: GpuImage,
    pub sampler: vk::Sampler,
}

impl GpuModel {
    pub unsafe fn upload(
        ctx: &DeviceContext,
        pool: vk::CommandPool,
        mesh: &MeshData,
        texture: &TextureData,
    ) -> Result<Self, FrameError> {
        let vertices = memory::upload_buffer(
            ctx,
            pool,
            vk::BufferUsageFlags::VERTEX_BUFFER,
            bytemuck::cast_slice(&mesh.vertices),
        )?;
        let indices = memory::upload_buffer(
            ctx,
            pool,
            vk::BufferUsageFlags::INDEX_BUFFER,
            bytemuck::cast_slice(&mesh.indices),
        )?;
        let texture_image = upload_texture(ctx, pool, texture)?;
        let sampler = create_sampler(ctx)?;
        debug!(
            "uploaded {} vertices, {} indices, {}x{} texture",
            mesh.vertices.len(),
            mesh.indices.len(),
            texture.width,
            texture.height
        );
        Ok(Self {
            vertices,
            indices,
            index_count: mesh.index_count(),
            texture: texture_image,
            sampler,
        })
    }

    pub unsafe fn destroy(self, device: &ash::Device) {
        device.destroy_sampler(self.sampler, None);
        self.texture.destroy(device);
        self.indices.destroy(device);
        self.vertices.destroy(device);
    }
}

unsafe fn upload_texture(
    ctx: &DeviceContext,
    pool: vk::CommandPool,
    tex: &TextureData,
) -> Result<GpuImage, FrameError> {
    let staging = GpuBuffer::host_visible(
        ctx,
        tex.byte_len() as vk::DeviceSize,
        vk::BufferUsageFlags::TRANSFER_SRC,
    )?;
    staging.write(&ctx.device, &tex.rgba)?;

    let extent = vk::Extent2D {
        width: tex.width,
        height: tex.height,
    };
    let image = GpuImage::new(
        ctx,
        extent,
        TEXTURE_FORMAT,
        vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED,
        vk::ImageAspectFlags::COLOR,
    )?;

    // UNDEFINED -> TRANSFER_DST -> copy -> SHADER_READ_ONLY
    let copied = memory::one_shot(ctx, pool, |d, cmd| {
        memory::cmd_transition_color(
            d,
            cmd,
            image.image,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        );
        let region = vk::BufferImageCopy {
            buffer_offset: 0,
            buffer_row_length: 0,
            buffer_image_height: 0,
            image_subresource: vk::ImageSubresourceLayers {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                mip_level: 0,
                base_array_layer: 0,
                layer_count: 1,
            },
            image_offset: vk::Offset3D { x: 0, y: 0, z: 0 },
            image_extent: vk::Extent3D {
                width: tex.width,
                height: tex.height,
                depth: 1,
            },
        };
        d.cmd_copy_buffer_to_image(
            cmd,
            staging.buffer,
            image.image,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            std::slice::from_ref(&region),
        );
        memory::cmd_transition_color(
            d,
            cmd,
            image.image,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        );
    });
    staging.destroy(&ctx.device);
    if let Err(e) = copied {
        image.destroy(&ctx.device);
        return Err(e);
    }
    Ok(image)
}

unsafe fn create_sampler(ctx: &DeviceContext) -> Result<vk::Sampler, FrameError> {
    let ci = vk::SamplerCreateInfo {
        s_type: vk::StructureType::SAMPLER_CREATE_INFO,
        mag_filter: vk::Filter::LINEAR,
        min_filter: vk::Filter::LINEAR,
        mipmap_mode: vk::SamplerMipmapMode::LINEAR,
        address_mode_u: vk::SamplerAddressMode::REPEAT,
        address_mode_v: vk::SamplerAddressMode::REPEAT,
        address_mode_w: vk::SamplerAddressMode::REPEAT,
        anisotropy_enable: if ctx.anisotropy.is_some() { vk::TRUE } else { vk::FALSE },
        max_anisotropy: ctx.anisotropy.unwrap_or(1.0),
        border_color: vk::BorderColor::INT_OPAQUE_BLACK,
        unnormalized_coordinates: vk::FALSE,
        compare_enable: vk::FALSE,
        compare_op: vk::CompareOp::ALWAYS,
        ..Default::default()
    };
    ctx.device.create_sampler(&ci, None).or_fatal("create_sampler")
}
