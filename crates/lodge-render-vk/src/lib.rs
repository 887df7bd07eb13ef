// SPDX-License-Identifier: CEPL-1.0
//! Vulkan 1.0 backend: a render pass, one textured mesh, a depth buffer and
//! `frames_in_flight` slots of CPU/GPU overlap.

use anyhow::Result;
use ash::vk;
use lodge_core::EventReceiver;
use lodge_math::CameraUniform;
use lodge_render::{
    AcquireOutcome, FrameBackend, FrameError, FrameScheduler, FrameStatus, PresentPreference,
    RenderSettings, RenderSize, Renderer, Scene, SubmitOutcome, SurfaceSizeSource, SurfaceStatus,
};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use tracing::{debug, info};

mod context;
mod error;
mod frames;
mod memory;
mod model;
mod resources;
mod swapchain;

use context::DeviceContext;
use error::{classify, VkResultExt};
use frames::FrameResourcePool;
use model::GpuModel;
use resources::SwapchainResources;

fn current(res: &Option<SwapchainResources>) -> Result<&SwapchainResources, FrameError> {
    res.as_ref().ok_or(FrameError::Api {
        call: "swapchain",
        detail: "no swapchain resources".into(),
    })
}

/// Owns every Vulkan object. Swapchain-dependent state lives in `resources`
/// and is replaced whole on rebuild.
pub struct VkBackend {
    ctx: DeviceContext,
    frames: FrameResourcePool,
    set_layout: vk::DescriptorSetLayout,
    model: Option<GpuModel>,
    resources: Option<SwapchainResources>,
    present_preference: PresentPreference,
    clear: [f32; 4],
}

// STRICT TEARDOWN ORDER:
// - device idle
// - swapchain resources (framebuffers .. swapchain)
// - model buffers, texture, sampler
// - descriptor set layout
// - per-slot semaphores/fences + command pool
// - device, surface, debug messenger, instance
impl Drop for VkBackend {
    fn drop(&mut self) {
        unsafe {
            let d = &self.ctx.device;
            d.device_wait_idle().ok();
            if let Some(res) = self.resources.take() {
                res.destroy(&self.ctx, &mut self.frames);
            }
            if let Some(model) = self.model.take() {
                model.destroy(d);
            }
            d.destroy_descriptor_set_layout(self.set_layout, None);
            self.frames.destroy(d);
            self.ctx.destroy();
        }
        debug!("vk: backend destroyed");
    }
}

impl VkBackend {
    unsafe fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
        settings: &RenderSettings,
        scene: Scene<'_>,
    ) -> Result<Self> {
        let mut ctx = DeviceContext::new(window, display)?;
        let frames = match FrameResourcePool::create(
            &ctx.device,
            ctx.families.graphics,
            settings.frames_in_flight(),
        ) {
            Ok(f) => f,
            Err(e) => {
                ctx.destroy();
                return Err(e.into());
            }
        };

        // From here on Drop cleans up whatever got built.
        let mut backend = Self {
            ctx,
            frames,
            set_layout: vk::DescriptorSetLayout::null(),
            model: None,
            resources: None,
            present_preference: settings.present_preference,
            clear: settings.clear_color,
        };
        backend.set_layout = resources::create_set_layout(&backend.ctx.device)?;
        backend.model = Some(GpuModel::upload(
            &backend.ctx,
            backend.frames.command_pool,
            scene.mesh,
            scene.texture,
        )?);
        backend.rebuild_swapchain(size)?;
        Ok(backend)
    }

    pub fn set_clear_color(&mut self, rgba: [f32; 4]) {
        self.clear = rgba;
    }
}

impl FrameBackend for VkBackend {
    fn frames_in_flight(&self) -> usize {
        self.frames.slot_count()
    }

    fn image_count(&self) -> usize {
        self.resources.as_ref().map_or(0, |r| r.image_count())
    }

    fn extent(&self) -> RenderSize {
        self.resources
            .as_ref()
            .map_or(RenderSize::new(0, 0), |r| r.extent())
    }

    fn wait_for_slot(&mut self, slot: usize) -> Result<(), FrameError> {
        let fence = self.frames.slot(slot).in_flight;
        unsafe {
            self.ctx
                .device
                .wait_for_fences(&[fence], true, u64::MAX)
                .or_fatal("wait_for_fences(slot)")
        }
    }

    fn acquire_image(&mut self, slot: usize) -> Result<AcquireOutcome, FrameError> {
        let res = current(&self.resources)?;
        let semaphore = self.frames.slot(slot).image_acquired;
        unsafe {
            let (index, suboptimal) = match self.ctx.swapchain_loader.acquire_next_image(
                res.generation.handle,
                u64::MAX,
                semaphore,
                vk::Fence::null(),
            ) {
                Ok(pair) => pair,
                Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => return Ok(AcquireOutcome::OutOfDate),
                Err(e) => return Err(classify("acquire_next_image", e)),
            };

            // The image may still be in use by a frame submitted from another slot.
            if let Some(prev) = self.frames.claim_image(index as usize, slot) {
                let fence = self.frames.slot(prev).in_flight;
                self.ctx
                    .device
                    .wait_for_fences(&[fence], true, u64::MAX)
                    .or_fatal("wait_for_fences(image)")?;
            }

            Ok(if suboptimal {
                AcquireOutcome::Suboptimal(index)
            } else {
                AcquireOutcome::Ready(index)
            })
        }
    }

    fn write_uniforms(&mut self, image_index: u32, uniform: &CameraUniform) -> Result<(), FrameError> {
        let res = current(&self.resources)?;
        unsafe { res.uniforms[image_index as usize].write(&self.ctx.device, bytemuck::bytes_of(uniform)) }
    }

    fn record_commands(&mut self, slot: usize, image_index: u32) -> Result<(), FrameError> {
        let res = current(&self.resources)?;
        let model = self.model.as_ref().ok_or(FrameError::Api {
            call: "record_commands",
            detail: "model not uploaded".into(),
        })?;
        let cmd = self.frames.slot(slot).cmd;
        let img = image_index as usize;
        let d = &self.ctx.device;

        unsafe {
            d.reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())
                .or_fatal("reset_command_buffer")?;
            let begin = vk::CommandBufferBeginInfo {
                s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
                flags: vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
                ..Default::default()
            };
            d.begin_command_buffer(cmd, &begin)
                .or_fatal("begin_command_buffer")?;

            let clears = [
                vk::ClearValue {
                    color: vk::ClearColorValue { float32: self.clear },
                },
                vk::ClearValue {
                    depth_stencil: vk::ClearDepthStencilValue {
                        depth: 1.0,
                        stencil: 0,
                    },
                },
            ];
            let rp_begin = vk::RenderPassBeginInfo {
                s_type: vk::StructureType::RENDER_PASS_BEGIN_INFO,
                render_pass: res.render_pass,
                framebuffer: res.framebuffers[img],
                render_area: vk::Rect2D {
                    offset: vk::Offset2D { x: 0, y: 0 },
                    extent: res.generation.extent,
                },
                clear_value_count: clears.len() as u32,
                p_clear_values: clears.as_ptr(),
                ..Default::default()
            };
            d.cmd_begin_render_pass(cmd, &rp_begin, vk::SubpassContents::INLINE);
            d.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, res.pipeline);
            d.cmd_bind_vertex_buffers(cmd, 0, &[model.vertices.buffer], &[0]);
            d.cmd_bind_index_buffer(cmd, model.indices.buffer, 0, vk::IndexType::UINT32);
            d.cmd_bind_descriptor_sets(
                cmd,
                vk::PipelineBindPoint::GRAPHICS,
                res.pipeline_layout,
                0,
                &[res.descriptor_sets[img]],
                &[],
            );
            d.cmd_draw_indexed(cmd, model.index_count, 1, 0, 0, 0);
            d.cmd_end_render_pass(cmd);

            d.end_command_buffer(cmd).or_fatal("end_command_buffer")
        }
    }

    fn submit(&mut self, slot: usize, image_index: u32) -> Result<SubmitOutcome, FrameError> {
        let res = current(&self.resources)?;
        let render_complete = &res.render_complete[image_index as usize];
        let s = self.frames.slot(slot);
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let d = &self.ctx.device;
        unsafe {
            // reset only once work is certain to be queued against it
            d.reset_fences(&[s.in_flight]).or_fatal("reset_fences")?;
            let submit = vk::SubmitInfo {
                s_type: vk::StructureType::SUBMIT_INFO,
                wait_semaphore_count: 1,
                p_wait_semaphores: &s.image_acquired,
                p_wait_dst_stage_mask: wait_stages.as_ptr(),
                command_buffer_count: 1,
                p_command_buffers: &s.cmd,
                signal_semaphore_count: 1,
                p_signal_semaphores: render_complete,
                ..Default::default()
            };
            d.queue_submit(
                self.ctx.graphics_queue,
                std::slice::from_ref(&submit),
                s.in_flight,
            )
            .or_fatal("queue_submit")?;
        }
        Ok(SubmitOutcome::Submitted)
    }

    fn present(&mut self, _slot: usize, image_index: u32) -> Result<SurfaceStatus, FrameError> {
        let res = current(&self.resources)?;
        // the next signal of this semaphore is a submit for the same image,
        // which cannot be acquired again before this present lets go of it
        let present = vk::PresentInfoKHR {
            s_type: vk::StructureType::PRESENT_INFO_KHR,
            wait_semaphore_count: 1,
            p_wait_semaphores: &res.render_complete[image_index as usize],
            swapchain_count: 1,
            p_swapchains: &res.generation.handle,
            p_image_indices: &image_index,
            ..Default::default()
        };
        unsafe {
            match self
                .ctx
                .swapchain_loader
                .queue_present(self.ctx.present_queue, &present)
            {
                Ok(false) => Ok(SurfaceStatus::Optimal),
                Ok(true) => Ok(SurfaceStatus::Suboptimal),
                Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(SurfaceStatus::OutOfDate),
                Err(e) => Err(classify("queue_present", e)),
            }
        }
    }

    fn wait_present_idle(&mut self) -> Result<(), FrameError> {
        unsafe {
            self.ctx
                .device
                .queue_wait_idle(self.ctx.present_queue)
                .or_fatal("queue_wait_idle")
        }
    }

    fn wait_device_idle(&mut self) -> Result<(), FrameError> {
        unsafe { self.ctx.device.device_wait_idle().or_fatal("device_wait_idle") }
    }

    fn rebuild_swapchain(&mut self, size: RenderSize) -> Result<(), FrameError> {
        unsafe {
            if let Some(old) = self.resources.take() {
                old.destroy(&self.ctx, &mut self.frames);
            }
            let model = self.model.as_ref().ok_or(FrameError::Api {
                call: "rebuild_swapchain",
                detail: "model not uploaded".into(),
            })?;
            self.resources = Some(SwapchainResources::create(
                &self.ctx,
                &mut self.frames,
                self.set_layout,
                model,
                size,
                self.present_preference,
            )?);
        }
        Ok(())
    }
}

/// The Vulkan renderer: a [`VkBackend`] driven by the shared [`FrameScheduler`].
pub struct VkRenderer {
    backend: VkBackend,
    scheduler: FrameScheduler,
}

impl VkRenderer {
    pub fn scheduler(&self) -> &FrameScheduler {
        &self.scheduler
    }
}

impl Renderer for VkRenderer {
    fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
        settings: &RenderSettings,
        scene: Scene<'_>,
        events: EventReceiver,
    ) -> Result<Self> {
        let backend = unsafe { VkBackend::new(window, display, size, settings, scene)? };
        info!(
            "Vulkan renderer ready ({}, {} images, {} frames in flight)",
            backend.extent(),
            backend.image_count(),
            backend.frames_in_flight()
        );
        Ok(Self {
            backend,
            scheduler: FrameScheduler::new(settings, events),
        })
    }

    fn draw_frame(
        &mut self,
        surface: &mut dyn SurfaceSizeSource,
    ) -> std::result::Result<FrameStatus, FrameError> {
        self.scheduler.draw_frame(&mut self.backend, surface)
    }

    fn extent(&self) -> RenderSize {
        self.backend.extent()
    }

    fn set_clear_color(&mut self, rgba: [f32; 4]) {
        self.backend.set_clear_color(rgba);
    }

    fn wait_idle(&mut self) -> std::result::Result<(), FrameError> {
        self.backend.wait_device_idle()
    }
}
