// SPDX-License-Identifier: CEPL-1.0
use lodge_math::CameraUniform;

use crate::{AcquireOutcome, FrameError, RenderSize, SubmitOutcome, SurfaceStatus};

/// GPU-facing steps of one frame.
///
/// `slot` always means the in-flight slot (`0..frames_in_flight()`) and
/// addresses the fence, the image-acquired semaphore and the command buffer.
/// `image_index` is whatever the swapchain handed out and addresses the
/// framebuffer, uniform buffer, descriptor set and render-complete semaphore.
/// The two coincide only by accident.
pub trait FrameBackend {
    fn frames_in_flight(&self) -> usize;
    fn image_count(&self) -> usize;
    fn extent(&self) -> RenderSize;

    /// Blocks until `slot`'s fence is signaled. Does not reset it.
    fn wait_for_slot(&mut self, slot: usize) -> Result<(), FrameError>;

    /// Signals `slot`'s image-acquired semaphore when the image is ready.
    fn acquire_image(&mut self, slot: usize) -> Result<AcquireOutcome, FrameError>;

    fn write_uniforms(&mut self, image_index: u32, uniform: &CameraUniform) -> Result<(), FrameError>;

    /// Re-records `slot`'s command buffer against `image_index`'s framebuffer.
    fn record_commands(&mut self, slot: usize, image_index: u32) -> Result<(), FrameError>;

    /// Resets `slot`'s fence and submits its command buffer: waits on the
    /// slot's image-acquired semaphore, signals the fence and `image_index`'s
    /// render-complete semaphore.
    fn submit(&mut self, slot: usize, image_index: u32) -> Result<SubmitOutcome, FrameError>;

    /// Queues `image_index` for presentation behind its render-complete
    /// semaphore.
    fn present(&mut self, slot: usize, image_index: u32) -> Result<SurfaceStatus, FrameError>;

    fn wait_present_idle(&mut self) -> Result<(), FrameError>;
    fn wait_device_idle(&mut self) -> Result<(), FrameError>;

    /// Tears down and rebuilds every swapchain-dependent object for `size`.
    /// Caller guarantees the device is idle.
    fn rebuild_swapchain(&mut self, size: RenderSize) -> Result<(), FrameError>;
}
