// SPDX-License-Identifier: CEPL-1.0
//! One iteration of the render loop.
//!
//! ```text
//! Idle -> WaitingForSlot -> [Rebuilding] -> Acquiring -> Recording
//!      -> Submitted -> Presenting -> Idle
//! ```
//!
//! Out-of-date on acquire or submit ends the iteration early without
//! advancing the frame index; the rebuild runs at the top of the next one.
//! A fatal error leaves `state()` at the step that failed.

use std::time::Instant;

use lodge_core::{EventReceiver, PlatformEvent};
use lodge_math::Camera;
use tracing::trace;

use crate::{
    AcquireOutcome, CameraRig, FrameBackend, FrameError, InvalidationHandler, RebuildReason,
    RenderSettings, SubmitOutcome, SurfaceSizeSource, SurfaceStatus,
};

// Longest frame time fed to the camera; covers stalls such as a minimized window.
const MAX_FRAME_DT: f32 = 0.25;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameState {
    Idle,
    WaitingForSlot,
    Rebuilding,
    Acquiring,
    Recording,
    Submitted,
    Presenting,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameStatus {
    Presented { slot: usize, image_index: u32 },
    /// Surface went out of date before anything was queued.
    Skipped,
    /// Window closed while waiting for a drawable size.
    Closing,
}

pub struct FrameScheduler {
    events: EventReceiver,
    invalidation: InvalidationHandler,
    rig: CameraRig,
    serialize_present: bool,
    current_frame: usize,
    state: FrameState,
    frames_presented: u64,
    last_tick: Option<Instant>,
}

impl FrameScheduler {
    pub fn new(settings: &RenderSettings, events: EventReceiver) -> Self {
        Self {
            events,
            invalidation: InvalidationHandler::default(),
            rig: CameraRig::new(Camera::default(), settings.motion, settings.nudge),
            serialize_present: settings.serialize_present,
            current_frame: 0,
            state: FrameState::Idle,
            frames_presented: 0,
            last_tick: None,
        }
    }

    pub fn current_frame(&self) -> usize {
        self.current_frame
    }

    pub fn state(&self) -> FrameState {
        self.state
    }

    pub fn frames_presented(&self) -> u64 {
        self.frames_presented
    }

    pub fn invalidation(&self) -> &InvalidationHandler {
        &self.invalidation
    }

    pub fn rig(&self) -> &CameraRig {
        &self.rig
    }

    fn drain_events(&mut self) {
        for event in self.events.drain() {
            match event {
                PlatformEvent::Resized { width, height } => {
                    trace!("resize event {}x{}", width, height);
                    self.invalidation.request(RebuildReason::Resized);
                }
                PlatformEvent::KeyChanged { key, pressed } => self.rig.apply_key(key, pressed),
            }
        }
        if self.events.take_dropped_resize() {
            self.invalidation.request(RebuildReason::Resized);
        }
    }

    fn tick(&mut self) -> f32 {
        let now = Instant::now();
        let dt = self
            .last_tick
            .map(|prev| now.duration_since(prev).as_secs_f32())
            .unwrap_or(0.0);
        self.last_tick = Some(now);
        dt.min(MAX_FRAME_DT)
    }

    fn skip(&mut self, reason: RebuildReason) -> FrameStatus {
        self.invalidation.request(reason);
        self.state = FrameState::Idle;
        FrameStatus::Skipped
    }

    pub fn draw_frame<B: FrameBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        surface: &mut dyn SurfaceSizeSource,
    ) -> Result<FrameStatus, FrameError> {
        self.drain_events();
        let slot = self.current_frame;

        // 1) the slot's command buffer and the image it last drew are free again
        self.state = FrameState::WaitingForSlot;
        backend.wait_for_slot(slot)?;

        // 2) never acquire from a swapchain already known to be stale
        if self.invalidation.is_pending() {
            self.state = FrameState::Rebuilding;
            let Some(size) = self.invalidation.await_drawable_size(surface) else {
                self.state = FrameState::Idle;
                return Ok(FrameStatus::Closing);
            };
            // resizes posted while we waited are covered by this rebuild
            self.drain_events();
            self.invalidation.rebuild(backend, size)?;
        }

        // 3)
        self.state = FrameState::Acquiring;
        let (image_index, acquired_suboptimal) = match backend.acquire_image(slot)? {
            AcquireOutcome::Ready(index) => (index, false),
            AcquireOutcome::Suboptimal(index) => (index, true),
            AcquireOutcome::OutOfDate => return Ok(self.skip(RebuildReason::OutOfDate)),
        };

        // 4) per-image resources follow the acquired index, not the slot
        let dt = self.tick();
        self.rig.advance(dt);
        let uniform = self.rig.uniform(backend.extent().aspect());
        backend.write_uniforms(image_index, &uniform)?;

        // 5)
        self.state = FrameState::Recording;
        backend.record_commands(slot, image_index)?;

        // 6)
        if backend.submit(slot, image_index)? == SubmitOutcome::OutOfDate {
            return Ok(self.skip(RebuildReason::OutOfDate));
        }
        self.state = FrameState::Submitted;

        // 7) a suboptimal surface still presents; rebuild next iteration
        let status = backend.present(slot, image_index)?;
        self.state = FrameState::Presenting;
        match status {
            SurfaceStatus::OutOfDate => self.invalidation.request(RebuildReason::OutOfDate),
            SurfaceStatus::Suboptimal => self.invalidation.request(RebuildReason::Suboptimal),
            SurfaceStatus::Optimal if acquired_suboptimal => {
                self.invalidation.request(RebuildReason::Suboptimal)
            }
            SurfaceStatus::Optimal => {}
        }
        if self.serialize_present {
            backend.wait_present_idle()?;
        }

        // 8)
        self.frames_presented += 1;
        self.current_frame = (slot + 1) % backend.frames_in_flight().max(1);
        self.state = FrameState::Idle;
        Ok(FrameStatus::Presented { slot, image_index })
    }
}
