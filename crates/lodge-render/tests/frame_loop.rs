// SPDX-License-Identifier: CEPL-1.0
//! Drives the frame scheduler against a fake GPU that models fences,
//! in-order queue completion and swapchain generations.

use std::collections::VecDeque;

use lodge_core::{event_queue, EventSender, Key, PlatformEvent};
use lodge_math::CameraUniform;
use lodge_render::{
    AcquireOutcome, FrameBackend, FrameError, FrameScheduler, FrameState, FrameStatus,
    InvalidationHandler, RebuildReason, RenderSettings, RenderSize, SubmitOutcome,
    SurfaceSizeSource, SurfaceStatus,
};

#[derive(Clone, Copy, Debug, PartialEq)]
enum Call {
    Wait(usize),
    Acquire(usize),
    Write(u32),
    Record(usize, u32),
    Submit(usize),
    Present(usize, u32),
    PresentIdle,
    DeviceIdle,
    Rebuild(RenderSize),
}

struct FakeGpu {
    frames: usize,
    image_count: usize,
    next_image_count: usize,
    extent: RenderSize,
    generation: u32,

    fence_signaled: Vec<bool>,
    // slots with queued work, oldest first; the fake GPU retires in order
    in_flight: VecDeque<usize>,
    max_in_flight: usize,

    acquire_script: VecDeque<AcquireOutcome>,
    present_script: VecDeque<SurfaceStatus>,
    submit_script: VecDeque<SubmitOutcome>,
    lose_surface_on_present: bool,
    next_image: u32,
    acquired: Option<(usize, u32)>,

    framebuffers: Vec<u32>,
    uniforms: Vec<(u32, Option<CameraUniform>)>,
    descriptor_sets: Vec<u32>,

    calls: Vec<Call>,
}

impl FakeGpu {
    fn new(frames: usize, image_count: usize, extent: RenderSize) -> Self {
        let mut gpu = Self {
            frames,
            image_count,
            next_image_count: image_count,
            extent,
            generation: 0,
            fence_signaled: vec![true; frames],
            in_flight: VecDeque::new(),
            max_in_flight: 0,
            acquire_script: VecDeque::new(),
            present_script: VecDeque::new(),
            submit_script: VecDeque::new(),
            lose_surface_on_present: false,
            next_image: 0,
            acquired: None,
            framebuffers: Vec::new(),
            uniforms: Vec::new(),
            descriptor_sets: Vec::new(),
            calls: Vec::new(),
        };
        gpu.build_per_image();
        gpu
    }

    fn build_per_image(&mut self) {
        let g = self.generation;
        self.framebuffers = vec![g; self.image_count];
        self.uniforms = vec![(g, None); self.image_count];
        self.descriptor_sets = vec![g; self.image_count];
    }

    fn retire_oldest(&mut self) {
        if let Some(slot) = self.in_flight.pop_front() {
            self.fence_signaled[slot] = true;
        }
    }

    fn retire_all(&mut self) {
        while !self.in_flight.is_empty() {
            self.retire_oldest();
        }
    }

    fn position(&self, call: Call) -> Option<usize> {
        self.calls.iter().position(|c| *c == call)
    }
}

impl FrameBackend for FakeGpu {
    fn frames_in_flight(&self) -> usize {
        self.frames
    }

    fn image_count(&self) -> usize {
        self.image_count
    }

    fn extent(&self) -> RenderSize {
        self.extent
    }

    fn wait_for_slot(&mut self, slot: usize) -> Result<(), FrameError> {
        self.calls.push(Call::Wait(slot));
        while !self.fence_signaled[slot] {
            assert!(!self.in_flight.is_empty(), "fence {slot} can never signal");
            self.retire_oldest();
        }
        Ok(())
    }

    fn acquire_image(&mut self, slot: usize) -> Result<AcquireOutcome, FrameError> {
        self.calls.push(Call::Acquire(slot));
        let outcome = self.acquire_script.pop_front().unwrap_or_else(|| {
            let index = self.next_image % self.image_count as u32;
            self.next_image += 1;
            AcquireOutcome::Ready(index)
        });
        match outcome {
            AcquireOutcome::Ready(i) | AcquireOutcome::Suboptimal(i) => {
                assert!((i as usize) < self.image_count);
                self.acquired = Some((slot, i));
            }
            AcquireOutcome::OutOfDate => self.acquired = None,
        }
        Ok(outcome)
    }

    fn write_uniforms(&mut self, image_index: u32, uniform: &CameraUniform) -> Result<(), FrameError> {
        self.calls.push(Call::Write(image_index));
        let (_, acquired) = self.acquired.expect("write before acquire");
        assert_eq!(image_index, acquired, "uniforms must follow the acquired image");
        self.uniforms[image_index as usize] = (self.generation, Some(*uniform));
        Ok(())
    }

    fn record_commands(&mut self, slot: usize, image_index: u32) -> Result<(), FrameError> {
        self.calls.push(Call::Record(slot, image_index));
        assert!(
            self.fence_signaled[slot],
            "slot {slot} re-recorded while the GPU may still read it"
        );
        assert_eq!(self.framebuffers[image_index as usize], self.generation);
        Ok(())
    }

    fn submit(&mut self, slot: usize, image_index: u32) -> Result<SubmitOutcome, FrameError> {
        self.calls.push(Call::Submit(slot));
        assert_eq!(self.acquired, Some((slot, image_index)));
        let outcome = self.submit_script.pop_front().unwrap_or(SubmitOutcome::Submitted);
        if outcome == SubmitOutcome::Submitted {
            assert!(self.fence_signaled[slot]);
            self.fence_signaled[slot] = false;
            self.in_flight.push_back(slot);
            self.max_in_flight = self.max_in_flight.max(self.in_flight.len());
            assert!(self.in_flight.len() <= self.frames);
        }
        Ok(outcome)
    }

    fn present(&mut self, slot: usize, image_index: u32) -> Result<SurfaceStatus, FrameError> {
        self.calls.push(Call::Present(slot, image_index));
        if self.lose_surface_on_present {
            return Err(FrameError::SurfaceLost);
        }
        Ok(self.present_script.pop_front().unwrap_or(SurfaceStatus::Optimal))
    }

    fn wait_present_idle(&mut self) -> Result<(), FrameError> {
        self.calls.push(Call::PresentIdle);
        self.retire_all();
        Ok(())
    }

    fn wait_device_idle(&mut self) -> Result<(), FrameError> {
        self.calls.push(Call::DeviceIdle);
        self.retire_all();
        Ok(())
    }

    fn rebuild_swapchain(&mut self, size: RenderSize) -> Result<(), FrameError> {
        self.calls.push(Call::Rebuild(size));
        assert!(self.in_flight.is_empty(), "rebuild with GPU work outstanding");
        assert!(!size.is_zero_area());
        self.generation += 1;
        self.extent = size;
        self.image_count = self.next_image_count;
        self.next_image = 0;
        self.build_per_image();
        Ok(())
    }
}

/// Window whose framebuffer size changes each time we block on events.
struct FakeWindow {
    size: RenderSize,
    after_wait: VecDeque<RenderSize>,
    waits: usize,
    closing: bool,
}

impl FakeWindow {
    fn new(size: RenderSize) -> Self {
        Self {
            size,
            after_wait: VecDeque::new(),
            waits: 0,
            closing: false,
        }
    }
}

impl SurfaceSizeSource for FakeWindow {
    fn framebuffer_size(&self) -> RenderSize {
        self.size
    }

    fn wait_events(&mut self) {
        self.waits += 1;
        if let Some(next) = self.after_wait.pop_front() {
            self.size = next;
        }
    }

    fn is_closing(&self) -> bool {
        self.closing
    }
}

fn settings(frames: usize, serialize_present: bool) -> RenderSettings {
    RenderSettings {
        serialize_present,
        ..RenderSettings::default().with_frames_in_flight(frames)
    }
}

fn rig(frames: usize, images: usize, serialize: bool) -> (FrameScheduler, EventSender, FakeGpu, FakeWindow) {
    let size = RenderSize::new(800, 600);
    let (tx, rx) = event_queue(64);
    (
        FrameScheduler::new(&settings(frames, serialize), rx),
        tx,
        FakeGpu::new(frames, images, size),
        FakeWindow::new(size),
    )
}

fn resize(tx: &EventSender, width: u32, height: u32) {
    assert!(tx.post(PlatformEvent::Resized { width, height }));
}

#[test]
fn never_more_than_f_frames_outstanding() {
    for frames in 1..=4 {
        let (mut sched, _tx, mut gpu, mut win) = rig(frames, 3, false);
        for _ in 0..25 {
            let status = sched.draw_frame(&mut gpu, &mut win).unwrap();
            assert!(matches!(status, FrameStatus::Presented { .. }));
        }
        assert!(gpu.max_in_flight <= frames);
        // the loop actually overlaps frames rather than serializing them
        assert_eq!(gpu.max_in_flight, frames);
    }
}

#[test]
fn slot_fence_is_waited_before_rerecording_across_resizes() {
    let (mut sched, tx, mut gpu, mut win) = rig(2, 3, false);
    for frame in 0..40u32 {
        if frame % 7 == 3 {
            let size = RenderSize::new(640 + frame, 480 + frame);
            win.size = size;
            resize(&tx, size.width, size.height);
        }
        sched.draw_frame(&mut gpu, &mut win).unwrap();
    }
    // every record is preceded by a wait on the same slot since its last submit
    let mut waited = [false; 2];
    for call in &gpu.calls {
        match *call {
            Call::Wait(slot) => waited[slot] = true,
            Call::Record(slot, _) => assert!(waited[slot]),
            Call::Submit(slot) => waited[slot] = false,
            _ => {}
        }
    }
    assert!(sched.invalidation().rebuilds() >= 5);
}

#[test]
fn uniforms_follow_acquired_image_not_frame_number() {
    let (mut sched, _tx, mut gpu, mut win) = rig(2, 3, false);
    let order = [2u32, 0, 1, 1, 2, 0];
    gpu.acquire_script = order.iter().map(|&i| AcquireOutcome::Ready(i)).collect();

    let mut presented = Vec::new();
    for _ in 0..order.len() {
        match sched.draw_frame(&mut gpu, &mut win).unwrap() {
            FrameStatus::Presented { slot, image_index } => presented.push((slot, image_index)),
            other => panic!("unexpected {other:?}"),
        }
    }

    let slots: Vec<_> = presented.iter().map(|p| p.0).collect();
    assert_eq!(slots, vec![0, 1, 0, 1, 0, 1]);
    let images: Vec<_> = presented.iter().map(|p| p.1).collect();
    assert_eq!(images, order);

    let writes: Vec<_> = gpu
        .calls
        .iter()
        .filter_map(|c| match c {
            Call::Write(i) => Some(*i),
            _ => None,
        })
        .collect();
    assert_eq!(writes, order);
    assert!(gpu.uniforms.iter().all(|(_, u)| u.is_some()));
}

#[test]
fn suboptimal_present_still_shows_frame_then_rebuilds_before_next_acquire() {
    let (mut sched, _tx, mut gpu, mut win) = rig(2, 3, true);
    gpu.present_script.push_back(SurfaceStatus::Suboptimal);

    let first = sched.draw_frame(&mut gpu, &mut win).unwrap();
    assert_eq!(first, FrameStatus::Presented { slot: 0, image_index: 0 });
    assert!(sched.invalidation().is_pending());

    gpu.calls.clear();
    sched.draw_frame(&mut gpu, &mut win).unwrap();
    let rebuild = gpu.position(Call::Rebuild(RenderSize::new(800, 600))).unwrap();
    let acquire = gpu.position(Call::Acquire(1)).unwrap();
    let idle = gpu.position(Call::DeviceIdle).unwrap();
    assert!(idle < rebuild && rebuild < acquire);
    assert!(!sched.invalidation().is_pending());
}

#[test]
fn suboptimal_acquire_presents_then_rebuilds() {
    let (mut sched, _tx, mut gpu, mut win) = rig(2, 3, true);
    gpu.acquire_script.push_back(AcquireOutcome::Suboptimal(1));

    let status = sched.draw_frame(&mut gpu, &mut win).unwrap();
    assert_eq!(status, FrameStatus::Presented { slot: 0, image_index: 1 });
    assert!(gpu.calls.contains(&Call::Present(0, 1)));
    assert!(sched.invalidation().is_pending());
}

#[test]
fn out_of_date_acquire_skips_without_advancing() {
    let (mut sched, _tx, mut gpu, mut win) = rig(2, 3, true);
    gpu.acquire_script.push_back(AcquireOutcome::OutOfDate);

    assert_eq!(sched.draw_frame(&mut gpu, &mut win).unwrap(), FrameStatus::Skipped);
    assert_eq!(sched.current_frame(), 0);
    assert_eq!(sched.state(), FrameState::Idle);
    assert!(!gpu.calls.iter().any(|c| matches!(c, Call::Submit(_) | Call::Write(_))));

    let status = sched.draw_frame(&mut gpu, &mut win).unwrap();
    assert!(matches!(status, FrameStatus::Presented { slot: 0, .. }));
    assert_eq!(sched.invalidation().rebuilds(), 1);
    assert_eq!(sched.current_frame(), 1);
}

#[test]
fn out_of_date_submit_leaves_slot_usable() {
    let (mut sched, _tx, mut gpu, mut win) = rig(1, 2, false);
    gpu.submit_script.push_back(SubmitOutcome::OutOfDate);

    assert_eq!(sched.draw_frame(&mut gpu, &mut win).unwrap(), FrameStatus::Skipped);
    assert!(!gpu.calls.iter().any(|c| matches!(c, Call::Present(..))));
    assert!(matches!(
        sched.draw_frame(&mut gpu, &mut win).unwrap(),
        FrameStatus::Presented { slot: 0, .. }
    ));
    assert_eq!(sched.invalidation().rebuilds(), 1);
}

#[test]
fn minimize_then_restore_rebuilds_at_restored_size() {
    let (mut sched, tx, mut gpu, mut win) = rig(2, 3, true);
    sched.draw_frame(&mut gpu, &mut win).unwrap();

    // 800x600 -> 0x0 -> 1024x768
    win.size = RenderSize::new(0, 0);
    resize(&tx, 0, 0);
    win.after_wait = [RenderSize::new(0, 0), RenderSize::new(1024, 768)].into();
    resize(&tx, 1024, 768);

    gpu.calls.clear();
    let status = sched.draw_frame(&mut gpu, &mut win).unwrap();
    assert!(matches!(status, FrameStatus::Presented { .. }));
    assert_eq!(win.waits, 2);
    let rebuilds: Vec<_> = gpu
        .calls
        .iter()
        .filter(|c| matches!(c, Call::Rebuild(_)))
        .collect();
    assert_eq!(rebuilds, vec![&Call::Rebuild(RenderSize::new(1024, 768))]);
    assert_eq!(gpu.extent, RenderSize::new(1024, 768));
}

#[test]
fn closing_while_minimized_ends_the_loop() {
    let (mut sched, tx, mut gpu, mut win) = rig(2, 3, true);
    win.size = RenderSize::new(0, 0);
    win.closing = true;
    resize(&tx, 0, 0);

    assert_eq!(sched.draw_frame(&mut gpu, &mut win).unwrap(), FrameStatus::Closing);
    assert!(!gpu.calls.iter().any(|c| matches!(c, Call::Rebuild(_) | Call::Acquire(_))));
}

#[test]
fn back_to_back_resizes_coalesce_into_one_rebuild() {
    let (mut sched, tx, mut gpu, mut win) = rig(2, 3, true);
    resize(&tx, 900, 700);
    resize(&tx, 1000, 750);
    win.size = RenderSize::new(1000, 750);

    sched.draw_frame(&mut gpu, &mut win).unwrap();
    assert_eq!(sched.invalidation().rebuilds(), 1);
    assert_eq!(gpu.extent, RenderSize::new(1000, 750));
}

#[test]
fn resize_dropped_by_a_full_queue_still_rebuilds() {
    let size = RenderSize::new(800, 600);
    let (tx, rx) = event_queue(2);
    let mut sched = FrameScheduler::new(&settings(2, false), rx);
    let mut gpu = FakeGpu::new(2, 3, size);
    let mut win = FakeWindow::new(size);

    for key in [Key::W, Key::S] {
        assert!(tx.post(PlatformEvent::KeyChanged { key, pressed: true }));
    }
    win.size = RenderSize::new(1024, 768);
    assert!(!tx.post(PlatformEvent::Resized {
        width: 1024,
        height: 768
    }));

    sched.draw_frame(&mut gpu, &mut win).unwrap();
    sched.draw_frame(&mut gpu, &mut win).unwrap();
    assert_eq!(sched.invalidation().rebuilds(), 1);
    assert_eq!(gpu.extent, RenderSize::new(1024, 768));
}

#[test]
fn failed_present_leaves_the_frame_submitted() {
    let (mut sched, _tx, mut gpu, mut win) = rig(2, 3, false);
    sched.draw_frame(&mut gpu, &mut win).unwrap();

    gpu.lose_surface_on_present = true;
    let err = sched.draw_frame(&mut gpu, &mut win).unwrap_err();
    assert!(matches!(err, FrameError::SurfaceLost));
    assert_eq!(sched.state(), FrameState::Submitted);
    assert_eq!(sched.frames_presented(), 1);
    assert_eq!(sched.current_frame(), 1);
}

#[test]
fn rebuilding_twice_matches_rebuilding_once() {
    let size = RenderSize::new(1024, 768);
    let mut once = FakeGpu::new(2, 3, RenderSize::new(800, 600));
    let mut twice = FakeGpu::new(2, 3, RenderSize::new(800, 600));

    let mut handler = InvalidationHandler::default();
    handler.request(RebuildReason::Resized);
    handler.rebuild(&mut once, size).unwrap();

    let mut handler = InvalidationHandler::default();
    handler.request(RebuildReason::Resized);
    handler.rebuild(&mut twice, size).unwrap();
    handler.request(RebuildReason::Resized);
    handler.rebuild(&mut twice, size).unwrap();
    assert!(!handler.is_pending());

    assert_eq!(once.extent, twice.extent);
    assert_eq!(once.image_count, twice.image_count);
    assert_eq!(once.framebuffers.len(), twice.framebuffers.len());
    assert!(twice.framebuffers.iter().all(|&g| g == twice.generation));
}

#[test]
fn per_image_resources_track_new_image_count() {
    let (mut sched, tx, mut gpu, mut win) = rig(2, 3, false);
    for _ in 0..4 {
        sched.draw_frame(&mut gpu, &mut win).unwrap();
    }

    gpu.next_image_count = 4;
    resize(&tx, 800, 600);
    for _ in 0..8 {
        sched.draw_frame(&mut gpu, &mut win).unwrap();
    }

    assert_eq!(gpu.image_count, 4);
    assert_eq!(gpu.framebuffers.len(), gpu.image_count);
    assert_eq!(gpu.uniforms.len(), gpu.image_count);
    assert_eq!(gpu.descriptor_sets.len(), gpu.image_count);
    // nothing from the first generation survives
    assert!(gpu.uniforms.iter().all(|(g, _)| *g == gpu.generation));
    assert!(gpu.descriptor_sets.iter().all(|&g| g == gpu.generation));
}

#[test]
fn serialized_present_idles_once_per_frame() {
    let (mut sched, _tx, mut gpu, mut win) = rig(3, 3, true);
    for _ in 0..5 {
        sched.draw_frame(&mut gpu, &mut win).unwrap();
    }
    let idles = gpu.calls.iter().filter(|c| **c == Call::PresentIdle).count();
    assert_eq!(idles, 5);
    assert_eq!(sched.frames_presented(), 5);
    assert_eq!(gpu.max_in_flight, 1);
}

#[test]
fn key_events_move_the_camera() {
    let (mut sched, tx, mut gpu, mut win) = rig(2, 3, false);
    let start = sched.rig().eye();
    assert!(tx.post(PlatformEvent::KeyChanged {
        key: Key::W,
        pressed: true
    }));
    for _ in 0..3 {
        std::thread::sleep(std::time::Duration::from_millis(5));
        sched.draw_frame(&mut gpu, &mut win).unwrap();
    }
    assert!(sched.rig().eye().y > start.y);
    assert!(sched.rig().held().contains(lodge_math::HeldKeys::FORWARD));
}
