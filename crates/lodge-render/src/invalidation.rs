// SPDX-License-Identifier: CEPL-1.0
use tracing::{debug, info};

use crate::{FrameBackend, FrameError, RenderSize, SurfaceSizeSource};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RebuildReason {
    Resized,
    OutOfDate,
    Suboptimal,
}

/// Owns the rebuild-pending flag and performs the swapchain rebuild.
#[derive(Debug, Default)]
pub struct InvalidationHandler {
    pending: Option<RebuildReason>,
    rebuilds: u64,
}

impl InvalidationHandler {
    /// Marks the swapchain stale. The first reason since the last rebuild is
    /// kept for the log line.
    pub fn request(&mut self, reason: RebuildReason) {
        if self.pending.is_none() {
            debug!("swapchain rebuild requested: {:?}", reason);
            self.pending = Some(reason);
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn rebuilds(&self) -> u64 {
        self.rebuilds
    }

    /// Blocks on window events until the framebuffer has a nonzero area.
    /// `None` when the window starts closing while we wait.
    pub fn await_drawable_size(&self, surface: &mut dyn SurfaceSizeSource) -> Option<RenderSize> {
        let mut size = surface.framebuffer_size();
        if size.is_zero_area() {
            info!("surface has zero area, waiting for the window to be restored");
        }
        while size.is_zero_area() {
            if surface.is_closing() {
                return None;
            }
            surface.wait_events();
            size = surface.framebuffer_size();
        }
        Some(size)
    }

    /// Device-wide idle wait, then a full rebuild of everything that depends
    /// on the swapchain. `size` must have nonzero area.
    pub fn rebuild<B: FrameBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        size: RenderSize,
    ) -> Result<(), FrameError> {
        let reason = self.pending.unwrap_or(RebuildReason::Resized);
        backend.wait_device_idle()?;
        backend.rebuild_swapchain(size)?;
        self.pending = None;
        self.rebuilds += 1;
        info!(
            "swapchain rebuilt ({:?}): {} with {} images",
            reason,
            backend.extent(),
            backend.image_count()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    struct Sizes {
        queue: VecDeque<RenderSize>,
        current: RenderSize,
        waits: usize,
        closing_after: Option<usize>,
    }

    impl Sizes {
        fn new(initial: RenderSize, later: &[RenderSize]) -> Self {
            Self {
                queue: later.iter().copied().collect(),
                current: initial,
                waits: 0,
                closing_after: None,
            }
        }
    }

    impl SurfaceSizeSource for Sizes {
        fn framebuffer_size(&self) -> RenderSize {
            self.current
        }

        fn wait_events(&mut self) {
            self.waits += 1;
            if let Some(next) = self.queue.pop_front() {
                self.current = next;
            }
        }

        fn is_closing(&self) -> bool {
            self.closing_after.is_some_and(|n| self.waits >= n)
        }
    }

    #[test]
    fn drawable_size_returns_immediately_when_visible() {
        let handler = InvalidationHandler::default();
        let mut src = Sizes::new(RenderSize::new(800, 600), &[]);
        assert_eq!(handler.await_drawable_size(&mut src), Some(RenderSize::new(800, 600)));
        assert_eq!(src.waits, 0);
    }

    #[test]
    fn drawable_size_blocks_through_minimize() {
        let handler = InvalidationHandler::default();
        let mut src = Sizes::new(
            RenderSize::new(0, 0),
            &[RenderSize::new(0, 0), RenderSize::new(0, 0), RenderSize::new(1024, 768)],
        );
        assert_eq!(handler.await_drawable_size(&mut src), Some(RenderSize::new(1024, 768)));
        assert_eq!(src.waits, 3);
    }

    #[test]
    fn closing_while_minimized_gives_up() {
        let handler = InvalidationHandler::default();
        let mut src = Sizes::new(RenderSize::new(0, 0), &[]);
        src.closing_after = Some(2);
        assert_eq!(handler.await_drawable_size(&mut src), None);
        assert_eq!(src.waits, 2);
    }

    #[test]
    fn first_reason_wins_until_rebuild() {
        let mut handler = InvalidationHandler::default();
        assert!(!handler.is_pending());
        handler.request(RebuildReason::Suboptimal);
        handler.request(RebuildReason::Resized);
        assert_eq!(handler.pending, Some(RebuildReason::Suboptimal));
    }
}
