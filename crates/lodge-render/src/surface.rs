// SPDX-License-Identifier: CEPL-1.0
use crate::RenderSize;

/// Window-side queries the invalidation handler needs while it waits for a
/// drawable surface.
pub trait SurfaceSizeSource {
    /// Current framebuffer size in physical pixels.
    fn framebuffer_size(&self) -> RenderSize;

    /// Blocks until at least one window event has been processed.
    fn wait_events(&mut self);

    /// True once the user asked to close; stops a zero-area wait.
    fn is_closing(&self) -> bool {
        false
    }
}

/// Present result as the scheduler sees it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SurfaceStatus {
    Optimal,
    Suboptimal,
    OutOfDate,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AcquireOutcome {
    Ready(u32),
    /// Usable this frame; rebuild after presenting.
    Suboptimal(u32),
    OutOfDate,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubmitOutcome {
    Submitted,
    /// Nothing was queued and the slot's fence is signaled again.
    OutOfDate,
}
