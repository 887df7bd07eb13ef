// SPDX-License-Identifier: CEPL-1.0
//! Backend-agnostic half of the renderer: the frame scheduler, the
//! swapchain invalidation handler and the seam a GPU backend plugs into.

use anyhow::Result;
use lodge_assets::{MeshData, TextureData};
use lodge_core::EventReceiver;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

pub mod backend;
pub mod controls;
mod error;
pub mod invalidation;
pub mod scheduler;
pub mod settings;
pub mod surface;

pub use backend::FrameBackend;
pub use controls::CameraRig;
pub use error::FrameError;
pub use invalidation::{InvalidationHandler, RebuildReason};
pub use scheduler::{FrameScheduler, FrameState, FrameStatus};
pub use settings::{PresentPreference, RenderSettings};
pub use surface::{AcquireOutcome, SubmitOutcome, SurfaceSizeSource, SurfaceStatus};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RenderSize {
    pub width: u32,
    pub height: u32,
}

impl RenderSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Minimized windows report 0x0; no swapchain can be built for them.
    pub fn is_zero_area(self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn aspect(self) -> f32 {
        self.width as f32 / self.height.max(1) as f32
    }
}

impl std::fmt::Display for RenderSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// What gets drawn. Uploaded once at startup and never rebuilt.
pub struct Scene<'a> {
    pub mesh: &'a MeshData,
    pub texture: &'a TextureData,
}

pub trait Renderer {
    fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
        settings: &RenderSettings,
        scene: Scene<'_>,
        events: EventReceiver,
    ) -> Result<Self>
    where
        Self: Sized;

    /// Runs one scheduler iteration. Any `Err` is fatal.
    fn draw_frame(
        &mut self,
        surface: &mut dyn SurfaceSizeSource,
    ) -> std::result::Result<FrameStatus, FrameError>;

    fn extent(&self) -> RenderSize;
    fn set_clear_color(&mut self, rgba: [f32; 4]);

    /// Blocks until the device has finished all submitted work.
    fn wait_idle(&mut self) -> std::result::Result<(), FrameError>;
}
