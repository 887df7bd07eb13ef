// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use lodge_render::FrameError;

/// Maps a failed Vulkan call onto the fatal error taxonomy.
pub(crate) fn classify(call: &'static str, result: vk::Result) -> FrameError {
    match result {
        vk::Result::ERROR_DEVICE_LOST => FrameError::DeviceLost,
        vk::Result::ERROR_SURFACE_LOST_KHR => FrameError::SurfaceLost,
        vk::Result::ERROR_OUT_OF_HOST_MEMORY | vk::Result::ERROR_OUT_OF_DEVICE_MEMORY => {
            FrameError::AllocationFailure { call }
        }
        other => FrameError::Api {
            call,
            detail: format!("{other:?}"),
        },
    }
}

pub(crate) trait VkResultExt<T> {
    fn or_fatal(self, call: &'static str) -> Result<T, FrameError>;
}

impl<T> VkResultExt<T> for Result<T, vk::Result> {
    fn or_fatal(self, call: &'static str) -> Result<T, FrameError> {
        self.map_err(|e| classify(call, e))
    }
}
