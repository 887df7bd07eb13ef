// SPDX-License-Identifier: CEPL-1.0
use thiserror::Error;

/// Unrecoverable GPU failures. Out-of-date and suboptimal surfaces are not
/// errors; they come back as values from the backend.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("presentation surface lost")]
    SurfaceLost,
    #[error("device lost")]
    DeviceLost,
    #[error("{call}: out of memory")]
    AllocationFailure { call: &'static str },
    #[error("{call} failed: {detail}")]
    Api { call: &'static str, detail: String },
}
