// SPDX-License-Identifier: CEPL-1.0
//! Windowing glue. Everything winit-specific stays behind this crate so the
//! render crates only ever see `lodge_core` events.

pub mod input;

pub use input::{map_key_code, translate, translate_key};
pub use winit;
