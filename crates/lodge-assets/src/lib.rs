// SPDX-License-Identifier: CEPL-1.0
//! CPU-side model and texture data, ready for upload by a render backend.

mod error;
pub mod mesh;
pub mod texture;

pub use error::AssetError;
pub use mesh::{load_obj, parse_obj, MeshBuilder, MeshData, ModelVertex};
pub use texture::{load_texture, TextureData};
