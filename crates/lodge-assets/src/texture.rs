// SPDX-License-Identifier: CEPL-1.0
use std::path::Path;

use tracing::info;

use crate::AssetError;

/// Tightly packed RGBA8 pixels, row-major, top row first.
#[derive(Clone, Debug, PartialEq)]
pub struct TextureData {
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
}

impl TextureData {
    pub fn byte_len(&self) -> usize {
        self.rgba.len()
    }

    /// Two-tone checkerboard with `cell`-pixel squares. Stands in when no
    /// texture file is configured.
    pub fn checkerboard(size: u32, cell: u32) -> Self {
        let size = size.max(1);
        let cell = cell.max(1);
        let mut rgba = Vec::with_capacity((size * size * 4) as usize);
        for y in 0..size {
            for x in 0..size {
                let light = ((x / cell) + (y / cell)) % 2 == 0;
                let v = if light { 0xE0 } else { 0x40 };
                rgba.extend_from_slice(&[v, v, v, 0xFF]);
            }
        }
        TextureData {
            width: size,
            height: size,
            rgba,
        }
    }
}

pub fn load_texture(path: impl AsRef<Path>) -> Result<TextureData, AssetError> {
    let path = path.as_ref();
    let img = image::open(path)
        .map_err(|source| AssetError::Image {
            path: path.to_owned(),
            source,
        })?
        .to_rgba8();
    let (width, height) = img.dimensions();
    info!("loaded {} ({}x{})", path.display(), width, height);
    Ok(TextureData {
        width,
        height,
        rgba: img.into_raw(),
    })
}
