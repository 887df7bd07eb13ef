// SPDX-License-Identifier: CEPL-1.0
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use bytemuck::{Pod, Zeroable};
use tracing::info;

use crate::AssetError;

/// Interleaved vertex as the pipeline consumes it: location 0 = pos,
/// 1 = color, 2 = uv.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct ModelVertex {
    pub pos: [f32; 3],
    pub color: [f32; 3],
    pub uv: [f32; 2],
}

impl ModelVertex {
    pub const STRIDE: usize = std::mem::size_of::<ModelVertex>();

    const fn new(pos: [f32; 3], color: [f32; 3], uv: [f32; 2]) -> Self {
        Self { pos, color, uv }
    }

    // exact bit pattern; -0.0 and 0.0 stay distinct, NaN compares equal to itself
    fn key(&self) -> [u32; 8] {
        bytemuck::cast(*self)
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct MeshData {
    pub vertices: Vec<ModelVertex>,
    pub indices: Vec<u32>,
}

impl MeshData {
    pub fn index_count(&self) -> u32 {
        self.indices.len() as u32
    }

    /// Two stacked quads half a unit apart, one color per corner.
    pub fn stacked_quads() -> Self {
        const CORNERS: [([f32; 2], [f32; 3], [f32; 2]); 4] = [
            ([-0.5, -0.5], [1.0, 0.0, 0.0], [1.0, 0.0]),
            ([0.5, -0.5], [0.0, 1.0, 0.0], [0.0, 0.0]),
            ([0.5, 0.5], [0.0, 0.0, 1.0], [0.0, 1.0]),
            ([-0.5, 0.5], [1.0, 0.0, 1.0], [1.0, 1.0]),
        ];
        let mut vertices = Vec::with_capacity(8);
        for z in [0.0, -0.5] {
            for (xy, color, uv) in CORNERS {
                vertices.push(ModelVertex::new([xy[0], xy[1], z], color, uv));
            }
        }
        MeshData {
            vertices,
            indices: vec![0, 1, 2, 2, 3, 0, 4, 5, 6, 6, 7, 4],
        }
    }
}

/// Collects triangle-list vertices, sharing identical ones.
#[derive(Default)]
pub struct MeshBuilder {
    mesh: MeshData,
    seen: HashMap<[u32; 8], u32>,
}

impl MeshBuilder {
    pub fn push(&mut self, vertex: ModelVertex) {
        let next = self.mesh.vertices.len() as u32;
        let index = *self.seen.entry(vertex.key()).or_insert_with(|| {
            self.mesh.vertices.push(vertex);
            next
        });
        self.mesh.indices.push(index);
    }

    pub fn finish(self) -> MeshData {
        self.mesh
    }
}

pub fn load_obj(path: impl AsRef<Path>) -> Result<MeshData, AssetError> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|_| AssetError::Obj {
        path: path.to_owned(),
        source: tobj::LoadError::OpenFileFailed,
    })?;
    let mesh = parse_obj(&mut BufReader::new(file), path)?;
    info!(
        "loaded {}: {} vertices, {} indices",
        path.display(),
        mesh.vertices.len(),
        mesh.indices.len()
    );
    Ok(mesh)
}

/// Every shape in the stream, white vertex color, V flipped for Vulkan's
/// top-left texture origin. Materials are ignored.
pub fn parse_obj<R: BufRead>(reader: &mut R, origin: &Path) -> Result<MeshData, AssetError> {
    let obj_err = |source| AssetError::Obj {
        path: origin.to_owned(),
        source,
    };
    let (models, _materials) = tobj::load_obj_buf(reader, &tobj::GPU_LOAD_OPTIONS, |_| {
        Err(tobj::LoadError::OpenFileFailed)
    })
    .map_err(obj_err)?;

    let mut builder = MeshBuilder::default();
    for model in &models {
        let mesh = &model.mesh;
        for &index in &mesh.indices {
            let i = index as usize;
            let pos = mesh
                .positions
                .get(3 * i..3 * i + 3)
                .ok_or_else(|| obj_err(tobj::LoadError::FaceVertexOutOfBounds))?;
            let uv = match mesh.texcoords.get(2 * i..2 * i + 2) {
                Some(t) => [t[0], 1.0 - t[1]],
                None => [0.0, 0.0],
            };
            builder.push(ModelVertex::new([pos[0], pos[1], pos[2]], [1.0; 3], uv));
        }
    }

    let mesh = builder.finish();
    if mesh.indices.is_empty() {
        return Err(AssetError::EmptyMesh {
            path: origin.to_owned(),
        });
    }
    Ok(mesh)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const QUAD: &str = "\
v 0 0 0
v 1 0 0
v 1 1 0
v 0 1 0
vt 0 0
vt 1 0
vt 1 1
vt 0 1
f 1/1 2/2 3/3
f 3/3 4/4 1/1
";

    #[test]
    fn vertex_layout_is_packed() {
        assert_eq!(ModelVertex::STRIDE, 32);
        assert_eq!(std::mem::offset_of!(ModelVertex, color), 12);
        assert_eq!(std::mem::offset_of!(ModelVertex, uv), 24);
    }

    #[test]
    fn builder_shares_identical_vertices() {
        let a = ModelVertex::new([0.0; 3], [1.0; 3], [0.0; 2]);
        let b = ModelVertex::new([1.0, 0.0, 0.0], [1.0; 3], [0.0; 2]);
        let mut builder = MeshBuilder::default();
        for v in [a, b, a, a, b] {
            builder.push(v);
        }
        let mesh = builder.finish();
        assert_eq!(mesh.vertices, vec![a, b]);
        assert_eq!(mesh.indices, vec![0, 1, 0, 0, 1]);
    }

    #[test]
    fn obj_quad_dedupes_and_flips_v() {
        let mesh = parse_obj(&mut Cursor::new(QUAD), Path::new("quad.obj")).unwrap();
        assert_eq!(mesh.vertices.len(), 4);
        assert_eq!(mesh.index_count(), 6);
        assert!(mesh.vertices.iter().all(|v| v.color == [1.0; 3]));

        let origin = mesh.vertices.iter().find(|v| v.pos == [0.0, 0.0, 0.0]).unwrap();
        assert_eq!(origin.uv, [0.0, 1.0]);
        let top = mesh.vertices.iter().find(|v| v.pos == [1.0, 1.0, 0.0]).unwrap();
        assert_eq!(top.uv, [1.0, 0.0]);
    }

    #[test]
    fn obj_without_faces_is_empty() {
        let err = parse_obj(&mut Cursor::new("v 0 0 0\n"), Path::new("dots.obj")).unwrap_err();
        assert!(matches!(err, AssetError::EmptyMesh { .. }));
    }

    #[test]
    fn missing_obj_reports_path() {
        let err = load_obj("/nonexistent/model.obj").unwrap_err();
        assert!(err.to_string().contains("/nonexistent/model.obj"));
    }

    #[test]
    fn stacked_quads_index_both_layers() {
        let mesh = MeshData::stacked_quads();
        assert_eq!(mesh.vertices.len(), 8);
        assert_eq!(mesh.index_count(), 12);
        assert!(mesh.indices.iter().all(|&i| (i as usize) < mesh.vertices.len()));
        assert_eq!(mesh.vertices[4].pos, [-0.5, -0.5, -0.5]);
    }
}
