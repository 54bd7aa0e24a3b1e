// SPDX-License-Identifier: CEPL-1.0
//! Wavefront OBJ meshes: parse, deduplicate, upload.

use ash::vk;
use bytemuck::{Pod, Zeroable};
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::mem::{offset_of, size_of};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

use crate::context::DeviceContext;
use crate::error::{RenderError, RenderResult};
use crate::memory::GpuBuffer;

pub const DEFAULT_COLOR: [f32; 3] = [1.0, 1.0, 1.0];

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct Vertex {
    pub pos: [f32; 3],
    pub color: [f32; 3],
    pub uv: [f32; 2],
}

impl Vertex {
    fn bits(&self) -> [u32; 8] {
        [
            self.pos[0].to_bits(),
            self.pos[1].to_bits(),
            self.pos[2].to_bits(),
            self.color[0].to_bits(),
            self.color[1].to_bits(),
            self.color[2].to_bits(),
            self.uv[0].to_bits(),
            self.uv[1].to_bits(),
        ]
    }

    pub fn binding_description() -> vk::VertexInputBindingDescription {
        vk::VertexInputBindingDescription {
            binding: 0,
            stride: size_of::<Vertex>() as u32,
            input_rate: vk::VertexInputRate::VERTEX,
        }
    }

    pub fn attribute_descriptions() -> [vk::VertexInputAttributeDescription; 3] {
        [
            vk::VertexInputAttributeDescription {
                location: 0,
                binding: 0,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: offset_of!(Vertex, pos) as u32,
            },
            vk::VertexInputAttributeDescription {
                location: 1,
                binding: 0,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: offset_of!(Vertex, color) as u32,
            },
            vk::VertexInputAttributeDescription {
                location: 2,
                binding: 0,
                format: vk::Format::R32G32_SFLOAT,
                offset: offset_of!(Vertex, uv) as u32,
            },
        ]
    }
}

// Bitwise identity, so hashing and equality always agree.
impl PartialEq for Vertex {
    fn eq(&self, other: &Self) -> bool {
        self.bits() == other.bits()
    }
}

impl Eq for Vertex {}

impl Hash for Vertex {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.bits().hash(state);
    }
}

/// One corner of a face: indices into the attribute arrays.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FaceVertex {
    pub position: u32,
    pub texcoord: Option<u32>,
}

/// Attribute arrays as parsed, before any deduplication.
#[derive(Clone, Debug, Default)]
pub struct ObjAttributes {
    /// xyz triples.
    pub positions: Vec<f32>,
    /// uv pairs, V pointing up.
    pub texcoords: Vec<f32>,
    /// Triangulated face corners, three per triangle.
    pub corners: Vec<FaceVertex>,
}

/// Parses `path` and merges every object in it into one attribute set.
pub fn load_obj(path: &Path) -> RenderResult<ObjAttributes> {
    let opts = tobj::LoadOptions {
        triangulate: true,
        single_index: false,
        ignore_points: true,
        ignore_lines: true,
        ..Default::default()
    };
    let (models, _materials) = tobj::load_obj(path, &opts).map_err(|source| RenderError::ModelLoad {
        path: path.to_path_buf(),
        source,
    })?;

    let mut attrs = ObjAttributes::default();
    for model in &models {
        let mesh = &model.mesh;
        let pos_base = (attrs.positions.len() / 3) as u32;
        let uv_base = (attrs.texcoords.len() / 2) as u32;
        attrs.positions.extend_from_slice(&mesh.positions);
        attrs.texcoords.extend_from_slice(&mesh.texcoords);

        let has_uv = !mesh.texcoord_indices.is_empty();
        for (i, &p) in mesh.indices.iter().enumerate() {
            let texcoord = if has_uv {
                mesh.texcoord_indices.get(i).map(|&t| uv_base + t)
            } else {
                None
            };
            attrs.corners.push(FaceVertex {
                position: pos_base + p,
                texcoord,
            });
        }
    }
    Ok(attrs)
}

#[derive(Clone, Debug, Default)]
pub struct MeshData {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
}

impl MeshData {
    /// Builds one vertex per distinct (position, color, uv) record; the first
    /// occurrence fixes its index. UV V is flipped for a top-left origin.
    pub fn from_attributes(attrs: &ObjAttributes) -> Result<Self, String> {
        let mut unique: HashMap<Vertex, u32> = HashMap::new();
        let mut data = MeshData {
            vertices: Vec::new(),
            indices: Vec::with_capacity(attrs.corners.len()),
        };

        for corner in &attrs.corners {
            let p = corner.position as usize * 3;
            let pos = attrs
                .positions
                .get(p..p + 3)
                .ok_or_else(|| format!("position index {} out of range", corner.position))?;
            let uv = match corner.texcoord {
                Some(t) => {
                    let t = t as usize * 2;
                    let uv = attrs
                        .texcoords
                        .get(t..t + 2)
                        .ok_or_else(|| format!("texcoord index {} out of range", t / 2))?;
                    [uv[0], 1.0 - uv[1]]
                }
                None => [0.0, 1.0],
            };
            let vertex = Vertex {
                pos: [pos[0], pos[1], pos[2]],
                color: DEFAULT_COLOR,
                uv,
            };

            let index = match unique.get(&vertex) {
                Some(&i) => i,
                None => {
                    let i = data.vertices.len() as u32;
                    unique.insert(vertex, i);
                    data.vertices.push(vertex);
                    i
                }
            };
            data.indices.push(index);
        }
        Ok(data)
    }
}

/// Device-local vertex and index buffers of one mesh.
pub struct Mesh {
    vertex_buffer: GpuBuffer,
    index_buffer: GpuBuffer,
    vertex_count: u32,
    index_count: u32,
}

impl Mesh {
    pub fn load(ctx: &Arc<DeviceContext>, path: &Path) -> RenderResult<Self> {
        let _t = ember_core::ScopedTimer::new("load_model");
        let attrs = load_obj(path)?;
        let data = MeshData::from_attributes(&attrs).map_err(|reason| RenderError::InvalidModel {
            path: path.to_path_buf(),
            reason,
        })?;
        if data.indices.is_empty() {
            return Err(RenderError::InvalidModel {
                path: path.to_path_buf(),
                reason: "no triangles".to_owned(),
            });
        }
        info!(
            "model {:?}: {} corners -> {} unique vertices",
            path,
            data.indices.len(),
            data.vertices.len()
        );
        Self::upload(ctx, &data)
    }

    pub fn upload(ctx: &Arc<DeviceContext>, data: &MeshData) -> RenderResult<Self> {
        let vertex_buffer = GpuBuffer::device_local(
            ctx,
            vk::BufferUsageFlags::VERTEX_BUFFER,
            bytemuck::cast_slice(&data.vertices),
        )?;
        let index_buffer = GpuBuffer::device_local(
            ctx,
            vk::BufferUsageFlags::INDEX_BUFFER,
            bytemuck::cast_slice(&data.indices),
        )?;
        Ok(Self {
            vertex_buffer,
            index_buffer,
            vertex_count: data.vertices.len() as u32,
            index_count: data.indices.len() as u32,
        })
    }

    pub fn vertex_buffer(&self) -> &GpuBuffer {
        &self.vertex_buffer
    }

    pub fn index_buffer(&self) -> &GpuBuffer {
        &self.index_buffer
    }

    pub fn vertex_count(&self) -> u32 {
        self.vertex_count
    }

    pub fn index_count(&self) -> u32 {
        self.index_count
    }

    /// Binds both buffers and issues the indexed draw.
    ///
    /// # Safety
    /// `cmd` must be in the recording state inside a render pass with a
    /// compatible pipeline bound.
    pub unsafe fn record_draw(&self, device: &ash::Device, cmd: vk::CommandBuffer) {
        unsafe {
            device.cmd_bind_vertex_buffers(cmd, 0, &[self.vertex_buffer.handle()], &[0]);
            device.cmd_bind_index_buffer(cmd, self.index_buffer.handle(), 0, vk::IndexType::UINT32);
            device.cmd_draw_indexed(cmd, self.index_count, 1, 0, 0, 0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn corner(position: u32, texcoord: u32) -> FaceVertex {
        FaceVertex {
            position,
            texcoord: Some(texcoord),
        }
    }

    fn quad() -> ObjAttributes {
        ObjAttributes {
            positions: vec![
                0.0, 0.0, 0.0, //
                1.0, 0.0, 0.0, //
                1.0, 1.0, 0.0, //
                0.0, 1.0, 0.0,
            ],
            texcoords: vec![0.0, 0.0, 1.0, 0.0, 1.0, 1.0, 0.0, 1.0],
            corners: vec![
                corner(0, 0),
                corner(1, 1),
                corner(2, 2),
                corner(2, 2),
                corner(3, 3),
                corner(0, 0),
            ],
        }
    }

    #[test]
    fn test_shared_corners_are_deduplicated() {
        let mesh = MeshData::from_attributes(&quad()).unwrap();
        assert_eq!(mesh.vertices.len(), 4);
        assert_eq!(mesh.indices, vec![0, 1, 2, 2, 3, 0]);
    }

    #[test]
    fn test_same_position_different_uv_stays_distinct() {
        let mut attrs = quad();
        // Seam: corner 0 reused with another uv.
        attrs.corners[5] = corner(0, 2);
        let mesh = MeshData::from_attributes(&attrs).unwrap();
        assert_eq!(mesh.vertices.len(), 5);
        assert_eq!(mesh.indices.len(), 6);
    }

    #[test]
    fn test_uv_flip_and_default_color() {
        let mesh = MeshData::from_attributes(&quad()).unwrap();
        let v = mesh.vertices[2];
        assert_eq!(v.pos, [1.0, 1.0, 0.0]);
        assert_eq!(v.uv, [1.0, 0.0]);
        assert_eq!(v.color, DEFAULT_COLOR);
        assert_eq!(mesh.vertices[0].uv, [0.0, 1.0]);
    }

    #[test]
    fn test_unique_count_matches_distinct_records() {
        // Deterministic pseudo-random corners over small attribute pools.
        let mut attrs = ObjAttributes {
            positions: (0..24).map(|i| (i % 7) as f32 * 0.5).collect(),
            texcoords: (0..10).map(|i| (i % 3) as f32 * 0.25).collect(),
            corners: Vec::new(),
        };
        let mut seed = 0x2545_f491_u32;
        for _ in 0..300 {
            seed = seed.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
            attrs.corners.push(corner((seed >> 8) % 8, (seed >> 20) % 5));
        }

        let mesh = MeshData::from_attributes(&attrs).unwrap();
        let distinct: HashSet<[u32; 8]> = attrs
            .corners
            .iter()
            .map(|c| {
                let p = c.position as usize * 3;
                let t = c.texcoord.unwrap() as usize * 2;
                Vertex {
                    pos: [attrs.positions[p], attrs.positions[p + 1], attrs.positions[p + 2]],
                    color: DEFAULT_COLOR,
                    uv: [attrs.texcoords[t], 1.0 - attrs.texcoords[t + 1]],
                }
                .bits()
            })
            .collect();

        assert_eq!(mesh.vertices.len(), distinct.len());
        assert_eq!(mesh.indices.len(), attrs.corners.len());
        assert!(mesh.indices.iter().all(|&i| (i as usize) < mesh.vertices.len()));
    }

    #[test]
    fn test_out_of_range_index_is_rejected() {
        let mut attrs = quad();
        attrs.corners.push(corner(9, 0));
        assert!(MeshData::from_attributes(&attrs).is_err());
    }

    #[test]
    fn test_missing_texcoords() {
        let attrs = ObjAttributes {
            positions: vec![0.0; 9],
            texcoords: Vec::new(),
            corners: (0..3)
                .map(|p| FaceVertex {
                    position: p,
                    texcoord: None,
                })
                .collect(),
        };
        let mesh = MeshData::from_attributes(&attrs).unwrap();
        assert_eq!(mesh.vertices.len(), 1);
        assert_eq!(mesh.indices, vec![0, 0, 0]);
    }

    #[test]
    fn test_load_obj_merges_objects() {
        let path = std::env::temp_dir().join(format!("ember-mesh-{}.obj", std::process::id()));
        let obj = "\
o first
v 0 0 0
v 1 0 0
v 1 1 0
v 0 1 0
vt 0 0
vt 1 0
vt 1 1
vt 0 1
f 1/1 2/2 3/3 4/4
o second
v 0 0 1
v 1 0 1
v 1 1 1
vt 0.5 0.5
f 5/5 6/5 7/5
";
        std::fs::write(&path, obj).unwrap();
        let attrs = load_obj(&path).unwrap();
        std::fs::remove_file(&path).ok();

        // The quad is triangulated into two triangles.
        assert_eq!(attrs.corners.len(), 9);
        let mesh = MeshData::from_attributes(&attrs).unwrap();
        assert_eq!(mesh.indices.len(), 9);
        assert_eq!(mesh.vertices.len(), 7);
        assert!(mesh.vertices.iter().any(|v| v.pos == [1.0, 1.0, 1.0] && v.uv == [0.5, 0.5]));
    }

    #[test]
    fn test_load_obj_missing_file() {
        let err = load_obj(Path::new("no/such/model.obj")).unwrap_err();
        assert!(matches!(err, RenderError::ModelLoad { .. }));
    }

    #[test]
    fn test_vertex_layout() {
        assert_eq!(size_of::<Vertex>(), 32);
        let attrs = Vertex::attribute_descriptions();
        assert_eq!(attrs[1].offset, 12);
        assert_eq!(attrs[2].offset, 24);
        assert_eq!(Vertex::binding_description().stride, 32);
    }
}
