// SPDX-License-Identifier: CEPL-1.0
//! Uploads through a headless device and reads the results back.
//! Needs a Vulkan driver: `cargo test -p ember-render-vk -- --ignored`.

use ember_render_vk::{DecodedImage, DeviceContext, InstanceContext, Mesh, MeshData, Texture, Vertex};
use std::sync::Arc;

fn headless() -> Arc<DeviceContext> {
    let instance = InstanceContext::new(&[], false).expect("vulkan instance");
    DeviceContext::headless(&instance).expect("headless device")
}

fn vertex(pos: [f32; 3], uv: [f32; 2]) -> Vertex {
    Vertex {
        pos,
        color: [1.0, 1.0, 1.0],
        uv,
    }
}

#[test]
#[ignore = "requires a Vulkan device"]
fn test_mesh_upload_round_trip() {
    let ctx = headless();
    let data = MeshData {
        vertices: vec![
            vertex([0.0, 0.0, 0.0], [0.0, 1.0]),
            vertex([1.0, 0.0, 0.0], [1.0, 1.0]),
            vertex([1.0, 1.0, 0.0], [1.0, 0.0]),
            vertex([0.0, 1.0, 0.0], [0.0, 0.0]),
        ],
        indices: vec![0, 1, 2, 2, 3, 0],
    };
    let mesh = Mesh::upload(&ctx, &data).unwrap();
    assert_eq!(mesh.vertex_count(), 4);
    assert_eq!(mesh.index_count(), 6);

    let vertices = mesh.vertex_buffer().read_back().unwrap();
    let indices = mesh.index_buffer().read_back().unwrap();
    assert_eq!(vertices, bytemuck::cast_slice::<Vertex, u8>(&data.vertices));
    assert_eq!(indices, bytemuck::cast_slice::<u32, u8>(&data.indices));
}

#[test]
#[ignore = "requires a Vulkan device"]
fn test_texture_upload_round_trip() {
    let ctx = headless();
    let mut decoded = DecodedImage::solid_color(64, 32, [10, 20, 30, 255]);
    // Mark one texel so orientation errors show up.
    decoded.pixels[..4].copy_from_slice(&[255, 0, 0, 255]);

    let texture = Texture::upload(&ctx, &decoded).unwrap();
    assert_eq!(texture.mip_levels(), 7);
    assert_eq!(texture.extent().width, 64);
    assert_eq!(texture.extent().height, 32);

    let level0 = texture.read_back_level0(&ctx).unwrap();
    assert_eq!(level0, decoded.pixels);
}
