//! Helpers shared by the export integration tests.
#![allow(dead_code)]

use image::{Rgba, RgbaImage};
use quadscene::{InMemoryBitmaps, Quad};
use serde_json::Value;
use std::path::Path;

/// A `size` x `size` black and white checkerboard.
pub fn checkerboard(size: u32) -> RgbaImage {
    RgbaImage::from_fn(size, size, |x, y| {
        if (x + y) % 2 == 0 {
            Rgba([255, 255, 255, 255])
        } else {
            Rgba([0, 0, 0, 255])
        }
    })
}

pub fn solid(size: u32, color: [u8; 4]) -> RgbaImage {
    RgbaImage::from_pixel(size, size, Rgba(color))
}

pub const UNIT_UV: [f32; 8] = [0.0, 0.0, 1.0, 0.0, 1.0, 1.0, 0.0, 1.0];

/// Unit square on the y = `y` plane with its corner at (x, z), wound
/// counter-clockwise when seen from above.
pub fn floor_quad(material: &str, sprite: &str, x: f32, y: f32, z: f32) -> Quad {
    Quad::new(
        material,
        sprite,
        [
            x, y, z, //
            x, y, z + 1.0, //
            x + 1.0, y, z + 1.0, //
            x + 1.0, y, z,
        ],
        UNIT_UV,
    )
}

pub fn stone_bitmaps() -> InMemoryBitmaps {
    InMemoryBitmaps::new().with("stone_top", checkerboard(16))
}

pub fn read_document(path: &Path) -> Value {
    let text = std::fs::read_to_string(path).expect("document");
    serde_json::from_str(&text).expect("valid json")
}

pub fn array_len(doc: &Value, key: &str) -> usize {
    doc.get(key)
        .and_then(Value::as_array)
        .map(Vec::len)
        .unwrap_or(0)
}

/// Raw bytes behind accessor `index`.
pub fn accessor_bytes(doc: &Value, dir: &Path, index: usize) -> Vec<u8> {
    let accessor = &doc["accessors"][index];
    let view = &doc["bufferViews"][accessor["bufferView"].as_u64().unwrap() as usize];
    let buffer = &doc["buffers"][view["buffer"].as_u64().unwrap() as usize];
    let bytes = std::fs::read(dir.join(buffer["uri"].as_str().unwrap())).unwrap();
    let start = view.get("byteOffset").and_then(Value::as_u64).unwrap_or(0) as usize
        + accessor.get("byteOffset").and_then(Value::as_u64).unwrap_or(0) as usize;
    let len = view["byteLength"].as_u64().unwrap() as usize;
    bytes[start..start + len].to_vec()
}

pub fn accessor_f32(doc: &Value, dir: &Path, index: usize) -> Vec<f32> {
    accessor_bytes(doc, dir, index)
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

pub fn accessor_u32(doc: &Value, dir: &Path, index: usize) -> Vec<u32> {
    accessor_bytes(doc, dir, index)
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

/// Accessor index of `attribute` on the single primitive of mesh `mesh`.
pub fn attribute(doc: &Value, mesh: usize, attribute: &str) -> usize {
    doc["meshes"][mesh]["primitives"][0]["attributes"][attribute]
        .as_u64()
        .unwrap() as usize
}

pub fn indices(doc: &Value, mesh: usize) -> usize {
    doc["meshes"][mesh]["primitives"][0]["indices"].as_u64().unwrap() as usize
}
