//! Per-material vertex deduplication and index-buffer construction.
//!
//! Corners are re-wound counter-clockwise, snapped to a quantization grid
//! (positions 1e-4, UVs 1e-5, colors 1e-2) and merged with earlier vertices
//! that share the same sprite pair and snapped attributes. A quad is staged
//! first and committed only if it is neither a duplicate of an emitted quad
//! nor degenerate after snapping.

use rustc_hash::{FxHashMap, FxHashSet};
use smol_str::SmolStr;

use crate::index::SpriteId;
use crate::store::{GeometryRecord, UvRecord};

const POSITION_SCALE: f64 = 1e4;
const UV_SCALE: f64 = 1e5;
const COLOR_SCALE: f64 = 1e2;

/// Attributes of one quad as handed to [`PrimitiveData::register_quad`].
#[derive(Debug, Clone, PartialEq)]
pub struct QuadCorners {
    pub sprite: SpriteId,
    pub overlay: Option<SpriteId>,
    pub positions: [f32; 12],
    pub uv0: [f32; 8],
    pub uv1: [f32; 8],
    pub colors: [f32; 16],
    /// Used for winding only when the corners themselves span no area.
    pub normal: [f32; 3],
    pub double_sided: bool,
}

impl QuadCorners {
    pub fn from_records(geometry: &GeometryRecord, uv: &UvRecord) -> Self {
        Self {
            sprite: geometry.sprite,
            overlay: geometry.overlay,
            positions: geometry.positions,
            uv0: uv.uv0,
            uv1: uv.uv1,
            colors: geometry.colors,
            normal: geometry.normal,
            double_sided: geometry.double_sided,
        }
    }
}

/// Result of registering one quad.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuadOutcome {
    /// Vertex indices of the re-wound corners.
    Accepted([u32; 4]),
    /// Same four vertices as a quad already emitted for this material.
    Duplicate,
    /// Two corners collapse onto each other after snapping.
    Degenerate,
}

impl QuadOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, QuadOutcome::Accepted(_))
    }

    /// Order-independent identity of an accepted quad.
    pub fn identity(&self) -> Option<[u32; 4]> {
        match self {
            QuadOutcome::Accepted(indices) => Some(quad_identity(*indices)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct VertexKey {
    sprite: SpriteId,
    overlay: Option<SpriteId>,
    position: [i64; 3],
    uv0: [i64; 2],
    uv1: [i64; 2],
    color: [i64; 4],
}

#[derive(Debug, Clone, Copy)]
struct Staged {
    key: VertexKey,
    position: [f32; 3],
    uv0: [f32; 2],
    uv1: [f32; 2],
    color: [f32; 4],
}

/// Vertex and index data accumulated for one material group.
#[derive(Debug, Default)]
pub struct PrimitiveData {
    pub material: SmolStr,
    pub positions: Vec<f32>,
    pub uv0: Vec<f32>,
    pub uv1: Vec<f32>,
    pub colors: Vec<f32>,
    pub indices: Vec<u32>,
    pub double_sided: bool,
    pub accepted: u64,
    pub duplicates: u64,
    pub degenerate: u64,
    lookup: FxHashMap<VertexKey, u32>,
    quads: FxHashSet<[u32; 4]>,
    min: [f32; 3],
    max: [f32; 3],
}

impl PrimitiveData {
    pub fn new(material: impl Into<SmolStr>) -> Self {
        Self::with_capacity(material, 0)
    }

    /// Pre-size the attribute buffers for `quads` quads.
    pub fn with_capacity(material: impl Into<SmolStr>, quads: usize) -> Self {
        Self {
            material: material.into(),
            positions: Vec::with_capacity(quads * 12),
            uv0: Vec::with_capacity(quads * 8),
            uv1: Vec::with_capacity(quads * 8),
            colors: Vec::with_capacity(quads * 16),
            indices: Vec::with_capacity(quads * 6),
            min: [f32::INFINITY; 3],
            max: [f32::NEG_INFINITY; 3],
            ..Self::default()
        }
    }

    pub fn register_record(&mut self, geometry: &GeometryRecord, uv: &UvRecord) -> QuadOutcome {
        self.register_quad(&QuadCorners::from_records(geometry, uv))
    }

    /// Wind, snap and merge one quad.
    pub fn register_quad(&mut self, quad: &QuadCorners) -> QuadOutcome {
        let order = sort_quad_ccw(&quad.positions, quad.normal);

        let base = self.vertex_count() as u32;
        let mut staged: Vec<Staged> = Vec::with_capacity(4);
        let mut resolved = [0u32; 4];
        for (slot, &corner) in order.iter().enumerate() {
            let vertex = stage_corner(quad, corner);
            resolved[slot] = match self.lookup.get(&vertex.key) {
                Some(&index) => index,
                None => match staged.iter().position(|s| s.key == vertex.key) {
                    Some(i) => base + i as u32,
                    None => {
                        staged.push(vertex);
                        base + staged.len() as u32 - 1
                    }
                },
            };
        }

        let identity = quad_identity(resolved);
        if self.quads.contains(&identity) {
            self.duplicates += 1;
            return QuadOutcome::Duplicate;
        }
        if has_coincident_corners(resolved, &quad.positions) {
            self.degenerate += 1;
            return QuadOutcome::Degenerate;
        }

        for vertex in staged {
            let index = self.vertex_count() as u32;
            self.lookup.insert(vertex.key, index);
            self.positions.extend_from_slice(&vertex.position);
            self.uv0.extend_from_slice(&vertex.uv0);
            self.uv1.extend_from_slice(&vertex.uv1);
            self.colors.extend_from_slice(&vertex.color);
            for axis in 0..3 {
                self.min[axis] = self.min[axis].min(vertex.position[axis]);
                self.max[axis] = self.max[axis].max(vertex.position[axis]);
            }
        }
        self.quads.insert(identity);
        let [a, b, c, d] = resolved;
        self.indices.extend_from_slice(&[a, b, c, a, c, d]);
        self.double_sided |= quad.double_sided;
        self.accepted += 1;
        QuadOutcome::Accepted(resolved)
    }

    pub fn vertex_count(&self) -> usize {
        self.positions.len() / 3
    }

    pub fn index_count(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Component-wise position bounds of the committed vertices.
    pub fn bounds(&self) -> Option<([f32; 3], [f32; 3])> {
        (!self.is_empty()).then_some((self.min, self.max))
    }

    /// Drop the lookup tables once no further quads will be registered.
    pub fn seal(&mut self) {
        self.lookup = FxHashMap::default();
        self.quads = FxHashSet::default();
    }
}

fn stage_corner(quad: &QuadCorners, corner: usize) -> Staged {
    let p = corner * 3;
    let t = corner * 2;
    let c = corner * 4;
    let position = [quad.positions[p], quad.positions[p + 1], quad.positions[p + 2]];
    let uv0 = [quad.uv0[t], quad.uv0[t + 1]];
    let uv1 = [quad.uv1[t], quad.uv1[t + 1]];
    let color = [
        quad.colors[c],
        quad.colors[c + 1],
        quad.colors[c + 2],
        quad.colors[c + 3],
    ];
    Staged {
        key: VertexKey {
            sprite: quad.sprite,
            overlay: quad.overlay,
            position: position.map(|v| quantize(v, POSITION_SCALE)),
            uv0: uv0.map(|v| quantize(v, UV_SCALE)),
            uv1: uv1.map(|v| quantize(v, UV_SCALE)),
            color: color.map(|v| quantize(v, COLOR_SCALE)),
        },
        position,
        uv0,
        uv1,
        color,
    }
}

fn quantize(value: f32, scale: f64) -> i64 {
    (value as f64 * scale).round() as i64
}

fn quad_identity(mut indices: [u32; 4]) -> [u32; 4] {
    indices.sort_unstable();
    indices
}

/// Any shared vertex index, or any two corners on the same snapped position.
fn has_coincident_corners(indices: [u32; 4], positions: &[f32; 12]) -> bool {
    let snapped: [[i64; 3]; 4] = std::array::from_fn(|i| {
        [
            quantize(positions[i * 3], POSITION_SCALE),
            quantize(positions[i * 3 + 1], POSITION_SCALE),
            quantize(positions[i * 3 + 2], POSITION_SCALE),
        ]
    });
    for i in 0..4 {
        for j in (i + 1)..4 {
            if indices[i] == indices[j] || snapped[i] == snapped[j] {
                return true;
            }
        }
    }
    false
}

// ─── Winding ────────────────────────────────────────────────────────────────

fn corner(positions: &[f32; 12], i: usize) -> [f64; 3] {
    [
        positions[i * 3] as f64,
        positions[i * 3 + 1] as f64,
        positions[i * 3 + 2] as f64,
    ]
}

fn sub(a: [f64; 3], b: [f64; 3]) -> [f64; 3] {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

fn cross(a: [f64; 3], b: [f64; 3]) -> [f64; 3] {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

fn dot(a: [f64; 3], b: [f64; 3]) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

/// Newell normal of the corners in the order given.
fn polygon_normal(positions: &[f32; 12], order: [usize; 4]) -> [f64; 3] {
    let mut n = [0.0f64; 3];
    for i in 0..4 {
        let a = corner(positions, order[i]);
        let b = corner(positions, order[(i + 1) % 4]);
        n[0] += (a[1] - b[1]) * (a[2] + b[2]);
        n[1] += (a[2] - b[2]) * (a[0] + b[0]);
        n[2] += (a[0] - b[0]) * (a[1] + b[1]);
    }
    n
}

/// Corner order that walks the quad counter-clockwise around its face normal.
///
/// Corners are sorted by angle around the centroid in the plane that drops
/// the normal's dominant axis; the result is flipped if it disagrees with the
/// winding the corners arrived in. Any cyclic rotation of the same corners
/// yields the same order.
pub fn sort_quad_ccw(positions: &[f32; 12], fallback_normal: [f32; 3]) -> [usize; 4] {
    let mut normal = polygon_normal(positions, [0, 1, 2, 3]);
    if dot(normal, normal) < 1e-18 {
        normal = fallback_normal.map(|v| v as f64);
    }
    let abs = normal.map(f64::abs);
    let drop = if abs[0] >= abs[1] && abs[0] >= abs[2] {
        0
    } else if abs[1] >= abs[2] {
        1
    } else {
        2
    };

    let mut centroid = [0.0f64; 3];
    for i in 0..4 {
        let c = corner(positions, i);
        for axis in 0..3 {
            centroid[axis] += c[axis] * 0.25;
        }
    }
    let angle = |i: usize| {
        let d = sub(corner(positions, i), centroid);
        match drop {
            0 => d[2].atan2(d[1]),
            1 => d[2].atan2(d[0]),
            _ => d[1].atan2(d[0]),
        }
    };

    let mut order = [0usize, 1, 2, 3];
    order.sort_by(|&a, &b| angle(a).total_cmp(&angle(b)).then(a.cmp(&b)));

    let sorted = cross(
        sub(corner(positions, order[1]), corner(positions, order[0])),
        sub(corner(positions, order[2]), corner(positions, order[0])),
    );
    if dot(normal, sorted) < 0.0 {
        order.swap(1, 3);
    }
    order
}
