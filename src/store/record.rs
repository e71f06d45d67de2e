//! Fixed-size on-disk record layout shared by the staging writer and every reader.
//!
//! # Layout
//!
//! ```text
//! GeometryRecord (140 bytes, little-endian):
//!   sprite_id:         u32
//!   overlay_sprite_id: u32   (u32::MAX = no overlay)
//!   tint:              u32   (0xRRGGBB)
//!   flags:             u32   (bit 0 = double-sided)
//!   positions:         [f32; 12]
//!   normal:            [f32; 3]
//!   colors:            [f32; 16]
//!
//! UvRecord (64 bytes, little-endian):
//!   uv0: [f32; 8]
//!   uv1: [f32; 8]
//! ```
//!
//! Record `n` of a store sits at `n * SIZE` in its file, so the geometry and
//! UV streams are addressed by the same record number.

use crate::index::SpriteId;

const FLAG_DOUBLE_SIDED: u32 = 1 << 0;
const NO_OVERLAY: u32 = u32::MAX;

/// A record with a fixed encoded width.
pub trait FixedRecord: Sized {
    const SIZE: usize;

    /// Append exactly `SIZE` bytes to `out`.
    fn encode(&self, out: &mut Vec<u8>);

    /// Decode from the first `SIZE` bytes of `bytes`.
    ///
    /// Callers guarantee `bytes.len() >= SIZE`.
    fn decode(bytes: &[u8]) -> Self;
}

/// Per-quad geometry: everything except texture coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeometryRecord {
    pub sprite: SpriteId,
    pub overlay: Option<SpriteId>,
    pub tint: u32,
    pub double_sided: bool,
    pub positions: [f32; 12],
    pub normal: [f32; 3],
    pub colors: [f32; 16],
}

/// Per-quad texture coordinates, raw (sprite space) or final (atlas space).
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct UvRecord {
    pub uv0: [f32; 8],
    pub uv1: [f32; 8],
}

impl FixedRecord for GeometryRecord {
    const SIZE: usize = 140;

    fn encode(&self, out: &mut Vec<u8>) {
        put_u32(out, self.sprite.0);
        put_u32(out, self.overlay.map_or(NO_OVERLAY, |id| id.0));
        put_u32(out, self.tint);
        put_u32(out, if self.double_sided { FLAG_DOUBLE_SIDED } else { 0 });
        put_f32s(out, &self.positions);
        put_f32s(out, &self.normal);
        put_f32s(out, &self.colors);
    }

    fn decode(bytes: &[u8]) -> Self {
        let mut cursor = 0usize;
        let sprite = SpriteId(take_u32(bytes, &mut cursor));
        let overlay = match take_u32(bytes, &mut cursor) {
            NO_OVERLAY => None,
            id => Some(SpriteId(id)),
        };
        let tint = take_u32(bytes, &mut cursor);
        let flags = take_u32(bytes, &mut cursor);
        let mut record = Self {
            sprite,
            overlay,
            tint,
            double_sided: flags & FLAG_DOUBLE_SIDED != 0,
            positions: [0.0; 12],
            normal: [0.0; 3],
            colors: [0.0; 16],
        };
        take_f32s(bytes, &mut cursor, &mut record.positions);
        take_f32s(bytes, &mut cursor, &mut record.normal);
        take_f32s(bytes, &mut cursor, &mut record.colors);
        record
    }
}

impl FixedRecord for UvRecord {
    const SIZE: usize = 64;

    fn encode(&self, out: &mut Vec<u8>) {
        put_f32s(out, &self.uv0);
        put_f32s(out, &self.uv1);
    }

    fn decode(bytes: &[u8]) -> Self {
        let mut cursor = 0usize;
        let mut record = Self::default();
        take_f32s(bytes, &mut cursor, &mut record.uv0);
        take_f32s(bytes, &mut cursor, &mut record.uv1);
        record
    }
}

/// Decode every whole record in `bytes`.
pub fn decode_all<R: FixedRecord>(bytes: &[u8]) -> Vec<R> {
    bytes.chunks_exact(R::SIZE).map(R::decode).collect()
}

/// Encode a run of records into one contiguous byte span.
pub fn encode_all<R: FixedRecord>(records: &[R]) -> Vec<u8> {
    let mut out = Vec::with_capacity(records.len() * R::SIZE);
    for record in records {
        record.encode(&mut out);
    }
    out
}

// ─── Wire helpers ───────────────────────────────────────────────────────────

fn put_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn put_f32s(out: &mut Vec<u8>, values: &[f32]) {
    for v in values {
        out.extend_from_slice(&v.to_le_bytes());
    }
}

fn take_u32(bytes: &[u8], cursor: &mut usize) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&bytes[*cursor..*cursor + 4]);
    *cursor += 4;
    u32::from_le_bytes(buf)
}

fn take_f32s(bytes: &[u8], cursor: &mut usize, into: &mut [f32]) {
    for slot in into.iter_mut() {
        *slot = f32::from_bits(take_u32(bytes, cursor));
    }
}
