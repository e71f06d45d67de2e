//! Streaming rewrite of raw sprite-space UVs into atlas space.
//!
//! Reads `geometry.bin` and `uvraw.bin` side by side in fixed-size chunks and
//! writes `finaluv.bin`, so memory use depends on the chunk size only.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};

use crate::atlas::TextureBook;
use crate::config::{ExportConfig, SecondaryUv};
use crate::error::{ExportError, Result};
use crate::index::SpriteIndex;
use crate::quad::WHITE;
use crate::store::record::{self, FixedRecord, GeometryRecord, UvRecord};
use crate::store::{matching_record_count, StagingPaths};

/// Counters from one remap pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RemapStats {
    pub records: u64,
    /// Quads whose primary UVs were moved into an atlas placement.
    pub remapped: u64,
    /// Quads whose sprite had no placement; their UVs are unchanged.
    pub unplaced: u64,
    /// Quads whose secondary UVs were remapped through their overlay sprite.
    pub secondary_remapped: u64,
    /// The raw file was copied verbatim.
    pub passthrough: bool,
}

/// Outcome of [`remap_quad`] for one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuadRemap {
    pub primary: bool,
    pub secondary: bool,
}

/// Rewrite the UVs of one quad in place.
///
/// The primary channel goes through the placement of (sprite, tint). The
/// secondary channel is touched only in [`SecondaryUv::SpriteSpace`] mode,
/// and only when the quad has an overlay sprite with a placement.
pub fn remap_quad(
    geometry: &GeometryRecord,
    uv: &mut UvRecord,
    book: &TextureBook,
    secondary: SecondaryUv,
) -> QuadRemap {
    let mut outcome = QuadRemap {
        primary: false,
        secondary: false,
    };
    if let Some(placement) = book.placement(geometry.sprite, geometry.tint) {
        remap_corners(&mut uv.uv0, |u, v| placement.remap(u, v));
        outcome.primary = true;
    }
    if secondary == SecondaryUv::SpriteSpace {
        if let Some(placement) = geometry.overlay.and_then(|id| book.placement(id, WHITE)) {
            remap_corners(&mut uv.uv1, |u, v| placement.remap(u, v));
            outcome.secondary = true;
        }
    }
    outcome
}

fn remap_corners(uv: &mut [f32; 8], map: impl Fn(f32, f32) -> (f32, f32)) {
    for corner in uv.chunks_exact_mut(2) {
        let (u, v) = map(corner[0], corner[1]);
        corner[0] = u;
        corner[1] = v;
    }
}

/// Produce `finaluv.bin` from `uvraw.bin`.
///
/// With atlas packing disabled the raw file is copied unchanged.
pub fn remap_uvs(
    config: &ExportConfig,
    paths: &StagingPaths,
    sprites: &SpriteIndex,
    book: &TextureBook,
) -> Result<RemapStats> {
    let records = matching_record_count(
        fs::metadata(&paths.geometry)?.len(),
        fs::metadata(&paths.raw_uv)?.len(),
    )?;

    if !config.atlas_enabled() {
        fs::copy(&paths.raw_uv, &paths.final_uv)?;
        log::info!("[remap] atlas disabled, copied {} uv records", records);
        return Ok(RemapStats {
            records,
            passthrough: true,
            ..RemapStats::default()
        });
    }

    let sprite_count = sprites.len() as u32;
    let chunk_records = config.remap_chunk_records.max(1);
    let mut geometry_in = BufReader::new(File::open(&paths.geometry)?);
    let mut uv_in = BufReader::new(File::open(&paths.raw_uv)?);
    let mut uv_out = BufWriter::new(File::create(&paths.final_uv)?);

    let mut stats = RemapStats {
        records,
        ..RemapStats::default()
    };
    let mut geometry_bytes = Vec::new();
    let mut uv_bytes = Vec::new();
    let mut done = 0u64;

    while done < records {
        let count = (records - done).min(chunk_records as u64) as usize;
        geometry_bytes.resize(count * GeometryRecord::SIZE, 0);
        uv_bytes.resize(count * UvRecord::SIZE, 0);
        geometry_in.read_exact(&mut geometry_bytes)?;
        uv_in.read_exact(&mut uv_bytes)?;

        let geometry: Vec<GeometryRecord> = record::decode_all(&geometry_bytes);
        let mut uvs: Vec<UvRecord> = record::decode_all(&uv_bytes);

        for (offset, (g, uv)) in geometry.iter().zip(uvs.iter_mut()).enumerate() {
            let unknown = if g.sprite.0 >= sprite_count {
                Some(g.sprite)
            } else {
                g.overlay.filter(|o| o.0 >= sprite_count)
            };
            if let Some(id) = unknown {
                return Err(ExportError::DataIntegrity(format!(
                    "record {} references sprite id {} but only {} sprites are indexed",
                    done + offset as u64,
                    id.0,
                    sprite_count
                )));
            }

            let outcome = remap_quad(g, uv, book, config.secondary_uv);
            if outcome.primary {
                stats.remapped += 1;
            } else {
                stats.unplaced += 1;
            }
            if outcome.secondary {
                stats.secondary_remapped += 1;
            }
        }

        uv_out.write_all(&record::encode_all(&uvs))?;
        done += count as u64;
    }
    uv_out.flush()?;

    if stats.unplaced > 0 {
        log::warn!(
            "[remap] {} quad(s) reference sprites without a placement; UVs kept",
            stats.unplaced
        );
    }
    log::info!(
        "[remap] {} records in chunks of {} ({} remapped)",
        records,
        chunk_records,
        stats.remapped
    );
    Ok(stats)
}
