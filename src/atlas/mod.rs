//! Sprite bitmaps: lookup, tint variants, and the on-disk textures the
//! document references.
//!
//! In [`AtlasMode::Atlas`] every referenced (sprite, tint) bitmap is packed
//! into UDIM pages under `atlas/`. In [`AtlasMode::Individual`] each sprite
//! is written once to `textures/<key>.png`, in the tint it first arrived
//! with, and UVs stay in sprite space.

pub mod packer;

pub use packer::{udim_tile, AtlasPacker, AtlasLayout, AtlasPlacement};

use image::{ImageFormat, Rgba, RgbaImage};
use rayon::prelude::*;
use rustc_hash::{FxHashMap, FxHashSet};
use smol_str::SmolStr;
use std::collections::BTreeSet;
use std::path::PathBuf;

use crate::config::{AtlasMode, ExportConfig, SecondaryUv};
use crate::error::{ExportError, Result};
use crate::index::{MaterialChunk, SpriteId, SpriteIndex};
use crate::quad::WHITE;

pub const ATLAS_DIR: &str = "atlas";
pub const TEXTURE_DIR: &str = "textures";

/// Supplies the source bitmap for a sprite key.
///
/// Returning `None` substitutes the missing-texture placeholder.
pub trait BitmapProvider: Send + Sync {
    fn bitmap(&self, sprite: &str) -> Option<RgbaImage>;
}

impl<F> BitmapProvider for F
where
    F: Fn(&str) -> Option<RgbaImage> + Send + Sync,
{
    fn bitmap(&self, sprite: &str) -> Option<RgbaImage> {
        self(sprite)
    }
}

/// Bitmaps held in memory, keyed by sprite.
#[derive(Debug, Clone, Default)]
pub struct InMemoryBitmaps {
    bitmaps: FxHashMap<SmolStr, RgbaImage>,
}

impl InMemoryBitmaps {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, sprite: impl Into<SmolStr>, image: RgbaImage) {
        self.bitmaps.insert(sprite.into(), image);
    }

    pub fn with(mut self, sprite: impl Into<SmolStr>, image: RgbaImage) -> Self {
        self.insert(sprite, image);
        self
    }

    pub fn len(&self) -> usize {
        self.bitmaps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bitmaps.is_empty()
    }
}

impl BitmapProvider for InMemoryBitmaps {
    fn bitmap(&self, sprite: &str) -> Option<RgbaImage> {
        self.bitmaps.get(sprite).cloned()
    }
}

/// 16×16 magenta/black checker in 4-pixel cells.
pub fn missing_texture() -> RgbaImage {
    RgbaImage::from_fn(16, 16, |x, y| {
        if ((x / 4) + (y / 4)) % 2 == 0 {
            Rgba([255, 0, 255, 255])
        } else {
            Rgba([0, 0, 0, 255])
        }
    })
}

/// Multiply the RGB channels of `image` by a `0xRRGGBB` tint.
///
/// Alpha is kept and fully transparent pixels are copied unchanged.
pub fn tint_bitmap(image: &RgbaImage, tint: u32) -> RgbaImage {
    let tint = tint & WHITE;
    if tint == WHITE {
        return image.clone();
    }
    let mul = [
        ((tint >> 16) & 0xFF) as f32 / 255.0,
        ((tint >> 8) & 0xFF) as f32 / 255.0,
        (tint & 0xFF) as f32 / 255.0,
    ];
    let mut out = image.clone();
    for pixel in out.pixels_mut() {
        if pixel[3] == 0 {
            continue;
        }
        for c in 0..3 {
            pixel[c] = (pixel[c] as f32 * mul[c]) as u8;
        }
    }
    out
}

/// File-name-safe form of a sprite key.
pub fn safe_file_stem(key: &str) -> String {
    key.replace([':', '/'], "_")
}

/// One image file referenced by the document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureImage {
    /// URI relative to the document.
    pub uri: String,
    pub path: PathBuf,
}

/// Textures and placements produced by the atlas phase.
#[derive(Debug, Default)]
pub struct TextureBook {
    placements: FxHashMap<(SpriteId, u32), AtlasPlacement>,
    fallback: FxHashMap<SpriteId, AtlasPlacement>,
    images: Vec<TextureImage>,
    sprite_image: FxHashMap<SpriteId, usize>,
    missing: Vec<SmolStr>,
}

impl TextureBook {
    /// Placement of `sprite` in the variant `tint`, falling back to the
    /// sprite's primary placement. `None` when the sprite was not packed.
    pub fn placement(&self, sprite: SpriteId, tint: u32) -> Option<&AtlasPlacement> {
        self.placements
            .get(&(sprite, tint))
            .or_else(|| self.fallback.get(&sprite))
    }

    pub fn placement_count(&self) -> usize {
        self.placements.len()
    }

    pub fn has_placements(&self) -> bool {
        !self.placements.is_empty()
    }

    pub fn images(&self) -> &[TextureImage] {
        &self.images
    }

    /// Image holding the bitmap of `sprite`.
    pub fn image_of(&self, sprite: SpriteId) -> Option<usize> {
        self.sprite_image.get(&sprite).copied()
    }

    /// Image for a material's base colour: the one holding its
    /// lexicographically smallest sprite.
    pub fn material_image(&self, chunk: &MaterialChunk, sprites: &SpriteIndex) -> Option<usize> {
        chunk
            .sprites
            .iter()
            .filter_map(|id| sprites.key(*id).map(|key| (key, *id)))
            .min()
            .and_then(|(_, id)| self.image_of(id))
    }

    /// Sprites for which the placeholder was used.
    pub fn missing(&self) -> &[SmolStr] {
        &self.missing
    }
}

struct SourceBitmap {
    id: SpriteId,
    key: SmolStr,
    tints: BTreeSet<u32>,
    first_tint: u32,
    image: RgbaImage,
}

/// Run the atlas phase: fetch every referenced bitmap, then pack pages or
/// write individual textures under `config.output_dir`.
pub fn build_textures(
    config: &ExportConfig,
    sprites: &SpriteIndex,
    materials: &[MaterialChunk],
    provider: &dyn BitmapProvider,
) -> Result<TextureBook> {
    let mut referenced: BTreeSet<SpriteId> = BTreeSet::new();
    for chunk in materials {
        referenced.extend(chunk.sprites.iter().copied());
        if config.secondary_uv == SecondaryUv::SpriteSpace {
            referenced.extend(chunk.overlays.iter().copied());
        }
    }

    let mut requests = Vec::with_capacity(referenced.len());
    for id in referenced {
        let key = sprites.key(id).ok_or_else(|| {
            ExportError::DataIntegrity(format!("sprite id {} has no index entry", id.0))
        })?;
        let usage = sprites.usage(id).unwrap_or_default();
        let first_tint = usage.first_tint.unwrap_or(WHITE);
        let mut tints = usage.tints;
        if tints.is_empty() {
            tints.insert(WHITE);
        }
        requests.push((id, key, tints, first_tint));
    }

    let fetched: Vec<(SourceBitmap, bool)> = requests
        .into_par_iter()
        .map(|(id, key, tints, first_tint)| {
            let (image, missing) = match provider.bitmap(&key) {
                Some(image) if image.width() > 0 && image.height() > 0 => (image, false),
                _ => (missing_texture(), true),
            };
            (
                SourceBitmap {
                    id,
                    key,
                    tints,
                    first_tint,
                    image,
                },
                missing,
            )
        })
        .collect();

    let mut book = TextureBook::default();
    let mut sources = Vec::with_capacity(fetched.len());
    for (source, missing) in fetched {
        if missing {
            log::warn!(
                "[atlas] sprite={} missing texture, using placeholder",
                source.key
            );
            book.missing.push(source.key.clone());
        }
        sources.push(source);
    }

    match config.atlas_mode {
        AtlasMode::Atlas => pack_atlas(config, sources, &mut book)?,
        AtlasMode::Individual => write_individual(config, sources, &mut book)?,
    }
    Ok(book)
}

fn pack_atlas(
    config: &ExportConfig,
    sources: Vec<SourceBitmap>,
    book: &mut TextureBook,
) -> Result<()> {
    let mut packer = AtlasPacker::new(config.atlas_size);
    for source in &sources {
        let (width, height) = source.image.dimensions();
        for tint in &source.tints {
            packer.add(source.id, source.key.clone(), *tint, width, height);
        }
    }
    let atlas = packer.pack()?;

    // tinted variants are produced page by page while writing
    let by_id: FxHashMap<SpriteId, &SourceBitmap> =
        sources.iter().map(|source| (source.id, source)).collect();
    let variant = |id: SpriteId, tint: u32| {
        by_id
            .get(&id)
            .map(|source| tint_bitmap(&source.image, tint))
    };
    let paths = atlas.write_pages(&config.output_dir.join(ATLAS_DIR), &variant)?;

    book.images = paths
        .into_iter()
        .enumerate()
        .map(|(page, path)| TextureImage {
            uri: format!("{}/{}", ATLAS_DIR, AtlasLayout::page_file_name(page as u32)),
            path,
        })
        .collect();

    for source in &sources {
        let primary = source
            .tints
            .iter()
            .find(|t| **t == WHITE)
            .or_else(|| source.tints.iter().next())
            .and_then(|tint| atlas.placements.get(&(source.id, *tint)));
        if let Some(placement) = primary {
            book.fallback.insert(source.id, *placement);
            book.sprite_image.insert(source.id, placement.page as usize);
        }
    }
    book.placements = atlas.placements;

    log::info!(
        "[atlas] {} sprites, {} placements, {} page(s)",
        sources.len(),
        book.placements.len(),
        book.images.len()
    );
    Ok(())
}

fn write_individual(
    config: &ExportConfig,
    sources: Vec<SourceBitmap>,
    book: &mut TextureBook,
) -> Result<()> {
    let dir = config.output_dir.join(TEXTURE_DIR);
    std::fs::create_dir_all(&dir)?;

    let mut taken: FxHashSet<String> = FxHashSet::default();
    let mut named = Vec::with_capacity(sources.len());
    for source in sources {
        let mut stem = safe_file_stem(&source.key);
        if !taken.insert(stem.clone()) {
            stem = format!("{}_{}", stem, source.id.0);
            taken.insert(stem.clone());
        }
        named.push((stem, source));
    }

    let images: Vec<(SpriteId, TextureImage)> = named
        .par_iter()
        .map(|(stem, source)| -> Result<(SpriteId, TextureImage)> {
            let file = format!("{}.png", stem);
            let path = dir.join(&file);
            let texture = tint_bitmap(&source.image, source.first_tint);
            texture.save_with_format(&path, ImageFormat::Png)?;
            Ok((
                source.id,
                TextureImage {
                    uri: format!("{}/{}", TEXTURE_DIR, file),
                    path,
                },
            ))
        })
        .collect::<Result<Vec<_>>>()?;

    for (id, image) in images {
        book.sprite_image.insert(id, book.images.len());
        book.images.push(image);
    }
    log::info!("[atlas] wrote {} individual texture(s)", book.images.len());
    Ok(())
}
