//! MaxRects atlas packing with the best-short-side-fit heuristic.
//!
//! Pages are square, `page_size` pixels wide, and addressed by a UDIM tile
//! number: page `P` is tile `1001 + P % 10 + (P / 10) * 10`, whose UV origin
//! is `(P % 10, P / 10)`. The V offset of a tile is subtracted, not added.

use image::{ImageFormat, RgbaImage};
use rayon::prelude::*;
use rustc_hash::FxHashMap;
use smol_str::SmolStr;
use std::path::{Path, PathBuf};

use crate::error::{ExportError, Result};
use crate::index::SpriteId;

/// UDIM tile number of page `page`.
pub fn udim_tile(page: u32) -> u32 {
    1001 + (page % 10) + (page / 10) * 10
}

/// Where one (sprite, tint) bitmap sits in the atlas.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AtlasPlacement {
    pub page: u32,
    pub udim: u32,
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    pub u0: f64,
    pub v0: f64,
    pub u1: f64,
    pub v1: f64,
}

impl AtlasPlacement {
    fn new(page: u32, rect: Rect, page_size: u32) -> Self {
        let size = page_size as f64;
        let tile_u = (page % 10) as f64;
        let tile_v = (page / 10) as f64;
        Self {
            page,
            udim: udim_tile(page),
            x: rect.x,
            y: rect.y,
            width: rect.w,
            height: rect.h,
            u0: tile_u + rect.x as f64 / size,
            v0: -tile_v + rect.y as f64 / size,
            u1: tile_u + (rect.x + rect.w) as f64 / size,
            v1: -tile_v + (rect.y + rect.h) as f64 / size,
        }
    }

    /// Map a sprite-space coordinate into this placement's UV rect.
    ///
    /// `(0, 0)` lands exactly on `(u0, v0)` and `(1, 1)` exactly on `(u1, v1)`.
    pub fn remap(&self, u: f32, v: f32) -> (f32, f32) {
        (lerp(self.u0, self.u1, u), lerp(self.v0, self.v1, v))
    }

    /// Whether a UV coordinate lies inside the placement's rect.
    pub fn contains_uv(&self, u: f32, v: f32) -> bool {
        let (u, v) = (u as f64, v as f64);
        let eps = 1e-6;
        u >= self.u0.min(self.u1) - eps
            && u <= self.u0.max(self.u1) + eps
            && v >= self.v0.min(self.v1) - eps
            && v <= self.v0.max(self.v1) + eps
    }

    /// Whether two placements share any pixel.
    pub fn overlaps(&self, other: &AtlasPlacement) -> bool {
        self.page == other.page
            && self.x < other.x + other.width
            && other.x < self.x + self.width
            && self.y < other.y + other.height
            && other.y < self.y + self.height
    }
}

// a + t * (b - a), written so that t = 0 and t = 1 are exact
fn lerp(a: f64, b: f64, t: f32) -> f32 {
    let t = t as f64;
    (a * (1.0 - t) + b * t) as f32
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Rect {
    x: u32,
    y: u32,
    w: u32,
    h: u32,
}

impl Rect {
    fn right(&self) -> u32 {
        self.x + self.w
    }

    fn bottom(&self) -> u32 {
        self.y + self.h
    }

    fn intersects(&self, other: &Rect) -> bool {
        self.x < other.right()
            && other.x < self.right()
            && self.y < other.bottom()
            && other.y < self.bottom()
    }

    fn contains(&self, other: &Rect) -> bool {
        other.x >= self.x
            && other.y >= self.y
            && other.right() <= self.right()
            && other.bottom() <= self.bottom()
    }
}

/// Free-space bookkeeping of one page.
struct PageSpace {
    free: Vec<Rect>,
}

impl PageSpace {
    fn new(size: u32) -> Self {
        Self {
            free: vec![Rect {
                x: 0,
                y: 0,
                w: size,
                h: size,
            }],
        }
    }

    /// Best short-side fit for a `w`×`h` bitmap: `(short, long, rect)`.
    fn best_fit(&self, w: u32, h: u32) -> Option<(u32, u32, Rect)> {
        let mut best: Option<(u32, u32, Rect)> = None;
        for free in &self.free {
            if free.w < w || free.h < h {
                continue;
            }
            let leftover_w = free.w - w;
            let leftover_h = free.h - h;
            let short = leftover_w.min(leftover_h);
            let long = leftover_w.max(leftover_h);
            let better = match best {
                None => true,
                Some((s, l, _)) => short < s || (short == s && long < l),
            };
            if better {
                best = Some((short, long, Rect { x: free.x, y: free.y, w, h }));
            }
        }
        best
    }

    /// Consume `used`: split every intersecting free rect, then prune.
    fn place(&mut self, used: Rect) {
        let mut next = Vec::with_capacity(self.free.len() + 4);
        for free in self.free.drain(..) {
            if !free.intersects(&used) {
                next.push(free);
                continue;
            }
            if used.x > free.x {
                next.push(Rect {
                    x: free.x,
                    y: free.y,
                    w: used.x - free.x,
                    h: free.h,
                });
            }
            if used.right() < free.right() {
                next.push(Rect {
                    x: used.right(),
                    y: free.y,
                    w: free.right() - used.right(),
                    h: free.h,
                });
            }
            if used.y > free.y {
                next.push(Rect {
                    x: free.x,
                    y: free.y,
                    w: free.w,
                    h: used.y - free.y,
                });
            }
            if used.bottom() < free.bottom() {
                next.push(Rect {
                    x: free.x,
                    y: used.bottom(),
                    w: free.w,
                    h: free.bottom() - used.bottom(),
                });
            }
        }
        self.free = prune(next);
    }
}

fn prune(rects: Vec<Rect>) -> Vec<Rect> {
    let mut kept: Vec<Rect> = Vec::with_capacity(rects.len());
    for (i, rect) in rects.iter().enumerate() {
        let redundant = rects.iter().enumerate().any(|(j, other)| {
            i != j && other.contains(rect) && (other != rect || j < i)
        });
        if !redundant {
            kept.push(*rect);
        }
    }
    kept
}

struct PackEntry {
    sprite: SpriteId,
    key: SmolStr,
    tint: u32,
    width: u32,
    height: u32,
}

/// Collects bitmap sizes, then lays them out on pages in one deterministic pass.
///
/// No pixels are touched here; [`AtlasLayout::write_pages`] renders the pages.
pub struct AtlasPacker {
    page_size: u32,
    entries: Vec<PackEntry>,
}

impl AtlasPacker {
    pub fn new(page_size: u32) -> Self {
        Self {
            page_size,
            entries: Vec::new(),
        }
    }

    /// Queue a `width`×`height` bitmap of `sprite` (named `key`) in the variant `tint`.
    pub fn add(&mut self, sprite: SpriteId, key: SmolStr, tint: u32, width: u32, height: u32) {
        self.entries.push(PackEntry {
            sprite,
            key,
            tint,
            width,
            height,
        });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Place every queued bitmap.
    ///
    /// Bitmaps are packed largest side first, then by key and tint, so
    /// identical input always yields an identical layout.
    pub fn pack(mut self) -> Result<AtlasLayout> {
        let page_size = self.page_size;
        if page_size == 0 {
            return Err(ExportError::Configuration(
                "atlas page size must be positive".to_string(),
            ));
        }

        self.entries.sort_by(|a, b| {
            let a_side = a.width.max(a.height);
            let b_side = b.width.max(b.height);
            b_side
                .cmp(&a_side)
                .then_with(|| a.key.cmp(&b.key))
                .then_with(|| a.tint.cmp(&b.tint))
        });

        let mut spaces: Vec<PageSpace> = Vec::new();
        let mut placements = FxHashMap::default();

        for entry in &self.entries {
            let (w, h) = (entry.width, entry.height);
            if w == 0 || h == 0 {
                return Err(ExportError::Configuration(format!(
                    "Texture has no pixels: {} ({}x{})",
                    entry.key, w, h
                )));
            }
            if w > page_size || h > page_size {
                return Err(ExportError::Configuration(format!(
                    "Texture too large for atlas: {} ({}x{}), page size is {}",
                    entry.key, w, h, page_size
                )));
            }

            let mut best: Option<(u32, u32, usize, Rect)> = None;
            for (index, space) in spaces.iter().enumerate() {
                if let Some((short, long, rect)) = space.best_fit(w, h) {
                    let better = match best {
                        None => true,
                        Some((s, l, _, _)) => short < s || (short == s && long < l),
                    };
                    if better {
                        best = Some((short, long, index, rect));
                    }
                }
            }

            let (index, rect) = match best {
                Some((_, _, index, rect)) => (index, rect),
                None => {
                    let space = PageSpace::new(page_size);
                    let Some((_, _, rect)) = space.best_fit(w, h) else {
                        return Err(ExportError::Configuration(format!(
                            "Texture too large for atlas: {} ({}x{})",
                            entry.key, w, h
                        )));
                    };
                    spaces.push(space);
                    (spaces.len() - 1, rect)
                }
            };

            spaces[index].place(rect);
            placements.insert(
                (entry.sprite, entry.tint),
                AtlasPlacement::new(index as u32, rect, page_size),
            );
        }

        log::debug!(
            "[atlas] laid out {} bitmaps on {} page(s) of {}px",
            self.entries.len(),
            spaces.len(),
            page_size
        );

        Ok(AtlasLayout {
            page_size,
            page_count: spaces.len(),
            placements,
        })
    }
}

/// Result of [`AtlasPacker::pack`]: where every (sprite, tint) bitmap goes.
#[derive(Debug, Clone)]
pub struct AtlasLayout {
    pub page_size: u32,
    page_count: usize,
    pub placements: FxHashMap<(SpriteId, u32), AtlasPlacement>,
}

impl AtlasLayout {
    pub fn page_count(&self) -> usize {
        self.page_count
    }

    /// File name of page `page`.
    pub fn page_file_name(page: u32) -> String {
        format!("atlas_{}.png", udim_tile(page))
    }

    /// Placements on `page`, top to bottom then left to right.
    pub fn page_placements(&self, page: u32) -> Vec<((SpriteId, u32), AtlasPlacement)> {
        let mut on_page: Vec<_> = self
            .placements
            .iter()
            .filter(|(_, p)| p.page == page)
            .map(|(key, p)| (*key, *p))
            .collect();
        on_page.sort_by_key(|(_, p)| (p.y, p.x));
        on_page
    }

    /// Render one page. `bitmap` supplies the pixels of a (sprite, tint)
    /// variant; variants of the page are produced in parallel.
    pub fn render_page<F>(&self, page: u32, bitmap: &F) -> Result<RgbaImage>
    where
        F: Fn(SpriteId, u32) -> Option<RgbaImage> + Sync,
    {
        let variants = self
            .page_placements(page)
            .into_par_iter()
            .map(|((sprite, tint), placement)| -> Result<(AtlasPlacement, RgbaImage)> {
                let image = bitmap(sprite, tint).ok_or_else(|| {
                    ExportError::DataIntegrity(format!(
                        "no bitmap for sprite id {} tint {:06X} placed on page {}",
                        sprite.0, tint, page
                    ))
                })?;
                if image.dimensions() != (placement.width, placement.height) {
                    return Err(ExportError::DataIntegrity(format!(
                        "bitmap for sprite id {} is {}x{}, laid out as {}x{}",
                        sprite.0,
                        image.width(),
                        image.height(),
                        placement.width,
                        placement.height
                    )));
                }
                Ok((placement, image))
            })
            .collect::<Result<Vec<_>>>()?;

        let mut canvas = RgbaImage::new(self.page_size, self.page_size);
        for (placement, image) in &variants {
            image::imageops::replace(&mut canvas, image, placement.x as i64, placement.y as i64);
        }
        Ok(canvas)
    }

    /// Render and write every page as PNG into `dir`, one page at a time.
    /// Returns paths in page order.
    pub fn write_pages<F>(&self, dir: &Path, bitmap: &F) -> Result<Vec<PathBuf>>
    where
        F: Fn(SpriteId, u32) -> Option<RgbaImage> + Sync,
    {
        std::fs::create_dir_all(dir)?;
        let mut paths = Vec::with_capacity(self.page_count);
        for page in 0..self.page_count as u32 {
            let canvas = self.render_page(page, bitmap)?;
            let path = dir.join(Self::page_file_name(page));
            canvas.save_with_format(&path, ImageFormat::Png)?;
            log::debug!("[atlas] wrote page {}", path.display());
            paths.push(path);
        }
        Ok(paths)
    }
}
