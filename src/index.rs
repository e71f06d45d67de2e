//! Session-scoped indices shared between producers, the intake writer and the
//! later export phases.
//!
//! Both indices are plain values owned by one export session (wrapped in an
//! `Arc` by the exporter); nothing here is process-global.

use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use smol_str::SmolStr;
use std::collections::BTreeSet;

use crate::quad::WHITE;
use crate::store::PageSpan;

/// Dense, monotonically assigned sprite identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SpriteId(pub u32);

impl SpriteId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// How a sprite was used during sampling.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpriteUsage {
    /// Distinct `0xRRGGBB` tints the sprite was submitted with.
    pub tints: BTreeSet<u32>,
    /// Tint of the first quad that referenced the sprite.
    pub first_tint: Option<u32>,
    pub quad_count: u64,
}

#[derive(Default)]
struct Interner {
    ids: FxHashMap<SmolStr, SpriteId>,
    keys: Vec<SmolStr>,
}

/// String ↔ id interning plus per-sprite usage counters.
///
/// Ids are never reused or removed within a session.
#[derive(Default)]
pub struct SpriteIndex {
    names: RwLock<Interner>,
    usage: Mutex<FxHashMap<SpriteId, SpriteUsage>>,
}

impl SpriteIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or create the id for `key`.
    pub fn intern(&self, key: &str) -> SpriteId {
        if let Some(id) = self.names.read().ids.get(key) {
            return *id;
        }
        let mut names = self.names.write();
        if let Some(id) = names.ids.get(key) {
            return *id;
        }
        let id = SpriteId(names.keys.len() as u32);
        let key = SmolStr::new(key);
        names.keys.push(key.clone());
        names.ids.insert(key, id);
        id
    }

    pub fn id(&self, key: &str) -> Option<SpriteId> {
        self.names.read().ids.get(key).copied()
    }

    pub fn key(&self, id: SpriteId) -> Option<SmolStr> {
        self.names.read().keys.get(id.index()).cloned()
    }

    pub fn len(&self) -> usize {
        self.names.read().keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All keys, indexed by id.
    pub fn keys(&self) -> Vec<SmolStr> {
        self.names.read().keys.clone()
    }

    /// Count one quad referencing `id` with the given tint.
    pub fn record_usage(&self, id: SpriteId, tint: u32) {
        let mut usage = self.usage.lock();
        let entry = usage.entry(id).or_default();
        entry.tints.insert(tint);
        entry.first_tint.get_or_insert(tint);
        entry.quad_count += 1;
    }

    /// Note that `id` is drawn as an untinted sprite-space overlay.
    ///
    /// Adds the white variant without counting a quad.
    pub fn record_overlay(&self, id: SpriteId) {
        let mut usage = self.usage.lock();
        usage.entry(id).or_default().tints.insert(WHITE);
    }

    pub fn usage(&self, id: SpriteId) -> Option<SpriteUsage> {
        self.usage.lock().get(&id).cloned()
    }

    pub fn usage_snapshot(&self) -> FxHashMap<SpriteId, SpriteUsage> {
        self.usage.lock().clone()
    }
}

/// Everything stored for one material group.
#[derive(Debug, Clone, PartialEq)]
pub struct MaterialChunk {
    pub key: SmolStr,
    /// Flushed pages in flush order.
    pub spans: Vec<PageSpan>,
    /// Primary sprites used by the material's quads.
    pub sprites: BTreeSet<SpriteId>,
    /// Overlay sprites used by the material's quads.
    pub overlays: BTreeSet<SpriteId>,
    pub double_sided: bool,
}

impl MaterialChunk {
    fn new(key: SmolStr) -> Self {
        Self {
            key,
            spans: Vec::new(),
            sprites: BTreeSet::new(),
            overlays: BTreeSet::new(),
            double_sided: false,
        }
    }

    pub fn quad_count(&self) -> u64 {
        self.spans.iter().map(|s| s.record_count as u64).sum()
    }
}

/// A flushed page as reported by the store.
#[derive(Debug, Clone)]
pub struct PageSummary {
    pub span: PageSpan,
    pub sprites: BTreeSet<SpriteId>,
    pub overlays: BTreeSet<SpriteId>,
    pub double_sided: bool,
}

/// Per-material aggregate of flushed pages.
#[derive(Default)]
pub struct GeometryIndex {
    materials: Mutex<FxHashMap<SmolStr, MaterialChunk>>,
}

impl GeometryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_page(&self, material: &SmolStr, page: PageSummary) {
        let mut materials = self.materials.lock();
        let chunk = materials
            .entry(material.clone())
            .or_insert_with(|| MaterialChunk::new(material.clone()));
        chunk.spans.push(page.span);
        chunk.sprites.extend(page.sprites);
        chunk.overlays.extend(page.overlays);
        chunk.double_sided |= page.double_sided;
    }

    pub fn material(&self, key: &str) -> Option<MaterialChunk> {
        self.materials.lock().get(key).cloned()
    }

    /// All material keys in lexical order.
    pub fn material_keys(&self) -> Vec<SmolStr> {
        let mut keys: Vec<SmolStr> = self.materials.lock().keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.materials.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn total_quads(&self) -> u64 {
        self.materials
            .lock()
            .values()
            .map(MaterialChunk::quad_count)
            .sum()
    }

    /// All materials sorted by key.
    pub fn snapshot(&self) -> Vec<MaterialChunk> {
        let mut chunks: Vec<MaterialChunk> = self.materials.lock().values().cloned().collect();
        chunks.sort_by(|a, b| a.key.cmp(&b.key));
        chunks
    }
}
