//! Append-only paged staging store for quad records.
//!
//! Quads are batched per material into in-memory pages of `page_records`
//! records. A page is written out as one contiguous run when it fills, or at
//! [`BinaryRecordStore::finalize`]. Geometry and raw UVs go to two files in
//! lockstep (see [`record`] for the layout), so one record number addresses
//! both.
//!
//! The store has exactly one owner: the intake writer thread. Readers open
//! their own handles through [`StoreReader`] once the store is finalized.

pub mod record;

pub use record::{FixedRecord, GeometryRecord, UvRecord};

use rustc_hash::FxHashMap;
use smol_str::SmolStr;
use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{ExportError, Result};
use crate::index::{GeometryIndex, PageSummary, SpriteId};

pub const GEOMETRY_FILE: &str = "geometry.bin";
pub const RAW_UV_FILE: &str = "uvraw.bin";
pub const FINAL_UV_FILE: &str = "finaluv.bin";

/// Locations of the staging files of one export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagingPaths {
    pub dir: PathBuf,
    pub geometry: PathBuf,
    pub raw_uv: PathBuf,
    pub final_uv: PathBuf,
}

impl StagingPaths {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        Self {
            geometry: dir.join(GEOMETRY_FILE),
            raw_uv: dir.join(RAW_UV_FILE),
            final_uv: dir.join(FINAL_UV_FILE),
            dir,
        }
    }

    /// Create the staging directory.
    pub fn create(dir: impl Into<PathBuf>) -> Result<Self> {
        let paths = Self::new(dir);
        fs::create_dir_all(&paths.dir)?;
        Ok(paths)
    }

    /// Delete the staging directory and everything in it.
    pub fn remove(&self) -> Result<()> {
        if self.dir.exists() {
            fs::remove_dir_all(&self.dir)?;
        }
        Ok(())
    }
}

/// A contiguous run of records written by one page flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageSpan {
    pub first_record: u64,
    pub record_count: u32,
}

impl PageSpan {
    /// One past the last record number of the span.
    pub fn end(&self) -> u64 {
        self.first_record + self.record_count as u64
    }
}

/// Opaque handle to one appended record: the page it went into and its slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecordLocation {
    pub page: u32,
    pub slot: u32,
}

/// Where every flushed page landed, indexed by page id.
#[derive(Debug, Clone, Default)]
pub struct PageTable {
    pages: Vec<Option<PageSpan>>,
}

impl PageTable {
    /// Record number of `location`, if its page has been flushed.
    pub fn resolve(&self, location: RecordLocation) -> Option<u64> {
        let span = self.pages.get(location.page as usize).copied().flatten()?;
        (location.slot < span.record_count).then(|| span.first_record + location.slot as u64)
    }

    pub fn span(&self, page: u32) -> Option<PageSpan> {
        self.pages.get(page as usize).copied().flatten()
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }
}

/// Records reserved when a page opens; pages grow past this on demand.
const INITIAL_PAGE_CAPACITY: usize = 64;

struct OpenPage {
    id: u32,
    geometry: Vec<GeometryRecord>,
    uv: Vec<UvRecord>,
    sprites: BTreeSet<SpriteId>,
    overlays: BTreeSet<SpriteId>,
    double_sided: bool,
}

impl OpenPage {
    fn new(id: u32, page_records: usize) -> Self {
        let capacity = page_records.min(INITIAL_PAGE_CAPACITY);
        Self {
            id,
            geometry: Vec::with_capacity(capacity),
            uv: Vec::with_capacity(capacity),
            sprites: BTreeSet::new(),
            overlays: BTreeSet::new(),
            double_sided: false,
        }
    }
}

/// Single-writer paged record store.
pub struct BinaryRecordStore {
    page_records: usize,
    geometry: BufWriter<File>,
    uv: BufWriter<File>,
    open: FxHashMap<SmolStr, OpenPage>,
    table: PageTable,
    records_written: u64,
    index: Arc<GeometryIndex>,
    finalized: bool,
}

impl BinaryRecordStore {
    /// Create (truncating) the geometry and raw UV files under `paths`.
    pub fn create(
        paths: &StagingPaths,
        page_records: usize,
        index: Arc<GeometryIndex>,
    ) -> Result<Self> {
        if page_records == 0 {
            return Err(ExportError::Configuration(
                "page_records must be positive".to_string(),
            ));
        }
        Ok(Self {
            page_records,
            geometry: BufWriter::new(File::create(&paths.geometry)?),
            uv: BufWriter::new(File::create(&paths.raw_uv)?),
            open: FxHashMap::default(),
            table: PageTable::default(),
            records_written: 0,
            index,
            finalized: false,
        })
    }

    /// Buffer one quad in its material's open page, flushing the page if it fills.
    pub fn append(
        &mut self,
        material: &SmolStr,
        geometry: GeometryRecord,
        uv: UvRecord,
    ) -> Result<RecordLocation> {
        if self.finalized {
            return Err(ExportError::IntakeClosed);
        }
        if !self.open.contains_key(material) {
            let id = self.table.pages.len() as u32;
            self.table.pages.push(None);
            self.open
                .insert(material.clone(), OpenPage::new(id, self.page_records));
        }
        let Some(page) = self.open.get_mut(material) else {
            return Err(ExportError::DataIntegrity(format!(
                "no open page for material '{}'",
                material
            )));
        };

        let location = RecordLocation {
            page: page.id,
            slot: page.geometry.len() as u32,
        };
        page.sprites.insert(geometry.sprite);
        if let Some(overlay) = geometry.overlay {
            page.overlays.insert(overlay);
        }
        page.double_sided |= geometry.double_sided;
        page.geometry.push(geometry);
        page.uv.push(uv);

        if page.geometry.len() >= self.page_records {
            self.flush_page(material)?;
        }
        Ok(location)
    }

    fn flush_page(&mut self, material: &SmolStr) -> Result<()> {
        let Some(page) = self.open.remove(material) else {
            return Ok(());
        };
        if page.geometry.len() != page.uv.len() {
            return Err(ExportError::DataIntegrity(format!(
                "page {} of '{}' holds {} geometry and {} uv records",
                page.id,
                material,
                page.geometry.len(),
                page.uv.len()
            )));
        }

        self.geometry.write_all(&record::encode_all(&page.geometry))?;
        self.uv.write_all(&record::encode_all(&page.uv))?;

        let span = PageSpan {
            first_record: self.records_written,
            record_count: page.geometry.len() as u32,
        };
        self.records_written = span.end();
        self.table.pages[page.id as usize] = Some(span);

        log::trace!(
            "[store] flushed page {} of '{}' ({} records at {})",
            page.id,
            material,
            span.record_count,
            span.first_record
        );

        self.index.record_page(
            material,
            PageSummary {
                span,
                sprites: page.sprites,
                overlays: page.overlays,
                double_sided: page.double_sided,
            },
        );
        Ok(())
    }

    /// Flush every partial page and both files. Further appends fail.
    pub fn finalize(&mut self) -> Result<PageTable> {
        if !self.finalized {
            let mut pending: Vec<SmolStr> = self.open.keys().cloned().collect();
            pending.sort();
            for material in &pending {
                self.flush_page(material)?;
            }
            self.geometry.flush()?;
            self.uv.flush()?;
            self.geometry.get_ref().sync_data()?;
            self.uv.get_ref().sync_data()?;
            self.finalized = true;
            log::debug!(
                "[store] finalized {} records in {} pages",
                self.records_written,
                self.table.len()
            );
        }
        Ok(self.table.clone())
    }

    pub fn records_written(&self) -> u64 {
        self.records_written
    }

    pub fn page_table(&self) -> &PageTable {
        &self.table
    }
}

// ─── Reading ────────────────────────────────────────────────────────────────

/// Independent read handle over a pair of finalized record files.
pub struct StoreReader {
    geometry: File,
    uv: File,
    records: u64,
}

impl StoreReader {
    /// Open `geometry` together with a UV file (raw or final).
    ///
    /// Fails with `DataIntegrity` when the two files do not hold the same
    /// number of whole records.
    pub fn open(geometry: &Path, uv: &Path) -> Result<Self> {
        let geometry_file = File::open(geometry)?;
        let uv_file = File::open(uv)?;
        let records = matching_record_count(
            geometry_file.metadata()?.len(),
            uv_file.metadata()?.len(),
        )?;
        Ok(Self {
            geometry: geometry_file,
            uv: uv_file,
            records,
        })
    }

    pub fn record_count(&self) -> u64 {
        self.records
    }

    /// Read every record of `span` from both files.
    pub fn read_span(&mut self, span: PageSpan) -> Result<(Vec<GeometryRecord>, Vec<UvRecord>)> {
        let geometry = read_records::<GeometryRecord>(
            &mut self.geometry,
            span.first_record,
            span.record_count as usize,
        )?;
        let uv = read_records::<UvRecord>(
            &mut self.uv,
            span.first_record,
            span.record_count as usize,
        )?;
        Ok((geometry, uv))
    }

    /// Read back the record appended at `location`.
    pub fn read_location(
        &mut self,
        table: &PageTable,
        location: RecordLocation,
    ) -> Result<(GeometryRecord, UvRecord)> {
        let record = table.resolve(location).ok_or_else(|| {
            ExportError::DataIntegrity(format!(
                "record location {:?} does not belong to a flushed page",
                location
            ))
        })?;
        let (mut geometry, mut uv) = self.read_span(PageSpan {
            first_record: record,
            record_count: 1,
        })?;
        match (geometry.pop(), uv.pop()) {
            (Some(g), Some(u)) => Ok((g, u)),
            _ => Err(ExportError::DataIntegrity(format!(
                "record {} could not be decoded",
                record
            ))),
        }
    }
}

/// Number of records in a geometry/UV file pair, checking both agree.
pub fn matching_record_count(geometry_bytes: u64, uv_bytes: u64) -> Result<u64> {
    let geometry_size = GeometryRecord::SIZE as u64;
    let uv_size = UvRecord::SIZE as u64;
    if geometry_bytes % geometry_size != 0 || uv_bytes % uv_size != 0 {
        return Err(ExportError::DataIntegrity(format!(
            "record files are not whole records ({} geometry bytes, {} uv bytes)",
            geometry_bytes, uv_bytes
        )));
    }
    let geometry_records = geometry_bytes / geometry_size;
    let uv_records = uv_bytes / uv_size;
    if geometry_records != uv_records {
        return Err(ExportError::DataIntegrity(format!(
            "geometry holds {} records but uv holds {}",
            geometry_records, uv_records
        )));
    }
    Ok(geometry_records)
}

fn read_records<R: FixedRecord>(file: &mut File, first: u64, count: usize) -> Result<Vec<R>> {
    let mut bytes = vec![0u8; count * R::SIZE];
    file.seek(SeekFrom::Start(first * R::SIZE as u64))?;
    file.read_exact(&mut bytes)?;
    Ok(record::decode_all(&bytes))
}
