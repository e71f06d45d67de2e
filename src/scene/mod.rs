//! Scene export orchestration.
//!
//! A [`SceneExporter`] owns one export session. Producers on any number of
//! threads call [`SceneExporter::add_quad`]; a bounded channel feeds a single
//! writer thread that interns sprites and appends records to the staging
//! store. [`SceneExporter::write`] then runs the remaining phases strictly in
//! order:
//!
//! 1. `Sampling`: quads arrive.
//! 2. `FinalizeStore`: drain the queue, flush every page.
//! 3. `Atlas`: fetch, tint and pack bitmaps; write texture files.
//! 4. `Remap`: stream raw UVs into atlas space.
//! 5. `Assemble`: per-material dedup and buffer writes on a fixed pool.
//! 6. `FinalizeDocument`: write the document, remove staging files.
//!
//! Any error aborts the export; the document file only appears on success.
//!
//! ```ignore
//! use quadscene::{ExportConfig, InMemoryBitmaps, Quad, SceneExporter};
//!
//! let exporter = SceneExporter::new(ExportConfig::new("out", "region"))?;
//! exporter.add_quad(Quad::new("stone", "stone_top", positions, uv))?;
//! let report = exporter.write(&bitmaps)?;
//! println!("{} nodes in {}", report.materials, report.document.display());
//! ```

pub mod document;

pub use document::{MaterialOutput, MeshSlices};

use chrono::{DateTime, Utc};
use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::{Mutex, RwLock};
use rayon::prelude::*;
use serde::Serialize;
use smol_str::SmolStr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::atlas::{build_textures, BitmapProvider, TextureBook};
use crate::buffer::MultiBufferWriter;
use crate::config::{ExportConfig, SecondaryUv};
use crate::error::{ExportError, Result};
use crate::index::{GeometryIndex, MaterialChunk, SpriteIndex};
use crate::primitive::PrimitiveData;
use crate::quad::{Quad, QuadSink};
use crate::remap::remap_uvs;
use crate::store::{BinaryRecordStore, GeometryRecord, PageTable, StagingPaths, StoreReader, UvRecord};

// ─── Progress Reporting ─────────────────────────────────────────────────────

/// Phase of the export pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportPhase {
    Sampling,
    FinalizeStore,
    Atlas,
    Remap,
    Assemble,
    FinalizeDocument,
    Complete,
}

impl ExportPhase {
    pub fn name(&self) -> &'static str {
        match self {
            ExportPhase::Sampling => "sampling",
            ExportPhase::FinalizeStore => "finalize_store",
            ExportPhase::Atlas => "atlas",
            ExportPhase::Remap => "remap",
            ExportPhase::Assemble => "assemble",
            ExportPhase::FinalizeDocument => "finalize_document",
            ExportPhase::Complete => "complete",
        }
    }
}

/// Progress update emitted at each phase transition and per assembled material.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExportProgress {
    pub phase: ExportPhase,
    /// Units of work finished in this phase.
    pub done: u64,
    /// Units of work in this phase (materials during `Assemble`, otherwise 1).
    pub total: u64,
}

type ProgressCallback = Arc<dyn Fn(ExportProgress) + Send + Sync>;

// ─── Report ─────────────────────────────────────────────────────────────────

/// Quad counters across the whole export.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct QuadStats {
    /// Calls to `add_quad` that returned `Ok`.
    pub submitted: u64,
    /// Quads without a material or sprite key.
    pub ignored: u64,
    /// Quads persisted to the staging store.
    pub stored: u64,
    pub accepted: u64,
    pub duplicates: u64,
    pub degenerate: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct PhaseTiming {
    pub phase: ExportPhase,
    pub duration: Duration,
}

/// Summary of a finished export.
#[derive(Clone, Debug, Serialize)]
pub struct ExportReport {
    pub document: PathBuf,
    pub buffers: Vec<PathBuf>,
    pub textures: Vec<PathBuf>,
    /// Materials emitted, one node each.
    pub materials: usize,
    pub quads: QuadStats,
    pub vertices: u64,
    pub indices: u64,
    /// Sprites replaced by the missing-texture placeholder.
    pub missing_bitmaps: Vec<SmolStr>,
    /// Quads whose sprite had no atlas placement.
    pub unplaced_quads: u64,
    pub phases: Vec<PhaseTiming>,
    pub completed_at: DateTime<Utc>,
}

impl ExportReport {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn total_duration(&self) -> Duration {
        self.phases.iter().map(|p| p.duration).sum()
    }
}

// ─── Intake ─────────────────────────────────────────────────────────────────

struct IntakeSummary {
    stored: u64,
    table: PageTable,
}

/// Writer loop: runs until every sender is gone and the queue is drained.
fn run_intake(
    receiver: Receiver<Box<Quad>>,
    mut store: BinaryRecordStore,
    sprites: Arc<SpriteIndex>,
    secondary_uv: SecondaryUv,
) -> Result<IntakeSummary> {
    let mut stored = 0u64;
    for quad in receiver.iter() {
        let sprite = sprites.intern(&quad.sprite);
        sprites.record_usage(sprite, quad.tint);
        let overlay = quad.overlay_sprite.as_deref().filter(|k| !k.is_empty()).map(|key| {
            let id = sprites.intern(key);
            // lookup overlays never sample the overlay bitmap
            if secondary_uv == SecondaryUv::SpriteSpace {
                sprites.record_overlay(id);
            }
            id
        });

        let geometry = GeometryRecord {
            sprite,
            overlay,
            tint: quad.tint,
            double_sided: quad.double_sided,
            positions: quad.positions,
            normal: quad.normal,
            colors: quad.colors,
        };
        let uv = UvRecord {
            uv0: quad.uv0,
            uv1: quad.uv1,
        };
        store.append(&quad.material, geometry, uv)?;
        stored += 1;
    }
    let table = store.finalize()?;
    Ok(IntakeSummary { stored, table })
}

// ─── Exporter ───────────────────────────────────────────────────────────────

/// One streaming export session.
pub struct SceneExporter {
    config: ExportConfig,
    paths: StagingPaths,
    sprites: Arc<SpriteIndex>,
    materials: Arc<GeometryIndex>,
    /// `None` once the intake is closed.
    sender: RwLock<Option<Sender<Box<Quad>>>>,
    writer: Mutex<Option<JoinHandle<Result<IntakeSummary>>>>,
    submitted: AtomicU64,
    ignored: AtomicU64,
    progress: Option<ProgressCallback>,
    started: Instant,
}

impl SceneExporter {
    /// Validate `config`, create the staging directory and start the writer thread.
    pub fn new(config: ExportConfig) -> Result<Self> {
        config.validate()?;
        std::fs::create_dir_all(&config.output_dir)?;
        let paths = StagingPaths::create(config.staging_dir())?;

        let sprites = Arc::new(SpriteIndex::new());
        let materials = Arc::new(GeometryIndex::new());
        let store = BinaryRecordStore::create(&paths, config.page_records, Arc::clone(&materials))?;

        let (sender, receiver) = bounded(config.intake_capacity);
        let writer_sprites = Arc::clone(&sprites);
        let secondary_uv = config.secondary_uv;
        let writer = std::thread::Builder::new()
            .name("quadscene-intake".to_string())
            .spawn(move || run_intake(receiver, store, writer_sprites, secondary_uv))?;

        log::info!(
            "[export] session started: {} (staging {})",
            config.document_path().display(),
            paths.dir.display()
        );

        Ok(Self {
            config,
            paths,
            sprites,
            materials,
            sender: RwLock::new(Some(sender)),
            writer: Mutex::new(Some(writer)),
            submitted: AtomicU64::new(0),
            ignored: AtomicU64::new(0),
            progress: None,
            started: Instant::now(),
        })
    }

    /// Register a callback receiving [`ExportProgress`] updates.
    pub fn with_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(ExportProgress) + Send + Sync + 'static,
    {
        self.progress = Some(Arc::new(callback));
        self
    }

    pub fn config(&self) -> &ExportConfig {
        &self.config
    }

    pub fn sprite_index(&self) -> &SpriteIndex {
        &self.sprites
    }

    pub fn geometry_index(&self) -> &GeometryIndex {
        &self.materials
    }

    /// Queue one quad, blocking while the intake queue is full.
    ///
    /// Quads without a material or sprite key are counted and dropped.
    /// Every `Ok` quad reaches the store before [`SceneExporter::write`]
    /// finalizes it; once `write` has started, calls fail with
    /// [`ExportError::IntakeClosed`].
    pub fn add_quad(&self, quad: Quad) -> Result<()> {
        let guard = self.sender.read();
        let Some(sender) = guard.as_ref() else {
            return Err(ExportError::IntakeClosed);
        };
        if !quad.is_addressable() {
            self.submitted.fetch_add(1, Ordering::Relaxed);
            self.ignored.fetch_add(1, Ordering::Relaxed);
            return Ok(());
        }
        sender
            .send(Box::new(quad))
            .map_err(|_| ExportError::IntakeClosed)?;
        self.submitted.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn report(&self, phase: ExportPhase, done: u64, total: u64) {
        if let Some(callback) = &self.progress {
            callback(ExportProgress { phase, done, total });
        }
    }

    fn run_phase<T>(
        &self,
        phase: ExportPhase,
        timings: &mut Vec<PhaseTiming>,
        run: impl FnOnce() -> Result<T>,
    ) -> Result<T> {
        self.report(phase, 0, 1);
        let span = tracing::info_span!("export_phase", phase = phase.name());
        let _enter = span.enter();
        let start = Instant::now();
        let result = run();
        let duration = start.elapsed();
        match &result {
            Ok(_) => log::info!("[export] {} finished in {:.2?}", phase.name(), duration),
            Err(e) => log::error!("[export] {} failed after {:.2?}: {}", phase.name(), duration, e),
        }
        timings.push(PhaseTiming { phase, duration });
        result
    }

    /// Run every remaining phase and write the document.
    ///
    /// Can only succeed once per session; later calls and later `add_quad`
    /// calls fail with [`ExportError::IntakeClosed`].
    pub fn write(&self, provider: &dyn BitmapProvider) -> Result<ExportReport> {
        let mut timings = vec![PhaseTiming {
            phase: ExportPhase::Sampling,
            duration: self.started.elapsed(),
        }];

        let intake = self.run_phase(ExportPhase::FinalizeStore, &mut timings, || {
            self.finalize_store()
        })?;
        let chunks = self.materials.snapshot();
        if chunks.is_empty() {
            log::error!("[export] no quads were stored");
            return Err(ExportError::NoGeometry);
        }
        log::info!(
            "[store] {} quads in {} materials, {} pages, {} sprites",
            intake.stored,
            chunks.len(),
            intake.table.len(),
            self.sprites.len()
        );

        let book = self.run_phase(ExportPhase::Atlas, &mut timings, || {
            build_textures(&self.config, &self.sprites, &chunks, provider)
        })?;

        let remap = self.run_phase(ExportPhase::Remap, &mut timings, || {
            remap_uvs(&self.config, &self.paths, &self.sprites, &book)
        })?;

        let (outputs, buffers) = self.run_phase(ExportPhase::Assemble, &mut timings, || {
            self.assemble(&chunks, &book)
        })?;

        let mut quads = QuadStats {
            submitted: self.submitted.load(Ordering::Relaxed),
            ignored: self.ignored.load(Ordering::Relaxed),
            stored: intake.stored,
            ..QuadStats::default()
        };
        let mut vertices = 0u64;
        let mut indices = 0u64;
        for output in &outputs {
            quads.accepted += output.accepted;
            quads.duplicates += output.duplicates;
            quads.degenerate += output.degenerate;
            if let Some(mesh) = &output.mesh {
                vertices += mesh.vertex_count as u64;
                indices += mesh.index_count as u64;
            }
        }
        let emitted = outputs.iter().filter(|o| o.mesh.is_some()).count();
        if emitted == 0 {
            log::error!("[export] every stored quad was rejected");
            return Err(ExportError::NoGeometry);
        }

        let document = self.config.document_path();
        let buffer_files = self.run_phase(ExportPhase::FinalizeDocument, &mut timings, || {
            let files = buffers.finish()?;
            let root =
                document::build_document(&self.config.generator, &files, book.images(), &outputs);
            document::write_document(&root, &document)?;
            if self.config.keep_staging {
                log::info!("[export] keeping staging files in {}", self.paths.dir.display());
            } else {
                self.paths.remove()?;
            }
            Ok(files)
        })?;

        self.report(ExportPhase::Complete, 1, 1);
        let report = ExportReport {
            document,
            buffers: buffer_files.into_iter().map(|f| f.path).collect(),
            textures: book.images().iter().map(|i| i.path.clone()).collect(),
            materials: emitted,
            quads,
            vertices,
            indices,
            missing_bitmaps: book.missing().to_vec(),
            unplaced_quads: remap.unplaced,
            phases: timings,
            completed_at: Utc::now(),
        };
        log::info!(
            "[export] wrote {} ({} nodes, {} vertices, {} indices, {} duplicate and {} degenerate quads dropped)",
            report.document.display(),
            report.materials,
            report.vertices,
            report.indices,
            report.quads.duplicates,
            report.quads.degenerate
        );
        Ok(report)
    }

    fn finalize_store(&self) -> Result<IntakeSummary> {
        let Some(handle) = self.writer.lock().take() else {
            return Err(ExportError::IntakeClosed);
        };
        // waits for in-flight sends; the writer stops once the channel disconnects
        self.sender.write().take();
        match handle.join() {
            Ok(result) => result,
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }

    fn assemble(
        &self,
        chunks: &[MaterialChunk],
        book: &TextureBook,
    ) -> Result<(Vec<MaterialOutput>, MultiBufferWriter)> {
        let buffers = MultiBufferWriter::new(
            &self.config.output_dir,
            &self.config.base_name,
            self.config.max_buffer_bytes,
        )?;
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.worker_threads)
            .thread_name(|i| format!("quadscene-assemble-{}", i))
            .build()
            .map_err(|e| ExportError::WorkerPool(e.to_string()))?;

        let total = chunks.len() as u64;
        let done = AtomicUsize::new(0);
        let outputs = pool.install(|| {
            chunks
                .par_iter()
                .map(|chunk| -> Result<MaterialOutput> {
                    let output = self.assemble_material(chunk, book, &buffers)?;
                    let finished = done.fetch_add(1, Ordering::Relaxed) as u64 + 1;
                    self.report(ExportPhase::Assemble, finished, total);
                    Ok(output)
                })
                .collect::<Result<Vec<MaterialOutput>>>()
        })?;
        Ok((outputs, buffers))
    }

    fn assemble_material(
        &self,
        chunk: &MaterialChunk,
        book: &TextureBook,
        buffers: &MultiBufferWriter,
    ) -> Result<MaterialOutput> {
        let mut reader = StoreReader::open(&self.paths.geometry, &self.paths.final_uv)?;
        let sprite_count = self.sprites.len() as u32;
        let mut data = PrimitiveData::with_capacity(chunk.key.clone(), chunk.quad_count() as usize);

        for span in &chunk.spans {
            let (geometry, uvs) = reader.read_span(*span)?;
            for (g, uv) in geometry.iter().zip(&uvs) {
                if g.sprite.0 >= sprite_count || g.overlay.is_some_and(|o| o.0 >= sprite_count) {
                    return Err(ExportError::DataIntegrity(format!(
                        "material '{}' references a sprite id outside the index",
                        chunk.key
                    )));
                }
                data.register_record(g, uv);
            }
        }
        data.seal();

        let mut output = MaterialOutput {
            key: chunk.key.clone(),
            image: book.material_image(chunk, &self.sprites),
            double_sided: data.double_sided,
            accepted: data.accepted,
            duplicates: data.duplicates,
            degenerate: data.degenerate,
            mesh: None,
        };
        let Some((min, max)) = data.bounds() else {
            log::debug!("[assemble] '{}' has no accepted quads, skipped", chunk.key);
            return Ok(output);
        };

        log::debug!(
            "[assemble] '{}': {} quads -> {} vertices, {} indices (~{} bytes)",
            chunk.key,
            chunk.quad_count(),
            data.vertex_count(),
            data.index_count(),
            data.vertex_count() * 44 + data.index_count() * 4
        );
        output.mesh = Some(MeshSlices {
            vertex_count: data.vertex_count(),
            index_count: data.index_count(),
            min,
            max,
            positions: buffers.append_f32(&data.positions)?,
            uv0: buffers.append_f32(&data.uv0)?,
            uv1: buffers.append_f32(&data.uv1)?,
            colors: buffers.append_f32(&data.colors)?,
            indices: buffers.append_u32(&data.indices)?,
        });
        Ok(output)
    }
}

impl QuadSink for SceneExporter {
    fn add_quad(&self, quad: Quad) -> Result<()> {
        SceneExporter::add_quad(self, quad)
    }
}
