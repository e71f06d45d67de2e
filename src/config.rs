//! Export configuration.
//!
//! ```ignore
//! use quadscene::config::{AtlasMode, ExportConfig};
//!
//! let config = ExportConfig::new("out", "region")
//!     .with_atlas_mode(AtlasMode::Atlas)
//!     .with_atlas_size(2048);
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{ExportError, Result};

/// How sprite bitmaps end up on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AtlasMode {
    /// One PNG per sprite; UVs stay in sprite space.
    Individual,
    /// Sprites packed into UDIM-tiled atlas pages; UVs remapped into atlas space.
    Atlas,
}

/// Interpretation of the secondary UV channel (TEXCOORD_1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecondaryUv {
    /// Sprite-space coordinates of the overlay sprite; remapped with it.
    SpriteSpace,
    /// Coordinates into a separate tint/lookup texture; never touched.
    Lookup,
}

/// Configuration for a scene export.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    /// Directory receiving the document, buffers and textures.
    pub output_dir: PathBuf,
    /// File stem for the document and its buffers.
    pub base_name: String,
    pub atlas_mode: AtlasMode,
    /// Edge length of a square atlas page in pixels.
    pub atlas_size: u32,
    pub secondary_uv: SecondaryUv,
    /// Maximum number of quads waiting in the intake queue before producers block.
    pub intake_capacity: usize,
    /// Records per in-memory page per material.
    pub page_records: usize,
    /// Records per streaming chunk during UV remapping.
    pub remap_chunk_records: usize,
    /// Size of the fixed worker pool used for per-material assembly.
    pub worker_threads: usize,
    /// Byte ceiling per output buffer file.
    pub max_buffer_bytes: u64,
    /// Keep the staging directory after a successful export.
    pub keep_staging: bool,
    pub generator: String,
}

impl Default for ExportConfig {
    fn default() -> Self {
        let threads = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self {
            output_dir: PathBuf::from("."),
            base_name: "scene".to_string(),
            atlas_mode: AtlasMode::Atlas,
            atlas_size: 4096,
            secondary_uv: SecondaryUv::Lookup,
            intake_capacity: 65_536,
            page_records: 1024,
            remap_chunk_records: 65_536,
            worker_threads: threads.saturating_sub(2).max(1),
            max_buffer_bytes: 2_000_000_000,
            keep_staging: false,
            generator: format!("quadscene {}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl ExportConfig {
    /// Create a config writing `<base_name>.gltf` into `output_dir`.
    pub fn new(output_dir: impl Into<PathBuf>, base_name: impl Into<String>) -> Self {
        Self {
            output_dir: output_dir.into(),
            base_name: base_name.into(),
            ..Self::default()
        }
    }

    /// Parse a configuration from JSON. Missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration from a JSON file.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn with_atlas_mode(mut self, mode: AtlasMode) -> Self {
        self.atlas_mode = mode;
        self
    }

    pub fn with_atlas_size(mut self, size: u32) -> Self {
        self.atlas_size = size;
        self
    }

    pub fn with_secondary_uv(mut self, mode: SecondaryUv) -> Self {
        self.secondary_uv = mode;
        self
    }

    pub fn with_intake_capacity(mut self, capacity: usize) -> Self {
        self.intake_capacity = capacity;
        self
    }

    pub fn with_page_records(mut self, records: usize) -> Self {
        self.page_records = records;
        self
    }

    pub fn with_remap_chunk_records(mut self, records: usize) -> Self {
        self.remap_chunk_records = records;
        self
    }

    pub fn with_worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = threads;
        self
    }

    pub fn with_max_buffer_bytes(mut self, bytes: u64) -> Self {
        self.max_buffer_bytes = bytes;
        self
    }

    pub fn with_keep_staging(mut self, keep: bool) -> Self {
        self.keep_staging = keep;
        self
    }

    pub fn with_generator(mut self, generator: impl Into<String>) -> Self {
        self.generator = generator.into();
        self
    }

    /// Whether UVs are rewritten into atlas space.
    pub fn atlas_enabled(&self) -> bool {
        self.atlas_mode == AtlasMode::Atlas
    }

    /// Reject settings no export could run with.
    pub fn validate(&self) -> Result<()> {
        if self.base_name.trim().is_empty() {
            return Err(ExportError::Configuration(
                "base_name must not be empty".to_string(),
            ));
        }
        if self.atlas_size == 0 {
            return Err(ExportError::Configuration(
                "atlas_size must be positive".to_string(),
            ));
        }
        if self.intake_capacity == 0 || self.page_records == 0 || self.remap_chunk_records == 0 {
            return Err(ExportError::Configuration(
                "intake_capacity, page_records and remap_chunk_records must be positive"
                    .to_string(),
            ));
        }
        if self.worker_threads == 0 {
            return Err(ExportError::Configuration(
                "worker_threads must be positive".to_string(),
            ));
        }
        if self.max_buffer_bytes < 4 {
            return Err(ExportError::Configuration(format!(
                "max_buffer_bytes {} is below the 4-byte alignment unit",
                self.max_buffer_bytes
            )));
        }
        Ok(())
    }

    pub fn document_path(&self) -> PathBuf {
        self.output_dir.join(format!("{}.gltf", self.base_name))
    }

    pub fn staging_dir(&self) -> PathBuf {
        self.output_dir.join(format!(".{}.staging", self.base_name))
    }
}
