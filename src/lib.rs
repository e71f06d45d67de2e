//! Streaming export of textured quads into an atlased glTF 2.0 scene.
//!
//! Producers submit [`Quad`]s from any number of threads to a
//! [`SceneExporter`]. Quads are staged on disk per material, their sprites are
//! packed into UDIM atlas pages, UVs are remapped into atlas space, and each
//! material is deduplicated into one mesh node. Binary data is split across
//! buffer files so none exceeds the configured ceiling.

pub mod atlas;
pub mod buffer;
pub mod config;
pub mod error;
pub mod index;
pub mod logging;
pub mod primitive;
pub mod quad;
pub mod remap;
pub mod scene;
pub mod store;

pub use atlas::{AtlasPacker, AtlasPlacement, BitmapProvider, InMemoryBitmaps};
pub use buffer::{BufferFile, BufferSlice, MultiBufferWriter};
pub use config::{AtlasMode, ExportConfig, SecondaryUv};
pub use error::{ExportError, Result};
pub use index::{GeometryIndex, MaterialChunk, SpriteId, SpriteIndex};
pub use logging::init_logging;
pub use primitive::{PrimitiveData, QuadCorners, QuadOutcome};
pub use quad::{Quad, QuadSink, WHITE};
pub use scene::{ExportPhase, ExportProgress, ExportReport, QuadStats, SceneExporter};
