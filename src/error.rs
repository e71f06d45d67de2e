//! Error type shared by every export phase.

/// Error type for export operations.
///
/// Every variant is fatal for the export that raised it: a failed export
/// never produces a document.
#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    /// A setting or an input can never be satisfied (e.g. a bitmap larger
    /// than an atlas page).
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// The geometry and UV record streams, or the record streams and the
    /// sprite index, no longer agree.
    #[error("Data integrity error: {0}")]
    DataIntegrity(String),
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    /// The intake writer thread is no longer accepting quads.
    #[error("Quad intake is closed")]
    IntakeClosed,
    #[error("No geometry generated")]
    NoGeometry,
    #[error("Worker pool error: {0}")]
    WorkerPool(String),
}

pub type Result<T> = std::result::Result<T, ExportError>;
