//! Error types for the analysis pipeline.
//!
//! Each variant corresponds to one recovery policy: document-fatal
//! (`UnsupportedFormat`, `Decode`), item-recoverable (`ExtractionItem`),
//! call-recoverable (`ExtractionCall`, `DeduplicationCall`), job-fatal
//! (`IndexOperation`), and caller-visible (`NotFound`).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// No registered parser supports the file. Fatal for that document.
    #[error("unsupported file type: {0}")]
    UnsupportedFormat(String),

    /// Text encoding could not be determined. Fatal for that document.
    #[error("unable to decode file: {0}")]
    Decode(String),

    /// One structured-output item was malformed. The item is dropped.
    #[error("malformed extraction item: {0}")]
    ExtractionItem(String),

    /// A reasoning-model extraction call failed. The chunk/document is skipped.
    #[error("extraction call failed: {0}")]
    ExtractionCall(String),

    /// A reasoning-model comparison or merge call failed. The deterministic
    /// fallback takes over.
    #[error("deduplication call failed: {0}")]
    DeduplicationCall(String),

    /// Embedding, store, or delete failed. Surfaced to the caller; the job
    /// is marked failed.
    #[error("index operation failed: {0}")]
    IndexOperation(String),

    /// A referenced record does not exist.
    #[error("{resource} with identifier '{id}' not found")]
    NotFound { resource: &'static str, id: String },
}

impl PipelineError {
    pub fn not_found(resource: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            resource,
            id: id.into(),
        }
    }
}

pub type Result<T, E = PipelineError> = std::result::Result<T, E>;
