//! Core data model shared across the chunking, embedding, and retrieval
//! pipeline: identifiers, documents, chunk records, and the crate error type.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Identifier for a stored document.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DocumentId(pub Uuid);

impl DocumentId {
    /// Generate a fresh random id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for DocumentId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Identifier for a calling principal (user or service identity).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PrincipalId(pub Uuid);

impl PrincipalId {
    /// Generate a fresh random id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PrincipalId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PrincipalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Lifecycle state of a document's embedding run.
///
/// Transitions: `Idle → Processing → {Completed, Failed}`. A terminal state
/// returns to `Processing` only through an explicit regeneration request,
/// which restarts the cycle from the chunk-delete step.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStatus {
    Idle,
    Processing,
    Completed,
    Failed,
}

impl fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ProcessingStatus::Idle => "idle",
            ProcessingStatus::Processing => "processing",
            ProcessingStatus::Completed => "completed",
            ProcessingStatus::Failed => "failed",
        };
        f.write_str(label)
    }
}

impl ProcessingStatus {
    /// Parse the snake_case label used in persistent storage.
    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "idle" => Some(ProcessingStatus::Idle),
            "processing" => Some(ProcessingStatus::Processing),
            "completed" => Some(ProcessingStatus::Completed),
            "failed" => Some(ProcessingStatus::Failed),
            _ => None,
        }
    }
}

/// A document owned by exactly one principal.
///
/// The `generation` counter distinguishes embedding runs: every regeneration
/// bumps it, and in-flight units from superseded runs are discarded when their
/// generation no longer matches.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Document {
    pub id: DocumentId,
    pub owner: PrincipalId,
    pub title: String,
    pub content: String,
    pub status: ProcessingStatus,
    pub embeddings_ready: bool,
    pub generation: u64,
    pub updated_at: DateTime<Utc>,
}

impl Document {
    /// Create a new idle document with generation 0.
    pub fn new(owner: PrincipalId, title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: DocumentId::new(),
            owner,
            title: title.into(),
            content: content.into(),
            status: ProcessingStatus::Idle,
            embeddings_ready: false,
            generation: 0,
            updated_at: Utc::now(),
        }
    }
}

/// A retrievable passage of a document.
///
/// `chunk_index` values are contiguous from 0 within one generation and never
/// reordered after creation. The vector is attached in place once the
/// embedding call for this chunk succeeds.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub document_id: DocumentId,
    pub chunk_index: usize,
    pub generation: u64,
    pub content: String,
    pub embedding: Option<Vec<f32>>,
}

impl ChunkRecord {
    /// Create a text-only chunk record awaiting its vector.
    pub fn new(
        document_id: DocumentId,
        chunk_index: usize,
        generation: u64,
        content: impl Into<String>,
    ) -> Self {
        Self {
            document_id,
            chunk_index,
            generation,
            content: content.into(),
            embedding: None,
        }
    }

    /// Attach an embedding vector.
    #[must_use]
    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }
}

/// A nearest-neighbor match returned by a store query.
#[derive(Clone, Debug)]
pub struct SearchHit {
    pub chunk: ChunkRecord,
    pub document_title: String,
    /// Cosine distance to the query vector (lower is closer).
    pub distance: f32,
}

/// Errors surfaced by stores, providers, and the pipeline.
///
/// Heuristic misses inside the refiner are not errors; only provider and
/// store failures reach this type, and they are always logged with the
/// document/chunk identifiers involved.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("storage failure: {0}")]
    Storage(String),

    #[error("embedding provider failure: {0}")]
    Embedding(String),

    #[error("document {0} not found")]
    DocumentNotFound(DocumentId),

    #[error("vector has {actual} dimensions, store expects {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("access policy failure: {0}")]
    Access(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_labels_round_trip() {
        for status in [
            ProcessingStatus::Idle,
            ProcessingStatus::Processing,
            ProcessingStatus::Completed,
            ProcessingStatus::Failed,
        ] {
            let label = status.to_string();
            assert_eq!(ProcessingStatus::parse(&label), Some(status));
        }
        assert_eq!(ProcessingStatus::parse("bogus"), None);
    }

    #[test]
    fn new_document_starts_idle() {
        let doc = Document::new(PrincipalId::new(), "Title", "content");
        assert_eq!(doc.status, ProcessingStatus::Idle);
        assert!(!doc.embeddings_ready);
        assert_eq!(doc.generation, 0);
    }

    #[test]
    fn chunk_record_embedding_attach() {
        let record = ChunkRecord::new(DocumentId::new(), 0, 1, "text");
        assert!(record.embedding.is_none());
        let record = record.with_embedding(vec![0.1, 0.2]);
        assert_eq!(record.embedding.as_deref(), Some(&[0.1, 0.2][..]));
    }
}
