//! Storage backends for documents, chunks, and embedding vectors.
//!
//! The [`Store`] trait is the single shared mutable resource of the system:
//! all writes are scoped to one document's rows, and the two status
//! transitions that race under concurrency (`mark_failed`,
//! `complete_if_processing`) are conditional updates so in-flight units from
//! a superseded generation can never corrupt a newer one.
//!
//! ```text
//!                     ┌────────────────┐
//!                     │  Store trait   │
//!                     │  (async CRUD + │
//!                     │   ANN search)  │
//!                     └───────┬────────┘
//!                             │
//!                  ┌──────────┴──────────┐
//!                  ▼                     ▼
//!           ┌─────────────┐      ┌─────────────┐
//!           │ MemoryStore │      │ SqliteStore │
//!           │  (in-proc)  │      │ sqlite-vec  │
//!           └─────────────┘      └─────────────┘
//! ```

pub mod memory;
pub mod sqlite;

use std::collections::HashSet;

use async_trait::async_trait;

use crate::types::{ChunkRecord, CoreError, Document, DocumentId, SearchHit};

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Unified persistence interface for the pipeline and the retrieval service.
#[async_trait]
pub trait Store: Send + Sync {
    /// Insert a new document (or replace an existing one wholesale).
    async fn put_document(&self, document: Document) -> Result<(), CoreError>;

    /// Fetch a document by id.
    async fn document(&self, id: DocumentId) -> Result<Option<Document>, CoreError>;

    /// Start a new embedding generation: delete every prior chunk of the
    /// document, bump its generation counter, set status `processing`, and
    /// clear the ready flag — atomically. Returns the new generation.
    async fn begin_generation(&self, id: DocumentId) -> Result<u64, CoreError>;

    /// Persist the finalized chunk texts for a generation, indices assigned
    /// contiguously from 0 in list order.
    async fn insert_chunk_texts(
        &self,
        id: DocumentId,
        generation: u64,
        texts: &[String],
    ) -> Result<(), CoreError>;

    /// Attach a vector to one chunk in place. Returns `false` (a no-op, not
    /// an error) when the chunk row is gone or belongs to a superseded
    /// generation — the caller discards the stale unit.
    async fn attach_vector(
        &self,
        id: DocumentId,
        chunk_index: usize,
        generation: u64,
        vector: Vec<f32>,
    ) -> Result<bool, CoreError>;

    /// Number of vector-bearing chunks for a document generation.
    async fn embedded_count(&self, id: DocumentId, generation: u64) -> Result<usize, CoreError>;

    /// Transition the document to `failed`, only if it is still processing
    /// this generation.
    async fn mark_failed(&self, id: DocumentId, generation: u64) -> Result<(), CoreError>;

    /// Conditionally complete: flips `processing → completed` and sets the
    /// ready flag only when the generation matches and at least `expected`
    /// chunks carry vectors, all inside one critical section. Returns whether
    /// the transition fired.
    async fn complete_if_processing(
        &self,
        id: DocumentId,
        generation: u64,
        expected: usize,
    ) -> Result<bool, CoreError>;

    /// All chunks of a document in index order.
    async fn chunks(&self, id: DocumentId) -> Result<Vec<ChunkRecord>, CoreError>;

    /// Nearest-neighbor search by cosine distance over chunks belonging to
    /// `eligible` documents, ascending distance, at most `limit` hits.
    async fn search(
        &self,
        query: &[f32],
        eligible: &HashSet<DocumentId>,
        limit: usize,
    ) -> Result<Vec<SearchHit>, CoreError>;
}

/// Cosine distance between two equal-length vectors (`1 − cosine similarity`).
pub(crate) fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 1.0;
    }
    1.0 - dot / (norm_a.sqrt() * norm_b.sqrt())
}
