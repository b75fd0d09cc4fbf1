//! ```text
//! raw text ──► segment::Segmenter ──► refine::AdaptiveRefiner ──► chunk list
//!                    │                         │
//!                    │                         └─► quality::QualityScorer
//!                    │
//! chunk list ──► pipeline::EmbeddingPipeline ──► stores::Store
//!                    │                             (documents + vectors)
//!                    └─► embeddings::EmbeddingProvider
//!
//! question ──► retrieval::RetrievalService ──► ranked chunks + context
//!                    ├─► embeddings::EmbeddingProvider
//!                    ├─► access::AccessPolicy
//!                    └─► stores::Store (cosine ANN search)
//! ```
//!
pub mod access;
pub mod config;
pub mod embeddings;
pub mod pipeline;
pub mod quality;
pub mod refine;
pub mod retrieval;
pub mod scheduler;
pub mod segment;
pub mod stores;
pub mod types;

pub use access::{AccessPolicy, StaticAccessPolicy};
pub use config::{ChunkingConfig, PipelineConfig, RefinerConfig, SegmentationStrategy};
pub use embeddings::{
    EmbeddingError, EmbeddingProvider, HttpEmbeddingProvider, MockEmbeddingProvider,
};
pub use pipeline::{finalize_chunks, EmbeddingPipeline};
pub use quality::{QualityReport, QualityScorer, ScorerConfig, ScorerWeights};
pub use refine::{AdaptiveRefiner, RefinementOutcome, RefinementReport};
pub use retrieval::{RetrievalOutcome, RetrievalService, RetrievalTelemetry, RetrievedChunk};
pub use scheduler::{TokioScheduler, UnitScheduler};
pub use segment::{build_segmenter, Segmenter};
pub use stores::{MemoryStore, SqliteStore, Store};
pub use types::{
    ChunkRecord, CoreError, Document, DocumentId, PrincipalId, ProcessingStatus, SearchHit,
};
