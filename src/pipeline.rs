//! The embedding pipeline: finalized chunks in, persisted vectors out.
//!
//! `generate_embeddings` restarts a document's cycle from the delete step:
//! prior chunks go away, the generation counter bumps, status moves to
//! `processing`, and one asynchronous unit per chunk is scheduled with an
//! increasing delay. Units are fire-and-forget and idempotent per
//! `(document id, chunk index, generation)`; a unit whose generation has been
//! superseded discovers that at `attach_vector` time and discards itself.
//!
//! Completion is detected by each unit after it persists a vector: the
//! expected chunk count is recomputed from the document's *current* content
//! with the same segmentation configuration, and the `processing → completed`
//! transition is a conditional store update that cannot double-fire.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::config::PipelineConfig;
use crate::embeddings::EmbeddingProvider;
use crate::quality::QualityScorer;
use crate::refine::AdaptiveRefiner;
use crate::scheduler::{TokioScheduler, UnitScheduler};
use crate::segment::build_segmenter;
use crate::stores::Store;
use crate::types::{CoreError, DocumentId};

/// Run the configured segmenter and refiner over `content`, yielding the
/// finalized chunk list. Deterministic for fixed content and configuration,
/// which is what makes completion detection and regeneration idempotent.
pub fn finalize_chunks(config: &PipelineConfig, content: &str) -> Vec<String> {
    let segmenter = build_segmenter(&config.chunking);
    let refiner = AdaptiveRefiner::new(
        QualityScorer::default(),
        config.chunking.clone(),
        config.refiner.clone(),
    );
    let initial = segmenter.segment(content);
    refiner.refine(content, initial).chunks
}

/// Orchestrates chunking, embedding, and the document status machine.
pub struct EmbeddingPipeline {
    store: Arc<dyn Store>,
    provider: Arc<dyn EmbeddingProvider>,
    scheduler: Arc<dyn UnitScheduler>,
    config: PipelineConfig,
}

impl EmbeddingPipeline {
    pub fn builder() -> EmbeddingPipelineBuilder {
        EmbeddingPipelineBuilder::default()
    }

    /// Regenerate a document's chunks and schedule their embedding units.
    ///
    /// Returns `Ok(true)` when units were scheduled, `Ok(false)` when the
    /// document produced no chunks (it is then marked `failed`, never
    /// `completed`).
    pub async fn generate_embeddings(&self, id: DocumentId) -> Result<bool, CoreError> {
        let document = self
            .store
            .document(id)
            .await?
            .ok_or(CoreError::DocumentNotFound(id))?;

        let generation = self.store.begin_generation(id).await?;
        let chunks = finalize_chunks(&self.config, &document.content);

        if chunks.is_empty() {
            warn!(document_id = %id, generation, "no extractable content; marking failed");
            self.store.mark_failed(id, generation).await?;
            return Ok(false);
        }

        info!(
            document_id = %id,
            generation,
            chunk_count = chunks.len(),
            "scheduling embedding units"
        );
        self.store
            .insert_chunk_texts(id, generation, &chunks)
            .await?;

        for (index, content) in chunks.into_iter().enumerate() {
            let unit = EmbedUnit {
                store: Arc::clone(&self.store),
                provider: Arc::clone(&self.provider),
                config: self.config.clone(),
                document_id: id,
                chunk_index: index,
                generation,
                content,
            };
            let delay = self.config.stagger * index as u32;
            self.scheduler.schedule(delay, Box::pin(unit.run()));
        }

        Ok(true)
    }
}

/// Builder for [`EmbeddingPipeline`].
#[derive(Default)]
pub struct EmbeddingPipelineBuilder {
    store: Option<Arc<dyn Store>>,
    provider: Option<Arc<dyn EmbeddingProvider>>,
    scheduler: Option<Arc<dyn UnitScheduler>>,
    config: Option<PipelineConfig>,
}

impl EmbeddingPipelineBuilder {
    #[must_use]
    pub fn store(mut self, store: Arc<dyn Store>) -> Self {
        self.store = Some(store);
        self
    }

    #[must_use]
    pub fn provider(mut self, provider: Arc<dyn EmbeddingProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Override the scheduler. Defaults to [`TokioScheduler`].
    #[must_use]
    pub fn scheduler(mut self, scheduler: Arc<dyn UnitScheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    #[must_use]
    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Build the pipeline.
    ///
    /// # Panics
    ///
    /// Panics if the store or the provider was not set.
    pub fn build(self) -> EmbeddingPipeline {
        EmbeddingPipeline {
            store: self.store.expect("EmbeddingPipelineBuilder requires a store"),
            provider: self
                .provider
                .expect("EmbeddingPipelineBuilder requires a provider"),
            scheduler: self.scheduler.unwrap_or_else(|| Arc::new(TokioScheduler)),
            config: self.config.unwrap_or_default(),
        }
    }

    /// Build the pipeline, returning `None` if a required collaborator is
    /// missing.
    pub fn try_build(self) -> Option<EmbeddingPipeline> {
        Some(EmbeddingPipeline {
            store: self.store?,
            provider: self.provider?,
            scheduler: self.scheduler.unwrap_or_else(|| Arc::new(TokioScheduler)),
            config: self.config.unwrap_or_default(),
        })
    }
}

/// One asynchronous unit of work: embed a single chunk and persist it.
struct EmbedUnit {
    store: Arc<dyn Store>,
    provider: Arc<dyn EmbeddingProvider>,
    config: PipelineConfig,
    document_id: DocumentId,
    chunk_index: usize,
    generation: u64,
    content: String,
}

impl EmbedUnit {
    async fn run(self) {
        let vector = match self.provider.embed(&self.content).await {
            Ok(vector) => vector,
            Err(err) => {
                error!(
                    document_id = %self.document_id,
                    chunk_index = self.chunk_index,
                    generation = self.generation,
                    %err,
                    "embedding failed; marking document failed"
                );
                if let Err(store_err) = self
                    .store
                    .mark_failed(self.document_id, self.generation)
                    .await
                {
                    error!(
                        document_id = %self.document_id,
                        %store_err,
                        "could not mark document failed"
                    );
                }
                return;
            }
        };

        match self
            .store
            .attach_vector(self.document_id, self.chunk_index, self.generation, vector)
            .await
        {
            Ok(true) => self.check_completion().await,
            Ok(false) => {
                debug!(
                    document_id = %self.document_id,
                    chunk_index = self.chunk_index,
                    generation = self.generation,
                    "stale unit discarded"
                );
            }
            Err(err) => {
                error!(
                    document_id = %self.document_id,
                    chunk_index = self.chunk_index,
                    %err,
                    "persisting vector failed; marking document failed"
                );
                let _ = self
                    .store
                    .mark_failed(self.document_id, self.generation)
                    .await;
            }
        }
    }

    /// Idempotent completion check, safe to run from any number of units
    /// concurrently: the expected count comes from re-running segmentation on
    /// the current content, and the status flip is a conditional update.
    async fn check_completion(&self) {
        let document = match self.store.document(self.document_id).await {
            Ok(Some(document)) => document,
            Ok(None) => return,
            Err(err) => {
                error!(document_id = %self.document_id, %err, "completion check failed");
                return;
            }
        };
        if document.generation != self.generation {
            return;
        }

        let expected = finalize_chunks(&self.config, &document.content).len();
        let embedded = match self
            .store
            .embedded_count(self.document_id, self.generation)
            .await
        {
            Ok(count) => count,
            Err(err) => {
                error!(document_id = %self.document_id, %err, "completion check failed");
                return;
            }
        };
        if embedded < expected {
            return;
        }

        match self
            .store
            .complete_if_processing(self.document_id, self.generation, expected)
            .await
        {
            Ok(true) => {
                info!(
                    document_id = %self.document_id,
                    generation = self.generation,
                    chunk_count = expected,
                    "document embeddings completed"
                );
            }
            Ok(false) => {
                // Another unit won the transition, or the document moved on.
            }
            Err(err) => {
                error!(document_id = %self.document_id, %err, "completion transition failed");
            }
        }
    }
}
