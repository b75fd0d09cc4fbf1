//! Access-filtered nearest-neighbor retrieval with context assembly.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::access::AccessPolicy;
use crate::embeddings::EmbeddingProvider;
use crate::stores::Store;
use crate::types::{ChunkRecord, CoreError, DocumentId, PrincipalId};

/// One ranked retrieval result.
#[derive(Clone, Debug)]
pub struct RetrievedChunk {
    pub chunk: ChunkRecord,
    pub document_title: String,
    /// `1 − cosine distance`, higher is closer.
    pub similarity: f32,
}

/// Retrieval-quality telemetry, emitted per search for observability only.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetrievalTelemetry {
    pub result_count: usize,
    pub distinct_documents: usize,
    pub min_similarity: f32,
    pub avg_similarity: f32,
    pub max_similarity: f32,
    pub elapsed_ms: u64,
}

/// Results, the assembled context string, and telemetry for one search.
#[derive(Clone, Debug)]
pub struct RetrievalOutcome {
    pub results: Vec<RetrievedChunk>,
    pub context: String,
    pub telemetry: RetrievalTelemetry,
}

impl RetrievalOutcome {
    fn empty(elapsed_ms: u64) -> Self {
        Self {
            results: Vec::new(),
            context: String::new(),
            telemetry: RetrievalTelemetry {
                result_count: 0,
                distinct_documents: 0,
                min_similarity: 0.0,
                avg_similarity: 0.0,
                max_similarity: 0.0,
                elapsed_ms,
            },
        }
    }
}

/// Finds the most relevant chunks for a question under per-caller access
/// control.
pub struct RetrievalService {
    store: Arc<dyn Store>,
    provider: Arc<dyn EmbeddingProvider>,
    access: Arc<dyn AccessPolicy>,
}

impl RetrievalService {
    pub fn builder() -> RetrievalServiceBuilder {
        RetrievalServiceBuilder::default()
    }

    /// Rank the caller-visible chunks closest to `question`.
    ///
    /// An explicit `doc_subset` narrows the search further; documents outside
    /// the caller's access are silently excluded, never surfaced as errors. A
    /// failed question embedding yields an empty outcome (callers fall back
    /// to context-free behavior), not an error.
    pub async fn find_relevant(
        &self,
        principal: PrincipalId,
        question: &str,
        limit: usize,
        doc_subset: Option<&[DocumentId]>,
    ) -> Result<RetrievalOutcome, CoreError> {
        let started = Instant::now();

        let query = match self.provider.embed(question).await {
            Ok(query) => query,
            Err(err) => {
                warn!(%principal, %err, "question embedding failed; returning empty result");
                return Ok(RetrievalOutcome::empty(elapsed_ms(started)));
            }
        };

        let mut eligible: HashSet<DocumentId> = self.access.readable_documents(principal).await?;
        if let Some(subset) = doc_subset {
            let subset: HashSet<DocumentId> = subset.iter().copied().collect();
            eligible.retain(|id| subset.contains(id));
        }
        if eligible.is_empty() {
            return Ok(RetrievalOutcome::empty(elapsed_ms(started)));
        }

        let hits = self.store.search(&query, &eligible, limit).await?;

        let mut results: Vec<RetrievedChunk> = hits
            .into_iter()
            .map(|hit| RetrievedChunk {
                similarity: 1.0 - hit.distance,
                chunk: hit.chunk,
                document_title: hit.document_title,
            })
            .collect();
        // Stable order for exact ties: similarity desc, then document id,
        // then chunk index.
        results.sort_by(|a, b| {
            b.similarity
                .total_cmp(&a.similarity)
                .then_with(|| a.chunk.document_id.cmp(&b.chunk.document_id))
                .then_with(|| a.chunk.chunk_index.cmp(&b.chunk.chunk_index))
        });
        results.truncate(limit);

        let context = build_context(&results);
        let telemetry = telemetry_for(&results, elapsed_ms(started));
        info!(
            %principal,
            result_count = telemetry.result_count,
            distinct_documents = telemetry.distinct_documents,
            min_similarity = telemetry.min_similarity,
            avg_similarity = telemetry.avg_similarity,
            max_similarity = telemetry.max_similarity,
            elapsed_ms = telemetry.elapsed_ms,
            "retrieval finished"
        );

        Ok(RetrievalOutcome {
            results,
            context,
            telemetry,
        })
    }
}

/// Builder for [`RetrievalService`].
#[derive(Default)]
pub struct RetrievalServiceBuilder {
    store: Option<Arc<dyn Store>>,
    provider: Option<Arc<dyn EmbeddingProvider>>,
    access: Option<Arc<dyn AccessPolicy>>,
}

impl RetrievalServiceBuilder {
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

    #[must_use]
    pub fn access(mut self, access: Arc<dyn AccessPolicy>) -> Self {
        self.access = Some(access);
        self
    }

    /// Build the service.
    ///
    /// # Panics
    ///
    /// Panics if any collaborator was not set.
    pub fn build(self) -> RetrievalService {
        RetrievalService {
            store: self.store.expect("RetrievalServiceBuilder requires a store"),
            provider: self
                .provider
                .expect("RetrievalServiceBuilder requires a provider"),
            access: self
                .access
                .expect("RetrievalServiceBuilder requires an access policy"),
        }
    }

    /// Build the service, returning `None` if a collaborator is missing.
    pub fn try_build(self) -> Option<RetrievalService> {
        Some(RetrievalService {
            store: self.store?,
            provider: self.provider?,
            access: self.access?,
        })
    }
}

/// Concatenate per-result headers naming the source document, in rank order.
fn build_context(results: &[RetrievedChunk]) -> String {
    let mut context = String::new();
    for result in results {
        if !context.is_empty() {
            context.push_str("\n\n");
        }
        context.push_str("### ");
        context.push_str(&result.document_title);
        context.push('\n');
        context.push_str(&result.chunk.content);
    }
    context
}

fn telemetry_for(results: &[RetrievedChunk], elapsed_ms: u64) -> RetrievalTelemetry {
    if results.is_empty() {
        return RetrievalTelemetry {
            result_count: 0,
            distinct_documents: 0,
            min_similarity: 0.0,
            avg_similarity: 0.0,
            max_similarity: 0.0,
            elapsed_ms,
        };
    }
    let mut min = f32::INFINITY;
    let mut max = f32::NEG_INFINITY;
    let mut sum = 0.0f32;
    let mut documents = HashSet::new();
    for result in results {
        min = min.min(result.similarity);
        max = max.max(result.similarity);
        sum += result.similarity;
        documents.insert(result.chunk.document_id);
    }
    RetrievalTelemetry {
        result_count: results.len(),
        distinct_documents: documents.len(),
        min_similarity: min,
        avg_similarity: sum / results.len() as f32,
        max_similarity: max,
        elapsed_ms,
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    use crate::access::StaticAccessPolicy;
    use crate::embeddings::EmbeddingError;
    use crate::stores::MemoryStore;
    use crate::types::Document;

    /// Provider that returns a fixed vector for any input.
    struct FixedProvider(Vec<f32>);

    #[async_trait]
    impl EmbeddingProvider for FixedProvider {
        fn dimensions(&self) -> usize {
            self.0.len()
        }

        async fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
            Ok(self.0.clone())
        }
    }

    struct FailingProvider;

    #[async_trait]
    impl EmbeddingProvider for FailingProvider {
        fn dimensions(&self) -> usize {
            4
        }

        async fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
            Err(EmbeddingError::Empty)
        }
    }

    struct Fixture {
        store: Arc<MemoryStore>,
        access: Arc<StaticAccessPolicy>,
        owner: PrincipalId,
        doc_a: DocumentId,
        doc_b: DocumentId,
    }

    /// Two documents with one embedded chunk each. The owner may read only
    /// document A.
    async fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let access = Arc::new(StaticAccessPolicy::new());
        let owner = PrincipalId::new();

        let mut ids = Vec::new();
        for (title, vector) in [
            ("Doc A", vec![1.0f32, 0.0]),
            ("Doc B", vec![0.9f32, 0.1]),
        ] {
            let document = Document::new(PrincipalId::new(), title, "Body text.");
            let id = document.id;
            store.put_document(document).await.unwrap();
            let generation = store.begin_generation(id).await.unwrap();
            store
                .insert_chunk_texts(id, generation, &[format!("chunk of {title}")])
                .await
                .unwrap();
            store.attach_vector(id, 0, generation, vector).await.unwrap();
            ids.push(id);
        }

        let doc_a = ids[0];
        let doc_b = ids[1];
        access.allow(owner, doc_a);

        Fixture {
            store,
            access,
            owner,
            doc_a,
            doc_b,
        }
    }

    fn service(fixture: &Fixture, provider: Arc<dyn EmbeddingProvider>) -> RetrievalService {
        RetrievalService::builder()
            .store(Arc::clone(&fixture.store) as Arc<dyn Store>)
            .provider(provider)
            .access(Arc::clone(&fixture.access) as Arc<dyn AccessPolicy>)
            .build()
    }

    #[tokio::test]
    async fn inaccessible_documents_never_leak() {
        let fixture = fixture().await;
        let service = service(&fixture, Arc::new(FixedProvider(vec![1.0, 0.0])));

        let outcome = service
            .find_relevant(fixture.owner, "question", 10, None)
            .await
            .unwrap();

        assert_eq!(outcome.results.len(), 1);
        assert_eq!(outcome.results[0].chunk.document_id, fixture.doc_a);
    }

    #[tokio::test]
    async fn explicit_subset_is_intersected_with_access() {
        let fixture = fixture().await;
        let service = service(&fixture, Arc::new(FixedProvider(vec![1.0, 0.0])));

        // The subset names both documents; only the accessible one returns.
        let subset = vec![fixture.doc_a, fixture.doc_b];
        let outcome = service
            .find_relevant(fixture.owner, "question", 10, Some(&subset))
            .await
            .unwrap();

        assert_eq!(outcome.results.len(), 1);
        assert_eq!(outcome.results[0].chunk.document_id, fixture.doc_a);

        // A subset of only the inaccessible document returns nothing.
        let subset = vec![fixture.doc_b];
        let outcome = service
            .find_relevant(fixture.owner, "question", 10, Some(&subset))
            .await
            .unwrap();
        assert!(outcome.results.is_empty());
    }

    #[tokio::test]
    async fn embedding_failure_returns_empty_outcome() {
        let fixture = fixture().await;
        let service = service(&fixture, Arc::new(FailingProvider));

        let outcome = service
            .find_relevant(fixture.owner, "question", 10, None)
            .await
            .unwrap();

        assert!(outcome.results.is_empty());
        assert!(outcome.context.is_empty());
        assert_eq!(outcome.telemetry.result_count, 0);
    }

    #[tokio::test]
    async fn results_rank_by_similarity_with_stable_ties() {
        let store = Arc::new(MemoryStore::new());
        let access = Arc::new(StaticAccessPolicy::new());
        let owner = PrincipalId::new();

        let document = Document::new(owner, "Ranked", "Body.");
        let id = document.id;
        store.put_document(document).await.unwrap();
        access.allow(owner, id);

        let generation = store.begin_generation(id).await.unwrap();
        store
            .insert_chunk_texts(
                id,
                generation,
                &["far chunk".into(), "tie one".into(), "tie two".into()],
            )
            .await
            .unwrap();
        // Chunk 0 is orthogonal to the query; chunks 1 and 2 tie exactly.
        store.attach_vector(id, 0, generation, vec![0.0, 1.0]).await.unwrap();
        store.attach_vector(id, 1, generation, vec![1.0, 0.0]).await.unwrap();
        store.attach_vector(id, 2, generation, vec![1.0, 0.0]).await.unwrap();

        let service = RetrievalService::builder()
            .store(Arc::clone(&store) as Arc<dyn Store>)
            .provider(Arc::new(FixedProvider(vec![1.0, 0.0])))
            .access(Arc::clone(&access) as Arc<dyn AccessPolicy>)
            .build();

        let outcome = service.find_relevant(owner, "q", 2, None).await.unwrap();
        assert_eq!(outcome.results.len(), 2);
        // Exact ties resolve by chunk index.
        assert_eq!(outcome.results[0].chunk.chunk_index, 1);
        assert_eq!(outcome.results[1].chunk.chunk_index, 2);
        assert!(outcome.results[0].similarity >= outcome.results[1].similarity);
        assert_eq!(outcome.telemetry.distinct_documents, 1);
    }

    #[tokio::test]
    async fn context_names_source_documents_in_rank_order() {
        let fixture = fixture().await;
        fixture.access.allow(fixture.owner, fixture.doc_b);
        let service = service(&fixture, Arc::new(FixedProvider(vec![1.0, 0.0])));

        let outcome = service
            .find_relevant(fixture.owner, "question", 10, None)
            .await
            .unwrap();

        assert_eq!(outcome.results.len(), 2);
        let a_pos = outcome.context.find("### Doc A").unwrap();
        let b_pos = outcome.context.find("### Doc B").unwrap();
        assert!(a_pos < b_pos, "closer document must come first");
        assert!(outcome.context.contains("chunk of Doc A"));
    }
}
