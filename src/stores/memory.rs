//! In-process store for tests, examples, and embedded deployments.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::types::{ChunkRecord, CoreError, Document, DocumentId, ProcessingStatus, SearchHit};

use super::{cosine_distance, Store};

#[derive(Default)]
struct Inner {
    documents: HashMap<DocumentId, Document>,
    chunks: HashMap<DocumentId, Vec<ChunkRecord>>,
}

/// Everything lives behind one `parking_lot::RwLock`, which makes the
/// conditional status transitions naturally atomic: each trait method takes
/// the write lock once and performs its full check-then-act inside it.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn put_document(&self, document: Document) -> Result<(), CoreError> {
        self.inner.write().documents.insert(document.id, document);
        Ok(())
    }

    async fn document(&self, id: DocumentId) -> Result<Option<Document>, CoreError> {
        Ok(self.inner.read().documents.get(&id).cloned())
    }

    async fn begin_generation(&self, id: DocumentId) -> Result<u64, CoreError> {
        let mut inner = self.inner.write();
        let document = inner
            .documents
            .get_mut(&id)
            .ok_or(CoreError::DocumentNotFound(id))?;
        document.generation += 1;
        document.status = ProcessingStatus::Processing;
        document.embeddings_ready = false;
        document.updated_at = chrono::Utc::now();
        let generation = document.generation;
        inner.chunks.remove(&id);
        Ok(generation)
    }

    async fn insert_chunk_texts(
        &self,
        id: DocumentId,
        generation: u64,
        texts: &[String],
    ) -> Result<(), CoreError> {
        let mut inner = self.inner.write();
        if !inner.documents.contains_key(&id) {
            return Err(CoreError::DocumentNotFound(id));
        }
        let records = texts
            .iter()
            .enumerate()
            .map(|(index, text)| ChunkRecord::new(id, index, generation, text.clone()))
            .collect();
        inner.chunks.insert(id, records);
        Ok(())
    }

    async fn attach_vector(
        &self,
        id: DocumentId,
        chunk_index: usize,
        generation: u64,
        vector: Vec<f32>,
    ) -> Result<bool, CoreError> {
        let mut inner = self.inner.write();
        let Some(records) = inner.chunks.get_mut(&id) else {
            return Ok(false);
        };
        let Some(record) = records
            .iter_mut()
            .find(|r| r.chunk_index == chunk_index && r.generation == generation)
        else {
            return Ok(false);
        };
        if let Some(existing) = record.embedding.as_ref() {
            if existing.len() != vector.len() {
                return Err(CoreError::DimensionMismatch {
                    expected: existing.len(),
                    actual: vector.len(),
                });
            }
        }
        record.embedding = Some(vector);
        Ok(true)
    }

    async fn embedded_count(&self, id: DocumentId, generation: u64) -> Result<usize, CoreError> {
        Ok(self
            .inner
            .read()
            .chunks
            .get(&id)
            .map(|records| {
                records
                    .iter()
                    .filter(|r| r.generation == generation && r.embedding.is_some())
                    .count()
            })
            .unwrap_or(0))
    }

    async fn mark_failed(&self, id: DocumentId, generation: u64) -> Result<(), CoreError> {
        let mut inner = self.inner.write();
        if let Some(document) = inner.documents.get_mut(&id) {
            if document.generation == generation
                && document.status == ProcessingStatus::Processing
            {
                document.status = ProcessingStatus::Failed;
                document.embeddings_ready = false;
                document.updated_at = chrono::Utc::now();
            }
        }
        Ok(())
    }

    async fn complete_if_processing(
        &self,
        id: DocumentId,
        generation: u64,
        expected: usize,
    ) -> Result<bool, CoreError> {
        let mut inner = self.inner.write();
        let embedded = inner
            .chunks
            .get(&id)
            .map(|records| {
                records
                    .iter()
                    .filter(|r| r.generation == generation && r.embedding.is_some())
                    .count()
            })
            .unwrap_or(0);
        let Some(document) = inner.documents.get_mut(&id) else {
            return Ok(false);
        };
        if document.status != ProcessingStatus::Processing
            || document.generation != generation
            || embedded < expected
        {
            return Ok(false);
        }
        document.status = ProcessingStatus::Completed;
        document.embeddings_ready = true;
        document.updated_at = chrono::Utc::now();
        Ok(true)
    }

    async fn chunks(&self, id: DocumentId) -> Result<Vec<ChunkRecord>, CoreError> {
        let mut records = self
            .inner
            .read()
            .chunks
            .get(&id)
            .cloned()
            .unwrap_or_default();
        records.sort_by_key(|r| r.chunk_index);
        Ok(records)
    }

    async fn search(
        &self,
        query: &[f32],
        eligible: &HashSet<DocumentId>,
        limit: usize,
    ) -> Result<Vec<SearchHit>, CoreError> {
        let inner = self.inner.read();
        let mut hits: Vec<SearchHit> = Vec::new();
        for id in eligible {
            let Some(records) = inner.chunks.get(id) else {
                continue;
            };
            let Some(document) = inner.documents.get(id) else {
                continue;
            };
            for record in records {
                let Some(embedding) = record.embedding.as_ref() else {
                    continue;
                };
                if embedding.len() != query.len() {
                    return Err(CoreError::DimensionMismatch {
                        expected: embedding.len(),
                        actual: query.len(),
                    });
                }
                hits.push(SearchHit {
                    chunk: record.clone(),
                    document_title: document.title.clone(),
                    distance: cosine_distance(query, embedding),
                });
            }
        }
        hits.sort_by(|a, b| {
            a.distance
                .total_cmp(&b.distance)
                .then_with(|| a.chunk.document_id.cmp(&b.chunk.document_id))
                .then_with(|| a.chunk.chunk_index.cmp(&b.chunk.chunk_index))
        });
        hits.truncate(limit);
        Ok(hits)
    }
}
