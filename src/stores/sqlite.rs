//! SQLite-backed store with vector search via `sqlite-vec`.

use std::collections::HashSet;
use std::mem::transmute;
use std::os::raw::c_char;
use std::path::Path;
use std::sync::Once;

use async_trait::async_trait;
use tokio_rusqlite::{ffi, params_from_iter, Connection, OptionalExtension, ToSql};
use uuid::Uuid;

use crate::types::{
    ChunkRecord, CoreError, Document, DocumentId, PrincipalId, ProcessingStatus, SearchHit,
};

use super::Store;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS documents (
    id               TEXT PRIMARY KEY,
    owner            TEXT NOT NULL,
    title            TEXT NOT NULL,
    content          TEXT NOT NULL,
    status           TEXT NOT NULL,
    embeddings_ready INTEGER NOT NULL DEFAULT 0,
    generation       INTEGER NOT NULL DEFAULT 0,
    updated_at       TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS chunks (
    document_id TEXT NOT NULL,
    chunk_index INTEGER NOT NULL,
    generation  INTEGER NOT NULL,
    content     TEXT NOT NULL,
    embedding   BLOB,
    PRIMARY KEY (document_id, chunk_index)
);
CREATE INDEX IF NOT EXISTS idx_chunks_document ON chunks(document_id);
";

/// Durable store holding documents, chunks, and vectors in one SQLite file.
///
/// Vector search runs as raw SQL over `vec_distance_cosine`, with the query
/// vector passed as JSON through `vec_f32`.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open (and migrate) a store at `path`.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, CoreError> {
        Self::register_sqlite_vec()?;
        let conn = Connection::open(path)
            .await
            .map_err(|err| CoreError::Storage(err.to_string()))?;
        conn.call(|conn| {
            conn.query_row("select vec_version()", [], |row| row.get::<_, String>(0))
                ?;
            conn.execute_batch(SCHEMA)
                ?;
            Ok::<_, tokio_rusqlite::rusqlite::Error>(())
        })
        .await
        .map_err(|err| CoreError::Storage(err.to_string()))?;
        Ok(Self { conn })
    }

    /// Open an in-memory store (useful for tests and ephemeral runs).
    pub async fn open_in_memory() -> Result<Self, CoreError> {
        Self::register_sqlite_vec()?;
        let conn = Connection::open_in_memory()
            .await
            .map_err(|err| CoreError::Storage(err.to_string()))?;
        conn.call(|conn| {
            conn.execute_batch(SCHEMA)
                ?;
            Ok::<_, tokio_rusqlite::rusqlite::Error>(())
        })
        .await
        .map_err(|err| CoreError::Storage(err.to_string()))?;
        Ok(Self { conn })
    }

    fn register_sqlite_vec() -> Result<(), CoreError> {
        use std::sync::Mutex;

        static INIT: Once = Once::new();
        static INIT_RESULT: Mutex<Option<Result<(), String>>> = Mutex::new(None);

        INIT.call_once(|| {
            let result = unsafe {
                type SqliteExtensionInit = unsafe extern "C" fn(
                    *mut ffi::sqlite3,
                    *mut *mut c_char,
                    *const ffi::sqlite3_api_routines,
                ) -> i32;

                let init: unsafe extern "C" fn() = sqlite_vec::sqlite3_vec_init;
                let init_fn: SqliteExtensionInit =
                    transmute::<unsafe extern "C" fn(), SqliteExtensionInit>(init);
                let rc = ffi::sqlite3_auto_extension(Some(init_fn));
                if rc != 0 {
                    Err(format!(
                        "failed to register sqlite-vec extension (code {rc})"
                    ))
                } else {
                    Ok(())
                }
            };
            *INIT_RESULT.lock().expect("init result mutex poisoned") = Some(result);
        });

        INIT_RESULT
            .lock()
            .expect("init result mutex poisoned")
            .clone()
            .expect("init was called but result not set")
            .map_err(CoreError::Storage)
    }
}

fn storage_err(err: tokio_rusqlite::Error) -> CoreError {
    CoreError::Storage(err.to_string())
}

fn vector_to_blob(vector: &[f32]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(vector.len() * 4);
    for value in vector {
        blob.extend_from_slice(&value.to_le_bytes());
    }
    blob
}

fn blob_to_vector(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|bytes| f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
        .collect()
}

const DOCUMENT_COLUMNS: &str =
    "id, owner, title, content, status, embeddings_ready, generation, updated_at";

#[async_trait]
impl Store for SqliteStore {
    async fn put_document(&self, document: Document) -> Result<(), CoreError> {
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT OR REPLACE INTO documents \
                     (id, owner, title, content, status, embeddings_ready, generation, updated_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                    [
                        &document.id.to_string() as &dyn ToSql,
                        &document.owner.to_string(),
                        &document.title,
                        &document.content,
                        &document.status.to_string(),
                        &(document.embeddings_ready as i64),
                        &(document.generation as i64),
                        &document.updated_at.to_rfc3339(),
                    ]
                    .as_slice(),
                )
                ?;
                Ok(())
            })
            .await
            .map_err(storage_err)
    }

    async fn document(&self, id: DocumentId) -> Result<Option<Document>, CoreError> {
        let id_text = id.to_string();
        self.conn
            .call(move |conn| {
                conn.query_row(
                    &format!("SELECT {DOCUMENT_COLUMNS} FROM documents WHERE id = ?1"),
                    [&id_text],
                    |row| {
                        let id: String = row.get(0)?;
                        let owner: String = row.get(1)?;
                        let status: String = row.get(4)?;
                        let updated_at: String = row.get(7)?;
                        Ok(Document {
                            id: DocumentId(Uuid::parse_str(&id).unwrap_or_default()),
                            owner: PrincipalId(Uuid::parse_str(&owner).unwrap_or_default()),
                            title: row.get(2)?,
                            content: row.get(3)?,
                            status: ProcessingStatus::parse(&status)
                                .unwrap_or(ProcessingStatus::Idle),
                            embeddings_ready: row.get::<_, i64>(5)? != 0,
                            generation: row.get::<_, i64>(6)? as u64,
                            updated_at: updated_at
                                .parse()
                                .unwrap_or_else(|_| chrono::Utc::now()),
                        })
                    },
                )
                .optional()
                
            })
            .await
            .map_err(storage_err)
    }

    async fn begin_generation(&self, id: DocumentId) -> Result<u64, CoreError> {
        let id_text = id.to_string();
        let generation = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                tx.execute("DELETE FROM chunks WHERE document_id = ?1", [&id_text])
                    ?;
                let now = chrono::Utc::now().to_rfc3339();
                let updated = tx
                    .execute(
                        "UPDATE documents SET generation = generation + 1, \
                         status = 'processing', embeddings_ready = 0, updated_at = ?2 \
                         WHERE id = ?1",
                        [&id_text as &dyn ToSql, &now].as_slice(),
                    )
                    ?;
                if updated == 0 {
                    tx.rollback()?;
                    return Ok(None);
                }
                let generation: i64 = tx
                    .query_row(
                        "SELECT generation FROM documents WHERE id = ?1",
                        [&id_text],
                        |row| row.get(0),
                    )
                    ?;
                tx.commit()?;
                Ok(Some(generation as u64))
            })
            .await
            .map_err(storage_err)?;
        generation.ok_or(CoreError::DocumentNotFound(id))
    }

    async fn insert_chunk_texts(
        &self,
        id: DocumentId,
        generation: u64,
        texts: &[String],
    ) -> Result<(), CoreError> {
        let id_text = id.to_string();
        let texts = texts.to_vec();
        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                for (index, content) in texts.iter().enumerate() {
                    tx.execute(
                        "INSERT OR REPLACE INTO chunks \
                         (document_id, chunk_index, generation, content, embedding) \
                         VALUES (?1, ?2, ?3, ?4, NULL)",
                        [
                            &id_text as &dyn ToSql,
                            &(index as i64),
                            &(generation as i64),
                            content,
                        ]
                        .as_slice(),
                    )
                    ?;
                }
                tx.commit()?;
                Ok(())
            })
            .await
            .map_err(storage_err)
    }

    async fn attach_vector(
        &self,
        id: DocumentId,
        chunk_index: usize,
        generation: u64,
        vector: Vec<f32>,
    ) -> Result<bool, CoreError> {
        let id_text = id.to_string();
        let blob = vector_to_blob(&vector);
        self.conn
            .call(move |conn| {
                let updated = conn
                    .execute(
                        "UPDATE chunks SET embedding = ?4 \
                         WHERE document_id = ?1 AND chunk_index = ?2 AND generation = ?3",
                        [
                            &id_text as &dyn ToSql,
                            &(chunk_index as i64),
                            &(generation as i64),
                            &blob,
                        ]
                        .as_slice(),
                    )
                    ?;
                Ok(updated == 1)
            })
            .await
            .map_err(storage_err)
    }

    async fn embedded_count(&self, id: DocumentId, generation: u64) -> Result<usize, CoreError> {
        let id_text = id.to_string();
        self.conn
            .call(move |conn| {
                let count: i64 = conn
                    .query_row(
                        "SELECT COUNT(*) FROM chunks \
                         WHERE document_id = ?1 AND generation = ?2 AND embedding IS NOT NULL",
                        [&id_text as &dyn ToSql, &(generation as i64)].as_slice(),
                        |row| row.get(0),
                    )
                    ?;
                Ok(count as usize)
            })
            .await
            .map_err(storage_err)
    }

    async fn mark_failed(&self, id: DocumentId, generation: u64) -> Result<(), CoreError> {
        let id_text = id.to_string();
        self.conn
            .call(move |conn| {
                let now = chrono::Utc::now().to_rfc3339();
                conn.execute(
                    "UPDATE documents SET status = 'failed', embeddings_ready = 0, updated_at = ?3 \
                     WHERE id = ?1 AND generation = ?2 AND status = 'processing'",
                    [&id_text as &dyn ToSql, &(generation as i64), &now].as_slice(),
                )
                ?;
                Ok(())
            })
            .await
            .map_err(storage_err)
    }

    async fn complete_if_processing(
        &self,
        id: DocumentId,
        generation: u64,
        expected: usize,
    ) -> Result<bool, CoreError> {
        let id_text = id.to_string();
        self.conn
            .call(move |conn| {
                // Single conditional update: status, generation, and the
                // embedded-count recount all checked in one statement, so
                // concurrent unit completions cannot double-fire.
                let now = chrono::Utc::now().to_rfc3339();
                let updated = conn
                    .execute(
                        "UPDATE documents SET status = 'completed', embeddings_ready = 1, updated_at = ?4 \
                         WHERE id = ?1 AND generation = ?2 AND status = 'processing' \
                         AND (SELECT COUNT(*) FROM chunks \
                              WHERE document_id = ?1 AND generation = ?2 \
                              AND embedding IS NOT NULL) >= ?3",
                        [
                            &id_text as &dyn ToSql,
                            &(generation as i64),
                            &(expected as i64),
                            &now,
                        ]
                        .as_slice(),
                    )
                    ?;
                Ok(updated == 1)
            })
            .await
            .map_err(storage_err)
    }

    async fn chunks(&self, id: DocumentId) -> Result<Vec<ChunkRecord>, CoreError> {
        let id_text = id.to_string();
        let document_id = id;
        self.conn
            .call(move |conn| {
                let mut stmt = conn
                    .prepare(
                        "SELECT chunk_index, generation, content, embedding \
                         FROM chunks WHERE document_id = ?1 ORDER BY chunk_index",
                    )
                    ?;
                let rows = stmt
                    .query_map([&id_text], |row| {
                        let embedding: Option<Vec<u8>> = row.get(3)?;
                        Ok(ChunkRecord {
                            document_id,
                            chunk_index: row.get::<_, i64>(0)? as usize,
                            generation: row.get::<_, i64>(1)? as u64,
                            content: row.get(2)?,
                            embedding: embedding.as_deref().map(blob_to_vector),
                        })
                    })
                    ?;
                let mut records = Vec::new();
                for row in rows {
                    records.push(row?);
                }
                Ok(records)
            })
            .await
            .map_err(storage_err)
    }

    async fn search(
        &self,
        query: &[f32],
        eligible: &HashSet<DocumentId>,
        limit: usize,
    ) -> Result<Vec<SearchHit>, CoreError> {
        if eligible.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let query_json = serde_json::to_string(query)
            .map_err(|err| CoreError::Storage(err.to_string()))?;
        let mut ids: Vec<String> = eligible.iter().map(|id| id.to_string()).collect();
        ids.sort();

        self.conn
            .call(move |conn| {
                // Parameter 1 is the query vector; the id list follows it.
                let placeholders = (0..ids.len())
                    .map(|i| format!("?{}", i + 2))
                    .collect::<Vec<_>>()
                    .join(", ");
                let sql = format!(
                    "SELECT c.document_id, c.chunk_index, c.generation, c.content, c.embedding, \
                     d.title, vec_distance_cosine(c.embedding, vec_f32(?1)) AS distance \
                     FROM chunks c JOIN documents d ON d.id = c.document_id \
                     WHERE c.embedding IS NOT NULL AND c.document_id IN ({placeholders}) \
                     ORDER BY distance ASC, c.document_id ASC, c.chunk_index ASC \
                     LIMIT {limit}"
                );
                let mut params: Vec<String> = Vec::with_capacity(ids.len() + 1);
                params.push(query_json);
                params.extend(ids);

                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt
                    .query_map(params_from_iter(params.iter()), |row| {
                        let id: String = row.get(0)?;
                        let embedding: Option<Vec<u8>> = row.get(4)?;
                        Ok(SearchHit {
                            chunk: ChunkRecord {
                                document_id: DocumentId(Uuid::parse_str(&id).unwrap_or_default()),
                                chunk_index: row.get::<_, i64>(1)? as usize,
                                generation: row.get::<_, i64>(2)? as u64,
                                content: row.get(3)?,
                                embedding: embedding.as_deref().map(blob_to_vector),
                            },
                            document_title: row.get(5)?,
                            distance: row.get(6)?,
                        })
                    })
                    ?;

                let mut hits = Vec::new();
                for row in rows {
                    hits.push(row?);
                }
                Ok(hits)
            })
            .await
            .map_err(storage_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store_with_document() -> (SqliteStore, DocumentId) {
        let store = SqliteStore::open_in_memory().await.unwrap();
        let document = Document::new(PrincipalId::new(), "Manual", "Persistent content.");
        let id = document.id;
        store.put_document(document).await.unwrap();
        (store, id)
    }

    #[tokio::test]
    async fn documents_round_trip() {
        let (store, id) = store_with_document().await;
        let loaded = store.document(id).await.unwrap().unwrap();
        assert_eq!(loaded.id, id);
        assert_eq!(loaded.title, "Manual");
        assert_eq!(loaded.status, ProcessingStatus::Idle);
        assert!(store.document(DocumentId::new()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn generation_lifecycle_round_trips() {
        let (store, id) = store_with_document().await;

        let generation = store.begin_generation(id).await.unwrap();
        assert_eq!(generation, 1);
        store
            .insert_chunk_texts(id, generation, &["alpha chunk".into(), "beta chunk".into()])
            .await
            .unwrap();

        assert!(store
            .attach_vector(id, 0, generation, vec![1.0, 0.0])
            .await
            .unwrap());
        assert!(!store
            .attach_vector(id, 0, generation + 7, vec![1.0, 0.0])
            .await
            .unwrap());
        assert_eq!(store.embedded_count(id, generation).await.unwrap(), 1);

        assert!(!store.complete_if_processing(id, generation, 2).await.unwrap());
        store
            .attach_vector(id, 1, generation, vec![0.0, 1.0])
            .await
            .unwrap();
        assert!(store.complete_if_processing(id, generation, 2).await.unwrap());
        assert!(!store.complete_if_processing(id, generation, 2).await.unwrap());

        let document = store.document(id).await.unwrap().unwrap();
        assert_eq!(document.status, ProcessingStatus::Completed);
        assert!(document.embeddings_ready);
    }

    #[tokio::test]
    async fn search_respects_eligibility_filter() {
        let (store, id) = store_with_document().await;
        let generation = store.begin_generation(id).await.unwrap();
        store
            .insert_chunk_texts(id, generation, &["close match".into(), "far match".into()])
            .await
            .unwrap();
        store
            .attach_vector(id, 0, generation, vec![1.0, 0.0, 0.0])
            .await
            .unwrap();
        store
            .attach_vector(id, 1, generation, vec![0.0, 1.0, 0.0])
            .await
            .unwrap();

        let eligible: HashSet<DocumentId> = [id].into_iter().collect();
        let hits = store
            .search(&[1.0, 0.0, 0.0], &eligible, 10)
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].chunk.content, "close match");
        assert!(hits[0].distance < hits[1].distance);

        let hits = store
            .search(&[1.0, 0.0, 0.0], &HashSet::new(), 10)
            .await
            .unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn open_persists_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chunks.db");

        let document = Document::new(PrincipalId::new(), "Disk", "On disk.");
        let id = document.id;
        {
            let store = SqliteStore::open(&path).await.unwrap();
            store.put_document(document).await.unwrap();
        }
        let store = SqliteStore::open(&path).await.unwrap();
        assert!(store.document(id).await.unwrap().is_some());
    }
}
