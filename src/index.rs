//! Per-company vector index.
//!
//! Chunks live in company-scoped collections: every read and write is
//! scoped by `company_id`, so no entry is ever visible across company
//! boundaries. Collections are created lazily, one per company, and cached
//! for the process lifetime. Embeddings are computed once per chunk at
//! insert time through the external [`Embedder`] capability.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use sqlx::{Row, SqlitePool};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::embedding::{blob_to_vec, vec_to_blob, Embedder};
use crate::error::{PipelineError, Result};
use crate::models::{Chunk, ChunkMetadata};

/// A chunk plus its embedding, as stored in a collection.
#[derive(Debug, Clone)]
pub struct IndexEntry {
    pub chunk_id: String,
    pub document_id: String,
    pub text: String,
    pub metadata: ChunkMetadata,
    pub embedding: Option<Vec<f32>>,
}

/// Equality filter over entry metadata.
#[derive(Debug, Clone, Default)]
pub struct MetadataFilter {
    pub document_id: Option<String>,
    /// Field-name / JSON-value equality pairs matched against the chunk
    /// metadata (e.g. `("speaker_role", "CEO")`).
    pub equals: Vec<(String, serde_json::Value)>,
}

impl MetadataFilter {
    pub fn for_document(document_id: &str) -> Self {
        Self {
            document_id: Some(document_id.to_string()),
            equals: Vec::new(),
        }
    }

    fn matches(&self, entry_document_id: &str, metadata: &serde_json::Value) -> bool {
        if let Some(doc) = &self.document_id {
            if doc != entry_document_id {
                return false;
            }
        }
        self.equals
            .iter()
            .all(|(key, value)| metadata.get(key) == Some(value))
    }
}

/// The per-tenant indexer: owns the collection cache and the embedding
/// capability.
pub struct Indexer {
    pool: SqlitePool,
    embedder: Arc<dyn Embedder>,
    embed_batch_size: usize,
    collections: Mutex<HashMap<String, Arc<Collection>>>,
}

impl Indexer {
    pub fn new(pool: SqlitePool, embedder: Arc<dyn Embedder>, embed_batch_size: usize) -> Self {
        Self {
            pool,
            embedder,
            embed_batch_size: embed_batch_size.max(1),
            collections: Mutex::new(HashMap::new()),
        }
    }

    /// Get or lazily create the collection for a company. Cached for the
    /// process lifetime.
    pub async fn collection(&self, company_id: &str) -> Result<Arc<Collection>> {
        let mut cache = self.collections.lock().await;
        if let Some(existing) = cache.get(company_id) {
            return Ok(existing.clone());
        }

        let name = format!("company_{}", company_id);
        sqlx::query(
            r#"
            INSERT INTO collections (company_id, name, created_at) VALUES (?, ?, ?)
            ON CONFLICT(company_id) DO NOTHING
            "#,
        )
        .bind(company_id)
        .bind(&name)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| PipelineError::IndexOperation(e.to_string()))?;

        let collection = Arc::new(Collection {
            company_id: company_id.to_string(),
            pool: self.pool.clone(),
        });
        cache.insert(company_id.to_string(), collection.clone());
        info!(company_id, collection = name, "collection ready");
        Ok(collection)
    }

    /// Embed and store chunks for a document. Returns the number indexed.
    pub async fn upsert(
        &self,
        chunks: &[Chunk],
        company_id: &str,
        document_id: &str,
    ) -> Result<usize> {
        if chunks.is_empty() {
            return Ok(0);
        }

        let collection = self.collection(company_id).await?;

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let mut vectors: Vec<Vec<f32>> = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.embed_batch_size) {
            let embedded = self
                .embedder
                .embed(batch)
                .await
                .map_err(|e| PipelineError::IndexOperation(format!("embedding failed: {}", e)))?;
            vectors.extend(embedded);
        }
        if vectors.len() != chunks.len() {
            return Err(PipelineError::IndexOperation(format!(
                "embedding count mismatch: {} chunks, {} vectors",
                chunks.len(),
                vectors.len()
            )));
        }

        collection.replace_chunks(document_id, chunks, &vectors).await?;

        info!(
            company_id,
            document_id,
            chunks = chunks.len(),
            "indexed document chunks"
        );
        Ok(chunks.len())
    }

    /// Delete every entry for a document. All-or-nothing: a partial delete
    /// rolls back and surfaces as an error.
    pub async fn delete_by_document(&self, document_id: &str, company_id: &str) -> Result<u64> {
        let collection = self.collection(company_id).await?;
        let deleted = collection.delete_by_document(document_id).await;
        match &deleted {
            Ok(n) => info!(company_id, document_id, deleted = n, "deleted index entries"),
            Err(e) => warn!(company_id, document_id, error = %e, "index delete failed"),
        }
        deleted
    }

    /// Fetch entries matching a metadata filter, without embeddings.
    pub async fn fetch_by_metadata(
        &self,
        company_id: &str,
        filter: &MetadataFilter,
    ) -> Result<Vec<IndexEntry>> {
        let collection = self.collection(company_id).await?;
        collection.fetch_by_metadata(filter, false).await
    }

    /// Fetch entries matching a metadata filter, embeddings included.
    /// Used by the retriever for similarity scoring.
    pub async fn fetch_with_vectors(
        &self,
        company_id: &str,
        filter: &MetadataFilter,
    ) -> Result<Vec<IndexEntry>> {
        let collection = self.collection(company_id).await?;
        collection.fetch_by_metadata(filter, true).await
    }
}

/// A company-scoped set of indexed chunks. Every query is bound to the
/// owning company's id.
pub struct Collection {
    company_id: String,
    pool: SqlitePool,
}

impl Collection {
    async fn replace_chunks(
        &self,
        document_id: &str,
        chunks: &[Chunk],
        vectors: &[Vec<f32>],
    ) -> Result<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| PipelineError::IndexOperation(e.to_string()))?;

        sqlx::query("DELETE FROM index_entries WHERE company_id = ? AND document_id = ?")
            .bind(&self.company_id)
            .bind(document_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| PipelineError::IndexOperation(e.to_string()))?;

        for (chunk, vector) in chunks.iter().zip(vectors.iter()) {
            let metadata_json = serde_json::to_string(&chunk.metadata)
                .map_err(|e| PipelineError::IndexOperation(e.to_string()))?;
            sqlx::query(
                r#"
                INSERT OR REPLACE INTO index_entries
                    (id, company_id, document_id, chunk_index, chunk_type, text,
                     metadata_json, start_char, end_char, embedding)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&chunk.id)
            .bind(&self.company_id)
            .bind(document_id)
            .bind(chunk.metadata.chunk_index as i64)
            .bind(
                serde_json::to_value(chunk.metadata.chunk_type)
                    .ok()
                    .and_then(|v| v.as_str().map(|s| s.to_string()))
                    .unwrap_or_else(|| "text".to_string()),
            )
            .bind(&chunk.text)
            .bind(metadata_json)
            .bind(chunk.start_char.map(|v| v as i64))
            .bind(chunk.end_char.map(|v| v as i64))
            .bind(vec_to_blob(vector))
            .execute(&mut *tx)
            .await
            .map_err(|e| PipelineError::IndexOperation(e.to_string()))?;
        }

        tx.commit()
            .await
            .map_err(|e| PipelineError::IndexOperation(e.to_string()))
    }

    async fn delete_by_document(&self, document_id: &str) -> Result<u64> {
        let result =
            sqlx::query("DELETE FROM index_entries WHERE company_id = ? AND document_id = ?")
                .bind(&self.company_id)
                .bind(document_id)
                .execute(&self.pool)
                .await
                .map_err(|e| PipelineError::IndexOperation(e.to_string()))?;
        Ok(result.rows_affected())
    }

    async fn fetch_by_metadata(
        &self,
        filter: &MetadataFilter,
        with_vectors: bool,
    ) -> Result<Vec<IndexEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT id, document_id, text, metadata_json, embedding
            FROM index_entries
            WHERE company_id = ?
            ORDER BY document_id, chunk_index
            "#,
        )
        .bind(&self.company_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| PipelineError::IndexOperation(e.to_string()))?;

        let mut entries = Vec::new();
        for row in rows {
            let document_id: String = row.get("document_id");
            let metadata_json: String = row.get("metadata_json");
            let metadata_value: serde_json::Value =
                serde_json::from_str(&metadata_json).unwrap_or(serde_json::Value::Null);

            if !filter.matches(&document_id, &metadata_value) {
                continue;
            }

            let metadata: ChunkMetadata = match serde_json::from_value(metadata_value) {
                Ok(m) => m,
                Err(e) => {
                    warn!(error = %e, "skipping entry with unreadable metadata");
                    continue;
                }
            };

            let embedding = if with_vectors {
                row.get::<Option<Vec<u8>>, _>("embedding")
                    .map(|blob| blob_to_vec(&blob))
            } else {
                None
            };

            entries.push(IndexEntry {
                chunk_id: row.get("id"),
                document_id,
                text: row.get("text"),
                metadata,
                embedding,
            });
        }

        Ok(entries)
    }
}
