//! Similarity retrieval over per-company collections.
//!
//! Given a query and filters, returns the top-K most relevant chunks by
//! vector similarity. When reranking is enabled the candidate set is
//! widened (`widen_factor × top_k`) before the reranker cuts it back to
//! exactly `top_k`. Every response is ordered by score descending.

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::RetrievalConfig;
use crate::embedding::{cosine_similarity, Embedder};
use crate::error::{PipelineError, Result};
use crate::index::{Indexer, MetadataFilter};
use crate::models::RetrievalResult;
use crate::rerank::{sort_descending, Reranker};

/// Per-call retrieval options.
#[derive(Debug, Clone, Default)]
pub struct RetrieveOptions {
    pub top_k: Option<usize>,
    /// Restrict to these documents.
    pub document_ids: Option<Vec<String>>,
    /// Metadata equality filters.
    pub metadata_filters: Vec<(String, serde_json::Value)>,
    pub min_score: Option<f64>,
}

pub struct Retriever {
    indexer: Arc<Indexer>,
    embedder: Arc<dyn Embedder>,
    reranker: Option<Reranker>,
    cfg: RetrievalConfig,
}

impl Retriever {
    pub fn new(
        indexer: Arc<Indexer>,
        embedder: Arc<dyn Embedder>,
        reranker: Option<Reranker>,
        cfg: RetrievalConfig,
    ) -> Self {
        Self {
            indexer,
            embedder,
            reranker,
            cfg,
        }
    }

    /// Retrieve the top-K chunks for a query within one company.
    pub async fn retrieve(
        &self,
        query: &str,
        company_id: &str,
        opts: &RetrieveOptions,
    ) -> Result<Vec<RetrievalResult>> {
        let top_k = opts.top_k.unwrap_or(self.cfg.top_k);
        let min_score = opts.min_score.unwrap_or(self.cfg.min_score);
        let candidate_k = if self.reranker.is_some() {
            top_k * self.cfg.widen_factor
        } else {
            top_k
        };

        let query_vec = self
            .embedder
            .embed_one(query)
            .await
            .map_err(|e| PipelineError::IndexOperation(format!("query embedding failed: {}", e)))?;

        let filter = MetadataFilter {
            document_id: None,
            equals: opts.metadata_filters.clone(),
        };
        let entries = self.indexer.fetch_with_vectors(company_id, &filter).await?;

        let doc_filter: Option<std::collections::HashSet<&str>> = opts
            .document_ids
            .as_ref()
            .map(|ids| ids.iter().map(|s| s.as_str()).collect());

        let mut results: Vec<RetrievalResult> = entries
            .iter()
            .filter(|e| {
                doc_filter
                    .as_ref()
                    .map(|ids| ids.contains(e.document_id.as_str()))
                    .unwrap_or(true)
            })
            .filter_map(|e| {
                let embedding = e.embedding.as_ref()?;
                let score = cosine_similarity(&query_vec, embedding) as f64;
                if score < min_score {
                    return None;
                }
                Some(RetrievalResult {
                    chunk_id: e.chunk_id.clone(),
                    text: e.text.clone(),
                    score,
                    metadata: e.metadata.clone(),
                    document_id: e.document_id.clone(),
                })
            })
            .collect();

        sort_descending(&mut results);
        results.truncate(candidate_k);

        match &self.reranker {
            Some(reranker) => Ok(reranker.rerank(query, results, top_k).await),
            None => {
                results.truncate(top_k);
                Ok(results)
            }
        }
    }

    /// Retrieve chunks from one specific document.
    pub async fn retrieve_for_document(
        &self,
        query: &str,
        company_id: &str,
        document_id: &str,
        top_k: usize,
    ) -> Result<Vec<RetrievalResult>> {
        self.retrieve(
            query,
            company_id,
            &RetrieveOptions {
                top_k: Some(top_k),
                document_ids: Some(vec![document_id.to_string()]),
                ..Default::default()
            },
        )
        .await
    }

    /// Retrieve with several query phrasings, merging result sets by chunk
    /// ID and keeping the maximum score per chunk.
    pub async fn retrieve_multi_query(
        &self,
        queries: &[String],
        company_id: &str,
        opts: &RetrieveOptions,
    ) -> Result<Vec<RetrievalResult>> {
        let top_k = opts.top_k.unwrap_or(self.cfg.top_k);
        let mut merged: HashMap<String, RetrievalResult> = HashMap::new();

        for query in queries {
            let results = self.retrieve(query, company_id, opts).await?;
            for result in results {
                match merged.get_mut(&result.chunk_id) {
                    Some(existing) if existing.score >= result.score => {}
                    _ => {
                        merged.insert(result.chunk_id.clone(), result);
                    }
                }
            }
        }

        let mut results: Vec<RetrievalResult> = merged.into_values().collect();
        sort_descending(&mut results);
        results.truncate(top_k);
        Ok(results)
    }

    /// Fetch the chunks immediately before/after a given chunk in the same
    /// document, by chunk-index arithmetic on the `_chunk_` ID scheme.
    /// Returns the window in document order; the center chunk scores 1.0
    /// and its neighbors 0.9.
    pub async fn context_window(
        &self,
        chunk_id: &str,
        company_id: &str,
        window_size: usize,
    ) -> Result<Vec<RetrievalResult>> {
        let Some((document_id, center)) = parse_chunk_id(chunk_id) else {
            return Ok(Vec::new());
        };

        let entries = self
            .indexer
            .fetch_by_metadata(company_id, &MetadataFilter::for_document(&document_id))
            .await?;

        let low = center.saturating_sub(window_size);
        let high = center + window_size;

        let mut results: Vec<RetrievalResult> = entries
            .into_iter()
            .filter(|e| {
                parse_chunk_id(&e.chunk_id)
                    .map(|(_, idx)| idx >= low && idx <= high)
                    .unwrap_or(false)
            })
            .map(|e| {
                let score = if e.chunk_id == chunk_id { 1.0 } else { 0.9 };
                RetrievalResult {
                    chunk_id: e.chunk_id,
                    text: e.text,
                    score,
                    metadata: e.metadata,
                    document_id: e.document_id,
                }
            })
            .collect();

        results.sort_by_key(|r| parse_chunk_id(&r.chunk_id).map(|(_, i)| i).unwrap_or(0));
        Ok(results)
    }
}

/// Split a `{document_id}_chunk_{index}` ID into its parts.
fn parse_chunk_id(chunk_id: &str) -> Option<(String, usize)> {
    let (document_id, index) = chunk_id.rsplit_once("_chunk_")?;
    let index = index.parse::<usize>().ok()?;
    Some((document_id.to_string(), index))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::Indexer;
    use crate::models::{Chunk, ChunkMetadata, ChunkType};
    use async_trait::async_trait;

    /// Bag-of-words embedding: texts sharing words land near each other.
    struct FakeEmbedder;

    #[async_trait]
    impl Embedder for FakeEmbedder {
        fn model_name(&self) -> &str {
            "fake"
        }

        async fn embed(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
            Ok(texts
                .iter()
                .map(|t| {
                    let mut v = vec![0.0f32; 32];
                    for word in t.to_lowercase().split_whitespace() {
                        let h: usize = word.bytes().map(|b| b as usize).sum();
                        v[h % 32] += 1.0;
                    }
                    v
                })
                .collect())
        }
    }

    fn chunk(doc: &str, index: usize, text: &str) -> Chunk {
        Chunk {
            id: format!("{}_chunk_{}", doc, index),
            text: text.to_string(),
            metadata: ChunkMetadata::new(doc, "co1", ChunkType::Text, index),
            start_char: None,
            end_char: None,
        }
    }

    async fn setup(chunks_by_doc: &[(&str, Vec<Chunk>)]) -> Retriever {
        let pool = crate::db::connect_in_memory().await.unwrap();
        crate::migrate::run_migrations(&pool).await.unwrap();
        let embedder: Arc<dyn Embedder> = Arc::new(FakeEmbedder);
        let indexer = Arc::new(Indexer::new(pool, embedder.clone(), 16));
        for (doc, chunks) in chunks_by_doc {
            indexer.upsert(chunks, "co1", doc).await.unwrap();
        }
        Retriever::new(indexer, embedder, None, RetrievalConfig::default())
    }

    #[tokio::test]
    async fn scores_are_non_increasing() {
        let retriever = setup(&[(
            "d1",
            vec![
                chunk("d1", 0, "cloud migration program for datacenters"),
                chunk("d1", 1, "quarterly dividend raised"),
                chunk("d1", 2, "cloud migration continues on schedule"),
            ],
        )])
        .await;

        let results = retriever
            .retrieve("cloud migration", "co1", &RetrieveOptions::default())
            .await
            .unwrap();
        assert!(!results.is_empty());
        for pair in results.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
    }

    #[tokio::test]
    async fn document_filter_restricts_results() {
        let retriever = setup(&[
            ("d1", vec![chunk("d1", 0, "expansion into europe markets")]),
            ("d2", vec![chunk("d2", 0, "expansion into europe markets")]),
        ])
        .await;

        let results = retriever
            .retrieve_for_document("expansion europe", "co1", "d2", 10)
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].document_id, "d2");
    }

    #[tokio::test]
    async fn multi_query_keeps_max_score_per_chunk() {
        let retriever = setup(&[(
            "d1",
            vec![
                chunk("d1", 0, "artificial intelligence platform launch"),
                chunk("d1", 1, "cost reduction program"),
            ],
        )])
        .await;

        let queries = vec![
            "artificial intelligence platform".to_string(),
            "cost reduction".to_string(),
        ];
        let results = retriever
            .retrieve_multi_query(&queries, "co1", &RetrieveOptions::default())
            .await
            .unwrap();

        // Each chunk appears once, not once per query.
        let mut ids: Vec<&str> = results.iter().map(|r| r.chunk_id.as_str()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), results.len());
        for pair in results.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
    }

    #[tokio::test]
    async fn context_window_fetches_neighbors_in_order() {
        let chunks: Vec<Chunk> = (0..6)
            .map(|i| chunk("d1", i, &format!("chunk body number {}", i)))
            .collect();
        let retriever = setup(&[("d1", chunks)]).await;

        let window = retriever
            .context_window("d1_chunk_3", "co1", 1)
            .await
            .unwrap();
        let ids: Vec<&str> = window.iter().map(|r| r.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["d1_chunk_2", "d1_chunk_3", "d1_chunk_4"]);
        assert!((window[1].score - 1.0).abs() < 1e-9);
        assert!((window[0].score - 0.9).abs() < 1e-9);
    }

    #[tokio::test]
    async fn context_window_ignores_non_chunk_ids() {
        let retriever = setup(&[("d1", vec![chunk("d1", 0, "body")])]).await;
        let window = retriever
            .context_window("d1_table_0", "co1", 2)
            .await
            .unwrap();
        assert!(window.is_empty());
    }

    #[tokio::test]
    async fn widened_candidates_cut_back_to_top_k_by_reranker() {
        let chunks: Vec<Chunk> = (0..8)
            .map(|i| chunk("d1", i, &format!("filler text {}", i)))
            .collect();
        let pool = crate::db::connect_in_memory().await.unwrap();
        crate::migrate::run_migrations(&pool).await.unwrap();
        let embedder: Arc<dyn Embedder> = Arc::new(FakeEmbedder);
        let indexer = Arc::new(Indexer::new(pool, embedder.clone(), 16));
        indexer.upsert(&chunks, "co1", "d1").await.unwrap();
        let retriever = Retriever::new(
            indexer,
            embedder,
            Some(Reranker::heuristic()),
            RetrievalConfig::default(),
        );

        let results = retriever
            .retrieve(
                "filler text",
                "co1",
                &RetrieveOptions {
                    top_k: Some(3),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(results.len(), 3);
    }

    #[test]
    fn parse_chunk_id_scheme() {
        assert_eq!(parse_chunk_id("doc-a_chunk_7"), Some(("doc-a".to_string(), 7)));
        assert_eq!(parse_chunk_id("doc_chunk_x"), None);
        assert_eq!(parse_chunk_id("doc_table_1"), None);
    }
}
