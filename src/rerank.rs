//! Retrieval reranking.
//!
//! Reorders a candidate set with a second, higher-precision relevance
//! signal. Two modes: model-backed (a cross-encoder-style scorer reached
//! over HTTP) and a deterministic lexical heuristic. Both produce a total
//! order and truncate to `top_k`; a model failure degrades to the heuristic
//! rather than failing retrieval.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tracing::warn;

use crate::config::RerankConfig;
use crate::models::RetrievalResult;

/// Speaker roles whose chunks get an authority boost in heuristic mode.
const AUTHORITY_ROLES: &[&str] = &["CEO", "CFO", "President"];

/// Cross-encoder-style relevance scorer: one score per candidate text.
#[async_trait]
pub trait RelevanceModel: Send + Sync {
    async fn score(&self, query: &str, texts: &[String]) -> Result<Vec<f64>>;
}

/// HTTP scorer speaking a minimal rerank protocol:
/// `POST url {"model", "query", "documents"}` → `{"scores": [..]}`.
pub struct HttpRelevanceModel {
    url: String,
    model: Option<String>,
    client: reqwest::Client,
}

impl HttpRelevanceModel {
    pub fn new(url: String, model: Option<String>, timeout_secs: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;
        Ok(Self { url, model, client })
    }
}

#[async_trait]
impl RelevanceModel for HttpRelevanceModel {
    async fn score(&self, query: &str, texts: &[String]) -> Result<Vec<f64>> {
        let body = serde_json::json!({
            "model": self.model,
            "query": query,
            "documents": texts,
        });
        let response = self.client.post(&self.url).json(&body).send().await?;
        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("rerank endpoint returned {}", status);
        }
        let json: serde_json::Value = response.json().await?;
        let scores = json
            .get("scores")
            .and_then(|s| s.as_array())
            .ok_or_else(|| anyhow::anyhow!("rerank response missing scores array"))?;
        if scores.len() != texts.len() {
            anyhow::bail!(
                "rerank score count mismatch: {} documents, {} scores",
                texts.len(),
                scores.len()
            );
        }
        Ok(scores.iter().map(|v| v.as_f64().unwrap_or(0.0)).collect())
    }
}

pub struct Reranker {
    model: Option<Box<dyn RelevanceModel>>,
}

impl Reranker {
    /// Build from config. Returns `None` when reranking is disabled.
    pub fn from_config(cfg: &RerankConfig) -> Option<Reranker> {
        if !cfg.enabled {
            return None;
        }
        let model = cfg.url.as_ref().and_then(|url| {
            match HttpRelevanceModel::new(url.clone(), cfg.model.clone(), cfg.timeout_secs) {
                Ok(m) => Some(Box::new(m) as Box<dyn RelevanceModel>),
                Err(e) => {
                    warn!(error = %e, "rerank model unavailable, using heuristic");
                    None
                }
            }
        });
        Some(Reranker { model })
    }

    pub fn heuristic() -> Reranker {
        Reranker { model: None }
    }

    pub fn with_model(model: Box<dyn RelevanceModel>) -> Reranker {
        Reranker { model: Some(model) }
    }

    /// Rerank candidates and truncate to `top_k`, scores descending.
    pub async fn rerank(
        &self,
        query: &str,
        mut results: Vec<RetrievalResult>,
        top_k: usize,
    ) -> Vec<RetrievalResult> {
        if results.is_empty() {
            return results;
        }

        match &self.model {
            Some(model) => {
                let texts: Vec<String> = results.iter().map(|r| r.text.clone()).collect();
                match model.score(query, &texts).await {
                    Ok(scores) => {
                        for (result, score) in results.iter_mut().zip(scores) {
                            result.score = score;
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "rerank model call failed, falling back to heuristic");
                        heuristic_boost(query, &mut results);
                    }
                }
            }
            None => heuristic_boost(query, &mut results),
        }

        sort_descending(&mut results);
        results.truncate(top_k);
        results
    }
}

/// Lexical-overlap heuristic: boosts are additive on top of the retrieval
/// similarity score, never replacing it.
fn heuristic_boost(query: &str, results: &mut [RetrievalResult]) {
    let query_lower = query.to_lowercase();
    let query_terms: std::collections::HashSet<&str> =
        query_lower.split_whitespace().collect();

    for result in results.iter_mut() {
        let text_lower = result.text.to_lowercase();
        let text_terms: std::collections::HashSet<&str> =
            text_lower.split_whitespace().collect();

        let overlap = query_terms.intersection(&text_terms).count();
        let coverage = if query_terms.is_empty() {
            0.0
        } else {
            overlap as f64 / query_terms.len() as f64
        };

        let mut boost = coverage * 0.1;
        if text_lower.contains(&query_lower) {
            boost += 0.2;
        }
        if result
            .metadata
            .speaker_role
            .as_deref()
            .map(|role| AUTHORITY_ROLES.contains(&role))
            .unwrap_or(false)
        {
            boost += 0.1;
        }

        result.score += boost;
    }
}

/// Score descending, chunk id ascending on ties (deterministic).
pub(crate) fn sort_descending(results: &mut [RetrievalResult]) {
    results.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.chunk_id.cmp(&b.chunk_id))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ChunkMetadata, ChunkType};

    fn result(id: &str, text: &str, score: f64, role: Option<&str>) -> RetrievalResult {
        let mut metadata = ChunkMetadata::new("d1", "co1", ChunkType::Text, 0);
        metadata.speaker_role = role.map(|r| r.to_string());
        RetrievalResult {
            chunk_id: id.to_string(),
            text: text.to_string(),
            score,
            metadata,
            document_id: "d1".to_string(),
        }
    }

    #[tokio::test]
    async fn heuristic_scores_are_non_increasing_and_truncated() {
        let reranker = Reranker::heuristic();
        let results = vec![
            result("c1", "cloud migration plan", 0.5, None),
            result("c2", "irrelevant body", 0.6, None),
            result("c3", "cloud migration plan details", 0.4, None),
        ];
        let reranked = reranker.rerank("cloud migration plan", results, 2).await;
        assert_eq!(reranked.len(), 2);
        assert!(reranked[0].score >= reranked[1].score);
    }

    #[tokio::test]
    async fn exact_substring_gets_bonus_over_plain_overlap() {
        let reranker = Reranker::heuristic();
        let results = vec![
            result("c1", "plan migration cloud shuffled words", 0.5, None),
            result("c2", "the cloud migration plan is on track", 0.5, None),
        ];
        let reranked = reranker.rerank("cloud migration plan", results, 2).await;
        assert_eq!(reranked[0].chunk_id, "c2");
        // Both have full term coverage; only c2 contains the exact phrase.
        assert!((reranked[0].score - reranked[1].score - 0.2).abs() < 1e-9);
    }

    #[tokio::test]
    async fn authority_speaker_gets_metadata_boost() {
        let reranker = Reranker::heuristic();
        let results = vec![
            result("c1", "guidance unchanged", 0.5, Some("Analyst")),
            result("c2", "guidance unchanged", 0.5, Some("CEO")),
        ];
        let reranked = reranker.rerank("guidance", results, 2).await;
        assert_eq!(reranked[0].chunk_id, "c2");
        assert!((reranked[0].score - reranked[1].score - 0.1).abs() < 1e-9);
    }

    #[tokio::test]
    async fn boost_is_additive_not_replacing() {
        let reranker = Reranker::heuristic();
        let results = vec![result("c1", "nothing in common", 0.42, None)];
        let reranked = reranker.rerank("query terms", results, 1).await;
        // No overlap, no phrase, no role: score unchanged.
        assert!((reranked[0].score - 0.42).abs() < 1e-9);
    }

    struct FailingModel;

    #[async_trait]
    impl RelevanceModel for FailingModel {
        async fn score(&self, _query: &str, _texts: &[String]) -> Result<Vec<f64>> {
            anyhow::bail!("scorer down")
        }
    }

    #[tokio::test]
    async fn model_failure_falls_back_to_heuristic() {
        let reranker = Reranker::with_model(Box::new(FailingModel));
        let results = vec![
            result("c1", "cloud migration plan", 0.1, None),
            result("c2", "unrelated", 0.1, None),
        ];
        let reranked = reranker.rerank("cloud migration plan", results, 2).await;
        assert_eq!(reranked[0].chunk_id, "c1");
    }

    struct ScriptedModel(Vec<f64>);

    #[async_trait]
    impl RelevanceModel for ScriptedModel {
        async fn score(&self, _query: &str, _texts: &[String]) -> Result<Vec<f64>> {
            Ok(self.0.clone())
        }
    }

    #[tokio::test]
    async fn model_scores_replace_and_order() {
        let reranker = Reranker::with_model(Box::new(ScriptedModel(vec![0.1, 0.9])));
        let results = vec![
            result("c1", "first", 0.8, None),
            result("c2", "second", 0.2, None),
        ];
        let reranked = reranker.rerank("q", results, 2).await;
        assert_eq!(reranked[0].chunk_id, "c2");
        assert!((reranked[0].score - 0.9).abs() < 1e-9);
    }
}
