//! Question answering with quoted, source-attributed citations.
//!
//! Retrieval feeds numbered source blocks into one structured reasoning
//! call; each returned citation quote is mapped back to the retrieved chunk
//! that contains it verbatim, so every citation points at a real location.

use std::sync::Arc;

use anyhow::Result;
use serde_json::Value;

use crate::error::PipelineError;
use crate::models::RetrievalResult;
use crate::reasoning::{ReasoningModel, StructuredRequest};
use crate::retrieve::{RetrieveOptions, Retriever};

/// One citation backing an answer.
#[derive(Debug, Clone)]
pub struct Citation {
    pub quote: String,
    pub chunk_id: Option<String>,
    pub document_id: Option<String>,
    pub section: Option<String>,
    pub page_number: Option<u32>,
}

/// A grounded answer with citations.
#[derive(Debug, Clone)]
pub struct Answer {
    pub answer: String,
    pub citations: Vec<Citation>,
    /// Clamped to [0, 1].
    pub confidence: f64,
    pub related_topics: Vec<String>,
    pub sources_used: Vec<String>,
}

pub struct QuestionAnswerer {
    model: Arc<dyn ReasoningModel>,
    retriever: Arc<Retriever>,
}

impl QuestionAnswerer {
    pub fn new(model: Arc<dyn ReasoningModel>, retriever: Arc<Retriever>) -> Self {
        Self { model, retriever }
    }

    pub async fn answer(
        &self,
        question: &str,
        company_id: &str,
        company_name: &str,
        top_k: Option<usize>,
    ) -> Result<Answer> {
        let chunks = self
            .retriever
            .retrieve(
                question,
                company_id,
                &RetrieveOptions {
                    top_k,
                    ..Default::default()
                },
            )
            .await?;

        if chunks.is_empty() {
            return Ok(Answer {
                answer: "No indexed disclosures are available to answer this question."
                    .to_string(),
                citations: Vec::new(),
                confidence: 0.0,
                related_topics: Vec::new(),
                sources_used: Vec::new(),
            });
        }

        let context: String = chunks
            .iter()
            .enumerate()
            .map(|(i, c)| format!("[Source {}]\n{}", i + 1, c.text))
            .collect::<Vec<_>>()
            .join("\n\n");

        let request = StructuredRequest {
            instruction: "Answer the question about the company's strategy and disclosures \
                          using only the numbered sources. Cite supporting passages as \
                          verbatim quotes from the sources."
                .to_string(),
            schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "answer": { "type": "string" },
                    "citations": { "type": "array", "items": { "type": "string" } },
                    "confidence": { "type": "number", "minimum": 0, "maximum": 1 },
                    "related_topics": { "type": "array", "items": { "type": "string" } }
                },
                "required": ["answer", "citations", "confidence"]
            }),
            input: serde_json::json!({
                "question": question,
                "company_name": company_name,
                "context": context,
            }),
        };

        let response = self
            .model
            .complete(&request)
            .await
            .map_err(|e| PipelineError::ExtractionCall(e.to_string()))?;

        let answer = response
            .get("answer")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();
        let confidence = response
            .get("confidence")
            .and_then(Value::as_f64)
            .unwrap_or(0.5)
            .clamp(0.0, 1.0);
        let related_topics = string_list(response.get("related_topics"));

        let citations = string_list(response.get("citations"))
            .into_iter()
            .map(|quote| attribute_quote(quote, &chunks))
            .collect();

        Ok(Answer {
            answer,
            citations,
            confidence,
            related_topics,
            sources_used: chunks.iter().map(|c| c.chunk_id.clone()).collect(),
        })
    }
}

/// Find the retrieved chunk containing the quote verbatim.
fn attribute_quote(quote: String, chunks: &[RetrievalResult]) -> Citation {
    let source = chunks.iter().find(|c| c.text.contains(&quote));
    Citation {
        quote,
        chunk_id: source.map(|c| c.chunk_id.clone()),
        document_id: source.map(|c| c.document_id.clone()),
        section: source.and_then(|c| c.metadata.section_heading.clone()),
        page_number: source.and_then(|c| c.metadata.page_number),
    }
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|arr| {
            arr.iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ChunkMetadata, ChunkType};

    #[test]
    fn quotes_map_to_containing_chunk() {
        let mut metadata = ChunkMetadata::new("d1", "co1", ChunkType::Section, 0);
        metadata.section_heading = Some("CEO Remarks".to_string());
        let chunks = vec![
            RetrievalResult {
                chunk_id: "d1_chunk_0".to_string(),
                text: "nothing relevant".to_string(),
                score: 0.9,
                metadata: ChunkMetadata::new("d1", "co1", ChunkType::Text, 0),
                document_id: "d1".to_string(),
            },
            RetrievalResult {
                chunk_id: "d1_chunk_1".to_string(),
                text: "we expect the AI platform to ship in Q1 2025".to_string(),
                score: 0.8,
                metadata,
                document_id: "d1".to_string(),
            },
        ];

        let citation =
            attribute_quote("AI platform to ship in Q1 2025".to_string(), &chunks);
        assert_eq!(citation.chunk_id.as_deref(), Some("d1_chunk_1"));
        assert_eq!(citation.document_id.as_deref(), Some("d1"));
        assert_eq!(citation.section.as_deref(), Some("CEO Remarks"));
    }

    #[test]
    fn unmatched_quote_keeps_text_without_source() {
        let citation = attribute_quote("hallucinated words".to_string(), &[]);
        assert_eq!(citation.quote, "hallucinated words");
        assert!(citation.chunk_id.is_none());
    }
}
