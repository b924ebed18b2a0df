//! Schema-constrained initiative extraction.
//!
//! One structured reasoning call per input context. The model's output is
//! validated and normalized item by item: category labels map onto the
//! closed vocabulary, confidence is clamped to `[0, 1]` (0.5 when missing
//! or invalid), and a malformed item is dropped with a warning — one bad
//! item never aborts the whole call.

use std::sync::Arc;

use serde_json::Value;
use tracing::{error, warn};

use crate::error::{PipelineError, Result};
use crate::models::{Category, ExtractedInitiative, RetrievalResult};
use crate::reasoning::{ReasoningModel, StructuredRequest};

pub struct InitiativeExtractor {
    model: Arc<dyn ReasoningModel>,
}

impl InitiativeExtractor {
    pub fn new(model: Arc<dyn ReasoningModel>) -> Self {
        Self { model }
    }

    /// Extract initiatives from one context.
    pub async fn extract(
        &self,
        context: &str,
        company_name: &str,
        document_type: &str,
    ) -> Result<Vec<ExtractedInitiative>> {
        let request = StructuredRequest {
            instruction: "Extract every discrete strategic initiative that management \
                          commits to or reports on in the given disclosure text. An \
                          initiative is a concrete plan, program, or investment — not \
                          a routine result. Quote the supporting text verbatim."
                .to_string(),
            schema: extraction_schema(),
            input: serde_json::json!({
                "context": context,
                "company_name": company_name,
                "document_type": document_type,
            }),
        };

        let response = self
            .model
            .complete(&request)
            .await
            .map_err(|e| PipelineError::ExtractionCall(e.to_string()))?;

        let items = response
            .get("initiatives")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();

        let mut initiatives = Vec::new();
        for item in items {
            match parse_item(&item) {
                Ok(initiative) => initiatives.push(initiative),
                Err(e) => warn!(error = %e, "dropping malformed initiative item"),
            }
        }

        Ok(initiatives)
    }

    /// Extract from many chunks, accumulating all candidates without
    /// deduplication. A failed call skips that chunk and the batch
    /// continues. Each candidate is attributed to its source chunk.
    pub async fn extract_from_chunks(
        &self,
        chunks: &[RetrievalResult],
        company_name: &str,
        document_type: &str,
    ) -> Vec<ExtractedInitiative> {
        let mut all = Vec::new();

        for chunk in chunks {
            if chunk.text.trim().is_empty() {
                continue;
            }
            match self.extract(&chunk.text, company_name, document_type).await {
                Ok(mut initiatives) => {
                    for initiative in &mut initiatives {
                        initiative.source_chunk_id = Some(chunk.chunk_id.clone());
                    }
                    all.extend(initiatives);
                }
                Err(e) => {
                    error!(chunk_id = %chunk.chunk_id, error = %e, "extraction failed for chunk");
                }
            }
        }

        all
    }
}

/// Attribute each candidate's evidence quote to the retrieved chunk that
/// contains it verbatim.
pub fn attach_sources(initiatives: &mut [ExtractedInitiative], chunks: &[RetrievalResult]) {
    for initiative in initiatives.iter_mut() {
        if initiative.source_chunk_id.is_some() || initiative.evidence_quote.is_empty() {
            continue;
        }
        initiative.source_chunk_id = chunks
            .iter()
            .find(|c| c.text.contains(&initiative.evidence_quote))
            .map(|c| c.chunk_id.clone());
    }
}

fn extraction_schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "initiatives": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "name": { "type": "string", "description": "Short name (3-7 words)" },
                        "description": { "type": "string" },
                        "category": {
                            "type": "string",
                            "enum": ["strategy", "product", "market", "operational", "financial"]
                        },
                        "timeline": { "type": ["string", "null"] },
                        "metrics": { "type": "array", "items": { "type": "string" } },
                        "confidence": { "type": "number", "minimum": 0, "maximum": 1 },
                        "evidence_quote": { "type": "string", "description": "Verbatim quote from the context" }
                    },
                    "required": ["name", "description", "category", "evidence_quote"]
                }
            }
        },
        "required": ["initiatives"]
    })
}

fn parse_item(item: &Value) -> Result<ExtractedInitiative> {
    let obj = item
        .as_object()
        .ok_or_else(|| PipelineError::ExtractionItem("item is not an object".to_string()))?;

    let name = obj
        .get("name")
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| PipelineError::ExtractionItem("missing name".to_string()))?;

    let description = obj
        .get("description")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .trim();

    let category = Category::normalize(
        obj.get("category").and_then(|v| v.as_str()).unwrap_or(""),
    );

    let timeline = obj
        .get("timeline")
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string);

    let metrics = obj
        .get("metrics")
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|m| m.as_str())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    let confidence = normalize_confidence(obj.get("confidence"));

    let evidence_quote = obj
        .get("evidence_quote")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .trim()
        .to_string();

    Ok(ExtractedInitiative {
        name: name.to_string(),
        description: description.to_string(),
        category,
        timeline,
        metrics,
        confidence,
        evidence_quote,
        source_chunk_id: None,
    })
}

/// Clamp to [0, 1]; 0.5 when missing or invalid. Numeric strings are
/// accepted — models emit those more often than one would like.
fn normalize_confidence(value: Option<&Value>) -> f64 {
    let parsed = match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    match parsed {
        Some(c) if c.is_finite() => c.clamp(0.0, 1.0),
        _ => 0.5,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ChunkMetadata, ChunkType};
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Replays scripted JSON responses; errors once the script runs out.
    struct ScriptedModel {
        responses: Mutex<Vec<anyhow::Result<Value>>>,
    }

    impl ScriptedModel {
        fn new(responses: Vec<anyhow::Result<Value>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses),
            })
        }
    }

    #[async_trait]
    impl ReasoningModel for ScriptedModel {
        async fn complete(&self, _request: &StructuredRequest) -> anyhow::Result<Value> {
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                anyhow::bail!("script exhausted")
            } else {
                responses.remove(0)
            }
        }
    }

    fn chunk(id: &str, text: &str) -> RetrievalResult {
        RetrievalResult {
            chunk_id: id.to_string(),
            text: text.to_string(),
            score: 1.0,
            metadata: ChunkMetadata::new("d1", "co1", ChunkType::Text, 0),
            document_id: "d1".to_string(),
        }
    }

    #[tokio::test]
    async fn parses_valid_items_and_drops_malformed() {
        let model = ScriptedModel::new(vec![Ok(serde_json::json!({
            "initiatives": [
                {
                    "name": "AI Platform Launch",
                    "description": "Launching the new AI platform.",
                    "category": "product",
                    "timeline": "Q1 2025",
                    "metrics": ["ARR growth"],
                    "confidence": 0.9,
                    "evidence_quote": "we will launch our AI platform in Q1 2025"
                },
                { "description": "an item with no name" },
                42
            ]
        }))]);
        let extractor = InitiativeExtractor::new(model);
        let initiatives = extractor.extract("ctx", "Acme", "earnings_call").await.unwrap();
        assert_eq!(initiatives.len(), 1);
        assert_eq!(initiatives[0].name, "AI Platform Launch");
        assert_eq!(initiatives[0].category, Category::Product);
        assert_eq!(initiatives[0].timeline.as_deref(), Some("Q1 2025"));
        assert!((initiatives[0].confidence - 0.9).abs() < 1e-9);
    }

    #[tokio::test]
    async fn category_aliases_and_confidence_normalization() {
        let model = ScriptedModel::new(vec![Ok(serde_json::json!({
            "initiatives": [
                {
                    "name": "Growth Push",
                    "description": "d",
                    "category": "strategic",
                    "confidence": 3.5,
                    "evidence_quote": ""
                },
                {
                    "name": "No Confidence",
                    "description": "d",
                    "category": "marketing",
                    "evidence_quote": ""
                },
                {
                    "name": "String Confidence",
                    "description": "d",
                    "category": "operations",
                    "confidence": "0.75",
                    "evidence_quote": ""
                }
            ]
        }))]);
        let extractor = InitiativeExtractor::new(model);
        let out = extractor.extract("ctx", "Acme", "annual_report").await.unwrap();
        assert_eq!(out[0].category, Category::Strategy);
        assert!((out[0].confidence - 1.0).abs() < 1e-9, "clamped to 1.0");
        assert_eq!(out[1].category, Category::Market);
        assert!((out[1].confidence - 0.5).abs() < 1e-9, "default 0.5");
        assert_eq!(out[2].category, Category::Operational);
        assert!((out[2].confidence - 0.75).abs() < 1e-9);
    }

    #[tokio::test]
    async fn call_failure_surfaces_as_extraction_call_error() {
        let model = ScriptedModel::new(vec![Err(anyhow::anyhow!("model down"))]);
        let extractor = InitiativeExtractor::new(model);
        let err = extractor.extract("ctx", "Acme", "earnings_call").await.unwrap_err();
        assert!(matches!(err, PipelineError::ExtractionCall(_)));
    }

    #[tokio::test]
    async fn batch_extraction_skips_failed_chunks_and_attributes_sources() {
        let item = serde_json::json!({
            "name": "Cost Program",
            "description": "d",
            "category": "operational",
            "evidence_quote": "cut costs by 10%"
        });
        let model = ScriptedModel::new(vec![
            Ok(serde_json::json!({ "initiatives": [item] })),
            Err(anyhow::anyhow!("model down")),
            Ok(serde_json::json!({ "initiatives": [] })),
        ]);
        let extractor = InitiativeExtractor::new(model);
        let chunks = vec![
            chunk("d1_chunk_0", "we will cut costs by 10% next year"),
            chunk("d1_chunk_1", "this chunk fails"),
            chunk("d1_chunk_2", "nothing here"),
        ];
        let out = extractor
            .extract_from_chunks(&chunks, "Acme", "earnings_call")
            .await;
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].source_chunk_id.as_deref(), Some("d1_chunk_0"));
    }

    #[tokio::test]
    async fn attach_sources_by_quote_containment() {
        let model = ScriptedModel::new(vec![Ok(serde_json::json!({
            "initiatives": [{
                "name": "Buyback",
                "description": "d",
                "category": "financial",
                "evidence_quote": "a $2B buyback program"
            }]
        }))]);
        let extractor = InitiativeExtractor::new(model);
        let mut out = extractor.extract("ctx", "Acme", "earnings_call").await.unwrap();
        let chunks = vec![
            chunk("d1_chunk_0", "unrelated"),
            chunk("d1_chunk_1", "the board approved a $2B buyback program today"),
        ];
        attach_sources(&mut out, &chunks);
        assert_eq!(out[0].source_chunk_id.as_deref(), Some("d1_chunk_1"));
        // The tested property: the quote is a verbatim substring of its source.
        assert!(chunks[1].text.contains(&out[0].evidence_quote));
    }
}
