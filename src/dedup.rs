//! Cross-document deduplication of candidate initiatives.
//!
//! Greedy single-pass clustering in input order: each unclustered candidate
//! opens a group, and every later unclustered candidate joins the first
//! open group containing a member it matches (model judgment, Jaccard
//! fallback). This is deliberately not transitive-closure correct — if A~B
//! and B~C but not A~C, C still lands in A's group through B. A deliberate,
//! cheap approximation; the threshold and batch size are configurable.
//!
//! Groups of size one pass through unchanged. Larger groups merge through
//! one reasoning call proposing the canonical name/description/timeline,
//! while metrics, confidence (max), category (of the highest-confidence
//! member), evidence quotes, and source chunk IDs are combined
//! deterministically outside the model call.

use std::collections::HashSet;
use std::sync::Arc;

use serde_json::Value;
use tracing::warn;

use crate::config::DedupConfig;
use crate::error::PipelineError;
use crate::models::{ExtractedInitiative, MergedInitiative};
use crate::reasoning::{ReasoningModel, StructuredRequest};

pub struct Deduplicator {
    model: Arc<dyn ReasoningModel>,
    threshold: f64,
    batch_size: usize,
}

impl Deduplicator {
    pub fn new(model: Arc<dyn ReasoningModel>, cfg: &DedupConfig) -> Self {
        Self {
            model,
            threshold: cfg.similarity_threshold,
            batch_size: cfg.batch_size.max(2),
        }
    }

    /// Deduplicate candidates, batching when the input exceeds the batch
    /// bound. The batched mode is an explicit loop: each pass cannot
    /// increase the item count (asserted), and a pass that makes no
    /// progress ends the loop, so termination is guaranteed.
    pub async fn deduplicate(
        &self,
        candidates: Vec<ExtractedInitiative>,
    ) -> Vec<MergedInitiative> {
        let mut items: Vec<MergedInitiative> =
            candidates.into_iter().map(singleton).collect();

        if items.len() <= self.batch_size {
            return self.dedupe_pass(items).await;
        }

        loop {
            let before = items.len();
            let mut next = Vec::with_capacity(before);
            let mut remaining = items;
            while !remaining.is_empty() {
                let take = remaining.len().min(self.batch_size);
                let batch: Vec<MergedInitiative> = remaining.drain(..take).collect();
                next.extend(self.dedupe_pass(batch).await);
            }

            assert!(
                next.len() <= before,
                "deduplication must not increase item count"
            );

            if next.len() <= self.batch_size {
                return self.dedupe_pass(next).await;
            }
            if next.len() == before {
                // Re-batching can no longer make progress; one full pass
                // catches duplicates that never shared a batch, then stop.
                return self.dedupe_pass(next).await;
            }
            items = next;
        }
    }

    /// One greedy clustering pass over a bounded set.
    async fn dedupe_pass(&self, items: Vec<MergedInitiative>) -> Vec<MergedInitiative> {
        if items.len() <= 1 {
            return items;
        }

        let groups = self.find_groups(&items).await;

        let mut by_index: Vec<Option<MergedInitiative>> =
            items.into_iter().map(Some).collect();
        let mut out = Vec::with_capacity(groups.len());
        for group in groups {
            let members: Vec<MergedInitiative> = group
                .into_iter()
                .filter_map(|i| by_index[i].take())
                .collect();
            if members.len() == 1 {
                out.extend(members);
            } else {
                out.push(self.merge_group(members).await);
            }
        }
        out
    }

    /// Greedy grouping: candidate `j` joins the first open group with a
    /// member it matches, in input order.
    async fn find_groups(&self, items: &[MergedInitiative]) -> Vec<Vec<usize>> {
        let n = items.len();
        let mut grouped = vec![false; n];
        let mut groups: Vec<Vec<usize>> = Vec::new();

        for i in 0..n {
            if grouped[i] {
                continue;
            }
            grouped[i] = true;
            let mut group = vec![i];

            for j in (i + 1)..n {
                if grouped[j] {
                    continue;
                }
                let mut joins = false;
                for &member in &group {
                    if self.is_duplicate(&items[member], &items[j]).await {
                        joins = true;
                        break;
                    }
                }
                if joins {
                    grouped[j] = true;
                    group.push(j);
                }
            }

            groups.push(group);
        }

        groups
    }

    /// Pairwise duplicate judgment. A pair matches iff the model says
    /// duplicate AND its similarity is at or above the threshold. A failed
    /// model call degrades to word-overlap similarity.
    async fn is_duplicate(&self, a: &MergedInitiative, b: &MergedInitiative) -> bool {
        let text_a = describe(a);
        let text_b = describe(b);

        let request = StructuredRequest {
            instruction: "Judge whether the two initiative descriptions refer to the \
                          same underlying strategic initiative."
                .to_string(),
            schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "is_duplicate": { "type": "boolean" },
                    "similarity": { "type": "number", "minimum": 0, "maximum": 1 },
                    "reasoning": { "type": "string" }
                },
                "required": ["is_duplicate", "similarity"]
            }),
            input: serde_json::json!({
                "initiative_a": text_a,
                "initiative_b": text_b,
            }),
        };

        match self.model.complete(&request).await {
            Ok(response) => {
                let is_dup = response
                    .get("is_duplicate")
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                let similarity = response
                    .get("similarity")
                    .and_then(Value::as_f64)
                    .unwrap_or(0.0);
                is_dup && similarity >= self.threshold
            }
            Err(e) => {
                let err = PipelineError::DeduplicationCall(e.to_string());
                warn!(error = %err, "duplicate comparison failed, using word-overlap fallback");
                word_jaccard(&text_a, &text_b) >= self.threshold
            }
        }
    }

    /// Merge a group of two or more. The model proposes canonical fields;
    /// everything else is combined deterministically. A failed merge call
    /// keeps the first member's fields.
    async fn merge_group(&self, members: Vec<MergedInitiative>) -> MergedInitiative {
        debug_assert!(members.len() >= 2);

        let descriptions: Vec<String> = members.iter().map(describe).collect();
        let request = StructuredRequest {
            instruction: "Merge these descriptions of the same strategic initiative \
                          into one canonical form."
                .to_string(),
            schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "canonical_name": { "type": "string" },
                    "canonical_description": { "type": "string" },
                    "combined_timeline": { "type": ["string", "null"] },
                    "combined_metrics": { "type": "array", "items": { "type": "string" } }
                },
                "required": ["canonical_name", "canonical_description"]
            }),
            input: serde_json::json!({ "initiatives": descriptions }),
        };

        let proposed = match self.model.complete(&request).await {
            Ok(response) => Some(response),
            Err(e) => {
                let err = PipelineError::DeduplicationCall(e.to_string());
                warn!(error = %err, "merge call failed, keeping first member's fields");
                None
            }
        };

        let first = &members[0];
        let name = proposed
            .as_ref()
            .and_then(|r| r.get("canonical_name"))
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| first.name.clone());
        let description = proposed
            .as_ref()
            .and_then(|r| r.get("canonical_description"))
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| first.description.clone());
        let timeline = proposed
            .as_ref()
            .and_then(|r| r.get("combined_timeline"))
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
            .map(str::to_string)
            .or_else(|| members.iter().find_map(|m| m.timeline.clone()));
        let proposed_metrics: Vec<String> = proposed
            .as_ref()
            .and_then(|r| r.get("combined_metrics"))
            .and_then(Value::as_array)
            .map(|arr| {
                arr.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        // Deterministic combination, model never consulted for these.
        let best = members
            .iter()
            .max_by(|a, b| {
                a.confidence
                    .partial_cmp(&b.confidence)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .expect("non-empty group");
        let confidence = best.confidence;
        let category = best.category;

        let mut metrics = Vec::new();
        let mut seen = HashSet::new();
        for metric in proposed_metrics
            .into_iter()
            .chain(members.iter().flat_map(|m| m.metrics.iter().cloned()))
        {
            if seen.insert(metric.clone()) {
                metrics.push(metric);
            }
        }

        let mut evidence_quotes = Vec::new();
        let mut seen_quotes = HashSet::new();
        let mut source_chunk_ids = Vec::new();
        let mut seen_sources = HashSet::new();
        for member in &members {
            for quote in &member.evidence_quotes {
                if seen_quotes.insert(quote.clone()) {
                    evidence_quotes.push(quote.clone());
                }
            }
            for source in &member.source_chunk_ids {
                if seen_sources.insert(source.clone()) {
                    source_chunk_ids.push(source.clone());
                }
            }
        }

        MergedInitiative {
            name,
            description,
            category,
            timeline,
            metrics,
            confidence,
            evidence_quotes,
            source_chunk_ids,
            merged_count: members.iter().map(|m| m.merged_count).sum(),
        }
    }
}

fn singleton(candidate: ExtractedInitiative) -> MergedInitiative {
    let evidence_quotes = if candidate.evidence_quote.is_empty() {
        Vec::new()
    } else {
        vec![candidate.evidence_quote]
    };
    MergedInitiative {
        name: candidate.name,
        description: candidate.description,
        category: candidate.category,
        timeline: candidate.timeline,
        metrics: candidate.metrics,
        confidence: candidate.confidence,
        evidence_quotes,
        source_chunk_ids: candidate.source_chunk_id.into_iter().collect(),
        merged_count: 1,
    }
}

fn describe(initiative: &MergedInitiative) -> String {
    format!("{}: {}", initiative.name, initiative.description)
}

/// Word-overlap (Jaccard) similarity over lowercased whitespace tokens.
pub fn word_jaccard(a: &str, b: &str) -> f64 {
    let a_lower = a.to_lowercase();
    let b_lower = b.to_lowercase();
    let words_a: HashSet<&str> = a_lower.split_whitespace().collect();
    let words_b: HashSet<&str> = b_lower.split_whitespace().collect();

    if words_a.is_empty() || words_b.is_empty() {
        return 0.0;
    }

    let intersection = words_a.intersection(&words_b).count();
    let union = words_a.union(&words_b).count();
    intersection as f64 / union as f64
}
