//! The analysis pipeline: retrieve → extract → deduplicate → persist.
//!
//! One analysis run walks the company's processed documents sequentially,
//! driving a full retrieve→extract cycle per document (progress is reported
//! per document), deduplicates all candidates, then matches each canonical
//! candidate against the company's persisted initiatives: an unmatched
//! candidate creates a new Initiative (insight flagged new), a matched one
//! bumps the existing record (insight flagged reiterated, plus modified
//! when the description has drifted past the configured threshold).

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::AnalysisConfig;
use crate::dedup::{word_jaccard, Deduplicator};
use crate::error::PipelineError;
use crate::extract::{attach_sources, InitiativeExtractor};
use crate::jobs::{Job, JobHandler, JobKind, JobQueue};
use crate::models::{
    ConfidenceLevel, Document, DocumentStatus, Evidence, ExtractedInitiative, Initiative, Insight,
    MergedInitiative, RetrievalResult,
};
use crate::retrieve::Retriever;
use crate::store::{
    AnalysisRepo, CompanyRepo, DocumentRepo, EvidenceRepo, InitiativeRepo, InsightRepo,
};
use crate::temporal::is_modified;

/// Fixed retrieval query used to surface initiative-bearing chunks.
const INITIATIVE_QUERY: &str = "strategic initiatives goals plans investments expansion";

pub struct AnalysisPipeline {
    cfg: AnalysisConfig,
    retriever: Arc<Retriever>,
    extractor: InitiativeExtractor,
    deduplicator: Deduplicator,
    companies: CompanyRepo,
    documents: DocumentRepo,
    analyses: AnalysisRepo,
    initiatives: InitiativeRepo,
    insights: InsightRepo,
    evidence: EvidenceRepo,
}

#[allow(clippy::too_many_arguments)]
impl AnalysisPipeline {
    pub fn new(
        cfg: AnalysisConfig,
        retriever: Arc<Retriever>,
        extractor: InitiativeExtractor,
        deduplicator: Deduplicator,
        companies: CompanyRepo,
        documents: DocumentRepo,
        analyses: AnalysisRepo,
        initiatives: InitiativeRepo,
        insights: InsightRepo,
        evidence: EvidenceRepo,
    ) -> Self {
        Self {
            cfg,
            retriever,
            extractor,
            deduplicator,
            companies,
            documents,
            analyses,
            initiatives,
            insights,
            evidence,
        }
    }

    /// Run an analysis end-to-end. `progress` receives 0-100 percentages.
    pub async fn run(
        &self,
        analysis_id: &str,
        progress: &(dyn Fn(u8) + Send + Sync),
    ) -> Result<()> {
        let outcome = self.run_inner(analysis_id, progress).await;
        if let Err(e) = &outcome {
            let message = format!("{:#}", e);
            warn!(analysis_id, error = %message, "analysis failed");
            self.analyses.mark_failed(analysis_id, &message).await?;
        }
        outcome
    }

    async fn run_inner(
        &self,
        analysis_id: &str,
        progress: &(dyn Fn(u8) + Send + Sync),
    ) -> Result<()> {
        let analysis = self
            .analyses
            .get(analysis_id)
            .await?
            .ok_or_else(|| PipelineError::not_found("Analysis", analysis_id))?;
        let company = self
            .companies
            .get(&analysis.company_id)
            .await?
            .ok_or_else(|| PipelineError::not_found("Company", analysis.company_id.clone()))?;

        self.analyses
            .update_progress(analysis_id, 10, Some("processing"))
            .await?;
        progress(10);

        // Only completed (indexed) documents participate.
        let (mut documents, _) = self
            .documents
            .list_by_company(&company.id, Some(DocumentStatus::Completed), 0, i64::MAX)
            .await?;
        if let Some(requested) = &analysis.document_ids {
            documents.retain(|d| requested.contains(&d.id));
        }
        info!(
            analysis_id,
            company = %company.name,
            documents = documents.len(),
            "analysis started"
        );

        // Retrieve + extract per document, sequentially; a failure skips
        // that document and the run continues with partial results.
        let mut candidates: Vec<ExtractedInitiative> = Vec::new();
        let mut chunk_map: HashMap<String, RetrievalResult> = HashMap::new();
        let total = documents.len().max(1);

        for (i, document) in documents.iter().enumerate() {
            match self.extract_from_document(&company.name, document).await {
                Ok((mut extracted, chunks)) => {
                    for chunk in chunks {
                        chunk_map.insert(chunk.chunk_id.clone(), chunk);
                    }
                    candidates.append(&mut extracted);
                }
                Err(e) => {
                    warn!(
                        analysis_id,
                        document_id = %document.id,
                        error = %format!("{:#}", e),
                        "skipping document after extraction failure"
                    );
                }
            }
            let percent = 10 + ((i + 1) * 60 / total) as u8;
            self.analyses
                .update_progress(analysis_id, percent as i64, None)
                .await?;
            progress(percent);
        }

        let merged = self.deduplicator.deduplicate(candidates).await;
        self.analyses.update_progress(analysis_id, 85, None).await?;
        progress(85);

        let mut insight_count = 0i64;
        for candidate in &merged {
            self.persist_candidate(&analysis.company_id, analysis_id, candidate, &chunk_map)
                .await?;
            insight_count += 1;
        }

        self.analyses.mark_completed(analysis_id, insight_count).await?;
        progress(100);
        info!(analysis_id, insights = insight_count, "analysis completed");
        Ok(())
    }

    async fn extract_from_document(
        &self,
        company_name: &str,
        document: &Document,
    ) -> Result<(Vec<ExtractedInitiative>, Vec<RetrievalResult>)> {
        let chunks = self
            .retriever
            .retrieve_for_document(
                INITIATIVE_QUERY,
                &document.company_id,
                &document.id,
                self.cfg.chunks_per_document,
            )
            .await?;
        if chunks.is_empty() {
            return Ok((Vec::new(), chunks));
        }

        let context: String = chunks
            .iter()
            .map(|c| c.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");
        let document_type = document.document_type.as_deref().unwrap_or("disclosure");

        let mut extracted = self
            .extractor
            .extract(&context, company_name, document_type)
            .await?;
        attach_sources(&mut extracted, &chunks);

        Ok((extracted, chunks))
    }

    /// Match a canonical candidate against persisted initiatives and write
    /// the insight + evidence rows with their temporal flags.
    async fn persist_candidate(
        &self,
        company_id: &str,
        analysis_id: &str,
        candidate: &MergedInitiative,
        chunk_map: &HashMap<String, RetrievalResult>,
    ) -> Result<()> {
        let now = Utc::now();
        let existing = self.initiatives.list_by_company(company_id).await?;
        let matched = find_similar(&existing, candidate, self.cfg.match_threshold);

        let (initiative_id, is_new, modified) = match matched {
            Some(initiative) => {
                let mentioned_document = candidate
                    .source_chunk_ids
                    .iter()
                    .filter_map(|id| chunk_map.get(id))
                    .any(|c| c.document_id != initiative.first_document_id);
                self.initiatives
                    .record_mention(&initiative.id, now, candidate.confidence, mentioned_document)
                    .await?;
                let modified = is_modified(
                    &candidate.description,
                    &initiative.description,
                    self.cfg.modified_threshold,
                );
                (initiative.id.clone(), false, modified)
            }
            None => {
                let first_document_id = candidate
                    .source_chunk_ids
                    .first()
                    .and_then(|id| chunk_map.get(id))
                    .map(|c| c.document_id.clone())
                    .unwrap_or_default();
                let initiative = Initiative {
                    id: Uuid::new_v4().to_string(),
                    company_id: company_id.to_string(),
                    name: candidate.name.clone(),
                    description: candidate.description.clone(),
                    category: candidate.category,
                    first_mentioned_at: now,
                    last_mentioned_at: now,
                    first_document_id,
                    mention_count: candidate.merged_count.max(1) as i64,
                    document_count: 1,
                    avg_confidence: candidate.confidence,
                    is_active: true,
                    is_completed: false,
                    keywords: name_keywords(&candidate.name),
                    created_at: now,
                    updated_at: now,
                };
                self.initiatives.create(&initiative).await?;
                (initiative.id, true, false)
            }
        };

        let insight = Insight {
            id: Uuid::new_v4().to_string(),
            company_id: company_id.to_string(),
            analysis_id: analysis_id.to_string(),
            initiative_id: Some(initiative_id),
            title: candidate.name.clone(),
            description: candidate.description.clone(),
            category: candidate.category,
            confidence_score: candidate.confidence,
            confidence_level: ConfidenceLevel::from_score(candidate.confidence),
            is_new,
            is_reiterated: !is_new,
            is_modified: modified,
            created_at: now,
        };
        self.insights.create(&insight).await?;

        for quote in &candidate.evidence_quotes {
            let source = candidate
                .source_chunk_ids
                .iter()
                .filter_map(|id| chunk_map.get(id))
                .find(|c| c.text.contains(quote.as_str()))
                .or_else(|| {
                    candidate
                        .source_chunk_ids
                        .first()
                        .and_then(|id| chunk_map.get(id))
                });

            self.evidence
                .create(&Evidence {
                    id: Uuid::new_v4().to_string(),
                    insight_id: insight.id.clone(),
                    document_id: source.map(|c| c.document_id.clone()).unwrap_or_default(),
                    chunk_id: source.map(|c| c.chunk_id.clone()),
                    quote: quote.clone(),
                    page_number: source.and_then(|c| c.metadata.page_number),
                    section: source.and_then(|c| c.metadata.section_heading.clone()),
                    relevance_score: source.map(|c| c.score).unwrap_or(0.0),
                    created_at: now,
                })
                .await?;
        }

        Ok(())
    }
}

/// Deterministic initiative matching: same category, and name-token overlap
/// at or above the threshold against the name or stored keywords. The best
/// score wins.
fn find_similar<'a>(
    existing: &'a [Initiative],
    candidate: &MergedInitiative,
    threshold: f64,
) -> Option<&'a Initiative> {
    let mut best: Option<(&Initiative, f64)> = None;
    for initiative in existing {
        if initiative.category != candidate.category {
            continue;
        }
        let name_score = word_jaccard(&initiative.name, &candidate.name);
        let keyword_score = word_jaccard(&initiative.keywords.join(" "), &candidate.name);
        let score = name_score.max(keyword_score);
        if score >= threshold && best.map(|(_, s)| score > s).unwrap_or(true) {
            best = Some((initiative, score));
        }
    }
    best.map(|(initiative, _)| initiative)
}

fn name_keywords(name: &str) -> Vec<String> {
    name.to_lowercase()
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

/// Job handler driving [`AnalysisPipeline::run`], serialized per company.
pub struct RunAnalysisHandler {
    pipeline: Arc<AnalysisPipeline>,
}

impl RunAnalysisHandler {
    pub fn new(pipeline: Arc<AnalysisPipeline>) -> Self {
        Self { pipeline }
    }
}

#[async_trait::async_trait]
impl JobHandler for RunAnalysisHandler {
    fn kind(&self) -> JobKind {
        JobKind::RunAnalysis
    }

    async fn execute(&self, job: &Job, queue: &JobQueue) -> Result<()> {
        let analysis_id = job.payload["analysis_id"]
            .as_str()
            .context("run_analysis job missing analysis_id")?;
        let company_id = job.payload["company_id"]
            .as_str()
            .context("run_analysis job missing company_id")?;

        // Two concurrent analyses for one company would race initiative
        // matching against creation; hold the company lock for the run.
        let lock = queue.company_lock(company_id);
        let _guard = lock.lock().await;

        let queue = queue.clone();
        let job_id = job.id.clone();
        self.pipeline
            .run(analysis_id, &move |percent| {
                queue.update_progress(&job_id, percent)
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Category;
    use chrono::Utc;

    fn initiative(name: &str, category: Category, keywords: &[&str]) -> Initiative {
        let now = Utc::now();
        Initiative {
            id: name.to_string(),
            company_id: "co1".to_string(),
            name: name.to_string(),
            description: String::new(),
            category,
            first_mentioned_at: now,
            last_mentioned_at: now,
            first_document_id: "d1".to_string(),
            mention_count: 1,
            document_count: 1,
            avg_confidence: 0.5,
            is_active: true,
            is_completed: false,
            keywords: keywords.iter().map(|s| s.to_string()).collect(),
            created_at: now,
            updated_at: now,
        }
    }

    fn candidate(name: &str, category: Category) -> MergedInitiative {
        MergedInitiative {
            name: name.to_string(),
            description: "d".to_string(),
            category,
            timeline: None,
            metrics: Vec::new(),
            confidence: 0.5,
            evidence_quotes: Vec::new(),
            source_chunk_ids: Vec::new(),
            merged_count: 1,
        }
    }

    #[test]
    fn find_similar_matches_overlapping_names_in_category() {
        let existing = vec![
            initiative("Cloud Migration Program", Category::Operational, &[]),
            initiative("Dividend Policy", Category::Financial, &[]),
        ];
        let matched = find_similar(
            &existing,
            &candidate("Cloud Migration Program", Category::Operational),
            0.6,
        );
        assert_eq!(matched.unwrap().name, "Cloud Migration Program");
    }

    #[test]
    fn find_similar_requires_same_category() {
        let existing = vec![initiative("Cloud Migration Program", Category::Operational, &[])];
        assert!(find_similar(
            &existing,
            &candidate("Cloud Migration Program", Category::Strategy),
            0.6,
        )
        .is_none());
    }

    #[test]
    fn find_similar_uses_keywords_fallback() {
        let existing = vec![initiative(
            "Platform Modernization",
            Category::Product,
            &["ai", "platform", "launch"],
        )];
        let matched = find_similar(
            &existing,
            &candidate("AI Platform Launch", Category::Product),
            0.6,
        );
        assert!(matched.is_some());
    }

    #[test]
    fn find_similar_respects_threshold() {
        let existing = vec![initiative("Cloud Migration", Category::Operational, &[])];
        assert!(find_similar(
            &existing,
            &candidate("Entirely Different Program", Category::Operational),
            0.6,
        )
        .is_none());
    }
}
