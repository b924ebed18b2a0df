//! Core data models used throughout Initiative Lens.
//!
//! These types represent the documents, chunks, retrieval results, and
//! initiative records that flow through the ingestion and analysis pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Document-level metadata produced by a parser.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocMetadata {
    pub filename: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slide_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub section_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub has_qa_section: Option<bool>,
}

/// One page (or slide) of a paginated document.
#[derive(Debug, Clone)]
pub struct Page {
    /// 1-based page or slide number.
    pub number: u32,
    pub text: String,
    /// Slide title, when the format exposes one.
    pub title: Option<String>,
}

/// One heading- or speaker-delimited section of a document.
#[derive(Debug, Clone)]
pub struct Section {
    pub heading: Option<String>,
    pub heading_level: u8,
    pub content: Vec<String>,
    /// Role of the speaker for transcript sections (e.g. "CEO").
    pub speaker_role: Option<String>,
}

impl Section {
    pub fn text(&self) -> String {
        self.content.join("\n")
    }
}

/// A table extracted from a document, row-major cell text.
#[derive(Debug, Clone)]
pub struct Table {
    /// Page or slide the table appeared on, when known.
    pub page: Option<u32>,
    pub rows: Vec<Vec<String>>,
}

/// Normalized output of a format parser.
///
/// `pages` and `sections` are alternative structural views; a parser
/// populates whichever applies. `tables` is independent and additive.
#[derive(Debug, Clone)]
pub struct ParsedDocument {
    pub text: String,
    pub metadata: DocMetadata,
    pub pages: Option<Vec<Page>>,
    pub sections: Option<Vec<Section>>,
    pub tables: Option<Vec<Table>>,
}

/// Structural origin of a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkType {
    Page,
    PagePart,
    Section,
    SectionPart,
    Table,
    Text,
}

/// Positional and structural metadata carried by every chunk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub document_id: String,
    pub company_id: String,
    pub chunk_type: ChunkType,
    /// Monotonically increasing position within the document.
    pub chunk_index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_number: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub section_heading: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub section_index: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub part_index: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speaker_role: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table_index: Option<usize>,
}

impl ChunkMetadata {
    pub fn new(document_id: &str, company_id: &str, chunk_type: ChunkType, index: usize) -> Self {
        Self {
            document_id: document_id.to_string(),
            company_id: company_id.to_string(),
            chunk_type,
            chunk_index: index,
            page_number: None,
            section_heading: None,
            section_index: None,
            part_index: None,
            speaker_role: None,
            table_index: None,
        }
    }
}

/// A bounded, independently citable unit of document text.
///
/// IDs are deterministic, derived from the document ID and the chunk's
/// position: `{document_id}_chunk_{i}`, `{document_id}_page_{n}`,
/// `{document_id}_section_{i}`, `{document_id}_table_{i}` (with a
/// `_part_{k}` suffix when a structural unit was split).
#[derive(Debug, Clone)]
pub struct Chunk {
    pub id: String,
    pub text: String,
    pub metadata: ChunkMetadata,
    pub start_char: Option<usize>,
    pub end_char: Option<usize>,
}

/// A scored chunk returned from retrieval or reranking.
#[derive(Debug, Clone)]
pub struct RetrievalResult {
    pub chunk_id: String,
    pub text: String,
    pub score: f64,
    pub metadata: ChunkMetadata,
    pub document_id: String,
}

/// Closed category vocabulary for extracted initiatives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Strategy,
    Product,
    Market,
    Operational,
    Financial,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Strategy => "strategy",
            Category::Product => "product",
            Category::Market => "market",
            Category::Operational => "operational",
            Category::Financial => "financial",
        }
    }

    /// Map a free-form category label onto the closed vocabulary.
    ///
    /// Unknown labels default to `Strategy`.
    pub fn normalize(raw: &str) -> Category {
        match raw.trim().to_lowercase().as_str() {
            "strategy" => Category::Strategy,
            "product" => Category::Product,
            "market" => Category::Market,
            "operational" => Category::Operational,
            "financial" => Category::Financial,
            // Common variations seen in model output.
            "strategic" | "growth" => Category::Strategy,
            "products" => Category::Product,
            "marketing" | "expansion" => Category::Market,
            "operations" | "cost" => Category::Operational,
            "finance" | "revenue" => Category::Financial,
            _ => Category::Strategy,
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A candidate initiative claim extracted from one context. Unpersisted.
#[derive(Debug, Clone)]
pub struct ExtractedInitiative {
    pub name: String,
    pub description: String,
    pub category: Category,
    pub timeline: Option<String>,
    pub metrics: Vec<String>,
    /// Always in [0, 1]; 0.5 when the model omitted it.
    pub confidence: f64,
    /// Verbatim quote from the source chunk (may be empty).
    pub evidence_quote: String,
    pub source_chunk_id: Option<String>,
}

/// A canonical initiative produced by deduplication, carrying the combined
/// evidence of every member of its group.
#[derive(Debug, Clone)]
pub struct MergedInitiative {
    pub name: String,
    pub description: String,
    pub category: Category,
    pub timeline: Option<String>,
    pub metrics: Vec<String>,
    /// Max of the member confidences.
    pub confidence: f64,
    pub evidence_quotes: Vec<String>,
    pub source_chunk_ids: Vec<String>,
    pub merged_count: usize,
}

// ============ Persisted records ============

#[derive(Debug, Clone)]
pub struct Company {
    pub id: String,
    pub name: String,
    pub ticker: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Pending => "pending",
            DocumentStatus::Processing => "processing",
            DocumentStatus::Completed => "completed",
            DocumentStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> DocumentStatus {
        match s {
            "processing" => DocumentStatus::Processing,
            "completed" => DocumentStatus::Completed,
            "failed" => DocumentStatus::Failed,
            _ => DocumentStatus::Pending,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Document {
    pub id: String,
    pub company_id: String,
    pub filename: String,
    pub title: String,
    pub document_type: Option<String>,
    pub document_date: Option<DateTime<Utc>>,
    pub file_size: i64,
    pub storage_path: String,
    pub content_hash: String,
    pub status: DocumentStatus,
    pub error_message: Option<String>,
    pub chunk_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct Analysis {
    pub id: String,
    pub company_id: String,
    /// Optional restriction to specific documents.
    pub document_ids: Option<Vec<String>>,
    pub status: String,
    /// 0-100.
    pub progress: i64,
    pub error_message: Option<String>,
    pub insight_count: i64,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// The canonical, persisted record of one strategic claim tracked across
/// documents and time. Created on first unmatched extraction, mutated on
/// every matching subsequent one, deleted only by company-level purge.
#[derive(Debug, Clone)]
pub struct Initiative {
    pub id: String,
    pub company_id: String,
    pub name: String,
    pub description: String,
    pub category: Category,
    pub first_mentioned_at: DateTime<Utc>,
    pub last_mentioned_at: DateTime<Utc>,
    pub first_document_id: String,
    pub mention_count: i64,
    pub document_count: i64,
    pub avg_confidence: f64,
    pub is_active: bool,
    pub is_completed: bool,
    pub keywords: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One occurrence of an initiative within one analysis run.
///
/// `is_new` and `is_reiterated` are mutually exclusive; `is_modified` may
/// co-occur with `is_reiterated`.
#[derive(Debug, Clone)]
pub struct Insight {
    pub id: String,
    pub company_id: String,
    pub analysis_id: String,
    pub initiative_id: Option<String>,
    pub title: String,
    pub description: String,
    pub category: Category,
    pub confidence_score: f64,
    pub confidence_level: ConfidenceLevel,
    pub is_new: bool,
    pub is_reiterated: bool,
    pub is_modified: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfidenceLevel {
    High,
    Medium,
    Low,
}

impl ConfidenceLevel {
    /// High >= 0.8, medium >= 0.5, low otherwise.
    pub fn from_score(score: f64) -> ConfidenceLevel {
        if score >= 0.8 {
            ConfidenceLevel::High
        } else if score >= 0.5 {
            ConfidenceLevel::Medium
        } else {
            ConfidenceLevel::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConfidenceLevel::High => "high",
            ConfidenceLevel::Medium => "medium",
            ConfidenceLevel::Low => "low",
        }
    }
}

/// A verbatim citation supporting an insight.
#[derive(Debug, Clone)]
pub struct Evidence {
    pub id: String,
    pub insight_id: String,
    pub document_id: String,
    pub chunk_id: Option<String>,
    pub quote: String,
    pub page_number: Option<u32>,
    pub section: Option<String>,
    pub relevance_score: f64,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_normalize_known() {
        assert_eq!(Category::normalize("product"), Category::Product);
        assert_eq!(Category::normalize("Financial"), Category::Financial);
    }

    #[test]
    fn category_normalize_aliases() {
        assert_eq!(Category::normalize("strategic"), Category::Strategy);
        assert_eq!(Category::normalize("growth"), Category::Strategy);
        assert_eq!(Category::normalize("marketing"), Category::Market);
        assert_eq!(Category::normalize("expansion"), Category::Market);
        assert_eq!(Category::normalize("operations"), Category::Operational);
        assert_eq!(Category::normalize("cost"), Category::Operational);
        assert_eq!(Category::normalize("revenue"), Category::Financial);
    }

    #[test]
    fn category_normalize_unknown_defaults_to_strategy() {
        assert_eq!(Category::normalize("blockchain"), Category::Strategy);
        assert_eq!(Category::normalize(""), Category::Strategy);
    }

    #[test]
    fn confidence_level_thresholds() {
        assert_eq!(ConfidenceLevel::from_score(0.9), ConfidenceLevel::High);
        assert_eq!(ConfidenceLevel::from_score(0.8), ConfidenceLevel::High);
        assert_eq!(ConfidenceLevel::from_score(0.6), ConfidenceLevel::Medium);
        assert_eq!(ConfidenceLevel::from_score(0.2), ConfidenceLevel::Low);
    }
}
