//! Structure-preserving text chunking.
//!
//! Two strategies produce [`Chunk`] sequences with monotonically increasing
//! `chunk_index`:
//!
//! - [`semantic`] — sentence-respecting windows of a configured target size
//!   with overlap, section-aware when the document has sections.
//! - [`structural`] — chunks along the document's natural structure (page,
//!   then section), falling back to paragraph-bounded splitting.
//!
//! Tables are always emitted as their own chunks (one per table, rendered as
//! a markdown table), independent of the chosen strategy. Every chunk's text
//! is non-empty after trimming and chunk IDs are unique within a document.

pub mod semantic;
pub mod structural;

use crate::config::ChunkingConfig;
use crate::models::{Chunk, ChunkMetadata, ChunkType, ParsedDocument, Table};

/// Approximate chars-per-token ratio used for size accounting.
pub(crate) const CHARS_PER_TOKEN: usize = 4;

/// Chunk a parsed document with the configured strategy, then append table
/// chunks.
pub fn chunk_document(
    cfg: &ChunkingConfig,
    parsed: &ParsedDocument,
    document_id: &str,
    company_id: &str,
) -> Vec<Chunk> {
    let mut chunks = match cfg.strategy.as_str() {
        "structural" => structural::chunk(cfg, parsed, document_id, company_id),
        _ => semantic::chunk(cfg, parsed, document_id, company_id),
    };

    if let Some(tables) = &parsed.tables {
        let start = chunks.len();
        chunks.extend(table_chunks(tables, document_id, company_id, start));
    }

    chunks.retain(|c| !c.text.trim().is_empty());
    chunks
}

/// One chunk per table, markdown-rendered.
pub(crate) fn table_chunks(
    tables: &[Table],
    document_id: &str,
    company_id: &str,
    start_index: usize,
) -> Vec<Chunk> {
    tables
        .iter()
        .enumerate()
        .filter(|(_, t)| !t.rows.is_empty())
        .map(|(i, table)| {
            let mut metadata = ChunkMetadata::new(
                document_id,
                company_id,
                ChunkType::Table,
                start_index + i,
            );
            metadata.table_index = Some(i);
            metadata.page_number = table.page;
            Chunk {
                id: format!("{}_table_{}", document_id, i),
                text: table_to_markdown(&table.rows),
                metadata,
                start_char: None,
                end_char: None,
            }
        })
        .collect()
}

/// Render row-major cell text as a markdown table with a header separator.
pub(crate) fn table_to_markdown(rows: &[Vec<String>]) -> String {
    let mut lines = Vec::with_capacity(rows.len() + 1);
    for (i, row) in rows.iter().enumerate() {
        lines.push(format!("| {} |", row.join(" | ")));
        if i == 0 {
            let sep: Vec<&str> = row.iter().map(|_| "---").collect();
            lines.push(format!("| {} |", sep.join(" | ")));
        }
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DocMetadata;
    use std::collections::HashSet;

    fn parsed_with_table(text: &str) -> ParsedDocument {
        ParsedDocument {
            text: text.to_string(),
            metadata: DocMetadata::default(),
            pages: None,
            sections: None,
            tables: Some(vec![Table {
                page: Some(3),
                rows: vec![
                    vec!["Metric".into(), "Value".into()],
                    vec!["Margin".into(), "40%".into()],
                ],
            }]),
        }
    }

    #[test]
    fn table_renders_as_markdown() {
        let md = table_to_markdown(&[
            vec!["A".into(), "B".into()],
            vec!["1".into(), "2".into()],
        ]);
        assert_eq!(md, "| A | B |\n| --- | --- |\n| 1 | 2 |");
    }

    #[test]
    fn tables_emitted_under_both_strategies() {
        let parsed = parsed_with_table("Body paragraph.");
        for strategy in ["semantic", "structural"] {
            let cfg = ChunkingConfig {
                strategy: strategy.to_string(),
                ..Default::default()
            };
            let chunks = chunk_document(&cfg, &parsed, "doc1", "co1");
            let table: Vec<_> = chunks
                .iter()
                .filter(|c| c.metadata.chunk_type == ChunkType::Table)
                .collect();
            assert_eq!(table.len(), 1, "strategy {}", strategy);
            assert_eq!(table[0].id, "doc1_table_0");
            assert_eq!(table[0].metadata.page_number, Some(3));
            assert!(table[0].text.contains("| Margin | 40% |"));
        }
    }

    #[test]
    fn chunk_ids_unique_and_metadata_stamped() {
        let parsed = parsed_with_table(&"A sentence here. ".repeat(200));
        let cfg = ChunkingConfig::default();
        let chunks = chunk_document(&cfg, &parsed, "doc1", "co1");
        assert!(!chunks.is_empty());

        let ids: HashSet<&str> = chunks.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids.len(), chunks.len(), "duplicate chunk IDs");

        for c in &chunks {
            assert_eq!(c.metadata.document_id, "doc1");
            assert_eq!(c.metadata.company_id, "co1");
            assert!(!c.text.trim().is_empty());
        }
    }

    #[test]
    fn chunk_indices_monotonic() {
        let parsed = parsed_with_table(&"One sentence. ".repeat(300));
        let cfg = ChunkingConfig::default();
        let chunks = chunk_document(&cfg, &parsed, "doc1", "co1");
        for pair in chunks.windows(2) {
            assert!(pair[0].metadata.chunk_index < pair[1].metadata.chunk_index);
        }
    }
}
