//! Structure-first chunker.
//!
//! Chunks along the document's natural structure: pages when the format is
//! paginated, otherwise sections, otherwise paragraph-bounded text. A
//! structural unit larger than `max_chunk_chars` is split — pages on word
//! boundaries, sections on paragraph boundaries with the heading repeated as
//! a "[Continued from: …]" prefix so every chunk remains self-describing.

use crate::config::ChunkingConfig;
use crate::models::{Chunk, ChunkMetadata, ChunkType, Page, ParsedDocument, Section};

pub fn chunk(
    cfg: &ChunkingConfig,
    parsed: &ParsedDocument,
    document_id: &str,
    company_id: &str,
) -> Vec<Chunk> {
    let max = cfg.max_chunk_chars;
    let mut chunks = Vec::new();
    let mut idx = 0usize;

    if let Some(pages) = parsed.pages.as_ref().filter(|p| !p.is_empty()) {
        for page in pages {
            chunk_page(page, document_id, company_id, max, &mut idx, &mut chunks);
        }
    } else if let Some(sections) = parsed.sections.as_ref().filter(|s| !s.is_empty()) {
        for (section_idx, section) in sections.iter().enumerate() {
            chunk_section(
                section,
                section_idx,
                document_id,
                company_id,
                max,
                &mut idx,
                &mut chunks,
            );
        }
    } else {
        chunk_plain_text(
            &parsed.text,
            document_id,
            company_id,
            max,
            &mut idx,
            &mut chunks,
        );
    }

    chunks
}

fn chunk_page(
    page: &Page,
    document_id: &str,
    company_id: &str,
    max: usize,
    idx: &mut usize,
    out: &mut Vec<Chunk>,
) {
    let text = page.text.trim();
    if text.is_empty() {
        return;
    }

    if text.len() <= max {
        let mut metadata =
            ChunkMetadata::new(document_id, company_id, ChunkType::Page, *idx);
        metadata.page_number = Some(page.number);
        out.push(Chunk {
            id: format!("{}_page_{}", document_id, page.number),
            text: text.to_string(),
            metadata,
            start_char: None,
            end_char: None,
        });
        *idx += 1;
        return;
    }

    // Split large pages on word boundaries.
    let mut part = 0usize;
    let mut current = String::new();
    for word in text.split_whitespace() {
        if !current.is_empty() && current.len() + 1 + word.len() > max {
            push_page_part(page, document_id, company_id, &current, part, idx, out);
            part += 1;
            current.clear();
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }
    if !current.is_empty() {
        push_page_part(page, document_id, company_id, &current, part, idx, out);
    }
}

fn push_page_part(
    page: &Page,
    document_id: &str,
    company_id: &str,
    text: &str,
    part: usize,
    idx: &mut usize,
    out: &mut Vec<Chunk>,
) {
    let mut metadata = ChunkMetadata::new(document_id, company_id, ChunkType::PagePart, *idx);
    metadata.page_number = Some(page.number);
    metadata.part_index = Some(part);
    out.push(Chunk {
        id: format!("{}_page_{}_part_{}", document_id, page.number, part),
        text: text.to_string(),
        metadata,
        start_char: None,
        end_char: None,
    });
    *idx += 1;
}

fn chunk_section(
    section: &Section,
    section_idx: usize,
    document_id: &str,
    company_id: &str,
    max: usize,
    idx: &mut usize,
    out: &mut Vec<Chunk>,
) {
    let body = section.text();
    if body.trim().is_empty() && section.heading.is_none() {
        return;
    }

    let heading = section.heading.as_deref().unwrap_or("");
    let full_text = if heading.is_empty() {
        body.clone()
    } else {
        format!("{}\n\n{}", heading, body)
    };

    if full_text.len() <= max {
        if full_text.trim().is_empty() {
            return;
        }
        let mut metadata =
            ChunkMetadata::new(document_id, company_id, ChunkType::Section, *idx);
        metadata.section_heading = section.heading.clone();
        metadata.section_index = Some(section_idx);
        metadata.speaker_role = section.speaker_role.clone();
        out.push(Chunk {
            id: format!("{}_section_{}", document_id, section_idx),
            text: full_text,
            metadata,
            start_char: None,
            end_char: None,
        });
        *idx += 1;
        return;
    }

    // Split on paragraph boundaries, repeating the heading as context.
    let mut part = 0usize;
    let mut current: Vec<String> = if heading.is_empty() {
        Vec::new()
    } else {
        vec![heading.to_string()]
    };
    let mut current_len: usize = current.iter().map(|s| s.len()).sum();

    for para in body.split("\n\n") {
        let para = para.trim();
        if para.is_empty() {
            continue;
        }
        if current_len + para.len() > max && current.len() > 1 {
            push_section_part(
                section,
                section_idx,
                document_id,
                company_id,
                &current.join("\n\n"),
                part,
                idx,
                out,
            );
            part += 1;
            current = if heading.is_empty() {
                Vec::new()
            } else {
                vec![format!("[Continued from: {}]", heading)]
            };
            current_len = current.iter().map(|s| s.len()).sum();
        }
        current_len += para.len();
        current.push(para.to_string());
    }

    if current.iter().any(|s| !s.trim().is_empty()) {
        push_section_part(
            section,
            section_idx,
            document_id,
            company_id,
            &current.join("\n\n"),
            part,
            idx,
            out,
        );
    }
}

#[allow(clippy::too_many_arguments)]
fn push_section_part(
    section: &Section,
    section_idx: usize,
    document_id: &str,
    company_id: &str,
    text: &str,
    part: usize,
    idx: &mut usize,
    out: &mut Vec<Chunk>,
) {
    let mut metadata =
        ChunkMetadata::new(document_id, company_id, ChunkType::SectionPart, *idx);
    metadata.section_heading = section.heading.clone();
    metadata.section_index = Some(section_idx);
    metadata.part_index = Some(part);
    metadata.speaker_role = section.speaker_role.clone();
    out.push(Chunk {
        id: format!("{}_section_{}_part_{}", document_id, section_idx, part),
        text: text.to_string(),
        metadata,
        start_char: None,
        end_char: None,
    });
    *idx += 1;
}

/// Paragraph-bounded fallback when the document has no pages or sections.
fn chunk_plain_text(
    text: &str,
    document_id: &str,
    company_id: &str,
    max: usize,
    idx: &mut usize,
    out: &mut Vec<Chunk>,
) {
    let mut current: Vec<&str> = Vec::new();
    let mut current_len = 0usize;

    let flush = |current: &mut Vec<&str>, idx: &mut usize, out: &mut Vec<Chunk>| {
        if current.is_empty() {
            return;
        }
        let metadata = ChunkMetadata::new(document_id, company_id, ChunkType::Text, *idx);
        out.push(Chunk {
            id: format!("{}_chunk_{}", document_id, *idx),
            text: current.join("\n\n"),
            metadata,
            start_char: None,
            end_char: None,
        });
        *idx += 1;
        current.clear();
    };

    for para in text.split("\n\n") {
        let para = para.trim();
        if para.is_empty() {
            continue;
        }
        if current_len + para.len() > max && !current.is_empty() {
            flush(&mut current, idx, out);
            current_len = 0;
        }
        current_len += para.len();
        current.push(para);
    }
    flush(&mut current, idx, out);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DocMetadata;

    fn cfg(max: usize) -> ChunkingConfig {
        ChunkingConfig {
            strategy: "structural".to_string(),
            chunk_tokens: 512,
            overlap_tokens: 50,
            max_chunk_chars: max,
        }
    }

    fn doc(
        pages: Option<Vec<Page>>,
        sections: Option<Vec<Section>>,
        text: &str,
    ) -> ParsedDocument {
        ParsedDocument {
            text: text.to_string(),
            metadata: DocMetadata::default(),
            pages,
            sections,
            tables: None,
        }
    }

    #[test]
    fn pages_become_page_chunks() {
        let parsed = doc(
            Some(vec![
                Page {
                    number: 1,
                    text: "Page one text.".to_string(),
                    title: None,
                },
                Page {
                    number: 2,
                    text: "Page two text.".to_string(),
                    title: None,
                },
            ]),
            None,
            "",
        );
        let chunks = chunk(&cfg(2000), &parsed, "doc1", "co1");
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].id, "doc1_page_1");
        assert_eq!(chunks[0].metadata.chunk_type, ChunkType::Page);
        assert_eq!(chunks[1].metadata.page_number, Some(2));
        assert_eq!(chunks[1].metadata.chunk_index, 1);
    }

    #[test]
    fn large_page_splits_on_words() {
        let parsed = doc(
            Some(vec![Page {
                number: 1,
                text: "alpha beta gamma delta epsilon zeta".to_string(),
                title: None,
            }]),
            None,
            "",
        );
        let chunks = chunk(&cfg(12), &parsed, "doc1", "co1");
        assert!(chunks.len() > 1);
        for (k, c) in chunks.iter().enumerate() {
            assert_eq!(c.id, format!("doc1_page_1_part_{}", k));
            assert_eq!(c.metadata.chunk_type, ChunkType::PagePart);
            assert!(c.text.len() <= 12);
        }
    }

    #[test]
    fn section_keeps_heading_and_role() {
        let parsed = doc(
            None,
            Some(vec![Section {
                heading: Some("Jane Doe".to_string()),
                heading_level: 1,
                content: vec!["We keep investing in the platform.".to_string()],
                speaker_role: Some("CEO".to_string()),
            }]),
            "",
        );
        let chunks = chunk(&cfg(2000), &parsed, "doc1", "co1");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].id, "doc1_section_0");
        assert!(chunks[0].text.starts_with("Jane Doe\n\n"));
        assert_eq!(chunks[0].metadata.speaker_role.as_deref(), Some("CEO"));
    }

    #[test]
    fn large_section_repeats_heading_on_continuation() {
        let paras: Vec<String> = (0..6).map(|i| format!("Paragraph number {i} with some body text.")).collect();
        let parsed = doc(
            None,
            Some(vec![Section {
                heading: Some("Growth".to_string()),
                heading_level: 1,
                content: vec![paras.join("\n\n")],
                speaker_role: None,
            }]),
            "",
        );
        let chunks = chunk(&cfg(100), &parsed, "doc1", "co1");
        assert!(chunks.len() > 1);
        assert!(chunks[0].text.starts_with("Growth"));
        for c in &chunks[1..] {
            assert!(
                c.text.starts_with("[Continued from: Growth]"),
                "missing continuation prefix: {:?}",
                c.text
            );
        }
        // IDs are part-numbered and unique.
        assert_eq!(chunks[0].id, "doc1_section_0_part_0");
        assert_eq!(chunks[1].id, "doc1_section_0_part_1");
    }

    #[test]
    fn plain_text_fallback_paragraph_bounded() {
        let text = "Para one body.\n\nPara two body.\n\nPara three body.";
        let parsed = doc(None, None, text);
        let chunks = chunk(&cfg(20), &parsed, "doc1", "co1");
        assert!(chunks.len() > 1);
        for (k, c) in chunks.iter().enumerate() {
            assert_eq!(c.id, format!("doc1_chunk_{}", k));
            assert_eq!(c.metadata.chunk_type, ChunkType::Text);
        }
    }

    #[test]
    fn pages_win_over_sections() {
        let parsed = doc(
            Some(vec![Page {
                number: 1,
                text: "Page body.".to_string(),
                title: None,
            }]),
            Some(vec![Section {
                heading: Some("Ignored".to_string()),
                heading_level: 1,
                content: vec!["Section body.".to_string()],
                speaker_role: None,
            }]),
            "",
        );
        let chunks = chunk(&cfg(2000), &parsed, "doc1", "co1");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].metadata.chunk_type, ChunkType::Page);
    }
}
