//! Sentence-respecting window chunker.
//!
//! Splits text into windows of a configured target size with configured
//! overlap, never breaking inside a sentence. Documents with sections are
//! chunked per section so each window stays inside one section and carries
//! its heading and speaker metadata.

use crate::config::ChunkingConfig;
use crate::models::{Chunk, ChunkMetadata, ChunkType, ParsedDocument};

use super::CHARS_PER_TOKEN;

pub fn chunk(
    cfg: &ChunkingConfig,
    parsed: &ParsedDocument,
    document_id: &str,
    company_id: &str,
) -> Vec<Chunk> {
    match &parsed.sections {
        Some(sections) if !sections.is_empty() => {
            chunk_sections(cfg, parsed, document_id, company_id)
        }
        _ => chunk_text(cfg, &parsed.text, document_id, company_id),
    }
}

fn chunk_text(
    cfg: &ChunkingConfig,
    text: &str,
    document_id: &str,
    company_id: &str,
) -> Vec<Chunk> {
    let target = cfg.chunk_tokens * CHARS_PER_TOKEN;
    let overlap = cfg.overlap_tokens * CHARS_PER_TOKEN;

    window_ranges(text, target, overlap)
        .into_iter()
        .enumerate()
        .map(|(i, (start, end))| Chunk {
            id: format!("{}_chunk_{}", document_id, i),
            text: text[start..end].to_string(),
            metadata: ChunkMetadata::new(document_id, company_id, ChunkType::Text, i),
            start_char: Some(start),
            end_char: Some(end),
        })
        .collect()
}

fn chunk_sections(
    cfg: &ChunkingConfig,
    parsed: &ParsedDocument,
    document_id: &str,
    company_id: &str,
) -> Vec<Chunk> {
    let target = cfg.chunk_tokens * CHARS_PER_TOKEN;
    let overlap = cfg.overlap_tokens * CHARS_PER_TOKEN;
    let sections = parsed.sections.as_ref().expect("sections checked by caller");

    let mut chunks = Vec::new();
    let mut idx = 0usize;

    for (section_idx, section) in sections.iter().enumerate() {
        let body = section.text();
        if body.trim().is_empty() {
            continue;
        }

        // Heading as leading context so every chunk is self-describing.
        let full_text = match &section.heading {
            Some(h) => format!("{}\n\n{}", h, body),
            None => body,
        };

        for (start, end) in window_ranges(&full_text, target, overlap) {
            let mut metadata =
                ChunkMetadata::new(document_id, company_id, ChunkType::Text, idx);
            metadata.section_heading = section.heading.clone();
            metadata.section_index = Some(section_idx);
            metadata.speaker_role = section.speaker_role.clone();
            chunks.push(Chunk {
                id: format!("{}_chunk_{}", document_id, idx),
                text: full_text[start..end].to_string(),
                metadata,
                start_char: None,
                end_char: None,
            });
            idx += 1;
        }
    }

    chunks
}

/// Compute window byte ranges over `text`: each window holds whole
/// sentences up to `target` chars, and consecutive windows share roughly
/// `overlap` chars of trailing sentences. A single sentence longer than
/// `target` is hard-split on word boundaries.
fn window_ranges(text: &str, target: usize, overlap: usize) -> Vec<(usize, usize)> {
    let spans = split_sentences(text);
    if spans.is_empty() {
        return Vec::new();
    }

    let mut out = Vec::new();
    let mut i = 0usize;

    while i < spans.len() {
        let (s_start, s_end) = spans[i];

        if s_end - s_start > target {
            hard_split(text, s_start, s_end, target, &mut out);
            i += 1;
            continue;
        }

        let start = s_start;
        let mut end = s_end;
        let mut j = i;
        while j + 1 < spans.len() {
            let (n_start, n_end) = spans[j + 1];
            if n_end - n_start > target || n_end - start > target {
                break;
            }
            j += 1;
            end = n_end;
        }
        out.push((start, end));

        if j + 1 >= spans.len() {
            break;
        }

        // Back up over trailing sentences that fit in the overlap budget;
        // always advance past `i` so the loop makes progress.
        let mut m = j + 1;
        while m > i + 1 && end - spans[m - 1].0 <= overlap {
            m -= 1;
        }
        i = m;
    }

    out
}

/// Sentence spans as byte ranges, trimmed of surrounding whitespace.
/// A sentence ends at `.`/`!`/`?` followed by whitespace, or at a newline.
fn split_sentences(text: &str) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut start: Option<usize> = None;
    let mut prev_end = 0usize;

    let mut chars = text.char_indices().peekable();
    while let Some((idx, c)) = chars.next() {
        if c == '\n' {
            if let Some(s) = start.take() {
                if prev_end > s {
                    spans.push((s, prev_end));
                }
            }
            continue;
        }
        if start.is_none() {
            if c.is_whitespace() {
                continue;
            }
            start = Some(idx);
        }
        prev_end = idx + c.len_utf8();
        if matches!(c, '.' | '!' | '?') {
            let next_is_break = chars
                .peek()
                .map(|(_, n)| n.is_whitespace())
                .unwrap_or(true);
            if next_is_break {
                if let Some(s) = start.take() {
                    spans.push((s, prev_end));
                }
            }
        }
    }

    if let Some(s) = start {
        if prev_end > s {
            spans.push((s, prev_end));
        }
    }

    spans
}

/// Split an oversize sentence at word boundaries, never mid-character.
fn hard_split(
    text: &str,
    start: usize,
    end: usize,
    target: usize,
    out: &mut Vec<(usize, usize)>,
) {
    let mut pos = start;
    while pos < end {
        let mut cut = (pos + target).min(end);
        while cut > pos && !text.is_char_boundary(cut) {
            cut -= 1;
        }
        if cut < end {
            if let Some(space) = text[pos..cut].rfind(' ') {
                if space > 0 {
                    cut = pos + space;
                }
            }
        }
        if cut == pos {
            // No word boundary found inside the budget; take the raw cut.
            cut = (pos + target).min(end);
            while cut > pos && !text.is_char_boundary(cut) {
                cut -= 1;
            }
            if cut == pos {
                break;
            }
        }
        let piece_start = pos + text[pos..cut].len() - text[pos..cut].trim_start().len();
        let piece_end = piece_start + text[piece_start..cut].trim_end().len();
        if piece_end > piece_start {
            out.push((piece_start, piece_end));
        }
        pos = cut;
    }
}
