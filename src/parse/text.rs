//! Plain-text and markdown parser; the fallback at the end of the registry.

use crate::error::{PipelineError, Result};
use crate::models::{DocMetadata, ParsedDocument, Section};

use super::{extension, FormatParser};

const SUPPORTED: &[&str] = &[".txt", ".md", ".markdown", ".rst", ".text"];

pub struct TextParser;

impl FormatParser for TextParser {
    fn name(&self) -> &'static str {
        "text"
    }

    fn supports(&self, filename: &str) -> bool {
        extension(filename)
            .map(|e| SUPPORTED.contains(&e.as_str()))
            .unwrap_or(false)
    }

    fn parse(&self, content: &[u8], filename: &str) -> Result<ParsedDocument> {
        let text = decode_text(content, filename)?;

        let sections = match extension(filename).as_deref() {
            Some(".md") | Some(".markdown") => {
                let s = markdown_sections(&text);
                if s.is_empty() {
                    None
                } else {
                    Some(s)
                }
            }
            _ => None,
        };

        let metadata = DocMetadata {
            filename: filename.to_string(),
            section_count: sections.as_ref().map(|s| s.len()),
            ..Default::default()
        };

        Ok(ParsedDocument {
            text,
            metadata,
            pages: None,
            sections,
            tables: None,
        })
    }
}

/// Decode bytes as UTF-8, then UTF-16 (BOM-detected), then Latin-1.
///
/// Payloads that fail UTF-8/16 and contain NUL bytes are treated as binary
/// rather than silently mojibake'd through the Latin-1 fallback.
pub(crate) fn decode_text(content: &[u8], filename: &str) -> Result<String> {
    if let Ok(s) = std::str::from_utf8(content) {
        // Strip a UTF-8 BOM if present.
        return Ok(s.trim_start_matches('\u{feff}').to_string());
    }

    if let Some(s) = decode_utf16(content) {
        return Ok(s);
    }

    if content.contains(&0) {
        return Err(PipelineError::Decode(filename.to_string()));
    }

    Ok(content.iter().map(|&b| b as char).collect())
}

fn decode_utf16(content: &[u8]) -> Option<String> {
    if content.len() < 2 || content.len() % 2 != 0 {
        return None;
    }
    let (le, body) = match (content[0], content[1]) {
        (0xFF, 0xFE) => (true, &content[2..]),
        (0xFE, 0xFF) => (false, &content[2..]),
        _ => return None,
    };
    let units: Vec<u16> = body
        .chunks_exact(2)
        .map(|c| {
            if le {
                u16::from_le_bytes([c[0], c[1]])
            } else {
                u16::from_be_bytes([c[0], c[1]])
            }
        })
        .collect();
    String::from_utf16(&units).ok()
}

/// Split markdown into heading-delimited sections. Content before the first
/// heading becomes a heading-less section.
fn markdown_sections(text: &str) -> Vec<Section> {
    let mut sections = Vec::new();
    let mut current = Section {
        heading: None,
        heading_level: 0,
        content: Vec::new(),
        speaker_role: None,
    };

    for line in text.lines() {
        let stripped = line.trim();
        if let Some(rest) = stripped.strip_prefix('#') {
            let level = 1 + rest.chars().take_while(|&c| c == '#').count();
            let heading = stripped[level..].trim().to_string();

            if current.heading.is_some() || !current.content.is_empty() {
                sections.push(current);
            }
            current = Section {
                heading: Some(heading),
                heading_level: level as u8,
                content: Vec::new(),
                speaker_role: None,
            };
        } else {
            current.content.push(line.to_string());
        }
    }

    if current.heading.is_some() || !current.content.is_empty() {
        sections.push(current);
    }

    sections
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_utf8() {
        let doc = TextParser.parse(b"Hello world", "a.txt").unwrap();
        assert_eq!(doc.text, "Hello world");
        assert!(doc.sections.is_none());
    }

    #[test]
    fn markdown_gets_sections() {
        let md = "# Title\n\nIntro para.\n\n## Growth\n\nWe will expand.\n";
        let doc = TextParser.parse(md.as_bytes(), "plan.md").unwrap();
        let sections = doc.sections.unwrap();
        assert_eq!(sections.len(), 2);
        assert_eq!(sections[0].heading.as_deref(), Some("Title"));
        assert_eq!(sections[0].heading_level, 1);
        assert_eq!(sections[1].heading.as_deref(), Some("Growth"));
        assert_eq!(sections[1].heading_level, 2);
        assert!(sections[1].text().contains("We will expand."));
    }

    #[test]
    fn markdown_preamble_becomes_headingless_section() {
        let md = "Preamble text.\n\n# First\nBody.\n";
        let doc = TextParser.parse(md.as_bytes(), "plan.md").unwrap();
        let sections = doc.sections.unwrap();
        assert_eq!(sections[0].heading, None);
        assert!(sections[0].text().contains("Preamble text."));
    }

    #[test]
    fn utf16_le_with_bom_decodes() {
        let mut bytes = vec![0xFF, 0xFE];
        for unit in "ok".encode_utf16() {
            bytes.extend_from_slice(&unit.to_le_bytes());
        }
        assert_eq!(decode_text(&bytes, "a.txt").unwrap(), "ok");
    }

    #[test]
    fn latin1_fallback_decodes() {
        // 0xE9 = é in Latin-1, invalid as standalone UTF-8.
        let bytes = b"caf\xe9";
        assert_eq!(decode_text(bytes, "a.txt").unwrap(), "café");
    }

    #[test]
    fn binary_payload_is_decode_error() {
        let bytes = b"\x00\x01\x02\xff\xfe\x00binary";
        assert!(matches!(
            decode_text(bytes, "a.txt"),
            Err(PipelineError::Decode(_))
        ));
    }
}
