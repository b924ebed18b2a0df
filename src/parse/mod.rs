//! Format-aware document parsing.
//!
//! Raw document bytes are routed to the first registered [`FormatParser`]
//! whose `supports` accepts the filename. The registration order is a
//! first-class configuration value: specialized formats are tried before the
//! plain-text fallback, and dispatch is a plain linear scan.
//!
//! | Parser | Formats | Structural view |
//! |--------|---------|-----------------|
//! | [`pdf::PdfParser`] | `.pdf` | pages |
//! | [`docx::DocxParser`] | `.docx`, `.doc` | heading sections + tables |
//! | [`pptx::PptxParser`] | `.pptx`, `.ppt` | slides + title sections + tables |
//! | [`transcript::TranscriptParser`] | `.html`/`.htm` transcripts | speaker sections |
//! | [`text::TextParser`] | `.txt`, `.md`, … | markdown sections |

pub mod docx;
pub mod pdf;
pub mod pptx;
pub mod text;
pub mod transcript;

use crate::error::{PipelineError, Result};
use crate::models::ParsedDocument;

/// A single document-format parser.
pub trait FormatParser: Send + Sync {
    /// Short identifier used in logs (e.g. `"pdf"`).
    fn name(&self) -> &'static str;

    /// Whether this parser handles the given filename.
    fn supports(&self, filename: &str) -> bool;

    /// Parse raw bytes into a normalized document.
    fn parse(&self, content: &[u8], filename: &str) -> Result<ParsedDocument>;
}

/// Ordered parser registry. The first parser whose `supports` returns true
/// wins; if none match the document fails with
/// [`PipelineError::UnsupportedFormat`].
pub struct DocumentParser {
    parsers: Vec<Box<dyn FormatParser>>,
}

impl DocumentParser {
    /// Registry with the built-in parsers in priority order.
    pub fn new() -> Self {
        Self {
            parsers: vec![
                Box::new(pdf::PdfParser),
                Box::new(docx::DocxParser),
                Box::new(pptx::PptxParser),
                Box::new(transcript::TranscriptParser::new()),
                Box::new(text::TextParser),
            ],
        }
    }

    /// Registry with a caller-provided parser order.
    pub fn with_parsers(parsers: Vec<Box<dyn FormatParser>>) -> Self {
        Self { parsers }
    }

    pub fn parse(&self, content: &[u8], filename: &str) -> Result<ParsedDocument> {
        for parser in &self.parsers {
            if parser.supports(filename) {
                tracing::debug!(parser = parser.name(), filename, "parsing document");
                return parser.parse(content, filename);
            }
        }
        Err(PipelineError::UnsupportedFormat(
            extension(filename).unwrap_or_else(|| filename.to_string()),
        ))
    }

    /// Whether any registered parser accepts the filename.
    pub fn is_supported(&self, filename: &str) -> bool {
        self.parsers.iter().any(|p| p.supports(filename))
    }

    pub fn supported_extensions(&self) -> &'static [&'static str] {
        &[
            ".pdf", ".docx", ".doc", ".pptx", ".ppt", ".txt", ".md", ".html", ".htm",
        ]
    }
}

impl Default for DocumentParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Lowercased extension including the dot (e.g. `".pdf"`).
pub(crate) fn extension(filename: &str) -> Option<String> {
    std::path::Path::new(filename)
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_extension_is_unsupported() {
        let parser = DocumentParser::new();
        let err = parser.parse(b"payload", "report.xyz").unwrap_err();
        assert!(matches!(err, PipelineError::UnsupportedFormat(ref e) if e == ".xyz"));
    }

    #[test]
    fn text_fallback_wins_for_plain_files() {
        let parser = DocumentParser::new();
        let doc = parser.parse(b"Plain body text.", "notes.txt").unwrap();
        assert_eq!(doc.text, "Plain body text.");
    }

    #[test]
    fn html_without_transcript_keywords_is_unsupported() {
        // The transcript parser requires transcript-like filenames; generic
        // HTML has no other parser.
        let parser = DocumentParser::new();
        let err = parser.parse(b"<html></html>", "homepage.html").unwrap_err();
        assert!(matches!(err, PipelineError::UnsupportedFormat(_)));
    }

    #[test]
    fn extension_lowercases() {
        assert_eq!(extension("A.PDF").as_deref(), Some(".pdf"));
        assert_eq!(extension("noext"), None);
    }
}
