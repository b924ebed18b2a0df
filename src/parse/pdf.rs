//! PDF parser built on `pdf-extract`.
//!
//! `pdf-extract` yields one text stream for the whole document; page
//! boundaries are recovered from the form-feed separators it emits. When no
//! separator is present the document is treated as a single page.

use crate::error::{PipelineError, Result};
use crate::models::{DocMetadata, Page, ParsedDocument};

use super::{extension, FormatParser};

pub struct PdfParser;

impl FormatParser for PdfParser {
    fn name(&self) -> &'static str {
        "pdf"
    }

    fn supports(&self, filename: &str) -> bool {
        extension(filename).as_deref() == Some(".pdf")
    }

    fn parse(&self, content: &[u8], filename: &str) -> Result<ParsedDocument> {
        let raw = pdf_extract::extract_text_from_mem(content)
            .map_err(|e| PipelineError::Decode(format!("{}: {}", filename, e)))?;

        let pages: Vec<Page> = raw
            .split('\u{c}')
            .enumerate()
            .filter(|(_, t)| !t.trim().is_empty())
            .map(|(i, t)| Page {
                number: (i + 1) as u32,
                text: t.trim().to_string(),
                title: None,
            })
            .collect();

        let text = pages
            .iter()
            .map(|p| p.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");

        let metadata = DocMetadata {
            filename: filename.to_string(),
            page_count: Some(pages.len().max(1)),
            ..Default::default()
        };

        Ok(ParsedDocument {
            text,
            metadata,
            pages: if pages.is_empty() { None } else { Some(pages) },
            sections: None,
            tables: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn supports_only_pdf() {
        assert!(PdfParser.supports("report.pdf"));
        assert!(PdfParser.supports("REPORT.PDF"));
        assert!(!PdfParser.supports("report.docx"));
    }

    #[test]
    fn invalid_pdf_is_an_error() {
        let err = PdfParser.parse(b"not a pdf", "broken.pdf").unwrap_err();
        assert!(matches!(err, PipelineError::Decode(_)));
    }
}
