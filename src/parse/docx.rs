//! DOCX parser: OOXML wordprocessing documents via `zip` + `quick-xml`.
//!
//! Reads `word/document.xml`, collecting paragraph text, heading-styled
//! section boundaries, and tables (row-major cell text). Core properties
//! (title/author) come from `docProps/core.xml` when present.

use std::io::Read;

use crate::error::{PipelineError, Result};
use crate::models::{DocMetadata, ParsedDocument, Section, Table};

use super::{extension, FormatParser};

/// Maximum decompressed bytes read from a single ZIP entry.
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

pub struct DocxParser;

impl FormatParser for DocxParser {
    fn name(&self) -> &'static str {
        "docx"
    }

    fn supports(&self, filename: &str) -> bool {
        matches!(extension(filename).as_deref(), Some(".docx") | Some(".doc"))
    }

    fn parse(&self, content: &[u8], filename: &str) -> Result<ParsedDocument> {
        let mut archive = zip::ZipArchive::new(std::io::Cursor::new(content))
            .map_err(|e| PipelineError::Decode(format!("{}: {}", filename, e)))?;

        let doc_xml = read_zip_entry(&mut archive, "word/document.xml")?;
        let body = parse_document_xml(&doc_xml)?;

        let (title, author) = match read_zip_entry(&mut archive, "docProps/core.xml") {
            Ok(core_xml) => parse_core_properties(&core_xml),
            Err(_) => (None, None),
        };

        let paragraphs: Vec<&str> = body.paragraphs.iter().map(|p| p.text.as_str()).collect();
        let text = paragraphs.join("\n\n");

        let sections = build_sections(&body.paragraphs);
        let tables: Vec<Table> = body
            .tables
            .into_iter()
            .map(|rows| Table { page: None, rows })
            .collect();

        let metadata = DocMetadata {
            filename: filename.to_string(),
            title,
            author,
            section_count: sections.as_ref().map(|s| s.len()),
            ..Default::default()
        };

        Ok(ParsedDocument {
            text,
            metadata,
            pages: None,
            sections,
            tables: if tables.is_empty() {
                None
            } else {
                Some(tables)
            },
        })
    }
}

pub(crate) fn read_zip_entry(
    archive: &mut zip::ZipArchive<std::io::Cursor<&[u8]>>,
    name: &str,
) -> Result<Vec<u8>> {
    let entry = archive
        .by_name(name)
        .map_err(|e| PipelineError::Decode(format!("{}: {}", name, e)))?;
    let mut out = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut out)
        .map_err(|e| PipelineError::Decode(format!("{}: {}", name, e)))?;
    if out.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(PipelineError::Decode(format!(
            "ZIP entry {} exceeds size limit",
            name
        )));
    }
    Ok(out)
}

struct DocxParagraph {
    text: String,
    /// Heading level when the paragraph carries a `Heading<N>` style.
    heading_level: Option<u8>,
}

struct DocxBody {
    paragraphs: Vec<DocxParagraph>,
    tables: Vec<Vec<Vec<String>>>,
}

fn parse_document_xml(xml: &[u8]) -> Result<DocxBody> {
    // No trim_text here: whitespace inside <w:t> runs is significant.
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();

    let mut paragraphs: Vec<DocxParagraph> = Vec::new();
    let mut tables: Vec<Vec<Vec<String>>> = Vec::new();

    let mut para_text = String::new();
    let mut para_heading: Option<u8> = None;
    let mut in_text_run = false;

    // Tables nest paragraphs; depth > 0 routes text into the current cell.
    let mut table_depth = 0usize;
    let mut current_rows: Vec<Vec<String>> = Vec::new();
    let mut current_row: Vec<String> = Vec::new();
    let mut current_cell = String::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => match e.local_name().as_ref() {
                b"tbl" => {
                    table_depth += 1;
                    if table_depth == 1 {
                        current_rows = Vec::new();
                    }
                }
                b"tr" if table_depth == 1 => current_row = Vec::new(),
                b"tc" if table_depth == 1 => current_cell.clear(),
                b"t" => in_text_run = true,
                _ => {}
            },
            Ok(quick_xml::events::Event::Empty(e)) => {
                if e.local_name().as_ref() == b"pStyle" {
                    if let Some(level) = heading_level_from_style(&e) {
                        para_heading = Some(level);
                    }
                }
            }
            Ok(quick_xml::events::Event::Text(t)) if in_text_run => {
                let s = t.unescape().unwrap_or_default();
                if table_depth > 0 {
                    current_cell.push_str(&s);
                } else {
                    para_text.push_str(&s);
                }
            }
            Ok(quick_xml::events::Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text_run = false,
                b"p" => {
                    if table_depth == 0 {
                        let trimmed = para_text.trim();
                        if !trimmed.is_empty() {
                            paragraphs.push(DocxParagraph {
                                text: trimmed.to_string(),
                                heading_level: para_heading,
                            });
                        }
                    } else {
                        // Paragraph break inside a cell.
                        current_cell.push(' ');
                    }
                    para_text.clear();
                    para_heading = None;
                }
                b"tc" if table_depth == 1 => {
                    current_row.push(current_cell.trim().to_string());
                }
                b"tr" if table_depth == 1 => {
                    if !current_row.is_empty() {
                        current_rows.push(std::mem::take(&mut current_row));
                    }
                }
                b"tbl" => {
                    table_depth = table_depth.saturating_sub(1);
                    if table_depth == 0 && !current_rows.is_empty() {
                        tables.push(std::mem::take(&mut current_rows));
                    }
                }
                _ => {}
            },
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => return Err(PipelineError::Decode(format!("word/document.xml: {}", e))),
            _ => {}
        }
        buf.clear();
    }

    Ok(DocxBody { paragraphs, tables })
}

fn heading_level_from_style(e: &quick_xml::events::BytesStart<'_>) -> Option<u8> {
    for attr in e.attributes().flatten() {
        if attr.key.local_name().as_ref() == b"val" {
            let val = String::from_utf8_lossy(&attr.value);
            if let Some(rest) = val.strip_prefix("Heading") {
                return Some(rest.trim().parse::<u8>().unwrap_or(1));
            }
        }
    }
    None
}

/// Group paragraphs into heading-delimited sections. Returns `None` when the
/// document has no heading-styled paragraphs at all.
fn build_sections(paragraphs: &[DocxParagraph]) -> Option<Vec<Section>> {
    if !paragraphs.iter().any(|p| p.heading_level.is_some()) {
        return None;
    }

    let mut sections = Vec::new();
    let mut current = Section {
        heading: None,
        heading_level: 0,
        content: Vec::new(),
        speaker_role: None,
    };

    for para in paragraphs {
        match para.heading_level {
            Some(level) => {
                if current.heading.is_some() || !current.content.is_empty() {
                    sections.push(current);
                }
                current = Section {
                    heading: Some(para.text.clone()),
                    heading_level: level,
                    content: Vec::new(),
                    speaker_role: None,
                };
            }
            None => current.content.push(para.text.clone()),
        }
    }

    if current.heading.is_some() || !current.content.is_empty() {
        sections.push(current);
    }

    Some(sections)
}

pub(crate) fn parse_core_properties(xml: &[u8]) -> (Option<String>, Option<String>) {
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();

    let mut title = None;
    let mut author = None;
    let mut field: Option<&'static str> = None;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => {
                field = match e.local_name().as_ref() {
                    b"title" => Some("title"),
                    b"creator" => Some("creator"),
                    _ => None,
                };
            }
            Ok(quick_xml::events::Event::Text(t)) => {
                if let Some(which) = field {
                    let value = t.unescape().unwrap_or_default().trim().to_string();
                    if !value.is_empty() {
                        match which {
                            "title" => title = Some(value),
                            _ => author = Some(value),
                        }
                    }
                }
            }
            Ok(quick_xml::events::Event::End(_)) => field = None,
            Ok(quick_xml::events::Event::Eof) => break,
            Err(_) => break,
            _ => {}
        }
        buf.clear();
    }

    (title, author)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn make_docx(document_xml: &str, core_xml: Option<&str>) -> Vec<u8> {
        let mut buf = std::io::Cursor::new(Vec::new());
        {
            let mut zip = zip::ZipWriter::new(&mut buf);
            let opts = zip::write::SimpleFileOptions::default();
            zip.start_file("word/document.xml", opts).unwrap();
            zip.write_all(document_xml.as_bytes()).unwrap();
            if let Some(core) = core_xml {
                zip.start_file("docProps/core.xml", opts).unwrap();
                zip.write_all(core.as_bytes()).unwrap();
            }
            zip.finish().unwrap();
        }
        buf.into_inner()
    }

    const DOC_XML: &str = r#"<?xml version="1.0"?>
<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main">
<w:body>
<w:p><w:pPr><w:pStyle w:val="Heading1"/></w:pPr><w:r><w:t>Strategic Plan</w:t></w:r></w:p>
<w:p><w:r><w:t>We will expand into new markets.</w:t></w:r></w:p>
<w:p><w:pPr><w:pStyle w:val="Heading2"/></w:pPr><w:r><w:t>Financials</w:t></w:r></w:p>
<w:p><w:r><w:t>Revenue target is </w:t></w:r><w:r><w:t>$2B.</w:t></w:r></w:p>
<w:tbl>
<w:tr><w:tc><w:p><w:r><w:t>Metric</w:t></w:r></w:p></w:tc><w:tc><w:p><w:r><w:t>Value</w:t></w:r></w:p></w:tc></w:tr>
<w:tr><w:tc><w:p><w:r><w:t>Margin</w:t></w:r></w:p></w:tc><w:tc><w:p><w:r><w:t>40%</w:t></w:r></w:p></w:tc></w:tr>
</w:tbl>
</w:body>
</w:document>"#;

    #[test]
    fn extracts_paragraphs_sections_and_tables() {
        let bytes = make_docx(DOC_XML, None);
        let doc = DocxParser.parse(&bytes, "plan.docx").unwrap();

        assert!(doc.text.contains("We will expand into new markets."));
        assert!(doc.text.contains("Revenue target is $2B."));

        let sections = doc.sections.unwrap();
        assert_eq!(sections.len(), 2);
        assert_eq!(sections[0].heading.as_deref(), Some("Strategic Plan"));
        assert_eq!(sections[1].heading.as_deref(), Some("Financials"));
        assert_eq!(sections[1].heading_level, 2);

        let tables = doc.tables.unwrap();
        assert_eq!(tables.len(), 1);
        assert_eq!(tables[0].rows[0], vec!["Metric", "Value"]);
        assert_eq!(tables[0].rows[1], vec!["Margin", "40%"]);
    }

    #[test]
    fn table_text_not_duplicated_in_body() {
        let bytes = make_docx(DOC_XML, None);
        let doc = DocxParser.parse(&bytes, "plan.docx").unwrap();
        assert!(!doc.text.contains("Margin"));
    }

    #[test]
    fn reads_core_properties() {
        let core = r#"<?xml version="1.0"?>
<cp:coreProperties xmlns:cp="http://schemas.openxmlformats.org/package/2006/metadata/core-properties" xmlns:dc="http://purl.org/dc/elements/1.1/">
<dc:title>Annual Report</dc:title><dc:creator>IR Team</dc:creator>
</cp:coreProperties>"#;
        let bytes = make_docx(DOC_XML, Some(core));
        let doc = DocxParser.parse(&bytes, "plan.docx").unwrap();
        assert_eq!(doc.metadata.title.as_deref(), Some("Annual Report"));
        assert_eq!(doc.metadata.author.as_deref(), Some("IR Team"));
    }

    #[test]
    fn invalid_zip_is_an_error() {
        let err = DocxParser.parse(b"not a zip", "plan.docx").unwrap_err();
        assert!(matches!(err, PipelineError::Decode(_)));
    }
}
