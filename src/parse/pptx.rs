//! PPTX parser: slide decks via `zip` + `quick-xml`.
//!
//! Extracts per-slide text (one page per slide), slide titles from title
//! placeholders, tables embedded in graphic frames, and title-derived
//! sections.

use crate::error::{PipelineError, Result};
use crate::models::{DocMetadata, Page, ParsedDocument, Section, Table};

use super::docx::{parse_core_properties, read_zip_entry};
use super::{extension, FormatParser};

pub struct PptxParser;

impl FormatParser for PptxParser {
    fn name(&self) -> &'static str {
        "pptx"
    }

    fn supports(&self, filename: &str) -> bool {
        matches!(extension(filename).as_deref(), Some(".pptx") | Some(".ppt"))
    }

    fn parse(&self, content: &[u8], filename: &str) -> Result<ParsedDocument> {
        let mut archive = zip::ZipArchive::new(std::io::Cursor::new(content))
            .map_err(|e| PipelineError::Decode(format!("{}: {}", filename, e)))?;

        let mut slide_names: Vec<String> = archive
            .file_names()
            .filter(|n| n.starts_with("ppt/slides/slide") && n.ends_with(".xml"))
            .map(|s| s.to_string())
            .collect();
        slide_names.sort_by_key(|name| {
            name.trim_start_matches("ppt/slides/slide")
                .trim_end_matches(".xml")
                .parse::<u32>()
                .unwrap_or(u32::MAX)
        });

        let mut slides: Vec<Page> = Vec::new();
        let mut tables: Vec<Table> = Vec::new();
        let mut full_text_parts: Vec<String> = Vec::new();

        for (idx, name) in slide_names.iter().enumerate() {
            let slide_num = (idx + 1) as u32;
            let xml = read_zip_entry(&mut archive, name)?;
            let parsed = parse_slide_xml(&xml)?;

            for rows in parsed.tables {
                tables.push(Table {
                    page: Some(slide_num),
                    rows,
                });
            }

            if !parsed.text.trim().is_empty() {
                full_text_parts.push(format!("--- Slide {} ---\n{}", slide_num, parsed.text));
                slides.push(Page {
                    number: slide_num,
                    text: parsed.text,
                    title: parsed.title,
                });
            }
        }

        let sections = build_sections(&slides);

        let (title, author) = match read_zip_entry(&mut archive, "docProps/core.xml") {
            Ok(core_xml) => parse_core_properties(&core_xml),
            Err(_) => (None, None),
        };

        let metadata = DocMetadata {
            filename: filename.to_string(),
            title,
            author,
            slide_count: Some(slide_names.len()),
            section_count: sections.as_ref().map(|s| s.len()),
            ..Default::default()
        };

        Ok(ParsedDocument {
            text: full_text_parts.join("\n\n"),
            metadata,
            pages: if slides.is_empty() {
                None
            } else {
                Some(slides)
            },
            sections,
            tables: if tables.is_empty() {
                None
            } else {
                Some(tables)
            },
        })
    }
}

struct SlideContent {
    text: String,
    title: Option<String>,
    tables: Vec<Vec<Vec<String>>>,
}

fn parse_slide_xml(xml: &[u8]) -> Result<SlideContent> {
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();

    let mut shape_paras: Vec<String> = Vec::new();
    let mut shape_is_title = false;
    let mut para_text = String::new();
    let mut in_text_run = false;

    let mut text_parts: Vec<String> = Vec::new();
    let mut title: Option<String> = None;
    let mut tables: Vec<Vec<Vec<String>>> = Vec::new();

    let mut table_depth = 0usize;
    let mut current_rows: Vec<Vec<String>> = Vec::new();
    let mut current_row: Vec<String> = Vec::new();
    let mut current_cell = String::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => match e.local_name().as_ref() {
                b"sp" => {
                    shape_paras.clear();
                    shape_is_title = false;
                }
                b"tbl" => {
                    table_depth += 1;
                    if table_depth == 1 {
                        current_rows = Vec::new();
                    }
                }
                b"tr" if table_depth == 1 => current_row = Vec::new(),
                b"tc" if table_depth == 1 => current_cell.clear(),
                b"t" => in_text_run = true,
                b"ph" => {
                    if is_title_placeholder(&e) {
                        shape_is_title = true;
                    }
                }
                _ => {}
            },
            Ok(quick_xml::events::Event::Empty(e)) => {
                if e.local_name().as_ref() == b"ph" && is_title_placeholder(&e) {
                    shape_is_title = true;
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
                            shape_paras.push(trimmed.to_string());
                        }
                    } else {
                        current_cell.push(' ');
                    }
                    para_text.clear();
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
                b"sp" => {
                    if !shape_paras.is_empty() {
                        let shape_text = shape_paras.join("\n");
                        if shape_is_title && title.is_none() {
                            title = Some(shape_text.clone());
                        }
                        text_parts.push(shape_text);
                        shape_paras.clear();
                    }
                }
                _ => {}
            },
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => return Err(PipelineError::Decode(format!("slide xml: {}", e))),
            _ => {}
        }
        buf.clear();
    }

    Ok(SlideContent {
        text: text_parts.join("\n"),
        title,
        tables,
    })
}

fn is_title_placeholder(e: &quick_xml::events::BytesStart<'_>) -> bool {
    e.attributes().flatten().any(|a| {
        a.key.local_name().as_ref() == b"type"
            && matches!(a.value.as_ref(), b"title" | b"ctrTitle")
    })
}

/// Build sections from slides: each titled slide opens a section; untitled
/// slides append to the current one (or open an untitled "Slide N" section).
fn build_sections(slides: &[Page]) -> Option<Vec<Section>> {
    if slides.is_empty() {
        return None;
    }

    let mut sections: Vec<Section> = Vec::new();
    let mut current: Option<Section> = None;

    for slide in slides {
        match &slide.title {
            Some(title) => {
                if let Some(section) = current.take() {
                    sections.push(section);
                }
                current = Some(Section {
                    heading: Some(title.clone()),
                    heading_level: 1,
                    content: vec![slide.text.clone()],
                    speaker_role: None,
                });
            }
            None => match current.as_mut() {
                Some(section) => section.content.push(slide.text.clone()),
                None => {
                    current = Some(Section {
                        heading: Some(format!("Slide {}", slide.number)),
                        heading_level: 2,
                        content: vec![slide.text.clone()],
                        speaker_role: None,
                    });
                }
            },
        }
    }

    if let Some(section) = current.take() {
        sections.push(section);
    }

    Some(sections)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn slide_xml(title: Option<&str>, body: &str) -> String {
        let title_shape = title
            .map(|t| {
                format!(
                    r#"<p:sp><p:nvSpPr><p:nvPr><p:ph type="title"/></p:nvPr></p:nvSpPr>
<p:txBody><a:p><a:r><a:t>{t}</a:t></a:r></a:p></p:txBody></p:sp>"#
                )
            })
            .unwrap_or_default();
        format!(
            r#"<?xml version="1.0"?>
<p:sld xmlns:p="http://schemas.openxmlformats.org/presentationml/2006/main" xmlns:a="http://schemas.openxmlformats.org/drawingml/2006/main">
<p:cSld><p:spTree>
{title_shape}
<p:sp><p:txBody><a:p><a:r><a:t>{body}</a:t></a:r></a:p></p:txBody></p:sp>
</p:spTree></p:cSld></p:sld>"#
        )
    }

    fn make_pptx(slides: &[String]) -> Vec<u8> {
        let mut buf = std::io::Cursor::new(Vec::new());
        {
            let mut zip = zip::ZipWriter::new(&mut buf);
            let opts = zip::write::SimpleFileOptions::default();
            for (i, xml) in slides.iter().enumerate() {
                zip.start_file(format!("ppt/slides/slide{}.xml", i + 1), opts)
                    .unwrap();
                zip.write_all(xml.as_bytes()).unwrap();
            }
            zip.finish().unwrap();
        }
        buf.into_inner()
    }

    #[test]
    fn extracts_slides_titles_and_sections() {
        let bytes = make_pptx(&[
            slide_xml(Some("Growth Strategy"), "Expand into APAC in 2025."),
            slide_xml(None, "Headcount grows 20 percent."),
            slide_xml(Some("Capital"), "Buyback program continues."),
        ]);
        let doc = PptxParser.parse(&bytes, "deck.pptx").unwrap();

        let pages = doc.pages.unwrap();
        assert_eq!(pages.len(), 3);
        assert_eq!(pages[0].title.as_deref(), Some("Growth Strategy"));
        assert!(doc.text.contains("--- Slide 1 ---"));
        assert!(doc.text.contains("Expand into APAC in 2025."));

        let sections = doc.sections.unwrap();
        assert_eq!(sections.len(), 2);
        assert_eq!(sections[0].heading.as_deref(), Some("Growth Strategy"));
        // Untitled slide 2 folded into the first section.
        assert!(sections[0].text().contains("Headcount grows 20 percent."));
        assert_eq!(sections[1].heading.as_deref(), Some("Capital"));
    }

    #[test]
    fn slides_sort_numerically() {
        // slide10 must come after slide2.
        let mut buf = std::io::Cursor::new(Vec::new());
        {
            let mut zip = zip::ZipWriter::new(&mut buf);
            let opts = zip::write::SimpleFileOptions::default();
            for n in [10, 1, 2] {
                zip.start_file(format!("ppt/slides/slide{}.xml", n), opts)
                    .unwrap();
                zip.write_all(slide_xml(None, &format!("Body {}", n)).as_bytes())
                    .unwrap();
            }
            zip.finish().unwrap();
        }
        let doc = PptxParser.parse(&buf.into_inner(), "deck.pptx").unwrap();
        let pages = doc.pages.unwrap();
        assert!(pages[0].text.contains("Body 1"));
        assert!(pages[1].text.contains("Body 2"));
        assert!(pages[2].text.contains("Body 10"));
    }

    #[test]
    fn extracts_slide_tables() {
        let table_slide = r#"<?xml version="1.0"?>
<p:sld xmlns:p="http://schemas.openxmlformats.org/presentationml/2006/main" xmlns:a="http://schemas.openxmlformats.org/drawingml/2006/main">
<p:cSld><p:spTree>
<p:graphicFrame><a:graphic><a:graphicData><a:tbl>
<a:tr><a:tc><a:txBody><a:p><a:r><a:t>Region</a:t></a:r></a:p></a:txBody></a:tc>
<a:tc><a:txBody><a:p><a:r><a:t>Revenue</a:t></a:r></a:p></a:txBody></a:tc></a:tr>
<a:tr><a:tc><a:txBody><a:p><a:r><a:t>EMEA</a:t></a:r></a:p></a:txBody></a:tc>
<a:tc><a:txBody><a:p><a:r><a:t>$1B</a:t></a:r></a:p></a:txBody></a:tc></a:tr>
</a:tbl></a:graphicData></a:graphic></p:graphicFrame>
</p:spTree></p:cSld></p:sld>"#;
        let bytes = make_pptx(&[table_slide.to_string()]);
        let doc = PptxParser.parse(&bytes, "deck.pptx").unwrap();
        let tables = doc.tables.unwrap();
        assert_eq!(tables.len(), 1);
        assert_eq!(tables[0].page, Some(1));
        assert_eq!(tables[0].rows[0], vec!["Region", "Revenue"]);
        assert_eq!(tables[0].rows[1], vec!["EMEA", "$1B"]);
    }
}
