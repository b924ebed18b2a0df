//! Earnings-call transcript parser.
//!
//! Handles HTML transcripts with transcript-like filenames, segmenting the
//! body into speaker turns. Speaker headers are recognized by a small set of
//! ordered patterns ("Name – Role:", "Name (Role)", "Operator", bare
//! "Name:"); content that precedes any recognized speaker lands in an
//! "Unattributed" section.

use regex::Regex;

use crate::error::Result;
use crate::models::{DocMetadata, ParsedDocument, Section};

use super::{extension, FormatParser};

const TRANSCRIPT_KEYWORDS: &[&str] = &["transcript", "earnings", "call", "conference"];

const ROLES: &str =
    "CEO|CFO|COO|CTO|CMO|President|Chairman|Analyst|Director|Vice President|VP|Executive";

pub struct TranscriptParser {
    /// Ordered speaker patterns; the first match wins.
    speaker_patterns: Vec<Regex>,
    qa_heading: Regex,
    date: Regex,
    title: Regex,
}

impl TranscriptParser {
    pub fn new() -> Self {
        let speaker_patterns = vec![
            // "Jane Doe – CEO:" or "Jane Doe, CFO"
            Regex::new(&format!(
                r"^([A-Z][A-Za-z .]+?)\s*(?:[-\u{{2013}}\u{{2014}}]|,)\s*({ROLES})\s*:?\s*$"
            ))
            .unwrap(),
            // "Jane Doe (CEO)"
            Regex::new(&format!(r"^([A-Z][A-Za-z .]+?)\s*\(({ROLES})\)\s*:?\s*$")).unwrap(),
            // "Operator:"
            Regex::new(r"^Operator\s*:?\s*$").unwrap(),
            // Bare "Jane Doe:" — requires the trailing colon to avoid
            // swallowing ordinary capitalized lines.
            Regex::new(r"^([A-Z][A-Za-z .]{2,60}):\s*$").unwrap(),
        ];
        Self {
            speaker_patterns,
            qa_heading: Regex::new(r"(?i)^question[-\s]and[-\s]answer").unwrap(),
            date: Regex::new(
                r"(January|February|March|April|May|June|July|August|September|October|November|December)\s+\d{1,2},?\s+\d{4}",
            )
            .unwrap(),
            title: Regex::new(r"(?is)<title[^>]*>(.*?)</title>").unwrap(),
        }
    }

    fn match_speaker(&self, line: &str) -> Option<(String, Option<String>)> {
        for (i, pattern) in self.speaker_patterns.iter().enumerate() {
            if let Some(caps) = pattern.captures(line) {
                return Some(match i {
                    0 | 1 => (
                        caps[1].trim().to_string(),
                        Some(caps[2].trim().to_string()),
                    ),
                    2 => ("Operator".to_string(), Some("Operator".to_string())),
                    _ => (caps[1].trim().to_string(), None),
                });
            }
        }
        None
    }

    fn parse_sections(&self, body: &str) -> Vec<Section> {
        let mut sections = Vec::new();
        let mut current = Section {
            heading: Some("Unattributed".to_string()),
            heading_level: 1,
            content: Vec::new(),
            speaker_role: None,
        };

        for raw in body.lines() {
            let line = raw.trim();
            if line.is_empty() {
                continue;
            }

            let break_heading = if self.qa_heading.is_match(line) {
                Some((line.to_string(), None))
            } else {
                self.match_speaker(line)
            };

            match break_heading {
                Some((heading, role)) => {
                    if !current.content.is_empty() {
                        sections.push(current);
                    }
                    current = Section {
                        heading: Some(heading),
                        heading_level: 1,
                        content: Vec::new(),
                        speaker_role: role,
                    };
                }
                None => current.content.push(line.to_string()),
            }
        }

        if !current.content.is_empty() {
            sections.push(current);
        }

        sections
    }
}

impl Default for TranscriptParser {
    fn default() -> Self {
        Self::new()
    }
}

impl FormatParser for TranscriptParser {
    fn name(&self) -> &'static str {
        "transcript"
    }

    fn supports(&self, filename: &str) -> bool {
        let is_html = matches!(extension(filename).as_deref(), Some(".html") | Some(".htm"));
        let lower = filename.to_lowercase();
        is_html && TRANSCRIPT_KEYWORDS.iter().any(|k| lower.contains(k))
    }

    fn parse(&self, content: &[u8], filename: &str) -> Result<ParsedDocument> {
        let html = String::from_utf8_lossy(content);

        let title = self
            .title
            .captures(&html)
            .map(|c| strip_tags(&c[1]).trim().to_string())
            .filter(|t| !t.is_empty());

        let body = strip_tags(&html);
        let sections = self.parse_sections(&body);

        let has_qa = body.lines().any(|l| self.qa_heading.is_match(l.trim()));

        let metadata = DocMetadata {
            filename: filename.to_string(),
            title,
            date: self.date.find(&body).map(|m| m.as_str().to_string()),
            section_count: Some(sections.len()),
            has_qa_section: Some(has_qa),
            ..Default::default()
        };

        Ok(ParsedDocument {
            text: body,
            metadata,
            pages: None,
            sections: if sections.is_empty() {
                None
            } else {
                Some(sections)
            },
            tables: None,
        })
    }
}

/// Reduce HTML to line-oriented plain text: drop script/style subtrees,
/// turn block-closing tags into newlines, strip the rest, decode the common
/// entities.
fn strip_tags(html: &str) -> String {
    let scripts = Regex::new(r"(?is)<(script|style)[^>]*>.*?</(script|style)>").unwrap();
    let breaks = Regex::new(r"(?i)<(br\s*/?|/p|/div|/li|/tr|/h[1-6]|/title)>").unwrap();
    let tags = Regex::new(r"(?s)<[^>]+>").unwrap();

    let no_scripts = scripts.replace_all(html, "");
    let with_breaks = breaks.replace_all(&no_scripts, "\n");
    let stripped = tags.replace_all(&with_breaks, "");

    let decoded = stripped
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'");

    // Collapse runs of blank lines.
    let mut out = String::with_capacity(decoded.len());
    let mut blank = false;
    for line in decoded.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            if !blank && !out.is_empty() {
                out.push('\n');
            }
            blank = true;
        } else {
            out.push_str(trimmed);
            out.push('\n');
            blank = false;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<html><head><title>Acme Corp Q2 2024 Earnings Call</title></head>
<body>
<p>Acme Corp Earnings Conference Call, July 25, 2024</p>
<p>Jane Doe - CEO:</p>
<p>Thank you all for joining. Our AI platform launch remains on track for Q1 2025.</p>
<p>John Smith (CFO)</p>
<p>Revenue grew 12 percent year over year.</p>
<p>Question-and-Answer Session</p>
<p>Operator:</p>
<p>Our first question comes from the line of an analyst.</p>
</body></html>"#;

    #[test]
    fn supports_requires_keyword_and_html() {
        let p = TranscriptParser::new();
        assert!(p.supports("acme_q2_earnings_transcript.html"));
        assert!(p.supports("conference-call.htm"));
        assert!(!p.supports("homepage.html"));
        assert!(!p.supports("transcript.txt"));
    }

    #[test]
    fn attributes_speaker_turns() {
        let p = TranscriptParser::new();
        let doc = p.parse(SAMPLE.as_bytes(), "acme_transcript.html").unwrap();
        let sections = doc.sections.unwrap();

        let jane = sections
            .iter()
            .find(|s| s.heading.as_deref() == Some("Jane Doe"))
            .expect("Jane Doe section");
        assert_eq!(jane.speaker_role.as_deref(), Some("CEO"));
        assert!(jane.text().contains("AI platform launch"));

        let john = sections
            .iter()
            .find(|s| s.heading.as_deref() == Some("John Smith"))
            .expect("John Smith section");
        assert_eq!(john.speaker_role.as_deref(), Some("CFO"));
    }

    #[test]
    fn leading_content_is_unattributed() {
        let p = TranscriptParser::new();
        let doc = p.parse(SAMPLE.as_bytes(), "acme_transcript.html").unwrap();
        let sections = doc.sections.unwrap();
        assert_eq!(sections[0].heading.as_deref(), Some("Unattributed"));
        assert!(sections[0].text().contains("Earnings Conference Call"));
    }

    #[test]
    fn detects_qa_section_and_date() {
        let p = TranscriptParser::new();
        let doc = p.parse(SAMPLE.as_bytes(), "acme_transcript.html").unwrap();
        assert_eq!(doc.metadata.has_qa_section, Some(true));
        assert_eq!(doc.metadata.date.as_deref(), Some("July 25, 2024"));
        assert_eq!(
            doc.metadata.title.as_deref(),
            Some("Acme Corp Q2 2024 Earnings Call")
        );
    }

    #[test]
    fn operator_turn_recognized() {
        let p = TranscriptParser::new();
        let doc = p.parse(SAMPLE.as_bytes(), "acme_transcript.html").unwrap();
        let sections = doc.sections.unwrap();
        let operator = sections
            .iter()
            .find(|s| s.heading.as_deref() == Some("Operator"))
            .expect("Operator section");
        assert_eq!(operator.speaker_role.as_deref(), Some("Operator"));
    }
}
