use std::io::Read;
use std::time::Duration;

use lazy_static::lazy_static;
use quick_xml::events::Event;
use regex::Regex;
use reqwest::Client;
use scraper::Html;
use url::Url;

use crate::error::EngineError;
use crate::types::{Document, DocumentFormat, PageSpan, SectionSpan};

const MIN_TEXT_LEN: usize = 50;

lazy_static! {
    static ref ARTIFACTS: Regex = Regex::new(
        r"\b\d+\s+0\s+obj\b|\bendobj\b|<<|>>|/F\s+\d+\b|/Type\s*/[A-Za-z]+|/Encoding\s*/[A-Za-z]+",
    )
    .expect("static regex");
}

/// Fetches a document from a URL (or inline bytes), extracts plain text
/// and page/section metadata, and fingerprints the raw content.
pub struct DocumentLoader {
    client: Client,
}

impl DocumentLoader {
    pub fn new() -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self { client }
    }

    pub async fn load_url(&self, url: &str) -> Result<Document, EngineError> {
        Url::parse(url).map_err(|e| EngineError::Fetch(format!("invalid URL {}: {}", url, e)))?;

        log::info!("Downloading document from {}", url);
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| EngineError::Fetch(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(EngineError::Fetch(format!("{} returned {}", url, status)));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| EngineError::Fetch(e.to_string()))?;

        self.load_bytes(&bytes, DocumentFormat::from_url(url), url)
    }

    /// Extraction entry point shared by the URL path and inline uploads.
    pub fn load_bytes(
        &self,
        bytes: &[u8],
        format: DocumentFormat,
        source: &str,
    ) -> Result<Document, EngineError> {
        let fingerprint = format!("{:x}", md5::compute(bytes));

        let (text, pages) = match format {
            DocumentFormat::Pdf => self.extract_pdf(bytes)?,
            DocumentFormat::Docx => {
                let raw = extract_docx(bytes)?;
                let cleaned = clean_text(&raw);
                let end = cleaned.len();
                (cleaned, vec![PageSpan { page: 1, start: 0, end }])
            }
            DocumentFormat::Email => {
                let raw = String::from_utf8_lossy(bytes);
                let cleaned = clean_text(&strip_html(&raw));
                let end = cleaned.len();
                (cleaned, vec![PageSpan { page: 1, start: 0, end }])
            }
        };

        if text.trim().len() < MIN_TEXT_LEN {
            return Err(EngineError::EmptyDocument(format!(
                "extracted text from {} is blank or too short ({} chars)",
                source,
                text.trim().len()
            )));
        }

        let sections = detect_sections(&text);
        log::info!(
            "Extracted {} chars, {} pages, {} sections from {}",
            text.len(),
            pages.len(),
            sections.len(),
            source
        );

        Ok(Document {
            source: source.to_string(),
            format,
            text,
            sections,
            pages,
            fingerprint,
        })
    }

    /// PDF text with page spans. `pdf-extract` separates pages with a
    /// form feed; if none is present the document is treated as one page.
    fn extract_pdf(&self, bytes: &[u8]) -> Result<(String, Vec<PageSpan>), EngineError> {
        let raw = pdf_extract::extract_text_from_mem(bytes)
            .map_err(|e| EngineError::UnsupportedFormat(format!("PDF parse failed: {}", e)))?;

        let mut text = String::new();
        let mut pages = Vec::new();
        for (i, page_text) in raw.split('\u{c}').enumerate() {
            let cleaned = clean_text(page_text);
            if cleaned.trim().is_empty() {
                continue;
            }
            let start = text.len();
            text.push_str(&cleaned);
            text.push('\n');
            pages.push(PageSpan {
                page: i + 1,
                start,
                end: text.len(),
            });
        }
        Ok((text, pages))
    }
}

impl Default for DocumentLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn extract_docx(bytes: &[u8]) -> Result<String, EngineError> {
    let cursor = std::io::Cursor::new(bytes);
    let mut archive = zip::ZipArchive::new(cursor)
        .map_err(|e| EngineError::UnsupportedFormat(format!("not a DOCX container: {}", e)))?;

    let mut xml = String::new();
    archive
        .by_name("word/document.xml")
        .map_err(|e| EngineError::UnsupportedFormat(format!("DOCX missing document.xml: {}", e)))?
        .read_to_string(&mut xml)
        .map_err(|e| EngineError::UnsupportedFormat(format!("DOCX read failed: {}", e)))?;

    let mut reader = quick_xml::Reader::from_str(&xml);
    let mut text = String::new();
    let mut in_text_run = false;
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) if e.name().as_ref() == b"w:t" => in_text_run = true,
            Ok(Event::End(e)) => match e.name().as_ref() {
                b"w:t" => in_text_run = false,
                b"w:p" => text.push('\n'),
                _ => {}
            },
            Ok(Event::Text(t)) if in_text_run => {
                let run = t
                    .unescape()
                    .map_err(|e| EngineError::UnsupportedFormat(format!("DOCX text: {}", e)))?;
                text.push_str(&run);
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(EngineError::UnsupportedFormat(format!(
                    "DOCX XML parse failed: {}",
                    e
                )))
            }
            _ => {}
        }
    }
    Ok(text)
}

fn strip_html(content: &str) -> String {
    let fragment = Html::parse_document(content);
    fragment
        .root_element()
        .text()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Collapse whitespace, drop extractor artifacts and lines that are
/// mostly symbols (PDF extraction noise).
fn clean_text(text: &str) -> String {
    let text = ARTIFACTS.replace_all(text, "");

    let mut lines = Vec::new();
    for line in text.lines() {
        let collapsed = line.split_whitespace().collect::<Vec<_>>().join(" ");
        if collapsed.is_empty() {
            continue;
        }
        let alpha = collapsed.chars().filter(|c| c.is_alphabetic()).count();
        if alpha as f32 / collapsed.len() as f32 > 0.3 {
            lines.push(collapsed);
        }
    }
    lines.join("\n")
}

/// Upper-case short lines are taken as section headers; each section
/// runs until the next header.
fn detect_sections(text: &str) -> Vec<SectionSpan> {
    let mut sections: Vec<SectionSpan> = Vec::new();
    let mut offset = 0usize;
    for line in text.split_inclusive('\n') {
        let trimmed = line.trim();
        if is_section_header(trimmed) {
            sections.push(SectionSpan {
                title: trimmed.to_string(),
                start: offset,
                end: text.len(),
            });
        }
        offset += line.len();
    }
    for i in 0..sections.len().saturating_sub(1) {
        sections[i].end = sections[i + 1].start;
    }
    sections
}

fn is_section_header(line: &str) -> bool {
    if line.is_empty() || line.len() >= 100 {
        return false;
    }
    let has_alpha = line.chars().any(|c| c.is_alphabetic());
    let all_upper = line
        .chars()
        .filter(|c| c.is_alphabetic())
        .all(|c| c.is_uppercase());
    has_alpha && all_upper && (line.split_whitespace().count() <= 5 || line.ends_with(':'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_text_drops_symbol_lines_and_artifacts() {
        let raw = "Grace period is 30 days.\n%%%% ---- ####\n12 0 obj endobj\nMaternity is covered.";
        let cleaned = clean_text(raw);
        assert!(cleaned.contains("Grace period is 30 days."));
        assert!(cleaned.contains("Maternity is covered."));
        assert!(!cleaned.contains("obj"));
        assert!(!cleaned.contains("####"));
    }

    #[test]
    fn sections_cover_headed_regions() {
        let text = "PREAMBLE:\nsome intro text here\nCOVERAGE TERMS\nbody of the coverage section\n";
        let sections = detect_sections(text);
        assert_eq!(sections.len(), 2);
        assert_eq!(sections[0].title, "PREAMBLE:");
        assert_eq!(sections[0].end, sections[1].start);
        assert_eq!(sections[1].end, text.len());
    }

    #[test]
    fn short_extraction_is_an_empty_document() {
        let loader = DocumentLoader::new();
        let err = loader
            .load_bytes(b"tiny", DocumentFormat::Email, "inline")
            .unwrap_err();
        assert!(matches!(err, EngineError::EmptyDocument(_)));
    }

    #[test]
    fn email_bytes_are_stripped_of_markup() {
        let html = b"<html><body><p>The grace period for premium payment is thirty days from the due date as stated.</p></body></html>";
        let loader = DocumentLoader::new();
        let doc = loader
            .load_bytes(html, DocumentFormat::Email, "inline")
            .unwrap();
        assert!(doc.text.contains("grace period"));
        assert!(!doc.text.contains("<p>"));
        assert_eq!(doc.pages.len(), 1);
        assert_eq!(doc.fingerprint.len(), 32);
    }
}
