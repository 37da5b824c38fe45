use serde::{Deserialize, Serialize};
use validator::Validate;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentFormat {
    Pdf,
    Docx,
    Email,
}

impl DocumentFormat {
    /// Guess the format from the URL path; anything without a known
    /// extension is treated as email/plain text, matching how such
    /// documents usually arrive.
    pub fn from_url(url: &str) -> Self {
        let path = url.split('?').next().unwrap_or(url).to_lowercase();
        if path.ends_with(".pdf") {
            DocumentFormat::Pdf
        } else if path.ends_with(".docx") || path.ends_with(".doc") {
            DocumentFormat::Docx
        } else {
            DocumentFormat::Email
        }
    }
}

/// A section heading span detected in the extracted text, byte offsets
/// into `Document::text`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SectionSpan {
    pub title: String,
    pub start: usize,
    pub end: usize,
}

/// A page span in the extracted text, byte offsets into `Document::text`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageSpan {
    pub page: usize,
    pub start: usize,
    pub end: usize,
}

/// An ingested document. Immutable after extraction; lives for the
/// duration of one request (the index cache keys on `fingerprint`, not on
/// the document itself).
#[derive(Debug, Clone)]
pub struct Document {
    pub source: String,
    pub format: DocumentFormat,
    pub text: String,
    pub sections: Vec<SectionSpan>,
    pub pages: Vec<PageSpan>,
    /// md5 of the raw document bytes, hex-encoded.
    pub fingerprint: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub text: String,
    /// Byte offsets into the source document text.
    pub start: usize,
    pub end: usize,
    /// Position in the chunk sequence, used for tie-breaking at retrieval.
    pub seq: usize,
    pub page: Option<usize>,
    pub section: Option<String>,
}

/// A chunk scored against one query. Ephemeral, produced per question.
#[derive(Debug, Clone)]
pub struct RetrievedPassage {
    pub chunk: Chunk,
    pub score: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceCitation {
    pub excerpt: String,
    pub page: Option<usize>,
    pub section: Option<String>,
    pub chunk_seq: usize,
    pub relevance: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerRecord {
    pub question: String,
    pub answer: String,
    pub explanation: String,
    pub confidence: f32,
    pub sources: Vec<SourceCitation>,
}

impl AnswerRecord {
    /// Placeholder produced when a single question fails; the batch still
    /// returns one record per question.
    pub fn placeholder(question: &str, answer: &str, explanation: String) -> Self {
        Self {
            question: question.to_string(),
            answer: answer.to_string(),
            explanation,
            confidence: 0.0,
            sources: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct QueryRequest {
    /// URL of the document blob to answer against.
    #[validate(length(min = 1))]
    pub documents: String,
    #[validate(length(min = 1, max = 100))]
    pub questions: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryResponse {
    pub answers: Vec<AnswerRecord>,
}
