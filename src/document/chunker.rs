use uuid::Uuid;

use crate::error::EngineError;
use crate::types::{Chunk, Document};

/// How far back from a hard cut we look for a sentence boundary.
const BOUNDARY_LOOKBACK: usize = 100;

/// Splits document text into an ordered, overlapping sequence of chunks.
/// Consecutive chunks share `overlap` characters so no fact is stranded
/// on a cut line; sentence boundaries are preferred over hard cuts.
pub struct Chunker {
    chunk_size: usize,
    overlap: usize,
}

impl Chunker {
    pub fn new(chunk_size: usize, overlap: usize) -> Self {
        Self {
            chunk_size,
            overlap,
        }
    }

    pub fn chunk(&self, doc: &Document) -> Result<Vec<Chunk>, EngineError> {
        let text = &doc.text;
        if text.trim().is_empty() {
            return Err(EngineError::EmptyDocument(format!(
                "no text to chunk in {}",
                doc.source
            )));
        }

        // Work in char positions; byte offsets are kept alongside so
        // slicing never lands inside a UTF-8 sequence.
        let mut byte_offsets: Vec<usize> = Vec::with_capacity(text.len());
        let mut chars: Vec<char> = Vec::with_capacity(text.len());
        for (b, c) in text.char_indices() {
            byte_offsets.push(b);
            chars.push(c);
        }
        let total = chars.len();

        let mut chunks = Vec::new();
        let mut start = 0usize;
        while start < total {
            let mut end = (start + self.chunk_size).min(total);
            if end < total {
                let floor = (start + 1).max(end.saturating_sub(BOUNDARY_LOOKBACK));
                for i in (floor..end).rev() {
                    if matches!(chars[i], '.' | '!' | '?') {
                        // A boundary inside the overlap region would stall
                        // progress; keep the hard cut in that case.
                        if i + 1 > start + self.overlap {
                            end = i + 1;
                        }
                        break;
                    }
                }
            }

            let byte_start = byte_offsets[start];
            let byte_end = if end == total {
                text.len()
            } else {
                byte_offsets[end]
            };
            let slice = &text[byte_start..byte_end];
            if !slice.trim().is_empty() {
                let seq = chunks.len();
                chunks.push(Chunk {
                    id: Uuid::new_v4().to_string(),
                    text: slice.to_string(),
                    start: byte_start,
                    end: byte_end,
                    seq,
                    page: page_at(doc, byte_start),
                    section: section_at(doc, byte_start),
                });
            }

            // Step back by the overlap but always make progress.
            start = (start + 1).max(end.saturating_sub(self.overlap));
        }

        if chunks.is_empty() {
            return Err(EngineError::EmptyDocument(format!(
                "chunking produced nothing for {}",
                doc.source
            )));
        }

        log::info!("Chunked {} into {} chunks", doc.source, chunks.len());
        Ok(chunks)
    }
}

fn page_at(doc: &Document, offset: usize) -> Option<usize> {
    doc.pages
        .iter()
        .find(|p| offset >= p.start && offset < p.end)
        .map(|p| p.page)
}

fn section_at(doc: &Document, offset: usize) -> Option<String> {
    doc.sections
        .iter()
        .find(|s| offset >= s.start && offset < s.end)
        .map(|s| s.title.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DocumentFormat, PageSpan};

    fn make_doc(text: &str) -> Document {
        Document {
            source: "test".into(),
            format: DocumentFormat::Email,
            text: text.into(),
            sections: Vec::new(),
            pages: vec![PageSpan {
                page: 1,
                start: 0,
                end: text.len(),
            }],
            fingerprint: "00".into(),
        }
    }

    #[test]
    fn chunks_cover_text_with_no_gaps() {
        let text = "Grace period is 30 days. Maternity is covered under section 3.2.";
        let chunks = Chunker::new(40, 10).chunk(&make_doc(text)).unwrap();
        assert!(chunks.len() >= 2);

        // Contiguous, overlap-bounded cover: each chunk starts at or
        // before the previous chunk's end.
        assert_eq!(chunks[0].start, 0);
        for pair in chunks.windows(2) {
            assert!(pair[1].start <= pair[0].end);
        }
        assert_eq!(chunks.last().unwrap().end, text.len());
    }

    #[test]
    fn prefers_sentence_boundaries() {
        let text = "First sentence ends here. Second sentence is a bit longer and ends here too. Third one.";
        let chunks = Chunker::new(50, 5).chunk(&make_doc(text)).unwrap();
        assert!(chunks[0].text.trim().ends_with('.'));
    }

    #[test]
    fn sequence_indices_are_ordered() {
        let text = "One. Two. Three. Four. Five. Six. Seven. Eight. Nine. Ten.";
        let chunks = Chunker::new(20, 5).chunk(&make_doc(text)).unwrap();
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.seq, i);
        }
    }

    #[test]
    fn empty_text_is_rejected() {
        let err = Chunker::new(40, 10).chunk(&make_doc("   ")).unwrap_err();
        assert!(matches!(err, EngineError::EmptyDocument(_)));
    }

    #[test]
    fn handles_multibyte_text_without_panicking() {
        let text = "Versicherungsschutz für Mutterschaft gilt. Die Frist beträgt dreißig Tage. Weitere Konditionen folgen später.";
        let chunks = Chunker::new(30, 8).chunk(&make_doc(text)).unwrap();
        assert!(chunks.len() >= 2);
        for chunk in &chunks {
            assert_eq!(&text[chunk.start..chunk.end], chunk.text);
        }
    }
}
