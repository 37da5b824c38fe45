use crate::types::RetrievedPassage;

/// A prompt-ready context plus the exact passages it contains, in
/// inclusion order. Labels `P1..Pn` match the order of `included` and
/// are what the model is asked to cite.
pub struct AssembledContext {
    pub text: String,
    pub included: Vec<RetrievedPassage>,
}

/// Packs retrieved passages into a character budget, best passage first.
/// A passage that does not fit is skipped whole; the assembler never
/// truncates one mid-sentence to squeeze it in.
pub struct ContextAssembler {
    budget: usize,
}

impl ContextAssembler {
    pub fn new(budget: usize) -> Self {
        Self { budget }
    }

    pub fn assemble(&self, passages: &[RetrievedPassage]) -> AssembledContext {
        let mut text = String::new();
        let mut included = Vec::new();

        for passage in passages {
            let label = format!("P{}", included.len() + 1);
            let block = format_passage(&label, passage);
            if text.len() + block.len() > self.budget {
                log::debug!(
                    "Skipping passage seq={} ({} chars would exceed budget {})",
                    passage.chunk.seq,
                    block.len(),
                    self.budget
                );
                continue;
            }
            text.push_str(&block);
            included.push(passage.clone());
        }

        AssembledContext { text, included }
    }
}

fn format_passage(label: &str, passage: &RetrievedPassage) -> String {
    let mut header = format!("[{}]", label);
    if let Some(page) = passage.chunk.page {
        header.push_str(&format!(" page {}", page));
    }
    if let Some(section) = &passage.chunk.section {
        header.push_str(&format!(" section \"{}\"", section));
    }
    header.push_str(&format!(" relevance {:.2}", passage.score));
    format!("{}\n{}\n\n", header, passage.chunk.text.trim())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Chunk;

    fn passage(seq: usize, text: &str, score: f32) -> RetrievedPassage {
        RetrievedPassage {
            chunk: Chunk {
                id: format!("c{}", seq),
                text: text.to_string(),
                start: 0,
                end: text.len(),
                seq,
                page: Some(seq + 1),
                section: Some("TERMS".into()),
            },
            score,
        }
    }

    #[test]
    fn never_exceeds_budget() {
        let passages = vec![
            passage(0, &"a".repeat(300), 0.9),
            passage(1, &"b".repeat(300), 0.8),
            passage(2, &"c".repeat(300), 0.7),
        ];
        let ctx = ContextAssembler::new(500).assemble(&passages);
        assert!(ctx.text.len() <= 500);
        assert_eq!(ctx.included.len(), 1);
    }

    #[test]
    fn skips_oversized_passage_but_keeps_later_fit() {
        let passages = vec![
            passage(0, &"a".repeat(2000), 0.9),
            passage(1, "short passage that fits fine", 0.8),
        ];
        let ctx = ContextAssembler::new(200).assemble(&passages);
        assert_eq!(ctx.included.len(), 1);
        assert_eq!(ctx.included[0].chunk.seq, 1);
        assert!(ctx.text.contains("short passage"));
        // The skipped passage is absent entirely, not partially included.
        assert!(!ctx.text.contains("aaaa"));
    }

    #[test]
    fn labels_track_inclusion_order_and_metadata_survives() {
        let passages = vec![passage(4, "first text", 0.9), passage(2, "second text", 0.8)];
        let ctx = ContextAssembler::new(1000).assemble(&passages);
        assert!(ctx.text.contains("[P1] page 5"));
        assert!(ctx.text.contains("[P2] page 3"));
        assert!(ctx.text.contains("section \"TERMS\""));
        assert_eq!(ctx.included[0].chunk.seq, 4);
    }

    #[test]
    fn empty_input_yields_empty_context() {
        let ctx = ContextAssembler::new(100).assemble(&[]);
        assert!(ctx.text.is_empty());
        assert!(ctx.included.is_empty());
    }
}
