use async_trait::async_trait;

use super::VectorIndex;
use crate::error::EngineError;
use crate::types::{Chunk, RetrievedPassage};

/// Brute-force cosine index over a single document's chunk vectors.
/// Built once per request and never mutated afterwards.
#[derive(Debug)]
pub struct InMemoryIndex {
    entries: Vec<(Chunk, Vec<f32>)>,
}

impl InMemoryIndex {
    pub fn build(chunks: Vec<Chunk>, vectors: Vec<Vec<f32>>) -> Result<Self, EngineError> {
        if chunks.len() != vectors.len() {
            return Err(EngineError::IndexUnavailable(format!(
                "{} chunks but {} vectors",
                chunks.len(),
                vectors.len()
            )));
        }
        if chunks.is_empty() {
            return Err(EngineError::IndexUnavailable("no vectors to index".into()));
        }
        log::info!("Built in-memory index over {} vectors", chunks.len());
        Ok(Self {
            entries: chunks.into_iter().zip(vectors).collect(),
        })
    }
}

#[async_trait]
impl VectorIndex for InMemoryIndex {
    async fn search(&self, query: &[f32], k: usize) -> Result<Vec<RetrievedPassage>, EngineError> {
        let mut scored: Vec<RetrievedPassage> = self
            .entries
            .iter()
            .map(|(chunk, vector)| RetrievedPassage {
                chunk: chunk.clone(),
                score: cosine(query, vector),
            })
            .collect();

        // Descending score; ties go to the earliest chunk in the document.
        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.chunk.seq.cmp(&b.chunk.seq))
        });
        scored.truncate(k);
        Ok(scored)
    }
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(seq: usize) -> Chunk {
        Chunk {
            id: format!("c{}", seq),
            text: format!("chunk {}", seq),
            start: seq * 10,
            end: seq * 10 + 10,
            seq,
            page: None,
            section: None,
        }
    }

    #[tokio::test]
    async fn identical_vector_ranks_first_with_unit_similarity() {
        let index = InMemoryIndex::build(
            vec![chunk(0), chunk(1), chunk(2)],
            vec![
                vec![1.0, 0.0, 0.0],
                vec![0.0, 1.0, 0.0],
                vec![0.7, 0.7, 0.0],
            ],
        )
        .unwrap();

        let results = index.search(&[0.0, 1.0, 0.0], 3).await.unwrap();
        assert_eq!(results[0].chunk.seq, 1);
        assert!((results[0].score - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn results_are_sorted_descending() {
        let index = InMemoryIndex::build(
            vec![chunk(0), chunk(1), chunk(2)],
            vec![
                vec![0.2, 0.8],
                vec![0.9, 0.1],
                vec![0.5, 0.5],
            ],
        )
        .unwrap();

        let results = index.search(&[1.0, 0.0], 3).await.unwrap();
        for pair in results.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
    }

    #[tokio::test]
    async fn ties_break_on_earliest_sequence_index() {
        let index = InMemoryIndex::build(
            vec![chunk(3), chunk(1)],
            vec![vec![1.0, 0.0], vec![1.0, 0.0]],
        )
        .unwrap();

        let results = index.search(&[1.0, 0.0], 2).await.unwrap();
        assert_eq!(results[0].chunk.seq, 1);
        assert_eq!(results[1].chunk.seq, 3);
    }

    #[test]
    fn mismatched_lengths_rejected() {
        let err = InMemoryIndex::build(vec![chunk(0)], vec![]).unwrap_err();
        assert!(matches!(err, EngineError::IndexUnavailable(_)));
    }
}
