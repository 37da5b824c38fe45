use std::sync::Arc;

use serde_json::Value;

use crate::context::AssembledContext;
use crate::error::EngineError;
use crate::providers::{CompletionProvider, RateLimiter};
use crate::types::{AnswerRecord, RetrievedPassage, SourceCitation};

const EXCERPT_LEN: usize = 200;

/// When the embedder ran in degraded hashing mode, retrieval quality is
/// suspect; answers are capped at this confidence no matter what the
/// model reports.
const DEGRADED_CONFIDENCE_CAP: f32 = 0.5;

#[derive(Debug)]
struct ParsedAnswer {
    answer: String,
    explanation: String,
    confidence: Option<f32>,
    sources: Vec<String>,
}

/// Turns an assembled context and a question into one AnswerRecord by
/// prompting the model for structured JSON and validating what comes
/// back. One retry with a stricter instruction on malformed output.
pub struct AnswerSynthesizer {
    provider: Arc<dyn CompletionProvider>,
    limiter: Arc<RateLimiter>,
}

impl AnswerSynthesizer {
    pub fn new(provider: Arc<dyn CompletionProvider>, limiter: Arc<RateLimiter>) -> Self {
        Self { provider, limiter }
    }

    pub async fn synthesize(
        &self,
        question: &str,
        context: &AssembledContext,
        degraded: bool,
    ) -> Result<AnswerRecord, EngineError> {
        if context.included.is_empty() {
            return Err(EngineError::NoRelevantContext);
        }

        let prompt = build_prompt(question, &context.text);
        self.limiter.acquire().await?;
        let raw = self.provider.complete(&prompt).await?;

        let parsed = match parse_answer(&raw) {
            Ok(parsed) => parsed,
            Err(first_err) => {
                log::warn!(
                    "Malformed model output ({}); retrying with strict format instruction",
                    first_err
                );
                let strict = format!(
                    "{}\n\nYour previous reply was not valid JSON. Return ONLY a single \
                     valid JSON object with double-quoted keys and no markdown fences.",
                    prompt
                );
                self.limiter.acquire().await?;
                let raw = self.provider.complete(&strict).await?;
                parse_answer(&raw)?
            }
        };

        Ok(build_record(question, parsed, &context.included, degraded))
    }

    pub fn model_info(&self) -> String {
        self.provider.model_info()
    }
}

fn build_prompt(question: &str, context: &str) -> String {
    format!(
        "You are an expert document analyst. Answer the question using ONLY the \
         context passages below, extracted from a policy document.\n\n\
         CONTEXT PASSAGES:\n{context}\n\
         QUESTION:\n{question}\n\n\
         Respond with a single JSON object in exactly this shape:\n\
         {{\"answer\": \"...\", \"explanation\": \"...\", \"confidence\": 0.0, \"sources\": [\"P1\"]}}\n\n\
         - \"answer\": clear and concise, based only on the context passages\n\
         - \"explanation\": the reasoning linking the cited passages to the answer\n\
         - \"confidence\": your confidence in the answer, between 0 and 1\n\
         - \"sources\": labels of the context passages you actually used\n\
         - If the context does not contain the information, say so in \"answer\" and \
         report a low confidence\n\
         Return ONLY the JSON object, no additional text."
    )
}

fn parse_answer(raw: &str) -> Result<ParsedAnswer, EngineError> {
    let cleaned = strip_fences(raw);
    let json_slice = extract_json_object(cleaned)
        .ok_or_else(|| EngineError::SynthesisFormat("no JSON object in model output".into()))?;
    let value: Value = serde_json::from_str(json_slice)
        .map_err(|e| EngineError::SynthesisFormat(format!("invalid JSON: {}", e)))?;

    let answer = value
        .get("answer")
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| EngineError::SynthesisFormat("missing or empty \"answer\" field".into()))?;

    let explanation = value
        .get("explanation")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .trim()
        .to_string();

    // Lenient on confidence: accept a number or a numeric string.
    let confidence = match value.get("confidence") {
        Some(Value::Number(n)) => n.as_f64().map(|c| c as f32),
        Some(Value::String(s)) => s.trim().parse::<f32>().ok(),
        _ => None,
    };

    let sources = value
        .get("sources")
        .and_then(|v| v.as_array())
        .map(|labels| {
            labels
                .iter()
                .filter_map(|l| l.as_str())
                .map(|s| s.trim().to_string())
                .collect()
        })
        .unwrap_or_default();

    Ok(ParsedAnswer {
        answer,
        explanation,
        confidence,
        sources,
    })
}

fn strip_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let trimmed = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    trimmed.strip_suffix("```").unwrap_or(trimmed).trim()
}

fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end > start {
        Some(&text[start..=end])
    } else {
        None
    }
}

fn build_record(
    question: &str,
    parsed: ParsedAnswer,
    included: &[RetrievedPassage],
    degraded: bool,
) -> AnswerRecord {
    // "P3" -> included[2]; labels the model invented are dropped.
    let mut cited: Vec<&RetrievedPassage> = parsed
        .sources
        .iter()
        .filter_map(|label| {
            label
                .strip_prefix('P')
                .and_then(|n| n.parse::<usize>().ok())
                .and_then(|n| n.checked_sub(1))
                .and_then(|i| included.get(i))
        })
        .collect();
    if cited.is_empty() {
        cited = included.iter().collect();
    }

    let retrieval_floor = cited
        .iter()
        .map(|p| p.score)
        .fold(0.0_f32, f32::max);
    let confidence = resolve_confidence(parsed.confidence, retrieval_floor, degraded);

    let sources = cited
        .iter()
        .map(|p| SourceCitation {
            excerpt: truncate(&p.chunk.text, EXCERPT_LEN),
            page: p.chunk.page,
            section: p.chunk.section.clone(),
            chunk_seq: p.chunk.seq,
            relevance: p.score,
        })
        .collect();

    let explanation = if degraded && !parsed.explanation.is_empty() {
        format!(
            "{} (Note: retrieval ran in degraded embedding mode; confidence capped.)",
            parsed.explanation
        )
    } else if degraded {
        "Retrieval ran in degraded embedding mode; confidence capped.".to_string()
    } else {
        parsed.explanation
    };

    AnswerRecord {
        question: question.to_string(),
        answer: parsed.answer,
        explanation,
        confidence,
        sources,
    }
}

/// Combination rule: a model-reported confidence in range wins; the
/// maximum retrieval similarity among cited passages is only a floor
/// when the model omits its own estimate. Degraded embeddings cap the
/// result regardless of source.
fn resolve_confidence(model: Option<f32>, retrieval_floor: f32, degraded: bool) -> f32 {
    let mut confidence = match model {
        Some(c) if (0.0..=1.0).contains(&c) => c,
        _ => retrieval_floor,
    };
    if degraded {
        confidence = confidence.min(DEGRADED_CONFIDENCE_CAP);
    }
    confidence.clamp(0.0, 1.0)
}

fn truncate(text: &str, max_len: usize) -> String {
    let text = text.trim();
    if text.len() <= max_len {
        return text.to_string();
    }
    let mut cut = max_len;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}...", &text[..cut])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Chunk;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn passage(seq: usize, text: &str, score: f32) -> RetrievedPassage {
        RetrievedPassage {
            chunk: Chunk {
                id: format!("c{}", seq),
                text: text.to_string(),
                start: 0,
                end: text.len(),
                seq,
                page: Some(1),
                section: None,
            },
            score,
        }
    }

    fn context(passages: Vec<RetrievedPassage>) -> AssembledContext {
        AssembledContext {
            text: passages
                .iter()
                .enumerate()
                .map(|(i, p)| format!("[P{}]\n{}\n\n", i + 1, p.chunk.text))
                .collect(),
            included: passages,
        }
    }

    struct ScriptedProvider {
        replies: Vec<String>,
        calls: AtomicUsize,
    }

    impl ScriptedProvider {
        fn new(replies: Vec<&str>) -> Self {
            Self {
                replies: replies.into_iter().map(String::from).collect(),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl CompletionProvider for ScriptedProvider {
        async fn complete(&self, _prompt: &str) -> Result<String, EngineError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.replies[n.min(self.replies.len() - 1)].clone())
        }

        fn model_info(&self) -> String {
            "scripted".into()
        }
    }

    fn limiter() -> Arc<RateLimiter> {
        Arc::new(RateLimiter::new(
            100,
            Duration::from_secs(60),
            Duration::from_secs(1),
        ))
    }

    #[test]
    fn parses_fenced_json() {
        let raw = "```json\n{\"answer\": \"30 days\", \"explanation\": \"stated\", \"confidence\": 0.9, \"sources\": [\"P1\"]}\n```";
        let parsed = parse_answer(raw).unwrap();
        assert_eq!(parsed.answer, "30 days");
        assert_eq!(parsed.confidence, Some(0.9));
        assert_eq!(parsed.sources, vec!["P1"]);
    }

    #[test]
    fn parses_json_embedded_in_prose() {
        let raw = "Here is my answer:\n{\"answer\": \"Covered\", \"confidence\": \"0.7\"}\nHope that helps.";
        let parsed = parse_answer(raw).unwrap();
        assert_eq!(parsed.answer, "Covered");
        assert_eq!(parsed.confidence, Some(0.7));
    }

    #[test]
    fn missing_answer_field_is_a_format_error() {
        let err = parse_answer("{\"confidence\": 0.8}").unwrap_err();
        assert!(matches!(err, EngineError::SynthesisFormat(_)));
    }

    #[test]
    fn model_confidence_wins_when_present() {
        assert_eq!(resolve_confidence(Some(0.9), 0.4, false), 0.9);
    }

    #[test]
    fn retrieval_floor_used_when_model_omits_confidence() {
        assert_eq!(resolve_confidence(None, 0.62, false), 0.62);
        // Out-of-range values are treated as absent.
        assert_eq!(resolve_confidence(Some(3.0), 0.62, false), 0.62);
    }

    #[test]
    fn degraded_mode_caps_confidence() {
        assert_eq!(resolve_confidence(Some(0.95), 0.9, true), 0.5);
        assert!(resolve_confidence(None, 0.3, true) <= 0.5);
    }

    #[tokio::test]
    async fn retries_once_then_succeeds() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            "not json at all",
            "{\"answer\": \"Grace period is 30 days\", \"explanation\": \"P1 states it\", \"confidence\": 0.8, \"sources\": [\"P1\"]}",
        ]));
        let synthesizer = AnswerSynthesizer::new(provider.clone(), limiter());
        let ctx = context(vec![passage(0, "Grace period is 30 days.", 0.83)]);
        let record = synthesizer
            .synthesize("What is the grace period?", &ctx, false)
            .await
            .unwrap();
        assert_eq!(record.answer, "Grace period is 30 days");
        assert_eq!(record.confidence, 0.8);
        assert_eq!(record.sources.len(), 1);
        assert_eq!(record.sources[0].chunk_seq, 0);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn persistent_malformed_output_fails_with_format_error() {
        let provider = Arc::new(ScriptedProvider::new(vec!["garbage", "more garbage"]));
        let synthesizer = AnswerSynthesizer::new(provider, limiter());
        let ctx = context(vec![passage(0, "text", 0.5)]);
        let err = synthesizer.synthesize("q", &ctx, false).await.unwrap_err();
        assert!(matches!(err, EngineError::SynthesisFormat(_)));
    }

    #[tokio::test]
    async fn uncited_answer_falls_back_to_all_included_passages() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            "{\"answer\": \"Yes\", \"sources\": [\"P9\"]}",
        ]));
        let synthesizer = AnswerSynthesizer::new(provider, limiter());
        let ctx = context(vec![passage(0, "alpha", 0.6), passage(1, "beta", 0.4)]);
        let record = synthesizer.synthesize("q", &ctx, false).await.unwrap();
        // Invalid label dropped; citation falls back to everything included.
        assert_eq!(record.sources.len(), 2);
        // No model confidence: floor at max cited similarity.
        assert!((record.confidence - 0.6).abs() < 1e-6);
    }

    #[tokio::test]
    async fn empty_context_is_rejected() {
        let provider = Arc::new(ScriptedProvider::new(vec!["{\"answer\": \"x\"}"]));
        let synthesizer = AnswerSynthesizer::new(provider, limiter());
        let ctx = AssembledContext {
            text: String::new(),
            included: Vec::new(),
        };
        let err = synthesizer.synthesize("q", &ctx, false).await.unwrap_err();
        assert!(matches!(err, EngineError::NoRelevantContext));
    }
}
