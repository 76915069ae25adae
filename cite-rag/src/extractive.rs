//! Offline generation provider that answers by quoting passages.

use async_trait::async_trait;
use cite_telemetry::TokenUsage;

use crate::citation::split_sentences;
use crate::error::ProviderError;
use crate::generation::{GenerationOutput, GenerationProvider, GenerationRequest, Passage};
use crate::generator::INSUFFICIENT_EVIDENCE_ANSWER;
use crate::text;

/// Default number of passages quoted in one answer.
pub const DEFAULT_MAX_SENTENCES: usize = 3;

/// A [`GenerationProvider`] that needs no model.
///
/// For each passage it picks the sentence sharing the most content terms
/// with the question and cites it with the passage number. Passages with no
/// shared term are skipped; when none match it declines to answer.
///
/// # Example
///
/// ```rust,ignore
/// use cite_rag::ExtractiveGenerator;
///
/// let provider = ExtractiveGenerator::new();
/// let output = provider.generate(&request).await?;
/// // "Paris is the capital of France. [1]"
/// ```
#[derive(Debug, Clone)]
pub struct ExtractiveGenerator {
    max_sentences: usize,
}

impl ExtractiveGenerator {
    /// Create a provider quoting at most [`DEFAULT_MAX_SENTENCES`] passages.
    pub fn new() -> Self {
        Self { max_sentences: DEFAULT_MAX_SENTENCES }
    }

    /// Quote at most `max` passages.
    pub fn with_max_sentences(mut self, max: usize) -> Self {
        self.max_sentences = max.max(1);
        self
    }

    /// The best sentence of `passage` and its number of shared terms.
    fn best_sentence(question_terms: &[String], passage: &Passage) -> Option<(usize, String)> {
        split_sentences(&passage.text)
            .into_iter()
            .map(|range| passage.text[range].trim().to_string())
            .map(|sentence| {
                let terms = text::term_set(&sentence);
                let overlap = question_terms.iter().filter(|t| terms.contains(*t)).count();
                (overlap, sentence)
            })
            .filter(|(overlap, _)| *overlap > 0)
            .reduce(|best, next| if next.0 > best.0 { next } else { best })
    }
}

impl Default for ExtractiveGenerator {
    fn default() -> Self {
        Self::new()
    }
}

fn quote(sentence: &str, marker: usize) -> String {
    let mut sentence = sentence.replace('[', "(").replace(']', ")").replace('\n', " ");
    if !sentence.ends_with(['.', '!', '?']) {
        sentence.push('.');
    }
    format!("{sentence} [{marker}]")
}

#[async_trait]
impl GenerationProvider for ExtractiveGenerator {
    async fn generate(
        &self,
        request: &GenerationRequest,
    ) -> std::result::Result<GenerationOutput, ProviderError> {
        let question_terms: Vec<String> = text::term_set(&request.question).into_iter().collect();
        let mut picks: Vec<(usize, usize, String)> = request
            .passages
            .iter()
            .filter_map(|p| {
                Self::best_sentence(&question_terms, p).map(|(n, s)| (n, p.marker, s))
            })
            .collect();
        // Most shared terms first, then passage order.
        picks.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));
        picks.truncate(self.max_sentences);
        picks.sort_by_key(|p| p.1);

        let text = if picks.is_empty() {
            INSUFFICIENT_EVIDENCE_ANSWER.to_string()
        } else {
            picks.iter().map(|(_, marker, s)| quote(s, *marker)).collect::<Vec<_>>().join(" ")
        };
        let usage = TokenUsage {
            prompt_tokens: (request.system.split_whitespace().count()
                + request.prompt.split_whitespace().count()) as u32,
            completion_tokens: text.split_whitespace().count() as u32,
        };
        Ok(GenerationOutput { text, usage: Some(usage) })
    }

    fn name(&self) -> &str {
        "extractive"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(question: &str, passages: &[&str]) -> GenerationRequest {
        GenerationRequest {
            system: String::new(),
            prompt: String::new(),
            question: question.into(),
            passages: passages
                .iter()
                .enumerate()
                .map(|(i, text)| Passage {
                    marker: i + 1,
                    chunk_id: format!("c{i}"),
                    source: "s".into(),
                    text: text.to_string(),
                })
                .collect(),
            temperature: 0.0,
            max_output_tokens: None,
        }
    }

    #[tokio::test]
    async fn quotes_best_sentence_with_marker() {
        let output = ExtractiveGenerator::new()
            .generate(&request(
                "What is the capital of France?",
                &["France is in Europe. Paris is the capital of France. It has museums.", "Tokyo is big."],
            ))
            .await
            .unwrap();
        assert_eq!(output.text, "Paris is the capital of France. [1]");
    }

    #[tokio::test]
    async fn declines_without_shared_terms() {
        let output = ExtractiveGenerator::new()
            .generate(&request("Who painted the Mona Lisa?", &["Tokyo is big."]))
            .await
            .unwrap();
        assert_eq!(output.text, INSUFFICIENT_EVIDENCE_ANSWER);
    }

    #[tokio::test]
    async fn neutralises_brackets_in_quotes() {
        let output = ExtractiveGenerator::new()
            .generate(&request("mercury boiling point", &["Mercury boils at 357 C [ref 4]"]))
            .await
            .unwrap();
        assert_eq!(output.text, "Mercury boils at 357 C (ref 4). [1]");
    }
}
