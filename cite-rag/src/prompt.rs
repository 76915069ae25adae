//! Prompt construction for grounded answers.

use std::fmt::Write;

use crate::config::GenerationConfig;
use crate::document::RetrievedChunk;
use crate::generation::{GenerationRequest, Passage};
use crate::generator::INSUFFICIENT_EVIDENCE_ANSWER;

/// Instructions sent as the system message.
pub fn system_prompt() -> String {
    format!(
        "You are a grounded knowledge assistant. Answer the user's question using ONLY the \
         numbered passages provided.\n\n\
         Rules:\n\
         1. Every sentence of your answer must cite the passage that supports it, using its \
         number in square brackets, e.g. [1] or [1, 3].\n\
         2. Only cite passage numbers that appear in the context.\n\
         3. If the passages do not contain the answer, reply exactly: \"{INSUFFICIENT_EVIDENCE_ANSWER}\"\n\
         4. Do not make up information.\n\
         5. Be concise and direct."
    )
}

/// Tag retrieved chunks `[1]..[n]` in rank order.
pub fn passages(retrieved: &[RetrievedChunk]) -> Vec<Passage> {
    retrieved
        .iter()
        .enumerate()
        .map(|(i, r)| Passage {
            marker: i + 1,
            chunk_id: r.chunk.id.clone(),
            source: r.chunk.source().unwrap_or(&r.chunk.document_id).to_string(),
            text: r.chunk.text.clone(),
        })
        .collect()
}

/// Render passages and the question as the user message.
pub fn user_prompt(question: &str, passages: &[Passage]) -> String {
    let mut prompt = String::from("Context:\n");
    for passage in passages {
        let _ = writeln!(
            prompt,
            "[{}] (source: {})\n{}\n",
            passage.marker, passage.source, passage.text
        );
    }
    let _ = write!(prompt, "Question: {question}");
    prompt
}

/// Build the full generation request for `question` over `retrieved`.
pub fn build_request(
    question: &str,
    retrieved: &[RetrievedChunk],
    config: &GenerationConfig,
) -> GenerationRequest {
    let passages = passages(retrieved);
    GenerationRequest {
        system: system_prompt(),
        prompt: user_prompt(question, &passages),
        question: question.to_string(),
        passages,
        temperature: config.temperature,
        max_output_tokens: config.max_output_tokens,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Chunk;

    #[test]
    fn passages_are_numbered_in_rank_order() {
        let retrieved: Vec<RetrievedChunk> = ["a:0-5", "b:0-5"]
            .iter()
            .enumerate()
            .map(|(i, id)| RetrievedChunk {
                chunk: Chunk {
                    id: id.to_string(),
                    document_id: id[..1].to_string(),
                    text: format!("text {i}"),
                    start_offset: 0,
                    end_offset: 5,
                    embedding: None,
                    truncated: false,
                    metadata: Default::default(),
                },
                score: 1.0 - i as f32,
                rank: i + 1,
            })
            .collect();
        let request = build_request("Why?", &retrieved, &GenerationConfig::default());
        assert_eq!(request.passages[1].marker, 2);
        assert_eq!(request.passages[1].chunk_id, "b:0-5");
        assert!(request.prompt.contains("[1] (source: a)\ntext 0"));
        assert!(request.prompt.ends_with("Question: Why?"));
        assert!(request.system.contains(INSUFFICIENT_EVIDENCE_ANSWER));
    }
}
