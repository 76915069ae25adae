//! Property tests for chunk boundaries.

use cite_rag::chunking::TextChunker;
use cite_rag::config::{ChunkingConfig, SplittingStrategy};
use cite_rag::document::{Chunk, Document};
use proptest::prelude::*;

/// Text built from short words joined by spaces, sentence ends and line breaks.
fn arb_text() -> impl Strategy<Value = String> {
    let separator = prop_oneof![
        4 => Just(" "),
        2 => Just(". "),
        1 => Just("! "),
        1 => Just("\n"),
        1 => Just("\n\n"),
        1 => Just("\n\n# Heading\n"),
    ];
    proptest::collection::vec(("[a-zé]{1,8}", separator), 0..150).prop_map(|parts| {
        parts.into_iter().map(|(word, sep)| format!("{word}{sep}")).collect::<String>()
    })
}

fn arb_config() -> impl Strategy<Value = ChunkingConfig> {
    (1usize..40, prop_oneof![Just(SplittingStrategy::SentenceAware), Just(SplittingStrategy::FixedWidth)])
        .prop_flat_map(|(max, strategy)| {
            (0..max).prop_map(move |overlap| ChunkingConfig {
                max_tokens_per_chunk: max,
                overlap_tokens: overlap,
                strategy,
            })
        })
}

fn chunks(text: &str, config: &ChunkingConfig) -> Vec<Chunk> {
    let document = Document::new("doc", text);
    TextChunker::new(config.clone()).unwrap().iter(&document).collect()
}

/// **Chunking determinism**
/// *For any* text and valid configuration, chunking twice SHALL produce the
/// same ids and boundaries.
mod prop_chunking_determinism {
    use super::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn same_input_same_chunks(text in arb_text(), config in arb_config()) {
            prop_assert_eq!(chunks(&text, &config), chunks(&text, &config));
        }
    }
}

/// **Chunk boundaries**
/// *For any* text and valid configuration, every chunk SHALL be the exact
/// document slice named by its offsets, hold at most `max_tokens_per_chunk`
/// tokens, start and end strictly after its predecessor (so no chunk contains
/// another), and leave no token uncovered.
mod prop_chunk_boundaries {
    use super::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        #[test]
        fn chunks_are_bounded_ordered_and_covering(text in arb_text(), config in arb_config()) {
            let chunks = chunks(&text, &config);

            if text.trim().is_empty() {
                prop_assert!(chunks.is_empty());
                return Ok(());
            }
            prop_assert!(!chunks.is_empty());

            for chunk in &chunks {
                prop_assert!(chunk.start_offset < chunk.end_offset);
                prop_assert_eq!(&text[chunk.start_offset..chunk.end_offset], chunk.text.as_str());
                prop_assert!(chunk.token_count() <= config.max_tokens_per_chunk);
                prop_assert_eq!(
                    &chunk.id,
                    &format!("doc:{}-{}", chunk.start_offset, chunk.end_offset)
                );
            }

            for pair in chunks.windows(2) {
                prop_assert!(pair[1].start_offset > pair[0].start_offset);
                prop_assert!(pair[1].end_offset > pair[0].end_offset);
                if pair[1].start_offset > pair[0].end_offset {
                    prop_assert!(text[pair[0].end_offset..pair[1].start_offset].trim().is_empty());
                }
            }

            let first = &chunks[0];
            let last = &chunks[chunks.len() - 1];
            prop_assert!(text[..first.start_offset].trim().is_empty());
            prop_assert!(text[last.end_offset..].trim().is_empty());
        }
    }
}

#[test]
fn overlap_repeats_trailing_sentence() {
    let config = ChunkingConfig {
        max_tokens_per_chunk: 6,
        overlap_tokens: 3,
        strategy: SplittingStrategy::SentenceAware,
    };
    let chunks = chunks("One two three. Four five. Six seven eight.", &config);
    let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
    assert_eq!(texts, vec!["One two three. Four five.", "Four five. Six seven eight."]);
}
