//! Token-capped document chunking.
//!
//! A token is a maximal run of non-whitespace characters. The chunker packs
//! atomic units (sentences, or single tokens for [`SplittingStrategy::FixedWidth`])
//! greedily up to `max_tokens_per_chunk`, then restarts a few whole units
//! back so consecutive chunks share up to `overlap_tokens` tokens.
//!
//! A sentence longer than the cap is cut into windows of `max_tokens_per_chunk`
//! tokens stepping by `max_tokens_per_chunk - overlap_tokens`; those chunks are
//! flagged [`Chunk::truncated`].
//!
//! Chunk ids are `{document_id}:{start}-{end}` over byte offsets, so chunking
//! the same text with the same config always yields the same ids.

use std::sync::Arc;

use crate::config::{ChunkingConfig, SplittingStrategy};
use crate::document::{CHUNK_INDEX_KEY, Chunk, Document, SECTION_KEY, SOURCE_KEY, chunk_id};
use crate::error::Result;

/// A strategy for splitting documents into chunks.
///
/// Implementations produce [`Chunk`]s with text and metadata but no embeddings.
/// Embeddings are attached later by the embedder.
pub trait Chunker: Send + Sync {
    /// Split a document into chunks.
    ///
    /// Returns an empty `Vec` if the document has no non-whitespace text.
    fn chunk(&self, document: &Document) -> Vec<Chunk>;
}

/// Lazily chunk `document` with `config`.
///
/// # Errors
///
/// Returns [`RagError::ConfigError`](crate::RagError::ConfigError) when the
/// overlap is not below the token cap.
pub fn chunk<'a>(document: &'a Document, config: &ChunkingConfig) -> Result<ChunkIter<'a>> {
    Ok(TextChunker::new(config.clone())?.iter(document))
}

/// The chunker used by the ingestion pipeline.
///
/// # Example
///
/// ```rust,ignore
/// use cite_rag::{ChunkingConfig, Document, TextChunker};
///
/// let chunker = TextChunker::new(ChunkingConfig::default())?;
/// for chunk in chunker.iter(&document) {
///     println!("{} ({} tokens)", chunk.id, chunk.token_count());
/// }
/// ```
#[derive(Debug, Clone)]
pub struct TextChunker {
    config: ChunkingConfig,
}

impl TextChunker {
    /// Create a chunker after validating `config`.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`](crate::RagError::ConfigError) when
    /// `overlap_tokens >= max_tokens_per_chunk` or the cap is zero.
    pub fn new(config: ChunkingConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// The active configuration.
    pub fn config(&self) -> &ChunkingConfig {
        &self.config
    }

    /// Iterate over the chunks of `document` without materialising them all.
    pub fn iter<'a>(&self, document: &'a Document) -> ChunkIter<'a> {
        ChunkIter {
            document,
            layout: Arc::new(Layout::new(&document.text, self.config.strategy)),
            max_tokens: self.config.max_tokens_per_chunk,
            overlap: self.config.overlap_tokens,
            next_unit: 0,
            forced: None,
            chunk_index: 0,
        }
    }
}

impl Chunker for TextChunker {
    fn chunk(&self, document: &Document) -> Vec<Chunk> {
        self.iter(document).collect()
    }
}

/// A half-open range of token indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Span {
    start: usize,
    end: usize,
}

impl Span {
    fn len(self) -> usize {
        self.end - self.start
    }
}

/// Token offsets, unit boundaries and headings of one text.
#[derive(Debug)]
struct Layout {
    /// Byte range of every token.
    tokens: Vec<(usize, usize)>,
    units: Vec<Span>,
    /// Byte offset and title of every markdown heading, in order.
    headings: Vec<(usize, String)>,
}

impl Layout {
    fn new(text: &str, strategy: SplittingStrategy) -> Self {
        let tokens = tokenize(text);
        let units = match strategy {
            SplittingStrategy::SentenceAware => sentence_units(text, &tokens),
            SplittingStrategy::FixedWidth => {
                (0..tokens.len()).map(|i| Span { start: i, end: i + 1 }).collect()
            }
        };
        Self { tokens, units, headings: headings(text) }
    }

    fn section_at(&self, offset: usize) -> Option<&str> {
        let idx = self.headings.partition_point(|(start, _)| *start <= offset);
        idx.checked_sub(1).map(|i| self.headings[i].1.as_str())
    }
}

fn tokenize(text: &str) -> Vec<(usize, usize)> {
    let mut tokens = Vec::new();
    let mut start = None;
    for (i, c) in text.char_indices() {
        match (c.is_whitespace(), start) {
            (true, Some(s)) => {
                tokens.push((s, i));
                start = None;
            }
            (false, None) => start = Some(i),
            _ => {}
        }
    }
    if let Some(s) = start {
        tokens.push((s, text.len()));
    }
    tokens
}

fn ends_sentence(token: &str) -> bool {
    token.trim_end_matches(['"', '\'', ')', ']', '\u{201d}', '\u{2019}']).ends_with(['.', '!', '?'])
}

fn at_line_start(text: &str, offset: usize) -> bool {
    let before = text[..offset].trim_end_matches([' ', '\t']);
    before.is_empty() || before.ends_with('\n')
}

/// Group tokens into sentences. A sentence also ends at a blank line, and a
/// markdown heading ends at its line break.
fn sentence_units(text: &str, tokens: &[(usize, usize)]) -> Vec<Span> {
    let mut units = Vec::new();
    let mut first = 0;
    for (i, &(start, end)) in tokens.iter().enumerate() {
        let gap_end = tokens.get(i + 1).map_or(text.len(), |next| next.0);
        let gap = &text[end..gap_end];
        let unit_start = tokens[first].0;
        let heading = text[unit_start..].starts_with('#') && at_line_start(text, unit_start);
        if ends_sentence(&text[start..end])
            || gap.matches('\n').count() >= 2
            || (heading && gap.contains('\n'))
        {
            units.push(Span { start: first, end: i + 1 });
            first = i + 1;
        }
    }
    if first < tokens.len() {
        units.push(Span { start: first, end: tokens.len() });
    }
    units
}

fn headings(text: &str) -> Vec<(usize, String)> {
    let mut found = Vec::new();
    let mut offset = 0;
    for line in text.split_inclusive('\n') {
        let trimmed = line.trim_start();
        let level = trimmed.chars().take_while(|&c| c == '#').count();
        let rest = &trimmed[level..];
        if (1..=6).contains(&level) && rest.starts_with([' ', '\t']) && !rest.trim().is_empty() {
            found.push((offset + line.len() - trimmed.len(), rest.trim().to_string()));
        }
        offset += line.len();
    }
    found
}

/// The remaining windows of an oversized unit.
#[derive(Debug, Clone, Copy)]
struct Forced {
    next_start: usize,
    end: usize,
}

/// Lazy, restartable chunk sequence returned by [`TextChunker::iter`].
///
/// Cloning the iterator snapshots its position; both copies then yield the
/// same remaining chunks.
#[derive(Debug, Clone)]
pub struct ChunkIter<'a> {
    document: &'a Document,
    layout: Arc<Layout>,
    max_tokens: usize,
    overlap: usize,
    next_unit: usize,
    forced: Option<Forced>,
    chunk_index: usize,
}

impl ChunkIter<'_> {
    fn emit(&mut self, tokens: Span, truncated: bool) -> Chunk {
        let start = self.layout.tokens[tokens.start].0;
        let end = self.layout.tokens[tokens.end - 1].1;
        let document = self.document;

        let mut metadata = document.metadata.clone();
        metadata.insert(CHUNK_INDEX_KEY.to_string(), self.chunk_index.to_string());
        metadata.insert(SOURCE_KEY.to_string(), document.source_uri.clone());
        if let Some(section) = self.layout.section_at(start) {
            metadata.insert(SECTION_KEY.to_string(), section.to_string());
        }
        self.chunk_index += 1;

        Chunk {
            id: chunk_id(&document.id, start, end),
            document_id: document.id.clone(),
            text: document.text[start..end].to_string(),
            start_offset: start,
            end_offset: end,
            embedding: None,
            truncated,
            metadata,
        }
    }

    fn emit_forced(&mut self, window: Forced) -> Chunk {
        let stop = (window.next_start + self.max_tokens).min(window.end);
        if stop < window.end {
            self.forced = Some(Forced { next_start: stop - self.overlap, end: window.end });
        } else {
            self.next_unit += 1;
        }
        self.emit(Span { start: window.next_start, end: stop }, true)
    }

    /// First unit of the chunk following one that covered units `from..to`.
    ///
    /// Walks back over whole trailing units while they fit in the overlap
    /// budget and still leave room for unit `to`, and never returns `from`.
    fn restart_unit(&self, from: usize, to: usize) -> usize {
        let units = &self.layout.units;
        let Some(next) = units.get(to) else {
            return to;
        };
        if next.len() > self.max_tokens {
            return to;
        }
        let mut restart = to;
        let mut carried = 0;
        while restart > from + 1 {
            let len = units[restart - 1].len();
            if carried + len > self.overlap || carried + len + next.len() > self.max_tokens {
                break;
            }
            carried += len;
            restart -= 1;
        }
        restart
    }
}

impl Iterator for ChunkIter<'_> {
    type Item = Chunk;

    fn next(&mut self) -> Option<Chunk> {
        if let Some(window) = self.forced.take() {
            return Some(self.emit_forced(window));
        }

        let first = *self.layout.units.get(self.next_unit)?;
        if first.len() > self.max_tokens {
            return Some(self.emit_forced(Forced { next_start: first.start, end: first.end }));
        }

        let from = self.next_unit;
        let mut to = from;
        let mut packed = 0;
        while let Some(unit) = self.layout.units.get(to) {
            if packed + unit.len() > self.max_tokens {
                break;
            }
            packed += unit.len();
            to += 1;
        }
        let last = self.layout.units[to - 1];
        self.next_unit = self.restart_unit(from, to);
        Some(self.emit(Span { start: first.start, end: last.end }, false))
    }
}
