//! Citation marker parsing and answer validation.
//!
//! Recognised markers:
//!
//! | Form                   | Meaning                          |
//! |------------------------|----------------------------------|
//! | `[1]`, `[1, 2]`        | passage numbers                  |
//! | `[S1]`, `[source 2]`   | passage numbers                  |
//! | `[chunk:doc:0-120]`    | chunk id                         |
//! | `[doc:0-120]`, `[a#3]` | bare chunk id (contains `:`/`#`) |
//!
//! Markdown links (`[text](url)`) and bracketed prose such as `[sic]` are
//! ignored. A bracket that looks like a citation but cannot be read, such as
//! `[1-3]` or `[source x]`, is reported as unparseable.

use std::ops::Range;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::document::Citation;
use crate::generation::Passage;

static BRACKET: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[([^\[\]\n]{1,200})\](\()?").expect("valid regex"));
static NUMBERED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?i)(?:s|src|source|passage|ref|doc)?\s*#?\s*(\d{1,4})$").expect("valid regex")
});
static CHUNK_PREFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?i)chunk\s*:\s*(\S+)$").expect("valid regex"));
static CITATION_LIKE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?i)(?:\d|s\s*\d|src\b|source\b|passage\b|ref\b|chunk\b)").expect("valid regex")
});

/// What a single reference inside a marker points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarkerRef {
    /// A 1-based passage number.
    Index(usize),
    /// A chunk id.
    ChunkId(String),
}

/// The content of one bracketed marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarkerKind {
    /// One or more readable references.
    Refs(Vec<MarkerRef>),
    /// Looks like a citation but could not be read.
    Unparseable(String),
}

/// A citation marker found in an answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Marker {
    /// Byte range of the marker, brackets included.
    pub span: Range<usize>,
    /// What the marker contains.
    pub kind: MarkerKind,
}

impl Marker {
    /// Number of references this marker counts as. An unparseable marker counts once.
    pub fn count(&self) -> usize {
        match &self.kind {
            MarkerKind::Refs(refs) => refs.len(),
            MarkerKind::Unparseable(_) => 1,
        }
    }
}

fn parse_ref(part: &str) -> Option<MarkerRef> {
    if let Some(caps) = NUMBERED.captures(part) {
        return caps[1].parse().ok().map(MarkerRef::Index);
    }
    if let Some(caps) = CHUNK_PREFIX.captures(part) {
        return Some(MarkerRef::ChunkId(caps[1].to_string()));
    }
    let bare_id = !part.chars().any(char::is_whitespace)
        && part.contains([':', '#'])
        && part.chars().any(char::is_alphanumeric);
    bare_id.then(|| MarkerRef::ChunkId(part.to_string()))
}

fn classify(inner: &str) -> Option<MarkerKind> {
    let inner = inner.trim();
    let parts: Vec<&str> = inner.split([',', ';']).map(str::trim).collect();
    let refs: Vec<Option<MarkerRef>> = parts.iter().map(|p| parse_ref(p)).collect();
    if refs.iter().all(Option::is_some) {
        return Some(MarkerKind::Refs(refs.into_iter().flatten().collect()));
    }
    let partly_read = refs.iter().any(Option::is_some);
    if partly_read || CITATION_LIKE.is_match(inner) {
        return Some(MarkerKind::Unparseable(inner.to_string()));
    }
    None
}

/// Find every citation marker in `text`, in order.
pub fn parse_markers(text: &str) -> Vec<Marker> {
    BRACKET
        .captures_iter(text)
        .filter(|caps| caps.get(2).is_none())
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let kind = classify(&caps[1])?;
            Some(Marker { span: whole.start()..whole.end(), kind })
        })
        .collect()
}

/// Byte offset just past a run of trailing markers that starts at `from`.
fn absorb_markers(text: &str, from: usize) -> usize {
    let bytes = text.as_bytes();
    let mut end = from;
    let mut cursor = from;
    loop {
        while cursor < bytes.len() && matches!(bytes[cursor], b' ' | b'\t') {
            cursor += 1;
        }
        if cursor >= bytes.len() || bytes[cursor] != b'[' {
            return end;
        }
        let Some(close) = text[cursor..].find(']') else {
            return end;
        };
        let inner = &text[cursor + 1..cursor + close];
        if inner.contains(['[', '\n']) || classify(inner).is_none() {
            return end;
        }
        end = cursor + close + 1;
        cursor = end;
    }
}

/// Split an answer into sentence byte ranges.
///
/// A sentence ends at a line break, or at `.`, `!` or `?` followed by
/// whitespace or the end of the text. Citation markers directly after the
/// terminal punctuation belong to the sentence they follow. Blank ranges are
/// dropped.
pub fn split_sentences(text: &str) -> Vec<Range<usize>> {
    let bytes = text.as_bytes();
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut i = 0;
    let mut push = |range: Range<usize>| {
        if !text[range.clone()].trim().is_empty() {
            sentences.push(range);
        }
    };
    while i < bytes.len() {
        match bytes[i] {
            b'\n' => {
                push(start..i);
                start = i + 1;
                i += 1;
            }
            b'.' | b'!' | b'?' => {
                let mut after = i + 1;
                while after < bytes.len() && matches!(bytes[after], b'"' | b'\'' | b')') {
                    after += 1;
                }
                if after >= bytes.len() || bytes[after].is_ascii_whitespace() {
                    let end = absorb_markers(text, after);
                    push(start..end);
                    start = end;
                    i = end;
                } else {
                    i += 1;
                }
            }
            _ => i += 1,
        }
    }
    push(start..bytes.len());
    sentences
}

/// Why part of an answer could not be verified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    /// A passage number outside `1..=n`.
    UnknownMarker,
    /// A chunk id that was not among the retrieved passages.
    UnretrievedChunk,
    /// A citation-like marker that could not be read.
    UnparseableMarker,
    /// A sentence with no citation at all.
    UncitedStatement,
}

/// One grounding problem found in an answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroundingViolation {
    /// What went wrong.
    pub kind: ViolationKind,
    /// The sentence containing the problem.
    pub sentence: String,
    /// The offending marker or a short description.
    pub detail: String,
}

/// Validation result for one sentence.
#[derive(Debug, Clone, PartialEq)]
pub struct SentenceCheck {
    /// Byte range of the sentence in the answer.
    pub range: Range<usize>,
    /// Citations that resolved to a passage.
    pub citations: Vec<Citation>,
    /// Problems found in the sentence.
    pub violations: Vec<GroundingViolation>,
}

/// Validation result for a whole answer.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Validation {
    /// Per-sentence results in answer order.
    pub sentences: Vec<SentenceCheck>,
    /// References found, valid or not.
    pub markers_total: usize,
    /// References that resolved to a passage.
    pub markers_valid: usize,
}

impl Validation {
    /// Whether no sentence has a violation.
    pub fn is_clean(&self) -> bool {
        self.sentences.iter().all(|s| s.violations.is_empty())
    }

    /// All violations in answer order.
    pub fn violations(&self) -> Vec<GroundingViolation> {
        self.sentences.iter().flat_map(|s| s.violations.iter().cloned()).collect()
    }

    /// Distinct valid citations ordered by marker.
    pub fn citations(&self) -> Vec<Citation> {
        collect_citations(self.sentences.iter())
    }
}

/// Distinct citations of `sentences` ordered by marker.
pub fn collect_citations<'a>(sentences: impl Iterator<Item = &'a SentenceCheck>) -> Vec<Citation> {
    let mut citations: Vec<Citation> =
        sentences.flat_map(|s| s.citations.iter().cloned()).collect();
    citations.sort();
    citations.dedup();
    citations
}

/// Check every marker of `answer` against `passages`.
///
/// With `require_sentence_citations`, a sentence carrying no marker is an
/// [`ViolationKind::UncitedStatement`].
pub fn validate(
    answer: &str,
    passages: &[Passage],
    require_sentence_citations: bool,
) -> Validation {
    let markers = parse_markers(answer);
    let mut validation = Validation::default();

    for range in split_sentences(answer) {
        let sentence = &answer[range.clone()];
        let in_sentence: Vec<&Marker> = markers
            .iter()
            .filter(|m| m.span.start >= range.start && m.span.end <= range.end)
            .collect();
        let mut check =
            SentenceCheck { range: range.clone(), citations: Vec::new(), violations: Vec::new() };
        let violation = |kind, detail: String| GroundingViolation {
            kind,
            sentence: sentence.trim().to_string(),
            detail,
        };

        for marker in &in_sentence {
            validation.markers_total += marker.count();
            let refs = match &marker.kind {
                MarkerKind::Refs(refs) => refs,
                MarkerKind::Unparseable(raw) => {
                    let detail = format!("[{raw}]");
                    check.violations.push(violation(ViolationKind::UnparseableMarker, detail));
                    continue;
                }
            };
            for reference in refs {
                let resolved = match reference {
                    MarkerRef::Index(n) => passages
                        .iter()
                        .find(|p| p.marker == *n)
                        .ok_or_else(|| violation(ViolationKind::UnknownMarker, format!("[{n}]"))),
                    MarkerRef::ChunkId(id) => passages
                        .iter()
                        .find(|p| &p.chunk_id == id)
                        .ok_or_else(|| violation(ViolationKind::UnretrievedChunk, id.clone())),
                };
                match resolved {
                    Ok(passage) => {
                        validation.markers_valid += 1;
                        check.citations.push(Citation {
                            marker: passage.marker,
                            chunk_id: passage.chunk_id.clone(),
                        });
                    }
                    Err(v) => check.violations.push(v),
                }
            }
        }

        if require_sentence_citations
            && in_sentence.is_empty()
            && sentence.chars().any(char::is_alphanumeric)
        {
            check
                .violations
                .push(violation(ViolationKind::UncitedStatement, "no citation".to_string()));
        }
        validation.sentences.push(check);
    }
    validation
}
