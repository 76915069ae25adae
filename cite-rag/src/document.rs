//! Data types for documents, chunks, index entries and retrieval results.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Metadata key holding the chunk's position within its document.
pub const CHUNK_INDEX_KEY: &str = "chunk_index";
/// Metadata key holding the nearest preceding markdown heading.
pub const SECTION_KEY: &str = "section";
/// Metadata key holding the path or URI a document was loaded from.
///
/// Chunking always sets it from [`Document::source_uri`], replacing any
/// document metadata under the same key.
pub const SOURCE_KEY: &str = "source";

/// A source document containing text content and metadata.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Document {
    /// Unique identifier for the document.
    pub id: String,
    /// Where the document came from. Re-ingesting the same URI replaces it.
    pub source_uri: String,
    /// The text content of the document.
    pub text: String,
    /// Key-value metadata such as author, timestamp or tags.
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl Document {
    /// Create a document whose `source_uri` equals its id.
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        let id = id.into();
        Self { source_uri: id.clone(), id, text: text.into(), metadata: BTreeMap::new() }
    }

    /// Set the source URI.
    pub fn with_source_uri(mut self, uri: impl Into<String>) -> Self {
        self.source_uri = uri.into();
        self
    }

    /// Add a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Build the stable identifier of a chunk from its document and byte span.
pub fn chunk_id(document_id: &str, start_offset: usize, end_offset: usize) -> String {
    format!("{document_id}:{start_offset}-{end_offset}")
}

/// A contiguous segment of a [`Document`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    /// `{document_id}:{start_offset}-{end_offset}`.
    pub id: String,
    /// The ID of the parent [`Document`].
    pub document_id: String,
    /// The text content of the chunk.
    pub text: String,
    /// Byte offset of the first character in the document text.
    pub start_offset: usize,
    /// Byte offset one past the last character in the document text.
    pub end_offset: usize,
    /// The vector embedding, once computed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    /// Set when a single sentence had to be cut to respect the token cap.
    #[serde(default)]
    pub truncated: bool,
    /// Document metadata plus chunk-specific fields.
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl Chunk {
    /// Number of whitespace-delimited tokens in the chunk text.
    pub fn token_count(&self) -> usize {
        self.text.split_whitespace().count()
    }

    /// The source URI recorded in the chunk metadata, if any.
    pub fn source(&self) -> Option<&str> {
        self.metadata.get(SOURCE_KEY).map(String::as_str)
    }
}

/// The chunk fields copied into the index at build time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EntryMetadata {
    /// The ID of the parent document.
    pub document_id: String,
    /// Source URI of the parent document.
    pub source_uri: String,
    /// The chunk text.
    pub text: String,
    /// Byte offset of the chunk start.
    pub start_offset: usize,
    /// Byte offset of the chunk end.
    pub end_offset: usize,
    /// Whether the chunk was force-split.
    #[serde(default)]
    pub truncated: bool,
    /// Chunk metadata.
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

/// One vector in the index together with a snapshot of its chunk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexEntry {
    /// Identifier of the indexed chunk.
    pub chunk_id: String,
    /// The chunk embedding. Its length must equal the index dimension.
    pub embedding: Vec<f32>,
    /// Chunk snapshot taken when the entry was created.
    pub metadata: EntryMetadata,
}

impl IndexEntry {
    /// Snapshot `chunk` with the given embedding.
    ///
    /// The source URI is taken from the chunk's `source` metadata, falling
    /// back to the document id.
    pub fn from_chunk(chunk: &Chunk, embedding: Vec<f32>) -> Self {
        let source_uri = chunk.source().unwrap_or(&chunk.document_id).to_string();
        Self {
            chunk_id: chunk.id.clone(),
            embedding,
            metadata: EntryMetadata {
                document_id: chunk.document_id.clone(),
                source_uri,
                text: chunk.text.clone(),
                start_offset: chunk.start_offset,
                end_offset: chunk.end_offset,
                truncated: chunk.truncated,
                attributes: chunk.metadata.clone(),
            },
        }
    }

    /// Rebuild the chunk this entry was created from, embedding included.
    pub fn to_chunk(&self) -> Chunk {
        Chunk {
            id: self.chunk_id.clone(),
            document_id: self.metadata.document_id.clone(),
            text: self.metadata.text.clone(),
            start_offset: self.metadata.start_offset,
            end_offset: self.metadata.end_offset,
            embedding: Some(self.embedding.clone()),
            truncated: self.metadata.truncated,
            metadata: self.metadata.attributes.clone(),
        }
    }
}

/// A chunk selected for a query.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetrievedChunk {
    /// The retrieved chunk.
    pub chunk: Chunk,
    /// Relevance score after filtering and re-ranking (higher is better).
    pub score: f32,
    /// 1-based position in the final result list.
    pub rank: usize,
}

/// A resolved reference from an answer to one of the passages it was given.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Citation {
    /// 1-based passage number as shown to the generator.
    pub marker: usize,
    /// The cited chunk.
    pub chunk_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_snapshot_restores_chunk() {
        let chunk = Chunk {
            id: chunk_id("doc", 0, 11),
            document_id: "doc".into(),
            text: "hello world".into(),
            start_offset: 0,
            end_offset: 11,
            embedding: None,
            truncated: false,
            metadata: BTreeMap::from([(SOURCE_KEY.to_string(), "docs/doc.txt".to_string())]),
        };
        let entry = IndexEntry::from_chunk(&chunk, vec![1.0, 0.0]);
        assert_eq!(entry.chunk_id, "doc:0-11");
        assert_eq!(entry.metadata.source_uri, "docs/doc.txt");

        let restored = entry.to_chunk();
        assert_eq!(restored.embedding.as_deref(), Some(&[1.0, 0.0][..]));
        assert_eq!(Chunk { embedding: None, ..restored }, chunk);
    }

    #[test]
    fn source_uri_falls_back_to_document_id() {
        let chunk = Chunk {
            id: "a:0-1".into(),
            document_id: "a".into(),
            text: "x".into(),
            start_offset: 0,
            end_offset: 1,
            embedding: None,
            truncated: false,
            metadata: BTreeMap::new(),
        };
        assert_eq!(IndexEntry::from_chunk(&chunk, vec![]).metadata.source_uri, "a");
    }
}
