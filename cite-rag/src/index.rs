//! Exact cosine-similarity vector index with on-disk persistence.
//!
//! A [`VectorIndex`] is immutable once built. Updating the collection means
//! building a new instance and publishing it through an [`IndexHandle`];
//! readers holding the previous `Arc` keep using it undisturbed.
//!
//! # Persisted layout
//!
//! ```text
//! <dir>/manifest.json   format version, embedding model, dimension, entry count, build time
//! <dir>/entries.jsonl   one IndexEntry per line, sorted by chunk id
//! ```

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::document::IndexEntry;
use crate::error::{RagError, Result};

/// Version of the on-disk layout written by [`VectorIndex::persist`].
pub const INDEX_FORMAT_VERSION: u32 = 1;
/// File name of the index manifest.
pub const MANIFEST_FILE: &str = "manifest.json";
/// File name of the entry list.
pub const ENTRIES_FILE: &str = "entries.jsonl";

/// Compute cosine similarity between two vectors.
///
/// Returns 0.0 if either vector has zero magnitude.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Description of an index, persisted as `manifest.json`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexManifest {
    /// Layout version, see [`INDEX_FORMAT_VERSION`].
    pub format_version: u32,
    /// Identifier of the model that produced the embeddings.
    pub embedding_model: String,
    /// Length of every embedding.
    pub dimension: usize,
    /// Number of entries.
    pub entry_count: usize,
    /// When the index was built.
    pub built_at: DateTime<Utc>,
}

/// One search result borrowed from the index.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchHit<'a> {
    /// The matching entry.
    pub entry: &'a IndexEntry,
    /// Cosine similarity between the query and the entry embedding.
    pub score: f32,
}

/// An immutable collection of embeddings searched by exact linear scan.
#[derive(Debug, Clone)]
pub struct VectorIndex {
    manifest: IndexManifest,
    /// Sorted by chunk id, no duplicates.
    entries: Vec<IndexEntry>,
}

impl VectorIndex {
    /// An index with no entries. Every search on it returns no results.
    pub fn empty(embedding_model: impl Into<String>) -> Self {
        Self {
            manifest: IndexManifest {
                format_version: INDEX_FORMAT_VERSION,
                embedding_model: embedding_model.into(),
                dimension: 0,
                entry_count: 0,
                built_at: Utc::now(),
            },
            entries: Vec::new(),
        }
    }

    /// Build an index from `entries`. A later entry replaces an earlier one
    /// with the same chunk id.
    ///
    /// # Errors
    ///
    /// - [`RagError::EmptyIndex`] when `entries` is empty.
    /// - [`RagError::DimensionMismatch`] when embeddings differ in length.
    /// - [`RagError::ConfigError`] when embeddings are zero-length.
    pub fn build(
        entries: impl IntoIterator<Item = IndexEntry>,
        embedding_model: impl Into<String>,
    ) -> Result<Self> {
        let mut by_id = BTreeMap::new();
        let mut dimension = None;
        for entry in entries {
            let expected = *dimension.get_or_insert(entry.embedding.len());
            if entry.embedding.len() != expected {
                return Err(RagError::DimensionMismatch {
                    expected,
                    actual: entry.embedding.len(),
                });
            }
            by_id.insert(entry.chunk_id.clone(), entry);
        }
        let dimension = dimension.ok_or(RagError::EmptyIndex)?;
        if dimension == 0 {
            return Err(RagError::ConfigError("index embeddings must not be empty".to_string()));
        }

        let entries: Vec<IndexEntry> = by_id.into_values().collect();
        let manifest = IndexManifest {
            format_version: INDEX_FORMAT_VERSION,
            embedding_model: embedding_model.into(),
            dimension,
            entry_count: entries.len(),
            built_at: Utc::now(),
        };
        debug!(
            model = %manifest.embedding_model,
            dimension,
            entries = entries.len(),
            "built vector index"
        );
        Ok(Self { manifest, entries })
    }

    /// The index manifest.
    pub fn manifest(&self) -> &IndexManifest {
        &self.manifest
    }

    /// All entries, sorted by chunk id.
    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the index has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Embedding dimension, zero for an empty index.
    pub fn dimension(&self) -> usize {
        self.manifest.dimension
    }

    /// The `k` entries most similar to `query`, by descending score with
    /// ties broken by ascending chunk id.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::DimensionMismatch`] when the query length differs
    /// from the index dimension. An empty index returns no results instead.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit<'_>>> {
        if self.entries.is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        if query.len() != self.manifest.dimension {
            return Err(RagError::DimensionMismatch {
                expected: self.manifest.dimension,
                actual: query.len(),
            });
        }

        let mut hits: Vec<SearchHit<'_>> = self
            .entries
            .iter()
            .map(|entry| SearchHit { entry, score: cosine_similarity(&entry.embedding, query) })
            .collect();
        hits.sort_by(|a, b| {
            b.score.total_cmp(&a.score).then_with(|| a.entry.chunk_id.cmp(&b.entry.chunk_id))
        });
        hits.truncate(k);
        Ok(hits)
    }

    /// Write the index to `dir`, creating it if needed.
    ///
    /// Files are written under temporary names and renamed into place, so a
    /// crash never leaves a half-written manifest next to old entries.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::EmptyIndex`] for an empty index, and I/O or
    /// serialization errors otherwise.
    pub fn persist(&self, dir: impl AsRef<Path>) -> Result<()> {
        let dir = dir.as_ref();
        if self.entries.is_empty() {
            return Err(RagError::EmptyIndex);
        }
        fs::create_dir_all(dir)?;

        let entries_tmp = dir.join(format!("{ENTRIES_FILE}.tmp"));
        {
            let mut writer = BufWriter::new(File::create(&entries_tmp)?);
            for entry in &self.entries {
                serde_json::to_writer(&mut writer, entry)?;
                writer.write_all(b"\n")?;
            }
            writer.flush()?;
        }
        let manifest_tmp = dir.join(format!("{MANIFEST_FILE}.tmp"));
        fs::write(&manifest_tmp, serde_json::to_vec_pretty(&self.manifest)?)?;

        fs::rename(&entries_tmp, dir.join(ENTRIES_FILE))?;
        fs::rename(&manifest_tmp, dir.join(MANIFEST_FILE))?;
        info!(
            path = %dir.display(),
            entries = self.entries.len(),
            model = %self.manifest.embedding_model,
            "persisted vector index"
        );
        Ok(())
    }

    /// Load an index persisted by [`persist`](VectorIndex::persist).
    ///
    /// `embedding_model` must equal the model recorded in the manifest, and
    /// `expected_dimension`, when known, must equal its dimension.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::IndexIncompatible`] when the format version, model,
    /// dimension or entry count do not match, and I/O or serialization errors
    /// when the files cannot be read.
    pub fn load(
        dir: impl AsRef<Path>,
        embedding_model: &str,
        expected_dimension: Option<usize>,
    ) -> Result<Self> {
        let dir = dir.as_ref();
        let incompatible =
            |reason: String| RagError::IndexIncompatible { path: dir.to_path_buf(), reason };

        let manifest: IndexManifest =
            serde_json::from_slice(&fs::read(dir.join(MANIFEST_FILE))?)?;
        if manifest.format_version != INDEX_FORMAT_VERSION {
            return Err(incompatible(format!(
                "format version {} is not supported (expected {INDEX_FORMAT_VERSION})",
                manifest.format_version
            )));
        }
        if manifest.embedding_model != embedding_model {
            return Err(incompatible(format!(
                "built with embedding model '{}', current model is '{embedding_model}'",
                manifest.embedding_model
            )));
        }
        if let Some(expected) = expected_dimension {
            if expected != manifest.dimension {
                return Err(incompatible(format!(
                    "index dimension {} does not match embedding dimension {expected}",
                    manifest.dimension
                )));
            }
        }

        let reader = BufReader::new(File::open(dir.join(ENTRIES_FILE))?);
        let mut entries = Vec::with_capacity(manifest.entry_count);
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let entry: IndexEntry = serde_json::from_str(&line)?;
            if entry.embedding.len() != manifest.dimension {
                return Err(incompatible(format!(
                    "entry '{}' has dimension {}, manifest says {}",
                    entry.chunk_id,
                    entry.embedding.len(),
                    manifest.dimension
                )));
            }
            entries.push(entry);
        }
        if entries.len() != manifest.entry_count {
            return Err(incompatible(format!(
                "manifest lists {} entries, found {}",
                manifest.entry_count,
                entries.len()
            )));
        }
        entries.sort_by(|a, b| a.chunk_id.cmp(&b.chunk_id));

        info!(path = %dir.display(), entries = entries.len(), "loaded vector index");
        Ok(Self { manifest, entries })
    }
}

/// The shared, atomically replaceable reference to the active index.
///
/// Readers take an `Arc` snapshot with [`current`](IndexHandle::current) and
/// never observe a partially built index. Each [`swap`](IndexHandle::swap)
/// bumps the version.
#[derive(Debug)]
pub struct IndexHandle {
    current: RwLock<Arc<VectorIndex>>,
    version: AtomicU64,
    location: RwLock<Option<PathBuf>>,
}

impl IndexHandle {
    /// Publish `index` as version 1.
    pub fn new(index: VectorIndex) -> Self {
        Self {
            current: RwLock::new(Arc::new(index)),
            version: AtomicU64::new(1),
            location: RwLock::new(None),
        }
    }

    /// The active index.
    pub fn current(&self) -> Arc<VectorIndex> {
        Arc::clone(&self.current.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// The active index together with its version.
    pub fn snapshot(&self) -> (u64, Arc<VectorIndex>) {
        let guard = self.current.read().unwrap_or_else(PoisonError::into_inner);
        (self.version.load(Ordering::Acquire), Arc::clone(&guard))
    }

    /// Replace the active index and return the new version.
    pub fn swap(&self, index: VectorIndex) -> u64 {
        let mut guard = self.current.write().unwrap_or_else(PoisonError::into_inner);
        *guard = Arc::new(index);
        let version = self.version.fetch_add(1, Ordering::AcqRel) + 1;
        info!(version, entries = guard.len(), "swapped active index");
        version
    }

    /// Version of the active index, starting at 1.
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    /// Directory the active index was loaded from or persisted to, if any.
    pub fn location(&self) -> Option<PathBuf> {
        self.location.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Record where the active index lives on disk.
    pub fn set_location(&self, dir: impl Into<PathBuf>) {
        *self.location.write().unwrap_or_else(PoisonError::into_inner) = Some(dir.into());
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::document::EntryMetadata;

    fn entry(id: &str, embedding: Vec<f32>) -> IndexEntry {
        IndexEntry {
            chunk_id: id.to_string(),
            embedding,
            metadata: EntryMetadata {
                document_id: "doc".into(),
                source_uri: "doc.txt".into(),
                text: format!("text of {id}"),
                start_offset: 0,
                end_offset: 1,
                truncated: false,
                attributes: BTreeMap::new(),
            },
        }
    }

    #[test]
    fn cosine_of_zero_vector_is_zero() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert!((cosine_similarity(&[2.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn build_rejects_empty_and_ragged_input() {
        assert!(matches!(VectorIndex::build(vec![], "m"), Err(RagError::EmptyIndex)));
        let ragged = vec![entry("a", vec![1.0, 0.0]), entry("b", vec![1.0])];
        assert!(matches!(
            VectorIndex::build(ragged, "m"),
            Err(RagError::DimensionMismatch { expected: 2, actual: 1 })
        ));
    }

    #[test]
    fn duplicate_ids_keep_last() {
        let index = VectorIndex::build(
            vec![entry("a", vec![1.0, 0.0]), entry("a", vec![0.0, 1.0])],
            "m",
        )
        .unwrap();
        assert_eq!(index.len(), 1);
        assert_eq!(index.entries()[0].embedding, vec![0.0, 1.0]);
    }

    #[test]
    fn ties_break_by_chunk_id() {
        let index = VectorIndex::build(
            vec![entry("c", vec![1.0, 0.0]), entry("a", vec![2.0, 0.0]), entry("b", vec![0.0, 1.0])],
            "m",
        )
        .unwrap();
        let hits = index.search(&[1.0, 0.0], 3).unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.entry.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c", "b"]);
        assert_eq!(index.search(&[1.0, 0.0], 1).unwrap().len(), 1);
    }

    #[test]
    fn query_dimension_is_checked_but_empty_index_returns_nothing() {
        let index = VectorIndex::build(vec![entry("a", vec![1.0, 0.0])], "m").unwrap();
        assert!(matches!(
            index.search(&[1.0], 1),
            Err(RagError::DimensionMismatch { expected: 2, actual: 1 })
        ));
        assert!(VectorIndex::empty("m").search(&[1.0], 5).unwrap().is_empty());
    }

    #[test]
    fn load_refuses_other_model_or_dimension() {
        let dir = tempfile::tempdir().unwrap();
        let index = VectorIndex::build(vec![entry("a", vec![1.0, 0.0])], "model-a").unwrap();
        index.persist(dir.path()).unwrap();

        assert!(matches!(
            VectorIndex::load(dir.path(), "model-b", None),
            Err(RagError::IndexIncompatible { .. })
        ));
        assert!(matches!(
            VectorIndex::load(dir.path(), "model-a", Some(3)),
            Err(RagError::IndexIncompatible { .. })
        ));
        assert_eq!(VectorIndex::load(dir.path(), "model-a", Some(2)).unwrap().len(), 1);
    }

    #[test]
    fn handle_swaps_and_versions() {
        let handle = IndexHandle::new(VectorIndex::empty("m"));
        let before = handle.current();
        assert_eq!(handle.version(), 1);

        let version = handle.swap(VectorIndex::build(vec![entry("a", vec![1.0])], "m").unwrap());
        assert_eq!(version, 2);
        assert!(before.is_empty());
        let (seen, current) = handle.snapshot();
        assert_eq!(seen, 2);
        assert_eq!(current.len(), 1);
    }
}
