//! Offline ingestion: load files, chunk them, embed them and persist an index.
//!
//! Ingestion runs in two steps that mirror the command line:
//!
//! 1. [`Ingestor::ingest_dir`] turns every supported file under an input
//!    directory into `<doc_id>.json` (the document and its chunks) and writes
//!    a `manifest.json` summary.
//! 2. [`Ingestor::build_index`] embeds the processed chunks and persists a
//!    [`VectorIndex`].
//!
//! A document that fails in either step is reported and skipped; the others
//! are still processed.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};

use chrono::{DateTime, Utc};
use cite_telemetry::{Stage, TraceEmitter, TraceEvent};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{Span, debug, info, instrument, warn};
use walkdir::WalkDir;

use crate::chunking::Chunker;
use crate::document::{Chunk, Document, IndexEntry};
use crate::embedding::Embedder;
use crate::error::{ErrorKind, RagError, Result};
use crate::index::{IndexManifest, VectorIndex};

/// Name of the summary written next to the processed documents.
pub const INGEST_MANIFEST_FILE: &str = "manifest.json";

/// Metadata key holding the original file name.
pub const FILE_NAME_KEY: &str = "file_name";

/// Metadata key holding the file's last modification time (RFC 3339).
pub const MODIFIED_AT_KEY: &str = "modified_at";

/// File extensions [`load_document`] understands.
pub const SUPPORTED_EXTENSIONS: &[&str] = &["txt", "md", "markdown", "html", "htm", "pdf"];

static SCRIPT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<script\b.*?</script\s*>").expect("valid regex"));
static STYLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<style\b.*?</style\s*>").expect("valid regex"));
static COMMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<!--.*?-->").expect("valid regex"));
static BLOCK_BREAK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)<br\s*/?>|</(p|div|h[1-6]|li|tr|td|th|section|article|header|footer|blockquote|pre|table|ul|ol|title)\s*>",
    )
    .expect("valid regex")
});
static TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<[^>]*>").expect("valid regex"));
static ENTITY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"&(#[0-9]{1,7}|#[xX][0-9a-fA-F]{1,6}|[a-zA-Z][a-zA-Z0-9]{1,31});")
        .expect("valid regex")
});

/// A document and its chunks as stored in `<doc_id>.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedDocument {
    /// The loaded document.
    pub document: Document,
    /// Its chunks, without embeddings.
    pub chunks: Vec<Chunk>,
}

/// One successfully processed document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// The document id.
    pub doc_id: String,
    /// Where its processed file was written.
    pub path: PathBuf,
    /// Number of chunks produced.
    pub chunk_count: usize,
}

/// A file or document that was skipped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestFailure {
    /// The offending file.
    pub path: PathBuf,
    /// Category of the failure.
    pub kind: ErrorKind,
    /// What went wrong.
    pub message: String,
}

impl IngestFailure {
    pub(crate) fn new(path: impl Into<PathBuf>, error: &RagError) -> Self {
        Self { path: path.into(), kind: error.kind(), message: error.to_string() }
    }
}

/// Result of [`Ingestor::ingest_dir`], also written as `manifest.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IngestReport {
    /// Processed documents in path order.
    pub documents: Vec<ManifestEntry>,
    /// Files that could not be processed.
    #[serde(default)]
    pub failures: Vec<IngestFailure>,
}

impl IngestReport {
    /// Total chunks across all processed documents.
    pub fn chunk_count(&self) -> usize {
        self.documents.iter().map(|d| d.chunk_count).sum()
    }
}

/// Result of [`Ingestor::build_index`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildReport {
    /// Manifest of the persisted index.
    pub manifest: IndexManifest,
    /// Ids of the documents that made it into the index.
    pub documents: Vec<String>,
    /// Processed files that were skipped.
    pub failures: Vec<IngestFailure>,
}

/// Load a `.txt`, `.md`, `.html` or `.pdf` file as a [`Document`].
///
/// The id is the file name with spaces replaced by `_`; the source URI is
/// the path. HTML loses its scripts, styles and tags; PDF text is extracted
/// page by page. NUL bytes are removed.
///
/// # Errors
///
/// Returns [`RagError::IngestionError`] for unsupported extensions, text
/// files that are not valid UTF-8 and PDFs whose text cannot be extracted,
/// and [`RagError::Io`] when the file cannot be read.
pub fn load_document(path: impl AsRef<Path>) -> Result<Document> {
    let path = path.as_ref();
    let failed = |message: String| RagError::IngestionError { path: path.to_path_buf(), message };

    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| failed("path has no file name".to_string()))?;
    let extension = extension_of(path).ok_or_else(|| failed("file has no extension".into()))?;
    if !SUPPORTED_EXTENSIONS.contains(&extension.as_str()) {
        return Err(failed(format!("unsupported file type '.{extension}'")));
    }

    let bytes = fs::read(path)?;
    let text = if extension == "pdf" {
        pdf_to_text(&bytes).map_err(failed)?
    } else {
        let raw =
            String::from_utf8(bytes).map_err(|e| failed(format!("not valid UTF-8: {e}")))?;
        match extension.as_str() {
            "html" | "htm" => html_to_text(&raw),
            _ => raw,
        }
    };
    let text = text.replace('\0', "");

    let mut document = Document::new(file_name.replace(' ', "_"), text)
        .with_source_uri(path.display().to_string())
        .with_metadata(FILE_NAME_KEY, file_name);
    if let Ok(modified) = fs::metadata(path).and_then(|m| m.modified()) {
        let modified: DateTime<Utc> = modified.into();
        document.metadata.insert(MODIFIED_AT_KEY.to_string(), modified.to_rfc3339());
    }
    Ok(document)
}

fn extension_of(path: &Path) -> Option<String> {
    path.extension().and_then(|e| e.to_str()).map(str::to_ascii_lowercase)
}

/// Text of every page of a PDF.
fn pdf_to_text(bytes: &[u8]) -> std::result::Result<String, String> {
    // pdf-extract panics on some malformed files.
    match std::panic::catch_unwind(|| pdf_extract::extract_text_from_mem(bytes)) {
        Ok(Ok(text)) => Ok(text),
        Ok(Err(e)) => Err(format!("cannot extract PDF text: {e}")),
        Err(_) => Err("cannot extract PDF text: malformed document".to_string()),
    }
}

/// Visible text of an HTML page, one block per line.
fn html_to_text(html: &str) -> String {
    let text = SCRIPT.replace_all(html, " ");
    let text = STYLE.replace_all(&text, " ");
    let text = COMMENT.replace_all(&text, " ");
    let text = BLOCK_BREAK.replace_all(&text, "\n");
    let text = TAG.replace_all(&text, "");
    let text = decode_entities(&text);

    text.lines()
        .flat_map(|line| line.split("  "))
        .map(str::trim)
        .filter(|phrase| !phrase.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn decode_entities(text: &str) -> String {
    ENTITY
        .replace_all(text, |caps: &regex::Captures<'_>| {
            let name = &caps[1];
            let decoded = match name.strip_prefix('#') {
                Some(number) => numeric_reference(number),
                None => named_entity(name),
            };
            decoded.map_or_else(|| caps[0].to_string(), String::from)
        })
        .into_owned()
}

fn numeric_reference(number: &str) -> Option<char> {
    let code = match number.strip_prefix(['x', 'X']) {
        Some(hex) => u32::from_str_radix(hex, 16).ok()?,
        None => number.parse().ok()?,
    };
    char::from_u32(code).filter(|c| *c != '\0')
}

fn named_entity(name: &str) -> Option<char> {
    let c = match name {
        "amp" => '&',
        "lt" => '<',
        "gt" => '>',
        "quot" => '"',
        "apos" => '\'',
        "nbsp" => ' ',
        "ndash" => '\u{2013}',
        "mdash" => '\u{2014}',
        "lsquo" => '\u{2018}',
        "rsquo" => '\u{2019}',
        "ldquo" => '\u{201C}',
        "rdquo" => '\u{201D}',
        "hellip" => '\u{2026}',
        "copy" => '\u{A9}',
        "reg" => '\u{AE}',
        "deg" => '\u{B0}',
        "euro" => '\u{20AC}',
        "aacute" => '\u{E1}',
        "agrave" => '\u{E0}',
        "acirc" => '\u{E2}',
        "auml" => '\u{E4}',
        "ccedil" => '\u{E7}',
        "eacute" => '\u{E9}',
        "egrave" => '\u{E8}',
        "ecirc" => '\u{EA}',
        "euml" => '\u{EB}',
        "iacute" => '\u{ED}',
        "iuml" => '\u{EF}',
        "ntilde" => '\u{F1}',
        "oacute" => '\u{F3}',
        "ocirc" => '\u{F4}',
        "ouml" => '\u{F6}',
        "szlig" => '\u{DF}',
        "uacute" => '\u{FA}',
        "uuml" => '\u{FC}',
        "Eacute" => '\u{C9}',
        "Auml" => '\u{C4}',
        "Ouml" => '\u{D6}',
        "Uuml" => '\u{DC}',
        _ => return None,
    };
    Some(c)
}

/// Runs the ingestion steps with a shared chunker and trace emitter.
///
/// # Example
///
/// ```rust,ignore
/// use std::sync::Arc;
/// use cite_rag::{ChunkingConfig, Ingestor, TextChunker};
///
/// let ingestor = Ingestor::new(Arc::new(TextChunker::new(ChunkingConfig::default())?));
/// let report = ingestor.ingest_dir("data/raw", "data/processed")?;
/// let built = ingestor.build_index("data/processed", "data/index", &embedder).await?;
/// ```
#[derive(Clone)]
pub struct Ingestor {
    chunker: Arc<dyn Chunker>,
    emitter: TraceEmitter,
}

impl std::fmt::Debug for Ingestor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ingestor").finish_non_exhaustive()
    }
}

impl Ingestor {
    /// Create an ingestor that splits documents with `chunker`.
    pub fn new(chunker: Arc<dyn Chunker>) -> Self {
        Self { chunker, emitter: TraceEmitter::disabled() }
    }

    /// Emit ingestion trace events through `emitter`.
    pub fn with_emitter(mut self, emitter: TraceEmitter) -> Self {
        self.emitter = emitter;
        self
    }

    /// Load and chunk every supported file under `input_dir`.
    ///
    /// Files are visited recursively in path order. Each processed document
    /// is written to `output_dir/<doc_id>.json`; the report is written to
    /// `output_dir/manifest.json`. Unsupported extensions are ignored. A file
    /// that fails to load, or whose id collides with an earlier file, is
    /// recorded as a failure.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Io`] when `input_dir` cannot be walked or
    /// `output_dir` cannot be written.
    #[instrument(
        name = "rag.ingest",
        skip_all,
        fields(request.id, input = %input_dir.as_ref().display(), documents, failures)
    )]
    pub fn ingest_dir(
        &self,
        input_dir: impl AsRef<Path>,
        output_dir: impl AsRef<Path>,
    ) -> Result<IngestReport> {
        let (input_dir, output_dir) = (input_dir.as_ref(), output_dir.as_ref());
        let request_id = uuid::Uuid::new_v4().to_string();
        Span::current().record("request.id", request_id.as_str());
        self.emitter.emit(
            TraceEvent::start(&request_id, Stage::Ingestion)
                .with_attribute("input", input_dir.display().to_string()),
        );

        let result = self.ingest_files(input_dir, output_dir);
        let end = TraceEvent::end(&request_id, Stage::Ingestion);
        match &result {
            Ok(report) => {
                Span::current().record("documents", report.documents.len());
                Span::current().record("failures", report.failures.len());
                self.emitter.emit(
                    end.with_attribute("documents", report.documents.len())
                        .with_attribute("chunks", report.chunk_count())
                        .with_attribute("failures", report.failures.len()),
                );
                info!(
                    documents = report.documents.len(),
                    chunks = report.chunk_count(),
                    failures = report.failures.len(),
                    "ingestion complete"
                );
            }
            Err(e) => self.emitter.emit(end.with_attribute("error", e.kind().as_str())),
        }
        result
    }

    fn ingest_files(&self, input_dir: &Path, output_dir: &Path) -> Result<IngestReport> {
        fs::create_dir_all(output_dir)?;
        let mut report = IngestReport::default();
        let mut seen = BTreeSet::new();

        for entry in WalkDir::new(input_dir).sort_by_file_name() {
            let entry = entry.map_err(|e| {
                RagError::Io(e.into_io_error().unwrap_or_else(|| {
                    std::io::Error::other(format!("cannot walk {}", input_dir.display()))
                }))
            })?;
            let path = entry.path();
            if !entry.file_type().is_file() {
                continue;
            }
            if extension_of(path).is_none_or(|e| !SUPPORTED_EXTENSIONS.contains(&e.as_str())) {
                debug!(path = %path.display(), "skipping unsupported file");
                continue;
            }

            match self.process_file(path, output_dir, &mut seen) {
                Ok(entry) => {
                    debug!(doc_id = %entry.doc_id, chunks = entry.chunk_count, "processed document");
                    report.documents.push(entry);
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping document");
                    report.failures.push(IngestFailure::new(path, &e));
                }
            }
        }

        let manifest = serde_json::to_vec_pretty(&report)?;
        fs::write(output_dir.join(INGEST_MANIFEST_FILE), manifest)?;
        Ok(report)
    }

    fn process_file(
        &self,
        path: &Path,
        output_dir: &Path,
        seen: &mut BTreeSet<String>,
    ) -> Result<ManifestEntry> {
        let document = load_document(path)?;
        if !seen.insert(document.id.clone()) {
            return Err(RagError::IngestionError {
                path: path.to_path_buf(),
                message: format!("duplicate document id '{}'", document.id),
            });
        }

        let chunks = self.chunker.chunk(&document);
        let out_path = output_dir.join(format!("{}.json", document.id));
        let entry = ManifestEntry {
            doc_id: document.id.clone(),
            path: out_path.clone(),
            chunk_count: chunks.len(),
        };
        fs::write(&out_path, serde_json::to_vec_pretty(&ProcessedDocument { document, chunks })?)?;
        Ok(entry)
    }

    /// Embed every processed document under `processed_dir` and persist the
    /// resulting index to `index_dir`.
    ///
    /// Documents are embedded one at a time; a document whose file cannot be
    /// parsed or whose chunks cannot be embedded is skipped and reported.
    ///
    /// # Errors
    ///
    /// - [`RagError::EmptyIndex`] when no document produced any entry.
    /// - [`RagError::DimensionMismatch`] when documents disagree on dimension.
    /// - [`RagError::Io`] when the directories cannot be read or written.
    #[instrument(
        name = "rag.build_index",
        skip_all,
        fields(request.id, processed = %processed_dir.as_ref().display(), entries, failures)
    )]
    pub async fn build_index(
        &self,
        processed_dir: impl AsRef<Path>,
        index_dir: impl AsRef<Path>,
        embedder: &Embedder,
    ) -> Result<BuildReport> {
        let (processed_dir, index_dir) = (processed_dir.as_ref(), index_dir.as_ref());
        let request_id = uuid::Uuid::new_v4().to_string();
        Span::current().record("request.id", request_id.as_str());
        self.emitter.emit(
            TraceEvent::start(&request_id, Stage::Ingestion)
                .with_attribute("processed", processed_dir.display().to_string())
                .with_attribute("embedding_model", embedder.model_id()),
        );

        let result = index_processed(processed_dir, index_dir, embedder).await;
        let end = TraceEvent::end(&request_id, Stage::Ingestion);
        match &result {
            Ok(report) => {
                Span::current().record("entries", report.manifest.entry_count);
                Span::current().record("failures", report.failures.len());
                self.emitter.emit(
                    end.with_attribute("documents", report.documents.len())
                        .with_attribute("entries", report.manifest.entry_count)
                        .with_attribute("failures", report.failures.len()),
                );
            }
            Err(e) => self.emitter.emit(end.with_attribute("error", e.kind().as_str())),
        }
        result
    }
}

/// Read every `<doc_id>.json` under `processed_dir` in file name order.
///
/// Files that cannot be read or parsed are returned as failures.
///
/// # Errors
///
/// Returns [`RagError::Io`] when the directory itself cannot be listed.
pub fn load_processed(
    processed_dir: impl AsRef<Path>,
) -> Result<(Vec<ProcessedDocument>, Vec<IngestFailure>)> {
    let mut paths: Vec<PathBuf> = fs::read_dir(processed_dir.as_ref())?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && extension_of(p).as_deref() == Some("json"))
        .filter(|p| p.file_name().and_then(|n| n.to_str()) != Some(INGEST_MANIFEST_FILE))
        .collect();
    paths.sort();

    let mut documents = Vec::with_capacity(paths.len());
    let mut failures = Vec::new();
    for path in paths {
        let parsed = fs::read(&path)
            .map_err(RagError::from)
            .and_then(|bytes| Ok(serde_json::from_slice::<ProcessedDocument>(&bytes)?));
        match parsed {
            Ok(doc) => documents.push(doc),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "skipping unreadable processed file");
                failures.push(IngestFailure::new(path, &e));
            }
        }
    }
    Ok((documents, failures))
}

async fn index_processed(
    processed_dir: &Path,
    index_dir: &Path,
    embedder: &Embedder,
) -> Result<BuildReport> {
    let (documents, mut failures) = load_processed(processed_dir)?;
    info!(documents = documents.len(), "loaded processed documents");

    let mut entries = Vec::new();
    let mut indexed = Vec::new();
    for ProcessedDocument { document, mut chunks } in documents {
        if chunks.is_empty() {
            debug!(doc_id = %document.id, "document has no chunks");
            continue;
        }
        if let Err(e) = embedder.embed_chunks(&mut chunks).await {
            warn!(doc_id = %document.id, error = %e, "skipping document that failed to embed");
            failures.push(IngestFailure::new(&document.source_uri, &e));
            continue;
        }
        entries.extend(chunks.into_iter().filter_map(|mut chunk| {
            let embedding = chunk.embedding.take()?;
            Some(IndexEntry::from_chunk(&chunk, embedding))
        }));
        indexed.push(document.id);
    }

    let index = VectorIndex::build(entries, embedder.model_id())?;
    index.persist(index_dir)?;
    Ok(BuildReport { manifest: index.manifest().clone(), documents: indexed, failures })
}

/// Ingest `input_dir` into `output_dir` with `chunker` and no tracing sink.
///
/// # Errors
///
/// See [`Ingestor::ingest_dir`].
pub fn ingest(
    input_dir: impl AsRef<Path>,
    output_dir: impl AsRef<Path>,
    chunker: Arc<dyn Chunker>,
) -> Result<IngestReport> {
    Ingestor::new(chunker).ingest_dir(input_dir, output_dir)
}

/// Build and persist an index from `processed_dir` with no tracing sink.
///
/// # Errors
///
/// See [`Ingestor::build_index`].
pub async fn build_index(
    processed_dir: impl AsRef<Path>,
    index_dir: impl AsRef<Path>,
    embedder: &Embedder,
) -> Result<BuildReport> {
    index_processed(processed_dir.as_ref(), index_dir.as_ref(), embedder).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn html_loses_scripts_styles_and_tags() {
        let html = "<html><head><title>Guide</title><style>p { color: red; }</style>\
                    <script>var x = '<p>';</script></head>\
                    <body><h1>Intro</h1><p>Caf&eacute; &amp; bar.</p><!-- hidden --><p>Second</p></body></html>";
        let text = html_to_text(html);
        assert_eq!(text, "Guide\nIntro\nCaf\u{e9} & bar.\nSecond");
    }

    #[test]
    fn numeric_and_named_entities_are_decoded() {
        assert_eq!(
            decode_entities("It&#39;s &#x2014; caf&eacute; &lt;b&gt; &amp;amp;"),
            "It's \u{2014} caf\u{e9} <b> &amp;"
        );
        let untouched = "&bogus; &#0; &#xFFFFFFF; & alone";
        assert_eq!(decode_entities(untouched), untouched);
    }

    #[test]
    fn load_document_sets_id_source_and_strips_nul() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("my notes.txt");
        fs::write(&path, "Hello\0 world.").unwrap();

        let doc = load_document(&path).unwrap();
        assert_eq!(doc.id, "my_notes.txt");
        assert_eq!(doc.text, "Hello world.");
        assert_eq!(doc.source_uri, path.display().to_string());
        assert_eq!(doc.metadata.get(FILE_NAME_KEY).map(String::as_str), Some("my notes.txt"));
        assert!(doc.metadata.contains_key(MODIFIED_AT_KEY));
    }

    fn write_pdf(path: &Path, line: &str) {
        use lopdf::content::{Content, Operation};
        use lopdf::{Object, Stream, dictionary};

        let mut doc = lopdf::Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Courier",
        });
        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! { "F1" => font_id },
        });
        let content = Content {
            operations: vec![
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec!["F1".into(), 12.into()]),
                Operation::new("Td", vec![72.into(), 720.into()]),
                Operation::new("Tj", vec![Object::string_literal(line)]),
                Operation::new("ET", vec![]),
            ],
        };
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => vec![page_id.into()],
                "Count" => 1,
                "Resources" => resources_id,
                "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);
        doc.save(path).unwrap();
    }

    #[test]
    fn load_document_extracts_pdf_text() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("brief.pdf");
        write_pdf(&path, "Lisbon is the capital of Portugal.");

        let doc = load_document(&path).unwrap();
        assert_eq!(doc.id, "brief.pdf");
        assert!(doc.text.contains("Lisbon"), "extracted: {:?}", doc.text);
        assert_eq!(doc.source_uri, path.display().to_string());
    }

    #[test]
    fn unreadable_pdf_is_an_ingestion_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scan.pdf");
        fs::write(&path, b"%PDF-1.4").unwrap();
        let err = load_document(&path).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Ingestion);
    }

    #[test]
    fn load_document_rejects_unsupported_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("image.png");
        fs::write(&path, [0u8, 1, 2]).unwrap();
        let err = load_document(&path).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Ingestion);
    }
}
