//! End-to-end tests for ingestion, retrieval and citation-checked answers.

use std::collections::BTreeSet;
use std::fs;
use std::sync::Arc;

use async_trait::async_trait;
use cite_rag::document::{Chunk, Document, RetrievedChunk};
use cite_rag::{
    AnswerStatus, ChunkingConfig, Embedder, EmbeddingConfig, EmbeddingProvider, ErrorKind,
    ExtractiveGenerator, GenerationConfig, GenerationOutput, GenerationProvider,
    GenerationRequest, GroundedGenerator, HashingEmbedder, INSUFFICIENT_EVIDENCE_ANSWER,
    Ingestor, ProviderError, RagConfig, RagService, RetryPolicy, TextChunker,
};
use cite_telemetry::{InMemoryTraceLayer, MemorySink, Phase, SharedTraceStorage, Stage, TraceEmitter};
use proptest::prelude::*;
use tracing_subscriber::Registry;
use tracing_subscriber::layer::SubscriberExt;

const DIM: usize = 1024;

fn service_with(config: RagConfig) -> RagService {
    RagService::builder()
        .config(config)
        .embedding_provider(Arc::new(HashingEmbedder::new(DIM)))
        .generation_provider(Arc::new(ExtractiveGenerator::new()))
        .build()
        .unwrap()
}

fn capitals() -> Vec<Document> {
    vec![
        Document::new("paris", "Paris is the capital of France."),
        Document::new("tokyo", "Tokyo is the capital of Japan."),
    ]
}

#[tokio::test]
async fn paris_outranks_tokyo_and_is_the_only_citation() {
    let config = RagConfig::builder().top_k(1).build().unwrap();
    let service = service_with(config);
    service.ingest_documents(&capitals()).await.unwrap();

    let both = service.retriever().retrieve("What is the capital of France?", 2, None).await.unwrap();
    assert_eq!(both.len(), 2);
    assert_eq!(both[0].chunk.document_id, "paris");
    assert!(both[0].score > both[1].score);

    let response = service.ask("What is the capital of France?").await;
    assert_eq!(response.retrieved.len(), 1);
    let paris_chunk = &response.retrieved[0].chunk.id;
    assert!(paris_chunk.starts_with("paris:"));
    assert_eq!(response.answer.status, AnswerStatus::Grounded);
    assert!(!response.answer.citations.is_empty());
    assert!(response.answer.citations.iter().all(|c| &c.chunk_id == paris_chunk));
}

#[tokio::test]
async fn unrelated_query_above_threshold_is_insufficient_evidence() {
    let config = RagConfig::builder().similarity_threshold(0.5).build().unwrap();
    let service = service_with(config);
    service.ingest_documents(&capitals()).await.unwrap();

    let response = service.ask("What is the boiling point of mercury?").await;
    assert!(response.retrieved.is_empty());
    assert!(!response.is_unable_to_answer());
    assert_eq!(response.answer.status, AnswerStatus::InsufficientEvidence);
    assert_eq!(response.answer.text, INSUFFICIENT_EVIDENCE_ANSWER);
    assert!(response.answer.citations.is_empty());
}

/// Replies with a fixed text.
struct Canned(String);

#[async_trait]
impl GenerationProvider for Canned {
    async fn generate(
        &self,
        _request: &GenerationRequest,
    ) -> Result<GenerationOutput, ProviderError> {
        Ok(GenerationOutput { text: self.0.clone(), usage: None })
    }

    fn name(&self) -> &str {
        "canned"
    }
}

fn retrieved(count: usize) -> Vec<RetrievedChunk> {
    (0..count)
        .map(|i| RetrievedChunk {
            chunk: Chunk {
                id: format!("doc{i}:0-10"),
                document_id: format!("doc{i}"),
                text: format!("Passage number {i}."),
                start_offset: 0,
                end_offset: 10,
                embedding: None,
                truncated: false,
                metadata: Default::default(),
            },
            score: 1.0 - i as f32 * 0.1,
            rank: i + 1,
        })
        .collect()
}

/// **Citations resolve under reject**
/// *For any* model reply over three passages, with the `reject` policy every
/// citation in the returned answer SHALL name a chunk passed to the call, and
/// a reply citing an unknown passage SHALL be replaced by the fallback.
mod prop_reject_citations_resolve {
    use super::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn citations_name_retrieved_chunks(markers in proptest::collection::vec(1usize..6, 1..6)) {
            let reply = markers
                .iter()
                .enumerate()
                .map(|(i, m)| format!("Statement {i} is supported [{m}]."))
                .collect::<Vec<_>>()
                .join(" ");
            let passages = retrieved(3);
            let generator = GroundedGenerator::new(Arc::new(Canned(reply)), GenerationConfig::default());

            let rt = tokio::runtime::Runtime::new().unwrap();
            let answer = rt.block_on(generator.answer("question", &passages)).unwrap();

            let ids: BTreeSet<&str> = passages.iter().map(|p| p.chunk.id.as_str()).collect();
            prop_assert!(answer.citations.iter().all(|c| ids.contains(c.chunk_id.as_str())));
            if markers.iter().any(|&m| m > 3) {
                prop_assert_eq!(answer.status, AnswerStatus::Rejected);
                prop_assert!(answer.citations.is_empty());
                prop_assert_eq!(answer.text.as_str(), INSUFFICIENT_EVIDENCE_ANSWER);
            } else {
                prop_assert_eq!(answer.status, AnswerStatus::Grounded);
                let cited: BTreeSet<usize> = answer.citations.iter().map(|c| c.marker).collect();
                let expected: BTreeSet<usize> = markers.iter().copied().collect();
                prop_assert_eq!(cited, expected);
                prop_assert_eq!(answer.groundedness(), Some(1.0));
            }
        }
    }
}

#[tokio::test]
async fn directory_ingestion_feeds_a_loadable_index() {
    let raw = tempfile::tempdir().unwrap();
    let processed = tempfile::tempdir().unwrap();
    let index_dir = tempfile::tempdir().unwrap();
    fs::write(raw.path().join("france.md"), "# Geography\n\nParis is the capital of France.\n")
        .unwrap();
    fs::write(raw.path().join("japan notes.txt"), "Tokyo is the capital of Japan.").unwrap();
    fs::write(
        raw.path().join("page.html"),
        "<html><body><script>alert(1)</script><p>Berlin is the capital of Germany.</p></body></html>",
    )
    .unwrap();
    fs::write(raw.path().join("scan.pdf"), b"%PDF-1.4").unwrap();
    fs::write(raw.path().join("broken.txt"), [0xff, 0xfe, 0x00]).unwrap();

    let chunker = Arc::new(TextChunker::new(ChunkingConfig::default()).unwrap());
    let ingestor = Ingestor::new(chunker);
    let report = ingestor.ingest_dir(raw.path(), processed.path()).unwrap();

    let ids: Vec<&str> = report.documents.iter().map(|d| d.doc_id.as_str()).collect();
    assert_eq!(ids, vec!["france.md", "japan_notes.txt", "page.html"]);
    let failed: Vec<&str> = report
        .failures
        .iter()
        .filter_map(|f| f.path.file_name().and_then(|n| n.to_str()))
        .collect();
    assert_eq!(failed, vec!["broken.txt", "scan.pdf"]);
    assert!(report.failures.iter().all(|f| f.kind == ErrorKind::Ingestion));
    assert!(processed.path().join("manifest.json").exists());
    assert!(processed.path().join("japan_notes.txt.json").exists());

    let embedder = Embedder::new(Arc::new(HashingEmbedder::new(DIM)), EmbeddingConfig::default());
    let built = ingestor.build_index(processed.path(), index_dir.path(), &embedder).await.unwrap();
    assert_eq!(built.manifest.entry_count, 3);
    assert!(built.failures.is_empty());

    let service = service_with(RagConfig::builder().top_k(1).build().unwrap());
    service.load_index(index_dir.path()).await.unwrap();
    let response = service.ask("What is the capital of France?").await;
    let top = &response.retrieved[0].chunk;
    assert_eq!(top.document_id, "france.md");
    assert_eq!(top.metadata.get("section").map(String::as_str), Some("Geography"));
    assert_eq!(response.answer.status, AnswerStatus::Grounded);

    let response = service.ask("What is the capital of Germany?").await;
    assert_eq!(response.retrieved[0].chunk.text, "Berlin is the capital of Germany.");
}

/// Rejects any batch mentioning "poison".
struct Picky(HashingEmbedder);

#[async_trait]
impl EmbeddingProvider for Picky {
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, ProviderError> {
        if texts.iter().any(|t| t.contains("poison")) {
            return Err(ProviderError::Rejected("content policy".into()));
        }
        self.0.embed_batch(texts).await
    }

    fn name(&self) -> &str {
        "picky"
    }
}

#[tokio::test]
async fn build_index_skips_documents_that_fail_to_embed() {
    let raw = tempfile::tempdir().unwrap();
    let processed = tempfile::tempdir().unwrap();
    let index_dir = tempfile::tempdir().unwrap();
    fs::write(raw.path().join("good.txt"), "Water boils at one hundred degrees.").unwrap();
    fs::write(raw.path().join("bad.txt"), "This sentence contains poison.").unwrap();

    let report = cite_rag::ingest(
        raw.path(),
        processed.path(),
        Arc::new(TextChunker::new(ChunkingConfig::default()).unwrap()),
    )
    .unwrap();
    assert_eq!(report.documents.len(), 2);

    let config = EmbeddingConfig { retry: RetryPolicy::none(), ..EmbeddingConfig::default() };
    let embedder = Embedder::new(Arc::new(Picky(HashingEmbedder::new(64))), config);
    let built = cite_rag::build_index(processed.path(), index_dir.path(), &embedder).await.unwrap();

    assert_eq!(built.documents, vec!["good.txt".to_string()]);
    assert_eq!(built.failures.len(), 1);
    assert_eq!(built.failures[0].kind, ErrorKind::EmbeddingUnavailable);
    assert_eq!(built.manifest.entry_count, 1);
}

#[tokio::test]
async fn ask_is_traced_under_one_request_id() {
    let storage = Arc::new(SharedTraceStorage::new());
    let subscriber = Registry::default().with(InMemoryTraceLayer::new(Arc::clone(&storage)));
    let _guard = tracing::subscriber::set_default(subscriber);

    let sink = Arc::new(MemorySink::new());
    let (emitter, drain) = TraceEmitter::spawn(sink.clone(), 64);
    let service = RagService::builder()
        .embedding_provider(Arc::new(HashingEmbedder::new(DIM)))
        .generation_provider(Arc::new(ExtractiveGenerator::new()))
        .emitter(emitter)
        .build()
        .unwrap();
    service.ingest_documents(&capitals()).await.unwrap();
    let response = service.ask("What is the capital of France?").await;
    let request_id = response.request_id.clone();
    drop(service);
    drain.await.unwrap();

    let spans = storage.get_trace(&request_id).expect("spans captured for the request");
    let names: BTreeSet<&str> = spans.iter().map(|s| s.name.as_str()).collect();
    assert!(names.contains("rag.ask"));
    assert!(names.contains("rag.retrieve"));
    assert!(names.contains("rag.generate"));

    let events: Vec<_> =
        sink.events().into_iter().filter(|e| e.request_id == request_id).collect();
    let stages: Vec<(Stage, Phase)> = events.iter().map(|e| (e.stage, e.phase)).collect();
    assert_eq!(
        stages,
        vec![
            (Stage::Retrieval, Phase::Start),
            (Stage::Retrieval, Phase::End),
            (Stage::Generation, Phase::Start),
            (Stage::Generation, Phase::End),
        ]
    );
    assert!(events[3].usage.is_some());
    assert!(sink.events().iter().any(|e| e.stage == Stage::Ingestion));
}
