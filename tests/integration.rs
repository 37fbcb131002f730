//! End-to-end tests over the engine API.
//!
//! A deterministic bag-of-words embedder stands in for the network backends
//! so the scenarios run hermetically: identical text always maps to the same
//! vector, and shared vocabulary yields high cosine similarity.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use docrag::embedding::{l2_normalize, EmbeddingBackend};
use docrag::models::{Scope, SearchScope};
use docrag::vector::SqliteVectorStore;
use docrag::vector::VectorStore;
use docrag::{Config, RagEngine, RagError};

const DIMS: usize = 64;

/// Deterministic embedder: words hash into buckets, vectors are normalized.
struct HashedEmbedder;

#[async_trait]
impl EmbeddingBackend for HashedEmbedder {
    fn id(&self) -> &str {
        "hashed-test"
    }

    fn dims(&self) -> usize {
        DIMS
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RagError> {
        Ok(texts
            .iter()
            .map(|text| {
                let mut vector = vec![0.0f32; DIMS];
                for word in text.split_whitespace() {
                    let word = word
                        .trim_matches(|c: char| !c.is_alphanumeric())
                        .to_lowercase();
                    if word.is_empty() {
                        continue;
                    }
                    let digest = Sha256::digest(word.as_bytes());
                    let bucket = u16::from_le_bytes([digest[0], digest[1]]) as usize % DIMS;
                    vector[bucket] += 1.0;
                }
                l2_normalize(&mut vector);
                vector
            })
            .collect())
    }
}

/// Fails every call after the first. Exercises mid-ingest rollback.
struct FailAfterFirstCall {
    calls: AtomicUsize,
}

#[async_trait]
impl EmbeddingBackend for FailAfterFirstCall {
    fn id(&self) -> &str {
        "failing-test"
    }

    fn dims(&self) -> usize {
        DIMS
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RagError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) > 0 {
            return Err(RagError::EmbeddingBackend {
                offset: 0,
                message: "synthetic backend outage".to_string(),
            });
        }
        HashedEmbedder.embed(texts).await
    }
}

fn test_config(root: &Path, max_file_size_mib: u64) -> Config {
    toml::from_str(&format!(
        r#"
        [rag]
        chunk_size = 500
        chunk_overlap = 50
        search_limit = 5
        max_file_size_mib = {max_file_size_mib}

        [storage]
        root = "{}"

        [embedding]
        backend = "remote"
        model = "hashed-test"
        dims = {DIMS}
        batch_size = 1
        "#,
        root.display()
    ))
    .unwrap()
}

async fn test_engine(root: &Path) -> RagEngine {
    RagEngine::with_embedding_backend(test_config(root, 100), Arc::new(HashedEmbedder), None)
        .await
        .unwrap()
}

/// Enough sentence-terminated text to produce several chunks at size 500.
fn multi_chunk_text(topic: &str, sentences: usize) -> String {
    (0..sentences)
        .map(|i| format!("Clause {i} of the {topic} policy explains the coverage in detail. "))
        .collect()
}

#[tokio::test]
async fn text_ingest_then_query_returns_attributed_pack() {
    let tmp = tempfile::tempdir().unwrap();
    let file = tmp.path().join("policy.txt");
    let content = "Workers compensation policy regarding medical benefits.";
    std::fs::write(&file, content).unwrap();

    let engine = test_engine(tmp.path()).await;
    let report = engine
        .index_document(&file, Scope::PolicyManual)
        .await
        .unwrap();
    assert_eq!(
        report.message,
        "Document indexed successfully. Created 1 chunks."
    );
    assert!(!report.deduplicated);

    let pack = engine
        .search("medical benefits", SearchScope::PolicyManual, Some(5))
        .await;
    assert_eq!(pack.total_results, 1);
    assert_eq!(pack.attributions[0].filename, "policy.txt");
    assert_eq!(pack.attributions[0].range_hint, "Chunk 1");
    assert_eq!(pack.answer_context, content);
    engine.close().await;
}

#[tokio::test]
async fn reingesting_identical_bytes_dedups_by_checksum() {
    let tmp = tempfile::tempdir().unwrap();
    let file = tmp.path().join("policy.txt");
    std::fs::write(&file, "Workers compensation policy regarding medical benefits.").unwrap();

    let engine = test_engine(tmp.path()).await;
    let first = engine
        .index_document(&file, Scope::PolicyManual)
        .await
        .unwrap();
    let second = engine
        .index_document(&file, Scope::PolicyManual)
        .await
        .unwrap();

    assert!(!first.deduplicated);
    assert!(second.deduplicated);
    assert_eq!(second.doc_id, first.doc_id);
    assert_eq!(second.message, "Document already indexed.");

    let stats = engine.stats().await.unwrap();
    assert_eq!(stats.total_documents, 1);
    assert_eq!(stats.chunks.total_chunks, 1);
    engine.close().await;
}

#[tokio::test]
async fn oversized_file_is_rejected_with_no_writes() {
    let tmp = tempfile::tempdir().unwrap();
    let file = tmp.path().join("huge.txt");
    std::fs::write(&file, vec![b'a'; 1024 * 1024 + 1]).unwrap();

    let config = test_config(tmp.path(), 1);
    let engine = RagEngine::with_embedding_backend(config, Arc::new(HashedEmbedder), None)
        .await
        .unwrap();

    let err = engine
        .index_document(&file, Scope::PolicyManual)
        .await
        .unwrap_err();
    assert!(matches!(err, RagError::OversizedSource { limit_mib: 1, .. }));
    assert!(err.to_string().contains("MiB limit"));

    let stats = engine.stats().await.unwrap();
    assert_eq!(stats.total_documents, 0);
    assert_eq!(stats.chunks.total_chunks, 0);
    engine.close().await;
}

#[tokio::test]
async fn delete_cascades_through_both_stores() {
    let tmp = tempfile::tempdir().unwrap();
    let file = tmp.path().join("manual.md");
    std::fs::write(&file, multi_chunk_text("travel reimbursement", 40)).unwrap();

    let engine = test_engine(tmp.path()).await;
    let report = engine
        .index_document(&file, Scope::PolicyManual)
        .await
        .unwrap();
    assert!(report.chunk_count >= 3, "expected a multi-chunk document");

    assert!(engine.delete_document(&report.doc_id).await.unwrap());
    assert!(!engine.is_document_indexed(&file).await.unwrap());
    assert!(engine
        .chunks_for_document(&report.doc_id)
        .await
        .unwrap()
        .is_empty());

    let pack = engine
        .search("travel reimbursement", SearchScope::PolicyManual, None)
        .await;
    assert_eq!(pack.total_results, 0);
    engine.close().await;

    // The vector store itself holds nothing for the document either.
    let vectors = SqliteVectorStore::open(&tmp.path().join("vectors"))
        .await
        .unwrap();
    let hits = vectors
        .query("policy_manual", &vec![1.0; DIMS], 10)
        .await
        .unwrap();
    assert!(hits.iter().all(|h| h.payload.doc_id != report.doc_id));
    vectors.close().await;
}

#[tokio::test]
async fn search_is_isolated_per_scope() {
    let tmp = tempfile::tempdir().unwrap();
    let policy = tmp.path().join("a.md");
    let workspace = tmp.path().join("b.md");
    std::fs::write(&policy, "Remote work arrangements require manager approval.").unwrap();
    std::fs::write(&workspace, "Remote work notes from the platform team meeting.").unwrap();

    let engine = test_engine(tmp.path()).await;
    engine
        .index_document(&policy, Scope::PolicyManual)
        .await
        .unwrap();
    engine
        .index_document(&workspace, Scope::WorkspaceDocs)
        .await
        .unwrap();

    let policy_pack = engine
        .search("remote work", SearchScope::PolicyManual, None)
        .await;
    assert!(!policy_pack.attributions.is_empty());
    assert!(policy_pack
        .attributions
        .iter()
        .all(|a| a.filename == "a.md"));

    let workspace_pack = engine
        .search("remote work", SearchScope::WorkspaceDocs, None)
        .await;
    assert!(!workspace_pack.attributions.is_empty());
    assert!(workspace_pack
        .attributions
        .iter()
        .all(|a| a.filename == "b.md"));

    let both = engine.search("remote work", SearchScope::Both, None).await;
    let filenames: Vec<&str> = both
        .attributions
        .iter()
        .map(|a| a.filename.as_str())
        .collect();
    assert!(filenames.contains(&"a.md"));
    assert!(filenames.contains(&"b.md"));
    engine.close().await;
}

#[tokio::test]
async fn chunk_indices_are_dense_and_scores_non_increasing() {
    let tmp = tempfile::tempdir().unwrap();
    let file = tmp.path().join("manual.md");
    std::fs::write(&file, multi_chunk_text("equipment", 50)).unwrap();

    let engine = test_engine(tmp.path()).await;
    let report = engine
        .index_document(&file, Scope::PolicyManual)
        .await
        .unwrap();

    let chunks = engine.chunks_for_document(&report.doc_id).await.unwrap();
    assert_eq!(chunks.len(), report.chunk_count);
    for (i, chunk) in chunks.iter().enumerate() {
        assert_eq!(chunk.chunk_index, i as i64);
        assert_eq!(chunk.id, format!("{}-chunk-{i}", report.doc_id));
    }

    let pack = engine
        .search("equipment coverage", SearchScope::PolicyManual, Some(5))
        .await;
    assert!(pack.total_results > 1);
    for pair in pack.attributions.windows(2) {
        assert!(pair[0].score >= pair[1].score);
    }
    // One snippet per attribution, in order.
    let mut cursor = 0;
    for attribution in &pack.attributions {
        let chunk = chunks
            .iter()
            .find(|c| c.id == attribution.chunk_id)
            .expect("attributed chunk exists");
        let at = pack.answer_context[cursor..]
            .find(&chunk.text)
            .expect("attributed text appears in order");
        cursor += at + chunk.text.len();
    }
    engine.close().await;
}

#[tokio::test]
async fn failed_embedding_rolls_back_both_stores() {
    let tmp = tempfile::tempdir().unwrap();
    let file = tmp.path().join("manual.md");
    std::fs::write(&file, multi_chunk_text("dental", 40)).unwrap();

    let engine = RagEngine::with_embedding_backend(
        test_config(tmp.path(), 100),
        Arc::new(FailAfterFirstCall {
            calls: AtomicUsize::new(0),
        }),
        None,
    )
    .await
    .unwrap();

    let err = engine
        .index_document(&file, Scope::PolicyManual)
        .await
        .unwrap_err();
    assert!(matches!(err, RagError::EmbeddingBackend { .. }));

    assert!(!engine.is_document_indexed(&file).await.unwrap());
    let stats = engine.stats().await.unwrap();
    assert_eq!(stats.total_documents, 0);
    assert_eq!(stats.chunks.total_chunks, 0);
    engine.close().await;

    // No orphaned vectors survive the cleanup.
    let vectors = SqliteVectorStore::open(&tmp.path().join("vectors"))
        .await
        .unwrap();
    let hits = vectors
        .query("policy_manual", &vec![1.0; DIMS], 10)
        .await
        .unwrap();
    assert!(hits.is_empty());
    vectors.close().await;

    // The subsystem stays usable: a healthy engine over the same root indexes
    // the same file cleanly.
    let engine = test_engine(tmp.path()).await;
    let report = engine
        .index_document(&file, Scope::PolicyManual)
        .await
        .unwrap();
    assert!(report.chunk_count >= 3);
    engine.close().await;
}

#[tokio::test]
async fn cancellation_leaves_no_partial_state() {
    let tmp = tempfile::tempdir().unwrap();
    let file = tmp.path().join("manual.md");
    std::fs::write(&file, multi_chunk_text("vision", 40)).unwrap();

    let engine = test_engine(tmp.path()).await;
    let cancel = docrag::CancelFlag::default();
    cancel.cancel();

    let err = engine
        .index_document_with_cancel(&file, Scope::PolicyManual, &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, RagError::Cancelled));

    assert!(!engine.is_document_indexed(&file).await.unwrap());
    let stats = engine.stats().await.unwrap();
    assert_eq!(stats.total_documents, 0);
    engine.close().await;
}

#[tokio::test]
async fn requested_limit_is_validated_and_capped() {
    let tmp = tempfile::tempdir().unwrap();
    for i in 0..8 {
        let file = tmp.path().join(format!("note{i}.txt"));
        std::fs::write(
            &file,
            format!("Shared vocabulary about onboarding checklists, item {i}."),
        )
        .unwrap();
    }

    let engine = test_engine(tmp.path()).await;
    for i in 0..8 {
        engine
            .index_document(&tmp.path().join(format!("note{i}.txt")), Scope::WorkspaceDocs)
            .await
            .unwrap();
    }

    let capped = engine
        .search("onboarding checklists", SearchScope::WorkspaceDocs, Some(50))
        .await;
    assert!(capped.total_results <= 5, "cap at configured search_limit");

    let one = engine
        .search("onboarding checklists", SearchScope::WorkspaceDocs, Some(1))
        .await;
    assert_eq!(one.total_results, 1);
    engine.close().await;
}

#[tokio::test]
async fn empty_document_reports_no_extractable_text() {
    let tmp = tempfile::tempdir().unwrap();
    let file = tmp.path().join("blank.txt");
    std::fs::write(&file, "   \n\n  ").unwrap();

    let engine = test_engine(tmp.path()).await;
    let err = engine
        .index_document(&file, Scope::WorkspaceDocs)
        .await
        .unwrap_err();
    assert!(matches!(err, RagError::NoExtractableText(_)));
    engine.close().await;
}

#[tokio::test]
async fn clear_all_purges_both_stores_but_keeps_history() {
    let tmp = tempfile::tempdir().unwrap();
    let a = tmp.path().join("a.txt");
    let b = tmp.path().join("b.md");
    std::fs::write(&a, "Expense reports are due on the fifth business day.").unwrap();
    std::fs::write(&b, "Expense policy covers travel and lodging costs.").unwrap();

    let engine = test_engine(tmp.path()).await;
    engine.index_document(&a, Scope::PolicyManual).await.unwrap();
    engine.index_document(&b, Scope::WorkspaceDocs).await.unwrap();
    engine.search("expense", SearchScope::Both, None).await;

    engine.clear_all().await.unwrap();

    let stats = engine.stats().await.unwrap();
    assert_eq!(stats.total_documents, 0);
    assert_eq!(stats.chunks.total_chunks, 0);

    let pack = engine.search("expense", SearchScope::Both, None).await;
    assert_eq!(pack.total_results, 0);
    engine.close().await;
}

#[tokio::test]
async fn stats_break_down_by_filetype() {
    let tmp = tempfile::tempdir().unwrap();
    let a = tmp.path().join("a.txt");
    let b = tmp.path().join("b.md");
    std::fs::write(&a, "Parental leave policy grants sixteen weeks of leave.").unwrap();
    std::fs::write(&b, "Team norms document for the platform group members.").unwrap();

    let engine = test_engine(tmp.path()).await;
    engine.index_document(&a, Scope::PolicyManual).await.unwrap();
    engine.index_document(&b, Scope::WorkspaceDocs).await.unwrap();

    let stats = engine.stats().await.unwrap();
    assert_eq!(stats.total_documents, 2);
    assert!(stats.total_size > 0);
    assert!(stats.chunks.avg_tokens > 0.0);

    let types: Vec<&str> = stats.documents.iter().map(|t| t.filetype.as_str()).collect();
    assert!(types.contains(&"txt"));
    assert!(types.contains(&"md"));
    engine.close().await;
}

#[tokio::test]
async fn watcher_enumeration_indexes_existing_files() {
    let tmp = tempfile::tempdir().unwrap();
    let folder = tmp.path().join("policy-manuals");
    std::fs::create_dir_all(&folder).unwrap();
    let file = folder.join("handbook.md");
    std::fs::write(&file, "Security handbook describes the incident response steps.").unwrap();
    std::fs::write(folder.join("ignored.bin"), b"\x00\x01").unwrap();

    let mut config = test_config(tmp.path(), 100);
    config.watcher.auto_index = true;
    config.watcher.watch = false;

    let engine = Arc::new(
        RagEngine::with_embedding_backend(config, Arc::new(HashedEmbedder), None)
            .await
            .unwrap(),
    );
    let watcher = docrag::watcher::PolicyWatcher::start(engine.clone(), &folder)
        .await
        .unwrap();

    // The queue drains asynchronously; poll with a generous deadline.
    let deadline = std::time::Instant::now() + std::time::Duration::from_secs(10);
    loop {
        if engine.is_document_indexed(&file).await.unwrap() {
            break;
        }
        assert!(
            std::time::Instant::now() < deadline,
            "watcher never indexed the enumerated file"
        );
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    }

    watcher.stop().await;
    let stats = engine.stats().await.unwrap();
    assert_eq!(stats.total_documents, 1, "unsupported files are skipped");
    engine.close().await;
}
