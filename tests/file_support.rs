//! Multi-format ingest tests over generated fixtures.
//!
//! DOCX fixtures are built in-process with a ZIP writer; PDF fixtures are
//! assembled byte-by-byte with a correct xref table so the parser accepts
//! them. No binary test data is checked in.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use docrag::embedding::{l2_normalize, EmbeddingBackend};
use docrag::models::{FileType, Scope, SearchScope};
use docrag::{Config, RagEngine, RagError};

const DIMS: usize = 64;

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

async fn test_engine(root: &Path) -> RagEngine {
    let config: Config = toml::from_str(&format!(
        r#"
        [rag]
        [storage]
        root = "{}"
        [embedding]
        backend = "remote"
        model = "hashed-test"
        dims = {DIMS}
        "#,
        root.display()
    ))
    .unwrap();
    RagEngine::with_embedding_backend(config, Arc::new(HashedEmbedder), None)
        .await
        .unwrap()
}

/// Minimal docx (ZIP) whose `word/document.xml` carries `phrase`.
fn minimal_docx(phrase: &str) -> Vec<u8> {
    use std::io::Write;
    let mut buf = Vec::new();
    {
        let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
        zip.start_file("word/document.xml", zip::write::SimpleFileOptions::default())
            .unwrap();
        let xml = format!(
            "<?xml version=\"1.0\"?><w:document xmlns:w=\"http://schemas.openxmlformats.org/wordprocessingml/2006/main\"><w:body><w:p><w:r><w:t>{}</w:t></w:r></w:p></w:body></w:document>",
            phrase
        );
        zip.write_all(xml.as_bytes()).unwrap();
        zip.start_file("docProps/core.xml", zip::write::SimpleFileOptions::default())
            .unwrap();
        zip.write_all(
            b"<?xml version=\"1.0\"?><cp:coreProperties xmlns:cp=\"http://schemas.openxmlformats.org/package/2006/metadata/core-properties\" xmlns:dc=\"http://purl.org/dc/elements/1.1/\"><dc:title>Fixture Manual</dc:title><dc:creator>QA</dc:creator></cp:coreProperties>",
        )
        .unwrap();
        zip.finish().unwrap();
    }
    buf
}

/// Minimal one-page PDF with a correct xref table.
fn minimal_pdf() -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(b"%PDF-1.4\n");
    let o1 = out.len();
    out.extend_from_slice(b"1 0 obj << /Type /Catalog /Pages 2 0 R >> endobj\n");
    let o2 = out.len();
    out.extend_from_slice(b"2 0 obj << /Type /Pages /Kids [3 0 R] /Count 1 >> endobj\n");
    let o3 = out.len();
    out.extend_from_slice(b"3 0 obj << /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Contents 4 0 R /Resources << /Font << /F1 5 0 R >> >> >> endobj\n");
    let o4 = out.len();
    out.extend_from_slice(b"4 0 obj << /Length 53 >> stream\nBT /F1 12 Tf 100 700 Td (claims filing window) Tj ET\nendstream endobj\n");
    let o5 = out.len();
    out.extend_from_slice(
        b"5 0 obj << /Type /Font /Subtype /Type1 /BaseFont /Helvetica >> endobj\n",
    );
    let xref_start = out.len();
    out.extend_from_slice(b"xref\n0 6\n");
    out.extend_from_slice(format!("{:010} 65535 f \n", 0).as_bytes());
    for offset in [o1, o2, o3, o4, o5] {
        out.extend_from_slice(format!("{:010} 00000 n \n", offset).as_bytes());
    }
    out.extend_from_slice(b"trailer << /Size 6 /Root 1 0 R >>\nstartxref\n");
    out.extend_from_slice(format!("{}\n", xref_start).as_bytes());
    out.extend_from_slice(b"%%EOF\n");
    out
}

#[tokio::test]
async fn docx_ingest_extracts_body_and_core_properties() {
    let tmp = tempfile::tempdir().unwrap();
    let file = tmp.path().join("benefits.docx");
    std::fs::write(
        &file,
        minimal_docx("Dental coverage includes two annual cleanings per member."),
    )
    .unwrap();

    let engine = test_engine(tmp.path()).await;
    let report = engine
        .index_document(&file, Scope::PolicyManual)
        .await
        .unwrap();
    assert_eq!(report.chunk_count, 1);

    let docs = engine
        .documents_by_scope(Some(Scope::PolicyManual))
        .await
        .unwrap();
    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0].filetype, FileType::Docx);
    assert_eq!(docs[0].metadata["title"], "Fixture Manual");
    assert_eq!(docs[0].metadata["author"], "QA");

    let pack = engine
        .search("dental cleanings", SearchScope::PolicyManual, None)
        .await;
    assert_eq!(pack.total_results, 1);
    assert_eq!(pack.attributions[0].filename, "benefits.docx");
    assert!(pack.answer_context.contains("two annual cleanings"));
    engine.close().await;
}

#[tokio::test]
async fn pdf_fixture_parses_with_page_count() {
    let tmp = tempfile::tempdir().unwrap();
    let file = tmp.path().join("manual.pdf");
    std::fs::write(&file, minimal_pdf()).unwrap();

    // Fixture fonts carry no unicode map, so the extracted text is
    // best-effort; the structural metadata must still come through.
    let extracted = docrag::extract::extract(&file, 100).unwrap();
    assert_eq!(extracted.meta.page_count, Some(1));
}

#[tokio::test]
async fn corrupt_pdf_ingest_fails_cleanly() {
    let tmp = tempfile::tempdir().unwrap();
    let file = tmp.path().join("broken.pdf");
    std::fs::write(&file, b"not a valid pdf").unwrap();

    let engine = test_engine(tmp.path()).await;
    let err = engine
        .index_document(&file, Scope::PolicyManual)
        .await
        .unwrap_err();
    assert!(matches!(err, RagError::CorruptSource(_)));

    let stats = engine.stats().await.unwrap();
    assert_eq!(stats.total_documents, 0);
    engine.close().await;
}

#[tokio::test]
async fn mixed_corpus_reports_each_filetype() {
    let tmp = tempfile::tempdir().unwrap();
    std::fs::write(
        tmp.path().join("a.docx"),
        minimal_docx("Travel policy covers economy airfare for work trips."),
    )
    .unwrap();
    std::fs::write(
        tmp.path().join("b.txt"),
        "Lodging is reimbursed at the standard government rate.",
    )
    .unwrap();
    std::fs::write(
        tmp.path().join("c.md"),
        "# Meals\n\nPer diem applies to travel days only.",
    )
    .unwrap();

    let engine = test_engine(tmp.path()).await;
    for name in ["a.docx", "b.txt", "c.md"] {
        engine
            .index_document(&tmp.path().join(name), Scope::WorkspaceDocs)
            .await
            .unwrap();
    }

    let stats = engine.stats().await.unwrap();
    assert_eq!(stats.total_documents, 3);
    let types: Vec<&str> = stats.documents.iter().map(|t| t.filetype.as_str()).collect();
    assert!(types.contains(&"docx"));
    assert!(types.contains(&"txt"));
    assert!(types.contains(&"md"));
    engine.close().await;
}
