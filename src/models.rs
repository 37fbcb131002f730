//! Core data models shared across the indexing and retrieval pipeline.

use serde::{Deserialize, Serialize};

use crate::error::RagError;

/// Logical partition a document is stored under. Every document, chunk, and
/// vector belongs to exactly one scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    PolicyManual,
    WorkspaceDocs,
}

impl Scope {
    /// Collection name in the vector store and scope tag in the metadata store.
    pub fn as_str(self) -> &'static str {
        match self {
            Scope::PolicyManual => "policy_manual",
            Scope::WorkspaceDocs => "workspace_docs",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "policy_manual" => Some(Scope::PolicyManual),
            "workspace_docs" => Some(Scope::WorkspaceDocs),
            _ => None,
        }
    }

    /// All scopes, in collection order.
    pub fn all() -> [Scope; 2] {
        [Scope::PolicyManual, Scope::WorkspaceDocs]
    }
}

/// Scope selector for search requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchScope {
    PolicyManual,
    WorkspaceDocs,
    Both,
}

impl SearchScope {
    pub fn scopes(self) -> Vec<Scope> {
        match self {
            SearchScope::PolicyManual => vec![Scope::PolicyManual],
            SearchScope::WorkspaceDocs => vec![Scope::WorkspaceDocs],
            SearchScope::Both => Scope::all().to_vec(),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SearchScope::PolicyManual => "policy_manual",
            SearchScope::WorkspaceDocs => "workspace_docs",
            SearchScope::Both => "both",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "policy_manual" => Some(SearchScope::PolicyManual),
            "workspace_docs" => Some(SearchScope::WorkspaceDocs),
            "both" => Some(SearchScope::Both),
            _ => None,
        }
    }
}

/// Supported input formats. Everything else is rejected before extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    Pdf,
    Docx,
    Txt,
    Md,
}

impl FileType {
    pub fn as_str(self) -> &'static str {
        match self {
            FileType::Pdf => "pdf",
            FileType::Docx => "docx",
            FileType::Txt => "txt",
            FileType::Md => "md",
        }
    }

    /// Dispatch on a lowercased extension. Legacy word-processor formats get
    /// a distinct message so callers can tell them from the unknown case.
    pub fn from_extension(ext: &str) -> Result<Self, RagError> {
        match ext {
            "pdf" => Ok(FileType::Pdf),
            "docx" => Ok(FileType::Docx),
            "txt" => Ok(FileType::Txt),
            "md" => Ok(FileType::Md),
            "doc" | "rtf" | "odt" => Err(RagError::UnsupportedFormat(format!(
                "legacy format .{ext}; convert to pdf, docx, txt, or md"
            ))),
            other => Err(RagError::UnsupportedFormat(format!(".{other}"))),
        }
    }
}

/// A document row in the metadata store.
#[derive(Debug, Clone, Serialize)]
pub struct Document {
    pub id: String,
    pub filename: String,
    pub filepath: String,
    pub filetype: FileType,
    pub filesize: i64,
    pub scope: Scope,
    pub uploaded_at: i64,
    pub last_indexed: i64,
    pub checksum: String,
    pub metadata: serde_json::Value,
}

/// A bounded, overlap-carrying slice of a document's extracted text; the
/// atomic unit of embedding and retrieval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// `{doc_id}-chunk-{index}`; shared with the vector store.
    pub id: String,
    pub doc_id: String,
    pub chunk_index: i64,
    pub text: String,
    /// Coarse token estimate (`ceil(len / 4)`), used for reporting and batch sizing.
    pub tokens: i64,
}

/// Lightweight metadata produced by extraction, stored as the document's
/// freeform JSON metadata.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_count: Option<usize>,
    pub word_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified_at: Option<i64>,
}

/// Extraction output: plain text plus lightweight metadata.
#[derive(Debug, Clone)]
pub struct Extracted {
    pub text: String,
    pub meta: ExtractMeta,
}

/// A citation tuple pointing at the source chunk of a retrieved snippet.
#[derive(Debug, Clone, Serialize)]
pub struct Attribution {
    pub doc_id: String,
    pub chunk_id: String,
    pub filename: String,
    /// Human-readable position hint, `"Chunk {index + 1}"`.
    pub range_hint: String,
    pub score: f32,
}

/// Assembled retrieval result handed to the chat layer.
///
/// Every attribution references a chunk whose text appears in
/// `answer_context`, and scores are non-increasing.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ContextPack {
    pub answer_context: String,
    pub attributions: Vec<Attribution>,
    pub total_results: usize,
    pub response_time_ms: u64,
}

/// Outcome of an `index_document` call, serialized as `{success, message}`
/// at the RPC boundary.
#[derive(Debug, Clone, Serialize)]
pub struct IndexReport {
    pub doc_id: String,
    pub chunk_count: usize,
    /// True when the checksum matched an existing document and the call
    /// short-circuited without re-embedding.
    pub deduplicated: bool,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_roundtrip() {
        for scope in Scope::all() {
            assert_eq!(Scope::parse(scope.as_str()), Some(scope));
        }
        assert_eq!(Scope::parse("everything"), None);
    }

    #[test]
    fn search_scope_expands_both() {
        assert_eq!(SearchScope::Both.scopes().len(), 2);
        assert_eq!(SearchScope::PolicyManual.scopes(), vec![Scope::PolicyManual]);
    }

    #[test]
    fn legacy_formats_are_rejected_with_hint() {
        let err = FileType::from_extension("doc").unwrap_err();
        assert!(err.to_string().contains("legacy"));
        assert!(FileType::from_extension("exe").is_err());
        assert_eq!(FileType::from_extension("md").unwrap(), FileType::Md);
    }
}
