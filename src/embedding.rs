//! Embedding backend abstraction and implementations.
//!
//! Defines the [`EmbeddingBackend`] trait the orchestrators depend on, plus
//! two concrete backends selected by configuration at initialization:
//!
//! - **[`RemoteBackend`]** — calls a cloud embeddings API with sub-batching,
//!   retry, and exponential backoff. Requires a credential.
//! - **`LocalBackend`** — runs a small model via fastembed with an on-disk
//!   cache; offline after the first model download. Compiled behind the
//!   `local-embeddings` feature.
//!
//! Every vector handed back is L2-normalized to the backend's fixed
//! dimension. Sub-batch failures are not retried silently; they surface with
//! the offset of the failing batch.
//!
//! Also provides the vector utilities shared with the vector store:
//! [`vec_to_blob`], [`blob_to_vec`], and [`cosine_similarity`].

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::config::{EmbeddingConfig, EMBEDDING_API_KEY_ENV};
use crate::error::RagError;

/// Capability the pipeline needs from an embedding provider.
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    /// Backend/model identifier for logs and diagnostics.
    fn id(&self) -> &str;

    /// Fixed output dimension.
    fn dims(&self) -> usize;

    /// Embed a batch of texts, one L2-normalized vector per input, in input
    /// order. The backend sub-batches internally to bound peak memory.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RagError>;
}

/// Instantiate the configured backend.
///
/// The remote credential comes from the `credential` argument when given,
/// falling back to the `DOCRAG_EMBEDDING_API_KEY` environment variable. It is
/// held in memory only.
pub fn create_backend(
    config: &EmbeddingConfig,
    credential: Option<String>,
    models_dir: &std::path::Path,
) -> Result<Arc<dyn EmbeddingBackend>> {
    match config.backend.as_str() {
        "remote" => Ok(Arc::new(RemoteBackend::new(config, credential)?)),
        #[cfg(feature = "local-embeddings")]
        "local" => Ok(Arc::new(local::LocalBackend::new(config, models_dir)?)),
        #[cfg(not(feature = "local-embeddings"))]
        "local" => {
            let _ = models_dir;
            bail!("Local embedding backend requires --features local-embeddings")
        }
        other => bail!("Unknown embedding backend: {}", other),
    }
}

// ============ Remote backend ============

/// Embedding backend calling a cloud embeddings API (`POST
/// {api_base}/embeddings`, OpenAI-compatible wire shape).
///
/// Retry strategy, per sub-batch:
/// - HTTP 429 and 5xx → retry with exponential backoff (1s, 2s, 4s, … capped)
/// - other 4xx → fail immediately
/// - network errors and timeouts → retry
pub struct RemoteBackend {
    model: String,
    dims: usize,
    api_base: String,
    api_key: String,
    sub_batch: usize,
    max_retries: u32,
    client: reqwest::Client,
}

impl RemoteBackend {
    pub fn new(config: &EmbeddingConfig, credential: Option<String>) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for the remote backend"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow::anyhow!("embedding.dims required for the remote backend"))?;

        let api_key = match credential {
            Some(key) if !key.is_empty() => key,
            _ => std::env::var(EMBEDDING_API_KEY_ENV).map_err(|_| {
                anyhow::anyhow!(
                    "no embedding credential supplied and {} is not set",
                    EMBEDDING_API_KEY_ENV
                )
            })?,
        };

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            model,
            dims,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            api_key,
            sub_batch: config.sub_batch,
            max_retries: config.max_retries,
            client,
        })
    }

    async fn embed_sub_batch(
        &self,
        offset: usize,
        texts: &[String],
    ) -> Result<Vec<Vec<f32>>, RagError> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let backend_err = |message: String| RagError::EmbeddingBackend { offset, message };
        let mut last_err: Option<RagError> = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .client
                .post(format!("{}/embeddings", self.api_base))
                .header("Authorization", format!("Bearer {}", self.api_key))
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        let json: serde_json::Value = response
                            .json()
                            .await
                            .map_err(|e| backend_err(format!("invalid response body: {e}")))?;
                        return parse_embeddings_response(&json, texts.len(), self.dims)
                            .map_err(backend_err);
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    if status.as_u16() == 429 || status.is_server_error() {
                        last_err = Some(backend_err(format!("API error {status}: {body_text}")));
                        continue;
                    }
                    return Err(backend_err(format!("API error {status}: {body_text}")));
                }
                Err(e) => {
                    last_err = Some(backend_err(format!("request failed: {e}")));
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| backend_err("embedding failed after retries".to_string())))
    }
}

#[async_trait]
impl EmbeddingBackend for RemoteBackend {
    fn id(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RagError> {
        let mut vectors = Vec::with_capacity(texts.len());
        for (batch_index, batch) in texts.chunks(self.sub_batch).enumerate() {
            let offset = batch_index * self.sub_batch;
            let mut batch_vectors = self.embed_sub_batch(offset, batch).await?;
            for v in &mut batch_vectors {
                l2_normalize(v);
            }
            vectors.append(&mut batch_vectors);
        }
        Ok(vectors)
    }
}

/// Parse `data[].{index, embedding}` and return vectors in input order.
fn parse_embeddings_response(
    json: &serde_json::Value,
    expected: usize,
    dims: usize,
) -> Result<Vec<Vec<f32>>, String> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| "missing data array".to_string())?;

    let mut indexed: Vec<(usize, Vec<f32>)> = Vec::with_capacity(data.len());
    for (pos, item) in data.iter().enumerate() {
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(pos);
        let embedding: Vec<f32> = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| "missing embedding".to_string())?
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();
        if embedding.len() != dims {
            return Err(format!(
                "backend returned {}-dim vector, expected {}",
                embedding.len(),
                dims
            ));
        }
        indexed.push((index, embedding));
    }

    if indexed.len() != expected {
        return Err(format!(
            "backend returned {} vectors for {} inputs",
            indexed.len(),
            expected
        ));
    }

    indexed.sort_by_key(|(index, _)| *index);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

// ============ Local backend (fastembed) ============

#[cfg(feature = "local-embeddings")]
mod local {
    use super::*;
    use std::path::{Path, PathBuf};

    /// Embedding backend running fastembed models locally. Models download on
    /// first use into the configured cache directory; later runs are offline.
    pub struct LocalBackend {
        model: fastembed::EmbeddingModel,
        model_name: String,
        dims: usize,
        sub_batch: usize,
        cache_dir: PathBuf,
    }

    impl LocalBackend {
        pub fn new(config: &EmbeddingConfig, models_dir: &Path) -> Result<Self> {
            let model_name = config
                .model
                .clone()
                .unwrap_or_else(|| "all-minilm-l6-v2".to_string());
            let (model, dims) = resolve_model(&model_name)?;
            Ok(Self {
                model,
                model_name,
                dims: config.dims.unwrap_or(dims),
                sub_batch: config.sub_batch,
                cache_dir: models_dir.to_path_buf(),
            })
        }
    }

    fn resolve_model(name: &str) -> Result<(fastembed::EmbeddingModel, usize)> {
        match name {
            "all-minilm-l6-v2" => Ok((fastembed::EmbeddingModel::AllMiniLML6V2, 384)),
            "bge-small-en-v1.5" => Ok((fastembed::EmbeddingModel::BGESmallENV15, 384)),
            "bge-base-en-v1.5" => Ok((fastembed::EmbeddingModel::BGEBaseENV15, 768)),
            "multilingual-e5-small" => {
                Ok((fastembed::EmbeddingModel::MultilingualE5Small, 384))
            }
            other => bail!(
                "Unknown local embedding model: '{}'. Supported: all-minilm-l6-v2, \
                 bge-small-en-v1.5, bge-base-en-v1.5, multilingual-e5-small",
                other
            ),
        }
    }

    #[async_trait]
    impl EmbeddingBackend for LocalBackend {
        fn id(&self) -> &str {
            &self.model_name
        }

        fn dims(&self) -> usize {
            self.dims
        }

        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RagError> {
            let model = self.model.clone();
            let cache_dir = self.cache_dir.clone();
            let sub_batch = self.sub_batch;
            let texts = texts.to_vec();

            let mut vectors = tokio::task::spawn_blocking(move || {
                let mut engine = fastembed::TextEmbedding::try_new(
                    fastembed::InitOptions::new(model)
                        .with_cache_dir(cache_dir)
                        .with_show_download_progress(false),
                )
                .map_err(|e| RagError::EmbeddingBackend {
                    offset: 0,
                    message: format!("failed to initialize local model: {e}"),
                })?;

                engine
                    .embed(texts, Some(sub_batch))
                    .map_err(|e| RagError::EmbeddingBackend {
                        offset: 0,
                        message: format!("local embedding failed: {e}"),
                    })
            })
            .await
            .map_err(|e| RagError::EmbeddingBackend {
                offset: 0,
                message: format!("embedding task panicked: {e}"),
            })??;

            for v in &mut vectors {
                l2_normalize(v);
            }
            Ok(vectors)
        }
    }
}

// ============ Vector utilities ============

/// Scale a vector to unit length. Zero vectors are left untouched.
pub fn l2_normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for x in vector.iter_mut() {
            *x /= norm;
        }
    }
}

/// Encode a float vector as little-endian f32 bytes for BLOB storage.
pub fn vec_to_blob(vector: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vector.len() * 4);
    for &v in vector {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Cosine similarity in `[-1.0, 1.0]`. Returns `0.0` for empty vectors or
/// mismatched lengths.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }
    dot / denom
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blob_roundtrip() {
        let v = vec![1.0f32, -2.5, 3.125, 0.0, -0.001];
        assert_eq!(blob_to_vec(&vec_to_blob(&v)), v);
    }

    #[test]
    fn normalize_produces_unit_length() {
        let mut v = vec![3.0f32, 4.0];
        l2_normalize(&mut v);
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-6);
    }

    #[test]
    fn normalize_leaves_zero_vector() {
        let mut v = vec![0.0f32, 0.0];
        l2_normalize(&mut v);
        assert_eq!(v, vec![0.0, 0.0]);
    }

    #[test]
    fn cosine_identical_and_orthogonal() {
        let a = vec![1.0f32, 0.0];
        let b = vec![0.0f32, 1.0];
        assert!((cosine_similarity(&a, &a) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
        assert_eq!(cosine_similarity(&a, &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }

    #[test]
    fn response_parsing_orders_by_index() {
        let json = serde_json::json!({
            "data": [
                {"index": 1, "embedding": [0.0, 1.0]},
                {"index": 0, "embedding": [1.0, 0.0]},
            ]
        });
        let vectors = parse_embeddings_response(&json, 2, 2).unwrap();
        assert_eq!(vectors[0], vec![1.0, 0.0]);
        assert_eq!(vectors[1], vec![0.0, 1.0]);
    }

    #[test]
    fn response_parsing_rejects_wrong_dims_or_count() {
        let wrong_dims = serde_json::json!({"data": [{"index": 0, "embedding": [1.0]}]});
        assert!(parse_embeddings_response(&wrong_dims, 1, 2).is_err());

        let wrong_count = serde_json::json!({"data": []});
        assert!(parse_embeddings_response(&wrong_count, 1, 2).is_err());
    }
}
