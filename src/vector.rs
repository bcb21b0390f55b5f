//! Vector-search collaborator contract.
//!
//! The retrieval core consumes embedding and vector-similarity search, it
//! does not implement them: [`Embedder`] and [`VectorIndex`] are the seams
//! behind which a real provider lives. Two adapters ship with the crate:
//! [`HttpEmbedder`] speaks the OpenAI `/v1/embeddings` contract, and
//! [`MemoryVectorIndex`] is a brute-force cosine index used by the binary
//! and by tests.

use std::{collections::HashMap, time::Duration};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::{
    document::{ContentType, DocId, TenantId},
    error::{Error, Result},
};

pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";
pub const DEFAULT_EMBEDDING_ENDPOINT: &str =
    "https://api.openai.com/v1/embeddings";
pub const API_KEY_ENV_VAR: &str = "OPENAI_API_KEY";

/// Transient rate limits are retried this many times before the provider
/// is reported unavailable.
pub const RETRY_BUDGET: u32 = 2;
const RETRY_BASE_DELAY: Duration = Duration::from_millis(250);

/// Whether a vector index reports higher-is-better similarities or
/// lower-is-better distances. The index must disclose its convention so
/// branch scores can be oriented before normalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoreConvention {
    Similarity,
    Distance,
}

/// One candidate from a vector query, raw score in the index's own
/// convention.
#[derive(Debug, Clone)]
pub struct VectorHit {
    pub doc_id: DocId,
    pub score: f32,
}

/// Metadata stored alongside a vector, mirroring what the engine knows at
/// upsert time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorMetadata {
    pub title: String,
    pub content_type: ContentType,
    pub source_url: Option<String>,
}

/// Turns text into a fixed-dimension vector. Network-backed in production;
/// always invoked through [`embed_with_retry`].
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// Tenant-filtered similarity search over embedded documents.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    fn convention(&self) -> ScoreConvention;

    async fn upsert(
        &self,
        tenant_id: TenantId,
        doc_id: DocId,
        vector: Vec<f32>,
        metadata: VectorMetadata,
    ) -> Result<()>;

    async fn query(
        &self,
        tenant_id: TenantId,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<VectorHit>>;

    async fn remove(&self, tenant_id: TenantId, doc_id: DocId) -> Result<bool>;
}

/// Embed with a bounded per-attempt timeout and a small retry budget.
///
/// Only `ProviderRateLimited` is retried, with exponential backoff; a rate
/// limit that persists past the budget, or any timeout, is surfaced as
/// `ProviderUnavailable` rather than swallowed.
pub async fn embed_with_retry(
    embedder: &dyn Embedder,
    text: &str,
    timeout: Duration,
) -> Result<Vec<f32>> {
    let mut attempt = 0;
    loop {
        match tokio::time::timeout(timeout, embedder.embed(text)).await {
            Ok(Ok(vector)) => return Ok(vector),
            Ok(Err(Error::ProviderRateLimited)) if attempt < RETRY_BUDGET => {
                let delay = RETRY_BASE_DELAY * 2u32.pow(attempt);
                tracing::debug!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "embedding provider rate limited, backing off"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Ok(Err(Error::ProviderRateLimited)) => {
                return Err(Error::ProviderUnavailable(format!(
                    "rate limited after {RETRY_BUDGET} retries"
                )));
            }
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                return Err(Error::ProviderUnavailable(format!(
                    "embed call exceeded {}ms",
                    timeout.as_millis()
                )));
            }
        }
    }
}

/// OpenAI-compatible HTTP embedding provider.
pub struct HttpEmbedder {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
}

impl HttpEmbedder {
    pub fn new(api_key: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: DEFAULT_EMBEDDING_ENDPOINT.to_string(),
            api_key,
            model: DEFAULT_EMBEDDING_MODEL.to_string(),
        }
    }

    /// Build from `OPENAI_API_KEY`, or `None` when unset.
    pub fn from_env() -> Option<Self> {
        std::env::var(API_KEY_ENV_VAR).ok().map(Self::new)
    }

    pub fn with_endpoint(mut self, endpoint: String) -> Self {
        self.endpoint = endpoint;
        self
    }

    pub fn with_model(mut self, model: String) -> Self {
        self.model = model;
        self
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Deserialize)]
struct EmbeddingItem {
    embedding: Vec<f32>,
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&EmbeddingRequest {
                model: &self.model,
                input: text,
            })
            .send()
            .await
            .map_err(|e| Error::ProviderUnavailable(e.to_string()))?;

        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(Error::ProviderRateLimited);
        }
        if !response.status().is_success() {
            return Err(Error::ProviderUnavailable(format!(
                "embedding endpoint returned {}",
                response.status()
            )));
        }

        let body: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| Error::ProviderUnavailable(e.to_string()))?;
        body.data
            .into_iter()
            .next()
            .map(|item| item.embedding)
            .ok_or_else(|| {
                Error::ProviderUnavailable(
                    "embedding response contained no vectors".to_string(),
                )
            })
    }
}

impl std::fmt::Debug for HttpEmbedder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpEmbedder")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

/// Placeholder for deployments without an embedding provider. Every call
/// reports the provider unavailable, which keyword and hybrid searches
/// tolerate through the degraded-result policy.
#[derive(Debug, Default)]
pub struct UnconfiguredEmbedder;

#[async_trait]
impl Embedder for UnconfiguredEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Err(Error::ProviderUnavailable(format!(
            "no embedding provider configured (set {API_KEY_ENV_VAR})"
        )))
    }
}

/// Brute-force cosine-similarity index, keyed by tenant.
///
/// Stands in for an external vector database; the durable production
/// collaborator lives outside this crate.
#[derive(Debug, Default)]
pub struct MemoryVectorIndex {
    tenants: RwLock<HashMap<TenantId, HashMap<DocId, Vec<f32>>>>,
}

impl MemoryVectorIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

pub(crate) fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[async_trait]
impl VectorIndex for MemoryVectorIndex {
    fn convention(&self) -> ScoreConvention {
        ScoreConvention::Similarity
    }

    async fn upsert(
        &self,
        tenant_id: TenantId,
        doc_id: DocId,
        vector: Vec<f32>,
        _metadata: VectorMetadata,
    ) -> Result<()> {
        self.tenants
            .write()
            .entry(tenant_id)
            .or_default()
            .insert(doc_id, vector);
        Ok(())
    }

    async fn query(
        &self,
        tenant_id: TenantId,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<VectorHit>> {
        let tenants = self.tenants.read();
        let Some(docs) = tenants.get(&tenant_id) else {
            return Ok(Vec::new());
        };

        let mut hits: Vec<VectorHit> = docs
            .iter()
            .map(|(&doc_id, stored)| VectorHit {
                doc_id,
                score: cosine(vector, stored),
            })
            .collect();
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.doc_id.cmp(&b.doc_id))
        });
        hits.truncate(top_k);
        Ok(hits)
    }

    async fn remove(&self, tenant_id: TenantId, doc_id: DocId) -> Result<bool> {
        let mut tenants = self.tenants.write();
        Ok(tenants
            .get_mut(&tenant_id)
            .map(|docs| docs.remove(&doc_id).is_some())
            .unwrap_or(false))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn metadata() -> VectorMetadata {
        VectorMetadata {
            title: "t".into(),
            content_type: ContentType::Text,
            source_url: None,
        }
    }

    #[tokio::test]
    async fn memory_index_ranks_by_cosine() {
        let index = MemoryVectorIndex::new();
        index
            .upsert(1, 1, vec![1.0, 0.0], metadata())
            .await
            .unwrap();
        index
            .upsert(1, 2, vec![0.0, 1.0], metadata())
            .await
            .unwrap();
        index
            .upsert(1, 3, vec![0.7, 0.7], metadata())
            .await
            .unwrap();

        let hits = index.query(1, &[1.0, 0.0], 10).await.unwrap();
        assert_eq!(hits[0].doc_id, 1);
        assert_eq!(hits[1].doc_id, 3);
        assert_eq!(hits[2].doc_id, 2);
        assert!(hits[0].score > hits[1].score);
    }

    #[tokio::test]
    async fn memory_index_is_tenant_scoped() {
        let index = MemoryVectorIndex::new();
        index
            .upsert(1, 1, vec![1.0, 0.0], metadata())
            .await
            .unwrap();

        assert!(index.query(2, &[1.0, 0.0], 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn memory_index_upsert_replaces_and_remove_drops() {
        let index = MemoryVectorIndex::new();
        index
            .upsert(1, 1, vec![1.0, 0.0], metadata())
            .await
            .unwrap();
        index
            .upsert(1, 1, vec![0.0, 1.0], metadata())
            .await
            .unwrap();

        let hits = index.query(1, &[0.0, 1.0], 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert!((hits[0].score - 1.0).abs() < 1e-6);

        assert!(index.remove(1, 1).await.unwrap());
        assert!(!index.remove(1, 1).await.unwrap());
        assert!(index.query(1, &[0.0, 1.0], 10).await.unwrap().is_empty());
    }

    struct FlakyEmbedder {
        rate_limits_before_success: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl Embedder for FlakyEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.rate_limits_before_success {
                Err(Error::ProviderRateLimited)
            } else {
                Ok(vec![1.0])
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retry_recovers_from_transient_rate_limits() {
        let embedder = FlakyEmbedder {
            rate_limits_before_success: 2,
            calls: AtomicU32::new(0),
        };

        let vector =
            embed_with_retry(&embedder, "hi", Duration::from_secs(5))
                .await
                .unwrap();
        assert_eq!(vector, vec![1.0]);
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_budget_exhaustion_surfaces_unavailable() {
        let embedder = FlakyEmbedder {
            rate_limits_before_success: 10,
            calls: AtomicU32::new(0),
        };

        let err = embed_with_retry(&embedder, "hi", Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ProviderUnavailable(_)));
        // Initial attempt plus the retry budget, nothing more.
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 1 + RETRY_BUDGET);
    }

    #[tokio::test]
    async fn non_transient_errors_are_not_retried() {
        struct DownEmbedder {
            calls: AtomicU32,
        }

        #[async_trait]
        impl Embedder for DownEmbedder {
            async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
                self.calls.fetch_add(1, Ordering::SeqCst);
                Err(Error::ProviderUnavailable("down".into()))
            }
        }

        let embedder = DownEmbedder {
            calls: AtomicU32::new(0),
        };
        let err = embed_with_retry(&embedder, "hi", Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ProviderUnavailable(_)));
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_embedder_times_out() {
        struct SlowEmbedder;

        #[async_trait]
        impl Embedder for SlowEmbedder {
            async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(vec![1.0])
            }
        }

        let err = embed_with_retry(&SlowEmbedder, "hi", Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ProviderUnavailable(_)));
    }
}
