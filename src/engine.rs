//! Query planning and score fusion.
//!
//! [`RetrievalEngine`] is the single orchestration point: it owns the
//! lexical index registry and the collaborator handles, dispatches a search
//! to its branches, normalizes and filters the candidates, and fuses them
//! into one ranked, deduplicated list.
//!
//! Raw BM25 scores and vector similarities live on incompatible scales, so
//! each branch is min-max normalized to `[0, 1]` before any cross-branch
//! combination. Fusion then sums whatever normalized scores each document
//! earned, tagging which branches contributed.

use std::{
    cmp::Ordering,
    collections::{HashMap, HashSet},
    sync::Arc,
    time::Duration,
};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::{
    document::{ContentType, DateRange, DocId, TenantId},
    error::{Error, Result},
    lexical::{LexicalIndex, ScoredDoc},
    store::DocumentStore,
    vector::{self, Embedder, ScoreConvention, VectorIndex},
};

pub const DEFAULT_TOP_K: usize = 10;

/// Branches are asked for at least this many candidates regardless of
/// `top_k`, so post-filtering has something left to work with.
pub const OVER_FETCH_FLOOR: usize = 20;

/// When filtering starves the candidate pool below `top_k`, the branches
/// are re-queried once with the over-fetch widened by this factor.
const REQUERY_FACTOR: usize = 5;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Bound on each individual provider call (embed, vector query).
    pub provider_timeout: Duration,
    /// Bound on the whole search request. Kept above `provider_timeout`
    /// so a slow vector branch degrades instead of sinking the request.
    pub request_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            provider_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    JsonSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    Semantic,
    Keyword,
    #[default]
    Hybrid,
}

impl std::str::FromStr for SearchMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "semantic" => Ok(SearchMode::Semantic),
            "keyword" => Ok(SearchMode::Keyword),
            "hybrid" => Ok(SearchMode::Hybrid),
            other => Err(format!("unknown search mode: {other}")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub tenant_id: TenantId,
    pub query: String,
    pub mode: SearchMode,
    pub type_filter: Option<ContentType>,
    pub date_range: Option<DateRange>,
    pub top_k: usize,
}

impl SearchRequest {
    pub fn new(tenant_id: TenantId, query: impl Into<String>) -> Self {
        Self {
            tenant_id,
            query: query.into(),
            mode: SearchMode::default(),
            type_filter: None,
            date_range: None,
            top_k: DEFAULT_TOP_K,
        }
    }
}

/// Stored metadata echoed back with each result.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataSnapshot {
    pub title: String,
    pub content_type: ContentType,
    pub source_url: Option<String>,
    pub excerpt: String,
    pub created_at: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FusedResult {
    pub doc_id: DocId,
    pub fused_score: f32,
    /// Which branches contributed, in `[semantic, keyword]` order.
    pub contributing_modes: Vec<SearchMode>,
    pub metadata_snapshot: MetadataSnapshot,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResponse {
    pub results: Vec<FusedResult>,
    /// True when a hybrid search lost a branch to failure or timeout and
    /// answered from the surviving branch alone.
    pub degraded: bool,
}

/// Candidates per branch; `None` means the branch was not dispatched or
/// did not survive.
#[derive(Debug, Default)]
struct BranchResults {
    semantic: Option<Vec<ScoredDoc>>,
    keyword: Option<Vec<ScoredDoc>>,
}

impl BranchResults {
    fn normalize(&mut self) {
        if let Some(results) = &mut self.semantic {
            min_max_normalize(results);
        }
        if let Some(results) = &mut self.keyword {
            min_max_normalize(results);
        }
    }

    fn retain_eligible(&mut self, eligible: &HashSet<DocId>) {
        if let Some(results) = &mut self.semantic {
            results.retain(|r| eligible.contains(&r.doc_id));
        }
        if let Some(results) = &mut self.keyword {
            results.retain(|r| eligible.contains(&r.doc_id));
        }
    }

    fn distinct_count(&self) -> usize {
        let mut seen = HashSet::new();
        for results in [&self.semantic, &self.keyword].into_iter().flatten() {
            for r in results {
                seen.insert(r.doc_id);
            }
        }
        seen.len()
    }
}

/// Min-max normalize in place. A branch with a single result, or with all
/// scores equal, normalizes to `1.0`.
fn min_max_normalize(results: &mut [ScoredDoc]) {
    let Some(first) = results.first() else {
        return;
    };
    let mut min = first.score;
    let mut max = first.score;
    for r in results.iter() {
        min = min.min(r.score);
        max = max.max(r.score);
    }
    let range = max - min;
    for r in results.iter_mut() {
        r.score = if range < f32::EPSILON {
            1.0
        } else {
            (r.score - min) / range
        };
    }
}

/// The orchestrator: owns the per-tenant index registry and the
/// collaborator handles, injected at construction. The registry starts
/// empty; [`rebuild`](RetrievalEngine::rebuild) is the only population
/// path besides ingestion itself.
pub struct RetrievalEngine {
    pub(crate) store: Arc<dyn DocumentStore>,
    pub(crate) lexical: Arc<LexicalIndex>,
    pub(crate) embedder: Arc<dyn Embedder>,
    pub(crate) vectors: Arc<dyn VectorIndex>,
    pub(crate) config: EngineConfig,
}

impl RetrievalEngine {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        lexical: Arc<LexicalIndex>,
        embedder: Arc<dyn Embedder>,
        vectors: Arc<dyn VectorIndex>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            lexical,
            embedder,
            vectors,
            config,
        }
    }

    pub fn store(&self) -> &dyn DocumentStore {
        self.store.as_ref()
    }

    pub fn lexical(&self) -> &LexicalIndex {
        &self.lexical
    }

    /// Execute a search request end to end.
    pub async fn search(&self, request: &SearchRequest) -> Result<SearchResponse> {
        validate(request)?;
        let response = match tokio::time::timeout(
            self.config.request_timeout,
            self.search_inner(request),
        )
        .await
        {
            Ok(response) => response,
            Err(_) => {
                tracing::error!(
                    tenant_id = request.tenant_id,
                    "search exceeded the request timeout"
                );
                Err(Error::RetrievalUnavailable)
            }
        };

        // A corrupt lexical shard cannot heal incrementally. The store is
        // the source of truth, so drop every shard and replay it; the next
        // search runs against the rebuilt registry.
        if let Err(Error::IndexCorruption(detail)) = &response {
            tracing::error!(
                tenant_id = request.tenant_id,
                detail = %detail,
                "lexical index corruption detected, rebuilding from the store"
            );
            if let Err(rebuild_err) = self.rebuild() {
                tracing::error!(
                    error = %rebuild_err,
                    "rebuild after corruption failed"
                );
            }
        }
        response
    }

    async fn search_inner(
        &self,
        request: &SearchRequest,
    ) -> Result<SearchResponse> {
        let over_fetch = request.top_k.saturating_mul(2).max(OVER_FETCH_FLOOR);

        let eligible = match (request.type_filter, request.date_range) {
            (None, None) => None,
            _ => Some(self.store.eligible_ids(
                request.tenant_id,
                request.type_filter,
                request.date_range,
            )?),
        };

        let (mut branches, mut degraded) =
            self.run_branches(request, over_fetch).await?;
        branches.normalize();

        if let Some(eligible) = &eligible {
            branches.retain_eligible(eligible);

            // Filtering must not silently shrink the response below top_k
            // while eligible candidates exist past the initial over-fetch:
            // widen once, then accept whatever remains.
            if branches.distinct_count() < request.top_k {
                let widened = over_fetch.saturating_mul(REQUERY_FACTOR);
                tracing::debug!(
                    tenant_id = request.tenant_id,
                    widened,
                    "filter starved the candidate pool, re-querying"
                );
                let (mut wider, wider_degraded) =
                    self.run_branches(request, widened).await?;
                wider.normalize();
                wider.retain_eligible(eligible);
                branches = wider;
                degraded = wider_degraded;
            }
        }

        let mut results = self.fuse(request.tenant_id, branches)?;
        results.truncate(request.top_k);
        Ok(SearchResponse { results, degraded })
    }

    /// Dispatch to the branches the mode asks for. Returns the surviving
    /// branch candidates and whether the response is degraded.
    async fn run_branches(
        &self,
        request: &SearchRequest,
        over_fetch: usize,
    ) -> Result<(BranchResults, bool)> {
        match request.mode {
            SearchMode::Keyword => {
                let keyword = self.keyword_branch(request, over_fetch)?;
                Ok((
                    BranchResults {
                        keyword: Some(keyword),
                        ..Default::default()
                    },
                    false,
                ))
            }
            SearchMode::Semantic => {
                let semantic = self.semantic_branch(request, over_fetch).await?;
                Ok((
                    BranchResults {
                        semantic: Some(semantic),
                        ..Default::default()
                    },
                    false,
                ))
            }
            SearchMode::Hybrid => {
                // Both branches run in parallel and are joined before
                // fusion. Losing one branch degrades the response; losing
                // both fails it. Keyword has no external dependency, so a
                // provider outage can only ever cost the semantic half.
                let (semantic, keyword) = tokio::join!(
                    self.semantic_branch(request, over_fetch),
                    async { self.keyword_branch(request, over_fetch) },
                );

                match (semantic, keyword) {
                    (Ok(semantic), Ok(keyword)) => Ok((
                        BranchResults {
                            semantic: Some(semantic),
                            keyword: Some(keyword),
                        },
                        false,
                    )),
                    // Corruption is fatal even in hybrid mode: the shard
                    // must be rebuilt, not papered over with a degraded
                    // response.
                    (_, Err(keyword_err @ Error::IndexCorruption(_))) => {
                        Err(keyword_err)
                    }
                    (Ok(semantic), Err(keyword_err)) => {
                        tracing::warn!(
                            error = %keyword_err,
                            "keyword branch failed, serving semantic-only results"
                        );
                        Ok((
                            BranchResults {
                                semantic: Some(semantic),
                                ..Default::default()
                            },
                            true,
                        ))
                    }
                    (Err(semantic_err), Ok(keyword)) => {
                        tracing::warn!(
                            error = %semantic_err,
                            "semantic branch failed, serving keyword-only results"
                        );
                        Ok((
                            BranchResults {
                                keyword: Some(keyword),
                                ..Default::default()
                            },
                            true,
                        ))
                    }
                    (Err(semantic_err), Err(keyword_err)) => {
                        tracing::error!(
                            semantic_error = %semantic_err,
                            keyword_error = %keyword_err,
                            "both retrieval branches failed"
                        );
                        Err(Error::RetrievalUnavailable)
                    }
                }
            }
        }
    }

    fn keyword_branch(
        &self,
        request: &SearchRequest,
        over_fetch: usize,
    ) -> Result<Vec<ScoredDoc>> {
        self.lexical
            .search(request.tenant_id, &request.query, over_fetch)
    }

    async fn semantic_branch(
        &self,
        request: &SearchRequest,
        over_fetch: usize,
    ) -> Result<Vec<ScoredDoc>> {
        let query_vector = vector::embed_with_retry(
            self.embedder.as_ref(),
            &request.query,
            self.config.provider_timeout,
        )
        .await?;

        let hits = tokio::time::timeout(
            self.config.provider_timeout,
            self.vectors
                .query(request.tenant_id, &query_vector, over_fetch),
        )
        .await
        .map_err(|_| {
            Error::ProviderUnavailable(format!(
                "vector query exceeded {}ms",
                self.config.provider_timeout.as_millis()
            ))
        })??;

        // Orient raw scores so higher is always better; min-max
        // normalization later maps them onto [0, 1].
        let orient = match self.vectors.convention() {
            ScoreConvention::Similarity => 1.0,
            ScoreConvention::Distance => -1.0,
        };

        // Re-verify tenant ownership against the store: a stale or
        // misconfigured vector index must not leak another tenant's
        // documents, and ingestion-incomplete records never surface.
        let mut verified = Vec::with_capacity(hits.len());
        for hit in hits {
            match self.store.get(request.tenant_id, hit.doc_id)? {
                Some(doc) if doc.vector_ref.is_some() => {
                    verified.push(ScoredDoc {
                        doc_id: hit.doc_id,
                        score: hit.score * orient,
                    });
                }
                Some(_) => {
                    tracing::warn!(
                        doc_id = hit.doc_id,
                        "dropping ingestion-incomplete document from \
                         semantic results"
                    );
                }
                None => {
                    tracing::warn!(
                        tenant_id = request.tenant_id,
                        doc_id = hit.doc_id,
                        "vector index returned a document the tenant does \
                         not own"
                    );
                }
            }
        }
        Ok(verified)
    }

    /// Sum each document's normalized branch scores, tag contributions,
    /// attach the stored metadata snapshot, and rank.
    fn fuse(
        &self,
        tenant_id: TenantId,
        branches: BranchResults,
    ) -> Result<Vec<FusedResult>> {
        struct Accumulated {
            score: f32,
            semantic: bool,
            keyword: bool,
        }

        let mut fused: HashMap<DocId, Accumulated> = HashMap::new();
        if let Some(results) = branches.semantic {
            for r in results {
                let entry = fused.entry(r.doc_id).or_insert(Accumulated {
                    score: 0.0,
                    semantic: false,
                    keyword: false,
                });
                entry.score += r.score;
                entry.semantic = true;
            }
        }
        if let Some(results) = branches.keyword {
            for r in results {
                let entry = fused.entry(r.doc_id).or_insert(Accumulated {
                    score: 0.0,
                    semantic: false,
                    keyword: false,
                });
                entry.score += r.score;
                entry.keyword = true;
            }
        }

        let mut results = Vec::with_capacity(fused.len());
        for (doc_id, acc) in fused {
            let Some(doc) = self.store.get(tenant_id, doc_id)? else {
                tracing::warn!(
                    tenant_id,
                    doc_id,
                    "candidate disappeared from the store before fusion"
                );
                continue;
            };

            let mut contributing_modes = Vec::with_capacity(2);
            if acc.semantic {
                contributing_modes.push(SearchMode::Semantic);
            }
            if acc.keyword {
                contributing_modes.push(SearchMode::Keyword);
            }

            results.push(FusedResult {
                doc_id,
                fused_score: acc.score,
                contributing_modes,
                metadata_snapshot: MetadataSnapshot {
                    title: doc.title.clone(),
                    content_type: doc.content_type,
                    source_url: doc.source_url.clone(),
                    excerpt: doc.display_excerpt(),
                    created_at: doc.created_at,
                },
            });
        }

        results.sort_by(|a, b| {
            b.fused_score
                .partial_cmp(&a.fused_score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.doc_id.cmp(&b.doc_id))
        });
        Ok(results)
    }
}

impl std::fmt::Debug for RetrievalEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetrievalEngine")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn validate(request: &SearchRequest) -> Result<()> {
    if request.top_k == 0 {
        return Err(Error::InvalidRequest(
            "topK must be greater than zero".to_string(),
        ));
    }
    if request.query.trim().is_empty() {
        return Err(Error::InvalidRequest(
            "query must not be empty".to_string(),
        ));
    }
    if let Some(range) = request.date_range
        && let (Some(start), Some(end)) = (range.start, range.end)
        && start > end
    {
        return Err(Error::InvalidRequest(
            "dateRange start must not exceed end".to_string(),
        ));
    }
    Ok(())
}
