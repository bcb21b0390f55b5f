//! End-to-end tests over the public API: ingestion through the full
//! pipeline, then search in every mode with filters applied.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use async_trait::async_trait;
use ragstash::{
    ContentType, DocId, Document, LexicalIndex, RedbStore, RedbVectorIndex,
    RetrievalEngine, SearchMode,
    document::DateRange,
    engine::{EngineConfig, SearchRequest},
    error::{Error, Result},
    ingest::IngestRequest,
    vector::{Embedder, MemoryVectorIndex},
};

/// Embeds by counting a few fixed topic terms, so semantic similarity is
/// deterministic and controlled by the test text.
struct TermEmbedder {
    fail: AtomicBool,
}

impl TermEmbedder {
    fn new() -> Self {
        Self {
            fail: AtomicBool::new(false),
        }
    }

    fn set_failing(&self, failing: bool) {
        self.fail.store(failing, Ordering::SeqCst);
    }
}

const TOPIC_TERMS: [&str; 3] = ["energy", "cooking", "history"];

#[async_trait]
impl Embedder for TermEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::ProviderUnavailable("provider is down".into()));
        }
        let lower = text.to_lowercase();
        Ok(TOPIC_TERMS
            .iter()
            .map(|term| lower.matches(term).count() as f32)
            .collect())
    }
}

fn build_engine(
    embedder: Arc<TermEmbedder>,
) -> (tempfile::TempDir, RetrievalEngine) {
    let tmp = tempfile::tempdir().unwrap();
    let store = RedbStore::open(&tmp.path().join("store.redb")).unwrap();
    let engine = RetrievalEngine::new(
        Arc::new(store),
        Arc::new(LexicalIndex::new()),
        embedder,
        Arc::new(MemoryVectorIndex::new()),
        EngineConfig::default(),
    );
    (tmp, engine)
}

async fn save(
    engine: &RetrievalEngine,
    tenant_id: u64,
    content_type: ContentType,
    text: &str,
) -> DocId {
    engine
        .ingest(IngestRequest {
            tenant_id,
            content_type,
            title: format!("{text:.20}"),
            full_text: text.to_string(),
            excerpt: None,
            source_url: None,
        })
        .await
        .unwrap()
}

#[tokio::test]
async fn hybrid_search_finds_ingested_content() {
    let embedder = Arc::new(TermEmbedder::new());
    let (_tmp, engine) = build_engine(embedder);

    let energy = save(
        &engine,
        1,
        ContentType::Webpage,
        "solar energy and wind energy on the grid",
    )
    .await;
    save(
        &engine,
        1,
        ContentType::Webpage,
        "slow cooking with cast iron pans",
    )
    .await;
    save(
        &engine,
        1,
        ContentType::Webpage,
        "naval history of the mediterranean",
    )
    .await;

    let response = engine
        .search(&SearchRequest::new(1, "renewable energy"))
        .await
        .unwrap();

    assert!(!response.degraded);
    assert_eq!(response.results[0].doc_id, energy);
    assert!(
        response.results[0]
            .contributing_modes
            .contains(&SearchMode::Semantic)
    );
    assert!(
        response.results[0]
            .contributing_modes
            .contains(&SearchMode::Keyword)
    );

    // Ranking is descending on fused score.
    for pair in response.results.windows(2) {
        assert!(pair[0].fused_score >= pair[1].fused_score);
    }
}

#[tokio::test]
async fn hybrid_survives_a_provider_outage() {
    let embedder = Arc::new(TermEmbedder::new());
    let (_tmp, engine) = build_engine(embedder.clone());

    let doc_id = save(
        &engine,
        1,
        ContentType::Text,
        "notes about cooking temperatures",
    )
    .await;

    embedder.set_failing(true);

    let response = engine
        .search(&SearchRequest::new(1, "cooking"))
        .await
        .unwrap();
    assert!(response.degraded);
    assert_eq!(response.results.len(), 1);
    assert_eq!(response.results[0].doc_id, doc_id);
    assert_eq!(
        response.results[0].contributing_modes,
        vec![SearchMode::Keyword]
    );

    // Semantic-only has no surviving branch to fall back to.
    let mut request = SearchRequest::new(1, "cooking");
    request.mode = SearchMode::Semantic;
    let err = engine.search(&request).await.unwrap_err();
    assert!(matches!(err, Error::ProviderUnavailable(_)));
}

#[tokio::test]
async fn type_filter_excludes_other_content_types() {
    let embedder = Arc::new(TermEmbedder::new());
    let (_tmp, engine) = build_engine(embedder);

    let pdf_a =
        save(&engine, 1, ContentType::Pdf, "energy market report").await;
    save(&engine, 1, ContentType::Webpage, "energy market blog post").await;
    let pdf_b =
        save(&engine, 1, ContentType::Pdf, "energy storage whitepaper").await;

    let mut request = SearchRequest::new(1, "energy");
    request.type_filter = Some(ContentType::Pdf);
    let response = engine.search(&request).await.unwrap();

    let mut ids: Vec<DocId> =
        response.results.iter().map(|r| r.doc_id).collect();
    ids.sort_unstable();
    assert_eq!(ids, vec![pdf_a, pdf_b]);
    for result in &response.results {
        assert_eq!(result.metadata_snapshot.content_type, ContentType::Pdf);
    }
}

#[tokio::test]
async fn tenants_never_see_each_others_documents() {
    let embedder = Arc::new(TermEmbedder::new());
    let (_tmp, engine) = build_engine(embedder);

    let mine =
        save(&engine, 1, ContentType::Text, "shared energy phrasing").await;
    save(&engine, 2, ContentType::Text, "shared energy phrasing").await;

    let response = engine
        .search(&SearchRequest::new(1, "energy"))
        .await
        .unwrap();
    let ids: Vec<DocId> = response.results.iter().map(|r| r.doc_id).collect();
    assert_eq!(ids, vec![mine]);
}

#[tokio::test]
async fn repeated_searches_are_deterministic() {
    let embedder = Arc::new(TermEmbedder::new());
    let (_tmp, engine) = build_engine(embedder);

    for text in [
        "energy policy overview",
        "energy and cooking blend",
        "history of energy markets",
        "cooking history essays",
    ] {
        save(&engine, 1, ContentType::Text, text).await;
    }

    let request = SearchRequest::new(1, "energy history");
    let first = engine.search(&request).await.unwrap();
    for _ in 0..3 {
        let again = engine.search(&request).await.unwrap();
        let a: Vec<(DocId, f32)> =
            first.results.iter().map(|r| (r.doc_id, r.fused_score)).collect();
        let b: Vec<(DocId, f32)> =
            again.results.iter().map(|r| (r.doc_id, r.fused_score)).collect();
        assert_eq!(a, b);
    }
}

#[tokio::test]
async fn top_k_bounds_the_result_count() {
    let embedder = Arc::new(TermEmbedder::new());
    let (_tmp, engine) = build_engine(embedder);

    for i in 0..30 {
        save(&engine, 1, ContentType::Text, &format!("energy note {i}"))
            .await;
    }

    let mut request = SearchRequest::new(1, "energy");
    request.top_k = 7;
    let response = engine.search(&request).await.unwrap();
    assert_eq!(response.results.len(), 7);
}

#[tokio::test]
async fn rebuild_restores_keyword_search_after_restart() {
    let embedder = Arc::new(TermEmbedder::new());
    let (_tmp, engine) = build_engine(embedder);

    for text in ["alpha energy doc", "beta energy doc", "gamma cooking doc"] {
        save(&engine, 1, ContentType::Text, text).await;
    }

    let mut request = SearchRequest::new(1, "energy");
    request.mode = SearchMode::Keyword;
    let before = engine.search(&request).await.unwrap();

    // The lexical index is volatile; drop it and replay the store.
    engine.lexical().clear();
    assert!(
        engine.search(&request).await.unwrap().results.is_empty()
    );
    engine.rebuild().unwrap();

    let after = engine.search(&request).await.unwrap();
    let before_ids: Vec<DocId> =
        before.results.iter().map(|r| r.doc_id).collect();
    let after_ids: Vec<DocId> =
        after.results.iter().map(|r| r.doc_id).collect();
    assert_eq!(before_ids, after_ids);
}

#[tokio::test]
async fn semantic_hits_survive_a_restart() {
    let embedder = Arc::new(TermEmbedder::new());
    let tmp = tempfile::tempdir().unwrap();
    let store_path = tmp.path().join("store.redb");
    let vectors_path = tmp.path().join("vectors.redb");

    let open = |embedder: Arc<TermEmbedder>| {
        RetrievalEngine::new(
            Arc::new(RedbStore::open(&store_path).unwrap()),
            Arc::new(LexicalIndex::new()),
            embedder,
            Arc::new(RedbVectorIndex::open(&vectors_path).unwrap()),
            EngineConfig::default(),
        )
    };

    let engine = open(embedder.clone());
    let doc_id =
        save(&engine, 1, ContentType::Text, "geothermal energy basics").await;
    drop(engine);

    // Restart: both databases reopen from disk and the volatile lexical
    // index replays the store. The vector entries must still be there.
    let engine = open(embedder);
    engine.rebuild().unwrap();

    let mut request = SearchRequest::new(1, "energy");
    request.mode = SearchMode::Semantic;
    let response = engine.search(&request).await.unwrap();

    assert!(!response.degraded);
    assert_eq!(response.results.len(), 1);
    assert_eq!(response.results[0].doc_id, doc_id);
}

/// Seed the store and lexical index directly so created-at timestamps and
/// doc ids are under test control.
fn seed(
    engine: &RetrievalEngine,
    doc_id: DocId,
    content_type: ContentType,
    created_at: u64,
    text: &str,
) {
    engine
        .store()
        .put(&Document {
            tenant_id: 1,
            doc_id,
            content_type,
            title: format!("doc {doc_id}"),
            source_url: None,
            excerpt: None,
            full_text: text.to_string(),
            vector_ref: Some(Document::vector_ref_for(1, doc_id)),
            created_at,
        })
        .unwrap();
    engine.lexical().add_document(1, doc_id, text).unwrap();
}

#[tokio::test]
async fn date_range_filters_on_created_at() {
    let embedder = Arc::new(TermEmbedder::new());
    let (_tmp, engine) = build_engine(embedder);

    seed(&engine, 1, ContentType::Text, 100, "energy bulletin one");
    seed(&engine, 2, ContentType::Text, 200, "energy bulletin two");
    seed(&engine, 3, ContentType::Text, 300, "energy bulletin three");

    let mut request = SearchRequest::new(1, "energy");
    request.mode = SearchMode::Keyword;
    request.date_range = DateRange::from_bounds(Some(150), Some(250));
    let response = engine.search(&request).await.unwrap();

    let ids: Vec<DocId> = response.results.iter().map(|r| r.doc_id).collect();
    assert_eq!(ids, vec![2]);

    // Inclusive bounds.
    request.date_range = DateRange::from_bounds(Some(100), Some(300));
    let response = engine.search(&request).await.unwrap();
    assert_eq!(response.results.len(), 3);
}

#[tokio::test]
async fn filter_starvation_widens_the_candidate_pool() {
    let embedder = Arc::new(TermEmbedder::new());
    let (_tmp, engine) = build_engine(embedder);

    // 40 documents with identical text: BM25 ties break on ascending doc
    // id, so the initial over-fetch of 20 sees only webpages. The five
    // pdfs live past it and are only reachable through the widened
    // re-query.
    for doc_id in 1..=40u64 {
        let content_type = if doc_id <= 35 {
            ContentType::Webpage
        } else {
            ContentType::Pdf
        };
        seed(&engine, doc_id, content_type, 1_000, "identical energy text");
    }

    let mut request = SearchRequest::new(1, "energy");
    request.mode = SearchMode::Keyword;
    request.type_filter = Some(ContentType::Pdf);
    request.top_k = 5;
    let response = engine.search(&request).await.unwrap();

    let mut ids: Vec<DocId> =
        response.results.iter().map(|r| r.doc_id).collect();
    ids.sort_unstable();
    assert_eq!(ids, vec![36, 37, 38, 39, 40]);
}

#[tokio::test]
async fn removed_documents_stop_appearing_in_results() {
    let embedder = Arc::new(TermEmbedder::new());
    let (_tmp, engine) = build_engine(embedder);

    let keep =
        save(&engine, 1, ContentType::Text, "energy doc to keep").await;
    let gone =
        save(&engine, 1, ContentType::Text, "energy doc to delete").await;

    assert!(engine.remove(1, gone).await.unwrap());

    let response = engine
        .search(&SearchRequest::new(1, "energy"))
        .await
        .unwrap();
    let ids: Vec<DocId> = response.results.iter().map(|r| r.doc_id).collect();
    assert_eq!(ids, vec![keep]);
}
