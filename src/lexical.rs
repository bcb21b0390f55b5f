//! Per-tenant inverted index with BM25 scoring.
//!
//! The index registry is sharded by tenant: each tenant owns an independent
//! shard behind its own read-write lock, so ingestion for one tenant never
//! contends with queries for another. Shards hold term postings, per-document
//! token counts, and the running totals BM25 length normalization needs.
//!
//! Nothing here is persisted. The registry starts empty and is populated by
//! replaying the document store (see [`crate::engine::RetrievalEngine::rebuild`]).

use std::{cmp::Ordering, collections::HashMap, sync::Arc};

use parking_lot::RwLock;

use crate::{
    document::{DocId, TenantId},
    error::{Error, Result},
};

pub const BM25_K1: f32 = 1.5;
pub const BM25_B: f32 = 0.75;

/// Lowercase, split on non-alphanumeric boundaries, drop empty tokens.
/// No stemming; query and document text must go through the same function.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

#[derive(Debug, Clone)]
struct Posting {
    doc_id: DocId,
    term_frequency: u32,
}

#[derive(Debug, Default)]
struct Shard {
    postings: HashMap<String, Vec<Posting>>,
    doc_lengths: HashMap<DocId, u32>,
    total_tokens: u64,
}

/// A scored document from a single retrieval branch.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredDoc {
    pub doc_id: DocId,
    pub score: f32,
}

/// Tenant-sharded lexical index registry.
///
/// Constructed empty and populated exclusively through [`add_document`],
/// either by ingestion or by the rebuild replay; there is no implicit
/// lazy population from query paths.
///
/// [`add_document`]: LexicalIndex::add_document
#[derive(Debug, Default)]
pub struct LexicalIndex {
    shards: RwLock<HashMap<TenantId, Arc<RwLock<Shard>>>>,
}

impl LexicalIndex {
    pub fn new() -> Self {
        Self::default()
    }

    fn shard(&self, tenant_id: TenantId) -> Option<Arc<RwLock<Shard>>> {
        self.shards.read().get(&tenant_id).cloned()
    }

    fn shard_or_create(&self, tenant_id: TenantId) -> Arc<RwLock<Shard>> {
        self.shards.write().entry(tenant_id).or_default().clone()
    }

    /// Index a document's full text for its tenant.
    ///
    /// Adding an id that is already indexed is an error; callers must
    /// remove first when re-indexing.
    pub fn add_document(
        &self,
        tenant_id: TenantId,
        doc_id: DocId,
        text: &str,
    ) -> Result<()> {
        let shard = self.shard_or_create(tenant_id);
        let mut shard = shard.write();

        if shard.doc_lengths.contains_key(&doc_id) {
            return Err(Error::DuplicateDocument { tenant_id, doc_id });
        }

        let tokens = tokenize(text);
        shard.doc_lengths.insert(doc_id, tokens.len() as u32);
        shard.total_tokens += tokens.len() as u64;

        let mut frequencies: HashMap<&str, u32> = HashMap::new();
        for token in &tokens {
            *frequencies.entry(token).or_insert(0) += 1;
        }
        for (term, term_frequency) in frequencies {
            shard.postings.entry(term.to_string()).or_default().push(
                Posting {
                    doc_id,
                    term_frequency,
                },
            );
        }

        Ok(())
    }

    /// Remove all postings and length bookkeeping for a document.
    ///
    /// Returns whether the document was indexed. This is the hook through
    /// which out-of-core deletion propagates into the lexical index.
    pub fn remove_document(&self, tenant_id: TenantId, doc_id: DocId) -> bool {
        let Some(shard) = self.shard(tenant_id) else {
            return false;
        };
        let mut shard = shard.write();

        let Some(length) = shard.doc_lengths.remove(&doc_id) else {
            return false;
        };
        shard.total_tokens -= u64::from(length);
        shard.postings.retain(|_, postings| {
            postings.retain(|p| p.doc_id != doc_id);
            !postings.is_empty()
        });
        true
    }

    /// BM25 search over one tenant's shard.
    ///
    /// Per-term contribution for document `d`:
    /// `IDF(t) * tf * (k1 + 1) / (tf + k1 * (1 - b + b * |d| / avgLen))`
    /// with `IDF(t) = ln(1 + (N - df + 0.5) / (df + 0.5))`.
    ///
    /// Returns up to `top_k` results, descending by score, ties broken by
    /// ascending doc id so repeated queries rank identically. A tenant with
    /// no documents yields an empty result, not an error.
    pub fn search(
        &self,
        tenant_id: TenantId,
        query: &str,
        top_k: usize,
    ) -> Result<Vec<ScoredDoc>> {
        let Some(shard) = self.shard(tenant_id) else {
            return Ok(Vec::new());
        };
        let shard = shard.read();

        let doc_count = shard.doc_lengths.len();
        if doc_count == 0 {
            return Ok(Vec::new());
        }
        let n = doc_count as f32;
        let avg_length = shard.total_tokens as f32 / n;

        let mut scores: HashMap<DocId, f32> = HashMap::new();
        for term in tokenize(query) {
            let Some(postings) = shard.postings.get(&term) else {
                continue;
            };
            let df = postings.len() as f32;
            let idf = (1.0 + (n - df + 0.5) / (df + 0.5)).ln();

            for posting in postings {
                let length = *shard
                    .doc_lengths
                    .get(&posting.doc_id)
                    .ok_or_else(|| {
                        Error::IndexCorruption(format!(
                            "posting for term {term:?} references unindexed \
                             document {} in tenant {tenant_id}",
                            posting.doc_id
                        ))
                    })?;
                let tf = posting.term_frequency as f32;
                let norm = 1.0 - BM25_B + BM25_B * length as f32 / avg_length;
                let contribution =
                    idf * tf * (BM25_K1 + 1.0) / (tf + BM25_K1 * norm);
                *scores.entry(posting.doc_id).or_insert(0.0) += contribution;
            }
        }

        let mut results: Vec<ScoredDoc> = scores
            .into_iter()
            .map(|(doc_id, score)| ScoredDoc { doc_id, score })
            .collect();
        results.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.doc_id.cmp(&b.doc_id))
        });
        results.truncate(top_k);
        Ok(results)
    }

    /// Number of documents indexed for a tenant.
    pub fn tenant_doc_count(&self, tenant_id: TenantId) -> usize {
        self.shard(tenant_id)
            .map(|shard| shard.read().doc_lengths.len())
            .unwrap_or(0)
    }

    /// Drop every shard. Used before a full rebuild from the store, which
    /// is the defined recovery path after corruption is detected.
    pub fn clear(&self) {
        self.shards.write().clear();
    }

    /// Test hook: plant a posting that references no indexed document,
    /// bypassing the add path.
    #[cfg(test)]
    pub(crate) fn inject_orphan_posting(
        &self,
        tenant_id: TenantId,
        term: &str,
        doc_id: DocId,
    ) {
        let shard = self.shard_or_create(tenant_id);
        shard
            .write()
            .postings
            .entry(term.to_string())
            .or_default()
            .push(Posting {
                doc_id,
                term_frequency: 1,
            });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenize_lowercases_and_splits() {
        assert_eq!(
            tokenize("Hello, World! rust-lang 2024"),
            vec!["hello", "world", "rust", "lang", "2024"]
        );
        assert!(tokenize("...---...").is_empty());
        assert!(tokenize("").is_empty());
    }

    #[test]
    fn unique_term_finds_its_document() {
        let index = LexicalIndex::new();
        index
            .add_document(1, 1, "the quick brown fox jumps")
            .unwrap();
        index.add_document(1, 2, "the lazy dog sleeps").unwrap();

        let results = index.search(1, "fox", 10).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].doc_id, 1);
        assert!(results[0].score > 0.0);
    }

    #[test]
    fn duplicate_add_is_an_error() {
        let index = LexicalIndex::new();
        index.add_document(1, 1, "hello world").unwrap();

        let err = index.add_document(1, 1, "hello again").unwrap_err();
        assert!(matches!(
            err,
            Error::DuplicateDocument {
                tenant_id: 1,
                doc_id: 1
            }
        ));

        // Same id under another tenant is fine.
        index.add_document(2, 1, "hello world").unwrap();
    }

    #[test]
    fn unknown_tenant_yields_empty_results() {
        let index = LexicalIndex::new();
        assert!(index.search(99, "anything", 10).unwrap().is_empty());
    }

    #[test]
    fn tenants_never_see_each_others_documents() {
        let index = LexicalIndex::new();
        index.add_document(1, 1, "secret alpaca recipes").unwrap();
        index.add_document(2, 2, "public notes").unwrap();

        // Tenant 2's query matches tenant 1's text exactly, and still
        // comes back empty.
        assert!(index.search(2, "secret alpaca recipes", 10).unwrap().is_empty());
        assert_eq!(index.search(1, "alpaca", 10).unwrap().len(), 1);
    }

    #[test]
    fn higher_term_frequency_ranks_higher() {
        let index = LexicalIndex::new();
        index
            .add_document(1, 1, "cats are fine animals and cats purr cats")
            .unwrap();
        index
            .add_document(1, 2, "cats exist among other animals here too")
            .unwrap();

        let results = index.search(1, "cats", 10).unwrap();
        assert_eq!(results[0].doc_id, 1);
        assert!(results[0].score > results[1].score);
    }

    #[test]
    fn rare_terms_outweigh_common_ones() {
        let index = LexicalIndex::new();
        for doc_id in 1..=9 {
            index
                .add_document(1, doc_id, "common filler words everywhere")
                .unwrap();
        }
        index
            .add_document(1, 10, "common zyzzyva words everywhere")
            .unwrap();

        let results = index.search(1, "common zyzzyva", 10).unwrap();
        assert_eq!(results[0].doc_id, 10);
    }

    #[test]
    fn ties_break_by_ascending_doc_id() {
        let index = LexicalIndex::new();
        // Identical text gives identical scores.
        index.add_document(1, 7, "mirror mirror").unwrap();
        index.add_document(1, 3, "mirror mirror").unwrap();
        index.add_document(1, 5, "mirror mirror").unwrap();

        let ids: Vec<DocId> = index
            .search(1, "mirror", 10)
            .unwrap()
            .iter()
            .map(|r| r.doc_id)
            .collect();
        assert_eq!(ids, vec![3, 5, 7]);
    }

    #[test]
    fn search_is_deterministic() {
        let index = LexicalIndex::new();
        index.add_document(1, 1, "rust systems programming").unwrap();
        index.add_document(1, 2, "rust game programming").unwrap();
        index.add_document(1, 3, "python scripting").unwrap();

        let first = index.search(1, "rust programming", 10).unwrap();
        for _ in 0..10 {
            assert_eq!(index.search(1, "rust programming", 10).unwrap(), first);
        }
    }

    #[test]
    fn top_k_bounds_results() {
        let index = LexicalIndex::new();
        for doc_id in 1..=20 {
            index
                .add_document(1, doc_id, &format!("shared term doc {doc_id}"))
                .unwrap();
        }
        assert_eq!(index.search(1, "shared", 5).unwrap().len(), 5);
    }

    #[test]
    fn remove_purges_postings_and_lengths() {
        let index = LexicalIndex::new();
        index.add_document(1, 1, "ephemeral walrus content").unwrap();
        index.add_document(1, 2, "durable content").unwrap();

        assert!(index.remove_document(1, 1));
        assert!(!index.remove_document(1, 1));

        assert!(index.search(1, "walrus", 10).unwrap().is_empty());
        assert_eq!(index.tenant_doc_count(1), 1);

        // Removing and re-adding must not leave stale postings behind.
        index.add_document(1, 1, "fresh walrus content").unwrap();
        let results = index.search(1, "walrus", 10).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].doc_id, 1);
    }

    #[test]
    fn length_normalization_favors_short_documents() {
        let index = LexicalIndex::new();
        let long_tail = "padding ".repeat(60);
        index
            .add_document(1, 1, &format!("needle {long_tail}"))
            .unwrap();
        index.add_document(1, 2, "needle in brief").unwrap();

        let results = index.search(1, "needle", 10).unwrap();
        // Same term frequency, shorter document wins.
        assert_eq!(results[0].doc_id, 2);
    }

    #[test]
    fn orphan_posting_surfaces_as_corruption() {
        let index = LexicalIndex::new();
        index.add_document(1, 1, "real indexed content").unwrap();
        index.inject_orphan_posting(1, "phantom", 999);

        let err = index.search(1, "phantom", 10).unwrap_err();
        assert!(matches!(err, Error::IndexCorruption(_)));

        // Terms untouched by the orphan still search fine.
        assert_eq!(index.search(1, "indexed", 10).unwrap().len(), 1);
    }

    #[test]
    fn clear_resets_every_shard() {
        let index = LexicalIndex::new();
        index.add_document(1, 1, "one").unwrap();
        index.add_document(2, 2, "two").unwrap();

        index.clear();
        assert_eq!(index.tenant_doc_count(1), 0);
        assert_eq!(index.tenant_doc_count(2), 0);
        // After a clear, ids can be indexed again.
        index.add_document(1, 1, "one").unwrap();
    }
}
