//! Ingestion pipeline, removal propagation, and index rebuild.
//!
//! Ingestion adds one document to the store and both indices under an
//! all-or-nothing contract: the embedding round-trip happens before any
//! index mutation, and every later failure unwinds what was already
//! written. Callers either observe the document everywhere or nowhere.

use crate::{
    document::{ContentType, DocId, Document, TenantId, now_epoch_secs},
    engine::RetrievalEngine,
    error::{Error, Result},
    vector::{self, VectorMetadata},
};

/// Text handed to the embedding provider is capped at this many characters
/// to respect provider input limits. The lexical index and the stored
/// record always keep the full text, so keyword recall never degrades for
/// long documents even though semantic recall is capped.
pub const EMBED_CHAR_CAP: usize = 8000;

#[derive(Debug, Clone)]
pub struct IngestRequest {
    pub tenant_id: TenantId,
    pub content_type: ContentType,
    pub title: String,
    pub full_text: String,
    pub excerpt: Option<String>,
    pub source_url: Option<String>,
}

impl RetrievalEngine {
    /// Ingest one document: embed, upsert the vector, index the full text,
    /// persist the store record. Returns the newly assigned doc id.
    pub async fn ingest(&self, request: IngestRequest) -> Result<DocId> {
        if request.full_text.trim().is_empty() {
            return Err(Error::EmptyContent);
        }

        let tenant_id = request.tenant_id;
        let doc_id = self.store.allocate_doc_id()?;

        let capped =
            crate::document::truncate_chars(&request.full_text, EMBED_CHAR_CAP);
        let embedding = vector::embed_with_retry(
            self.embedder.as_ref(),
            &capped,
            self.config.provider_timeout,
        )
        .await?;

        self.vectors
            .upsert(
                tenant_id,
                doc_id,
                embedding,
                VectorMetadata {
                    title: request.title.clone(),
                    content_type: request.content_type,
                    source_url: request.source_url.clone(),
                },
            )
            .await?;

        if let Err(e) =
            self.lexical
                .add_document(tenant_id, doc_id, &request.full_text)
        {
            self.rollback_vector(tenant_id, doc_id).await;
            return Err(e);
        }

        let doc = Document {
            tenant_id,
            doc_id,
            content_type: request.content_type,
            title: request.title,
            source_url: request.source_url,
            excerpt: request.excerpt,
            full_text: request.full_text,
            vector_ref: Some(Document::vector_ref_for(tenant_id, doc_id)),
            created_at: now_epoch_secs(),
        };
        if let Err(e) = self.store.put(&doc) {
            self.lexical.remove_document(tenant_id, doc_id);
            self.rollback_vector(tenant_id, doc_id).await;
            return Err(e);
        }

        tracing::info!(tenant_id, doc_id, "ingested document");
        Ok(doc_id)
    }

    async fn rollback_vector(&self, tenant_id: TenantId, doc_id: DocId) {
        if let Err(e) = self.vectors.remove(tenant_id, doc_id).await {
            tracing::error!(
                tenant_id,
                doc_id,
                error = %e,
                "failed to roll back vector upsert"
            );
        }
    }

    /// Remove a document from the store and purge it from both indices.
    ///
    /// This is the propagation hook for deletions initiated outside the
    /// core. Returns whether the store held the document.
    pub async fn remove(&self, tenant_id: TenantId, doc_id: DocId) -> Result<bool> {
        let existed = self.store.remove(tenant_id, doc_id)?;
        self.lexical.remove_document(tenant_id, doc_id);
        self.vectors.remove(tenant_id, doc_id).await?;
        if existed {
            tracing::info!(tenant_id, doc_id, "removed document");
        }
        Ok(existed)
    }

    /// Repopulate the lexical index by replaying every stored document in
    /// ascending doc-id order.
    ///
    /// The index is not persisted; this replay is the sole recovery path
    /// after a restart, and the fixed order keeps ranking reproducible
    /// across restarts. Existing shards are dropped first, which also makes
    /// this the recovery step after detected index corruption.
    pub fn rebuild(&self) -> Result<usize> {
        self.lexical.clear();
        let docs = self.store.list_all()?;
        let count = docs.len();
        for doc in docs {
            self.lexical
                .add_document(doc.tenant_id, doc.doc_id, &doc.full_text)?;
        }
        tracing::debug!(count, "rebuilt lexical index from store");
        Ok(count)
    }
}
