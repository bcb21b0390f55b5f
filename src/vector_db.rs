use std::path::Path;

use async_trait::async_trait;
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};

use crate::{
    document::{DocId, TenantId},
    error::Result,
    vector::{
        ScoreConvention, VectorHit, VectorIndex, VectorMetadata, cosine,
    },
};

const VECTORS: TableDefinition<(u64, u64), &[u8]> =
    TableDefinition::new("vectors");

/// redb-backed [`VectorIndex`], keyed by `(tenant_id, doc_id)` so each
/// tenant's vectors form one contiguous key range.
///
/// Entries are f32 LE values, flat. Embedding dimension is implied by the
/// byte length; queries score by brute-force cosine over the tenant's
/// range. Upsert metadata is not persisted here: every hit is re-verified
/// against the document store before it reaches a caller, which is where
/// result metadata comes from.
pub struct RedbVectorIndex {
    db: Database,
}

impl RedbVectorIndex {
    /// Open or create a vector database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        let db = Database::create(path)?;

        let txn = db.begin_write()?;
        txn.open_table(VECTORS)?;
        txn.commit()?;

        Ok(Self { db })
    }
}

#[async_trait]
impl VectorIndex for RedbVectorIndex {
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
        let bytes: &[u8] = bytemuck::cast_slice(&vector);
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(VECTORS)?;
            table.insert((tenant_id, doc_id), bytes)?;
        }
        txn.commit()?;
        Ok(())
    }

    async fn query(
        &self,
        tenant_id: TenantId,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<VectorHit>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(VECTORS)?;

        let mut hits = Vec::new();
        for entry in table.range((tenant_id, 0)..=(tenant_id, u64::MAX))? {
            let (key, value) = entry?;
            let (_, doc_id) = key.value();
            // Copying cast: redb value buffers carry no alignment
            // guarantee for f32.
            let stored: Vec<f32> = bytemuck::pod_collect_to_vec(value.value());
            hits.push(VectorHit {
                doc_id,
                score: cosine(vector, &stored),
            });
        }

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
        let txn = self.db.begin_write()?;
        let removed = {
            let mut table = txn.open_table(VECTORS)?;
            table.remove((tenant_id, doc_id))?.is_some()
        };
        txn.commit()?;
        Ok(removed)
    }
}

impl std::fmt::Debug for RedbVectorIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbVectorIndex").finish_non_exhaustive()
    }
}
