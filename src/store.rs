use std::{
    collections::{BTreeMap, HashSet},
    path::Path,
};

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};

use crate::{
    document::{ContentType, DateRange, DocId, Document, TenantId},
    error::Result,
};

const DOCUMENTS: TableDefinition<(u64, u64), &[u8]> =
    TableDefinition::new("documents");
const COUNTERS: TableDefinition<&str, u64> = TableDefinition::new("counters");

const NEXT_DOC_ID: &str = "next_doc_id";

/// Durable record of ingested items, queryable by tenant, type, and
/// creation date.
///
/// The retrieval core consumes this for id allocation, metadata snapshots,
/// filter-set resolution, and the lexical-index rebuild scan. The lexical
/// index itself is never persisted; the store is the sole recovery source.
pub trait DocumentStore: Send + Sync {
    /// Allocate a fresh document id. Ids are handed out in ascending order
    /// and never reused.
    fn allocate_doc_id(&self) -> Result<DocId>;

    fn put(&self, doc: &Document) -> Result<()>;

    fn get(&self, tenant_id: TenantId, doc_id: DocId) -> Result<Option<Document>>;

    fn remove(&self, tenant_id: TenantId, doc_id: DocId) -> Result<bool>;

    /// All documents of one tenant, ascending by doc id.
    fn list_tenant(&self, tenant_id: TenantId) -> Result<Vec<Document>>;

    /// Every stored document across all tenants, ascending by doc id.
    /// This is the replay order for index rebuild.
    fn list_all(&self) -> Result<Vec<Document>>;

    /// Resolve the set of doc ids matching the metadata predicates:
    /// tenant match AND type match AND created-at within range.
    fn eligible_ids(
        &self,
        tenant_id: TenantId,
        type_filter: Option<ContentType>,
        date_range: Option<DateRange>,
    ) -> Result<HashSet<DocId>>;

    /// Document count per tenant.
    fn tenant_counts(&self) -> Result<BTreeMap<TenantId, u64>>;
}

/// redb-backed [`DocumentStore`].
///
/// Records are keyed by `(tenant_id, doc_id)` so a tenant's documents form
/// one contiguous key range, and serialized as JSON.
pub struct RedbStore {
    db: Database,
}

impl RedbStore {
    pub fn open(path: &Path) -> Result<Self> {
        let db = Database::create(path)?;

        // Ensure all tables exist by opening them in a write transaction.
        let txn = db.begin_write()?;
        txn.open_table(DOCUMENTS)?;
        txn.open_table(COUNTERS)?;
        txn.commit()?;

        Ok(Self { db })
    }
}

impl DocumentStore for RedbStore {
    fn allocate_doc_id(&self) -> Result<DocId> {
        let txn = self.db.begin_write()?;
        let next = {
            let mut table = txn.open_table(COUNTERS)?;
            let next = table
                .get(NEXT_DOC_ID)?
                .map(|v| v.value())
                .unwrap_or(1);
            table.insert(NEXT_DOC_ID, next + 1)?;
            next
        };
        txn.commit()?;
        Ok(next)
    }

    fn put(&self, doc: &Document) -> Result<()> {
        let bytes = serde_json::to_vec(doc)?;
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(DOCUMENTS)?;
            table.insert((doc.tenant_id, doc.doc_id), bytes.as_slice())?;
        }
        txn.commit()?;
        Ok(())
    }

    fn get(&self, tenant_id: TenantId, doc_id: DocId) -> Result<Option<Document>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(DOCUMENTS)?;
        match table.get((tenant_id, doc_id))? {
            Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
            None => Ok(None),
        }
    }

    fn remove(&self, tenant_id: TenantId, doc_id: DocId) -> Result<bool> {
        let txn = self.db.begin_write()?;
        let removed = {
            let mut table = txn.open_table(DOCUMENTS)?;
            table.remove((tenant_id, doc_id))?.is_some()
        };
        txn.commit()?;
        Ok(removed)
    }

    fn list_tenant(&self, tenant_id: TenantId) -> Result<Vec<Document>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(DOCUMENTS)?;
        let mut result = Vec::new();
        for entry in table.range((tenant_id, 0)..=(tenant_id, u64::MAX))? {
            let (_, value) = entry?;
            result.push(serde_json::from_slice(value.value())?);
        }
        Ok(result)
    }

    fn list_all(&self) -> Result<Vec<Document>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(DOCUMENTS)?;
        let mut result: Vec<Document> = Vec::new();
        for entry in table.iter()? {
            let (_, value) = entry?;
            result.push(serde_json::from_slice(value.value())?);
        }
        result.sort_by_key(|d| d.doc_id);
        Ok(result)
    }

    fn eligible_ids(
        &self,
        tenant_id: TenantId,
        type_filter: Option<ContentType>,
        date_range: Option<DateRange>,
    ) -> Result<HashSet<DocId>> {
        let mut result = HashSet::new();
        for doc in self.list_tenant(tenant_id)? {
            if let Some(wanted) = type_filter
                && doc.content_type != wanted
            {
                continue;
            }
            if let Some(range) = date_range
                && !range.contains(doc.created_at)
            {
                continue;
            }
            result.insert(doc.doc_id);
        }
        Ok(result)
    }

    fn tenant_counts(&self) -> Result<BTreeMap<TenantId, u64>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(DOCUMENTS)?;
        let mut counts = BTreeMap::new();
        for entry in table.iter()? {
            let (key, _) = entry?;
            let (tenant_id, _) = key.value();
            *counts.entry(tenant_id).or_insert(0) += 1;
        }
        Ok(counts)
    }
}

impl std::fmt::Debug for RedbStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbStore").finish_non_exhaustive()
    }
}
