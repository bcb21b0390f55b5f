use std::path::PathBuf;

use crate::document::{DocId, TenantId};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database error: {0}")]
    Redb(#[from] redb::Error),

    #[error("database open error: {0}")]
    RedbDatabase(#[from] redb::DatabaseError),

    #[error("database storage error: {0}")]
    RedbStorage(#[from] redb::StorageError),

    #[error("database transaction error: {0}")]
    RedbTransaction(#[from] redb::TransactionError),

    #[error("database table error: {0}")]
    RedbTable(#[from] redb::TableError),

    #[error("database commit error: {0}")]
    RedbCommit(#[from] redb::CommitError),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("data directory does not exist and could not be created: {0}")]
    DataDir(PathBuf),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("document {doc_id} is already indexed for tenant {tenant_id}")]
    DuplicateDocument { tenant_id: TenantId, doc_id: DocId },

    #[error("document has no text content")]
    EmptyContent,

    #[error("embedding provider rate limited")]
    ProviderRateLimited,

    #[error("embedding provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("all retrieval branches failed")]
    RetrievalUnavailable,

    #[error("lexical index corruption: {0}")]
    IndexCorruption(String),
}

impl Error {
    /// Stable machine-readable name for this error kind, carried in the
    /// MCP tool error payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Io(_) => "io",
            Error::Redb(_)
            | Error::RedbDatabase(_)
            | Error::RedbStorage(_)
            | Error::RedbTransaction(_)
            | Error::RedbTable(_)
            | Error::RedbCommit(_) => "database",
            Error::Json(_) => "serialization",
            Error::Config(_) => "config",
            Error::DataDir(_) => "data_dir",
            Error::InvalidRequest(_) => "invalid_request",
            Error::DuplicateDocument { .. } => "duplicate_document",
            Error::EmptyContent => "empty_content",
            Error::ProviderRateLimited => "provider_rate_limited",
            Error::ProviderUnavailable(_) => "provider_unavailable",
            Error::RetrievalUnavailable => "retrieval_unavailable",
            Error::IndexCorruption(_) => "index_corruption",
        }
    }
}
