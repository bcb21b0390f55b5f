use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Isolation boundary corresponding to one user. Every index and query
/// operation is scoped to exactly one tenant.
pub type TenantId = u64;

/// Identifier for an ingested document, unique within its tenant.
/// Allocated by the document store in ascending order; the allocation
/// order doubles as the deterministic replay order on rebuild.
pub type DocId = u64;

/// Stored excerpts are capped to this many characters when none is supplied.
pub const EXCERPT_CHAR_CAP: usize = 1000;

/// Kind of content a document was ingested from.
///
/// Raw format decoding (PDF text extraction, OCR, ...) happens upstream; by
/// the time content reaches the store it is plain text.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Webpage,
    Pdf,
    Docx,
    Spreadsheet,
    Image,
    Text,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Webpage => "webpage",
            ContentType::Pdf => "pdf",
            ContentType::Docx => "docx",
            ContentType::Spreadsheet => "spreadsheet",
            ContentType::Image => "image",
            ContentType::Text => "text",
        }
    }
}

impl std::fmt::Display for ContentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ContentType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "webpage" => Ok(ContentType::Webpage),
            "pdf" => Ok(ContentType::Pdf),
            "docx" => Ok(ContentType::Docx),
            "spreadsheet" | "excel" | "xlsx" => Ok(ContentType::Spreadsheet),
            "image" => Ok(ContentType::Image),
            "text" => Ok(ContentType::Text),
            other => Err(format!("unknown content type: {other}")),
        }
    }
}

/// Inclusive created-at bounds, epoch seconds. An open bound matches
/// everything on that side.
#[derive(
    Debug, Clone, Copy, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq,
)]
#[serde(rename_all = "camelCase")]
pub struct DateRange {
    pub start: Option<u64>,
    pub end: Option<u64>,
}

impl DateRange {
    /// Build a range from optional bounds; `None` when both are open, so
    /// an absent filter stays absent.
    pub fn from_bounds(start: Option<u64>, end: Option<u64>) -> Option<Self> {
        if start.is_none() && end.is_none() {
            None
        } else {
            Some(Self { start, end })
        }
    }

    pub fn contains(&self, timestamp: u64) -> bool {
        if let Some(start) = self.start
            && timestamp < start
        {
            return false;
        }
        if let Some(end) = self.end
            && timestamp > end
        {
            return false;
        }
        true
    }
}

/// One ingested item, append-only after creation.
///
/// A record is only persisted once ingestion fully succeeded, so stored
/// documents always carry a `vector_ref`. A document without one is
/// ingestion-incomplete and must never surface through semantic search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub tenant_id: TenantId,
    pub doc_id: DocId,
    pub content_type: ContentType,
    pub title: String,
    pub source_url: Option<String>,
    pub excerpt: Option<String>,
    pub full_text: String,
    pub vector_ref: Option<String>,
    /// Epoch seconds.
    pub created_at: u64,
}

impl Document {
    /// The identifier under which this document's embedding lives in the
    /// vector collaborator.
    pub fn vector_ref_for(tenant_id: TenantId, doc_id: DocId) -> String {
        format!("{tenant_id}_{doc_id}")
    }

    /// Excerpt for display: the supplied one, or the leading
    /// [`EXCERPT_CHAR_CAP`] characters of the full text.
    pub fn display_excerpt(&self) -> String {
        match &self.excerpt {
            Some(excerpt) => excerpt.clone(),
            None => truncate_chars(&self.full_text, EXCERPT_CHAR_CAP),
        }
    }
}

/// Truncate at a character boundary, never mid-codepoint.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => text[..byte_idx].to_string(),
        None => text.to_string(),
    }
}

/// Current time as epoch seconds.
pub fn now_epoch_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
