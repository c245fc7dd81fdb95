use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Stable, opaque document ID assigned by the ingestion pipeline.
pub type DocId = String;

/// Transcript/filing metadata stored alongside content in cnidarium.
///
/// `entity_id` carries whichever identifier shape the ingestion pipeline
/// wrote (ticker or opaque token); it is not guaranteed canonical until a
/// repair pass has run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentMeta {
    pub document_id: DocId,
    pub entity_id: String,
    pub published_at: DateTime<Utc>,
    /// Fiscal period, e.g. "Q1 2018".
    pub period_label: String,
    /// Character length of the stored full text.
    pub size: usize,
}

/// Pre-computed condensation of one document. At most one current summary
/// per document: the store keys these by `document_id`, so regeneration
/// replaces in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentSummary {
    pub document_id: DocId,
    pub entity_id: String,
    pub summary_text: String,
    pub generated_at: DateTime<Utc>,
}

/// Synthesized cross-document narrative for one entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntitySummary {
    pub entity_id: String,
    pub narrative_text: String,
    /// Provenance, most-recent-first.
    pub source_document_ids: Vec<DocId>,
    pub generated_at: DateTime<Utc>,
}

/// A completed reasoning run archived for audit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceRecord {
    pub conversation_id: String,
    pub question: String,
    pub answer: String,
    /// "answered" or the failure reason.
    pub outcome: String,
    pub steps: u32,
    pub documents_consulted: Vec<DocId>,
    pub recorded_at: i64,
}
