pub mod ident;

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use serde::Serialize;
use tracing::{info, warn};

use crate::store::types::{DocId, DocumentMeta, DocumentSummary};
use crate::store::{CorpusStore, DocumentAccess};
use ident::{classify, IdKind};

/// Reported mismatch samples are capped so the report stays bounded
/// regardless of corpus size; the full count is always reported.
const MISMATCH_SAMPLE_LIMIT: usize = 5;

/// Contradictory alias evidence — recorded, never auto-resolved.
#[derive(Debug, Clone, Serialize)]
pub struct MappingConflict {
    pub opaque_id: String,
    pub kept: String,
    pub rejected: String,
}

/// Resolved mapping from opaque ids to their ticker-style counterpart.
///
/// Built purely from co-occurrence evidence: a document and its summary
/// carrying one identifier of each shape for the same logical record. First
/// observation wins; contradictions are kept as [`MappingConflict`]s.
#[derive(Debug, Clone, Default)]
pub struct AliasTable {
    opaque_to_ticker: HashMap<String, String>,
    conflicts: Vec<MappingConflict>,
}

impl AliasTable {
    /// Build the table by joining the two collections on `document_id`.
    /// Deterministic for a fixed document ordering; never invents a mapping
    /// without at least one co-occurrence.
    pub fn build(documents: &[DocumentMeta], summaries: &[DocumentSummary]) -> Self {
        let by_doc: HashMap<&str, &DocumentSummary> = summaries
            .iter()
            .map(|s| (s.document_id.as_str(), s))
            .collect();

        let mut table = Self::default();
        for doc in documents {
            let Some(summary) = by_doc.get(doc.document_id.as_str()) else {
                continue;
            };
            let pair = match (classify(&doc.entity_id), classify(&summary.entity_id)) {
                (IdKind::Opaque, IdKind::Ticker) => Some((&doc.entity_id, &summary.entity_id)),
                (IdKind::Ticker, IdKind::Opaque) => Some((&summary.entity_id, &doc.entity_id)),
                // Same shape on both sides carries no cross-scheme evidence.
                _ => None,
            };
            let Some((opaque, ticker)) = pair else { continue };

            match table.opaque_to_ticker.get(opaque.as_str()).cloned() {
                None => {
                    table
                        .opaque_to_ticker
                        .insert(opaque.clone(), ticker.clone());
                }
                Some(existing) if existing != *ticker => {
                    warn!(
                        opaque_id = %opaque,
                        kept = %existing,
                        rejected = %ticker,
                        document_id = %doc.document_id,
                        "contradictory alias evidence"
                    );
                    table.conflicts.push(MappingConflict {
                        opaque_id: opaque.clone(),
                        kept: existing,
                        rejected: ticker.clone(),
                    });
                }
                Some(_) => {}
            }
        }

        info!(
            mappings = table.opaque_to_ticker.len(),
            conflicts = table.conflicts.len(),
            "alias table built"
        );
        table
    }

    /// Canonicalize an identifier. Opaque ids with a known mapping come back
    /// as their ticker; everything else passes through unchanged — absence
    /// of a mapping is a degraded-but-valid result, not an error.
    pub fn normalize(&self, id: &str) -> String {
        match classify(id) {
            IdKind::Ticker => id.to_string(),
            IdKind::Opaque => self
                .opaque_to_ticker
                .get(id)
                .cloned()
                .unwrap_or_else(|| id.to_string()),
        }
    }

    /// The opaque aliases known for a canonical id, for lookups against
    /// collections that have not been repaired yet.
    pub fn aliases_of(&self, canonical: &str) -> Vec<String> {
        self.opaque_to_ticker
            .iter()
            .filter(|(_, ticker)| ticker.as_str() == canonical)
            .map(|(opaque, _)| opaque.clone())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.opaque_to_ticker.is_empty()
    }

    pub fn len(&self) -> usize {
        self.opaque_to_ticker.len()
    }

    pub fn conflicts(&self) -> &[MappingConflict] {
        &self.conflicts
    }

    fn inverted(&self) -> HashMap<&str, &str> {
        // When several opaque ids share a ticker the first by map order wins;
        // the ambiguity is already visible through `conflicts`/`aliases_of`.
        let mut ticker_to_opaque: HashMap<&str, &str> = HashMap::new();
        for (opaque, ticker) in &self.opaque_to_ticker {
            ticker_to_opaque.entry(ticker.as_str()).or_insert(opaque.as_str());
        }
        ticker_to_opaque
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Mismatch {
    pub document_id: DocId,
    pub document_entity: String,
    pub summary_entity: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConsistencyReport {
    pub document_count: usize,
    pub summary_count: usize,
    pub documents_without_summary: usize,
    pub summaries_without_document: usize,
    pub mismatch_count: usize,
    pub sample_mismatches: Vec<Mismatch>,
}

/// Compare the two collections joined by `document_id`, after normalizing
/// both entity ids through the alias table. Orphans on either side are
/// counted but not comparable.
pub fn verify_consistency(
    table: &AliasTable,
    documents: &[DocumentMeta],
    summaries: &[DocumentSummary],
) -> ConsistencyReport {
    let by_doc: HashMap<&str, &DocumentSummary> = summaries
        .iter()
        .map(|s| (s.document_id.as_str(), s))
        .collect();
    let doc_ids: std::collections::HashSet<&str> =
        documents.iter().map(|d| d.document_id.as_str()).collect();

    let mut mismatch_count = 0usize;
    let mut sample_mismatches = Vec::new();
    let mut documents_without_summary = 0usize;

    for doc in documents {
        let Some(summary) = by_doc.get(doc.document_id.as_str()) else {
            documents_without_summary += 1;
            continue;
        };
        let doc_entity = table.normalize(&doc.entity_id);
        let summary_entity = table.normalize(&summary.entity_id);
        if doc_entity != summary_entity {
            mismatch_count += 1;
            if sample_mismatches.len() < MISMATCH_SAMPLE_LIMIT {
                sample_mismatches.push(Mismatch {
                    document_id: doc.document_id.clone(),
                    document_entity: doc_entity,
                    summary_entity,
                });
            }
        }
    }

    let summaries_without_document = summaries
        .iter()
        .filter(|s| !doc_ids.contains(s.document_id.as_str()))
        .count();

    ConsistencyReport {
        document_count: documents.len(),
        summary_count: summaries.len(),
        documents_without_summary,
        summaries_without_document,
        mismatch_count,
        sample_mismatches,
    }
}

/// Which collection a repair pass rewrites.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepairDirection {
    /// Rewrite document records to the ticker scheme.
    ToTicker,
    /// Rewrite summary records to the opaque scheme.
    ToUuid,
}

#[derive(Debug, thiserror::Error)]
pub enum RepairError {
    #[error("cannot repair: no mapping evidence")]
    NoMappingEvidence,
}

#[derive(Debug, Clone, Serialize)]
pub struct RepairResult {
    pub records_examined: usize,
    pub records_rewritten: usize,
    /// Ids in the target scheme with no known mapping. Left untouched —
    /// repair never guesses.
    pub unresolved: usize,
}

/// Plan the rewrites for one collection's `(document_id, entity_id)` records.
/// Pure, so a repair can be dry-run and is trivially idempotent: records
/// already in the target scheme plan zero further changes.
pub fn plan_rewrites<'a, I>(
    direction: RepairDirection,
    table: &AliasTable,
    records: I,
) -> Result<(Vec<(DocId, String)>, RepairResult), RepairError>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    if table.is_empty() {
        return Err(RepairError::NoMappingEvidence);
    }

    let inverted = table.inverted();
    let mut rewrites = Vec::new();
    let mut unresolved = 0usize;
    let mut examined = 0usize;

    for (document_id, entity_id) in records {
        examined += 1;
        match (direction, classify(entity_id)) {
            // Already in the target scheme.
            (RepairDirection::ToTicker, IdKind::Ticker)
            | (RepairDirection::ToUuid, IdKind::Opaque) => {}
            (RepairDirection::ToTicker, IdKind::Opaque) => {
                match table.opaque_to_ticker.get(entity_id) {
                    Some(ticker) => rewrites.push((document_id.to_string(), ticker.clone())),
                    None => unresolved += 1,
                }
            }
            (RepairDirection::ToUuid, IdKind::Ticker) => match inverted.get(entity_id) {
                Some(opaque) => rewrites.push((document_id.to_string(), (*opaque).to_string())),
                None => unresolved += 1,
            },
        }
    }

    let result = RepairResult {
        records_examined: examined,
        records_rewritten: rewrites.len(),
        unresolved,
    };
    Ok((rewrites, result))
}

/// Per-entity corpus coverage, grouped by canonical id.
#[derive(Debug, Clone, Serialize)]
pub struct EntityStats {
    pub entity_id: String,
    pub transcript_count: usize,
    pub summary_count: usize,
    pub has_entity_summary: bool,
}

/// Store-bound resolver surface: holds an immutable alias-table snapshot and
/// runs the administrative verification/repair passes against the corpus.
pub struct EntityResolver {
    store: Arc<CorpusStore>,
    table: AliasTable,
}

impl EntityResolver {
    /// Build the alias table from the current corpus contents.
    pub async fn load(store: Arc<CorpusStore>) -> Result<Self> {
        let documents = store.all_documents().await?;
        let summaries = store.all_summaries().await?;
        let table = AliasTable::build(&documents, &summaries);
        Ok(Self { store, table })
    }

    pub fn resolve(&self, raw_id: &str) -> String {
        self.table.normalize(raw_id)
    }

    pub fn table(&self) -> &AliasTable {
        &self.table
    }

    pub async fn report_consistency(&self) -> Result<ConsistencyReport> {
        let documents = self.store.all_documents().await?;
        let summaries = self.store.all_summaries().await?;
        Ok(verify_consistency(&self.table, &documents, &summaries))
    }

    /// Rewrite one collection's entity ids to the other scheme. Idempotent;
    /// administrative — never run concurrently with itself.
    pub async fn repair(&self, direction: RepairDirection) -> Result<RepairResult> {
        let result = match direction {
            RepairDirection::ToTicker => {
                let documents = self.store.all_documents().await?;
                let records = documents
                    .iter()
                    .map(|d| (d.document_id.as_str(), d.entity_id.as_str()));
                let (rewrites, result) = plan_rewrites(direction, &self.table, records)?;
                let applied = self.store.rewrite_document_entities(&rewrites).await?;
                info!(applied, unresolved = result.unresolved, "document repair applied");
                result
            }
            RepairDirection::ToUuid => {
                let summaries = self.store.all_summaries().await?;
                let records = summaries
                    .iter()
                    .map(|s| (s.document_id.as_str(), s.entity_id.as_str()));
                let (rewrites, result) = plan_rewrites(direction, &self.table, records)?;
                let applied = self.store.rewrite_summary_entities(&rewrites).await?;
                info!(applied, unresolved = result.unresolved, "summary repair applied");
                result
            }
        };
        Ok(result)
    }

    /// Per-entity transcript/summary coverage, grouped by canonical id.
    pub async fn entity_distribution(&self) -> Result<Vec<EntityStats>> {
        let documents = self.store.all_documents().await?;
        let summaries = self.store.all_summaries().await?;

        let mut stats: HashMap<String, EntityStats> = HashMap::new();
        for doc in &documents {
            let canonical = self.table.normalize(&doc.entity_id);
            let entry = stats.entry(canonical.clone()).or_insert_with(|| EntityStats {
                entity_id: canonical,
                transcript_count: 0,
                summary_count: 0,
                has_entity_summary: false,
            });
            entry.transcript_count += 1;
        }
        for summary in &summaries {
            let canonical = self.table.normalize(&summary.entity_id);
            let entry = stats.entry(canonical.clone()).or_insert_with(|| EntityStats {
                entity_id: canonical,
                transcript_count: 0,
                summary_count: 0,
                has_entity_summary: false,
            });
            entry.summary_count += 1;
        }
        for entry in stats.values_mut() {
            entry.has_entity_summary = self
                .store
                .entity_summary(&entry.entity_id)
                .await?
                .is_some();
        }

        let mut out: Vec<EntityStats> = stats.into_values().collect();
        out.sort_by(|a, b| a.entity_id.cmp(&b.entity_id));
        Ok(out)
    }

    /// Oldest and newest documents on file, if any.
    pub async fn date_range(&self) -> Result<Option<(DocumentMeta, DocumentMeta)>> {
        let documents = self.store.all_documents().await?;
        let oldest = documents.iter().min_by_key(|d| d.published_at).cloned();
        let newest = documents.iter().max_by_key(|d| d.published_at).cloned();
        Ok(oldest.zip(newest))
    }
}
