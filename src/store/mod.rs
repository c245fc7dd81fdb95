pub mod types;

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use cnidarium::{StateDelta, StateRead, StateWrite, Storage};
use futures::StreamExt;
use tracing::{debug, warn};

use types::{DocId, DocumentMeta, DocumentSummary, EntitySummary, TraceRecord};

// Key prefixes (no trailing slashes — cnidarium convention)
const DOC_META_PREFIX: &str = "doc/meta";
const DOC_CONTENT_PREFIX: &str = "doc/content";
const DOC_ENTITY_PREFIX: &str = "doc/entity";
const DOC_SUMMARY_PREFIX: &str = "summary/doc";
const ENTITY_SUMMARY_PREFIX: &str = "summary/entity";
const TRACE_PREFIX: &str = "trace";

fn meta_key(id: &str) -> String {
    format!("{}/{}", DOC_META_PREFIX, id)
}
fn content_key(id: &str) -> String {
    format!("{}/{}", DOC_CONTENT_PREFIX, id)
}
fn entity_index_key(entity_id: &str, id: &str) -> String {
    format!("{}/{}:{}", DOC_ENTITY_PREFIX, entity_id, id)
}
fn doc_summary_key(id: &str) -> String {
    format!("{}/{}", DOC_SUMMARY_PREFIX, id)
}
fn entity_summary_key(entity_id: &str) -> String {
    format!("{}/{}", ENTITY_SUMMARY_PREFIX, entity_id)
}
fn trace_key(conversation_id: &str, recorded_at: i64) -> String {
    format!("{}/{}/{}", TRACE_PREFIX, conversation_id, recorded_at)
}

/// Read path into the corpus, shared by the analyzers and the reasoning
/// loop. The cnidarium-backed [`CorpusStore`] is the production
/// implementation; tests substitute an in-memory one.
#[async_trait]
pub trait DocumentAccess: Send + Sync {
    async fn document(&self, document_id: &str) -> Result<Option<DocumentMeta>>;
    async fn document_text(&self, document_id: &str) -> Result<Option<String>>;
    /// Documents for one entity id (exact match on the stored id), newest first.
    async fn documents_for_entity(&self, entity_id: &str) -> Result<Vec<DocumentMeta>>;
    async fn distinct_entity_ids(&self) -> Result<Vec<String>>;
    async fn summary_for_document(&self, document_id: &str) -> Result<Option<DocumentSummary>>;
    async fn entity_summary(&self, entity_id: &str) -> Result<Option<EntitySummary>>;
    /// Document summaries for one entity id, most recent underlying document first.
    async fn summaries_for_entity(&self, entity_id: &str) -> Result<Vec<DocumentSummary>>;
}

pub struct CorpusStore {
    storage: Storage,
    /// Full-text cache — transcripts are large and re-read across chunked
    /// Tier-Two turns within a conversation.
    content_cache: tokio::sync::RwLock<HashMap<String, String>>,
}

impl CorpusStore {
    pub async fn open(data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir)?;
        let prefixes = vec![
            DOC_META_PREFIX.to_string(),
            DOC_CONTENT_PREFIX.to_string(),
            DOC_ENTITY_PREFIX.to_string(),
            DOC_SUMMARY_PREFIX.to_string(),
            ENTITY_SUMMARY_PREFIX.to_string(),
            TRACE_PREFIX.to_string(),
        ];
        let storage = Storage::load(data_dir.to_path_buf(), prefixes)
            .await
            .context("Failed to init cnidarium storage")?;
        Ok(Self {
            storage,
            content_cache: tokio::sync::RwLock::new(HashMap::new()),
        })
    }

    /// Store a document and index it under its entity id.
    pub async fn put_document(&self, meta: &DocumentMeta, full_text: &str) -> Result<()> {
        let mut meta = meta.clone();
        meta.size = full_text.chars().count();

        let snapshot = self.storage.latest_snapshot();
        let mut delta = StateDelta::new(snapshot);
        delta.put_raw(content_key(&meta.document_id), full_text.as_bytes().to_vec());
        delta.put_raw(
            meta_key(&meta.document_id),
            serde_json::to_vec(&meta).context("serialize document meta")?,
        );
        // Entity index entry (empty value — presence is the index)
        delta.put_raw(entity_index_key(&meta.entity_id, &meta.document_id), vec![]);
        self.storage.commit(delta).await?;

        debug!(
            document_id = %meta.document_id,
            entity_id = %meta.entity_id,
            size = meta.size,
            "document stored"
        );
        Ok(())
    }

    /// Upsert a document summary. Keyed by `document_id`, so regenerating a
    /// summary replaces the previous one rather than duplicating it.
    pub async fn put_summary(&self, summary: &DocumentSummary) -> Result<()> {
        let snapshot = self.storage.latest_snapshot();
        let mut delta = StateDelta::new(snapshot);
        delta.put_raw(
            doc_summary_key(&summary.document_id),
            serde_json::to_vec(summary).context("serialize document summary")?,
        );
        self.storage.commit(delta).await?;
        debug!(document_id = %summary.document_id, "document summary stored");
        Ok(())
    }

    pub async fn put_entity_summary(&self, summary: &EntitySummary) -> Result<()> {
        let snapshot = self.storage.latest_snapshot();
        let mut delta = StateDelta::new(snapshot);
        delta.put_raw(
            entity_summary_key(&summary.entity_id),
            serde_json::to_vec(summary).context("serialize entity summary")?,
        );
        self.storage.commit(delta).await?;
        debug!(entity_id = %summary.entity_id, "entity summary stored");
        Ok(())
    }

    /// All document metadata, unordered. Used by the resolver's mapping and
    /// verification passes.
    pub async fn all_documents(&self) -> Result<Vec<DocumentMeta>> {
        let snapshot = self.storage.latest_snapshot();
        let mut stream = snapshot.prefix_raw(DOC_META_PREFIX);
        let mut results = Vec::new();
        while let Some(entry) = stream.next().await {
            match entry {
                Ok((_key, value)) => match serde_json::from_slice::<DocumentMeta>(&value) {
                    Ok(meta) => results.push(meta),
                    Err(e) => warn!("Skipping undecodable document meta: {}", e),
                },
                Err(e) => warn!("Error reading document meta stream: {}", e),
            }
        }
        Ok(results)
    }

    /// All document summaries, unordered.
    pub async fn all_summaries(&self) -> Result<Vec<DocumentSummary>> {
        let snapshot = self.storage.latest_snapshot();
        let mut stream = snapshot.prefix_raw(DOC_SUMMARY_PREFIX);
        let mut results = Vec::new();
        while let Some(entry) = stream.next().await {
            match entry {
                Ok((_key, value)) => match serde_json::from_slice::<DocumentSummary>(&value) {
                    Ok(s) => results.push(s),
                    Err(e) => warn!("Skipping undecodable summary: {}", e),
                },
                Err(e) => warn!("Error reading summary stream: {}", e),
            }
        }
        Ok(results)
    }

    /// Rewrite the `entity_id` of the given documents, moving their entity
    /// index entries. One commit — the batch applies atomically.
    pub async fn rewrite_document_entities(&self, rewrites: &[(DocId, String)]) -> Result<usize> {
        if rewrites.is_empty() {
            return Ok(0);
        }
        let snapshot = self.storage.latest_snapshot();
        let mut delta = StateDelta::new(snapshot);
        let mut applied = 0usize;
        for (document_id, new_entity_id) in rewrites {
            let Some(bytes) = delta.get_raw(&meta_key(document_id)).await? else {
                warn!(document_id = %document_id, "rewrite target missing, skipping");
                continue;
            };
            let mut meta: DocumentMeta = serde_json::from_slice(&bytes)?;
            if meta.entity_id == *new_entity_id {
                continue;
            }
            delta.delete(entity_index_key(&meta.entity_id, document_id));
            meta.entity_id = new_entity_id.clone();
            delta.put_raw(entity_index_key(new_entity_id, document_id), vec![]);
            delta.put_raw(meta_key(document_id), serde_json::to_vec(&meta)?);
            applied += 1;
        }
        self.storage.commit(delta).await?;
        Ok(applied)
    }

    /// Rewrite the `entity_id` of the given document summaries. One commit.
    pub async fn rewrite_summary_entities(&self, rewrites: &[(DocId, String)]) -> Result<usize> {
        if rewrites.is_empty() {
            return Ok(0);
        }
        let snapshot = self.storage.latest_snapshot();
        let mut delta = StateDelta::new(snapshot);
        let mut applied = 0usize;
        for (document_id, new_entity_id) in rewrites {
            let Some(bytes) = delta.get_raw(&doc_summary_key(document_id)).await? else {
                warn!(document_id = %document_id, "rewrite target missing, skipping");
                continue;
            };
            let mut summary: DocumentSummary = serde_json::from_slice(&bytes)?;
            if summary.entity_id == *new_entity_id {
                continue;
            }
            summary.entity_id = new_entity_id.clone();
            delta.put_raw(doc_summary_key(document_id), serde_json::to_vec(&summary)?);
            applied += 1;
        }
        self.storage.commit(delta).await?;
        Ok(applied)
    }

    /// Archive a completed reasoning run.
    pub async fn record_trace(&self, record: &TraceRecord) -> Result<()> {
        let snapshot = self.storage.latest_snapshot();
        let mut delta = StateDelta::new(snapshot);
        delta.put_raw(
            trace_key(&record.conversation_id, record.recorded_at),
            serde_json::to_vec(record).context("serialize trace record")?,
        );
        self.storage.commit(delta).await?;
        debug!(conversation_id = %record.conversation_id, "trace archived");
        Ok(())
    }

    /// Archived runs, newest first.
    pub async fn recent_traces(&self, limit: usize) -> Result<Vec<TraceRecord>> {
        let snapshot = self.storage.latest_snapshot();
        let mut stream = snapshot.prefix_raw(TRACE_PREFIX);
        let mut results = Vec::new();
        while let Some(entry) = stream.next().await {
            match entry {
                Ok((_key, value)) => {
                    if let Ok(record) = serde_json::from_slice::<TraceRecord>(&value) {
                        results.push(record);
                    }
                }
                Err(e) => warn!("Error reading trace stream: {}", e),
            }
        }
        results.sort_by(|a, b| b.recorded_at.cmp(&a.recorded_at));
        results.truncate(limit);
        Ok(results)
    }

    /// Order summaries by the recency of their underlying document. Orphan
    /// summaries (no document on file) sort last, by generation time.
    async fn sort_summaries_by_recency(
        &self,
        summaries: &mut Vec<DocumentSummary>,
    ) -> Result<()> {
        let mut published: HashMap<String, chrono::DateTime<chrono::Utc>> = HashMap::new();
        for s in summaries.iter() {
            if let Some(meta) = self.document(&s.document_id).await? {
                published.insert(s.document_id.clone(), meta.published_at);
            }
        }
        summaries.sort_by(|a, b| {
            match (published.get(&a.document_id), published.get(&b.document_id)) {
                (Some(pa), Some(pb)) => pb.cmp(pa),
                (Some(_), None) => std::cmp::Ordering::Less,
                (None, Some(_)) => std::cmp::Ordering::Greater,
                (None, None) => b.generated_at.cmp(&a.generated_at),
            }
        });
        Ok(())
    }
}

#[async_trait]
impl DocumentAccess for CorpusStore {
    async fn document(&self, document_id: &str) -> Result<Option<DocumentMeta>> {
        let snapshot = self.storage.latest_snapshot();
        let Some(bytes) = snapshot.get_raw(&meta_key(document_id)).await? else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    async fn document_text(&self, document_id: &str) -> Result<Option<String>> {
        {
            let cache = self.content_cache.read().await;
            if let Some(text) = cache.get(document_id) {
                return Ok(Some(text.clone()));
            }
        }

        let snapshot = self.storage.latest_snapshot();
        let Some(bytes) = snapshot.get_raw(&content_key(document_id)).await? else {
            return Ok(None);
        };
        let text = String::from_utf8_lossy(&bytes).into_owned();

        {
            let mut cache = self.content_cache.write().await;
            cache.insert(document_id.to_string(), text.clone());
        }
        Ok(Some(text))
    }

    async fn documents_for_entity(&self, entity_id: &str) -> Result<Vec<DocumentMeta>> {
        let snapshot = self.storage.latest_snapshot();
        let prefix = format!("{}/{}:", DOC_ENTITY_PREFIX, entity_id);
        let mut stream = snapshot.prefix_raw(&prefix);
        let mut results = Vec::new();
        while let Some(entry) = stream.next().await {
            match entry {
                Ok((key, _)) => {
                    // Key format: "doc/entity/{entity_id}:{document_id}"
                    let key_str = String::from_utf8_lossy(key.as_bytes()).into_owned();
                    if let Some(document_id) = key_str.strip_prefix(&prefix) {
                        match self.document(document_id).await? {
                            Some(meta) => results.push(meta),
                            None => warn!(document_id, "entity index entry without meta"),
                        }
                    }
                }
                Err(e) => warn!("Error reading entity index: {}", e),
            }
        }
        results.sort_by(|a, b| b.published_at.cmp(&a.published_at));
        Ok(results)
    }

    async fn distinct_entity_ids(&self) -> Result<Vec<String>> {
        let snapshot = self.storage.latest_snapshot();
        let prefix = format!("{}/", DOC_ENTITY_PREFIX);
        let mut stream = snapshot.prefix_raw(DOC_ENTITY_PREFIX);
        let mut ids = std::collections::BTreeSet::new();
        while let Some(entry) = stream.next().await {
            if let Ok((key, _)) = entry {
                let key_str = String::from_utf8_lossy(key.as_bytes()).into_owned();
                if let Some(rest) = key_str.strip_prefix(&prefix) {
                    if let Some(entity_id) = rest.split(':').next() {
                        ids.insert(entity_id.to_string());
                    }
                }
            }
        }
        Ok(ids.into_iter().collect())
    }

    async fn summary_for_document(&self, document_id: &str) -> Result<Option<DocumentSummary>> {
        let snapshot = self.storage.latest_snapshot();
        let Some(bytes) = snapshot.get_raw(&doc_summary_key(document_id)).await? else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    async fn entity_summary(&self, entity_id: &str) -> Result<Option<EntitySummary>> {
        let snapshot = self.storage.latest_snapshot();
        let Some(bytes) = snapshot.get_raw(&entity_summary_key(entity_id)).await? else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    async fn summaries_for_entity(&self, entity_id: &str) -> Result<Vec<DocumentSummary>> {
        let mut matching: Vec<DocumentSummary> = self
            .all_summaries()
            .await?
            .into_iter()
            .filter(|s| s.entity_id == entity_id)
            .collect();
        self.sort_summaries_by_recency(&mut matching).await?;
        Ok(matching)
    }
}
