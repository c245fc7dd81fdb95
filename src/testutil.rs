//! In-memory test doubles for the store and the language model.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{Duration, TimeZone, Utc};

use crate::llm::{LanguageModel, LlmError, Message};
use crate::store::types::{DocumentMeta, DocumentSummary, EntitySummary};
use crate::store::DocumentAccess;

/// In-memory [`DocumentAccess`] implementation. Seed helpers assign
/// strictly increasing publication times, so insertion order doubles as
/// recency order.
#[derive(Default)]
pub struct MemoryCorpus {
    docs: Mutex<HashMap<String, (DocumentMeta, String)>>,
    summaries: Mutex<HashMap<String, DocumentSummary>>,
    entity_summaries: Mutex<HashMap<String, EntitySummary>>,
    seed_counter: AtomicI64,
}

impl MemoryCorpus {
    pub fn seed_document(&self, document_id: &str, entity_id: &str, period: &str, text: &str) {
        let offset = self.seed_counter.fetch_add(1, Ordering::SeqCst);
        let published_at = Utc.with_ymd_and_hms(2018, 1, 1, 0, 0, 0).unwrap()
            + Duration::days(offset);
        let meta = DocumentMeta {
            document_id: document_id.to_string(),
            entity_id: entity_id.to_string(),
            published_at,
            period_label: period.to_string(),
            size: text.chars().count(),
        };
        self.docs
            .lock()
            .unwrap()
            .insert(document_id.to_string(), (meta, text.to_string()));
    }

    pub fn seed_summary(&self, document_id: &str, entity_id: &str, text: &str) {
        let offset = self.seed_counter.fetch_add(1, Ordering::SeqCst);
        let summary = DocumentSummary {
            document_id: document_id.to_string(),
            entity_id: entity_id.to_string(),
            summary_text: text.to_string(),
            generated_at: Utc.with_ymd_and_hms(2018, 6, 1, 0, 0, 0).unwrap()
                + Duration::days(offset),
        };
        self.summaries
            .lock()
            .unwrap()
            .insert(document_id.to_string(), summary);
    }

    pub fn seed_entity_summary(&self, entity_id: &str, narrative: &str, sources: &[&str]) {
        let summary = EntitySummary {
            entity_id: entity_id.to_string(),
            narrative_text: narrative.to_string(),
            source_document_ids: sources.iter().map(|s| s.to_string()).collect(),
            generated_at: Utc.with_ymd_and_hms(2018, 6, 1, 0, 0, 0).unwrap(),
        };
        self.entity_summaries
            .lock()
            .unwrap()
            .insert(entity_id.to_string(), summary);
    }
}

#[async_trait]
impl DocumentAccess for MemoryCorpus {
    async fn document(&self, document_id: &str) -> Result<Option<DocumentMeta>> {
        Ok(self
            .docs
            .lock()
            .unwrap()
            .get(document_id)
            .map(|(meta, _)| meta.clone()))
    }

    async fn document_text(&self, document_id: &str) -> Result<Option<String>> {
        Ok(self
            .docs
            .lock()
            .unwrap()
            .get(document_id)
            .map(|(_, text)| text.clone()))
    }

    async fn documents_for_entity(&self, entity_id: &str) -> Result<Vec<DocumentMeta>> {
        let mut results: Vec<DocumentMeta> = self
            .docs
            .lock()
            .unwrap()
            .values()
            .filter(|(meta, _)| meta.entity_id == entity_id)
            .map(|(meta, _)| meta.clone())
            .collect();
        results.sort_by(|a, b| b.published_at.cmp(&a.published_at));
        Ok(results)
    }

    async fn distinct_entity_ids(&self) -> Result<Vec<String>> {
        let mut ids: Vec<String> = self
            .docs
            .lock()
            .unwrap()
            .values()
            .map(|(meta, _)| meta.entity_id.clone())
            .collect();
        ids.sort();
        ids.dedup();
        Ok(ids)
    }

    async fn summary_for_document(&self, document_id: &str) -> Result<Option<DocumentSummary>> {
        Ok(self.summaries.lock().unwrap().get(document_id).cloned())
    }

    async fn entity_summary(&self, entity_id: &str) -> Result<Option<EntitySummary>> {
        Ok(self.entity_summaries.lock().unwrap().get(entity_id).cloned())
    }

    async fn summaries_for_entity(&self, entity_id: &str) -> Result<Vec<DocumentSummary>> {
        let published: HashMap<String, chrono::DateTime<chrono::Utc>> = self
            .docs
            .lock()
            .unwrap()
            .values()
            .map(|(meta, _)| (meta.document_id.clone(), meta.published_at))
            .collect();
        let mut results: Vec<DocumentSummary> = self
            .summaries
            .lock()
            .unwrap()
            .values()
            .filter(|s| s.entity_id == entity_id)
            .cloned()
            .collect();
        results.sort_by(|a, b| {
            match (published.get(&a.document_id), published.get(&b.document_id)) {
                (Some(pa), Some(pb)) => pb.cmp(pa),
                (Some(_), None) => std::cmp::Ordering::Less,
                (None, Some(_)) => std::cmp::Ordering::Greater,
                (None, None) => b.generated_at.cmp(&a.generated_at),
            }
        });
        Ok(results)
    }
}

/// A [`LanguageModel`] that replays a scripted sequence of responses.
pub struct ScriptedLlm {
    responses: Mutex<VecDeque<Result<String, String>>>,
    repeat_last: bool,
    calls: AtomicUsize,
    last_system: Mutex<Option<String>>,
}

impl ScriptedLlm {
    pub fn new(responses: Vec<String>) -> Self {
        Self::with_results(responses.into_iter().map(Ok).collect())
    }

    /// Script both successes and transport failures (`Err` becomes a
    /// connection error).
    pub fn with_results(responses: Vec<Result<String, String>>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().collect()),
            repeat_last: false,
            calls: AtomicUsize::new(0),
            last_system: Mutex::new(None),
        }
    }

    /// A response repeated indefinitely (the queue never drains).
    pub fn repeating(response: &str) -> Self {
        Self {
            responses: Mutex::new(VecDeque::from([Ok(response.to_string())])),
            repeat_last: true,
            calls: AtomicUsize::new(0),
            last_system: Mutex::new(None),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_system(&self) -> Option<String> {
        self.last_system.lock().unwrap().clone()
    }
}

#[async_trait]
impl LanguageModel for ScriptedLlm {
    async fn complete(
        &self,
        _messages: &[Message],
        system: Option<&str>,
    ) -> Result<String, LlmError> {
        *self.last_system.lock().unwrap() = system.map(|s| s.to_string());
        self.calls.fetch_add(1, Ordering::SeqCst);

        let mut responses = self.responses.lock().unwrap();
        if self.repeat_last {
            let front = responses
                .front()
                .cloned()
                .expect("repeating stub has one response");
            return front.map_err(LlmError::Connection);
        }
        match responses.pop_front() {
            Some(Ok(text)) => Ok(text),
            Some(Err(msg)) => Err(LlmError::Connection(msg)),
            None => Err(LlmError::Connection("scripted responses exhausted".to_string())),
        }
    }
}
