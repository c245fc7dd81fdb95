pub mod chunk;
pub mod escalation;
pub mod tier_one;
pub mod tier_two;

use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use crate::config::PolicyConfig;
use crate::llm::LanguageModel;
use crate::resolver::AliasTable;
use crate::store::types::DocId;
use crate::store::DocumentAccess;
use escalation::EscalationPolicy;
use tier_one::{EntityRef, TierOneAnalyzer};
use tier_two::{TierTwoAnalyzer, TierTwoResult};

/// Result of the composed tiered analysis.
#[derive(Debug, Clone)]
pub struct AnalysisOutcome {
    pub answer: String,
    pub documents_used: Vec<DocId>,
    /// Whether Tier Two actually ran for this query.
    pub escalated: bool,
}

/// The tiered retrieval-and-analysis engine: summaries first, full text only
/// when the escalation gate says the summaries were not enough.
pub struct AnalysisEngine {
    store: Arc<dyn DocumentAccess>,
    table: Arc<AliasTable>,
    tier_one: TierOneAnalyzer,
    tier_two: TierTwoAnalyzer,
    policy: EscalationPolicy,
}

impl AnalysisEngine {
    pub fn new(
        store: Arc<dyn DocumentAccess>,
        llm: Arc<dyn LanguageModel>,
        table: Arc<AliasTable>,
        config: &PolicyConfig,
    ) -> Self {
        Self {
            tier_one: TierOneAnalyzer::new(store.clone(), llm.clone(), config.tier_one_max_docs),
            tier_two: TierTwoAnalyzer::new(store.clone(), llm, config.chunk_size),
            policy: EscalationPolicy::new(config),
            store,
            table,
        }
    }

    /// Answer a query over one or more entities. Entity ids may arrive in
    /// either identifier scheme; they are canonicalized before retrieval.
    pub async fn answer(
        &self,
        query: &str,
        entity_ids: &[String],
        conversation_id: &str,
    ) -> Result<AnalysisOutcome> {
        if entity_ids.is_empty() {
            return Ok(AnalysisOutcome {
                answer: "No entities were specified, so there is nothing to analyze. \
                         Name at least one company (e.g. a ticker symbol)."
                    .to_string(),
                documents_used: vec![],
                escalated: false,
            });
        }

        let entities = self.resolve_entities(entity_ids);
        let tier_one = self.tier_one.analyze(query, &entities).await?;
        let decision = self.policy.decide(query, &tier_one);

        info!(
            entities = ?entities.iter().map(|e| e.canonical.as_str()).collect::<Vec<_>>(),
            insufficient = tier_one.insufficient_data,
            escalate = decision.escalate,
            reason = ?decision.reason,
            "tiered analysis decision"
        );

        if !decision.escalate {
            return Ok(AnalysisOutcome {
                answer: tier_one.answer,
                documents_used: tier_one.documents_used,
                escalated: false,
            });
        }

        // Escalation target: the first document Tier One actually used, else
        // the most recent document on file for any requested entity.
        let target = match tier_one.documents_used.first().cloned() {
            Some(id) => Some(id),
            None => self.most_recent_document(&entities).await?,
        };

        let Some(document_id) = target else {
            // Data insufficiency is a value, not an error.
            return Ok(AnalysisOutcome {
                answer: format!(
                    "No documents are on file for: {}. Nothing to analyze at either tier.",
                    entities
                        .iter()
                        .map(|e| e.canonical.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                ),
                documents_used: vec![],
                escalated: false,
            });
        };

        let tier_two = self
            .tier_two
            .analyze(query, &document_id, conversation_id, None)
            .await?;

        let mut documents_used = tier_one.documents_used.clone();
        if !documents_used.contains(&tier_two.document_id) {
            documents_used.push(tier_two.document_id.clone());
        }

        Ok(AnalysisOutcome {
            answer: compose_answer(&tier_one.answer, tier_one.insufficient_data, &tier_two),
            documents_used,
            escalated: true,
        })
    }

    /// Direct Tier-Two entry, for callers that already know the document and
    /// are driving pagination explicitly.
    pub async fn analyze_document(
        &self,
        query: &str,
        document_id: &str,
        conversation_id: &str,
        chunk_index: Option<usize>,
    ) -> Result<TierTwoResult> {
        self.tier_two
            .analyze(query, document_id, conversation_id, chunk_index)
            .await
    }

    pub fn resolve(&self, raw_id: &str) -> String {
        self.table.normalize(raw_id)
    }

    pub async fn end_conversation(&self, conversation_id: &str) {
        self.tier_two.end_conversation(conversation_id).await;
    }

    fn resolve_entities(&self, entity_ids: &[String]) -> Vec<EntityRef> {
        let mut entities: Vec<EntityRef> = Vec::new();
        for raw in entity_ids {
            let canonical = self.table.normalize(raw);
            if entities.iter().any(|e| e.canonical == canonical) {
                continue;
            }
            let mut aliases = self.table.aliases_of(&canonical);
            // A raw id that normalization could not map is still worth
            // querying under its stored form.
            if *raw != canonical && !aliases.contains(raw) {
                aliases.push(raw.clone());
            }
            entities.push(EntityRef { canonical, aliases });
        }
        entities
    }

    async fn most_recent_document(&self, entities: &[EntityRef]) -> Result<Option<DocId>> {
        let mut best: Option<(chrono::DateTime<chrono::Utc>, DocId)> = None;
        for entity in entities {
            for id in entity.lookup_ids() {
                for meta in self.store.documents_for_entity(id).await? {
                    if best
                        .as_ref()
                        .map(|(at, _)| meta.published_at > *at)
                        .unwrap_or(true)
                    {
                        best = Some((meta.published_at, meta.document_id));
                    }
                }
            }
        }
        Ok(best.map(|(_, id)| id))
    }
}

fn compose_answer(tier_one_answer: &str, insufficient: bool, tier_two: &TierTwoResult) -> String {
    let pagination = if tier_two.has_more_chunks {
        format!(
            "\n\n[Read part {} of {} of document {}; more of the full text remains.]",
            tier_two.current_chunk + 1,
            tier_two.total_chunks,
            tier_two.document_id
        )
    } else {
        String::new()
    };

    if insufficient {
        format!("{}{}", tier_two.answer, pagination)
    } else {
        format!(
            "{}\n\nFrom the full text of document {}:\n{}{}",
            tier_one_answer, tier_two.document_id, tier_two.answer, pagination
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{MemoryCorpus, ScriptedLlm};

    fn table_with_alias() -> Arc<AliasTable> {
        use crate::store::types::{DocumentMeta, DocumentSummary};
        use chrono::{TimeZone, Utc};
        let docs = vec![DocumentMeta {
            document_id: "seed".to_string(),
            entity_id: "uuid-aapl".to_string(),
            published_at: Utc.with_ymd_and_hms(2018, 1, 1, 0, 0, 0).unwrap(),
            period_label: "Q1 2018".to_string(),
            size: 0,
        }];
        let sums = vec![DocumentSummary {
            document_id: "seed".to_string(),
            entity_id: "AAPL".to_string(),
            summary_text: String::new(),
            generated_at: Utc.with_ymd_and_hms(2018, 1, 2, 0, 0, 0).unwrap(),
        }];
        Arc::new(AliasTable::build(&docs, &sums))
    }

    fn seeded_store() -> Arc<MemoryCorpus> {
        let store = Arc::new(MemoryCorpus::default());
        for (doc, entity, period) in [
            ("a1", "AAPL", "Q1 2018"),
            ("m1", "AMZN", "Q1 2018"),
        ] {
            store.seed_document(doc, entity, period, &"transcript text ".repeat(100));
            store.seed_summary(doc, entity, "Computing growth was strong year over year.");
        }
        store
    }

    #[tokio::test]
    async fn test_summary_answer_without_escalation() {
        let store = seeded_store();
        let llm = Arc::new(ScriptedLlm::new(vec![
            "Both companies grew computing revenue substantially in 2018, \
             with cloud and services carrying most of the expansion across \
             the periods covered by the available summaries."
                .to_string(),
        ]));
        let engine = AnalysisEngine::new(
            store,
            llm.clone(),
            Arc::new(AliasTable::default()),
            &PolicyConfig::default(),
        );

        let outcome = engine
            .answer(
                "AMZN vs AAPL 2018 computing growth",
                &["AMZN".to_string(), "AAPL".to_string()],
                "c1",
            )
            .await
            .unwrap();
        assert!(!outcome.escalated);
        assert_eq!(outcome.documents_used.len(), 2);
        assert_eq!(llm.calls(), 1);
    }

    #[tokio::test]
    async fn test_trigger_phrase_escalates_to_full_text() {
        let store = seeded_store();
        let llm = Arc::new(ScriptedLlm::new(vec![
            "Both companies grew computing revenue substantially in 2018, \
             with cloud and services carrying most of the expansion across \
             the periods covered by the available summaries."
                .to_string(),
            "The transcript states growth of 27% in services.".to_string(),
        ]));
        let engine = AnalysisEngine::new(
            store,
            llm.clone(),
            Arc::new(AliasTable::default()),
            &PolicyConfig::default(),
        );

        let outcome = engine
            .answer(
                "AMZN vs AAPL 2018 computing growth, detailed",
                &["AMZN".to_string(), "AAPL".to_string()],
                "c1",
            )
            .await
            .unwrap();
        assert!(outcome.escalated);
        assert_eq!(llm.calls(), 2);
        assert!(outcome.answer.contains("From the full text"));
    }

    #[tokio::test]
    async fn test_insufficient_data_escalates_straight_to_document() {
        let store = Arc::new(MemoryCorpus::default());
        // A document with no summary at all.
        store.seed_document("a1", "AAPL", "Q1 2018", "full transcript body");
        let llm = Arc::new(ScriptedLlm::new(vec![
            "The transcript discusses revenue growth.".to_string(),
        ]));
        let engine = AnalysisEngine::new(
            store,
            llm,
            Arc::new(AliasTable::default()),
            &PolicyConfig::default(),
        );

        let outcome = engine
            .answer("growth?", &["AAPL".to_string()], "c1")
            .await
            .unwrap();
        assert!(outcome.escalated);
        assert_eq!(outcome.documents_used, vec!["a1".to_string()]);
    }

    #[tokio::test]
    async fn test_no_data_anywhere_is_a_plain_outcome() {
        let store = Arc::new(MemoryCorpus::default());
        let llm = Arc::new(ScriptedLlm::new(vec![]));
        let engine = AnalysisEngine::new(
            store,
            llm.clone(),
            Arc::new(AliasTable::default()),
            &PolicyConfig::default(),
        );

        let outcome = engine
            .answer("growth?", &["AAPL".to_string()], "c1")
            .await
            .unwrap();
        assert!(!outcome.escalated);
        assert!(outcome.answer.contains("No documents are on file"));
        assert_eq!(llm.calls(), 0);
    }

    #[tokio::test]
    async fn test_opaque_entity_id_is_canonicalized() {
        let store = seeded_store();
        let llm = Arc::new(ScriptedLlm::new(vec![
            "Apple's computing growth was strong across the year, led by \
             services and wearables, according to the summarized earnings \
             commentary available for the requested periods."
                .to_string(),
        ]));
        let engine =
            AnalysisEngine::new(store, llm, table_with_alias(), &PolicyConfig::default());

        let outcome = engine
            .answer("growth?", &["uuid-aapl".to_string()], "c1")
            .await
            .unwrap();
        assert!(!outcome.escalated);
        assert_eq!(outcome.documents_used, vec!["a1".to_string()]);
    }
}
