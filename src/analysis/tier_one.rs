use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, info};

use crate::llm::{LanguageModel, Message};
use crate::store::types::DocId;
use crate::store::DocumentAccess;

/// An entity to analyze: the canonical (display) id plus the opaque aliases
/// it may still be filed under in un-repaired collections.
#[derive(Debug, Clone)]
pub struct EntityRef {
    pub canonical: String,
    pub aliases: Vec<String>,
}

impl EntityRef {
    /// Lookup order: canonical first, then aliases.
    pub fn lookup_ids(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.canonical.as_str()).chain(self.aliases.iter().map(|a| a.as_str()))
    }
}

#[derive(Debug, Clone)]
pub struct TierOneResult {
    pub answer: String,
    /// Exactly the documents whose summaries informed the answer.
    pub documents_used: Vec<DocId>,
    /// Entities for which no summary of any kind was found.
    pub entities_missing: Vec<String>,
    /// How many summary blocks actually went into the prompt (may be fewer
    /// than the cap — the result is never silently partial).
    pub summaries_used: usize,
    pub insufficient_data: bool,
}

/// Answers a query from pre-computed summaries only — the cheap path.
pub struct TierOneAnalyzer {
    store: Arc<dyn DocumentAccess>,
    llm: Arc<dyn LanguageModel>,
    max_docs: usize,
}

impl TierOneAnalyzer {
    pub fn new(store: Arc<dyn DocumentAccess>, llm: Arc<dyn LanguageModel>, max_docs: usize) -> Self {
        Self { store, llm, max_docs }
    }

    pub async fn analyze(&self, query: &str, entities: &[EntityRef]) -> Result<TierOneResult> {
        let mut blocks: Vec<String> = Vec::new();
        let mut documents_used: Vec<DocId> = Vec::new();
        let mut entities_missing: Vec<String> = Vec::new();

        for entity in entities {
            let used_before = documents_used.len();

            // Prefer the synthesized entity narrative when one exists.
            let mut entity_summary = None;
            for id in entity.lookup_ids() {
                if let Some(found) = self.store.entity_summary(id).await? {
                    entity_summary = Some(found);
                    break;
                }
            }

            if let Some(es) = entity_summary {
                blocks.push(format!(
                    "ENTITY NARRATIVE: {} (synthesized from {} documents)\n{}",
                    entity.canonical,
                    es.source_document_ids.len(),
                    es.narrative_text
                ));
                documents_used.extend(es.source_document_ids.iter().cloned());
            } else {
                // Fall back to the most recent per-document summaries.
                let mut taken = 0usize;
                'ids: for id in entity.lookup_ids() {
                    for summary in self.store.summaries_for_entity(id).await? {
                        if taken >= self.max_docs {
                            break 'ids;
                        }
                        if documents_used.contains(&summary.document_id) {
                            continue;
                        }
                        let period = match self.store.document(&summary.document_id).await? {
                            Some(meta) => meta.period_label,
                            None => "period unknown".to_string(),
                        };
                        blocks.push(format!(
                            "SUMMARY: {} {} (document {})\n{}",
                            entity.canonical, period, summary.document_id, summary.summary_text
                        ));
                        documents_used.push(summary.document_id.clone());
                        taken += 1;
                    }
                }
            }

            if documents_used.len() == used_before {
                entities_missing.push(entity.canonical.clone());
            }
        }

        if blocks.is_empty() {
            info!(
                entities = ?entities_missing,
                "tier one: no summary data, declining to answer"
            );
            return Ok(TierOneResult {
                answer: format!(
                    "No summaries are available for: {}.",
                    entities_missing.join(", ")
                ),
                documents_used: vec![],
                entities_missing,
                summaries_used: 0,
                insufficient_data: true,
            });
        }

        let prompt = build_prompt(query, &blocks);
        debug!(
            blocks = blocks.len(),
            prompt_len = prompt.len(),
            "tier one prompt built"
        );

        let answer = self.llm.complete(&[Message::user(prompt)], None).await?;

        Ok(TierOneResult {
            answer,
            summaries_used: blocks.len(),
            documents_used,
            entities_missing,
            insufficient_data: false,
        })
    }
}

fn build_prompt(query: &str, blocks: &[String]) -> String {
    let mut prompt = format!(
        "Analyze the following earnings-call summaries to answer the user's query.\n\
         Base your answer ONLY on the information in these summaries.\n\
         If more detailed information would be needed from the full documents, state this clearly.\n\n\
         QUERY: {}\n",
        query
    );
    for (i, block) in blocks.iter().enumerate() {
        prompt.push_str(&format!("\n--- CONTEXT {} ---\n{}\n", i + 1, block));
    }
    prompt.push_str("\nAnswer:");
    prompt
}
