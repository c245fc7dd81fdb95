use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::chunk::{self, ChunkCursor};
use crate::llm::{LanguageModel, Message};
use crate::store::types::DocId;
use crate::store::DocumentAccess;

#[derive(Debug, thiserror::Error)]
pub enum TierTwoError {
    #[error("document not found: {0}")]
    UnknownDocument(String),
    #[error("invalid chunk index {index}: document has {total} chunks")]
    InvalidChunkIndex { index: usize, total: usize },
}

#[derive(Debug, Clone)]
pub struct TierTwoResult {
    pub answer: String,
    pub document_id: DocId,
    pub current_chunk: usize,
    pub total_chunks: usize,
    pub has_more_chunks: bool,
    /// `None` once the document is exhausted.
    pub next_chunk: Option<usize>,
}

/// Answers a query from exactly one chunk of one document's full text — the
/// expensive path. Prompt size is bounded by the chunk size regardless of
/// document length; continuing to the next chunk is always the caller's
/// explicit decision.
pub struct TierTwoAnalyzer {
    store: Arc<dyn DocumentAccess>,
    llm: Arc<dyn LanguageModel>,
    chunk_size: usize,
    /// (document_id, conversation_id) → position. Supplies the default index
    /// when a caller omits one; dropped once a document is read to the end
    /// or the conversation is closed.
    cursors: RwLock<HashMap<(String, String), ChunkCursor>>,
}

impl TierTwoAnalyzer {
    pub fn new(store: Arc<dyn DocumentAccess>, llm: Arc<dyn LanguageModel>, chunk_size: usize) -> Self {
        Self {
            store,
            llm,
            chunk_size,
            cursors: RwLock::new(HashMap::new()),
        }
    }

    pub async fn analyze(
        &self,
        query: &str,
        document_id: &str,
        conversation_id: &str,
        chunk_index: Option<usize>,
    ) -> Result<TierTwoResult> {
        let meta = self.store.document(document_id).await?;
        let text = self
            .store
            .document_text(document_id)
            .await?
            .ok_or_else(|| TierTwoError::UnknownDocument(document_id.to_string()))?;

        let total = chunk::chunk_count(&text, self.chunk_size);

        // Explicit index wins; otherwise resume where this conversation last
        // was in the document, else start at the front.
        let index = match chunk_index {
            Some(i) => i,
            None => {
                let cursors = self.cursors.read().await;
                cursors
                    .get(&(document_id.to_string(), conversation_id.to_string()))
                    .map(|c| c.index)
                    .unwrap_or(0)
            }
        };

        // Fail fast rather than clamp — a bad index is a continuation bug
        // the caller must see.
        let content = chunk::get_chunk(&text, self.chunk_size, index).map_err(|_| {
            TierTwoError::InvalidChunkIndex { index, total }
        })?;

        let document_label = meta
            .map(|m| format!("{} {}", m.entity_id, m.period_label))
            .unwrap_or_else(|| format!("document {}", document_id));
        let chunk_note = if total > 1 {
            format!(" (part {} of {})", index + 1, total)
        } else {
            String::new()
        };

        let prompt = format!(
            "Analyze this transcript excerpt{} to answer the user's query.\n\
             Base your answer ONLY on the information in this excerpt.\n\n\
             QUERY: {}\n\n\
             DOCUMENT: {}\n\n\
             CONTENT:\n{}\n\nAnswer:",
            chunk_note, query, document_label, content
        );

        debug!(
            document_id,
            index,
            total,
            chunk_chars = content.chars().count(),
            "tier two prompt built"
        );
        let answer = self.llm.complete(&[Message::user(prompt)], None).await?;

        let cursor = ChunkCursor::new(document_id, conversation_id, index, total);
        let next_chunk = cursor.next_index();
        {
            let mut cursors = self.cursors.write().await;
            let key = (document_id.to_string(), conversation_id.to_string());
            if cursor.exhausted() {
                cursors.remove(&key);
            } else {
                cursors.insert(key, cursor);
            }
        }

        info!(
            document_id,
            current_chunk = index,
            total_chunks = total,
            has_more = next_chunk.is_some(),
            "tier two analysis complete"
        );

        Ok(TierTwoResult {
            answer,
            document_id: document_id.to_string(),
            current_chunk: index,
            total_chunks: total,
            has_more_chunks: next_chunk.is_some(),
            next_chunk,
        })
    }

    /// Drop all pagination state for a finished conversation.
    pub async fn end_conversation(&self, conversation_id: &str) {
        let mut cursors = self.cursors.write().await;
        cursors.retain(|(_, conv), _| conv != conversation_id);
    }
}
