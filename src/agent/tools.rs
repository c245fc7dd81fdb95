use std::sync::Arc;

use tracing::{debug, warn};

use crate::analysis::AnalysisEngine;
use crate::llm::{LanguageModel, Message};

const CONVERSE_SYSTEM: &str = "You are a helpful financial assistant. Answer from general \
knowledge; no document lookups were deemed necessary for this message.";

/// Parsed arguments of the analyze tool.
/// Accepted forms: `<query>`, `<query>, entities: A B`,
/// `<query>, document: <id>`, `<query>, document: <id>, chunk: N`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalyzeArgs {
    pub query: String,
    pub entities: Vec<String>,
    pub document: Option<String>,
    pub chunk: Option<usize>,
}

#[derive(Debug, thiserror::Error)]
pub enum ArgError {
    #[error("chunk must be a non-negative number, got '{0}'")]
    BadChunk(String),
}

pub fn parse_analyze_args(args: &str) -> Result<AnalyzeArgs, ArgError> {
    let mut query_parts: Vec<&str> = Vec::new();
    let mut entities = Vec::new();
    let mut document = None;
    let mut chunk = None;

    for segment in args.split(',') {
        let segment = segment.trim();
        if let Some(rest) = segment.strip_prefix("entities:") {
            entities.extend(rest.split_whitespace().map(|e| e.to_string()));
        } else if let Some(rest) = segment.strip_prefix("entity:") {
            entities.extend(rest.split_whitespace().map(|e| e.to_string()));
        } else if let Some(rest) = segment.strip_prefix("document:") {
            document = Some(rest.trim().to_string());
        } else if let Some(rest) = segment.strip_prefix("chunk:") {
            let rest = rest.trim();
            chunk = Some(
                rest.parse::<usize>()
                    .map_err(|_| ArgError::BadChunk(rest.to_string()))?,
            );
        } else if !segment.is_empty() {
            query_parts.push(segment);
        }
    }

    Ok(AnalyzeArgs {
        query: query_parts.join(", "),
        entities,
        document,
        chunk,
    })
}

/// The closed set of tools the reasoning loop may invoke. Dispatch never
/// panics and never raises: every failure comes back as an observation
/// string the model can read and correct on its next turn.
pub struct ToolRegistry {
    engine: Arc<AnalysisEngine>,
    llm: Arc<dyn LanguageModel>,
}

impl ToolRegistry {
    pub fn new(engine: Arc<AnalysisEngine>, llm: Arc<dyn LanguageModel>) -> Self {
        Self { engine, llm }
    }

    pub fn tool_names(&self) -> &'static [&'static str] {
        &["resolve_entity", "analyze", "converse"]
    }

    pub async fn dispatch(&self, name: &str, args: &str, conversation_id: &str) -> String {
        debug!(tool = name, args, "dispatching tool");
        match name {
            "resolve_entity" => self.resolve_entity(args),
            "analyze" => match self.analyze(args, conversation_id).await {
                Ok(obs) => obs,
                Err(e) => {
                    warn!(tool = name, error = %e, "tool failed");
                    format!("Tool 'analyze' failed: {:#}", e)
                }
            },
            "converse" => match self.converse(args).await {
                Ok(obs) => obs,
                Err(e) => {
                    warn!(tool = name, error = %e, "tool failed");
                    format!("Tool 'converse' failed: {:#}", e)
                }
            },
            unknown => format!(
                "Unknown tool '{}'. Available tools: {}.",
                unknown,
                self.tool_names().join(", ")
            ),
        }
    }

    fn resolve_entity(&self, args: &str) -> String {
        let raw = args.trim().trim_matches(|c| c == '"' || c == '\'');
        if raw.is_empty() {
            return "resolve_entity requires an identifier, e.g. resolve_entity(AAPL)."
                .to_string();
        }
        let canonical = self.engine.resolve(raw);
        if canonical == raw {
            format!("'{}' is already canonical (or has no known mapping).", raw)
        } else {
            format!("'{}' resolves to '{}'.", raw, canonical)
        }
    }

    async fn analyze(&self, args: &str, conversation_id: &str) -> anyhow::Result<String> {
        let parsed = match parse_analyze_args(args) {
            Ok(parsed) => parsed,
            Err(e) => return Ok(format!("Could not parse analyze arguments: {}.", e)),
        };
        if parsed.query.is_empty() {
            return Ok(
                "analyze requires a query, e.g. analyze(revenue growth?, entities: AAPL)."
                    .to_string(),
            );
        }

        if let Some(document_id) = &parsed.document {
            // Direct document mode: the model drives pagination explicitly.
            let result = self
                .engine
                .analyze_document(&parsed.query, document_id, conversation_id, parsed.chunk)
                .await?;
            let continuation = match result.next_chunk {
                Some(next) => format!(
                    "chunk {} of {}; request chunk: {} for more",
                    result.current_chunk + 1,
                    result.total_chunks,
                    next
                ),
                None => format!(
                    "chunk {} of {}; document fully read",
                    result.current_chunk + 1,
                    result.total_chunks
                ),
            };
            return Ok(format!(
                "{}\n\n[document {}: {}]",
                result.answer, result.document_id, continuation
            ));
        }

        let outcome = self
            .engine
            .answer(&parsed.query, &parsed.entities, conversation_id)
            .await?;
        let provenance = if outcome.documents_used.is_empty() {
            "no documents used".to_string()
        } else {
            format!("documents used: {}", outcome.documents_used.join(", "))
        };
        Ok(format!(
            "{}\n\n[{}; escalated to full text: {}]",
            outcome.answer, provenance, outcome.escalated
        ))
    }

    async fn converse(&self, args: &str) -> anyhow::Result<String> {
        let message = args.trim();
        let reply = self
            .llm
            .complete(&[Message::user(message)], Some(CONVERSE_SYSTEM))
            .await?;
        Ok(reply)
    }
}
