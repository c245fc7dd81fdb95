mod agent;
mod analysis;
mod config;
mod llm;
mod resolver;
mod store;
#[cfg(test)]
mod testutil;

use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{info, Level};

use agent::tools::ToolRegistry;
use agent::{ReasoningLoop, TraceOutcome};
use analysis::AnalysisEngine;
use config::PolicyConfig;
use llm::HttpLlm;
use resolver::{EntityResolver, RepairDirection};
use store::types::TraceRecord;
use store::CorpusStore;

#[derive(Parser)]
#[command(name = "callsight", about = "Question answering over earnings-call transcripts and filings")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Answer a question over the corpus.
    Ask {
        /// The question to answer.
        query: String,
        /// Conversation id, for chunk continuation across invocations.
        #[arg(long)]
        conversation: Option<String>,
        /// Print the full reasoning trace after the answer.
        #[arg(long)]
        trace: bool,
    },
    /// Canonicalize a single entity identifier.
    Resolve {
        /// Ticker symbol or opaque document key.
        raw_id: String,
    },
    /// Consistency and coverage report for the two collections.
    Report,
    /// Load documents/summaries handed over by the ingestion pipeline
    /// (JSON arrays) into the corpus store.
    Seed {
        /// JSON file of documents: [{document_id, entity_id, published_at,
        /// period_label, full_text}, ...].
        #[arg(long)]
        documents: Option<std::path::PathBuf>,
        /// JSON file of document summaries.
        #[arg(long)]
        summaries: Option<std::path::PathBuf>,
        /// JSON file of entity summaries.
        #[arg(long)]
        entity_summaries: Option<std::path::PathBuf>,
    },
    /// Rewrite entity ids in one collection to match the other's scheme.
    Repair {
        #[arg(value_enum)]
        direction: RepairArg,
    },
    /// Show recently archived reasoning runs.
    Traces {
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum RepairArg {
    /// Rewrite documents to ticker symbols.
    ToTickers,
    /// Rewrite summaries to opaque ids.
    ToUuids,
}

impl From<RepairArg> for RepairDirection {
    fn from(arg: RepairArg) -> Self {
        match arg {
            RepairArg::ToTickers => RepairDirection::ToTicker,
            RepairArg::ToUuids => RepairDirection::ToUuid,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .with_writer(std::io::stderr)
        .init();
    let _ = dotenv::dotenv();

    let cli = Cli::parse();
    let policy = PolicyConfig::from_env();

    let data_dir = config::data_dir();
    let store = Arc::new(CorpusStore::open(&data_dir).await?);
    info!(data_dir = %data_dir.display(), "corpus store opened");

    let resolver = EntityResolver::load(store.clone()).await?;

    match cli.command {
        Command::Ask { query, conversation, trace } => {
            ask(store, resolver, &policy, &query, conversation, trace).await?;
        }
        Command::Resolve { raw_id } => {
            println!("{}", resolver.resolve(&raw_id));
        }
        Command::Report => report(&resolver).await?,
        Command::Seed { documents, summaries, entity_summaries } => {
            seed(&store, documents, summaries, entity_summaries).await?;
        }
        Command::Repair { direction } => repair(&resolver, direction.into()).await?,
        Command::Traces { limit } => {
            for record in store.recent_traces(limit).await? {
                println!(
                    "[{}] ({} steps, {}) {}",
                    record.conversation_id, record.steps, record.outcome, record.question
                );
            }
        }
    }

    Ok(())
}

async fn ask(
    store: Arc<CorpusStore>,
    resolver: EntityResolver,
    policy: &PolicyConfig,
    query: &str,
    conversation: Option<String>,
    show_trace: bool,
) -> Result<()> {
    let llm = Arc::new(HttpLlm::from_env()?);
    let table = Arc::new(resolver.table().clone());
    let engine = Arc::new(AnalysisEngine::new(store.clone(), llm.clone(), table, policy));
    let registry = Arc::new(ToolRegistry::new(engine.clone(), llm.clone()));
    let looper = ReasoningLoop::new(llm, registry, policy);

    let conversation_id =
        conversation.unwrap_or_else(|| format!("cli-{}", chrono::Utc::now().timestamp()));

    let outcome = looper.run(query, &[], &conversation_id).await;

    println!("{}", outcome.answer);

    if show_trace {
        eprintln!("\n--- reasoning trace ---");
        for (i, step) in outcome.trace.steps.iter().enumerate() {
            if let Some(thought) = &step.thought {
                eprintln!("{}. Thought: {}", i + 1, thought);
            }
            eprintln!("{}. Action: {}", i + 1, step.action);
            if !step.observation.is_empty() {
                eprintln!("   Observation: {}", step.observation);
            }
        }
    }

    let outcome_label = match &outcome.trace.outcome {
        TraceOutcome::Answered(_) => "answered".to_string(),
        TraceOutcome::Failed(reason) => reason.clone(),
    };
    let record = TraceRecord {
        conversation_id: conversation_id.clone(),
        question: query.to_string(),
        answer: outcome.answer.clone(),
        outcome: outcome_label,
        steps: outcome.trace.steps.len() as u32,
        documents_consulted: documents_consulted(&outcome.trace),
        recorded_at: chrono::Utc::now().timestamp(),
    };
    store.record_trace(&record).await?;

    engine.end_conversation(&conversation_id).await;
    Ok(())
}

/// Pull document provenance out of the trace observations for the archived
/// record.
fn documents_consulted(trace: &agent::ReasoningTrace) -> Vec<String> {
    let mut ids = Vec::new();
    for step in &trace.steps {
        if let Some(idx) = step.observation.find("documents used: ") {
            let rest = &step.observation[idx + "documents used: ".len()..];
            let list = rest.split(';').next().unwrap_or("").trim_end_matches(']');
            for id in list.split(',') {
                let id = id.trim().to_string();
                if !id.is_empty() && !ids.contains(&id) {
                    ids.push(id);
                }
            }
        }
        if let Some(idx) = step.observation.find("[document ") {
            let rest = &step.observation[idx + "[document ".len()..];
            if let Some(id) = rest.split(':').next() {
                let id = id.trim().to_string();
                if !id.is_empty() && !ids.contains(&id) {
                    ids.push(id);
                }
            }
        }
    }
    ids
}

/// A document as handed over by the ingestion pipeline.
#[derive(serde::Deserialize)]
struct SeedDocument {
    document_id: String,
    entity_id: String,
    published_at: chrono::DateTime<chrono::Utc>,
    period_label: String,
    full_text: String,
}

async fn seed(
    store: &CorpusStore,
    documents: Option<std::path::PathBuf>,
    summaries: Option<std::path::PathBuf>,
    entity_summaries: Option<std::path::PathBuf>,
) -> Result<()> {
    use anyhow::Context;

    if let Some(path) = documents {
        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("reading {}", path.display()))?;
        let records: Vec<SeedDocument> = serde_json::from_str(&raw)?;
        let count = records.len();
        for record in records {
            let meta = store::types::DocumentMeta {
                document_id: record.document_id,
                entity_id: record.entity_id,
                published_at: record.published_at,
                period_label: record.period_label,
                size: 0, // recomputed on write
            };
            store.put_document(&meta, &record.full_text).await?;
        }
        println!("Loaded {} documents.", count);
    }

    if let Some(path) = summaries {
        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("reading {}", path.display()))?;
        let records: Vec<store::types::DocumentSummary> = serde_json::from_str(&raw)?;
        let count = records.len();
        for record in &records {
            store.put_summary(record).await?;
        }
        println!("Loaded {} summaries.", count);
    }

    if let Some(path) = entity_summaries {
        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("reading {}", path.display()))?;
        let records: Vec<store::types::EntitySummary> = serde_json::from_str(&raw)?;
        let count = records.len();
        for record in &records {
            store.put_entity_summary(record).await?;
        }
        println!("Loaded {} entity summaries.", count);
    }

    Ok(())
}

async fn report(resolver: &EntityResolver) -> Result<()> {
    let consistency = resolver.report_consistency().await?;

    println!("CONSISTENCY REPORT");
    println!("------------------");
    println!("Documents:                  {}", consistency.document_count);
    println!("Document summaries:         {}", consistency.summary_count);
    println!("Documents without summary:  {}", consistency.documents_without_summary);
    println!("Summaries without document: {}", consistency.summaries_without_document);
    println!("Entity id mismatches:       {}", consistency.mismatch_count);
    for mismatch in &consistency.sample_mismatches {
        println!(
            "  - document {}: document side '{}' vs summary side '{}'",
            mismatch.document_id, mismatch.document_entity, mismatch.summary_entity
        );
    }
    let conflicts = resolver.table().conflicts();
    if !conflicts.is_empty() {
        println!("Alias conflicts:            {}", conflicts.len());
        for conflict in conflicts {
            println!(
                "  - {}: kept '{}', rejected '{}'",
                conflict.opaque_id, conflict.kept, conflict.rejected
            );
        }
    }

    println!("\nENTITY DISTRIBUTION");
    println!("-------------------");
    for stats in resolver.entity_distribution().await? {
        println!(
            "{}: {} transcripts, {} summaries, entity narrative: {}",
            stats.entity_id,
            stats.transcript_count,
            stats.summary_count,
            if stats.has_entity_summary { "yes" } else { "no" }
        );
    }

    if let Some((oldest, newest)) = resolver.date_range().await? {
        println!("\nDATE RANGE");
        println!("----------");
        println!(
            "Oldest: {} ({}, {})",
            oldest.published_at.format("%Y-%m-%d"),
            oldest.document_id,
            oldest.entity_id
        );
        println!(
            "Newest: {} ({}, {})",
            newest.published_at.format("%Y-%m-%d"),
            newest.document_id,
            newest.entity_id
        );
    }

    Ok(())
}

async fn repair(resolver: &EntityResolver, direction: RepairDirection) -> Result<()> {
    let before = resolver.report_consistency().await?;
    println!(
        "Before repair: {} documents, {} summaries, {} mismatches.",
        before.document_count, before.summary_count, before.mismatch_count
    );

    let result = resolver.repair(direction).await?;
    println!(
        "Examined {} records, rewrote {}, {} unresolved.",
        result.records_examined, result.records_rewritten, result.unresolved
    );
    if result.unresolved > 0 {
        println!("Unresolved ids have no mapping evidence and were left untouched.");
    }

    let after = resolver.report_consistency().await?;
    if after.mismatch_count == 0 {
        println!("Repair complete; collections now agree.");
    } else {
        println!("{} mismatches remain after repair.", after.mismatch_count);
    }
    Ok(())
}
