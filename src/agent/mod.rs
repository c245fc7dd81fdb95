pub mod action;
pub mod prompts;
pub mod tools;

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::PolicyConfig;
use crate::llm::{LanguageModel, Message};
use action::{extract_thought, StepDecision};
use tools::ToolRegistry;

/// One Thought/Action/Observation triple.
#[derive(Debug, Clone)]
pub struct TraceStep {
    pub thought: Option<String>,
    pub action: String,
    pub observation: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceOutcome {
    Answered(String),
    Failed(String),
}

/// Ordered record of one query execution. Append-only while running,
/// immutable once terminal.
#[derive(Debug, Clone)]
pub struct ReasoningTrace {
    pub steps: Vec<TraceStep>,
    pub outcome: TraceOutcome,
}

#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub answer: String,
    pub trace: ReasoningTrace,
}

/// A prior (user, assistant) exchange.
pub type HistoryTurn = (String, String);

/// The ReAct controller: asks the model for the next step, dispatches tool
/// calls against the closed registry, and folds results back as
/// observations, under a hard turn ceiling.
pub struct ReasoningLoop {
    llm: Arc<dyn LanguageModel>,
    registry: Arc<ToolRegistry>,
    max_turns: u32,
    history_window: usize,
}

impl ReasoningLoop {
    pub fn new(
        llm: Arc<dyn LanguageModel>,
        registry: Arc<ToolRegistry>,
        config: &PolicyConfig,
    ) -> Self {
        Self {
            llm,
            registry,
            max_turns: config.max_turns,
            history_window: config.history_window,
        }
    }

    /// Run one query to completion. Failures are outcomes, not errors — the
    /// caller always gets an answer string and the full trace.
    pub async fn run(
        &self,
        query: &str,
        history: &[HistoryTurn],
        conversation_id: &str,
    ) -> RunOutcome {
        let system = self.build_system_prompt(history);
        let mut messages = vec![Message::user(query)];
        let mut steps: Vec<TraceStep> = Vec::new();
        let mut last_llm_error: Option<String> = None;
        let mut model_answered = false;

        info!(conversation_id, max_turns = self.max_turns, "reasoning loop started");

        for turn in 0..self.max_turns {
            let response = match self.llm.complete(&messages, Some(system.as_str())).await {
                Ok(response) => response,
                Err(e) => {
                    // A single-turn failure: record it and retry on the next
                    // turn while budget remains.
                    warn!(turn, error = %e, "model call failed");
                    steps.push(TraceStep {
                        thought: None,
                        action: "model call".to_string(),
                        observation: format!("model call failed: {}", e),
                    });
                    last_llm_error = Some(e.to_string());
                    continue;
                }
            };
            model_answered = true;

            debug!(turn, response_len = response.len(), "model step received");
            let thought = extract_thought(&response);

            match StepDecision::parse(&response) {
                StepDecision::Final(answer) => {
                    info!(turn, answer_len = answer.len(), "final answer produced");
                    steps.push(TraceStep {
                        thought,
                        action: "Final Answer".to_string(),
                        observation: String::new(),
                    });
                    return RunOutcome {
                        answer: answer.clone(),
                        trace: ReasoningTrace {
                            steps,
                            outcome: TraceOutcome::Answered(answer),
                        },
                    };
                }
                StepDecision::ToolCall { name, args } => {
                    messages.push(Message::assistant(response));
                    let observation = self.registry.dispatch(&name, &args, conversation_id).await;
                    debug!(turn, tool = %name, observation_len = observation.len(), "observation");
                    steps.push(TraceStep {
                        thought,
                        action: format!("{}({})", name, args),
                        observation: observation.clone(),
                    });
                    messages.push(Message::user(format!("Observation: {}", observation)));
                }
                StepDecision::Unparsed => {
                    debug!(turn, "unparsed model step, nudging");
                    messages.push(Message::assistant(response));
                    steps.push(TraceStep {
                        thought,
                        action: "(unparsed)".to_string(),
                        observation: prompts::UNPARSED_NUDGE.to_string(),
                    });
                    messages.push(Message::user(prompts::UNPARSED_NUDGE.to_string()));
                }
            }
        }

        // Ceiling reached without a terminal marker.
        let reason = match (model_answered, last_llm_error) {
            (false, Some(e)) => format!("model unavailable: {}", e),
            _ => "max iterations exhausted".to_string(),
        };
        warn!(turns = self.max_turns, reason = %reason, "reasoning loop failed");
        RunOutcome {
            answer: prompts::EXHAUSTED_APOLOGY.to_string(),
            trace: ReasoningTrace {
                steps,
                outcome: TraceOutcome::Failed(reason),
            },
        }
    }

    /// System prompt with a bounded window of prior conversation — history
    /// growth is capped, never unbounded.
    fn build_system_prompt(&self, history: &[HistoryTurn]) -> String {
        if history.is_empty() || self.history_window == 0 {
            return prompts::SYSTEM_PROMPT.to_string();
        }
        let start = history.len().saturating_sub(self.history_window);
        let recent = &history[start..];
        let mut rendered = String::new();
        for (user, assistant) in recent {
            rendered.push_str(&format!("User: {}\nAssistant: {}\n", user, assistant));
        }
        format!(
            "{}\n\nRecent conversation history (latest last):\n{}",
            prompts::SYSTEM_PROMPT, rendered
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::AnalysisEngine;
    use crate::resolver::AliasTable;
    use crate::testutil::{MemoryCorpus, ScriptedLlm};

    fn make_loop(llm: Arc<ScriptedLlm>, max_turns: u32) -> ReasoningLoop {
        let store = Arc::new(MemoryCorpus::default());
        store.seed_document("d1", "AAPL", "Q1 2018", "transcript body");
        store.seed_summary("d1", "AAPL", "Services grew 27%.");
        let engine = Arc::new(AnalysisEngine::new(
            store,
            llm.clone(),
            Arc::new(AliasTable::default()),
            &PolicyConfig::default(),
        ));
        let registry = Arc::new(ToolRegistry::new(engine, llm.clone()));
        let config = PolicyConfig { max_turns, ..PolicyConfig::default() };
        ReasoningLoop::new(llm, registry, &config)
    }

    #[tokio::test]
    async fn test_terminates_at_exactly_the_ceiling() {
        // The model only ever asks for tool calls, never a final answer.
        let llm = Arc::new(ScriptedLlm::repeating(
            "Thought: keep looking.\nAction: resolve_entity(AAPL)",
        ));
        let looper = make_loop(llm.clone(), 3);

        let outcome = looper.run("growth?", &[], "c1").await;
        assert_eq!(
            outcome.trace.outcome,
            TraceOutcome::Failed("max iterations exhausted".to_string())
        );
        assert_eq!(outcome.trace.steps.len(), 3);
        assert_eq!(llm.calls(), 3);
        assert_eq!(outcome.answer, prompts::EXHAUSTED_APOLOGY);
    }

    #[tokio::test]
    async fn test_final_answer_terminates_immediately() {
        let llm = Arc::new(ScriptedLlm::new(vec![
            "Thought: simple question.\nFinal Answer: Revenue grew 12%.".to_string(),
        ]));
        let looper = make_loop(llm.clone(), 10);

        let outcome = looper.run("growth?", &[], "c1").await;
        assert_eq!(outcome.answer, "Revenue grew 12%.");
        assert_eq!(
            outcome.trace.outcome,
            TraceOutcome::Answered("Revenue grew 12%.".to_string())
        );
        assert_eq!(llm.calls(), 1);
        assert_eq!(outcome.trace.steps.len(), 1);
        assert_eq!(
            outcome.trace.steps[0].thought.as_deref(),
            Some("simple question.")
        );
    }

    #[tokio::test]
    async fn test_unknown_tool_feeds_back_an_error_observation() {
        let llm = Arc::new(ScriptedLlm::new(vec![
            "Action: grep(revenue)".to_string(),
            "Final Answer: done".to_string(),
        ]));
        let looper = make_loop(llm, 10);

        let outcome = looper.run("growth?", &[], "c1").await;
        assert_eq!(outcome.answer, "done");
        assert!(outcome.trace.steps[0].observation.contains("Unknown tool 'grep'"));
    }

    #[tokio::test]
    async fn test_unparsed_step_is_nudged_not_fatal() {
        let llm = Arc::new(ScriptedLlm::new(vec![
            "Let me ponder the state of cloud computing.".to_string(),
            "Final Answer: pondered".to_string(),
        ]));
        let looper = make_loop(llm, 10);

        let outcome = looper.run("growth?", &[], "c1").await;
        assert_eq!(outcome.answer, "pondered");
        assert_eq!(outcome.trace.steps[0].action, "(unparsed)");
    }

    #[tokio::test]
    async fn test_tool_observation_recorded_in_trace() {
        let llm = Arc::new(ScriptedLlm::new(vec![
            "Thought: check the summaries.\nAction: analyze(growth?, entities: AAPL)".to_string(),
            "Looking at the summaries, services revenue expanded by 27% in \
             the quarter, which management called out as the fastest-growing \
             part of the business across the covered periods."
                .to_string(),
            "Final Answer: Services grew 27%.".to_string(),
        ]));
        let looper = make_loop(llm, 10);

        let outcome = looper.run("growth?", &[], "c1").await;
        assert_eq!(outcome.answer, "Services grew 27%.");
        assert_eq!(outcome.trace.steps.len(), 2);
        assert!(outcome.trace.steps[0].observation.contains("documents used: d1"));
    }

    #[tokio::test]
    async fn test_llm_failure_is_retried_within_budget() {
        let llm = Arc::new(ScriptedLlm::with_results(vec![
            Err("connection reset".to_string()),
            Ok("Final Answer: recovered".to_string()),
        ]));
        let looper = make_loop(llm, 10);

        let outcome = looper.run("growth?", &[], "c1").await;
        assert_eq!(outcome.answer, "recovered");
        assert!(outcome.trace.steps[0].observation.contains("model call failed"));
    }

    #[tokio::test]
    async fn test_llm_never_responding_fails_with_reason() {
        let llm = Arc::new(ScriptedLlm::with_results(vec![]));
        let looper = make_loop(llm, 3);

        let outcome = looper.run("growth?", &[], "c1").await;
        match outcome.trace.outcome {
            TraceOutcome::Failed(reason) => assert!(reason.starts_with("model unavailable")),
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_history_window_is_bounded() {
        let llm = Arc::new(ScriptedLlm::new(vec!["Final Answer: ok".to_string()]));
        let looper = make_loop(llm.clone(), 10);

        let history: Vec<(String, String)> = (1..=7)
            .map(|i| (format!("question {}", i), format!("answer {}", i)))
            .collect();
        looper.run("growth?", &history, "c1").await;

        let system = llm.last_system().unwrap();
        // Default window is 5: turns 3..=7 are embedded, 1 and 2 are not.
        assert!(system.contains("question 7"));
        assert!(system.contains("question 3"));
        assert!(!system.contains("question 2"));
    }
}
