use std::path::PathBuf;

/// Policy parameters for the analysis engine and reasoning loop.
///
/// These are tuning knobs, not structural requirements — the defaults follow
/// the values the corpus was operated with, and every one can be overridden
/// from the environment.
#[derive(Debug, Clone)]
pub struct PolicyConfig {
    /// Characters per Tier-Two chunk.
    pub chunk_size: usize,
    /// Cap on summaries folded into one Tier-One prompt, per entity.
    pub tier_one_max_docs: usize,
    /// Hard ceiling on reasoning-loop turns.
    pub max_turns: u32,
    /// Prior conversation turns embedded in the loop's system prompt.
    pub history_window: usize,
    /// Tier-One answers shorter than this escalate to Tier Two.
    pub min_answer_len: usize,
    /// Query phrases that force escalation (matched case-insensitively).
    pub escalation_triggers: Vec<String>,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            chunk_size: 80_000,
            tier_one_max_docs: 3,
            max_turns: 10,
            history_window: 5,
            min_answer_len: 150,
            escalation_triggers: vec![
                "detailed".to_string(),
                "in-depth".to_string(),
                "full text".to_string(),
                "exact wording".to_string(),
                "verbatim".to_string(),
                "word for word".to_string(),
            ],
        }
    }
}

impl PolicyConfig {
    /// Defaults overridden by any `CALLSIGHT_*` environment variables.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Some(v) = env_parse("CALLSIGHT_CHUNK_SIZE") {
            cfg.chunk_size = v;
        }
        if let Some(v) = env_parse("CALLSIGHT_TIER_ONE_MAX_DOCS") {
            cfg.tier_one_max_docs = v;
        }
        if let Some(v) = env_parse("CALLSIGHT_MAX_TURNS") {
            cfg.max_turns = v;
        }
        if let Some(v) = env_parse("CALLSIGHT_HISTORY_WINDOW") {
            cfg.history_window = v;
        }
        if let Some(v) = env_parse("CALLSIGHT_MIN_ANSWER_LEN") {
            cfg.min_answer_len = v;
        }
        if let Ok(list) = dotenv::var("CALLSIGHT_ESCALATION_TRIGGERS") {
            let triggers: Vec<String> = list
                .split(',')
                .map(|t| t.trim().to_lowercase())
                .filter(|t| !t.is_empty())
                .collect();
            if !triggers.is_empty() {
                cfg.escalation_triggers = triggers;
            }
        }
        cfg
    }
}

/// Where the corpus store lives on disk.
pub fn data_dir() -> PathBuf {
    dotenv::var("CALLSIGHT_DATA_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("./data/corpus"))
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    dotenv::var(key).ok().and_then(|v| v.parse().ok())
}
