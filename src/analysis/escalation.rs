use super::tier_one::TierOneResult;
use crate::config::PolicyConfig;

/// Why a query escalated to full-text analysis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EscalationReason {
    InsufficientData,
    /// The query asked for depth explicitly; carries the matched phrase.
    TriggerPhrase(String),
    ShortAnswer,
}

#[derive(Debug, Clone)]
pub struct EscalationDecision {
    pub escalate: bool,
    pub reason: Option<EscalationReason>,
}

impl EscalationDecision {
    fn stay() -> Self {
        Self { escalate: false, reason: None }
    }
    fn escalate(reason: EscalationReason) -> Self {
        Self { escalate: true, reason: Some(reason) }
    }
}

/// The Tier-One → Tier-Two gate. Deterministic and free — no model call —
/// so the escalation cost is only paid when one of the explicit conditions
/// holds, and the decision itself is testable.
pub struct EscalationPolicy {
    triggers: Vec<String>,
    min_answer_len: usize,
}

impl EscalationPolicy {
    pub fn new(config: &PolicyConfig) -> Self {
        Self {
            triggers: config
                .escalation_triggers
                .iter()
                .map(|t| t.to_lowercase())
                .collect(),
            min_answer_len: config.min_answer_len,
        }
    }

    pub fn decide(&self, query: &str, tier_one: &TierOneResult) -> EscalationDecision {
        if tier_one.insufficient_data {
            return EscalationDecision::escalate(EscalationReason::InsufficientData);
        }

        let query_lower = query.to_lowercase();
        if let Some(phrase) = self.triggers.iter().find(|t| query_lower.contains(t.as_str())) {
            return EscalationDecision::escalate(EscalationReason::TriggerPhrase(phrase.clone()));
        }

        if tier_one.answer.trim().len() < self.min_answer_len {
            return EscalationDecision::escalate(EscalationReason::ShortAnswer);
        }

        EscalationDecision::stay()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> EscalationPolicy {
        EscalationPolicy::new(&PolicyConfig::default())
    }

    fn result(answer: &str, insufficient: bool) -> TierOneResult {
        TierOneResult {
            answer: answer.to_string(),
            documents_used: vec!["d1".to_string()],
            entities_missing: vec![],
            summaries_used: 1,
            insufficient_data: insufficient,
        }
    }

    fn long_answer() -> String {
        "Revenue grew across all segments driven by services and wearables, \
         with management guiding to continued double-digit expansion through \
         the remainder of the fiscal year."
            .to_string()
    }

    #[test]
    fn test_no_escalation_for_adequate_answer() {
        let decision = policy().decide("AMZN vs AAPL 2018 computing growth", &result(&long_answer(), false));
        assert!(!decision.escalate);
        assert_eq!(decision.reason, None);
    }

    #[test]
    fn test_escalates_on_insufficient_data() {
        let decision = policy().decide("growth?", &result("", true));
        assert!(decision.escalate);
        assert_eq!(decision.reason, Some(EscalationReason::InsufficientData));
    }

    #[test]
    fn test_escalates_on_trigger_phrase() {
        let decision = policy().decide(
            "AMZN vs AAPL 2018 computing growth, detailed please",
            &result(&long_answer(), false),
        );
        assert!(decision.escalate);
        assert_eq!(
            decision.reason,
            Some(EscalationReason::TriggerPhrase("detailed".to_string()))
        );
    }

    #[test]
    fn test_trigger_match_is_case_insensitive() {
        let decision = policy().decide("give me the VERBATIM remarks", &result(&long_answer(), false));
        assert!(decision.escalate);
    }

    #[test]
    fn test_escalates_on_short_answer() {
        let decision = policy().decide("growth?", &result("Yes.", false));
        assert!(decision.escalate);
        assert_eq!(decision.reason, Some(EscalationReason::ShortAnswer));
    }

    #[test]
    fn test_decision_is_deterministic() {
        let p = policy();
        let r = result("Yes.", false);
        let first = p.decide("growth?", &r);
        for _ in 0..10 {
            let again = p.decide("growth?", &r);
            assert_eq!(again.escalate, first.escalate);
            assert_eq!(again.reason, first.reason);
        }
    }
}
