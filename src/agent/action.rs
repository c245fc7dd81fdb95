/// Parsed decision from one model turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepDecision {
    /// Terminal marker found — loop ends with this answer.
    Final(String),
    /// A tool invocation in `name(args)` form.
    ToolCall { name: String, args: String },
    /// Neither marker found — the loop nudges and continues.
    Unparsed,
}

const FINAL_MARKER: &str = "Final Answer:";
const ACTION_MARKER: &str = "Action:";
const THOUGHT_MARKER: &str = "Thought:";

impl StepDecision {
    /// Two-stage parse: terminal-vs-continue first, then the tool call.
    /// Anything that fits neither shape is `Unparsed` — recoverable, never
    /// a crash.
    pub fn parse(input: &str) -> Self {
        if let Some(answer) = extract_final(input) {
            return StepDecision::Final(answer);
        }
        if let Some((name, args)) = extract_action(input) {
            return StepDecision::ToolCall { name, args };
        }
        StepDecision::Unparsed
    }
}

/// The model's reasoning text preceding its action or final answer.
pub fn extract_thought(input: &str) -> Option<String> {
    let end = input
        .find(ACTION_MARKER)
        .into_iter()
        .chain(input.find(FINAL_MARKER))
        .min()
        .unwrap_or(input.len());
    let mut thought = input[..end].trim();
    if let Some(rest) = thought.strip_prefix(THOUGHT_MARKER) {
        thought = rest.trim();
    }
    if thought.is_empty() {
        None
    } else {
        Some(thought.to_string())
    }
}

fn extract_final(input: &str) -> Option<String> {
    let idx = input.find(FINAL_MARKER)?;
    let answer = input[idx + FINAL_MARKER.len()..].trim();
    Some(answer.to_string())
}

/// Extract `name(args)` after the action marker, with paren counting so
/// nested parentheses inside the arguments survive.
fn extract_action(input: &str) -> Option<(String, String)> {
    let idx = input.find(ACTION_MARKER)?;
    let after = input[idx + ACTION_MARKER.len()..].trim_start();

    // The call must open on the action line itself; arguments may continue
    // across lines.
    let first_line = after.lines().next().unwrap_or("");
    let Some(open) = first_line.find('(') else {
        // Bare tool name on the action line, no arguments.
        let name = first_line.trim().to_string();
        if name.is_empty() || !is_tool_name(&name) {
            return None;
        }
        return Some((name, String::new()));
    };

    let name = after[..open].trim().to_string();
    if name.is_empty() || !is_tool_name(&name) {
        return None;
    }

    let body = &after[open + 1..];
    let mut depth = 1i32;
    let mut end = None;
    for (i, ch) in body.char_indices() {
        match ch {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    end = Some(i);
                    break;
                }
            }
            _ => {}
        }
    }

    let args = match end {
        Some(e) => &body[..e],
        None => body, // Unclosed — take everything
    };
    Some((name, args.trim().to_string()))
}

fn is_tool_name(name: &str) -> bool {
    name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}
