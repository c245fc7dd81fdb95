/// The two identifier shapes that coexist in the corpus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdKind {
    /// Short, human-readable exchange symbol ("AAPL", "MSFT").
    Ticker,
    /// Anything else — treated as an opaque unique token, format-agnostic.
    Opaque,
}

/// Classify an identifier. Ticker iff non-empty, at most 5 chars, and
/// entirely ASCII uppercase letters; everything else is opaque (the safe
/// default — an unrecognized shape is never rejected).
pub fn classify(id: &str) -> IdKind {
    if !id.is_empty() && id.len() <= 5 && id.chars().all(|c| c.is_ascii_uppercase()) {
        IdKind::Ticker
    } else {
        IdKind::Opaque
    }
}
