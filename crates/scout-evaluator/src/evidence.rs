//! Evidence validation: the receipts check.
//!
//! A classification only counts if the quote it cites appears verbatim in the
//! chunk it came from. Matching is exact and case-sensitive; the only
//! leniency is whitespace, since extracted PDF text wraps lines arbitrarily.

use crate::EvidenceCheck;

/// Collapse every run of whitespace to a single ASCII space and trim.
pub fn normalize_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for word in text.split_whitespace() {
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(word);
    }
    out
}

/// Check that `quote` is an exact (whitespace-normalized) substring of
/// `chunk_text`. An empty quote never passes.
pub fn validate_evidence(quote: &str, chunk_text: &str) -> EvidenceCheck {
    let snippet = normalize_whitespace(quote);
    let pass = !snippet.is_empty() && normalize_whitespace(chunk_text).contains(&snippet);
    EvidenceCheck { pass, snippet }
}
