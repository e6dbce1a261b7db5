//! Decides whether a kept page continues the record of the kept page before it.

use serde::Serialize;

/// Terminators that close a narrative cell at the bottom of a page.
const SENTENCE_TERMINATORS: [char; 3] = ['.', ';', ':'];

/// Evidence that a page is the tail of the previous page's record, in the
/// order the signals are tested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ContinuationSignal {
    /// The table header is not repeated on the page.
    NoHeader,
    /// The page opens with a wrapped numeric cell.
    LeadingDigit,
    /// The page opens mid-sentence.
    LeadingLowercase,
    /// The previous page stops without closing punctuation.
    UnterminatedPrevious,
}

/// Returns the first signal that fires, or `None` when `current` starts a new
/// segment. An empty `previous` means there is no earlier kept page.
pub fn continuation_signal<S: AsRef<str>>(
    current: &str,
    previous: &str,
    header_keywords: &[S],
) -> Option<ContinuationSignal> {
    let current = current.trim();
    let previous = previous.trim();

    if previous.is_empty() {
        return None;
    }

    let lowered = current.to_lowercase();
    let has_header = header_keywords.iter().any(|keyword| {
        let keyword = keyword.as_ref().trim().to_lowercase();
        !keyword.is_empty() && lowered.contains(&keyword)
    });
    if !has_header {
        return Some(ContinuationSignal::NoHeader);
    }

    match current.chars().next() {
        Some(first) if first.is_ascii_digit() => return Some(ContinuationSignal::LeadingDigit),
        Some(first) if first.is_lowercase() => return Some(ContinuationSignal::LeadingLowercase),
        _ => {}
    }

    if !previous.ends_with(SENTENCE_TERMINATORS) {
        return Some(ContinuationSignal::UnterminatedPrevious);
    }

    None
}

/// True when `current` continues the record left open on `previous`.
pub fn is_continuation<S: AsRef<str>>(current: &str, previous: &str, header_keywords: &[S]) -> bool {
    continuation_signal(current, previous, header_keywords).is_some()
}
