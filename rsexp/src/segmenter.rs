//! Splits the normalized document into one block per question.

use std::collections::HashSet;

use crate::models::{QuestionBlock, QuestionCandidate};
use crate::patterns::{NumberingPattern, GENERIC_PATTERN};

/// Validated candidates of `pattern`, first occurrence per number, sorted by number.
///
/// Publishers repeat numbers in running text ("see question 5" inside
/// question 8), so the first occurrence in the document is the one kept.
pub fn find_candidates(text: &str, pattern: &NumberingPattern) -> Vec<QuestionCandidate> {
    let mut seen = HashSet::new();
    let mut candidates: Vec<QuestionCandidate> = pattern
        .detect_validated(text)
        .into_iter()
        .filter(|c| seen.insert(c.number))
        .collect();
    candidates.sort_by_key(|c| c.number);
    candidates
}

/// Slices `text` at the candidates' offsets.
///
/// Each block runs from its candidate to the nearest later candidate start in
/// the document, or to the end of the text. Blocks come back in number order.
pub fn slice_blocks<'a>(text: &'a str, candidates: &[QuestionCandidate]) -> Vec<QuestionBlock<'a>> {
    let mut starts: Vec<usize> = candidates.iter().map(|c| c.start).collect();
    starts.sort_unstable();
    starts.dedup();

    candidates
        .iter()
        .filter_map(|c| {
            let end = starts.iter().copied().find(|&s| s > c.start).unwrap_or(text.len());
            let slice = text.get(c.start..end)?;
            Some(QuestionBlock {
                number: c.number,
                start: c.start,
                text: slice,
            })
        })
        .collect()
}

/// Candidates plus blocks for the selected pattern.
pub fn segment<'a>(text: &'a str, pattern: &NumberingPattern) -> Vec<QuestionBlock<'a>> {
    let candidates = find_candidates(text, pattern);
    slice_blocks(text, &candidates)
}

/// The loose pass used when the primary pass produced nothing: `N.` at line
/// start, numbers 1..=200, no sequentiality or trailing-text requirement.
pub fn segment_loose(text: &str) -> Vec<QuestionBlock<'_>> {
    segment(text, &GENERIC_PATTERN)
}
