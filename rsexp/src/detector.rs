//! Document-wide numbering format detection.
//!
//! Every numbering pattern is scored against the normalized document and the
//! best one wins. The score rewards consecutive numbers, which is what tells
//! a real question sequence apart from incidental matches such as `[3]`
//! citations or `$5)` amounts.

use crate::models::QuestionNumber;
use crate::patterns::NumberingPattern;

/// Adjacent pairs inspected when scoring sequentiality.
const SEQUENTIAL_WINDOW: usize = 10;

/// Confidence of the generic pattern used when nothing validates.
pub const FALLBACK_CONFIDENCE: f64 = 0.5;

/// Score of one pattern against one document.
///
/// # Fields
///
/// * `name` - Pattern name.
/// * `match_count` - Validated matches.
/// * `sequential_score` - Consecutive pairs among the first ten sorted numbers.
/// * `confidence` - `base × (match_count / 100) × (sequential_score / 10 + 0.5)`, at most 1.0.
#[derive(Debug, Clone, PartialEq)]
pub struct FormatScore {
    pub name: String,
    pub match_count: usize,
    pub sequential_score: usize,
    pub confidence: f64,
}

/// The numbering pattern chosen for a document.
#[derive(Debug, Clone)]
pub struct FormatDecision {
    pub pattern: NumberingPattern,
    pub confidence: f64,
    /// Validated numbers, sorted ascending (duplicates kept).
    pub numbers: Vec<QuestionNumber>,
    /// `true` when no pattern validated anything and the generic pattern was used.
    pub is_fallback: bool,
}

/// Counts `numbers[i] == numbers[i - 1] + 1` for `i` in `1..min(len, 10)`.
/// `numbers` must already be sorted.
pub fn sequential_score(numbers: &[QuestionNumber]) -> usize {
    let limit = numbers.len().min(SEQUENTIAL_WINDOW);
    (1..limit).filter(|&i| numbers[i] == numbers[i - 1] + 1).count()
}

pub fn confidence(base: f64, match_count: usize, sequential: usize) -> f64 {
    let value = base * (match_count as f64 / 100.0) * (sequential as f64 / 10.0 + 0.5);
    value.min(1.0)
}

/// Scores one pattern and returns its sorted validated numbers alongside.
pub fn score_pattern(pattern: &NumberingPattern, text: &str) -> (FormatScore, Vec<QuestionNumber>) {
    let mut numbers: Vec<QuestionNumber> =
        pattern.detect_validated(text).into_iter().map(|c| c.number).collect();
    numbers.sort_unstable();
    let sequential = sequential_score(&numbers);
    let score = FormatScore {
        name: pattern.name.clone(),
        match_count: numbers.len(),
        sequential_score: sequential,
        confidence: confidence(pattern.base_confidence, numbers.len(), sequential),
    };
    (score, numbers)
}

/// Picks the highest-confidence pattern. Ties go to the pattern declared first.
///
/// # Arguments
///
/// * `text` - The normalized document.
/// * `patterns` - Candidate patterns in declaration order.
///
/// # Returns
///
/// The winning pattern with its confidence and numbers, or the generic
/// `number + period` pattern at confidence 0.5 when nothing validates.
pub fn detect_format(text: &str, patterns: &[NumberingPattern]) -> FormatDecision {
    let mut best: Option<(usize, FormatScore, Vec<QuestionNumber>)> = None;
    for (index, pattern) in patterns.iter().enumerate() {
        let (score, numbers) = score_pattern(pattern, text);
        tracing::debug!(
            "format '{}': matches={} sequential={} confidence={:.4}",
            score.name,
            score.match_count,
            score.sequential_score,
            score.confidence
        );
        if score.match_count == 0 {
            continue;
        }
        let better = match &best {
            Some((_, current, _)) => score.confidence > current.confidence,
            None => true,
        };
        if better {
            best = Some((index, score, numbers));
        }
    }

    match best {
        Some((index, score, numbers)) => FormatDecision {
            pattern: patterns[index].clone(),
            confidence: score.confidence,
            numbers: numbers,
            is_fallback: false,
        },
        None => FormatDecision {
            pattern: NumberingPattern::generic(),
            confidence: FALLBACK_CONFIDENCE,
            numbers: Vec::new(),
            is_fallback: true,
        },
    }
}
