//! Relaxed second pass for question numbers the primary pass missed.
//!
//! Every number between 1 and the highest detected one that is absent from
//! the output is searched again with looser anchors: `N.`/`N)`/`N]`/`N}`
//! anywhere in a line, `{N}`, then a bare "question N". The block runs up
//! to the nearest following number marker and goes through the normal
//! extractor.

use anyhow::Result;
use regex::Regex;
use std::collections::BTreeSet;
use std::sync::LazyLock;

use crate::assembler::{assemble_one, keep_record};
use crate::extracter::OptionExtractor;
use crate::models::{AnswerKeyMap, ExtractedQuestion, QuestionBlock, QuestionNumber, QuestionRecord};

/// Minimum characters after the marker for the two content-bearing anchors.
const MIN_TRAILING: usize = 20;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecoveryOutcome {
    /// Questions inserted by this pass, in number order.
    pub recovered: Vec<ExtractedQuestion>,
    /// Numbers still absent afterwards.
    pub missing: Vec<QuestionNumber>,
    /// Blocks that were found but failed to extract, with the reason.
    pub failures: Vec<(QuestionNumber, String)>,
}

fn anchors(number: QuestionNumber) -> Result<Vec<Regex>> {
    Ok(vec![
        Regex::new(&format!(r"\b{}\s*[.)\]}}]\s*[^\n]{{{},}}", number, MIN_TRAILING))?,
        Regex::new(&format!(r"\{{{}\}}\s*[^\n]{{{},}}", number, MIN_TRAILING))?,
        Regex::new(&format!(r"(?i)quest(?:ão|ao|ion)\s+0*{}\b", number))?,
    ])
}

/// Offset of the first relaxed anchor for `number`, trying each anchor style in turn.
pub fn find_missing_start(text: &str, number: QuestionNumber) -> Result<Option<usize>> {
    for anchor in anchors(number)?.iter() {
        if let Some(m) = anchor.find(text) {
            return Ok(Some(m.start()));
        }
    }
    Ok(None)
}

/// Any `M.`/`M)`/`M]`/`M}` number marker.
static NEXT_MARKER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b(\d{1,3})\s*[.)\]}]").unwrap());

/// End of a recovered block: the first marker after `start` of the smallest
/// number in `number + 1 ..= max + 1` that occurs there, else the end of the text.
pub fn find_block_end(text: &str, start: usize, number: QuestionNumber, max: QuestionNumber) -> usize {
    let limit = max.saturating_add(1);
    NEXT_MARKER
        .captures_iter(text)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let next = caps[1].parse::<QuestionNumber>().ok()?;
            (whole.start() > start && next > number && next <= limit).then_some((next, whole.start()))
        })
        .min()
        .map(|(_, offset)| offset)
        .unwrap_or(text.len())
}

/// Fills gaps in `records` in place and re-sorts them by number.
///
/// # Arguments
///
/// * `text` - The normalized document.
/// * `records` - Records from the primary pass.
/// * `extractor` - The extractor used by the primary pass.
/// * `answer_key` - Parsed answer key.
/// * `min_statement_len` - Same drop rule as the primary pass.
///
/// # Returns
///
/// What was recovered, what is still missing and which blocks failed.
pub fn recover_gaps(
    text: &str,
    records: &mut Vec<QuestionRecord>,
    extractor: &OptionExtractor,
    answer_key: &AnswerKeyMap,
    min_statement_len: usize,
) -> Result<RecoveryOutcome> {
    let mut outcome = RecoveryOutcome::default();
    let present: BTreeSet<QuestionNumber> = records.iter().map(|r| r.number).collect();
    let Some(&max) = present.iter().next_back() else {
        return Ok(outcome);
    };

    for number in (1..=max).filter(|n| !present.contains(n)) {
        let Some(start) = find_missing_start(text, number)? else {
            outcome.missing.push(number);
            continue;
        };
        let end = find_block_end(text, start, number, max);
        let Some(slice) = text.get(start..end) else {
            outcome.failures.push((number, format!("block {}..{} out of range", start, end)));
            outcome.missing.push(number);
            continue;
        };
        let block = QuestionBlock {
            number: number,
            start: start,
            text: slice,
        };

        match extractor.extract(&block) {
            Ok(Some(question)) => {
                let record = assemble_one(question.clone(), answer_key);
                if keep_record(&record, min_statement_len) {
                    tracing::debug!("recovered question {} at offset {}", number, start);
                    records.push(record);
                    outcome.recovered.push(question);
                } else {
                    outcome.missing.push(number);
                }
            }
            Ok(None) => outcome.missing.push(number),
            Err(e) => {
                outcome.failures.push((number, e.to_string()));
                outcome.missing.push(number);
            }
        }
    }

    records.sort_by_key(|r| r.number);
    return Ok(outcome);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::default_visual_keywords;
    use crate::extracter::keyword_regex;
    use crate::models::{OptionLetter, OptionSet};
    use crate::patterns::{compile_option_patterns, default_option_specs};

    fn extractor() -> OptionExtractor {
        OptionExtractor::new(
            compile_option_patterns(&default_option_specs()).unwrap(),
            3,
            keyword_regex(&default_visual_keywords()).unwrap(),
        )
    }

    fn record(number: u32) -> QuestionRecord {
        QuestionRecord {
            number: number,
            statement: format!("Existing statement number {}", number),
            options: OptionSet::new(),
            correct_answer: None,
            likely_has_non_text_content: true,
        }
    }

    #[test]
    fn test_anchor_requires_word_boundary() {
        let text = "dose of 12. milligrams given twice daily here\n2) The second question has a long enough stem";
        assert_eq!(find_missing_start(text, 2).unwrap(), Some(text.find("2)").unwrap_or(0)));
        assert_eq!(find_missing_start(text, 7).unwrap(), None);
    }

    #[test]
    fn test_keyword_anchor_is_positional() {
        let text = "intro\nQuestão 4\n(A) um\n(B) dois\n(C) três";
        assert_eq!(find_missing_start(text, 4).unwrap(), Some(6));
    }

    #[test]
    fn test_block_end_finds_next_marker() {
        let text = "2. Second question statement text here\n(A) a\n3. Third";
        let end = find_block_end(text, 0, 2, 3);
        assert_eq!(&text[end..], "3. Third");
        assert_eq!(find_block_end("2. only", 0, 2, 2), 7);
    }

    #[test]
    fn test_block_end_prefers_smallest_following_number() {
        // a stray "5)" before "4." does not end question 3
        let text = "3. Third question cites table 5) in passing\n(A) a\n4. Fourth";
        let end = find_block_end(text, 0, 3, 10);
        assert_eq!(&text[end..], "4. Fourth");

        // numbers past max + 1 are not boundaries
        assert_eq!(find_block_end(text, 0, 3, 3), text.len() - "4. Fourth".len());
        assert_eq!(find_block_end("3. body 9. noise", 0, 3, 4), "3. body 9. noise".len());
    }

    #[test]
    fn test_block_end_with_unbounded_max() {
        let text = "2. Second question statement text here\n3. Third";
        let end = find_block_end(text, 0, 2, u32::MAX);
        assert_eq!(&text[end..], "3. Third");
        assert_eq!(find_block_end("7. last", 0, u32::MAX - 1, u32::MAX), "7. last".len());
    }

    #[test]
    fn test_recovers_inline_question() {
        let text = "1. First question statement is right here\n(A) a1\n(B) b1\n(C) c1 2. Second question was glued to the previous line\n(A) a2\n(B) b2\n(C) c2\n3. Third question statement long enough\n(A) a3\n(B) b3\n(C) c3";
        let mut records = vec![record(1), record(3)];
        let key: AnswerKeyMap = [(2, OptionLetter::D)].into_iter().collect();
        let outcome = recover_gaps(text, &mut records, &extractor(), &key, 20).unwrap();

        let numbers: Vec<u32> = records.iter().map(|r| r.number).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
        assert_eq!(records[1].statement, "Second question was glued to the previous line");
        assert_eq!(records[1].options.get(OptionLetter::C), "c2");
        assert_eq!(records[1].correct_answer, Some(OptionLetter::D));
        assert_eq!(outcome.recovered.len(), 1);
        assert!(outcome.missing.is_empty());
    }

    #[test]
    fn test_unrecoverable_numbers_are_reported() {
        let text = "1. First question statement is right here\n4. Fourth question statement is here";
        let mut records = vec![record(1), record(4)];
        let outcome = recover_gaps(text, &mut records, &extractor(), &AnswerKeyMap::new(), 20).unwrap();
        assert_eq!(outcome.missing, vec![2, 3]);
        assert_eq!(records.len(), 2);
    }
}
