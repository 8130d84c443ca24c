use serde::Serialize;
use std::collections::{BTreeMap, HashSet};

use crate::models::{AnswerKeyMap, ExtractedQuestion, QuestionRecord};

/// Joins one extracted question with its answer. The pasted key wins over
/// an answer printed inside the block.
pub fn assemble_one(question: ExtractedQuestion, answer_key: &AnswerKeyMap) -> QuestionRecord {
    QuestionRecord {
        number: question.number,
        correct_answer: answer_key
            .get(&question.number)
            .copied()
            .or(question.inline_answer),
        statement: question.statement,
        options: question.options,
        likely_has_non_text_content: question.likely_has_non_text_content,
    }
}

/// Whether a record survives the minimum statement length rule.
///
/// Empty statements are always dropped. A statement shorter than
/// `min_statement_len` characters is dropped only when no options were
/// recovered either; with options the block was clearly a real question.
pub fn keep_record(record: &QuestionRecord, min_statement_len: usize) -> bool {
    if record.statement.trim().is_empty() {
        return false;
    }
    record.statement.chars().count() >= min_statement_len || !record.options.is_empty()
}

/// Builds the ordered record list.
///
/// # Arguments
///
/// * `questions` - Extracted questions, in any order.
/// * `answer_key` - Parsed answer key; missing numbers get no answer.
/// * `min_statement_len` - See [`keep_record`].
///
/// # Returns
///
/// Records sorted by number, each number at most once (first kept).
pub fn assemble(
    questions: Vec<ExtractedQuestion>,
    answer_key: &AnswerKeyMap,
    min_statement_len: usize,
) -> Vec<QuestionRecord> {
    let mut records: Vec<QuestionRecord> = questions
        .into_iter()
        .map(|q| assemble_one(q, answer_key))
        .filter(|r| {
            let keep = keep_record(r, min_statement_len);
            if !keep {
                tracing::debug!("dropping question {}: statement too short", r.number);
            }
            keep
        })
        .collect();
    records.sort_by_key(|r| r.number);
    records.dedup_by_key(|r| r.number);
    records
}

/// Summary numbers for one extraction run.
///
/// # Fields
///
/// * `total` - Records in the output.
/// * `with_answer` - Records the answer key covered.
/// * `flagged` - Records flagged as likely referring to non-text content.
/// * `average_statement_len` - Mean statement length in characters.
/// * `option_patterns_used` - Output records per winning option marker pattern.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExtractionStats {
    pub total: usize,
    pub with_answer: usize,
    pub flagged: usize,
    pub average_statement_len: f64,
    pub option_patterns_used: BTreeMap<String, usize>,
}

impl ExtractionStats {
    /// Computes the statistics of `records`. Pattern usage is read from
    /// `extracted`, counting the first extraction of each output number.
    pub fn compute(records: &[QuestionRecord], extracted: &[ExtractedQuestion]) -> ExtractionStats {
        let total = records.len();
        let statement_chars: usize = records.iter().map(|r| r.statement.chars().count()).sum();

        let output_numbers: HashSet<u32> = records.iter().map(|r| r.number).collect();
        let mut counted = HashSet::new();
        let mut option_patterns_used = BTreeMap::new();
        for question in extracted.iter() {
            if !output_numbers.contains(&question.number) || !counted.insert(question.number) {
                continue;
            }
            if let Some(name) = &question.option_pattern {
                *option_patterns_used.entry(name.clone()).or_insert(0) += 1;
            }
        }

        ExtractionStats {
            total: total,
            with_answer: records.iter().filter(|r| r.correct_answer.is_some()).count(),
            flagged: records.iter().filter(|r| r.likely_has_non_text_content).count(),
            average_statement_len: if total == 0 {
                0.0
            } else {
                statement_chars as f64 / total as f64
            },
            option_patterns_used: option_patterns_used,
        }
    }
}
