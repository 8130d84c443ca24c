//! Answer key parsing.
//!
//! Keys arrive pasted in whatever shape the publisher printed them:
//! `01-A, 02-B`, `1: a` one per line, `1 A`, a bare `ABCDA...` letter run or
//! a `12345...` digit run. Interpretations are tried in a fixed order and
//! the first one that yields any entry is used.

use regex::Regex;
use std::sync::LazyLock;
use strum::Display;

use crate::models::{AnswerKeyMap, OptionLetter, QuestionNumber};

static NUMBERED_PAIR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(\d+)\s*[-:]\s*([A-J])").unwrap());
static NUMBERED_SEGMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\s*(\d+)\s*[-:.)=]?\s*([A-J])\s*$").unwrap());
static KEY_LABEL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(?:gabarito(?:\s+oficial)?|answer\s*key|answers?|respostas?|key)\s*[:\-]?\s*")
        .unwrap()
});
static BARE_LETTER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)[A-E]").unwrap());
static BARE_DIGIT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[1-5]").unwrap());

/// Which interpretation produced the map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum KeyShape {
    /// `N-L` / `N:L` pairs anywhere in the text.
    NumberedPairs,
    /// One `N L` pair per comma-separated segment or line.
    NumberedSegments,
    /// Letters in order, numbered from 1.
    LetterSequence,
    /// Digits 1-5 in order, mapped to A-E and numbered from 1.
    DigitSequence,
    /// Nothing recognised.
    Empty,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedAnswerKey {
    pub shape: KeyShape,
    pub answers: AnswerKeyMap,
}

impl ParsedAnswerKey {
    pub fn is_empty(&self) -> bool {
        self.answers.is_empty()
    }
}

fn normalize(raw: &str) -> String {
    raw.replace("\r\n", "\n").replace('\r', "\n").trim().to_string()
}

fn parse_pair(number: &str, letter: &str) -> Option<(QuestionNumber, OptionLetter)> {
    let number = number.parse::<QuestionNumber>().ok()?;
    let letter = letter.chars().next().and_then(OptionLetter::from_char)?;
    Some((number, letter))
}

fn numbered_pairs(text: &str) -> AnswerKeyMap {
    let mut answers = AnswerKeyMap::new();
    for caps in NUMBERED_PAIR.captures_iter(text) {
        if let Some((number, letter)) = parse_pair(&caps[1], &caps[2]) {
            answers.insert(number, letter);
        }
    }
    answers
}

fn numbered_segments(text: &str) -> AnswerKeyMap {
    let segments: Vec<&str> = if text.contains(',') {
        text.split(',').collect()
    } else {
        text.lines().collect()
    };
    let mut answers = AnswerKeyMap::new();
    for segment in segments {
        if let Some(caps) = NUMBERED_SEGMENT.captures(segment) {
            if let Some((number, letter)) = parse_pair(&caps[1], &caps[2]) {
                answers.insert(number, letter);
            }
        }
    }
    answers
}

fn sequence<F>(text: &str, regex: &Regex, map: F) -> AnswerKeyMap
where
    F: Fn(char) -> Option<OptionLetter>,
{
    regex
        .find_iter(text)
        .filter_map(|m| m.as_str().chars().next().and_then(&map))
        .enumerate()
        .map(|(i, letter)| ((i + 1) as QuestionNumber, letter))
        .collect()
}

/// Parses a pasted answer key.
///
/// # Arguments
///
/// * `raw` - The key exactly as the user supplied it.
///
/// # Returns
///
/// The map of the first interpretation that finds anything, tagged with its
/// shape. A key nothing can be read from yields an empty map with
/// [`KeyShape::Empty`]; later duplicates of a number overwrite earlier ones.
pub fn parse_answer_key(raw: &str) -> ParsedAnswerKey {
    let text = normalize(raw);

    let answers = numbered_pairs(&text);
    if !answers.is_empty() {
        return ParsedAnswerKey {
            shape: KeyShape::NumberedPairs,
            answers: answers,
        };
    }

    let answers = numbered_segments(&text);
    if !answers.is_empty() {
        return ParsedAnswerKey {
            shape: KeyShape::NumberedSegments,
            answers: answers,
        };
    }

    // "Gabarito:" must not be read as the letters A, B, A
    let unlabeled = KEY_LABEL.replace(&text, "");

    let answers = sequence(&unlabeled, &BARE_LETTER, OptionLetter::from_char);
    if !answers.is_empty() {
        return ParsedAnswerKey {
            shape: KeyShape::LetterSequence,
            answers: answers,
        };
    }

    let answers = sequence(&unlabeled, &BARE_DIGIT, OptionLetter::from_digit);
    if !answers.is_empty() {
        return ParsedAnswerKey {
            shape: KeyShape::DigitSequence,
            answers: answers,
        };
    }

    ParsedAnswerKey {
        shape: KeyShape::Empty,
        answers: AnswerKeyMap::new(),
    }
}
