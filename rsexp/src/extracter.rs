use anyhow::{anyhow, Result};
use regex::Regex;
use std::sync::LazyLock;

use crate::models::{ExtractedQuestion, OptionLetter, OptionSet, QuestionBlock};
use crate::patterns::{OptionMarker, OptionMarkerPattern};

/// Numbering token at the head of a block, in any of the supported styles.
static LEADING_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^\s*(?:quest(?:ão|ao|ion)\s*\d{1,3}\s*[.):\-–]?|Q\d{1,3}|\{\d{1,3}\}\s*[.)]?|\[\d{1,3}\]\s*[.)]?|\d{1,3}\s*[.)\]}\-–])\s*",
    )
    .unwrap()
});

/// `Resposta: B`, `Gabarito: C`, `Answer: D` closing a line inside a block.
static ANSWER_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?im)(?:^|[ \t])(?:resposta(?:[ \t]+correta)?|gabarito|answer)[ \t]*:[ \t]*\(?([A-J])[.)]?[ \t]*$",
    )
    .unwrap()
});

/// Removes the numbering token (and the whitespace after it) from the start of a block.
pub fn strip_leading_marker(text: &str) -> &str {
    match LEADING_MARKER.find(text) {
        Some(m) => &text[m.end()..],
        None => text.trim_start(),
    }
}

/// Collapses every whitespace run, newlines included, to one space.
pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<&str>>().join(" ")
}

/// Cuts an in-block answer marker and everything after it.
///
/// # Returns
///
/// The content before the marker and the marker's letter, or `text`
/// unchanged and `None` when the block carries no marker.
pub fn split_answer_marker(text: &str) -> (&str, Option<OptionLetter>) {
    let Some(caps) = ANSWER_MARKER.captures(text) else {
        return (text, None);
    };
    let Some(whole) = caps.get(0) else {
        return (text, None);
    };
    let letter = caps[1].chars().next().and_then(OptionLetter::from_char);
    (text[..whole.start()].trim_end(), letter)
}

/// Longest run of markers reading `A, B, C, ...` in document order.
///
/// Each `A` starts a chain that greedily takes the next expected letter;
/// markers with other letters are skipped. The earliest chain wins ties.
pub fn sequential_chain(markers: &[OptionMarker]) -> Vec<OptionMarker> {
    let mut best: Vec<OptionMarker> = Vec::new();
    for (i, first) in markers.iter().enumerate() {
        if first.letter != OptionLetter::A {
            continue;
        }
        let mut chain = vec![*first];
        let mut expected = OptionLetter::A.next();
        for marker in markers[i + 1..].iter() {
            match expected {
                Some(letter) if marker.letter == letter => {
                    chain.push(*marker);
                    expected = letter.next();
                }
                Some(_) => {}
                None => break,
            }
        }
        if chain.len() > best.len() {
            best = chain;
        }
    }
    best
}

/// Builds a case-insensitive whole-word matcher for the visual-reference keywords.
pub fn keyword_regex(keywords: &[String]) -> Result<Option<Regex>> {
    let alternatives: Vec<String> = keywords
        .iter()
        .map(|k| k.trim())
        .filter(|k| !k.is_empty())
        .map(regex::escape)
        .collect();
    if alternatives.is_empty() {
        return Ok(None);
    }
    let regex = Regex::new(&format!(r"(?i)\b(?:{})\b", alternatives.join("|")))?;
    return Ok(Some(regex));
}

/// Per-block statement and option extraction.
///
/// Option marker styles are tried in priority order and the first one with
/// enough markers forming an `A, B, C, ...` run wins. The choice is made per
/// block, so one exam can mix styles.
///
/// # Fields
///
/// * `patterns` - Option marker patterns, sorted by priority.
/// * `min_markers` - Markers (and run length) a pattern needs to qualify.
/// * `visual_keywords` - Matcher flagging statements that refer to figures or tables.
#[derive(Debug, Clone)]
pub struct OptionExtractor {
    patterns: Vec<OptionMarkerPattern>,
    min_markers: usize,
    visual_keywords: Option<Regex>,
}

impl OptionExtractor {
    pub fn new(
        patterns: Vec<OptionMarkerPattern>,
        min_markers: usize,
        visual_keywords: Option<Regex>,
    ) -> OptionExtractor {
        OptionExtractor {
            patterns: patterns,
            min_markers: min_markers.max(1),
            visual_keywords: visual_keywords,
        }
    }

    pub fn mentions_visual_content(&self, statement: &str) -> bool {
        match &self.visual_keywords {
            Some(regex) => regex.is_match(statement),
            None => false,
        }
    }

    /// The first pattern, by priority, that qualifies on `content`.
    fn select_markers(&self, content: &str) -> Option<(&OptionMarkerPattern, Vec<OptionMarker>)> {
        for pattern in self.patterns.iter() {
            let markers = pattern.markers(content);
            if markers.len() < self.min_markers {
                continue;
            }
            let chain = sequential_chain(&markers);
            if chain.len() >= self.min_markers {
                return Some((pattern, chain));
            }
        }
        None
    }

    /// Extracts statement and options from one block.
    ///
    /// # Arguments
    ///
    /// * `block` - The question block, starting at its numbering token.
    ///
    /// # Returns
    ///
    /// `Ok(None)` when nothing remains after the numbering token is stripped.
    /// Without a qualifying option pattern the whole remainder becomes the
    /// statement and the question is flagged as likely referring to non-text
    /// content.
    pub fn extract(&self, block: &QuestionBlock) -> Result<Option<ExtractedQuestion>> {
        let body = strip_leading_marker(block.text).trim_end();
        let (content, inline_answer) = split_answer_marker(body);
        if content.trim().is_empty() {
            return Ok(None);
        }

        let Some((pattern, chain)) = self.select_markers(content) else {
            let statement = collapse_whitespace(content);
            return Ok(Some(ExtractedQuestion {
                number: block.number,
                statement: statement,
                options: OptionSet::new(),
                likely_has_non_text_content: true,
                option_pattern: None,
                inline_answer: inline_answer,
            }));
        };

        let slice = |start: usize, end: usize| -> Result<&str> {
            content.get(start..end).ok_or_else(|| {
                anyhow!("question {}: option offsets {}..{} out of range", block.number, start, end)
            })
        };

        let statement = collapse_whitespace(slice(0, chain[0].start)?);
        let mut options = OptionSet::new();
        for (k, marker) in chain.iter().enumerate() {
            let end = chain.get(k + 1).map(|next| next.start).unwrap_or(content.len());
            options.insert(marker.letter, collapse_whitespace(slice(marker.end, end)?));
        }

        let flagged = self.mentions_visual_content(&statement);
        return Ok(Some(ExtractedQuestion {
            number: block.number,
            statement: statement,
            options: options,
            likely_has_non_text_content: flagged,
            option_pattern: Some(pattern.name.clone()),
            inline_answer: inline_answer,
        }));
    }
}
