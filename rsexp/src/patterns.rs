//! Numbering and option-marker pattern tables.
//!
//! Every exam layout the engine understands is one entry in these tables.
//! The built-in entries come from [`NumberingStyle`] and [`OptionStyle`];
//! publisher profiles append their own entries as plain data
//! ([`NumberingPatternSpec`], [`OptionPatternSpec`]) which are compiled here.

use anyhow::{anyhow, Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use strum::{Display, EnumIter, IntoEnumIterator};

use crate::models::{OptionLetter, QuestionCandidate, QuestionNumber};

/// Built-in question numbering conventions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
#[strum(serialize_all = "snake_case")]
pub enum NumberingStyle {
    /// `{12}`
    Braces,
    /// `12.` at line start
    DotLineStart,
    /// `QUESTÃO 12`, `Questão 12`, `Question 12`
    Keyword,
    /// `12)` at line start
    ParenLineStart,
    /// `Q12`
    QPrefix,
    /// `[12]`
    Brackets,
}

impl NumberingStyle {
    pub fn spec(&self) -> NumberingPatternSpec {
        let (regex, base_confidence, min_trailing_chars) = match self {
            NumberingStyle::Braces => (r"\{(\d{1,3})\}", 0.95, 0),
            NumberingStyle::DotLineStart => (r"(?m)^[ \t]*(\d{1,3})\.\s+", 0.9, 20),
            NumberingStyle::Keyword => (r"(?im)^[ \t]*quest(?:ão|ao|ion)\s*(\d{1,3})", 0.95, 0),
            NumberingStyle::ParenLineStart => (r"(?m)^[ \t]*(\d{1,3})\)\s+", 0.85, 20),
            NumberingStyle::QPrefix => (r"(?im)^[ \t]*Q(\d{1,3})\s+", 0.9, 0),
            NumberingStyle::Brackets => (r"\[(\d{1,3})\]", 0.85, 0),
        };
        NumberingPatternSpec {
            name: self.to_string(),
            regex: regex.to_string(),
            base_confidence: base_confidence,
            validator: NumberValidator {
                min: 1,
                max: 200,
                min_trailing_chars: min_trailing_chars,
            },
        }
    }
}

pub fn default_numbering_specs() -> Vec<NumberingPatternSpec> {
    NumberingStyle::iter().map(|style| style.spec()).collect()
}

/// Built-in answer option markers, in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
#[strum(serialize_all = "snake_case")]
pub enum OptionStyle {
    /// `(A)`
    Parenthesized,
    /// `A)` at line start
    ParenLineStart,
    /// `A.` at line start
    DotLineStart,
    /// `[A]`
    Bracketed,
    /// `A -` or `A –` at line start
    DashLineStart,
}

impl OptionStyle {
    pub fn spec(&self) -> OptionPatternSpec {
        let (regex, priority) = match self {
            OptionStyle::Parenthesized => (r"\(([A-J])\)\s*", 1),
            OptionStyle::ParenLineStart => (r"(?m)^[ \t]*([A-J])\)\s*", 2),
            OptionStyle::DotLineStart => (r"(?m)^[ \t]*([A-J])\.\s*", 3),
            OptionStyle::Bracketed => (r"\[([A-J])\]\s*", 4),
            OptionStyle::DashLineStart => (r"(?m)^[ \t]*([A-J])[ \t]*[-–][ \t]*", 5),
        };
        OptionPatternSpec {
            name: self.to_string(),
            regex: regex.to_string(),
            priority: priority,
        }
    }
}

pub fn default_option_specs() -> Vec<OptionPatternSpec> {
    OptionStyle::iter().map(|style| style.spec()).collect()
}

/// Bounds check applied to every captured question number.
///
/// # Fields
///
/// * `min` - Smallest accepted question number.
/// * `max` - Largest accepted question number.
/// * `min_trailing_chars` - Non-whitespace characters that must follow the marker
///   in the document (0 disables the check).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NumberValidator {
    pub min: QuestionNumber,
    pub max: QuestionNumber,
    #[serde(default)]
    pub min_trailing_chars: usize,
}

impl NumberValidator {
    pub fn validate(&self, number: QuestionNumber, trailing: &str) -> bool {
        if number < self.min || number > self.max {
            return false;
        }
        if self.min_trailing_chars == 0 {
            return true;
        }
        let present = trailing
            .chars()
            .filter(|c| !c.is_whitespace())
            .take(self.min_trailing_chars)
            .count();
        present >= self.min_trailing_chars
    }
}

/// Serializable description of a numbering pattern.
///
/// The regex must capture the question number in group 1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NumberingPatternSpec {
    pub name: String,
    pub regex: String,
    pub base_confidence: f64,
    pub validator: NumberValidator,
}

/// Serializable description of an option marker pattern.
///
/// The regex must capture the option letter in group 1.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionPatternSpec {
    pub name: String,
    pub regex: String,
    pub priority: u8,
}

fn compile_with_group(name: &str, pattern: &str) -> Result<Regex> {
    let regex = Regex::new(pattern).with_context(|| format!("invalid regex in pattern '{}'", name))?;
    if regex.captures_len() < 2 {
        return Err(anyhow!("pattern '{}' has no capture group", name));
    }
    Ok(regex)
}

/// `N.` at line start, bounds check only; the fallback and loose-pass pattern.
pub static GENERIC_PATTERN: LazyLock<NumberingPattern> = LazyLock::new(|| {
    let spec = NumberingStyle::DotLineStart.spec();
    NumberingPattern {
        name: "generic".to_string(),
        base_confidence: 0.5,
        validator: NumberValidator {
            min_trailing_chars: 0,
            ..spec.validator
        },
        regex: Regex::new(&spec.regex).unwrap(),
    }
});

/// A compiled numbering convention.
#[derive(Debug, Clone)]
pub struct NumberingPattern {
    pub name: String,
    pub base_confidence: f64,
    pub validator: NumberValidator,
    regex: Regex,
}

impl NumberingPattern {
    pub fn compile(spec: &NumberingPatternSpec) -> Result<NumberingPattern> {
        Ok(NumberingPattern {
            name: spec.name.clone(),
            base_confidence: spec.base_confidence,
            validator: spec.validator.clone(),
            regex: compile_with_group(&spec.name, &spec.regex)?,
        })
    }

    /// The fallback used when no pattern validates anything: `number + period`
    /// at line start, bounds check only.
    pub fn generic() -> NumberingPattern {
        GENERIC_PATTERN.clone()
    }

    /// Runs the expression over `text` and returns every match whose number
    /// parses, in document order. Each call scans from the start of `text`.
    pub fn detect(&self, text: &str) -> Vec<QuestionCandidate> {
        self.regex
            .captures_iter(text)
            .filter_map(|caps| {
                let whole = caps.get(0)?;
                let number = caps.get(1)?.as_str().parse::<QuestionNumber>().ok()?;
                Some(QuestionCandidate {
                    number: number,
                    start: whole.start(),
                    matched_text: whole.as_str().to_string(),
                })
            })
            .collect()
    }

    /// Like [`NumberingPattern::detect`], keeping only matches the validator accepts.
    pub fn detect_validated(&self, text: &str) -> Vec<QuestionCandidate> {
        self.detect(text)
            .into_iter()
            .filter(|c| {
                let trailing = text.get(c.start + c.matched_text.len()..).unwrap_or("");
                self.validator.validate(c.number, trailing)
            })
            .collect()
    }
}

/// One option marker occurrence inside a question block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OptionMarker {
    pub letter: OptionLetter,
    /// Offset of the marker's first character.
    pub start: usize,
    /// Offset just past the marker (and the whitespace it swallows).
    pub end: usize,
}

/// A compiled option marker convention.
#[derive(Debug, Clone)]
pub struct OptionMarkerPattern {
    pub name: String,
    pub priority: u8,
    regex: Regex,
}

impl OptionMarkerPattern {
    pub fn compile(spec: &OptionPatternSpec) -> Result<OptionMarkerPattern> {
        Ok(OptionMarkerPattern {
            name: spec.name.clone(),
            priority: spec.priority,
            regex: compile_with_group(&spec.name, &spec.regex)?,
        })
    }

    pub fn markers(&self, text: &str) -> Vec<OptionMarker> {
        self.regex
            .captures_iter(text)
            .filter_map(|caps| {
                let whole = caps.get(0)?;
                let letter = caps.get(1)?.as_str().chars().next().and_then(OptionLetter::from_char)?;
                Some(OptionMarker {
                    letter: letter,
                    start: whole.start(),
                    end: whole.end(),
                })
            })
            .collect()
    }
}

/// Compiles option specs and orders them by declared priority (stable for ties).
pub fn compile_option_patterns(specs: &[OptionPatternSpec]) -> Result<Vec<OptionMarkerPattern>> {
    let mut patterns = specs
        .iter()
        .map(OptionMarkerPattern::compile)
        .collect::<Result<Vec<_>>>()?;
    patterns.sort_by_key(|p| p.priority);
    Ok(patterns)
}

pub fn compile_numbering_patterns(specs: &[NumberingPatternSpec]) -> Result<Vec<NumberingPattern>> {
    specs.iter().map(NumberingPattern::compile).collect()
}
