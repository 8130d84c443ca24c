//! Text normalization.
//!
//! This module turns raw page text into the single cleaned document string
//! every later stage reads:
//! - Rebuilding line text from positioned fragments
//! - Removing publisher boilerplate (configurable rules, applied in order)
//! - Normalizing line endings and collapsing whitespace

use anyhow::{Context, Result};
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::LazyLock;

use crate::config::CleaningRule;
use crate::models::{RawPage, TextFragment, YOrigin};

/// Vertical jump that starts a new line in a line-delta stream.
const LINE_DELTA_THRESHOLD: f32 = 5.0;

static LINE_ENDINGS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\r\n?").unwrap());
static HORIZONTAL_SPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^\S\n]+").unwrap());
static BLANK_RUNS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n{3,}").unwrap());

#[derive(Debug, Clone)]
struct CompiledRule {
    name: String,
    regex: Regex,
    replacement: String,
}

/// Compiled cleaning pipeline. Pure: the same input always gives the same output.
#[derive(Debug, Clone)]
pub struct Normalizer {
    rules: Vec<CompiledRule>,
}

impl Normalizer {
    /// Compiles the cleaning rules.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first rule whose pattern is not a valid regex.
    pub fn new(rules: &[CleaningRule]) -> Result<Normalizer> {
        let mut compiled = Vec::with_capacity(rules.len());
        for rule in rules {
            let regex = Regex::new(&rule.pattern)
                .with_context(|| format!("invalid cleaning rule '{}'", rule.name))?;
            compiled.push(CompiledRule {
                name: rule.name.clone(),
                regex: regex,
                replacement: rule.replacement.clone(),
            });
        }
        return Ok(Normalizer { rules: compiled });
    }

    /// Cleans one document string.
    ///
    /// Order: boilerplate rules, line endings to `\n`, horizontal whitespace
    /// runs to one space with every line trimmed, runs of blank lines down to
    /// one, then the whole string trimmed. Line structure is kept so line-start
    /// numbering and option markers still anchor.
    pub fn normalize(&self, text: &str) -> String {
        let mut cleaned = text.to_string();
        for rule in self.rules.iter() {
            let replaced = rule.regex.replace_all(&cleaned, rule.replacement.as_str());
            if replaced != cleaned.as_str() {
                tracing::debug!("cleaning rule '{}' matched", rule.name);
                cleaned = replaced.into_owned();
            }
        }

        let cleaned = LINE_ENDINGS.replace_all(&cleaned, "\n");
        let cleaned = cleaned
            .split('\n')
            .map(|line| HORIZONTAL_SPACE.replace_all(line, " ").trim().to_string())
            .collect::<Vec<String>>()
            .join("\n");
        let cleaned = BLANK_RUNS.replace_all(&cleaned, "\n\n");
        cleaned.trim().to_string()
    }

    /// Joins page texts in page order and cleans the result.
    pub fn normalize_pages(&self, pages: &[String]) -> String {
        self.normalize(&pages.join("\n\n"))
    }
}

/// Rebuilds the text of one page.
///
/// Positioned fragments are grouped by rounded y, groups ordered top to
/// bottom according to `origin`, fragments within a group left to right.
/// Line-delta fragments keep stream order and break lines on vertical jumps
/// larger than five units.
pub fn reconstruct_page_text(page: &RawPage) -> String {
    match page {
        RawPage::Text(text) => text.clone(),
        RawPage::Positioned { fragments, origin } => positioned_text(fragments, *origin),
        RawPage::LineDelta(fragments) => line_delta_text(fragments),
    }
}

fn positioned_text(fragments: &[TextFragment], origin: YOrigin) -> String {
    let mut lines: BTreeMap<i64, Vec<&TextFragment>> = BTreeMap::new();
    for fragment in fragments.iter() {
        lines.entry(fragment.y.round() as i64).or_default().push(fragment);
    }

    let ordered: Vec<Vec<&TextFragment>> = match origin {
        YOrigin::TopLeft => lines.into_values().collect(),
        YOrigin::BottomLeft => lines.into_values().rev().collect(),
    };

    ordered
        .into_iter()
        .map(|mut line| {
            line.sort_by(|a, b| a.x.total_cmp(&b.x));
            join_fragments(&line)
        })
        .filter(|line| !line.is_empty())
        .collect::<Vec<String>>()
        .join("\n")
}

fn line_delta_text(fragments: &[TextFragment]) -> String {
    let mut lines: Vec<Vec<&TextFragment>> = Vec::new();
    let mut last_y: Option<f32> = None;
    for fragment in fragments.iter() {
        let new_line = match last_y {
            Some(y) => (fragment.y - y).abs() > LINE_DELTA_THRESHOLD,
            None => true,
        };
        if new_line {
            lines.push(Vec::new());
        }
        if let Some(line) = lines.last_mut() {
            line.push(fragment);
        }
        last_y = Some(fragment.y);
    }
    lines
        .iter()
        .map(|line| join_fragments(line))
        .filter(|line| !line.is_empty())
        .collect::<Vec<String>>()
        .join("\n")
}

fn join_fragments(fragments: &[&TextFragment]) -> String {
    fragments
        .iter()
        .map(|f| f.text.trim())
        .filter(|t| !t.is_empty())
        .collect::<Vec<&str>>()
        .join(" ")
}
