use serde::{Deserialize, Serialize, Serializer};
use std::collections::BTreeMap;
use strum::{Display, EnumIter, EnumString, IntoEnumIterator};

pub type QuestionNumber = u32;

/// Mapping from question number to the letter of the correct option.
pub type AnswerKeyMap = BTreeMap<QuestionNumber, OptionLetter>;

/// Letter introducing one answer choice. Exams use `A..E` in the common case
/// and up to `J` for extended-option papers.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Display,
    EnumString,
    EnumIter,
    Serialize,
    Deserialize,
)]
pub enum OptionLetter {
    A,
    B,
    C,
    D,
    E,
    F,
    G,
    H,
    I,
    J,
}

impl OptionLetter {
    /// Parses a single letter, ignoring case.
    pub fn from_char(c: char) -> Option<OptionLetter> {
        let upper = c.to_ascii_uppercase();
        OptionLetter::iter().find(|letter| letter.as_char() == upper)
    }

    /// Maps the digit table used by numeric answer keys (`1 -> A` .. `5 -> E`).
    pub fn from_digit(c: char) -> Option<OptionLetter> {
        match c {
            '1' => Some(OptionLetter::A),
            '2' => Some(OptionLetter::B),
            '3' => Some(OptionLetter::C),
            '4' => Some(OptionLetter::D),
            '5' => Some(OptionLetter::E),
            _ => None,
        }
    }

    pub fn as_char(self) -> char {
        (b'A' + self as u8) as char
    }

    /// The letter following this one, `None` after `J`.
    pub fn next(self) -> Option<OptionLetter> {
        OptionLetter::iter().nth(self as usize + 1)
    }
}

/// A piece of page text together with its position on the page.
///
/// # Fields
///
/// * `text` - The text content of the fragment.
/// * `x` - The horizontal coordinate of the fragment's left edge.
/// * `y` - The vertical coordinate of the fragment's line.
#[derive(Debug, Clone, PartialEq)]
pub struct TextFragment {
    pub text: String,
    pub x: f32,
    pub y: f32,
}

impl TextFragment {
    pub fn new(text: &str, x: f32, y: f32) -> TextFragment {
        TextFragment {
            text: text.to_string(),
            x: x,
            y: y,
        }
    }
}

/// Direction of the vertical axis of a positioned page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum YOrigin {
    /// PDF user space: y grows upwards, so the top line has the largest y.
    #[default]
    BottomLeft,
    /// Raster/bbox space: y grows downwards, so the top line has the smallest y.
    TopLeft,
}

/// Raw text of one page as delivered by a page source.
#[derive(Debug, Clone, PartialEq)]
pub enum RawPage {
    /// Already concatenated page text.
    Text(String),
    /// Fragments with absolute positions, grouped into lines by rounded y.
    Positioned {
        fragments: Vec<TextFragment>,
        origin: YOrigin,
    },
    /// Fragments in content-stream order; a vertical jump starts a new line.
    LineDelta(Vec<TextFragment>),
}

/// Option texts of one question, keyed by letter.
///
/// Letters absent from the document read as the empty string.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OptionSet(BTreeMap<OptionLetter, String>);

impl OptionSet {
    pub fn new() -> OptionSet {
        OptionSet(BTreeMap::new())
    }

    pub fn insert(&mut self, letter: OptionLetter, text: String) {
        self.0.insert(letter, text);
    }

    pub fn get(&self, letter: OptionLetter) -> &str {
        self.0.get(&letter).map(|s| s.as_str()).unwrap_or("")
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn letters(&self) -> impl Iterator<Item = OptionLetter> + '_ {
        self.0.keys().copied()
    }

    /// The highest letter present, used to decide between `A..E` and `A..J` columns.
    pub fn last_letter(&self) -> Option<OptionLetter> {
        self.0.keys().next_back().copied()
    }
}

impl Serialize for OptionSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap;
        let mut map = serializer.serialize_map(Some(10))?;
        for letter in OptionLetter::iter() {
            map.serialize_entry(&letter, self.get(letter))?;
        }
        map.end()
    }
}

/// One detected question start.
///
/// # Fields
///
/// * `number` - The question number captured by the numbering pattern.
/// * `start` - Byte offset of the match in the normalized document.
/// * `matched_text` - The text of the numbering token as it appears in the document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuestionCandidate {
    pub number: QuestionNumber,
    pub start: usize,
    pub matched_text: String,
}

/// Slice of the normalized document holding exactly one question.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuestionBlock<'a> {
    pub number: QuestionNumber,
    pub start: usize,
    pub text: &'a str,
}

/// Output of the option extractor for one block, before answer-key join.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedQuestion {
    pub number: QuestionNumber,
    pub statement: String,
    pub options: OptionSet,
    pub likely_has_non_text_content: bool,
    /// Name of the option marker pattern that produced `options`.
    pub option_pattern: Option<String>,
    /// Letter printed after a `Resposta:` / `Gabarito:` / `Answer:` marker inside the block.
    pub inline_answer: Option<OptionLetter>,
}

/// Final structured question, the unit written to the output table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuestionRecord {
    pub number: QuestionNumber,
    pub statement: String,
    pub options: OptionSet,
    #[serde(serialize_with = "serialize_answer")]
    pub correct_answer: Option<OptionLetter>,
    pub likely_has_non_text_content: bool,
}

impl QuestionRecord {
    /// The answer letter, or an empty string when the key has no entry.
    pub fn correct_answer_text(&self) -> String {
        self.correct_answer.map(|l| l.to_string()).unwrap_or_default()
    }
}

fn serialize_answer<S: Serializer>(
    answer: &Option<OptionLetter>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match answer {
        Some(letter) => serializer.collect_str(letter),
        None => serializer.serialize_str(""),
    }
}
