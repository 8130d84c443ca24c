use anyhow::{Context, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::patterns::{
    default_numbering_specs, default_option_specs, NumberingPatternSpec, OptionPatternSpec,
};

pub type PageNumber = usize;

/// A boilerplate pattern removed from raw page text before parsing.
///
/// # Fields
///
/// * `name` - Human readable label, used in logs.
/// * `pattern` - Regular expression matched against the whole document.
/// * `replacement` - Replacement text (usually empty).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleaningRule {
    pub name: String,
    pub pattern: String,
    #[serde(default)]
    pub replacement: String,
}

impl CleaningRule {
    pub fn new(name: &str, pattern: &str) -> CleaningRule {
        CleaningRule {
            name: name.to_string(),
            pattern: pattern.to_string(),
            replacement: String::new(),
        }
    }
}

/// Watermarks, running headers, confidentiality notices and exam codes seen on
/// the publishers this crate was tuned against. Ordered: later rules see text
/// already cleaned by earlier ones.
pub fn default_cleaning_rules() -> Vec<CleaningRule> {
    vec![
        CleaningRule::new("page_marker", r"===\s*PAGE\s+\d+\s*==="),
        CleaningRule::new("watermark_token", r"pcimarkpci\s+[A-Za-z0-9+/=:]+"),
        CleaningRule::new("watermark_site", r"(?i)www\.[a-z]+\.com\.br"),
        CleaningRule::new("running_header", r"(?i)Processo\s+Seletivo.+?PROVA\s+[A-Z]\d+"),
        CleaningRule::new("page_footer_pt", r"(?i)Página\s+\d+\s+de\s+\d+"),
        CleaningRule::new("page_footer_en", r"(?i)Page\s+\d+\s+of\s+\d+"),
        CleaningRule::new("confidential_notice", r"(?i)Confidencial.+?aplicação"),
        CleaningRule::new("exam_code", r"[A-Z]{2,}\d{4}/\d{3}-[A-Z]+"),
    ]
}

/// Terms that usually mean the question refers to a figure, table or chart
/// the text layer cannot carry.
pub fn default_visual_keywords() -> Vec<String> {
    [
        "figure", "image", "picture", "chart", "graph", "table", "diagram", "below", "above",
        "figura", "imagem", "gráfico", "tabela", "quadro", "diagrama", "esquema", "ilustração",
        "foto", "radiografia", "tomografia", "ultrassom", "ecg", "eletrocardiograma",
        "exame de imagem", "a seguir", "abaixo", "acima",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// When the relaxed gap-recovery pass runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum GapRecoveryPolicy {
    /// Only when the assembled count lies strictly between `above` and `below`.
    Band { above: usize, below: usize },
    Always,
    Never,
}

impl Default for GapRecoveryPolicy {
    fn default() -> Self {
        GapRecoveryPolicy::Band {
            above: 50,
            below: 100,
        }
    }
}

impl GapRecoveryPolicy {
    pub fn applies_to(&self, record_count: usize) -> bool {
        match self {
            GapRecoveryPolicy::Band { above, below } => record_count > *above && record_count < *below,
            GapRecoveryPolicy::Always => record_count > 0,
            GapRecoveryPolicy::Never => false,
        }
    }
}

/// OCR fallback settings.
///
/// # Fields
///
/// * `language` - Requested recognition language (tesseract code).
/// * `fallback_language` - Used when `language` is not installed.
/// * `force` - Run OCR even when the text layer looks sufficient.
/// * `min_text_len` - Whole-document trimmed length below which OCR is required.
/// * `dpi` - Resolution pages are rendered at before recognition.
/// * `page_concurrency` - Pages whose text layer is fetched in parallel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrConfig {
    pub language: String,
    pub fallback_language: String,
    pub force: bool,
    pub min_text_len: usize,
    pub dpi: u32,
    pub page_concurrency: usize,
}

impl Default for OcrConfig {
    fn default() -> Self {
        OcrConfig {
            language: "por".to_string(),
            fallback_language: "eng".to_string(),
            force: false,
            min_text_len: 50,
            dpi: 200,
            page_concurrency: 4,
        }
    }
}

/// `ExtractorConfig` is the per-publisher configuration table of the engine.
///
/// The pattern sets and cleaning rules are the only things that vary between
/// exam publishers; they are data, so a profile file can replace or extend
/// them without code changes.
///
/// # Fields
///
/// * `cleaning_rules` - Boilerplate patterns removed before parsing, in order.
/// * `numbering_patterns` - Candidate question numbering conventions.
/// * `option_patterns` - Candidate option marker conventions.
/// * `visual_keywords` - Terms that flag a statement as referring to non-text content.
/// * `min_statement_len` - Statements shorter than this without options are dropped.
/// * `min_option_markers` - Markers a pattern needs before it can win a block.
/// * `gap_recovery` - When the relaxed recovery pass runs.
/// * `ocr` - OCR fallback settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractorConfig {
    pub cleaning_rules: Vec<CleaningRule>,
    pub numbering_patterns: Vec<NumberingPatternSpec>,
    pub option_patterns: Vec<OptionPatternSpec>,
    pub visual_keywords: Vec<String>,
    pub min_statement_len: usize,
    pub min_option_markers: usize,
    pub gap_recovery: GapRecoveryPolicy,
    pub ocr: OcrConfig,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        ExtractorConfig::new()
    }
}

impl ExtractorConfig {
    /// Creates a new `ExtractorConfig` with the built-in tables.
    ///
    /// # Returns
    ///
    /// A configuration with every built-in numbering and option pattern,
    /// the default cleaning rules and keyword list, a minimum statement length
    /// of 20 characters and gap recovery limited to the 50-100 band.
    pub fn new() -> ExtractorConfig {
        ExtractorConfig {
            cleaning_rules: default_cleaning_rules(),
            numbering_patterns: default_numbering_specs(),
            option_patterns: default_option_specs(),
            visual_keywords: default_visual_keywords(),
            min_statement_len: 20,
            min_option_markers: 3,
            gap_recovery: GapRecoveryPolicy::default(),
            ocr: OcrConfig::default(),
        }
    }

    /// Loads a publisher profile. Fields missing from the file keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not a valid profile.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<ExtractorConfig> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read profile {}", path.display()))?;
        let config = serde_json::from_str(&text)
            .with_context(|| format!("invalid profile {}", path.display()))?;
        return Ok(config);
    }
}

/// Temporary files belonging to one PDF run.
///
/// # Fields
///
/// * `pdf_path` - Local copy of the PDF document.
/// * `work_dir` - Directory holding per-page text and rendered images.
#[derive(Debug, Clone, PartialEq)]
pub struct PdfWorkspace {
    pub pdf_path: PathBuf,
    pub work_dir: PathBuf,
}

impl PdfWorkspace {
    /// Creates a workspace under the system temp directory with a random stem.
    pub fn new() -> PdfWorkspace {
        let mut rng = rand::rng();
        let random_value = rng.random_range(10000..99999);
        let tmp = std::env::temp_dir();
        PdfWorkspace {
            pdf_path: tmp.join(format!("exam_{}.pdf", random_value)),
            work_dir: tmp.join(format!("exam_{}", random_value)),
        }
    }

    /// Path of the bbox HTML written by `pdftotext` for one page.
    pub fn page_text_path(&self, page: PageNumber) -> PathBuf {
        self.work_dir.join(format!("page-{}.html", page))
    }

    /// Path prefix handed to `pdftocairo`; it appends the image extension itself.
    pub fn page_image_prefix(&self, page: PageNumber) -> PathBuf {
        self.work_dir.join(format!("page-{}", page))
    }

    pub fn page_image_path(&self, page: PageNumber) -> PathBuf {
        self.work_dir.join(format!("page-{}.png", page))
    }

    /// Removes the PDF copy and everything under `work_dir`.
    ///
    /// # Errors
    ///
    /// This function will return an error if any of the file removal operations fail.
    pub fn clean_files(&self) -> Result<()> {
        if self.pdf_path.exists() {
            std::fs::remove_file(&self.pdf_path)?;
        }
        if self.work_dir.exists() {
            std::fs::remove_dir_all(&self.work_dir)?;
        }
        return Ok(());
    }
}

impl Default for PdfWorkspace {
    fn default() -> Self {
        PdfWorkspace::new()
    }
}
