use serde::Serialize;
use std::collections::BTreeSet;

use crate::answer_key::{parse_answer_key, KeyShape};
use crate::assembler::{assemble, ExtractionStats};
use crate::cleaner::Normalizer;
use crate::config::ExtractorConfig;
use crate::converter::{acquire_pages, PageSource, PopplerPageSource};
use crate::detector::{detect_format, FormatDecision};
use crate::error::PipelineError;
use crate::events::{CancelToken, PipelineObserver, Recorder, Stage, WarningKind};
use crate::extracter::{keyword_regex, OptionExtractor};
use crate::models::{ExtractedQuestion, QuestionBlock, QuestionNumber, QuestionRecord};
use crate::ocr::{resolve_language, OcrEngine, TesseractOcr};
use crate::patterns::{compile_numbering_patterns, compile_option_patterns, NumberingPattern};
use crate::recovery::recover_gaps;
use crate::segmenter::{segment, segment_loose};

/// The numbering format chosen for a document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FormatSummary {
    pub name: String,
    pub confidence: f64,
    pub numbers_detected: usize,
    pub is_fallback: bool,
}

impl From<&FormatDecision> for FormatSummary {
    fn from(decision: &FormatDecision) -> Self {
        FormatSummary {
            name: decision.pattern.name.clone(),
            confidence: decision.confidence,
            numbers_detected: decision.numbers.len(),
            is_fallback: decision.is_fallback,
        }
    }
}

/// Everything a completed run produces.
///
/// # Fields
///
/// * `records` - Questions sorted by number, numbers unique.
/// * `format` - The numbering format the document was segmented with.
/// * `answer_key_shape` - How the answer key was read.
/// * `warnings` - Every recoverable problem met during the run, in order.
/// * `missing_numbers` - Numbers below the highest output number absent from `records`.
/// * `used_ocr` - Whether page text came from OCR.
/// * `stats` - Summary statistics of `records`.
#[derive(Debug, Clone)]
pub struct ExtractionResult {
    pub records: Vec<QuestionRecord>,
    pub format: FormatSummary,
    pub answer_key_shape: KeyShape,
    pub warnings: Vec<crate::events::Warning>,
    pub missing_numbers: Vec<QuestionNumber>,
    pub used_ocr: bool,
    pub stats: ExtractionStats,
}

/// The question extraction engine, compiled from one [`ExtractorConfig`].
///
/// Holds no per-run state, so one parser can process any number of documents.
#[derive(Debug, Clone)]
pub struct ExamParser {
    config: ExtractorConfig,
    normalizer: Normalizer,
    numbering: Vec<NumberingPattern>,
    extractor: OptionExtractor,
}

impl ExamParser {
    /// Compiles every pattern of `config`.
    ///
    /// # Errors
    ///
    /// `PipelineError::Config` when a cleaning rule, numbering pattern,
    /// option pattern or keyword does not compile.
    pub fn new(config: ExtractorConfig) -> Result<ExamParser, PipelineError> {
        let normalizer = Normalizer::new(&config.cleaning_rules).map_err(PipelineError::Config)?;
        let numbering =
            compile_numbering_patterns(&config.numbering_patterns).map_err(PipelineError::Config)?;
        let options = compile_option_patterns(&config.option_patterns).map_err(PipelineError::Config)?;
        let keywords = keyword_regex(&config.visual_keywords).map_err(PipelineError::Config)?;
        let extractor = OptionExtractor::new(options, config.min_option_markers, keywords);
        Ok(ExamParser {
            config: config,
            normalizer: normalizer,
            numbering: numbering,
            extractor: extractor,
        })
    }

    pub fn config(&self) -> &ExtractorConfig {
        &self.config
    }

    /// Runs the parsing stages over text that is already in memory.
    ///
    /// # Arguments
    ///
    /// * `text` - Raw document text; it is normalized first.
    /// * `answer_key` - The answer key as pasted by the user (may be empty).
    /// * `observer` - Receives progress and warnings.
    /// * `cancel` - Checked between stages.
    ///
    /// # Returns
    ///
    /// The full result, or an error when the text is empty or the run was
    /// cancelled. Zero detected questions is a successful, empty result.
    pub fn extract_text(
        &self,
        text: &str,
        answer_key: &str,
        observer: &dyn PipelineObserver,
        cancel: &CancelToken,
    ) -> Result<ExtractionResult, PipelineError> {
        let mut recorder = Recorder::new(observer);
        self.run(&[text.to_string()], answer_key, &mut recorder, cancel, false)
    }

    /// Like [`ExamParser::extract_text`] for text split into pages.
    pub fn extract_pages(
        &self,
        pages: &[String],
        answer_key: &str,
        observer: &dyn PipelineObserver,
        cancel: &CancelToken,
    ) -> Result<ExtractionResult, PipelineError> {
        let mut recorder = Recorder::new(observer);
        self.run(pages, answer_key, &mut recorder, cancel, false)
    }

    /// Reads every page of `source`, falls back to OCR when the text layer
    /// is insufficient, then runs the parsing stages.
    ///
    /// # Arguments
    ///
    /// * `source` - Page text provider.
    /// * `ocr` - OCR engine; `None` disables the fallback.
    /// * `answer_key` - The answer key as pasted by the user.
    /// * `observer` - Receives progress and warnings.
    /// * `cancel` - Checked between stages and between OCR pages.
    ///
    /// # Errors
    ///
    /// `Acquisition` when pages cannot be read, `NoText` when neither the
    /// text layer nor OCR produced anything, `Cancelled` on cancellation.
    pub async fn parse_source(
        &self,
        source: &dyn PageSource,
        ocr: Option<&dyn OcrEngine>,
        answer_key: &str,
        observer: &dyn PipelineObserver,
        cancel: &CancelToken,
    ) -> Result<ExtractionResult, PipelineError> {
        let mut recorder = Recorder::new(observer);
        recorder.progress(Stage::Acquiring, &format!("reading {} pages", source.page_count()));

        let mut pages = acquire_pages(source, self.config.ocr.page_concurrency)
            .await
            .map_err(|e| {
                recorder.progress(Stage::Failed, &e.to_string());
                PipelineError::Acquisition(e)
            })?;
        cancel.check(Stage::Acquiring)?;

        let text_len: usize = pages.iter().map(|p| p.trim().chars().count()).sum();
        let insufficient = text_len < self.config.ocr.min_text_len;
        let mut used_ocr = false;
        if insufficient || self.config.ocr.force {
            if insufficient {
                recorder.warn(
                    WarningKind::InsufficientText,
                    format!(
                        "text layer has {} characters, below the {} required",
                        text_len, self.config.ocr.min_text_len
                    ),
                );
            }
            match ocr {
                Some(engine) => {
                    if let Some(recognized) = self.recognize_pages(source, engine, &mut recorder, cancel).await? {
                        pages = recognized;
                        used_ocr = true;
                    }
                }
                None => recorder.warn(WarningKind::OcrFailed, "no OCR engine available"),
            }
        }

        self.run(&pages, answer_key, &mut recorder, cancel, used_ocr)
    }

    /// Recognizes pages one at a time, in page order.
    ///
    /// Engine failures become an `OcrFailed` warning and `Ok(None)`; only
    /// cancellation is an error.
    async fn recognize_pages(
        &self,
        source: &dyn PageSource,
        engine: &dyn OcrEngine,
        recorder: &mut Recorder<'_>,
        cancel: &CancelToken,
    ) -> Result<Option<Vec<String>>, PipelineError> {
        let ocr = &self.config.ocr;
        let language = match resolve_language(engine, &ocr.language, &ocr.fallback_language).await {
            Ok((language, fell_back)) => {
                if fell_back {
                    recorder.warn(
                        WarningKind::OcrLanguageUnavailable,
                        format!("language '{}' unavailable, using '{}'", ocr.language, language),
                    );
                }
                language
            }
            Err(e) => {
                recorder.warn(WarningKind::OcrFailed, format!("no usable OCR language: {}", e));
                return Ok(None);
            }
        };

        let count = source.page_count();
        let mut pages = Vec::with_capacity(count);
        for page in 1..=count {
            cancel.check(Stage::Recognizing)?;
            recorder.progress(Stage::Recognizing, &format!("page {}/{}", page, count));
            let recognized = match source.render_page(page, ocr.dpi).await {
                Ok(image) => engine.recognize(&image, &language).await,
                Err(e) => Err(e),
            };
            match recognized {
                Ok(text) => pages.push(text),
                Err(e) => {
                    recorder.warn(WarningKind::OcrFailed, format!("page {}: {}", page, e));
                    return Ok(None);
                }
            }
        }

        if pages.iter().all(|p| p.trim().is_empty()) {
            recorder.warn(WarningKind::OcrFailed, "OCR produced no text");
            return Ok(None);
        }
        return Ok(Some(pages));
    }

    fn extract_blocks(&self, blocks: &[QuestionBlock], recorder: &mut Recorder) -> Vec<ExtractedQuestion> {
        let mut extracted = Vec::with_capacity(blocks.len());
        for block in blocks.iter() {
            match self.extractor.extract(block) {
                Ok(Some(question)) => extracted.push(question),
                Ok(None) => tracing::debug!("question {} has no content", block.number),
                Err(e) => recorder.warn(
                    WarningKind::PerQuestionParseFailure,
                    format!("question {} skipped: {}", block.number, e),
                ),
            }
        }
        extracted
    }

    fn run(
        &self,
        pages: &[String],
        answer_key: &str,
        recorder: &mut Recorder,
        cancel: &CancelToken,
        used_ocr: bool,
    ) -> Result<ExtractionResult, PipelineError> {
        cancel.check(Stage::Normalizing)?;
        recorder.progress(Stage::Normalizing, &format!("{} pages", pages.len()));
        let text = self.normalizer.normalize_pages(pages);
        if text.is_empty() {
            let err = PipelineError::NoText;
            recorder.progress(Stage::Failed, &err.to_string());
            return Err(err);
        }

        cancel.check(Stage::FormatDetecting)?;
        let decision = detect_format(&text, &self.numbering);
        recorder.progress(
            Stage::FormatDetecting,
            &format!("'{}' (confidence {:.3})", decision.pattern.name, decision.confidence),
        );
        if decision.is_fallback {
            recorder.warn(WarningKind::NoFormatMatch, "no numbering pattern matched; using 'N.' at line start");
        }

        cancel.check(Stage::Segmenting)?;
        let blocks = segment(&text, &decision.pattern);
        recorder.progress(Stage::Segmenting, &format!("{} question blocks", blocks.len()));

        cancel.check(Stage::Extracting)?;
        let mut extracted = self.extract_blocks(&blocks, recorder);
        recorder.progress(Stage::Extracting, &format!("{} questions extracted", extracted.len()));

        cancel.check(Stage::KeyParsing)?;
        let key = parse_answer_key(answer_key);
        recorder.progress(Stage::KeyParsing, &format!("{} answers ({})", key.answers.len(), key.shape));
        if key.is_empty() {
            recorder.warn(WarningKind::MalformedAnswerKey, "answer key has no readable entry");
        }

        cancel.check(Stage::Assembling)?;
        let min_len = self.config.min_statement_len;
        let mut records = assemble(extracted.clone(), &key.answers, min_len);
        if records.is_empty() {
            let loose_blocks = segment_loose(&text);
            recorder.progress(
                Stage::Segmenting,
                &format!("primary pass found nothing; loose pass found {} blocks", loose_blocks.len()),
            );
            let loose = self.extract_blocks(&loose_blocks, recorder);
            records = assemble(loose.clone(), &key.answers, min_len);
            extracted = loose;
        }
        recorder.progress(Stage::Assembling, &format!("{} records", records.len()));
        if records.is_empty() {
            recorder.warn(WarningKind::ZeroQuestionsDetected, "no questions detected");
        }

        cancel.check(Stage::GapRecovering)?;
        if self.config.gap_recovery.applies_to(records.len()) {
            recorder.progress(Stage::GapRecovering, &format!("{} records before recovery", records.len()));
            match recover_gaps(&text, &mut records, &self.extractor, &key.answers, min_len) {
                Ok(outcome) => {
                    for question in outcome.recovered.iter() {
                        recorder.progress(Stage::Extracting, &format!("recovered question {}", question.number));
                    }
                    for (number, reason) in outcome.failures.iter() {
                        recorder.warn(
                            WarningKind::PerQuestionParseFailure,
                            format!("question {} skipped during recovery: {}", number, reason),
                        );
                    }
                    extracted.extend(outcome.recovered);
                }
                Err(e) => recorder.warn(WarningKind::PerQuestionParseFailure, format!("gap recovery failed: {}", e)),
            }
        }

        let missing_numbers = missing_numbers(&records);
        if !missing_numbers.is_empty() {
            recorder.warn(
                WarningKind::MissingQuestion,
                format!(
                    "questions not found: {}",
                    missing_numbers.iter().map(|n| n.to_string()).collect::<Vec<String>>().join(", ")
                ),
            );
        }

        cancel.check(Stage::Done)?;
        let stats = ExtractionStats::compute(&records, &extracted);
        recorder.progress(
            Stage::Done,
            &format!("{} questions, {} with answers, {} flagged", stats.total, stats.with_answer, stats.flagged),
        );

        return Ok(ExtractionResult {
            records: records,
            format: FormatSummary::from(&decision),
            answer_key_shape: key.shape,
            warnings: recorder.warnings.clone(),
            missing_numbers: missing_numbers,
            used_ocr: used_ocr,
            stats: stats,
        });
    }
}

/// Numbers in `1..=max` absent from `records`.
pub fn missing_numbers(records: &[QuestionRecord]) -> Vec<QuestionNumber> {
    let present: BTreeSet<QuestionNumber> = records.iter().map(|r| r.number).collect();
    match present.iter().next_back() {
        Some(&max) => (1..=max).filter(|n| !present.contains(n)).collect(),
        None => Vec::new(),
    }
}

/// Extracts the questions of a PDF file or URL.
///
/// The document is read with poppler, recognized with tesseract when its text
/// layer is insufficient, and its temporary files are removed afterwards.
///
/// # Arguments
///
/// * `path_or_url` - Local path or `http(s)` URL of the PDF.
/// * `answer_key` - The answer key as pasted by the user.
/// * `config` - Publisher configuration.
/// * `observer` - Receives progress and warnings.
/// * `cancel` - Aborts the run between stages.
pub async fn parse(
    path_or_url: &str,
    answer_key: &str,
    config: &ExtractorConfig,
    observer: &dyn PipelineObserver,
    cancel: &CancelToken,
) -> Result<ExtractionResult, PipelineError> {
    let time = std::time::Instant::now();
    let parser = ExamParser::new(config.clone())?;
    observer.on_progress(Stage::Acquiring, &format!("opening {}", path_or_url));
    let source = PopplerPageSource::open(path_or_url).await.map_err(|e| {
        observer.on_progress(Stage::Failed, &e.to_string());
        PipelineError::Acquisition(e)
    })?;

    let ocr = TesseractOcr::default();
    let result = parser.parse_source(&source, Some(&ocr), answer_key, observer, cancel).await;
    if let Err(e) = source.close() {
        tracing::warn!("cannot remove temporary files: {}", e);
    }
    tracing::info!("Parsed {} in {:.2}s", path_or_url, time.elapsed().as_secs_f64());
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GapRecoveryPolicy;
    use crate::converter::TextPageSource;
    use crate::events::{SilentObserver, TracingObserver, Warning};
    use crate::models::{OptionLetter, RawPage};
    use crate::test_utils::{generate_answer_key, generate_exam, BuiltinExam};
    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use std::path::{Path, PathBuf};
    use std::sync::Mutex;
    use strum::IntoEnumIterator;

    fn parser() -> ExamParser {
        ExamParser::new(ExtractorConfig::new()).unwrap()
    }

    fn run(text: &str, key: &str) -> ExtractionResult {
        parser().extract_text(text, key, &TracingObserver, &CancelToken::new()).unwrap()
    }

    fn kinds(warnings: &[Warning]) -> Vec<WarningKind> {
        warnings.iter().map(|w| w.kind).collect()
    }

    #[test_log::test]
    fn test_two_question_scenario() {
        let exam = BuiltinExam::ArithmeticAndSky;
        let result = run(exam.text(), exam.answer_key());
        assert_eq!(result.records.len(), 2);

        let first = &result.records[0];
        assert_eq!(first.number, 1);
        assert_eq!(first.statement, "What is 2+2?");
        assert_eq!(first.options.get(OptionLetter::A), "3");
        assert_eq!(first.options.get(OptionLetter::B), "4");
        assert_eq!(first.options.get(OptionLetter::C), "5");
        assert_eq!(first.correct_answer, Some(OptionLetter::B));
        assert!(!first.likely_has_non_text_content);

        let second = &result.records[1];
        assert_eq!(second.number, 2);
        assert_eq!(second.statement, "What color is the sky?");
        assert_eq!(second.options.get(OptionLetter::A), "Red");
        assert_eq!(second.options.get(OptionLetter::B), "Blue");
        assert_eq!(second.options.get(OptionLetter::C), "Green");
        assert_eq!(second.correct_answer, Some(OptionLetter::B));
        assert!(!second.likely_has_non_text_content);

        assert_eq!(result.format.name, "dot_line_start");
        assert!(result.warnings.is_empty());
        assert!(result.missing_numbers.is_empty());
    }

    #[test_log::test]
    fn test_builtin_exams() {
        for exam in BuiltinExam::iter() {
            let result = run(exam.text(), exam.answer_key());
            assert_eq!(result.records.len(), exam.expected_count(), "{}", exam);
            for record in result.records.iter() {
                assert!(record.correct_answer.is_some(), "{} question {}", exam, record.number);
            }
        }
    }

    #[test_log::test]
    fn test_boilerplate_and_figure_flag() {
        let exam = BuiltinExam::BracesWithBoilerplate;
        let result = run(exam.text(), exam.answer_key());
        assert_eq!(result.format.name, "braces");
        let all_text: String = result.records.iter().map(|r| r.statement.clone()).collect();
        assert!(!all_text.contains("pcimarkpci"));
        assert!(!all_text.contains("Página"));
        assert!(!result.records[0].likely_has_non_text_content);
        assert!(result.records[1].likely_has_non_text_content);
        assert_eq!(result.records[2].options.get(OptionLetter::E), "Colistina");
        assert_eq!(result.answer_key_shape, KeyShape::NumberedPairs);
    }

    #[test_log::test]
    fn test_question_without_options_is_flagged() {
        let exam = BuiltinExam::ImageQuestion;
        let result = run(exam.text(), exam.answer_key());
        let second = &result.records[1];
        assert!(second.likely_has_non_text_content);
        for letter in OptionLetter::iter() {
            assert_eq!(second.options.get(letter), "");
        }
        assert_eq!(second.correct_answer, Some(OptionLetter::C));
    }

    #[test_log::test]
    fn test_q_prefix_with_bracketed_options() {
        let exam = BuiltinExam::QPrefixBracketed;
        let result = run(exam.text(), exam.answer_key());
        assert_eq!(result.format.name, "q_prefix");
        assert_eq!(result.records[0].statement, "Which vitamin deficiency causes scurvy in adults?");
        assert_eq!(result.records[0].options.get(OptionLetter::B), "Vitamin B12");
        assert_eq!(result.records[1].options.get(OptionLetter::D), "Left ventricle");
        assert_eq!(result.records[1].correct_answer, Some(OptionLetter::D));
    }

    #[test_log::test]
    fn test_answer_markers_inside_blocks() {
        let text = concat!(
            "1. Which organ produces insulin in humans?\n",
            "A) Liver\nB) Pancreas\nC) Spleen\nD) Kidney\n",
            "Resposta: B\n",
            "2. Which letter comes third in the alphabet?\n",
            "A) A\nB) B\nC) C\nD) D\n",
            "Gabarito: C\n",
        );
        let result = run(text, "");
        assert_eq!(result.records.len(), 2);
        assert_eq!(result.records[0].options.get(OptionLetter::D), "Kidney");
        assert_eq!(result.records[0].correct_answer, Some(OptionLetter::B));
        assert_eq!(result.records[1].options.get(OptionLetter::D), "D");
        assert_eq!(result.records[1].correct_answer, Some(OptionLetter::C));

        // the pasted key still wins where it has an entry
        let result = run(text, "1-A");
        assert_eq!(result.records[0].correct_answer, Some(OptionLetter::A));
        assert_eq!(result.records[1].correct_answer, Some(OptionLetter::C));
    }

    #[test_log::test]
    fn test_output_is_deterministic() {
        let text = generate_exam(30, &[]);
        let key = generate_answer_key(30);
        let first = run(&text, &key);
        let second = run(&text, &key);
        assert_eq!(first.records, second.records);
        assert_eq!(first.records.len(), 30);
        assert_eq!(
            serde_json::to_string(&first.records).unwrap(),
            serde_json::to_string(&second.records).unwrap()
        );
    }

    #[test_log::test]
    fn test_gap_recovery_restores_glued_question() {
        let text = generate_exam(60, &[7]);
        let key = generate_answer_key(60);
        let result = run(&text, &key);

        let numbers: Vec<u32> = result.records.iter().map(|r| r.number).collect();
        assert_eq!(numbers, (1..=60).collect::<Vec<u32>>());
        let seventh = &result.records[6];
        assert_eq!(seventh.statement, "Which statement about cardiology is correct in this clinical scenario?");
        assert_eq!(seventh.options.get(OptionLetter::D), "fourth alternative");
        assert_eq!(seventh.correct_answer, Some(OptionLetter::C));
        assert!(result.missing_numbers.is_empty());
    }

    #[test_log::test]
    fn test_gap_recovery_outside_band_reports_missing() {
        let text = generate_exam(20, &[7]);
        let result = run(&text, &generate_answer_key(20));
        assert_eq!(result.records.len(), 19);
        assert_eq!(result.missing_numbers, vec![7]);
        assert!(kinds(&result.warnings).contains(&WarningKind::MissingQuestion));

        let mut config = ExtractorConfig::new();
        config.gap_recovery = GapRecoveryPolicy::Always;
        let result = ExamParser::new(config)
            .unwrap()
            .extract_text(&text, "", &SilentObserver, &CancelToken::new())
            .unwrap();
        assert_eq!(result.records.len(), 20);
    }

    #[test_log::test]
    fn test_loose_pass_when_primary_pass_is_empty() {
        let mut text = String::from(
            "1. Route of administration?\n(A) oral\n(B) intravenous\n(C) intramuscular\n2. Dose?\n(A) low\n(B) medium\n(C) high\n",
        );
        for n in 1..=30 {
            text.push_str(&format!("[{}] Ref\n", n));
        }
        let result = run(&text, "AB");
        assert_eq!(result.format.name, "brackets");
        let numbers: Vec<u32> = result.records.iter().map(|r| r.number).collect();
        assert_eq!(numbers, vec![1, 2]);
        assert_eq!(result.records[0].options.get(OptionLetter::B), "intravenous");
        assert!(!kinds(&result.warnings).contains(&WarningKind::ZeroQuestionsDetected));
    }

    #[test_log::test]
    fn test_zero_questions_is_not_an_error() {
        let result = run("This document has plenty of words but no questions at all.", "");
        assert!(result.records.is_empty());
        let kinds = kinds(&result.warnings);
        assert!(kinds.contains(&WarningKind::NoFormatMatch));
        assert!(kinds.contains(&WarningKind::MalformedAnswerKey));
        assert!(kinds.contains(&WarningKind::ZeroQuestionsDetected));
    }

    #[test_log::test]
    fn test_malformed_key_leaves_answers_empty() {
        let exam = BuiltinExam::ArithmeticAndSky;
        let result = run(exam.text(), "???");
        assert!(result.records.iter().all(|r| r.correct_answer.is_none()));
        assert_eq!(result.answer_key_shape, KeyShape::Empty);
        assert_eq!(kinds(&result.warnings), vec![WarningKind::MalformedAnswerKey]);
    }

    #[test]
    fn test_empty_text_is_no_text_error() {
        let res = parser().extract_text(" \n\n ", "A", &SilentObserver, &CancelToken::new());
        assert!(matches!(res, Err(PipelineError::NoText)));
    }

    #[test]
    fn test_invalid_profile_is_config_error() {
        let mut config = ExtractorConfig::new();
        config.option_patterns[0].regex = "(unclosed".to_string();
        assert!(matches!(ExamParser::new(config), Err(PipelineError::Config(_))));
    }

    /// Cancels the run as soon as a given stage is reported.
    struct CancelAt {
        stage: Stage,
        token: CancelToken,
        seen: Mutex<Vec<Stage>>,
    }

    impl PipelineObserver for CancelAt {
        fn on_progress(&self, stage: Stage, _detail: &str) {
            self.seen.lock().unwrap().push(stage);
            if stage == self.stage {
                self.token.cancel();
            }
        }
    }

    #[test]
    fn test_cancellation_between_stages() {
        let token = CancelToken::new();
        let observer = CancelAt {
            stage: Stage::Segmenting,
            token: token.clone(),
            seen: Mutex::new(Vec::new()),
        };
        let exam = BuiltinExam::ArithmeticAndSky;
        let res = parser().extract_text(exam.text(), exam.answer_key(), &observer, &token);
        match res {
            Err(PipelineError::Cancelled { stage }) => assert_eq!(stage, Stage::Extracting),
            other => panic!("expected cancellation, got {:?}", other.map(|r| r.records.len())),
        }
        let seen = observer.seen.lock().unwrap();
        assert_eq!(*seen, vec![Stage::Normalizing, Stage::FormatDetecting, Stage::Segmenting]);
    }

    #[test]
    fn test_stages_are_reported_in_order() {
        let token = CancelToken::new();
        let observer = CancelAt {
            stage: Stage::Idle,
            token: token.clone(),
            seen: Mutex::new(Vec::new()),
        };
        let text = generate_exam(55, &[]);
        parser().extract_text(&text, "", &observer, &token).unwrap();
        let seen = observer.seen.lock().unwrap();
        assert_eq!(
            *seen,
            vec![
                Stage::Normalizing,
                Stage::FormatDetecting,
                Stage::Segmenting,
                Stage::Extracting,
                Stage::KeyParsing,
                Stage::Assembling,
                Stage::GapRecovering,
                Stage::Done,
            ]
        );
    }

    /// Pages whose rendered "images" OCR back to known text.
    struct ScannedPages {
        pages: Vec<&'static str>,
        text_layer: &'static str,
    }

    #[async_trait]
    impl PageSource for ScannedPages {
        fn page_count(&self) -> usize {
            self.pages.len()
        }

        async fn page_text(&self, _page: usize) -> Result<RawPage> {
            Ok(RawPage::Text(self.text_layer.to_string()))
        }

        async fn render_page(&self, page: usize, _dpi: u32) -> Result<PathBuf> {
            Ok(PathBuf::from(format!("scan-{}.png", page)))
        }
    }

    struct FakeOcr {
        languages: Vec<&'static str>,
        pages: Vec<&'static str>,
        calls: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl OcrEngine for FakeOcr {
        async fn available_languages(&self) -> Result<Vec<String>> {
            Ok(self.languages.iter().map(|l| l.to_string()).collect())
        }

        async fn recognize(&self, image: &Path, language: &str) -> Result<String> {
            let name = image.to_string_lossy().to_string();
            self.calls.lock().unwrap().push((name.clone(), language.to_string()));
            let page: usize = name
                .trim_start_matches("scan-")
                .trim_end_matches(".png")
                .parse()
                .map_err(|_| anyhow!("unexpected image {}", name))?;
            Ok(self.pages[page - 1].to_string())
        }
    }

    const SCANNED: [&str; 2] = [
        "1. What is 2+2?\n(A) 3\n(B) 4\n(C) 5\n",
        "2. What color is the sky?\n(A) Red\n(B) Blue\n(C) Green\n",
    ];

    #[test_log::test(tokio::test)]
    async fn test_ocr_fallback_with_language_fallback() {
        let source = ScannedPages {
            pages: SCANNED.to_vec(),
            text_layer: "",
        };
        let ocr = FakeOcr {
            languages: vec!["eng", "osd"],
            pages: SCANNED.to_vec(),
            calls: Mutex::new(Vec::new()),
        };
        let result = parser()
            .parse_source(&source, Some(&ocr), "1-B,2-B", &TracingObserver, &CancelToken::new())
            .await
            .unwrap();

        assert!(result.used_ocr);
        assert_eq!(result.records.len(), 2);
        assert_eq!(result.records[1].correct_answer, Some(OptionLetter::B));
        assert_eq!(
            kinds(&result.warnings),
            vec![WarningKind::InsufficientText, WarningKind::OcrLanguageUnavailable]
        );
        let calls = ocr.calls.lock().unwrap();
        assert_eq!(
            *calls,
            vec![
                ("scan-1.png".to_string(), "eng".to_string()),
                ("scan-2.png".to_string(), "eng".to_string())
            ]
        );
    }

    #[test_log::test(tokio::test)]
    async fn test_missing_ocr_languages_warn_once() {
        let source = TextPageSource::from_text("1. What is 2+2?\n(A) 3\n(B) 4\n(C) 5\n");
        let ocr = FakeOcr {
            languages: vec!["osd"],
            pages: SCANNED.to_vec(),
            calls: Mutex::new(Vec::new()),
        };
        let result = parser()
            .parse_source(&source, Some(&ocr), "1-B", &SilentObserver, &CancelToken::new())
            .await
            .unwrap();
        assert!(!result.used_ocr);
        assert_eq!(result.records.len(), 1);
        assert_eq!(
            kinds(&result.warnings),
            vec![WarningKind::InsufficientText, WarningKind::OcrFailed]
        );
        assert!(result.warnings[1].to_string().contains("no usable OCR language"));
        assert!(ocr.calls.lock().unwrap().is_empty());
    }

    #[test_log::test(tokio::test)]
    async fn test_ocr_failure_keeps_text_layer() {
        let source = TextPageSource::from_text("1. What is 2+2?\n(A) 3\n(B) 4\n(C) 5\n");
        let ocr = FakeOcr {
            languages: vec!["por"],
            pages: Vec::new(),
            calls: Mutex::new(Vec::new()),
        };
        let result = parser()
            .parse_source(&source, Some(&ocr), "1-B", &SilentObserver, &CancelToken::new())
            .await
            .unwrap();
        assert!(!result.used_ocr);
        assert_eq!(result.records.len(), 1);
        assert_eq!(
            kinds(&result.warnings),
            vec![WarningKind::InsufficientText, WarningKind::OcrFailed]
        );
    }

    #[test_log::test(tokio::test)]
    async fn test_forced_ocr_replaces_text_layer() {
        let mut config = ExtractorConfig::new();
        config.ocr.force = true;
        config.ocr.language = "eng".to_string();
        let source = ScannedPages {
            pages: SCANNED.to_vec(),
            text_layer: "Scanned by the exam board archive service, all rights reserved.",
        };
        let ocr = FakeOcr {
            languages: vec!["eng"],
            pages: SCANNED.to_vec(),
            calls: Mutex::new(Vec::new()),
        };
        let result = ExamParser::new(config)
            .unwrap()
            .parse_source(&source, Some(&ocr), "1-A", &SilentObserver, &CancelToken::new())
            .await
            .unwrap();
        assert!(result.used_ocr);
        assert_eq!(result.records.len(), 2);
        assert!(result.warnings.is_empty());
        assert_eq!(ocr.calls.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_blank_scan_without_ocr_is_no_text() {
        let source = ScannedPages {
            pages: SCANNED.to_vec(),
            text_layer: "",
        };
        let res = parser()
            .parse_source(&source, None, "", &SilentObserver, &CancelToken::new())
            .await;
        assert!(matches!(res, Err(PipelineError::NoText)));
    }

    #[tokio::test]
    async fn test_cancel_before_ocr() {
        let source = ScannedPages {
            pages: SCANNED.to_vec(),
            text_layer: "",
        };
        let ocr = FakeOcr {
            languages: vec!["por"],
            pages: SCANNED.to_vec(),
            calls: Mutex::new(Vec::new()),
        };
        let token = CancelToken::new();
        token.cancel();
        let res = parser()
            .parse_source(&source, Some(&ocr), "", &SilentObserver, &token)
            .await;
        assert!(matches!(res, Err(PipelineError::Cancelled { stage: Stage::Acquiring })));
        assert!(ocr.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_parse_missing_file_is_acquisition_error() {
        let res = parse(
            "/nonexistent/exam.pdf",
            "",
            &ExtractorConfig::new(),
            &SilentObserver,
            &CancelToken::new(),
        )
        .await;
        assert!(matches!(res, Err(PipelineError::Acquisition(_))));
    }
}
